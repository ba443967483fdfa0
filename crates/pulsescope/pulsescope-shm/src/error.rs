use std::io;

#[derive(Debug, thiserror::Error)]
pub enum ShmError {
    #[error("failed to attach '{path}'")]
    Attach {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("segment is {len} bytes, header needs {required}")]
    TooSmall { len: usize, required: usize },

    #[error("mapping at {addr:#x} is not aligned to {align} bytes")]
    Misaligned { addr: usize, align: usize },

    #[error("segment is detached")]
    Detached,
}
