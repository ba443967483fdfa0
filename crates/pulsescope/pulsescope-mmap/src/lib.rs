use memmap2::{MmapMut, MmapOptions};
use std::{
    fs::{File, OpenOptions},
    io,
    path::Path,
};

/// A read-write shared mapping of a file-backed object.
///
/// The mapping length is fixed when it is created and never changes.
pub struct MmapFileMut {
    _file: File,
    mmap: MmapMut,
}

impl MmapFileMut {
    /// Create (or reuse) the file at `path`, size it to `size_bytes` and map it read-write.
    ///
    /// Existing contents are preserved when the file already has the right size.
    pub fn create_rw<P: AsRef<Path>>(path: P, size_bytes: u64) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        if file.metadata()?.len() != size_bytes {
            file.set_len(size_bytes)?;
        }

        let mmap = unsafe { MmapOptions::new().len(size_bytes as usize).map_mut(&file)? };
        Ok(Self { _file: file, mmap })
    }

    /// Open an existing file and map at most `max_bytes` of it read-write.
    ///
    /// The mapping never extends past the end of the file, so a short file
    /// yields a short mapping rather than pages that fault on access.
    pub fn open_rw<P: AsRef<Path>>(path: P, max_bytes: u64) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len().min(max_bytes);
        if len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "cannot map an empty file",
            ));
        }

        let mmap = unsafe { MmapOptions::new().len(len as usize).map_mut(&file)? };

        Ok(Self { _file: file, mmap })
    }

    /// Return raw pointer to start of memory mapped file data
    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.mmap.as_mut_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Flush outstanding changes back to the backing object.
    pub fn flush(&self) -> io::Result<()> {
        self.mmap.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("pulsescope_mmap_{name}_{}", std::process::id()))
    }

    #[test]
    fn open_is_capped_at_file_length() {
        let path = scratch_path("capped");
        {
            let _created = MmapFileMut::create_rw(&path, 4096).expect("create");
        }
        let mapped = MmapFileMut::open_rw(&path, 1 << 20).expect("open");
        assert_eq!(mapped.len(), 4096);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn open_missing_file_fails() {
        let path = scratch_path("missing");
        let _ = std::fs::remove_file(&path);
        assert!(MmapFileMut::open_rw(&path, 4096).is_err());
    }

    #[test]
    fn create_preserves_existing_bytes() {
        let path = scratch_path("preserve");
        {
            let mut m = MmapFileMut::create_rw(&path, 64).expect("create");
            unsafe { m.as_mut_ptr().write(0xAB) };
            m.flush().expect("flush");
        }
        let mut again = MmapFileMut::create_rw(&path, 64).expect("recreate");
        assert_eq!(unsafe { again.as_mut_ptr().read() }, 0xAB);
        let _ = std::fs::remove_file(&path);
    }
}
