mod bridge;
mod host;
mod server;
mod session;

pub use bridge::Bridge;
pub use host::{FixedHostProbe, HostProbe, ProcHostProbe};
pub use server::{HANDSHAKE_TIMEOUT, OriginPolicy, serve};
pub use session::{
    GRID_PERIOD, STATUS_PERIOD, SeriesCatalog, SessionError, TELEMETRY_PERIOD,
    WRITE_TIMEOUT, run_session,
};
