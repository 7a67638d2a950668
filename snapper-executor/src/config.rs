use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Settings of the executor service.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// Commands run here and staging paths are resolved against it.
    pub workdir: PathBuf,
    pub shell: PathBuf,
    /// Terminal size exported to commands as `COLUMNS`/`LINES`.
    pub columns: u16,
    pub lines: u16,
    /// Time between SIGTERM and SIGKILL when a command is canceled.
    pub kill_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from((Ipv4Addr::LOCALHOST, 8000)),
            workdir: PathBuf::from("."),
            shell: PathBuf::from("/bin/bash"),
            columns: 134,
            lines: 24,
            kill_grace: Duration::from_secs(5),
        }
    }
}
