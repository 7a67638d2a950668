#![allow(dead_code)]

use snapper_executor::{ServerConfig, serve_on};
use snapper_remote::{ExecutorConfig, HttpExecutor};
use std::net::SocketAddr;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// An executor service on an ephemeral port, working in a temporary directory.
pub struct TestServer {
    pub addr: SocketAddr,
    pub workdir: TempDir,
    pub shutdown: CancellationToken,
    pub task: JoinHandle<Result<(), snapper_executor::ExecutorError>>,
}

impl TestServer {
    pub async fn start() -> Self {
        let workdir = tempfile::tempdir().expect("create workdir");
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind executor listener");
        let addr = listener.local_addr().expect("listener local addr");

        let config = ServerConfig {
            bind: addr,
            workdir: workdir.path().to_path_buf(),
            kill_grace: Duration::from_millis(500),
            ..ServerConfig::default()
        };
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(serve_on(listener, config, shutdown.clone()));

        Self {
            addr,
            workdir,
            shutdown,
            task,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}/{path}", self.addr)
    }

    pub fn executor(&self) -> HttpExecutor {
        let config = ExecutorConfig {
            url: ExecutorConfig::parse_url(&format!("http://{}", self.addr)).expect("server url"),
            ..ExecutorConfig::default()
        };
        HttpExecutor::new(&config).expect("build client")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
