//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use now_dev::assets::{BuildArtifact, FunctionAsset, FunctionHandle, InvocationPayload, InvocationResult, InvokeError};
use now_dev::builds::builder::BuilderError;
use now_dev::builds::{BuildContext, BuildOutput, Builder, BuilderCatalog, BuilderVersion};
use now_dev::config::DevConfig;
use now_dev::http::DevServer;

/// Builder id of [`StubBuilder`].
pub const STUB_BUILDER: &str = "@test/stub";

/// Builder id of [`FailingBuilder`].
pub const FAILING_BUILDER: &str = "@test/fail";

/// Create a temporary project containing `files`.
pub fn project(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (path, content) in files {
        let full = dir.path().join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(full, content).unwrap();
    }
    dir
}

/// Dev server config for `root` on an ephemeral port, without file watching.
pub fn config_for(root: &Path) -> DevConfig {
    let mut config = DevConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.project.root = root.to_path_buf();
    config.watch.enabled = false;
    config
}

/// Start a dev server for `root`.
pub async fn start(root: &Path, catalog: BuilderCatalog) -> DevServer {
    DevServer::start(config_for(root), catalog).await.unwrap()
}

/// Client that doesn't follow redirects.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

pub fn url(server: &DevServer, path: &str) -> String {
    format!("http://{}{}", server.local_addr(), path)
}

/// A function that answers every invocation with a fixed result.
#[derive(Debug)]
pub struct StubFunction {
    pub result: InvocationResult,
    pub payloads: Mutex<Vec<InvocationPayload>>,
    pub destroyed: AtomicBool,
}

impl StubFunction {
    pub fn new(result: InvocationResult) -> Arc<Self> {
        Arc::new(Self {
            result,
            payloads: Mutex::new(Vec::new()),
            destroyed: AtomicBool::new(false),
        })
    }

    /// `{statusCode: 200, body: "aGVsbG8=", encoding: "base64"}`
    pub fn hello() -> Arc<Self> {
        Self::new(serde_json::from_str(r#"{ "statusCode": 200, "body": "aGVsbG8=", "encoding": "base64" }"#).unwrap())
    }

    pub fn last_payload(&self) -> Option<InvocationPayload> {
        self.payloads.lock().unwrap().last().cloned()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FunctionHandle for StubFunction {
    async fn invoke(&self, payload: InvocationPayload) -> Result<InvocationResult, InvokeError> {
        self.payloads.lock().unwrap().push(payload);
        Ok(self.result.clone())
    }

    async fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
    }
}

/// Builds every entrypoint into the same [`StubFunction`].
#[derive(Clone)]
pub struct StubBuilder {
    pub function: Arc<StubFunction>,
    pub builds: Arc<AtomicUsize>,
}

impl StubBuilder {
    pub fn new(function: Arc<StubFunction>) -> Self {
        Self {
            function,
            builds: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Builder for StubBuilder {
    fn version(&self) -> BuilderVersion {
        BuilderVersion::V2
    }

    async fn build(&self, ctx: BuildContext) -> Result<BuildOutput, BuilderError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        let asset = FunctionAsset::new(self.function.clone(), ctx.entrypoint.clone());
        Ok(BuildOutput::single(ctx.entrypoint, BuildArtifact::Function(asset)))
    }
}

/// Always fails.
pub struct FailingBuilder;

#[async_trait]
impl Builder for FailingBuilder {
    fn version(&self) -> BuilderVersion {
        BuilderVersion::V2
    }

    async fn build(&self, _ctx: BuildContext) -> Result<BuildOutput, BuilderError> {
        Err("syntax error on line 1".into())
    }
}

/// Default catalog plus the stub and failing builders.
pub fn catalog_with(function: Arc<StubFunction>) -> (BuilderCatalog, Arc<AtomicUsize>) {
    let builder = StubBuilder::new(function);
    let builds = builder.builds.clone();
    let catalog = BuilderCatalog::with_defaults()
        .register(STUB_BUILDER, builder)
        .register(FAILING_BUILDER, FailingBuilder);
    (catalog, builds)
}

/// Start a mock backend that answers with the request line it received.
pub async fn start_echo_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let mut buf = vec![0u8; 8192];
                        let n = socket.read(&mut buf).await.unwrap_or(0);
                        let head = String::from_utf8_lossy(&buf[..n]);
                        let request_line = head.lines().next().unwrap_or_default().to_string();

                        let response_str = format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nX-Upstream: echo\r\nConnection: close\r\n\r\n{}",
                            request_line.len(),
                            request_line
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });
    addr
}
