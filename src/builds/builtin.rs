//! Built-in builders.
//!
//! - `@now/static`: serves the entrypoint file as-is
//! - `@now/exec`: turns the entrypoint into a function that runs as a
//!   child process per invocation, JSON payload on stdin, JSON result on
//!   stdout

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, Command};

use crate::assets::artifact::{BuildArtifact, FunctionAsset, StaticFileRef};
use crate::assets::function::{FunctionHandle, InvocationPayload, InvocationResult, InvokeError};
use crate::builds::builder::{BuildContext, BuildOutput, Builder, BuilderError, BuilderVersion};
use crate::config::env::EnvMap;

pub const STATIC_BUILDER: &str = "@now/static";
pub const EXEC_BUILDER: &str = "@now/exec";

/// Serves each entrypoint from disk at its own relative path.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticBuilder;

#[async_trait]
impl Builder for StaticBuilder {
    fn version(&self) -> BuilderVersion {
        BuilderVersion::V2
    }

    async fn build(&self, ctx: BuildContext) -> Result<BuildOutput, BuilderError> {
        let path = ctx.entrypoint_path();
        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(format!("{} is not a file", path.display()).into());
        }
        Ok(BuildOutput::single(
            ctx.entrypoint,
            BuildArtifact::StaticFile(StaticFileRef { path }),
        ))
    }
}

/// Runs the entrypoint (or `config.command`) as a per-request process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecBuilder;

#[async_trait]
impl Builder for ExecBuilder {
    fn version(&self) -> BuilderVersion {
        BuilderVersion::V2
    }

    async fn build(&self, ctx: BuildContext) -> Result<BuildOutput, BuilderError> {
        let entrypoint = ctx.entrypoint_path();
        if !tokio::fs::try_exists(&entrypoint).await? {
            return Err(format!("entrypoint {} does not exist", entrypoint.display()).into());
        }

        let mut argv = command_from_config(&ctx.config)?;
        argv.push(entrypoint.to_string_lossy().into_owned());

        let function = ExecFunction {
            argv,
            work_path: ctx.work_path.clone(),
            env: ctx.runtime_env.clone(),
            destroyed: AtomicBool::new(false),
        };
        let asset = FunctionAsset::new(Arc::new(function), ctx.entrypoint.clone());
        Ok(BuildOutput::single(ctx.entrypoint, BuildArtifact::Function(asset)))
    }
}

fn command_from_config(config: &serde_json::Map<String, serde_json::Value>) -> Result<Vec<String>, BuilderError> {
    match config.get("command") {
        None | Some(serde_json::Value::Null) => Ok(Vec::new()),
        Some(serde_json::Value::String(program)) => Ok(vec![program.clone()]),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| BuilderError::from("`command` entries must be strings"))
            })
            .collect(),
        Some(_) => Err("`command` must be a string or an array of strings".into()),
    }
}

/// A function backed by a child process.
#[derive(Debug)]
pub struct ExecFunction {
    argv: Vec<String>,
    work_path: PathBuf,
    env: EnvMap,
    destroyed: AtomicBool,
}

#[async_trait]
impl FunctionHandle for ExecFunction {
    async fn invoke(&self, payload: InvocationPayload) -> Result<InvocationResult, InvokeError> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(InvokeError::Destroyed);
        }
        let Some((program, args)) = self.argv.split_first() else {
            return Err(InvokeError::InvalidResponse("empty command".into()));
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(&self.work_path)
            .env_clear()
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if !self.env.contains_key("PATH") {
            if let Some(path) = std::env::var_os("PATH") {
                command.env("PATH", path);
            }
        }

        let mut child = command.spawn().map_err(InvokeError::Spawn)?;
        let input = serde_json::to_vec(&payload).map_err(|e| InvokeError::InvalidResponse(e.to_string()))?;
        let stdin = child.stdin.take();
        let (written, output) = tokio::join!(feed_stdin(stdin, &input), child.wait_with_output());
        let output = output?;
        written?;
        if !output.status.success() {
            return Err(InvokeError::Exited {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        serde_json::from_slice(&output.stdout).map_err(|e| InvokeError::InvalidResponse(e.to_string()))
    }

    async fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
    }
}

/// Write the payload and close stdin. A process that exits without
/// reading it is judged by its output instead.
async fn feed_stdin(stdin: Option<ChildStdin>, input: &[u8]) -> std::io::Result<()> {
    let Some(mut stdin) = stdin else {
        return Ok(());
    };
    let written = async {
        stdin.write_all(input).await?;
        stdin.shutdown().await
    }
    .await;
    match written {
        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
        other => other,
    }
}
