//! Subprocess plumbing for stdio tool servers.
//!
//! [`ProcessChannel`] spawns a configured command with piped stdin/stdout and
//! exchanges newline-delimited JSON values with it. The child is killed if the channel
//! is dropped without [`shutdown`](ProcessChannel::shutdown).
//!
//! [`StdioConnector`] is the [`Connector`] that spawns a channel per server and passes
//! it to a protocol adapter, which performs whatever handshake the server's protocol
//! requires and returns the resulting session:
//!
//! ```rust,no_run
//! use llm_conduit::process::StdioConnector;
//! use llm_conduit::tool_server::ToolServerSession;
//!
//! # fn wrap(_: llm_conduit::process::ProcessChannel) -> Box<dyn ToolServerSession> { unimplemented!() }
//! let connector = StdioConnector::new(|name, channel| async move {
//!     log::debug!("handshaking with {name}");
//!     Ok(wrap(channel))
//! });
//! ```

use crate::tool_server::{Connector, ToolServerConfig, ToolServerSession};
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

/// How long [`ProcessChannel::shutdown`] waits for the child to exit on its own.
const EXIT_GRACE: Duration = Duration::from_secs(5);

/// Newline-delimited JSON over a child's stdio.
#[derive(Debug)]
pub struct ProcessChannel {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl ProcessChannel {
    /// Spawns `config.command` with its args and extra environment.
    pub fn spawn(config: &ToolServerConfig) -> Result<Self> {
        let mut child = Command::new(&config.command)
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::stream("child process has no stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::stream("child process has no stdout"))?;

        log::debug!("spawned {} (pid {:?})", config.command, child.id());
        Ok(Self {
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout).lines(),
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Writes one JSON value followed by a newline.
    pub async fn send(&mut self, message: &Value) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| Error::stream("channel input is closed"))?;
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');
        stdin.write_all(&line).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Reads the next JSON value, skipping blank lines. `None` at end of output.
    pub async fn recv(&mut self) -> Result<Option<Value>> {
        while let Some(line) = self.stdout.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            return Ok(Some(serde_json::from_str(&line)?));
        }
        Ok(None)
    }

    /// Sends `message` and waits for the next value.
    pub async fn request(&mut self, message: &Value) -> Result<Value> {
        self.send(message).await?;
        self.recv()
            .await?
            .ok_or_else(|| Error::stream("tool server closed its output"))
    }

    /// Closes stdin and waits briefly for the child to exit, killing it otherwise.
    pub async fn shutdown(mut self) -> Result<()> {
        drop(self.stdin.take());
        match tokio::time::timeout(EXIT_GRACE, self.child.wait()).await {
            Ok(status) => {
                log::debug!("tool server exited with {}", status?);
            }
            Err(_) => {
                log::warn!("tool server did not exit in {:?}, killing it", EXIT_GRACE);
                self.child.kill().await?;
            }
        }
        Ok(())
    }
}

/// Builds a session from a freshly spawned channel.
pub type ProtocolAdapter = Arc<
    dyn Fn(String, ProcessChannel) -> Pin<Box<dyn Future<Output = Result<Box<dyn ToolServerSession>>> + Send>>
        + Send
        + Sync,
>;

/// [`Connector`] that spawns each server as a subprocess.
#[derive(Clone)]
pub struct StdioConnector {
    adapter: ProtocolAdapter,
}

impl StdioConnector {
    pub fn new<F, Fut>(adapter: F) -> Self
    where
        F: Fn(String, ProcessChannel) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Box<dyn ToolServerSession>>> + Send + 'static,
    {
        Self {
            adapter: Arc::new(move |name, channel| Box::pin(adapter(name, channel))),
        }
    }
}

impl std::fmt::Debug for StdioConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioConnector").finish_non_exhaustive()
    }
}

#[async_trait]
impl Connector for StdioConnector {
    async fn connect(
        &self,
        name: &str,
        config: &ToolServerConfig,
    ) -> Result<Box<dyn ToolServerSession>> {
        let channel =
            ProcessChannel::spawn(config).map_err(|e| Error::tool_server(name, e.to_string()))?;
        (self.adapter)(name.to_string(), channel).await
    }
}
