//! External tool servers: configuration, sessions and the manager that aggregates them.
//!
//! A tool server is an external process offering "list tools" and "call tool". This
//! module does not speak any particular wire protocol; it consumes sessions through the
//! [`ToolServerSession`] trait and creates them through a [`Connector`]. The stdio
//! connector in [`crate::process`] spawns the configured command and hands its pipes to
//! a caller-supplied protocol adapter.
//!
//! # Lifecycle
//!
//! ```text
//! add_server(..)  ->  start()  ->  list_tools() / call_tool(..)  ->  shutdown()
//! ```
//!
//! `start` is all-or-nothing: if any server fails to connect, the sessions already
//! opened are closed in reverse order and the manager stays inactive. `shutdown`
//! closes every session in reverse order and never fails; close errors are logged.

use crate::tools::ToolSpec;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// How to launch one tool server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables for the process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl ToolServerConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// A live connection to one tool server.
#[async_trait]
pub trait ToolServerSession: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>>;

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value>;

    async fn close(&self) -> Result<()>;
}

/// Opens sessions for configured servers.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        name: &str,
        config: &ToolServerConfig,
    ) -> Result<Box<dyn ToolServerSession>>;
}

/// Sessions acquired so far, released in reverse order of acquisition.
#[derive(Default)]
struct SessionGroup {
    sessions: Vec<(String, Box<dyn ToolServerSession>)>,
}

impl SessionGroup {
    fn push(&mut self, name: String, session: Box<dyn ToolServerSession>) {
        self.sessions.push((name, session));
    }

    fn iter(&self) -> impl Iterator<Item = (&str, &dyn ToolServerSession)> {
        self.sessions
            .iter()
            .map(|(name, session)| (name.as_str(), session.as_ref()))
    }

    async fn close_all(mut self) {
        while let Some((name, session)) = self.sessions.pop() {
            match session.close().await {
                Ok(()) => log::debug!("closed tool server {}", name),
                Err(e) => log::warn!("failed to close tool server {}: {}", name, e),
            }
        }
    }
}

/// Lifecycle and aggregation over named tool servers.
pub struct ToolServerManager {
    connector: Arc<dyn Connector>,
    servers: Vec<(String, ToolServerConfig)>,
    active: Option<SessionGroup>,
}

impl ToolServerManager {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            servers: Vec::new(),
            active: None,
        }
    }

    /// Registers a server. Re-registering a name replaces its config in place.
    ///
    /// Takes effect on the next [`start`](Self::start).
    pub fn add_server(&mut self, name: impl Into<String>, config: ToolServerConfig) {
        let name = name.into();
        match self.servers.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = config,
            None => self.servers.push((name, config)),
        }
    }

    pub fn with_server(mut self, name: impl Into<String>, config: ToolServerConfig) -> Self {
        self.add_server(name, config);
        self
    }

    /// Registered server names in registration order.
    pub fn server_names(&self) -> impl Iterator<Item = &str> {
        self.servers.iter().map(|(name, _)| name.as_str())
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Connects every registered server. Does nothing if already active.
    pub async fn start(&mut self) -> Result<()> {
        if self.active.is_some() {
            return Ok(());
        }

        let mut group = SessionGroup::default();
        for (name, config) in &self.servers {
            match self.connector.connect(name, config).await {
                Ok(session) => {
                    log::debug!("started tool server {} ({})", name, config.command);
                    group.push(name.clone(), session);
                }
                Err(e) => {
                    log::warn!("tool server {} failed to start: {}", name, e);
                    group.close_all().await;
                    return Err(match e {
                        Error::ToolServer { .. } => e,
                        other => Error::tool_server(name.as_str(), other.to_string()),
                    });
                }
            }
        }

        self.active = Some(group);
        Ok(())
    }

    /// Closes every session in reverse order and deactivates the manager.
    pub async fn shutdown(&mut self) {
        if let Some(group) = self.active.take() {
            group.close_all().await;
        }
    }

    /// Union of every active session's tools, in session order.
    ///
    /// Sessions that fail to list are logged and skipped.
    pub async fn list_tools(&self) -> Vec<ToolSpec> {
        let Some(group) = &self.active else {
            return Vec::new();
        };

        let mut tools = Vec::new();
        for (name, session) in group.iter() {
            match session.list_tools().await {
                Ok(listed) => tools.extend(listed),
                Err(e) => log::warn!("tool discovery failed for {}: {}", name, e),
            }
        }
        tools
    }

    /// Calls `name` on the first session that lists it and answers.
    ///
    /// Discovery runs fresh on every call, so tools added or removed by a server
    /// between calls are honored. A server that fails to list or to call is logged
    /// and skipped; `ToolNotFound` means no server succeeded.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        let Some(group) = &self.active else {
            return Err(Error::tool_not_found(name));
        };

        for (server, session) in group.iter() {
            let tools = match session.list_tools().await {
                Ok(tools) => tools,
                Err(e) => {
                    log::warn!("tool discovery failed for {}: {}", server, e);
                    continue;
                }
            };
            if !tools.iter().any(|tool| tool.name == name) {
                continue;
            }
            log::debug!("routing tool {} to server {}", name, server);
            match session.call_tool(name, arguments.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) => log::warn!("tool {} failed on server {}: {}", name, server, e),
            }
        }

        Err(Error::tool_not_found(name))
    }
}

impl std::fmt::Debug for ToolServerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolServerManager")
            .field("servers", &self.servers)
            .field("active", &self.is_active())
            .finish()
    }
}
