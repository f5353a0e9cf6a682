//! Tool-server manager tests
//!
//! Lifecycle and routing against in-memory sessions, including sessions that fail to
//! list or close.

use async_trait::async_trait;
use llm_conduit::{
    Connector, Error, Result, ToolServerConfig, ToolServerManager, ToolServerSession, ToolSpec,
};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};

type Journal = Arc<Mutex<Vec<String>>>;

/// Behavior is chosen by the config's command:
/// - "ok": lists its args as tools
/// - "mute": fails every discovery
/// - "sticky": lists its args but fails to close
/// - "refuse": fails to connect
/// - "crash": lists its args but fails every call
struct ScriptedConnector {
    journal: Journal,
}

struct ScriptedSession {
    name: String,
    mode: String,
    tools: Vec<String>,
    journal: Journal,
}

#[async_trait]
impl ToolServerSession for ScriptedSession {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>> {
        if self.mode == "mute" {
            return Err(Error::tool_server(&self.name, "discovery timed out"));
        }
        Ok(self
            .tools
            .iter()
            .map(|t| ToolSpec::new(t.as_str(), format!("{} on {}", t, self.name), json!({})))
            .collect())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        self.journal
            .lock()
            .unwrap()
            .push(format!("call:{}:{}", self.name, name));
        if self.mode == "crash" {
            return Err(Error::tool_server(&self.name, "crash"));
        }
        Ok(json!({"server": self.name, "tool": name, "arguments": arguments}))
    }

    async fn close(&self) -> Result<()> {
        self.journal
            .lock()
            .unwrap()
            .push(format!("close:{}", self.name));
        if self.mode == "sticky" {
            return Err(Error::tool_server(&self.name, "close failed"));
        }
        Ok(())
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(
        &self,
        name: &str,
        config: &ToolServerConfig,
    ) -> Result<Box<dyn ToolServerSession>> {
        if config.command == "refuse" {
            return Err(Error::other("connection refused"));
        }
        self.journal.lock().unwrap().push(format!("open:{name}"));
        Ok(Box::new(ScriptedSession {
            name: name.to_string(),
            mode: config.command.clone(),
            tools: config.args.clone(),
            journal: self.journal.clone(),
        }))
    }
}

fn manager(journal: &Journal) -> ToolServerManager {
    ToolServerManager::new(Arc::new(ScriptedConnector {
        journal: journal.clone(),
    }))
}

#[tokio::test]
async fn test_failing_discovery_is_skipped() {
    let journal = Journal::default();
    let mut servers = manager(&journal)
        .with_server("quiet", ToolServerConfig::new("mute").arg("search"))
        .with_server("search", ToolServerConfig::new("ok").args(["search", "fetch"]));
    servers.start().await.unwrap();

    let names: Vec<_> = servers.list_tools().await.into_iter().map(|t| t.name).collect();
    assert_eq!(names, vec!["search", "fetch"]);

    let result = servers
        .call_tool("search", json!({"q": "rust"}))
        .await
        .unwrap();
    assert_eq!(result["server"], "search");
    assert_eq!(result["arguments"]["q"], "rust");

    servers.shutdown().await;
}

#[tokio::test]
async fn test_failed_call_falls_through_to_next_owner() {
    let journal = Journal::default();
    let mut servers = manager(&journal)
        .with_server("a", ToolServerConfig::new("crash").arg("search"))
        .with_server("b", ToolServerConfig::new("ok").arg("search"));
    servers.start().await.unwrap();

    let result = servers.call_tool("search", json!({"q": "rust"})).await.unwrap();
    assert_eq!(result["server"], "b");
    assert_eq!(result["arguments"]["q"], "rust");

    servers.shutdown().await;
    let calls: Vec<_> = journal
        .lock()
        .unwrap()
        .iter()
        .filter(|entry| entry.starts_with("call:"))
        .cloned()
        .collect();
    assert_eq!(calls, vec!["call:a:search", "call:b:search"]);
}

#[tokio::test]
async fn test_every_owner_failing_is_not_found() {
    let journal = Journal::default();
    let mut servers = manager(&journal)
        .with_server("a", ToolServerConfig::new("crash").arg("search"))
        .with_server("quiet", ToolServerConfig::new("mute").arg("search"));
    servers.start().await.unwrap();

    let err = servers.call_tool("search", json!({})).await.unwrap_err();
    assert!(matches!(err, Error::ToolNotFound(ref name) if name == "search"));

    servers.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_continues_past_close_failures() {
    let journal = Journal::default();
    let mut servers = manager(&journal)
        .with_server("a", ToolServerConfig::new("ok"))
        .with_server("b", ToolServerConfig::new("sticky"))
        .with_server("c", ToolServerConfig::new("ok"));

    servers.start().await.unwrap();
    servers.shutdown().await;

    assert!(!servers.is_active());
    assert_eq!(
        *journal.lock().unwrap(),
        vec!["open:a", "open:b", "open:c", "close:c", "close:b", "close:a"]
    );
}

#[tokio::test]
async fn test_start_failure_reports_server_and_cleans_up() {
    let journal = Journal::default();
    let mut servers = manager(&journal)
        .with_server("a", ToolServerConfig::new("ok"))
        .with_server("down", ToolServerConfig::new("refuse"))
        .with_server("never", ToolServerConfig::new("ok"));

    let err = servers.start().await.unwrap_err();

    assert_eq!(
        err.to_string(),
        "Tool server 'down' failed: Error: connection refused"
    );
    assert!(!servers.is_active());
    assert_eq!(*journal.lock().unwrap(), vec!["open:a", "close:a"]);
}

#[tokio::test]
async fn test_start_is_idempotent_and_restartable() {
    let journal = Journal::default();
    let mut servers = manager(&journal).with_server("a", ToolServerConfig::new("ok").arg("x"));

    servers.start().await.unwrap();
    servers.start().await.unwrap();
    servers.shutdown().await;
    servers.start().await.unwrap();
    servers.shutdown().await;

    assert_eq!(
        *journal.lock().unwrap(),
        vec!["open:a", "close:a", "open:a", "close:a"]
    );
}

#[tokio::test]
async fn test_re_registering_replaces_config() {
    let journal = Journal::default();
    let mut servers = manager(&journal)
        .with_server("a", ToolServerConfig::new("ok").arg("old"))
        .with_server("b", ToolServerConfig::new("ok").arg("other"));
    servers.add_server("a", ToolServerConfig::new("ok").arg("new"));

    assert_eq!(servers.server_names().collect::<Vec<_>>(), vec!["a", "b"]);

    servers.start().await.unwrap();
    let names: Vec<_> = servers.list_tools().await.into_iter().map(|t| t.name).collect();
    assert_eq!(names, vec!["new", "other"]);
    servers.shutdown().await;
}

#[test]
fn test_server_map_from_json() {
    let servers: std::collections::BTreeMap<String, ToolServerConfig> = serde_json::from_value(
        json!({
            "files": {"command": "npx", "args": ["-y", "files-server"], "env": {"ROOT": "/tmp"}},
            "clock": {"command": "clock-server"}
        }),
    )
    .unwrap();

    assert_eq!(servers["files"].args, vec!["-y", "files-server"]);
    assert_eq!(servers["files"].env["ROOT"], "/tmp");
    assert!(servers["clock"].args.is_empty());
}
