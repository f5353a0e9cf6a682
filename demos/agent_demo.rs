//! Agent Demo
//!
//! Runs a tool-using agent with local tools and, optionally, one subprocess tool
//! server speaking newline-delimited JSON:
//!
//! ```text
//! -> {"method": "list_tools"}
//! <- {"tools": [{"name": "...", "description": "...", "inputSchema": {...}}]}
//! -> {"method": "call_tool", "name": "...", "arguments": {...}}
//! <- {"result": ...}
//! ```
//!
//! Usage:
//!   OPENAI_API_KEY=sk-... cargo run --example agent_demo
//!   TOOL_SERVER="python3 my_server.py" OPENAI_API_KEY=sk-... cargo run --example agent_demo

use async_trait::async_trait;
use llm_conduit::config::backend_for;
use llm_conduit::{
    Agent, CostTracker, Error, Pipeline, ProcessChannel, RunOutcome, StdioConnector,
    ToolServerConfig, ToolServerManager, ToolServerSession, ToolSpec, tool,
};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Session over the demo's line-JSON protocol.
struct LineJsonSession {
    channel: Mutex<Option<ProcessChannel>>,
}

impl LineJsonSession {
    async fn request(&self, message: Value) -> llm_conduit::Result<Value> {
        let mut guard = self.channel.lock().await;
        let channel = guard
            .as_mut()
            .ok_or_else(|| Error::stream("session closed"))?;
        channel.request(&message).await
    }
}

#[async_trait]
impl ToolServerSession for LineJsonSession {
    async fn list_tools(&self) -> llm_conduit::Result<Vec<ToolSpec>> {
        let reply = self.request(json!({"method": "list_tools"})).await?;
        Ok(serde_json::from_value(reply["tools"].clone())?)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> llm_conduit::Result<Value> {
        let reply = self
            .request(json!({"method": "call_tool", "name": name, "arguments": arguments}))
            .await?;
        match reply.get("error").and_then(Value::as_str) {
            Some(message) => Err(Error::tool(message)),
            None => Ok(reply["result"].clone()),
        }
    }

    async fn close(&self) -> llm_conduit::Result<()> {
        match self.channel.lock().await.take() {
            Some(channel) => channel.shutdown().await,
            None => Ok(()),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let costs = Arc::new(CostTracker::new());
    let pipeline = Arc::new(
        Pipeline::builder()
            .backend(backend_for("gpt-4o")?)
            .middleware(costs.clone())
            .build()?,
    );

    let add = tool("add", "Add two numbers")
        .param("a", "number")
        .param("b", "number")
        .build(|args| async move {
            let a = args["a"].as_f64().unwrap_or(0.0);
            let b = args["b"].as_f64().unwrap_or(0.0);
            Ok(json!({"result": a + b}))
        });

    let multiply = tool("multiply", "Multiply two numbers")
        .param("a", "number")
        .param("b", "number")
        .build(|args| async move {
            let a = args["a"].as_f64().unwrap_or(0.0);
            let b = args["b"].as_f64().unwrap_or(0.0);
            Ok(json!({"result": a * b}))
        });

    let mut builder = Agent::builder()
        .model(pipeline.model("gpt-4o"))
        .tools([add, multiply])
        .max_steps(6);

    if let Ok(command_line) = std::env::var("TOOL_SERVER") {
        let mut parts = command_line.split_whitespace();
        let command = parts
            .next()
            .ok_or_else(|| anyhow::anyhow!("TOOL_SERVER is empty"))?;
        let connector = StdioConnector::new(|name, channel| async move {
            log::info!("connected to tool server {}", name);
            Ok(Box::new(LineJsonSession {
                channel: Mutex::new(Some(channel)),
            }) as Box<dyn ToolServerSession>)
        });
        let servers = ToolServerManager::new(Arc::new(connector))
            .with_server("external", ToolServerConfig::new(command).args(parts));
        builder = builder.servers(servers);
    }

    let mut agent = builder.build()?;
    agent.enter().await?;

    let tools: Vec<String> = agent.tool_specs().await.into_iter().map(|t| t.name).collect();
    println!("tools available: {}", tools.join(", "));

    let outcome = agent.run("What is (12 + 30) * 3? Use the tools.").await;
    agent.exit().await;

    match outcome? {
        RunOutcome::Finished(text) => println!("\nanswer: {}", text),
        RunOutcome::MaxStepsReached => println!("\nthe agent ran out of steps"),
    }
    for message in agent.history() {
        println!("  [{}] {}", message.role().as_str(), message.content());
    }

    let totals = costs.totals();
    println!("\nspent ${:.6} over {} requests", totals.cost_usd, totals.requests);
    Ok(())
}
