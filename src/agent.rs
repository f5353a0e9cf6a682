//! Multi-step agent loop over local tools and tool servers.
//!
//! An [`Agent`] sends the conversation to its model together with every tool it can
//! reach, executes whatever tool calls come back, appends the results to the history
//! and asks again. It stops when the model answers without tool calls or after
//! `max_steps` model calls.
//!
//! ```text
//! history = [user prompt]
//! repeat max_steps times:
//!     response = model(history, tools)
//!     history += assistant(response)
//!     no tool calls?  -> Finished(response.text)
//!     for each call:  history += tool(call.id, execute(call))
//! -> MaxStepsReached
//! ```
//!
//! # Tool routing
//!
//! Each call is dispatched by name at call time. Local tools win: a name registered in
//! the agent's [`ToolRegistry`] is always executed locally, even if a tool server also
//! offers it. Every other name goes to the [`ToolServerManager`], which finds the first
//! server listing it.
//!
//! Tool failures never abort the run. They become the tool's result text so the model
//! can react to them:
//!
//! - local tool error: `"Error: <error>"`
//! - remote failure or unknown tool: `"Error: Tool <name> not found or failed: <error>"`
//!
//! Backend failures do abort the run and are returned from [`Agent::run`].
//!
//! # Example
//!
//! ```rust,no_run
//! use llm_conduit::{Agent, Pipeline, RunOutcome, tool};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn example(pipeline: Arc<Pipeline>) -> llm_conduit::Result<()> {
//! let clock = tool("current_time", "Current UTC time")
//!     .build(|_| async { Ok(json!("2026-01-01T00:00:00Z")) });
//!
//! let mut agent = Agent::builder()
//!     .model(pipeline.model("gpt-4o"))
//!     .tool(clock)
//!     .max_steps(5)
//!     .build()?;
//!
//! match agent.run("What time is it?").await? {
//!     RunOutcome::Finished(text) => println!("{text}"),
//!     RunOutcome::MaxStepsReached => println!("gave up"),
//! }
//! # Ok(())
//! # }
//! ```

use crate::pipeline::ModelHandle;
use crate::tool_server::ToolServerManager;
use crate::tools::{Tool, ToolRegistry, ToolSpec};
use crate::types::{Message, ToolCall};
use crate::{Error, Result};
use serde_json::Value;
use std::collections::HashSet;

/// Text reported when the step limit ends a run.
pub const MAX_STEPS_REACHED: &str = "Max steps reached";

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The model replied without tool calls; holds the reply text.
    Finished(String),
    /// Every step produced tool calls.
    MaxStepsReached,
}

impl RunOutcome {
    pub fn text(&self) -> &str {
        match self {
            RunOutcome::Finished(text) => text,
            RunOutcome::MaxStepsReached => MAX_STEPS_REACHED,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, RunOutcome::Finished(_))
    }

    pub fn into_text(self) -> String {
        match self {
            RunOutcome::Finished(text) => text,
            RunOutcome::MaxStepsReached => MAX_STEPS_REACHED.to_string(),
        }
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.text())
    }
}

/// Tool-using agent bound to one model.
pub struct Agent {
    model: ModelHandle,
    tools: ToolRegistry,
    servers: Option<ToolServerManager>,
    max_steps: usize,
    history: Vec<Message>,
}

impl Agent {
    pub const DEFAULT_MAX_STEPS: usize = 10;

    pub fn builder() -> AgentBuilder {
        AgentBuilder::default()
    }

    /// Starts the agent's tool servers, if any.
    pub async fn enter(&mut self) -> Result<()> {
        match self.servers.as_mut() {
            Some(servers) => servers.start().await,
            None => Ok(()),
        }
    }

    /// Shuts the agent's tool servers down.
    pub async fn exit(&mut self) {
        if let Some(servers) = self.servers.as_mut() {
            servers.shutdown().await;
        }
    }

    /// Runs the loop for one prompt, replacing any previous history.
    pub async fn run(&mut self, prompt: impl Into<String>) -> Result<RunOutcome> {
        self.history = vec![Message::user(prompt)];
        let specs = self.tool_specs().await;

        for step in 0..self.max_steps {
            let response = self
                .model
                .generate_with_tools(self.history.clone(), &specs)
                .await?;

            self.history.push(Message::assistant_with_tools(
                response.text.clone(),
                response.tool_calls.clone(),
            ));

            if !response.has_tool_calls() {
                log::debug!("agent finished after {} step(s)", step + 1);
                return Ok(RunOutcome::Finished(response.text));
            }

            for call in &response.tool_calls {
                let content = self.dispatch(call).await;
                self.history
                    .push(Message::tool_result(&call.id, &call.name, content));
            }
        }

        log::debug!("agent hit max_steps ({})", self.max_steps);
        Ok(RunOutcome::MaxStepsReached)
    }

    /// Local tool specs followed by remote ones whose names are not already taken.
    pub async fn tool_specs(&self) -> Vec<ToolSpec> {
        let mut specs = self.tools.specs();
        let Some(servers) = &self.servers else {
            return specs;
        };

        let mut seen: HashSet<String> = specs.iter().map(|s| s.name.clone()).collect();
        for remote in servers.list_tools().await {
            if seen.insert(remote.name.clone()) {
                specs.push(remote);
            }
        }
        specs
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn servers(&self) -> Option<&ToolServerManager> {
        self.servers.as_ref()
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    pub fn model(&self) -> &ModelHandle {
        &self.model
    }

    async fn dispatch(&self, call: &ToolCall) -> String {
        if let Some(tool) = self.tools.get(&call.name) {
            log::debug!("executing local tool {}", call.name);
            return match tool.execute(call.arguments_value()).await {
                Ok(value) => render_result(value),
                Err(e) => format!("Error: {e}"),
            };
        }

        let result = match &self.servers {
            Some(servers) => servers.call_tool(&call.name, call.arguments_value()).await,
            None => Err(Error::tool_not_found(&call.name)),
        };
        match result {
            Ok(value) => render_result(value),
            Err(e) => format!("Error: Tool {} not found or failed: {}", call.name, e),
        }
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("target", &self.model.target())
            .field("tools", &self.tools)
            .field("servers", &self.servers)
            .field("max_steps", &self.max_steps)
            .field("history", &format!("{} messages", self.history.len()))
            .finish()
    }
}

/// Strings are passed through as is; other values are serialized as JSON.
fn render_result(value: Value) -> String {
    match value {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

/// Builder for [`Agent`].
#[derive(Default)]
pub struct AgentBuilder {
    model: Option<ModelHandle>,
    tools: ToolRegistry,
    servers: Option<ToolServerManager>,
    max_steps: Option<usize>,
}

impl std::fmt::Debug for AgentBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentBuilder")
            .field("model", &self.model.as_ref().map(|m| m.target()))
            .field("tools", &format!("{} tools", self.tools.len()))
            .field("servers", &self.servers.is_some())
            .field("max_steps", &self.max_steps)
            .finish()
    }
}

impl AgentBuilder {
    pub fn model(mut self, model: ModelHandle) -> Self {
        self.model = Some(model);
        self
    }

    pub fn tool(mut self, tool: Tool) -> Self {
        self.tools.register(tool);
        self
    }

    pub fn tools(mut self, tools: impl IntoIterator<Item = Tool>) -> Self {
        for tool in tools {
            self.tools.register(tool);
        }
        self
    }

    pub fn servers(mut self, servers: ToolServerManager) -> Self {
        self.servers = Some(servers);
        self
    }

    pub fn max_steps(mut self, steps: usize) -> Self {
        self.max_steps = Some(steps);
        self
    }

    pub fn build(self) -> Result<Agent> {
        let model = self
            .model
            .ok_or_else(|| Error::config("model is required"))?;

        let max_steps = self.max_steps.unwrap_or(Agent::DEFAULT_MAX_STEPS);
        if max_steps == 0 {
            return Err(Error::config("max_steps must be at least 1"));
        }

        Ok(Agent {
            model,
            tools: self.tools,
            servers: self.servers,
            max_steps,
            history: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ChatBackend, ChatRequest};
    use crate::pipeline::Pipeline;
    use crate::types::ModelResponse;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Silent;

    #[async_trait]
    impl ChatBackend for Silent {
        async fn complete(&self, _request: &ChatRequest<'_>) -> Result<ModelResponse> {
            Ok(ModelResponse::new("done"))
        }
    }

    fn handle() -> ModelHandle {
        Arc::new(Pipeline::builder().backend(Silent).build().unwrap()).model("m")
    }

    #[test]
    fn test_builder_defaults_and_validation() {
        let agent = Agent::builder().model(handle()).build().unwrap();
        assert_eq!(agent.max_steps(), 10);
        assert!(agent.history().is_empty());

        assert!(matches!(Agent::builder().build(), Err(Error::Config(_))));
        assert!(matches!(
            Agent::builder().model(handle()).max_steps(0).build(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_outcome_text() {
        assert_eq!(RunOutcome::MaxStepsReached.text(), "Max steps reached");
        assert_eq!(RunOutcome::Finished("hi".into()).to_string(), "hi");
        assert!(!RunOutcome::MaxStepsReached.is_finished());
    }

    #[test]
    fn test_render_result() {
        assert_eq!(render_result(Value::String("plain".into())), "plain");
        assert_eq!(render_result(serde_json::json!({"a": 1})), "{\"a\":1}");
    }

    #[tokio::test]
    async fn test_unknown_tool_without_servers() {
        let agent = Agent::builder().model(handle()).build().unwrap();
        let call = ToolCall::new("1", "ghost", serde_json::Map::new());
        assert_eq!(
            agent.dispatch(&call).await,
            "Error: Tool ghost not found or failed: Tool ghost not found on any server"
        );
    }

    #[tokio::test]
    async fn test_run_without_tool_calls_finishes() {
        let mut agent = Agent::builder().model(handle()).build().unwrap();
        let outcome = agent.run("hi").await.unwrap();
        assert_eq!(outcome, RunOutcome::Finished("done".into()));
        assert_eq!(agent.history().len(), 2);
    }
}
