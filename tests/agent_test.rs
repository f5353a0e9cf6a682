//! Agent loop integration tests
//!
//! A scripted backend plays the model: each step pops the next reply, which may ask
//! for tool calls. Remote tools come from an in-memory connector.

use async_trait::async_trait;
use llm_conduit::{
    Agent, ChatBackend, ChatRequest, Connector, Error, Message, MessageRole, ModelResponse,
    Pipeline, Result, RunOutcome, ToolCall, ToolServerConfig, ToolServerManager,
    ToolServerSession, ToolSpec, tool,
};
use serde_json::{Map, Value, json};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct ScriptedModel {
    replies: Mutex<VecDeque<ModelResponse>>,
    /// Tool names advertised on each call.
    advertised: Mutex<Vec<Vec<String>>>,
    /// Conversation received on each call.
    conversations: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedModel {
    fn new(replies: Vec<ModelResponse>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            ..Default::default()
        })
    }

    fn calls(&self) -> usize {
        self.conversations.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatBackend for ScriptedModel {
    async fn complete(&self, request: &ChatRequest<'_>) -> Result<ModelResponse> {
        self.advertised
            .lock()
            .unwrap()
            .push(request.tools.iter().map(|t| t.name.clone()).collect());
        self.conversations
            .lock()
            .unwrap()
            .push(request.messages.to_vec());
        Ok(self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ModelResponse::new("fallback answer")))
    }
}

fn call(id: &str, name: &str) -> ToolCall {
    ToolCall::new(id, name, Map::new())
}

fn asks_for(calls: Vec<ToolCall>) -> ModelResponse {
    ModelResponse::new("").with_tool_calls(calls)
}

fn pipeline(model: &Arc<ScriptedModel>) -> Arc<Pipeline> {
    Arc::new(
        Pipeline::builder()
            .shared_backend(model.clone())
            .build()
            .unwrap(),
    )
}

fn counting_tool(name: &'static str, counter: &Arc<AtomicUsize>, output: Value) -> llm_conduit::Tool {
    let counter = counter.clone();
    tool(name, format!("{name} tool")).build(move |_args| {
        let counter = counter.clone();
        let output = output.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(output)
        }
    })
}

#[tokio::test]
async fn test_only_requested_tool_runs() {
    let model = ScriptedModel::new(vec![
        asks_for(vec![call("call_1", "tool_a")]),
        ModelResponse::new("all done"),
    ]);
    let a_runs = Arc::new(AtomicUsize::new(0));
    let b_runs = Arc::new(AtomicUsize::new(0));

    let mut agent = Agent::builder()
        .model(pipeline(&model).model("gpt-4o"))
        .tool(counting_tool("tool_a", &a_runs, json!("A result")))
        .tool(counting_tool("tool_b", &b_runs, json!("B result")))
        .build()
        .unwrap();

    let outcome = agent.run("use tool a").await.unwrap();

    assert_eq!(outcome, RunOutcome::Finished("all done".into()));
    assert_eq!(a_runs.load(Ordering::SeqCst), 1);
    assert_eq!(b_runs.load(Ordering::SeqCst), 0);

    let roles: Vec<_> = agent.history().iter().map(|m| m.role()).collect();
    assert_eq!(
        roles,
        vec![
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::Tool,
            MessageRole::Assistant,
        ]
    );
    assert_eq!(agent.history()[2].content(), "A result");

    // The second model call saw the tool result
    let second = &model.conversations.lock().unwrap()[1];
    assert!(matches!(
        &second[2],
        Message::Tool { tool_call_id, name, .. } if tool_call_id == "call_1" && name == "tool_a"
    ));
}

#[tokio::test]
async fn test_max_steps_reached() {
    let model = ScriptedModel::new(
        (0..5)
            .map(|i| asks_for(vec![call(&format!("c{i}"), "tool_a")]))
            .collect(),
    );
    let runs = Arc::new(AtomicUsize::new(0));

    let mut agent = Agent::builder()
        .model(pipeline(&model).model("gpt-4o"))
        .tool(counting_tool("tool_a", &runs, json!({"ok": true})))
        .max_steps(3)
        .build()
        .unwrap();

    let outcome = agent.run("loop forever").await.unwrap();

    assert_eq!(outcome, RunOutcome::MaxStepsReached);
    assert_eq!(outcome.text(), "Max steps reached");
    assert_eq!(model.calls(), 3);
    assert_eq!(runs.load(Ordering::SeqCst), 3);
    assert_eq!(agent.history()[2].content(), "{\"ok\":true}");
}

#[tokio::test]
async fn test_multiple_calls_in_one_step_run_in_order() {
    let model = ScriptedModel::new(vec![
        asks_for(vec![call("1", "first"), call("2", "second")]),
        ModelResponse::new("done"),
    ]);
    let runs = Arc::new(AtomicUsize::new(0));

    let mut agent = Agent::builder()
        .model(pipeline(&model).model("gpt-4o"))
        .tool(counting_tool("first", &runs, json!("one")))
        .tool(counting_tool("second", &runs, json!("two")))
        .build()
        .unwrap();

    agent.run("go").await.unwrap();

    let results: Vec<_> = agent
        .history()
        .iter()
        .filter(|m| m.role() == MessageRole::Tool)
        .map(|m| m.content().to_string())
        .collect();
    assert_eq!(results, vec!["one", "two"]);
}

#[tokio::test]
async fn test_local_tool_error_becomes_result_text() {
    let model = ScriptedModel::new(vec![
        asks_for(vec![call("1", "flaky")]),
        ModelResponse::new("recovered"),
    ]);
    let flaky = tool("flaky", "Always fails")
        .build(|_| async { Err::<Value, _>(Error::tool("disk on fire")) });

    let mut agent = Agent::builder()
        .model(pipeline(&model).model("gpt-4o"))
        .tool(flaky)
        .build()
        .unwrap();

    let outcome = agent.run("try it").await.unwrap();

    assert!(outcome.is_finished());
    assert_eq!(
        agent.history()[2].content(),
        "Error: Tool execution error: disk on fire"
    );
}

#[tokio::test]
async fn test_unknown_tool_becomes_result_text() {
    let model = ScriptedModel::new(vec![
        asks_for(vec![call("1", "ghost")]),
        ModelResponse::new("ok"),
    ]);
    let mut agent = Agent::builder()
        .model(pipeline(&model).model("gpt-4o"))
        .build()
        .unwrap();

    agent.run("call a ghost").await.unwrap();
    assert_eq!(
        agent.history()[2].content(),
        "Error: Tool ghost not found or failed: Tool ghost not found on any server"
    );
}

/// Serves a fixed tool list; `explode` always fails.
struct RemoteSession {
    server: String,
    tools: Vec<String>,
}

#[async_trait]
impl ToolServerSession for RemoteSession {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>> {
        Ok(self
            .tools
            .iter()
            .map(|name| ToolSpec::new(name.as_str(), "remote", json!({"type": "object"})))
            .collect())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        if name == "explode" {
            return Err(Error::tool_server(&self.server, "tool crashed"));
        }
        Ok(json!(format!("remote {name} {arguments}")))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

struct InMemoryConnector;

#[async_trait]
impl Connector for InMemoryConnector {
    async fn connect(
        &self,
        name: &str,
        config: &ToolServerConfig,
    ) -> Result<Box<dyn ToolServerSession>> {
        Ok(Box::new(RemoteSession {
            server: name.to_string(),
            tools: config.args.clone(),
        }))
    }
}

fn servers() -> ToolServerManager {
    ToolServerManager::new(Arc::new(InMemoryConnector))
        .with_server("files", ToolServerConfig::new("files-server").args(["shared", "read"]))
        .with_server("web", ToolServerConfig::new("web-server").args(["read", "explode"]))
}

#[tokio::test]
async fn test_remote_tools_are_advertised_after_enter() {
    let model = ScriptedModel::new(vec![ModelResponse::new("nothing to do")]);
    let runs = Arc::new(AtomicUsize::new(0));

    let mut agent = Agent::builder()
        .model(pipeline(&model).model("gpt-4o"))
        .tool(counting_tool("shared", &runs, json!("local")))
        .servers(servers())
        .build()
        .unwrap();

    // Before enter the servers are not running
    let names: Vec<_> = agent.tool_specs().await.into_iter().map(|t| t.name).collect();
    assert_eq!(names, vec!["shared"]);

    agent.enter().await.unwrap();
    agent.run("hi").await.unwrap();
    agent.exit().await;

    assert_eq!(
        model.advertised.lock().unwrap()[0],
        vec!["shared", "read", "explode"]
    );
    assert!(!agent.servers().unwrap().is_active());
}

#[tokio::test]
async fn test_local_tool_wins_over_remote() {
    let model = ScriptedModel::new(vec![
        asks_for(vec![call("1", "shared"), call("2", "read")]),
        ModelResponse::new("done"),
    ]);
    let runs = Arc::new(AtomicUsize::new(0));

    let mut agent = Agent::builder()
        .model(pipeline(&model).model("gpt-4o"))
        .tool(counting_tool("shared", &runs, json!("local shared")))
        .servers(servers())
        .build()
        .unwrap();

    agent.enter().await.unwrap();
    agent.run("go").await.unwrap();
    agent.exit().await;

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(agent.history()[2].content(), "local shared");
    // "read" is routed to the first server that lists it
    assert_eq!(agent.history()[3].content(), "remote read {}");
}

#[tokio::test]
async fn test_remote_failure_becomes_result_text() {
    let model = ScriptedModel::new(vec![
        asks_for(vec![call("1", "explode")]),
        ModelResponse::new("handled"),
    ]);

    let mut agent = Agent::builder()
        .model(pipeline(&model).model("gpt-4o"))
        .servers(servers())
        .build()
        .unwrap();

    agent.enter().await.unwrap();
    let outcome = agent.run("boom").await.unwrap();
    agent.exit().await;

    assert_eq!(outcome.into_text(), "handled");
    assert_eq!(
        agent.history()[2].content(),
        "Error: Tool explode not found or failed: Tool explode not found on any server"
    );
}

#[tokio::test]
async fn test_backend_error_aborts_run() {
    struct Broken;

    #[async_trait]
    impl ChatBackend for Broken {
        async fn complete(&self, _request: &ChatRequest<'_>) -> Result<ModelResponse> {
            Err(Error::api("API error 401: unauthorized"))
        }
    }

    let pipeline = Arc::new(Pipeline::builder().backend(Broken).build().unwrap());
    let mut agent = Agent::builder()
        .model(pipeline.model("gpt-4o"))
        .build()
        .unwrap();

    assert!(matches!(agent.run("hi").await, Err(Error::Api(_))));
}

#[tokio::test]
async fn test_each_run_starts_fresh_history() {
    let model = ScriptedModel::new(vec![ModelResponse::new("one"), ModelResponse::new("two")]);
    let mut agent = Agent::builder()
        .model(pipeline(&model).model("gpt-4o"))
        .build()
        .unwrap();

    agent.run("first").await.unwrap();
    agent.run("second").await.unwrap();

    assert_eq!(agent.history().len(), 2);
    assert_eq!(agent.history()[0].content(), "second");

    agent.clear_history();
    assert!(agent.history().is_empty());
}
