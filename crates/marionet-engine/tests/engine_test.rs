//! End-to-end engine tests over scripted agent and LLM fakes.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use marionet_blocks::{
  Agent, BlockCache, BlockError, Collaborators, LlmClient, Mailer, StepOutcome, StepRequest,
  StepStatus,
};
use marionet_config::WorkflowDefinition;
use marionet_context::ContextRegistry;
use marionet_engine::{ExecutionEngine, RunRequest, RunStatus};
use marionet_store::{MemoryStore, Store};
use marionet_vault::{
  CredentialItem, CredentialRepository, MemoryRepository, MemoryVault, VaultClient,
};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

/// Scripted agent: pops one outcome per task attempt and records every
/// request it saw.
#[derive(Default)]
struct FakeAgent {
  outcomes: Mutex<VecDeque<StepOutcome>>,
  requests: Mutex<Vec<StepRequest>>,
  page_text: Mutex<String>,
  cleaned: AtomicBool,
  /// Canceled on the next step, simulating a caller canceling mid-run.
  cancel_on_step: Mutex<Option<CancellationToken>>,
}

impl FakeAgent {
  fn script(outcomes: Vec<StepOutcome>) -> Self {
    Self {
      outcomes: Mutex::new(outcomes.into()),
      ..Self::default()
    }
  }

  fn completed(output: Value) -> StepOutcome {
    StepOutcome {
      status: StepStatus::Completed,
      output,
      failure_reason: None,
    }
  }

  fn failed(reason: &str) -> StepOutcome {
    StepOutcome {
      status: StepStatus::Failed,
      output: Value::Null,
      failure_reason: Some(reason.to_string()),
    }
  }

  fn seen_requests(&self) -> Vec<StepRequest> {
    self.requests.lock().unwrap().clone()
  }
}

#[async_trait]
impl Agent for FakeAgent {
  async fn execute_step(&self, request: StepRequest) -> Result<StepOutcome, BlockError> {
    self.requests.lock().unwrap().push(request);
    if let Some(token) = self.cancel_on_step.lock().unwrap().take() {
      token.cancel();
    }
    Ok(
      self
        .outcomes
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| FakeAgent::completed(json!({ "ok": true }))),
    )
  }

  async fn goto_url(&self, _run_id: &str, _url: &str) -> Result<(), BlockError> {
    Ok(())
  }

  async fn read_page_text(&self, _run_id: &str) -> Result<String, BlockError> {
    Ok(self.page_text.lock().unwrap().clone())
  }

  async fn replay_actions(
    &self,
    request: StepRequest,
    _actions: Vec<Value>,
  ) -> Result<StepOutcome, BlockError> {
    self.execute_step(request).await
  }

  async fn cleanup(&self, _run_id: &str) {
    self.cleaned.store(true, Ordering::SeqCst);
  }
}

#[derive(Default)]
struct FakeLlm {
  responses: Mutex<VecDeque<Value>>,
  prompts: Mutex<Vec<String>>,
}

impl FakeLlm {
  fn script(responses: Vec<Value>) -> Self {
    Self {
      responses: Mutex::new(responses.into()),
      prompts: Mutex::default(),
    }
  }
}

#[async_trait]
impl LlmClient for FakeLlm {
  async fn handler(
    &self,
    prompt: &str,
    _prompt_name: &str,
    _force_dict: bool,
  ) -> Result<Value, BlockError> {
    self.prompts.lock().unwrap().push(prompt.to_string());
    Ok(
      self
        .responses
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or(Value::Null),
    )
  }
}

#[derive(Default)]
struct FakeMailer {
  sent: Mutex<Vec<(Vec<String>, String, String)>>,
}

#[async_trait]
impl Mailer for FakeMailer {
  async fn send(&self, to: &[String], subject: &str, body: &str) -> Result<(), BlockError> {
    self
      .sent
      .lock()
      .unwrap()
      .push((to.to_vec(), subject.to_string(), body.to_string()));
    Ok(())
  }
}

#[derive(Default)]
struct FakeCache {
  entries: Mutex<HashMap<(String, String), Vec<Value>>>,
  invalidated: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl BlockCache for FakeCache {
  async fn get(&self, workflow_id: &str, label: &str) -> Option<Vec<Value>> {
    self
      .entries
      .lock()
      .unwrap()
      .get(&(workflow_id.to_string(), label.to_string()))
      .cloned()
  }

  async fn invalidate(&self, workflow_id: &str, label: &str) {
    let key = (workflow_id.to_string(), label.to_string());
    self.entries.lock().unwrap().remove(&key);
    self.invalidated.lock().unwrap().push(key);
  }
}

struct Harness {
  engine: ExecutionEngine,
  agent: Arc<FakeAgent>,
  llm: Arc<FakeLlm>,
  mailer: Arc<FakeMailer>,
  cache: Arc<FakeCache>,
  store: Arc<MemoryStore>,
  vault: Arc<MemoryVault>,
  credentials: Arc<MemoryRepository>,
  registry: Arc<ContextRegistry>,
}

fn harness(agent: FakeAgent, llm: FakeLlm) -> Harness {
  let agent = Arc::new(agent);
  let llm = Arc::new(llm);
  let mailer = Arc::new(FakeMailer::default());
  let cache = Arc::new(FakeCache::default());
  let store = Arc::new(MemoryStore::new());
  let vault = Arc::new(MemoryVault::new());
  let credentials = Arc::new(MemoryRepository::new());
  let registry = Arc::new(ContextRegistry::new());

  let engine = ExecutionEngine::new(
    Collaborators {
      agent: agent.clone(),
      llm: llm.clone(),
      mailer: Some(mailer.clone()),
      cache: Some(cache.clone()),
      http: reqwest::Client::new(),
    },
    vault.clone(),
    credentials.clone(),
    store.clone(),
    registry.clone(),
  );

  Harness {
    engine,
    agent,
    llm,
    mailer,
    cache,
    store,
    vault,
    credentials,
    registry,
  }
}

fn definition(raw: Value) -> WorkflowDefinition {
  serde_json::from_value(raw).unwrap()
}

fn request(run_id: &str) -> RunRequest {
  RunRequest {
    run_id: run_id.to_string(),
    organization_id: "org_1".to_string(),
    inputs: HashMap::new(),
    webhook_url: None,
    parent_run_id: None,
    cancel: CancellationToken::new(),
  }
}

/// Minimal HTTP sink that records whether it was hit.
async fn webhook_sink() -> (String, Arc<AtomicBool>) {
  let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
  let url = format!("http://{}/hook", listener.local_addr().unwrap());
  let hit = Arc::new(AtomicBool::new(false));
  let hit_flag = hit.clone();

  tokio::spawn(async move {
    while let Ok((mut socket, _)) = listener.accept().await {
      let mut buf = [0u8; 4096];
      let _ = socket.read(&mut buf).await;
      hit_flag.store(true, Ordering::SeqCst);
      let _ = socket
        .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n")
        .await;
    }
  });

  (url, hit)
}

#[tokio::test]
async fn test_linear_run_completes_and_chains_outputs() {
  let h = harness(
    FakeAgent::script(vec![
      FakeAgent::completed(json!({ "order_id": "A-17" })),
      FakeAgent::completed(json!({ "done": true })),
    ]),
    FakeLlm::default(),
  );

  let def = definition(json!({
    "workflow_id": "wf_linear",
    "title": "linear",
    "parameters": [],
    "blocks": [
      { "label": "first", "block_type": "task", "goal": "find the order" },
      { "label": "second", "block_type": "task",
        "goal": "open order {{ first_output.order_id }}" }
    ]
  }));

  let outcome = h.engine.run(&def, request("run_1")).await.unwrap();
  assert_eq!(outcome.status, RunStatus::Completed);
  assert!(outcome.failure_reason.is_none());

  // The second block saw the first block's output through the template.
  let requests = h.agent.seen_requests();
  assert_eq!(requests.len(), 2);
  assert_eq!(requests[1].goal, "open order A-17");

  let run = h.store.get_run("run_1").await.unwrap();
  assert_eq!(run.status, RunStatus::Completed);
  assert!(run.completed_at.is_some());

  let block_runs = h.store.list_block_runs("run_1").await.unwrap();
  assert_eq!(block_runs.len(), 2);

  // Context discarded at cleanup.
  assert!(h.registry.get("run_1").is_none());
  assert!(h.agent.cleaned.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_failure_after_retries_names_block_and_index() {
  let h = harness(
    FakeAgent::script(vec![
      FakeAgent::failed("captcha"),
      FakeAgent::failed("captcha"),
    ]),
    FakeLlm::default(),
  );

  let def = definition(json!({
    "workflow_id": "wf_fail",
    "title": "fail",
    "parameters": [],
    "blocks": [
      { "label": "login", "block_type": "task", "goal": "log in", "max_retries": 2 },
      { "label": "after", "block_type": "task", "goal": "never reached" }
    ]
  }));

  let outcome = h.engine.run(&def, request("run_1")).await.unwrap();
  assert_eq!(outcome.status, RunStatus::Failed);
  let reason = outcome.failure_reason.unwrap();
  assert!(reason.contains("login"), "reason: {}", reason);
  assert!(reason.contains("index 0"), "reason: {}", reason);
  assert!(reason.contains("captcha"), "reason: {}", reason);

  // Both attempts hit the agent; the second block never ran.
  assert_eq!(h.agent.seen_requests().len(), 2);
}

#[tokio::test]
async fn test_continue_on_failure_advances_past_non_last_block() {
  let h = harness(
    FakeAgent::script(vec![
      FakeAgent::failed("optional step broke"),
      FakeAgent::completed(json!({ "done": true })),
    ]),
    FakeLlm::default(),
  );

  let def = definition(json!({
    "workflow_id": "wf_cof",
    "title": "cof",
    "parameters": [],
    "blocks": [
      { "label": "optional", "block_type": "task", "goal": "try",
        "max_retries": 1, "continue_on_failure": true },
      { "label": "required", "block_type": "task", "goal": "finish" }
    ]
  }));

  let outcome = h.engine.run(&def, request("run_1")).await.unwrap();
  assert_eq!(outcome.status, RunStatus::Completed);
}

#[tokio::test]
async fn test_continue_on_failure_does_not_save_last_block() {
  let h = harness(
    FakeAgent::script(vec![FakeAgent::failed("broke")]),
    FakeLlm::default(),
  );

  let def = definition(json!({
    "workflow_id": "wf_cof_last",
    "title": "cof last",
    "parameters": [],
    "blocks": [
      { "label": "only", "block_type": "task", "goal": "try",
        "max_retries": 1, "continue_on_failure": true }
    ]
  }));

  let outcome = h.engine.run(&def, request("run_1")).await.unwrap();
  assert_eq!(outcome.status, RunStatus::Failed);
}

#[tokio::test]
async fn test_cancellation_skips_webhook_but_runs_cleanup() {
  let h = harness(FakeAgent::default(), FakeLlm::default());
  let (url, hit) = webhook_sink().await;

  let def = definition(json!({
    "workflow_id": "wf_cancel",
    "title": "cancel",
    "parameters": [],
    "blocks": [
      { "label": "only", "block_type": "task", "goal": "never starts" }
    ]
  }));

  let mut req = request("run_1");
  req.webhook_url = Some(url);
  req.cancel = CancellationToken::new();
  req.cancel.cancel();

  let outcome = h.engine.run(&def, req).await.unwrap();
  assert_eq!(outcome.status, RunStatus::Canceled);

  // No webhook, no agent work, but cleanup still ran.
  assert!(!hit.load(Ordering::SeqCst));
  assert!(h.agent.seen_requests().is_empty());
  assert!(h.agent.cleaned.load(Ordering::SeqCst));
  assert!(h.registry.get("run_1").is_none());

  let run = h.store.get_run("run_1").await.unwrap();
  assert_eq!(run.status, RunStatus::Canceled);
}

#[tokio::test]
async fn test_cancellation_between_blocks_stops_the_run() {
  let h = harness(FakeAgent::default(), FakeLlm::default());
  let (url, hit) = webhook_sink().await;

  let def = definition(json!({
    "workflow_id": "wf_cancel_mid",
    "title": "cancel mid",
    "parameters": [],
    "blocks": [
      { "label": "first", "block_type": "task", "goal": "first step" },
      { "label": "second", "block_type": "task", "goal": "never reached" }
    ]
  }));

  let mut req = request("run_1");
  req.webhook_url = Some(url);
  // The caller cancels while the first block is executing.
  *h.agent.cancel_on_step.lock().unwrap() = Some(req.cancel.clone());

  let outcome = h.engine.run(&def, req).await.unwrap();
  assert_eq!(outcome.status, RunStatus::Canceled);

  // The first block completed; the boundary check stopped the second.
  let goals: Vec<String> = h.agent.seen_requests().iter().map(|r| r.goal.clone()).collect();
  assert_eq!(goals, vec!["first step".to_string()]);

  assert!(!hit.load(Ordering::SeqCst));
  assert!(h.agent.cleaned.load(Ordering::SeqCst));

  let run = h.store.get_run("run_1").await.unwrap();
  assert_eq!(run.status, RunStatus::Canceled);
}

#[tokio::test]
async fn test_completed_run_delivers_webhook() {
  let h = harness(FakeAgent::default(), FakeLlm::default());
  let (url, hit) = webhook_sink().await;

  let def = definition(json!({
    "workflow_id": "wf_hook",
    "title": "hook",
    "parameters": [],
    "blocks": [
      { "label": "only", "block_type": "task", "goal": "do it" }
    ]
  }));

  let mut req = request("run_1");
  req.webhook_url = Some(url);

  let outcome = h.engine.run(&def, req).await.unwrap();
  assert_eq!(outcome.status, RunStatus::Completed);
  assert!(hit.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_conditional_routes_on_expression() {
  let h = harness(
    FakeAgent::script(vec![
      FakeAgent::completed(json!({ "status": "locked" })),
      FakeAgent::completed(json!({ "notified": true })),
    ]),
    FakeLlm::default(),
  );

  let def = definition(json!({
    "workflow_id": "wf_branch",
    "title": "branch",
    "parameters": [],
    "blocks": [
      { "label": "check", "block_type": "task", "goal": "check account",
        "next_block_label": "route" },
      { "label": "route", "block_type": "conditional", "branches": [
        { "order": 0, "criteria_type": "expression",
          "expression": "check_output.status == 'locked'",
          "next_block_label": "notify" },
        { "order": 1, "criteria_type": "default", "is_default": true,
          "next_block_label": "proceed" }
      ]},
      { "label": "notify", "block_type": "task", "goal": "notify support" },
      { "label": "proceed", "block_type": "task", "goal": "continue" }
    ]
  }));

  let outcome = h.engine.run(&def, request("run_1")).await.unwrap();
  assert_eq!(outcome.status, RunStatus::Completed);

  // The locked branch ran; the default target never did.
  let goals: Vec<String> = h.agent.seen_requests().iter().map(|r| r.goal.clone()).collect();
  assert!(goals.contains(&"notify support".to_string()));
  assert!(!goals.contains(&"continue".to_string()));

  let block_runs = h.store.list_block_runs("run_1").await.unwrap();
  let route = block_runs.iter().find(|b| b.label == "route").unwrap();
  assert_eq!(route.branch_taken.as_deref(), Some("notify"));
}

#[tokio::test]
async fn test_conditional_prompt_branches_batched_into_one_llm_call() {
  let h = harness(
    FakeAgent::script(vec![FakeAgent::completed(json!({})), FakeAgent::completed(json!({}))]),
    FakeLlm::script(vec![json!({ "0": false, "1": true })]),
  );

  let def = definition(json!({
    "workflow_id": "wf_prompts",
    "title": "prompts",
    "parameters": [],
    "blocks": [
      { "label": "open", "block_type": "task", "goal": "open the page",
        "next_block_label": "route" },
      { "label": "route", "block_type": "conditional", "branches": [
        { "order": 0, "criteria_type": "prompt",
          "prompt": "Is the account locked?", "next_block_label": "locked" },
        { "order": 1, "criteria_type": "prompt",
          "prompt": "Is a captcha shown?", "next_block_label": "captcha" },
        { "order": 2, "criteria_type": "default", "is_default": true }
      ]},
      { "label": "locked", "block_type": "task", "goal": "handle locked" },
      { "label": "captcha", "block_type": "task", "goal": "handle captcha" }
    ]
  }));

  let outcome = h.engine.run(&def, request("run_1")).await.unwrap();
  assert_eq!(outcome.status, RunStatus::Completed);

  // Two prompt branches, one LLM call.
  let prompts = h.llm.prompts.lock().unwrap().clone();
  assert_eq!(prompts.len(), 1);
  assert!(prompts[0].contains("Is the account locked?"));
  assert!(prompts[0].contains("Is a captcha shown?"));

  let goals: Vec<String> = h.agent.seen_requests().iter().map(|r| r.goal.clone()).collect();
  assert!(goals.contains(&"handle captcha".to_string()));
  assert!(!goals.contains(&"handle locked".to_string()));
}

#[tokio::test]
async fn test_finally_block_runs_after_failure() {
  let h = harness(
    FakeAgent::script(vec![
      FakeAgent::failed("broke"),
      FakeAgent::completed(json!({ "logged_out": true })),
    ]),
    FakeLlm::default(),
  );

  let def = definition(json!({
    "workflow_id": "wf_finally",
    "title": "finally",
    "parameters": [],
    "finally_block_label": "logout",
    "blocks": [
      { "label": "work", "block_type": "task", "goal": "do work", "max_retries": 1 },
      { "label": "logout", "block_type": "task", "goal": "log out" }
    ]
  }));

  let outcome = h.engine.run(&def, request("run_1")).await.unwrap();

  // The run still fails, but the finally block executed.
  assert_eq!(outcome.status, RunStatus::Failed);
  let goals: Vec<String> = h.agent.seen_requests().iter().map(|r| r.goal.clone()).collect();
  assert!(goals.contains(&"log out".to_string()));
}

#[tokio::test]
async fn test_secrets_redacted_in_goal_but_available_to_agent() {
  let h = harness(FakeAgent::default(), FakeLlm::default());

  // Seed a credential through the vault + repository pair.
  let item = CredentialItem::Password {
    username: "alice@example.com".to_string(),
    password: "hunter2".to_string(),
    totp: None,
  };
  let item_id = h.vault.create_item("org_1", "portal", &item).await.unwrap();
  h.credentials
    .insert(&marionet_vault::Credential {
      credential_id: "cred_1".to_string(),
      organization_id: "org_1".to_string(),
      name: "portal".to_string(),
      item_id,
      credential_type: item.credential_type(),
    })
    .await
    .unwrap();

  let def = definition(json!({
    "workflow_id": "wf_secret",
    "title": "secret",
    "parameters": [
      { "parameter_type": "credential", "key": "portal", "credential_id": "cred_1" }
    ],
    "blocks": [
      { "label": "login", "block_type": "task",
        "goal": "log in as {{ portal.username }} with {{ portal.password }}",
        "parameter_keys": ["portal"] }
    ]
  }));

  let outcome = h.engine.run(&def, request("run_1")).await.unwrap();
  assert_eq!(outcome.status, RunStatus::Completed);

  let requests = h.agent.seen_requests();
  assert_eq!(requests.len(), 1);

  // The LLM-visible goal carries opaque ids, never the real password.
  assert!(!requests[0].goal.contains("hunter2"));
  assert!(requests[0].goal.contains("secret_"));

  // The agent can still resolve the id at point of use.
  let opaque_id = requests[0]
    .goal
    .split_whitespace()
    .find(|w| w.starts_with("secret_") && w.ends_with("_password"))
    .unwrap();
  assert_eq!(requests[0].secrets.get(opaque_id), Some("hunter2"));

  // Nothing persisted contains the plaintext.
  let block_runs = h.store.list_block_runs("run_1").await.unwrap();
  let serialized = serde_json::to_string(&block_runs).unwrap();
  assert!(!serialized.contains("hunter2"));
  assert!(!serde_json::to_string(&outcome.outputs).unwrap().contains("hunter2"));
}

#[tokio::test]
async fn test_for_loop_iterates_and_collects_outputs() {
  let h = harness(
    FakeAgent::script(vec![
      FakeAgent::completed(json!({ "downloaded": "a.pdf" })),
      FakeAgent::completed(json!({ "downloaded": "b.pdf" })),
    ]),
    FakeLlm::default(),
  );

  let def = definition(json!({
    "workflow_id": "wf_loop",
    "title": "loop",
    "parameters": [],
    "blocks": [
      { "label": "list", "block_type": "code",
        "code": "result = { \"a\", \"b\" }", "next_block_label": "each" },
      { "label": "each", "block_type": "for_loop",
        "loop_over_key": "list_output",
        "blocks": [
          { "label": "download", "block_type": "task",
            "goal": "download invoice {{ current_value }}" }
        ]
      }
    ]
  }));

  let outcome = h.engine.run(&def, request("run_1")).await.unwrap();
  assert_eq!(outcome.status, RunStatus::Completed);

  let goals: Vec<String> = h.agent.seen_requests().iter().map(|r| r.goal.clone()).collect();
  assert_eq!(
    goals,
    vec!["download invoice a".to_string(), "download invoice b".to_string()]
  );

  // One entry per iteration, each carrying the inner block's output.
  let loop_output = outcome.outputs.get("each_output").unwrap();
  assert_eq!(loop_output.as_array().unwrap().len(), 2);
  assert_eq!(
    loop_output[1]["output_value"],
    json!({ "downloaded": "b.pdf" })
  );
}

#[tokio::test]
async fn test_failed_cached_replay_invalidates_entry() {
  let h = harness(
    FakeAgent::script(vec![
      FakeAgent::failed("page changed"),
      FakeAgent::completed(json!({})),
    ]),
    FakeLlm::default(),
  );

  h.cache.entries.lock().unwrap().insert(
    ("wf_cache".to_string(), "optional".to_string()),
    vec![json!({ "action": "click" })],
  );

  let def = definition(json!({
    "workflow_id": "wf_cache",
    "title": "cache",
    "parameters": [],
    "blocks": [
      { "label": "optional", "block_type": "task", "goal": "try",
        "continue_on_failure": true },
      { "label": "after", "block_type": "task", "goal": "finish" }
    ]
  }));

  let outcome = h.engine.run(&def, request("run_1")).await.unwrap();
  assert_eq!(outcome.status, RunStatus::Completed);

  let invalidated = h.cache.invalidated.lock().unwrap().clone();
  assert_eq!(
    invalidated,
    vec![("wf_cache".to_string(), "optional".to_string())]
  );
}

#[tokio::test]
async fn test_send_email_block_uses_mailer() {
  let h = harness(
    FakeAgent::script(vec![FakeAgent::completed(json!({ "total": 42 }))]),
    FakeLlm::default(),
  );

  let def = definition(json!({
    "workflow_id": "wf_mail",
    "title": "mail",
    "parameters": [],
    "blocks": [
      { "label": "work", "block_type": "task", "goal": "count things",
        "next_block_label": "report" },
      { "label": "report", "block_type": "send_email",
        "to": ["ops@example.com"],
        "subject": "count: {{ work_output.total }}",
        "body": "done" }
    ]
  }));

  let outcome = h.engine.run(&def, request("run_1")).await.unwrap();
  assert_eq!(outcome.status, RunStatus::Completed);

  let sent = h.mailer.sent.lock().unwrap().clone();
  assert_eq!(sent.len(), 1);
  assert_eq!(sent[0].1, "count: 42");
}
