//! Manager orchestration
//!
//! A manager run goes through decomposition (one planning call), delegation
//! (each planned task is routed to a registered profile), parallel execution
//! bounded by a semaphore with a per-task timeout, and aggregation (one
//! synthesis call). Only a malformed plan aborts the run; everything that
//! goes wrong inside a task is recorded on that task.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agents::factory::AgentFactory;
use crate::agents::profile::Profile;
use crate::agents::router::TaskRouter;
use crate::context::{build_planning_prompt, build_synthesis_prompt, build_system_prompt, history_messages};
use crate::error::{ConclaveError, Result};
use crate::providers::ChatMessage;
use crate::types::Message;

/// Separates the manager's reasoning from its JSON task plan
pub const PLAN_MARKER: &str = "TASK PLAN:";

const DIRECT_ANSWER_TITLE: &str = "Direct answer";

/// Limits applied to every manager run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrchestratorConfig {
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    #[serde(default = "default_max_tasks_per_run")]
    pub max_tasks_per_run: usize,
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
    /// Manager levels allowed below the manager that received the request
    #[serde(default = "default_max_delegation_depth")]
    pub max_delegation_depth: usize,
}

fn default_max_concurrent_tasks() -> usize {
    4
}

fn default_max_tasks_per_run() -> usize {
    10
}

fn default_task_timeout_secs() -> u64 {
    120
}

fn default_max_delegation_depth() -> usize {
    1
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            max_tasks_per_run: default_max_tasks_per_run(),
            task_timeout_secs: default_task_timeout_secs(),
            max_delegation_depth: default_max_delegation_depth(),
        }
    }
}

/// Status of a delegated task
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One unit of delegated work and its outcome
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    /// 1-based position in the plan
    pub index: usize,
    pub title: String,
    pub instruction: String,
    /// Target as written in the plan
    pub hint: String,
    /// Profile the task was routed to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Task {
    pub fn planned(
        index: usize,
        title: impl Into<String>,
        instruction: impl Into<String>,
        hint: impl Into<String>,
    ) -> Self {
        Self {
            index,
            title: title.into(),
            instruction: instruction.into(),
            hint: hint.into(),
            agent: None,
            status: TaskStatus::Pending,
            result: None,
            error: None,
        }
    }

    pub fn start(&mut self, agent: &str) {
        self.agent = Some(agent.to_string());
        self.status = TaskStatus::Running;
    }

    pub fn succeed(&mut self, agent: &str, result: impl Into<String>) {
        self.agent = Some(agent.to_string());
        self.status = TaskStatus::Success;
        self.result = Some(result.into());
        self.error = None;
    }

    pub fn fail(&mut self, agent: Option<&str>, reason: impl Into<String>) {
        if let Some(agent) = agent {
            self.agent = Some(agent.to_string());
        }
        self.status = TaskStatus::Failed;
        self.result = None;
        self.error = Some(reason.into());
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Success
    }

    /// Result text, or the error for a failed task
    pub fn output(&self) -> &str {
        self.result
            .as_deref()
            .or(self.error.as_deref())
            .unwrap_or("")
    }

    /// Resolved profile, else the requested target, else "none"
    pub fn display_agent(&self) -> &str {
        match self.agent.as_deref() {
            Some(agent) => agent,
            None if !self.hint.trim().is_empty() => self.hint.trim(),
            None => "none",
        }
    }
}

/// A task as the planner described it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedTask {
    pub title: String,
    pub instruction: String,
    pub agent: String,
}

#[derive(Debug, Deserialize)]
struct RawPlanItem {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    instruction: Option<String>,
    #[serde(default)]
    task: Option<String>,
    #[serde(default, alias = "agent_profile")]
    agent: Option<String>,
}

impl From<RawPlanItem> for PlannedTask {
    fn from(raw: RawPlanItem) -> Self {
        let non_empty = |s: Option<String>| s.filter(|s| !s.trim().is_empty());
        let title = non_empty(raw.title);
        let task = non_empty(raw.task);
        let instruction = non_empty(raw.instruction)
            .or_else(|| task.clone())
            .or_else(|| title.clone())
            .unwrap_or_default();
        let title = title
            .or(task)
            .unwrap_or_else(|| "Untitled task".to_string());
        Self {
            title,
            instruction,
            agent: raw.agent.unwrap_or_default(),
        }
    }
}

/// What the planning call produced
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    /// No plan marker: the reply is itself the answer
    Answer(String),
    /// Reasoning (possibly empty) and the planned tasks (possibly none)
    Tasks {
        thinking: String,
        tasks: Vec<PlannedTask>,
    },
}

/// Split a planning reply into reasoning and tasks
pub fn parse_plan(reply: &str) -> Result<Plan> {
    let Some((before, after)) = reply.split_once(PLAN_MARKER) else {
        return Ok(Plan::Answer(reply.trim().to_string()));
    };
    let thinking = before.trim().to_string();

    let body = extract_json(after);
    if body.is_empty() {
        return Ok(Plan::Tasks {
            thinking,
            tasks: Vec::new(),
        });
    }

    let value = serde_json::Deserializer::from_str(body)
        .into_iter::<Value>()
        .next()
        .ok_or_else(|| ConclaveError::Decomposition("empty task plan".to_string()))?
        .map_err(|e| ConclaveError::Decomposition(format!("invalid JSON: {}", e)))?;

    let Value::Array(items) = value else {
        return Err(ConclaveError::Decomposition(
            "task plan is not a list of tasks".to_string(),
        ));
    };

    let tasks = items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            serde_json::from_value::<RawPlanItem>(item)
                .map(PlannedTask::from)
                .map_err(|e| ConclaveError::Decomposition(format!("task {}: {}", i + 1, e)))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Plan::Tasks { thinking, tasks })
}

/// The JSON text after the marker, with any code fence removed
fn extract_json(after: &str) -> &str {
    let after = after.trim();
    let fenced = if let Some((_, rest)) = after.split_once("```json") {
        Some(rest)
    } else {
        after.strip_prefix("```")
    };
    match fenced {
        Some(rest) => rest.split("```").next().unwrap_or("").trim(),
        None => after,
    }
}

/// Where a manager run is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Received,
    Decomposing,
    Delegating,
    Executing,
    Aggregating,
    Completed,
    Failed,
}

/// Everything one manager run produced. Serialized to text last.
#[derive(Debug, Clone)]
pub struct ManagerRun {
    pub manager: String,
    pub request: String,
    pub state: RunState,
    /// Raw planning reply
    pub plan_text: String,
    pub thinking: Option<String>,
    pub show_thinking: bool,
    pub tasks: Vec<Task>,
    pub synthesis: String,
}

impl ManagerRun {
    fn new(manager: &Profile, request: &str) -> Self {
        Self {
            manager: manager.name.clone(),
            request: request.to_string(),
            state: RunState::Received,
            plan_text: String::new(),
            thinking: None,
            show_thinking: manager.agent.show_thinking,
            tasks: Vec::new(),
            synthesis: String::new(),
        }
    }

    fn advance(&mut self, next: RunState) {
        debug!(
            "Orchestrator: run for '{}' {:?} -> {:?}",
            self.manager, self.state, next
        );
        self.state = next;
    }

    pub fn succeeded(&self) -> usize {
        self.tasks.iter().filter(|t| t.is_success()).count()
    }
}

/// Per-task execution context: a read-only view of the parent history, the
/// delegation depth and a cancellation token.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub history: Arc<Vec<Message>>,
    pub depth: usize,
    pub cancel: CancellationToken,
}

impl TaskContext {
    pub fn root(history: Vec<Message>, cancel: CancellationToken) -> Self {
        Self {
            history: Arc::new(history),
            depth: 0,
            cancel,
        }
    }

    /// Context for a delegated task one level down
    pub fn child(&self) -> Self {
        Self {
            history: self.history.clone(),
            depth: self.depth + 1,
            cancel: self.cancel.child_token(),
        }
    }

    /// Run `fut` unless the context is cancelled first
    pub async fn guard<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(ConclaveError::Cancelled),
            result = fut => result,
        }
    }
}

/// Runs the decompose / delegate / execute / aggregate cycle for one manager
pub struct ManagerOrchestrator {
    factory: Arc<AgentFactory>,
    profile: Profile,
}

impl ManagerOrchestrator {
    pub fn new(factory: Arc<AgentFactory>, profile: Profile) -> Self {
        Self { factory, profile }
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub async fn run(&self, request: &str, ctx: &TaskContext) -> Result<ManagerRun> {
        let config = self.factory.config().clone();
        let mut run = ManagerRun::new(&self.profile, request);

        if ctx.depth > config.max_delegation_depth {
            run.advance(RunState::Failed);
            return Err(ConclaveError::TaskExecution(
                "delegation depth exceeded".to_string(),
            ));
        }

        info!(
            "Orchestrator: '{}' received request at depth {}",
            self.profile.name, ctx.depth
        );

        // Decomposing
        run.advance(RunState::Decomposing);
        let delegates = self
            .factory
            .registry()
            .personas(&self.profile.agent.available_agents)
            .await;
        let system = build_planning_prompt(
            &self.profile.agent.persona,
            &delegates,
            self.profile.agent.delegation_strategy,
        );
        let mut messages = history_messages(&ctx.history);
        messages.push(ChatMessage::user(request));
        run.plan_text = match ctx
            .guard(self.factory.hub().complete(&self.profile.model, &messages, &system))
            .await
        {
            Ok(text) => text,
            Err(ConclaveError::Cancelled) => return Err(ConclaveError::Cancelled),
            Err(e) => {
                warn!("Orchestrator: '{}' planning call failed: {}", self.profile.name, e);
                run.advance(RunState::Failed);
                return Err(ConclaveError::Decomposition(format!(
                    "planning call failed: {}",
                    e
                )));
            }
        };

        let plan = match parse_plan(&run.plan_text) {
            Ok(plan) => plan,
            Err(e) => {
                warn!("Orchestrator: '{}' produced an unusable plan: {}", self.profile.name, e);
                run.advance(RunState::Failed);
                return Err(e);
            }
        };

        let planned = match plan {
            Plan::Answer(answer) => {
                debug!("Orchestrator: no task plan, answering directly");
                let mut task = Task::planned(1, DIRECT_ANSWER_TITLE, request, &self.profile.name);
                task.succeed(&self.profile.name, answer.clone());
                run.tasks.push(task);
                run.synthesis = answer;
                run.advance(RunState::Aggregating);
                run.advance(RunState::Completed);
                return Ok(run);
            }
            Plan::Tasks { thinking, tasks } => {
                if !thinking.is_empty() {
                    run.thinking = Some(thinking);
                }
                tasks
            }
        };

        if planned.is_empty() {
            self.answer_directly(&mut run, request, ctx).await?;
            return Ok(run);
        }

        // Delegating
        run.advance(RunState::Delegating);
        let mut planned = planned;
        if planned.len() > config.max_tasks_per_run {
            warn!(
                "Orchestrator: plan has {} tasks, keeping the first {}",
                planned.len(),
                config.max_tasks_per_run
            );
            planned.truncate(config.max_tasks_per_run);
        }

        let fallback = match self.profile.agent.fallback_agent.as_deref() {
            Some(f) if self.factory.registry().contains(f).await => Some(f),
            Some(f) => {
                warn!("Orchestrator: fallback agent '{}' is not registered", f);
                None
            }
            None => None,
        };
        // Re-read the delegates: profiles may have changed while planning
        let candidates = self
            .factory
            .registry()
            .personas(&self.profile.agent.available_agents)
            .await;
        let router = TaskRouter::new(&candidates, self.profile.agent.delegation_strategy, fallback);

        let mut dispatch: Vec<(usize, Profile)> = Vec::new();
        for (i, p) in planned.into_iter().enumerate() {
            let mut task = Task::planned(i + 1, p.title, p.instruction, p.agent);
            if let Some(profile) = self.delegate_for(&mut task, &router, ctx, &config).await {
                dispatch.push((i, profile));
            }
            run.tasks.push(task);
        }

        // Executing
        run.advance(RunState::Executing);
        self.execute(&mut run, dispatch, ctx, &config).await?;

        // Aggregating
        run.advance(RunState::Aggregating);
        run.synthesis = self.synthesize(&run, ctx).await?;
        run.advance(RunState::Completed);

        info!(
            "Orchestrator: '{}' completed {} of {} tasks",
            self.profile.name,
            run.succeeded(),
            run.tasks.len()
        );
        Ok(run)
    }

    /// Route one task. Returns the profile to run it with, or records why it
    /// cannot run.
    async fn delegate_for(
        &self,
        task: &mut Task,
        router: &TaskRouter<'_>,
        ctx: &TaskContext,
        config: &OrchestratorConfig,
    ) -> Option<Profile> {
        if task.instruction.trim().is_empty() {
            task.fail(None, "task has no instruction");
            return None;
        }

        let Some(route) = router.resolve(&task.hint) else {
            warn!(
                "Orchestrator: no agent available for task {} ('{}')",
                task.index, task.hint
            );
            task.fail(None, "no agent available");
            return None;
        };

        let Some(profile) = self.factory.registry().find(&route.agent).await else {
            task.fail(Some(&route.agent), format!("profile '{}' not found", route.agent));
            return None;
        };

        if profile.is_manager() && ctx.depth + 1 > config.max_delegation_depth {
            task.fail(Some(&route.agent), "delegation depth exceeded");
            return None;
        }

        debug!(
            "Orchestrator: task {} -> '{}' ({:?})",
            task.index, route.agent, route.kind
        );
        task.start(&route.agent);
        Some(profile)
    }

    async fn execute(
        &self,
        run: &mut ManagerRun,
        dispatch: Vec<(usize, Profile)>,
        ctx: &TaskContext,
        config: &OrchestratorConfig,
    ) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_tasks.max(1)));
        let timeout = Duration::from_secs(config.task_timeout_secs);

        let mut handles = Vec::with_capacity(dispatch.len());
        for (slot, profile) in dispatch {
            let instruction = run.tasks[slot].instruction.clone();
            let factory = self.factory.clone();
            let sem = semaphore.clone();
            let child = ctx.child();
            handles.push((
                slot,
                tokio::spawn(async move {
                    let _permit = sem
                        .acquire_owned()
                        .await
                        .map_err(|e| ConclaveError::TaskExecution(e.to_string()))?;
                    let work = run_delegate(factory, profile, child.clone(), instruction);
                    child
                        .guard(async {
                            tokio::time::timeout(timeout, work)
                                .await
                                .unwrap_or(Err(ConclaveError::Timeout))
                        })
                        .await
                }),
            ));
        }

        // Await in plan order; completion order does not matter
        for (slot, handle) in handles {
            let task = &mut run.tasks[slot];
            let agent = task.agent.clone();
            match handle.await {
                Ok(Ok(text)) => {
                    let agent = agent.unwrap_or_default();
                    task.succeed(&agent, text);
                }
                Ok(Err(ConclaveError::Cancelled)) => task.fail(None, "cancelled"),
                Ok(Err(e)) => {
                    warn!("Orchestrator: task {} failed: {}", task.index, e);
                    task.fail(None, e.to_string());
                }
                Err(e) => {
                    warn!("Orchestrator: task {} panicked: {}", task.index, e);
                    task.fail(None, format!("task panicked: {}", e));
                }
            }
        }

        if ctx.cancel.is_cancelled() {
            run.advance(RunState::Failed);
            return Err(ConclaveError::Cancelled);
        }
        Ok(())
    }

    async fn synthesize(&self, run: &ManagerRun, ctx: &TaskContext) -> Result<String> {
        let (system, user) = build_synthesis_prompt(&self.profile.agent.persona, &run.request, &run.tasks);
        let messages = [ChatMessage::user(user)];
        let call = self
            .factory
            .hub()
            .complete(&self.profile.model, &messages, &system);
        match ctx.guard(call).await {
            Ok(text) => Ok(text.trim().to_string()),
            Err(ConclaveError::Cancelled) => Err(ConclaveError::Cancelled),
            Err(e) => {
                warn!("Orchestrator: synthesis failed, using summary: {}", e);
                Ok(completion_summary(run))
            }
        }
    }

    /// Empty plan: the manager answers the whole request itself
    async fn answer_directly(&self, run: &mut ManagerRun, request: &str, ctx: &TaskContext) -> Result<()> {
        run.advance(RunState::Aggregating);
        let system = build_system_prompt(&self.profile.agent.persona, &[]);
        let mut messages = history_messages(&ctx.history);
        messages.push(ChatMessage::user(request));

        let mut task = Task::planned(1, DIRECT_ANSWER_TITLE, request, &self.profile.name);
        let call = self.factory.hub().complete(&self.profile.model, &messages, &system);
        match ctx.guard(call).await {
            Ok(answer) => {
                task.succeed(&self.profile.name, answer.trim());
                run.synthesis = answer.trim().to_string();
                run.tasks.push(task);
            }
            Err(ConclaveError::Cancelled) => return Err(ConclaveError::Cancelled),
            Err(e) => {
                warn!("Orchestrator: direct answer failed: {}", e);
                task.fail(Some(&self.profile.name), e.to_string());
                run.tasks.push(task);
                run.synthesis = completion_summary(run);
            }
        }
        run.advance(RunState::Completed);
        Ok(())
    }
}

/// Build and run the delegate for one task
async fn run_delegate(
    factory: Arc<AgentFactory>,
    profile: Profile,
    ctx: TaskContext,
    instruction: String,
) -> Result<String> {
    let agent = factory.build(&profile)?;
    let reply = agent.respond(&ctx, &instruction).await?;
    Ok(reply.text)
}

/// Fixed summary used when synthesis is unavailable
pub fn completion_summary(run: &ManagerRun) -> String {
    format!("Completed {} of {} tasks.", run.succeeded(), run.tasks.len())
}
