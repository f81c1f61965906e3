//! Agent runtime: the think-act-observe loop.
//!
//! One invocation drives a single agent:
//! 1. Restore prior conversation from memory (best effort)
//! 2. Ask the provider for the next message, retrying classified failures
//! 3. Dispatch any requested tool calls in order and append their results
//! 4. Repeat until a final answer, a policy limit, or a fatal error
//!
//! Every exit path ends in a terminal [`AgentStatus`] on the returned
//! [`AgentState`]; the loop itself never returns an error.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use agentmesh_core::{
    config::AppConfig,
    error::{AgentError, ProviderError, ToolError},
    traits::{MemoryStore, Provider, ProviderResponse},
    types::{AbortReason, AgentState, AgentStatus, Message, ToolCall, ToolDefinition, ToolResult},
    Error,
};

use crate::executor::ToolExecutor;
use crate::hooks::{AgentHooks, HookChain};
use crate::parser::{ActionParser, ParsedAction};
use crate::retry::RetryPolicy;

/// Agent runtime configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Maximum provider turns before the loop is aborted.
    pub max_iterations: usize,
    /// Retry policy for provider calls.
    pub retry: RetryPolicy,
    /// Total token limit per invocation.
    pub token_budget: Option<u64>,
    /// Placed at the head of a fresh conversation.
    pub system_prompt: Option<String>,
    /// Consume provider responses as chunk streams.
    pub streaming: bool,
    /// Recover tool calls and final answers from plain response text.
    pub parse_text_actions: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            retry: RetryPolicy::default(),
            token_budget: None,
            system_prompt: None,
            streaming: false,
            parse_text_actions: false,
        }
    }
}

impl From<&AppConfig> for AgentConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_iterations: config.agent.max_iterations,
            retry: RetryPolicy::from(&config.retry),
            token_budget: config.agent.token_budget,
            system_prompt: config.agent.system_prompt.clone(),
            streaming: config.agent.streaming,
            parse_text_actions: config.agent.parse_text_actions,
        }
    }
}

/// One agent invocation.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub agent_id: String,
    /// Task text, appended as a user message.
    pub input: String,
    /// Memory session to restore from and persist to.
    pub session_id: Option<String>,
    /// Wall-clock deadline. Reaching it aborts the loop like cancellation.
    pub deadline: Option<Instant>,
}

impl AgentRequest {
    pub fn new(agent_id: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            input: input.into(),
            session_id: None,
            deadline: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Deadline relative to now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }
}

/// Why a provider call did not yield a response.
enum CallError {
    Provider(ProviderError),
    Interrupted(AbortReason),
}

/// Runtime executing the think-act-observe loop.
///
/// Holds only shared, read-only collaborators; any number of invocations may
/// run concurrently on one runtime.
pub struct AgentRuntime {
    pub(crate) config: AgentConfig,
    pub(crate) provider: Arc<dyn Provider>,
    pub(crate) executor: ToolExecutor,
    pub(crate) memory: Option<Arc<dyn MemoryStore>>,
    pub(crate) hooks: HookChain,
}

impl AgentRuntime {
    /// Create a new builder for AgentRuntime.
    pub fn builder() -> crate::builder::AgentRuntimeBuilder {
        crate::builder::AgentRuntimeBuilder::new()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Run one invocation to a terminal status.
    pub async fn run(&self, request: AgentRequest, cancel: &CancellationToken) -> AgentState {
        let mut state = AgentState::new(request.agent_id.clone(), request.session_id.clone());

        tracing::info!(
            agent_id = %state.agent_id,
            session_id = ?state.session_id,
            max_iterations = self.config.max_iterations,
            "Starting agent loop"
        );

        if let Err(e) = self.hooks.on_start(&request).await {
            self.hook_failed(&mut state, "on_start", e);
        } else if let Some(reason) = interrupted(cancel, request.deadline) {
            self.abort(&mut state, reason);
        } else {
            self.restore(&mut state).await;
            if state.conversation.is_empty() {
                if let Some(prompt) = &self.config.system_prompt {
                    self.append(&mut state, Message::system(prompt.clone())).await;
                }
            }
            self.append(&mut state, Message::user(request.input.clone()))
                .await;

            self.run_loop(&mut state, &request, cancel).await;
        }

        if state.status == AgentStatus::Failed {
            if let Some(error) = &state.error {
                self.hooks.on_error(error).await;
            }
        }
        self.hooks.on_end(&state).await;

        tracing::info!(
            agent_id = %state.agent_id,
            status = ?state.status,
            iterations = state.iteration,
            retries = state.retries,
            tokens = state.usage.total_tokens,
            "Agent loop finished"
        );
        state
    }

    async fn run_loop(
        &self,
        state: &mut AgentState,
        request: &AgentRequest,
        cancel: &CancellationToken,
    ) {
        let tools = self.executor.definitions();
        let parser = ActionParser::new();
        let mut consecutive_retries: u32 = 0;

        loop {
            if state.iteration >= self.config.max_iterations {
                tracing::warn!(
                    agent_id = %state.agent_id,
                    iterations = state.iteration,
                    "Iteration bound reached without a final answer"
                );
                state.abort(
                    AbortReason::MaxIterations,
                    AgentError::MaxIterationsExceeded(self.config.max_iterations),
                );
                return;
            }

            state.status = AgentStatus::Running;
            state.iteration += 1;

            tracing::info!(
                agent_id = %state.agent_id,
                iteration = state.iteration,
                history_len = state.conversation.len(),
                "Executing agent iteration"
            );
            if let Err(e) = self.hooks.on_iteration(state.iteration).await {
                self.hook_failed(state, "on_iteration", e);
                return;
            }

            // Provider turn, re-issued on retryable failures.
            let response = loop {
                if let Some(reason) = interrupted(cancel, request.deadline) {
                    self.abort(state, reason);
                    return;
                }
                if let Err(e) = self.hooks.before_generate(&state.conversation).await {
                    self.hook_failed(state, "before_generate", e);
                    return;
                }

                match self
                    .generate(&state.conversation, &tools, cancel, request.deadline)
                    .await
                {
                    Ok(response) => {
                        consecutive_retries = 0;
                        break response;
                    }
                    Err(CallError::Interrupted(reason)) => {
                        self.abort(state, reason);
                        return;
                    }
                    Err(CallError::Provider(err))
                        if self.config.retry.should_retry(&err, consecutive_retries) =>
                    {
                        let delay = self.config.retry.next_delay(consecutive_retries, &err);
                        consecutive_retries += 1;
                        state.retries += 1;
                        tracing::warn!(
                            agent_id = %state.agent_id,
                            iteration = state.iteration,
                            retry = consecutive_retries,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "Retryable provider error, backing off"
                        );
                        if let Some(reason) = backoff(delay, cancel, request.deadline).await {
                            self.abort(state, reason);
                            return;
                        }
                    }
                    Err(CallError::Provider(err)) if err.is_retryable() => {
                        tracing::error!(
                            agent_id = %state.agent_id,
                            retries = consecutive_retries,
                            error = %err,
                            "Provider retries exhausted"
                        );
                        state.fail(AgentError::MaxRetriesExceeded {
                            retries: consecutive_retries,
                            last: err,
                        });
                        return;
                    }
                    Err(CallError::Provider(err)) => {
                        tracing::error!(
                            agent_id = %state.agent_id,
                            kind = %err.kind,
                            error = %err,
                            "Fatal provider error"
                        );
                        state.fail(err);
                        return;
                    }
                }
            };

            state.usage.add(response.usage);
            tracing::debug!(
                agent_id = %state.agent_id,
                finish_reason = %response.finish_reason,
                tokens_used = state.usage.total_tokens,
                "Provider response received"
            );
            if let Err(e) = self.hooks.after_generate(&response).await {
                self.hook_failed(state, "after_generate", e);
                return;
            }

            let mut message = response.message;
            let mut answer = None;
            if self.config.parse_text_actions && !message.requests_tools() {
                match parser.parse(&message.content) {
                    ParsedAction::ToolCall { name, args } => {
                        message.tool_calls = vec![ToolCall::new(name, args)];
                    }
                    ParsedAction::FinalAnswer(text) => answer = Some(text),
                }
            }
            let calls = message.tool_calls.clone();
            let content = message.content.clone();
            self.append(state, message).await;

            if calls.is_empty() {
                state.succeed(answer.unwrap_or(content));
                return;
            }

            if let Some(limit) = self.config.token_budget {
                if state.usage.total_tokens > limit {
                    tracing::warn!(agent_id = %state.agent_id, limit, "Token budget exceeded");
                    state.fail(AgentError::BudgetExceeded {
                        used: state.usage.total_tokens,
                        limit,
                    });
                    return;
                }
            }

            state.status = AgentStatus::AwaitingTool;
            for call in &calls {
                if let Some(reason) = interrupted(cancel, request.deadline) {
                    self.abort(state, reason);
                    return;
                }
                let result = match self.hooks.on_tool_call(call).await {
                    Ok(()) => self.executor.execute(call).await,
                    Err(e) => {
                        tracing::warn!(tool = %call.name, error = %e, "Tool call rejected by hook");
                        let rejected = ToolError::Rejected {
                            tool: call.name.clone(),
                            message: e.to_string(),
                        };
                        ToolResult::from_outcome(call, Err(rejected))
                    }
                };
                self.hooks.on_tool_result(call, &result).await;
                self.append(state, Message::tool(&result)).await;
            }
        }
    }

    async fn generate(
        &self,
        conversation: &[Message],
        tools: &[ToolDefinition],
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<ProviderResponse, CallError> {
        if !self.config.streaming {
            return self
                .provider
                .generate(conversation, tools)
                .await
                .map_err(CallError::Provider);
        }

        let stream = self
            .provider
            .stream_generate(conversation, tools)
            .await
            .map_err(CallError::Provider)?;

        // Dropping the stream on cancellation or expiry stops the producer.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CallError::Interrupted(AbortReason::Cancelled)),
            _ = until(deadline) => Err(CallError::Interrupted(AbortReason::DeadlineExceeded)),
            response = stream.collect_response() => response.map_err(CallError::Provider),
        }
    }

    /// Load prior history. Failure leaves the conversation empty.
    async fn restore(&self, state: &mut AgentState) {
        let (Some(memory), Some(session_id)) = (&self.memory, &state.session_id) else {
            return;
        };
        match memory.load(session_id).await {
            Ok(history) => {
                tracing::debug!(
                    session_id = %session_id,
                    messages = history.len(),
                    "Restored conversation"
                );
                state.conversation = history;
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %session_id,
                    error = %e,
                    "Failed to restore conversation, starting empty"
                );
            }
        }
    }

    /// Append a message and persist it when a session is configured.
    async fn append(&self, state: &mut AgentState, message: Message) {
        if let (Some(memory), Some(session_id)) = (&self.memory, &state.session_id) {
            if let Err(e) = memory.append(session_id, &message).await {
                tracing::warn!(session_id = %session_id, error = %e, "Failed to persist message");
            }
        }
        state.conversation.push(message);
    }

    fn hook_failed(&self, state: &mut AgentState, hook: &'static str, error: Error) {
        tracing::warn!(agent_id = %state.agent_id, hook, error = %error, "Hook stopped the run");
        state.fail(error);
    }

    fn abort(&self, state: &mut AgentState, reason: AbortReason) {
        tracing::info!(agent_id = %state.agent_id, reason = ?reason, "Agent loop aborted");
        let diagnostic = match reason {
            AbortReason::Cancelled => AgentError::Cancelled,
            AbortReason::DeadlineExceeded => AgentError::DeadlineExceeded,
            AbortReason::MaxIterations => {
                AgentError::MaxIterationsExceeded(self.config.max_iterations)
            }
        };
        state.abort(reason, diagnostic);
    }
}

fn interrupted(cancel: &CancellationToken, deadline: Option<Instant>) -> Option<AbortReason> {
    if cancel.is_cancelled() {
        Some(AbortReason::Cancelled)
    } else if deadline.is_some_and(|d| Instant::now() >= d) {
        Some(AbortReason::DeadlineExceeded)
    } else {
        None
    }
}

/// Resolves at the deadline; never without one.
async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending::<()>().await,
    }
}

/// Sleep out a backoff delay unless cancelled or past the deadline first.
async fn backoff(
    delay: Duration,
    cancel: &CancellationToken,
    deadline: Option<Instant>,
) -> Option<AbortReason> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Some(AbortReason::Cancelled),
        _ = until(deadline) => Some(AbortReason::DeadlineExceeded),
        _ = tokio::time::sleep(delay) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentmesh_core::mocks::ScriptedProvider;

    fn runtime(provider: ScriptedProvider, config: AgentConfig) -> AgentRuntime {
        AgentRuntime::builder()
            .with_provider(Arc::new(provider))
            .with_config(config)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_final_answer_succeeds() {
        let rt = runtime(ScriptedProvider::answer("42"), AgentConfig::default());
        let state = rt
            .run(AgentRequest::new("solver", "What is 6*7?"), &CancellationToken::new())
            .await;

        assert_eq!(state.status, AgentStatus::Succeeded);
        assert_eq!(state.output.as_deref(), Some("42"));
        assert_eq!(state.iteration, 1);
        assert_eq!(state.conversation.len(), 2);
    }

    #[tokio::test]
    async fn test_pre_cancelled_run_never_calls_provider() {
        let provider = Arc::new(ScriptedProvider::answer("unused"));
        let rt = AgentRuntime::builder()
            .with_provider(provider.clone())
            .build()
            .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let state = rt.run(AgentRequest::new("a", "hi"), &cancel).await;

        assert_eq!(state.status, AgentStatus::Aborted);
        assert_eq!(state.abort_reason, Some(AbortReason::Cancelled));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_system_prompt_heads_fresh_conversation() {
        let config = AgentConfig {
            system_prompt: Some("Be brief.".into()),
            ..AgentConfig::default()
        };
        let rt = runtime(ScriptedProvider::answer("ok"), config);
        let state = rt
            .run(AgentRequest::new("a", "hello"), &CancellationToken::new())
            .await;

        assert_eq!(state.conversation[0].content, "Be brief.");
        assert_eq!(state.conversation[1].content, "hello");
    }
}
