use crate::agent::{ContextBuilder, Conversation, ToolInvocationRecord};
use crate::error::{AgentError, ToolError};
use crate::traits::{
    ChatMessage, ChatRequest, ModelAction, Provider, ToolCall, ToolSource, ToolSpec,
};
use futures_util::future::join_all;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_TURNS: usize = 20;
pub const DEFAULT_MODEL_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// Where a run currently stands.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopState {
    AwaitingModel,
    ModelResponded(ModelAction),
    ExecutingTools(Vec<ToolCall>),
    Done(String),
}

/// Outcome of a completed run.
#[derive(Debug)]
pub struct AgentRun {
    pub answer: String,
    pub conversation: Conversation,
    pub invocations: Vec<ToolInvocationRecord>,
    pub model_turns: usize,
}

pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    tools: Arc<dyn ToolSource>,
    context_builder: ContextBuilder,
    max_turns: Option<usize>,
    model_timeout: Duration,
    tool_timeout: Duration,
}

impl AgentLoop {
    pub fn new(provider: Arc<dyn Provider>, tools: Arc<dyn ToolSource>) -> Self {
        Self {
            provider,
            tools,
            context_builder: ContextBuilder::new(),
            max_turns: Some(DEFAULT_MAX_TURNS),
            model_timeout: DEFAULT_MODEL_TIMEOUT,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.context_builder = self.context_builder.with_system_prompt(prompt);
        self
    }

    /// `None` lets a run take as many model turns as it needs.
    pub fn with_max_turns(mut self, max: Option<usize>) -> Self {
        self.max_turns = max;
        self
    }

    pub fn with_model_timeout(mut self, timeout: Duration) -> Self {
        self.model_timeout = timeout;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub async fn run(&self, user_message: &str) -> Result<AgentRun, AgentError> {
        let specs = self.tools.get_tools().await?;
        let system_prompt = self
            .context_builder
            .clone()
            .with_tool_specs(specs.clone())
            .build_system_prompt();

        let mut conversation = Conversation::new(system_prompt, user_message);
        let mut invocations = Vec::new();
        let mut model_turns = 0;
        let mut state = LoopState::AwaitingModel;

        loop {
            state = match state {
                LoopState::AwaitingModel => {
                    if let Some(max) = self.max_turns
                        && model_turns >= max
                    {
                        warn!(max_turns = max, "Run stopped without a final answer");
                        return Err(AgentError::MaxTurnsExceeded(max));
                    }
                    model_turns += 1;
                    let action = self.call_model(&conversation, &specs).await?;
                    debug!(
                        turn = model_turns,
                        tool_calls = action.has_tool_calls(),
                        "Model responded"
                    );
                    LoopState::ModelResponded(action)
                }
                LoopState::ModelResponded(ModelAction::ToolCalls { text, calls })
                    if !calls.is_empty() =>
                {
                    conversation.push(ChatMessage::assistant_with_tool_calls(text, calls.clone()));
                    LoopState::ExecutingTools(calls)
                }
                LoopState::ModelResponded(
                    ModelAction::FinalAnswer(text) | ModelAction::ToolCalls { text, .. },
                ) => {
                    conversation.push(ChatMessage::assistant(text.clone()));
                    LoopState::Done(text)
                }
                LoopState::ExecutingTools(calls) => {
                    let mut records = self.execute_tools(calls).await;

                    let fatal = records
                        .iter()
                        .position(|r| r.outcome.as_ref().is_err_and(|e| !e.is_recoverable()));
                    if let Some(index) = fatal
                        && let Err(error) = records.swap_remove(index).outcome
                    {
                        warn!(error = %error, "Aborting run on tool source failure");
                        return Err(error.into());
                    }

                    for record in records {
                        conversation.push(record.to_message());
                        invocations.push(record);
                    }
                    LoopState::AwaitingModel
                }
                LoopState::Done(answer) => {
                    info!(
                        model_turns,
                        tool_calls = invocations.len(),
                        "Run finished"
                    );
                    return Ok(AgentRun {
                        answer,
                        conversation,
                        invocations,
                        model_turns,
                    });
                }
            };
        }
    }

    async fn call_model(
        &self,
        conversation: &Conversation,
        specs: &[ToolSpec],
    ) -> Result<ModelAction, AgentError> {
        let request = ChatRequest {
            messages: conversation.messages(),
            tools: if specs.is_empty() { None } else { Some(specs) },
        };

        let action = tokio::time::timeout(self.model_timeout, self.provider.respond(request))
            .await
            .map_err(|_| AgentError::ModelTimeout(self.model_timeout))??;
        Ok(action)
    }

    /// Runs every call of one model turn concurrently and waits for all of
    /// them. Records come back in the order the calls were issued.
    async fn execute_tools(&self, calls: Vec<ToolCall>) -> Vec<ToolInvocationRecord> {
        join_all(calls.into_iter().map(|call| self.execute_tool(call))).await
    }

    async fn execute_tool(&self, call: ToolCall) -> ToolInvocationRecord {
        let started = Instant::now();

        let (arguments, outcome) = match parse_arguments(&call) {
            Ok(arguments) => {
                let outcome = match tokio::time::timeout(
                    self.tool_timeout,
                    self.tools.invoke(&call.name, arguments.clone()),
                )
                .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => Err(ToolError::Timeout {
                        tool: call.name.clone(),
                        after: self.tool_timeout,
                    }),
                };
                (arguments, outcome)
            }
            Err(error) => (Value::Null, Err(error)),
        };

        let duration = started.elapsed();
        match &outcome {
            Ok(_) => debug!(
                tool = %call.name,
                call_id = %call.id,
                elapsed_ms = duration.as_millis() as u64,
                "Tool call ok"
            ),
            Err(e) => warn!(tool = %call.name, kind = e.kind(), "Tool call failed: {e}"),
        }

        ToolInvocationRecord {
            call_id: call.id,
            tool_name: call.name,
            arguments,
            outcome,
            duration,
        }
    }
}

fn parse_arguments(call: &ToolCall) -> Result<Value, ToolError> {
    if call.arguments.trim().is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(&call.arguments).map_err(|e| ToolError::InvalidArguments {
        tool: call.name.clone(),
        reason: format!("arguments are not valid JSON: {e}"),
    })
}
