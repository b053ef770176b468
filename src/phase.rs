use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::bus::MessageBusHandle;
use crate::conversation::estimate_tokens;
use crate::llm::{ChatMessage, ChatOptions, ChatRequest, LlmClient};
use crate::tool_calls::extract_tool_calls;
use crate::tools::ToolRegistry;
use crate::types::{ConversationMessage, ConversationRole, ConversationThread, Task};

/// One dispatched tool call, reduced to what loop detection needs (spec
/// §4.10): the tool, the target its arguments named, and whether it
/// succeeded. Kept in dispatch order so the coordinator can key a
/// repetition fingerprint on the call a phase actually made, not on the
/// phase's overall outcome.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolInvocation {
    pub tool_name: String,
    pub primary_target: String,
    pub success: bool,
}

/// The contract every phase obeys (spec §4.3).
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct PhaseResult {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_phase: Option<String>,
    #[serde(default)]
    pub files_created: Vec<String>,
    #[serde(default)]
    pub files_modified: Vec<String>,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub tool_invocations: Vec<ToolInvocation>,
}

impl PhaseResult {
    pub fn cancelled() -> Self {
        Self {
            success: false,
            message: "cancelled".to_string(),
            next_phase: None,
            files_created: vec![],
            files_modified: vec![],
            data: serde_json::json!({ "cancelled": true }),
            tool_invocations: vec![],
        }
    }
}

/// Shared collaborators every phase needs: the tool registry, the message
/// bus, and the LLM client. Bundled so phase functions take one argument
/// instead of threading each dependency through individually.
pub struct PhaseContext {
    pub llm: Arc<dyn LlmClient>,
    pub bus: MessageBusHandle,
    pub tools: Arc<ToolRegistry>,
    pub max_turns: u32,
    pub context_length: u32,
    pub model: String,
}

/// Static configuration for one phase: its system prompt, the tool category
/// key used to filter the registry (spec §6.2), and which objective levels
/// feed its prompt context (spec §4.3 step 3).
pub struct PhaseSpec {
    pub name: &'static str,
    pub system_prompt: &'static str,
    pub tool_phase_key: &'static str,
}

/// Runs one phase's Think/Dispatch/Record finite state machine (spec §9):
/// it never yields to the coordinator mid-iteration; cancellation is
/// observed only between turns.
///
/// 1. Build the user message (task description + objective context, passed
///    in by the caller as `objective_context`).
/// 2. Call the LLM with phase-appropriate system prompt + bounded history +
///    a tool list filtered to the phase.
/// 3. Extract tool calls (native, then fallback parsers).
/// 4. Dispatch each call; append tool-result messages to the conversation.
/// 5. Repeat until `max_turns` or no tool calls are returned.
/// 6. Return a PhaseResult; state/message-bus effects are the caller's job.
pub async fn run_phase_loop(
    spec: &PhaseSpec,
    ctx: &PhaseContext,
    task: Option<&Task>,
    objective_context: &str,
    thread: &mut ConversationThread,
    cancel: &CancellationToken,
) -> PhaseResult {
    if thread.messages.is_empty() {
        thread.append(system_message(spec.system_prompt));
    }

    let user_content = build_user_message(task, objective_context);
    thread.append(ConversationMessage {
        role: ConversationRole::User,
        content: user_content,
        tool_calls: vec![],
        timestamp: now(),
    });

    let known_tools = ctx.tools.names_for_phase(spec.tool_phase_key);
    let mut files_created = Vec::new();
    let mut files_modified = Vec::new();
    let mut tool_invocations = Vec::new();

    for _turn in 0..ctx.max_turns {
        if cancel.is_cancelled() {
            return PhaseResult::cancelled();
        }

        let request = ChatRequest {
            model: ctx.model.clone(),
            messages: to_chat_messages(thread),
            tools: vec![],
            stream: false,
            options: ChatOptions {
                context_length: ctx.context_length,
            },
        };

        let response = match ctx.llm.chat(request, cancel).await {
            Ok(r) => r,
            Err(e) if e == "cancelled" => return PhaseResult::cancelled(),
            Err(e) => {
                return PhaseResult {
                    success: false,
                    message: format!("LLM call failed: {}", e),
                    next_phase: None,
                    files_created,
                    files_modified,
                    data: serde_json::Value::Null,
                    tool_invocations,
                };
            }
        };

        thread.append(ConversationMessage {
            role: ConversationRole::Assistant,
            content: response.message.content.clone(),
            tool_calls: vec![],
            timestamp: now(),
        });

        let calls = extract_tool_calls(&response.message, &known_tools);
        if calls.is_empty() {
            return PhaseResult {
                success: true,
                message: response.message.content,
                next_phase: None,
                files_created,
                files_modified,
                data: serde_json::Value::Null,
                tool_invocations,
            };
        }

        for call in &calls {
            if cancel.is_cancelled() {
                return PhaseResult::cancelled();
            }
            let outcome = ctx.tools.dispatch(call);
            let tool_content = match &outcome {
                Ok(result) => {
                    files_created.extend(result.files_created.clone());
                    files_modified.extend(result.files_modified.clone());
                    serde_json::json!({ "ok": true, "data": result.data }).to_string()
                }
                Err(err) => serde_json::json!({
                    "ok": false,
                    "kind": err.kind,
                    "message": err.message,
                    "remediation": err.remediation,
                })
                .to_string(),
            };
            tool_invocations.push(ToolInvocation {
                tool_name: call.function.name.clone(),
                primary_target: crate::tools::primary_target(call),
                success: outcome.is_ok(),
            });
            thread.append(ConversationMessage {
                role: ConversationRole::Tool,
                content: tool_content,
                tool_calls: vec![],
                timestamp: now(),
            });
        }
    }

    PhaseResult {
        success: false,
        message: format!("exceeded max_turns ({})", ctx.max_turns),
        next_phase: None,
        files_created,
        files_modified,
        data: serde_json::Value::Null,
        tool_invocations,
    }
}

fn system_message(prompt: &str) -> ConversationMessage {
    ConversationMessage {
        role: ConversationRole::System,
        content: prompt.to_string(),
        tool_calls: vec![],
        timestamp: now(),
    }
}

fn build_user_message(task: Option<&Task>, objective_context: &str) -> String {
    match task {
        Some(t) => format!("Task: {}\n\n{}", t.description, objective_context),
        None => objective_context.to_string(),
    }
}

fn to_chat_messages(thread: &ConversationThread) -> Vec<ChatMessage> {
    thread
        .messages
        .iter()
        .map(|m| ChatMessage {
            role: role_str(m.role).to_string(),
            content: m.content.clone(),
        })
        .collect()
}

fn role_str(role: ConversationRole) -> &'static str {
    match role {
        ConversationRole::System => "system",
        ConversationRole::User => "user",
        ConversationRole::Assistant => "assistant",
        ConversationRole::Tool => "tool",
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[allow(dead_code)]
fn token_count_of(thread: &ConversationThread) -> usize {
    thread.messages.iter().map(|m| estimate_tokens(&m.content)).sum()
}
