//! The per-message orchestration pipeline and bounded reasoning loop.

use std::sync::Arc;

use chrono_tz::Tz;
use tracing::{debug, error, info, warn};

use crate::agent::{commands, is_tagged_reply, tag_reply, InboundMessage};
use crate::config::{AgentConfig, IndexPolicy};
use crate::llm::{ChatTurn, CompletionRequest, LlmProvider, SessionStore};
use crate::retrieval::{IndexedMessage, MessageIndex, QueryFilter};
use crate::scheduler::Scheduler;
use crate::tools::{
    CancelScheduledTaskTool, ListChatsTool, ListScheduledTasksTool, ScheduleMessageTool,
    SearchMessagesTool, SendMessageTool, SummarizeChatTool, ToolRegistry,
};
use crate::transport::BridgePort;

const SYSTEM_INSTRUCTIONS: &str = "\
You are a personal messaging assistant with tools that perform real actions \
on the user's account: sending messages, scheduling them, searching past \
messages, summarizing chats, and managing scheduled tasks.

Rules:
- When the user names a contact or group (\"send hello to mum\"), call \
get_chats first to find the chat id. Never ask for a phone number when you \
were given a name.
- When the user gives a phone number, use it as-is.
- When asked to DO something, use the matching tool; do not describe what \
you would do.
- Plain conversation needs no tools; answer normally.
- Confirm what you did after a tool runs, and explain failures plainly.
- Times are HH:MM 24-hour format.
- Be concise.";

/// Reply used when the model yields no usable text.
const EMPTY_REPLY_FALLBACK: &str = "I don't have a good answer for that.";

/// Reply used when the reasoning provider fails outright.
const PROVIDER_ERROR_FALLBACK: &str =
    "I ran into a problem processing that. Please try again in a moment.";

/// Collaborator handles for the orchestrator.
pub struct AgentDeps {
    pub bridge: Arc<dyn BridgePort>,
    pub llm: Arc<dyn LlmProvider>,
    pub index: Arc<MessageIndex>,
    pub scheduler: Arc<Scheduler>,
}

/// Orchestrates one inbound message from ingress to reply.
pub struct Agent {
    bridge: Arc<dyn BridgePort>,
    llm: Arc<dyn LlmProvider>,
    index: Arc<MessageIndex>,
    scheduler: Arc<Scheduler>,
    sessions: SessionStore,
    tools: ToolRegistry,
    allowed_senders: Vec<String>,
    max_tool_rounds: u32,
    context_results: usize,
    index_policy: IndexPolicy,
}

impl Agent {
    pub fn new(deps: AgentDeps, config: &AgentConfig, timezone: Tz) -> Arc<Self> {
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(SendMessageTool::new(Arc::clone(&deps.bridge))));
        tools.register(Arc::new(ListChatsTool::new(Arc::clone(&deps.bridge))));
        tools.register(Arc::new(SummarizeChatTool::new(
            Arc::clone(&deps.bridge),
            Arc::clone(&deps.llm),
        )));
        tools.register(Arc::new(ScheduleMessageTool::new(
            Arc::clone(&deps.scheduler),
            timezone,
        )));
        tools.register(Arc::new(ListScheduledTasksTool::new(Arc::clone(
            &deps.scheduler,
        ))));
        tools.register(Arc::new(CancelScheduledTaskTool::new(Arc::clone(
            &deps.scheduler,
        ))));
        tools.register(Arc::new(SearchMessagesTool::new(Arc::clone(&deps.index))));

        Arc::new(Self {
            sessions: SessionStore::new(
                SYSTEM_INSTRUCTIONS,
                config.max_history_turns,
                config.max_token_budget,
            ),
            tools,
            allowed_senders: config
                .allowed_senders
                .iter()
                .map(|s| normalize_sender(s))
                .collect(),
            max_tool_rounds: config.max_tool_rounds,
            context_results: config.context_results,
            index_policy: config.index_policy,
            bridge: deps.bridge,
            llm: deps.llm,
            index: deps.index,
            scheduler: deps.scheduler,
        })
    }

    pub(crate) fn index(&self) -> &MessageIndex {
        &self.index
    }

    pub(crate) fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub(crate) fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub(crate) fn allowed_sender_count(&self) -> usize {
        self.allowed_senders.len()
    }

    /// Run one inbound message through the full pipeline: loop guard,
    /// authorization, slash-command short-circuit, context assembly, the
    /// bounded reasoning loop, and the outbound reply.
    pub async fn process_message(&self, message: InboundMessage) {
        // A replayed copy of our own output never re-enters the loop.
        if message.from_me && is_tagged_reply(&message.body) {
            debug!(message_id = %message.id, "ignoring own tagged output");
            return;
        }

        // Unauthorized senders are dropped silently; a self-message without
        // the marker is the account owner talking to themselves and passes.
        if !self.is_authorized(&message) {
            warn!(sender = %message.sender, "dropping message from unauthorized sender");
            return;
        }

        info!(sender = %message.sender, "processing inbound message");

        if let Some(reply) = commands::dispatch(self, &message.sender, &message.body).await {
            self.send_reply(&message.sender, &reply).await;
            return;
        }

        self.index
            .index(&IndexedMessage {
                id: message.id.clone(),
                participant_id: message.sender.clone(),
                chat_id: message.chat_id.clone(),
                body: message.body.clone(),
                timestamp: message.timestamp,
            })
            .await;

        let content = self.assemble_context(&message).await;
        let text = self.run_reasoning(&message.sender, content).await;

        match self
            .bridge
            .send_message(&message.sender, &tag_reply(&text), None)
            .await
        {
            Ok(sent) => {
                let session = self.sessions.get_or_create(&message.sender).await;
                session.lock().await.push(ChatTurn::assistant(text.clone()));

                if self.index_policy == IndexPolicy::All {
                    self.index
                        .index(&IndexedMessage {
                            id: sent.id,
                            participant_id: sent.from,
                            chat_id: sent.chat_id,
                            body: text,
                            timestamp: sent.timestamp,
                        })
                        .await;
                }
            }
            Err(e) => error!(sender = %message.sender, "failed to send reply: {e}"),
        }
    }

    fn is_authorized(&self, message: &InboundMessage) -> bool {
        if message.from_me {
            return true;
        }
        let sender = normalize_sender(&message.sender);
        self.allowed_senders.iter().any(|allowed| *allowed == sender)
    }

    /// Attach similar prior messages as a delimited context block.
    async fn assemble_context(&self, message: &InboundMessage) -> String {
        let hits = self
            .index
            .query(&message.body, self.context_results, &QueryFilter::default())
            .await;

        let mut block = String::new();
        for hit in hits.iter().filter(|hit| hit.message.id != message.id) {
            block.push_str(&format!(
                "[{}] {}: {}\n",
                hit.message.timestamp.to_rfc3339(),
                hit.message.participant_id,
                hit.message.body
            ));
        }

        if block.is_empty() {
            message.body.clone()
        } else {
            format!(
                "{}\n\n--- Related prior messages ---\n{block}",
                message.body
            )
        }
    }

    /// The bounded reasoning loop: at most `max_tool_rounds` round trips,
    /// every tool result appended before the next provider call. Failures
    /// inside a round become tool-result content; only the terminal text
    /// leaves this function.
    async fn run_reasoning(&self, sender: &str, content: String) -> String {
        let session = self.sessions.get_or_create(sender).await;
        let mut session = session.lock().await;

        self.sessions.trim(&mut session);
        session.push(ChatTurn::user(content));

        let definitions = self.tools.definitions();
        let mut last_text: Option<String> = None;

        for round in 0..self.max_tool_rounds {
            let response = match self
                .llm
                .complete(CompletionRequest {
                    turns: session.turns().to_vec(),
                    tools: definitions.clone(),
                })
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    error!(sender, "reasoning provider failed: {e}");
                    return PROVIDER_ERROR_FALLBACK.to_string();
                }
            };

            if response.tool_calls.is_empty() {
                return response
                    .content
                    .filter(|text| !text.trim().is_empty())
                    .unwrap_or_else(|| EMPTY_REPLY_FALLBACK.to_string());
            }

            if let Some(text) = response.content {
                if !text.trim().is_empty() {
                    last_text = Some(text);
                }
            }

            session.push(ChatTurn::AssistantToolCalls {
                calls: response.tool_calls.clone(),
            });

            for call in response.tool_calls {
                debug!(round, tool = %call.name, "executing requested tool");
                let result = self.tools.dispatch(&call.name, call.arguments).await;
                session.push(ChatTurn::tool_result(&call.id, &call.name, &result));
            }
        }

        // Deliberate, observable termination, not a failure.
        warn!(
            sender,
            rounds = self.max_tool_rounds,
            "tool round limit reached, forcing termination"
        );
        last_text.unwrap_or_else(|| EMPTY_REPLY_FALLBACK.to_string())
    }

    async fn send_reply(&self, recipient: &str, text: &str) {
        if let Err(e) = self
            .bridge
            .send_message(recipient, &tag_reply(text), None)
            .await
        {
            error!(recipient, "failed to send reply: {e}");
        }
    }
}

/// Strip the chat suffix and any leading plus from a sender address.
fn normalize_sender(sender: &str) -> String {
    sender
        .split('@')
        .next()
        .unwrap_or(sender)
        .trim_start_matches('+')
        .to_string()
}
