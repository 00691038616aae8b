//! Core agent logic.
//!
//! The agent orchestrates:
//! - Ingress filtering (loop guard, authorization, slash commands)
//! - Context assembly from the retrieval index
//! - The bounded reasoning/tool loop
//! - Outbound replies through the bridge

mod agent_loop;
mod commands;
mod router;

pub use agent_loop::{Agent, AgentDeps};
pub use router::{parse_message_event, EventRouter, InboundMessage};

/// Marker appended to every bot-authored outbound text. An inbound copy of
/// our own output is recognized by this marker and never re-enters the
/// reasoning loop.
pub const REPLY_MARKER: &str = "[bot]";

/// Tag outbound text with the self-reply marker.
pub fn tag_reply(text: &str) -> String {
    format!("{text}\n\n{REPLY_MARKER}")
}

/// Whether inbound text is a replayed copy of our own output.
pub fn is_tagged_reply(text: &str) -> bool {
    text.contains(REPLY_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagging_round_trips() {
        let tagged = tag_reply("hello");
        assert!(is_tagged_reply(&tagged));
        assert!(!is_tagged_reply("hello"));
    }
}
