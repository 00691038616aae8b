//! Built-in tools backing the reasoning loop.

mod messaging;
mod scheduling;
mod search;

pub use messaging::{ListChatsTool, SendMessageTool, SummarizeChatTool};
pub use scheduling::{CancelScheduledTaskTool, ListScheduledTasksTool, ScheduleMessageTool};
pub use search::SearchMessagesTool;

/// Normalize a recipient into a bridge chat id: explicit ids pass through,
/// bare numbers get the individual-chat suffix.
pub(crate) fn normalize_chat_id(recipient: &str) -> String {
    if recipient.contains('@') {
        recipient.to_string()
    } else {
        format!("{}@c.us", recipient.trim_start_matches('+'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_id_normalization() {
        assert_eq!(normalize_chat_id("15550001111"), "15550001111@c.us");
        assert_eq!(normalize_chat_id("+15550001111"), "15550001111@c.us");
        assert_eq!(normalize_chat_id("group123@g.us"), "group123@g.us");
    }
}
