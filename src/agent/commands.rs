//! Slash-command table. These bypass the reasoning loop entirely.

use crate::agent::Agent;
use crate::scheduler::TaskStatus;

const HELP_TEXT: &str = "\
Messaging assistant

Talk to me naturally and I will use my tools:
- \"Send hello to mum\"
- \"Schedule good morning to Ada daily at 08:00\"
- \"Summarize my chat with the team\"
- \"Find messages about the invoice\"
- \"What messages are scheduled?\"

Direct commands:
/help - this message
/stats - usage statistics
/clear - clear our conversation history
/schedule - list scheduled messages";

/// Handle a direct command. Returns `None` when the text is not one of the
/// fixed commands, letting it flow into the reasoning loop.
pub(crate) async fn dispatch(agent: &Agent, sender: &str, body: &str) -> Option<String> {
    let trimmed = body.trim();
    if !trimmed.starts_with('/') {
        return None;
    }

    let command = trimmed
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_lowercase();

    match command.as_str() {
        "/help" => Some(HELP_TEXT.to_string()),
        "/stats" => Some(stats(agent).await),
        "/clear" => {
            agent.sessions().clear(sender).await;
            Some("Conversation history cleared.".to_string())
        }
        "/schedule" => Some(list_schedule(agent)),
        _ => None,
    }
}

async fn stats(agent: &Agent) -> String {
    let indexed = agent
        .index()
        .stats()
        .map(|stats| stats.total_messages)
        .unwrap_or(0);
    let scheduled = agent
        .scheduler()
        .list(Some(TaskStatus::Pending))
        .map(|tasks| tasks.len())
        .unwrap_or(0);

    format!(
        "Statistics\n\
         Indexed messages: {indexed}\n\
         Scheduled tasks: {scheduled}\n\
         Active conversations: {}\n\
         Authorized senders: {}",
        agent.sessions().len().await,
        agent.allowed_sender_count(),
    )
}

fn list_schedule(agent: &Agent) -> String {
    let tasks = match agent.scheduler().list(Some(TaskStatus::Pending)) {
        Ok(tasks) => tasks,
        Err(e) => return format!("Could not read scheduled tasks: {e}"),
    };

    if tasks.is_empty() {
        return "No scheduled messages.".to_string();
    }

    let mut out = format!("Scheduled messages ({}):\n", tasks.len());
    for task in &tasks {
        let preview: String = task.payload.chars().take(50).collect();
        out.push_str(&format!(
            "\n{}\n  to: {}\n  next: {}\n  repeats: {}\n  message: {}\n",
            task.task_id,
            task.recipient,
            task.fire_time.to_rfc3339(),
            task.recurrence,
            preview,
        ));
    }
    out
}
