//! Shared pieces of the chat channels: message cleanup and fan-out to
//! several recipients.
//!
//! Messaging providers limit how often the same recipient may be contacted.
//! Nothing here enforces that limit; the job is expected to run once a week.

use async_trait::async_trait;
use log::{error, info};

use crate::error::DeliveryError;

/// Minimum length of a divider line dropped from chat messages.
pub const DIVIDER_MIN_LEN: usize = 10;
const DIVIDER_CHARS: [char; 8] = ['-', '=', '_', '~', '*', '─', '━', '═'];

#[async_trait]
pub trait MessageSender: Send + Sync {
    // Name used in log lines, e.g. "whatsapp".
    fn channel(&self) -> &'static str;

    // Sends `text` to one recipient and returns the provider's message id.
    async fn send_message(&self, recipient: &str, text: &str) -> Result<String, DeliveryError>;
}

#[derive(Debug)]
pub struct RecipientOutcome {
    pub recipient: String,
    pub result: Result<String, DeliveryError>,
}

// One outcome per recipient, in the order the recipients were given.
#[derive(Debug, Default)]
pub struct GroupReport {
    pub outcomes: Vec<RecipientOutcome>,
}

impl GroupReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn any_delivered(&self) -> bool {
        self.succeeded() > 0
    }
}

fn is_divider(line: &str) -> bool {
    let line = line.trim();
    let mut chars = line.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    DIVIDER_CHARS.contains(&first)
        && chars.all(|c| c == first)
        && line.chars().count() >= DIVIDER_MIN_LEN
}

/// Drops divider lines, which only clutter narrow chat screens. Every other
/// line is kept verbatim.
pub fn clean_chat_text(text: &str) -> String {
    text.split('\n')
        .filter(|line| !is_divider(line))
        .collect::<Vec<_>>()
        .join("\n")
}

// Sends to one recipient, logging the outcome.
pub async fn send_single(
    sender: &dyn MessageSender,
    recipient: &str,
    text: &str,
) -> Result<String, DeliveryError> {
    match sender.send_message(recipient, text).await {
        Ok(id) => {
            info!("{} message sent to {} (id {})", sender.channel(), recipient, id);
            Ok(id)
        }
        Err(e) => {
            error!("{} message to {} failed: {}", sender.channel(), recipient, e);
            Err(e)
        }
    }
}

/// Sends the same text to every recipient, one request each. A failure is
/// recorded and the remaining recipients are still attempted.
pub async fn send_to_group(sender: &dyn MessageSender, recipients: &[String], text: &str) -> GroupReport {
    info!("Sending {} message to {} recipient(s)", sender.channel(), recipients.len());

    let mut report = GroupReport::default();
    for recipient in recipients {
        let result = send_single(sender, recipient, text).await;
        report.outcomes.push(RecipientOutcome {
            recipient: recipient.clone(),
            result,
        });
    }

    info!(
        "{} group messages sent to {}/{} recipients",
        sender.channel(),
        report.succeeded(),
        recipients.len()
    );
    report
}
