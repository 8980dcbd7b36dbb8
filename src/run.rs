use async_trait::async_trait;
use chrono::NaiveDate;
use log::{error, info, warn};

use crate::config::{AppConfig, DisabledChannel, DisabledReason, EmailConfig};
use crate::error::{DeliveryError, FetchError};
use crate::models::RenderedReport;
use crate::utils::chat::{clean_chat_text, send_single, send_to_group, MessageSender};
use crate::utils::mailer::send_email;
use crate::utils::portal::{fetch_grades, window_start, PortalClient};
use crate::utils::report::{render, week_label};
use crate::utils::telegram::TelegramSender;
use crate::utils::whatsapp::WhatsAppSender;

// One configured way of delivering the report.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    fn name(&self) -> &'static str;
    async fn deliver(&self, report: &RenderedReport) -> Result<(), DeliveryError>;
}

pub struct EmailChannel {
    config: EmailConfig,
}

#[async_trait]
impl DeliveryChannel for EmailChannel {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn deliver(&self, report: &RenderedReport) -> Result<(), DeliveryError> {
        send_email(report, &self.config).await
    }
}

pub enum ChatTarget {
    Single(String),
    Group(Vec<String>),
}

pub struct ChatChannel {
    name: &'static str,
    sender: Box<dyn MessageSender>,
    target: ChatTarget,
}

impl ChatChannel {
    pub fn new(name: &'static str, sender: Box<dyn MessageSender>, target: ChatTarget) -> Self {
        Self { name, sender, target }
    }
}

#[async_trait]
impl DeliveryChannel for ChatChannel {
    fn name(&self) -> &'static str {
        self.name
    }

    // A group counts as delivered as soon as one recipient got the message.
    async fn deliver(&self, report: &RenderedReport) -> Result<(), DeliveryError> {
        let text = clean_chat_text(&report.chat);
        match &self.target {
            ChatTarget::Single(recipient) => send_single(self.sender.as_ref(), recipient, &text)
                .await
                .map(|_| ()),
            ChatTarget::Group(recipients) => {
                let outcome = send_to_group(self.sender.as_ref(), recipients, &text).await;
                let failed: Vec<&str> = outcome
                    .outcomes
                    .iter()
                    .filter(|o| o.result.is_err())
                    .map(|o| o.recipient.as_str())
                    .collect();
                if !failed.is_empty() {
                    warn!("{} could not reach: {}", self.name, failed.join(", "));
                }
                if outcome.any_delivered() {
                    Ok(())
                } else {
                    Err(DeliveryError::AllRecipientsFailed { failed: outcome.failed() })
                }
            }
        }
    }
}

// Channels ready to send, plus the ones that were configured but could not
// be set up. The latter count as failed deliveries.
#[derive(Default)]
pub struct Channels {
    pub ready: Vec<Box<dyn DeliveryChannel>>,
    pub unusable: Vec<(&'static str, DeliveryError)>,
}

impl Channels {
    pub fn configured(&self) -> usize {
        self.ready.len() + self.unusable.len()
    }
}

pub fn build_channels(config: &AppConfig) -> Channels {
    let mut channels = Channels::default();

    if let Some(email) = &config.email {
        channels.ready.push(Box::new(EmailChannel { config: email.clone() }));
    }
    if let Some(single) = &config.chat_single {
        match WhatsAppSender::new(&single.api) {
            Ok(sender) => channels.ready.push(Box::new(ChatChannel::new(
                "whatsapp",
                Box::new(sender),
                ChatTarget::Single(single.recipient.clone()),
            ))),
            Err(e) => channels.unusable.push(("whatsapp", e)),
        }
    }
    if let Some(group) = &config.chat_group {
        match WhatsAppSender::new(&group.api) {
            Ok(sender) => channels.ready.push(Box::new(ChatChannel::new(
                "whatsapp-group",
                Box::new(sender),
                ChatTarget::Group(group.recipients.clone()),
            ))),
            Err(e) => channels.unusable.push(("whatsapp-group", e)),
        }
    }
    if let Some(telegram) = &config.telegram {
        channels.ready.push(Box::new(ChatChannel::new(
            "telegram",
            Box::new(TelegramSender::new(telegram)),
            ChatTarget::Single(telegram.chat_id.to_string()),
        )));
    }
    channels
}

#[derive(Debug, Default, PartialEq)]
pub struct RunSummary {
    pub delivered: Vec<&'static str>,
    pub failed: Vec<&'static str>,
}

impl RunSummary {
    // Non-zero only when every configured channel failed. No channel at all
    // is a warning, not a failure.
    pub fn exit_code(&self) -> u8 {
        if !self.failed.is_empty() && self.delivered.is_empty() {
            1
        } else {
            0
        }
    }
}

pub fn log_disabled(disabled: &[DisabledChannel]) {
    for d in disabled {
        match &d.reason {
            DisabledReason::NotConfigured => info!("{} channel not configured, skipping", d.channel),
            DisabledReason::Incomplete(reason) => warn!("{} channel disabled: {}", d.channel, reason),
        }
    }
}

/// Tries every channel in turn; one channel failing never stops the others.
pub async fn deliver_all(channels: &Channels, report: &RenderedReport) -> RunSummary {
    let mut summary = RunSummary::default();

    for (name, e) in &channels.unusable {
        error!("{name} delivery failed: DeliveryError: {e}");
        summary.failed.push(*name);
    }

    for channel in &channels.ready {
        info!("Sending report via {}…", channel.name());
        match channel.deliver(report).await {
            Ok(()) => summary.delivered.push(channel.name()),
            Err(e) => {
                error!("{} delivery failed: DeliveryError: {}", channel.name(), e);
                summary.failed.push(channel.name());
            }
        }
    }

    if channels.configured() == 0 {
        warn!("Nothing delivered: no delivery channel is configured");
    } else if summary.delivered.is_empty() {
        error!("Nothing delivered: every configured channel failed");
    } else {
        info!(
            "Report delivered via {} ({} channel(s) failed)",
            summary.delivered.join(", "),
            summary.failed.len()
        );
    }
    summary
}

/// One full run: fetch, render, deliver. Only the fetch stage can fail the
/// run outright.
pub async fn run(
    config: &AppConfig,
    portal: &dyn PortalClient,
    today: NaiveDate,
) -> Result<RunSummary, FetchError> {
    log_disabled(&config.disabled);
    info!("{} delivery channel(s) enabled", config.enabled_channels());

    info!("Connecting to the portal…");
    let children = fetch_grades(portal, &config.portal, config.report_days, today).await?;

    let since = window_start(today, config.report_days);
    let report = render(&children, &week_label(since, today));

    let channels = build_channels(config);
    Ok(deliver_all(&channels, &report).await)
}
