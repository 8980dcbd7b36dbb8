use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use log::info;
use secrecy::ExposeSecret;

use crate::config::EmailConfig;
use crate::error::DeliveryError;
use crate::models::RenderedReport;

// Submission port using STARTTLS instead of implicit TLS.
const STARTTLS_PORT: u16 = 587;

fn mailbox(address: &str) -> Result<Mailbox, DeliveryError> {
    address
        .parse()
        .map_err(|e| DeliveryError::InvalidMessage(format!("invalid address {address:?}: {e}")))
}

/// Builds one message carrying the plain and HTML bodies as alternatives,
/// addressed to every configured recipient.
pub fn build_message(report: &RenderedReport, config: &EmailConfig) -> Result<Message, DeliveryError> {
    let mut builder = Message::builder()
        .from(mailbox(&config.sender)?)
        .subject(report.subject.as_str());
    for recipient in &config.recipients {
        builder = builder.to(mailbox(recipient)?);
    }

    builder
        .multipart(MultiPart::alternative_plain_html(report.text.clone(), report.html.clone()))
        .map_err(|e| DeliveryError::InvalidMessage(e.to_string()))
}

fn smtp_error(e: lettre::transport::smtp::Error) -> DeliveryError {
    // 530, 534 and 535 are the relay's ways of refusing the credentials.
    let code = e.status().map(|c| c.to_string());
    match code.as_deref() {
        Some("530") | Some("534") | Some("535") => DeliveryError::Authentication(e.to_string()),
        _ => DeliveryError::Transport(e.to_string()),
    }
}

// Sends the report through the configured relay, over implicit TLS or
// STARTTLS depending on the port.
pub async fn send_email(report: &RenderedReport, config: &EmailConfig) -> Result<(), DeliveryError> {
    let message = build_message(report, config)?;
    let credentials = Credentials::new(config.sender.clone(), config.password.expose_secret().clone());

    let builder = if config.smtp_port == STARTTLS_PORT {
        AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
    } else {
        AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
    };
    let mailer = builder
        .map_err(smtp_error)?
        .port(config.smtp_port)
        .credentials(credentials)
        .build();

    mailer.send(message).await.map_err(smtp_error)?;
    info!("Email sent to {}", config.recipients.join(", "));
    Ok(())
}
