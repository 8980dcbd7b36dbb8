use std::env;

use secrecy::Secret;
use url::Url;

use crate::error::ConfigError;

pub const DEFAULT_REPORT_DAYS: u32 = 14;
// Ten years is more history than any portal keeps.
pub const MAX_REPORT_DAYS: u32 = 3660;
pub const DEFAULT_SMTP_HOST: &str = "smtp.gmail.com";
pub const DEFAULT_SMTP_PORT: u16 = 465;
pub const DEFAULT_WHATSAPP_API_URL: &str = "https://graph.facebook.com/v18.0";

#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub url: Url,
    pub username: String,
    pub password: Secret<String>,
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub sender: String,
    pub password: Secret<String>,
    pub recipients: Vec<String>,
    pub smtp_host: String,
    pub smtp_port: u16,
}

// Credentials shared by both WhatsApp channels.
#[derive(Debug, Clone)]
pub struct ChatApiConfig {
    pub token: Secret<String>,
    pub phone_number_id: String,
    pub api_url: Url,
}

#[derive(Debug, Clone)]
pub struct ChatSingleConfig {
    pub api: ChatApiConfig,
    pub recipient: String,
}

#[derive(Debug, Clone)]
pub struct ChatGroupConfig {
    pub api: ChatApiConfig,
    pub recipients: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub token: Secret<String>,
    pub chat_id: i64,
}

/// Why a channel is not part of this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisabledReason {
    /// None of the channel's variables are set.
    NotConfigured,
    /// Some variables are set but the channel cannot be used.
    Incomplete(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisabledChannel {
    pub channel: &'static str,
    pub reason: DisabledReason,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub portal: PortalConfig,
    pub report_days: u32,
    pub email: Option<EmailConfig>,
    pub chat_single: Option<ChatSingleConfig>,
    pub chat_group: Option<ChatGroupConfig>,
    pub telegram: Option<TelegramConfig>,
    pub disabled: Vec<DisabledChannel>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from any key/value source.
    ///
    /// Only the portal variables are mandatory. Channels whose option set
    /// is partial or invalid end up in `disabled` instead of failing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let require = |name: &'static str| get(name).ok_or(ConfigError::MissingVariable(name));

        let raw_url = require("PRONOTE_URL")?;
        let url = Url::parse(&raw_url).map_err(|e| ConfigError::InvalidValue {
            name: "PRONOTE_URL",
            reason: e.to_string(),
        })?;
        let portal = PortalConfig {
            url,
            username: require("PRONOTE_USERNAME")?,
            password: Secret::new(require("PRONOTE_PASSWORD")?),
        };

        let report_days = match get("REPORT_DAYS") {
            None => DEFAULT_REPORT_DAYS,
            Some(raw) => match raw.parse::<u32>() {
                Ok(days) if (1..=MAX_REPORT_DAYS).contains(&days) => days,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        name: "REPORT_DAYS",
                        reason: format!("expected between 1 and {MAX_REPORT_DAYS} days, got {raw:?}"),
                    })
                }
            },
        };

        let mut disabled = Vec::new();
        let email = keep(&mut disabled, "email", email_config(&get));
        let chat_single = keep(
            &mut disabled,
            "whatsapp",
            chat_api_config(&get).and_then(|api| single_recipient(&get, api)),
        );
        let chat_group = keep(
            &mut disabled,
            "whatsapp-group",
            chat_api_config(&get).and_then(|api| group_recipients(&get, api)),
        );
        let telegram = keep(&mut disabled, "telegram", telegram_config(&get));

        Ok(Self {
            portal,
            report_days,
            email,
            chat_single,
            chat_group,
            telegram,
            disabled,
        })
    }

    pub fn enabled_channels(&self) -> usize {
        [
            self.email.is_some(),
            self.chat_single.is_some(),
            self.chat_group.is_some(),
            self.telegram.is_some(),
        ]
        .iter()
        .filter(|enabled| **enabled)
        .count()
    }
}

fn keep<T>(
    disabled: &mut Vec<DisabledChannel>,
    channel: &'static str,
    result: Result<Option<T>, String>,
) -> Option<T> {
    match result {
        Ok(Some(config)) => Some(config),
        Ok(None) => {
            disabled.push(DisabledChannel { channel, reason: DisabledReason::NotConfigured });
            None
        }
        Err(reason) => {
            disabled.push(DisabledChannel { channel, reason: DisabledReason::Incomplete(reason) });
            None
        }
    }
}

// Splits a comma separated list, trimming entries and dropping empty ones.
pub fn parse_recipients(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .collect()
}

// Returns the values of `names`: all of them, none of them, or an error
// naming the missing ones.
fn all_or_none<G>(get: &G, names: &[&str]) -> Result<Option<Vec<String>>, String>
where
    G: Fn(&str) -> Option<String>,
{
    let values: Vec<Option<String>> = names.iter().map(|n| get(n)).collect();
    if values.iter().all(Option::is_none) {
        return Ok(None);
    }
    let missing: Vec<&str> = names
        .iter()
        .zip(&values)
        .filter(|(_, v)| v.is_none())
        .map(|(n, _)| *n)
        .collect();
    if !missing.is_empty() {
        return Err(format!("missing {}", missing.join(", ")));
    }
    Ok(Some(values.into_iter().flatten().collect()))
}

fn email_config<G>(get: &G) -> Result<Option<EmailConfig>, String>
where
    G: Fn(&str) -> Option<String>,
{
    let Some(values) = all_or_none(get, &["GMAIL_ADDRESS", "GMAIL_APP_PASSWORD", "EMAIL_TO"])? else {
        return Ok(None);
    };
    let [sender, password, to]: [String; 3] = values
        .try_into()
        .map_err(|_| "unexpected email option count".to_string())?;

    let recipients = parse_recipients(&to);
    if recipients.is_empty() {
        return Err("EMAIL_TO lists no recipient".into());
    }
    let smtp_port = match get("SMTP_PORT") {
        None => DEFAULT_SMTP_PORT,
        Some(raw) => raw
            .parse()
            .map_err(|_| format!("SMTP_PORT is not a port number: {raw:?}"))?,
    };

    Ok(Some(EmailConfig {
        sender,
        password: Secret::new(password),
        recipients,
        smtp_host: get("SMTP_HOST").unwrap_or_else(|| DEFAULT_SMTP_HOST.to_string()),
        smtp_port,
    }))
}

// The API credentials are only half of a chat channel; a missing recipient
// variable decides whether the channel counts as configured at all.
fn chat_api_config<G>(get: &G) -> Result<Option<ChatApiConfig>, String>
where
    G: Fn(&str) -> Option<String>,
{
    let Some(values) = all_or_none(get, &["META_ACCESS_TOKEN", "META_PHONE_NUMBER_ID"])? else {
        return Ok(None);
    };
    let [token, phone_number_id]: [String; 2] = values
        .try_into()
        .map_err(|_| "unexpected chat option count".to_string())?;
    let raw_url = get("WHATSAPP_API_URL").unwrap_or_else(|| DEFAULT_WHATSAPP_API_URL.to_string());
    let api_url = Url::parse(&raw_url).map_err(|e| format!("WHATSAPP_API_URL is invalid: {e}"))?;

    Ok(Some(ChatApiConfig {
        token: Secret::new(token),
        phone_number_id,
        api_url,
    }))
}

fn single_recipient<G>(
    get: &G,
    api: Option<ChatApiConfig>,
) -> Result<Option<ChatSingleConfig>, String>
where
    G: Fn(&str) -> Option<String>,
{
    match (api, get("WHATSAPP_PHONE_NUMBER")) {
        (Some(api), Some(recipient)) => Ok(Some(ChatSingleConfig { api, recipient })),
        (None, None) => Ok(None),
        (Some(_), None) if get("WHATSAPP_GROUP_NUMBERS").is_some() => Ok(None),
        (Some(_), None) => Err("missing WHATSAPP_PHONE_NUMBER".into()),
        (None, Some(_)) => Err("missing META_ACCESS_TOKEN, META_PHONE_NUMBER_ID".into()),
    }
}

fn group_recipients<G>(
    get: &G,
    api: Option<ChatApiConfig>,
) -> Result<Option<ChatGroupConfig>, String>
where
    G: Fn(&str) -> Option<String>,
{
    let raw = get("WHATSAPP_GROUP_NUMBERS");
    match (api, raw) {
        (None, None) | (Some(_), None) => Ok(None),
        (None, Some(_)) => Err("missing META_ACCESS_TOKEN, META_PHONE_NUMBER_ID".into()),
        (Some(api), Some(raw)) => {
            let recipients = parse_recipients(&raw);
            if recipients.is_empty() {
                return Err("WHATSAPP_GROUP_NUMBERS lists no recipient".into());
            }
            Ok(Some(ChatGroupConfig { api, recipients }))
        }
    }
}

fn telegram_config<G>(get: &G) -> Result<Option<TelegramConfig>, String>
where
    G: Fn(&str) -> Option<String>,
{
    let Some(values) = all_or_none(get, &["BOT_TOKEN", "CHAT_ID"])? else {
        return Ok(None);
    };
    let [token, chat_id]: [String; 2] = values
        .try_into()
        .map_err(|_| "unexpected telegram option count".to_string())?;
    let chat_id = chat_id
        .parse()
        .map_err(|_| format!("CHAT_ID is not a numeric chat id: {chat_id:?}"))?;

    Ok(Some(TelegramConfig {
        token: Secret::new(token),
        chat_id,
    }))
}
