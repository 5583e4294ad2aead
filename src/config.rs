//! Configuration types.
//!
//! Everything is read once at startup into [`Config`] and passed down by
//! reference. `from_lookup` takes any key lookup so tests never touch the
//! process environment.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::extractor::DEFAULT_MAX_TOKENS;
use crate::llm::{DEFAULT_BASE_URL, DEFAULT_MODEL, LlmConfig};

/// Default pre-send wait, giving an operator time to abort.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Mailbox connection settings.
#[derive(Debug, Clone)]
pub struct MailboxConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: SecretString,
    /// Folder scanned for recruiter emails.
    pub source_folder: String,
    /// Folder processed messages are moved to.
    pub done_folder: String,
    /// Folder that receives a copy of every sent reply.
    pub sent_folder: String,
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Print replies instead of sending them; no mailbox mutations.
    pub dry_run: bool,
    /// Use canned extraction data instead of calling the text API.
    pub bypass_llm: bool,
    pub grace_period: Duration,
    /// Reply signature text.
    pub signature: String,
    /// From address of every reply.
    pub from_address: String,
    pub mailbox: MailboxConfig,
    /// `None` in bypass mode.
    pub llm: Option<LlmConfig>,
}

impl Config {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    ///
    /// The dry-run/bypass conflict is checked before anything else so it is
    /// reported even when other variables are missing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Values are taken verbatim; only flags and numbers are trimmed.
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let require = |key: &str| get(key).ok_or_else(|| ConfigError::MissingEnvVar(key.into()));

        let dry_run = parse_flag("DRY_RUN", get("DRY_RUN"), true)?;
        let bypass_llm = parse_flag("BYPASS_OPENAI", get("BYPASS_OPENAI"), false)?;
        check_modes(dry_run, bypass_llm)?;

        let grace_period = Duration::from_secs(parse_number(
            "GRACE_PERIOD_SECS",
            get("GRACE_PERIOD_SECS"),
            DEFAULT_GRACE_PERIOD.as_secs(),
        )?);

        let mailbox = MailboxConfig {
            imap_host: require("IMAP_HOST")?,
            imap_port: parse_number("IMAP_PORT", get("IMAP_PORT"), 993)?,
            smtp_host: require("SMTP_HOST")?,
            smtp_port: parse_number("SMTP_PORT", get("SMTP_PORT"), 465)?,
            username: require("MAILBOX_USER")?,
            password: SecretString::from(require("MAILBOX_PASS")?),
            source_folder: get("MAILBOX_RECRUITMENT_FOLDER")
                .unwrap_or_else(|| "Recruitment".to_string()),
            done_folder: get("MAILBOX_DONE_FOLDER")
                .unwrap_or_else(|| "Recruitment/Done".to_string()),
            sent_folder: get("MAILBOX_SENT_FOLDER").unwrap_or_else(|| "Sent".to_string()),
        };

        let llm = if bypass_llm {
            None
        } else {
            Some(LlmConfig {
                api_key: SecretString::from(require("OPENAI_SECRET_KEY")?),
                organization: get("OPENAI_ORG"),
                model: get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
                base_url: get("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
                max_tokens: parse_number(
                    "OPENAI_MAX_TOKENS",
                    get("OPENAI_MAX_TOKENS"),
                    DEFAULT_MAX_TOKENS,
                )?,
            })
        };

        Ok(Self {
            dry_run,
            bypass_llm,
            grace_period,
            signature: require("SIGNATURE")?,
            from_address: require("EMAIL_ADDRESS")?,
            mailbox,
            llm,
        })
    }

    /// Pre-flight check, run again by `main` before any connection is made.
    pub fn preflight(&self) -> Result<(), ConfigError> {
        check_modes(self.dry_run, self.bypass_llm)
    }
}

/// Bypass mode with live sends would mail out fabricated names.
fn check_modes(dry_run: bool, bypass_llm: bool) -> Result<(), ConfigError> {
    if bypass_llm && !dry_run {
        return Err(ConfigError::BypassRequiresDryRun);
    }
    Ok(())
}

fn parse_flag(key: &str, value: Option<String>, default: bool) -> Result<bool, ConfigError> {
    let Some(value) = value else {
        return Ok(default);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.into(),
            message: format!("expected 0/1 or true/false, got {other:?}"),
        }),
    }
}

fn parse_number<T>(key: &str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(v) => v.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.into(),
            message: e.to_string(),
        }),
    }
}
