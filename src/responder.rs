//! Responder: drives one pass over the recruitment folder.
//!
//! Per message: extract → compose → (preview) → send → move to done. Each
//! message is handled independently; a failure is logged with the offending
//! body and the batch moves on. A message is only moved after its reply was
//! confirmed sent, so anything that fails stays in the source folder and is
//! retried on the next run.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::ResponderError;
use crate::extractor::Extractor;
use crate::mail::{InboundMessage, MailGateway};
use crate::reply;

/// What happened to a message that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Reply sent and message moved to done.
    Sent,
    /// Reply rendered and printed only.
    DryRun,
}

/// Totals for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub candidates: usize,
    pub sent: usize,
    pub dry_run: usize,
    pub failed: usize,
}

/// Settings the responder needs from [`Config`].
#[derive(Debug, Clone)]
pub struct ResponderSettings {
    pub dry_run: bool,
    pub grace_period: Duration,
    pub from_address: String,
    pub signature: String,
}

impl From<&Config> for ResponderSettings {
    fn from(config: &Config) -> Self {
        Self {
            dry_run: config.dry_run,
            grace_period: config.grace_period,
            from_address: config.from_address.clone(),
            signature: config.signature.clone(),
        }
    }
}

pub struct Responder {
    gateway: Arc<dyn MailGateway>,
    extractor: Extractor,
    settings: ResponderSettings,
}

impl Responder {
    pub fn new(
        settings: ResponderSettings,
        gateway: Arc<dyn MailGateway>,
        extractor: Extractor,
    ) -> Self {
        Self {
            gateway,
            extractor,
            settings,
        }
    }

    /// Respond to every candidate in the source folder.
    ///
    /// A failed fetch ends the run with an empty summary; nothing was
    /// touched, so the next run starts from the same state.
    pub async fn run(&self) -> RunSummary {
        let emails = match self.gateway.fetch_candidates().await {
            Ok(emails) => emails,
            Err(e) => {
                error!(error = %e, "Failed to fetch recruiter emails");
                return RunSummary::default();
            }
        };

        let total = emails.len();
        info!("Going to respond to {total} emails");

        let mut summary = RunSummary {
            candidates: total,
            ..RunSummary::default()
        };

        for (index, email) in emails.iter().enumerate() {
            info!(uid = email.uid, "Responding to email {} of {total}...", index + 1);

            match self.respond_to(email).await {
                Ok(Outcome::Sent) => summary.sent += 1,
                Ok(Outcome::DryRun) => summary.dry_run += 1,
                Err(e) => {
                    summary.failed += 1;
                    error!(
                        uid = email.uid,
                        sender = %email.from,
                        subject = %email.subject,
                        error = %e,
                        "Error creating/sending response email, skipping"
                    );
                    error!("Recruiter email:\n{}", email.text);
                }
            }
        }

        info!(
            candidates = summary.candidates,
            sent = summary.sent,
            dry_run = summary.dry_run,
            failed = summary.failed,
            "Run complete"
        );
        summary
    }

    /// Handle one message end to end.
    pub async fn respond_to(&self, email: &InboundMessage) -> Result<Outcome, ResponderError> {
        let extraction = self.extractor.extract(&email.text).await?;

        let response = reply::compose(
            email,
            &extraction,
            &self.settings.from_address,
            &self.settings.signature,
        );
        let rendered = response.render()?;
        info!("Generated response email:\n{rendered}");

        if self.settings.dry_run {
            info!(uid = email.uid, "DRY_RUN; not sending email");
            return Ok(Outcome::DryRun);
        }

        let grace = self.settings.grace_period;
        if !grace.is_zero() {
            info!("Going to send this email in {} seconds...", grace.as_secs_f32());
            tokio::time::sleep(grace).await;
        }

        self.gateway
            .send(&response)
            .await
            .map_err(ResponderError::Send)?;

        self.gateway.move_to_done(email).await.map_err(|e| {
            warn!(
                uid = email.uid,
                "Reply was sent but the message stays in the source folder; it may be answered again"
            );
            ResponderError::MoveAfterSend(e)
        })?;

        Ok(Outcome::Sent)
    }
}
