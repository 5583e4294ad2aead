//! Mail gateway: the orchestrator's only view of the mailbox.
//!
//! `ImapSmtpGateway` holds one IMAP session and one SMTP session for the
//! whole run. Both are blocking, so every operation hops onto the blocking
//! pool; the sessions sit behind a mutex and are only ever used one call at
//! a time.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use secrecy::ExposeSecret;
use tracing::{debug, info, warn};

use crate::config::MailboxConfig;
use crate::error::TransportError;
use crate::mail::imap::{self, ImapSession, TlsStream};
use crate::mail::message::{InboundMessage, OutboundMessage};
use crate::mail::smtp::SmtpSession;

/// Mailbox operations used by the responder.
#[async_trait]
pub trait MailGateway: Send + Sync {
    /// Every message in the source folder that is not already a reply.
    async fn fetch_candidates(&self) -> Result<Vec<InboundMessage>, TransportError>;

    /// Transmit a reply and file a `\Seen` copy in the sent folder.
    async fn send(&self, message: &OutboundMessage) -> Result<(), TransportError>;

    /// Relocate a processed message to the done folder.
    async fn move_to_done(&self, message: &InboundMessage) -> Result<(), TransportError>;

    /// Close every connection. Safe to call more than once.
    async fn shutdown(&self);
}

/// Keep only messages that are not part of a reply thread.
pub fn filter_candidates(messages: Vec<InboundMessage>) -> Vec<InboundMessage> {
    messages
        .into_iter()
        .filter(|m| {
            if m.is_reply() {
                debug!(uid = m.uid, subject = %m.subject, "Skipping reply message");
                false
            } else {
                true
            }
        })
        .collect()
}

type SharedImap = Arc<Mutex<Option<ImapSession<TlsStream>>>>;
type SharedSmtp = Arc<Mutex<Option<SmtpSession>>>;

/// Live gateway over IMAP (inbound, folders) and SMTP (outbound).
pub struct ImapSmtpGateway {
    imap: SharedImap,
    smtp: SharedSmtp,
    done_folder: String,
    sent_folder: String,
}

impl ImapSmtpGateway {
    /// Open and authenticate both connections and select the source folder.
    /// If SMTP fails after IMAP is up, the IMAP session is logged out before
    /// returning the error.
    pub async fn connect(config: &MailboxConfig, from_address: &str) -> Result<Self, TransportError> {
        let cfg = config.clone();
        let hello_domain = from_address
            .rsplit_once('@')
            .map(|(_, domain)| domain.to_string())
            .unwrap_or_else(|| "localhost".to_string());

        let (imap, smtp) = tokio::task::spawn_blocking(move || {
            let mut imap = imap::connect_tls(&cfg.imap_host, cfg.imap_port)?;
            let setup = imap
                .login(&cfg.username, cfg.password.expose_secret())
                .and_then(|()| imap.select(&cfg.source_folder));
            if let Err(e) = setup {
                let _ = imap.logout();
                return Err(e);
            }

            match SmtpSession::connect(
                &cfg.smtp_host,
                cfg.smtp_port,
                &cfg.username,
                &cfg.password,
                &hello_domain,
            ) {
                Ok(smtp) => Ok((imap, smtp)),
                Err(e) => {
                    let _ = imap.logout();
                    Err(e)
                }
            }
        })
        .await
        .map_err(|e| TransportError::Task(e.to_string()))??;

        info!(
            imap = %config.imap_host,
            smtp = %config.smtp_host,
            folder = %config.source_folder,
            "Mailbox connections established"
        );

        Ok(Self {
            imap: Arc::new(Mutex::new(Some(imap))),
            smtp: Arc::new(Mutex::new(Some(smtp))),
            done_folder: config.done_folder.clone(),
            sent_folder: config.sent_folder.clone(),
        })
    }

    async fn with_imap<T, F>(&self, op: F) -> Result<T, TransportError>
    where
        T: Send + 'static,
        F: FnOnce(&mut ImapSession<TlsStream>) -> Result<T, TransportError> + Send + 'static,
    {
        let imap = Arc::clone(&self.imap);
        tokio::task::spawn_blocking(move || {
            let mut guard = imap
                .lock()
                .map_err(|_| TransportError::Task("IMAP session lock poisoned".into()))?;
            let session = guard.as_mut().ok_or(TransportError::Closed)?;
            op(session)
        })
        .await
        .map_err(|e| TransportError::Task(e.to_string()))?
    }

    async fn with_smtp<T, F>(&self, op: F) -> Result<T, TransportError>
    where
        T: Send + 'static,
        F: FnOnce(&mut SmtpSession) -> Result<T, TransportError> + Send + 'static,
    {
        let smtp = Arc::clone(&self.smtp);
        tokio::task::spawn_blocking(move || {
            let mut guard = smtp
                .lock()
                .map_err(|_| TransportError::Task("SMTP session lock poisoned".into()))?;
            let session = guard.as_mut().ok_or(TransportError::Closed)?;
            op(session)
        })
        .await
        .map_err(|e| TransportError::Task(e.to_string()))?
    }
}

#[async_trait]
impl MailGateway for ImapSmtpGateway {
    async fn fetch_candidates(&self) -> Result<Vec<InboundMessage>, TransportError> {
        let messages = self
            .with_imap(|session| {
                let uids = session.uid_search_undeleted()?;
                let mut messages = Vec::with_capacity(uids.len());
                for uid in uids {
                    let Some(raw) = session.uid_fetch(uid)? else {
                        warn!(uid, "Message vanished before fetch");
                        continue;
                    };
                    match InboundMessage::parse(uid, &raw) {
                        Some(message) => messages.push(message),
                        None => warn!(uid, "Could not parse message, leaving it in place"),
                    }
                }
                Ok(messages)
            })
            .await?;

        debug!(fetched = messages.len(), "Fetched source folder");
        Ok(filter_candidates(messages))
    }

    async fn send(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        let email = message
            .to_message()
            .map_err(|e| TransportError::Send(e.to_string()))?;
        let formatted = email.formatted();

        self.with_smtp(move |session| session.send(&email)).await?;
        info!(to = ?message.to, subject = %message.subject, "Sent email");

        let sent_folder = self.sent_folder.clone();
        if let Err(e) = self
            .with_imap(move |session| session.append(&sent_folder, "\\Seen", &formatted))
            .await
        {
            // Send already confirmed; the message still moves to done.
            warn!(error = %e, folder = %self.sent_folder, "Failed to save copy to sent folder");
        }
        Ok(())
    }

    async fn move_to_done(&self, message: &InboundMessage) -> Result<(), TransportError> {
        let uid = message.uid;
        let done_folder = self.done_folder.clone();
        self.with_imap(move |session| session.uid_move(uid, &done_folder))
            .await?;
        debug!(uid, folder = %self.done_folder, "Moved message to done folder");
        Ok(())
    }

    async fn shutdown(&self) {
        let imap = Arc::clone(&self.imap);
        let smtp = Arc::clone(&self.smtp);
        let result = tokio::task::spawn_blocking(move || close_sessions(&imap, &smtp)).await;
        if let Err(e) = result {
            warn!(error = %e, "Connection teardown task failed");
        }
        info!("Mailbox connections closed");
    }
}

impl Drop for ImapSmtpGateway {
    fn drop(&mut self) {
        close_sessions(&self.imap, &self.smtp);
    }
}

/// Log out of IMAP and quit SMTP, leaving `None` behind so a second call is
/// a no-op.
fn close_sessions(imap: &SharedImap, smtp: &SharedSmtp) {
    let imap_session = imap.lock().ok().and_then(|mut guard| guard.take());
    if let Some(mut session) = imap_session
        && let Err(e) = session.logout()
    {
        warn!(error = %e, "IMAP LOGOUT failed");
    }

    let smtp_session = smtp.lock().ok().and_then(|mut guard| guard.take());
    if let Some(mut session) = smtp_session {
        session.quit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(uid: u32, headers: &[(&str, &str)]) -> InboundMessage {
        InboundMessage {
            uid,
            from: "r@corp.example".into(),
            subject: format!("subject {uid}"),
            text: "body".into(),
            headers: headers
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn filter_drops_replies_and_keeps_order() {
        let messages = vec![
            message(1, &[("Message-ID", "<1@x>")]),
            message(2, &[("In-Reply-To", "<0@x>")]),
            message(3, &[("in-reply-to", "<0@x>")]),
            message(4, &[]),
        ];
        let uids: Vec<u32> = filter_candidates(messages).iter().map(|m| m.uid).collect();
        assert_eq!(uids, vec![1, 4]);
    }
}
