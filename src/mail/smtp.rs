//! Long-lived SMTP session via lettre's low-level connection.

use std::time::Duration;

use lettre::Message;
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::transport::smtp::client::{SmtpConnection, TlsParameters};
use lettre::transport::smtp::extension::ClientId;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};

use crate::error::TransportError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// One implicit-TLS SMTP connection, authenticated at connect and reused for
/// every send until [`SmtpSession::quit`].
pub struct SmtpSession {
    conn: SmtpConnection,
}

impl SmtpSession {
    pub fn connect(
        host: &str,
        port: u16,
        username: &str,
        password: &SecretString,
        hello_domain: &str,
    ) -> Result<Self, TransportError> {
        let server = format!("{host}:{port}");
        let tls = TlsParameters::new(host.to_string())
            .map_err(|e| TransportError::Tls(format!("SMTP TLS setup failed: {e}")))?;
        let hello = ClientId::Domain(hello_domain.to_string());

        let mut conn =
            SmtpConnection::connect((host, port), Some(CONNECT_TIMEOUT), &hello, Some(&tls), None)
                .map_err(|e| TransportError::Connect {
                    server: server.clone(),
                    reason: e.to_string(),
                })?;

        let creds = Credentials::new(
            username.to_string(),
            password.expose_secret().to_string(),
        );
        if let Err(e) = conn.auth(&[Mechanism::Plain, Mechanism::Login], &creds) {
            let _ = conn.quit();
            return Err(TransportError::Auth {
                server,
                reason: e.to_string(),
            });
        }

        debug!(server = %server, "SMTP connected");
        Ok(Self { conn })
    }

    pub fn send(&mut self, message: &Message) -> Result<(), TransportError> {
        self.conn
            .send(message.envelope(), &message.formatted())
            .map_err(|e| TransportError::Send(e.to_string()))?;
        Ok(())
    }

    pub fn quit(&mut self) {
        if let Err(e) = self.conn.quit() {
            warn!(error = %e, "SMTP QUIT failed");
        }
    }
}
