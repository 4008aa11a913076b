use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use thiserror::Error;
use tracing::info;

use crate::config::EmailConfig;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("EMAIL_PASS is not set")]
    MissingPassword,

    #[error("invalid address {0}")]
    Address(String),

    #[error("could not build message: {0}")]
    Build(String),

    #[error("SMTP send failed: {0}")]
    Transport(String),
}

/// A rendered report ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct Email {
    pub subject: String,
    pub html: String,
}

/// Implicit-TLS SMTP sender with fixed from/to addresses.
pub struct Mailer {
    config: EmailConfig,
}

impl Mailer {
    pub fn new(config: &EmailConfig) -> Self {
        Self { config: config.clone() }
    }

    fn message(&self, email: &Email) -> Result<Message, MailError> {
        let from = self
            .config
            .from
            .parse::<Mailbox>()
            .map_err(|e| MailError::Address(format!("{}: {e}", self.config.from)))?;
        let to = self
            .config
            .to
            .parse::<Mailbox>()
            .map_err(|e| MailError::Address(format!("{}: {e}", self.config.to)))?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(email.subject.as_str())
            .header(ContentType::TEXT_HTML)
            .body(email.html.clone())
            .map_err(|e| MailError::Build(e.to_string()))
    }

    /// Blocking SMTP session, run off the async runtime.
    pub async fn send(&self, email: &Email) -> Result<(), MailError> {
        let password = self.config.password.clone().ok_or(MailError::MissingPassword)?;
        let message = self.message(email)?;
        let host = self.config.smtp_host.clone();
        let port = self.config.smtp_port;
        let creds = Credentials::new(self.config.from.clone(), password);

        tokio::task::spawn_blocking(move || {
            let transport = SmtpTransport::relay(&host)
                .map_err(|e| MailError::Transport(e.to_string()))?
                .port(port)
                .credentials(creds)
                .build();
            transport
                .send(&message)
                .map(|_| ())
                .map_err(|e| MailError::Transport(e.to_string()))
        })
        .await
        .map_err(|e| MailError::Transport(e.to_string()))??;

        info!("Report email sent: {}", email.subject);
        Ok(())
    }
}
