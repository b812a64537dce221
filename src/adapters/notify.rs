use crate::config::settings::SmtpSettings;
use crate::domain::ports::{Email, Notifier};
use crate::utils::error::{EtlError, Result};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;

const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

fn notification_error(context: &str, e: impl std::fmt::Display) -> EtlError {
    EtlError::NotificationError {
        message: format!("{}: {}", context, e),
    }
}

impl SmtpNotifier {
    /// SMTP_USE_TLS 時走 STARTTLS；有帳密才登入
    pub fn new(settings: &SmtpSettings) -> Result<Self> {
        let builder = if settings.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.server)
                .map_err(|e| notification_error("Invalid SMTP relay", e))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.server)
        };

        let mut builder = builder.port(settings.port).timeout(Some(SMTP_TIMEOUT));
        if let (Some(username), Some(password)) = (&settings.username, &settings.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        tracing::debug!(
            "SMTP transport configured for {}:{} (tls: {})",
            settings.server,
            settings.port,
            settings.use_tls
        );
        Ok(Self {
            transport: builder.build(),
        })
    }
}

pub fn build_message(email: &Email) -> Result<Message> {
    let from: Mailbox = email
        .from
        .parse()
        .map_err(|e| notification_error("Invalid sender address", e))?;

    let mut builder = Message::builder()
        .from(from)
        .subject(email.subject.clone())
        .header(ContentType::TEXT_PLAIN);
    for recipient in &email.to {
        let to: Mailbox = recipient
            .parse()
            .map_err(|e| notification_error("Invalid recipient address", e))?;
        builder = builder.to(to);
    }

    builder
        .body(email.body.clone())
        .map_err(|e| notification_error("Cannot build message", e))
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, email: &Email) -> Result<()> {
        let message = build_message(email)?;
        self.transport
            .send(message)
            .await
            .map_err(|e| notification_error("SMTP delivery failed", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email(to: &[&str]) -> Email {
        Email {
            from: "etl-agent@example.com".to_string(),
            to: to.iter().map(|s| s.to_string()).collect(),
            subject: "✅ Job - Success".to_string(),
            body: "done".to_string(),
        }
    }

    #[test]
    fn test_build_message_with_recipients() {
        let message = build_message(&email(&["a@example.com", "b@example.com"])).unwrap();
        let headers = message.headers().to_string();
        assert!(headers.contains("a@example.com"));
        assert!(headers.contains("b@example.com"));
    }

    #[test]
    fn test_invalid_address_is_notification_error() {
        assert!(matches!(
            build_message(&email(&["not an address"])),
            Err(EtlError::NotificationError { .. })
        ));
    }

    #[test]
    fn test_transport_builds_without_tls() {
        let settings = SmtpSettings {
            server: "localhost".to_string(),
            port: 2525,
            use_tls: false,
            username: None,
            password: None,
        };
        assert!(SmtpNotifier::new(&settings).is_ok());
    }
}
