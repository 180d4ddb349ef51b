//! SMTP mail notifier (STARTTLS relay, plain auth).

use super::Notifier;
use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};

/// Subject line of every alert mail.
const ALERT_SUBJECT: &str = "Warning: Suspicious Activity Detected";

pub struct SmtpNotifier {
    transport: SmtpTransport,
    sender: Mailbox,
}

impl SmtpNotifier {
    pub fn new(host: &str, port: u16, sender_email: &str, sender_password: &str) -> Result<Self> {
        let sender: Mailbox = sender_email
            .parse()
            .with_context(|| format!("Invalid sender address '{sender_email}'"))?;
        let transport = SmtpTransport::starttls_relay(host)
            .with_context(|| format!("Invalid SMTP relay '{host}'"))?
            .port(port)
            .credentials(Credentials::new(
                sender_email.to_owned(),
                sender_password.to_owned(),
            ))
            .build();
        Ok(Self { transport, sender })
    }

    fn build_message(&self, address: &str, message: &str) -> Result<Message> {
        let recipient: Mailbox = address
            .parse()
            .with_context(|| format!("Invalid recipient address '{address}'"))?;
        Message::builder()
            .from(self.sender.clone())
            .to(recipient)
            .subject(ALERT_SUBJECT)
            .header(ContentType::TEXT_PLAIN)
            .body(format!("Hello,\r\n\r\n{message}\r\n"))
            .context("Failed to build alert mail")
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn send(&self, address: &str, message: &str) -> Result<()> {
        let mail = self.build_message(address, message)?;
        let transport = self.transport.clone();
        tokio::task::spawn_blocking(move || transport.send(&mail))
            .await
            .context("SMTP send task failed")?
            .context("SMTP delivery failed")?;
        tracing::info!(contact = address, "Alert mail sent");
        Ok(())
    }
}
