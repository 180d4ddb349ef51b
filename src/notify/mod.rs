//! Best-effort delivery of security alerts to a user's contact address.

pub mod log;
pub mod smtp;

pub use log::LogNotifier;
pub use smtp::SmtpNotifier;

use crate::config::NotifierConfig;
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Transport name for logs.
    fn name(&self) -> &str;

    /// Deliver `message` to `address`.
    async fn send(&self, address: &str, message: &str) -> anyhow::Result<()>;
}

/// Factory: create the configured notifier.
pub fn create_notifier(config: &NotifierConfig) -> anyhow::Result<Arc<dyn Notifier>> {
    match config.kind.as_str() {
        "log" => Ok(Arc::new(LogNotifier)),
        "smtp" => {
            let host = config
                .smtp_host
                .as_deref()
                .filter(|h| !h.trim().is_empty())
                .ok_or_else(|| anyhow::anyhow!("notifier.kind='smtp' requires smtp_host"))?;
            let sender = config
                .sender_email
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .ok_or_else(|| anyhow::anyhow!("notifier.kind='smtp' requires sender_email"))?;
            Ok(Arc::new(SmtpNotifier::new(
                host,
                config.smtp_port,
                sender,
                config.sender_password.as_deref().unwrap_or(""),
            )?))
        }
        other if other.trim().is_empty() => {
            anyhow::bail!("notifier.kind cannot be empty. Supported values: log, smtp")
        }
        other => anyhow::bail!("Unknown notifier kind '{other}'. Supported values: log, smtp"),
    }
}
