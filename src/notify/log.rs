use super::Notifier;
use async_trait::async_trait;

/// Writes alerts to the log instead of delivering them. Used when no mail
/// transport is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, address: &str, message: &str) -> anyhow::Result<()> {
        tracing::warn!(
            contact = address,
            alert = message,
            "Security alert (not delivered: log notifier)"
        );
        Ok(())
    }
}
