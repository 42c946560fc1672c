pub mod whatsapp;

use async_trait::async_trait;

#[async_trait]
pub trait MessagingProvider: Send + Sync {
    async fn send_message(&self, to: &str, body: &str) -> anyhow::Result<()>;
}

/// Used when no WhatsApp credentials are configured; replies only reach the logs.
pub struct LogOnlyProvider;

#[async_trait]
impl MessagingProvider for LogOnlyProvider {
    async fn send_message(&self, to: &str, body: &str) -> anyhow::Result<()> {
        tracing::info!(to = %to, body = %body, "outbound message (not delivered)");
        Ok(())
    }
}
