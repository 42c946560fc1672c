use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;

use super::MessagingProvider;

const GRAPH_API: &str = "https://graph.facebook.com/v19.0";
/// The Cloud API rejects text bodies above 4096 characters.
const MAX_BODY_CHARS: usize = 4000;

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    messaging_product: &'static str,
    to: String,
    #[serde(rename = "type")]
    msg_type: &'static str,
    text: SendMessageText<'a>,
}

#[derive(Debug, Serialize)]
struct SendMessageText<'a> {
    body: &'a str,
}

/// WhatsApp Cloud API text sender.
pub struct WhatsAppProvider {
    access_token: String,
    phone_number_id: String,
    client: reqwest::Client,
}

impl WhatsAppProvider {
    pub fn new(
        access_token: String,
        phone_number_id: String,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build WhatsApp HTTP client")?;
        Ok(Self {
            access_token,
            phone_number_id,
            client,
        })
    }
}

fn chunk_body(body: &str) -> Vec<String> {
    let chars: Vec<char> = body.chars().collect();
    if chars.len() <= MAX_BODY_CHARS {
        return vec![body.to_string()];
    }
    chars
        .chunks(MAX_BODY_CHARS)
        .map(|c| c.iter().collect())
        .collect()
}

#[async_trait]
impl MessagingProvider for WhatsAppProvider {
    async fn send_message(&self, to: &str, body: &str) -> anyhow::Result<()> {
        let url = format!("{GRAPH_API}/{}/messages", self.phone_number_id);
        let recipient = to.trim_start_matches('+').to_string();

        for chunk in chunk_body(body) {
            let req = SendMessageRequest {
                messaging_product: "whatsapp",
                to: recipient.clone(),
                msg_type: "text",
                text: SendMessageText { body: &chunk },
            };

            let resp = self
                .client
                .post(&url)
                .bearer_auth(&self.access_token)
                .json(&req)
                .send()
                .await
                .context("failed to call WhatsApp API")?;

            if !resp.status().is_success() {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                anyhow::bail!("WhatsApp API error ({}): {}", status, text);
            }
        }

        Ok(())
    }
}
