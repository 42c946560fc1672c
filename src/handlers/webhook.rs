use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    pub object: Option<String>,
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEntry {
    #[serde(default)]
    pub changes: Vec<WebhookChange>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookChange {
    pub value: Option<WebhookValue>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookValue {
    #[serde(default)]
    pub messages: Vec<WebhookMessage>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookMessage {
    pub from: String,
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub msg_type: Option<String>,
    pub text: Option<WebhookText>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookText {
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundText {
    pub id: Option<String>,
    pub from: String,
    pub body: String,
}

/// Text messages of a Cloud API delivery; statuses and media are skipped.
pub fn text_messages(payload: WebhookPayload) -> Vec<InboundText> {
    if payload.object.as_deref() != Some("whatsapp_business_account") {
        return Vec::new();
    }
    payload
        .entry
        .into_iter()
        .flat_map(|e| e.changes)
        .filter_map(|c| c.value)
        .flat_map(|v| v.messages)
        .filter(|m| m.msg_type.as_deref() == Some("text"))
        .filter_map(|m| {
            let body = m.text?.body.trim().to_string();
            (!body.is_empty()).then_some(InboundText {
                id: m.id,
                from: m.from,
                body,
            })
        })
        .collect()
}

/// Bodies grouped per sender, senders and bodies in arrival order.
pub fn by_sender(messages: Vec<InboundText>) -> Vec<(String, Vec<String>)> {
    let mut groups: Vec<(String, Vec<String>)> = Vec::new();
    for msg in messages {
        match groups.iter_mut().find(|(from, _)| *from == msg.from) {
            Some((_, bodies)) => bodies.push(msg.body),
            None => groups.push((msg.from, vec![msg.body])),
        }
    }
    groups
}

/// Checks `X-Hub-Signature-256: sha256=<hex>` against the raw body.
fn validate_signature(app_secret: &str, signature: &str, body: &[u8]) -> bool {
    let Some(hex_digest) = signature.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };
    let mut mac = match Hmac::<Sha256>::new_from_slice(app_secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

// GET /webhook/whatsapp
pub async fn verify(
    State(state): State<Arc<AppState>>,
    Query(query): Query<VerifyQuery>,
) -> Response {
    let token_ok =
        query.verify_token.as_deref() == Some(state.config.whatsapp_verify_token.as_str());
    if query.mode.as_deref() == Some("subscribe") && token_ok {
        tracing::info!("webhook verified");
        return query.challenge.unwrap_or_default().into_response();
    }
    tracing::warn!(mode = ?query.mode, "webhook verification refused");
    StatusCode::FORBIDDEN.into_response()
}

// POST /webhook/whatsapp
pub async fn receive(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // empty app secret disables signature checks (dev mode)
    if !state.config.whatsapp_app_secret.is_empty() {
        let signature = headers
            .get("x-hub-signature-256")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if signature.is_empty() {
            tracing::warn!("missing X-Hub-Signature-256 header");
            return (StatusCode::FORBIDDEN, "Missing signature").into_response();
        }
        if !validate_signature(&state.config.whatsapp_app_secret, signature, &body) {
            tracing::warn!("invalid webhook signature");
            return (StatusCode::FORBIDDEN, "Invalid signature").into_response();
        }
    }

    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, "unreadable webhook payload");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let fresh: Vec<InboundText> = text_messages(payload)
        .into_iter()
        .filter(|msg| match &msg.id {
            Some(id) if !state.first_delivery(id) => {
                tracing::info!(message_id = %id, "duplicate delivery dropped");
                false
            }
            _ => true,
        })
        .collect();

    // acknowledge now; the provider retries slow webhooks.
    // One task per sender keeps that sender's messages in order.
    for (from, bodies) in by_sender(fresh) {
        tracing::info!(from = %from, messages = bodies.len(), "incoming WhatsApp messages");
        let state = state.clone();
        tokio::spawn(async move {
            for body in bodies {
                let reply = state.engine.handle_message(&from, &body).await;
                if let Err(e) = state.messaging.send_message(&from, &reply).await {
                    tracing::error!(error = %e, to = %from, "failed to send reply");
                }
            }
        });
    }

    StatusCode::OK.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(json: &str) -> WebhookPayload {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_extracts_text_messages_only() {
        let p = payload(
            r#"{
              "object": "whatsapp_business_account",
              "entry": [{"changes": [{"value": {"messages": [
                {"from": "5511988887777", "id": "wamid.1", "type": "text", "text": {"body": " oi "}},
                {"from": "5511988887777", "id": "wamid.2", "type": "image"},
                {"from": "5511911112222", "id": "wamid.3", "type": "text", "text": {"body": ""}}
              ]}}]}]
            }"#,
        );
        let msgs = text_messages(p);
        assert_eq!(
            msgs,
            vec![InboundText {
                id: Some("wamid.1".to_string()),
                from: "5511988887777".to_string(),
                body: "oi".to_string(),
            }]
        );
    }

    #[test]
    fn test_status_only_delivery_has_no_messages() {
        let p = payload(
            r#"{"object": "whatsapp_business_account",
                "entry": [{"changes": [{"value": {"statuses": [{"id": "wamid.1"}]}}]}]}"#,
        );
        assert!(text_messages(p).is_empty());

        let p = payload(r#"{"object": "page", "entry": []}"#);
        assert!(text_messages(p).is_empty());
    }

    #[test]
    fn test_grouping_keeps_arrival_order() {
        let msg = |from: &str, body: &str| InboundText {
            id: None,
            from: from.to_string(),
            body: body.to_string(),
        };
        let groups = by_sender(vec![
            msg("551100", "a primeira"),
            msg("551199", "oi"),
            msg("551100", "sim"),
        ]);
        assert_eq!(
            groups,
            vec![
                (
                    "551100".to_string(),
                    vec!["a primeira".to_string(), "sim".to_string()]
                ),
                ("551199".to_string(), vec!["oi".to_string()]),
            ]
        );
    }

    #[test]
    fn test_signature_validation() {
        let secret = "app-secret";
        let body = br#"{"object":"whatsapp_business_account"}"#;
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let good = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));

        assert!(validate_signature(secret, &good, body));
        assert!(!validate_signature("other", &good, body));
        assert!(!validate_signature(secret, &good, b"tampered"));
        assert!(!validate_signature(secret, "sha256=zz", body));
        assert!(!validate_signature(secret, "md5=abc", body));
    }
}
