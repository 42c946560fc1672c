use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;

use super::local;
use super::{LlmProvider, Message};
use crate::models::{Intent, OrderId, Period, ServiceOrder};

/// Natural-language readings the conversation needs. Every method is
/// best-effort: `Err` means the service could not be reached, `None` means
/// the text did not say.
#[async_trait]
pub trait LanguageUnderstanding: Send + Sync {
    async fn classify_intent(&self, text: &str, session_summary: &str) -> anyhow::Result<Intent>;

    async fn interpret_date(
        &self,
        text: &str,
        reference: NaiveDate,
    ) -> anyhow::Result<Option<NaiveDate>>;

    async fn interpret_period(&self, text: &str) -> anyhow::Result<Option<Period>>;

    async fn interpret_order_reference(
        &self,
        text: &str,
        orders: &[ServiceOrder],
    ) -> anyhow::Result<Option<OrderId>>;

    /// Free conversational reply for messages outside the scheduling flow.
    async fn small_talk(&self, text: &str, session_summary: &str) -> anyhow::Result<String>;
}

const INTENT_PROMPT: &str = r#"You classify messages sent by customers of an internet provider to a WhatsApp assistant that schedules technician visits for service orders (OS).

Return ONLY valid JSON (no markdown, no explanation): {"intent": "<code>"}

Codes:
- "start": greeting or first contact
- "identity_extracted": the message carries the customer's CPF
- "list_orders": wants to see their service orders
- "order_status": asks about the status of an order
- "select_order": picks one of the listed orders (by number or position)
- "list_available_slots": asks which dates or periods are available
- "extract_date": states a date only
- "extract_period": states a period only (morning/afternoon)
- "request_schedule": asks to schedule, possibly with date and period
- "reschedule": wants to move an already scheduled visit
- "confirm_schedule": agrees with the proposed visit
- "change_order": wants to work on a different order
- "cancel": gives up the current scheduling
- "finished": says goodbye or thanks, conversation is over
- "unrelated": anything else

Use the conversation state to disambiguate."#;

const DATE_PROMPT: &str = r#"Extract the date the customer means. Reply ONLY with JSON: {"date": "YYYY-MM-DD"} or {"date": null} when no date is stated. Relative expressions are relative to the reference date given."#;

const PERIOD_PROMPT: &str = r#"Extract the half-day period the customer means. Reply ONLY with JSON: {"period": "morning"} or {"period": "afternoon"} or {"period": null}."#;

const ORDER_PROMPT: &str = r#"The customer is choosing one service order from a numbered list. Reply ONLY with JSON: {"order_id": <id>} using the id from the list, or {"order_id": null} when the message does not identify one."#;

const SMALL_TALK_PROMPT: &str = "Você é o assistente de agendamento de visitas técnicas de um provedor de internet, atendendo pelo WhatsApp. Responda em português, de forma breve e cordial. Não invente datas, horários nem ordens de serviço; se o cliente quiser agendar, peça o CPF ou que escolha uma OS.";

/// Local parsing first, the language model for whatever is left.
pub struct LlmNlu {
    llm: Box<dyn LlmProvider>,
}

impl LlmNlu {
    pub fn new(llm: Box<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    async fn ask_json(&self, system: &str, content: String) -> anyhow::Result<Option<Value>> {
        let response = self.llm.chat(system, &[Message::user(content)]).await?;
        let parsed = extract_json(&response);
        if parsed.is_none() {
            tracing::warn!(response = %response, "failed to parse LLM response as JSON");
        }
        Ok(parsed)
    }
}

#[async_trait]
impl LanguageUnderstanding for LlmNlu {
    async fn classify_intent(&self, text: &str, session_summary: &str) -> anyhow::Result<Intent> {
        let content = format!("Conversation state: {session_summary}\nCustomer message: {text}");
        let intent = self
            .ask_json(INTENT_PROMPT, content)
            .await?
            .and_then(|v| v.get("intent").and_then(Value::as_str).and_then(Intent::parse))
            .unwrap_or(Intent::Unrelated);
        Ok(intent)
    }

    async fn interpret_date(
        &self,
        text: &str,
        reference: NaiveDate,
    ) -> anyhow::Result<Option<NaiveDate>> {
        if let Some(date) = local::parse_date(text, reference) {
            return Ok(Some(date));
        }
        let content = format!(
            "Reference date: {} ({})\nCustomer message: {text}",
            reference.format("%Y-%m-%d"),
            reference.format("%A"),
        );
        let date = self
            .ask_json(DATE_PROMPT, content)
            .await?
            .and_then(|v| v.get("date").and_then(Value::as_str).map(str::to_string))
            .and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok());
        Ok(date)
    }

    async fn interpret_period(&self, text: &str) -> anyhow::Result<Option<Period>> {
        if let Some(period) = local::parse_period(text) {
            return Ok(Some(period));
        }
        let period = self
            .ask_json(PERIOD_PROMPT, format!("Customer message: {text}"))
            .await?
            .and_then(|v| v.get("period").and_then(Value::as_str).and_then(Period::from_code));
        Ok(period)
    }

    async fn interpret_order_reference(
        &self,
        text: &str,
        orders: &[ServiceOrder],
    ) -> anyhow::Result<Option<OrderId>> {
        if orders.is_empty() {
            return Ok(None);
        }
        if let Some(id) = local::parse_order_reference(text, orders) {
            return Ok(Some(id));
        }
        let listing: Vec<String> = orders
            .iter()
            .enumerate()
            .map(|(i, o)| format!("{}. id {}: {}", i + 1, o.id, o.short_label()))
            .collect();
        let content = format!("Orders:\n{}\nCustomer message: {text}", listing.join("\n"));
        let id = self
            .ask_json(ORDER_PROMPT, content)
            .await?
            .and_then(|v| v.get("order_id").and_then(order_id_value))
            // only ids the customer was actually shown
            .filter(|id| orders.iter().any(|o| o.id == *id));
        Ok(id)
    }

    async fn small_talk(&self, text: &str, session_summary: &str) -> anyhow::Result<String> {
        let system = format!("{SMALL_TALK_PROMPT}\n\nEstado da conversa: {session_summary}");
        let reply = self.llm.chat(&system, &[Message::user(text)]).await?;
        Ok(reply.trim().to_string())
    }
}

fn order_id_value(v: &Value) -> Option<OrderId> {
    v.as_u64()
        .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
}

/// First JSON object in a model response, tolerating markdown fences and prose.
pub fn extract_json(response: &str) -> Option<Value> {
    if let Ok(v @ Value::Object(_)) = serde_json::from_str::<Value>(response) {
        return Some(v);
    }

    let trimmed = response.trim();
    let cleaned = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    let cleaned = cleaned.strip_suffix("```").unwrap_or(cleaned).trim();

    if let Ok(v @ Value::Object(_)) = serde_json::from_str::<Value>(cleaned) {
        return Some(v);
    }

    let start = cleaned.find('{')?;
    let end = cleaned.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&cleaned[start..=end]) {
        Ok(v @ Value::Object(_)) => Some(v),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderStatus;
    use chrono::NaiveDateTime;
    use std::sync::Mutex;

    struct CannedLlm {
        reply: String,
        calls: Mutex<u32>,
    }

    impl CannedLlm {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for CannedLlm {
        async fn chat(&self, _system: &str, _messages: &[Message]) -> anyhow::Result<String> {
            *self.calls.lock().unwrap() += 1;
            Ok(self.reply.clone())
        }
    }

    struct DownLlm;

    #[async_trait]
    impl LlmProvider for DownLlm {
        async fn chat(&self, _system: &str, _messages: &[Message]) -> anyhow::Result<String> {
            anyhow::bail!("connection refused")
        }
    }

    fn order(id: OrderId) -> ServiceOrder {
        ServiceOrder {
            id,
            client_id: 1,
            sector_id: 1,
            subject_code: 0,
            status: OrderStatus::Open,
            created_at: NaiveDateTime::parse_from_str("2025-06-10 08:00", "%Y-%m-%d %H:%M").unwrap(),
            technician_id: None,
            scheduled_date: None,
            scheduled_period: None,
            preferred_period: None,
            description: None,
        }
    }

    fn reference() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 16).unwrap()
    }

    #[test]
    fn test_extract_json_plain_and_fenced() {
        let v = extract_json(r#"{"intent":"cancel"}"#).unwrap();
        assert_eq!(v["intent"], "cancel");

        let v = extract_json("```json\n{\"intent\":\"finished\"}\n```").unwrap();
        assert_eq!(v["intent"], "finished");

        let v = extract_json("Claro! {\"date\": \"2025-06-20\"} espero ter ajudado").unwrap();
        assert_eq!(v["date"], "2025-06-20");
    }

    #[test]
    fn test_extract_json_rejects_garbage() {
        assert!(extract_json("não entendi").is_none());
        assert!(extract_json("[1, 2]").is_none());
        assert!(extract_json("} {").is_none());
    }

    #[tokio::test]
    async fn test_classify_intent_from_model() {
        let nlu = LlmNlu::new(Box::new(CannedLlm::new(r#"{"intent": "select-order"}"#)));
        let intent = nlu.classify_intent("quero a primeira", "").await.unwrap();
        assert_eq!(intent, Intent::SelectOrder);
    }

    #[tokio::test]
    async fn test_unparseable_intent_degrades_to_unrelated() {
        let nlu = LlmNlu::new(Box::new(CannedLlm::new("sorry, I can't")));
        let intent = nlu.classify_intent("???", "").await.unwrap();
        assert_eq!(intent, Intent::Unrelated);
    }

    #[tokio::test]
    async fn test_local_date_skips_model() {
        let llm = CannedLlm::new(r#"{"date": "2030-01-01"}"#);
        let nlu = LlmNlu::new(Box::new(llm));
        let date = nlu.interpret_date("amanhã", reference()).await.unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2025, 6, 17));
    }

    #[tokio::test]
    async fn test_model_date_fallback() {
        let nlu = LlmNlu::new(Box::new(CannedLlm::new(r#"{"date": "2025-06-27"}"#)));
        let date = nlu
            .interpret_date("no fim da semana que vem", reference())
            .await
            .unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2025, 6, 27));

        let nlu = LlmNlu::new(Box::new(CannedLlm::new(r#"{"date": "27 de junho"}"#)));
        let date = nlu.interpret_date("fim do mês", reference()).await.unwrap();
        assert_eq!(date, None);
    }

    #[tokio::test]
    async fn test_order_reference_must_be_listed() {
        let orders = vec![order(100), order(200)];
        let nlu = LlmNlu::new(Box::new(CannedLlm::new(r#"{"order_id": 999}"#)));
        let id = nlu
            .interpret_order_reference("a da fibra", &orders)
            .await
            .unwrap();
        assert_eq!(id, None);

        let nlu = LlmNlu::new(Box::new(CannedLlm::new(r#"{"order_id": "200"}"#)));
        let id = nlu
            .interpret_order_reference("a da fibra", &orders)
            .await
            .unwrap();
        assert_eq!(id, Some(200));
    }

    #[tokio::test]
    async fn test_model_failure_is_an_error() {
        let nlu = LlmNlu::new(Box::new(DownLlm));
        assert!(nlu.classify_intent("oi", "").await.is_err());
        assert!(nlu.interpret_period("quando der").await.is_err());
        // local readings never reach the model
        assert_eq!(
            nlu.interpret_period("de tarde").await.unwrap(),
            Some(Period::Afternoon)
        );
    }
}
