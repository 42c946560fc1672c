use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use chrono::{Local, NaiveDate};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tower::ServiceExt;

use agendabot::config::{AppConfig, SessionBackendKind};
use agendabot::db;
use agendabot::handlers;
use agendabot::models::{
    ClientId, Intent, OrderId, OrderStatus, Period, ScheduleCommit, Sector, ServiceOrder,
    TechnicianId,
};
use agendabot::services::ai::nlu::LanguageUnderstanding;
use agendabot::services::calendar::BusinessCalendar;
use agendabot::services::conversation::ConversationEngine;
use agendabot::services::directory::SectorDirectory;
use agendabot::services::erp::{Customer, ErpClient, ErpWriteResult};
use agendabot::services::messaging::MessagingProvider;
use agendabot::services::policy::PolicyResolver;
use agendabot::services::scheduling::SchedulingService;
use agendabot::services::session_store::SessionStore;
use agendabot::state::{AppState, RecentMessageIds};

const CPF: &str = "52998224725";
const PHONE: &str = "5511988887777";
const APP_SECRET: &str = "test-app-secret";

// ── Mocks ──

#[derive(Default)]
struct MockErp {
    orders: Mutex<Vec<ServiceOrder>>,
    commits: Mutex<Vec<ScheduleCommit>>,
}

#[async_trait]
impl ErpClient for MockErp {
    async fn find_customer_by_cpf(&self, cpf: &str) -> anyhow::Result<Option<Customer>> {
        Ok((cpf == CPF).then(|| Customer {
            id: 7,
            name: "Maria Souza".to_string(),
            cpf: CPF.to_string(),
        }))
    }

    async fn orders_for_customer(&self, client_id: ClientId) -> anyhow::Result<Vec<ServiceOrder>> {
        let orders = self.orders.lock().unwrap();
        Ok(orders.iter().filter(|o| o.client_id == client_id).cloned().collect())
    }

    async fn order(&self, order_id: OrderId) -> anyhow::Result<Option<ServiceOrder>> {
        let orders = self.orders.lock().unwrap();
        Ok(orders.iter().find(|o| o.id == order_id).cloned())
    }

    async fn scheduled_orders(
        &self,
        _technicians: &BTreeSet<TechnicianId>,
        _from: NaiveDate,
        _to: NaiveDate,
    ) -> anyhow::Result<Vec<ServiceOrder>> {
        Ok(Vec::new())
    }

    async fn commit_schedule(&self, commit: &ScheduleCommit) -> anyhow::Result<ErpWriteResult> {
        self.commits.lock().unwrap().push(commit.clone());
        Ok(ErpWriteResult {
            success: true,
            message: None,
        })
    }
}

/// Classifies greetings as `start`; everything else is left to the local readings.
struct MockNlu;

#[async_trait]
impl LanguageUnderstanding for MockNlu {
    async fn classify_intent(&self, text: &str, _summary: &str) -> anyhow::Result<Intent> {
        if text.to_lowercase().starts_with("oi") {
            return Ok(Intent::Start);
        }
        Ok(Intent::Unrelated)
    }

    async fn interpret_date(
        &self,
        _text: &str,
        _reference: NaiveDate,
    ) -> anyhow::Result<Option<NaiveDate>> {
        Ok(None)
    }

    async fn interpret_period(&self, _text: &str) -> anyhow::Result<Option<Period>> {
        Ok(None)
    }

    async fn interpret_order_reference(
        &self,
        _text: &str,
        _orders: &[ServiceOrder],
    ) -> anyhow::Result<Option<OrderId>> {
        Ok(None)
    }

    async fn small_talk(&self, _text: &str, _summary: &str) -> anyhow::Result<String> {
        Ok("Posso ajudar com o agendamento da sua visita.".to_string())
    }
}

struct MockMessaging {
    sent: Arc<Mutex<Vec<(String, String)>>>,
}

#[async_trait]
impl MessagingProvider for MockMessaging {
    async fn send_message(&self, to: &str, body: &str) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), body.to_string()));
        Ok(())
    }
}

// ── Helpers ──

fn test_config(app_secret: &str) -> AppConfig {
    AppConfig {
        port: 3000,
        database_url: ":memory:".to_string(),
        admin_token: "test-token".to_string(),
        llm_provider: "ollama".to_string(),
        ollama_url: "http://localhost:11434".to_string(),
        ollama_model: "llama3.2".to_string(),
        groq_api_key: String::new(),
        groq_model: "llama-3.1-8b-instant".to_string(),
        erp_base_url: "http://localhost:8080/api".to_string(),
        erp_token: String::new(),
        http_timeout_secs: 5,
        whatsapp_access_token: String::new(),
        whatsapp_phone_number_id: String::new(),
        whatsapp_verify_token: "verify-me".to_string(),
        whatsapp_app_secret: app_secret.to_string(),
        session_backend: SessionBackendKind::Memory,
        session_ttl_minutes: 120,
        holidays: String::new(),
        directory_refresh_secs: 0,
        max_listed_slots: 5,
    }
}

fn open_order(id: OrderId) -> ServiceOrder {
    ServiceOrder {
        id,
        client_id: 7,
        sector_id: 1,
        subject_code: 0,
        status: OrderStatus::Open,
        created_at: Local::now().naive_local(),
        technician_id: None,
        scheduled_date: None,
        scheduled_period: None,
        preferred_period: None,
        description: Some("sem conexão".to_string()),
    }
}

struct TestApp {
    state: Arc<AppState>,
    erp: Arc<MockErp>,
    sent: Arc<Mutex<Vec<(String, String)>>>,
}

fn test_app(app_secret: &str, orders: Vec<ServiceOrder>) -> TestApp {
    let erp = Arc::new(MockErp::default());
    *erp.orders.lock().unwrap() = orders;

    let directory = Arc::new(SectorDirectory::new(vec![Sector::new(1, [10, 11])]));
    let scheduling = Arc::new(SchedulingService::new(
        BusinessCalendar::default(),
        PolicyResolver::default(),
        directory.clone(),
        erp.clone(),
    ));
    let engine = ConversationEngine::new(
        Arc::new(SessionStore::in_memory()),
        scheduling,
        Arc::new(MockNlu),
        5,
    );

    let sent = Arc::new(Mutex::new(vec![]));
    let state = Arc::new(AppState {
        db: db::init_shared(":memory:").unwrap(),
        config: test_config(app_secret),
        engine,
        directory,
        messaging: Box::new(MockMessaging { sent: sent.clone() }),
        recent_messages: Mutex::new(RecentMessageIds::default()),
        started_at: Local::now().naive_local(),
    });
    TestApp { state, erp, sent }
}

fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route(
            "/webhook/whatsapp",
            get(handlers::webhook::verify).post(handlers::webhook::receive),
        )
        .route("/api/dev/message", post(handlers::dev::send_message))
        .route("/api/admin/status", get(handlers::admin::get_status))
        .route(
            "/api/admin/sessions/:phone",
            get(handlers::admin::get_session),
        )
        .route(
            "/api/admin/sessions/:phone/reset",
            post(handlers::admin::reset_session),
        )
        .route(
            "/api/admin/directory/reload",
            post(handlers::admin::reload_directory),
        )
        .with_state(state)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn dev_message(state: &Arc<AppState>, message: &str) -> String {
    let body = serde_json::json!({ "from_phone": PHONE, "message": message });
    let response = app(state.clone())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/dev/message")
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    json["reply"].as_str().unwrap().to_string()
}

fn admin_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("Authorization", "Bearer test-token")
        .body(Body::empty())
        .unwrap()
}

fn text_delivery(message_id: &str, body: &str) -> String {
    text_batch(&[(message_id, body)])
}

fn text_batch(messages: &[(&str, &str)]) -> String {
    let messages: Vec<serde_json::Value> = messages
        .iter()
        .map(|(id, body)| {
            serde_json::json!({
                "from": PHONE,
                "id": id,
                "timestamp": "1750000000",
                "type": "text",
                "text": { "body": body }
            })
        })
        .collect();
    serde_json::json!({
        "object": "whatsapp_business_account",
        "entry": [{
            "id": "1",
            "changes": [{
                "field": "messages",
                "value": {
                    "messaging_product": "whatsapp",
                    "messages": messages
                }
            }]
        }]
    })
    .to_string()
}

fn sign(body: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(APP_SECRET.as_bytes()).unwrap();
    mac.update(body.as_bytes());
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

fn webhook_post(body: String, signature: Option<String>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/webhook/whatsapp")
        .header("Content-Type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header("X-Hub-Signature-256", signature);
    }
    builder.body(Body::from(body)).unwrap()
}

async fn wait_for_sent(sent: &Arc<Mutex<Vec<(String, String)>>>, count: usize) {
    for _ in 0..100 {
        if sent.lock().unwrap().len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {count} outbound messages");
}

// ── Health ──

#[tokio::test]
async fn test_health() {
    let t = test_app("", vec![]);
    let response = app(t.state)
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");
}

// ── Dev endpoint: full scheduling flow ──

#[tokio::test]
async fn test_dev_flow_schedules_single_order() {
    let t = test_app("", vec![open_order(1)]);

    let reply = dev_message(&t.state, "oi").await;
    assert!(reply.contains("CPF"), "{reply}");

    let reply = dev_message(&t.state, "meu cpf é 529.982.247-25").await;
    assert!(reply.contains("Olá, Maria!"), "{reply}");
    assert!(reply.contains("Para a OS 1, o horário sugerido é"), "{reply}");

    let reply = dev_message(&t.state, "sim").await;
    assert!(reply.contains("Pronto! A visita da OS 1 está agendada"), "{reply}");

    let commits = t.erp.commits.lock().unwrap().clone();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].order_id(), 1);
    assert_eq!(commits[0].sector_id(), 1);

    // negotiation reset, identity kept
    let response = app(t.state.clone())
        .oneshot(admin_request("GET", &format!("/api/admin/sessions/{PHONE}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let session = body_json(response).await;
    assert_eq!(session["customer"]["client_id"], 7);
    assert!(session["chosen_order"].is_null());
    assert_eq!(session["awaiting_confirmation"], false);
}

#[tokio::test]
async fn test_dev_unknown_cpf() {
    let t = test_app("", vec![open_order(1)]);
    let reply = dev_message(&t.state, "111.444.777-35").await;
    assert!(reply.contains("Não encontrei nenhum cadastro"), "{reply}");
    assert!(t.erp.commits.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_dev_message_requires_fields() {
    let t = test_app("", vec![]);
    let response = app(t.state)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/dev/message")
                .header("Content-Type", "application/json")
                .body(Body::from(r#"{"from_phone": "", "message": "oi"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["success"], false);
}

// ── Webhook verification ──

#[tokio::test]
async fn test_webhook_verification_returns_challenge() {
    let t = test_app("", vec![]);
    let response = app(t.state)
        .oneshot(
            Request::get(
                "/webhook/whatsapp?hub.mode=subscribe&hub.verify_token=verify-me&hub.challenge=12345",
            )
            .body(Body::empty())
            .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "12345");
}

#[tokio::test]
async fn test_webhook_verification_wrong_token() {
    let t = test_app("", vec![]);
    let response = app(t.state)
        .oneshot(
            Request::get(
                "/webhook/whatsapp?hub.mode=subscribe&hub.verify_token=nope&hub.challenge=12345",
            )
            .body(Body::empty())
            .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

// ── Webhook delivery ──

#[tokio::test]
async fn test_webhook_rejects_bad_signature() {
    let t = test_app(APP_SECRET, vec![]);
    let body = text_delivery("wamid.1", "oi");

    let response = app(t.state.clone())
        .oneshot(webhook_post(body.clone(), Some("sha256=00ff".to_string())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app(t.state)
        .oneshot(webhook_post(body, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(t.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_webhook_replies_and_drops_duplicates() {
    let t = test_app(APP_SECRET, vec![]);
    let body = text_delivery("wamid.1", "oi");

    for _ in 0..2 {
        let response = app(t.state.clone())
            .oneshot(webhook_post(body.clone(), Some(sign(&body))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    wait_for_sent(&t.sent, 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let sent = t.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, PHONE);
    assert!(sent[0].1.contains("CPF"), "{}", sent[0].1);
}

#[tokio::test]
async fn test_webhook_batch_from_one_phone_runs_in_order() {
    let t = test_app(APP_SECRET, vec![open_order(1)]);
    let body = text_batch(&[("wamid.10", "529.982.247-25"), ("wamid.11", "sim")]);

    let response = app(t.state.clone())
        .oneshot(webhook_post(body.clone(), Some(sign(&body))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    wait_for_sent(&t.sent, 2).await;
    let sent = t.sent.lock().unwrap().clone();
    assert!(sent[0].1.contains("Para a OS 1, o horário sugerido é"), "{}", sent[0].1);
    // the confirmation sees the proposal made by the first message
    assert!(sent[1].1.starts_with("Pronto! A visita da OS 1"), "{}", sent[1].1);
    assert_eq!(t.erp.commits.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_webhook_malformed_body() {
    let t = test_app("", vec![]);
    let response = app(t.state)
        .oneshot(webhook_post("not json".to_string(), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ── Admin ──

#[tokio::test]
async fn test_admin_requires_token() {
    let t = test_app("", vec![]);
    let response = app(t.state.clone())
        .oneshot(Request::get("/api/admin/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app(t.state)
        .oneshot(
            Request::get("/api/admin/status")
                .header("Authorization", "Bearer wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_status() {
    let t = test_app("", vec![open_order(1)]);
    dev_message(&t.state, "oi").await;

    let response = app(t.state)
        .oneshot(admin_request("GET", "/api/admin/status"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let status = body_json(response).await;
    assert_eq!(status["active_sessions"], 1);
    assert_eq!(status["sectors"], 1);
    assert_eq!(status["session_backend"], "memory");
    assert_eq!(status["whatsapp_enabled"], false);
}

#[tokio::test]
async fn test_admin_session_reset() {
    let t = test_app("", vec![open_order(1)]);
    dev_message(&t.state, "529.982.247-25").await;

    let uri = format!("/api/admin/sessions/{PHONE}/reset");
    let response = app(t.state.clone())
        .oneshot(admin_request("POST", &uri))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["removed"], true);

    let response = app(t.state.clone())
        .oneshot(admin_request("GET", &format!("/api/admin/sessions/{PHONE}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // a fresh session starts over
    let reply = dev_message(&t.state, "oi").await;
    assert!(reply.contains("CPF"), "{reply}");
}

#[tokio::test]
async fn test_admin_directory_reload_reads_database() {
    let t = test_app("", vec![]);
    {
        let conn = t.state.db.lock().unwrap();
        db::queries::upsert_sector(&conn, &Sector::new(1, [10])).unwrap();
        db::queries::upsert_sector(&conn, &Sector::new(2, [20, 21])).unwrap();
    }

    let response = app(t.state.clone())
        .oneshot(admin_request("POST", "/api/admin/directory/reload"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["sectors"], 2);
    assert_eq!(t.state.directory.technicians_for(2), BTreeSet::from([20, 21]));
}
