use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use axum::routing::{get, post};
use axum::Router;
use chrono::Local;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use agendabot::config::{AppConfig, SessionBackendKind};
use agendabot::db::{self, queries};
use agendabot::handlers;
use agendabot::services::ai::groq::GroqProvider;
use agendabot::services::ai::nlu::LlmNlu;
use agendabot::services::ai::ollama::OllamaProvider;
use agendabot::services::ai::LlmProvider;
use agendabot::services::calendar::BusinessCalendar;
use agendabot::services::conversation::ConversationEngine;
use agendabot::services::directory::SectorDirectory;
use agendabot::services::erp::http::HttpErpClient;
use agendabot::services::messaging::whatsapp::WhatsAppProvider;
use agendabot::services::messaging::{LogOnlyProvider, MessagingProvider};
use agendabot::services::policy::PolicyResolver;
use agendabot::services::scheduling::SchedulingService;
use agendabot::services::session_store::{MemoryBackend, SessionBackend, SessionStore, SqliteBackend};
use agendabot::state::{AppState, RecentMessageIds};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();
    let timeout = config.http_timeout();

    let db = db::init_shared(&config.database_url)?;

    let (directory, policies) = {
        let conn = db
            .lock()
            .map_err(|_| anyhow::anyhow!("database mutex poisoned"))?;
        let directory = SectorDirectory::new(queries::load_sectors(&conn)?);
        let policies = PolicyResolver::with_overrides(queries::load_policies(&conn)?);
        (Arc::new(directory), policies)
    };
    tracing::info!(
        sectors = directory.len(),
        policies = policies.count(),
        "scheduling tables loaded"
    );

    let calendar = if config.holidays.trim().is_empty() {
        BusinessCalendar::default()
    } else {
        BusinessCalendar::from_list(&config.holidays).context("invalid HOLIDAYS")?
    };

    let erp = HttpErpClient::new(config.erp_base_url.clone(), config.erp_token.clone(), timeout)?;
    tracing::info!("using ERP at {}", config.erp_base_url);

    let llm: Box<dyn LlmProvider> = match config.llm_provider.as_str() {
        "groq" => {
            anyhow::ensure!(
                !config.groq_api_key.is_empty(),
                "GROQ_API_KEY must be set when LLM_PROVIDER=groq"
            );
            tracing::info!("using Groq LLM provider (model: {})", config.groq_model);
            Box::new(GroqProvider::new(
                config.groq_api_key.clone(),
                config.groq_model.clone(),
                timeout,
            )?)
        }
        _ => {
            tracing::info!("using Ollama LLM provider (url: {})", config.ollama_url);
            Box::new(OllamaProvider::new(
                config.ollama_url.clone(),
                config.ollama_model.clone(),
                timeout,
            )?)
        }
    };

    let backend: Box<dyn SessionBackend> = match config.session_backend {
        SessionBackendKind::Sqlite => Box::new(SqliteBackend::new(db.clone())),
        SessionBackendKind::Memory => Box::new(MemoryBackend::new()),
    };
    let sessions = Arc::new(SessionStore::new(backend));

    let scheduling = Arc::new(SchedulingService::new(
        calendar,
        policies,
        directory.clone(),
        Arc::new(erp),
    ));
    let engine = ConversationEngine::new(
        sessions.clone(),
        scheduling,
        Arc::new(LlmNlu::new(llm)),
        config.max_listed_slots,
    );

    let messaging: Box<dyn MessagingProvider> = if config.whatsapp_enabled() {
        tracing::info!("sending replies through the WhatsApp Cloud API");
        Box::new(WhatsAppProvider::new(
            config.whatsapp_access_token.clone(),
            config.whatsapp_phone_number_id.clone(),
            timeout,
        )?)
    } else {
        tracing::warn!("WhatsApp credentials missing, replies are only logged");
        Box::new(LogOnlyProvider)
    };

    let state = Arc::new(AppState {
        db: db.clone(),
        config: config.clone(),
        engine,
        directory: directory.clone(),
        messaging,
        recent_messages: Mutex::new(RecentMessageIds::default()),
        started_at: Local::now().naive_local(),
    });

    spawn_directory_refresh(db, directory, config.directory_refresh_secs);
    spawn_session_purge(sessions, config.session_ttl_minutes);

    let app = Router::new()
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
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn spawn_directory_refresh(db: db::SharedConnection, directory: Arc<SectorDirectory>, secs: u64) {
    if secs == 0 {
        return;
    }
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(secs));
        // the first tick fires immediately and the table was just loaded
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let result = match db.lock() {
                Ok(conn) => directory.reload(&conn),
                Err(_) => Err(anyhow::anyhow!("database mutex poisoned")),
            };
            match result {
                Ok(n) => tracing::debug!(sectors = n, "sector directory refreshed"),
                Err(e) => tracing::error!(error = %e, "sector directory refresh failed"),
            }
        }
    });
}

fn spawn_session_purge(sessions: Arc<SessionStore>, ttl_minutes: i64) {
    if ttl_minutes <= 0 {
        return;
    }
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            let cutoff = Local::now().naive_local() - chrono::Duration::minutes(ttl_minutes);
            match sessions.purge_idle(cutoff) {
                Ok(0) => {}
                Ok(n) => tracing::info!(purged = n, "idle sessions expired"),
                Err(e) => tracing::error!(error = %e, "session purge failed"),
            }
        }
    });
}
