use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionBackendKind {
    Memory,
    Sqlite,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub admin_token: String,
    pub llm_provider: String,
    pub ollama_url: String,
    pub ollama_model: String,
    pub groq_api_key: String,
    pub groq_model: String,
    pub erp_base_url: String,
    pub erp_token: String,
    pub http_timeout_secs: u64,
    pub whatsapp_access_token: String,
    pub whatsapp_phone_number_id: String,
    pub whatsapp_verify_token: String,
    /// Empty disables `X-Hub-Signature-256` validation (dev mode).
    pub whatsapp_app_secret: String,
    pub session_backend: SessionBackendKind,
    pub session_ttl_minutes: i64,
    /// Comma-separated `MM-DD` list; empty means the national holidays.
    pub holidays: String,
    pub directory_refresh_secs: u64,
    pub max_listed_slots: usize,
}

fn parsed<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

impl AppConfig {
    pub fn from_env() -> Self {
        let session_backend = match env::var("SESSION_BACKEND").as_deref() {
            Ok("sqlite") => SessionBackendKind::Sqlite,
            _ => SessionBackendKind::Memory,
        };
        Self {
            port: parsed("PORT", 3000),
            database_url: string("DATABASE_URL", "agendabot.db"),
            admin_token: string("ADMIN_TOKEN", "changeme"),
            llm_provider: string("LLM_PROVIDER", "ollama"),
            ollama_url: string("OLLAMA_URL", "http://localhost:11434"),
            ollama_model: string("OLLAMA_MODEL", "llama3.2"),
            groq_api_key: env::var("GROQ_API_KEY").unwrap_or_default(),
            groq_model: string("GROQ_MODEL", "llama-3.1-8b-instant"),
            erp_base_url: string("ERP_BASE_URL", "http://localhost:8080/api"),
            erp_token: env::var("ERP_TOKEN").unwrap_or_default(),
            http_timeout_secs: parsed("HTTP_TIMEOUT_SECS", 15),
            whatsapp_access_token: env::var("WHATSAPP_ACCESS_TOKEN").unwrap_or_default(),
            whatsapp_phone_number_id: env::var("WHATSAPP_PHONE_NUMBER_ID").unwrap_or_default(),
            whatsapp_verify_token: string("WHATSAPP_VERIFY_TOKEN", "agendabot"),
            whatsapp_app_secret: env::var("WHATSAPP_APP_SECRET").unwrap_or_default(),
            session_backend,
            session_ttl_minutes: parsed("SESSION_TTL_MINUTES", 120),
            holidays: env::var("HOLIDAYS").unwrap_or_default(),
            directory_refresh_secs: parsed("DIRECTORY_REFRESH_SECS", 300),
            max_listed_slots: parsed("MAX_LISTED_SLOTS", 5),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs.max(1))
    }

    pub fn whatsapp_enabled(&self) -> bool {
        !self.whatsapp_access_token.is_empty() && !self.whatsapp_phone_number_id.is_empty()
    }
}
