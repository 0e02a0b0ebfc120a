use std::env;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Supabase,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_service_key: String,
    pub store_backend: StoreBackend,
    pub ollama_base_url: String,
    pub ollama_model: String,
    pub advisor_timeout_ms: u64,
    pub booking_max_attempts: u32,
    pub booking_retry_backoff_ms: u64,
    pub slot_granularity_minutes: Option<i64>,
    pub max_suggestions: usize,
    pub server_port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            supabase_service_key: String::new(),
            store_backend: StoreBackend::Memory,
            ollama_base_url: String::new(),
            ollama_model: "qwen2.5:1.5b".to_string(),
            advisor_timeout_ms: 5_000,
            booking_max_attempts: 3,
            booking_retry_backoff_ms: 25,
            slot_granularity_minutes: None,
            max_suggestions: 0,
            server_port: 3000,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let supabase_url = env::var("SUPABASE_URL").unwrap_or_else(|_| {
            warn!("SUPABASE_URL not set, using empty value");
            String::new()
        });
        let supabase_service_key = env::var("SUPABASE_SERVICE_KEY").unwrap_or_else(|_| {
            warn!("SUPABASE_SERVICE_KEY not set, using empty value");
            String::new()
        });

        let store_backend = match env::var("SCHEDULER_STORE").ok().as_deref() {
            Some("supabase") => StoreBackend::Supabase,
            Some("memory") => StoreBackend::Memory,
            Some(other) => {
                warn!("Unknown SCHEDULER_STORE '{}', falling back to in-memory store", other);
                StoreBackend::Memory
            }
            None if !supabase_url.is_empty() && !supabase_service_key.is_empty() => {
                StoreBackend::Supabase
            }
            None => StoreBackend::Memory,
        };

        let ollama_base_url = env::var("OLLAMA_BASE_URL").unwrap_or_else(|_| {
            warn!("OLLAMA_BASE_URL not set, advisory ranking disabled");
            String::new()
        });

        let config = Self {
            supabase_url,
            supabase_service_key,
            store_backend,
            ollama_base_url,
            ollama_model: env::var("OLLAMA_MODEL").unwrap_or(defaults.ollama_model),
            advisor_timeout_ms: parse_var("ADVISOR_TIMEOUT_MS", defaults.advisor_timeout_ms),
            booking_max_attempts: parse_var("BOOKING_MAX_ATTEMPTS", defaults.booking_max_attempts).max(1),
            booking_retry_backoff_ms: parse_var("BOOKING_RETRY_BACKOFF_MS", defaults.booking_retry_backoff_ms),
            slot_granularity_minutes: env::var("SLOT_GRANULARITY_MINUTES")
                .ok()
                .and_then(|raw| raw.parse::<i64>().ok())
                .filter(|minutes| *minutes > 0),
            max_suggestions: parse_var("MAX_SUGGESTIONS", defaults.max_suggestions),
            server_port: parse_var("SERVER_PORT", defaults.server_port),
        };

        if config.store_backend == StoreBackend::Supabase && !config.is_supabase_configured() {
            warn!("Supabase store selected but SUPABASE_URL / SUPABASE_SERVICE_KEY are missing");
        }

        config
    }

    pub fn is_supabase_configured(&self) -> bool {
        !self.supabase_url.is_empty() && !self.supabase_service_key.is_empty()
    }

    pub fn is_advisor_configured(&self) -> bool {
        !self.ollama_base_url.is_empty() && !self.ollama_model.is_empty()
    }
}

fn parse_var<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} has an invalid value '{}', using default", key, raw);
            default
        }),
        Err(_) => default,
    }
}
