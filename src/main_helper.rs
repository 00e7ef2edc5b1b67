use crate::backends::BackendRegistry;
use crate::constants::*;
use crate::db::DbPool;
use crate::intent::KeywordTables;
use crate::types::*;
use clap::Parser;
use std::sync::Arc;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[arg(long, default_value_t = 8080)]
    pub port: u16,
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
    #[arg(long, default_value = "chatgate.db")]
    pub database: String,
    /// Upper bound for any single backend call; callers may ask for less.
    #[arg(long, default_value_t = 120)]
    pub request_timeout_secs: u64,
    #[arg(long, default_value_t = 10)]
    pub connect_timeout_secs: u64,
    #[arg(long, default_value_t = 25 * 1024 * 1024)]
    pub max_body_size: usize,
    #[arg(long, default_value_t = 5)]
    pub circuit_breaker_threshold: u32,
    #[arg(long, default_value_t = 30)]
    pub circuit_recovery_secs: u64,
    #[arg(long, default_value = DEFAULT_CHAT_URL)]
    pub chat_url: String,
    #[arg(long, default_value = DEFAULT_CHAT_MODEL)]
    pub chat_model: String,
    #[arg(long, default_value = DEFAULT_CHAT_URL)]
    pub reasoning_url: String,
    #[arg(long, default_value = DEFAULT_REASONING_MODEL)]
    pub reasoning_model: String,
    #[arg(long, default_value = DEFAULT_IMAGE_URL)]
    pub image_url: String,
    #[arg(long, default_value = DEFAULT_IMAGE_MODEL)]
    pub image_model: String,
    #[arg(long, default_value = DEFAULT_TITLE_MODEL)]
    pub title_model: String,
    #[arg(long, default_value_t = 15)]
    pub title_timeout_secs: u64,
    #[arg(long, default_value_t = 3)]
    pub min_turns_for_title: usize,
    /// Target size of each content delta when a backend answers in one piece.
    #[arg(long, default_value_t = 48)]
    pub delta_chunk_chars: usize,
    /// JSON file overriding the built-in keyword tables.
    #[arg(long)]
    pub keywords: Option<String>,
    #[arg(long)]
    pub cors_origin: Option<String>,
    #[arg(long, default_value = "logs")]
    pub log_dir: String,
    #[arg(long, default_value_t = false)]
    pub json_logs: bool,
}

/// Upstream credentials. Only the default chat key is mandatory.
#[derive(Clone)]
pub struct BackendKeys {
    pub chat: String,
    pub reasoning: Option<String>,
    pub image: Option<String>,
}

impl std::fmt::Debug for BackendKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendKeys")
            .field("chat", &"[REDACTED]")
            .field("reasoning", &self.reasoning.as_ref().map(|_| "[REDACTED]"))
            .field("image", &self.image.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => None,
    }
}

impl BackendKeys {
    pub fn from_env() -> Result<Self> {
        let chat = match non_empty_env(ENV_CHAT_API_KEY) {
            Some(k) => k,
            None => {
                return Err(GatewayError::Configuration(format!(
                    "{} environment variable is missing or empty",
                    ENV_CHAT_API_KEY
                ))
                .into())
            }
        };
        Ok(Self {
            chat,
            reasoning: non_empty_env(ENV_REASONING_API_KEY),
            image: non_empty_env(ENV_IMAGE_API_KEY),
        })
    }
}

pub fn creator_passphrase_from_env() -> Option<String> {
    non_empty_env(ENV_CREATOR_PASSPHRASE)
}

#[derive(Clone)]
pub struct AppState {
    pub client: reqwest::Client,
    pub db: DbPool,
    pub args: Arc<Args>,
    pub backends: Arc<BackendRegistry>,
    pub keywords: Arc<KeywordTables>,
    pub creator_passphrase: Option<String>,
    pub health: Arc<UpstreamHealth>,
}

impl AppState {
    pub fn new(
        args: Args,
        db: DbPool,
        keys: BackendKeys,
        keywords: KeywordTables,
        creator_passphrase: Option<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(args.connect_timeout_secs))
            .pool_idle_timeout(std::time::Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .tcp_keepalive(Some(std::time::Duration::from_secs(60)))
            .build()?;

        let backends = BackendRegistry::from_args(&args, keys);

        Ok(Self {
            client,
            db,
            backends: Arc::new(backends),
            keywords: Arc::new(keywords),
            creator_passphrase,
            health: Arc::new(UpstreamHealth::default()),
            args: Arc::new(args),
        })
    }
}
