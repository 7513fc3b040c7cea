//! Runtime settings and the static constants shared by the server, the form
//! utilities and the CLI.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8501;
pub const DEFAULT_DATASET_PATH: &str = "data/student-por.csv";
pub const DEFAULT_MODEL_PATH: &str = "models/risk_model.json";
pub const DEFAULT_DATABASE_URL: &str = "sqlite://mentor.db";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub const CACHE_TTL: Duration = Duration::from_secs(5 * 60);
pub const CACHE_MAX_ENTRIES: usize = 50;
pub const DRAFT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

pub const RATE_LIMIT_DEFAULT_PER_MINUTE: u32 = 60;
pub const RATE_LIMIT_PREDICT_PER_MINUTE: u32 = 30;
pub const RATE_LIMIT_PDF_PER_MINUTE: u32 = 5;

/// Header carrying the signed-in user's email.
pub const USER_HEADER: &str = "X-User-Email";

pub mod limits {
    pub const AGE_MIN: i64 = 15;
    pub const AGE_MAX: i64 = 30;
    pub const GRADE_MIN: i64 = 0;
    pub const GRADE_MAX: i64 = 20;
    pub const MAX_FIELD_LENGTH: usize = 100;
    pub const MAX_CUSTOM_PROMPT_LENGTH: usize = 500;
    pub const MAX_PROFILE_NAME_LENGTH: usize = 100;
}

pub mod endpoints {
    pub const PREDICT: &str = "/api/predict";
    pub const EXPLAIN: &str = "/api/explain";
    pub const ADVICE: &str = "/api/advice";
    pub const GENERATE_PDF: &str = "/generate-pdf";
    pub const HEALTH: &str = "/healthz";
    pub const STATUS: &str = "/status";
    pub const GRADE_AVERAGES: &str = "/get-grade-averages";
    pub const MODEL_INFO: &str = "/api/model/info";
    pub const PROFILES: &str = "/api/profiles";
    pub const ASSESSMENTS: &str = "/api/assessments";
    pub const FIREBASE_CONFIG: &str = "/firebase-config";
}

pub mod messages {
    pub const MODEL_NOT_LOADED: &str =
        "Machine Learning Models are not loaded. Please check server logs for pathing errors.";
    pub const ADVICE_UNAVAILABLE: &str =
        "Mentoring advice generation is currently unavailable (Gemini model not initialized).";
    pub const NO_ADVICE: &str = "No advice generated.";
    pub const NO_STUDENT_DATA: &str = "No student data provided.";
    pub const RATE_LIMITED: &str = "Too many requests. Please wait a minute and try again.";
    pub const NETWORK_ERROR: &str = "Unable to reach the server. Check your connection and try again.";
    pub const SERVER_ERROR: &str = "The server ran into a problem. Please try again shortly.";
    pub const SAVED: &str = "Profile saved.";
    pub const DRAFT_RESTORED: &str = "Restored your unsaved answers.";
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} must be a valid number, got {value:?}")]
    InvalidNumber { key: &'static str, value: String },
}

/// Client-side Firebase settings, served verbatim to the browser.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FirebaseConfig {
    pub api_key: Option<String>,
    pub auth_domain: Option<String>,
    pub project_id: Option<String>,
    pub storage_bucket: Option<String>,
    pub messaging_sender_id: Option<String>,
    pub app_id: Option<String>,
    pub measurement_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GeminiSettings {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub dataset_path: PathBuf,
    pub model_path: PathBuf,
    pub database_url: String,
    pub gemini: Option<GeminiSettings>,
    pub cache_ttl: Duration,
    pub cache_max_entries: usize,
    pub rate_limit_per_minute: u32,
    pub firebase: FirebaseConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            dataset_path: PathBuf::from(DEFAULT_DATASET_PATH),
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            database_url: DEFAULT_DATABASE_URL.to_string(),
            gemini: None,
            cache_ttl: CACHE_TTL,
            cache_max_entries: CACHE_MAX_ENTRIES,
            rate_limit_per_minute: RATE_LIMIT_DEFAULT_PER_MINUTE,
            firebase: FirebaseConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let gemini = match get("GEMINI_API_KEY") {
            Some(api_key) => Some(GeminiSettings {
                api_key,
                model: get("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
                base_url: get("GEMINI_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string()),
            }),
            None => {
                tracing::warn!("GEMINI_API_KEY not set; mentoring advice will be unavailable");
                None
            }
        };

        let firebase = FirebaseConfig {
            api_key: get("FIREBASE_API_KEY"),
            auth_domain: get("FIREBASE_AUTH_DOMAIN"),
            project_id: get("FIREBASE_PROJECT_ID"),
            storage_bucket: get("FIREBASE_STORAGE_BUCKET"),
            messaging_sender_id: get("FIREBASE_MESSAGING_SENDER_ID"),
            app_id: get("FIREBASE_APP_ID"),
            measurement_id: get("FIREBASE_MEASUREMENT_ID"),
        };
        if firebase.api_key.is_none() || firebase.project_id.is_none() {
            tracing::warn!("Firebase client configuration is incomplete");
        }

        Ok(Self {
            host: get("MENTOR_HOST").unwrap_or(defaults.host),
            port: parse_number("MENTOR_PORT", get("MENTOR_PORT"), defaults.port)?,
            dataset_path: get("DATASET_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.dataset_path),
            model_path: get("MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_path),
            database_url: get("DATABASE_URL").unwrap_or(defaults.database_url),
            gemini,
            cache_ttl: Duration::from_secs(parse_number(
                "CACHE_TTL_SECS",
                get("CACHE_TTL_SECS"),
                defaults.cache_ttl.as_secs(),
            )?),
            cache_max_entries: parse_number(
                "CACHE_MAX_ENTRIES",
                get("CACHE_MAX_ENTRIES"),
                defaults.cache_max_entries,
            )?,
            rate_limit_per_minute: parse_number(
                "RATE_LIMIT_PER_MINUTE",
                get("RATE_LIMIT_PER_MINUTE"),
                defaults.rate_limit_per_minute,
            )?,
            firebase,
        })
    }
}

fn parse_number<T: std::str::FromStr>(
    key: &'static str,
    raw: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { key, value }),
    }
}
