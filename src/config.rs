use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_LISTINGS_TABLE: &str = "BUY_data_integrated";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LlmBackend {
    Ollama,
    Disabled,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GeocoderBackend {
    Nominatim,
    Disabled,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub ollama_base_url: String,
    pub answer_model: String,
    pub timeout: Duration,
    pub max_concurrency: usize,
}

#[derive(Clone, Debug)]
pub struct GeocoderConfig {
    pub backend: GeocoderBackend,
    pub nominatim_base_url: String,
    pub timeout: Duration,
}

/// Tunables of the search and response pipeline.
#[derive(Clone, Debug)]
pub struct SearchPolicy {
    pub listings_table: String,
    pub sample_limit: i64,
    pub table_limit: usize,
    pub refinement_threshold: i64,
    pub example_limit: usize,
    pub default_radius_m: f64,
    pub session_capacity: usize,
}

impl Default for SearchPolicy {
    fn default() -> Self {
        Self {
            listings_table: DEFAULT_LISTINGS_TABLE.to_string(),
            sample_limit: 200,
            table_limit: 50,
            refinement_threshold: 100,
            example_limit: 5,
            default_radius_m: 500.0,
            session_capacity: 5,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: String,
    pub db_path: PathBuf,
    pub llm: LlmConfig,
    pub geocoder: GeocoderConfig,
    pub policy: SearchPolicy,
}

impl AppConfig {
    /// Reads `.env` (when present) and then the process environment.
    pub fn from_env() -> Self {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::info!(path = %path.display(), "loaded environment file");
        }

        let defaults = SearchPolicy::default();
        let listings_table = env::var("SUMAI_LISTINGS_TABLE")
            .ok()
            .and_then(|name| {
                if is_sql_identifier(&name) {
                    Some(name)
                } else {
                    tracing::warn!(table = %name, "ignoring invalid listings table name");
                    None
                }
            })
            .unwrap_or(defaults.listings_table);

        Self {
            bind_addr: env::var("SUMAI_BIND").unwrap_or_else(|_| "127.0.0.1:8000".to_string()),
            db_path: env::var("SUMAI_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data/properties_with_geocoding.db")),
            llm: LlmConfig {
                backend: match env::var("LLM_BACKEND")
                    .unwrap_or_default()
                    .to_ascii_lowercase()
                    .as_str()
                {
                    "none" | "disabled" | "off" => LlmBackend::Disabled,
                    _ => LlmBackend::Ollama,
                },
                ollama_base_url: env::var("OLLAMA_BASE_URL")
                    .unwrap_or_else(|_| "http://127.0.0.1:11434".to_string()),
                answer_model: env::var("ANSWER_MODEL")
                    .unwrap_or_else(|_| "qwen2.5:14b-instruct".to_string()),
                timeout: Duration::from_secs(parse_env("LLM_TIMEOUT_SECS", 20)),
                max_concurrency: parse_env("LLM_MAX_CONCURRENCY", 2),
            },
            geocoder: GeocoderConfig {
                backend: match env::var("GEOCODER_BACKEND")
                    .unwrap_or_default()
                    .to_ascii_lowercase()
                    .as_str()
                {
                    "nominatim" => GeocoderBackend::Nominatim,
                    _ => GeocoderBackend::Disabled,
                },
                nominatim_base_url: env::var("NOMINATIM_BASE_URL")
                    .unwrap_or_else(|_| "https://nominatim.openstreetmap.org".to_string()),
                timeout: Duration::from_secs(parse_env("GEOCODER_TIMEOUT_SECS", 10)),
            },
            policy: SearchPolicy {
                listings_table,
                sample_limit: parse_env("SUMAI_SAMPLE_LIMIT", defaults.sample_limit),
                table_limit: parse_env("SUMAI_TABLE_LIMIT", defaults.table_limit),
                refinement_threshold: parse_env(
                    "SUMAI_REFINEMENT_THRESHOLD",
                    defaults.refinement_threshold,
                ),
                example_limit: parse_env("SUMAI_EXAMPLE_LIMIT", defaults.example_limit),
                default_radius_m: parse_env("SUMAI_DEFAULT_RADIUS_M", defaults.default_radius_m),
                session_capacity: parse_env("SUMAI_SESSION_CAPACITY", defaults.session_capacity),
            },
        }
    }

    pub fn sqlite_dsn(&self) -> String {
        format!("sqlite://{}", self.db_path.display())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Table names cannot be bound as parameters, so only plain identifiers are accepted.
pub fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
