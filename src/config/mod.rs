use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// SQLite connection string for the job store
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Directory for job-scoped uploaded images
    #[serde(default = "default_storage_path")]
    pub storage_path: String,

    /// Maximum accepted upload size in bytes
    #[serde(default = "default_max_image_size")]
    pub max_image_size: usize,

    /// OpenAI-compatible chat completions base URL
    pub llm_base_url: String,

    /// API key for the model endpoint
    pub llm_api_key: String,

    /// Text model used for strategy generation and scoring
    #[serde(default = "default_llm_model")]
    pub llm_model: String,

    /// Vision-capable model used for classification and artifact detection
    #[serde(default = "default_llm_model")]
    pub llm_vision_model: String,

    /// Per-call timeout for model requests, in seconds
    #[serde(default = "default_llm_timeout_secs")]
    pub llm_timeout_secs: u64,

    /// Upper bound on concurrently running pipeline jobs
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Cap on fake signals kept per job
    #[serde(default = "default_detector_max_signals")]
    pub detector_max_signals: usize,

    /// Optional path to a scene-rules JSON file overriding the embedded
    /// knowledge base
    #[serde(default)]
    pub knowledge_path: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_database_url() -> String {
    "sqlite://data/realism.db".to_string()
}

fn default_storage_path() -> String {
    "./storage".to_string()
}

fn default_max_image_size() -> usize {
    10 * 1024 * 1024
}

fn default_llm_model() -> String {
    "qwen-turbo".to_string()
}

fn default_llm_timeout_secs() -> u64 {
    30
}

fn default_max_concurrent_jobs() -> usize {
    4
}

fn default_detector_max_signals() -> usize {
    10
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }
}
