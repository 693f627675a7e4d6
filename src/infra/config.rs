// src/infra/config.rs — Configuration loading (TOML + environment overrides)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::infra::errors::DeskError;
use crate::infra::paths;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub transcription: TranscriptionConfig,

    #[serde(default)]
    pub analysis: AnalysisConfig,

    #[serde(default)]
    pub jobs: JobsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8000,
            cors_origins: vec![
                "http://localhost:3000".into(),
                "http://localhost:8000".into(),
            ],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Defaults to `<data dir>/counseldesk.db` when unset.
    pub path: Option<PathBuf>,
}

impl DatabaseConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(paths::db_path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub access_token_minutes: i64,
    pub refresh_token_days: i64,
    pub reset_token_minutes: i64,
    pub password_iterations: u32,
    /// Return password-reset tokens in the API response (no mailer is wired up).
    pub expose_reset_token: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            access_token_minutes: 30,
            refresh_token_days: 30,
            reset_token_minutes: 60,
            password_iterations: 100_000,
            expose_reset_token: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible stores (path-style addressing).
    pub endpoint: Option<String>,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub presign_expiry_secs: u64,
    pub max_upload_bytes: u64,
    pub allowed_content_types: Vec<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: "counseldesk-recordings".into(),
            region: "ap-northeast-1".into(),
            endpoint: None,
            access_key_id: String::new(),
            secret_access_key: String::new(),
            presign_expiry_secs: 3600,
            max_upload_bytes: 100 * 1024 * 1024,
            allowed_content_types: vec![
                "audio/webm".into(),
                "audio/mp4".into(),
                "audio/mpeg".into(),
                "audio/wav".into(),
                "audio/ogg".into(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub language: String,
    pub temperature: f32,
    pub max_upload_bytes: u64,
    /// Path to an ffmpeg binary. Without it, oversize audio fails the task.
    pub ffmpeg_path: Option<PathBuf>,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".into(),
            model: "whisper-1".into(),
            language: "ja".into(),
            temperature: 0.0,
            max_upload_bytes: 25 * 1024 * 1024,
            ffmpeg_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub max_input_chars: usize,
    pub cost_per_1k_tokens: f64,
    /// Directory of `*.j2` files overriding the built-in prompt templates.
    pub prompt_dir: Option<PathBuf>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".into(),
            model: "gpt-4-turbo-preview".into(),
            max_tokens: 4000,
            temperature: 0.1,
            max_input_chars: 8000,
            cost_per_1k_tokens: 0.045,
            prompt_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    pub max_concurrent: usize,
    /// User-initiated retries allowed per task.
    pub max_user_retries: u32,
    #[serde(default)]
    pub backoff: BackoffConfig,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            max_user_retries: 3,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Backoff for transient external-API errors within a single job attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 2_000,
            max_delay_ms: 30_000,
        }
    }
}

impl Config {
    /// Load config from the default location, falling back to defaults,
    /// then apply environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let path = paths::config_path();
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Environment values win over the file. `lookup` is injectable for tests.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("COUNSELDESK_JWT_SECRET") {
            self.auth.jwt_secret = v;
        }
        if let Some(v) = get("OPENAI_API_KEY") {
            if self.transcription.api_key.is_empty() {
                self.transcription.api_key = v.clone();
            }
            if self.analysis.api_key.is_empty() {
                self.analysis.api_key = v;
            }
        }
        if let Some(v) = get("AWS_ACCESS_KEY_ID") {
            self.storage.access_key_id = v;
        }
        if let Some(v) = get("AWS_SECRET_ACCESS_KEY") {
            self.storage.secret_access_key = v;
        }
        if let Some(v) = get("AWS_REGION") {
            self.storage.region = v;
        }
        if let Some(v) = get("S3_BUCKET") {
            self.storage.bucket = v;
        }
        if let Some(v) = get("COUNSELDESK_DB") {
            self.database.path = Some(PathBuf::from(v));
        }
    }

    /// Checks required before the API server starts.
    pub fn validate_for_serve(&self) -> Result<(), DeskError> {
        if self.auth.jwt_secret.len() < 16 {
            return Err(DeskError::Config(
                "auth.jwt_secret must be set (>= 16 chars) or COUNSELDESK_JWT_SECRET exported"
                    .into(),
            ));
        }
        if self.jobs.max_concurrent == 0 {
            return Err(DeskError::Config("jobs.max_concurrent must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_reasonable() {
        let c = Config::default();
        assert_eq!(c.server.port, 8000);
        assert_eq!(c.auth.access_token_minutes, 30);
        assert_eq!(c.auth.refresh_token_days, 30);
        assert_eq!(c.storage.presign_expiry_secs, 3600);
        assert_eq!(c.storage.max_upload_bytes, 104_857_600);
        assert_eq!(c.transcription.max_upload_bytes, 26_214_400);
        assert_eq!(c.transcription.language, "ja");
        assert_eq!(c.analysis.model, "gpt-4-turbo-preview");
        assert_eq!(c.analysis.max_tokens, 4000);
        assert_eq!(c.jobs.max_user_retries, 3);
        assert!(c.storage.allowed_content_types.contains(&"audio/webm".to_string()));
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.jobs.max_concurrent, 4);
        assert_eq!(config.server.host, "127.0.0.1");
    }

    #[test]
    fn test_parse_partial_sections() {
        let toml_str = r#"
[server]
port = 9100

[storage]
bucket = "clinic-audio"
endpoint = "http://localhost:9000"

[jobs.backoff]
max_attempts = 5
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.storage.bucket, "clinic-audio");
        assert_eq!(config.storage.region, "ap-northeast-1");
        assert_eq!(config.storage.endpoint.as_deref(), Some("http://localhost:9000"));
        assert_eq!(config.jobs.backoff.max_attempts, 5);
        assert_eq!(config.jobs.backoff.initial_delay_ms, 2_000);
        assert_eq!(config.jobs.max_concurrent, 4);
    }

    #[test]
    fn test_env_overrides_win() {
        let env: HashMap<&str, &str> = [
            ("COUNSELDESK_JWT_SECRET", "from-env-secret-value"),
            ("OPENAI_API_KEY", "sk-env"),
            ("S3_BUCKET", "env-bucket"),
            ("AWS_REGION", ""),
        ]
        .into_iter()
        .collect();

        let mut config: Config = toml::from_str(
            r#"
[auth]
jwt_secret = "from-file"

[analysis]
api_key = "sk-file"
"#,
        )
        .unwrap();
        config.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.auth.jwt_secret, "from-env-secret-value");
        // explicit file key is kept, missing one is filled
        assert_eq!(config.analysis.api_key, "sk-file");
        assert_eq!(config.transcription.api_key, "sk-env");
        assert_eq!(config.storage.bucket, "env-bucket");
        // blank env values are ignored
        assert_eq!(config.storage.region, "ap-northeast-1");
    }

    #[test]
    fn test_validate_for_serve() {
        let mut config = Config::default();
        assert!(config.validate_for_serve().is_err());
        config.auth.jwt_secret = "0123456789abcdef".into();
        assert!(config.validate_for_serve().is_ok());
        config.jobs.max_concurrent = 0;
        assert!(config.validate_for_serve().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[analysis]\nmax_input_chars = 4000\n").unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.analysis.max_input_chars, 4000);
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server\nport = ").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = Config::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = Config::default();
        let serialized = toml::to_string(&config).unwrap();
        let deserialized: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(deserialized.storage.bucket, config.storage.bucket);
        assert_eq!(deserialized.jobs.max_concurrent, config.jobs.max_concurrent);
    }
}
