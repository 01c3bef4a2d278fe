//! Gateway configuration, layered from defaults, an optional YAML
//! file, and environment variables, in that order of increasing
//! precedence. The handful of environment variables this gateway has
//! always read (`JWT_SECRET`, `ENCRYPTION_KEY`, `AUDIT_STORAGE_PATH`)
//! are bound directly; everything else uses the `TACEDGE_`-prefixed
//! layer.

use std::path::PathBuf;

use serde::Deserialize;

fn default_bind_addr() -> String {
    "0.0.0.0:8080".into()
}

fn default_jwt_secret() -> String {
    "development-secret-change-in-production".into()
}

fn default_encryption_key() -> String {
    "development-key-change-in-production".into()
}

fn default_audit_dir() -> PathBuf {
    PathBuf::from("./data/audit")
}

fn default_drain_interval_ms() -> u64 {
    2_000
}

fn default_crypto_timeout_ms() -> u64 {
    5_000
}

fn default_audit_timeout_ms() -> u64 {
    2_000
}

fn default_queue_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,

    /// Master secret PBKDF2 derives per-message keys from; see
    /// `crate::crypto`.
    #[serde(default = "default_encryption_key")]
    pub encryption_key: String,

    #[serde(default = "default_audit_dir")]
    pub audit_dir: PathBuf,

    /// When `false` (the default), a crypto engine failure aborts
    /// message processing (`ApiError::Internal`) rather than silently
    /// sending the content in the clear.
    #[serde(default)]
    pub crypto_fail_open: bool,

    #[serde(default = "default_drain_interval_ms")]
    pub drain_interval_ms: u64,

    #[serde(default = "default_crypto_timeout_ms")]
    pub crypto_timeout_ms: u64,

    #[serde(default = "default_audit_timeout_ms")]
    pub audit_timeout_ms: u64,

    #[serde(default = "default_queue_timeout_ms")]
    pub queue_timeout_ms: u64,

    #[serde(default)]
    pub redis_url: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            jwt_secret: default_jwt_secret(),
            encryption_key: default_encryption_key(),
            audit_dir: default_audit_dir(),
            crypto_fail_open: false,
            drain_interval_ms: default_drain_interval_ms(),
            crypto_timeout_ms: default_crypto_timeout_ms(),
            audit_timeout_ms: default_audit_timeout_ms(),
            queue_timeout_ms: default_queue_timeout_ms(),
            redis_url: None,
        }
    }
}

impl GatewayConfig {
    /// Loads configuration from (in increasing precedence) built-in
    /// defaults, `path` if it exists, and `TACEDGE_`-prefixed
    /// environment variables.
    pub fn load(path: Option<&PathBuf>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder()
            .set_default("bind_addr", default_bind_addr())?
            .set_default("jwt_secret", default_jwt_secret())?
            .set_default("encryption_key", default_encryption_key())?
            .set_default("audit_dir", default_audit_dir().to_string_lossy().to_string())?
            .set_default("crypto_fail_open", false)?
            .set_default("drain_interval_ms", default_drain_interval_ms() as i64)?
            .set_default("crypto_timeout_ms", default_crypto_timeout_ms() as i64)?
            .set_default("audit_timeout_ms", default_audit_timeout_ms() as i64)?
            .set_default("queue_timeout_ms", default_queue_timeout_ms() as i64)?;

        if let Some(path) = path {
            if path.exists() {
                builder = builder.add_source(config::File::from(path.as_path()));
            }
        }

        let mut builder = builder.add_source(
            config::Environment::with_prefix("TACEDGE")
                .separator("_")
                .try_parsing(true),
        );

        // Literal environment variable names this gateway has always
        // read, independent of the TACEDGE_ prefix convention above.
        if let Ok(v) = std::env::var("JWT_SECRET") {
            builder = builder.set_override("jwt_secret", v)?;
        }
        if let Ok(v) = std::env::var("ENCRYPTION_KEY") {
            builder = builder.set_override("encryption_key", v)?;
        }
        if let Ok(v) = std::env::var("AUDIT_STORAGE_PATH") {
            builder = builder.set_override("audit_dir", v)?;
        }

        let settings = builder.build()?;
        Ok(settings.try_deserialize()?)
    }
}
