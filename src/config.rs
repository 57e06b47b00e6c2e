//! Service configuration.
//!
//! Loaded from a TOML file (see [`Config::load`]) and then overridden by
//! `SPACE_SEARCH_*` environment variables. Every section has defaults, so an
//! empty file (or no file) is a valid configuration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const ENV_PREFIX: &str = "SPACE_SEARCH_";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub extractor: ExtractorConfig,
    pub events: EventsConfig,
    pub cache: CacheConfig,
    pub reindex: ReindexConfig,
    pub storage: StorageConfig,
    pub token_manager: TokenManagerConfig,
    pub service_account: ServiceAccountConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineType {
    #[default]
    Tantivy,
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    #[serde(rename = "type")]
    pub kind: EngineType,
    /// Root for the embedded index.
    pub data_dir: PathBuf,
    /// Tantivy writer heap in bytes.
    pub writer_heap_bytes: usize,
    pub remote: RemoteEngineConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kind: EngineType::Tantivy,
            data_dir: crate::default_data_dir(),
            writer_heap_bytes: 50_000_000,
            remote: RemoteEngineConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteEngineConfig {
    pub addresses: Vec<String>,
    pub index: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub headers: HashMap<String, String>,
    pub timeout_secs: u64,
    /// Accept self-signed cluster certificates.
    pub insecure: bool,
}

impl Default for RemoteEngineConfig {
    fn default() -> Self {
        Self {
            addresses: vec!["http://127.0.0.1:9200".to_string()],
            index: "space-search-resources".to_string(),
            username: None,
            password: None,
            headers: HashMap::new(),
            timeout_secs: 10,
            insecure: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractorType {
    #[default]
    Basic,
    Tika,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    #[serde(rename = "type")]
    pub kind: ExtractorType,
    pub tika_url: String,
    pub timeout_secs: u64,
    /// Files above this size are indexed without content.
    pub max_file_size: u64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            kind: ExtractorType::Basic,
            tika_url: "http://127.0.0.1:9998".to_string(),
            timeout_secs: 30,
            max_file_size: 20 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Index on `UploadReady` instead of `ItemUploaded`.
    pub async_uploads: bool,
    /// Follow point mutations with a full space rebuild.
    pub rebuild_after_mutation: bool,
    pub workers: usize,
    pub channel_size: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            async_uploads: false,
            rebuild_after_mutation: true,
            workers: 1,
            channel_size: 32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_ms: u64,
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 1_000,
            capacity: 1_024,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

/// What a full reindex does when one space fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReindexPolicy {
    /// Attempt every space and report the failed ones.
    #[default]
    Continue,
    /// Stop at the first failing space.
    AbortOnFirst,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReindexConfig {
    pub policy: ReindexPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Each directory below the root is one space.
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: crate::default_data_dir().join("spaces"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenManagerConfig {
    pub secret: String,
    pub token_ttl_secs: i64,
}

impl Default for TokenManagerConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            token_ttl_secs: 24 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceAccountConfig {
    pub id: String,
    pub secret: String,
}

impl Config {
    /// Reads `path` if it exists, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
        let mut cfg = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config {}", path.display()))?;
            toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?
        } else {
            tracing::debug!(path = %path.display(), "config file absent, using defaults");
            Self::default()
        };
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Applies `SPACE_SEARCH_*` overrides on top of the current values.
    pub fn apply_env(&mut self) {
        if let Some(v) = env("ENGINE") {
            match v.as_str() {
                "tantivy" => self.engine.kind = EngineType::Tantivy,
                "remote" => self.engine.kind = EngineType::Remote,
                other => tracing::warn!(value = other, "ignoring unknown engine type"),
            }
        }
        if let Some(v) = env("DATA_DIR") {
            self.engine.data_dir = PathBuf::from(v);
        }
        if let Some(v) = env("REMOTE_ADDRESSES") {
            self.engine.remote.addresses = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(v) = env("REMOTE_INDEX") {
            self.engine.remote.index = v;
        }
        if let Some(v) = env("REMOTE_USERNAME") {
            self.engine.remote.username = Some(v);
        }
        if let Some(v) = env("REMOTE_PASSWORD") {
            self.engine.remote.password = Some(v);
        }
        if let Some(v) = env("EXTRACTOR") {
            match v.as_str() {
                "basic" => self.extractor.kind = ExtractorType::Basic,
                "tika" => self.extractor.kind = ExtractorType::Tika,
                other => tracing::warn!(value = other, "ignoring unknown extractor type"),
            }
        }
        if let Some(v) = env("TIKA_URL") {
            self.extractor.tika_url = v;
        }
        if let Some(v) = env("EXTRACTOR_TIMEOUT_SECS")
            && let Ok(secs) = v.parse()
        {
            self.extractor.timeout_secs = secs;
        }
        if let Some(v) = env("ASYNC_UPLOADS") {
            self.events.async_uploads = parse_bool(&v);
        }
        if let Some(v) = env("REBUILD_AFTER_MUTATION") {
            self.events.rebuild_after_mutation = parse_bool(&v);
        }
        if let Some(v) = env("EVENT_WORKERS")
            && let Ok(n) = v.parse()
        {
            self.events.workers = n;
        }
        if let Some(v) = env("CACHE_TTL_MS")
            && let Ok(ms) = v.parse()
        {
            self.cache.ttl_ms = ms;
        }
        if let Some(v) = env("REINDEX_POLICY") {
            match v.as_str() {
                "continue" => self.reindex.policy = ReindexPolicy::Continue,
                "abort-on-first" => self.reindex.policy = ReindexPolicy::AbortOnFirst,
                other => tracing::warn!(value = other, "ignoring unknown reindex policy"),
            }
        }
        if let Some(v) = env("STORAGE_ROOT") {
            self.storage.root = PathBuf::from(v);
        }
        if let Some(v) = env("JWT_SECRET") {
            self.token_manager.secret = v;
        }
        if let Some(v) = env("SERVICE_ACCOUNT_ID") {
            self.service_account.id = v;
        }
        if let Some(v) = env("SERVICE_ACCOUNT_SECRET") {
            self.service_account.secret = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.engine.kind == EngineType::Remote && self.engine.remote.addresses.is_empty() {
            anyhow::bail!("remote engine selected but no addresses configured");
        }
        if self.events.workers == 0 {
            anyhow::bail!("events.workers must be at least 1");
        }
        if self.cache.capacity == 0 {
            anyhow::bail!("cache.capacity must be at least 1");
        }
        Ok(())
    }
}

fn env(key: &str) -> Option<String> {
    dotenvy::var(format!("{ENV_PREFIX}{key}")).ok()
}

fn parse_bool(v: &str) -> bool {
    v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes")
}

pub fn default_config_path() -> PathBuf {
    directories::ProjectDirs::from("com", "space-search", "space-search")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("space-search.toml"))
}
