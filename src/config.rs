//! Configuration for the auto-coder.rag client.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, info, warn};

use crate::error::{RagClientError, Result};

/// Default command name searched on `PATH`.
pub const DEFAULT_BINARY: &str = "auto-coder.rag";

/// Default model passed via `--model`.
pub const DEFAULT_MODEL: &str = "v3_chat";

/// Default timeout for a query (5 minutes).
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Session configuration, reusable across many queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// Directory holding the documents to retrieve from.
    pub doc_dir: PathBuf,

    /// Path or name of the auto-coder.rag binary.
    pub binary_path: PathBuf,

    pub model: Option<String>,
    pub model_file: Option<PathBuf>,

    /// Deadline for each query.
    #[serde(
        rename = "timeout_secs",
        serialize_with = "serialize_secs",
        deserialize_with = "deserialize_secs"
    )]
    pub timeout: Duration,

    pub rag_context_window_limit: u32,
    pub full_text_ratio: f64,
    pub segment_ratio: f64,
    pub rag_doc_filter_relevance: i32,

    pub agentic: bool,
    pub product_mode: ProductMode,

    pub enable_hybrid_index: bool,
    pub disable_auto_window: bool,
    pub disable_segment_reorder: bool,

    // Per-role model overrides
    pub recall_model: Option<String>,
    pub chunk_model: Option<String>,
    pub qa_model: Option<String>,
    pub emb_model: Option<String>,
    pub agentic_model: Option<String>,
    pub context_prune_model: Option<String>,

    pub tokenizer_path: Option<PathBuf>,

    /// Comma separated extensions to index, e.g. `.md,.txt`.
    pub required_exts: Option<String>,
    pub ray_address: Option<String>,

    /// Extra environment variables for every query.
    pub envs: HashMap<String, String>,

    /// Force UTF-8 locale variables for the subprocess on Windows.
    pub windows_utf8_env: bool,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            doc_dir: PathBuf::from("."),
            binary_path: PathBuf::from(DEFAULT_BINARY),
            model: Some(DEFAULT_MODEL.to_string()),
            model_file: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            rag_context_window_limit: 56_000,
            full_text_ratio: 0.7,
            segment_ratio: 0.2,
            rag_doc_filter_relevance: 0,
            agentic: false,
            product_mode: ProductMode::Lite,
            enable_hybrid_index: false,
            disable_auto_window: false,
            disable_segment_reorder: false,
            recall_model: None,
            chunk_model: None,
            qa_model: None,
            emb_model: None,
            agentic_model: None,
            context_prune_model: None,
            tokenizer_path: None,
            required_exts: None,
            ray_address: None,
            envs: HashMap::new(),
            windows_utf8_env: true,
        }
    }
}

impl RagConfig {
    /// Create a config with default values for the given document directory.
    pub fn new(doc_dir: impl Into<PathBuf>) -> Self {
        Self {
            doc_dir: doc_dir.into(),
            ..Self::default()
        }
    }

    /// Parse a config from TOML text. Missing keys keep their defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| RagClientError::validation(e.to_string()))
    }

    /// Read a config from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&contents)?;
        info!(path = %path.display(), "loaded RAG config");
        Ok(config)
    }

    /// Location of the global config file (`<config_dir>/autocoder-rag/config.toml`).
    pub fn global_config_path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("autocoder-rag").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("autocoder-rag.toml"))
    }

    /// Defaults, overlaid with the global config file when present, for `doc_dir`.
    pub fn load(doc_dir: impl Into<PathBuf>) -> Self {
        let path = Self::global_config_path();
        let base = if path.exists() {
            match Self::from_file(&path) {
                Ok(config) => config,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "ignoring unreadable global config");
                    Self::default()
                }
            }
        } else {
            debug!(path = %path.display(), "no global config file");
            Self::default()
        };

        Self {
            doc_dir: doc_dir.into(),
            ..base
        }
    }

    /// Check that the document directory exists and is readable.
    pub fn validate(&self) -> Result<()> {
        if !self.doc_dir.is_dir() || std::fs::read_dir(&self.doc_dir).is_err() {
            return Err(RagClientError::DocDirNotAccessible {
                path: self.doc_dir.display().to_string(),
            });
        }
        Ok(())
    }

    pub fn binary_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.binary_path = path.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn model_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.model_file = Some(path.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set timeout in seconds.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn rag_context_window_limit(mut self, limit: u32) -> Self {
        self.rag_context_window_limit = limit;
        self
    }

    pub fn full_text_ratio(mut self, ratio: f64) -> Self {
        self.full_text_ratio = ratio;
        self
    }

    pub fn segment_ratio(mut self, ratio: f64) -> Self {
        self.segment_ratio = ratio;
        self
    }

    pub fn rag_doc_filter_relevance(mut self, relevance: i32) -> Self {
        self.rag_doc_filter_relevance = relevance;
        self
    }

    pub fn agentic(mut self, enabled: bool) -> Self {
        self.agentic = enabled;
        self
    }

    pub fn product_mode(mut self, mode: ProductMode) -> Self {
        self.product_mode = mode;
        self
    }

    pub fn enable_hybrid_index(mut self, enabled: bool) -> Self {
        self.enable_hybrid_index = enabled;
        self
    }

    pub fn disable_auto_window(mut self, disabled: bool) -> Self {
        self.disable_auto_window = disabled;
        self
    }

    pub fn disable_segment_reorder(mut self, disabled: bool) -> Self {
        self.disable_segment_reorder = disabled;
        self
    }

    pub fn tokenizer_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.tokenizer_path = Some(path.into());
        self
    }

    /// Add an environment variable passed to every query.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.insert(key.into(), value.into());
        self
    }

    pub fn windows_utf8_env(mut self, enabled: bool) -> Self {
        self.windows_utf8_env = enabled;
        self
    }
}

fn serialize_secs<S: Serializer>(timeout: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(timeout.as_secs())
}

fn deserialize_secs<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_secs)
}

/// Operating tier of auto-coder.rag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProductMode {
    #[default]
    Lite,
    Pro,
}

impl ProductMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductMode::Lite => "lite",
            ProductMode::Pro => "pro",
        }
    }

    /// Convert to CLI flag.
    pub fn as_flag(&self) -> &'static str {
        match self {
            ProductMode::Lite => "--lite",
            ProductMode::Pro => "--pro",
        }
    }
}

impl FromStr for ProductMode {
    type Err = RagClientError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "lite" => Ok(ProductMode::Lite),
            "pro" => Ok(ProductMode::Pro),
            other => Err(RagClientError::validation(format!(
                "unsupported product mode: {other}"
            ))),
        }
    }
}

impl fmt::Display for ProductMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output format requested from auto-coder.rag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Plain text output.
    #[default]
    Text,
    /// Single JSON document.
    Json,
    /// Newline-delimited JSON events.
    StreamJson,
}

impl OutputFormat {
    /// Convert to CLI flag value.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Text => "text",
            OutputFormat::Json => "json",
            OutputFormat::StreamJson => "stream-json",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = RagClientError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "stream-json" => Ok(OutputFormat::StreamJson),
            other => Err(RagClientError::validation(format!(
                "unsupported output format: {other}"
            ))),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! string_enum_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

string_enum_serde!(ProductMode);
string_enum_serde!(OutputFormat);

/// Per-query overrides. Unset fields fall back to [`RagConfig`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    pub output_format: Option<OutputFormat>,
    pub agentic: Option<bool>,
    pub product_mode: Option<ProductMode>,
    pub model: Option<String>,
    pub model_file: Option<PathBuf>,
    #[serde(skip)]
    pub timeout: Option<Duration>,
    pub envs: HashMap<String, String>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = Some(format);
        self
    }

    pub fn agentic(mut self, enabled: bool) -> Self {
        self.agentic = Some(enabled);
        self
    }

    pub fn product_mode(mut self, mode: ProductMode) -> Self {
        self.product_mode = Some(mode);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn model_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.model_file = Some(path.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout = Some(Duration::from_secs(secs));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.insert(key.into(), value.into());
        self
    }

    /// Timeout for this query, falling back to the session timeout.
    pub(crate) fn resolve_timeout(options: Option<&QueryOptions>, config: &RagConfig) -> Duration {
        options.and_then(|o| o.timeout).unwrap_or(config.timeout)
    }
}
