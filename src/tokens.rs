//! Standalone token counting via `auto-coder.rag tools count`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::command::{inherited_env, resolve_env, CommandSpec};
use crate::config::DEFAULT_BINARY;
use crate::error::{RagClientError, Result};
use crate::session::run_to_completion;

/// Default deadline for a count.
pub const DEFAULT_COUNT_TIMEOUT_SECS: u64 = 60;

/// Options for [`count_tokens`].
#[derive(Debug, Clone)]
pub struct TokenCountOptions {
    pub binary_path: PathBuf,
    pub tokenizer_path: Option<PathBuf>,
    pub timeout: Duration,
    pub envs: HashMap<String, String>,
}

impl Default for TokenCountOptions {
    fn default() -> Self {
        Self {
            binary_path: PathBuf::from(DEFAULT_BINARY),
            tokenizer_path: None,
            timeout: Duration::from_secs(DEFAULT_COUNT_TIMEOUT_SECS),
            envs: HashMap::new(),
        }
    }
}

impl TokenCountOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn binary_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.binary_path = path.into();
        self
    }

    pub fn tokenizer_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.tokenizer_path = Some(path.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.insert(key.into(), value.into());
        self
    }
}

/// Counts for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCountFile {
    pub file: String,
    pub characters: u64,
    pub tokens: u64,
}

/// Result of a token count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenCountResult {
    pub files: Vec<TokenCountFile>,
    pub total_characters: u64,
    pub total_tokens: u64,
    /// Output exactly as printed by the tool.
    #[serde(skip)]
    pub raw_output: String,
}

/// Count characters and tokens in `file_path`.
///
/// ```rust,no_run
/// use autocoder_rag_rs::{count_tokens, TokenCountOptions};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let result = count_tokens("/path/to/file.xlsx", None).await?;
/// println!("Total tokens: {}", result.total_tokens);
///
/// let options = TokenCountOptions::new().tokenizer_path("/path/to/tokenizer.json");
/// let result = count_tokens("/path/to/file.xlsx", Some(&options)).await?;
/// # Ok(())
/// # }
/// ```
#[instrument(skip_all, fields(file = %file_path.as_ref().display()))]
pub async fn count_tokens(
    file_path: impl AsRef<Path>,
    options: Option<&TokenCountOptions>,
) -> Result<TokenCountResult> {
    let defaults = TokenCountOptions::default();
    let options = options.unwrap_or(&defaults);

    let spec = count_command(file_path.as_ref(), options);
    let output = run_to_completion(&spec, None, options.timeout)
        .await?
        .into_success()?;

    let result = parse_token_count_output(output.stdout.trim())?;
    info!(
        files = result.files.len(),
        total_tokens = result.total_tokens,
        "token count completed"
    );
    Ok(result)
}

fn count_command(file_path: &Path, options: &TokenCountOptions) -> CommandSpec {
    let mut args = vec![
        "tools".into(),
        "count".into(),
        "--file".into(),
        file_path.as_os_str().to_owned(),
        "--output_format".into(),
        "json".into(),
    ];
    if let Some(ref tokenizer) = options.tokenizer_path {
        args.push("--tokenizer_path".into());
        args.push(tokenizer.as_os_str().to_owned());
    }

    CommandSpec {
        program: options.binary_path.clone(),
        args,
        env: resolve_env(inherited_env(), false, &options.envs, None),
    }
}

/// Parse the JSON printed by `tools count --output_format json`.
pub fn parse_token_count_output(output: &str) -> Result<TokenCountResult> {
    let mut result: TokenCountResult =
        serde_json::from_str(output).map_err(|e| RagClientError::ParseError {
            message: format!(
                "failed to parse JSON output: {e}. Output was: {}",
                output.chars().take(200).collect::<String>()
            ),
            raw_output: output.to_string(),
        })?;
    result.raw_output = output.to_string();
    Ok(result)
}
