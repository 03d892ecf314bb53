//! auto-coder.rag client for programmatic RAG queries.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};

use crate::command::CommandSpec;
use crate::config::{OutputFormat, ProductMode, QueryOptions, RagConfig};
use crate::documents::{stage_text, stage_texts, TextDocument};
use crate::error::{RagClientError, Result};
use crate::response::{RagResponse, ResponseAggregator};
use crate::session::{run_to_completion, stream_lines, stream_messages, LineStream, MessageStream};

/// Deadline for `--version` and `--help` probes.
const PROBE_TIMEOUT: Duration = Duration::from_secs(60);

/// Client bound to one document directory.
#[derive(Debug, Clone)]
pub struct RagClient {
    config: RagConfig,
}

impl RagClient {
    /// Create a client with default configuration for `doc_dir`.
    pub fn new(doc_dir: impl Into<PathBuf>) -> Result<Self> {
        Self::with_config(RagConfig::new(doc_dir))
    }

    /// Create a client with custom configuration.
    pub fn with_config(config: RagConfig) -> Result<Self> {
        config.validate()?;
        debug!(
            doc_dir = %config.doc_dir.display(),
            binary = %config.binary_path.display(),
            product_mode = %config.product_mode,
            "created RAG client"
        );
        Ok(Self { config })
    }

    /// Stage `text` as a document and create a client over it.
    ///
    /// Without `dir` a fresh temp directory is used. It is not removed
    /// automatically; see [`RagClient::doc_dir`].
    pub fn from_text(text: &str, filename: Option<&str>, dir: Option<&Path>) -> Result<Self> {
        Self::new(stage_text(text, filename, dir)?)
    }

    /// Stage several documents and create a client over them.
    pub fn from_texts(documents: &[TextDocument], dir: Option<&Path>) -> Result<Self> {
        Self::new(stage_texts(documents, dir)?)
    }

    /// Get the current configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Document directory this client queries.
    pub fn doc_dir(&self) -> &Path {
        &self.config.doc_dir
    }

    /// Run a query and return the complete answer.
    #[instrument(skip(self, question, options), fields(question_len = question.len()))]
    pub async fn query(&self, question: &str, options: Option<&QueryOptions>) -> Result<String> {
        let timeout = QueryOptions::resolve_timeout(options, &self.config);
        let spec = CommandSpec::for_query(&self.config, options);

        let output = run_to_completion(&spec, Some(question.to_string()), timeout).await?;
        if !output.status.success() {
            error!(status = %output.status, stderr = %output.stderr.trim(), "auto-coder.rag query failed");
        }
        let output = output.into_success()?;

        let answer = output.stdout.trim().to_string();
        info!(answer_len = answer.len(), "received answer from auto-coder.rag");
        Ok(answer)
    }

    /// Run a query and stream stdout line by line.
    ///
    /// The timeout bounds the process. Time the pump spends waiting for a
    /// full result channel to drain is added back to the deadline, so a slow
    /// reader never gets a healthy process killed. Non-UTF-8 bytes are
    /// replaced with `U+FFFD`.
    ///
    /// Must be called from within a tokio runtime.
    #[instrument(skip(self, question, options), fields(question_len = question.len()))]
    pub fn query_stream(&self, question: &str, options: Option<&QueryOptions>) -> LineStream {
        let timeout = QueryOptions::resolve_timeout(options, &self.config);
        let spec = CommandSpec::for_query(&self.config, options);
        stream_lines(spec, question.to_string(), timeout)
    }

    /// Run a query and stream decoded protocol messages.
    ///
    /// The output format is forced to `stream-json`. Lines that are not
    /// valid messages are skipped.
    #[instrument(skip(self, question, options), fields(question_len = question.len()))]
    pub fn query_stream_messages(&self, question: &str, options: Option<&QueryOptions>) -> MessageStream {
        let options = QueryOptions {
            output_format: Some(OutputFormat::StreamJson),
            ..options.cloned().unwrap_or_default()
        };
        let timeout = QueryOptions::resolve_timeout(Some(&options), &self.config);
        let spec = CommandSpec::for_query(&self.config, Some(&options));
        stream_messages(spec, question.to_string(), timeout)
    }

    /// Run a query and fold its messages into one response.
    ///
    /// Fails with the stream's error if any; partial content is discarded.
    #[instrument(skip(self, question, options), fields(question_len = question.len()))]
    pub async fn query_collect_messages(
        &self,
        question: &str,
        options: Option<&QueryOptions>,
    ) -> Result<RagResponse> {
        let mut stream = self.query_stream_messages(question, options);
        let mut aggregator = ResponseAggregator::new();

        while let Some(message) = stream.next().await {
            aggregator.push(&message?);
        }

        let response = aggregator.finish();
        info!(
            answer_len = response.answer.len(),
            contexts = response.contexts.len(),
            input_tokens = response.tokens.input,
            generated_tokens = response.tokens.generated,
            skipped_lines = stream.skipped_lines(),
            "collected auto-coder.rag response"
        );
        Ok(response)
    }

    /// Get the auto-coder.rag version.
    #[instrument(skip(self))]
    pub async fn version(&self) -> Result<String> {
        let output = run_to_completion(&self.probe_command("--version"), None, PROBE_TIMEOUT)
            .await?
            .into_success()?;
        Ok(output.stdout.trim().to_string())
    }

    /// Check that the binary is on `PATH` and answers `--help`.
    #[instrument(skip(self))]
    pub async fn check_availability(&self) -> bool {
        if let Err(e) = which::which(&self.config.binary_path) {
            warn!(binary = %self.config.binary_path.display(), error = %e, "auto-coder.rag not found");
            return false;
        }

        match run_to_completion(&self.probe_command("--help"), None, PROBE_TIMEOUT).await {
            Ok(output) if output.status.success() => {
                info!("auto-coder.rag availability check passed");
                true
            }
            Ok(output) => {
                warn!(status = %output.status, "auto-coder.rag --help failed");
                false
            }
            Err(e) => {
                error!(error = %e, "auto-coder.rag availability check failed");
                false
            }
        }
    }

    fn probe_command(&self, flag: &str) -> CommandSpec {
        let mut spec = CommandSpec::for_query(&self.config, None);
        spec.args = vec![flag.into()];
        spec
    }
}

/// Builder for creating a configured [`RagClient`].
#[derive(Debug, Default)]
pub struct RagClientBuilder {
    config: RagConfig,
}

impl RagClientBuilder {
    /// Create a new builder.
    pub fn new(doc_dir: impl Into<PathBuf>) -> Self {
        Self {
            config: RagConfig::new(doc_dir),
        }
    }

    /// Start from an existing configuration, e.g. one loaded with [`RagConfig::load`].
    pub fn from_config(config: RagConfig) -> Self {
        Self { config }
    }

    pub fn binary_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config = self.config.binary_path(path);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config = self.config.model(model);
        self
    }

    pub fn model_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config = self.config.model_file(path);
        self
    }

    /// Set the timeout in seconds.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config = self.config.timeout_secs(secs);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.timeout(timeout);
        self
    }

    pub fn agentic(mut self) -> Self {
        self.config = self.config.agentic(true);
        self
    }

    pub fn product_mode(mut self, mode: ProductMode) -> Self {
        self.config = self.config.product_mode(mode);
        self
    }

    pub fn rag_context_window_limit(mut self, limit: u32) -> Self {
        self.config = self.config.rag_context_window_limit(limit);
        self
    }

    pub fn full_text_ratio(mut self, ratio: f64) -> Self {
        self.config = self.config.full_text_ratio(ratio);
        self
    }

    pub fn segment_ratio(mut self, ratio: f64) -> Self {
        self.config = self.config.segment_ratio(ratio);
        self
    }

    pub fn rag_doc_filter_relevance(mut self, relevance: i32) -> Self {
        self.config = self.config.rag_doc_filter_relevance(relevance);
        self
    }

    pub fn enable_hybrid_index(mut self) -> Self {
        self.config = self.config.enable_hybrid_index(true);
        self
    }

    pub fn disable_auto_window(mut self) -> Self {
        self.config = self.config.disable_auto_window(true);
        self
    }

    pub fn disable_segment_reorder(mut self) -> Self {
        self.config = self.config.disable_segment_reorder(true);
        self
    }

    pub fn tokenizer_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config = self.config.tokenizer_path(path);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config = self.config.env(key, value);
        self
    }

    pub fn windows_utf8_env(mut self, enabled: bool) -> Self {
        self.config = self.config.windows_utf8_env(enabled);
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<RagClient> {
        RagClient::with_config(self.config)
    }
}

impl TryFrom<RagConfig> for RagClient {
    type Error = RagClientError;

    fn try_from(config: RagConfig) -> Result<Self> {
        Self::with_config(config)
    }
}
