//! Resolution of argument vectors and environments for auto-coder.rag.

use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;

use crate::config::{OutputFormat, QueryOptions, RagConfig};

/// Locale variables forced on Windows so the Python tool writes UTF-8.
const UTF8_ENV: [(&str, &str); 4] = [
    ("PYTHONIOENCODING", "utf-8"),
    ("LANG", "zh_CN.UTF-8"),
    ("LC_ALL", "zh_CN.UTF-8"),
    ("CHCP", "65001"),
];

/// Fully resolved invocation of the external binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    /// Resolve the `run` invocation for a query.
    pub fn for_query(config: &RagConfig, options: Option<&QueryOptions>) -> Self {
        Self {
            program: config.binary_path.clone(),
            args: build_run_args(config, options),
            env: resolve_env(
                inherited_env(),
                config.windows_utf8_env && cfg!(windows),
                &config.envs,
                options.map(|o| &o.envs),
            ),
        }
    }

    /// Build a tokio command with piped stdio and an explicit environment.
    pub(crate) fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env_clear()
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    pub fn program_name(&self) -> String {
        self.program.display().to_string()
    }
}

/// Build the argument vector (without the program) for `auto-coder.rag run`.
///
/// Per-call options win field by field; numeric flags are always emitted in a
/// fixed order and boolean toggles only when active.
pub fn build_run_args(config: &RagConfig, options: Option<&QueryOptions>) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["run".into(), "--doc_dir".into(), config.doc_dir.clone().into()];

    let model = options
        .and_then(|o| o.model.as_ref())
        .or(config.model.as_ref())
        .filter(|m| !m.is_empty());
    if let Some(model) = model {
        args.push("--model".into());
        args.push(model.into());
    }

    let model_file = options
        .and_then(|o| o.model_file.as_ref())
        .or(config.model_file.as_ref());
    if let Some(model_file) = model_file {
        args.push("--model_file".into());
        args.push(model_file.clone().into());
    }

    let output_format = options
        .and_then(|o| o.output_format)
        .unwrap_or(OutputFormat::Text);
    args.push("--output_format".into());
    args.push(output_format.as_str().into());

    if options.and_then(|o| o.agentic).unwrap_or(config.agentic) {
        args.push("--agentic".into());
    }

    let product_mode = options
        .and_then(|o| o.product_mode)
        .unwrap_or(config.product_mode);
    args.push(product_mode.as_flag().into());

    // RAG tuning, fixed order
    args.push("--rag_context_window_limit".into());
    args.push(config.rag_context_window_limit.to_string().into());
    args.push("--full_text_ratio".into());
    args.push(format_ratio(config.full_text_ratio).into());
    args.push("--segment_ratio".into());
    args.push(format_ratio(config.segment_ratio).into());
    args.push("--rag_doc_filter_relevance".into());
    args.push(config.rag_doc_filter_relevance.to_string().into());

    if config.enable_hybrid_index {
        args.push("--enable_hybrid_index".into());
    }
    if config.disable_auto_window {
        args.push("--disable_auto_window".into());
    }
    if config.disable_segment_reorder {
        args.push("--disable_segment_reorder".into());
    }

    let optional: [(&str, Option<OsString>); 9] = [
        ("--recall_model", config.recall_model.clone().map(Into::into)),
        ("--chunk_model", config.chunk_model.clone().map(Into::into)),
        ("--qa_model", config.qa_model.clone().map(Into::into)),
        ("--emb_model", config.emb_model.clone().map(Into::into)),
        ("--agentic_model", config.agentic_model.clone().map(Into::into)),
        ("--context_prune_model", config.context_prune_model.clone().map(Into::into)),
        ("--tokenizer_path", config.tokenizer_path.clone().map(Into::into)),
        ("--required_exts", config.required_exts.clone().map(Into::into)),
        ("--ray_address", config.ray_address.clone().map(Into::into)),
    ];
    for (flag, value) in optional {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            args.push(flag.into());
            args.push(value);
        }
    }

    args
}

/// Merge environment layers; later layers win on key collision.
///
/// Order (low to high): inherited, UTF-8 overlay, session, per-call.
pub fn resolve_env<I>(
    inherited: I,
    utf8_overlay: bool,
    session: &HashMap<String, String>,
    per_call: Option<&HashMap<String, String>>,
) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut env: BTreeMap<String, String> = inherited.into_iter().collect();

    if utf8_overlay {
        for (k, v) in UTF8_ENV {
            env.insert(k.to_string(), v.to_string());
        }
    }

    env.extend(session.iter().map(|(k, v)| (k.clone(), v.clone())));

    if let Some(per_call) = per_call {
        env.extend(per_call.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    env
}

/// Current process environment. Non UTF-8 entries are skipped.
pub(crate) fn inherited_env() -> impl Iterator<Item = (String, String)> {
    std::env::vars_os().filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
}

/// Shortest round-trip decimal, always with a fractional part.
fn format_ratio(value: f64) -> String {
    let s = value.to_string();
    if value.is_finite() && !s.contains('.') && !s.contains('e') {
        format!("{s}.0")
    } else {
        s
    }
}
