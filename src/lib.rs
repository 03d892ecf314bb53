//! # auto-coder.rag Rust Client
//!
//! A Rust library for driving the `auto-coder.rag` command-line RAG tool.
//! Each query spawns `auto-coder.rag run`, writes the question to its stdin
//! and turns its output into typed results.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use autocoder_rag_rs::{RagClient, RagClientBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Simple usage
//!     let client = RagClient::new("./docs")?;
//!     let answer = client.query("How do I configure the server?", None).await?;
//!     println!("{answer}");
//!
//!     // With builder pattern
//!     let client = RagClientBuilder::new("./docs")
//!         .timeout_secs(120)
//!         .model("v3_chat")
//!         .agentic()
//!         .build()?;
//!
//!     let answer = client.query("Summarize the design", None).await?;
//!     println!("{answer}");
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Streaming Messages
//!
//! With `stream-json` output the tool reports pipeline stages, answer
//! fragments and retrieved contexts as they happen:
//!
//! ```rust,no_run
//! use autocoder_rag_rs::{MessageEvent, RagClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = RagClient::new("./docs")?;
//! let mut stream = client.query_stream_messages("What is RAG?", None);
//!
//! while let Some(message) = stream.next().await {
//!     match message?.event {
//!         MessageEvent::Stage(stage) => eprintln!("[{}] {}", stage.stage_type, stage.message),
//!         MessageEvent::Content(content) => print!("{}", content.content),
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Or fold everything into one [`RagResponse`]:
//!
//! ```rust,no_run
//! use autocoder_rag_rs::RagClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = RagClient::new("./docs")?;
//! let response = client.query_collect_messages("What is RAG?", None).await?;
//! println!("{} ({} contexts)", response.answer, response.contexts.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Documents From Memory
//!
//! ```rust,no_run
//! use autocoder_rag_rs::{RagClient, TextDocument};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = RagClient::from_texts(
//!     &[
//!         TextDocument::with_filename("API documentation...", "api.md"),
//!         TextDocument::new("FAQ..."),
//!     ],
//!     None,
//! )?;
//! let answer = client.query("How to use the API?", None).await?;
//!
//! // The staging directory is left on disk.
//! std::fs::remove_dir_all(client.doc_dir())?;
//! # Ok(())
//! # }
//! ```

mod client;
mod command;
mod config;
mod documents;
mod error;
mod message;
mod response;
mod session;
mod tokens;

pub use client::{RagClient, RagClientBuilder};
pub use command::{build_run_args, resolve_env, CommandSpec};
pub use config::{
    OutputFormat, ProductMode, QueryOptions, RagConfig, DEFAULT_BINARY, DEFAULT_MODEL,
    DEFAULT_TIMEOUT_SECS,
};
pub use documents::{stage_text, stage_texts, TextDocument};
pub use error::{ErrorKind, RagClientError, Result};
pub use message::{
    parse_line, ContentData, ContextsData, EndData, EventType, MessageEvent, ProtocolMessage,
    StageData, StartData, TokenUsage,
};
pub use response::{RagResponse, ResponseAggregator};
pub use session::{LineStream, MessageStream, QueryStream, RESULT_CHANNEL_CAPACITY};
pub use tokens::{
    count_tokens, parse_token_count_output, TokenCountFile, TokenCountOptions, TokenCountResult,
};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::client::{RagClient, RagClientBuilder};
    pub use crate::config::{OutputFormat, ProductMode, QueryOptions, RagConfig};
    pub use crate::error::{ErrorKind, RagClientError, Result};
    pub use crate::message::{MessageEvent, ProtocolMessage};
    pub use crate::response::RagResponse;
}
