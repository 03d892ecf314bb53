//! Streaming example - shows pipeline stages and answer fragments as they arrive.
//!
//! Usage:
//!   cargo run --example streaming -- [doc_dir]
//!
//! Requires auto-coder.rag to be installed and on PATH.

use std::io::Write;

use autocoder_rag_rs::prelude::*;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("autocoder_rag_rs=debug")
        .init();

    let doc_dir = std::env::args().nth(1).unwrap_or_else(|| ".".to_string());

    println!("🌊 auto-coder.rag Streaming Example");
    println!("===================================\n");

    let client = RagClientBuilder::new(&doc_dir)
        .timeout_secs(120)
        .build()?;

    let options = QueryOptions::new().agentic(false);
    let mut stream = client.query_stream_messages("Summarize these documents", Some(&options));
    let mut contexts = 0;

    while let Some(message) = stream.next().await {
        match message?.event {
            MessageEvent::Start(_) => println!("🚀 Started"),
            MessageEvent::Stage(stage) => println!("⏳ [{}] {}", stage.stage_type, stage.message),
            MessageEvent::Content(content) => {
                print!("{}", content.content);
                std::io::stdout().flush()?;
            }
            MessageEvent::Contexts(c) => contexts += c.contexts.len(),
            MessageEvent::End(end) => {
                println!("\n\n✅ Complete! ({} contexts)", contexts);
                if !end.metadata.is_empty() {
                    println!("   Metadata: {}", serde_json::Value::Object(end.metadata));
                }
            }
        }
    }

    if stream.skipped_lines() > 0 {
        println!("   Skipped {} non-protocol lines", stream.skipped_lines());
    }

    println!("\n👋 Done!");
    Ok(())
}
