//! Basic example - availability probe and a buffered query.
//!
//! Usage:
//!   cargo run --example basic -- [doc_dir]
//!
//! Requires auto-coder.rag to be installed and on PATH.

use autocoder_rag_rs::prelude::*;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("autocoder_rag_rs=info")
        .init();

    let doc_dir = std::env::args().nth(1).unwrap_or_else(|| ".".to_string());

    println!("📚 auto-coder.rag Basic Example");
    println!("===============================\n");

    let client = RagClient::new(&doc_dir)?;
    println!("✅ Client created for {}", client.doc_dir().display());

    if !client.check_availability().await {
        println!("❌ auto-coder.rag is not available");
        println!("   Make sure auto-coder is installed and the command is on PATH");
        return Ok(());
    }
    println!("   Version: {}", client.version().await?);

    let question = "Which Rust source files are in this directory?";
    println!("\n💬 Question: {}\n", question);

    match client.query(question, None).await {
        Ok(answer) => {
            let preview: String = answer.chars().take(200).collect();
            println!("📝 Answer: {}", preview);
            if answer.chars().count() > 200 {
                println!("   ...");
            }
        }
        Err(e) => eprintln!("❌ Query failed ({:?}): {}", e.kind(), e),
    }

    println!("\n👋 Done!");
    Ok(())
}
