//! Common Test Utilities
//!
//! Fake `auto-coder.rag` executables staged in temporary directories, so the
//! client can be exercised end to end without the real tool.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use autocoder_rag_rs::{RagClient, RagClientBuilder};
use tempfile::TempDir;

// =============================================================================
// Fake Tool Fixtures
// =============================================================================

/// A shell script standing in for auto-coder.rag, plus a document directory.
/// Keep the value alive for as long as the paths are used.
pub struct FakeTool {
    pub root: TempDir,
    pub binary: PathBuf,
    pub docs: PathBuf,
}

/// Create a fake tool whose body is run by `/bin/sh`.
pub fn fake_tool(body: &str) -> FakeTool {
    let root = TempDir::new().expect("Failed to create temp directory");
    let docs = root.path().join("docs");
    std::fs::create_dir(&docs).expect("Failed to create docs directory");
    std::fs::write(docs.join("readme.md"), "# Docs\n").expect("Failed to write document");

    let binary = root.path().join("auto-coder.rag");
    std::fs::write(&binary, format!("#!/bin/sh\n{body}\n")).expect("Failed to write fake tool");
    std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755))
        .expect("Failed to chmod fake tool");

    FakeTool { root, binary, docs }
}

/// Builder pointed at the fake tool and its document directory.
pub fn builder(tool: &FakeTool) -> RagClientBuilder {
    RagClientBuilder::new(&tool.docs).binary_path(&tool.binary)
}

/// Client with default settings over the fake tool.
pub fn client(tool: &FakeTool) -> RagClient {
    builder(tool).build().expect("Failed to build client")
}

/// One stream-json line.
pub fn event(event_type: &str, data: &str) -> String {
    format!(r#"{{"event_type":"{event_type}","timestamp":"2025-01-01T12:00:00Z","data":{data}}}"#)
}

/// Script body that swallows stdin, then prints `lines` verbatim.
pub fn print_lines(lines: &[String]) -> String {
    format!("cat > /dev/null\ncat <<'EOF'\n{}\nEOF", lines.join("\n"))
}
