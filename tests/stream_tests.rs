//! Streaming lines and protocol messages against a fake auto-coder.rag.

#![cfg(unix)]

mod common;

use std::time::Duration;

use autocoder_rag_rs::{ErrorKind, EventType, MessageEvent, OutputFormat, QueryOptions, TokenUsage};
use common::{builder, client, event, fake_tool, print_lines};
use futures::StreamExt;
use serde_json::json;

/// Fails unless the stream-json format was requested.
const REQUIRE_STREAM_JSON: &str = r#"case "$*" in
  *"--output_format stream-json"*) ;;
  *) echo "wrong output format: $*" >&2; exit 9 ;;
esac"#;

fn is_running(pid: &str) -> bool {
    std::process::Command::new("sh")
        .arg("-c")
        .arg(format!("kill -0 {pid} 2>/dev/null"))
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

fn stream_json_tool(lines: &[String]) -> common::FakeTool {
    fake_tool(&format!("{REQUIRE_STREAM_JSON}\n{}", print_lines(lines)))
}

#[tokio::test]
async fn test_stream_lines_in_order() {
    let tool = fake_tool(&print_lines(&["one".into(), "two".into(), "".into(), "three".into()]));
    let mut stream = client(&tool).query_stream("q", None);

    let mut lines = Vec::new();
    while let Some(line) = stream.next().await {
        lines.push(line.unwrap());
    }
    assert_eq!(lines, vec!["one", "two", "", "three"]);
}

#[tokio::test]
async fn test_stream_lines_error_after_output() {
    let tool = fake_tool("cat > /dev/null; echo partial; echo 'index missing' >&2; exit 2");
    let mut stream = client(&tool).query_stream("q", None);

    assert_eq!(stream.next().await.unwrap().unwrap(), "partial");
    let err = stream.next().await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Execution);
    assert_eq!(err.exit_code(), Some(2));
    assert!(err.output().unwrap().contains("index missing"));
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_stream_lines_channels() {
    let tool = fake_tool(&print_lines(&["a".into(), "b".into()]));
    let (mut items, mut errors) = client(&tool).query_stream("q", None).into_channels();

    let mut lines = Vec::new();
    while let Some(line) = items.recv().await {
        lines.push(line);
    }
    assert_eq!(lines, vec!["a", "b"]);
    assert!(errors.recv().await.is_none());
}

#[tokio::test]
async fn test_collect_text() {
    let tool = fake_tool(&print_lines(&["first".into(), "second".into()]));
    let text = client(&tool).query_stream("q", None).collect_text().await.unwrap();
    assert_eq!(text, "first\nsecond\n");
}

#[tokio::test]
async fn test_stream_question_is_delivered() {
    let tool = fake_tool(r#"q=$(cat); echo "got: $q""#);
    let text = client(&tool)
        .query_stream("streamed question", None)
        .collect_text()
        .await
        .unwrap();
    assert_eq!(text, "got: streamed question\n");
}

#[tokio::test]
async fn test_stream_timeout() {
    let tool = fake_tool("echo first; exec sleep 30");
    let client = builder(&tool).timeout(Duration::from_millis(500)).build().unwrap();
    let mut stream = client.query_stream("q", None);

    assert_eq!(stream.next().await.unwrap().unwrap(), "first");
    let err = stream.next().await.unwrap().unwrap_err();
    assert!(err.is_timeout());
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_stream_missing_binary() {
    let tool = fake_tool("exit 0");
    let client = builder(&tool)
        .binary_path(tool.root.path().join("absent"))
        .build()
        .unwrap();
    let mut stream = client.query_stream("q", None);

    let err = stream.next().await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Rag);
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_messages_force_stream_json() {
    let tool = stream_json_tool(&[event("content", r#"{"content":"hi"}"#)]);
    let options = QueryOptions::new().output_format(OutputFormat::Text);

    let messages: Vec<_> = client(&tool)
        .query_stream_messages("q", Some(&options))
        .collect()
        .await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].as_ref().unwrap().content(), Some("hi"));
}

#[tokio::test]
async fn test_messages_skip_malformed_lines() {
    let valid = vec![
        event("start", r#"{"message":"starting"}"#),
        event("stage", r#"{"type":"retrieval","message":"Searching documents"}"#),
        event("content", r#"{"content":"Hello"}"#),
        event("end", r#"{"metadata":{"status":"ok"}}"#),
    ];
    let mut noisy = valid.clone();
    noisy.insert(1, "{not json".to_string());
    noisy.insert(3, "   ".to_string());
    noisy.insert(4, "INFO loading index".to_string());

    let clean_tool = stream_json_tool(&valid);
    let noisy_tool = stream_json_tool(&noisy);

    let clean: Vec<_> = client(&clean_tool)
        .query_stream_messages("q", None)
        .map(|m| m.unwrap())
        .collect()
        .await;

    let mut stream = client(&noisy_tool).query_stream_messages("q", None);
    let mut from_noisy = Vec::new();
    while let Some(message) = stream.next().await {
        from_noisy.push(message.unwrap());
    }

    assert_eq!(clean, from_noisy);
    assert_eq!(stream.skipped_lines(), 2);
    let kinds: Vec<EventType> = from_noisy.iter().map(|m| m.event_type()).collect();
    assert_eq!(
        kinds,
        vec![EventType::Start, EventType::Stage, EventType::Content, EventType::End]
    );
    match &from_noisy[1].event {
        MessageEvent::Stage(stage) => {
            assert_eq!(stage.stage_type, "retrieval");
            assert_eq!(stage.message, "Searching documents");
        }
        other => panic!("expected stage, got {other:?}"),
    }
}

#[tokio::test]
async fn test_collect_messages() {
    let tool = stream_json_tool(&[
        event("start", "{}"),
        event("content", r#"{"content":"a"}"#),
        event("contexts", r#"{"contexts":["doc1 chunk","doc2 chunk"]}"#),
        event("content", r#"{"content":"b"}"#),
        event("stage", r#"{"type":"generation","message":"done","tokens":{"input":5,"generated":2}}"#),
        event("contexts", r#"{"contexts":["doc3 chunk"]}"#),
        event("end", r#"{"metadata":{"model":"v3_chat","elapsed":1.5}}"#),
    ]);

    let response = client(&tool).query_collect_messages("q", None).await.unwrap();
    assert!(response.success);
    assert_eq!(response.answer, "ab");
    assert_eq!(response.contexts, vec!["doc1 chunk", "doc2 chunk", "doc3 chunk"]);
    assert_eq!(response.tokens, TokenUsage::new(5, 2));
    assert_eq!(response.metadata["model"], json!("v3_chat"));
    assert!(response.error.is_none());
}

#[tokio::test]
async fn test_collect_messages_fails_on_exit_code() {
    let tool = fake_tool(&format!(
        "{}\nexit 4",
        print_lines(&[event("content", r#"{"content":"partial"}"#)])
    ));

    let err = client(&tool).query_collect_messages("q", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Execution);
    assert_eq!(err.exit_code(), Some(4));
}

#[tokio::test]
async fn test_collect_messages_tolerates_odd_token_counts() {
    let tool = stream_json_tool(&[
        event("content", r#"{"content":"a","tokens":{"input":3,"generated":1}}"#),
        event("content", r#"{"content":"b","tokens":{"input":1.0,"generated":0}}"#),
        event("content", r#"{"content":"c","tokens":"n/a"}"#),
        event("end", r#"{"metadata":{}}"#),
    ]);

    let response = client(&tool).query_collect_messages("q", None).await.unwrap();
    assert_eq!(response.answer, "abc");
    assert_eq!(response.tokens, TokenUsage::new(3, 1));
}

#[tokio::test]
async fn test_stream_lines_invalid_utf8() {
    let tool = fake_tool(r"cat > /dev/null; printf 'first\ncaf\351\nthird\r\nfourth\n'");
    let mut stream = client(&tool).query_stream("q", None);

    let mut lines = Vec::new();
    while let Some(line) = stream.next().await {
        lines.push(line.unwrap());
    }
    assert_eq!(lines, vec!["first", "caf\u{fffd}", "third", "fourth"]);
}

#[tokio::test]
async fn test_slow_consumer_does_not_trip_deadline() {
    let tool = fake_tool(
        "cat > /dev/null; i=0; while [ $i -lt 150 ]; do echo line$i; i=$((i+1)); done",
    );
    let client = builder(&tool).timeout(Duration::from_millis(300)).build().unwrap();
    let mut stream = client.query_stream("q", None);

    assert_eq!(stream.next().await.unwrap().unwrap(), "line0");
    // The pump is blocked on a full channel while we sleep.
    tokio::time::sleep(Duration::from_millis(600)).await;

    let mut count = 1;
    while let Some(line) = stream.next().await {
        line.unwrap();
        count += 1;
    }
    assert_eq!(count, 150);
}

#[tokio::test]
async fn test_dropping_stream_stops_process() {
    let tool = fake_tool("");
    let pid_file = tool.root.path().join("tool.pid");
    std::fs::write(
        &tool.binary,
        format!("#!/bin/sh\necho $$ > '{}'\necho ready\nexec sleep 30\n", pid_file.display()),
    )
    .unwrap();

    let mut stream = client(&tool).query_stream("q", None);
    assert_eq!(stream.next().await.unwrap().unwrap(), "ready");
    let pid = std::fs::read_to_string(&pid_file).unwrap().trim().to_string();
    assert!(is_running(&pid));

    drop(stream);

    let mut alive = true;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if !is_running(&pid) {
            alive = false;
            break;
        }
    }
    assert!(!alive, "auto-coder.rag (pid {pid}) still running after the stream was dropped");
}
