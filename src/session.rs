//! Process lifecycle and stdio pumping for auto-coder.rag invocations.
//!
//! Every query owns its own child process. Three flows run concurrently so a
//! tool that reads its input lazily while already writing output never stalls:
//!
//! 1. the question is written to stdin on a dedicated task, then stdin is closed;
//! 2. stderr is drained into a buffer on another task;
//! 3. stdout is read line by line and published to a bounded channel.
//!
//! Streaming consumers receive a [`QueryStream`]: the ordered items, then at
//! most one error once the items are exhausted.

use std::io;
use std::pin::Pin;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::command::CommandSpec;
use crate::error::{RagClientError, Result};
use crate::message::{parse_line, ProtocolMessage};

/// Capacity of the ordered result channel.
pub const RESULT_CHANNEL_CAPACITY: usize = 100;

/// How long to wait for stderr once stdout is done.
const STDERR_GRACE: Duration = Duration::from_secs(2);

/// Ordered items from a running query, followed by at most one error.
#[derive(Debug)]
pub struct QueryStream<T> {
    items: mpsc::Receiver<T>,
    errors: mpsc::Receiver<RagClientError>,
    skipped: Arc<AtomicUsize>,
}

/// Raw stdout lines.
pub type LineStream = QueryStream<String>;

/// Decoded protocol messages; malformed lines are dropped.
pub type MessageStream = QueryStream<ProtocolMessage>;

impl<T> QueryStream<T> {
    /// Next item, then the terminal error if any, then `None`.
    pub async fn next(&mut self) -> Option<Result<T>> {
        match self.items.recv().await {
            Some(item) => Some(Ok(item)),
            None => self.errors.recv().await.map(Err),
        }
    }

    /// Split into the result channel and the single-slot error channel.
    pub fn into_channels(self) -> (mpsc::Receiver<T>, mpsc::Receiver<RagClientError>) {
        (self.items, self.errors)
    }

    /// Lines that were not valid protocol messages and were skipped.
    pub fn skipped_lines(&self) -> usize {
        self.skipped.load(Ordering::Relaxed)
    }
}

impl LineStream {
    /// Drain the stream into one string, each line terminated by `\n`.
    pub async fn collect_text(mut self) -> Result<String> {
        let mut buffer = String::new();
        while let Some(line) = self.next().await {
            buffer.push_str(&line?);
            buffer.push('\n');
        }
        Ok(buffer)
    }
}

impl<T> Stream for QueryStream<T> {
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.items.poll_recv(cx) {
            Poll::Ready(Some(item)) => Poll::Ready(Some(Ok(item))),
            Poll::Ready(None) => this.errors.poll_recv(cx).map(|e| e.map(Err)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Start a query whose stdout is exposed line by line.
pub(crate) fn stream_lines(spec: CommandSpec, question: String, timeout: Duration) -> LineStream {
    spawn_stream(spec, question, timeout, Arc::default(), Some)
}

/// Start a query whose stdout is decoded as protocol messages.
pub(crate) fn stream_messages(spec: CommandSpec, question: String, timeout: Duration) -> MessageStream {
    let skipped = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&skipped);

    spawn_stream(spec, question, timeout, skipped, move |line| match parse_line(&line) {
        None => None,
        Some(Ok(message)) => Some(message),
        Some(Err(e)) => {
            counter.fetch_add(1, Ordering::Relaxed);
            debug!(error = %e, line = %preview(&line), "skipping malformed protocol line");
            None
        }
    })
}

fn spawn_stream<T, F>(
    spec: CommandSpec,
    question: String,
    timeout: Duration,
    skipped: Arc<AtomicUsize>,
    decode: F,
) -> QueryStream<T>
where
    T: Send + 'static,
    F: FnMut(String) -> Option<T> + Send + 'static,
{
    let (item_tx, item_rx) = mpsc::channel(RESULT_CHANNEL_CAPACITY);
    let (error_tx, error_rx) = mpsc::channel(1);
    let counter = Arc::clone(&skipped);

    tokio::spawn(async move {
        let result = pump(&spec, question, timeout, decode, &item_tx).await;
        let skipped_lines = counter.load(Ordering::Relaxed);
        if skipped_lines > 0 {
            debug!(skipped_lines, "protocol stream finished with skipped lines");
        }
        if let Err(e) = result {
            // Items first: the consumer sees the error only after the result channel closes.
            drop(item_tx);
            let _ = error_tx.send(e).await;
        }
    });

    QueryStream {
        items: item_rx,
        errors: error_rx,
        skipped,
    }
}

enum PumpEnd {
    Exited(ExitStatus),
    ConsumerGone,
    TimedOut,
}

async fn pump<T, F>(
    spec: &CommandSpec,
    question: String,
    timeout: Duration,
    mut decode: F,
    tx: &mpsc::Sender<T>,
) -> Result<()>
where
    F: FnMut(String) -> Option<T>,
{
    let mut child = spawn_child(spec)?;

    let stdout = child.stdout.take().ok_or_else(|| {
        RagClientError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "failed to capture stdout"))
    })?;
    let _writer = tokio::spawn(write_stdin(child.stdin.take(), question));
    let stderr_task = tokio::spawn(read_all(child.stderr.take()));

    let pumped: io::Result<PumpEnd> = async {
        let mut segments = BufReader::new(stdout).split(b'\n');
        let mut deadline = Instant::now() + timeout;
        let mut published = 0usize;

        loop {
            let segment = tokio::select! {
                segment = tokio::time::timeout_at(deadline, segments.next_segment()) => match segment {
                    Ok(Ok(segment)) => segment,
                    Ok(Err(e)) => return Err(e),
                    Err(_) => return Ok(PumpEnd::TimedOut),
                },
                _ = tx.closed() => return Ok(PumpEnd::ConsumerGone),
            };
            let Some(segment) = segment else {
                break;
            };

            if let Some(item) = decode(decode_line(&segment)) {
                let blocked = Instant::now();
                if tx.send(item).await.is_err() {
                    return Ok(PumpEnd::ConsumerGone);
                }
                // Time spent waiting on a slow consumer does not count against the deadline.
                deadline += blocked.elapsed();
                published += 1;
            }
        }

        debug!(published, "stdout exhausted, waiting for process");
        match tokio::time::timeout_at(deadline, child.wait()).await {
            Ok(status) => status.map(PumpEnd::Exited),
            Err(_) => Ok(PumpEnd::TimedOut),
        }
    }
    .await;

    match pumped {
        Ok(PumpEnd::Exited(status)) => {
            let stderr = collect_stderr(stderr_task).await;
            if status.success() {
                debug!(status = %status, "auto-coder.rag stream completed");
                return Ok(());
            }

            error!(status = %status, stderr = %stderr.trim(), "auto-coder.rag stream failed");
            let mut output = format!(
                "command failed (exit code: {}, command: {})",
                status.code().map_or_else(|| "signal".to_string(), |c| c.to_string()),
                spec.program_name()
            );
            if !stderr.trim().is_empty() {
                output.push_str("\nstderr: ");
                output.push_str(stderr.trim());
            }
            Err(RagClientError::ProcessFailed {
                exit_code: status.code(),
                output,
            })
        }
        Ok(PumpEnd::ConsumerGone) => {
            debug!("stream consumer dropped, killing auto-coder.rag");
            let _ = child.kill().await;
            stderr_task.abort();
            Ok(())
        }
        Ok(PumpEnd::TimedOut) => {
            warn!(timeout_secs = timeout.as_secs(), "auto-coder.rag stream timed out");
            let _ = child.kill().await;
            let stderr = collect_stderr(stderr_task).await;
            Err(RagClientError::Timeout {
                seconds: timeout.as_secs(),
                output: stderr.trim().to_string(),
            })
        }
        Err(io_err) => {
            error!(error = %io_err, "failed reading auto-coder.rag output");
            let _ = child.kill().await;
            stderr_task.abort();
            Err(RagClientError::Io(io_err))
        }
    }
}

/// Decode one stdout line, dropping a trailing `\r`. Invalid UTF-8 is replaced.
fn decode_line(segment: &[u8]) -> String {
    let segment = segment.strip_suffix(b"\r").unwrap_or(segment);
    String::from_utf8_lossy(segment).into_owned()
}

/// Captured result of a process run to completion.
#[derive(Debug)]
pub(crate) struct CapturedOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CapturedOutput {
    /// Stdout followed by stderr.
    pub fn combined(&self) -> String {
        let mut output = self.stdout.clone();
        output.push_str(&self.stderr);
        output
    }

    /// Turn a non-zero exit into [`RagClientError::ProcessFailed`].
    pub fn into_success(self) -> Result<Self> {
        if self.status.success() {
            Ok(self)
        } else {
            Err(RagClientError::ProcessFailed {
                exit_code: self.status.code(),
                output: self.combined(),
            })
        }
    }
}

/// Run a process to completion under a deadline, feeding `input` on stdin.
pub(crate) async fn run_to_completion(
    spec: &CommandSpec,
    input: Option<String>,
    timeout: Duration,
) -> Result<CapturedOutput> {
    debug!(program = %spec.program_name(), args = ?spec.args, "executing auto-coder.rag");

    let mut child = spawn_child(spec)?;
    let stdin = child.stdin.take();
    let _writer = tokio::spawn(async move {
        match input {
            Some(input) => write_stdin(stdin, input).await,
            None => drop(stdin),
        }
    });
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let mut stdout_buf = Vec::new();
    let mut stderr_buf = Vec::new();

    let result = tokio::time::timeout(timeout, async {
        tokio::try_join!(drain(stdout, &mut stdout_buf), drain(stderr, &mut stderr_buf))?;
        child.wait().await
    })
    .await;

    let stdout = String::from_utf8_lossy(&stdout_buf).into_owned();
    let stderr = String::from_utf8_lossy(&stderr_buf).into_owned();

    match result {
        Ok(Ok(status)) => {
            debug!(
                status = %status,
                stdout_len = stdout.len(),
                stderr_len = stderr.len(),
                "auto-coder.rag process completed"
            );
            Ok(CapturedOutput {
                status,
                stdout,
                stderr,
            })
        }
        Ok(Err(io_err)) => {
            error!(error = %io_err, "I/O error during auto-coder.rag execution");
            let _ = child.kill().await;
            Err(RagClientError::Io(io_err))
        }
        Err(_) => {
            warn!(
                timeout_secs = timeout.as_secs(),
                stdout_len = stdout.len(),
                stderr_len = stderr.len(),
                "auto-coder.rag request timed out"
            );
            let _ = child.kill().await;
            // Whatever was drained before the deadline.
            let mut output = stdout;
            output.push_str(&stderr);
            Err(RagClientError::Timeout {
                seconds: timeout.as_secs(),
                output: output.trim().to_string(),
            })
        }
    }
}

fn spawn_child(spec: &CommandSpec) -> Result<Child> {
    spec.to_command().spawn().map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            RagClientError::NotFound {
                binary: spec.program_name(),
            }
        } else {
            RagClientError::SpawnFailed(e)
        }
    })
}

async fn write_stdin(stdin: Option<ChildStdin>, input: String) {
    let Some(mut stdin) = stdin else {
        return;
    };
    if let Err(e) = stdin.write_all(input.as_bytes()).await {
        // The tool may exit without reading its input.
        debug!(error = %e, "failed to write question to stdin");
        return;
    }
    if let Err(e) = stdin.shutdown().await {
        debug!(error = %e, "failed to close stdin");
    }
}

/// Append everything from `pipe` to `buf`. Bytes already read stay in `buf`
/// if the future is dropped early.
async fn drain<R: AsyncRead + Unpin>(pipe: Option<R>, buf: &mut Vec<u8>) -> io::Result<()> {
    let Some(mut pipe) = pipe else {
        return Ok(());
    };
    let mut chunk = [0u8; 8192];
    loop {
        let n = pipe.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

async fn read_all<R: AsyncRead + Unpin>(pipe: Option<R>) -> io::Result<String> {
    let mut buf = Vec::new();
    drain(pipe, &mut buf).await?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

async fn collect_stderr(task: JoinHandle<io::Result<String>>) -> String {
    match tokio::time::timeout(STDERR_GRACE, task).await {
        Ok(Ok(Ok(stderr))) => stderr,
        _ => String::new(),
    }
}

fn preview(line: &str) -> &str {
    match line.char_indices().nth(200) {
        Some((idx, _)) => &line[..idx],
        None => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_of(items: Vec<&str>, error: Option<RagClientError>) -> LineStream {
        let (item_tx, items_rx) = mpsc::channel(RESULT_CHANNEL_CAPACITY);
        let (error_tx, errors_rx) = mpsc::channel(1);
        for item in items {
            item_tx.try_send(item.to_string()).unwrap();
        }
        if let Some(e) = error {
            error_tx.try_send(e).unwrap();
        }
        QueryStream {
            items: items_rx,
            errors: errors_rx,
            skipped: Arc::default(),
        }
    }

    #[tokio::test]
    async fn test_items_then_error() {
        let mut stream = stream_of(
            vec!["one", "two"],
            Some(RagClientError::ProcessFailed {
                exit_code: Some(2),
                output: String::new(),
            }),
        );
        assert_eq!(stream.next().await.unwrap().unwrap(), "one");
        assert_eq!(stream.next().await.unwrap().unwrap(), "two");
        let err = stream.next().await.unwrap().unwrap_err();
        assert_eq!(err.exit_code(), Some(2));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_collect_text() {
        let text = stream_of(vec!["a", "b"], None).collect_text().await.unwrap();
        assert_eq!(text, "a\nb\n");
    }

    #[tokio::test]
    async fn test_collect_text_error() {
        let err = stream_of(vec!["a"], Some(RagClientError::validation("x")))
            .collect_text()
            .await
            .unwrap_err();
        assert!(matches!(err, RagClientError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_stream_impl() {
        use futures::StreamExt;

        let collected: Vec<_> = stream_of(vec!["x", "y"], None)
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(collected, vec!["x", "y"]);
    }

    #[test]
    fn test_decode_line() {
        assert_eq!(decode_line(b"plain"), "plain");
        assert_eq!(decode_line(b"crlf\r"), "crlf");
        assert_eq!(decode_line(b"caf\xe9"), "caf\u{fffd}");
        assert_eq!(decode_line(b""), "");
    }

    #[test]
    fn test_preview_is_char_safe() {
        let long = "é".repeat(300);
        assert_eq!(preview(&long).chars().count(), 200);
        assert_eq!(preview("short"), "short");
    }
}
