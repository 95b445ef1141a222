use std::ops::ControlFlow;

use tokio::sync::mpsc;

/// Deltas emitted by a streaming upstream call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamDelta {
    /// Incremental assistant text.
    Text { text: String },
    /// Stream completed cleanly.
    Done,
    /// Transport or upstream failure after streaming began.
    Error { message: String },
}

/// Parse a single SSE line: `event: <type>` or `data: <payload>`.
pub fn parse_sse_line(line: &str) -> Option<SseParsed> {
    if let Some(event_type) = line.strip_prefix("event: ") {
        Some(SseParsed::Event(event_type.to_string()))
    } else {
        line.strip_prefix("data: ")
            .map(|data| SseParsed::Data(data.to_string()))
    }
}

#[derive(Debug)]
pub enum SseParsed {
    Event(String),
    Data(String),
}

/// Drive a reqwest byte stream through an SSE line handler, forwarding the
/// deltas the handler produces.
///
/// Buffers partial lines across chunks; the handler receives each complete
/// trimmed non-empty line and returns the deltas to emit, or `Break` to
/// stop (e.g. on `[DONE]`). Transport errors are emitted as
/// `StreamDelta::Error`. The caller is responsible for the final `Done`.
pub async fn pump_sse_lines<F>(
    resp: reqwest::Response,
    tx: &mpsc::Sender<StreamDelta>,
    mut handle_line: F,
) where
    F: FnMut(&str) -> ControlFlow<(), Vec<StreamDelta>>,
{
    use futures_util::StreamExt;

    let mut line_buf = String::new();
    let mut byte_stream = resp.bytes_stream();

    while let Some(chunk) = byte_stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                let _ = tx
                    .send(StreamDelta::Error {
                        message: e.to_string(),
                    })
                    .await;
                return;
            }
        };

        let text = match std::str::from_utf8(&chunk) {
            Ok(t) => t,
            Err(_) => continue,
        };

        line_buf.push_str(text);
        let lines: Vec<&str> = line_buf.split('\n').collect();
        let (complete, remainder) = lines.split_at(lines.len() - 1);
        let remainder = remainder.first().unwrap_or(&"").to_string();

        for line in complete {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match handle_line(line) {
                ControlFlow::Continue(deltas) => {
                    for delta in deltas {
                        if tx.send(delta).await.is_err() {
                            return; // receiver dropped
                        }
                    }
                }
                ControlFlow::Break(()) => return,
            }
        }

        line_buf = remainder;
    }
}
