//! Execution protocol over the sandbox's byte streams.
//!
//! Guest code is written to the sandbox's stdin, which is then closed to
//! signal end of input. The runtime image's wrapper executes the code and
//! emits newline-delimited JSON events on stdout:
//!
//! ```text
//! {"type":"text","data":"captured stdout or result repr"}
//! {"type":"error","data":"captured stderr or exception text"}
//! {"type":"image","data":"<base64-encoded PNG>"}
//! {"type":"end"}
//! ```
//!
//! The read loop consumes events until the `end` marker, end-of-stream, or
//! the execution deadline, whichever comes first. Deadline expiry interrupts
//! the read immediately and returns everything collected so far; the caller
//! owns teardown on every outcome.
//!
//! Malformed frames and a stream that ends without the marker are protocol
//! failures, distinct from timeouts and from guest-code errors (which arrive
//! as well-formed `error` events).

use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, instrument, trace};

use crate::error::ProtocolError;
use crate::sandbox::SandboxHandle;

/// One framed event from the sandbox's output stream.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RawEvent {
    /// Captured standard output or an expression result.
    Text {
        /// UTF-8 payload.
        data: String,
    },
    /// Captured standard error or a guest exception/traceback.
    Error {
        /// UTF-8 payload.
        data: String,
    },
    /// A rendered plot artifact.
    Image {
        /// Base64-encoded raster payload.
        data: String,
    },
    /// End-of-execution marker.
    End,
}

impl RawEvent {
    /// Payload size in bytes, for budget accounting.
    #[must_use]
    pub fn payload_len(&self) -> usize {
        match self {
            Self::Text { data } | Self::Error { data } | Self::Image { data } => data.len(),
            Self::End => 0,
        }
    }
}

/// Terminal status of one protocol run.
#[derive(Debug)]
pub enum RunStatus {
    /// The end-of-execution marker was observed.
    Completed,
    /// The deadline elapsed before the marker.
    TimedOut,
    /// The sandbox's output stream was malformed or truncated.
    Failed(ProtocolError),
}

/// Everything a protocol run produced.
#[derive(Debug)]
pub struct RunOutcome {
    /// Events in emission order, possibly partial.
    pub events: Vec<RawEvent>,
    /// How the run ended.
    pub status: RunStatus,
    /// True if reading stopped because the raw payload bytes passed the
    /// output budget. Folded into the result's truncation flag downstream.
    pub capped: bool,
}

/// Streams `code` into the sandbox and collects its output events.
///
/// Never fails outright: every outcome, including timeout and protocol
/// failure, carries the events collected so far. A write failure on stdin is
/// tolerated (the guest may have exited before reading its input) and the
/// read loop still runs. Reading stops early once cumulative payload bytes
/// pass `output_budget`, so a runaway guest cannot exhaust host memory ahead
/// of classification.
#[instrument(skip_all, fields(sandbox = %handle.name(), deadline_ms = %deadline.as_millis()))]
pub async fn run(
    handle: &mut SandboxHandle,
    code: &str,
    deadline: Duration,
    output_budget: usize,
) -> RunOutcome {
    let deadline_at = Instant::now() + deadline;
    let mut events = Vec::new();

    if let Some(mut stdin) = handle.take_stdin() {
        let write = async {
            stdin.write_all(code.as_bytes()).await?;
            stdin.shutdown().await
        };
        match timeout_at(deadline_at, write).await {
            Ok(Ok(())) => trace!(bytes = code.len(), "Guest code written"),
            Ok(Err(e)) => {
                // Guest may have exited before consuming input; whatever it
                // emitted is still collected below.
                debug!(error = %e, "Write to sandbox stdin failed, continuing");
            }
            Err(_) => {
                debug!("Deadline elapsed while writing guest code");
                return RunOutcome {
                    events,
                    status: RunStatus::TimedOut,
                    capped: false,
                };
            }
        }
    }

    let Some(stdout) = handle.take_stdout() else {
        return RunOutcome {
            events,
            status: RunStatus::Failed(ProtocolError::Framing(
                "sandbox output stream unavailable".to_string(),
            )),
            capped: false,
        };
    };

    let mut lines = BufReader::new(stdout).lines();
    let mut payload_bytes: usize = 0;

    loop {
        let line = match timeout_at(deadline_at, lines.next_line()).await {
            Err(_) => {
                debug!(events = events.len(), "Deadline elapsed, stopping read loop");
                return RunOutcome {
                    events,
                    status: RunStatus::TimedOut,
                    capped: false,
                };
            }
            Ok(Err(e)) => {
                return RunOutcome {
                    events,
                    status: RunStatus::Failed(ProtocolError::Io(e)),
                    capped: false,
                };
            }
            Ok(Ok(None)) => {
                return RunOutcome {
                    events,
                    status: RunStatus::Failed(ProtocolError::UnexpectedEof),
                    capped: false,
                };
            }
            Ok(Ok(Some(line))) => line,
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<RawEvent>(line) {
            Ok(RawEvent::End) => {
                trace!(events = events.len(), "End-of-execution marker observed");
                return RunOutcome {
                    events,
                    status: RunStatus::Completed,
                    capped: false,
                };
            }
            Ok(event) => {
                payload_bytes = payload_bytes.saturating_add(event.payload_len());
                events.push(event);
                if payload_bytes > output_budget {
                    debug!(payload_bytes, output_budget, "Raw output cap reached");
                    return RunOutcome {
                        events,
                        status: RunStatus::Completed,
                        capped: true,
                    };
                }
            }
            Err(e) => {
                return RunOutcome {
                    events,
                    status: RunStatus::Failed(ProtocolError::Framing(e.to_string())),
                    capped: false,
                };
            }
        }
    }
}
