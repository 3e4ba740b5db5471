//! Heuristic completion detection
//!
//! An interactive shell never reports when the typed command finished, so a
//! probe line echoing `$?` between unique markers is typed into the session
//! and the output is scanned for the expanded marker. The typed echo of the
//! probe carries a literal `$?` and never matches.

use super::{PtyInput, SessionFlags};
use crate::events::{BridgeEvent, Notifier, SessionId, SessionStatus};
use regex::Regex;
use std::sync::atomic::Ordering;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;
use uuid::Uuid;

static DONE_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"__SHELLHERD_DONE_([0-9a-f]+)_(\d+)__")
        .expect("DONE_MARKER is a compile-time constant")
});

/// Bytes of unmatched output kept to catch markers split across reads.
const TAIL_LIMIT: usize = 256;

/// Fresh per-session marker tag
pub(crate) fn new_tag() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

/// Shell line that prints the completion marker for `tag`
pub(crate) fn probe_line(tag: &str) -> String {
    format!("echo __SHELLHERD_DONE_{tag}_$?__\r")
}

/// Scans output for the completion marker of one session.
pub(crate) struct CompletionDetector {
    tag: String,
    tail: String,
}

impl CompletionDetector {
    pub(crate) fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            tail: String::new(),
        }
    }

    /// Feed one decoded chunk; returns the exit code once a marker is seen.
    pub(crate) fn feed(&mut self, chunk: &str) -> Option<i32> {
        self.tail.push_str(chunk);

        let code = DONE_MARKER
            .captures_iter(&self.tail)
            .find(|caps| &caps[1] == self.tag.as_str())
            .and_then(|caps| caps[2].parse().ok());
        if code.is_some() {
            self.tail.clear();
            return code;
        }

        if self.tail.len() > TAIL_LIMIT {
            let mut cut = self.tail.len() - TAIL_LIMIT;
            while !self.tail.is_char_boundary(cut) {
                cut += 1;
            }
            self.tail.drain(..cut);
        }
        None
    }
}

/// Emit `command-finished` for a detected exit code, at most once per
/// session and never after the session ended.
pub(crate) fn report_completion(
    session_id: &SessionId,
    code: i32,
    flags: &SessionFlags,
    notifier: &dyn Notifier,
) -> bool {
    if flags.ended.load(Ordering::SeqCst) || flags.completed.swap(true, Ordering::SeqCst) {
        return false;
    }
    let (status, exit_status) = SessionStatus::from_exit(Some(code), None);
    notifier.notify(BridgeEvent::CommandFinished {
        session_id: session_id.clone(),
        exit_code: Some(code),
        status: Some(status),
        exit_status: Some(exit_status),
    });
    true
}

/// Type the probe line after each delay unless the session no longer
/// wants probing.
pub(crate) async fn run_probes(
    session_id: SessionId,
    input: UnboundedSender<PtyInput>,
    flags: Arc<SessionFlags>,
    tag: String,
    delays: [Duration; 2],
) {
    for delay in delays {
        tokio::time::sleep(delay).await;
        if flags.probe_blocked() {
            debug!(session_id = %session_id, "Completion probe skipped");
            return;
        }
        if input
            .send(PtyInput::Data(probe_line(&tag).into_bytes()))
            .is_err()
        {
            return;
        }
    }
}

/// Decode as much of `pending` as forms complete UTF-8.
///
/// An incomplete sequence at the end stays buffered for the next read;
/// invalid bytes elsewhere are replaced.
pub(crate) fn take_utf8(pending: &mut Vec<u8>) -> String {
    match std::str::from_utf8(pending.as_slice()) {
        Ok(text) => {
            let text = text.to_string();
            pending.clear();
            text
        }
        Err(e) if e.error_len().is_none() => {
            let valid = e.valid_up_to();
            let text = String::from_utf8_lossy(&pending[..valid]).into_owned();
            pending.drain(..valid);
            text
        }
        Err(_) => {
            let text = String::from_utf8_lossy(pending).into_owned();
            pending.clear();
            text
        }
    }
}
