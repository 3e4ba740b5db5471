use chrono::{DateTime, Utc};
use serde::Serialize;
use shellherd_tools::{BridgeEvent, OutputStream, ProcessState, SessionId, SessionStatus};
use std::collections::{HashMap, VecDeque};

/// Default bound on buffered output per session.
pub const DEFAULT_OUTPUT_LIMIT: usize = 256 * 1024;

/// Exit description used when a completion report carries none.
const COMMAND_COMPLETED: &str = "Command completed";

/// A buffered piece of session output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputChunk {
    /// Source stream
    pub stream: OutputStream,
    /// Text
    pub text: String,
}

/// Externally visible state of one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Session id
    pub id: SessionId,
    /// Command line, empty when the spawn was never observed
    pub command: String,
    /// Terminal columns
    pub cols: u16,
    /// Terminal rows
    pub rows: u16,
    /// Canonical status
    pub status: SessionStatus,
    /// Human-readable status description
    pub exit_status: Option<String>,
    /// Exit code of the process or command
    pub exit_code: Option<i32>,
    /// Processes observed by the last status update
    pub process_count: usize,
    /// Detail of those processes
    pub process_states: Vec<ProcessState>,
    /// Containers correlated with this session
    pub associated_containers: Vec<String>,
    /// Buffered output, oldest first
    pub output: VecDeque<OutputChunk>,
    /// When this run of the session was first observed
    pub spawned_at: DateTime<Utc>,
    /// Last change
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Fresh `pending_spawn` record
    #[must_use]
    pub fn new(id: SessionId, command: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            command: command.into(),
            cols: 80,
            rows: 24,
            status: SessionStatus::PendingSpawn,
            exit_status: None,
            exit_code: None,
            process_count: 0,
            process_states: Vec::new(),
            associated_containers: Vec::new(),
            output: VecDeque::new(),
            spawned_at: now,
            updated_at: now,
        }
    }

    /// All buffered output, stderr chunks marked
    #[must_use]
    pub fn display_text(&self) -> String {
        self.output
            .iter()
            .map(|chunk| match chunk.stream {
                OutputStream::Stdout => chunk.text.clone(),
                OutputStream::Stderr => format!("[stderr] {}", chunk.text),
            })
            .collect()
    }

    fn output_len(&self) -> usize {
        self.output.iter().map(|chunk| chunk.text.len()).sum()
    }
}

/// Reduces lifecycle events into per-session records.
///
/// Terminal statuses are sticky: once a session is done, errored, stopped
/// or timed out, only a completion report or a new spawn changes it.
#[derive(Debug)]
pub struct SessionStateReducer {
    sessions: HashMap<SessionId, SessionRecord>,
    output_limit: usize,
}

impl Default for SessionStateReducer {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateReducer {
    /// Create an empty reducer
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
            output_limit: DEFAULT_OUTPUT_LIMIT,
        }
    }

    /// Bound buffered output per session to `bytes`
    #[must_use]
    pub fn with_output_limit(mut self, bytes: usize) -> Self {
        self.output_limit = bytes;
        self
    }

    /// Apply one event. Returns the id of the record it changed.
    pub fn apply(&mut self, event: &BridgeEvent) -> Option<SessionId> {
        let changed = match event {
            BridgeEvent::SessionSpawn {
                session_id,
                command,
                cols,
                rows,
            } => self.on_spawn(session_id, command, *cols, *rows),
            BridgeEvent::PtyOutput {
                session_id,
                output,
                stream,
            } => {
                let limit = self.output_limit;
                let record = self.record_mut(session_id);
                record.output.push_back(OutputChunk {
                    stream: *stream,
                    text: output.clone(),
                });
                while record.output.len() > 1 && record.output_len() > limit {
                    record.output.pop_front();
                }
                true
            }
            BridgeEvent::ProcessStarted { session_id, .. } => {
                self.transition(session_id, |record| {
                    record.status = SessionStatus::Running;
                })
            }
            BridgeEvent::ProcessEnded {
                session_id,
                code,
                signal,
            } => self.transition(session_id, |record| {
                let (status, description) = SessionStatus::from_exit(*code, *signal);
                record.status = status;
                record.exit_status = Some(description);
                record.exit_code = *code;
            }),
            BridgeEvent::CommandFinished {
                session_id,
                exit_code,
                status,
                exit_status,
            } => {
                let record = self.record_mut(session_id);
                record.status = status.unwrap_or(SessionStatus::Done);
                record.exit_status =
                    Some(exit_status.clone().unwrap_or_else(|| COMMAND_COMPLETED.to_string()));
                record.exit_code = *exit_code;
                true
            }
            BridgeEvent::CommandStatusUpdate {
                session_id,
                overall_status,
                status_description,
                process_states,
                process_count,
            } => self.transition(session_id, |record| {
                record.status = *overall_status;
                record.exit_status = Some(status_description.clone());
                record.process_states = process_states.clone();
                record.process_count = *process_count;
            }),
            _ => return None,
        };

        if !changed {
            return None;
        }
        let id = event.session_key().map(SessionId::from)?;
        if let Some(record) = self.sessions.get_mut(&id) {
            record.updated_at = Utc::now();
        }
        Some(id)
    }

    fn on_spawn(&mut self, session_id: &SessionId, command: &str, cols: u16, rows: u16) -> bool {
        if let Some(existing) = self.sessions.get(session_id) {
            if !existing.status.is_terminal() && !existing.command.is_empty() {
                return false;
            }
        }
        let mut record = SessionRecord::new(session_id.clone(), command);
        record.cols = cols;
        record.rows = rows;
        self.sessions.insert(session_id.clone(), record);
        true
    }

    /// Apply `update` unless the record is in a terminal state.
    fn transition(&mut self, session_id: &SessionId, update: impl FnOnce(&mut SessionRecord)) -> bool {
        let record = self.record_mut(session_id);
        if record.status.is_terminal() {
            return false;
        }
        update(record);
        true
    }

    fn record_mut(&mut self, session_id: &SessionId) -> &mut SessionRecord {
        self.sessions
            .entry(session_id.clone())
            .or_insert_with(|| SessionRecord::new(session_id.clone(), String::new()))
    }

    /// Correlate a container with a session. Returns false for unknown ids.
    pub fn associate_container(&mut self, session_id: &SessionId, name: &str) -> bool {
        let Some(record) = self.sessions.get_mut(session_id) else {
            return false;
        };
        if !record.associated_containers.iter().any(|c| c == name) {
            record.associated_containers.push(name.to_string());
            record.updated_at = Utc::now();
        }
        true
    }

    /// Record for one session
    #[must_use]
    pub fn get(&self, session_id: &SessionId) -> Option<&SessionRecord> {
        self.sessions.get(session_id)
    }

    /// All records, in no particular order
    pub fn records(&self) -> impl Iterator<Item = &SessionRecord> {
        self.sessions.values()
    }

    /// Forget a session
    pub fn remove(&mut self, session_id: &SessionId) -> Option<SessionRecord> {
        self.sessions.remove(session_id)
    }
}
