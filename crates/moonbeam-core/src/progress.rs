//! Progress events streamed from a generation job to the caller

use serde::Serialize;
use std::path::PathBuf;
use uuid::Uuid;

/// Severity / role of a progress event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    Info,
    Error,
    Done,
    Cancelled,
}

impl ProgressKind {
    /// Whether this event ends its job's stream
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Info)
    }
}

/// One line of user-visible feedback for a job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub job_id: Uuid,
    pub kind: ProgressKind,
    pub message: String,
    /// Set on `Done`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    /// Error code on `Error` and `Cancelled`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
}

impl ProgressEvent {
    pub fn info(job_id: Uuid, message: impl Into<String>) -> Self {
        Self {
            job_id,
            kind: ProgressKind::Info,
            message: message.into(),
            output_path: None,
            code: None,
        }
    }

    pub fn error(job_id: Uuid, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            job_id,
            kind: ProgressKind::Error,
            message: message.into(),
            output_path: None,
            code: Some(code),
        }
    }

    pub fn done(job_id: Uuid, output_path: PathBuf) -> Self {
        Self {
            job_id,
            kind: ProgressKind::Done,
            message: format!("Generated MIDI file: {}", output_path.display()),
            output_path: Some(output_path),
            code: None,
        }
    }

    pub fn cancelled(job_id: Uuid, message: impl Into<String>) -> Self {
        Self {
            job_id,
            kind: ProgressKind::Cancelled,
            message: message.into(),
            output_path: None,
            code: Some("GENERATION_CANCELLED"),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }

    /// One-line JSON rendering, for machine-readable progress streams
    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"job_id":"{}","kind":"error","message":"unserializable event: {}"}}"#, self.job_id, e)
        })
    }
}

/// Receives progress events in emission order
///
/// Called from the engine's delivery task, never from the caller's thread.
pub trait ProgressSink: Send + Sync + 'static {
    fn deliver(&self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent) + Send + Sync + 'static,
{
    fn deliver(&self, event: ProgressEvent) {
        self(event)
    }
}

impl ProgressSink for tokio::sync::mpsc::UnboundedSender<ProgressEvent> {
    fn deliver(&self, event: ProgressEvent) {
        // A dropped receiver means nobody is listening any more
        let _ = self.send(event);
    }
}

impl ProgressSink for std::sync::mpsc::Sender<ProgressEvent> {
    fn deliver(&self, event: ProgressEvent) {
        let _ = self.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_kinds() {
        assert!(!ProgressKind::Info.is_terminal());
        assert!(ProgressKind::Error.is_terminal());
        assert!(ProgressKind::Done.is_terminal());
        assert!(ProgressKind::Cancelled.is_terminal());
    }

    #[test]
    fn test_event_json_shape() {
        let id = Uuid::nil();
        let json = serde_json::to_value(ProgressEvent::done(id, PathBuf::from("/tmp/a_generated.mid"))).unwrap();
        assert_eq!(json["kind"], "done");
        assert_eq!(json["output_path"], "/tmp/a_generated.mid");
        assert!(json.get("code").is_none());

        let line = ProgressEvent::info(id, "Running inference...").to_json_line();
        assert!(!line.contains('\n'));
        let json: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(json["kind"], "info");
        assert!(json.get("output_path").is_none());
    }

    #[test]
    fn test_std_channel_sink() {
        let (tx, rx) = std::sync::mpsc::channel();
        tx.deliver(ProgressEvent::info(Uuid::nil(), "one"));
        tx.deliver(ProgressEvent::info(Uuid::nil(), "two"));
        let messages: Vec<_> = rx.try_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["one", "two"]);
    }
}
