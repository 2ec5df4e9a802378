use std::io::Write;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};

/// Append-only JSON-lines sink for snatch and transfer events, rotated
/// daily. Only compiled in behind the `event_log` feature; when the feature
/// is off the announce engine simply has no sink to write to.
pub struct EventLog {
    writer: Mutex<non_blocking::NonBlocking>,
    _guard: WorkerGuard,
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event<'a> {
    Snatch {
        user_id: u32,
        torrent_id: u32,
        at: DateTime<Utc>,
    },
    Transfer {
        user_id: u32,
        torrent_id: u32,
        uploaded_delta: u64,
        downloaded_delta: u64,
        at: DateTime<Utc>,
        #[serde(skip_serializing_if = "Option::is_none")]
        agent: Option<&'a str>,
    },
}

impl EventLog {
    pub fn new(directory: &str) -> Result<EventLog> {
        let appender = rolling::daily(directory, "events.jsonl");
        let (writer, guard) = non_blocking(appender);

        Ok(EventLog {
            writer: Mutex::new(writer),
            _guard: guard,
        })
    }

    pub fn record(&self, event: &Event) {
        let Ok(mut line) = serde_json::to_vec(event) else {
            tracing::warn!("failed to serialize event log entry");
            return;
        };

        line.push(b'\n');

        if let Err(err) = self.writer.lock().write_all(&line) {
            tracing::warn!(error = %err, "failed writing to event log");
        }
    }
}

pub fn flush(log: &Option<EventLog>) -> Result<()> {
    if let Some(log) = log {
        log.writer
            .lock()
            .flush()
            .context("failed flushing event log on shutdown")?;
    }

    Ok(())
}
