use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::discovery::DeviceKind;
use crate::error::Error;
use crate::recording::Recording;
use crate::status::StatusObject;
use crate::tuner::Tuner;

/// Parsed state of one device at one poll instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceSnapshot {
    pub ts: DateTime<Utc>,
    pub tuners: Vec<Tuner>,
    pub recordings: Vec<Recording>,
}

impl DeviceSnapshot {
    /// Builds a snapshot from a status document.
    ///
    /// The document is either an object carrying `Tuners` and `Recordings`
    /// arrays, or a bare array as served by the firmware itself, read as
    /// tuners or recordings depending on `kind`. Entries that fail to parse
    /// are skipped; only an unusable document is an error.
    pub fn from_document(document: &Value, kind: DeviceKind, ts: DateTime<Utc>) -> Result<Self, Error> {
        let none: &[Value] = &[];
        let (tuner_entries, recording_entries) = match document {
            Value::Array(entries) => match kind {
                DeviceKind::Tuner => (entries.as_slice(), none),
                DeviceKind::Storage => (none, entries.as_slice()),
            },
            _ => {
                let object = StatusObject::new(document, "status document")?;
                (object.array("Tuners")?, object.array("Recordings")?)
            }
        };

        Ok(Self {
            ts,
            tuners: parse_entries(tuner_entries, Tuner::from_json),
            recordings: parse_entries(recording_entries, Recording::from_json),
        })
    }

    /// Equal device state, ignoring when each snapshot was taken.
    pub fn same_state(&self, other: &Self) -> bool {
        self.tuners == other.tuners && self.recordings == other.recordings
    }

    pub fn active_tuners(&self) -> usize {
        self.tuners.iter().filter(|tuner| tuner.is_active()).count()
    }
}

fn parse_entries<T>(entries: &[Value], parse: fn(&Value) -> Result<T, Error>) -> Vec<T> {
    entries
        .iter()
        .enumerate()
        .filter_map(|(position, entry)| match parse(entry) {
            Ok(item) => Some(item),
            Err(err) => {
                warn!(position, error = %err, "skipping status entry");
                None
            }
        })
        .collect()
}
