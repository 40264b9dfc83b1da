use serde::Serialize;
use serde_json::Value;

use crate::error::Error;
use crate::status::StatusObject;

/// A recording in progress or queued on a storage device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recording {
    name: String,
}

impl Recording {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// The name is the only field read; an entry without one is still a
    /// recording.
    pub fn from_json(entry: &Value) -> Result<Self, Error> {
        let object = StatusObject::new(entry, "recording entry")?;
        Ok(Self::new(object.string("Name")?))
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
