use serde::Serialize;
use serde_json::Value;

use crate::error::Error;
use crate::status::StatusObject;

const INDEX_FIELDS: &[&str] = &["Resource", "Index"];
const FREQUENCY_FIELDS: &[&str] = &["Frequency", "VctNumber"];
const TARGET_IP_FIELD: &str = "TargetIP";

/// One tuner of a device as of a single poll.
///
/// A tuner counts as active when the device reports a tuned frequency or a
/// client receiving its stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tuner {
    index: Option<u32>,
    active: bool,
    frequency: u64,
    target_ip: String,
}

impl Tuner {
    pub fn new(index: Option<u32>, frequency: u64, target_ip: impl Into<String>) -> Self {
        let target_ip = target_ip.into();
        Self {
            index,
            active: frequency != 0 || !target_ip.is_empty(),
            frequency,
            target_ip,
        }
    }

    pub fn from_json(entry: &Value) -> Result<Self, Error> {
        let object = StatusObject::new(entry, "tuner entry")?;

        let index = object.index(INDEX_FIELDS);
        let frequency = object.unsigned(FREQUENCY_FIELDS)?;
        let target_ip = object.string(TARGET_IP_FIELD)?;

        Ok(Self::new(index, frequency, target_ip))
    }

    pub fn index(&self) -> Option<u32> {
        self.index
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Tuned frequency in Hz, `0` when idle.
    pub fn frequency(&self) -> u64 {
        self.frequency
    }

    pub fn target_ip(&self) -> &str {
        &self.target_ip
    }
}
