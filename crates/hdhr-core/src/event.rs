use serde::Serialize;

use crate::discovery::{DeviceId, DeviceInfo};
use crate::snapshot::DeviceSnapshot;

/// Notifications for the UI. Events for one device arrive in poll order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DeviceEvent {
    DeviceDiscovered {
        device: DeviceInfo,
    },
    DeviceUpdated {
        device_id: DeviceId,
        snapshot: DeviceSnapshot,
    },
    DeviceLost {
        device_id: DeviceId,
    },
}

impl DeviceEvent {
    pub fn device_id(&self) -> &DeviceId {
        match self {
            Self::DeviceDiscovered { device } => &device.id,
            Self::DeviceUpdated { device_id, .. } | Self::DeviceLost { device_id } => device_id,
        }
    }
}
