//! Aggregate view for the tray: what the icon and tooltip should show.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::discovery::{DeviceId, DeviceInfo};
use crate::event::DeviceEvent;
use crate::snapshot::DeviceSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrayStatus {
    Idle,
    Active,
    Recording,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraySummary {
    pub status: TrayStatus,
    pub devices: usize,
    pub active_tuners: usize,
    pub recordings: usize,
}

impl TraySummary {
    pub fn tooltip(&self) -> String {
        if self.devices == 0 {
            return "No devices detected".to_string();
        }
        let plural = if self.active_tuners == 1 { "" } else { "s" };
        format!("{} active tuner{plural}", self.active_tuners)
    }
}

#[derive(Debug, Clone)]
pub struct BoardEntry {
    pub device: DeviceInfo,
    pub snapshot: Option<DeviceSnapshot>,
}

/// Latest known state of every device, maintained from poller events.
#[derive(Debug, Clone, Default)]
pub struct DeviceBoard {
    entries: BTreeMap<DeviceId, BoardEntry>,
}

impl DeviceBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: &DeviceEvent) {
        match event {
            DeviceEvent::DeviceDiscovered { device } => {
                self.entries.insert(
                    device.id.clone(),
                    BoardEntry {
                        device: device.clone(),
                        snapshot: None,
                    },
                );
            }
            DeviceEvent::DeviceUpdated {
                device_id,
                snapshot,
            } => {
                if let Some(entry) = self.entries.get_mut(device_id) {
                    entry.snapshot = Some(snapshot.clone());
                }
            }
            DeviceEvent::DeviceLost { device_id } => {
                self.entries.remove(device_id);
            }
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &BoardEntry> {
        self.entries.values()
    }

    pub fn get(&self, device_id: &DeviceId) -> Option<&BoardEntry> {
        self.entries.get(device_id)
    }

    pub fn summary(&self) -> TraySummary {
        let snapshots = self.entries.values().filter_map(|entry| entry.snapshot.as_ref());
        let (active_tuners, recordings) = snapshots.fold((0, 0), |(active, recordings), snapshot| {
            (
                active + snapshot.active_tuners(),
                recordings + snapshot.recordings.len(),
            )
        });

        let status = if recordings > 0 {
            TrayStatus::Recording
        } else if active_tuners > 0 {
            TrayStatus::Active
        } else {
            TrayStatus::Idle
        };

        TraySummary {
            status,
            devices: self.entries.len(),
            active_tuners,
            recordings,
        }
    }
}
