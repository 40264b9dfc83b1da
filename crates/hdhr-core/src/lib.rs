pub mod clock;
pub mod config;
pub mod discovery;
pub mod error;
pub mod event;
pub mod fetch;
pub mod poller;
pub mod recording;
pub mod snapshot;
pub mod status;
pub mod summary;
pub mod tuner;


pub use clock::{Clock, SystemClock};
pub use config::PollerConfig;
pub use discovery::{
    BroadcastDiscoverer, DeviceId, DeviceInfo, DeviceKind, Discoverer, HttpDiscoverer,
    DEFAULT_DISCOVER_URL,
};
pub use error::Error;
pub use event::DeviceEvent;
pub use fetch::{HttpStatusFetcher, StatusFetcher};
pub use poller::{fetch_snapshot, DeviceTracker, PollState, Poller};
pub use recording::Recording;
pub use snapshot::DeviceSnapshot;
pub use summary::{BoardEntry, DeviceBoard, TrayStatus, TraySummary};
pub use tuner::Tuner;
