//! Probe volumes, the registry that owns them, and their interchange formats

mod events;
mod interchange;
mod registry;
mod volume;
mod walls;

pub use events::{ProbeEvent, ProbeObserver, ProbeObservers, SubscriptionId};
pub use interchange::{ProbeRecord, ProbeSet, PROBE_SCHEMA_TAG};
pub use registry::ProbeRegistry;
pub use volume::{ProbeId, ProbeResolution, ProbeVolume, MIN_PROBE_EXTENT};
pub use walls::{verify_walls, WallLayout, WallSegment, WallsDocument, UNASSIGNED_PROBE};
