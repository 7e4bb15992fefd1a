//! Typed observer registry for probe mutations

use glam::Vec3;

use super::ProbeId;

/// Notification fired synchronously after a registry mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeEvent {
    /// A probe box moved or was resized
    VolumeChanged { id: ProbeId, center: Vec3, size: Vec3 },
    /// Probes were added, removed or replaced; carries the full id list
    SetChanged { ids: Vec<ProbeId> },
    /// The wall layout was replaced, cleared or had probes unassigned
    WallsChanged { wall_count: usize },
    /// A probe's radiance map was replaced or released; bind groups holding
    /// the previous texture are stale
    RadianceChanged { id: ProbeId },
}

impl ProbeEvent {
    /// Whether the event can change which probes a surface binds.
    pub fn affects_assignment(&self) -> bool {
        !matches!(self, ProbeEvent::RadianceChanged { .. })
    }
}

/// Handle returned by [`ProbeObservers::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub type ProbeObserver = Box<dyn FnMut(&ProbeEvent) + Send + Sync>;

/// Callbacks in subscription order.
#[derive(Default)]
pub struct ProbeObservers {
    next_id: u64,
    observers: Vec<(SubscriptionId, ProbeObserver)>,
}

impl ProbeObservers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, observer: ProbeObserver) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.observers.push((id, observer));
        id
    }

    /// Returns false when the subscription was already gone.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(sub, _)| *sub != id);
        self.observers.len() != before
    }

    pub fn emit(&mut self, event: &ProbeEvent) {
        log::trace!("Probe event {:?} -> {} observer(s)", event, self.observers.len());
        for (_, observer) in self.observers.iter_mut() {
            observer(event);
        }
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl std::fmt::Debug for ProbeObservers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeObservers")
            .field("count", &self.observers.len())
            .finish()
    }
}
