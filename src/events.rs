//! Typed change notifications for the document tree.
//!
//! Every mutation of the model produces an [`Event`] at an origin entity.
//! How an event travels is fixed per kind by a static propagation table:
//! bubbling events are delivered at the origin and then at each ancestor up
//! to the document; spreading events are delivered at the origin and then at
//! every descendant. Subscribers register an [`EventFilter`] plus a callback
//! and receive [`Delivery`] records telling them where the event originated
//! and where it was observed.
//!
//! Callbacks may freely mutate the document, including adding and removing
//! other subscribers. The registry therefore hands callbacks out by value
//! for the duration of an invocation and puts them back afterwards; an entry
//! removed while its callback is checked out simply stays gone.

use std::fmt;

use crate::tree::{Document, EntityId, Role};
use crate::version::WdlVersion;

/// A change notification with its payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The entity's name changed; carries the previous name.
    NameChanged { previous: String },
    /// The entity's alias changed; carries the previous alias.
    AliasChanged { previous: Option<String> },
    /// A parameter's declared type changed.
    TypeChanged,
    /// A parameter's raw value text changed.
    ValueChanged,
    /// A task's command text changed.
    CommandChanged,
    /// The document language version changed.
    VersionChanged { version: WdlVersion },
    /// A call's resolved executable changed; carries the previous target.
    ExecutableChanged { previous: Option<EntityId> },
    /// A connection between two parameters was created.
    ParameterBind { source: EntityId, target: EntityId },
    /// A connection between two parameters was removed.
    ParameterUnbind { source: EntityId, target: EntityId },
    /// Members joined one of the origin's collections.
    MembersAdded { role: Role, members: Vec<EntityId> },
    /// Members left one of the origin's collections. Removal destroys the
    /// subtree before the queue flushes, so the carried ids may no longer
    /// resolve; they identify what left, not live entities.
    MembersRemoved { role: Role, members: Vec<EntityId> },
    /// Coarse marker that a collection changed in some way.
    MembersChanged { role: Role },
    /// The tree finished a mutation pass and identifiers were re-resolved.
    TreeChanged,
    /// Resolution outcomes changed somewhere in the tree.
    ValidationChanged,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::NameChanged { .. } => EventKind::NameChanged,
            Event::AliasChanged { .. } => EventKind::AliasChanged,
            Event::TypeChanged => EventKind::TypeChanged,
            Event::ValueChanged => EventKind::ValueChanged,
            Event::CommandChanged => EventKind::CommandChanged,
            Event::VersionChanged { .. } => EventKind::VersionChanged,
            Event::ExecutableChanged { .. } => EventKind::ExecutableChanged,
            Event::ParameterBind { .. } => EventKind::ParameterBind,
            Event::ParameterUnbind { .. } => EventKind::ParameterUnbind,
            Event::MembersAdded { .. } => EventKind::MembersAdded,
            Event::MembersRemoved { .. } => EventKind::MembersRemoved,
            Event::MembersChanged { .. } => EventKind::MembersChanged,
            Event::TreeChanged => EventKind::TreeChanged,
            Event::ValidationChanged => EventKind::ValidationChanged,
        }
    }

    pub fn propagation(&self) -> Propagation {
        self.kind().propagation()
    }
}

/// Discriminant of an [`Event`], used in filters and forward records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    NameChanged,
    AliasChanged,
    TypeChanged,
    ValueChanged,
    CommandChanged,
    VersionChanged,
    ExecutableChanged,
    ParameterBind,
    ParameterUnbind,
    MembersAdded,
    MembersRemoved,
    MembersChanged,
    TreeChanged,
    ValidationChanged,
}

impl EventKind {
    pub const ALL: [EventKind; 14] = [
        EventKind::NameChanged,
        EventKind::AliasChanged,
        EventKind::TypeChanged,
        EventKind::ValueChanged,
        EventKind::CommandChanged,
        EventKind::VersionChanged,
        EventKind::ExecutableChanged,
        EventKind::ParameterBind,
        EventKind::ParameterUnbind,
        EventKind::MembersAdded,
        EventKind::MembersRemoved,
        EventKind::MembersChanged,
        EventKind::TreeChanged,
        EventKind::ValidationChanged,
    ];

    /// How events of this kind travel through the tree.
    pub fn propagation(self) -> Propagation {
        match self {
            EventKind::VersionChanged | EventKind::TreeChanged | EventKind::ValidationChanged => {
                Propagation::Spread
            }
            _ => Propagation::Bubble,
        }
    }
}

/// Direction an event travels from its origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    /// Origin first, then each ancestor up to the document root.
    Bubble,
    /// Origin first, then every descendant in pre-order.
    Spread,
}

/// One observation of an event: where it originated and where the
/// subscriber saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Entity the event originated at.
    pub origin: EntityId,
    /// Entity the delivery lands at along the propagation path.
    pub at: EntityId,
    pub event: Event,
}

/// Handle identifying one subscription; never reused within a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

/// What a subscriber wants to see. An empty kind list means every kind;
/// `target` restricts where the delivery lands, `origin` restricts where
/// the event came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub target: Option<EntityId>,
    pub kinds: Vec<EventKind>,
    pub origin: Option<EntityId>,
}

impl EventFilter {
    /// Matches every delivery anywhere in the tree.
    pub fn any() -> Self {
        EventFilter::default()
    }

    /// Matches deliveries landing at `target`.
    pub fn target(target: EntityId) -> Self {
        EventFilter {
            target: Some(target),
            ..EventFilter::default()
        }
    }

    pub fn with_kinds(mut self, kinds: impl IntoIterator<Item = EventKind>) -> Self {
        self.kinds = kinds.into_iter().collect();
        self
    }

    pub fn from_origin(mut self, origin: EntityId) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn matches(&self, delivery: &Delivery) -> bool {
        if let Some(target) = self.target {
            if target != delivery.at {
                return false;
            }
        }
        if let Some(origin) = self.origin {
            if origin != delivery.origin {
                return false;
            }
        }
        self.kinds.is_empty() || self.kinds.contains(&delivery.event.kind())
    }
}

/// Subscriber callback. Receives the document so handlers can read and
/// mutate the model in response to a change.
pub type Subscriber = Box<dyn FnMut(&mut Document, &Delivery)>;

struct SubscriberEntry {
    id: SubscriberId,
    filter: EventFilter,
    /// Taken out while the callback runs so the registry can be borrowed
    /// again during dispatch.
    callback: Option<Subscriber>,
}

/// Registry of live subscriptions, in registration order.
#[derive(Default)]
pub struct SubscriberRegistry {
    next: u64,
    entries: Vec<SubscriberEntry>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        SubscriberRegistry::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn subscribe(&mut self, filter: EventFilter, callback: Subscriber) -> SubscriberId {
        let id = SubscriberId(self.next);
        self.next += 1;
        self.entries.push(SubscriberEntry {
            id,
            filter,
            callback: Some(callback),
        });
        id
    }

    /// Removes a subscription. Returns whether it existed; removing twice
    /// is a no-op.
    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != id);
        before != self.entries.len()
    }

    /// Snapshot of the subscribers matching a delivery, taken before any of
    /// their callbacks run. Subscribers added during dispatch only see
    /// later deliveries.
    pub fn matching(&self, delivery: &Delivery) -> Vec<SubscriberId> {
        self.entries
            .iter()
            .filter(|entry| entry.filter.matches(delivery))
            .map(|entry| entry.id)
            .collect()
    }

    /// Checks the callback out of its slot. Returns `None` when the
    /// subscription was removed or the callback is already checked out.
    pub fn take(&mut self, id: SubscriberId) -> Option<Subscriber> {
        self.entries
            .iter_mut()
            .find(|entry| entry.id == id)
            .and_then(|entry| entry.callback.take())
    }

    /// Puts a checked-out callback back. Dropped silently when the handler
    /// unsubscribed itself while it was running.
    pub fn restore(&mut self, id: SubscriberId, callback: Subscriber) {
        if let Some(entry) = self.entries.iter_mut().find(|entry| entry.id == id) {
            entry.callback = Some(callback);
        }
    }
}

impl fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("len", &self.entries.len())
            .finish()
    }
}

/// Re-emission record: deliveries originating at `source` with one of the
/// listed kinds are raised again at `listener`. Installed when a call
/// resolves its executable and torn down when either side goes away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Forward {
    pub source: EntityId,
    pub listener: EntityId,
    pub kinds: Vec<EventKind>,
}

impl Forward {
    pub fn matches(&self, origin: EntityId, kind: EventKind) -> bool {
        self.source == origin && self.kinds.contains(&kind)
    }
}

/// Merges a pending event queue before dispatch: `MembersAdded` and
/// `MembersRemoved` runs with the same origin and role are folded into the
/// first occurrence, `MembersChanged` is deduplicated per origin and role,
/// everything else passes through in order.
pub(crate) fn coalesce(pending: Vec<(EntityId, Event)>) -> Vec<(EntityId, Event)> {
    let mut out: Vec<(EntityId, Event)> = Vec::with_capacity(pending.len());
    for (origin, event) in pending {
        match event {
            Event::MembersAdded { role, members } => {
                let slot = out.iter_mut().find(|(o, e)| {
                    *o == origin && matches!(e, Event::MembersAdded { role: r, .. } if *r == role)
                });
                match slot {
                    Some((_, Event::MembersAdded { members: seen, .. })) => {
                        seen.extend(members);
                    }
                    _ => out.push((origin, Event::MembersAdded { role, members })),
                }
            }
            Event::MembersRemoved { role, members } => {
                let slot = out.iter_mut().find(|(o, e)| {
                    *o == origin && matches!(e, Event::MembersRemoved { role: r, .. } if *r == role)
                });
                match slot {
                    Some((_, Event::MembersRemoved { members: seen, .. })) => {
                        seen.extend(members);
                    }
                    _ => out.push((origin, Event::MembersRemoved { role, members })),
                }
            }
            Event::MembersChanged { role } => {
                let seen = out.iter().any(|(o, e)| {
                    *o == origin && matches!(e, Event::MembersChanged { role: r } if *r == role)
                });
                if !seen {
                    out.push((origin, Event::MembersChanged { role }));
                }
            }
            other => out.push((origin, other)),
        }
    }
    out
}
