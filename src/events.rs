use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{Date, EventId, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    InspectionFailure,
    Recall,
    Shortage,
    WarningLetter,
    /// Closes all prior open events for the same source entity.
    Resolved,
}

impl EventKind {
    /// Whether a later `Resolved` event for the same entity closes this one.
    pub fn is_resolvable(self) -> bool {
        !matches!(self, EventKind::Resolved)
    }
}

/// Per-event override of the geometric decay base. Most events propagate
/// with the engine default; a slow-burn signal like a warning letter can
/// carry a heavier base so it reaches further downstream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecayProfile {
    pub base: f64,
}

/// A severity-scored risk observation attributed to one supply-chain entity.
/// Immutable once recorded — superseding information is a new event, never a
/// mutation of this one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskEvent {
    pub id: EventId,
    pub source_entity_id: NodeId,
    pub kind: EventKind,
    /// 0–10 scale as scored by the upstream document classifier.
    pub severity: f64,
    pub observed_at: Date,
    /// None means the engine's configured decay base applies.
    pub decay: Option<DecayProfile>,
}

/// Derived lifecycle state of a recorded event. The original record is never
/// touched; resolution is represented by pointing at the resolving event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventStatus {
    Active,
    Resolved { resolved_by: EventId },
}

/// Append-only log of risk events, ordered by observation date. Serves the
/// propagation engine as a pull source (`events_since`) and answers
/// active/resolved queries without ever rewriting a record.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<RiskEvent>,
    by_id: HashMap<EventId, usize>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new event. Events must arrive in non-decreasing observation
    /// order; the log is the system's time axis.
    pub fn record(&mut self, event: RiskEvent) {
        debug_assert!(
            self.events.last().map(|e| e.observed_at <= event.observed_at).unwrap_or(true),
            "event log must be appended in observation order"
        );
        debug_assert!(
            !self.by_id.contains_key(&event.id),
            "event ids are unique in an append-only log"
        );
        self.by_id.insert(event.id, self.events.len());
        self.events.push(event);
    }

    pub fn get(&self, id: EventId) -> Option<&RiskEvent> {
        self.by_id.get(&id).map(|&i| &self.events[i])
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RiskEvent> {
        self.events.iter()
    }

    /// Pull interface: events observed strictly after `since`.
    pub fn events_since(&self, since: Date) -> impl Iterator<Item = &RiskEvent> {
        self.events.iter().filter(move |e| e.observed_at > since)
    }

    /// Lifecycle state of `id` as of `as_of`. An event is resolved when a
    /// later `Resolved` event (observed at or before `as_of`) references the
    /// same source entity. Returns None for an unknown id or one not yet
    /// observed at `as_of`.
    pub fn status_as_of(&self, id: EventId, as_of: Date) -> Option<EventStatus> {
        let event = self.get(id)?;
        if event.observed_at > as_of {
            return None;
        }
        if !event.kind.is_resolvable() {
            return Some(EventStatus::Active);
        }
        let resolved_by = self.events.iter().find(|e| {
            e.kind == EventKind::Resolved
                && e.source_entity_id == event.source_entity_id
                && e.observed_at >= event.observed_at
                && e.observed_at <= as_of
                && e.id != id
        });
        Some(match resolved_by {
            Some(r) => EventStatus::Resolved { resolved_by: r.id },
            None => EventStatus::Active,
        })
    }

    /// Whether the event contributes to current risk as of `as_of`.
    pub fn is_active_as_of(&self, id: EventId, as_of: Date) -> bool {
        matches!(self.status_as_of(id, as_of), Some(EventStatus::Active))
    }
}
