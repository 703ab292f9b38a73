//! Per-entity velocity tracking.
//!
//! Each entity (value of the grouping key) owns its own rolling window. The number
//! of tracked entities is capped; when a new entity arrives at the cap, entities
//! with nothing left inside the window go first, then the least recently seen.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Duration, Utc};
use ironstream_core::event::CanonicalEvent;
use ironstream_core::types::EventRef;

use crate::rule::EntitySpec;

#[derive(Debug, Clone)]
struct EntityWindow {
    events: VecDeque<(EventRef, Option<String>)>,
    last_seen: DateTime<Utc>,
}

impl EntityWindow {
    fn purge(&mut self, cutoff: DateTime<Utc>) {
        while self.events.front().is_some_and(|(e, _)| e.timestamp < cutoff) {
            self.events.pop_front();
        }
    }
}

/// Result of feeding one event to an [`EntityTracker`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityObservation {
    pub entity: String,
    /// Events (or distinct values) inside the entity's window
    pub count: usize,
    pub satisfied: bool,
}

/// Per-(rule, entity) windows for one rule
#[derive(Debug, Clone)]
pub struct EntityTracker {
    key: String,
    window: Duration,
    threshold: usize,
    distinct_field: Option<String>,
    max_entities: usize,
    entities: HashMap<String, EntityWindow>,
    evicted: u64,
}

impl EntityTracker {
    pub fn new(spec: &EntitySpec, max_entities: usize) -> Self {
        Self {
            key: spec.key.clone(),
            window: super::window(spec.window_secs),
            threshold: spec.threshold,
            distinct_field: spec.distinct_field.clone(),
            max_entities: max_entities.max(1),
            entities: HashMap::new(),
            evicted: 0,
        }
    }

    /// Records the event under its entity. `None` when the event has no grouping key.
    pub fn observe(&mut self, event: &CanonicalEvent) -> Option<EntityObservation> {
        let entity = event.field(&self.key)?.into_owned();
        let now = event.timestamp();
        let cutoff = now - self.window;

        if !self.entities.contains_key(&entity) && self.entities.len() >= self.max_entities {
            self.make_room(cutoff);
        }

        let distinct = self
            .distinct_field
            .as_deref()
            .and_then(|f| event.field(f))
            .map(|v| v.into_owned());
        let slot = self
            .entities
            .entry(entity.clone())
            .or_insert_with(|| EntityWindow {
                events: VecDeque::new(),
                last_seen: now,
            });
        slot.purge(cutoff);
        slot.events.push_back((event.event_ref(), distinct));
        slot.last_seen = slot.last_seen.max(now);

        let count = if self.distinct_field.is_some() {
            slot.events
                .iter()
                .filter_map(|(_, v)| v.as_deref())
                .collect::<HashSet<_>>()
                .len()
        } else {
            slot.events.len()
        };

        Some(EntityObservation {
            entity,
            count,
            satisfied: count > self.threshold,
        })
    }

    fn make_room(&mut self, cutoff: DateTime<Utc>) {
        let before = self.entities.len();
        self.entities.retain(|_, w| w.last_seen >= cutoff);
        let mut evicted = before - self.entities.len();

        if self.entities.len() >= self.max_entities {
            let oldest = self
                .entities
                .iter()
                .min_by_key(|(_, w)| w.last_seen)
                .map(|(k, _)| k.clone());
            if let Some(key) = oldest {
                self.entities.remove(&key);
                evicted += 1;
            }
        }

        self.evicted += evicted as u64;
        tracing::debug!(
            key = %self.key,
            evicted,
            tracked = self.entities.len(),
            "entity cap reached"
        );
    }

    /// Snapshots currently in the entity's window, oldest first.
    pub fn events<'a>(&'a self, entity: &str) -> impl Iterator<Item = &'a EventRef> + 'a {
        self.entities
            .get(entity)
            .into_iter()
            .flat_map(|w| w.events.iter().map(|(e, _)| e))
    }

    pub fn tracked(&self) -> usize {
        self.entities.len()
    }

    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn describe(&self, observation: &EntityObservation) -> String {
        match &self.distinct_field {
            Some(field) => format!(
                "{}={} reached {} distinct {field} within {}s",
                self.key,
                observation.entity,
                observation.count,
                self.window.num_seconds()
            ),
            None => format!(
                "{}={} reached {} events within {}s",
                self.key,
                observation.entity,
                observation.count,
                self.window.num_seconds()
            ),
        }
    }
}
