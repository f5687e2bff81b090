//! Per-source revalidation schedule.
//!
//! Each source key owns one slot: the time its next interval revalidation is
//! due, plus whether it listens for focus and reconnect events. Slots are
//! cleared while a fetch is in flight and re-armed `pollIntervalMs` after the
//! fetch settles, so a slow upstream never stacks interval triggers.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::models::SourceKey;
use crate::services::freshness::PolicyTable;

/// Why a revalidation was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    /// First run after the controller starts.
    Mount,
    Interval,
    Focus,
    Reconnect,
    /// Explicit request; bypasses deduplication.
    Manual,
}

/// Events a dashboard client reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ClientEvent {
    Focus,
    Reconnect,
}

impl From<ClientEvent> for Trigger {
    fn from(event: ClientEvent) -> Self {
        match event {
            ClientEvent::Focus => Trigger::Focus,
            ClientEvent::Reconnect => Trigger::Reconnect,
        }
    }
}

impl fmt::Display for ClientEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ClientEvent::Focus => "focus",
            ClientEvent::Reconnect => "reconnect",
        })
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown event '{0}' (expected 'focus' or 'reconnect')")]
pub struct UnknownClientEvent(pub String);

impl FromStr for ClientEvent {
    type Err = UnknownClientEvent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "focus" => Ok(ClientEvent::Focus),
            "reconnect" => Ok(ClientEvent::Reconnect),
            other => Err(UnknownClientEvent(other.to_string())),
        }
    }
}

/// Upper bound for absurd configured poll intervals.
const MAX_POLL_INTERVAL_DAYS: i64 = 365;

#[derive(Debug, Clone)]
struct Slot {
    next_fire_at: Option<DateTime<Utc>>,
    mounted: bool,
    poll_interval: Duration,
    on_focus: bool,
    on_reconnect: bool,
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    slots: HashMap<SourceKey, Slot>,
}

impl Scheduler {
    /// Every key starts due at `now` with a mount trigger.
    pub fn new(policies: &PolicyTable, now: DateTime<Utc>) -> Self {
        let slots = SourceKey::ALL
            .into_iter()
            .map(|key| {
                let policy = policies.get(key);
                let slot = Slot {
                    next_fire_at: Some(now),
                    mounted: false,
                    poll_interval: Duration::from_std(policy.poll_interval())
                        .unwrap_or_else(|_| Duration::days(MAX_POLL_INTERVAL_DAYS)),
                    on_focus: policy.revalidate_on_focus,
                    on_reconnect: policy.revalidate_on_reconnect,
                };
                (key, slot)
            })
            .collect();
        Self { slots }
    }

    /// Keys whose deadline has passed, with the trigger to use.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<(SourceKey, Trigger)> {
        SourceKey::ALL
            .into_iter()
            .filter_map(|key| {
                let slot = self.slots.get(&key)?;
                let at = slot.next_fire_at?;
                (at <= now).then(|| {
                    let trigger = if slot.mounted {
                        Trigger::Interval
                    } else {
                        Trigger::Mount
                    };
                    (key, trigger)
                })
            })
            .collect()
    }

    /// Keys subscribed to a client event.
    pub fn subscribers(&self, event: ClientEvent) -> Vec<SourceKey> {
        SourceKey::ALL
            .into_iter()
            .filter(|key| {
                self.slots.get(key).is_some_and(|slot| match event {
                    ClientEvent::Focus => slot.on_focus,
                    ClientEvent::Reconnect => slot.on_reconnect,
                })
            })
            .collect()
    }

    /// A fetch started: disarm until it settles.
    pub fn clear(&mut self, key: SourceKey) {
        if let Some(slot) = self.slots.get_mut(&key) {
            slot.next_fire_at = None;
            slot.mounted = true;
        }
    }

    /// A fetch settled: next interval revalidation is one poll interval away.
    pub fn settle(&mut self, key: SourceKey, now: DateTime<Utc>) {
        if let Some(slot) = self.slots.get_mut(&key) {
            slot.next_fire_at = Some(now + slot.poll_interval);
            slot.mounted = true;
        }
    }

    /// Retry a dropped trigger later without changing its kind.
    pub fn defer(&mut self, key: SourceKey, at: DateTime<Utc>) {
        if let Some(slot) = self.slots.get_mut(&key) {
            slot.next_fire_at = Some(at);
        }
    }

    pub fn next_fire_at(&self, key: SourceKey) -> Option<DateTime<Utc>> {
        self.slots.get(&key).and_then(|slot| slot.next_fire_at)
    }

    /// Earliest armed deadline across all keys.
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.slots.values().filter_map(|slot| slot.next_fire_at).min()
    }
}
