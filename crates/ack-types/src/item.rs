use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TypeError;
use crate::tenant::TenantId;

/// Unique identifier for a work item (UUID v7 for time-ordering).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(uuid::Uuid);

impl ItemId {
    /// Generate a new time-ordered item ID (UUID v7).
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }

    pub fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }

    /// Short representation (first 8 characters of UUID).
    pub fn short_id(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ItemId({})", self.short_id())
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ItemId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| TypeError::InvalidItemId(e.to_string()))
    }
}

/// Lifecycle state of a [`WorkerItem`].
///
/// ```text
/// pending ──claim──▶ in_flight ──▶ delivered
///    ▲                   │
///    └──── retry ────────┤
///                        └──────▶ dead
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    InFlight,
    Delivered,
    Dead,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Delivered => "delivered",
            Self::Dead => "dead",
        }
    }

    /// `delivered` and `dead` items are never mutated again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Dead)
    }

    /// Whether `self → next` is an allowed transition.
    pub fn can_transition_to(&self, next: ItemStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InFlight)
                | (Self::InFlight, Self::Pending)
                | (Self::InFlight, Self::Delivered)
                | (Self::InFlight, Self::Dead)
        )
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ItemStatus {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_flight" => Ok(Self::InFlight),
            "delivered" => Ok(Self::Delivered),
            "dead" => Ok(Self::Dead),
            other => Err(TypeError::UnknownStatus(other.to_string())),
        }
    }
}

/// Request to enqueue a new work item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewWorkItem {
    pub tenant_id: TenantId,
    /// Event type (webhooks) or template kind (emails).
    pub kind: String,
    pub payload: Value,
    /// Queues ignore a second enqueue with the same key.
    pub idempotency_key: String,
    /// Earliest delivery time; `None` means immediately.
    pub not_before: Option<DateTime<Utc>>,
}

impl NewWorkItem {
    pub fn new(
        tenant_id: TenantId,
        kind: impl Into<String>,
        payload: Value,
        idempotency_key: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id,
            kind: kind.into(),
            payload,
            idempotency_key: idempotency_key.into(),
            not_before: None,
        }
    }

    /// Materialize the pending item as of `now`.
    pub fn into_item(self, now: DateTime<Utc>) -> WorkerItem {
        let next_attempt_at = self.not_before.map_or(now, |at| at.max(now));
        WorkerItem {
            id: ItemId::new(),
            tenant_id: self.tenant_id,
            kind: self.kind,
            payload: self.payload,
            idempotency_key: self.idempotency_key,
            status: ItemStatus::Pending,
            attempt: 0,
            next_attempt_at,
            last_error: None,
            created_at: now,
            claimed_at: None,
            completed_at: None,
        }
    }
}

/// One unit of deliverable work: a webhook delivery or a queued email.
///
/// Created by an event producer, mutated only by its owning worker through
/// the transition methods below, never deleted automatically.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkerItem {
    pub id: ItemId,
    pub tenant_id: TenantId,
    pub kind: String,
    pub payload: Value,
    pub idempotency_key: String,
    pub status: ItemStatus,
    /// Number of failed attempts so far. Only ever increases.
    pub attempt: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkerItem {
    /// Whether the item may be claimed at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ItemStatus::Pending && self.next_attempt_at <= now
    }

    /// pending → in_flight.
    pub fn claim(&mut self, now: DateTime<Utc>) -> Result<(), TypeError> {
        self.transition(ItemStatus::InFlight)?;
        self.claimed_at = Some(now);
        Ok(())
    }

    /// in_flight → delivered.
    pub fn mark_delivered(&mut self, now: DateTime<Utc>) -> Result<(), TypeError> {
        self.transition(ItemStatus::Delivered)?;
        self.completed_at = Some(now);
        Ok(())
    }

    /// in_flight → pending, recording the failed attempt.
    pub fn reschedule(
        &mut self,
        attempt: u32,
        next_attempt_at: DateTime<Utc>,
        error: impl Into<String>,
    ) -> Result<(), TypeError> {
        self.check_attempt(attempt)?;
        self.transition(ItemStatus::Pending)?;
        self.attempt = attempt;
        self.next_attempt_at = next_attempt_at;
        self.last_error = Some(error.into());
        self.claimed_at = None;
        Ok(())
    }

    /// in_flight → dead.
    pub fn mark_dead(
        &mut self,
        attempt: u32,
        now: DateTime<Utc>,
        error: impl Into<String>,
    ) -> Result<(), TypeError> {
        self.check_attempt(attempt)?;
        self.transition(ItemStatus::Dead)?;
        self.attempt = attempt;
        self.last_error = Some(error.into());
        self.completed_at = Some(now);
        Ok(())
    }

    /// in_flight → pending without counting an attempt.
    ///
    /// Used when the claiming worker disappeared before reporting back.
    pub fn release(&mut self) -> Result<(), TypeError> {
        self.transition(ItemStatus::Pending)?;
        self.claimed_at = None;
        Ok(())
    }

    fn check_attempt(&self, attempt: u32) -> Result<(), TypeError> {
        if attempt < self.attempt {
            return Err(TypeError::AttemptDecreased {
                current: self.attempt,
                requested: attempt,
            });
        }
        Ok(())
    }

    fn transition(&mut self, next: ItemStatus) -> Result<(), TypeError> {
        if !self.status.can_transition_to(next) {
            return Err(TypeError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    fn item(now: DateTime<Utc>) -> WorkerItem {
        NewWorkItem::new(
            TenantId::new("acme").unwrap(),
            "document.signed",
            json!({"doc": "policy-2025"}),
            "evt_1:sub_1",
        )
        .into_item(now)
    }

    #[test]
    fn new_item_is_pending_and_due() {
        let now = Utc::now();
        let item = item(now);
        assert_eq!(item.status, ItemStatus::Pending);
        assert_eq!(item.attempt, 0);
        assert!(item.is_due(now));
    }

    #[test]
    fn not_before_delays_first_attempt() {
        let now = Utc::now();
        let mut new = NewWorkItem::new(
            TenantId::new("acme").unwrap(),
            "reminder",
            json!({}),
            "k",
        );
        new.not_before = Some(now + chrono::Duration::minutes(5));
        let item = new.into_item(now);
        assert!(!item.is_due(now));
        assert!(item.is_due(now + chrono::Duration::minutes(5)));
    }

    #[test]
    fn happy_path_transitions() {
        let now = Utc::now();
        let mut item = item(now);
        item.claim(now).unwrap();
        assert_eq!(item.status, ItemStatus::InFlight);
        item.mark_delivered(now).unwrap();
        assert_eq!(item.status, ItemStatus::Delivered);
        assert_eq!(item.completed_at, Some(now));
    }

    #[test]
    fn terminal_items_reject_mutation() {
        let now = Utc::now();
        let mut item = item(now);
        item.claim(now).unwrap();
        item.mark_dead(1, now, "boom").unwrap();

        let err = item.claim(now).unwrap_err();
        assert_eq!(
            err,
            TypeError::InvalidTransition {
                from: ItemStatus::Dead,
                to: ItemStatus::InFlight
            }
        );
        assert!(item.release().is_err());
    }

    #[test]
    fn pending_item_cannot_be_delivered_without_claim() {
        let now = Utc::now();
        let mut item = item(now);
        assert!(item.mark_delivered(now).is_err());
    }

    #[test]
    fn attempt_never_decreases() {
        let now = Utc::now();
        let mut item = item(now);
        item.claim(now).unwrap();
        item.reschedule(3, now, "timeout").unwrap();
        item.claim(now).unwrap();
        let err = item.reschedule(2, now, "timeout").unwrap_err();
        assert_eq!(
            err,
            TypeError::AttemptDecreased {
                current: 3,
                requested: 2
            }
        );
    }

    #[test]
    fn release_keeps_attempt() {
        let now = Utc::now();
        let mut item = item(now);
        item.claim(now).unwrap();
        item.reschedule(1, now, "502").unwrap();
        item.claim(now).unwrap();
        item.release().unwrap();
        assert_eq!(item.status, ItemStatus::Pending);
        assert_eq!(item.attempt, 1);
        assert!(item.claimed_at.is_none());
    }

    #[test]
    fn status_parses_and_displays() {
        for status in [
            ItemStatus::Pending,
            ItemStatus::InFlight,
            ItemStatus::Delivered,
            ItemStatus::Dead,
        ] {
            assert_eq!(status.as_str().parse::<ItemStatus>().unwrap(), status);
        }
        assert!("queued".parse::<ItemStatus>().is_err());
    }

    proptest! {
        #[test]
        fn random_operations_keep_invariants(ops in proptest::collection::vec((0u8..5, 0u32..6), 1..40)) {
            let now = Utc::now();
            let mut item = item(now);
            for (op, attempt) in ops {
                let before = item.clone();
                let result = match op {
                    0 => item.claim(now),
                    1 => item.mark_delivered(now),
                    2 => item.reschedule(attempt, now, "retry"),
                    3 => item.mark_dead(attempt, now, "give up"),
                    _ => item.release(),
                };
                prop_assert!(item.attempt >= before.attempt);
                if before.status.is_terminal() {
                    prop_assert!(result.is_err());
                }
                if result.is_err() {
                    prop_assert_eq!(item.status, before.status);
                    prop_assert_eq!(item.attempt, before.attempt);
                }
            }
        }
    }
}
