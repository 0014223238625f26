use crate::truck_telemetry::TruckTelemetry;

use std::collections::HashMap;
use tokio::sync::watch;

/// Point-in-time view of the fleet, one entry per tracked truck.
pub type FleetSnapshot = HashMap<String, TruckTelemetry>;

/// In-memory mapping from truck id to the most recently arrived telemetry
/// record for that truck.
///
/// Mutation discipline is last-write-wins by arrival order: `upsert`
/// replaces the stored record unconditionally, without comparing the
/// message's own `timestamp` field. Entries are never removed, a truck
/// that stops transmitting stays at its last known position.
///
/// Every successful `upsert` publishes a fresh copy of the whole fleet to
/// subscribers, so an observer can never see a half-applied update.
pub struct FleetStateStore {
    trucks: FleetSnapshot,
    snapshot_sender: watch::Sender<FleetSnapshot>,
}

impl FleetStateStore {
    pub fn new() -> FleetStateStore {
        let (snapshot_sender, _) = watch::channel(FleetSnapshot::new());

        FleetStateStore {
            trucks: FleetSnapshot::new(),
            snapshot_sender,
        }
    }

    /// Inserts or replaces the entry keyed by `telemetry.truck_id` and
    /// notifies subscribers with a replaced whole snapshot.
    pub fn upsert(&mut self, telemetry: TruckTelemetry) {
        self.trucks
            .insert(telemetry.truck_id.clone(), telemetry);
        self.snapshot_sender.send_replace(self.trucks.clone());
    }

    pub fn snapshot(&self) -> FleetSnapshot {
        self.trucks.clone()
    }

    pub fn count(&self) -> usize {
        self.trucks.len()
    }

    /// Latest record for a single truck, if it has ever been seen.
    pub fn get(&self, truck_id: &str) -> Option<TruckTelemetry> {
        self.trucks.get(truck_id).cloned()
    }

    /// Change notifications for observers such as a map renderer. Each
    /// notification carries the complete fleet, not a diff.
    pub fn subscribe(&self) -> watch::Receiver<FleetSnapshot> {
        self.snapshot_sender.subscribe()
    }
}

impl Default for FleetStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
fn telemetry(truck_id: &str, speed: f64, timestamp: &str) -> TruckTelemetry {
    TruckTelemetry::new(
        truck_id.to_string(),
        12.9716,
        77.5946,
        speed,
        90.0,
        timestamp.to_string(),
    )
}

#[test]
fn starts_empty() {
    let store = FleetStateStore::new();

    assert_eq!(store.count(), 0);
    assert!(store.snapshot().is_empty());
}

#[test]
fn last_arrived_record_wins() {
    let mut store = FleetStateStore::new();

    store.upsert(telemetry("T1", 40.0, "2026-08-07T10:00:00Z"));
    store.upsert(telemetry("T1", 55.0, "2026-08-07T10:00:01Z"));
    store.upsert(telemetry("T2", 10.0, "2026-08-07T10:00:02Z"));

    let snapshot = store.snapshot();

    assert_eq!(store.count(), 2);
    assert_eq!(snapshot["T1"].speed, 55.0);
    assert_eq!(snapshot["T2"].speed, 10.0);
}

#[test]
fn arrival_order_beats_timestamp_order() {
    let mut store = FleetStateStore::new();

    // The second record is logically older, it still replaces the first.
    store.upsert(telemetry("T1", 55.0, "2026-08-07T10:00:05Z"));
    store.upsert(telemetry("T1", 40.0, "2026-08-07T09:59:00Z"));

    let stored = store.get("T1").unwrap();

    assert_eq!(stored.speed, 40.0);
    assert_eq!(stored.timestamp, "2026-08-07T09:59:00Z");
}

#[test]
fn upsert_is_idempotent() {
    let mut store = FleetStateStore::new();
    let record = telemetry("T1", 40.0, "2026-08-07T10:00:00Z");

    store.upsert(record.clone());
    let once = store.snapshot();

    store.upsert(record);
    let twice = store.snapshot();

    assert_eq!(once, twice);
    assert_eq!(store.count(), 1);
}

#[test]
fn snapshot_is_a_point_in_time_copy() {
    let mut store = FleetStateStore::new();
    store.upsert(telemetry("T1", 40.0, "2026-08-07T10:00:00Z"));

    let snapshot = store.snapshot();
    store.upsert(telemetry("T1", 55.0, "2026-08-07T10:00:01Z"));

    assert_eq!(snapshot["T1"].speed, 40.0);
    assert_eq!(store.get("T1").unwrap().speed, 55.0);
}

#[test]
fn get_returns_none_for_unknown_truck() {
    let store = FleetStateStore::new();

    assert_eq!(store.get("T404"), None);
}

#[tokio::test]
async fn upsert_notifies_subscribers_with_whole_snapshot() {
    let mut store = FleetStateStore::new();
    let mut snapshot_receiver = store.subscribe();

    store.upsert(telemetry("T1", 40.0, "2026-08-07T10:00:00Z"));

    snapshot_receiver.changed().await.unwrap();
    let first = snapshot_receiver.borrow_and_update().clone();
    assert_eq!(first.len(), 1);

    store.upsert(telemetry("T2", 10.0, "2026-08-07T10:00:01Z"));

    snapshot_receiver.changed().await.unwrap();
    let second = snapshot_receiver.borrow_and_update().clone();
    assert_eq!(second.len(), 2);
    assert_eq!(second["T1"].speed, 40.0);
    assert_eq!(second["T2"].speed, 10.0);
}
