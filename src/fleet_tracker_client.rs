use crate::connection_state::ConnectionState;
use crate::connection_supervisor::ConnectionSupervisor;
use crate::error::Error;
use crate::fleet_state_store::{FleetSnapshot, FleetStateStore};
use crate::fleet_tracking_config::FleetTrackingConfig;
use crate::stream_transport::{StreamEndpoint, TelemetryConnector};
use crate::truck_telemetry::TruckTelemetry;

use std::time::Duration;
use tokio::sync::watch;

/// Owner handle for a running telemetry engine.
///
/// The read side (`snapshot`, `count`, `get`, `subscribe`) is what a map
/// renderer consumes; the connection state accessors are diagnostics only
/// and never affect the fleet data model. Dropping the handle shuts the
/// engine down.
#[derive(Debug)]
pub struct FleetTrackerClient {
    snapshot_receiver: watch::Receiver<FleetSnapshot>,
    state_receiver: watch::Receiver<ConnectionState>,
    shutdown_sender: watch::Sender<bool>,
}

impl FleetTrackerClient {
    /// Point-in-time copy of the fleet, safe to render from.
    pub fn snapshot(&self) -> FleetSnapshot {
        self.snapshot_receiver.borrow().clone()
    }

    /// Number of distinct trucks currently tracked.
    pub fn count(&self) -> usize {
        self.snapshot_receiver.borrow().len()
    }

    /// Latest record for a single truck, if it has ever been seen.
    pub fn get(&self, truck_id: &str) -> Option<TruckTelemetry> {
        self.snapshot_receiver.borrow().get(truck_id).cloned()
    }

    /// Change notifications: each value is a replaced whole snapshot.
    pub fn subscribe(&self) -> watch::Receiver<FleetSnapshot> {
        self.snapshot_receiver.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state_receiver.borrow()
    }

    pub fn subscribe_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_receiver.clone()
    }

    /// Requests the terminal transition. Idempotent and safe to call from
    /// any state, including mid-connect; a pending reconnect never fires
    /// afterwards and no further telemetry reaches the store.
    pub fn shutdown(&self) {
        let _ = self.shutdown_sender.send(true);
    }
}

/// Tries to start a telemetry engine and returns its owner handle.
///
/// Parses the configured endpoint, then spawns the connection supervisor
/// on the current tokio runtime. The supervisor starts `Disconnected` and
/// immediately attempts its first connection.
///
/// # Arguments
/// * `config` - Stream endpoint plus the fixed reconnect delay.
/// * `connector` - Transport implementation used for every connection
///   attempt, `TcpLineConnector` in production.
pub async fn build<C>(
    config: FleetTrackingConfig,
    connector: C,
) -> Result<FleetTrackerClient, Error>
where
    C: TelemetryConnector + 'static,
{
    let endpoint = StreamEndpoint::parse(&config.stream_endpoint)?;

    let store = FleetStateStore::new();
    let snapshot_receiver = store.subscribe();
    let (state_sender, state_receiver) = watch::channel(ConnectionState::Disconnected);
    let (shutdown_sender, shutdown_receiver) = watch::channel(false);

    let supervisor = ConnectionSupervisor::new(
        connector,
        endpoint,
        Duration::from_millis(config.reconnect_delay_in_milliseconds),
        store,
        state_sender,
        shutdown_receiver,
    );

    tokio::spawn(supervisor.run());

    Ok(FleetTrackerClient {
        snapshot_receiver,
        state_receiver,
        shutdown_sender,
    })
}

#[cfg(test)]
use crate::error::ErrorKind;
#[cfg(test)]
use crate::stream_transport::TcpLineConnector;
#[cfg(test)]
use tokio::io::{AsyncReadExt, AsyncWriteExt};
#[cfg(test)]
use tokio::net::TcpListener;
#[cfg(test)]
use tokio::time::timeout;

#[tokio::test]
async fn tracks_a_fleet_across_a_reconnect_and_shuts_down() {
    let _ = simple_logger::SimpleLogger::new().init();

    const T1_FRAME: &[u8] = br#"{"truck_id":"T1","latitude":12.9716,"longitude":77.5946,"speed":40.0,"engine_temp":88.0,"timestamp":"2026-08-07T10:00:00Z"}"#;
    const T2_FRAME: &[u8] = br#"{"truck_id":"T2","latitude":12.9343,"longitude":77.6089,"speed":10.0,"engine_temp":91.0,"timestamp":"2026-08-07T10:00:02Z"}"#;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        // First connection delivers one truck, then dies.
        let (mut first, _) = listener.accept().await.unwrap();
        first.write_all(T1_FRAME).await.unwrap();
        first.write_all(b"\n").await.unwrap();
        first.shutdown().await.unwrap();
        drop(first);

        // Second connection delivers another truck and stays open until
        // the engine closes it on shutdown.
        let (mut second, _) = listener.accept().await.unwrap();
        second.write_all(T2_FRAME).await.unwrap();
        second.write_all(b"\n").await.unwrap();

        let mut buffer = [0u8; 1];
        let _ = second.read(&mut buffer).await;
    });

    let config = FleetTrackingConfig {
        stream_endpoint: format!("tcp://127.0.0.1:{}/telemetry", port),
        reconnect_delay_in_milliseconds: 100,
    };

    let client = build(config, TcpLineConnector).await.unwrap();

    let mut snapshot_receiver = client.subscribe();
    timeout(
        Duration::from_secs(5),
        snapshot_receiver.wait_for(|snapshot| snapshot.len() == 2),
    )
    .await
    .expect("timed out waiting for both trucks")
    .unwrap();

    assert_eq!(client.count(), 2);
    assert_eq!(client.get("T1").unwrap().speed, 40.0);
    assert_eq!(client.get("T2").unwrap().speed, 10.0);
    assert_eq!(client.get("T404"), None);

    client.shutdown();

    let mut state_receiver = client.subscribe_connection_state();
    timeout(
        Duration::from_secs(5),
        state_receiver.wait_for(|state| state.is_stopped()),
    )
    .await
    .expect("timed out waiting for shutdown")
    .unwrap();

    // The last known fleet view outlives the engine.
    assert_eq!(client.count(), 2);
}

#[tokio::test]
async fn build_rejects_an_invalid_endpoint() {
    let config = FleetTrackingConfig {
        stream_endpoint: "not an address".to_string(),
        reconnect_delay_in_milliseconds: 100,
    };

    let error = build(config, TcpLineConnector).await.unwrap_err();

    assert_eq!(error.kind(), ErrorKind::InvalidEndpoint);
}
