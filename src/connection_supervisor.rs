use crate::connection_state::ConnectionState;
use crate::fleet_state_store::FleetStateStore;
use crate::stream_transport::{StreamEndpoint, TelemetryConnection, TelemetryConnector};
use crate::telemetry_decoder;

use std::time::Duration;
use tokio::sync::watch;
use tokio::time;

/// Owns the lifecycle of the telemetry stream connection: connect,
/// receive, detect loss, reconnect after a fixed delay, and feed every
/// validated frame into the fleet state store.
///
/// Connection failures are retried indefinitely; the store keeps serving
/// its last known fleet view throughout an outage. The only way out of
/// the retry loop is a shutdown request from the owner, which cancels a
/// pending reconnect, closes an open connection and moves the supervisor
/// into its terminal `Stopped` state.
pub struct ConnectionSupervisor<C: TelemetryConnector> {
    connector: C,
    endpoint: StreamEndpoint,
    reconnect_delay: Duration,
    store: FleetStateStore,
    state_sender: watch::Sender<ConnectionState>,
    shutdown_receiver: watch::Receiver<bool>,
}

impl<C: TelemetryConnector> ConnectionSupervisor<C> {
    /// # Arguments
    /// * `connector` - Transport used to (re)establish the stream; the
    ///   reconnect target is always identical to the initial target.
    /// * `endpoint` - Address of the telemetry stream.
    /// * `reconnect_delay` - Fixed pause between a loss and the next
    ///   connection attempt. Constant, never backed off.
    /// * `store` - Fleet state store receiving every decoded frame.
    /// * `state_sender` - Publishes state transitions for diagnostics.
    /// * `shutdown_receiver` - Owner-side shutdown signal.
    pub fn new(
        connector: C,
        endpoint: StreamEndpoint,
        reconnect_delay: Duration,
        store: FleetStateStore,
        state_sender: watch::Sender<ConnectionState>,
        shutdown_receiver: watch::Receiver<bool>,
    ) -> ConnectionSupervisor<C> {
        ConnectionSupervisor {
            connector,
            endpoint,
            reconnect_delay,
            store,
            state_sender,
            shutdown_receiver,
        }
    }

    pub async fn run(mut self) {
        loop {
            self.set_state(ConnectionState::Connecting);

            let connection = tokio::select! {
                biased;
                _ = shutdown_requested(&mut self.shutdown_receiver) => break,
                connection = self.connector.connect(&self.endpoint) => connection,
            };

            match connection {
                Ok(mut connection) => {
                    self.set_state(ConnectionState::Connected);
                    log::info!("connected to telemetry stream at {}", self.endpoint);

                    if self.pump_frames(&mut connection).await {
                        break;
                    }
                }
                Err(error) => {
                    log::error!("failed to connect to telemetry stream: {}", error);
                }
            }

            // All closures are treated identically: back to Disconnected,
            // retry after the fixed delay unless shut down first.
            self.set_state(ConnectionState::Disconnected);
            log::info!(
                "telemetry stream down, reconnecting in {} ms",
                self.reconnect_delay.as_millis()
            );

            tokio::select! {
                biased;
                _ = shutdown_requested(&mut self.shutdown_receiver) => break,
                _ = time::sleep(self.reconnect_delay) => (),
            }
        }

        self.set_state(ConnectionState::Stopped);
        log::info!("telemetry engine stopped");
    }

    /// Processes frames in arrival order until the connection dies or a
    /// shutdown is requested. Returns true when shutting down.
    async fn pump_frames(&mut self, connection: &mut C::Connection) -> bool {
        loop {
            let frame = tokio::select! {
                biased;
                _ = shutdown_requested(&mut self.shutdown_receiver) => return true,
                frame = connection.next_frame() => frame,
            };

            match frame {
                Ok(Some(raw)) => match telemetry_decoder::decode(&raw) {
                    Ok(telemetry) => self.store.upsert(telemetry),
                    Err(error) => log::error!("discarding telemetry frame: {}", error),
                },
                Ok(None) => {
                    log::info!("telemetry stream closed by remote");
                    return false;
                }
                Err(error) => {
                    log::error!("telemetry stream lost: {}", error);
                    return false;
                }
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_sender.send_replace(state);
    }
}

/// Resolves once shutdown has been requested. A dropped owner handle
/// counts as a request.
async fn shutdown_requested(shutdown_receiver: &mut watch::Receiver<bool>) {
    if *shutdown_receiver.borrow_and_update() {
        return;
    }

    let _ = shutdown_receiver.changed().await;
}

#[cfg(test)]
use crate::error::{Error, ErrorKind};
#[cfg(test)]
use crate::fleet_state_store::FleetSnapshot;
#[cfg(test)]
use futures::future::BoxFuture;
#[cfg(test)]
use std::collections::VecDeque;
#[cfg(test)]
use std::sync::atomic::{AtomicUsize, Ordering};
#[cfg(test)]
use std::sync::Arc;
#[cfg(test)]
use tokio::time::timeout;

#[cfg(test)]
const T1_AT_40: &str = r#"{"truck_id":"T1","latitude":12.9716,"longitude":77.5946,"speed":40.0,"engine_temp":88.0,"timestamp":"2026-08-07T10:00:00Z"}"#;
#[cfg(test)]
const T1_AT_55: &str = r#"{"truck_id":"T1","latitude":12.9720,"longitude":77.5951,"speed":55.0,"engine_temp":89.5,"timestamp":"2026-08-07T10:00:01Z"}"#;
#[cfg(test)]
const T2_AT_10: &str = r#"{"truck_id":"T2","latitude":12.9343,"longitude":77.6089,"speed":10.0,"engine_temp":91.0,"timestamp":"2026-08-07T10:00:02Z"}"#;
#[cfg(test)]
const NON_NUMERIC_SPEED: &str = r#"{"truck_id":"T1","latitude":12.9716,"longitude":77.5946,"speed":"fast","engine_temp":88.0,"timestamp":"2026-08-07T10:00:00Z"}"#;

#[cfg(test)]
enum ScriptedStep {
    Frame(&'static str),
    Close,
    Hold,
}

#[cfg(test)]
enum ScriptedConnect {
    Session(Vec<ScriptedStep>),
    Refuse,
}

#[cfg(test)]
struct ScriptedConnection {
    steps: VecDeque<ScriptedStep>,
}

#[cfg(test)]
impl TelemetryConnection for ScriptedConnection {
    fn next_frame(&mut self) -> BoxFuture<'_, Result<Option<String>, Error>> {
        let step = self.steps.pop_front();

        Box::pin(async move {
            match step {
                Some(ScriptedStep::Frame(raw)) => Ok(Some(raw.to_string())),
                Some(ScriptedStep::Close) | None => Ok(None),
                Some(ScriptedStep::Hold) => {
                    futures::future::pending::<Result<Option<String>, Error>>().await
                }
            }
        })
    }
}

#[cfg(test)]
struct ScriptedConnector {
    sessions: VecDeque<ScriptedConnect>,
    attempts: Arc<AtomicUsize>,
}

#[cfg(test)]
impl TelemetryConnector for ScriptedConnector {
    type Connection = ScriptedConnection;

    fn connect<'a>(
        &'a mut self,
        _endpoint: &'a StreamEndpoint,
    ) -> BoxFuture<'a, Result<ScriptedConnection, Error>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let session = self.sessions.pop_front();

        Box::pin(async move {
            match session {
                Some(ScriptedConnect::Session(steps)) => Ok(ScriptedConnection {
                    steps: steps.into(),
                }),
                Some(ScriptedConnect::Refuse) => Err(Error::new(
                    ErrorKind::HandshakeFailed,
                    "scripted handshake refusal",
                )),
                // Script exhausted: the endpoint stays unreachable forever.
                None => futures::future::pending::<Result<ScriptedConnection, Error>>().await,
            }
        })
    }
}

#[cfg(test)]
struct EngineUnderTest {
    snapshot_receiver: watch::Receiver<FleetSnapshot>,
    state_receiver: watch::Receiver<ConnectionState>,
    shutdown_sender: watch::Sender<bool>,
    attempts: Arc<AtomicUsize>,
}

#[cfg(test)]
fn spawn_supervisor(sessions: Vec<ScriptedConnect>, reconnect_delay: Duration) -> EngineUnderTest {
    let attempts = Arc::new(AtomicUsize::new(0));
    let connector = ScriptedConnector {
        sessions: sessions.into(),
        attempts: attempts.clone(),
    };

    let store = FleetStateStore::new();
    let snapshot_receiver = store.subscribe();
    let (state_sender, state_receiver) = watch::channel(ConnectionState::Disconnected);
    let (shutdown_sender, shutdown_receiver) = watch::channel(false);
    let endpoint = StreamEndpoint::parse("tcp://127.0.0.1:9/telemetry").unwrap();

    let supervisor = ConnectionSupervisor::new(
        connector,
        endpoint,
        reconnect_delay,
        store,
        state_sender,
        shutdown_receiver,
    );
    tokio::spawn(supervisor.run());

    EngineUnderTest {
        snapshot_receiver,
        state_receiver,
        shutdown_sender,
        attempts,
    }
}

#[cfg(test)]
async fn wait_for_state(receiver: &mut watch::Receiver<ConnectionState>, expected: ConnectionState) {
    timeout(
        Duration::from_secs(3),
        receiver.wait_for(|state| *state == expected),
    )
    .await
    .expect("timed out waiting for connection state")
    .unwrap();
}

#[cfg(test)]
async fn wait_for_snapshot(
    receiver: &mut watch::Receiver<FleetSnapshot>,
    predicate: impl FnMut(&FleetSnapshot) -> bool,
) -> FleetSnapshot {
    timeout(Duration::from_secs(3), receiver.wait_for(predicate))
        .await
        .expect("timed out waiting for fleet snapshot")
        .unwrap()
        .clone()
}

#[tokio::test]
async fn frames_are_reflected_in_arrival_order() {
    let mut engine = spawn_supervisor(
        vec![ScriptedConnect::Session(vec![
            ScriptedStep::Frame(T1_AT_40),
            ScriptedStep::Frame(T1_AT_55),
            ScriptedStep::Frame(T2_AT_10),
            ScriptedStep::Hold,
        ])],
        Duration::from_millis(50),
    );

    let snapshot =
        wait_for_snapshot(&mut engine.snapshot_receiver, |snapshot| snapshot.len() == 2).await;

    assert_eq!(snapshot["T1"].speed, 55.0);
    assert_eq!(snapshot["T2"].speed, 10.0);

    wait_for_state(&mut engine.state_receiver, ConnectionState::Connected).await;
}

#[tokio::test]
async fn malformed_frame_is_dropped_and_processing_continues() {
    let mut engine = spawn_supervisor(
        vec![ScriptedConnect::Session(vec![
            ScriptedStep::Frame(NON_NUMERIC_SPEED),
            ScriptedStep::Frame(T2_AT_10),
            ScriptedStep::Hold,
        ])],
        Duration::from_millis(50),
    );

    let snapshot = wait_for_snapshot(&mut engine.snapshot_receiver, |snapshot| {
        snapshot.contains_key("T2")
    })
    .await;

    // The rejected frame never reached the store.
    assert_eq!(snapshot.len(), 1);
}

#[tokio::test]
async fn malformed_frame_alone_leaves_the_fleet_empty() {
    let mut engine = spawn_supervisor(
        vec![ScriptedConnect::Session(vec![
            ScriptedStep::Frame(NON_NUMERIC_SPEED),
            ScriptedStep::Hold,
        ])],
        Duration::from_millis(50),
    );

    wait_for_state(&mut engine.state_receiver, ConnectionState::Connected).await;
    time::sleep(Duration::from_millis(100)).await;

    assert!(engine.snapshot_receiver.borrow().is_empty());
}

#[tokio::test]
async fn reconnects_after_the_fixed_delay_without_resetting_the_store() {
    const RECONNECT_DELAY: Duration = Duration::from_millis(200);

    let mut engine = spawn_supervisor(
        vec![
            ScriptedConnect::Session(vec![ScriptedStep::Frame(T1_AT_40), ScriptedStep::Close]),
            ScriptedConnect::Session(vec![ScriptedStep::Frame(T2_AT_10), ScriptedStep::Hold]),
        ],
        RECONNECT_DELAY,
    );

    wait_for_snapshot(&mut engine.snapshot_receiver, |snapshot| {
        snapshot.contains_key("T1")
    })
    .await;
    wait_for_state(&mut engine.state_receiver, ConnectionState::Disconnected).await;

    // Half way through the delay no new attempt may have been made.
    time::sleep(RECONNECT_DELAY / 2).await;
    assert_eq!(engine.attempts.load(Ordering::SeqCst), 1);
    assert_eq!(
        *engine.state_receiver.borrow(),
        ConnectionState::Disconnected
    );

    wait_for_state(&mut engine.state_receiver, ConnectionState::Connected).await;
    let snapshot = wait_for_snapshot(&mut engine.snapshot_receiver, |snapshot| {
        snapshot.contains_key("T2")
    })
    .await;

    assert_eq!(engine.attempts.load(Ordering::SeqCst), 2);
    // The outage never wiped the fleet.
    assert_eq!(snapshot["T1"].speed, 40.0);
    assert_eq!(snapshot.len(), 2);
}

#[tokio::test]
async fn shutdown_cancels_a_pending_reconnect() {
    const RECONNECT_DELAY: Duration = Duration::from_millis(150);

    let mut engine = spawn_supervisor(
        vec![ScriptedConnect::Session(vec![ScriptedStep::Close])],
        RECONNECT_DELAY,
    );

    wait_for_state(&mut engine.state_receiver, ConnectionState::Disconnected).await;
    engine.shutdown_sender.send(true).unwrap();
    wait_for_state(&mut engine.state_receiver, ConnectionState::Stopped).await;

    // Even long after the delay has passed there is no further attempt.
    time::sleep(RECONNECT_DELAY * 2).await;
    assert_eq!(engine.attempts.load(Ordering::SeqCst), 1);
    assert!(engine.state_receiver.borrow().is_stopped());
}

#[tokio::test]
async fn shutdown_while_connected_stops_the_engine() {
    let mut engine = spawn_supervisor(
        vec![ScriptedConnect::Session(vec![ScriptedStep::Hold])],
        Duration::from_millis(50),
    );

    wait_for_state(&mut engine.state_receiver, ConnectionState::Connected).await;
    engine.shutdown_sender.send(true).unwrap();
    wait_for_state(&mut engine.state_receiver, ConnectionState::Stopped).await;

    assert_eq!(engine.attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn shutdown_mid_connect_is_safe() {
    // An empty script keeps the first connect pending forever.
    let mut engine = spawn_supervisor(vec![], Duration::from_millis(50));

    wait_for_state(&mut engine.state_receiver, ConnectionState::Connecting).await;
    engine.shutdown_sender.send(true).unwrap();
    wait_for_state(&mut engine.state_receiver, ConnectionState::Stopped).await;
}

#[tokio::test]
async fn handshake_failure_is_retried() {
    let mut engine = spawn_supervisor(
        vec![
            ScriptedConnect::Refuse,
            ScriptedConnect::Session(vec![ScriptedStep::Frame(T1_AT_40), ScriptedStep::Hold]),
        ],
        Duration::from_millis(50),
    );

    wait_for_snapshot(&mut engine.snapshot_receiver, |snapshot| {
        snapshot.contains_key("T1")
    })
    .await;

    assert_eq!(engine.attempts.load(Ordering::SeqCst), 2);
    assert_eq!(*engine.state_receiver.borrow(), ConnectionState::Connected);
}

#[tokio::test]
async fn dropped_owner_handle_stops_the_engine() {
    let mut engine = spawn_supervisor(
        vec![ScriptedConnect::Session(vec![ScriptedStep::Hold])],
        Duration::from_millis(50),
    );

    wait_for_state(&mut engine.state_receiver, ConnectionState::Connected).await;
    drop(engine.shutdown_sender);
    wait_for_state(&mut engine.state_receiver, ConnectionState::Stopped).await;
}
