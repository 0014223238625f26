pub mod connection_state;
pub mod connection_supervisor;
pub mod error;
pub mod fleet_state_store;
pub mod fleet_tracker_client;
pub mod fleet_tracking_config;
pub mod stream_transport;
pub mod telemetry_decoder;
pub mod truck_telemetry;
