use serde::{Deserialize, Serialize};

/// One truck's point-in-time sensor reading as emitted by the telemetry
/// stream, one message per truck per tick.
///
/// `timestamp` is producer-supplied and carried through for display only;
/// the fleet store orders records by arrival, never by this field.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct TruckTelemetry {
    pub truck_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: f64,
    pub engine_temp: f64,
    pub timestamp: String,
}

impl TruckTelemetry {
    pub fn new(
        truck_id: String,
        latitude: f64,
        longitude: f64,
        speed: f64,
        engine_temp: f64,
        timestamp: String,
    ) -> Self {
        Self {
            truck_id,
            latitude,
            longitude,
            speed,
            engine_temp,
            timestamp,
        }
    }
}
