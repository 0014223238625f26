use crate::error::{Error, ErrorKind};
use crate::truck_telemetry::TruckTelemetry;

/// Parses a single raw text frame into a validated telemetry record.
///
/// Pure function with no side effects: a frame either becomes a complete
/// `TruckTelemetry` or is rejected with `ErrorKind::MalformedPayload`.
/// Unknown additional fields are ignored. The caller is expected to log
/// rejections and discard the frame.
pub fn decode(raw: &str) -> Result<TruckTelemetry, Error> {
    let telemetry = match serde_json::from_str::<TruckTelemetry>(raw) {
        Ok(telemetry) => telemetry,
        Err(error) => {
            return Err(Error::new(
                ErrorKind::MalformedPayload,
                format!("failed to parse telemetry frame: {}", error),
            ))
        }
    };

    // The truck id keys the fleet store, an empty one would silently
    // collapse distinct trucks into a single entry.
    if telemetry.truck_id.is_empty() {
        return Err(Error::new(
            ErrorKind::MalformedPayload,
            "telemetry frame carries an empty truck_id",
        ));
    }

    Ok(telemetry)
}

#[cfg(test)]
const VALID_FRAME: &str = r#"{"truck_id":"TRUCK-001","latitude":12.9716,"longitude":77.5946,"speed":42.5,"engine_temp":92.0,"timestamp":"2026-08-07T10:00:00Z"}"#;

#[test]
fn decodes_valid_frame() {
    let telemetry = decode(VALID_FRAME).unwrap();

    assert_eq!(telemetry.truck_id, "TRUCK-001");
    assert_eq!(telemetry.latitude, 12.9716);
    assert_eq!(telemetry.longitude, 77.5946);
    assert_eq!(telemetry.speed, 42.5);
    assert_eq!(telemetry.engine_temp, 92.0);
    assert_eq!(telemetry.timestamp, "2026-08-07T10:00:00Z");
}

#[test]
fn ignores_unknown_fields() {
    let raw = r#"{"truck_id":"TRUCK-001","latitude":1.0,"longitude":2.0,"speed":3.0,"engine_temp":4.0,"timestamp":"t","route":"MG Road","driver":"unknown"}"#;

    let telemetry = decode(raw).unwrap();

    assert_eq!(telemetry.truck_id, "TRUCK-001");
    assert_eq!(telemetry.speed, 3.0);
}

#[test]
fn rejects_missing_truck_id() {
    let raw = r#"{"latitude":1.0,"longitude":2.0,"speed":3.0,"engine_temp":4.0,"timestamp":"t"}"#;

    let error = decode(raw).unwrap_err();

    assert_eq!(error.kind(), ErrorKind::MalformedPayload);
}

#[test]
fn rejects_empty_truck_id() {
    let raw = r#"{"truck_id":"","latitude":1.0,"longitude":2.0,"speed":3.0,"engine_temp":4.0,"timestamp":"t"}"#;

    let error = decode(raw).unwrap_err();

    assert_eq!(error.kind(), ErrorKind::MalformedPayload);
}

#[test]
fn rejects_non_numeric_speed() {
    let raw = r#"{"truck_id":"T1","latitude":1.0,"longitude":2.0,"speed":"fast","engine_temp":4.0,"timestamp":"t"}"#;

    let error = decode(raw).unwrap_err();

    assert_eq!(error.kind(), ErrorKind::MalformedPayload);
}

#[test]
fn rejects_non_numeric_latitude() {
    let raw = r#"{"truck_id":"T1","latitude":"north","longitude":2.0,"speed":3.0,"engine_temp":4.0,"timestamp":"t"}"#;

    assert!(decode(raw).is_err());
}

#[test]
fn rejects_frame_that_is_not_json() {
    assert!(decode("truck telemetry").is_err());
    assert!(decode("").is_err());
}
