use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// An inbound frame could not be parsed into a telemetry record.
    MalformedPayload,
    /// Establishing a connection to the telemetry stream failed.
    HandshakeFailed,
    /// An established connection was closed or failed mid-stream.
    TransportClosed,
    /// The configured stream endpoint could not be understood.
    InvalidEndpoint,
    /// Infrastructure failure outside the taxonomy above, for custom
    /// connector implementations.
    InternalFailure,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Error {
        Error {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Error {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.message)
    }
}

impl std::error::Error for Error {}
