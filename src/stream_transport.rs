use crate::error::{Error, ErrorKind};

use futures::future::BoxFuture;
use std::fmt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;

/// Address of the telemetry stream, `scheme://host:port/path`.
///
/// The reconnect target is always identical to the initial target, so the
/// endpoint is parsed once and reused for the lifetime of the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamEndpoint {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl StreamEndpoint {
    pub fn parse(address: &str) -> Result<StreamEndpoint, Error> {
        let (scheme, rest) = match address.split_once("://") {
            Some(parts) => parts,
            None => {
                return Err(Error::new(
                    ErrorKind::InvalidEndpoint,
                    format!("stream endpoint is missing a scheme: {}", address),
                ))
            }
        };

        let (authority, path) = match rest.split_once('/') {
            Some((authority, path)) => (authority, format!("/{}", path)),
            None => (rest, "/".to_string()),
        };

        let (host, port) = match authority.split_once(':') {
            Some(parts) => parts,
            None => {
                return Err(Error::new(
                    ErrorKind::InvalidEndpoint,
                    format!("stream endpoint is missing a port: {}", address),
                ))
            }
        };

        let port = match port.parse::<u16>() {
            Ok(port) => port,
            Err(error) => {
                return Err(Error::new(
                    ErrorKind::InvalidEndpoint,
                    format!("stream endpoint has an invalid port: {}", error),
                ))
            }
        };

        if scheme.is_empty() || host.is_empty() {
            return Err(Error::new(
                ErrorKind::InvalidEndpoint,
                format!("stream endpoint is incomplete: {}", address),
            ));
        }

        Ok(StreamEndpoint {
            scheme: scheme.to_string(),
            host: host.to_string(),
            port,
            path,
        })
    }
}

impl fmt::Display for StreamEndpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "{}://{}:{}{}",
            self.scheme, self.host, self.port, self.path
        )
    }
}

/// Establishes connections to the telemetry stream.
///
/// The handshake itself is a transport detail hidden behind this seam;
/// the supervisor only distinguishes success from `HandshakeFailed`.
pub trait TelemetryConnector: Send {
    type Connection: TelemetryConnection + 'static;

    fn connect<'a>(
        &'a mut self,
        endpoint: &'a StreamEndpoint,
    ) -> BoxFuture<'a, Result<Self::Connection, Error>>;
}

/// One established connection delivering text frames in arrival order.
///
/// `Ok(None)` signals a clean close, `Err` an unclean one; the engine
/// treats both identically.
pub trait TelemetryConnection: Send {
    fn next_frame(&mut self) -> BoxFuture<'_, Result<Option<String>, Error>>;
}

/// Stream transport reading one frame per newline-terminated line over a
/// plain TCP connection. Any connector honoring the traits above can
/// replace it without touching the engine.
pub struct TcpLineConnector;

impl TelemetryConnector for TcpLineConnector {
    type Connection = TcpLineConnection;

    fn connect<'a>(
        &'a mut self,
        endpoint: &'a StreamEndpoint,
    ) -> BoxFuture<'a, Result<TcpLineConnection, Error>> {
        Box::pin(async move {
            let stream = match TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await {
                Ok(stream) => stream,
                Err(error) => {
                    return Err(Error::new(
                        ErrorKind::HandshakeFailed,
                        format!("failed to connect to {}: {}", endpoint, error),
                    ))
                }
            };

            Ok(TcpLineConnection {
                reader: BufReader::new(stream),
            })
        })
    }
}

#[derive(Debug)]
pub struct TcpLineConnection {
    reader: BufReader<TcpStream>,
}

impl TelemetryConnection for TcpLineConnection {
    fn next_frame(&mut self) -> BoxFuture<'_, Result<Option<String>, Error>> {
        Box::pin(async move {
            let mut line = String::new();

            loop {
                line.clear();

                match self.reader.read_line(&mut line).await {
                    Ok(0) => return Ok(None),
                    Ok(_) => {
                        let frame = line.trim_end();

                        // Blank lines are keep-alive noise, not frames.
                        if frame.is_empty() {
                            continue;
                        }

                        return Ok(Some(frame.to_string()));
                    }
                    Err(error) => {
                        return Err(Error::new(
                            ErrorKind::TransportClosed,
                            format!("telemetry stream read failed: {}", error),
                        ))
                    }
                }
            }
        })
    }
}

#[cfg(test)]
use tokio::io::AsyncWriteExt;
#[cfg(test)]
use tokio::net::TcpListener;

#[test]
fn parses_full_endpoint() {
    let endpoint = StreamEndpoint::parse("tcp://127.0.0.1:8080/telemetry").unwrap();

    assert_eq!(endpoint.scheme, "tcp");
    assert_eq!(endpoint.host, "127.0.0.1");
    assert_eq!(endpoint.port, 8080);
    assert_eq!(endpoint.path, "/telemetry");
    assert_eq!(endpoint.to_string(), "tcp://127.0.0.1:8080/telemetry");
}

#[test]
fn parses_endpoint_without_path() {
    let endpoint = StreamEndpoint::parse("tcp://localhost:9000").unwrap();

    assert_eq!(endpoint.host, "localhost");
    assert_eq!(endpoint.path, "/");
}

#[test]
fn rejects_endpoint_without_scheme() {
    let error = StreamEndpoint::parse("localhost:9000/telemetry").unwrap_err();

    assert_eq!(error.kind(), ErrorKind::InvalidEndpoint);
}

#[test]
fn rejects_endpoint_without_port() {
    let error = StreamEndpoint::parse("tcp://localhost/telemetry").unwrap_err();

    assert_eq!(error.kind(), ErrorKind::InvalidEndpoint);
}

#[test]
fn rejects_endpoint_with_garbage_port() {
    let error = StreamEndpoint::parse("tcp://localhost:port/telemetry").unwrap_err();

    assert_eq!(error.kind(), ErrorKind::InvalidEndpoint);
}

#[tokio::test]
async fn tcp_connection_delivers_frames_in_order_until_close() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        socket
            .write_all(b"frame one\n\nframe two\n")
            .await
            .unwrap();
        socket.shutdown().await.unwrap();
    });

    let endpoint = StreamEndpoint::parse(&format!("tcp://127.0.0.1:{}/telemetry", port)).unwrap();
    let mut connector = TcpLineConnector;
    let mut connection = connector.connect(&endpoint).await.unwrap();

    assert_eq!(
        connection.next_frame().await.unwrap(),
        Some("frame one".to_string())
    );
    assert_eq!(
        connection.next_frame().await.unwrap(),
        Some("frame two".to_string())
    );
    assert_eq!(connection.next_frame().await.unwrap(), None);
}

#[tokio::test]
async fn connecting_to_a_closed_port_fails_the_handshake() {
    // Bind and drop immediately so the port is very likely unoccupied.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let endpoint = StreamEndpoint::parse(&format!("tcp://127.0.0.1:{}/telemetry", port)).unwrap();
    let mut connector = TcpLineConnector;

    let error = connector.connect(&endpoint).await.unwrap_err();

    assert_eq!(error.kind(), ErrorKind::HandshakeFailed);
}
