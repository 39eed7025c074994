//! Connection handling abstractions for daemon listeners.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::os::unix::net::UnixStream;
use std::sync::Arc;

use rustls::{ServerConnection, StreamOwned};
use tracing::{debug, warn};

use super::LISTENER_TARGET;

/// Stream types accepted by daemon listeners.
pub enum ConnectionStream {
    /// Plain TCP connection.
    Tcp(TcpStream),
    /// TLS over TCP; the handshake completes on first read or write.
    Tls(Box<StreamOwned<ServerConnection, TcpStream>>),
    /// Unix domain socket connection.
    Unix(UnixStream),
}

impl ConnectionStream {
    /// Remote address for TCP based streams.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Tcp(stream) => stream.peer_addr().ok(),
            Self::Tls(stream) => stream.sock.peer_addr().ok(),
            Self::Unix(_) => None,
        }
    }
}

impl Read for ConnectionStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.read(buf),
            Self::Tls(stream) => stream.read(buf),
            Self::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for ConnectionStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.write(buf),
            Self::Tls(stream) => stream.write(buf),
            Self::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.flush(),
            Self::Tls(stream) => stream.flush(),
            Self::Unix(stream) => stream.flush(),
        }
    }
}

/// A datagram received by a UDP listener.
#[derive(Debug, Clone)]
pub struct Datagram {
    /// Sender address.
    pub peer: SocketAddr,
    /// Payload bytes.
    pub payload: Vec<u8>,
    socket: Arc<UdpSocket>,
}

impl Datagram {
    pub(crate) const fn new(peer: SocketAddr, payload: Vec<u8>, socket: Arc<UdpSocket>) -> Self {
        Self {
            peer,
            payload,
            socket,
        }
    }

    /// Sends `bytes` back to the sender.
    pub fn reply(&self, bytes: &[u8]) -> io::Result<usize> {
        self.socket.send_to(bytes, self.peer)
    }
}

/// Application side of a listener.
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Handles a single connection. Implementations should avoid panicking.
    fn handle(&self, stream: ConnectionStream);

    /// Handles a UDP datagram on the receiving thread. Dropped by default.
    fn handle_datagram(&self, datagram: Datagram) {
        debug!(
            target: LISTENER_TARGET,
            peer = %datagram.peer,
            bytes = datagram.payload.len(),
            "datagram dropped"
        );
    }

    /// The listener started accepting.
    fn started(&self, _listener: &str) {}

    /// The listener stopped accepting.
    fn stopped(&self, _listener: &str) {}
}

const MAX_LINE_BYTES: usize = 64 * 1024;

/// Handler that answers every newline-terminated line with the same line.
#[derive(Debug, Default)]
pub struct EchoHandler;

impl ConnectionHandler for EchoHandler {
    fn handle(&self, mut stream: ConnectionStream) {
        loop {
            let line = match read_line(&mut stream) {
                Ok(Some(line)) => line,
                Ok(None) => return,
                Err(error) => {
                    warn!(
                        target: LISTENER_TARGET,
                        error = %error,
                        "connection handler error"
                    );
                    return;
                }
            };
            if let Err(error) = stream.write_all(&line).and_then(|()| stream.flush()) {
                warn!(
                    target: LISTENER_TARGET,
                    error = %error,
                    "connection handler error"
                );
                return;
            }
        }
    }

    fn handle_datagram(&self, datagram: Datagram) {
        if let Err(error) = datagram.reply(&datagram.payload) {
            warn!(
                target: LISTENER_TARGET,
                peer = %datagram.peer,
                error = %error,
                "datagram reply failed"
            );
        }
    }
}

/// Reads one line byte by byte so nothing past the newline is consumed.
fn read_line(stream: &mut ConnectionStream) -> io::Result<Option<Vec<u8>>> {
    let mut buffer = Vec::new();
    let mut byte = [0_u8; 1];
    loop {
        let read = match stream.read(&mut byte) {
            Ok(read) => read,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => return Err(error),
        };
        if read == 0 {
            return Ok(if buffer.is_empty() { None } else { Some(buffer) });
        }
        buffer.extend_from_slice(&byte);
        if byte == [b'\n'] {
            return Ok(Some(buffer));
        }
        if buffer.len() > MAX_LINE_BYTES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "line exceeds maximum size",
            ));
        }
    }
}
