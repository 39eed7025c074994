//! Test helpers for the transport module.

use std::os::unix::net::UnixStream;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use super::{ConnectionHandler, ConnectionStream, Datagram};

/// Handler that counts what it receives and records lifecycle signals.
#[derive(Default)]
pub(crate) struct CountingHandler {
    connections: AtomicUsize,
    datagrams: Mutex<Vec<Vec<u8>>>,
    started: Mutex<Vec<String>>,
    stopped: Mutex<Vec<String>>,
}

impl CountingHandler {
    pub(crate) fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub(crate) fn started_for(&self) -> Vec<String> {
        self.started.lock().expect("started lock").clone()
    }

    pub(crate) fn stopped_for(&self) -> Vec<String> {
        self.stopped.lock().expect("stopped lock").clone()
    }

    pub(crate) fn datagrams(&self) -> Vec<Vec<u8>> {
        self.datagrams.lock().expect("datagram lock").clone()
    }

    pub(crate) fn wait_for_connections(&self, expected: usize) -> bool {
        wait_until(|| self.connections() >= expected)
    }

    pub(crate) fn wait_for_datagrams(&self, expected: usize) -> bool {
        wait_until(|| self.datagrams().len() >= expected)
    }
}

impl ConnectionHandler for CountingHandler {
    fn handle(&self, _stream: ConnectionStream) {
        self.connections.fetch_add(1, Ordering::SeqCst);
    }

    fn handle_datagram(&self, datagram: Datagram) {
        self.datagrams
            .lock()
            .expect("datagram lock")
            .push(datagram.payload);
    }

    fn started(&self, listener: &str) {
        self.started
            .lock()
            .expect("started lock")
            .push(listener.to_owned());
    }

    fn stopped(&self, listener: &str) {
        self.stopped
            .lock()
            .expect("stopped lock")
            .push(listener.to_owned());
    }
}

/// A connected stream whose peer has already gone away.
pub(crate) fn connected_stream() -> ConnectionStream {
    let (stream, _peer) = UnixStream::pair().expect("socket pair");
    ConnectionStream::Unix(stream)
}

pub(crate) fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}
