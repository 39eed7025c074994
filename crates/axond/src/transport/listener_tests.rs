//! Tests for listeners and the listener manager.

use std::io::{Read, Write};
use std::net::{TcpStream, UdpSocket};
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::Arc;
use std::time::Duration;

use axon_config::{ListenerConfig, NamedRegistry, ServerConfig, TransportKind};
use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::test_utils::{CountingHandler, wait_until};
use super::{ConnectionHandler, EchoHandler, Listener, ListenerError, ListenerManager, ListenerState};

fn server(name: &str, transport: TransportKind, port: u16) -> ServerConfig {
    ServerConfig {
        transport,
        ..ServerConfig::tcp(name, "127.0.0.1", port)
    }
}

fn bound(config: ServerConfig) -> Listener {
    let mut listener = Listener::new(ListenerConfig::Server(config));
    let socket = listener
        .listen()
        .expect("spawn bind")
        .wait()
        .expect("bind listener");
    listener
        .set_listening_port(socket)
        .expect("start accepting");
    listener
}

#[fixture]
fn socket_dir() -> (TempDir, Utf8PathBuf) {
    let dir = tempfile::tempdir().expect("temp dir");
    let base = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 temp dir");
    (dir, base)
}

fn unix_config(path: Utf8PathBuf) -> ServerConfig {
    ServerConfig {
        transport: TransportKind::Unix,
        path: Some(path),
        ..ServerConfig::tcp("local", "", 0)
    }
}

#[rstest]
fn connections_wait_in_the_proxy_until_attach() {
    let mut listener = bound(server("web", TransportKind::Tcp4, 0));
    assert_eq!(listener.state(), ListenerState::Listening);
    let addr = listener.local_addr().expect("local address");

    let _first = TcpStream::connect(addr).expect("connect first client");
    let _second = TcpStream::connect(addr).expect("connect second client");
    let proxy = Arc::clone(listener.proxy());
    assert!(wait_until(|| proxy.queued() == 2), "connections queued");

    let handler = Arc::new(CountingHandler::default());
    listener
        .attach(Arc::clone(&handler) as Arc<dyn ConnectionHandler>)
        .expect("attach handler");
    assert_eq!(listener.state(), ListenerState::Attached);
    assert!(handler.wait_for_connections(2), "queue drained");
    assert_eq!(handler.started_for(), vec!["web".to_owned()]);

    listener.shutdown().expect("shutdown");
    assert_eq!(handler.stopped_for(), vec!["web".to_owned()]);
}

#[rstest]
fn attached_listener_serves_requests() {
    let mut listener = bound(server("echo", TransportKind::Tcp4, 0));
    listener
        .attach(Arc::new(EchoHandler))
        .expect("attach echo handler");
    let addr = listener.local_addr().expect("local address");

    let mut client = TcpStream::connect(addr).expect("connect client");
    client
        .set_read_timeout(Some(Duration::from_secs(2)))
        .expect("read timeout");
    client.write_all(b"hello\n").expect("write line");
    let mut reply = [0_u8; 6];
    client.read_exact(&mut reply).expect("read echo");
    assert_eq!(&reply, b"hello\n");

    listener.shutdown().expect("shutdown");
}

#[rstest]
fn attach_requires_a_listening_socket() {
    let mut listener = Listener::new(ListenerConfig::Server(server(
        "idle",
        TransportKind::Tcp4,
        0,
    )));
    let error = listener
        .attach(Arc::new(CountingHandler::default()))
        .expect_err("not listening");
    assert!(matches!(error, ListenerError::NotListening { .. }));
}

#[rstest]
fn udp_datagrams_reach_the_handler() {
    let mut listener = bound(server("dns", TransportKind::Udp4, 0));
    let handler = Arc::new(CountingHandler::default());
    listener
        .attach(Arc::clone(&handler) as Arc<dyn ConnectionHandler>)
        .expect("attach handler");
    let addr = listener.local_addr().expect("local address");

    let client = UdpSocket::bind(("127.0.0.1", 0)).expect("bind client");
    client.send_to(b"query", addr).expect("send datagram");

    assert!(handler.wait_for_datagrams(1), "datagram delivered");
    assert_eq!(handler.datagrams(), vec![b"query".to_vec()]);
    listener.shutdown().expect("shutdown");
}

#[rstest]
fn ipv6_transports_ignore_ipv4_addresses() {
    let mut listener = Listener::new(ListenerConfig::Server(server(
        "web6",
        TransportKind::Tcp6,
        0,
    )));
    let error = listener
        .listen()
        .expect("spawn bind")
        .wait()
        .expect_err("no ipv6 address");
    assert!(matches!(error, ListenerError::ResolveEmpty { .. }));
}

#[rstest]
fn unix_listener_cleans_stale_socket_files(socket_dir: (TempDir, Utf8PathBuf)) {
    let path = socket_dir.1.join("axond.sock");
    {
        let _stale = UnixListener::bind(&path).expect("bind stale listener");
    }
    assert!(path.exists(), "stale socket should remain");

    let mut listener = bound(unix_config(path.clone()));
    UnixStream::connect(&path).expect("connect unix client");

    listener.shutdown().expect("shutdown");
    assert!(!path.exists(), "listener should remove unix socket on shutdown");
}

#[rstest]
fn unix_listener_rejects_in_use_socket(socket_dir: (TempDir, Utf8PathBuf)) {
    let path = socket_dir.1.join("axond.sock");
    let _existing = UnixListener::bind(&path).expect("bind existing listener");

    let mut listener = Listener::new(ListenerConfig::Server(unix_config(path)));
    let error = listener
        .listen()
        .expect("spawn bind")
        .wait()
        .expect_err("socket in use");
    assert!(matches!(error, ListenerError::UnixInUse { .. }));
}

#[rstest]
fn unix_listener_requires_a_path() {
    let config = ServerConfig {
        path: None,
        ..unix_config(Utf8PathBuf::from("/unused"))
    };
    let mut listener = Listener::new(ListenerConfig::Server(config));
    let error = listener
        .listen()
        .expect("spawn bind")
        .wait()
        .expect_err("no path");
    assert!(matches!(error, ListenerError::MissingSocketPath { .. }));
}

#[rstest]
fn manager_reports_the_busy_port_in_the_exit_code() {
    let occupied = std::net::TcpListener::bind(("127.0.0.1", 0)).expect("occupy port");
    let port = occupied.local_addr().expect("occupied address").port();

    let services = NamedRegistry::from_entries([
        ListenerConfig::Server(server("busy", TransportKind::Tcp4, port)),
        ListenerConfig::Server(server("free", TransportKind::Tcp4, 0)),
    ])
    .expect("unique names");
    let mut manager = ListenerManager::from_config(&services);

    let failure = manager.listen_all().expect_err("port conflict");
    assert_eq!(failure.listener, "busy");
    assert_eq!(failure.exit_code(), 100_000 + i32::from(port));
    assert!(matches!(failure.source, ListenerError::BindTcp { .. }));
    assert_eq!(
        manager.get("busy").map(Listener::state),
        Some(ListenerState::Failed)
    );
}

#[rstest]
fn manager_skips_disabled_listeners() {
    let disabled = ServerConfig {
        disabled: true,
        ..server("off", TransportKind::Tcp4, 0)
    };
    let services = NamedRegistry::from_entries([
        ListenerConfig::Server(disabled),
        ListenerConfig::Server(server("on", TransportKind::Tcp4, 0)),
    ])
    .expect("unique names");
    let mut manager = ListenerManager::from_config(&services);
    manager.listen_all().expect("bind enabled listeners");

    assert!(!manager.contains("off"));
    assert_eq!(
        manager.get("on").map(Listener::state),
        Some(ListenerState::Listening)
    );
    manager.shutdown_all();
}
