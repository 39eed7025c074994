//! Two-phase listener: bind on a helper thread, then accept into a proxy.

use std::fs;
use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs, UdpSocket};
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::thread;
use std::time::Duration;

use axon_config::{ListenerConfig, TransportKind};
use camino::{Utf8Path, Utf8PathBuf};
use rustls::{ServerConfig, ServerConnection, StreamOwned};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use strum::Display;
use tracing::{error, info, warn};

use super::handler::Datagram;
use super::{ConnectionHandler, ConnectionStream, FactoryProxy, LISTENER_TARGET, ListenerError};
use super::tls;
use crate::reactor::mark_reactor_thread;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(25);
const ERROR_BACKOFF: Duration = Duration::from_millis(150);
const MAX_DATAGRAM: usize = 64 * 1024;

/// Lifecycle state of a [`Listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ListenerState {
    /// Created from configuration, no socket yet.
    Unbound,
    /// A bind is running on a helper thread.
    Binding,
    /// Accepting into the proxy.
    Listening,
    /// Accepting with the application handler attached.
    Attached,
    /// The bind failed.
    Failed,
}

/// Socket produced by a completed bind.
#[derive(Debug)]
pub enum BoundSocket {
    /// TCP listener, with TLS settings for encrypted listeners.
    Tcp {
        /// Listening socket.
        listener: TcpListener,
        /// TLS configuration wrapped around accepted streams.
        tls: Option<Arc<ServerConfig>>,
    },
    /// UDP socket.
    Udp(UdpSocket),
    /// Unix domain listener and the path it owns.
    Unix {
        /// Listening socket.
        listener: UnixListener,
        /// Socket file removed on shutdown.
        path: Utf8PathBuf,
    },
}

impl BoundSocket {
    /// Local address for TCP and UDP sockets.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Tcp { listener, .. } => listener.local_addr().ok(),
            Self::Udp(socket) => socket.local_addr().ok(),
            Self::Unix { .. } => None,
        }
    }

    fn set_nonblocking(&self) -> io::Result<()> {
        match self {
            Self::Tcp { listener, .. } => listener.set_nonblocking(true),
            Self::Udp(socket) => socket.set_nonblocking(true),
            Self::Unix { listener, .. } => listener.set_nonblocking(true),
        }
    }

    pub(crate) fn cleanup(&self) {
        if let Self::Unix { path, .. } = self {
            cleanup_unix_socket(path);
        }
    }
}

/// Bind running on a helper thread.
pub struct PendingBind {
    listener: String,
    handle: thread::JoinHandle<Result<BoundSocket, ListenerError>>,
}

impl PendingBind {
    /// Name of the listener being bound.
    #[must_use]
    pub fn listener(&self) -> &str {
        &self.listener
    }

    /// Waits for the bind to finish.
    ///
    /// # Errors
    /// Returns the bind error, or [`ListenerError::ThreadPanic`] when the
    /// helper thread panicked.
    pub fn wait(self) -> Result<BoundSocket, ListenerError> {
        self.handle
            .join()
            .map_err(|_| ListenerError::ThreadPanic)?
    }
}

/// Handle to a running accept loop.
pub struct ListenerHandle {
    shutdown: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ListenerHandle {
    /// Asks the accept loop to stop.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Waits for the accept loop to exit.
    ///
    /// # Errors
    /// Returns [`ListenerError::ThreadPanic`] when the loop panicked.
    pub fn join(mut self) -> Result<(), ListenerError> {
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| ListenerError::ThreadPanic),
            None => Ok(()),
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

/// A configured listener and its runtime state.
pub struct Listener {
    config: ListenerConfig,
    proxy: Arc<FactoryProxy>,
    state: ListenerState,
    handle: Option<ListenerHandle>,
    local_addr: Option<SocketAddr>,
}

impl Listener {
    /// Creates an unbound listener whose proxy buffers up to `backlog`
    /// connections.
    #[must_use]
    pub fn new(config: ListenerConfig) -> Self {
        let server = config.server();
        let capacity = usize::try_from(server.backlog).unwrap_or(usize::MAX);
        let proxy = Arc::new(FactoryProxy::new(server.name.clone(), capacity));
        Self {
            config,
            proxy,
            state: ListenerState::Unbound,
            handle: None,
            local_addr: None,
        }
    }

    /// Listener name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.server().name
    }

    /// Configuration the listener was built from.
    #[must_use]
    pub const fn config(&self) -> &ListenerConfig {
        &self.config
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ListenerState {
        self.state
    }

    /// Address the socket is bound to, once listening.
    #[must_use]
    pub const fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Connection proxy fed by the accept loop.
    #[must_use]
    pub const fn proxy(&self) -> &Arc<FactoryProxy> {
        &self.proxy
    }

    /// Starts binding the socket on a helper thread.
    ///
    /// # Errors
    /// Returns [`ListenerError::Spawn`] when the thread cannot be created.
    pub fn listen(&mut self) -> Result<PendingBind, ListenerError> {
        let config = self.config.clone();
        let name = self.name().to_owned();
        let handle = thread::Builder::new()
            .name(format!("{name}-bind"))
            .spawn(move || bind(&config))
            .map_err(|source| ListenerError::Spawn { source })?;
        self.state = ListenerState::Binding;
        Ok(PendingBind {
            listener: name,
            handle,
        })
    }

    /// Completes the bind and starts accepting into the proxy.
    ///
    /// # Errors
    /// Returns an error when the socket cannot be made non-blocking or the
    /// accept thread cannot be spawned.
    pub fn set_listening_port(&mut self, socket: BoundSocket) -> Result<(), ListenerError> {
        if let Err(source) = socket.set_nonblocking() {
            socket.cleanup();
            return Err(ListenerError::NonBlocking { source });
        }
        self.local_addr = socket.local_addr();

        let shutdown = Arc::new(AtomicBool::new(false));
        let loop_shutdown = Arc::clone(&shutdown);
        let proxy = Arc::clone(&self.proxy);
        let name = self.name().to_owned();
        let handle = thread::Builder::new()
            .name(format!("{name}-accept"))
            .spawn(move || run_accept_loop(&name, socket, &proxy, &loop_shutdown))
            .map_err(|source| ListenerError::Spawn { source })?;

        info!(
            target: LISTENER_TARGET,
            listener = %self.name(),
            endpoint = %self.config.server().endpoint(),
            local_addr = ?self.local_addr,
            "listener active"
        );
        self.state = ListenerState::Listening;
        self.handle = Some(ListenerHandle {
            shutdown,
            handle: Some(handle),
        });
        Ok(())
    }

    /// Marks the listener as failed.
    pub fn fail(&mut self, failure: &ListenerError) {
        error!(
            target: LISTENER_TARGET,
            listener = %self.name(),
            endpoint = %self.config.server().endpoint(),
            error = %failure,
            "listener failed to bind"
        );
        self.state = ListenerState::Failed;
    }

    /// Attaches the application handler.
    ///
    /// # Errors
    /// Returns [`ListenerError::NotListening`] when the listener is not
    /// accepting and [`ListenerError::AlreadyAttached`] on a second attach.
    pub fn attach(&mut self, handler: Arc<dyn ConnectionHandler>) -> Result<(), ListenerError> {
        match self.state {
            ListenerState::Listening => {}
            ListenerState::Attached => {
                return Err(ListenerError::AlreadyAttached {
                    listener: self.name().to_owned(),
                });
            }
            _ => {
                return Err(ListenerError::NotListening {
                    listener: self.name().to_owned(),
                });
            }
        }
        self.proxy.attach(handler)?;
        self.state = ListenerState::Attached;
        Ok(())
    }

    /// Stops the accept loop and waits for it to exit.
    ///
    /// # Errors
    /// Returns [`ListenerError::ThreadPanic`] when the loop panicked.
    pub fn shutdown(&mut self) -> Result<(), ListenerError> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        handle.shutdown();
        let joined = handle.join();
        if self.state != ListenerState::Failed {
            self.state = ListenerState::Unbound;
        }
        info!(
            target: LISTENER_TARGET,
            listener = %self.name(),
            "listener stopped"
        );
        joined
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("name", &self.name())
            .field("state", &self.state)
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

/// Binds the socket described by `config`.
pub(crate) fn bind(config: &ListenerConfig) -> Result<BoundSocket, ListenerError> {
    let server = config.server();
    match server.transport {
        TransportKind::Unix => {
            let path = server
                .path
                .as_deref()
                .ok_or_else(|| ListenerError::MissingSocketPath {
                    listener: server.name.clone(),
                })?;
            let listener = bind_unix(path)?;
            Ok(BoundSocket::Unix {
                listener,
                path: path.to_path_buf(),
            })
        }
        kind if kind.is_udp() => {
            let addr = resolve(&server.host, server.port, kind)?;
            let socket = new_socket(addr, Type::DGRAM, Protocol::UDP)?;
            socket
                .bind(&SockAddr::from(addr))
                .map_err(|source| ListenerError::BindUdp { addr, source })?;
            Ok(BoundSocket::Udp(socket.into()))
        }
        kind => {
            let tls = config
                .tls()
                .map(|tls| tls::server_config(&server.name, tls))
                .transpose()?;
            let addr = resolve(&server.host, server.port, kind)?;
            let socket = new_socket(addr, Type::STREAM, Protocol::TCP)?;
            let backlog = i32::try_from(server.backlog).unwrap_or(i32::MAX);
            socket
                .bind(&SockAddr::from(addr))
                .and_then(|()| socket.listen(backlog))
                .map_err(|source| ListenerError::BindTcp { addr, source })?;
            Ok(BoundSocket::Tcp {
                listener: socket.into(),
                tls,
            })
        }
    }
}

fn resolve(host: &str, port: u16, transport: TransportKind) -> Result<SocketAddr, ListenerError> {
    let mut addrs = (host, port)
        .to_socket_addrs()
        .map_err(|source| ListenerError::Resolve {
            host: host.to_owned(),
            port,
            source,
        })?;
    addrs
        .find(|addr| addr.is_ipv6() == transport.is_ipv6())
        .ok_or_else(|| ListenerError::ResolveEmpty {
            host: host.to_owned(),
            port,
            transport,
        })
}

fn new_socket(addr: SocketAddr, ty: Type, protocol: Protocol) -> Result<Socket, ListenerError> {
    let prepare = || -> io::Result<Socket> {
        let socket = Socket::new(Domain::for_address(addr), ty, Some(protocol))?;
        socket.set_reuse_address(true)?;
        if addr.is_ipv6() {
            socket.set_only_v6(true)?;
        }
        Ok(socket)
    };
    prepare().map_err(|source| ListenerError::Socket { addr, source })
}

fn bind_unix(path: &Utf8Path) -> Result<UnixListener, ListenerError> {
    if path.exists() {
        let metadata = fs::symlink_metadata(path).map_err(|source| ListenerError::UnixMetadata {
            path: path.to_path_buf(),
            source,
        })?;
        if !metadata.file_type().is_socket() {
            return Err(ListenerError::UnixNotSocket {
                path: path.to_path_buf(),
            });
        }
        match UnixStream::connect(path) {
            Ok(_stream) => {
                return Err(ListenerError::UnixInUse {
                    path: path.to_path_buf(),
                });
            }
            Err(error)
                if matches!(
                    error.kind(),
                    io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound
                ) =>
            {
                fs::remove_file(path).map_err(|source| ListenerError::UnixCleanup {
                    path: path.to_path_buf(),
                    source,
                })?;
            }
            Err(source) => {
                return Err(ListenerError::UnixConnect {
                    path: path.to_path_buf(),
                    source,
                });
            }
        }
    }

    UnixListener::bind(path).map_err(|source| ListenerError::BindUnix {
        path: path.to_path_buf(),
        source,
    })
}

fn cleanup_unix_socket(path: &Utf8Path) {
    if let Err(error) = fs::remove_file(path)
        && error.kind() != io::ErrorKind::NotFound
    {
        warn!(
            target: LISTENER_TARGET,
            error = %error,
            path = %path,
            "failed to remove unix socket file"
        );
    }
}

enum Incoming {
    Stream(ConnectionStream),
    Datagram(Datagram),
}

enum Acceptor {
    Tcp(TcpListener, Option<Arc<ServerConfig>>),
    Udp(Arc<UdpSocket>, Vec<u8>),
    Unix(UnixListener, Utf8PathBuf),
}

impl Acceptor {
    fn accept(&mut self) -> io::Result<Option<Incoming>> {
        match self {
            Self::Tcp(listener, tls) => match listener.accept() {
                Ok((stream, _)) => {
                    stream.set_nonblocking(false)?;
                    let stream = match tls {
                        Some(config) => {
                            let connection = ServerConnection::new(Arc::clone(config))
                                .map_err(io::Error::other)?;
                            ConnectionStream::Tls(Box::new(StreamOwned::new(connection, stream)))
                        }
                        None => ConnectionStream::Tcp(stream),
                    };
                    Ok(Some(Incoming::Stream(stream)))
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
                Err(error) => Err(error),
            },
            Self::Udp(socket, buffer) => match socket.recv_from(buffer) {
                Ok((len, peer)) => Ok(Some(Incoming::Datagram(Datagram::new(
                    peer,
                    buffer[..len].to_vec(),
                    Arc::clone(socket),
                )))),
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
                Err(error) => Err(error),
            },
            Self::Unix(listener, _) => match listener.accept() {
                Ok((stream, _)) => {
                    stream.set_nonblocking(false)?;
                    Ok(Some(Incoming::Stream(ConnectionStream::Unix(stream))))
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
                Err(error) => Err(error),
            },
        }
    }
}

impl From<BoundSocket> for Acceptor {
    fn from(socket: BoundSocket) -> Self {
        match socket {
            BoundSocket::Tcp { listener, tls } => Self::Tcp(listener, tls),
            BoundSocket::Udp(socket) => Self::Udp(Arc::new(socket), vec![0; MAX_DATAGRAM]),
            BoundSocket::Unix { listener, path } => Self::Unix(listener, path),
        }
    }
}

fn run_accept_loop(name: &str, socket: BoundSocket, proxy: &FactoryProxy, shutdown: &AtomicBool) {
    mark_reactor_thread();
    let mut acceptor = Acceptor::from(socket);
    proxy.started();

    let mut last_error = None::<io::ErrorKind>;
    while !shutdown.load(Ordering::SeqCst) {
        match acceptor.accept() {
            Ok(Some(Incoming::Stream(stream))) => {
                last_error = None;
                proxy.on_connection(stream);
            }
            Ok(Some(Incoming::Datagram(datagram))) => {
                last_error = None;
                proxy.on_datagram(datagram);
            }
            Ok(None) => thread::sleep(ACCEPT_BACKOFF),
            Err(error) => {
                let kind = error.kind();
                if last_error != Some(kind) {
                    warn!(
                        target: LISTENER_TARGET,
                        listener = name,
                        error = %error,
                        "socket accept error"
                    );
                }
                last_error = Some(kind);
                thread::sleep(ERROR_BACKOFF);
            }
        }
    }

    proxy.stopped();
    if let Acceptor::Unix(_, path) = &acceptor {
        cleanup_unix_socket(path);
    }
}
