//! Listener configuration records.

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::registry::Named;

/// Default bind address for listeners.
pub const DEFAULT_HOST: &str = "0.0.0.0";
/// Default listen backlog.
pub const DEFAULT_BACKLOG: u32 = 50;
/// Default certificate chain verification depth.
pub const DEFAULT_VERIFY_DEPTH: u32 = 9;

/// Socket family and protocol a listener binds.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum TransportKind {
    /// TCP over IPv4.
    #[default]
    Tcp4,
    /// TCP over IPv6.
    Tcp6,
    /// UDP over IPv4.
    Udp4,
    /// UDP over IPv6.
    Udp6,
    /// Unix domain stream socket.
    Unix,
}

impl TransportKind {
    /// Whether the transport is TCP.
    #[must_use]
    pub const fn is_tcp(self) -> bool {
        matches!(self, Self::Tcp4 | Self::Tcp6)
    }

    /// Whether the transport is UDP.
    #[must_use]
    pub const fn is_udp(self) -> bool {
        matches!(self, Self::Udp4 | Self::Udp6)
    }

    /// Whether addresses must be IPv6.
    #[must_use]
    pub const fn is_ipv6(self) -> bool {
        matches!(self, Self::Tcp6 | Self::Udp6)
    }
}

/// Fields shared by every listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Unique listener name, also used to tag log lines.
    pub name: String,
    /// Whether the listener is configured but not started.
    pub disabled: bool,
    /// Bind host.
    pub host: String,
    /// Bind port; `0` lets the OS pick one.
    pub port: u16,
    /// Listen backlog, also the number of connections buffered before a
    /// handler is attached.
    pub backlog: u32,
    /// Transport type.
    #[serde(rename = "type")]
    pub transport: TransportKind,
    /// Socket path for `unix` listeners.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<Utf8PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            disabled: false,
            host: DEFAULT_HOST.to_owned(),
            port: 0,
            backlog: DEFAULT_BACKLOG,
            transport: TransportKind::default(),
            path: None,
        }
    }
}

impl ServerConfig {
    /// Builds a TCP listener configuration.
    #[must_use]
    pub fn tcp(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Human readable endpoint used in log lines.
    #[must_use]
    pub fn endpoint(&self) -> String {
        match (&self.transport, &self.path) {
            (TransportKind::Unix, Some(path)) => format!("unix://{path}"),
            (TransportKind::Unix, None) => "unix://<unset>".to_owned(),
            (kind, _) => format!("{kind}://{}:{}", self.host, self.port),
        }
    }
}

/// TLS material for encrypted listeners.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// PEM certificate chain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert: Option<Utf8PathBuf>,
    /// PEM private key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<Utf8PathBuf>,
    /// PEM bundle of client certificate authorities.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cacert: Option<Utf8PathBuf>,
    /// Directory of client certificate authorities.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cacert_path: Option<Utf8PathBuf>,
    /// Whether client certificates are required.
    pub verify: bool,
    /// Maximum client certificate chain depth.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdepth: Option<u32>,
}

impl TlsConfig {
    /// Whether a certificate and key are configured.
    #[must_use]
    pub const fn is_configured(&self) -> bool {
        self.cert.is_some() && self.key.is_some()
    }
}

/// Plain listener.
pub type PlainServerConfig = ServerConfig;

/// TLS listener.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SslServerConfig {
    /// Common listener fields.
    #[serde(flatten)]
    pub server: ServerConfig,
    /// TLS material.
    #[serde(flatten)]
    pub tls: TlsConfig,
}

/// Sub-application mounted on an HTTP listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubApp {
    /// Application logic supplied by the embedding program.
    HttpApplication {
        /// Mount point, relative to the site root.
        url: String,
    },
    /// Static files served from a directory.
    StaticFileServer {
        /// Mount point, relative to the site root.
        url: String,
        /// Directory holding the files.
        path: Utf8PathBuf,
        /// Whether directory listings are served.
        #[serde(default)]
        list_contents: bool,
        /// File extensions never served.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        disallowed_exts: Vec<String>,
    },
}

impl SubApp {
    /// Mount point of the sub-application.
    #[must_use]
    pub fn url(&self) -> &str {
        match self {
            Self::HttpApplication { url } | Self::StaticFileServer { url, .. } => url,
        }
    }

    /// Argument key that overrides the asset directory of this sub-app on
    /// the listener `listener`.
    #[must_use]
    pub fn asset_override_key(&self, listener: &str) -> String {
        let url = self.url().trim_matches('/');
        if url.is_empty() {
            return format!("--assets-{listener}");
        }
        let mut suburl = String::with_capacity(url.len());
        let mut in_separator = false;
        for ch in url.chars() {
            if matches!(ch, '.' | '-' | '/') {
                if !in_separator {
                    suburl.push('-');
                }
                in_separator = true;
            } else {
                suburl.push(ch);
                in_separator = false;
            }
        }
        format!("--assets-{listener}-{suburl}")
    }
}

/// HTTP listener with an ordered set of sub-applications.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpServerConfig {
    /// Common listener fields.
    #[serde(flatten)]
    pub server: ServerConfig,
    /// Optional TLS material.
    #[serde(flatten)]
    pub tls: TlsConfig,
    /// Directory served at the site root when no root application exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_dir: Option<Utf8PathBuf>,
    /// Sub-applications in mount order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subapps: Vec<SubApp>,
}

impl HttpServerConfig {
    /// Builds the routing table for this listener.
    #[must_use]
    pub fn site(&self) -> SiteMap {
        let mut site = SiteMap {
            listener: self.server.name.clone(),
            routes: Vec::new(),
        };
        for subapp in &self.subapps {
            let url = normalise_url(subapp.url());
            if site.routes.iter().any(|(existing, _)| *existing == url) {
                tracing::warn!(
                    listener = %self.server.name,
                    url = %url,
                    "duplicate sub-application url ignored"
                );
                continue;
            }
            site.routes.push((url, subapp.clone()));
        }
        if !site.routes.iter().any(|(url, _)| url.is_empty())
            && let Some(dir) = &self.static_dir
        {
            site.routes.push((
                String::new(),
                SubApp::StaticFileServer {
                    url: String::new(),
                    path: dir.clone(),
                    list_contents: false,
                    disallowed_exts: Vec::new(),
                },
            ));
        }
        site
    }
}

fn normalise_url(url: &str) -> String {
    url.trim_matches('/').to_owned()
}

/// Routing table of an HTTP listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteMap {
    listener: String,
    routes: Vec<(String, SubApp)>,
}

impl SiteMap {
    /// Name of the listener the site belongs to.
    #[must_use]
    pub fn listener(&self) -> &str {
        &self.listener
    }

    /// Sub-applications in mount order.
    pub fn routes(&self) -> impl Iterator<Item = (&str, &SubApp)> {
        self.routes.iter().map(|(url, app)| (url.as_str(), app))
    }

    /// Resolves a request path to the sub-application with the longest
    /// matching mount point, falling back to the root application.
    #[must_use]
    pub fn route(&self, path: &str) -> Option<&SubApp> {
        let path = path.trim_start_matches('/');
        self.routes
            .iter()
            .filter(|(url, _)| {
                url.is_empty()
                    || path == url
                    || path
                        .strip_prefix(url.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            })
            .max_by_key(|(url, _)| url.len())
            .map(|(_, app)| app)
    }
}

/// Configured listener, tagged by kind in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListenerConfig {
    /// Plain TCP, UDP or Unix listener.
    Server(PlainServerConfig),
    /// TLS listener.
    SslServer(SslServerConfig),
    /// HTTP listener with sub-applications.
    HttpServer(HttpServerConfig),
}

impl ListenerConfig {
    /// Common listener fields.
    #[must_use]
    pub const fn server(&self) -> &ServerConfig {
        match self {
            Self::Server(server) => server,
            Self::SslServer(ssl) => &ssl.server,
            Self::HttpServer(http) => &http.server,
        }
    }

    /// Mutable access to the common listener fields.
    pub const fn server_mut(&mut self) -> &mut ServerConfig {
        match self {
            Self::Server(server) => server,
            Self::SslServer(ssl) => &mut ssl.server,
            Self::HttpServer(http) => &mut http.server,
        }
    }

    /// TLS material, when the listener encrypts its connections.
    #[must_use]
    pub const fn tls(&self) -> Option<&TlsConfig> {
        match self {
            Self::Server(_) => None,
            Self::SslServer(ssl) => Some(&ssl.tls),
            Self::HttpServer(http) => {
                if http.tls.is_configured() {
                    Some(&http.tls)
                } else {
                    None
                }
            }
        }
    }

    /// Tag used for this listener kind in the configuration file.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Server(_) => "Server",
            Self::SslServer(_) => "SslServer",
            Self::HttpServer(_) => "HttpServer",
        }
    }
}

impl Named for ListenerConfig {
    const KIND: &'static str = "listener";

    fn name(&self) -> &str {
        &self.server().name
    }

    fn is_disabled(&self) -> bool {
        self.server().disabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn site() -> SiteMap {
        HttpServerConfig {
            server: ServerConfig::tcp("web", "127.0.0.1", 8080),
            static_dir: Some(Utf8PathBuf::from("/srv/www")),
            subapps: vec![
                SubApp::HttpApplication {
                    url: "api".to_owned(),
                },
                SubApp::StaticFileServer {
                    url: "api/assets".to_owned(),
                    path: Utf8PathBuf::from("/srv/assets"),
                    list_contents: false,
                    disallowed_exts: vec![],
                },
            ],
            ..HttpServerConfig::default()
        }
        .site()
    }

    #[rstest]
    #[case("/api/v1/users", "api")]
    #[case("/api/assets/main.css", "api/assets")]
    #[case("/apiary", "")]
    #[case("/", "")]
    fn routes_by_longest_prefix(#[case] path: &str, #[case] expected: &str) {
        let site = site();
        let app = site.route(path).expect("root fallback should always match");
        assert_eq!(app.url(), expected);
    }

    #[rstest]
    #[case("", "--assets-web")]
    #[case("static", "--assets-web-static")]
    #[case("/js/vendor.min/", "--assets-web-js-vendor-min")]
    fn asset_override_keys_flatten_urls(#[case] url: &str, #[case] expected: &str) {
        let app = SubApp::StaticFileServer {
            url: url.to_owned(),
            path: Utf8PathBuf::from("/tmp"),
            list_contents: false,
            disallowed_exts: vec![],
        };
        assert_eq!(app.asset_override_key("web"), expected);
    }

    #[rstest]
    fn http_listener_without_certificates_is_plain() {
        let listener = ListenerConfig::HttpServer(HttpServerConfig::default());
        assert!(listener.tls().is_none());
    }
}
