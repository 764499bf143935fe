//! Session configuration.
//!
//! `SessionProperties` collects everything a session needs before any byte
//! is exchanged: credentials, default schema, the ordered endpoint list, the
//! TLS request and its options, the authentication mechanism preference, the
//! connect deadline, and the socket factory producing duplex streams.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use mysqlx_core::{Endpoint, SocketFactory};

use crate::auth::Mechanism;
use crate::socket::TcpSocketFactory;

/// TLS parameters, passed through to the TLS layer untouched.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    /// CA certificate used to verify the server (PEM); webpki roots when
    /// absent
    pub ca_cert_path: Option<PathBuf>,
    /// Client certificate for mutual TLS (PEM)
    pub client_cert_path: Option<PathBuf>,
    /// Client private key for mutual TLS (PEM)
    pub client_key_path: Option<PathBuf>,
    /// Skip server certificate verification (self-signed deployments)
    pub danger_skip_verify: bool,
    /// SNI/verification name override; the endpoint host when absent
    pub server_name: Option<String>,
}

impl TlsOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the CA certificate path.
    pub fn ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    /// Set the client certificate path.
    pub fn client_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.client_cert_path = Some(path.into());
        self
    }

    /// Set the client private key path.
    pub fn client_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.client_key_path = Some(path.into());
        self
    }

    /// Skip server certificate verification.
    ///
    /// # Security Warning
    /// Only enable against servers you control; this disables the protection
    /// TLS exists to provide.
    pub fn skip_verify(mut self, enabled: bool) -> Self {
        self.danger_skip_verify = enabled;
        self
    }

    /// Override the SNI/verification server name.
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }
}

/// Everything needed to open a session.
#[derive(Clone)]
pub struct SessionProperties {
    /// Username presented during authentication
    pub user: String,
    /// Password presented during authentication
    pub password: String,
    /// Default schema, sent in the authentication response
    pub schema: String,
    /// Request a TLS upgrade after capability negotiation
    pub ssl: bool,
    /// TLS parameters, opaque to the protocol core
    pub ssl_options: TlsOptions,
    /// Ordered candidate endpoints
    pub endpoints: Vec<Endpoint>,
    /// Authentication mechanism preference; PLAIN when unset
    pub auth: Option<Mechanism>,
    /// Total deadline for a connect, spanning all failover attempts
    pub connect_timeout: Duration,
    /// Factory producing duplex streams
    pub socket_factory: Arc<dyn SocketFactory>,
}

impl Default for SessionProperties {
    fn default() -> Self {
        Self {
            user: String::new(),
            password: String::new(),
            schema: String::new(),
            ssl: false,
            ssl_options: TlsOptions::default(),
            endpoints: vec![Endpoint::localhost()],
            auth: None,
            connect_timeout: Duration::from_secs(10),
            socket_factory: Arc::new(TcpSocketFactory),
        }
    }
}

impl std::fmt::Debug for SessionProperties {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionProperties")
            .field("user", &self.user)
            .field("schema", &self.schema)
            .field("ssl", &self.ssl)
            .field("endpoints", &self.endpoints)
            .field("auth", &self.auth)
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl SessionProperties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the username.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Set the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    /// Set the default schema.
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    /// Request (or disable) the TLS upgrade.
    pub fn ssl(mut self, enabled: bool) -> Self {
        self.ssl = enabled;
        self
    }

    /// Set the TLS options.
    pub fn ssl_options(mut self, options: TlsOptions) -> Self {
        self.ssl_options = options;
        self
    }

    /// Replace the endpoint list.
    pub fn endpoints(mut self, endpoints: Vec<Endpoint>) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Replace the endpoint list with a single `host:port`.
    pub fn endpoint(mut self, host: impl Into<String>, port: u16) -> Self {
        self.endpoints = vec![Endpoint::new(host, port)];
        self
    }

    /// Set the authentication mechanism preference.
    pub fn auth(mut self, mechanism: Mechanism) -> Self {
        self.auth = Some(mechanism);
        self
    }

    /// Set the total connect deadline.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Replace the socket factory.
    pub fn socket_factory(mut self, factory: Arc<dyn SocketFactory>) -> Self {
        self.socket_factory = factory;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_chain() {
        let props = SessionProperties::new()
            .user("foo")
            .password("bar")
            .schema("app")
            .ssl(true)
            .endpoint("db.example.com", 33061)
            .auth(Mechanism::Mysql41)
            .connect_timeout(Duration::from_secs(5));

        assert_eq!(props.user, "foo");
        assert_eq!(props.password, "bar");
        assert_eq!(props.schema, "app");
        assert!(props.ssl);
        assert_eq!(props.endpoints.len(), 1);
        assert_eq!(props.endpoints[0].host, "db.example.com");
        assert_eq!(props.endpoints[0].port, 33061);
        assert_eq!(props.auth, Some(Mechanism::Mysql41));
        assert_eq!(props.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn default_endpoint_is_x_plugin_port() {
        let props = SessionProperties::default();
        assert_eq!(props.endpoints.len(), 1);
        assert_eq!(props.endpoints[0].port, 33060);
        assert!(!props.ssl);
        assert!(props.auth.is_none());
    }

    #[test]
    fn tls_options_builder() {
        let options = TlsOptions::new()
            .ca_cert("/etc/ssl/ca.pem")
            .client_cert("/etc/ssl/client.pem")
            .client_key("/etc/ssl/client-key.pem")
            .server_name("mysql.internal");

        assert_eq!(options.ca_cert_path, Some(PathBuf::from("/etc/ssl/ca.pem")));
        assert_eq!(options.server_name.as_deref(), Some("mysql.internal"));
        assert!(!options.danger_skip_verify);
    }
}
