//! Connection configuration.
//!
//! [`ConnectOptions`] is the external collaborator referred to by the core
//! specification as "the defaults/configuration loader": it owns the
//! recognized configuration keys (§6) and their defaults, and seeds the
//! [`crate::env::Environment`] a freshly connected connection starts from.

use std::time::Duration;

/// Configuration recognized when establishing a connection.
///
/// Marked `#[non_exhaustive]` so new fields can be added without breaking
/// callers who construct via [`ConnectOptions::new`] and the builder methods.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ConnectOptions {
    /// Server hostname or IP address.
    pub host: String,

    /// Server TCP port.
    pub port: u16,

    /// Login user name.
    pub user: String,

    /// Login password.
    pub password: String,

    /// Database to `use` after a successful login.
    pub database: Option<String>,

    /// Client application name, passed into the login token.
    pub app_name: String,

    /// Client library name, passed into the login token.
    pub lib_name: String,

    /// Requested session language, passed into the login token.
    pub language: String,

    /// Initial TDS packet size in bytes; the server may renegotiate this via
    /// an `envchange`.
    pub packet_size: u32,

    /// Default timeout applied to a call when the caller doesn't supply one
    /// explicitly.
    pub default_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5000,
            user: String::new(),
            password: String::new(),
            database: None,
            app_name: "tds5-client".to_string(),
            lib_name: "tds5-client".to_string(),
            language: "us_english".to_string(),
            packet_size: tds5_protocol::DEFAULT_PACKET_SIZE as u32,
            default_timeout: Duration::from_secs(30),
        }
    }
}

impl ConnectOptions {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the server host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the server port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the login user name.
    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Set the login password.
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    /// Set the database to `use` after login.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the client application name.
    #[must_use]
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Set the client library name.
    #[must_use]
    pub fn lib_name(mut self, name: impl Into<String>) -> Self {
        self.lib_name = name.into();
        self
    }

    /// Set the requested session language.
    #[must_use]
    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Set the initial TDS packet size.
    #[must_use]
    pub fn packet_size(mut self, packet_size: u32) -> Self {
        self.packet_size = packet_size;
        self
    }

    /// Set the default per-call timeout.
    #[must_use]
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }
}
