//! Connection state machine (§4.1) and request pipeline (§4.2).
//!
//! [`Connection`] owns the one TCP socket, the session state, negotiated
//! capabilities, the server environment, and the prepared-statement
//! registry, and exposes the public request operations. Per the scheduling
//! model (§5) a connection is not `Send`-shared: every operation borrows it
//! exclusively for the call's duration and mutates it in place, the natural
//! Rust shape of "an owned value passed between await points" on a
//! single-threaded-per-connection runtime.

use std::io;

use bytes::BytesMut;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{self, Duration};

use tds5_protocol::{
    Capability, DynamicFlags, DynamicOp, EnvChange, LoginAck, LoginEnv, LoginSubState, PacketType,
    ServerIdentity, TdsVersion, TokenDescriptor, Value, encode_packets, encode_query_text,
    encode_tokens,
};

use crate::assemble::OpResult;
use crate::config::ConnectOptions;
use crate::consume::{ConsumeOutcome, consume};
use crate::env::Environment;
use crate::error::Error;
use crate::prepared::PreparedRegistry;
use crate::reassemble::reassemble;

/// Session state, per §4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket; initial and terminal state.
    Disconnected,
    /// Logged in and ready for requests.
    Connected,
    /// The server demanded a further authentication exchange this core
    /// doesn't drive (§9).
    AuthNegotiate,
}

/// A TDS 5.0 connection: the socket, session state, and everything the
/// request layer needs to build and interpret requests.
pub struct Connection {
    socket: Option<TcpStream>,
    recv_buffer: BytesMut,
    state: ConnectionState,
    packet_size: u32,
    tds_version: Option<TdsVersion>,
    server: Option<ServerIdentity>,
    capability: Option<Capability>,
    environment: Environment,
    prepared: PreparedRegistry,
    base_options: ConnectOptions,
}

impl Connection {
    pub(crate) fn offline(opts: ConnectOptions) -> Self {
        let packet_size = opts.packet_size;
        let environment = Environment::from_options(&opts);
        Self {
            socket: None,
            recv_buffer: BytesMut::new(),
            state: ConnectionState::Disconnected,
            packet_size,
            tds_version: None,
            server: None,
            capability: None,
            environment,
            prepared: PreparedRegistry::default(),
            base_options: opts,
        }
    }

    /// The current session state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The negotiated packet size, in bytes.
    #[must_use]
    pub fn packet_size(&self) -> u32 {
        self.packet_size
    }

    /// The negotiated TDS protocol version, once logged in.
    #[must_use]
    pub fn tds_version(&self) -> Option<TdsVersion> {
        self.tds_version
    }

    /// The server identity reported at login, once logged in.
    #[must_use]
    pub fn server(&self) -> Option<&ServerIdentity> {
        self.server.as_ref()
    }

    /// The negotiated capability bitsets, once logged in.
    #[must_use]
    pub fn capability(&self) -> Option<Capability> {
        self.capability
    }

    /// The current environment mapping.
    #[must_use]
    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// Open a TCP connection and perform the login handshake.
    pub async fn connect(opts: ConnectOptions, timeout: Duration) -> Result<Self, Error> {
        let mut conn = Self::offline(opts.clone());
        conn.connect_and_login(opts, timeout).await?;
        Ok(conn)
    }

    /// Log out, drain the reply, and close the socket. Always succeeds and
    /// returns the environment so a caller can reconnect with the same
    /// parameters.
    pub async fn disconnect(&mut self, timeout: Duration) -> Environment {
        if self.state == ConnectionState::Connected && timeout > Duration::ZERO {
            let descriptors = vec![TokenDescriptor::Logout];
            let _ = self.send_and_receive(descriptors, PacketType::Query, timeout).await;
        }
        self.force_disconnect();
        self.environment.clone()
    }

    /// Disconnect (with no timeout) and reconnect using the preserved
    /// environment and the configured default timeout. Used by callers that
    /// want to force a reconnect outside of an operation's own timeout.
    pub async fn reconnect(&mut self) -> Result<(), Error> {
        let timeout = self.base_options.default_timeout;
        self.reconnect_with_timeout(timeout).await
    }

    /// Disconnect (with no timeout) and reconnect using the preserved
    /// environment, honoring `timeout` for the reconnect itself. Used
    /// transparently by request operations invoked on a non-`Connected`
    /// connection, so a caller's own timeout governs the reconnect instead
    /// of silently falling back to the configured default.
    async fn reconnect_with_timeout(&mut self, timeout: Duration) -> Result<(), Error> {
        let _ = self.disconnect(Duration::ZERO).await;
        let opts = self.environment.to_options(&self.base_options);
        self.connect_and_login(opts, timeout).await
    }

    /// Issue a query and parse the reply into results. If the connection
    /// isn't `Connected`, reconnects once using the preserved environment
    /// before retrying.
    pub async fn sql_query(&mut self, text: &str, timeout: Duration) -> Result<Vec<OpResult>, Error> {
        self.ensure_connected(timeout).await?;
        self.query_inner(text, timeout).await
    }

    /// Prepare a server-side statement, remembering its parameter format for
    /// later `execute` calls.
    pub async fn prepare(
        &mut self,
        stmt_id: Vec<u8>,
        sql: &str,
        timeout: Duration,
    ) -> Result<(), Error> {
        self.ensure_connected(timeout).await?;

        let body = format!("create proc {} as {sql}", String::from_utf8_lossy(&stmt_id)).into_bytes();
        let descriptors = vec![TokenDescriptor::Dynamic {
            op: DynamicOp::Prepare,
            flags: DynamicFlags::empty(),
            stmt_id: stmt_id.clone(),
            body,
        }];

        let outcome = self.send_and_receive(descriptors, PacketType::Query, timeout).await?;
        let ack = outcome
            .last_dynamic_ack
            .ok_or_else(|| Error::local("prepare reply did not include a dynamic acknowledgment"))?;
        let params_format = outcome
            .last_params_format
            .ok_or_else(|| Error::local("prepare reply did not include a paramsformat"))?;
        self.prepared.insert(ack.id, params_format);
        Ok(())
    }

    /// Invoke a previously prepared statement.
    pub async fn execute(
        &mut self,
        stmt_id: &[u8],
        args: Vec<Value>,
        timeout: Duration,
    ) -> Result<Vec<OpResult>, Error> {
        self.ensure_connected(timeout).await?;

        let descriptors = if args.is_empty() {
            vec![TokenDescriptor::Dynamic {
                op: DynamicOp::Execute,
                flags: DynamicFlags::empty(),
                stmt_id: stmt_id.to_vec(),
                body: vec![],
            }]
        } else {
            let params_format = self
                .prepared
                .get(stmt_id)
                .cloned()
                .ok_or_else(|| Error::local("execute with arguments on an unprepared statement"))?;
            vec![
                TokenDescriptor::Dynamic {
                    op: DynamicOp::Execute,
                    flags: DynamicFlags::HASARGS,
                    stmt_id: stmt_id.to_vec(),
                    body: vec![],
                },
                TokenDescriptor::ParamsFormatEcho(params_format),
                TokenDescriptor::Params(args),
            ]
        };

        let outcome = self.send_and_receive(descriptors, PacketType::Query, timeout).await?;
        Ok(outcome.results)
    }

    async fn ensure_connected(&mut self, timeout: Duration) -> Result<(), Error> {
        if self.state != ConnectionState::Connected {
            self.reconnect_with_timeout(timeout).await?;
        }
        Ok(())
    }

    async fn query_inner(&mut self, text: &str, timeout: Duration) -> Result<Vec<OpResult>, Error> {
        let body = encode_query_text(text);
        let descriptors = vec![TokenDescriptor::Language(body)];
        let outcome = self.send_and_receive(descriptors, PacketType::Query, timeout).await?;
        Ok(outcome.results)
    }

    async fn connect_and_login(&mut self, opts: ConnectOptions, timeout: Duration) -> Result<(), Error> {
        let stream = time::timeout(timeout, TcpStream::connect((opts.host.as_str(), opts.port)))
            .await
            .map_err(|_| Error::socket(io::Error::new(io::ErrorKind::TimedOut, "connect timed out")))?
            .map_err(Error::socket)?;

        self.socket = Some(stream);
        self.recv_buffer.clear();
        self.packet_size = opts.packet_size;
        self.environment = Environment::from_options(&opts);
        self.base_options = opts.clone();
        self.state = ConnectionState::Disconnected;
        // A fresh login means the server has no prepared statements for us;
        // a stale registry entry would replay a paramsformat it never saw.
        self.prepared = PreparedRegistry::default();

        let login_env = LoginEnv {
            host: opts.host.clone(),
            user: opts.user.clone(),
            password: opts.password.clone(),
            app_name: opts.app_name.clone(),
            lib_name: opts.lib_name.clone(),
            language: opts.language.clone(),
            packet_size: opts.packet_size,
        };
        let descriptors = vec![TokenDescriptor::Login(login_env)];
        self.send_and_receive(descriptors, PacketType::Login, timeout).await?;

        match self.state {
            ConnectionState::Connected => {}
            ConnectionState::AuthNegotiate => {
                return Err(Error::local("auth negotiate not implemented"));
            }
            ConnectionState::Disconnected => {
                return Err(Error::local("login reply did not include a login acknowledgment"));
            }
        }

        if let Some(database) = opts.database.clone() {
            self.query_inner(&format!("use {database}"), timeout).await?;
        }

        Ok(())
    }

    /// The request pipeline (§4.2): encode, fragment, write, then drive the
    /// reply pipeline.
    async fn send_and_receive(
        &mut self,
        descriptors: Vec<TokenDescriptor>,
        kind: PacketType,
        timeout: Duration,
    ) -> Result<ConsumeOutcome, Error> {
        let body = encode_tokens(&descriptors);
        let framed = encode_packets(&body, kind, self.packet_size as usize);

        if let Err(err) = self.write_all(&framed, timeout).await {
            self.force_disconnect();
            return Err(err);
        }

        let socket = self
            .socket
            .as_mut()
            .ok_or_else(|| Error::socket(io::Error::new(io::ErrorKind::NotConnected, "not connected")))?;
        let payload = match reassemble(socket, &mut self.recv_buffer, timeout).await {
            Ok(payload) => payload,
            Err(err) => {
                self.force_disconnect();
                return Err(err);
            }
        };

        consume(&payload, self)
    }

    async fn write_all(&mut self, framed: &[u8], timeout: Duration) -> Result<(), Error> {
        let socket = self
            .socket
            .as_mut()
            .ok_or_else(|| Error::socket(io::Error::new(io::ErrorKind::NotConnected, "not connected")))?;
        time::timeout(timeout, socket.write_all(framed))
            .await
            .map_err(Error::from)?
            .map_err(Error::from)
    }

    fn force_disconnect(&mut self) {
        self.socket = None;
        self.state = ConnectionState::Disconnected;
    }

    pub(crate) fn apply_login_ack(&mut self, ack: &LoginAck) {
        self.state = match ack.sub_state {
            LoginSubState::Connected => ConnectionState::Connected,
            LoginSubState::AuthNegotiate => ConnectionState::AuthNegotiate,
        };
        self.tds_version = Some(ack.tds_version);
        self.server = Some(ack.server.clone());
    }

    pub(crate) fn apply_capability(&mut self, cap: &Capability) {
        self.capability = Some(*cap);
    }

    pub(crate) fn apply_env_change(&mut self, change: &EnvChange) -> Result<(), Error> {
        for entry in &change.entries {
            if entry.key == "packet_size" {
                let size: u32 = entry.new_value.parse().map_err(|_| {
                    Error::local(format!("invalid packet_size envchange value: {}", entry.new_value))
                })?;
                self.packet_size = size;
                self.retune_recv_buffer(size);
            }
            self.environment.upsert(entry.key.clone(), entry.new_value.clone());
        }
        Ok(())
    }

    fn retune_recv_buffer(&self, size: u32) {
        let Some(socket) = &self.socket else { return };
        let sock_ref = socket2::SockRef::from(socket);
        if let Err(err) = sock_ref.set_recv_buffer_size(size as usize) {
            tracing::warn!(error = %err, size, "failed to retune socket receive buffer");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn offline_connection_starts_disconnected() {
        let conn = Connection::offline(ConnectOptions::new().packet_size(512));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(conn.packet_size(), 512);
        assert_eq!(conn.environment().get("packet_size"), Some("512"));
    }

    #[test]
    fn login_ack_transitions_state() {
        let mut conn = Connection::offline(ConnectOptions::new());
        let ack = LoginAck {
            sub_state: LoginSubState::Connected,
            tds_version: TdsVersion::V5_0,
            server: ServerIdentity { name: "sybase".to_string(), version: [5, 0, 0, 0] },
        };
        conn.apply_login_ack(&ack);
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert_eq!(conn.tds_version(), Some(TdsVersion::V5_0));
    }

    #[test]
    fn auth_negotiate_ack_is_recognized_not_crashed() {
        let mut conn = Connection::offline(ConnectOptions::new());
        let ack = LoginAck {
            sub_state: LoginSubState::AuthNegotiate,
            tds_version: TdsVersion::V5_0,
            server: ServerIdentity::default(),
        };
        conn.apply_login_ack(&ack);
        assert_eq!(conn.state(), ConnectionState::AuthNegotiate);
    }

    #[test]
    fn s6_envchange_updates_packet_size() {
        let mut conn = Connection::offline(ConnectOptions::new().packet_size(512));
        let change = EnvChange {
            entries: vec![tds5_protocol::EnvChangeEntry {
                key: "packet_size".to_string(),
                new_value: "4096".to_string(),
                old_value: "512".to_string(),
            }],
        };
        conn.apply_env_change(&change).unwrap();
        assert_eq!(conn.packet_size(), 4096);
        assert_eq!(conn.environment().get("packet_size"), Some("4096"));
    }

    #[test]
    fn malformed_packet_size_envchange_is_a_local_error() {
        let mut conn = Connection::offline(ConnectOptions::new());
        let change = EnvChange {
            entries: vec![tds5_protocol::EnvChangeEntry {
                key: "packet_size".to_string(),
                new_value: "not-a-number".to_string(),
                old_value: "512".to_string(),
            }],
        };
        let err = conn.apply_env_change(&change).unwrap_err();
        assert!(err.is_local());
    }
}
