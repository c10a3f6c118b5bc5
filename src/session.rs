//! Authenticated rcon session shared by every poller.
//!
//! One mutex guards the transport for the whole request/response exchange,
//! so commands from different threads never interleave on the wire. A
//! dropped connection is re-established lazily by the next caller.

use crate::error::{RconError, Result};
use crate::transport::Transport;
use hzrcon_proto::{client, server, AUTH_FAILED_ID};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// The server never marks the end of a reply, so the reply is whatever
/// arrives before this much silence. Shorter values truncate long replies.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(3500);

pub const DEFAULT_RESPONSE_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
    /// Bounds TCP connect, every write, and each handshake read.
    pub connect_timeout: Duration,
    /// Silence that ends a command's reply.
    pub read_timeout: Duration,
    /// Hard cap on one command's read loop, for servers that never go quiet.
    pub response_deadline: Duration,
    /// Extra silent windows tolerated before a command with no reply at all
    /// is treated as a dead connection. 0 disconnects on the first one.
    pub silent_grace_windows: u32,
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, port: u16, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            password: password.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            response_deadline: DEFAULT_RESPONSE_DEADLINE,
            silent_grace_windows: 0,
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &"<redacted>")
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("response_deadline", &self.response_deadline)
            .field("silent_grace_windows", &self.silent_grace_windows)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Authenticating,
    Ready,
}

/// Cumulative bytes on the wire, across reconnects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Traffic {
    pub sent: u64,
    pub received: u64,
}

/// Run the handshake on a freshly connected transport.
///
/// The server answers AUTH with an empty RESPONSE_VALUE first and the
/// AUTH_RESPONSE second, both with `id = 0`. A bare AUTH_RESPONSE is also
/// accepted. Only `id == -1` on the AUTH_RESPONSE means the password was
/// rejected; the id is otherwise ignored.
pub fn authenticate(
    transport: &mut Transport,
    id: i32,
    password: &str,
    timeout: Duration,
) -> Result<()> {
    transport.send_packet(id, client::AUTH, password)?;
    log::debug!("Sent AUTH id={}", id);

    let mut preamble_seen = false;
    loop {
        let packet = match transport.read_packet(timeout) {
            Ok(Some(packet)) => packet,
            Ok(None) => return Err(RconError::auth("no AUTH_RESPONSE before timeout")),
            Err(e) => return Err(RconError::auth(format!("handshake interrupted: {}", e))),
        };
        log::debug!(
            "AUTH reply id={} type={} body_len={}",
            packet.id,
            packet.packet_type,
            packet.body.len()
        );

        match packet.packet_type {
            server::AUTH_RESPONSE if packet.id == AUTH_FAILED_ID => {
                return Err(RconError::auth("password rejected"));
            }
            server::AUTH_RESPONSE => return Ok(()),
            server::RESPONSE_VALUE if !preamble_seen => preamble_seen = true,
            other => {
                return Err(RconError::auth(format!(
                    "unexpected packet type {} during handshake",
                    other
                )));
            }
        }
    }
}

struct Reply {
    body: String,
    /// framing state unknown or reply cut short; connection must be replaced
    desynced: bool,
}

pub struct Session {
    config: SessionConfig,
    conn: Mutex<Option<Transport>>,
    state: Mutex<SessionState>,
    seq: AtomicI32,
    sent: AtomicU64,
    received: AtomicU64,
}

impl Session {
    /// Create a disconnected session. Nothing touches the network until the
    /// first call.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            conn: Mutex::new(None),
            state: Mutex::new(SessionState::Disconnected),
            seq: AtomicI32::new(0),
            sent: AtomicU64::new(0),
            received: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn traffic(&self) -> Traffic {
        Traffic {
            sent: self.sent.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
        }
    }

    /// Last sequence number handed out. Local bookkeeping only.
    pub fn sequence(&self) -> i32 {
        self.seq.load(Ordering::Relaxed)
    }

    fn next_id(&self) -> i32 {
        // Stay positive: -1 is the server's rejection marker.
        let id = self.seq.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        if id <= 0 {
            self.seq.store(1, Ordering::Relaxed);
            1
        } else {
            id
        }
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn lock(&self) -> MutexGuard<'_, Option<Transport>> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                // A caller panicked mid-exchange; the stream position is unknown.
                let mut guard = poisoned.into_inner();
                self.conn.clear_poison();
                log::warn!("Session lock poisoned, dropping connection");
                Self::discard(&mut guard);
                self.set_state(SessionState::Disconnected);
                guard
            }
        }
    }

    fn discard(slot: &mut Option<Transport>) {
        if let Some(mut transport) = slot.take() {
            transport.close();
        }
    }

    fn disconnect(&self, slot: &mut Option<Transport>) {
        Self::discard(slot);
        self.set_state(SessionState::Disconnected);
    }

    fn account(&self, before: Traffic, transport: &Transport) {
        self.sent.fetch_add(
            transport.bytes_sent().saturating_sub(before.sent),
            Ordering::Relaxed,
        );
        self.received.fetch_add(
            transport.bytes_received().saturating_sub(before.received),
            Ordering::Relaxed,
        );
    }

    fn establish(&self, slot: &mut Option<Transport>) -> Result<()> {
        Self::discard(slot);
        self.set_state(SessionState::Connecting);
        log::info!("Connecting to {}:{}", self.config.host, self.config.port);

        let mut transport = match Transport::connect(
            &self.config.host,
            self.config.port,
            self.config.connect_timeout,
        ) {
            Ok(transport) => transport,
            Err(e) => {
                self.set_state(SessionState::Disconnected);
                return Err(e);
            }
        };

        self.set_state(SessionState::Authenticating);
        let id = self.next_id();
        let result = authenticate(
            &mut transport,
            id,
            &self.config.password,
            self.config.connect_timeout,
        );
        self.account(Traffic::default(), &transport);

        match result {
            Ok(()) => {
                log::info!("Authenticated to {}", transport.peer());
                *slot = Some(transport);
                self.set_state(SessionState::Ready);
                Ok(())
            }
            Err(e) => {
                log::warn!("Handshake with {} failed: {}", transport.peer(), e);
                transport.close();
                self.set_state(SessionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Connect and authenticate now instead of on first use. A no-op when
    /// the session is already ready.
    pub fn connect(&self) -> Result<()> {
        let mut slot = self.lock();
        if slot.is_some() {
            return Ok(());
        }
        self.establish(&mut slot)
    }

    fn reconnect(&self, slot: &mut Option<Transport>) -> Result<()> {
        self.establish(slot).map_err(|e| match e {
            RconError::Connect { .. } | RconError::ConnectTimeout { .. } => {
                RconError::lost(format!("reconnect failed: {}", e))
            }
            other => other,
        })
    }

    fn exchange(
        &self,
        transport: &mut Transport,
        command: &str,
        read_timeout: Duration,
    ) -> Result<Reply> {
        let id = self.next_id();
        transport.send_packet(id, client::EXECCOMMAND, command)?;
        log::debug!("Command #{} sent: {:?}", id, command);

        let started = Instant::now();
        let deadline = started + self.config.response_deadline;
        let received_before = transport.bytes_received();
        let mut body = String::new();
        let mut packets = 0usize;
        let mut silent_windows = 0u32;
        // The server may still be sending once the deadline cuts the reply.
        let mut cut = false;

        loop {
            match transport.read_packet_until(read_timeout, Some(deadline))? {
                Some(packet) => {
                    if packet.packet_type != server::RESPONSE_VALUE {
                        log::debug!(
                            "Command #{}: unexpected packet type {}",
                            id,
                            packet.packet_type
                        );
                    }
                    packets += 1;
                    body.push_str(&packet.body);
                    if Instant::now() >= deadline {
                        cut = true;
                        break;
                    }
                }
                None if Instant::now() >= deadline
                    && transport.bytes_received() > received_before =>
                {
                    cut = true;
                    break;
                }
                None if transport.bytes_received() > received_before => break,
                None if silent_windows < self.config.silent_grace_windows => {
                    silent_windows += 1;
                    log::debug!("Command #{}: silent window {}", id, silent_windows);
                }
                None => {
                    return Err(RconError::lost(format!(
                        "no reply to {:?} within {:?}",
                        command, read_timeout
                    )));
                }
            }
        }

        if cut {
            log::warn!(
                "Command #{} still streaming after {:?}, cutting reply",
                id,
                self.config.response_deadline
            );
        }
        log::debug!(
            "Command #{}: {} packets, {} bytes in {:?}",
            id,
            packets,
            body.len(),
            started.elapsed()
        );
        Ok(Reply {
            body,
            desynced: cut || transport.has_partial_frame(),
        })
    }

    /// One command while the guard is held.
    fn run(
        &self,
        slot: &mut Option<Transport>,
        command: &str,
        read_timeout: Duration,
    ) -> Result<String> {
        if slot.is_none() {
            self.reconnect(slot)?;
        }
        let Some(transport) = slot.as_mut() else {
            return Err(RconError::lost("no connection"));
        };

        let before = Traffic {
            sent: transport.bytes_sent(),
            received: transport.bytes_received(),
        };
        let outcome = self.exchange(transport, command, read_timeout);
        self.account(before, transport);

        match outcome {
            Ok(Reply {
                body,
                desynced: false,
            }) => Ok(body),
            Ok(Reply {
                body,
                desynced: true,
            }) => {
                log::warn!(
                    "Reply to {:?} ended mid-stream, reconnecting on next use",
                    command
                );
                self.disconnect(slot);
                Ok(body)
            }
            Err(e) => {
                log::warn!("Command {:?} failed: {}", command, e);
                if e.is_connection_fatal() {
                    self.disconnect(slot);
                }
                Err(e)
            }
        }
    }

    /// Run one command and return the concatenated reply text.
    ///
    /// Blocks while another caller holds the connection.
    pub fn execute(&self, command: &str) -> Result<String> {
        self.execute_with_timeout(command, self.config.read_timeout)
    }

    /// Like [`Session::execute`] with a different read window, for commands
    /// whose reply is known to be short.
    pub fn execute_with_timeout(&self, command: &str, read_timeout: Duration) -> Result<String> {
        let mut slot = self.lock();
        self.run(&mut slot, command, read_timeout)
    }

    /// Run several commands back-to-back without letting another caller in
    /// between. Results are in input order. After a failure the rest of the
    /// batch is skipped rather than retried.
    pub fn fetch_all<S: AsRef<str>>(&self, commands: &[S]) -> Vec<Result<String>> {
        let mut slot = self.lock();
        let mut results = Vec::with_capacity(commands.len());
        let mut aborted = false;

        for command in commands {
            let command = command.as_ref();
            if aborted {
                results.push(Err(RconError::lost(format!(
                    "batch aborted before {:?}",
                    command
                ))));
                continue;
            }
            let result = self.run(&mut slot, command, self.config.read_timeout);
            aborted = result.is_err();
            results.push(result);
        }
        results
    }

    /// Close the connection. Waits for an in-flight command to finish.
    pub fn close(&self) {
        let mut slot = self.lock();
        if slot.is_some() {
            log::info!("Closing session to {}:{}", self.config.host, self.config.port);
        }
        self.disconnect(&mut slot);
    }
}
