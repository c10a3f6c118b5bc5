//! One TCP connection to the rcon port: framing only, no session semantics.

use crate::error::{RconError, Result};
use hzrcon_proto::{self as proto, Packet};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

const READ_CHUNK: usize = 8192;
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

pub struct Transport {
    stream: Option<TcpStream>,
    peer: SocketAddr,
    recv_buf: Vec<u8>,
    write_timeout: Duration,
    bytes_sent: u64,
    bytes_received: u64,
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

impl Transport {
    /// Open a TCP connection, trying each resolved address in turn.
    /// `connect_timeout` also bounds every write on this connection.
    pub fn connect(host: &str, port: u16, connect_timeout: Duration) -> Result<Self> {
        let addr = format!("{}:{}", host, port);
        let candidates = (host, port)
            .to_socket_addrs()
            .map_err(|source| RconError::Connect {
                addr: addr.clone(),
                source,
            })?;

        let mut last_err = None;
        for candidate in candidates {
            match TcpStream::connect_timeout(&candidate, connect_timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true).ok();
                    log::info!("Connected to {}", candidate);
                    return Ok(Self {
                        stream: Some(stream),
                        peer: candidate,
                        recv_buf: Vec::new(),
                        write_timeout: connect_timeout,
                        bytes_sent: 0,
                        bytes_received: 0,
                    });
                }
                Err(e) => {
                    log::debug!("Connect to {} failed: {}", candidate, e);
                    last_err = Some(e);
                }
            }
        }

        Err(match last_err {
            Some(e) if is_timeout(&e) => RconError::ConnectTimeout { addr },
            Some(source) => RconError::Connect { addr, source },
            None => RconError::Connect {
                addr,
                source: io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses"),
            },
        })
    }

    fn stream(&self) -> Result<&TcpStream> {
        self.stream
            .as_ref()
            .ok_or_else(|| RconError::lost("transport closed"))
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Frame and write one packet in full.
    pub fn send_packet(&mut self, id: i32, packet_type: i32, body: &str) -> Result<()> {
        let msg = proto::encode(id, packet_type, body);
        let mut stream = self.stream()?;
        stream
            .set_write_timeout(Some(self.write_timeout))
            .map_err(|e| RconError::lost(e.to_string()))?;

        match stream.write_all(&msg).and_then(|()| stream.flush()) {
            Ok(()) => {
                self.bytes_sent += msg.len() as u64;
                log::debug!("Sent packet id={} type={} len={}", id, packet_type, msg.len());
                Ok(())
            }
            // The peer may now hold a partial frame; nothing after this is safe.
            Err(e) if is_timeout(&e) => Err(RconError::CommandTimeout {
                command: body.to_string(),
            }),
            Err(e) => Err(RconError::lost(format!("write failed: {}", e))),
        }
    }

    /// Read one packet, waiting at most `read_timeout` between chunks.
    ///
    /// Returns `Ok(None)` when the window elapses without a complete packet;
    /// that is how a finished response looks on this server. Bytes of a
    /// partially received frame stay buffered, see [`Transport::has_partial_frame`].
    pub fn read_packet(&mut self, read_timeout: Duration) -> Result<Option<Packet>> {
        self.read_packet_until(read_timeout, None)
    }

    /// [`Transport::read_packet`] that also gives up at `deadline`, even
    /// while a frame is still trickling in. Buffered frames are returned
    /// first; once the deadline has passed no further reads are made.
    pub fn read_packet_until(
        &mut self,
        read_timeout: Duration,
        deadline: Option<Instant>,
    ) -> Result<Option<Packet>> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(packet) = self.take_frame()? {
                log::debug!(
                    "Read packet id={} type={} body_len={}",
                    packet.id,
                    packet.packet_type,
                    packet.body.len()
                );
                return Ok(Some(packet));
            }

            let window = match deadline {
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return Ok(None);
                    }
                    read_timeout.min(left)
                }
                None => read_timeout,
            };

            let mut stream = self.stream()?;
            // A zero timeout is rejected by the OS.
            stream
                .set_read_timeout(Some(window.max(MIN_READ_TIMEOUT)))
                .map_err(|e| RconError::lost(e.to_string()))?;

            match stream.read(&mut chunk) {
                Ok(0) => return Err(RconError::lost("connection closed by server")),
                Ok(n) => {
                    self.bytes_received += n as u64;
                    self.recv_buf.extend_from_slice(&chunk[..n]);
                }
                // A window shortened by the deadline only ends once the
                // deadline has really passed.
                Err(ref e) if is_timeout(e) && window < read_timeout => continue,
                Err(ref e) if is_timeout(e) => return Ok(None),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(RconError::lost(format!("read failed: {}", e))),
            }
        }
    }

    /// Pop one complete frame off the receive buffer, if there is one.
    fn take_frame(&mut self) -> Result<Option<Packet>> {
        if self.recv_buf.len() < proto::SIZE_FIELD {
            return Ok(None);
        }
        let prefix: [u8; proto::SIZE_FIELD] = [
            self.recv_buf[0],
            self.recv_buf[1],
            self.recv_buf[2],
            self.recv_buf[3],
        ];
        let size = proto::decode_size(&prefix)?;
        if self.recv_buf.len() < proto::SIZE_FIELD + size {
            return Ok(None); // incomplete frame, wait for more data
        }

        let packet = proto::decode(&self.recv_buf[proto::SIZE_FIELD..proto::SIZE_FIELD + size])?;
        self.recv_buf.drain(..proto::SIZE_FIELD + size);
        Ok(Some(packet))
    }

    /// True when bytes of an unfinished frame are buffered. After a read
    /// window ends in this state the stream position is unknown.
    pub fn has_partial_frame(&self) -> bool {
        !self.recv_buf.is_empty()
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Release the socket. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
            self.recv_buf.clear();
            log::info!("Closed connection to {}", self.peer);
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}
