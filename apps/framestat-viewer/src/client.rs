//! TCP client for the stats remote listener.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use framestat::sink::protocol::{decode, encode, MAX_MESSAGE_LEN};
use framestat::{ClientMessage, ServerMessage, PROTOCOL_VERSION};

use crate::model::StatsModel;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Client feeding a [`StatsModel`] from a live process.
pub struct StatsClient {
    stream: Option<TcpStream>,
    state: ConnectionState,
    host: String,
    port: u16,
    last_error: Option<String>,
}

impl StatsClient {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            stream: None,
            state: ConnectionState::Disconnected,
            host: host.to_string(),
            port,
            last_error: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Why the last connection ended, if it ended badly.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Attempt to connect to the listener.
    pub fn connect(&mut self) -> anyhow::Result<()> {
        self.state = ConnectionState::Connecting;

        let addr: SocketAddr = (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| anyhow::anyhow!("no address for {}:{}", self.host, self.port))?;
        let stream = match TcpStream::connect_timeout(&addr, Duration::from_secs(2)) {
            Ok(stream) => stream,
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                return Err(e.into());
            }
        };
        stream.set_nodelay(true)?;
        stream.set_nonblocking(true)?;
        let mut stream = stream;
        stream.write_all(&encode(&ClientMessage::Hello)?)?;

        self.stream = Some(stream);
        self.state = ConnectionState::Connected;
        self.last_error = None;
        Ok(())
    }

    /// Say goodbye and drop the connection.
    pub fn disconnect(&mut self) {
        if let Some(stream) = &mut self.stream {
            if let Ok(data) = encode(&ClientMessage::Goodbye) {
                let _ = stream.write_all(&data);
            }
        }
        self.stream = None;
        self.state = ConnectionState::Disconnected;
    }

    fn fail(&mut self, reason: String) {
        self.last_error = Some(reason);
        self.stream = None;
        self.state = ConnectionState::Disconnected;
    }

    /// Apply every message waiting on the socket. Returns the number of
    /// frames received.
    pub fn poll(&mut self, model: &mut StatsModel) -> usize {
        let mut frames = 0;
        loop {
            let Some(stream) = self.stream.as_mut() else {
                return frames;
            };
            let mut len_buf = [0u8; 4];
            match stream.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => return frames,
                Err(e) => {
                    self.fail(format!("connection lost: {e}"));
                    return frames;
                }
            }

            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_MESSAGE_LEN {
                self.fail(format!("oversized message ({len} bytes)"));
                return frames;
            }
            // The body follows the prefix closely; wait for it.
            let _ = stream.set_nonblocking(false);
            let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
            let mut data = vec![0u8; len];
            let body = stream.read_exact(&mut data);
            let _ = stream.set_nonblocking(true);
            if let Err(e) = body {
                self.fail(format!("truncated message: {e}"));
                return frames;
            }

            match decode::<ServerMessage>(&data) {
                Ok(ServerMessage::Hello { version }) => {
                    if version != PROTOCOL_VERSION {
                        self.fail(format!(
                            "protocol version mismatch: server={version}, viewer={PROTOCOL_VERSION}"
                        ));
                        return frames;
                    }
                    model.clear_frames();
                }
                Ok(ServerMessage::Descriptions(block)) => model.apply_descriptions(&block),
                Ok(ServerMessage::Frame(record)) => {
                    model.apply_frame(&record);
                    frames += 1;
                }
                Ok(ServerMessage::Goodbye) => {
                    self.fail("server shut down".into());
                    return frames;
                }
                Err(e) => {
                    self.fail(format!("malformed message: {e}"));
                    return frames;
                }
            }
        }
    }
}
