//! Remote listener sink: streams descriptions and frames to TCP viewers.
//!
//! Every viewer gets a bounded outbound queue drained by its own writer
//! thread, so the frame thread only ever enqueues. A viewer that falls
//! behind misses frames; one that stops accepting data is dropped.

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use framestat_core::{GroupId, StatId, StatKind};
use parking_lot::Mutex;

use super::protocol::{
    decode, encode, ClientMessage, CycleSample, ServerMessage, StatSample, MAX_MESSAGE_LEN,
    PROTOCOL_VERSION,
};
use super::{RecordBuilder, SinkFactory, StatSink};
use crate::config::StatsConfig;

/// Encoded messages waiting for one viewer.
const CLIENT_QUEUE_DEPTH: usize = 64;

/// How long a writer waits on a full socket before giving the viewer up.
const WRITE_STALL_TIMEOUT: Duration = Duration::from_secs(2);

type Message = Arc<Vec<u8>>;

/// A connected viewer.
struct Client {
    addr: SocketAddr,
    /// Read side, polled by the accept thread.
    stream: TcpStream,
    outbound: Sender<Message>,
    writer: Option<JoinHandle<()>>,
}

impl Client {
    /// Close the socket so the writer thread stops promptly.
    fn disconnect(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

/// State shared between the sink and its accept thread.
#[derive(Default)]
struct Shared {
    clients: Mutex<Vec<Client>>,
    /// Encoded `Descriptions` message sent to every new client.
    descriptions: Mutex<Option<Message>>,
}

/// TCP server that broadcasts stats to connected viewers.
pub struct RemoteServer {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    shared: Arc<Shared>,
    local_addr: SocketAddr,
}

impl RemoteServer {
    /// Start listening on `addr`.
    pub fn start(addr: impl std::net::ToSocketAddrs) -> std::io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let shared = Arc::new(Shared::default());

        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let running_clone = Arc::clone(&running);
        let shared_clone = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("framestat-remote".into())
            .spawn(move || Self::server_loop(&listener, &running_clone, &shared_clone))?;

        tracing::info!("Stats remote listener started on {}", local_addr);

        Ok(Self {
            running,
            thread: Some(thread),
            shared,
            local_addr,
        })
    }

    /// Address the listener is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn server_loop(listener: &TcpListener, running: &AtomicBool, shared: &Shared) {
        while running.load(Ordering::Relaxed) {
            match listener.accept() {
                Ok((stream, addr)) => {
                    if let Err(e) = Self::welcome(stream, addr, shared) {
                        tracing::warn!("Failed to greet stats viewer {}: {}", addr, e);
                    } else {
                        tracing::info!("Stats viewer connected: {}", addr);
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(10));
                }
                Err(e) => {
                    tracing::warn!("Accept error: {}", e);
                    thread::sleep(Duration::from_millis(100));
                }
            }

            Self::process_client_messages(shared);
        }
    }

    /// Start the client's writer, queue the handshake and the current
    /// description block, then register the client for frames.
    fn welcome(stream: TcpStream, addr: SocketAddr, shared: &Shared) -> std::io::Result<()> {
        stream.set_nonblocking(true)?;
        let _ = stream.set_nodelay(true);
        let hello = encode(&ServerMessage::Hello {
            version: PROTOCOL_VERSION,
        })
        .map_err(std::io::Error::other)?;

        let (outbound, queue) = channel::bounded(CLIENT_QUEUE_DEPTH);
        let writer_stream = stream.try_clone()?;
        let writer = thread::Builder::new()
            .name("framestat-remote-writer".into())
            .spawn(move || run_writer(writer_stream, &queue, addr))?;

        // Queue under the client lock so no frame can overtake the
        // description block. The queue is fresh, so neither send can fail.
        let mut clients = shared.clients.lock();
        let _ = outbound.try_send(Arc::new(hello));
        if let Some(descriptions) = shared.descriptions.lock().as_ref() {
            let _ = outbound.try_send(Arc::clone(descriptions));
        }
        clients.push(Client {
            addr,
            stream,
            outbound,
            writer: Some(writer),
        });
        Ok(())
    }

    fn process_client_messages(shared: &Shared) {
        let mut guard = shared.clients.lock();
        let mut to_remove = Vec::new();

        for (i, client) in guard.iter_mut().enumerate() {
            let stream = &mut client.stream;
            let mut len_buf = [0u8; 4];
            match stream.read_exact(&mut len_buf) {
                Ok(()) => {
                    let len = u32::from_le_bytes(len_buf) as usize;
                    if len > MAX_MESSAGE_LEN {
                        to_remove.push(i);
                        continue;
                    }
                    let mut data = vec![0u8; len];
                    if stream.read_exact(&mut data).is_ok() {
                        match decode::<ClientMessage>(&data) {
                            Ok(ClientMessage::Hello) => {}
                            Ok(ClientMessage::Goodbye) => to_remove.push(i),
                            Err(e) => tracing::debug!("Ignoring malformed viewer message: {}", e),
                        }
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(_) => to_remove.push(i),
            }
        }

        for i in to_remove.into_iter().rev() {
            let client = guard.remove(i);
            client.disconnect();
            tracing::info!("Stats viewer disconnected: {}", client.addr);
        }
    }

    /// Queue a message for every client. Never waits on a socket.
    pub fn broadcast(&self, message: &ServerMessage) {
        let data = match encode(message) {
            Ok(data) => Arc::new(data),
            Err(e) => {
                tracing::warn!("Failed to encode stats message: {}", e);
                return;
            }
        };
        // Frames may be skipped for a slow viewer; descriptions may not.
        let droppable = matches!(message, ServerMessage::Frame(_));
        if let ServerMessage::Descriptions(_) = message {
            *self.shared.descriptions.lock() = Some(Arc::clone(&data));
        }

        self.shared
            .clients
            .lock()
            .retain(|client| match client.outbound.try_send(Arc::clone(&data)) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) if droppable => {
                    tracing::trace!("Stats viewer {} is behind, skipping a frame", client.addr);
                    true
                }
                Err(TrySendError::Full(_)) => {
                    tracing::warn!("Stats viewer {} fell behind, disconnecting", client.addr);
                    client.disconnect();
                    false
                }
                Err(TrySendError::Disconnected(_)) => {
                    tracing::info!("Stats viewer disconnected: {}", client.addr);
                    client.disconnect();
                    false
                }
            });
    }

    /// Stop the server, saying goodbye to every client.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        let Some(thread) = self.thread.take() else {
            return;
        };
        let _ = thread.join();

        let goodbye = encode(&ServerMessage::Goodbye).ok().map(Arc::new);
        let clients = std::mem::take(&mut *self.shared.clients.lock());
        for client in clients {
            let Client {
                outbound, writer, ..
            } = client;
            if let Some(goodbye) = &goodbye {
                let _ = outbound.try_send(Arc::clone(goodbye));
            }
            // Closing the queue lets the writer flush and exit.
            drop(outbound);
            if let Some(writer) = writer {
                let _ = writer.join();
            }
        }
        tracing::info!("Stats remote listener stopped");
    }

    /// Number of connected clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.shared.clients.lock().len()
    }
}

impl Drop for RemoteServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Drain one viewer's queue until it closes or the socket fails.
fn run_writer(mut stream: TcpStream, queue: &Receiver<Message>, addr: SocketAddr) {
    for data in queue {
        if let Err(e) = write_message(&mut stream, &data) {
            tracing::info!("Stats viewer {} dropped: {}", addr, e);
            return;
        }
    }
}

/// Write a whole message to a non-blocking stream, giving up once the
/// socket has made no progress for [`WRITE_STALL_TIMEOUT`].
fn write_message(stream: &mut TcpStream, mut data: &[u8]) -> std::io::Result<()> {
    let mut stalled_since: Option<Instant> = None;
    while !data.is_empty() {
        match stream.write(data) {
            Ok(0) => return Err(std::io::ErrorKind::WriteZero.into()),
            Ok(n) => {
                data = &data[n..];
                stalled_since = None;
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                let since = *stalled_since.get_or_insert_with(Instant::now);
                if since.elapsed() >= WRITE_STALL_TIMEOUT {
                    return Err(std::io::ErrorKind::TimedOut.into());
                }
                thread::sleep(Duration::from_millis(1));
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Sink feeding a [`RemoteServer`]. Active only while a viewer is connected.
pub struct RemoteSink {
    server: RemoteServer,
    builder: RecordBuilder,
}

impl RemoteSink {
    /// Start a listener on `addr`.
    pub fn bind(addr: impl std::net::ToSocketAddrs) -> std::io::Result<Self> {
        Ok(Self {
            server: RemoteServer::start(addr)?,
            builder: RecordBuilder::default(),
        })
    }

    /// Address the listener is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }
}

impl StatSink for RemoteSink {
    fn name(&self) -> &str {
        "remote"
    }

    fn is_active(&self) -> bool {
        self.server.client_count() > 0
    }

    fn start_descriptions(&mut self) {
        self.builder.start_descriptions();
    }

    fn add_group_description(&mut self, group: GroupId, name: &str) {
        self.builder.add_group(group, name);
    }

    fn add_stat_description(&mut self, stat: StatId, name: &str, kind: StatKind, group: GroupId) {
        self.builder.add_stat(stat, name, kind, group);
    }

    fn end_descriptions(&mut self) {
        let block = self.builder.take_descriptions();
        self.server.broadcast(&ServerMessage::Descriptions(block));
    }

    fn set_frame_number(&mut self, frame: u32) {
        self.builder.start_frame(frame);
    }

    fn write_cycle(&mut self, sample: &CycleSample) {
        self.builder.push(StatSample::Cycle(*sample));
    }

    fn write_float(&mut self, stat: StatId, group: GroupId, value: f32) {
        self.builder.push(StatSample::Float { stat, group, value });
    }

    fn write_dword(&mut self, stat: StatId, group: GroupId, value: u32) {
        self.builder.push(StatSample::Dword { stat, group, value });
    }

    fn end_frame(&mut self) {
        let record = self.builder.take_frame();
        self.server.broadcast(&ServerMessage::Frame(record));
    }

    fn shutdown(&mut self) {
        self.server.shutdown();
    }
}

/// Creates a [`RemoteSink`] on `127.0.0.1` at the configured port.
#[derive(Debug, Default, Clone, Copy)]
pub struct RemoteSinkFactory;

impl SinkFactory for RemoteSinkFactory {
    fn create(&self, config: &StatsConfig) -> Option<Box<dyn StatSink>> {
        match RemoteSink::bind(("127.0.0.1", config.remote_port)) {
            Ok(sink) => Some(Box::new(sink)),
            Err(e) => {
                tracing::warn!("Failed to start stats remote listener: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{describe, protocol::DescriptionBlock, protocol::GroupDescription};

    fn read_message(stream: &mut TcpStream) -> ServerMessage {
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).unwrap();
        let mut data = vec![0u8; u32::from_le_bytes(len_buf) as usize];
        stream.read_exact(&mut data).unwrap();
        decode(&data).unwrap()
    }

    #[test]
    fn viewer_gets_hello_descriptions_then_frames() {
        let mut sink = RemoteSink::bind("127.0.0.1:0").unwrap();
        assert!(!sink.is_active());
        describe(
            &mut sink,
            &DescriptionBlock {
                groups: vec![GroupDescription {
                    id: GroupId::GAME,
                    name: "Game".into(),
                }],
                stats: Vec::new(),
            },
        );

        let mut client = TcpStream::connect(sink.local_addr()).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        assert!(matches!(
            read_message(&mut client),
            ServerMessage::Hello { version: PROTOCOL_VERSION }
        ));
        match read_message(&mut client) {
            ServerMessage::Descriptions(block) => assert_eq!(block.groups[0].name, "Game"),
            other => panic!("unexpected {other:?}"),
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while !sink.is_active() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(sink.is_active());

        sink.set_frame_number(9);
        sink.write_dword(StatId(301), GroupId::GAME, 4);
        sink.end_frame();
        match read_message(&mut client) {
            ServerMessage::Frame(record) => {
                assert_eq!(record.frame, 9);
                assert_eq!(record.samples.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }

        sink.shutdown();
        assert!(matches!(read_message(&mut client), ServerMessage::Goodbye));
    }

    #[test]
    fn viewer_that_never_reads_does_not_stall_frames() {
        let mut sink = RemoteSink::bind("127.0.0.1:0").unwrap();
        let idle = TcpStream::connect(sink.local_addr()).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !sink.is_active() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(sink.is_active());

        // Far more data than loopback socket buffers hold.
        let mut slowest = Duration::ZERO;
        for frame in 0..100u32 {
            sink.set_frame_number(frame);
            for i in 0..16_384u32 {
                sink.write_dword(StatId(300 + i % 64), GroupId::GAME, i);
            }
            let started = Instant::now();
            sink.end_frame();
            slowest = slowest.max(started.elapsed());
        }
        assert!(
            slowest < Duration::from_millis(150),
            "end_frame blocked for {slowest:?}"
        );

        drop(idle);
        sink.shutdown();
        assert_eq!(sink.server.client_count(), 0);
    }
}
