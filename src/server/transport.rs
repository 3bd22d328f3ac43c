// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Server↔debugger links.
//!
//! A link shuttles whole packets between the server and the debugger and
//! hides *how* the bytes move. Framing is a single NUL byte after each
//! packet; no length prefix. Three transports: the process's standard
//! streams, a loopback TCP listener, and an in-memory pair for embedding a
//! debugger in the same process.

use std::io::{self, Read, Write};
use std::net::{Ipv6Addr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

/// Default TCP listen port.
pub const DEFAULT_TCP_PORT: u16 = 6618;

const READ_CHUNK: usize = 1024;

/// A bidirectional packet link.
///
/// `recv_packet` and `send_packet` operate purely on in-memory buffers;
/// all I/O happens in `poll`.
pub trait Link: Send {
    /// Identifier of the transport, e.g. `cxxrtl+tcp://localhost:6618`.
    fn uri(&self) -> String;

    /// Flush outgoing bytes and wait up to `timeout` for incoming ones.
    /// Returns true on success (a timeout with no data is a success) and
    /// false on unrecoverable I/O failure.
    fn poll(&mut self, timeout: Duration) -> bool;

    /// Human-readable description of the failure after `poll` returned
    /// false.
    fn poll_error(&self) -> String;

    /// Take one complete packet off the receive buffer, if present.
    fn recv_packet(&mut self) -> Option<String>;

    /// Queue a packet on the send buffer.
    fn send_packet(&mut self, packet: &str);
}

/// Receive/send byte buffers with NUL framing, shared by every transport.
#[derive(Default)]
pub struct LinkBuffers {
    recv_buf: Vec<u8>,
    send_buf: Vec<u8>,
}

impl LinkBuffers {
    /// If the receive buffer holds a NUL, return the bytes before it and
    /// drop them (with the NUL) from the buffer. Never blocks.
    pub fn recv_packet(&mut self) -> Option<String> {
        let pos = self.recv_buf.iter().position(|&b| b == 0)?;
        let rest = self.recv_buf.split_off(pos + 1);
        self.recv_buf.pop();
        let packet = String::from_utf8_lossy(&self.recv_buf).into_owned();
        self.recv_buf = rest;
        Some(packet)
    }

    /// Append a packet and its NUL terminator to the send buffer.
    pub fn send_packet(&mut self, packet: &str) {
        self.send_buf.extend_from_slice(packet.as_bytes());
        self.send_buf.push(0);
    }

    fn clear(&mut self) {
        self.recv_buf.clear();
        self.send_buf.clear();
    }
}

// ── Standard streams ────────────────────────────────────────────────────────

/// Link over the process's standard input and output.
///
/// Standard input has no portable wait-with-timeout, so a background thread
/// owns the blocking reads and hands chunks over a channel; `poll` waits on
/// the channel instead. The thread exits when its sender sees end-of-input.
pub struct StdioLink {
    buffers: LinkBuffers,
    incoming: mpsc::Receiver<Vec<u8>>,
    error: Option<String>,
}

impl StdioLink {
    pub fn new() -> StdioLink {
        let (sender, incoming) = mpsc::channel();
        thread::Builder::new()
            .name("heddle-stdin".into())
            .spawn(move || {
                let mut stdin = io::stdin().lock();
                let mut buffer = [0u8; READ_CHUNK];
                loop {
                    match stdin.read(&mut buffer) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if sender.send(buffer[..n].to_vec()).is_err() {
                                break;
                            }
                        }
                    }
                }
            })
            .expect("failed to spawn stdin reader thread");
        StdioLink { buffers: LinkBuffers::default(), incoming, error: None }
    }
}

impl Default for StdioLink {
    fn default() -> StdioLink {
        StdioLink::new()
    }
}

impl Link for StdioLink {
    fn uri(&self) -> String {
        "cxxrtl+stdio://".to_string()
    }

    fn poll(&mut self, timeout: Duration) -> bool {
        let stdout = io::stdout();
        let mut stdout = stdout.lock();
        if let Err(err) = stdout
            .write_all(&self.buffers.send_buf)
            .and_then(|_| stdout.flush())
        {
            self.error = Some(err.to_string());
            return false;
        }
        self.buffers.send_buf.clear();

        match self.incoming.recv_timeout(timeout) {
            Ok(chunk) => {
                self.buffers.recv_buf.extend_from_slice(&chunk);
                // Drain whatever else arrived without blocking again.
                while let Ok(chunk) = self.incoming.try_recv() {
                    self.buffers.recv_buf.extend_from_slice(&chunk);
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => true,
            Err(RecvTimeoutError::Disconnected) => {
                self.error = Some("end of input".to_string());
                false
            }
        }
    }

    fn poll_error(&self) -> String {
        self.error.clone().unwrap_or_default()
    }

    fn recv_packet(&mut self) -> Option<String> {
        self.buffers.recv_packet()
    }

    fn send_packet(&mut self, packet: &str) {
        self.buffers.send_packet(packet);
    }
}

// ── TCP ─────────────────────────────────────────────────────────────────────

/// Link over a loopback TCP listener.
///
/// Listens on `[::1]:<port>` (some OSes auto-listen on IPv4 too), backlog 1,
/// one client at a time. The listening socket is opened lazily by the first
/// `poll` and kept across client disconnects: a graceful close drops the
/// connection and the link goes back to listening.
pub struct TcpLink {
    buffers: LinkBuffers,
    port: u16,
    listener: Option<TcpListener>,
    stream: Option<TcpStream>,
    error: Option<String>,
}

impl TcpLink {
    pub fn new(port: u16) -> TcpLink {
        TcpLink { buffers: LinkBuffers::default(), port, listener: None, stream: None, error: None }
    }

    /// Port the link listens on. A configured port of 0 resolves to the
    /// OS-assigned port once the listener is bound.
    pub fn port(&self) -> u16 {
        self.port
    }

    fn disconnect(&mut self) {
        self.buffers.clear();
        self.stream = None;
    }

    fn fail(&mut self, context: &str, err: io::Error) -> bool {
        self.error = Some(format!("{}: {}", context, err));
        false
    }
}

impl Default for TcpLink {
    fn default() -> TcpLink {
        TcpLink::new(DEFAULT_TCP_PORT)
    }
}

impl Link for TcpLink {
    fn uri(&self) -> String {
        // We listen on IPv6 only, but some OSes will auto-listen on IPv4 too.
        format!("cxxrtl+tcp://localhost:{}", self.port)
    }

    fn poll(&mut self, timeout: Duration) -> bool {
        // Open the listening socket if the link is neither connected nor
        // listening. std sets SO_REUSEADDR on listeners for Unix targets.
        if self.listener.is_none() {
            let listener = match TcpListener::bind((Ipv6Addr::LOCALHOST, self.port)) {
                Ok(listener) => listener,
                Err(err) => return self.fail("bind", err),
            };
            if self.port == 0 {
                if let Ok(addr) = listener.local_addr() {
                    self.port = addr.port();
                }
            }
            if let Err(err) = listener.set_nonblocking(true) {
                return self.fail("set_nonblocking", err);
            }
            clilog::info!("debug server listening on {}", self.uri());
            self.listener = Some(listener);
        }
        // Accept a new connection if the link is listening and not
        // connected. The accept is non-blocking; waiting out the timeout
        // here keeps the main loop's cadence.
        if self.stream.is_none() {
            match self.listener.as_ref().unwrap().accept() {
                Ok((stream, peer)) => {
                    // Some platforms let accepted sockets inherit the
                    // listener's non-blocking flag.
                    if let Err(err) = stream.set_nonblocking(false) {
                        return self.fail("set_nonblocking", err);
                    }
                    clilog::info!("debugger connected from {}", peer);
                    self.stream = Some(stream);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(timeout);
                    return true;
                }
                Err(err) => return self.fail("accept", err),
            }
        }
        let stream = self.stream.as_mut().unwrap();
        // Empty the send buffer.
        if let Err(err) = stream.write_all(&self.buffers.send_buf) {
            self.disconnect();
            return self.fail("send", err);
        }
        self.buffers.send_buf.clear();
        // Wait for data, then fill the receive buffer.
        let stream = self.stream.as_mut().unwrap();
        let wait = if timeout.is_zero() { None } else { Some(timeout) };
        if let Err(err) = stream.set_read_timeout(wait) {
            return self.fail("set_read_timeout", err);
        }
        if wait.is_none() {
            // A zero timeout means "don't wait": probe without blocking.
            if let Err(err) = stream.set_nonblocking(true) {
                return self.fail("set_nonblocking", err);
            }
        }
        let mut buffer = [0u8; READ_CHUNK];
        let result = stream.read(&mut buffer);
        if wait.is_none() {
            let _ = self.stream.as_mut().unwrap().set_nonblocking(false);
        }
        match result {
            Ok(0) => {
                // Graceful close: back to listening.
                clilog::info!("debugger disconnected");
                self.disconnect();
                true
            }
            Ok(n) => {
                self.buffers.recv_buf.extend_from_slice(&buffer[..n]);
                true
            }
            Err(err)
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.kind() == io::ErrorKind::TimedOut =>
            {
                true
            }
            Err(err) => {
                self.disconnect();
                self.fail("recv", err)
            }
        }
    }

    fn poll_error(&self) -> String {
        self.error.clone().unwrap_or_default()
    }

    fn recv_packet(&mut self) -> Option<String> {
        self.buffers.recv_packet()
    }

    fn send_packet(&mut self, packet: &str) {
        self.buffers.send_packet(packet);
    }
}

// ── In-memory pair ──────────────────────────────────────────────────────────

struct LoopbackChannel {
    queue: Mutex<Vec<u8>>,
    condvar: Condvar,
}

struct LoopbackShared {
    // Indexed by the *receiving* side.
    channels: [LoopbackChannel; 2],
    closed: [AtomicBool; 2],
}

/// One end of an in-memory link pair. Useful for driving the server from a
/// debugger living in the same process, and for tests.
pub struct LoopbackLink {
    buffers: LinkBuffers,
    shared: Arc<LoopbackShared>,
    side: usize,
}

impl LoopbackLink {
    /// Create a connected pair of ends.
    pub fn pair() -> (LoopbackLink, LoopbackLink) {
        let shared = Arc::new(LoopbackShared {
            channels: [
                LoopbackChannel { queue: Mutex::new(Vec::new()), condvar: Condvar::new() },
                LoopbackChannel { queue: Mutex::new(Vec::new()), condvar: Condvar::new() },
            ],
            closed: [AtomicBool::new(false), AtomicBool::new(false)],
        });
        (
            LoopbackLink { buffers: LinkBuffers::default(), shared: shared.clone(), side: 0 },
            LoopbackLink { buffers: LinkBuffers::default(), shared, side: 1 },
        )
    }

    fn peer_closed(&self) -> bool {
        self.shared.closed[1 - self.side].load(Ordering::Acquire)
    }
}

impl Link for LoopbackLink {
    fn uri(&self) -> String {
        "cxxrtl+loopback://".to_string()
    }

    fn poll(&mut self, timeout: Duration) -> bool {
        // Deliver outgoing bytes to the peer.
        if !self.buffers.send_buf.is_empty() {
            let outbox = &self.shared.channels[1 - self.side];
            outbox.queue.lock().unwrap().extend_from_slice(&self.buffers.send_buf);
            self.buffers.send_buf.clear();
            outbox.condvar.notify_all();
        }
        // Wait for incoming bytes.
        let inbox = &self.shared.channels[self.side];
        let mut queue = inbox.queue.lock().unwrap();
        if queue.is_empty() && !self.peer_closed() {
            queue = inbox.condvar.wait_timeout(queue, timeout).unwrap().0;
        }
        self.buffers.recv_buf.append(&mut queue);
        drop(queue);
        // Fail only once the peer is gone and everything sent was consumed.
        if self.buffers.recv_buf.is_empty() && self.peer_closed() {
            return false;
        }
        true
    }

    fn poll_error(&self) -> String {
        "peer closed".to_string()
    }

    fn recv_packet(&mut self) -> Option<String> {
        self.buffers.recv_packet()
    }

    fn send_packet(&mut self, packet: &str) {
        self.buffers.send_packet(packet);
    }
}

impl Drop for LoopbackLink {
    fn drop(&mut self) {
        self.shared.closed[self.side].store(true, Ordering::Release);
        self.shared.channels[0].condvar.notify_all();
        self.shared.channels[1].condvar.notify_all();
    }
}
