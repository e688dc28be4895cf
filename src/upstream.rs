//! Upstream link — nonblocking TCP client to the gaze-estimation process.
//!
//! The estimator is an opaque collaborator; this module only moves framed
//! JSON across the socket. Reads are polled from the session tick (the
//! loop's own cadence), writes are buffered and flushed opportunistically.
//! Any I/O error or protocol violation drops the connection; the session
//! retries on a fixed interval.

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::protocol::{encode_frame, FrameDecoder, UpstreamCommand, UpstreamMessage};

/// Cap on buffered outbound bytes; a peer this far behind is stuck.
const MAX_WRITE_BUFFER: usize = 65_536;

/// Timeout for the blocking connect attempt (localhost peer).
const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

pub struct UpstreamLink {
    addr: String,
    stream: Option<TcpStream>,
    decoder: FrameDecoder,
    write_buf: Vec<u8>,
    reconnect_interval_ms: f64,
    /// Session time of the last connect attempt; first attempt is
    /// immediate.
    last_attempt_ms: Option<f64>,
}

impl UpstreamLink {
    pub fn new(addr: String, reconnect_interval_ms: f64) -> Self {
        Self {
            addr,
            stream: None,
            decoder: FrameDecoder::new(),
            write_buf: Vec::new(),
            reconnect_interval_ms,
            last_attempt_ms: None,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Attempt a connection if one is due. Returns true when a connection
    /// was newly established this call.
    pub fn try_connect(&mut self, now_ms: f64) -> bool {
        if self.stream.is_some() {
            return false;
        }
        if let Some(last) = self.last_attempt_ms {
            if now_ms - last < self.reconnect_interval_ms {
                return false;
            }
        }
        self.last_attempt_ms = Some(now_ms);

        let addr = match self.addr.to_socket_addrs().map(|mut it| it.next()) {
            Ok(Some(a)) => a,
            Ok(None) | Err(_) => {
                warn!(addr = %self.addr, "upstream address does not resolve");
                return false;
            }
        };

        match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
            Ok(stream) => {
                stream.set_nonblocking(true).ok();
                stream.set_nodelay(true).ok();
                info!(addr = %self.addr, "upstream connected");
                self.stream = Some(stream);
                self.decoder.clear();
                self.write_buf.clear();
                true
            }
            Err(e) => {
                debug!(addr = %self.addr, "upstream connect failed: {}", e);
                false
            }
        }
    }

    /// Queue one command and try to flush. A full buffer or write error
    /// drops the connection.
    pub fn send(&mut self, command: &UpstreamCommand) {
        if self.stream.is_none() {
            debug!(?command, "dropping command, upstream not connected");
            return;
        }
        if self.write_buf.len() > MAX_WRITE_BUFFER {
            warn!("upstream write buffer overflow, dropping connection");
            self.disconnect();
            return;
        }
        let payload = serde_json::to_string(command).expect("commands always serialize");
        encode_frame(&payload, &mut self.write_buf);
        if let Err(e) = self.flush_writes() {
            warn!("upstream write failed: {}", e);
            self.disconnect();
        }
    }

    fn flush_writes(&mut self) -> io::Result<()> {
        let stream = match &self.stream {
            Some(s) => s,
            None => return Ok(()),
        };
        while !self.write_buf.is_empty() {
            match (&*stream).write(&self.write_buf) {
                Ok(0) => return Err(io::Error::new(io::ErrorKind::WriteZero, "write zero")),
                Ok(n) => {
                    self.write_buf.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Drain readable bytes and return every complete inbound message.
    /// Disconnects on EOF, I/O error, or a corrupt frame.
    pub fn poll(&mut self) -> Vec<UpstreamMessage> {
        if self.stream.is_none() {
            return Vec::new();
        }

        let mut read_failure = None;
        {
            let stream = self.stream.as_ref().expect("checked above");
            let mut buf = [0u8; 4096];
            loop {
                match (&*stream).read(&mut buf) {
                    Ok(0) => {
                        read_failure = Some("upstream closed the connection".to_string());
                        break;
                    }
                    Ok(n) => self.decoder.feed(&buf[..n]),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) => {
                        read_failure = Some(format!("upstream read failed: {}", e));
                        break;
                    }
                }
            }
        }
        if let Some(reason) = read_failure {
            info!("{}", reason);
            self.disconnect();
            return Vec::new();
        }

        let payloads = match self.decoder.drain_frames() {
            Ok(p) => p,
            Err(e) => {
                warn!(len = e.len, "oversized upstream frame, dropping connection");
                self.disconnect();
                return Vec::new();
            }
        };

        let mut messages = Vec::with_capacity(payloads.len());
        for payload in payloads {
            match serde_json::from_str::<UpstreamMessage>(&payload) {
                Ok(msg) => messages.push(msg),
                Err(e) => {
                    warn!("malformed upstream message, dropping connection: {}", e);
                    self.disconnect();
                    return messages;
                }
            }
        }
        messages
    }

    /// Drop the connection. The session's reconnect cadence re-establishes
    /// it; this is also the watchdog's hard-reinitialize path.
    pub fn disconnect(&mut self) {
        if self.stream.take().is_some() {
            info!("upstream disconnected");
        }
        self.decoder.clear();
        self.write_buf.clear();
    }
}
