//! UI server — Unix socket listener broadcasting pipeline events to UI
//! clients and accepting their small request vocabulary.
//!
//! The listener registers with calloop; per-client reads are polled from
//! the session tick. Clients that error out or fall too far behind are
//! dropped without disturbing the session.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use calloop::generic::Generic;
use calloop::{Interest, LoopHandle, Mode, PostAction};
use tracing::{debug, info, warn};

use crate::protocol::{encode_frame, FrameDecoder, UiEvent, UiRequest};
use crate::session::Session;

/// Maximum buffered outbound bytes per client before events are dropped.
const MAX_WRITE_BUFFER: usize = 65_536;

/// One connected UI client.
pub struct UiClient {
    pub stream: UnixStream,
    pub id: u64,
    decoder: FrameDecoder,
    write_buf: Vec<u8>,
}

impl UiClient {
    fn new(stream: UnixStream, id: u64) -> Self {
        stream.set_nonblocking(true).ok();
        Self {
            stream,
            id,
            decoder: FrameDecoder::new(),
            write_buf: Vec::new(),
        }
    }

    /// Queue a framed payload, dropping it if the client is too far behind.
    fn enqueue(&mut self, payload: &str) {
        if self.write_buf.len() > MAX_WRITE_BUFFER {
            warn!(client_id = self.id, "ui client write buffer overflow, dropping event");
            return;
        }
        encode_frame(payload, &mut self.write_buf);
    }

    fn flush_writes(&mut self) -> io::Result<()> {
        while !self.write_buf.is_empty() {
            match (&self.stream).write(&self.write_buf) {
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
}

/// Listener plus connected client set.
pub struct UiServer {
    pub socket_path: PathBuf,
    pub clients: HashMap<u64, UiClient>,
    next_client_id: u64,
}

impl UiServer {
    /// Create the server (does not bind; call `bind` with the loop handle).
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            clients: HashMap::new(),
            next_client_id: 1,
        }
    }

    /// Bind the listener socket and register it with calloop. New
    /// connections land in `session.ui.clients`.
    pub fn bind(
        socket_path: &Path,
        loop_handle: &LoopHandle<'static, Session>,
    ) -> anyhow::Result<()> {
        // Remove a stale socket from a previous run.
        if socket_path.exists() {
            std::fs::remove_file(socket_path)?;
        }

        let listener = UnixListener::bind(socket_path)?;
        listener.set_nonblocking(true)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o700))?;
        }

        info!(?socket_path, "ui server listening");

        let source = Generic::new(listener, Interest::READ, Mode::Level);
        loop_handle.insert_source(source, |_event, listener, session: &mut Session| {
            loop {
                match listener.accept() {
                    Ok((stream, _addr)) => {
                        let client_id = session.ui.next_client_id;
                        session.ui.next_client_id += 1;
                        info!(client_id, "ui client connected");
                        session
                            .ui
                            .clients
                            .insert(client_id, UiClient::new(stream, client_id));
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) => {
                        warn!("ui accept error: {}", e);
                        break;
                    }
                }
            }
            Ok(PostAction::Continue)
        })?;

        Ok(())
    }

    /// Attach an already-connected stream as a client (socketpair setups
    /// and scripted sessions).
    pub fn attach_client(&mut self, stream: UnixStream) -> u64 {
        let client_id = self.next_client_id;
        self.next_client_id += 1;
        self.clients.insert(client_id, UiClient::new(stream, client_id));
        client_id
    }

    /// Broadcast one event to every connected client.
    pub fn broadcast(&mut self, event: &UiEvent) {
        if self.clients.is_empty() {
            return;
        }
        let payload = serde_json::to_string(event).expect("events always serialize");
        for client in self.clients.values_mut() {
            client.enqueue(&payload);
        }
    }

    /// Read from all clients, dispatch complete requests through the
    /// session, flush responses, and drop dead clients. Called once per
    /// session tick.
    pub fn poll_clients(session: &mut Session) {
        let client_ids: Vec<u64> = session.ui.clients.keys().copied().collect();
        let mut disconnected = Vec::new();

        for client_id in client_ids {
            let mut buf = [0u8; 4096];
            let read_result = {
                let client = session.ui.clients.get_mut(&client_id).expect("id listed");
                loop {
                    match (&client.stream).read(&mut buf) {
                        Ok(0) => break Err(io::Error::new(io::ErrorKind::ConnectionReset, "eof")),
                        Ok(n) => {
                            client.decoder.feed(&buf[..n]);
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(()),
                        Err(e) => break Err(e),
                    }
                }
            };

            if let Err(e) = read_result {
                debug!(client_id, "ui client disconnected: {}", e);
                disconnected.push(client_id);
                continue;
            }

            let payloads = {
                let client = session.ui.clients.get_mut(&client_id).expect("id listed");
                match client.decoder.drain_frames() {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(client_id, len = e.len, "oversized ui frame, dropping client");
                        disconnected.push(client_id);
                        continue;
                    }
                }
            };

            for payload in payloads {
                let response = match serde_json::from_str::<UiRequest>(&payload) {
                    Ok(request) => {
                        debug!(client_id, ?request, "ui request");
                        session.handle_ui_request(request)
                    }
                    Err(e) => UiEvent::Error {
                        reason: format!("malformed request: {}", e),
                    },
                };
                let body = serde_json::to_string(&response).expect("events always serialize");
                if let Some(client) = session.ui.clients.get_mut(&client_id) {
                    client.enqueue(&body);
                }
            }

            if let Some(client) = session.ui.clients.get_mut(&client_id) {
                if let Err(e) = client.flush_writes() {
                    debug!(client_id, "ui client write error: {}", e);
                    disconnected.push(client_id);
                }
            }
        }

        for id in disconnected {
            info!(client_id = id, "removing ui client");
            session.ui.clients.remove(&id);
        }
    }

    /// Flush pending event broadcasts without reading.
    pub fn flush_all(&mut self) {
        let mut dead = Vec::new();
        for (id, client) in self.clients.iter_mut() {
            if client.flush_writes().is_err() {
                dead.push(*id);
            }
        }
        for id in dead {
            self.clients.remove(&id);
        }
    }

    /// Remove the socket file (shutdown).
    pub fn cleanup(&self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}
