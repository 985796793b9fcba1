//! Accept loop, connection lifecycle, and the session registry.
//!
//! One supervisor per process. Each accepted connection gets its own thread
//! that runs the handshake and then the peer's input loop to completion;
//! when an owner's thread finishes it also drives its session's shutdown,
//! joining the backend worker and waiting for every joiner to drain. Nothing
//! is detached.

use dashmap::DashMap;
use std::collections::HashMap;
use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use tracing::{debug, error, info};

use slate_core::{Parser, WireRead, WireSocket, WireWrite, emit};

use crate::backend::{Backend, BackendContext};
use crate::config::SessionConfig;
use crate::error::GatewayError;
use crate::handshake;
use crate::peer::{self, Peer};
use crate::session::{Session, timestamp_ms};

/// Capacity of each session's backend event queue.
const EVENT_QUEUE_DEPTH: usize = 256;

/// Accepts peers and owns the session registry.
pub struct Supervisor {
    config: SessionConfig,
    backends: HashMap<&'static str, Arc<dyn Backend>>,
    sessions: DashMap<String, Arc<Session>>,
    next_session: AtomicU64,
}

impl Supervisor {
    /// Creates a supervisor with no registered backends.
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            backends: HashMap::new(),
            sessions: DashMap::new(),
            next_session: AtomicU64::new(0),
        }
    }

    /// Registers a backend under its protocol name.
    pub fn register_backend(&mut self, backend: Arc<dyn Backend>) {
        self.backends.insert(backend.name(), backend);
    }

    /// Looks up a live session by id.
    #[must_use]
    pub fn session(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|s| Arc::clone(&s))
    }

    /// Number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Accepts connections forever, one thread per peer.
    ///
    /// # Errors
    ///
    /// Only fatal listener errors; per-connection failures are logged and
    /// absorbed.
    pub fn serve(self: &Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        info!(addr = ?listener.local_addr().ok(), "listening");
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let supervisor = Arc::clone(self);
                    let spawned = thread::Builder::new()
                        .name("slate-peer".to_owned())
                        .spawn(move || {
                            let write_half = match stream.try_clone() {
                                Ok(clone) => clone,
                                Err(e) => {
                                    error!(error = %e, "cannot split connection");
                                    return;
                                }
                            };
                            supervisor
                                .handle_connection(Box::new(stream), Box::new(write_half));
                        });
                    if let Err(e) = spawned {
                        error!(error = %e, "cannot spawn peer thread");
                    }
                }
                Err(e) => error!(error = %e, "accept failed"),
            }
        }
        Ok(())
    }

    /// Runs one connection's entire lifecycle on the calling thread:
    /// handshake, input loop, teardown. Public so transports other than TCP
    /// (and tests) can drive connections directly.
    pub fn handle_connection(&self, mut reader: Box<dyn WireRead>, writer: Box<dyn WireWrite>) {
        let socket = Arc::new(WireSocket::new(writer));
        let mut parser = Parser::new();

        match self.negotiate(&mut parser, reader.as_mut(), &socket) {
            Ok((session, peer)) => {
                peer::input_loop(&session, &peer, &mut parser, reader.as_mut());
                self.teardown(&session, &peer);
            }
            Err(e) => {
                debug!(error = %e, "handshake failed");
                let _ = emit::error(&socket, &e.to_string(), e.status());
                let _ = emit::disconnect(&socket);
                let _ = socket.flush();
                socket.shutdown();
            }
        }
    }

    /// Drives the opening exchange and admits the peer as owner of a new
    /// session or joiner of an existing one.
    fn negotiate(
        &self,
        parser: &mut Parser,
        reader: &mut dyn WireRead,
        socket: &Arc<WireSocket>,
    ) -> Result<(Arc<Session>, Arc<Peer>), GatewayError> {
        // The handshake gets the generous timeout; a peer mid-handshake has
        // nothing else to be waiting on.
        let timeout = self.config.idle_timeout();
        let target = handshake::read_select(parser, reader, timeout)?;

        if let Some(backend) = self.backends.get(target.as_str()).cloned() {
            let schema = backend.schema();
            let hello = handshake::exchange(parser, reader, socket, schema.names(), timeout)?;
            let values: Vec<&str> = hello.values.iter().map(String::as_str).collect();
            let bag = schema.bind(&values)?;

            let session = Session::new(
                self.next_session_id(),
                backend.name().to_owned(),
                self.config.clone(),
            );
            session.set_requested_size(hello.width, hello.height);
            let peer = session.attach_peer(Arc::clone(socket), true, bag)?;
            self.sessions
                .insert(session.id().to_owned(), Arc::clone(&session));

            let started = (|| {
                emit::ready(socket, session.id())?;
                session.synchronize_peer(&peer)?;
                self.spawn_worker(&session, Arc::clone(&backend))
            })();
            if let Err(e) = started {
                session.detach_peer(peer.id());
                session.shut_down();
                self.sessions.remove(session.id());
                return Err(e);
            }

            info!(session = %session.id(), backend = session.backend_name(), "session created");
            Ok((session, peer))
        } else if let Some(session) = self.session(&target) {
            let backend = self
                .backends
                .get(session.backend_name())
                .cloned()
                .ok_or_else(|| GatewayError::UnknownTarget(target.clone()))?;
            let schema = backend.schema();
            let hello = handshake::exchange(parser, reader, socket, schema.names(), timeout)?;
            let values: Vec<&str> = hello.values.iter().map(String::as_str).collect();
            let bag = schema.bind(&values)?;

            let peer = session.attach_peer(Arc::clone(socket), false, bag)?;
            let synchronized = (|| {
                emit::ready(socket, session.id())?;
                // Replay runs under the session lock, so the joiner's
                // snapshot and subsequent live broadcasts never tear.
                session.synchronize_peer(&peer)
            })();
            if let Err(e) = synchronized {
                session.detach_peer(peer.id());
                return Err(e);
            }

            info!(session = %session.id(), peer = peer.id(), "peer joined");
            Ok((session, peer))
        } else {
            Err(GatewayError::UnknownTarget(target))
        }
    }

    /// Spawns the session's backend worker thread.
    fn spawn_worker(
        &self,
        session: &Arc<Session>,
        backend: Arc<dyn Backend>,
    ) -> Result<(), GatewayError> {
        let (sender, events) = crossbeam_channel::bounded(EVENT_QUEUE_DEPTH);
        session.set_event_sender(sender);
        session.set_running();

        let worker_session = Arc::clone(session);
        let handle = thread::Builder::new()
            .name(format!("slate-backend-{}", session.id()))
            .spawn(move || {
                let ctx = BackendContext {
                    session: Arc::clone(&worker_session),
                    events,
                };
                if let Err(e) = backend.run(ctx) {
                    error!(session = %worker_session.id(), error = %e, "backend failed");
                    worker_session.fail_upstream(&e.to_string(), e.status());
                }
            })
            .map_err(|e| GatewayError::Backend(e.to_string()))?;

        session.set_worker(handle);
        Ok(())
    }

    /// Completes a peer's lifecycle after its input loop returns. The
    /// owner's thread also shuts the whole session down.
    fn teardown(&self, session: &Arc<Session>, peer: &Arc<Peer>) {
        session.detach_peer(peer.id());
        if peer.is_owner() {
            session.shut_down();
            self.sessions.remove(session.id());
        }
    }

    fn next_session_id(&self) -> String {
        let sequence = self.next_session.fetch_add(1, Ordering::Relaxed);
        format!("{:08x}{:04x}", timestamp_ms() as u32, sequence & 0xFFFF)
    }
}
