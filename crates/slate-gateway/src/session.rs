//! Shared session state and broadcast emitters.
//!
//! One `Session` per shared display. The session owns the three handle
//! spaces, the display model, the clipboard, and the peer set; everything is
//! guarded by a single mutex. Broadcast emitters mutate the model and fan
//! the matching instruction out to every active peer under that lock, so a
//! joiner's replay ([`Session::synchronize_peer`]) always observes a
//! consistent snapshot: it either sees a mutation in the replayed model or
//! receives it as a live instruction afterward, never both or neither.

use crossbeam_channel::{Sender, TrySendError};
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use slate_core::{Status, WireError, WireSocket, emit};

use crate::args::ArgBag;
use crate::backend::BackendEvent;
use crate::config::SessionConfig;
use crate::display::{ClipboardData, CursorState, Display, Fill};
use crate::error::GatewayError;
use crate::handles::{Handle, HandlePool};
use crate::peer::Peer;

/// Clipboard payloads are split into blobs of this many raw bytes.
const CLIPBOARD_BLOB_BYTES: usize = 4096;

/// Milliseconds since the epoch, the protocol's timestamp unit.
#[must_use]
pub fn timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Lifecycle of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Owner connected, backend worker not yet running.
    Starting,
    /// Backend worker live; joiners accepted.
    Running,
    /// Owner gone or backend failed; draining peers.
    Stopping,
    /// All threads joined, handle tables freed.
    Stopped,
}

/// A named object: a collection of named stream bodies.
#[derive(Debug, Clone)]
pub struct ObjectState {
    /// Human-readable object name.
    pub name: String,
    /// Entries by name: mimetype and body.
    pub entries: HashMap<String, (String, Vec<u8>)>,
}

struct SessionInner {
    state: SessionState,
    peers: HashMap<u64, Arc<Peer>>,
    owner: Option<u64>,
    owner_args: ArgBag,
    next_peer_id: u64,
    layers: HandlePool,
    buffers: HandlePool,
    streams: HandlePool,
    objects: HandlePool,
    objects_by_index: HashMap<i32, ObjectState>,
    display: Display,
    events: Option<Sender<BackendEvent>>,
    requested_size: (i32, i32),
}

/// One shared-display session.
pub struct Session {
    id: String,
    backend_name: String,
    config: SessionConfig,
    inner: Mutex<SessionInner>,
    drained: Condvar,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Creates a session in the `Starting` state.
    #[must_use]
    pub fn new(id: String, backend_name: String, config: SessionConfig) -> Arc<Self> {
        Arc::new(Self {
            id,
            backend_name,
            config,
            inner: Mutex::new(SessionInner {
                state: SessionState::Starting,
                peers: HashMap::new(),
                owner: None,
                owner_args: ArgBag::default(),
                next_peer_id: 0,
                layers: HandlePool::ascending(1),
                buffers: HandlePool::descending(-1),
                streams: HandlePool::ascending(0),
                objects: HandlePool::ascending(0),
                objects_by_index: HashMap::new(),
                display: Display::new(),
                events: None,
                requested_size: (0, 0),
            }),
            drained: Condvar::new(),
            worker: Mutex::new(None),
        })
    }

    /// The session id carried by `ready`.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Name of the backend driving this session.
    #[must_use]
    pub fn backend_name(&self) -> &str {
        &self.backend_name
    }

    /// The session's tunables.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Whether peer input loops should keep running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(
            self.lock().state,
            SessionState::Starting | SessionState::Running
        )
    }

    /// Marks the backend worker live; joiners are accepted from here on.
    pub fn set_running(&self) {
        let mut inner = self.lock();
        if inner.state == SessionState::Starting {
            inner.state = SessionState::Running;
        }
    }

    /// Installs the channel the backend worker consumes.
    pub fn set_event_sender(&self, sender: Sender<BackendEvent>) {
        self.lock().events = Some(sender);
    }

    /// Records the owner's optimal display size from the handshake.
    pub fn set_requested_size(&self, width: i32, height: i32) {
        self.lock().requested_size = (width, height);
    }

    /// The owner's optimal display size, (0, 0) if never sent.
    #[must_use]
    pub fn requested_size(&self) -> (i32, i32) {
        self.lock().requested_size
    }

    /// The owner's bound argument bag.
    #[must_use]
    pub fn owner_args(&self) -> ArgBag {
        self.lock().owner_args.clone()
    }

    /// Keeps the backend worker's join handle for shutdown.
    pub fn set_worker(&self, handle: JoinHandle<()>) {
        *self.worker.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    fn join_worker(&self) {
        let handle = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!(session = %self.id, "backend worker panicked");
            }
        }
    }

    /* Peer lifecycle */

    /// Admits a peer. The first peer must attach as owner while the session
    /// is `Starting`; joiners attach while it is `Running`.
    ///
    /// # Errors
    ///
    /// [`GatewayError::AlreadyOwned`] for a second owner,
    /// [`GatewayError::SessionClosed`] once the session stops accepting.
    pub fn attach_peer(
        &self,
        socket: Arc<WireSocket>,
        owner: bool,
        bag: ArgBag,
    ) -> Result<Arc<Peer>, GatewayError> {
        let mut inner = self.lock();
        match (owner, inner.state) {
            (true, SessionState::Starting) => {}
            (false, SessionState::Running) => {}
            (true, _) if inner.owner.is_some() => return Err(GatewayError::AlreadyOwned),
            _ => return Err(GatewayError::SessionClosed),
        }
        if owner && inner.owner.is_some() {
            return Err(GatewayError::AlreadyOwned);
        }

        let id = inner.next_peer_id;
        inner.next_peer_id += 1;
        let peer = Arc::new(Peer::new(id, socket, owner, bag));
        if owner {
            inner.owner = Some(id);
            inner.owner_args = peer.args().clone();
        }
        inner.peers.insert(id, Arc::clone(&peer));
        info!(session = %self.id, peer = id, owner, "peer attached");
        Ok(peer)
    }

    /// Removes a peer from the set. An owner departure transitions the
    /// session to `Stopping`: the backend worker is signaled and every
    /// remaining peer socket is shut down so their input threads drain.
    pub fn detach_peer(&self, peer_id: u64) {
        let mut inner = self.lock();
        let removed = inner.peers.remove(&peer_id);
        let was_owner = inner.owner == Some(peer_id);
        if was_owner {
            inner.owner = None;
        }
        drop(removed);

        if was_owner && inner.state != SessionState::Stopped {
            self.begin_stop(&mut inner);
        }
        self.drained.notify_all();
        debug!(session = %self.id, peer = peer_id, was_owner, "peer detached");
    }

    /// Stops the session: signals the backend worker and shuts every peer
    /// socket down.
    pub fn stop(&self) {
        let mut inner = self.lock();
        self.begin_stop(&mut inner);
    }

    fn begin_stop(&self, inner: &mut SessionInner) {
        if matches!(inner.state, SessionState::Stopping | SessionState::Stopped) {
            return;
        }
        inner.state = SessionState::Stopping;
        if let Some(events) = &inner.events {
            let _ = events.try_send(BackendEvent::Stop);
        }
        for peer in inner.peers.values() {
            peer.deactivate();
            peer.socket().shutdown();
        }
        info!(session = %self.id, "session stopping");
    }

    /// Blocks until every remaining peer has detached, then joins the
    /// backend worker and frees session state. Called from the owner's
    /// connection thread; threads are joined, never detached.
    pub fn shut_down(&self) {
        // Dropping the sender wakes a worker blocked on recv even if the
        // stop event could not be queued.
        self.lock().events = None;
        self.join_worker();

        let mut inner = self.lock();
        while !inner.peers.is_empty() {
            let (guard, _) = self
                .drained
                .wait_timeout(inner, Duration::from_millis(100))
                .unwrap_or_else(|e| e.into_inner());
            inner = guard;
            // Re-kick stragglers whose sockets were opened after stop began.
            for peer in inner.peers.values() {
                peer.deactivate();
                peer.socket().shutdown();
            }
        }
        inner.state = SessionState::Stopped;
        inner.objects_by_index.clear();
        info!(session = %self.id, "session stopped");
    }

    /// Number of currently attached peers.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.lock().peers.len()
    }

    /* Handle allocation */

    /// Allocates a visible layer handle.
    ///
    /// # Errors
    ///
    /// [`GatewayError::HandlesExhausted`] when the space is full.
    pub fn allocate_layer(&self) -> Result<Handle, GatewayError> {
        self.lock()
            .layers
            .allocate()
            .ok_or(GatewayError::HandlesExhausted)
    }

    /// Allocates an off-screen buffer handle (negative index).
    ///
    /// # Errors
    ///
    /// [`GatewayError::HandlesExhausted`] when the space is full.
    pub fn allocate_buffer(&self) -> Result<Handle, GatewayError> {
        self.lock()
            .buffers
            .allocate()
            .ok_or(GatewayError::HandlesExhausted)
    }

    /// Allocates a stream handle.
    ///
    /// # Errors
    ///
    /// [`GatewayError::HandlesExhausted`] when the space is full.
    pub fn allocate_stream(&self) -> Result<Handle, GatewayError> {
        self.lock()
            .streams
            .allocate()
            .ok_or(GatewayError::HandlesExhausted)
    }

    /// Releases a stream handle by wire index, as acknowledged by a peer.
    pub fn release_stream(&self, index: i64) {
        let mut inner = self.lock();
        let Ok(index) = i32::try_from(index) else {
            return;
        };
        if let Some(handle) = inner.streams.lookup(index) {
            inner.streams.dispose(handle);
        }
    }

    /// Disposes a layer or buffer handle, forgets its display state, and
    /// broadcasts the disposal.
    pub fn dispose_layer(&self, handle: Handle) {
        let mut inner = self.lock();
        let pool = if handle.index() < 0 {
            &mut inner.buffers
        } else {
            &mut inner.layers
        };
        if !pool.dispose(handle) {
            debug!(session = %self.id, index = handle.index(), "stale layer dispose ignored");
            return;
        }
        inner.display.dispose(handle.index());
        Self::broadcast(&inner, |socket| emit::dispose(socket, i64::from(handle.index())));
    }

    /* Broadcast emitters: mutate the model, then fan out under the lock. */

    fn broadcast<F>(inner: &SessionInner, f: F)
    where
        F: Fn(&WireSocket) -> Result<(), WireError>,
    {
        Self::broadcast_filtered(inner, None, f);
    }

    fn broadcast_filtered<F>(inner: &SessionInner, skip: Option<u64>, f: F)
    where
        F: Fn(&WireSocket) -> Result<(), WireError>,
    {
        for (&id, peer) in &inner.peers {
            if Some(id) == skip || !peer.is_active() {
                continue;
            }
            if let Err(e) = f(peer.socket()) {
                debug!(peer = id, error = %e, "peer write failed, deactivating");
                peer.deactivate();
                peer.socket().shutdown();
            }
        }
    }

    /// Resizes a layer everywhere.
    pub fn resize_layer(&self, layer: i32, width: i32, height: i32) {
        let mut inner = self.lock();
        inner.display.resize(layer, width, height);
        Self::broadcast(&inner, |socket| {
            emit::size(socket, i64::from(layer), i64::from(width), i64::from(height))
        });
    }

    /// Repositions a layer everywhere.
    ///
    /// # Errors
    ///
    /// [`GatewayError::BadInstruction`] if the move would create a parent
    /// cycle.
    pub fn move_layer(
        &self,
        layer: i32,
        parent: i32,
        x: i32,
        y: i32,
        z: i32,
    ) -> Result<(), GatewayError> {
        let mut inner = self.lock();
        inner.display.move_layer(layer, parent, x, y, z)?;
        Self::broadcast(&inner, |socket| {
            emit::move_layer(
                socket,
                i64::from(layer),
                i64::from(parent),
                i64::from(x),
                i64::from(y),
                i64::from(z),
            )
        });
        Ok(())
    }

    /// Sets a layer's opacity everywhere.
    pub fn shade_layer(&self, layer: i32, alpha: i32) {
        let mut inner = self.lock();
        inner.display.shade(layer, alpha);
        Self::broadcast(&inner, |socket| {
            emit::shade(socket, i64::from(layer), i64::from(alpha))
        });
    }

    /// Fills a whole layer with a solid color everywhere.
    pub fn fill_layer(&self, layer: i32, fill: Fill) {
        let mut inner = self.lock();
        inner.display.set_fill(layer, fill);
        let (width, height) = inner
            .display
            .layer(layer)
            .map(|l| (l.width, l.height))
            .unwrap_or((0, 0));
        Self::broadcast(&inner, |socket| {
            emit::rect(
                socket,
                i64::from(layer),
                0,
                0,
                i64::from(width),
                i64::from(height),
            )?;
            emit::cfill(
                socket,
                i64::from(fill.mode),
                i64::from(layer),
                i64::from(fill.r),
                i64::from(fill.g),
                i64::from(fill.b),
                i64::from(fill.a),
            )
        });
    }

    /// Copies a region between layers everywhere. Transient: not recorded
    /// for replay.
    #[allow(clippy::too_many_arguments)]
    pub fn copy_region(
        &self,
        src_layer: i32,
        src_x: i32,
        src_y: i32,
        width: i32,
        height: i32,
        mode: i32,
        dst_layer: i32,
        dst_x: i32,
        dst_y: i32,
    ) {
        let inner = self.lock();
        Self::broadcast(&inner, |socket| {
            emit::copy(
                socket,
                i64::from(src_layer),
                i64::from(src_x),
                i64::from(src_y),
                i64::from(width),
                i64::from(height),
                i64::from(mode),
                i64::from(dst_layer),
                i64::from(dst_x),
                i64::from(dst_y),
            )
        });
    }

    /// Replaces the session cursor everywhere.
    pub fn set_cursor(&self, cursor: CursorState) {
        let mut inner = self.lock();
        inner.display.set_cursor(cursor);
        Self::broadcast(&inner, |socket| {
            emit::cursor(
                socket,
                i64::from(cursor.hotspot_x),
                i64::from(cursor.hotspot_y),
                i64::from(cursor.src_layer),
                i64::from(cursor.src_x),
                i64::from(cursor.src_y),
                i64::from(cursor.width),
                i64::from(cursor.height),
            )
        });
    }

    /// Marks a frame boundary on every peer and flushes their sockets.
    pub fn sync_all(&self, timestamp: i64) {
        let inner = self.lock();
        Self::broadcast(&inner, |socket| {
            emit::sync(socket, timestamp)?;
            socket.flush()
        });
    }

    /// Commits clipboard contents and streams them to every peer except
    /// `source` (the peer the data came from, if any).
    pub fn commit_clipboard(&self, source: Option<u64>, clipboard: ClipboardData) {
        let mut inner = self.lock();
        let Some(stream) = inner.streams.allocate() else {
            warn!(session = %self.id, "no stream handle for clipboard broadcast");
            return;
        };
        inner.display.set_clipboard(clipboard.clone());

        let index = i64::from(stream.index());
        Self::broadcast_filtered(&inner, source, |socket| {
            emit::clipboard(socket, index, &clipboard.mimetype)?;
            for chunk in clipboard.data.chunks(CLIPBOARD_BLOB_BYTES) {
                emit::blob(socket, index, chunk)?;
            }
            emit::end(socket, index)?;
            socket.flush()
        });

        inner.streams.dispose(stream);
    }

    /// Publishes a named object and announces it as a filesystem.
    ///
    /// # Errors
    ///
    /// [`GatewayError::HandlesExhausted`] when the object space is full.
    pub fn publish_object(&self, object: ObjectState) -> Result<Handle, GatewayError> {
        let mut inner = self.lock();
        let handle = inner
            .objects
            .allocate()
            .ok_or(GatewayError::HandlesExhausted)?;
        let name = object.name.clone();
        inner.objects_by_index.insert(handle.index(), object);
        Self::broadcast(&inner, |socket| {
            emit::filesystem(socket, i64::from(handle.index()), &name)
        });
        Ok(handle)
    }

    /// Streams one object entry's body to a single peer, as requested by a
    /// `get` instruction. Unknown objects or entries are tolerated silently
    /// apart from a debug log.
    ///
    /// # Errors
    ///
    /// Wire errors writing to the requesting peer.
    pub fn serve_object_entry(
        &self,
        peer: &Peer,
        object_index: i64,
        entry_name: &str,
    ) -> Result<(), GatewayError> {
        let mut inner = self.lock();
        let Ok(index) = i32::try_from(object_index) else {
            return Ok(());
        };
        let Some((mimetype, data)) = inner
            .objects_by_index
            .get(&index)
            .and_then(|o| o.entries.get(entry_name))
            .cloned()
        else {
            debug!(session = %self.id, object = object_index, entry = entry_name,
                "get for unknown object entry ignored");
            return Ok(());
        };

        let stream = inner
            .streams
            .allocate()
            .ok_or(GatewayError::HandlesExhausted)?;
        let socket = peer.socket();
        let result = (|| {
            emit::body(
                socket,
                object_index,
                i64::from(stream.index()),
                &mimetype,
                entry_name,
            )?;
            for chunk in data.chunks(CLIPBOARD_BLOB_BYTES) {
                emit::blob(socket, i64::from(stream.index()), chunk)?;
            }
            emit::end(socket, i64::from(stream.index()))?;
            socket.flush()
        })();
        inner.streams.dispose(stream);
        result.map_err(GatewayError::from)
    }

    /// Forwards one peer input event to the backend worker. Events are
    /// dropped with a warning when the worker cannot keep up.
    pub fn forward_event(&self, event: BackendEvent) {
        let inner = self.lock();
        if let Some(events) = &inner.events {
            match events.try_send(event) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => {}
                Err(TrySendError::Full(event)) => {
                    warn!(session = %self.id, ?event, "backend event queue full, dropping");
                }
            }
        }
    }

    /// Brings a freshly admitted peer up to date: replays the display
    /// model, the committed clipboard, any published objects, then a `sync`.
    /// Runs entirely under the session lock so the snapshot is consistent
    /// with subsequent live broadcasts.
    ///
    /// # Errors
    ///
    /// Wire errors writing to the new peer.
    pub fn synchronize_peer(&self, peer: &Peer) -> Result<(), GatewayError> {
        let mut inner = self.lock();
        let socket = peer.socket();

        emit::name(socket, &self.backend_name)?;
        inner.display.dup(socket)?;

        if let Some(clipboard) = inner.display.clipboard().cloned() {
            let stream = inner
                .streams
                .allocate()
                .ok_or(GatewayError::HandlesExhausted)?;
            let index = i64::from(stream.index());
            let result = (|| {
                emit::clipboard(socket, index, &clipboard.mimetype)?;
                for chunk in clipboard.data.chunks(CLIPBOARD_BLOB_BYTES) {
                    emit::blob(socket, index, chunk)?;
                }
                emit::end(socket, index)
            })();
            inner.streams.dispose(stream);
            result?;
        }

        let objects: Vec<(i32, String)> = inner
            .objects_by_index
            .iter()
            .map(|(&index, object)| (index, object.name.clone()))
            .collect();
        for (index, name) in objects {
            emit::filesystem(socket, i64::from(index), &name)?;
        }

        emit::sync(socket, timestamp_ms())?;
        socket.flush()?;
        Ok(())
    }

    /// Reports a fatal backend failure to every peer and stops the session.
    pub fn fail_upstream(&self, message: &str, status: Status) {
        {
            let inner = self.lock();
            Self::broadcast(&inner, |socket| {
                emit::error(socket, message, status)?;
                emit::disconnect(socket)?;
                socket.flush()
            });
        }
        self.stop();
    }
}
