//! End-to-end session lifecycle over in-memory connections: handshake,
//! owner vs joiner, replay, clipboard fan-in/out, read-only peers, and
//! shutdown.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use slate_core::{Status, WireSocket, emit};
use slate_gateway::display::{Fill, ROOT_LAYER};
use slate_gateway::session::timestamp_ms;
use slate_gateway::{
    ArgBag, ArgsSchema, Backend, BackendContext, BackendEvent, GatewayError, LoopbackBackend,
    Session, SessionConfig, Supervisor,
};

use slate_integration_tests::{OwnedInstruction, TestClient, connection, pipe};

fn test_config() -> SessionConfig {
    SessionConfig {
        // Short read timeout so draining joiners notice shutdown quickly.
        instruction_timeout_us: 50_000,
        idle_timeout_us: 5_000_000,
        clipboard_cap: 262_144,
    }
}

fn start_supervisor(backend: Arc<dyn Backend>) -> Arc<Supervisor> {
    let mut supervisor = Supervisor::new(test_config());
    supervisor.register_backend(backend);
    Arc::new(supervisor)
}

fn spawn_peer(supervisor: &Arc<Supervisor>) -> (TestClient, thread::JoinHandle<()>) {
    let (client, reader, writer) = connection();
    let supervisor = Arc::clone(supervisor);
    let handle = thread::spawn(move || supervisor.handle_connection(reader, writer));
    (client, handle)
}

/// Backend that paints once and records every event it receives.
struct RecordingBackend {
    events: Arc<Mutex<Vec<BackendEvent>>>,
}

impl Backend for RecordingBackend {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn schema(&self) -> ArgsSchema {
        ArgsSchema::new(&["width", "height", "read-only"])
    }

    fn run(&self, ctx: BackendContext) -> Result<(), GatewayError> {
        let session = ctx.session;
        session.resize_layer(ROOT_LAYER, 640, 480);
        session.fill_layer(
            ROOT_LAYER,
            Fill {
                mode: 12,
                r: 32,
                g: 32,
                b: 32,
                a: 255,
            },
        );
        session.sync_all(timestamp_ms());

        while let Ok(event) = ctx.events.recv() {
            if event == BackendEvent::Stop {
                break;
            }
            self.events.lock().unwrap().push(event);
        }
        Ok(())
    }
}

fn find<'a>(
    instructions: &'a [OwnedInstruction],
    opcode: &str,
) -> Option<&'a OwnedInstruction> {
    instructions.iter().find(|(o, _)| o == opcode)
}

#[test]
fn owner_handshake_creates_session_and_receives_paint() {
    let supervisor = start_supervisor(Arc::new(LoopbackBackend));
    let (mut owner, server) = spawn_peer(&supervisor);

    let id = owner.handshake("loopback", &["", "", "", ""]);
    assert!(!id.is_empty());
    assert_eq!(supervisor.session_count(), 1);
    assert!(supervisor.session(&id).is_some());

    // The loopback backend paints the requested size and installs the
    // pointer cursor.
    let seen = owner.read_until("cursor");
    let size = find(&seen, "size").expect("initial size");
    assert_eq!(size.1, ["0", "1024", "768"]);
    let cfill = find(&seen, "cfill").expect("initial fill");
    assert_eq!(cfill.1[1], "0");
    assert_eq!(cfill.1[5], "255");
    assert!(find(&seen, "name").is_some(), "session name precedes paint");

    // Owner departure stops and frees the session.
    drop(owner);
    server.join().unwrap();
    assert_eq!(supervisor.session_count(), 0);
}

#[test]
fn joiner_receives_replay_before_live_updates() {
    let supervisor = start_supervisor(Arc::new(LoopbackBackend));
    let (mut owner, owner_thread) = spawn_peer(&supervisor);

    let id = owner.handshake("loopback", &["", "", "", ""]);
    owner.read_until("cursor");

    // Join after the owner's display is fully painted.
    let (mut joiner, joiner_thread) = spawn_peer(&supervisor);
    let joined_id = joiner.handshake(&id, &["", "", "", ""]);
    assert_eq!(joined_id, id);
    assert_eq!(supervisor.session(&id).unwrap().peer_count(), 2);

    // Replay must deliver the current size and fill before its closing
    // sync, regardless of how long the session has been running.
    let replay = joiner.read_until("sync");
    let size = find(&replay, "size").expect("replayed size");
    assert_eq!(size.1, ["0", "1024", "768"]);
    let cfill = find(&replay, "cfill").expect("replayed fill");
    assert_eq!(&cfill.1[2..6], ["0", "0", "0", "255"]);
    assert!(find(&replay, "cursor").is_some(), "cursor replays to joiners");

    // A live update lands after the replay prefix on the joiner too.
    emit::display_size(&owner.socket, 800, 600, 96).unwrap();
    owner.socket.flush().unwrap();

    let live = joiner.read_until("sync");
    let resized = find(&live, "size").expect("live resize broadcast");
    assert_eq!(resized.1, ["0", "800", "600"]);

    drop(joiner);
    joiner_thread.join().unwrap();
    drop(owner);
    owner_thread.join().unwrap();
    assert_eq!(supervisor.session_count(), 0);
}

#[test]
fn clipboard_fans_out_to_other_peers() {
    let supervisor = start_supervisor(Arc::new(LoopbackBackend));
    let (mut owner, owner_thread) = spawn_peer(&supervisor);
    let id = owner.handshake("loopback", &["", "", "", ""]);
    owner.read_until("cursor");

    let (mut joiner, joiner_thread) = spawn_peer(&supervisor);
    joiner.handshake(&id, &["", "", "", ""]);
    joiner.read_until("sync");

    // Joiner pushes clipboard data up to the gateway.
    emit::clipboard(&joiner.socket, 0, "text/plain").unwrap();
    emit::blob(&joiner.socket, 0, b"shared text").unwrap();
    emit::end(&joiner.socket, 0).unwrap();
    joiner.socket.flush().unwrap();

    // Each write is acknowledged.
    let acks = joiner.read_until("ack");
    assert_eq!(find(&acks, "ack").unwrap().1[2], "0");

    // The owner observes the committed clipboard as a stream.
    let seen = owner.read_until("end");
    let open = find(&seen, "clipboard").expect("clipboard broadcast");
    assert_eq!(open.1[1], "text/plain");
    let blob = find(&seen, "blob").expect("clipboard payload");
    let mut payload = blob.1[1].clone().into_bytes();
    let n = slate_core::base64::decode_in_place(&mut payload);
    assert_eq!(&payload[..n], b"shared text");

    drop(joiner);
    joiner_thread.join().unwrap();
    drop(owner);
    owner_thread.join().unwrap();
}

#[test]
fn clipboard_overrun_is_refused() {
    let mut config = test_config();
    config.clipboard_cap = 8;
    let mut supervisor = Supervisor::new(config);
    supervisor.register_backend(Arc::new(LoopbackBackend));
    let supervisor = Arc::new(supervisor);

    let (mut owner, server) = spawn_peer(&supervisor);
    owner.handshake("loopback", &["", "", "", ""]);
    owner.read_until("cursor");

    emit::clipboard(&owner.socket, 0, "text/plain").unwrap();
    emit::blob(&owner.socket, 0, b"way more than eight bytes").unwrap();
    emit::end(&owner.socket, 0).unwrap();
    owner.socket.flush().unwrap();

    let mut statuses = Vec::new();
    while statuses.len() < 2 {
        let (opcode, args) = owner.read().unwrap();
        if opcode == "ack" {
            statuses.push(args[2].clone());
        }
    }
    assert_eq!(statuses[0], "0");
    assert_eq!(
        statuses[1],
        Status::ClientOverrun.code().to_string(),
        "oversized clipboard must be refused with a client-overrun status"
    );

    drop(owner);
    server.join().unwrap();
}

#[test]
fn read_only_peer_input_is_not_forwarded() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let supervisor = start_supervisor(Arc::new(RecordingBackend {
        events: Arc::clone(&events),
    }));

    let (mut owner, owner_thread) = spawn_peer(&supervisor);
    let id = owner.handshake("recording", &["", "", ""]);
    owner.read_until("sync");

    let (mut watcher, watcher_thread) = spawn_peer(&supervisor);
    watcher.handshake(&id, &["", "", "true"]);
    watcher.read_until("sync");

    // The watcher's input must be dropped; its clipboard attempt is refused
    // outright, which also proves the mouse event was already processed.
    emit::mouse(&watcher.socket, 2, 2, 1, timestamp_ms()).unwrap();
    emit::clipboard(&watcher.socket, 0, "text/plain").unwrap();
    watcher.socket.flush().unwrap();
    let refusal = watcher.read_until("ack");
    assert_eq!(
        find(&refusal, "ack").unwrap().1[2],
        Status::ClientForbidden.code().to_string()
    );

    // The owner's input flows through.
    emit::mouse(&owner.socket, 1, 1, 1, timestamp_ms()).unwrap();
    emit::key(&owner.socket, 0xFF0D, true, timestamp_ms()).unwrap();
    owner.socket.flush().unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        {
            let recorded = events.lock().unwrap();
            if recorded.len() >= 2 {
                assert!(recorded.contains(&BackendEvent::Mouse {
                    x: 1,
                    y: 1,
                    button_mask: 1
                }));
                assert!(recorded.contains(&BackendEvent::Key {
                    keysym: 0xFF0D,
                    pressed: true
                }));
                assert!(!recorded.iter().any(|e| matches!(
                    e,
                    BackendEvent::Mouse { x: 2, .. }
                )));
                break;
            }
        }
        assert!(Instant::now() < deadline, "backend never saw owner input");
        thread::sleep(Duration::from_millis(10));
    }

    drop(watcher);
    watcher_thread.join().unwrap();
    drop(owner);
    owner_thread.join().unwrap();
}

#[test]
fn unknown_select_target_is_refused() {
    let supervisor = start_supervisor(Arc::new(LoopbackBackend));
    let (mut client, server) = spawn_peer(&supervisor);

    emit::select(&client.socket, "no-such-thing").unwrap();
    client.socket.flush().unwrap();

    let (opcode, args) = client.read().unwrap();
    assert_eq!(opcode, "error");
    assert_eq!(args[1], Status::ResourceNotFound.code().to_string());
    let (opcode, _) = client.read().unwrap();
    assert_eq!(opcode, "disconnect");

    server.join().unwrap();
    assert_eq!(supervisor.session_count(), 0);
}

#[test]
fn get_streams_a_published_object_body() {
    let supervisor = start_supervisor(Arc::new(LoopbackBackend));
    let (mut owner, server) = spawn_peer(&supervisor);
    owner.handshake("loopback", &["", "", "", ""]);

    // The loopback backend publishes one object before its first sync.
    let seen = owner.read_until("filesystem");
    let object = find(&seen, "filesystem").unwrap().1[0].clone();

    let mut w = owner.socket.instruction_begin();
    w.write_text("3.get,");
    w.element_text(&object);
    w.write_text(",");
    w.element_text("motd");
    w.write_text(";");
    w.finish().unwrap();
    owner.socket.flush().unwrap();

    let seen = owner.read_until("end");
    let body = find(&seen, "body").expect("object body");
    assert_eq!(body.1[0], object);
    assert_eq!(body.1[2], "text/plain");
    assert_eq!(body.1[3], "motd");

    let blob = find(&seen, "blob").expect("object payload");
    let mut payload = blob.1[1].clone().into_bytes();
    let n = slate_core::base64::decode_in_place(&mut payload);
    assert_eq!(&payload[..n], b"loopback display");

    drop(owner);
    server.join().unwrap();
}

#[test]
fn display_mutations_broadcast_and_replay() {
    let session = Session::new("s".to_owned(), "test".to_owned(), test_config());

    let (writer, mut owner_view) = pipe();
    let owner = session
        .attach_peer(
            Arc::new(WireSocket::new(Box::new(writer))),
            true,
            ArgBag::default(),
        )
        .unwrap();
    session.set_running();

    session.resize_layer(ROOT_LAYER, 320, 200);
    let panel = session.allocate_layer().unwrap();
    session.resize_layer(panel.index(), 100, 80);
    session
        .move_layer(panel.index(), ROOT_LAYER, 10, 20, 3)
        .unwrap();
    session.shade_layer(panel.index(), 128);
    session.fill_layer(
        panel.index(),
        Fill {
            mode: 12,
            r: 200,
            g: 10,
            b: 10,
            a: 255,
        },
    );
    session.copy_region(ROOT_LAYER, 0, 0, 10, 10, 12, panel.index(), 0, 0);

    let scratch = session.allocate_layer().unwrap();
    session.resize_layer(scratch.index(), 8, 8);
    session.dispose_layer(scratch);
    session.sync_all(timestamp_ms());

    // The attached peer observed every mutation in order.
    let mut parser = slate_core::Parser::new();
    let mut opcodes = Vec::new();
    loop {
        let instruction = parser
            .read(&mut owner_view, Duration::from_secs(1))
            .unwrap();
        let opcode = instruction.opcode().to_owned();
        opcodes.push(opcode.clone());
        if opcode == "sync" {
            break;
        }
    }
    assert!(opcodes.contains(&"move".to_owned()));
    assert!(opcodes.contains(&"shade".to_owned()));
    assert!(opcodes.contains(&"copy".to_owned()));
    assert!(opcodes.contains(&"dispose".to_owned()));

    // A fresh peer's replay reconstructs the surviving state, without the
    // transient copy or the disposed layer.
    let (writer, mut joiner_view) = pipe();
    let joiner = session
        .attach_peer(
            Arc::new(WireSocket::new(Box::new(writer))),
            false,
            ArgBag::default(),
        )
        .unwrap();
    session.synchronize_peer(&joiner).unwrap();

    let mut parser = slate_core::Parser::new();
    let mut replay = Vec::new();
    loop {
        let instruction = parser
            .read(&mut joiner_view, Duration::from_secs(1))
            .unwrap();
        let opcode = instruction.opcode().to_owned();
        let args: Vec<String> = instruction.args().iter().map(|&s| s.to_owned()).collect();
        let done = opcode == "sync";
        replay.push((opcode, args));
        if done {
            break;
        }
    }

    let panel_index = panel.index().to_string();
    assert!(replay.iter().any(|(o, a)| o == "move" && a[0] == panel_index));
    assert!(replay.iter().any(|(o, a)| o == "shade" && a == &[panel_index.clone(), "128".to_owned()]));
    assert!(replay.iter().any(|(o, a)| o == "cfill" && a[1] == panel_index));
    assert!(!replay.iter().any(|(o, _)| o == "copy"));
    assert!(!replay.iter().any(|(o, a)| o == "size" && a[0] == scratch.index().to_string()));

    // Handle reuse: the disposed index comes back for the next layer.
    let reused = session.allocate_layer().unwrap();
    assert_eq!(reused.index(), scratch.index());
    assert_ne!(reused, scratch);

    drop(owner);
}

#[test]
fn at_most_one_owner_per_session() {
    let session = Session::new("s".to_owned(), "loopback".to_owned(), test_config());

    let (writer, _reader) = pipe();
    let first = session.attach_peer(
        Arc::new(WireSocket::new(Box::new(writer))),
        true,
        ArgBag::default(),
    );
    assert!(first.is_ok());

    let (writer, _reader) = pipe();
    let second = session.attach_peer(
        Arc::new(WireSocket::new(Box::new(writer))),
        true,
        ArgBag::default(),
    );
    assert!(matches!(second, Err(GatewayError::AlreadyOwned)));
}

#[test]
fn joiners_rejected_after_stop() {
    let session = Session::new("s".to_owned(), "loopback".to_owned(), test_config());
    let (writer, _reader) = pipe();
    session
        .attach_peer(
            Arc::new(WireSocket::new(Box::new(writer))),
            true,
            ArgBag::default(),
        )
        .unwrap();
    session.set_running();
    session.stop();

    let (writer, _reader) = pipe();
    let joiner = session.attach_peer(
        Arc::new(WireSocket::new(Box::new(writer))),
        false,
        ArgBag::default(),
    );
    assert!(matches!(joiner, Err(GatewayError::SessionClosed)));
}

#[test]
fn stream_handles_are_reused_after_release() {
    let session = Session::new("s".to_owned(), "loopback".to_owned(), test_config());

    let first = session.allocate_stream().unwrap();
    let second = session.allocate_stream().unwrap();
    assert_ne!(first.index(), second.index());

    session.release_stream(i64::from(first.index()));
    let third = session.allocate_stream().unwrap();
    assert_eq!(third.index(), first.index());
    assert_ne!(third, first, "reused index carries a new generation");
}
