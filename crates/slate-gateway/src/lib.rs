//! # Slate Gateway
//!
//! Session and peer lifecycle on top of the slate wire protocol.
//!
//! A *session* is one shared display context: a single backend worker paints
//! it and any number of connected *peers* watch and drive it. The first peer
//! to finish the opening handshake owns the session and causes the backend
//! worker to be spawned; later peers join the existing session and are
//! brought up to date by replaying the display's current state.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       Supervisor                         │
//! │   accepts peers, owns the session registry               │
//! ├──────────────────────────────────────────────────────────┤
//! │                        Session                           │
//! │   handle tables, shared display, clipboard, broadcast    │
//! ├───────────────────────────┬──────────────────────────────┤
//! │     Peer input threads    │       Backend worker         │
//! │  parse → dispatch → fan-in│  events → paint → fan-out    │
//! └───────────────────────────┴──────────────────────────────┘
//! ```
//!
//! Scheduling is plain OS threads: one input thread per peer plus one
//! backend worker per session, all joined on shutdown. Shared state is one
//! mutex per session; instruction throughput is bounded by socket I/O, so
//! finer locking buys nothing.
//!
//! ## Module Structure
//!
//! - [`supervisor`]: accept loop, connection lifecycle, session registry
//! - [`session`]: shared session state and broadcast emitters
//! - [`peer`]: per-peer dispatch and the input loop
//! - [`handshake`]: the fixed opening exchange
//! - [`display`]: layer tree, cursor, clipboard, and join-time replay
//! - [`backend`]: the seam a display backend implements
//! - [`handles`]: generational handle allocation
//! - [`args`]: backend argument schemas and bound argument bags
//! - [`config`]: per-session tunables
//! - [`pointer`]: built-in pointer cursor

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod args;
pub mod backend;
pub mod config;
pub mod display;
pub mod error;
pub mod handles;
pub mod handshake;
pub mod peer;
pub mod pointer;
pub mod session;
pub mod supervisor;

pub use args::{ArgBag, ArgsSchema};
pub use backend::{Backend, BackendContext, BackendEvent, LoopbackBackend};
pub use config::SessionConfig;
pub use error::GatewayError;
pub use handles::{Handle, HandlePool};
pub use peer::Peer;
pub use session::{Session, SessionState};
pub use supervisor::Supervisor;
