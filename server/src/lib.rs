//! # Backgammon Match Server Library
//!
//! The server mediates backgammon matches between clients connected over
//! line-oriented TCP or WebSocket. Clients authenticate with a login
//! handshake, then issue text commands to list, create, and join matches,
//! roll dice, submit moves, chat, and request rematches.
//!
//! ## Architecture
//!
//! All state transitions flow through a single dispatcher task fed by one
//! bounded command queue. Each client session runs three cooperating
//! tasks: the transport read/write loops, a forwarder that multiplexes the
//! session's frames into the server-wide queue, and a periodic ping task
//! that doubles as the idle-timeout enforcer. Because the dispatcher is
//! the sole owner of match state, per-match locking does not exist and two
//! clients in the same match always observe the same interleaving of
//! transitions.
//!
//! ## Module Organization
//!
//! - [`client`]: per-connection session state and event delivery
//! - [`game`]: match lifecycle (seats, dice, board fan-out, rematches)
//! - [`network`]: TCP and WebSocket transport adapters and accept loops
//! - [`server`]: the registry, command dispatcher, and match reaper

pub mod client;
pub mod game;
pub mod network;
pub mod server;
