//! # Guessing Room Server Library
//!
//! This library provides the authoritative server for the multiplayer
//! number-guessing game. Players gather in named rooms; each room runs a
//! sequence of timed rounds in which everyone races to guess a secret number.
//! The server owns every piece of game state and pushes events to clients
//! over websockets.
//!
//! ## Core Responsibilities
//!
//! ### Room Registry
//! Creates, lists and garbage-collects rooms. Each room sits behind its own
//! async mutex, so unrelated rooms never contend.
//!
//! ### Round State Machine
//! A room is `Pending` until its first player arrives, then cycles through
//! `Active` and `Resolved` rounds. A round resolves exactly once, either by a
//! correct guess or by its deadline timer; whichever comes second is a no-op.
//!
//! ### Scoring
//! A correct guess earns base points, a time bonus that shrinks towards the
//! deadline and a capped streak bonus for consecutive wins.
//!
//! ### Sessions and Reconnection
//! A closed socket does not remove a player. The seat, score and streak are
//! held for a grace period and handed back to a client that presents the
//! session token or rejoins under the same name.
//!
//! ## Module Organization
//!
//! ### Client Manager Module (`client_manager`)
//! Live transport connections, the connection cap and outbound queues.
//!
//! ### Session Module (`session`)
//! Which connection speaks for which seat, and when a seat's grace runs out.
//!
//! ### Registry, Room and Round Modules (`registry`, `room`, `round`)
//! Room bookkeeping, per-room game rules and the round state machine.
//! `hints` and `scoring` hold the pure rules used by rounds and rooms.
//!
//! ### Game Module (`game`)
//! `GameServer`, the request dispatcher the transport calls into. It also
//! owns round deadline timers and the periodic sweep.
//!
//! ### Network Module (`network`)
//! The websocket listener and the per-connection reader and writer loops.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::Config;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let server = Server::bind(&config).await?;
//!
//!     // Accepts websocket clients and runs the deadline dispatcher and the
//!     // sweeper in background tasks
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod config;
pub mod error;
pub mod game;
pub mod hints;
pub mod network;
pub mod registry;
pub mod room;
pub mod round;
pub mod scoring;
pub mod session;
