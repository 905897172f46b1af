//! # Guessing Room Terminal Client
//!
//! A line-oriented client for the guessing room server. It reads commands
//! from stdin, sends them as JSON frames over a websocket and prints every
//! server event as text.
//!
//! ## Module Organization
//!
//! ### Input Module (`input`)
//! Parses `/commands` and chat lines into protocol requests.
//!
//! ### Display Module (`display`)
//! Renders server events, scoreboards and room snapshots for the terminal.
//!
//! ### Session Module (`session`)
//! Tracks the current room and session token and keeps the on-disk cache
//! (`cache`) in step, so a restarted client can take its seat back.
//!
//! ### Network Module (`network`)
//! The websocket connection and the main select loop over server frames and
//! stdin lines.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::Client;
//! use client::session::ClientSession;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = ClientSession::new("Alice", None);
//!     let mut client = Client::new("ws://127.0.0.1:5000", session, false);
//!     client.run().await
//! }
//! ```

pub mod cache;
pub mod display;
pub mod input;
pub mod network;
pub mod session;
