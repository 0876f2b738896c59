//! # spiralwire
//!
//! Async Rust client for the Wizard101 ("W101") binary game protocol.
//!
//! The core is a framed, session-oriented TCP transport: [`Client::dial`]
//! negotiates a session with the server, exchanges length-delimited binary
//! frames, dispatches typed DML messages to the handlers registered on a
//! [`MessageRouter`], and keeps the session alive with periodic keep-alives.
//!
//! Around the transport sit the subsystems the protocol depends on:
//!
//! - [`proto`] - the wire codecs (outer frame envelope, session control
//!   records, DML message envelope)
//! - [`login`] - session-key derivation and the Twofish-OFB auth token
//!   cipher used during authentication
//! - [`table`] - decoder for the game's binary table files
//! - [`archive`] - reader for `KIWAD` content archives
//!
//! ## Example
//!
//! ```ignore
//! use spiralwire::{Client, RouterBuilder};
//!
//! #[tokio::main]
//! async fn main() -> spiralwire::Result<()> {
//!     let router = RouterBuilder::new()
//!         .handle(5, 2, |msg: ChatMessage| {
//!             println!("{}", msg.text);
//!             Ok(())
//!         })
//!         .build();
//!
//!     let client = Client::dial("login.example.net:12000", router).await?;
//!     client.send(5, 1, &JoinChannel { channel: 4 }).await?;
//!     client.close().await;
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod error;
pub mod login;
pub mod proto;
pub mod router;
pub mod table;

mod client;

pub use client::{Client, ClientConfig, Session};
pub use error::{Result, SpiralError};
pub use router::{MessageRouter, RouterBuilder};
