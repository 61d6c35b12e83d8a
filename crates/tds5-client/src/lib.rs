//! # tds5-client
//!
//! Connection core for a TDS 5.0 client talking to Sybase-family database
//! servers: a socket, a packet reassembler, a token-stream consumer, a
//! result assembler, and the small state machine that ties them together.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use tds5_client::{ConnectOptions, Connection};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let opts = ConnectOptions::new()
//!         .host("sybase.internal")
//!         .user("sa")
//!         .password("secret")
//!         .database("accounting");
//!
//!     let mut conn = Connection::connect(opts, Duration::from_secs(10)).await?;
//!     let results = conn.sql_query("select * from ledger", Duration::from_secs(30)).await?;
//!     println!("{results:?}");
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

mod assemble;
pub mod config;
mod connection;
mod consume;
mod env;
pub mod error;
mod prepared;
mod reassemble;

pub use assemble::OpResult;
pub use config::ConnectOptions;
pub use connection::{Connection, ConnectionState};
pub use env::Environment;
pub use error::{Error, Result};

pub use tds5_protocol::{Capability, CapabilityMask, ServerIdentity, TdsVersion, Value};
