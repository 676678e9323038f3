//! # tds-testing
//!
//! Test infrastructure for TDS client development.
//!
//! This crate provides a scripted server side of the protocol so sessions
//! and pools can be exercised without a database.
//!
//! ## Features
//!
//! - Mock TDS server on a loopback TCP port, one thread per connection
//! - In-memory [`MockStream`] for single-threaded session tests
//! - [`TokenBuilder`] for hand-built server responses
//! - [`PacketRecorder`] logging every request the mock received
//!
//! ## Mock Server Example
//!
//! ```rust,no_run
//! use tds_testing::fixtures::int_column;
//! use tds_testing::{MockResponse, MockTdsServer};
//! use tds_types::SqlValue;
//!
//! let server = MockTdsServer::builder()
//!     .with_response(
//!         "select id from users",
//!         MockResponse::rows(vec![int_column("id")], vec![vec![SqlValue::Int(1)]]),
//!     )
//!     .build()
//!     .unwrap();
//!
//! // Connect your client to server.addr()
//! let addr = server.addr();
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod fixtures;
pub mod mock_server;
pub mod peer;
pub mod stream;

pub use error::{MockServerError, Result};
pub use fixtures::TokenBuilder;
pub use mock_server::{MockServerBuilder, MockTdsServer};
pub use peer::{MockOutput, MockResponse, MockServerConfig, PacketRecorder, RecordedMessage};
pub use stream::{DisconnectHandle, MockStream};
