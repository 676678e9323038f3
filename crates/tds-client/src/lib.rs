//! # tds-client
//!
//! Synchronous client sessions for Sybase and Microsoft SQL Server over the
//! Tabular Data Stream protocol, versions 4.2, 5.0, 7.0 and 8.0.
//!
//! ## Example
//!
//! ```rust,no_run
//! use tds_client::{Config, Session};
//! use tds_protocol::TdsVersion;
//!
//! # fn main() -> Result<(), tds_client::Error> {
//! let config = Config::new()
//!     .host("localhost")
//!     .sql_login("sa", "")
//!     .database("master")
//!     .tds_version(TdsVersion::V7_0);
//!
//! let mut session = Session::connect(config)?;
//! for set in session.query("select name from sysobjects")? {
//!     for row in &set.rows {
//!         let name: String = row.get(0)?;
//!         println!("{name}");
//!     }
//! }
//! session.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Error handling
//!
//! [`Error::is_fatal`] tells whether a session must be discarded. Server
//! errors ([`Error::Server`]) leave the session usable.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod dispatch;
pub mod error;
mod login;
pub mod params;
pub mod row;
pub mod session;
pub mod state;

pub use config::{Config, ConfigKey};
pub use dispatch::{DispatchContext, ReturnValue, Token, read_token};
pub use error::{Error, Result};
pub use params::{OutputValues, Parameter};
pub use row::{Columns, ResultSet, Row};
pub use session::{MessageHandler, Session};
pub use state::SessionState;

// Re-export the types callers need alongside a session
pub use tds_protocol::{ColumnInfo, Done, ServerMessage, TdsVersion, TypeInfo};
pub use tds_types::{FromSql, Numeric, SqlValue, ToSql};
