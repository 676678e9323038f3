//! # tds-types
//!
//! Typed values of the Tabular Data Stream protocol.
//!
//! Every column, return value and output parameter decodes to one variant of
//! the closed [`SqlValue`] sum type. Decoding reads through the
//! [`tds_protocol::TdsRead`] trait, so the same code runs over the packet
//! transport and over in-memory buffers.
//!
//! ## Features
//!
//! - `decimal` (default): conversions between [`Numeric`] and
//!   `rust_decimal::Decimal`
//!
//! ## Type Mappings
//!
//! | Wire type | `SqlValue` | Rust type |
//! |-----------|------------|-----------|
//! | `bit`, `bitn` | `Bool` | `bool` |
//! | `tinyint` .. `bigint`, `intn` | `Int` | `i16`, `i32`, `i64` |
//! | `real`, `float`, `floatn` | `Float` | `f32`, `f64` |
//! | `money`, `smallmoney`, `decimal`, `numeric` | `Decimal` | [`Numeric`], `rust_decimal::Decimal` |
//! | `datetime`, `smalldatetime`, `datetimen` | `DateTime` | `chrono::NaiveDateTime` |
//! | `char`, `varchar`, `text`, `nchar`, `nvarchar`, `ntext` | `String` | `String` |
//! | `binary`, `varbinary`, `image` | `Binary` | `Vec<u8>`, `Bytes` |
//! | `uniqueidentifier` | `Guid` | `uuid::Uuid` |

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod datetime;
pub mod decode;
pub mod encode;
pub mod error;
pub mod from_sql;
pub mod numeric;
pub mod to_sql;
pub mod value;

pub use decode::decode_value;
pub use encode::{encode_param_value, encode_row_value, type_info_for};
pub use error::TypeError;
pub use from_sql::FromSql;
pub use numeric::Numeric;
pub use to_sql::ToSql;
pub use value::SqlValue;
