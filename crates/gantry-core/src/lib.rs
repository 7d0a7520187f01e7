//! # gantry-core
//!
//! Shared foundation types for the Gantry index maintenance engine.
//!
//! This crate holds the types that every other Gantry crate agrees on:
//!
//! - **Identifiers**: strongly-typed, ULID-backed ids ([`OperationId`]) and
//!   the [`InstanceIdentifier`] row identity of the study index
//! - **Watermarks**: the [`WatermarkRange`] closed interval over the index
//!   store's monotonic sequence number
//! - **Errors**: the shared [`Error`](error::Error) type and
//!   [`Result`](error::Result) alias
//!
//! It deliberately contains no I/O and no async: everything here is plain
//! data with validated constructors.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod id;
pub mod watermark;

pub use error::{Error, Result};
pub use id::{InstanceIdentifier, OperationId};
pub use watermark::WatermarkRange;
