//! Shared types for Threadline: conversation records, stream events,
//! the tool contract, configuration, errors and trace events.

pub mod config;
pub mod error;
pub mod message;
pub mod page;
pub mod query;
pub mod session;
pub mod stream;
pub mod summary;
pub mod tool;
pub mod trace;

pub use error::{Error, Result};
