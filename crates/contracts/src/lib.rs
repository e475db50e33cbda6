//! # Contracts
//!
//! Frozen interface contracts, defining inter-module data structures and traits.
//! All business crates can only depend on this crate, reverse dependencies are prohibited.
//!
//! ## Time Model
//! - Records carry the wall-clock time they were accepted by a source
//! - Rows derived from one record share that time, in whole seconds

mod blueprint;
mod error;
mod payload;
mod record;
mod route;
mod sink;

pub use blueprint::*;
pub use error::*;
pub use payload::{FieldAccess, JsonPayload};
pub use record::Record;
pub use route::*;
pub use sink::*;
