//! Service record model shared by the navigator daemon and its clients.
//!
//! [`reconcile`] holds the merge rules between discovery and manual edits;
//! the other modules are the record types and the small helpers they rely on.

pub mod error;
pub mod fields;
pub mod identity;
pub mod naming;
pub mod protocol;
pub mod query;
pub mod reconcile;
pub mod types;
