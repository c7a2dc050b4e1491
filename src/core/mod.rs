//! Core modules shared by every exocortex collection.
//!
//! Configuration, the error taxonomy, the filesystem seam, and the mutation
//! audit log live here.

pub mod broker;
pub mod config;
pub mod error;
pub mod fsops;
pub mod output;
pub mod store;
pub mod time;
