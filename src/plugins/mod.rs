//! Record-level functionality built on the core.

pub mod recipes;
pub mod records;
