//! Endpoint handlers, grouped by resource.

pub mod accounts;
pub mod catalog;
pub mod characters;
pub mod inventory;
