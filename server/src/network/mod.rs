//! HTTP API.

mod api;
mod error;
mod handlers;
mod response;
mod server;

#[cfg(test)]
mod tests;

pub use api::AppState;
pub use server::serve;
