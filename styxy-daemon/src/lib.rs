//! Library surface of the styxy daemon.
//!
//! The binary (`styxyd`) is a thin wrapper; everything it wires together
//! is exposed here so integration tests can run the full HTTP surface
//! against an in-process server.

pub mod auth;
pub mod cli;
pub mod handlers;
pub mod server;

pub use cli::Cli;
pub use server::{build_router, AppState};
