//! HTTP handler modules.
//! Used by: server.

pub mod ops;
pub mod session;
pub mod views;
