//! viewguard: integrity engine for public content view counters.
//!
//! Decides, per "count a view" request, whether the increment is genuine,
//! defends the counter against replay, scripted abuse and bots, and keeps an
//! attempt log for offline abuse detection.

pub mod abuse;
pub mod audit;
pub mod bot;
pub mod cache;
pub mod clock;
pub mod config;
pub mod console;
pub mod content;
pub mod dedup;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod ratelimit;
pub mod server;
pub mod session;
pub mod state;
pub mod telemetry;
pub mod validator;
