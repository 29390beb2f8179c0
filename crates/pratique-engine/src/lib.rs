//! Live voice session engine and backend runtime.
//!
//! The engine runs a real-time spoken conversation with a remote AI partner:
//! it streams microphone frames over a [`transport::Transport`], plays the
//! synthesized speech back through a [`jitter::JitterBuffer`], reconnects on
//! drops, nudges the partner after long silences, counts credits down and
//! evaluates the finished conversation. The [`session::LiveSession`] actor
//! owns all of that state.
//!
//! The crate also owns the backend lifecycle, routes bridge messages to
//! services, and manages shared state used by asynchronous tasks.

mod app;
pub mod config;
pub mod credit;
pub mod evaluator;
pub mod idle;
pub mod jitter;
pub mod reconnect;
mod runtime;
mod services;
pub mod session;
mod state;
pub mod store;
pub mod transport;

pub use crate::runtime::run;
