//! Viewguard: an authorization gateway for a natural-language query engine.
//!
//! The engine answers questions from named data views and accepts a hint of
//! which views a caller may use, but does not enforce it. Viewguard inspects
//! the engine's own report of the views it consulted and decides per role
//! whether to deliver, disclaim, or deny the answer.
//!
//! See `DESIGN.md` for the module map.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod config;
pub mod credentials;
pub mod disclosure;
pub mod engine;
pub mod gateway;
pub mod logging;
pub mod policy;
pub mod server;
pub mod validator;
