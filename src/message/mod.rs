//! This module exports a minimal message-passing API, which is encapsulated
//! by a `Communicator` trait. Implementors only need to write `send` and
//! `recv` operations for a given transport layer (a pure-Rust TCP transport
//! and an in-process channel mesh are included). The trait then provides
//! tagged point-to-point exchange plus broadcast, reduce, and reduce-all
//! operations.
//!

pub mod comm;
pub mod mesh;
pub mod tcp;
