//! Core types and trait definitions for the Stemma genealogy store.
//!
//! This crate is deliberately free of database and codec dependencies.
//! All other crates depend on it; it depends on nothing proprietary.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod change;
pub mod chunk;
pub mod error;
pub mod index;
pub mod record;
pub mod store;
pub mod tree;

pub use error::{Conflict, Error, Result};
