//! Storage layer for the moderation engine.
//!
//! [`Store`] is the contract the engine is written against; [`DbClient`]
//! implements it on PostgreSQL and [`MemoryStore`] keeps everything in
//! process memory.

pub mod client;
pub mod memory;
mod record;
pub mod store;

pub use client::DbClient;
pub use memory::MemoryStore;
pub use store::{BatchOp, Store, StoreError, StoreEvent, Subscription, Target, WriteBatch};
