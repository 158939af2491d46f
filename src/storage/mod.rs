//! Grid Storage Module
//!
//! The map side of the dispatcher: the handle contract, an embedded partitioned store
//! implementing it, and a client for maps hosted by another node.
//!
//! ## Core Concepts
//! - **Handles**: `MapHandle` is everything a dispatcher may ask of a named map. `MapProvider`
//!   hands out handles by name.
//! - **Partitioning**: The embedded store shards keys into fixed local partitions by hashing.
//! - **Key locks**: Locks belong to the handle that took them. Writes through other handles
//!   wait until the key is released.
//! - **Predicates**: Values can be filtered server-side with an SQL-like expression.
//! - **Remote access**: `RemoteGrid` speaks the internal map protocol to a grid node.

pub mod handle;
pub mod handlers;
pub mod memory;
pub mod partitioner;
pub mod predicate;
pub mod protocol;
pub mod remote;

#[cfg(test)]
mod tests;
