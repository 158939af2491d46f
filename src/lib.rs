//! Grid Map Dispatch Library
//!
//! This library crate defines the modules behind the `grid-dispatch` node binary (`main.rs`):
//! a component that reads map operations out of message headers and performs them
//! against a named map of an in-memory data grid.
//!
//! ## Architecture Modules
//!
//! - **`operation`**: Header names and the operation codes shared by every collection
//!   dispatcher, plus decoding of the operation header.
//! - **`exchange`**: The message carrier (inbound headers and body, outbound section)
//!   and header propagation.
//! - **`dispatch`**: The map dispatcher, its errors, the scoped key lock used by `UPDATE`
//!   and the public HTTP endpoint.
//! - **`storage`**: The map handle contract, the embedded partitioned grid, the SQL-like
//!   predicate language and the client for a remote grid node.
//! - **`config`**: Command-line flags of the node and dispatcher settings.

pub mod config;
pub mod dispatch;
pub mod exchange;
pub mod operation;
pub mod storage;
