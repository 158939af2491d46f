//! Map Dispatch Module
//!
//! The bridge between the message pipeline and the grid: exchanges in, one map
//! operation each, results back on the exchange.
//!
//! ## Architecture Overview
//! 1. **Decoding**: The operation header selects one entry of the shared operation
//!    enumeration; the map dispatcher narrows it to the operations maps support.
//! 2. **Execution**: Exactly one map operation per exchange. `UPDATE` holds a key lock
//!    across its replace and always releases it.
//! 3. **Results**: Lookups and queries write the outbound body; header propagation runs last.
//!
//! ## Submodules
//! - **`map`**: The `MapDispatcher` itself.
//! - **`lock`**: Scoped key-lock guard used by `UPDATE`.
//! - **`error`**: `DispatchError` and its causes.
//! - **`registry`**: One dispatcher per map name for the HTTP layer.
//! - **`protocol`** / **`handlers`**: The public HTTP endpoint.

pub mod error;
pub mod handlers;
pub mod lock;
pub mod map;
pub mod protocol;
pub mod registry;
