//! Message Exchange Module
//!
//! The per-message carrier passed from the host pipeline to a dispatcher.
//!
//! ## Core Concepts
//! - **Inbound**: headers plus body as received. Dispatchers only read it.
//! - **Outbound**: headers plus an optional body. A body of `None` means no stage wrote one.
//! - **Header values**: a small tagged set of shapes (integer, text, key set, raw JSON).
//! - **Propagation**: after a dispatch, a `HeaderPropagator` copies the agreed inbound
//!   headers onto the outbound section so downstream stages see the same metadata.

pub mod propagation;
pub mod types;
