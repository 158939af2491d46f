//! Operation Definitions
//!
//! The header names and operation codes shared by every dispatcher in the crate.
//!
//! ## Overview
//! Exchanges select what a dispatcher does through a small set of well-known headers.
//! The operation header carries an integer code (or a symbolic name) drawn from one
//! process-wide enumeration. Dispatchers for different collection types share that
//! enumeration and decide which subset they support.
//!
//! ## Submodules
//! - **`types`**: The `Operation` enumeration and the header name constants.
//! - **`decode`**: The helper that turns the operation header into an `Operation`.

pub mod decode;
pub mod types;
