//! Integration test suite for the coinctl engine.
//!
//! Tests drive the public engine API against in-memory and file-backed
//! collaborators: refresh and reorg lifecycles, refresh coalescing and
//! cancellation, mutation ordering, and property checks over random sets.

pub mod helpers;
