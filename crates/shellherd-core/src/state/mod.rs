//! Session state
//!
//! Folds the raw lifecycle signals published on the event bus into one
//! canonical [`SessionRecord`] per session id.

/// Pure event reducer.
pub mod reducer;
/// Shared store bridging the event bus to the reducer.
pub mod store;

pub use reducer::{OutputChunk, SessionRecord, SessionStateReducer};
pub use store::SessionStore;
