//! Access grants: the lifecycle model and the store that holds them.

mod model;
mod store;

pub use model::{AccessGrant, GrantAction, GrantState, TransitionDetails};
pub use store::{ExpiryOutcome, GrantStore};
