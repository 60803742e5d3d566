//! Small synchronization toolkit shared across the workspace.
//!
//! Two primitives live here:
//!
//! - [`Event`], a level-triggered boolean flag that tasks can wait on and
//!   that can be cleared and waited on again;
//! - [`Mutexed`] / [`RwMutexed`], values owned behind a lock with
//!   closure-based access and atomic swap.

mod event;
mod mutexed;

pub use event::Event;
pub use mutexed::{Mutexed, RwMutexed};
