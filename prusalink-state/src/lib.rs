//! Layered printer state tracking (Component C): the manager holds a `base`,
//! an optional `printing`, and an optional `override` slot, composes them by
//! precedence into one externally-visible state, and attributes every
//! transition to whoever most likely caused it.

mod expectation;
mod manager;
mod observers;
mod poller;
mod state;

pub use expectation::{CommandId, Expectation};
pub use manager::{StateChanged, StateManager};
pub use observers::register_observers;
pub use poller::Poller;
pub use state::{BaseState, OverrideState, PrintingState, Source, State};
