//! Command Handlers (Component D): each drives one high-level remote intent
//! through the serial queue and state manager using a uniform "try until
//! state" shape.

mod command;
mod handler;
mod info;

pub use command::{CommandKind, CommandOutcome, CommandRequest};
pub use handler::handle;
pub use info::{register_info_observer, InfoCache};
