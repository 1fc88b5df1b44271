//! Line dispatch and confirmation-tracked instruction queueing for talking
//! to a 3D printer over a serial or TCP link.
//!
//! [`dispatcher::Dispatcher`] owns the link and fans incoming lines out to
//! registered handlers; [`queue::SerialQueue`] is the disciplined writer
//! sitting on top of it, turning [`instruction::Instruction`]s into framed
//! G-code and resolving them to an [`instruction::InstructionOutcome`] once
//! confirmed, timed out, or abandoned to a dead link.

pub mod dispatcher;
pub mod error;
pub mod instruction;
pub mod pattern;
pub mod queue;

pub use dispatcher::Dispatcher;
pub use error::Error;
pub use instruction::{CapturedOutput, Instruction, InstructionOutcome};
pub use pattern::{ok_terminator, Captures, Pattern};
pub use queue::{InstructionHandle, SerialQueue};
