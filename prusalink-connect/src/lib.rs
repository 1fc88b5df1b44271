//! Outbound HTTP collaborator: posts printer events and telemetry upstream
//! and surfaces whatever remote commands come back in response. Ambient to
//! the core bridge, not part of its serial/state machinery, grounded on the
//! original `ConnectAPI`'s session-based HTTP client.

mod client;
mod command;
mod error;
mod event;
mod telemetry;

pub use client::{ConnectClient, ConnectConfig, TelemetryResponse};
pub use command::{CommandEnvelope, RemoteCommand};
pub use error::ConnectError;
pub use event::{Event, EventKind};
pub use telemetry::Telemetry;
