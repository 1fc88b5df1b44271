//! Inbound command model (spec §6): what a remote collaborator's telemetry
//! response body decodes into when it carries a command instead of plain
//! telemetry acknowledgement.

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteCommand {
    SendInfo,
    StartPrint,
    StopPrint,
    PausePrint,
    ResumePrint,
    ResetPrinter,
    ExecuteGcode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandEnvelope {
    pub command: RemoteCommand,
    pub command_id: u64,
    #[serde(default)]
    pub body: Option<Value>,
}
