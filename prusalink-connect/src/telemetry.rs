//! Telemetry model posted to `/p/telemetry` at `TELEMETRY_SEND_INTERVAL`.

use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize)]
pub struct Telemetry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_nozzle: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_bed: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<u64>,
}
