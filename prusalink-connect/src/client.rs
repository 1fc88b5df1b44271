//! The outbound HTTP collaborator (spec §6), grounded on the original
//! `ConnectAPI`'s `requests.Session`-based client: a persistent client
//! carrying a `Printer-Token` header, posting events and telemetry to a
//! fixed base URL.

use reqwest::header::{HeaderMap, HeaderValue};

use crate::{command::CommandEnvelope, error::ConnectError, event::Event, telemetry::Telemetry};

/// Address, credentials, and transport for the upstream collaborator
/// (spec §6 "Configuration consumed").
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    pub address: String,
    pub port: u16,
    pub token: String,
    pub tls: bool,
}

impl ConnectConfig {
    fn base_url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.address, self.port)
    }
}

/// What a telemetry POST's response carries back: nothing, a remote
/// command, or a raw gcode line to run directly (the original's
/// `text/x.gcode` content-type special case).
#[derive(Debug, Clone)]
pub enum TelemetryResponse {
    None,
    Command(CommandEnvelope),
    Gcode(String),
}

pub struct ConnectClient {
    http: reqwest::Client,
    base_url: String,
}

impl ConnectClient {
    pub fn new(config: &ConnectConfig) -> Result<Self, ConnectError> {
        let mut headers = HeaderMap::new();
        let mut token = HeaderValue::from_str(&config.token).map_err(|_| ConnectError::UpstreamRejected {
            status: reqwest::StatusCode::BAD_REQUEST,
        })?;
        token.set_sensitive(true);
        headers.insert("Printer-Token", token);

        let http = reqwest::Client::builder().default_headers(headers).build()?;
        Ok(Self { http, base_url: config.base_url() })
    }

    /// Post one event to `/p/events`. Errors are logged and swallowed, as
    /// telemetry-adjacent traffic is too frequent to propagate per call.
    pub async fn emit_event(&self, event: Event) {
        let url = format!("{}/p/events", self.base_url);
        if let Err(err) = self.http.post(url).json(&event).send().await {
            tracing::debug!("failed sending event to connect: {err}");
        }
    }

    /// Post current telemetry to `/p/telemetry`, returning whatever
    /// follow-up instruction (if any) the response carried.
    pub async fn send_telemetry(&self, telemetry: &Telemetry) -> Result<TelemetryResponse, ConnectError> {
        let url = format!("{}/p/telemetry", self.base_url);
        let response = self.http.post(url).json(telemetry).send().await?;

        if response.status().as_u16() >= 300 {
            tracing::warn!("connect responded with code {}", response.status());
            return Ok(TelemetryResponse::None);
        }

        let is_gcode = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value == "text/x.gcode")
            .unwrap_or(false);

        if is_gcode {
            return Ok(TelemetryResponse::Gcode(response.text().await?));
        }

        match response.json::<CommandEnvelope>().await {
            Ok(command) => Ok(TelemetryResponse::Command(command)),
            Err(_) => Ok(TelemetryResponse::None),
        }
    }
}
