use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay: Option<bool>,
}

impl SuccessResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            relay: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TempQuery {
    pub v: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct CooldownQuery {
    #[serde(default)]
    pub secs: u64,
}

/// `{"state": true}` or `{"state": "on"}`.
#[derive(Debug, Deserialize)]
pub struct RelayBody {
    pub state: Value,
}

impl RelayBody {
    pub fn is_on(&self) -> bool {
        match &self.state {
            Value::Bool(on) => *on,
            Value::String(s) => s.eq_ignore_ascii_case("on"),
            _ => false,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub device_id: String,
}
