use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Gateway-level status flag reported by the instance listing.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionStatus {
    Online,
    Offline,
    #[default]
    #[serde(other)]
    Unknown,
}

impl ConnectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionStatus::Online => "ONLINE",
            ConnectionStatus::Offline => "OFFLINE",
            ConnectionStatus::Unknown => "UNKNOWN",
        }
    }

    pub fn is_online(self) -> bool {
        matches!(self, ConnectionStatus::Online)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceAuth {
    #[serde(default)]
    pub token: Option<String>,
}

/// One entry of `GET /instance/fetchInstances`. Fetched fresh on every pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceSummary {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
    #[serde(rename = "connectionStatus", default)]
    pub connection_status: ConnectionStatus,
    #[serde(rename = "Auth", default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<InstanceAuth>,
}

impl InstanceSummary {
    pub fn token(&self) -> Option<&str> {
        self.auth
            .as_ref()
            .and_then(|a| a.token.as_deref())
            .filter(|t| !t.trim().is_empty())
    }

    pub fn is_online(&self) -> bool {
        self.connection_status.is_online()
    }
}

/// Underlying protocol connection state ("Bailey status").
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    Open,
    #[serde(rename = "close")]
    Closed,
    Absent,
}

impl Liveness {
    /// `close` (any case) is closed, empty or missing is absent, anything else
    /// counts as open.
    pub fn from_raw(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("") => Liveness::Absent,
            Some(s) if s.eq_ignore_ascii_case("close") => Liveness::Closed,
            Some(_) => Liveness::Open,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WhatsappInfo {
    #[serde(rename = "connectionState", default)]
    pub connection_state: Option<Value>,
}

/// Payload of `GET /instance/fetchInstance/{name}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InstanceDetail {
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "connectionStatus", default)]
    pub connection_status: Option<ConnectionStatus>,
    #[serde(rename = "Whatsapp", default)]
    pub whatsapp: Option<WhatsappInfo>,
}

impl InstanceDetail {
    /// Raw connection state label. Accepts either `"open"` or `{"state": "open"}`.
    pub fn connection_state(&self) -> Option<String> {
        let value = self.whatsapp.as_ref()?.connection_state.as_ref()?;
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Object(map) => map
                .get("state")
                .and_then(|v| v.as_str())
                .map(ToString::to_string),
            _ => None,
        }
    }

    pub fn liveness(&self) -> Liveness {
        Liveness::from_raw(self.connection_state().as_deref())
    }

    pub fn with_state(state: Option<&str>) -> Self {
        Self {
            whatsapp: Some(WhatsappInfo {
                connection_state: state.map(|s| Value::String(s.to_string())),
            }),
            ..Self::default()
        }
    }
}

/// Payload of `GET /instance/connect/{name}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(rename = "pairingCode", default, skip_serializing_if = "Option::is_none")]
    pub pairing_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
}

impl ConnectResult {
    /// A QR code or pairing code in the reply means the session cannot resume
    /// without a phone scan.
    pub fn requires_pairing(&self) -> bool {
        [&self.base64, &self.code, &self.pairing_code]
            .into_iter()
            .any(|v| v.as_deref().is_some_and(|s| !s.trim().is_empty()))
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}

fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}
