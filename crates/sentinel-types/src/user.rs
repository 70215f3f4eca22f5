use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserStatus {
    Online,
    Offline,
}

impl UserStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            UserStatus::Online => "ONLINE",
            UserStatus::Offline => "OFFLINE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "ONLINE" => Some(UserStatus::Online),
            "OFFLINE" => Some(UserStatus::Offline),
            _ => None,
        }
    }
}

/// Persisted user row. Only `status` is written by reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobile_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_name: Option<String>,
    pub status: UserStatus,
    pub updated_at: DateTime<Utc>,
}

/// How an HTTP caller identifies a user: by gateway instance id or by phone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserLookup {
    InstanceId(String),
    MobileNumber(String),
}

impl UserLookup {
    /// `instance_id` wins when both are supplied; blank values are ignored.
    pub fn from_parts(instance_id: Option<&str>, mobile_number: Option<&str>) -> Option<Self> {
        let clean = |v: Option<&str>| {
            v.map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
        };
        if let Some(id) = clean(instance_id) {
            return Some(UserLookup::InstanceId(id));
        }
        clean(mobile_number).map(UserLookup::MobileNumber)
    }

    pub fn describe(&self) -> String {
        match self {
            UserLookup::InstanceId(id) => format!("instance_id={id}"),
            UserLookup::MobileNumber(n) => format!("mobile_number={n}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_prefers_instance_id_and_skips_blanks() {
        assert_eq!(
            UserLookup::from_parts(Some("i-1"), Some("555")),
            Some(UserLookup::InstanceId("i-1".to_string()))
        );
        assert_eq!(
            UserLookup::from_parts(Some("  "), Some(" 555 ")),
            Some(UserLookup::MobileNumber("555".to_string()))
        );
        assert_eq!(UserLookup::from_parts(None, Some("")), None);
    }

    #[test]
    fn status_parse_is_case_insensitive() {
        assert_eq!(UserStatus::parse("offline"), Some(UserStatus::Offline));
        assert_eq!(UserStatus::parse("busy"), None);
    }
}
