use serde_json::Value;

const BODY_PREVIEW_CHARS: usize = 320;

/// Phrases the gateway uses when an instance session is gone.
const MISSING_MARKERS: [&str; 4] = [
    "does not exist",
    "not found",
    "not connected",
    "instance not",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network unreachable, DNS, TLS or timeout.
    Transport,
    /// The gateway says the instance does not exist or is not connected.
    InstanceMissing,
    /// Any other 4xx.
    Client,
    /// 5xx.
    Server,
    /// Reply could not be decoded.
    Decode,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Transport => "transport",
            ErrorKind::InstanceMissing => "instance_missing",
            ErrorKind::Client => "remote_4xx",
            ErrorKind::Server => "remote_5xx",
            ErrorKind::Decode => "decode",
        }
    }
}

#[derive(thiserror::Error, Debug, Clone)]
pub enum DirectoryError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("instance missing ({status}): {message}")]
    InstanceMissing { status: u16, message: String },
    #[error("remote client error ({status}): {message}")]
    Client { status: u16, message: String },
    #[error("remote server error ({status}): {message}")]
    Server { status: u16, message: String },
    #[error("decode error: {0}")]
    Decode(String),
}

impl DirectoryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DirectoryError::Transport(_) => ErrorKind::Transport,
            DirectoryError::InstanceMissing { .. } => ErrorKind::InstanceMissing,
            DirectoryError::Client { .. } => ErrorKind::Client,
            DirectoryError::Server { .. } => ErrorKind::Server,
            DirectoryError::Decode(_) => ErrorKind::Decode,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            DirectoryError::InstanceMissing { status, .. }
            | DirectoryError::Client { status, .. }
            | DirectoryError::Server { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The gateway answered, so the instance record itself is in a bad state.
    pub fn is_remote_reply(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InstanceMissing | ErrorKind::Client | ErrorKind::Server
        )
    }
}

impl From<reqwest::Error> for DirectoryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return DirectoryError::Decode(err.to_string());
        }
        if let Some(status) = err.status() {
            return classify_status(status.as_u16(), &err.to_string());
        }
        DirectoryError::Transport(err.to_string())
    }
}

/// Map a non-success HTTP reply to an error kind using its status and body.
pub fn classify_status(status: u16, body: &str) -> DirectoryError {
    let message = extract_message(body);
    let lowered = message.to_lowercase();
    match status {
        404 => DirectoryError::InstanceMissing { status, message },
        400..=499 if MISSING_MARKERS.iter().any(|m| lowered.contains(m)) => {
            DirectoryError::InstanceMissing { status, message }
        }
        400..=499 => DirectoryError::Client { status, message },
        500..=599 => DirectoryError::Server { status, message },
        _ => DirectoryError::Decode(format!("unexpected status {status}: {message}")),
    }
}

/// Pull a readable message out of a gateway error body. The gateway sends
/// `message` as either a string or an array of strings, sometimes nested under
/// `response`.
fn extract_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        let found = value
            .get("message")
            .and_then(message_text)
            .or_else(|| value.pointer("/response/message").and_then(message_text))
            .or_else(|| value.get("error").and_then(message_text));
        if let Some(msg) = found {
            return msg;
        }
    }
    preview(body)
}

fn message_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => {
            let joined = items
                .iter()
                .filter_map(|v| v.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            (!joined.is_empty()).then_some(joined)
        }
        _ => None,
    }
}

fn preview(body: &str) -> String {
    if body.chars().count() > BODY_PREVIEW_CHARS {
        let truncated: String = body.chars().take(BODY_PREVIEW_CHARS).collect();
        format!("{truncated}...")
    } else {
        body.to_string()
    }
}
