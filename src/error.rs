use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Please configure both URL and token.")]
    ConfigurationMissing,
    #[error("{}", unreachable_message(.status, .detail))]
    RemoteUnreachable {
        status: Option<u16>,
        detail: Option<String>,
    },
    #[error("Harvest returned status {status}: {body}")]
    RemoteRequestFailed { status: u16, body: String },
    #[error("Connection successful, but unable to sync cookies: {cause}")]
    ConnectedButSyncFailed { cause: Box<BridgeError> },
    #[error("Failed getting Harvest torrent statuses: {detail}")]
    StatusQueryFailed { detail: String },
    #[error("background router is not running")]
    RouterUnavailable,
    #[error("request to Harvest timed out")]
    Timeout,
    #[error("http error: {0}")]
    Transport(reqwest::Error),
    #[error("cookie store error: {0}")]
    CookieStore(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BridgeError::Timeout
        } else {
            BridgeError::Transport(err)
        }
    }
}

impl BridgeError {
    /// HTTP status carried by the failure, if the remote answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            BridgeError::RemoteRequestFailed { status, .. } => Some(*status),
            BridgeError::RemoteUnreachable { status, .. } => *status,
            BridgeError::ConnectedButSyncFailed { cause } => cause.status(),
            _ => None,
        }
    }

    /// Best-effort extraction of the server-provided `detail` string.
    ///
    /// The body is not guaranteed to be JSON; anything unparseable yields `None`.
    pub fn detail(&self) -> Option<String> {
        match self {
            BridgeError::RemoteRequestFailed { body, .. } => detail_from_body(body),
            BridgeError::RemoteUnreachable { detail, .. } => detail.clone(),
            BridgeError::ConnectedButSyncFailed { cause } => cause.detail(),
            BridgeError::StatusQueryFailed { detail } => Some(detail.clone()),
            _ => None,
        }
    }
}

pub fn detail_from_body(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    match value.get("detail")? {
        serde_json::Value::String(detail) if !detail.is_empty() => Some(detail.clone()),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn unreachable_message(status: &Option<u16>, detail: &Option<String>) -> String {
    let mut message = match status {
        Some(status) => format!("Error connecting to Harvest, server returned {}.", status),
        None => "Error connecting to Harvest, server could not be reached.".to_string(),
    };
    if let Some(detail) = detail {
        message.push_str(&format!(" Error: {}", detail));
    }
    message
}
