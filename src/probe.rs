use serde_json::Value;

use crate::cookies::CookieBridge;
use crate::error::BridgeError;

pub const PING_PATH: &str = "/api/ping";
pub const CONNECTION_OK_MESSAGE: &str = "Connection successful, cookies are synced.";

/// Validates that the configured Harvest instance is reachable and that
/// cookie bridging works end to end.
#[derive(Clone)]
pub struct ConnectionProbe {
    bridge: CookieBridge,
}

impl ConnectionProbe {
    pub fn new(bridge: CookieBridge) -> Self {
        Self { bridge }
    }

    pub fn bridge(&self) -> &CookieBridge {
        &self.bridge
    }

    /// Liveness check. Any non-2xx answer or transport failure is reported as
    /// `RemoteUnreachable`; a missing configuration is passed through as is.
    pub async fn ping(&self) -> Result<(), BridgeError> {
        match self.bridge.client().get::<Value>(PING_PATH).await {
            Ok(_) => Ok(()),
            Err(BridgeError::ConfigurationMissing) => Err(BridgeError::ConfigurationMissing),
            Err(err) => {
                log::warn!("[Connection] Ping failed: {}", err);
                Err(BridgeError::RemoteUnreachable {
                    status: err.status(),
                    detail: err.detail(),
                })
            }
        }
    }

    pub async fn test_connection(&self) -> Result<&'static str, BridgeError> {
        self.ping().await?;

        if let Err(err) = self.bridge.synchronize(true).await {
            log::warn!("[Connection] Harvest reachable but cookie sync failed: {}", err);
            return Err(BridgeError::ConnectedButSyncFailed {
                cause: Box::new(err),
            });
        }

        log::info!("[Connection] {}", CONNECTION_OK_MESSAGE);
        Ok(CONNECTION_OK_MESSAGE)
    }
}
