//! Bus backend selection

use crate::bus::EventBus;
use crate::error::{BusError, BusResult};
use crate::local::LocalBus;
use crate::remote::RemoteBus;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strum_macros::{Display, EnumString};

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum BusBackend {
    /// In-process fan-out
    #[default]
    Local,
    /// TCP relay shared between processes
    Tcp,
    /// No bus; opening one is an error
    Disabled,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default)]
    pub backend: BusBackend,
    /// Relay address for `tcp`, with or without a `tcp://` scheme
    #[serde(default)]
    pub url: Option<String>,
}

impl BusConfig {
    pub fn local() -> Self {
        Self::default()
    }

    pub fn tcp(url: impl Into<String>) -> Self {
        Self {
            backend: BusBackend::Tcp,
            url: Some(url.into()),
        }
    }
}

/// Open the configured bus
pub async fn open_bus(config: &BusConfig) -> BusResult<Arc<dyn EventBus>> {
    match config.backend {
        BusBackend::Local => {
            tracing::info!(backend = %config.backend, "Opening event bus");
            Ok(Arc::new(LocalBus::new()))
        }
        BusBackend::Tcp => {
            let url = config
                .url
                .as_deref()
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .ok_or_else(|| BusError::BackendUnavailable("tcp bus requires a url".into()))?;
            let addr = url.strip_prefix("tcp://").unwrap_or(url);

            tracing::info!(backend = %config.backend, relay = %addr, "Opening event bus");
            Ok(Arc::new(RemoteBus::connect(addr).await?))
        }
        BusBackend::Disabled => Err(BusError::BackendUnavailable("bus is disabled".into())),
    }
}
