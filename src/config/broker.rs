//! Broker Configuration
//!
//! Where the broker lives and how the bridge identifies itself to it.

use serde::Deserialize;
use std::time::Duration;

use crate::bridge::{BridgeOptions, DEFAULT_PRODUCER_NAME, DEFAULT_SUBSCRIPTION_NAME};

/// Broker connection configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker service URL (`pulsar://host:6650`, `pulsar+ssl://...`, `memory://`)
    pub service_url: String,

    /// How long to wait for a reply (e.g., "60s", "500ms")
    /// Default: 60s
    #[serde(default = "default_reply_timeout", with = "humantime_serde")]
    pub reply_timeout: Duration,

    /// Shared subscription name used on read topics
    pub subscription_name: String,

    /// Consumer name reported to the broker
    pub consumer_name: String,

    /// Producer name used when waiting for a reply
    pub producer_name: String,
}

fn default_service_url() -> String {
    "pulsar://localhost:6650".to_string()
}

fn default_reply_timeout() -> Duration {
    Duration::from_secs(60)
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            service_url: default_service_url(),
            reply_timeout: default_reply_timeout(),
            subscription_name: DEFAULT_SUBSCRIPTION_NAME.to_string(),
            consumer_name: DEFAULT_SUBSCRIPTION_NAME.to_string(),
            producer_name: DEFAULT_PRODUCER_NAME.to_string(),
        }
    }
}

impl BrokerConfig {
    /// Bridge settings derived from this configuration
    pub fn bridge_options(&self) -> BridgeOptions {
        BridgeOptions {
            reply_timeout: self.reply_timeout,
            subscription_name: self.subscription_name.clone(),
            consumer_name: self.consumer_name.clone(),
            producer_name: self.producer_name.clone(),
        }
    }
}
