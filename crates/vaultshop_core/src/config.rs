use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    pub api: ApiSettings,
    pub session: SessionSettings,
    pub checkout: CheckoutSettings,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ApiSettings {
    pub base_url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionSettings {
    /// Cadence of the silent token-renewal task
    pub renew_interval_secs: u64,
    /// Cadence of the background wallet refresh
    pub wallet_refresh_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CheckoutSettings {
    /// Fixed inter-request delay between order submissions
    pub throttle_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api: ApiSettings::default(),
            session: SessionSettings::default(),
            checkout: CheckoutSettings::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "https://nebula.starbreeze.com".to_string(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            renew_interval_secs: 60,
            wallet_refresh_secs: 60,
        }
    }
}

impl Default for CheckoutSettings {
    fn default() -> Self {
        Self { throttle_ms: 1500 }
    }
}
