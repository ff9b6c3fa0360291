use std::path::PathBuf;

use config::{Config, Environment, File};
use directories::ProjectDirs;
use vaultshop_core::config::Settings;

/// Load settings from defaults, then the system config directory, then a
/// `config/` directory next to the binary, then `VAULTSHOP__*` environment
/// variables. Later sources win.
pub fn get_configuration_with_paths(
    current_dir_path: Option<PathBuf>,
    system_config_dir_path: Option<PathBuf>,
) -> Result<Settings, config::ConfigError> {
    let config_directory = current_dir_path.unwrap_or_else(|| {
        std::env::current_dir()
            .map(|p| p.join("config"))
            .unwrap_or_else(|_| PathBuf::from("config"))
    });

    let system_config_dir = if let Some(path) = system_config_dir_path {
        path
    } else {
        ProjectDirs::from("com", "vaultshop", "vaultshop")
            .map(|d| d.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("config"))
    };

    let settings = Config::builder()
        .set_default("api.base_url", "https://nebula.starbreeze.com")?
        .set_default("session.renew_interval_secs", 60)?
        .set_default("session.wallet_refresh_secs", 60)?
        .set_default("checkout.throttle_ms", 1500)?
        .set_default("log_level", "info")?
        .add_source(File::from(system_config_dir.join("config.toml")).required(false))
        .add_source(File::from(config_directory.join("config.toml")).required(false))
        .add_source(Environment::with_prefix("VAULTSHOP").separator("__"))
        .build()?;

    settings.try_deserialize::<Settings>()
}

pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    get_configuration_with_paths(None, None)
}
