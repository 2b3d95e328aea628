use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::reader_logic::engine::EngineConfig;
use crate::reader_logic::monitor::MonitorConfig;

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "RFID portal gateway", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "PORTAL_PORT", help = "Port for the WebSocket feed and control API.")]
    pub port: Option<u16>,

    #[clap(long, env = "PORTAL_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "PORTAL_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "PORTAL_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "PORTAL_READER_ADDR", help = "Network address of the RFID reader.")]
    pub reader_addr: Option<String>,

    #[clap(long, env = "PORTAL_PRODUCT_API_URL", help = "Base URL of the plant data API.")]
    pub product_api_url: Option<String>,

    #[clap(long, env = "PORTAL_RSSI_THRESHOLD_DBM", help = "Minimum peak RSSI (dBm) for a read to count.")]
    pub rssi_threshold_dbm: Option<f64>,

    #[clap(long, env = "PORTAL_COOLDOWN_SECONDS", help = "Cooldown between accepted reads of the same tag.")]
    pub cooldown_seconds: Option<u64>,

    #[clap(long, env = "PORTAL_CORRELATION_WINDOW_SECONDS", help = "How long a pallet waits for an operator badge.")]
    pub correlation_window_seconds: Option<u64>,

    #[clap(long, env = "PORTAL_SWEEP_INTERVAL_SECONDS", help = "Expiry sweep period.")]
    pub sweep_interval_seconds: Option<u64>,

    #[clap(long, env = "PORTAL_KEEP_ALIVE_SECONDS", help = "Keep-alive broadcast period.")]
    pub keep_alive_seconds: Option<u64>,

    #[clap(long, env = "PORTAL_CLEANUP_SECONDS", help = "Dedup cache purge period.")]
    pub cleanup_seconds: Option<u64>,

    #[clap(long, env = "PORTAL_RECONNECT_BACKOFF_SECONDS", help = "Fixed delay between reconnection attempts.")]
    pub reconnect_backoff_seconds: Option<u64>,

    #[clap(long, env = "PORTAL_MAX_RECONNECT_ATTEMPTS", help = "Reconnection attempts before giving up.")]
    pub max_reconnect_attempts: Option<u32>,

    #[clap(long, env = "PORTAL_MONITOR_POLL_SECONDS", help = "Connectivity monitor poll period.")]
    pub monitor_poll_seconds: Option<u64>,

    #[clap(long, env = "PORTAL_ALERT_RATE_LIMIT_SECONDS", help = "Minimum spacing between disconnect alert mails.")]
    pub alert_rate_limit_seconds: Option<u64>,

    #[clap(long, env = "PORTAL_HTTP_TIMEOUT_SECONDS", help = "Per-call timeout against the plant data API.")]
    pub http_timeout_seconds: Option<u64>,

    #[clap(long, env = "PORTAL_MAIL_API_URL", help = "Mail API endpoint for alert delivery.")]
    pub mail_api_url: Option<String>,

    #[clap(long, env = "PORTAL_MAIL_API_KEY", help = "Mail API key; alerts are disabled when unset.")]
    pub mail_api_key: Option<String>,

    #[clap(long, env = "PORTAL_ALERT_FROM", help = "Sender address for alert mails.")]
    pub alert_from: Option<String>,

    #[clap(long, env = "PORTAL_ALERT_TO", help = "Recipient address for alert mails.")]
    pub alert_to: Option<String>,

    #[clap(long, env = "PORTAL_SIMULATE", help = "Feed synthetic tag traffic through the simulated driver.")]
    #[serde(default)]
    pub simulate: bool,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            reader_addr: other.reader_addr.or(self.reader_addr),
            product_api_url: other.product_api_url.or(self.product_api_url),
            rssi_threshold_dbm: other.rssi_threshold_dbm.or(self.rssi_threshold_dbm),
            cooldown_seconds: other.cooldown_seconds.or(self.cooldown_seconds),
            correlation_window_seconds: other
                .correlation_window_seconds
                .or(self.correlation_window_seconds),
            sweep_interval_seconds: other.sweep_interval_seconds.or(self.sweep_interval_seconds),
            keep_alive_seconds: other.keep_alive_seconds.or(self.keep_alive_seconds),
            cleanup_seconds: other.cleanup_seconds.or(self.cleanup_seconds),
            reconnect_backoff_seconds: other
                .reconnect_backoff_seconds
                .or(self.reconnect_backoff_seconds),
            max_reconnect_attempts: other.max_reconnect_attempts.or(self.max_reconnect_attempts),
            monitor_poll_seconds: other.monitor_poll_seconds.or(self.monitor_poll_seconds),
            alert_rate_limit_seconds: other
                .alert_rate_limit_seconds
                .or(self.alert_rate_limit_seconds),
            http_timeout_seconds: other.http_timeout_seconds.or(self.http_timeout_seconds),
            mail_api_url: other.mail_api_url.or(self.mail_api_url),
            mail_api_key: other.mail_api_key.or(self.mail_api_key),
            alert_from: other.alert_from.or(self.alert_from),
            alert_to: other.alert_to.or(self.alert_to),
            simulate: other.simulate || self.simulate,
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        let defaults = EngineConfig::default();
        EngineConfig {
            reader_addr: self
                .reader_addr
                .clone()
                .unwrap_or(defaults.reader_addr),
            rssi_threshold_dbm: self
                .rssi_threshold_dbm
                .unwrap_or(defaults.rssi_threshold_dbm),
            cooldown_window: secs_or(self.cooldown_seconds, defaults.cooldown_window),
            correlation_window: secs_or(self.correlation_window_seconds, defaults.correlation_window),
            sweep_interval: secs_or(self.sweep_interval_seconds, defaults.sweep_interval),
            keep_alive_interval: secs_or(self.keep_alive_seconds, defaults.keep_alive_interval),
            cleanup_interval: secs_or(self.cleanup_seconds, defaults.cleanup_interval),
            reconnect_backoff: secs_or(self.reconnect_backoff_seconds, defaults.reconnect_backoff),
            max_reconnect_attempts: self
                .max_reconnect_attempts
                .unwrap_or(defaults.max_reconnect_attempts),
            shutdown_grace: defaults.shutdown_grace,
        }
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        let defaults = MonitorConfig::default();
        MonitorConfig {
            poll_interval: secs_or(self.monitor_poll_seconds, defaults.poll_interval),
            alert_rate_limit: secs_or(self.alert_rate_limit_seconds, defaults.alert_rate_limit),
        }
    }
}

fn secs_or(value: Option<u64>, fallback: Duration) -> Duration {
    value.map(Duration::from_secs).unwrap_or(fallback)
}

pub fn load_config() -> Config {
    // 1. Load defaults
    let default_config = Config {
        port: Some(9010),
        log_dir: Some(PathBuf::from("./logs")),
        log_level: Some("info".to_string()),
        product_api_url: Some("http://172.16.10.31/api/".to_string()),
        http_timeout_seconds: Some(30),
        mail_api_url: Some("https://api.sendgrid.com/v3/mail/send".to_string()),
        ..Default::default()
    };

    // 2. Load from config file if present. Allow overriding the default
    //    config file path with a CLI arg.
    let cli_args_for_path = Config::parse();
    let config_file_path = cli_args_for_path
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("portal_rfid.conf"));

    let mut current_config = default_config;

    if config_file_path.exists() {
        if let Ok(config_str) = fs::read_to_string(&config_file_path) {
            if let Ok(file_config) = serde_json::from_str::<Config>(&config_str) {
                current_config = current_config.merge(file_config);
            } else {
                log::warn!(
                    "Failed to parse config file: {}. Falling back to other sources.",
                    config_file_path.display()
                );
            }
        } else {
            log::warn!(
                "Failed to read config file: {}. Falling back to other sources.",
                config_file_path.display()
            );
        }
    } else {
        log::info!(
            "Config file not found at {}. Using defaults and environment/CLI variables.",
            config_file_path.display()
        );
    }

    // 3. Environment variables and CLI arguments override the file.
    let cli_args_final = Config::parse();
    current_config.merge(cli_args_final)
}
