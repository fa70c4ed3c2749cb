//! Process configuration: optional TOML file, overridden by command line
//! arguments, completed by defaults.

use std::path::PathBuf;

use clap::{ArgAction, Parser};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::ipam::netbox::Filter;
use crate::item::{ItemMap, ItemMaps};
use crate::kea::SubnetCorrelation;

pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8001;
pub const DEFAULT_SECRET_HEADER: &str = "X-netbox2kea-secret";
pub const DEFAULT_LOG_LEVEL: &str = "warn";

const LOG_LEVELS: [&str; 6] = ["off", "error", "warn", "info", "debug", "trace"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error(
        "setting \"{0}\" not found, neither on command line arguments nor in configuration file"
    )]
    Missing(&'static str),

    #[error("invalid setting \"{key}\": {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Synchronize NetBox IPAM data into a Kea DHCPv4 server
#[derive(Parser, Debug, Default)]
#[command(name = "kea-sync", version, about)]
pub struct Args {
    /// TOML configuration file
    #[arg(short = 'c', long)]
    pub config_file: Option<PathBuf>,

    /// NetBox base URL
    #[arg(short = 'n', long)]
    pub netbox_url: Option<String>,

    /// NetBox API token
    #[arg(short = 't', long)]
    pub netbox_token: Option<String>,

    /// Kea Control Agent URL (http(s)://...) or configuration file (file://...)
    #[arg(short = 'k', long)]
    pub kea_url: Option<String>,

    /// Listen for NetBox webhook events
    #[arg(short = 'l', long)]
    pub listen: bool,

    /// Listener address
    #[arg(short = 'b', long)]
    pub bind: Option<String>,

    /// Listener port
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Shared secret expected in the secret header of webhook requests
    #[arg(long)]
    pub secret: Option<String>,

    /// Run a full synchronization at startup
    #[arg(short = 's', long = "sync-now")]
    pub full_sync_at_startup: bool,

    /// Build and validate configuration without pushing it
    #[arg(long = "check")]
    pub check_only: bool,

    /// Prefix log lines with an sd-daemon `<N>` priority instead of a timestamp
    #[arg(long)]
    pub syslog_level_prefix: bool,

    /// Increase verbosity, up to 3 times
    #[arg(short = 'v', long, action = ArgAction::Count)]
    pub verbose: u8,
}

/// Settings accepted in the configuration file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub kea_url: Option<String>,
    pub netbox_url: Option<String>,
    pub netbox_token: Option<String>,
    pub check_only: Option<bool>,
    pub full_sync_at_startup: Option<bool>,
    pub listen: Option<bool>,
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub secret: Option<String>,
    pub secret_header: Option<String>,
    pub log_level: Option<String>,
    pub ext_log_level: Option<String>,
    pub syslog_level_prefix: Option<bool>,
    pub prefix_filter: Option<Filter>,
    pub iprange_filter: Option<Filter>,
    pub ipaddress_filter: Option<Filter>,
    pub subnet_prefix_map: Option<ItemMap>,
    pub pool_iprange_map: Option<ItemMap>,
    pub reservation_ipaddr_map: Option<ItemMap>,
    pub subnet_correlation: Option<SubnetCorrelation>,
}

impl FileConfig {
    pub fn parse(text: &str, path: PathBuf) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse { path, source })
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub kea_url: String,
    pub netbox_url: String,
    pub netbox_token: Option<String>,
    pub check_only: bool,
    pub full_sync_at_startup: bool,
    pub listen: bool,
    pub bind: String,
    pub port: u16,
    pub secret: Option<String>,
    pub secret_header: String,
    pub log_level: String,
    pub ext_log_level: String,
    pub syslog_level_prefix: bool,
    pub prefix_filter: Filter,
    pub iprange_filter: Filter,
    pub ipaddress_filter: Filter,
    pub maps: ItemMaps,
    pub subnet_correlation: SubnetCorrelation,
}

impl Config {
    /// Load the configuration file named by `args`, if any, and apply `args`.
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let file = match &args.config_file {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                FileConfig::parse(&text, path.clone())?
            }
            None => FileConfig::default(),
        };
        Self::merge(file, args)
    }

    /// Command line arguments win over file settings.
    pub fn merge(file: FileConfig, args: &Args) -> Result<Self, ConfigError> {
        let defaults = ItemMaps::default();

        let (mut log_level, mut ext_log_level) = (file.log_level, file.ext_log_level);
        match args.verbose {
            0 => {}
            1 => log_level = Some("info".to_string()),
            2 => {
                log_level = Some("debug".to_string());
                ext_log_level = Some("info".to_string());
            }
            _ => {
                log_level = Some("debug".to_string());
                ext_log_level = Some("debug".to_string());
            }
        }

        let config = Config {
            kea_url: args
                .kea_url
                .clone()
                .or(file.kea_url)
                .ok_or(ConfigError::Missing("kea_url"))?,
            netbox_url: args
                .netbox_url
                .clone()
                .or(file.netbox_url)
                .ok_or(ConfigError::Missing("netbox_url"))?,
            netbox_token: args.netbox_token.clone().or(file.netbox_token),
            check_only: args.check_only || file.check_only.unwrap_or(false),
            full_sync_at_startup: args.full_sync_at_startup
                || file.full_sync_at_startup.unwrap_or(false),
            listen: args.listen || file.listen.unwrap_or(false),
            bind: args
                .bind
                .clone()
                .or(file.bind)
                .unwrap_or_else(|| DEFAULT_BIND.to_string()),
            port: args.port.or(file.port).unwrap_or(DEFAULT_PORT),
            secret: args.secret.clone().or(file.secret),
            secret_header: file
                .secret_header
                .unwrap_or_else(|| DEFAULT_SECRET_HEADER.to_string()),
            log_level: log_level_name("log_level", log_level)?,
            ext_log_level: log_level_name("ext_log_level", ext_log_level)?,
            syslog_level_prefix: args.syslog_level_prefix
                || file.syslog_level_prefix.unwrap_or(false),
            prefix_filter: file.prefix_filter.unwrap_or_default(),
            iprange_filter: file.iprange_filter.unwrap_or_default(),
            ipaddress_filter: file
                .ipaddress_filter
                .unwrap_or_else(|| Filter::from([("status".to_string(), json!("dhcp"))])),
            maps: ItemMaps {
                subnet: file.subnet_prefix_map.unwrap_or(defaults.subnet),
                pool: file.pool_iprange_map.unwrap_or(defaults.pool),
                reservation: file.reservation_ipaddr_map.unwrap_or(defaults.reservation),
            },
            subnet_correlation: file.subnet_correlation.unwrap_or_default(),
        };
        Ok(config)
    }

    /// `tracing` filter directives for this crate and its dependencies.
    pub fn log_filter(&self) -> String {
        format!("{},kea_sync={}", self.ext_log_level, self.log_level)
    }
}

fn log_level_name(key: &'static str, name: Option<String>) -> Result<String, ConfigError> {
    let Some(name) = name else {
        return Ok(DEFAULT_LOG_LEVEL.to_string());
    };
    let level = match name.to_ascii_lowercase().as_str() {
        "warning" => "warn".to_string(),
        "critical" => "error".to_string(),
        other => other.to_string(),
    };
    if LOG_LEVELS.contains(&level.as_str()) {
        Ok(level)
    } else {
        Err(ConfigError::Invalid {
            key,
            reason: format!("unknown log level \"{}\"", name),
        })
    }
}
