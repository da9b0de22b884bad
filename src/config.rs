//! Process-wide configuration for every binary in this crate. Loaded once
//! at startup from an optional `key = value` file via the `config` crate,
//! then overlaid with CLI flags; immutable afterwards.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Parses the boolean grammar configuration values use:
/// `{true,yes,on,1}` / `{false,no,off,0}`, case-insensitively.
pub fn parse_bool_str(s: &str) -> Result<bool, String> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        other => Err(format!("not a recognized boolean: {other:?}")),
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    #[default]
    None,
    Simple,
}

/// Settings shared by `slamd-client` and `slamd-resource-monitor` (both are
/// session-client variants, including the resource monitor).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_address: String,
    pub client_port: u16,
    pub stat_port: u16,
    pub enable_real_time_stats: bool,
    pub stat_report_interval_secs: u32,
    pub persist_statistics: bool,
    pub persistence_directory: String,
    pub persistence_interval_secs: u32,
    pub auth_type: AuthType,
    pub auth_id: String,
    pub auth_credentials: String,
    pub restricted_mode: bool,
    pub use_custom_class_loader: bool,
    pub class_path: String,
    pub use_ssl: bool,
    pub blind_trust: bool,
    pub ssl_key_store: Option<String>,
    pub ssl_key_store_password: Option<String>,
    pub ssl_trust_store: Option<String>,
    pub ssl_trust_store_password: Option<String>,
    pub aggregate_thread_data: bool,
    pub verbose: bool,
    pub quiet: bool,
    pub log_file: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1".into(),
            client_port: 3000,
            stat_port: 3003,
            enable_real_time_stats: true,
            stat_report_interval_secs: 5,
            persist_statistics: false,
            persistence_directory: "./slamd-stats".into(),
            persistence_interval_secs: 30,
            auth_type: AuthType::None,
            auth_id: String::new(),
            auth_credentials: String::new(),
            restricted_mode: false,
            use_custom_class_loader: false,
            class_path: "./classes".into(),
            use_ssl: false,
            blind_trust: false,
            ssl_key_store: None,
            ssl_key_store_password: None,
            ssl_trust_store: None,
            ssl_trust_store_password: None,
            aggregate_thread_data: true,
            verbose: false,
            quiet: false,
            log_file: None,
        }
    }
}

/// Settings for the supervisor / client manager.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub server_address: String,
    pub manager_port: u16,
    pub max_clients: u32,
    pub auto_create_clients: u32,
    pub start_command: String,
    pub auto_reconnect: bool,
    pub reconnect_backoff_secs: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1".into(),
            manager_port: 3001,
            max_clients: 8,
            auto_create_clients: 0,
            start_command: "./start-client.sh".into(),
            auto_reconnect: true,
            reconnect_backoff_secs: 30,
        }
    }
}

/// Loads a config of type `T` by layering an optional file over `T`'s
/// defaults. Missing or absent files simply yield the defaults (`T` derives
/// `Default` and `#[serde(default)]`, so `config`'s deserialize step fills
/// in anything the file doesn't mention).
pub fn load<T>(path: Option<&Path>) -> anyhow::Result<T>
where
    T: for<'de> Deserialize<'de> + Default,
{
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path).required(false));
    }
    let built = builder.build()?;
    Ok(built.try_deserialize().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_grammar_accepts_all_synonyms() {
        for s in ["true", "yes", "on", "1", "TRUE", "On"] {
            assert_eq!(parse_bool_str(s), Ok(true));
        }
        for s in ["false", "no", "off", "0", "OFF"] {
            assert_eq!(parse_bool_str(s), Ok(false));
        }
        assert!(parse_bool_str("maybe").is_err());
    }

    #[test]
    fn defaults_round_trip_through_loader() {
        let cfg: ClientConfig = load(None).unwrap();
        assert_eq!(cfg.client_port, 3000);
        assert!(!cfg.restricted_mode);
    }
}
