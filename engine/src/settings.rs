use clap::Parser;
use config::{Config, ConfigError, Environment, File, Map, Source, Value};
use serde::Deserialize;
use std::{collections::HashMap, path::PathBuf};

use crate::chains::SupportedChain;

#[derive(Parser, Debug, Clone, Default)]
#[clap(version = env!("CARGO_PKG_VERSION"))]
pub struct EngineOptions {
	#[clap(long = "config", help = "Path to an optional TOML settings file")]
	pub config_file: Option<String>,
	#[clap(long = "database_url")]
	pub database_url: Option<String>,
	#[clap(long = "eth_rpc_url")]
	pub eth_rpc_url: Option<String>,
	#[clap(long = "base_rpc_url")]
	pub base_rpc_url: Option<String>,
	#[clap(long = "server_key_path")]
	pub server_key_path: Option<String>,
	#[clap(long = "port")]
	pub port: Option<u16>,
	#[clap(long = "orderbook_url")]
	pub orderbook_url: Option<String>,
	#[clap(long = "slippage_url")]
	pub slippage_url: Option<String>,
	#[clap(long = "swap_expiry_secs")]
	pub swap_expiry_secs: Option<u64>,
}

/// Engine settings, merged in order of increasing precedence: built-in defaults, an optional
/// settings file, flat environment variables (`DATABASE_URL`, `ETH_RPC_URL`, …) and finally
/// command line options.
#[derive(Clone, Deserialize, Debug)]
pub struct Settings {
	pub database_url: String,
	pub eth_rpc_url: String,
	pub base_rpc_url: String,
	pub server_key_path: PathBuf,
	pub port: u16,
	pub orderbook_url: String,
	pub slippage_url: String,
	pub swap_expiry_secs: u64,
	pub http_timeout_secs: u64,
	/// Optional Grafana Cloud push target; consumed by the external metrics shipper, not by
	/// the engine itself.
	pub grafana_cloud_url: Option<String>,
	pub grafana_username: Option<String>,
	pub grafana_api_key: Option<String>,
}

impl Settings {
	pub fn load(opts: EngineOptions) -> Result<Self, ConfigError> {
		let mut builder = Config::builder()
			.set_default("port", 3000i64)?
			.set_default("orderbook_url", "https://api.cow.fi")?
			.set_default("slippage_url", "https://bff.cow.fi")?
			.set_default("swap_expiry_secs", 3600i64)?
			.set_default("http_timeout_secs", 10i64)?;

		if let Some(config_file) = &opts.config_file {
			builder = builder.add_source(File::with_name(config_file));
		}

		builder
			.add_source(Environment::default())
			.add_source(opts)
			.build()?
			.try_deserialize()
	}

	pub fn rpc_url(&self, chain: SupportedChain) -> &str {
		match chain {
			SupportedChain::Ethereum => &self.eth_rpc_url,
			SupportedChain::Base => &self.base_rpc_url,
		}
	}
}

pub fn insert_command_line_option<T>(
	map: &mut HashMap<String, Value>,
	key: &str,
	option: &Option<T>,
) where
	T: Clone + Into<Value>,
{
	if let Some(value) = option {
		map.insert(key.to_string(), value.clone().into());
	}
}

impl Source for EngineOptions {
	fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
		Box::new((*self).clone())
	}

	fn collect(&self) -> Result<Map<String, Value>, ConfigError> {
		let mut map: HashMap<String, Value> = HashMap::new();

		insert_command_line_option(&mut map, "database_url", &self.database_url);
		insert_command_line_option(&mut map, "eth_rpc_url", &self.eth_rpc_url);
		insert_command_line_option(&mut map, "base_rpc_url", &self.base_rpc_url);
		insert_command_line_option(&mut map, "server_key_path", &self.server_key_path);
		insert_command_line_option(&mut map, "orderbook_url", &self.orderbook_url);
		insert_command_line_option(&mut map, "slippage_url", &self.slippage_url);
		insert_command_line_option(
			&mut map,
			"port",
			&self.port.map(|port| port as i64),
		);
		insert_command_line_option(
			&mut map,
			"swap_expiry_secs",
			&self.swap_expiry_secs.map(|secs| secs as i64),
		);

		Ok(map)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn required_options() -> EngineOptions {
		EngineOptions {
			database_url: Some(":memory:".to_string()),
			eth_rpc_url: Some("http://localhost:8545".to_string()),
			base_rpc_url: Some("http://localhost:8546".to_string()),
			server_key_path: Some("/etc/cbswap/master_key".to_string()),
			..Default::default()
		}
	}

	#[test]
	fn defaults_are_applied() {
		let settings = Settings::load(required_options()).unwrap();
		assert_eq!(settings.port, 3000);
		assert_eq!(settings.orderbook_url, "https://api.cow.fi");
		assert_eq!(settings.slippage_url, "https://bff.cow.fi");
		assert_eq!(settings.swap_expiry_secs, 3600);
		assert!(settings.grafana_cloud_url.is_none());
	}

	#[test]
	fn command_line_options_override_defaults() {
		let settings = Settings::load(EngineOptions {
			port: Some(8080),
			orderbook_url: Some("http://localhost:9000".to_string()),
			..required_options()
		})
		.unwrap();
		assert_eq!(settings.port, 8080);
		assert_eq!(settings.orderbook_url, "http://localhost:9000");
	}

	#[test]
	fn missing_required_settings_fail() {
		assert!(Settings::load(EngineOptions::default()).is_err());
	}

	#[test]
	fn rpc_urls_map_to_chains() {
		let settings = Settings::load(required_options()).unwrap();
		assert_eq!(settings.rpc_url(SupportedChain::Ethereum), "http://localhost:8545");
		assert_eq!(settings.rpc_url(SupportedChain::Base), "http://localhost:8546");
	}
}
