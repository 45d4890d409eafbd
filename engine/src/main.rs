use anyhow::Context;
use clap::Parser;
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::info;

use cbswap_engine::{
	api::{self, ApiContext},
	chains::SupportedChain,
	deposit_witnesser::DepositWitnesser,
	evm::rpc::EvmRpcClient,
	key_vault::KeyVault,
	metrics,
	orderbook::OrderbookClient,
	settings::{EngineOptions, Settings},
	settlement_witnesser::SettlementWitnesser,
	slippage::SlippageOracle,
	store::SwapStore,
	swap_executor::SwapExecutor,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let settings = Settings::load(EngineOptions::parse()).context("Error reading settings")?;

	tracing_subscriber::FmtSubscriber::builder()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.try_init()
		.expect("setting default subscriber failed");

	metrics::register_metrics();

	let store = Arc::new(SwapStore::open(&settings.database_url)?);
	let key_vault = Arc::new(KeyVault::from_file(&settings.server_key_path)?);

	let http_timeout = Duration::from_secs(settings.http_timeout_secs);
	let orderbook = Arc::new(OrderbookClient::new(settings.orderbook_url.clone(), http_timeout)?);
	let slippage = Arc::new(SlippageOracle::new(settings.slippage_url.clone(), http_timeout)?);

	// Fails fast on misconfigured endpoints: each client checks its node's chain id.
	let mut evm_rpcs = BTreeMap::new();
	for chain in SupportedChain::ALL {
		evm_rpcs.insert(
			chain,
			Arc::new(EvmRpcClient::new(settings.rpc_url(chain), chain.id(), chain.name()).await?),
		);
	}

	let executor = Arc::new(SwapExecutor::new(
		store.clone(),
		key_vault.clone(),
		evm_rpcs.clone(),
		orderbook.clone(),
		slippage,
	));

	let (shutdown_sender, shutdown) = watch::channel(());
	let mut tasks = Vec::new();

	for chain in SupportedChain::ALL {
		let witnesser = DepositWitnesser::new(
			chain,
			store.clone(),
			evm_rpcs[&chain].clone(),
			executor.clone(),
		);
		tasks.push(tokio::spawn(witnesser.run(shutdown.clone())));
	}
	tasks.push(tokio::spawn(
		SettlementWitnesser::new(store.clone(), orderbook.clone()).run(shutdown.clone()),
	));

	let context = ApiContext {
		store,
		key_vault,
		orderbook,
		swap_lifetime: Duration::from_secs(settings.swap_expiry_secs),
	};
	let (address, server) = warp::serve(api::routes(context)).bind_with_graceful_shutdown(
		([0, 0, 0, 0], settings.port),
		{
			let mut shutdown = shutdown.clone();
			async move {
				let _ = shutdown.changed().await;
			}
		},
	);
	info!("Listening on {address}");
	tasks.push(tokio::spawn(server));

	tokio::signal::ctrl_c().await.context("Failed to listen for shutdown signal")?;
	info!("Shutdown requested; stopping after in-flight work completes");
	drop(shutdown_sender);

	for task in tasks {
		let _ = task.await;
	}
	Ok(())
}
