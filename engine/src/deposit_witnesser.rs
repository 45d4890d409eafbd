use anyhow::Result;
use ethers::types::U256;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use utilities::make_periodic_tick;

use crate::{
	chains::SupportedChain,
	evm::rpc::EvmRpcApi,
	metrics,
	orderbook::OrderbookApi,
	slippage::SlippageApi,
	store::SwapStore,
	swap_executor::SwapExecutor,
};

/// Watches one chain's pending vaults for incoming CBBTC and dispatches funded swaps to the
/// executor. One instance per supported chain, each on its own polling interval.
pub struct DepositWitnesser<EvmRpc, Orderbook, Slippage> {
	chain: SupportedChain,
	store: Arc<SwapStore>,
	evm_rpc: Arc<EvmRpc>,
	executor: Arc<SwapExecutor<EvmRpc, Orderbook, Slippage>>,
}

impl<EvmRpc, Orderbook, Slippage> DepositWitnesser<EvmRpc, Orderbook, Slippage>
where
	EvmRpc: EvmRpcApi,
	Orderbook: OrderbookApi,
	Slippage: SlippageApi,
{
	pub fn new(
		chain: SupportedChain,
		store: Arc<SwapStore>,
		evm_rpc: Arc<EvmRpc>,
		executor: Arc<SwapExecutor<EvmRpc, Orderbook, Slippage>>,
	) -> Self {
		Self { chain, store, evm_rpc, executor }
	}

	/// Polls until the shutdown signal fires. A failed tick is logged and counted; the next
	/// tick retries from a clean slate.
	pub async fn run(self, mut shutdown: watch::Receiver<()>) {
		info!("Starting {} deposit witnesser", self.chain);
		let mut poll_interval = make_periodic_tick(self.chain.polling_interval(), true);

		loop {
			tokio::select! {
				_ = shutdown.changed() => break,
				_ = poll_interval.tick() => {},
			}

			if let Err(error) = self.poll_once().await {
				warn!("{} deposit witnesser tick failed: {error:#}", self.chain);
				metrics::POLLER_ERRORS.with_label_values(&["deposit", self.chain.name()]).inc();
			}
		}
		info!("{} deposit witnesser stopped", self.chain);
	}

	/// One sweep: load pending swaps, batch-read their vault balances, and dispatch every
	/// funded one. Dispatches are spawned so a slow execution never blocks the poll loop;
	/// the store's status gating makes overlapping dispatches harmless.
	pub async fn poll_once(&self) -> Result<()> {
		let pending = self.store.pending_by_chain(self.chain)?;
		if pending.is_empty() {
			return Ok(());
		}

		let balances = self
			.evm_rpc
			.erc20_balances(
				self.chain.cbbtc(),
				pending.iter().map(|swap| swap.vault_address).collect(),
			)
			.await?;

		// `zip_eq`: the balance reader guarantees one result per queried vault.
		for (swap, balance) in itertools::zip_eq(pending, balances) {
			if balance > U256::zero() {
				let executor = self.executor.clone();
				tokio::spawn(async move { executor.execute(swap, balance).await });
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		evm::rpc::MockEvmRpcApi,
		key_vault::KeyVault,
		orderbook::{MockOrderbookApi, OrderQuote},
		slippage::MockSlippageApi,
		store::{NewSwap, SwapRecord, SwapStatus},
		token::Token,
	};
	use ethers::types::H160;
	use std::{collections::BTreeMap, io::Write, time::Duration};

	const TEST_KEY: &str = "0x000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

	fn key_vault(dir: &tempfile::TempDir) -> Arc<KeyVault> {
		let key_path = dir.path().join("master_key");
		std::fs::File::create(&key_path).unwrap().write_all(TEST_KEY.as_bytes()).unwrap();
		Arc::new(KeyVault::from_file(&key_path).unwrap())
	}

	fn create_swap(store: &SwapStore, key_vault: &KeyVault) -> SwapRecord {
		let minted = key_vault.mint().unwrap();
		store
			.create(NewSwap {
				chain: SupportedChain::Base,
				vault_address: minted.account.address,
				vault_salt: minted.salt,
				sell_token: Token::erc20(SupportedChain::Base.cbbtc()),
				buy_token: Token::Ether,
				recipient_address: H160::repeat_byte(0xaa),
				refund_address: H160::repeat_byte(0xbb),
				lifetime: Duration::from_secs(3600),
			})
			.unwrap()
	}

	async fn wait_for_status(store: &SwapStore, swap_id: &str, expected: SwapStatus) {
		tokio::time::timeout(Duration::from_secs(5), async {
			loop {
				if store.by_id(swap_id).unwrap().unwrap().status == expected {
					break;
				}
				tokio::time::sleep(Duration::from_millis(10)).await;
			}
		})
		.await
		.expect("swap did not reach the expected status in time");
	}

	fn witnesser(
		store: Arc<SwapStore>,
		key_vault: Arc<KeyVault>,
		evm_rpc: MockEvmRpcApi,
		orderbook: MockOrderbookApi,
	) -> DepositWitnesser<MockEvmRpcApi, MockOrderbookApi, MockSlippageApi> {
		let mut slippage = MockSlippageApi::new();
		slippage.expect_market_slippage_bps().returning(|_, _, _| 50);

		let evm_rpc = Arc::new(evm_rpc);
		let executor = Arc::new(SwapExecutor::new(
			store.clone(),
			key_vault,
			BTreeMap::from([(SupportedChain::Base, evm_rpc.clone())]),
			Arc::new(orderbook),
			Arc::new(slippage),
		));
		DepositWitnesser::new(SupportedChain::Base, store, evm_rpc, executor)
	}

	#[tokio::test]
	async fn funded_vault_is_dispatched() {
		let key_dir = tempfile::TempDir::new().unwrap();
		let store = Arc::new(SwapStore::open(":memory:").unwrap());
		let key_vault = key_vault(&key_dir);
		let swap = create_swap(&store, &key_vault);
		let unfunded = create_swap(&store, &key_vault);

		let mut evm_rpc = MockEvmRpcApi::new();
		let funded_vault = swap.vault_address;
		evm_rpc.expect_erc20_balances().returning(move |_, owners| {
			Ok(owners
				.into_iter()
				.map(|owner| {
					if owner == funded_vault { U256::from(10_000) } else { U256::zero() }
				})
				.collect())
		});
		evm_rpc.expect_permit_nonce().returning(|_, _| Ok(U256::zero()));

		let mut orderbook = MockOrderbookApi::new();
		orderbook.expect_quote().returning(|_, _, _, sell_amount, _| {
			Ok(OrderQuote {
				quote_id: None,
				sell_amount,
				buy_amount: U256::from(8_312_099),
				fee_amount: U256::zero(),
				valid_to: 1_718_000_000,
			})
		});
		orderbook.expect_upload_app_data().returning(|_, _, _| Ok(()));
		orderbook.expect_submit_order().times(1).returning(|_, _| Ok("0xuid".to_string()));

		let witnesser = witnesser(store.clone(), key_vault, evm_rpc, orderbook);
		witnesser.poll_once().await.unwrap();

		wait_for_status(&store, &swap.swap_id, SwapStatus::Executing).await;
		assert_eq!(
			store.by_id(&swap.swap_id).unwrap().unwrap().cow_order_uid.as_deref(),
			Some("0xuid")
		);
		// The empty vault stays untouched.
		assert_eq!(
			store.by_id(&unfunded.swap_id).unwrap().unwrap().status,
			SwapStatus::PendingDeposit
		);
	}

	#[tokio::test]
	async fn overlapping_ticks_dispatch_exactly_once() {
		let key_dir = tempfile::TempDir::new().unwrap();
		let store = Arc::new(SwapStore::open(":memory:").unwrap());
		let key_vault = key_vault(&key_dir);
		let swap = create_swap(&store, &key_vault);

		let mut evm_rpc = MockEvmRpcApi::new();
		evm_rpc
			.expect_erc20_balances()
			.returning(|_, owners| Ok(vec![U256::from(10_000); owners.len()]));
		evm_rpc.expect_permit_nonce().returning(|_, _| Ok(U256::zero()));

		let mut orderbook = MockOrderbookApi::new();
		orderbook.expect_quote().returning(|_, _, _, sell_amount, _| {
			Ok(OrderQuote {
				quote_id: None,
				sell_amount,
				buy_amount: U256::from(8_312_099),
				fee_amount: U256::zero(),
				valid_to: 1_718_000_000,
			})
		});
		orderbook.expect_upload_app_data().returning(|_, _, _| Ok(()));
		// Two overlapping ticks race for the same funded swap; only the winner submits.
		orderbook.expect_submit_order().times(1).returning(|_, _| Ok("0xuid".to_string()));

		let witnesser = witnesser(store.clone(), key_vault, evm_rpc, orderbook);
		let (first, second) = tokio::join!(witnesser.poll_once(), witnesser.poll_once());
		first.unwrap();
		second.unwrap();

		wait_for_status(&store, &swap.swap_id, SwapStatus::Executing).await;
	}

	#[tokio::test]
	async fn rpc_failure_skips_the_tick() {
		let key_dir = tempfile::TempDir::new().unwrap();
		let store = Arc::new(SwapStore::open(":memory:").unwrap());
		let key_vault = key_vault(&key_dir);
		let swap = create_swap(&store, &key_vault);

		let mut evm_rpc = MockEvmRpcApi::new();
		evm_rpc
			.expect_erc20_balances()
			.returning(|_, _| Err(anyhow::anyhow!("rpc node unavailable")));

		let witnesser =
			witnesser(store.clone(), key_vault, evm_rpc, MockOrderbookApi::new());
		assert!(witnesser.poll_once().await.is_err());
		assert_eq!(
			store.by_id(&swap.swap_id).unwrap().unwrap().status,
			SwapStatus::PendingDeposit
		);
	}

	#[tokio::test]
	async fn empty_pending_set_skips_the_balance_query() {
		let store = Arc::new(SwapStore::open(":memory:").unwrap());
		let key_dir = tempfile::TempDir::new().unwrap();
		// No `expect_erc20_balances`: a balance query would panic the mock.
		let witnesser = witnesser(
			store.clone(),
			key_vault(&key_dir),
			MockEvmRpcApi::new(),
			MockOrderbookApi::new(),
		);
		witnesser.poll_once().await.unwrap();
	}
}
