use anyhow::{ensure, Context, Result};
use chrono::Utc;
use ethers::types::U256;
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, error, info, warn};

use crate::{
	chains::SupportedChain,
	constants::{GPV2_VAULT_RELAYER, ORDER_VALIDITY},
	evm::rpc::EvmRpcApi,
	key_vault::KeyVault,
	metrics,
	order::{
		app_data::AppDataDocument,
		permit::{cbbtc_permit_domain, permit_calldata, sign_permit, PermitParams},
		signer::{sign_order, SellOrder},
	},
	orderbook::OrderbookApi,
	slippage::{apply_slippage, SlippageApi},
	store::{SwapRecord, SwapStore},
};

/// Drives a funded swap from deposit detection to order submission. Dispatched by the
/// deposit witnessers; the settlement witnesser takes over once an order UID is persisted.
pub struct SwapExecutor<EvmRpc, Orderbook, Slippage> {
	store: Arc<SwapStore>,
	key_vault: Arc<KeyVault>,
	evm_rpcs: BTreeMap<SupportedChain, Arc<EvmRpc>>,
	orderbook: Arc<Orderbook>,
	slippage: Arc<Slippage>,
}

impl<EvmRpc, Orderbook, Slippage> SwapExecutor<EvmRpc, Orderbook, Slippage>
where
	EvmRpc: EvmRpcApi,
	Orderbook: OrderbookApi,
	Slippage: SlippageApi,
{
	pub fn new(
		store: Arc<SwapStore>,
		key_vault: Arc<KeyVault>,
		evm_rpcs: BTreeMap<SupportedChain, Arc<EvmRpc>>,
		orderbook: Arc<Orderbook>,
		slippage: Arc<Slippage>,
	) -> Self {
		Self { store, key_vault, evm_rpcs, orderbook, slippage }
	}

	/// Executes a funded swap. Any failure after the swap has been claimed moves it to
	/// `failed` with the error as the reason; funds stay in the vault for operator recovery.
	pub async fn execute(&self, swap: SwapRecord, balance: U256) {
		let swap_id = swap.swap_id.clone();
		match self.try_execute(swap, balance).await {
			Ok(Some(order_uid)) => {
				metrics::ORDERS_SUBMITTED.inc();
				info!(%swap_id, %order_uid, "submitted order");
			},
			Ok(None) => debug!(%swap_id, "swap already claimed by another dispatch"),
			Err(execution_error) => {
				warn!(%swap_id, "swap execution failed: {execution_error:#}");
				// Gated on `executing`: if we failed before claiming the swap this is a
				// no-op and the next witnesser tick retries from scratch.
				match self.store.mark_failed(&swap_id, &format!("{execution_error:#}")) {
					Ok(true) => metrics::SWAPS_FAILED.inc(),
					Ok(false) => {},
					Err(store_error) => {
						error!(%swap_id, "failed to record execution failure: {store_error}")
					},
				}
			},
		}
	}

	async fn try_execute(&self, swap: SwapRecord, balance: U256) -> Result<Option<String>> {
		let evm_rpc =
			self.evm_rpcs.get(&swap.chain).context("no RPC client for swap's chain")?;

		self.store.record_deposit(&swap.swap_id, "", balance)?;
		if !self.store.mark_executing(&swap.swap_id)? {
			return Ok(None);
		}

		info!(
			swap_id = %swap.swap_id,
			"executing swap of {balance} CBBTC sats into {} on {}", swap.buy_token, swap.chain
		);

		let vault = self.key_vault.derive(&swap.vault_salt)?;
		ensure!(
			vault.address == swap.vault_address,
			"derived vault address {:#x} does not match recorded vault {:#x}",
			vault.address,
			swap.vault_address,
		);

		let sell_token = swap.chain.cbbtc();
		let buy_token = swap.buy_token.orderbook_address();

		// Gasless approval: the solver executes this permit as a pre-hook right before
		// pulling the sell tokens.
		let nonce = evm_rpc.permit_nonce(sell_token, vault.address).await?;
		let permit = sign_permit(
			&vault.wallet,
			&cbbtc_permit_domain(swap.chain, sell_token),
			PermitParams {
				owner: vault.address,
				spender: *GPV2_VAULT_RELAYER,
				value: U256::MAX,
				nonce,
				deadline: U256::MAX,
			},
		)?;

		let slippage_bps =
			self.slippage.market_slippage_bps(swap.chain, sell_token, buy_token).await;
		let app_data =
			AppDataDocument::for_permit_order(sell_token, &permit_calldata(&permit), slippage_bps);
		let app_data_hash = app_data.hash();

		// The quote taken at request time was advisory; price the actual deposit.
		let quote = self
			.orderbook
			.quote(swap.chain, sell_token, buy_token, balance, vault.address)
			.await
			.context("orderbook rejected the quote")?;

		let order = SellOrder {
			sell_token,
			buy_token,
			receiver: swap.recipient_address,
			sell_amount: quote.sell_amount,
			buy_amount: apply_slippage(quote.buy_amount, slippage_bps),
			valid_to: (Utc::now().timestamp() as u64 + ORDER_VALIDITY.as_secs()) as u32,
			app_data: app_data_hash,
			fee_amount: U256::zero(),
		};
		let signed = sign_order(&vault.wallet, swap.chain, order)?;

		self.orderbook
			.upload_app_data(swap.chain, app_data_hash, app_data.canonical_json())
			.await
			.context("failed to upload app data")?;
		let order_uid = self
			.orderbook
			.submit_order(swap.chain, signed.to_creation(vault.address))
			.await
			.context("order submission failed")?;

		if !self.store.save_order_uid(&swap.swap_id, &order_uid)? {
			warn!(
				swap_id = %swap.swap_id,
				%order_uid, "order submitted but swap was no longer executing"
			);
		}
		Ok(Some(order_uid))
	}
}
