use anyhow::{ensure, Context, Result};
use ethers::{
	abi::{AbiDecode, AbiEncode},
	prelude::*,
};
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;

use crate::constants::{MULTICALL3_ADDRESS, MULTICALL_BATCH_SIZE};

abigen!(
	Erc20,
	r#"[
		function balanceOf(address account) external view returns (uint256)
		function nonces(address owner) external view returns (uint256)
		function permit(address owner, address spender, uint256 value, uint256 deadline, uint8 v, bytes32 r, bytes32 s) external
	]"#
);

abigen!(
	Multicall3,
	r#"[
		struct Call3 { address target; bool allowFailure; bytes callData; }
		struct AggregateResult { bool success; bytes returnData; }
		function aggregate3(Call3[] calldata calls) external payable returns (AggregateResult[] memory returnData)
	]"#
);

#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait EvmRpcApi: Send + Sync + 'static {
	/// ERC-20 balances of `token` for each owner, in input order. Individual subcall
	/// failures are reported as zero; a failure of the whole batch is an error.
	async fn erc20_balances(&self, token: H160, owners: Vec<H160>) -> Result<Vec<U256>>;

	/// Current EIP-2612 permit nonce of `owner` on `token`.
	async fn permit_nonce(&self, token: H160, owner: H160) -> Result<U256>;
}

#[derive(Clone)]
pub struct EvmRpcClient {
	provider: Arc<Provider<Http>>,
	chain_name: &'static str,
}

impl EvmRpcClient {
	/// Connects and verifies the node is serving the expected chain, so a misconfigured
	/// endpoint fails at startup rather than after the first swap.
	pub async fn new(
		http_endpoint: &str,
		expected_chain_id: u64,
		chain_name: &'static str,
	) -> Result<Self> {
		let provider = Arc::new(Provider::<Http>::try_from(http_endpoint)?);
		let chain_id = provider
			.get_chainid()
			.await
			.with_context(|| format!("Cannot connect to the {chain_name} node"))?;
		ensure!(
			chain_id == expected_chain_id.into(),
			"The {chain_name} node is serving chain id {chain_id}, expected {expected_chain_id}. \
			Please check the configured RPC endpoints.",
		);
		Ok(Self { provider, chain_name })
	}
}

#[async_trait::async_trait]
impl EvmRpcApi for EvmRpcClient {
	async fn erc20_balances(&self, token: H160, owners: Vec<H160>) -> Result<Vec<U256>> {
		let mut balances = Vec::with_capacity(owners.len());
		for chunk in owners.chunks(MULTICALL_BATCH_SIZE) {
			let calls = chunk
				.iter()
				.map(|owner| Call3 {
					target: token,
					allow_failure: true,
					call_data: BalanceOfCall { account: *owner }.encode().into(),
				})
				.collect::<Vec<_>>();

			let results = Multicall3::new(*MULTICALL3_ADDRESS, self.provider.clone())
				.aggregate_3(calls)
				.call()
				.await
				.with_context(|| {
					format!("Batched balance query failed on {}", self.chain_name)
				})?;
			ensure!(
				results.len() == chunk.len(),
				"Multicall on {} returned {} results for {} calls",
				self.chain_name,
				results.len(),
				chunk.len(),
			);

			balances.extend(
				results
					.into_iter()
					.map(|(success, return_data)| decode_balance(AggregateResult { success, return_data })),
			);
		}
		Ok(balances)
	}

	async fn permit_nonce(&self, token: H160, owner: H160) -> Result<U256> {
		Erc20::new(token, self.provider.clone())
			.nonces(owner)
			.call()
			.await
			.with_context(|| format!("Failed to read permit nonce on {}", self.chain_name))
	}
}

/// A reverted or malformed subcall counts as a zero balance rather than failing the sweep.
fn decode_balance(result: AggregateResult) -> U256 {
	if result.success {
		U256::decode(result.return_data.as_ref()).unwrap_or_default()
	} else {
		U256::zero()
	}
}
