use anyhow::{Context, Result};
use ethers::{
	abi::{self, Token as AbiToken},
	signers::LocalWallet,
	types::{transaction::eip712::EIP712Domain, H160, H256, U256},
	utils::keccak256,
};

use crate::{
	chains::SupportedChain,
	constants::{GPV2_SETTLEMENT, SETTLEMENT_DOMAIN_NAME, SETTLEMENT_DOMAIN_VERSION},
	orderbook::OrderCreation,
};

lazy_static::lazy_static! {
	static ref ORDER_TYPEHASH: [u8; 32] = keccak256(
		"Order(address sellToken,address buyToken,address receiver,uint256 sellAmount,\
		uint256 buyAmount,uint32 validTo,bytes32 appData,uint256 feeAmount,string kind,\
		bool partiallyFillable,string sellTokenBalance,string buyTokenBalance)"
	);

	static ref KIND_SELL: [u8; 32] = keccak256("sell");
	static ref BALANCE_ERC20: [u8; 32] = keccak256("erc20");
}

/// A GPv2 sell order. Everything this system submits is a fill-or-kill sell of the full
/// vault balance, so kind, fillability and balance locations are fixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SellOrder {
	pub sell_token: H160,
	pub buy_token: H160,
	pub receiver: H160,
	pub sell_amount: U256,
	pub buy_amount: U256,
	pub valid_to: u32,
	pub app_data: H256,
	pub fee_amount: U256,
}

#[derive(Debug, Clone)]
pub struct SignedOrder {
	pub order: SellOrder,
	/// 65-byte `r ‖ s ‖ v` EIP-712 signature.
	pub signature: Vec<u8>,
}

/// The settlement contract's EIP-712 domain on `chain`.
pub fn settlement_domain(chain: SupportedChain) -> EIP712Domain {
	EIP712Domain {
		name: Some(SETTLEMENT_DOMAIN_NAME.to_string()),
		version: Some(SETTLEMENT_DOMAIN_VERSION.to_string()),
		chain_id: Some(chain.id().into()),
		verifying_contract: Some(*GPV2_SETTLEMENT),
		salt: None,
	}
}

pub fn order_digest(domain: &EIP712Domain, order: &SellOrder) -> H256 {
	let struct_hash = keccak256(abi::encode(&[
		AbiToken::FixedBytes(ORDER_TYPEHASH.to_vec()),
		AbiToken::Address(order.sell_token),
		AbiToken::Address(order.buy_token),
		AbiToken::Address(order.receiver),
		AbiToken::Uint(order.sell_amount),
		AbiToken::Uint(order.buy_amount),
		AbiToken::Uint(order.valid_to.into()),
		AbiToken::FixedBytes(order.app_data.as_bytes().to_vec()),
		AbiToken::Uint(order.fee_amount),
		AbiToken::FixedBytes(KIND_SELL.to_vec()),
		AbiToken::Bool(false),
		AbiToken::FixedBytes(BALANCE_ERC20.to_vec()),
		AbiToken::FixedBytes(BALANCE_ERC20.to_vec()),
	]));

	let mut preimage = Vec::with_capacity(66);
	preimage.extend_from_slice(&[0x19, 0x01]);
	preimage.extend_from_slice(&domain.separator());
	preimage.extend_from_slice(&struct_hash);
	keccak256(preimage).into()
}

pub fn sign_order(
	wallet: &LocalWallet,
	chain: SupportedChain,
	order: SellOrder,
) -> Result<SignedOrder> {
	let digest = order_digest(&settlement_domain(chain), &order);
	let signature = wallet.sign_hash(digest).context("Failed to sign order")?;
	Ok(SignedOrder { order, signature: signature.to_vec() })
}

/// The orderbook's 56-byte order identifier: `digest(32) ‖ owner(20) ‖ validTo(4)`.
pub fn pack_order_uid(digest: H256, owner: H160, valid_to: u32) -> String {
	let mut uid = Vec::with_capacity(56);
	uid.extend_from_slice(digest.as_bytes());
	uid.extend_from_slice(owner.as_bytes());
	uid.extend_from_slice(&valid_to.to_be_bytes());
	format!("0x{}", hex::encode(uid))
}

impl SignedOrder {
	/// The submission payload. `app_data` carries the hash; the full document must already
	/// have been uploaded under it.
	pub fn to_creation(&self, from: H160) -> OrderCreation {
		OrderCreation {
			sell_token: self.order.sell_token,
			buy_token: self.order.buy_token,
			receiver: self.order.receiver,
			sell_amount: self.order.sell_amount,
			buy_amount: self.order.buy_amount,
			valid_to: self.order.valid_to,
			app_data: format!("{:#x}", self.order.app_data),
			fee_amount: self.order.fee_amount,
			kind: "sell".to_string(),
			partially_fillable: false,
			sell_token_balance: "erc20".to_string(),
			buy_token_balance: "erc20".to_string(),
			signing_scheme: "eip712".to_string(),
			signature: format!("0x{}", hex::encode(&self.signature)),
			from,
		}
	}
}
