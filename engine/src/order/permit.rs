use anyhow::{Context, Result};
use ethers::{
	abi::{self, Token as AbiToken},
	signers::LocalWallet,
	types::{transaction::eip712::EIP712Domain, Bytes, H160, H256, U256},
	utils::keccak256,
};

use crate::{
	chains::SupportedChain,
	constants::{CBBTC_PERMIT_DOMAIN_NAME, CBBTC_PERMIT_DOMAIN_VERSION},
	evm::rpc::PermitCall,
};

lazy_static::lazy_static! {
	// keccak256("Permit(address owner,address spender,uint256 value,uint256 nonce,uint256 deadline)")
	static ref PERMIT_TYPEHASH: [u8; 32] = keccak256(
		"Permit(address owner,address spender,uint256 value,uint256 nonce,uint256 deadline)"
	);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermitParams {
	pub owner: H160,
	pub spender: H160,
	pub value: U256,
	pub nonce: U256,
	pub deadline: U256,
}

/// A signed EIP-2612 permit, ready to be encoded as a pre-hook call.
#[derive(Debug, Clone)]
pub struct SignedPermit {
	pub params: PermitParams,
	pub v: u8,
	pub r: [u8; 32],
	pub s: [u8; 32],
}

/// The EIP-712 domain CBBTC verifies permits under on `chain`.
pub fn cbbtc_permit_domain(chain: SupportedChain, token: H160) -> EIP712Domain {
	EIP712Domain {
		name: Some(CBBTC_PERMIT_DOMAIN_NAME.to_string()),
		version: Some(CBBTC_PERMIT_DOMAIN_VERSION.to_string()),
		chain_id: Some(chain.id().into()),
		verifying_contract: Some(token),
		salt: None,
	}
}

pub fn permit_digest(domain: &EIP712Domain, params: &PermitParams) -> H256 {
	let struct_hash = keccak256(abi::encode(&[
		AbiToken::FixedBytes(PERMIT_TYPEHASH.to_vec()),
		AbiToken::Address(params.owner),
		AbiToken::Address(params.spender),
		AbiToken::Uint(params.value),
		AbiToken::Uint(params.nonce),
		AbiToken::Uint(params.deadline),
	]));

	let mut preimage = Vec::with_capacity(66);
	preimage.extend_from_slice(&[0x19, 0x01]);
	preimage.extend_from_slice(&domain.separator());
	preimage.extend_from_slice(&struct_hash);
	keccak256(preimage).into()
}

pub fn sign_permit(
	wallet: &LocalWallet,
	domain: &EIP712Domain,
	params: PermitParams,
) -> Result<SignedPermit> {
	let signature =
		wallet.sign_hash(permit_digest(domain, &params)).context("Failed to sign permit")?;

	let mut r = [0u8; 32];
	let mut s = [0u8; 32];
	signature.r.to_big_endian(&mut r);
	signature.s.to_big_endian(&mut s);
	Ok(SignedPermit { params, v: signature.v as u8, r, s })
}

/// ABI-encoded `permit(owner, spender, value, deadline, v, r, s)` calldata for the pre-hook.
pub fn permit_calldata(permit: &SignedPermit) -> Bytes {
	use ethers::abi::AbiEncode;

	PermitCall {
		owner: permit.params.owner,
		spender: permit.params.spender,
		value: permit.params.value,
		deadline: permit.params.deadline,
		v: permit.v,
		r: permit.r,
		s: permit.s,
	}
	.encode()
	.into()
}
