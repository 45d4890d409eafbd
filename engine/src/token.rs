use ethers::{types::H160, utils::to_checksum};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::constants::ETHER_SENTINEL;

/// An asset a swap can buy or sell. The wire form is `{"type":"erc20","address":"0x…"}` or
/// `{"type":"ether"}`; the latter is only valid on the buy side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Token {
	Erc20 {
		#[serde(serialize_with = "serialize_checksummed", deserialize_with = "deserialize_address")]
		address: H160,
	},
	Ether,
}

impl Token {
	pub fn erc20(address: H160) -> Self {
		Token::Erc20 { address }
	}

	/// The address handed to the orderbook. Native ether uses the well-known sentinel, which
	/// instructs the settlement to unwrap before delivery.
	pub fn orderbook_address(&self) -> H160 {
		match self {
			Token::Erc20 { address } => *address,
			Token::Ether => *ETHER_SENTINEL,
		}
	}

	/// Serialized descriptor persisted in the swap record.
	pub fn to_db_string(&self) -> String {
		serde_json::to_string(self).expect("token descriptors always serialize")
	}

	pub fn from_db_string(raw: &str) -> Result<Self, serde_json::Error> {
		serde_json::from_str(raw)
	}
}

impl std::fmt::Display for Token {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Token::Erc20 { address } => write!(f, "erc20:{}", checksum(*address)),
			Token::Ether => f.write_str("ether"),
		}
	}
}

/// EIP-55 checksummed rendering of an address.
pub fn checksum(address: H160) -> String {
	to_checksum(&address, None)
}

/// Parses an EVM address from a request, accepting any input casing. The parsed value is
/// rendered back out checksummed wherever it is shown.
pub fn parse_address(raw: &str) -> Result<H160, InvalidAddress> {
	raw.parse::<H160>().map_err(|_| InvalidAddress(raw.to_string()))
}

#[derive(Debug, thiserror::Error)]
#[error("invalid EVM address: {0}")]
pub struct InvalidAddress(pub String);

fn serialize_checksummed<S: Serializer>(address: &H160, serializer: S) -> Result<S::Ok, S::Error> {
	serializer.serialize_str(&checksum(*address))
}

fn deserialize_address<'de, D: Deserializer<'de>>(deserializer: D) -> Result<H160, D::Error> {
	let raw = String::deserialize(deserializer)?;
	parse_address(&raw).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
	use super::*;

	const USDC_BASE: &str = "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913";

	#[test]
	fn wire_round_trip() {
		for token in [Token::Ether, Token::erc20(USDC_BASE.parse().unwrap())] {
			let serialized = serde_json::to_string(&token).unwrap();
			assert_eq!(serde_json::from_str::<Token>(&serialized).unwrap(), token);
		}
	}

	#[test]
	fn wire_form_is_tagged_and_checksummed() {
		let token = Token::erc20(USDC_BASE.to_lowercase().parse().unwrap());
		assert_eq!(
			serde_json::to_string(&token).unwrap(),
			format!(r#"{{"type":"erc20","address":"{USDC_BASE}"}}"#)
		);
		assert_eq!(serde_json::to_string(&Token::Ether).unwrap(), r#"{"type":"ether"}"#);
	}

	#[test]
	fn accepts_lowercase_addresses() {
		let parsed: Token =
			serde_json::from_str(&format!(r#"{{"type":"erc20","address":"{}"}}"#, USDC_BASE.to_lowercase()))
				.unwrap();
		assert_eq!(parsed, Token::erc20(USDC_BASE.parse().unwrap()));
	}

	#[test]
	fn rejects_garbage_addresses() {
		assert!(serde_json::from_str::<Token>(r#"{"type":"erc20","address":"0x1234"}"#).is_err());
		assert!(serde_json::from_str::<Token>(r#"{"type":"wrapped"}"#).is_err());
	}

	#[test]
	fn ether_uses_the_orderbook_sentinel() {
		assert_eq!(
			checksum(Token::Ether.orderbook_address()),
			"0xEeeeeEeeeEeEeeEeEeEeeEEEeeeeEeeeeeeeEEeE"
		);
	}

	#[test]
	fn db_round_trip() {
		for token in [Token::Ether, Token::erc20(USDC_BASE.parse().unwrap())] {
			assert_eq!(Token::from_db_string(&token.to_db_string()).unwrap(), token);
		}
	}
}
