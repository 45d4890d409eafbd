use ethers::{
	types::{Bytes, H160, H256},
	utils::keccak256,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
	constants::{APP_CODE, APP_DATA_VERSION, PERMIT_HOOK_GAS_LIMIT},
	token::checksum,
};

/// The app-data document attached to every order. The orderbook stores the full document;
/// the signed order only commits to its keccak256 hash, which is why serialization must be
/// canonical: two logically equal documents must hash identically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppDataDocument {
	pub app_code: String,
	pub metadata: Metadata,
	pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
	pub hooks: Hooks,
	pub order_class: OrderClass,
	pub quote: QuoteMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hooks {
	pub pre: Vec<Hook>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hook {
	pub call_data: String,
	pub gas_limit: String,
	pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderClass {
	pub order_class: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteMetadata {
	pub slippage_bips: u32,
	pub smart_slippage: bool,
}

impl AppDataDocument {
	/// A market-order document whose single pre-hook executes the signed permit against the
	/// sell token, so the solver can move funds without a prior on-chain approval.
	pub fn for_permit_order(sell_token: H160, permit_calldata: &Bytes, slippage_bips: u32) -> Self {
		Self {
			app_code: APP_CODE.to_string(),
			metadata: Metadata {
				hooks: Hooks {
					pre: vec![Hook {
						call_data: format!("{permit_calldata}"),
						gas_limit: PERMIT_HOOK_GAS_LIMIT.to_string(),
						target: checksum(sell_token),
					}],
				},
				order_class: OrderClass { order_class: "market".to_string() },
				quote: QuoteMetadata { slippage_bips, smart_slippage: true },
			},
			version: APP_DATA_VERSION.to_string(),
		}
	}

	/// The canonical byte form of the document.
	pub fn canonical_json(&self) -> String {
		canonical_json(&serde_json::to_value(self).expect("app data documents always serialize"))
	}

	/// keccak256 of the canonical bytes; the `appData` field of the signed order.
	pub fn hash(&self) -> H256 {
		keccak256(self.canonical_json().as_bytes()).into()
	}
}

/// Serializes a JSON value with recursively sorted object keys and no inserted whitespace.
/// This is the byte form the app-data hash commits to, so it must not depend on field
/// declaration order or on serializer defaults.
pub fn canonical_json(value: &Value) -> String {
	let mut out = String::new();
	write_canonical(value, &mut out);
	out
}

fn write_canonical(value: &Value, out: &mut String) {
	match value {
		Value::Object(map) => {
			let mut keys: Vec<&String> = map.keys().collect();
			keys.sort_unstable();
			out.push('{');
			for (position, key) in keys.into_iter().enumerate() {
				if position > 0 {
					out.push(',');
				}
				out.push_str(&Value::String(key.clone()).to_string());
				out.push(':');
				write_canonical(&map[key], out);
			}
			out.push('}');
		},
		Value::Array(values) => {
			out.push('[');
			for (position, value) in values.iter().enumerate() {
				if position > 0 {
					out.push(',');
				}
				write_canonical(value, out);
			}
			out.push(']');
		},
		// Scalars (including string escaping and decimal integers) already have a single
		// compact rendering.
		scalar => out.push_str(&scalar.to_string()),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn test_document() -> AppDataDocument {
		AppDataDocument::for_permit_order(
			"0xcbB7C0000aB88B473b1f5aFd9ef808440eed33Bf".parse().unwrap(),
			&Bytes::from(vec![0xd5, 0x05, 0xac, 0xcf, 0x01, 0x02]),
			57,
		)
	}

	#[test]
	fn canonical_json_sorts_keys_recursively() {
		let value = json!({
			"zebra": {"b": 2, "a": 1},
			"alpha": [{"y": true, "x": null}],
			"mid": "text with \"quotes\"",
		});
		assert_eq!(
			canonical_json(&value),
			r#"{"alpha":[{"x":null,"y":true}],"mid":"text with \"quotes\"","zebra":{"a":1,"b":2}}"#
		);
	}

	#[test]
	fn document_serializes_canonically() {
		let document = test_document();
		assert_eq!(
			document.canonical_json(),
			concat!(
				r#"{"appCode":"cbswap","metadata":{"hooks":{"pre":[{"callData":"0xd505accf0102","#,
				r#""gasLimit":"80000","target":"0xcbB7C0000aB88B473b1f5aFd9ef808440eed33Bf"}]},"#,
				r#""orderClass":{"orderClass":"market"},"quote":{"slippageBips":57,"#,
				r#""smartSlippage":true}},"version":"1.1.0"}"#,
			)
		);
	}

	#[test]
	fn logically_equal_documents_hash_identically() {
		let first = test_document();
		// Rebuilt through a serde round trip, which forgets any in-memory ordering.
		let second: AppDataDocument =
			serde_json::from_str(&serde_json::to_string(&first).unwrap()).unwrap();
		assert_eq!(first.canonical_json(), second.canonical_json());
		assert_eq!(first.hash(), second.hash());
	}

	#[test]
	fn hash_is_keccak_of_canonical_bytes() {
		let document = test_document();
		assert_eq!(
			document.hash(),
			H256::from(keccak256(document.canonical_json().as_bytes()))
		);
		// Different slippage, different document, different hash.
		let other = AppDataDocument {
			metadata: Metadata {
				quote: QuoteMetadata { slippage_bips: 58, smart_slippage: true },
				..document.metadata.clone()
			},
			..document.clone()
		};
		assert_ne!(document.hash(), other.hash());
	}
}
