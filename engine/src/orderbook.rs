use async_trait::async_trait;
use ethers::types::{H160, H256, U256};
use serde::{Deserialize, Serialize};

#[cfg(test)]
use mockall::automock;

use crate::chains::SupportedChain;

/// Decimal-string serde for orderbook amounts. The orderbook speaks base-10 strings, while
/// the stock `U256` serde is hex.
pub mod u256_decimal {
	use ethers::types::U256;
	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&value.to_string())
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
		let raw = String::deserialize(deserializer)?;
		U256::from_dec_str(&raw).map_err(serde::de::Error::custom)
	}

	pub mod option {
		use super::*;

		pub fn serialize<S: Serializer>(
			value: &Option<U256>,
			serializer: S,
		) -> Result<S::Ok, S::Error> {
			match value {
				Some(value) => super::serialize(value, serializer),
				None => serializer.serialize_none(),
			}
		}

		pub fn deserialize<'de, D: Deserializer<'de>>(
			deserializer: D,
		) -> Result<Option<U256>, D::Error> {
			Option::<String>::deserialize(deserializer)?
				.map(|raw| U256::from_dec_str(&raw).map_err(serde::de::Error::custom))
				.transpose()
		}
	}
}

/// Orderbook view of a submitted order. The wire form is camelCase; the persisted and
/// reported form is upper snake case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderStatus {
	PresignaturePending,
	Open,
	Fulfilled,
	Cancelled,
	Expired,
}

impl OrderStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			OrderStatus::PresignaturePending => "PRESIGNATURE_PENDING",
			OrderStatus::Open => "OPEN",
			OrderStatus::Fulfilled => "FULFILLED",
			OrderStatus::Cancelled => "CANCELLED",
			OrderStatus::Expired => "EXPIRED",
		}
	}

	pub fn is_terminal(&self) -> bool {
		matches!(self, OrderStatus::Fulfilled | OrderStatus::Cancelled | OrderStatus::Expired)
	}
}

impl std::str::FromStr for OrderStatus {
	type Err = String;

	fn from_str(raw: &str) -> Result<Self, Self::Err> {
		[
			OrderStatus::PresignaturePending,
			OrderStatus::Open,
			OrderStatus::Fulfilled,
			OrderStatus::Cancelled,
			OrderStatus::Expired,
		]
		.into_iter()
		.find(|status| status.as_str() == raw)
		.ok_or_else(|| format!("unknown order status: {raw}"))
	}
}

impl std::fmt::Display for OrderStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A sell quote from the orderbook. Advisory at `/quote` time; the executor re-quotes
/// against the actual deposited amount before signing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderQuote {
	pub quote_id: Option<i64>,
	pub sell_amount: U256,
	pub buy_amount: U256,
	pub fee_amount: U256,
	pub valid_to: u64,
}

/// The signed order payload submitted to the orderbook.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreation {
	pub sell_token: H160,
	pub buy_token: H160,
	pub receiver: H160,
	#[serde(with = "u256_decimal")]
	pub sell_amount: U256,
	#[serde(with = "u256_decimal")]
	pub buy_amount: U256,
	pub valid_to: u32,
	/// Hash of the app-data document, which must have been uploaded beforehand.
	pub app_data: String,
	#[serde(with = "u256_decimal")]
	pub fee_amount: U256,
	pub kind: String,
	pub partially_fillable: bool,
	pub sell_token_balance: String,
	pub buy_token_balance: String,
	pub signing_scheme: String,
	pub signature: String,
	pub from: H160,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusInfo {
	pub status: OrderStatus,
	#[serde(default, with = "u256_decimal::option")]
	pub executed_buy_amount: Option<U256>,
	#[serde(default, with = "u256_decimal::option")]
	pub executed_sell_amount: Option<U256>,
}

/// A fill that has settled on-chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettledTrade {
	pub tx_hash: String,
	pub block_number: u64,
	pub sell_amount: U256,
	pub buy_amount: U256,
}

#[derive(Debug, thiserror::Error)]
pub enum OrderbookError {
	/// The orderbook answered with a non-success status; the upstream message is preserved
	/// verbatim so it can be surfaced to callers.
	#[error("{0}")]
	Rejected(String),
	#[error(transparent)]
	Transport(#[from] reqwest::Error),
	#[error("unexpected orderbook response: {0}")]
	UnexpectedResponse(String),
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait OrderbookApi: Send + Sync + 'static {
	async fn quote(
		&self,
		chain: SupportedChain,
		sell_token: H160,
		buy_token: H160,
		sell_amount: U256,
		from: H160,
	) -> Result<OrderQuote, OrderbookError>;

	/// Idempotent; must succeed before an order referencing `app_data_hash` is submitted.
	async fn upload_app_data(
		&self,
		chain: SupportedChain,
		app_data_hash: H256,
		document: String,
	) -> Result<(), OrderbookError>;

	/// Returns the orderbook-assigned 56-byte order UID.
	async fn submit_order(
		&self,
		chain: SupportedChain,
		order: OrderCreation,
	) -> Result<String, OrderbookError>;

	async fn order_status(
		&self,
		chain: SupportedChain,
		order_uid: &str,
	) -> Result<OrderStatusInfo, OrderbookError>;

	/// Fills for an order, filtered to those already settled on-chain.
	async fn trades(
		&self,
		chain: SupportedChain,
		order_uid: &str,
	) -> Result<Vec<SettledTrade>, OrderbookError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QuoteRequest {
	sell_token: H160,
	buy_token: H160,
	from: H160,
	receiver: H160,
	kind: &'static str,
	#[serde(with = "u256_decimal")]
	sell_amount_before_fee: U256,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteResponse {
	quote: QuoteBody,
	#[serde(default)]
	id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteBody {
	#[serde(with = "u256_decimal")]
	sell_amount: U256,
	#[serde(with = "u256_decimal")]
	buy_amount: U256,
	#[serde(with = "u256_decimal")]
	fee_amount: U256,
	valid_to: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
	#[serde(default)]
	error_type: Option<String>,
	#[serde(default)]
	description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TradeBody {
	#[serde(default)]
	tx_hash: Option<String>,
	#[serde(default)]
	block_number: u64,
	#[serde(with = "u256_decimal")]
	sell_amount: U256,
	#[serde(with = "u256_decimal")]
	buy_amount: U256,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AppDataUpload {
	full_app_data: String,
}

/// Thin typed client for the settlement orderbook's HTTP API.
#[derive(Clone)]
pub struct OrderbookClient {
	client: reqwest::Client,
	base_url: String,
}

impl OrderbookClient {
	pub fn new(base_url: String, timeout: std::time::Duration) -> anyhow::Result<Self> {
		Ok(Self { client: reqwest::Client::builder().timeout(timeout).build()?, base_url })
	}

	fn url(&self, chain: SupportedChain, path: &str) -> String {
		format!(
			"{}/{}/api/v1/{path}",
			self.base_url.trim_end_matches('/'),
			chain.orderbook_network()
		)
	}

	/// Parses a success body, or surfaces the server's error message verbatim.
	async fn parse<T: serde::de::DeserializeOwned>(
		response: reqwest::Response,
	) -> Result<T, OrderbookError> {
		let status = response.status();
		let body = response.text().await?;
		if status.is_success() {
			serde_json::from_str(&body).map_err(|error| {
				OrderbookError::UnexpectedResponse(format!("{error} in body: {body}"))
			})
		} else {
			Err(OrderbookError::Rejected(
				serde_json::from_str::<ErrorBody>(&body)
					.ok()
					.and_then(|error| error.description.or(error.error_type))
					.unwrap_or(body),
			))
		}
	}
}

#[async_trait]
impl OrderbookApi for OrderbookClient {
	async fn quote(
		&self,
		chain: SupportedChain,
		sell_token: H160,
		buy_token: H160,
		sell_amount: U256,
		from: H160,
	) -> Result<OrderQuote, OrderbookError> {
		let response = self
			.client
			.post(self.url(chain, "quote"))
			.json(&QuoteRequest {
				sell_token,
				buy_token,
				from,
				receiver: from,
				kind: "sell",
				sell_amount_before_fee: sell_amount,
			})
			.send()
			.await?;
		let quote: QuoteResponse = Self::parse(response).await?;
		Ok(OrderQuote {
			quote_id: quote.id,
			sell_amount: quote.quote.sell_amount,
			buy_amount: quote.quote.buy_amount,
			fee_amount: quote.quote.fee_amount,
			valid_to: quote.quote.valid_to,
		})
	}

	async fn upload_app_data(
		&self,
		chain: SupportedChain,
		app_data_hash: H256,
		document: String,
	) -> Result<(), OrderbookError> {
		let response = self
			.client
			.put(self.url(chain, &format!("app_data/{app_data_hash:#x}")))
			.json(&AppDataUpload { full_app_data: document })
			.send()
			.await?;
		let status = response.status();
		if status.is_success() {
			Ok(())
		} else {
			let body = response.text().await.unwrap_or_default();
			Err(OrderbookError::Rejected(
				serde_json::from_str::<ErrorBody>(&body)
					.ok()
					.and_then(|error| error.description.or(error.error_type))
					.unwrap_or(body),
			))
		}
	}

	async fn submit_order(
		&self,
		chain: SupportedChain,
		order: OrderCreation,
	) -> Result<String, OrderbookError> {
		let response =
			self.client.post(self.url(chain, "orders")).json(&order).send().await?;
		Self::parse(response).await
	}

	async fn order_status(
		&self,
		chain: SupportedChain,
		order_uid: &str,
	) -> Result<OrderStatusInfo, OrderbookError> {
		let response =
			self.client.get(self.url(chain, &format!("orders/{order_uid}"))).send().await?;
		Self::parse(response).await
	}

	async fn trades(
		&self,
		chain: SupportedChain,
		order_uid: &str,
	) -> Result<Vec<SettledTrade>, OrderbookError> {
		let response = self
			.client
			.get(self.url(chain, "trades"))
			.query(&[("orderUid", order_uid)])
			.send()
			.await?;
		let trades: Vec<TradeBody> = Self::parse(response).await?;
		Ok(trades
			.into_iter()
			.filter_map(|trade| {
				Some(SettledTrade {
					tx_hash: trade.tx_hash?,
					block_number: trade.block_number,
					sell_amount: trade.sell_amount,
					buy_amount: trade.buy_amount,
				})
			})
			.collect())
	}
}
