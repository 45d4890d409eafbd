use chrono::Utc;
use ethers::types::{H160, U256};
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, sync::Arc, time::Duration};
use warp::{http::StatusCode, Filter, Rejection, Reply};

use crate::{
	chains::SupportedChain,
	key_vault::KeyVault,
	metrics,
	orderbook::{OrderQuote, OrderbookApi},
	store::{NewSwap, SwapRecord, SwapStore},
	token::{checksum, parse_address, Token},
};

pub struct ApiContext<Orderbook> {
	pub store: Arc<SwapStore>,
	pub key_vault: Arc<KeyVault>,
	pub orderbook: Arc<Orderbook>,
	pub swap_lifetime: Duration,
}

impl<Orderbook> Clone for ApiContext<Orderbook> {
	fn clone(&self) -> Self {
		Self {
			store: self.store.clone(),
			key_vault: self.key_vault.clone(),
			orderbook: self.orderbook.clone(),
			swap_lifetime: self.swap_lifetime,
		}
	}
}

#[derive(Debug)]
struct ApiError {
	status: StatusCode,
	message: String,
}

impl warp::reject::Reject for ApiError {}

fn bad_request(message: impl Into<String>) -> Rejection {
	warp::reject::custom(ApiError { status: StatusCode::BAD_REQUEST, message: message.into() })
}

fn not_found(message: impl Into<String>) -> Rejection {
	warp::reject::custom(ApiError { status: StatusCode::NOT_FOUND, message: message.into() })
}

fn internal_error(error: impl std::fmt::Display) -> Rejection {
	tracing::error!("internal error serving request: {error}");
	warp::reject::custom(ApiError {
		status: StatusCode::INTERNAL_SERVER_ERROR,
		message: "internal error".to_string(),
	})
}

#[derive(Serialize)]
struct HealthResponse {
	status: &'static str,
	timestamp: i64,
}

#[derive(Serialize)]
struct ErrorResponse {
	error: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteRequestBody {
	chain_id: u64,
	buy_token: Token,
	sell_amount: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QuoteResponseBody {
	can_fill: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	quote: Option<QuoteFields>,
	#[serde(skip_serializing_if = "Option::is_none")]
	message: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QuoteFields {
	#[serde(skip_serializing_if = "Option::is_none")]
	quote_id: Option<i64>,
	sell_amount: String,
	buy_amount: String,
	fee_amount: String,
	valid_to: u64,
}

impl From<OrderQuote> for QuoteFields {
	fn from(quote: OrderQuote) -> Self {
		Self {
			quote_id: quote.quote_id,
			sell_amount: quote.sell_amount.to_string(),
			buy_amount: quote.buy_amount.to_string(),
			fee_amount: quote.fee_amount.to_string(),
			valid_to: quote.valid_to,
		}
	}
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSwapRequestBody {
	chain_id: u64,
	buy_token: Token,
	recipient_address: String,
	refund_address: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SwapResponse {
	swap_id: String,
	chain_id: u64,
	vault_address: String,
	sell_token: Token,
	buy_token: Token,
	recipient_address: String,
	refund_address: String,
	status: &'static str,
	created_at: i64,
	expires_at: i64,
	updated_at: i64,
	#[serde(skip_serializing_if = "Option::is_none")]
	deposit_tx_hash: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	deposit_amount: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	order_uid: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	order_status: Option<&'static str>,
	#[serde(skip_serializing_if = "Option::is_none")]
	settlement_tx_hash: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	actual_buy_amount: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	failure_reason: Option<String>,
}

impl From<SwapRecord> for SwapResponse {
	fn from(swap: SwapRecord) -> Self {
		Self {
			swap_id: swap.swap_id,
			chain_id: swap.chain.id(),
			vault_address: checksum(swap.vault_address),
			sell_token: swap.sell_token,
			buy_token: swap.buy_token,
			recipient_address: checksum(swap.recipient_address),
			refund_address: checksum(swap.refund_address),
			status: swap.status.as_str(),
			created_at: swap.created_at,
			expires_at: swap.expires_at,
			updated_at: swap.updated_at,
			deposit_tx_hash: swap.deposit_tx_hash,
			deposit_amount: swap.deposit_amount.map(|amount| amount.to_string()),
			order_uid: swap.cow_order_uid,
			order_status: swap.order_status.map(|status| status.as_str()),
			settlement_tx_hash: swap.settlement_tx_hash,
			actual_buy_amount: swap.actual_buy_amount.map(|amount| amount.to_string()),
			failure_reason: swap.failure_reason,
		}
	}
}

/// The public API: health, advisory quotes, swap creation and status, and the Prometheus
/// exposition.
pub fn routes<Orderbook: OrderbookApi>(
	context: ApiContext<Orderbook>,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
	let with_context = {
		let context = context.clone();
		warp::any().map(move || context.clone())
	};

	let health = warp::get().and(warp::path("health")).and(warp::path::end()).map(|| {
		warp::reply::json(&HealthResponse {
			status: "ok",
			timestamp: Utc::now().timestamp_millis(),
		})
	});

	let metrics_route = warp::get()
		.and(warp::path("metrics"))
		.and(warp::path::end())
		.map(metrics::gather);

	let quote = warp::post()
		.and(warp::path("quote"))
		.and(warp::path::end())
		.and(warp::body::json())
		.and(with_context.clone())
		.and_then(handle_quote);

	let create_swap = warp::post()
		.and(warp::path("swap"))
		.and(warp::path::end())
		.and(warp::body::json())
		.and(with_context.clone())
		.and_then(handle_create_swap);

	let swap_status = warp::get()
		.and(warp::path("swap"))
		.and(warp::path::param::<String>())
		.and(warp::path::end())
		.and(with_context)
		.and_then(handle_swap_status);

	health
		.or(metrics_route)
		.or(quote)
		.or(create_swap)
		.or(swap_status)
		.recover(handle_rejection)
}

fn supported_chain(chain_id: u64) -> Result<SupportedChain, Rejection> {
	SupportedChain::from_id(chain_id)
		.ok_or_else(|| bad_request(format!("unsupported chain id: {chain_id}")))
}

async fn handle_quote<Orderbook: OrderbookApi>(
	body: QuoteRequestBody,
	context: ApiContext<Orderbook>,
) -> Result<warp::reply::WithStatus<warp::reply::Json>, Rejection> {
	let chain = supported_chain(body.chain_id)?;
	let sell_amount = U256::from_dec_str(&body.sell_amount)
		.map_err(|_| bad_request(format!("invalid sell amount: {}", body.sell_amount)))?;

	// Advisory only: the executor re-quotes with the vault as taker once funds land.
	match context
		.orderbook
		.quote(
			chain,
			chain.cbbtc(),
			body.buy_token.orderbook_address(),
			sell_amount,
			H160::zero(),
		)
		.await
	{
		Ok(quote) => Ok(warp::reply::with_status(
			warp::reply::json(&QuoteResponseBody {
				can_fill: true,
				quote: Some(quote.into()),
				message: None,
			}),
			StatusCode::OK,
		)),
		Err(error) => Ok(warp::reply::with_status(
			warp::reply::json(&QuoteResponseBody {
				can_fill: false,
				quote: None,
				message: Some(error.to_string()),
			}),
			StatusCode::BAD_REQUEST,
		)),
	}
}

async fn handle_create_swap<Orderbook: OrderbookApi>(
	body: CreateSwapRequestBody,
	context: ApiContext<Orderbook>,
) -> Result<warp::reply::WithStatus<warp::reply::Json>, Rejection> {
	let chain = supported_chain(body.chain_id)?;
	let recipient_address = parse_address(&body.recipient_address)
		.map_err(|error| bad_request(error.to_string()))?;
	let refund_address =
		parse_address(&body.refund_address).map_err(|error| bad_request(error.to_string()))?;

	let minted = context.key_vault.mint().map_err(internal_error)?;
	let record = context
		.store
		.create(NewSwap {
			chain,
			vault_address: minted.account.address,
			vault_salt: minted.salt,
			sell_token: Token::erc20(chain.cbbtc()),
			buy_token: body.buy_token,
			recipient_address,
			refund_address,
			lifetime: context.swap_lifetime,
		})
		.map_err(internal_error)?;

	tracing::info!(
		swap_id = %record.swap_id,
		vault = %checksum(record.vault_address),
		"created swap on {chain}"
	);
	Ok(warp::reply::with_status(
		warp::reply::json(&SwapResponse::from(record)),
		StatusCode::CREATED,
	))
}

async fn handle_swap_status<Orderbook: OrderbookApi>(
	swap_id: String,
	context: ApiContext<Orderbook>,
) -> Result<warp::reply::WithStatus<warp::reply::Json>, Rejection> {
	let swap = context
		.store
		.by_id(&swap_id)
		.map_err(internal_error)?
		.ok_or_else(|| not_found(format!("no swap with id {swap_id}")))?;
	Ok(warp::reply::with_status(
		warp::reply::json(&SwapResponse::from(swap)),
		StatusCode::OK,
	))
}

async fn handle_rejection(rejection: Rejection) -> Result<impl Reply, Infallible> {
	let (status, message) = if let Some(error) = rejection.find::<ApiError>() {
		(error.status, error.message.clone())
	} else if rejection.find::<warp::filters::body::BodyDeserializeError>().is_some() {
		(StatusCode::UNPROCESSABLE_ENTITY, "invalid request body".to_string())
	} else if rejection.is_not_found() {
		(StatusCode::NOT_FOUND, "not found".to_string())
	} else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
		(StatusCode::METHOD_NOT_ALLOWED, "method not allowed".to_string())
	} else {
		tracing::error!("unhandled rejection: {rejection:?}");
		(StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
	};

	Ok(warp::reply::with_status(
		warp::reply::json(&ErrorResponse { error: message }),
		status,
	))
}
