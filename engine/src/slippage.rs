use async_trait::async_trait;
use ethers::types::{H160, U256, U512};
use parking_lot::Mutex;
use serde::Deserialize;
use std::{collections::HashMap, time::Instant};
use tracing::warn;

#[cfg(test)]
use mockall::automock;

use crate::{
	chains::SupportedChain,
	constants::{DEFAULT_SLIPPAGE_BPS, MAX_BPS, SLIPPAGE_CACHE_TTL},
};

#[cfg_attr(test, automock)]
#[async_trait]
pub trait SlippageApi: Send + Sync + 'static {
	/// Slippage tolerance in basis points for a market. Infallible: lookup errors fall back
	/// to the default tolerance.
	async fn market_slippage_bps(
		&self,
		chain: SupportedChain,
		sell_token: H160,
		buy_token: H160,
	) -> u32;
}

/// `floor(buy_amount × (10_000 − bps) / 10_000)` in exact integer arithmetic.
pub fn apply_slippage(buy_amount: U256, bps: u32) -> U256 {
	let bps = bps.min(MAX_BPS);
	let scaled = buy_amount.full_mul(U256::from(MAX_BPS - bps)) / U512::from(MAX_BPS);
	U256::try_from(scaled).expect("scaling down cannot overflow")
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SlippageResponse {
	slippage_bps: u32,
}

struct CacheEntry {
	bps: u32,
	fetched_at: Instant,
}

/// Per-market slippage lookup with a short-TTL in-process cache. Only successful responses
/// are cached; errors return the default without poisoning the cache.
pub struct SlippageOracle {
	client: reqwest::Client,
	base_url: String,
	cache: Mutex<HashMap<String, CacheEntry>>,
}

impl SlippageOracle {
	pub fn new(base_url: String, timeout: std::time::Duration) -> anyhow::Result<Self> {
		Ok(Self {
			client: reqwest::Client::builder().timeout(timeout).build()?,
			base_url,
			cache: Mutex::new(HashMap::new()),
		})
	}

	fn market_key(chain: SupportedChain, sell_token: H160, buy_token: H160) -> String {
		// `{:#x}` renders lower-case, which keeps the key casing-insensitive.
		format!("{}:{sell_token:#x}:{buy_token:#x}", chain.id())
	}

	async fn fetch_bps(
		&self,
		chain: SupportedChain,
		sell_token: H160,
		buy_token: H160,
	) -> anyhow::Result<u32> {
		let url = format!(
			"{}/{}/markets/{sell_token:#x}-{buy_token:#x}/slippageTolerance",
			self.base_url.trim_end_matches('/'),
			chain.id(),
		);
		let response: SlippageResponse =
			self.client.get(url).send().await?.error_for_status()?.json().await?;
		Ok(response.slippage_bps)
	}

	fn cached(&self, key: &str) -> Option<u32> {
		self.cache
			.lock()
			.get(key)
			.filter(|entry| entry.fetched_at.elapsed() < SLIPPAGE_CACHE_TTL)
			.map(|entry| entry.bps)
	}

	fn insert(&self, key: String, bps: u32, fetched_at: Instant) {
		self.cache.lock().insert(key, CacheEntry { bps, fetched_at });
	}
}

#[async_trait]
impl SlippageApi for SlippageOracle {
	async fn market_slippage_bps(
		&self,
		chain: SupportedChain,
		sell_token: H160,
		buy_token: H160,
	) -> u32 {
		let key = Self::market_key(chain, sell_token, buy_token);
		if let Some(bps) = self.cached(&key) {
			return bps;
		}

		match self.fetch_bps(chain, sell_token, buy_token).await {
			Ok(bps) => {
				self.insert(key, bps, Instant::now());
				bps
			},
			Err(error) => {
				warn!(
					"Slippage lookup for {key} failed, using default of {DEFAULT_SLIPPAGE_BPS} bps: {error:#}"
				);
				DEFAULT_SLIPPAGE_BPS
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;

	fn test_oracle() -> SlippageOracle {
		// Unroutable endpoint: every fetch fails fast, so only the cache can answer.
		SlippageOracle::new("http://127.0.0.1:1".to_string(), Duration::from_millis(100)).unwrap()
	}

	#[test]
	fn apply_slippage_floors_exactly() {
		assert_eq!(apply_slippage(U256::from(10_000), 50), U256::from(9_950));
		// 8312099 × 9943 / 10000 = 8264720.0357 → floored.
		assert_eq!(apply_slippage(U256::from(8_312_099), 57), U256::from(8_264_720));
		assert_eq!(apply_slippage(U256::from(9_999), 1), U256::from(9_998));
		assert_eq!(apply_slippage(U256::from(1), 50), U256::zero());
		assert_eq!(apply_slippage(U256::zero(), 50), U256::zero());
		// A tolerance above 100% clamps rather than underflowing.
		assert_eq!(apply_slippage(U256::from(10_000), 20_000), U256::zero());
	}

	#[test]
	fn apply_slippage_does_not_overflow_on_max_amounts() {
		assert_eq!(apply_slippage(U256::MAX, 0), U256::MAX);
		let expected = U256::MAX.full_mul(U256::from(9_950u32)) / U512::from(10_000u32);
		assert_eq!(apply_slippage(U256::MAX, 50), U256::try_from(expected).unwrap());
	}

	#[tokio::test]
	async fn unreachable_endpoint_falls_back_to_default() {
		let oracle = test_oracle();
		let bps = oracle
			.market_slippage_bps(SupportedChain::Base, H160::repeat_byte(1), H160::repeat_byte(2))
			.await;
		assert_eq!(bps, DEFAULT_SLIPPAGE_BPS);
	}

	#[tokio::test]
	async fn fresh_cache_entries_short_circuit_the_network() {
		let oracle = test_oracle();
		let (sell, buy) = (H160::repeat_byte(1), H160::repeat_byte(2));
		let key = SlippageOracle::market_key(SupportedChain::Base, sell, buy);

		oracle.insert(key, 72, Instant::now());
		assert_eq!(oracle.market_slippage_bps(SupportedChain::Base, sell, buy).await, 72);
	}

	#[tokio::test]
	async fn stale_cache_entries_are_ignored() {
		let oracle = test_oracle();
		let (sell, buy) = (H160::repeat_byte(1), H160::repeat_byte(2));
		let key = SlippageOracle::market_key(SupportedChain::Base, sell, buy);

		oracle.insert(key, 72, Instant::now() - (SLIPPAGE_CACHE_TTL + Duration::from_secs(1)));
		// Entry is past its TTL, the refetch fails, so we get the default.
		assert_eq!(
			oracle.market_slippage_bps(SupportedChain::Base, sell, buy).await,
			DEFAULT_SLIPPAGE_BPS
		);
	}

	#[test]
	fn market_keys_are_stable_and_lower_case() {
		let key = SlippageOracle::market_key(
			SupportedChain::Base,
			"0xcbB7C0000aB88B473b1f5aFd9ef808440eed33Bf".parse().unwrap(),
			"0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913".parse().unwrap(),
		);
		assert_eq!(
			key,
			"8453:0xcbb7c0000ab88b473b1f5afd9ef808440eed33bf:0x833589fcd6edb6e08f4c7c32d4f71b54bda02913"
		);
	}
}
