use ethers::types::H160;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::CBBTC_ADDRESS;

/// The closed set of EVM chains swaps can originate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SupportedChain {
	Ethereum,
	Base,
}

impl SupportedChain {
	pub const ALL: [SupportedChain; 2] = [SupportedChain::Ethereum, SupportedChain::Base];

	pub fn id(&self) -> u64 {
		match self {
			SupportedChain::Ethereum => 1,
			SupportedChain::Base => 8453,
		}
	}

	pub fn from_id(chain_id: u64) -> Option<Self> {
		Self::ALL.into_iter().find(|chain| chain.id() == chain_id)
	}

	pub fn name(&self) -> &'static str {
		match self {
			SupportedChain::Ethereum => "Ethereum",
			SupportedChain::Base => "Base",
		}
	}

	/// Network segment of the orderbook API url.
	pub fn orderbook_network(&self) -> &'static str {
		match self {
			SupportedChain::Ethereum => "mainnet",
			SupportedChain::Base => "base",
		}
	}

	/// The sell asset is CBBTC everywhere; it happens to live at the same address on both
	/// supported chains.
	pub fn cbbtc(&self) -> H160 {
		*CBBTC_ADDRESS
	}

	/// How often the deposit witnesser sweeps this chain's pending vaults.
	pub fn polling_interval(&self) -> Duration {
		match self {
			SupportedChain::Ethereum => Duration::from_secs(24),
			SupportedChain::Base => Duration::from_secs(10),
		}
	}
}

impl std::fmt::Display for SupportedChain {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.name())
	}
}
