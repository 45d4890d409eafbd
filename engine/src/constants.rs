use ethers::types::H160;
use std::time::Duration;

// ======= Settlement contracts =======

lazy_static::lazy_static! {
	/// GPv2 settlement contract, deployed at the same address on every supported chain.
	pub static ref GPV2_SETTLEMENT: H160 =
		"0x9008D19f58AAbD9eD0D60971565AA8510560ab41".parse().expect("valid settlement address");

	/// GPv2 vault relayer. The permit pre-hook grants this contract the sell token allowance.
	pub static ref GPV2_VAULT_RELAYER: H160 =
		"0xC92E8bdf79f0507f65a392b0ab4667716BFE0110".parse().expect("valid relayer address");

	/// CBBTC is deployed at the same address on Ethereum and Base.
	pub static ref CBBTC_ADDRESS: H160 =
		"0xcbB7C0000aB88B473b1f5aFd9ef808440eed33Bf".parse().expect("valid CBBTC address");

	/// Multicall3, deployed at the same address on every EVM chain we support.
	pub static ref MULTICALL3_ADDRESS: H160 =
		"0xcA11bde05977b3631167028862bE2a173976CA11".parse().expect("valid multicall address");

	/// Marker address the orderbook uses for the native asset on the buy side.
	pub static ref ETHER_SENTINEL: H160 =
		"0xEeeeeEeeeEeEeeEeEeEeeEEEeeeeEeeeeeeeEEeE".parse().expect("valid ether sentinel");
}

// ======= EIP-712 domains =======

pub const CBBTC_PERMIT_DOMAIN_NAME: &str = "Coinbase Wrapped BTC";
pub const CBBTC_PERMIT_DOMAIN_VERSION: &str = "2";

pub const SETTLEMENT_DOMAIN_NAME: &str = "Gnosis Protocol";
pub const SETTLEMENT_DOMAIN_VERSION: &str = "v2";

// ======= App data =======

pub const APP_CODE: &str = "cbswap";
pub const APP_DATA_VERSION: &str = "1.1.0";

/// Gas the solver is told to budget for executing the permit pre-hook.
pub const PERMIT_HOOK_GAS_LIMIT: &str = "80000";

// ======= Order construction =======

/// Submitted orders stay fillable for 24 hours.
pub const ORDER_VALIDITY: Duration = Duration::from_secs(24 * 60 * 60);

// ======= Balance polling =======

/// Number of `balanceOf` subcalls bundled into one multicall request. Kept under common
/// RPC-provider response-size limits.
pub const MULTICALL_BATCH_SIZE: usize = 7_500;

// ======= Settlement tracking =======

pub const SETTLEMENT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// How long an `executing` swap may sit without an order UID before the settlement sweep
/// declares the interrupted submission dead and fails the swap.
pub const EXECUTION_GRACE: Duration = Duration::from_secs(10 * 60);

// ======= Slippage =======

pub const MAX_BPS: u32 = 10_000;

/// Tolerance applied when the slippage endpoint is unavailable.
pub const DEFAULT_SLIPPAGE_BPS: u32 = 50;

pub const SLIPPAGE_CACHE_TTL: Duration = Duration::from_secs(30);
