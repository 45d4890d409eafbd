pub mod api;
pub mod chains;
pub mod constants;
pub mod deposit_witnesser;
pub mod evm;
pub mod key_vault;
pub mod metrics;
pub mod order;
pub mod orderbook;
pub mod settings;
pub mod settlement_witnesser;
pub mod slippage;
pub mod store;
pub mod swap_executor;
pub mod token;
