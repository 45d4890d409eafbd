//! Prometheus metrics for the swap engine, served from the public API's `/metrics` route.

use lazy_static::lazy_static;
use prometheus::{
	Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry,
};

use crate::{chains::SupportedChain, store::SwapStatus};

lazy_static! {
	static ref REGISTRY: Registry = Registry::new();

	pub static ref SWAP_STATUS_GAUGE: IntGaugeVec = IntGaugeVec::new(
		Opts::new("swap_status_count", "Number of swaps by chain and status"),
		&["chain", "status"]
	)
	.expect("Metric successfully created");

	pub static ref POLLER_ERRORS: IntCounterVec = IntCounterVec::new(
		Opts::new("poller_errors_total", "Failed poller iterations"),
		&["poller", "chain"]
	)
	.expect("Metric successfully created");

	pub static ref ORDERS_SUBMITTED: IntCounter =
		IntCounter::new("orders_submitted_total", "Orders submitted to the orderbook")
			.expect("Metric successfully created");

	pub static ref SWAPS_FAILED: IntCounter =
		IntCounter::new("swaps_failed_total", "Swaps that failed during execution")
			.expect("Metric successfully created");

	pub static ref SWAP_COMPLETION_SECONDS: Histogram = Histogram::with_opts(
		HistogramOpts::new("swap_completion_seconds", "Time from swap creation to settlement")
			.buckets(vec![15.0, 30.0, 60.0, 120.0, 300.0, 900.0, 3600.0, 86400.0])
	)
	.expect("Metric successfully created");
}

pub fn register_metrics() {
	REGISTRY
		.register(Box::new(SWAP_STATUS_GAUGE.clone()))
		.expect("Metric successfully registered");
	REGISTRY
		.register(Box::new(POLLER_ERRORS.clone()))
		.expect("Metric successfully registered");
	REGISTRY
		.register(Box::new(ORDERS_SUBMITTED.clone()))
		.expect("Metric successfully registered");
	REGISTRY.register(Box::new(SWAPS_FAILED.clone())).expect("Metric successfully registered");
	REGISTRY
		.register(Box::new(SWAP_COMPLETION_SECONDS.clone()))
		.expect("Metric successfully registered");
}

/// Rewrites the status gauges from an aggregated count snapshot. Combinations absent from
/// the snapshot are zeroed so gauges do not go stale when the last row leaves a status.
pub fn refresh_status_gauges(counts: &[(SupportedChain, SwapStatus, u64)]) {
	for chain in SupportedChain::ALL {
		for status in SwapStatus::ALL {
			SWAP_STATUS_GAUGE.with_label_values(&[chain.name(), status.as_str()]).set(0);
		}
	}
	for (chain, status, count) in counts {
		SWAP_STATUS_GAUGE
			.with_label_values(&[chain.name(), status.as_str()])
			.set(*count as i64);
	}
}

/// Prometheus text exposition of everything registered.
pub fn gather() -> String {
	use prometheus::Encoder;
	let encoder = prometheus::TextEncoder::new();

	let mut buffer = Vec::new();
	if let Err(error) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
		tracing::error!("could not encode metrics: {error}");
	};
	String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn refresh_zeroes_absent_combinations() {
		refresh_status_gauges(&[
			(SupportedChain::Base, SwapStatus::PendingDeposit, 3),
			(SupportedChain::Ethereum, SwapStatus::Complete, 7),
		]);
		assert_eq!(
			SWAP_STATUS_GAUGE.with_label_values(&["Base", "pending_deposit"]).get(),
			3
		);
		assert_eq!(SWAP_STATUS_GAUGE.with_label_values(&["Ethereum", "complete"]).get(), 7);
		assert_eq!(SWAP_STATUS_GAUGE.with_label_values(&["Ethereum", "failed"]).get(), 0);

		// A later snapshot without those rows resets them.
		refresh_status_gauges(&[]);
		assert_eq!(
			SWAP_STATUS_GAUGE.with_label_values(&["Base", "pending_deposit"]).get(),
			0
		);
	}
}
