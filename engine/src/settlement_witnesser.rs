use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use utilities::make_periodic_tick;

use crate::{
	constants::{EXECUTION_GRACE, SETTLEMENT_POLL_INTERVAL},
	metrics,
	orderbook::{OrderStatus, OrderbookApi},
	store::{SwapRecord, SwapStore},
};

/// Process-wide loop that advances executing swaps to their terminal state, reaps expired
/// deposits and keeps the status gauges fresh.
pub struct SettlementWitnesser<Orderbook> {
	store: Arc<SwapStore>,
	orderbook: Arc<Orderbook>,
}

impl<Orderbook: OrderbookApi> SettlementWitnesser<Orderbook> {
	pub fn new(store: Arc<SwapStore>, orderbook: Arc<Orderbook>) -> Self {
		Self { store, orderbook }
	}

	pub async fn run(self, mut shutdown: watch::Receiver<()>) {
		info!("Starting settlement witnesser");
		let mut poll_interval = make_periodic_tick(SETTLEMENT_POLL_INTERVAL, true);

		loop {
			tokio::select! {
				_ = shutdown.changed() => break,
				_ = poll_interval.tick() => {},
			}

			if let Err(error) = self.tick_once().await {
				warn!("settlement witnesser tick failed: {error:#}");
				metrics::POLLER_ERRORS.with_label_values(&["settlement", "all"]).inc();
			}
		}
		info!("Settlement witnesser stopped");
	}

	pub async fn tick_once(&self) -> Result<()> {
		use futures::StreamExt;

		const MAX_CONCURRENT_STATUS_CHECKS: usize = 10;

		let expired = self.store.expire_overdue()?;
		if expired > 0 {
			info!("Expired {expired} swaps that never received a deposit");
		}

		metrics::refresh_status_gauges(&self.store.counts_by_status_and_chain()?);

		futures::stream::iter(self.store.executing()?)
			.for_each_concurrent(MAX_CONCURRENT_STATUS_CHECKS, |swap| async move {
				if let Err(error) = self.advance_swap(&swap).await {
					warn!(swap_id = %swap.swap_id, "failed to advance swap: {error:#}");
					metrics::POLLER_ERRORS
						.with_label_values(&["settlement", swap.chain.name()])
						.inc();
				}
			})
			.await;
		Ok(())
	}

	async fn advance_swap(&self, swap: &SwapRecord) -> Result<()> {
		let Some(order_uid) = &swap.cow_order_uid else {
			// Submission died between claiming the swap and persisting the UID. There is
			// nothing to track, so after a grace period the swap is declared failed; the
			// vault still holds the deposit for operator recovery.
			let stuck_for = Utc::now().timestamp_millis() - swap.updated_at;
			if stuck_for > EXECUTION_GRACE.as_millis() as i64 {
				warn!(
					swap_id = %swap.swap_id,
					"executing swap has had no order uid for {stuck_for}ms, failing it"
				);
				self.store.mark_failed(&swap.swap_id, "order submission did not complete")?;
			}
			return Ok(());
		};

		let status_info = self.orderbook.order_status(swap.chain, order_uid).await?;
		match status_info.status {
			OrderStatus::Fulfilled => {
				let trades = self.orderbook.trades(swap.chain, order_uid).await?;
				let settled = trades
					.first()
					.context("orderbook reports the order fulfilled but lists no settled trades")?;
				let actual_buy_amount = status_info
					.executed_buy_amount
					.unwrap_or(settled.buy_amount);

				if self.store.update_order_status(
					&swap.swap_id,
					OrderStatus::Fulfilled,
					Some(&settled.tx_hash),
					Some(actual_buy_amount),
				)? {
					let elapsed_seconds =
						(Utc::now().timestamp_millis() - swap.created_at) as f64 / 1000.0;
					metrics::SWAP_COMPLETION_SECONDS.observe(elapsed_seconds);
					info!(
						swap_id = %swap.swap_id,
						settlement_tx = %settled.tx_hash,
						"swap complete, bought {actual_buy_amount} in {elapsed_seconds:.0}s"
					);
				}
			},
			OrderStatus::Expired | OrderStatus::Cancelled => {
				self.store.update_order_status(&swap.swap_id, status_info.status, None, None)?;
				warn!(
					swap_id = %swap.swap_id,
					"order {} {}, swap parked for refund",
					order_uid,
					status_info.status,
				);
			},
			OrderStatus::Open | OrderStatus::PresignaturePending => {
				// Only persist sub-status changes, to avoid churning `updated_at`.
				if swap.order_status != Some(status_info.status) {
					self.store.update_order_status(
						&swap.swap_id,
						status_info.status,
						None,
						None,
					)?;
				}
			},
		}
		Ok(())
	}
}
