pub mod migrations;

use chrono::Utc;
use ethers::types::{H160, U256};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::{chains::SupportedChain, key_vault::VaultSalt, orderbook::OrderStatus, token::Token};

/// Lifecycle of a swap. A row only ever advances through this machine; every mutation below
/// carries its expected current status in the WHERE clause, so a duplicate delivery affects
/// zero rows instead of corrupting state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SwapStatus {
	PendingDeposit,
	Executing,
	Complete,
	Failed,
	Expired,
	RefundPending,
	Refunded,
}

impl SwapStatus {
	pub const ALL: [SwapStatus; 7] = [
		SwapStatus::PendingDeposit,
		SwapStatus::Executing,
		SwapStatus::Complete,
		SwapStatus::Failed,
		SwapStatus::Expired,
		SwapStatus::RefundPending,
		SwapStatus::Refunded,
	];

	pub fn as_str(&self) -> &'static str {
		match self {
			SwapStatus::PendingDeposit => "pending_deposit",
			SwapStatus::Executing => "executing",
			SwapStatus::Complete => "complete",
			SwapStatus::Failed => "failed",
			SwapStatus::Expired => "expired",
			SwapStatus::RefundPending => "refund_pending",
			SwapStatus::Refunded => "refunded",
		}
	}

	pub fn is_terminal(&self) -> bool {
		matches!(
			self,
			SwapStatus::Complete | SwapStatus::Failed | SwapStatus::Expired | SwapStatus::Refunded
		)
	}
}

impl std::str::FromStr for SwapStatus {
	type Err = String;

	fn from_str(raw: &str) -> Result<Self, Self::Err> {
		Self::ALL
			.into_iter()
			.find(|status| status.as_str() == raw)
			.ok_or_else(|| format!("unknown swap status: {raw}"))
	}
}

impl std::fmt::Display for SwapStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone)]
pub struct SwapRecord {
	pub swap_id: String,
	pub chain: SupportedChain,
	pub vault_address: H160,
	pub vault_salt: VaultSalt,
	pub sell_token: Token,
	pub buy_token: Token,
	pub recipient_address: H160,
	pub refund_address: H160,
	pub status: SwapStatus,
	pub created_at: i64,
	pub expires_at: i64,
	pub updated_at: i64,
	pub deposit_tx_hash: Option<String>,
	pub deposit_amount: Option<U256>,
	pub cow_order_uid: Option<String>,
	pub order_status: Option<OrderStatus>,
	pub settlement_tx_hash: Option<String>,
	pub actual_buy_amount: Option<U256>,
	pub failure_reason: Option<String>,
	pub refund_tx_hash: Option<String>,
	pub refund_amount: Option<U256>,
}

/// Everything the caller supplies when creating a swap; ids, timestamps and the initial
/// status are assigned by the store.
pub struct NewSwap {
	pub chain: SupportedChain,
	pub vault_address: H160,
	pub vault_salt: VaultSalt,
	pub sell_token: Token,
	pub buy_token: Token,
	pub recipient_address: H160,
	pub refund_address: H160,
	pub lifetime: std::time::Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
	#[error(transparent)]
	Sqlite(#[from] rusqlite::Error),
}

const SWAP_COLUMNS: &str = "swap_id, chain_id, vault_address, vault_salt, sell_token, buy_token, \
	recipient_address, refund_address, status, created_at, expires_at, updated_at, \
	deposit_tx_hash, deposit_amount, cow_order_uid, order_status, settlement_tx_hash, \
	actual_buy_amount, failure_reason, refund_tx_hash, refund_amount";

/// Persistent swap records. All status transitions go through here, and each one is gated on
/// the expected current status so that concurrent workers cannot regress a row.
pub struct SwapStore {
	connection: Mutex<Connection>,
}

fn now_millis() -> i64 {
	Utc::now().timestamp_millis()
}

fn corrupt_column(index: usize, error: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
	rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(error))
}

fn swap_from_row(row: &Row) -> rusqlite::Result<SwapRecord> {
	let chain_id: u64 = row.get(1)?;
	let parse_u256 = |index: usize, raw: Option<String>| {
		raw.map(|raw| U256::from_dec_str(&raw).map_err(|error| corrupt_column(index, error)))
			.transpose()
	};

	Ok(SwapRecord {
		swap_id: row.get(0)?,
		chain: SupportedChain::from_id(chain_id).ok_or_else(|| {
			corrupt_column(1, InvalidColumn(format!("unsupported chain id {chain_id}")))
		})?,
		vault_address: row
			.get::<_, String>(2)?
			.parse()
			.map_err(|error| corrupt_column(2, error))?,
		vault_salt: row
			.get::<_, String>(3)?
			.parse()
			.map_err(|error| corrupt_column(3, error))?,
		sell_token: Token::from_db_string(&row.get::<_, String>(4)?)
			.map_err(|error| corrupt_column(4, error))?,
		buy_token: Token::from_db_string(&row.get::<_, String>(5)?)
			.map_err(|error| corrupt_column(5, error))?,
		recipient_address: row
			.get::<_, String>(6)?
			.parse()
			.map_err(|error| corrupt_column(6, error))?,
		refund_address: row
			.get::<_, String>(7)?
			.parse()
			.map_err(|error| corrupt_column(7, error))?,
		status: row
			.get::<_, String>(8)?
			.parse()
			.map_err(|error: String| corrupt_column(8, InvalidColumn(error)))?,
		created_at: row.get(9)?,
		expires_at: row.get(10)?,
		updated_at: row.get(11)?,
		deposit_tx_hash: row.get(12)?,
		deposit_amount: parse_u256(13, row.get(13)?)?,
		cow_order_uid: row.get(14)?,
		order_status: row
			.get::<_, Option<String>>(15)?
			.map(|raw| {
				raw.parse().map_err(|error: String| corrupt_column(15, InvalidColumn(error)))
			})
			.transpose()?,
		settlement_tx_hash: row.get(16)?,
		actual_buy_amount: parse_u256(17, row.get(17)?)?,
		failure_reason: row.get(18)?,
		refund_tx_hash: row.get(19)?,
		refund_amount: parse_u256(20, row.get(20)?)?,
	})
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct InvalidColumn(String);

impl SwapStore {
	/// Opens (or creates) the database and applies any outstanding migrations. Accepts a bare
	/// filesystem path, an `sqlite://` url, or `:memory:`.
	pub fn open(database_url: &str) -> anyhow::Result<Self> {
		let path = database_url.strip_prefix("sqlite://").unwrap_or(database_url);
		let mut connection = if path == ":memory:" {
			Connection::open_in_memory()?
		} else {
			Connection::open(path)?
		};
		connection.pragma_update(None, "journal_mode", "WAL")?;
		migrations::migrate_to_latest(&mut connection)?;
		Ok(Self { connection: Mutex::new(connection) })
	}

	pub fn create(&self, new: NewSwap) -> Result<SwapRecord, StoreError> {
		let now = now_millis();
		let record = SwapRecord {
			swap_id: uuid::Uuid::now_v7().to_string(),
			chain: new.chain,
			vault_address: new.vault_address,
			vault_salt: new.vault_salt,
			sell_token: new.sell_token,
			buy_token: new.buy_token,
			recipient_address: new.recipient_address,
			refund_address: new.refund_address,
			status: SwapStatus::PendingDeposit,
			created_at: now,
			expires_at: now + new.lifetime.as_millis() as i64,
			updated_at: now,
			deposit_tx_hash: None,
			deposit_amount: None,
			cow_order_uid: None,
			order_status: None,
			settlement_tx_hash: None,
			actual_buy_amount: None,
			failure_reason: None,
			refund_tx_hash: None,
			refund_amount: None,
		};

		self.connection.lock().execute(
			"INSERT INTO swaps (swap_id, chain_id, vault_address, vault_salt, sell_token, \
				buy_token, recipient_address, refund_address, status, created_at, expires_at, \
				updated_at) \
			VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
			params![
				record.swap_id,
				record.chain.id(),
				format!("{:#x}", record.vault_address),
				record.vault_salt.to_string(),
				record.sell_token.to_db_string(),
				record.buy_token.to_db_string(),
				format!("{:#x}", record.recipient_address),
				format!("{:#x}", record.refund_address),
				record.status.as_str(),
				record.created_at,
				record.expires_at,
				record.updated_at,
			],
		)?;
		Ok(record)
	}

	pub fn by_id(&self, swap_id: &str) -> Result<Option<SwapRecord>, StoreError> {
		Ok(self
			.connection
			.lock()
			.query_row(
				&format!("SELECT {SWAP_COLUMNS} FROM swaps WHERE swap_id = ?1"),
				[swap_id],
				swap_from_row,
			)
			.optional()?)
	}

	pub fn by_vault(&self, vault_address: H160) -> Result<Option<SwapRecord>, StoreError> {
		Ok(self
			.connection
			.lock()
			.query_row(
				&format!("SELECT {SWAP_COLUMNS} FROM swaps WHERE vault_address = ?1"),
				[format!("{vault_address:#x}")],
				swap_from_row,
			)
			.optional()?)
	}

	/// Swaps still awaiting a deposit on `chain`, excluding any that have already passed
	/// their expiry (the settlement sweep will reap those).
	pub fn pending_by_chain(&self, chain: SupportedChain) -> Result<Vec<SwapRecord>, StoreError> {
		let connection = self.connection.lock();
		let mut statement = connection.prepare(&format!(
			"SELECT {SWAP_COLUMNS} FROM swaps \
			WHERE chain_id = ?1 AND status = 'pending_deposit' AND expires_at > ?2 \
			ORDER BY swap_id"
		))?;
		let swaps = statement
			.query_map(params![chain.id(), now_millis()], swap_from_row)?
			.collect::<rusqlite::Result<Vec<_>>>()?;
		Ok(swaps)
	}

	pub fn executing(&self) -> Result<Vec<SwapRecord>, StoreError> {
		let connection = self.connection.lock();
		let mut statement = connection.prepare(&format!(
			"SELECT {SWAP_COLUMNS} FROM swaps WHERE status = 'executing' ORDER BY swap_id"
		))?;
		let swaps =
			statement.query_map([], swap_from_row)?.collect::<rusqlite::Result<Vec<_>>>()?;
		Ok(swaps)
	}

	/// Records the observed deposit. The depositing transaction hash is not currently
	/// captured by the witnesser, so callers may pass an empty string.
	pub fn record_deposit(
		&self,
		swap_id: &str,
		deposit_tx_hash: &str,
		deposit_amount: U256,
	) -> Result<bool, StoreError> {
		let rows = self.connection.lock().execute(
			"UPDATE swaps SET deposit_tx_hash = ?2, deposit_amount = ?3, updated_at = ?4 \
			WHERE swap_id = ?1 AND status = 'pending_deposit'",
			params![
				swap_id,
				(!deposit_tx_hash.is_empty()).then(|| deposit_tx_hash.to_string()),
				deposit_amount.to_string(),
				now_millis(),
			],
		)?;
		Ok(rows == 1)
	}

	/// Claims a pending swap for execution. Returns false if another worker got there first.
	pub fn mark_executing(&self, swap_id: &str) -> Result<bool, StoreError> {
		let rows = self.connection.lock().execute(
			"UPDATE swaps SET status = 'executing', updated_at = ?2 \
			WHERE swap_id = ?1 AND status = 'pending_deposit'",
			params![swap_id, now_millis()],
		)?;
		Ok(rows == 1)
	}

	pub fn save_order_uid(&self, swap_id: &str, order_uid: &str) -> Result<bool, StoreError> {
		let rows = self.connection.lock().execute(
			"UPDATE swaps SET cow_order_uid = ?2, order_status = ?3, updated_at = ?4 \
			WHERE swap_id = ?1 AND status = 'executing'",
			params![swap_id, order_uid, OrderStatus::Open.as_str(), now_millis()],
		)?;
		Ok(rows == 1)
	}

	pub fn mark_failed(&self, swap_id: &str, reason: &str) -> Result<bool, StoreError> {
		let rows = self.connection.lock().execute(
			"UPDATE swaps SET status = 'failed', failure_reason = ?2, updated_at = ?3 \
			WHERE swap_id = ?1 AND status = 'executing'",
			params![swap_id, reason, now_millis()],
		)?;
		Ok(rows == 1)
	}

	pub fn mark_needs_refund(&self, swap_id: &str, reason: &str) -> Result<bool, StoreError> {
		let rows = self.connection.lock().execute(
			"UPDATE swaps SET status = 'refund_pending', failure_reason = ?2, updated_at = ?3 \
			WHERE swap_id = ?1 AND status = 'executing'",
			params![swap_id, reason, now_millis()],
		)?;
		Ok(rows == 1)
	}

	/// Applies the orderbook's view of the order to the swap. Terminal order states also move
	/// the swap itself: fulfilled completes it, expired/cancelled park it for refund.
	pub fn update_order_status(
		&self,
		swap_id: &str,
		order_status: OrderStatus,
		settlement_tx_hash: Option<&str>,
		actual_buy_amount: Option<U256>,
	) -> Result<bool, StoreError> {
		let (swap_status, failure_reason) = match order_status {
			OrderStatus::Fulfilled => (Some(SwapStatus::Complete), None),
			OrderStatus::Expired =>
				(Some(SwapStatus::RefundPending), Some("order expired without fill")),
			OrderStatus::Cancelled => (Some(SwapStatus::RefundPending), Some("order cancelled")),
			OrderStatus::Open | OrderStatus::PresignaturePending => (None, None),
		};

		let rows = self.connection.lock().execute(
			"UPDATE swaps SET \
				status = COALESCE(?2, status), \
				order_status = ?3, \
				settlement_tx_hash = COALESCE(?4, settlement_tx_hash), \
				actual_buy_amount = COALESCE(?5, actual_buy_amount), \
				failure_reason = COALESCE(?6, failure_reason), \
				updated_at = ?7 \
			WHERE swap_id = ?1 AND status = 'executing'",
			params![
				swap_id,
				swap_status.map(|status| status.as_str()),
				order_status.as_str(),
				settlement_tx_hash,
				actual_buy_amount.map(|amount| amount.to_string()),
				failure_reason,
				now_millis(),
			],
		)?;
		Ok(rows == 1)
	}

	/// Bulk-expires pending swaps whose deposit window has closed. Returns how many rows
	/// moved.
	pub fn expire_overdue(&self) -> Result<usize, StoreError> {
		let now = now_millis();
		let rows = self.connection.lock().execute(
			"UPDATE swaps SET status = 'expired', updated_at = ?1 \
			WHERE status = 'pending_deposit' AND expires_at < ?1",
			params![now],
		)?;
		Ok(rows)
	}

	/// Rewinds a row's `updated_at`, to simulate a swap that has been sitting in a status
	/// for a while.
	#[cfg(test)]
	pub fn backdate_updated_at(&self, swap_id: &str, updated_at: i64) {
		self.connection
			.lock()
			.execute(
				"UPDATE swaps SET updated_at = ?2 WHERE swap_id = ?1",
				params![swap_id, updated_at],
			)
			.unwrap();
	}

	/// Aggregated row counts per (chain, status), for gauge refresh.
	pub fn counts_by_status_and_chain(
		&self,
	) -> Result<Vec<(SupportedChain, SwapStatus, u64)>, StoreError> {
		let connection = self.connection.lock();
		let mut statement = connection
			.prepare("SELECT chain_id, status, COUNT(*) FROM swaps GROUP BY chain_id, status")?;
		let counts = statement
			.query_map([], |row| {
				Ok((row.get::<_, u64>(0)?, row.get::<_, String>(1)?, row.get::<_, u64>(2)?))
			})?
			.collect::<rusqlite::Result<Vec<_>>>()?
			.into_iter()
			.filter_map(|(chain_id, status, count)| {
				Some((SupportedChain::from_id(chain_id)?, status.parse().ok()?, count))
			})
			.collect();
		Ok(counts)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::key_vault::VAULT_SALT_LEN;
	use std::time::Duration;

	fn test_store() -> SwapStore {
		SwapStore::open(":memory:").unwrap()
	}

	fn new_swap(chain: SupportedChain, vault_byte: u8) -> NewSwap {
		NewSwap {
			chain,
			vault_address: H160::from_low_u64_be(vault_byte as u64),
			vault_salt: VaultSalt([vault_byte; VAULT_SALT_LEN]),
			sell_token: Token::erc20(chain.cbbtc()),
			buy_token: Token::Ether,
			recipient_address: H160::from_low_u64_be(0xaa),
			refund_address: H160::from_low_u64_be(0xbb),
			lifetime: Duration::from_secs(3600),
		}
	}

	#[test]
	fn create_and_fetch_round_trip() {
		let store = test_store();
		let created = store.create(new_swap(SupportedChain::Base, 1)).unwrap();

		let fetched = store.by_id(&created.swap_id).unwrap().unwrap();
		assert_eq!(fetched.swap_id, created.swap_id);
		assert_eq!(fetched.chain, SupportedChain::Base);
		assert_eq!(fetched.vault_address, created.vault_address);
		assert_eq!(fetched.vault_salt, created.vault_salt);
		assert_eq!(fetched.buy_token, Token::Ether);
		assert_eq!(fetched.status, SwapStatus::PendingDeposit);
		assert!(fetched.deposit_amount.is_none());

		let by_vault = store.by_vault(created.vault_address).unwrap().unwrap();
		assert_eq!(by_vault.swap_id, created.swap_id);

		assert!(store.by_id("missing").unwrap().is_none());
	}

	#[test]
	fn vault_addresses_are_unique() {
		let store = test_store();
		store.create(new_swap(SupportedChain::Base, 1)).unwrap();
		assert!(store.create(new_swap(SupportedChain::Base, 1)).is_err());
	}

	#[test]
	fn happy_path_transitions() {
		let store = test_store();
		let swap = store.create(new_swap(SupportedChain::Ethereum, 1)).unwrap();

		assert!(store.record_deposit(&swap.swap_id, "", U256::from(10_000)).unwrap());
		assert!(store.mark_executing(&swap.swap_id).unwrap());
		assert!(store.save_order_uid(&swap.swap_id, "0xuid").unwrap());

		let executing = store.executing().unwrap();
		assert_eq!(executing.len(), 1);
		assert_eq!(executing[0].cow_order_uid.as_deref(), Some("0xuid"));
		assert_eq!(executing[0].order_status, Some(OrderStatus::Open));
		assert_eq!(executing[0].deposit_amount, Some(U256::from(10_000)));

		assert!(store
			.update_order_status(
				&swap.swap_id,
				OrderStatus::Fulfilled,
				Some("0xsettlement"),
				Some(U256::from(123_456)),
			)
			.unwrap());

		let complete = store.by_id(&swap.swap_id).unwrap().unwrap();
		assert_eq!(complete.status, SwapStatus::Complete);
		assert_eq!(complete.settlement_tx_hash.as_deref(), Some("0xsettlement"));
		assert_eq!(complete.actual_buy_amount, Some(U256::from(123_456)));
	}

	#[test]
	fn duplicate_mark_executing_affects_zero_rows() {
		let store = test_store();
		let swap = store.create(new_swap(SupportedChain::Base, 1)).unwrap();

		assert!(store.mark_executing(&swap.swap_id).unwrap());
		assert!(!store.mark_executing(&swap.swap_id).unwrap());
	}

	#[test]
	fn terminal_states_cannot_regress() {
		let store = test_store();
		let swap = store.create(new_swap(SupportedChain::Base, 1)).unwrap();
		store.mark_executing(&swap.swap_id).unwrap();
		store.mark_failed(&swap.swap_id, "orderbook rejected").unwrap();

		// Every executing-gated mutation is now a no-op.
		assert!(!store.mark_executing(&swap.swap_id).unwrap());
		assert!(!store.save_order_uid(&swap.swap_id, "0xuid").unwrap());
		assert!(!store.mark_needs_refund(&swap.swap_id, "nope").unwrap());
		assert!(!store
			.update_order_status(&swap.swap_id, OrderStatus::Fulfilled, None, None)
			.unwrap());

		let failed = store.by_id(&swap.swap_id).unwrap().unwrap();
		assert_eq!(failed.status, SwapStatus::Failed);
		assert_eq!(failed.failure_reason.as_deref(), Some("orderbook rejected"));
	}

	#[test]
	fn expired_orders_move_to_refund_pending() {
		let store = test_store();
		let swap = store.create(new_swap(SupportedChain::Base, 1)).unwrap();
		store.mark_executing(&swap.swap_id).unwrap();
		store.save_order_uid(&swap.swap_id, "0xuid").unwrap();

		assert!(store.update_order_status(&swap.swap_id, OrderStatus::Expired, None, None).unwrap());
		let parked = store.by_id(&swap.swap_id).unwrap().unwrap();
		assert_eq!(parked.status, SwapStatus::RefundPending);
		assert_eq!(parked.failure_reason.as_deref(), Some("order expired without fill"));
	}

	#[test]
	fn open_sub_status_updates_do_not_complete() {
		let store = test_store();
		let swap = store.create(new_swap(SupportedChain::Base, 1)).unwrap();
		store.mark_executing(&swap.swap_id).unwrap();
		store.save_order_uid(&swap.swap_id, "0xuid").unwrap();

		assert!(store
			.update_order_status(&swap.swap_id, OrderStatus::PresignaturePending, None, None)
			.unwrap());
		let row = store.by_id(&swap.swap_id).unwrap().unwrap();
		assert_eq!(row.status, SwapStatus::Executing);
		assert_eq!(row.order_status, Some(OrderStatus::PresignaturePending));
	}

	#[test]
	fn expire_overdue_only_reaps_stale_pending_rows() {
		let store = test_store();
		// One millisecond past its window.
		let stale = store
			.create(NewSwap { lifetime: Duration::ZERO, ..new_swap(SupportedChain::Base, 1) })
			.unwrap();
		std::thread::sleep(Duration::from_millis(5));
		let fresh = store.create(new_swap(SupportedChain::Base, 2)).unwrap();
		let executing = store.create(new_swap(SupportedChain::Ethereum, 3)).unwrap();
		store.mark_executing(&executing.swap_id).unwrap();

		assert_eq!(store.expire_overdue().unwrap(), 1);
		assert_eq!(store.by_id(&stale.swap_id).unwrap().unwrap().status, SwapStatus::Expired);
		assert_eq!(
			store.by_id(&fresh.swap_id).unwrap().unwrap().status,
			SwapStatus::PendingDeposit
		);
		assert_eq!(store.by_id(&executing.swap_id).unwrap().unwrap().status, SwapStatus::Executing);

		// Expired rows are excluded from the pending sweep.
		let pending = store.pending_by_chain(SupportedChain::Base).unwrap();
		assert_eq!(pending.len(), 1);
		assert_eq!(pending[0].swap_id, fresh.swap_id);
	}

	#[test]
	fn counts_by_status_and_chain_aggregates() {
		let store = test_store();
		store.create(new_swap(SupportedChain::Base, 1)).unwrap();
		store.create(new_swap(SupportedChain::Base, 2)).unwrap();
		let executing = store.create(new_swap(SupportedChain::Ethereum, 3)).unwrap();
		store.mark_executing(&executing.swap_id).unwrap();

		let mut counts = store.counts_by_status_and_chain().unwrap();
		counts.sort();
		assert_eq!(
			counts,
			vec![
				(SupportedChain::Ethereum, SwapStatus::Executing, 1),
				(SupportedChain::Base, SwapStatus::PendingDeposit, 2),
			]
		);
	}

	#[test]
	fn swap_ids_are_time_ordered() {
		let store = test_store();
		let first = store.create(new_swap(SupportedChain::Base, 1)).unwrap();
		std::thread::sleep(Duration::from_millis(2));
		let second = store.create(new_swap(SupportedChain::Base, 2)).unwrap();
		assert!(second.swap_id > first.swap_id);
	}
}
