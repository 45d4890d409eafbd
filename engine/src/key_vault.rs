use ethers::{
	signers::{LocalWallet, Signer},
	types::H160,
	utils::keccak256,
};
use rand::RngCore;
use std::path::Path;
use zeroize::Zeroizing;

use utilities::read_clean_and_decode_hex_str_file;

pub const MASTER_KEY_LEN: usize = 32;
pub const VAULT_SALT_LEN: usize = 32;

/// Per-swap salt. This is the only key material persisted with a swap: together with the
/// process master key it re-derives the vault's signing key on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VaultSalt(pub [u8; VAULT_SALT_LEN]);

impl std::fmt::Display for VaultSalt {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "0x{}", hex::encode(self.0))
	}
}

impl std::str::FromStr for VaultSalt {
	type Err = KeyVaultError;

	fn from_str(raw: &str) -> Result<Self, Self::Err> {
		let bytes = hex::decode(raw.trim_start_matches("0x"))
			.map_err(|_| KeyVaultError::InvalidSalt(raw.to_string()))?;
		Ok(VaultSalt(
			bytes.try_into().map_err(|_| KeyVaultError::InvalidSalt(raw.to_string()))?,
		))
	}
}

/// A derived vault account. The wallet's secret scalar is zeroized when this is dropped; it
/// must never be persisted or logged.
pub struct VaultAccount {
	pub address: H160,
	pub wallet: LocalWallet,
}

pub struct MintedVault {
	pub salt: VaultSalt,
	pub account: VaultAccount,
}

#[derive(Debug, thiserror::Error)]
pub enum KeyVaultError {
	#[error("failed to load master key: {0:#}")]
	MasterKeyUnreadable(anyhow::Error),
	#[error("master key must be exactly {MASTER_KEY_LEN} bytes, got {0}")]
	InvalidMasterKeyLength(usize),
	#[error("invalid vault salt: {0}")]
	InvalidSalt(String),
	#[error("derived key is not a valid secp256k1 secret")]
	InvalidDerivedKey,
}

/// Holds the process master key and derives single-use vault key pairs from it.
///
/// Derivation is `keccak256(master_key ‖ salt)`, so the store only ever needs to hold salts:
/// leaking the database does not leak any vault key.
pub struct KeyVault {
	master_key: Zeroizing<[u8; MASTER_KEY_LEN]>,
}

impl std::fmt::Debug for KeyVault {
	/// Deliberately omits the master key; only `unwrap_err`'s `T: Debug` bound needs this.
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("KeyVault").finish_non_exhaustive()
	}
}

impl KeyVault {
	/// Loads and validates the master key from a file containing 64 hex characters, with or
	/// without a `0x` prefix.
	pub fn from_file(path: &Path) -> Result<Self, KeyVaultError> {
		let bytes = read_clean_and_decode_hex_str_file(path, "master key", |str| {
			hex::decode(str).map_err(anyhow::Error::new)
		})
		.map_err(KeyVaultError::MasterKeyUnreadable)?;

		let len = bytes.len();
		let master_key = Zeroizing::new(
			<[u8; MASTER_KEY_LEN]>::try_from(bytes)
				.map_err(|_| KeyVaultError::InvalidMasterKeyLength(len))?,
		);
		Ok(Self { master_key })
	}

	/// Generates a fresh random salt and derives the vault account for it.
	pub fn mint(&self) -> Result<MintedVault, KeyVaultError> {
		let mut salt = [0u8; VAULT_SALT_LEN];
		rand::thread_rng().fill_bytes(&mut salt);
		let salt = VaultSalt(salt);
		Ok(MintedVault { account: self.derive(&salt)?, salt })
	}

	/// Re-derives the vault account for a salt. Deterministic: the same `(master_key, salt)`
	/// always yields the same key pair.
	pub fn derive(&self, salt: &VaultSalt) -> Result<VaultAccount, KeyVaultError> {
		let mut preimage = Zeroizing::new([0u8; MASTER_KEY_LEN + VAULT_SALT_LEN]);
		preimage[..MASTER_KEY_LEN].copy_from_slice(self.master_key.as_ref());
		preimage[MASTER_KEY_LEN..].copy_from_slice(&salt.0);

		let secret = Zeroizing::new(keccak256(preimage.as_ref()));
		let wallet = LocalWallet::from_bytes(secret.as_ref())
			.map_err(|_| KeyVaultError::InvalidDerivedKey)?;
		Ok(VaultAccount { address: wallet.address(), wallet })
	}
}
