//! Known on-chain event schemas and discriminator utilities.
//!
//! Each schema is a fixed-layout Borsh struct. Decoded events are rendered to
//! JSON for storage, with public keys written as base58 strings.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};
use solana_sdk::pubkey::Pubkey;
use std::fmt;

/// Calculates the 8-byte discriminator for an event type.
///
/// The discriminator is the first 8 bytes of the SHA256 hash of the
/// event name prefixed with "event:".
///
/// # Example
///
/// ```
/// use solana_event_ingestor::calculate_discriminator;
///
/// let discriminator = calculate_discriminator("DepositEvent");
/// assert_eq!(discriminator.len(), 8);
/// ```
#[must_use]
pub fn calculate_discriminator(event_name: &str) -> [u8; 8] {
    let preimage = format!("event:{event_name}");
    let hash = Sha256::digest(preimage.as_bytes());
    let mut discriminator = [0u8; 8];
    discriminator.copy_from_slice(&hash[..8]);
    discriminator
}

/// Implemented by every event schema the registry can decode.
pub trait EventDiscriminator: BorshDeserialize + Serialize {
    /// The event name as emitted by the program.
    const NAME: &'static str;

    #[must_use]
    fn discriminator() -> [u8; 8] {
        calculate_discriminator(Self::NAME)
    }
}

/// A 32-byte account address inside an event payload.
///
/// Borsh-encoded as raw bytes, serialized to JSON as base58.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, BorshSerialize, BorshDeserialize)]
pub struct Address(pub [u8; 32]);

impl Address {
    #[must_use]
    pub fn to_pubkey(&self) -> Pubkey {
        Pubkey::new_from_array(self.0)
    }
}

impl From<Pubkey> for Address {
    fn from(pubkey: Pubkey) -> Self {
        Address(pubkey.to_bytes())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A user deposited underlying tokens into a vault and received shares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, BorshSerialize, BorshDeserialize)]
pub struct DepositEvent {
    pub vault: Address,
    pub user: Address,
    pub amount: u64,
    pub shares_minted: u64,
    /// Unix timestamp
    pub timestamp: i64,
}

impl EventDiscriminator for DepositEvent {
    const NAME: &'static str = "DepositEvent";
}

/// A user burned shares and withdrew underlying tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, BorshSerialize, BorshDeserialize)]
pub struct WithdrawEvent {
    pub vault: Address,
    pub user: Address,
    pub amount: u64,
    pub shares_burned: u64,
    pub timestamp: i64,
}

impl EventDiscriminator for WithdrawEvent {
    const NAME: &'static str = "WithdrawEvent";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, BorshSerialize, BorshDeserialize)]
pub struct HarvestEvent {
    pub vault: Address,
    pub strategy: Address,
    pub profit: u64,
    pub fee: u64,
    pub timestamp: i64,
}

impl EventDiscriminator for HarvestEvent {
    const NAME: &'static str = "HarvestEvent";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, BorshSerialize, BorshDeserialize)]
pub struct FeeCollectedEvent {
    pub vault: Address,
    pub recipient: Address,
    pub amount: u64,
    pub timestamp: i64,
}

impl EventDiscriminator for FeeCollectedEvent {
    const NAME: &'static str = "FeeCollectedEvent";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, BorshSerialize, BorshDeserialize)]
pub struct VaultInitializedEvent {
    pub vault: Address,
    pub authority: Address,
    pub mint: Address,
    /// Performance fee in basis points
    pub fee_bps: u16,
    pub timestamp: i64,
}

impl EventDiscriminator for VaultInitializedEvent {
    const NAME: &'static str = "VaultInitializedEvent";
}
