use serde::{Deserialize, Serialize};
use solana_sdk::{pubkey::Pubkey, signature::Signature};

/// A decoded event ready for storage.
///
/// Unique on `(signature, log_index)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub signature: String,
    /// Position within the transaction. Inner-instruction events use
    /// `100 * (outer + 1) + inner`, log events use `2000 + line`.
    pub log_index: i32,
    pub slot: u64,
    /// Unix seconds, `0` when the provider did not report one.
    pub block_time: i64,
    pub name: String,
    pub payload: serde_json::Value,
}

/// A unit of work for the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTask {
    pub signature: Signature,
    /// The program that led to this signature. Absent for tasks recovered
    /// from storage at startup.
    pub program_id: Option<Pubkey>,
}

impl FetchTask {
    #[must_use]
    pub fn new(signature: Signature, program_id: Pubkey) -> Self {
        Self {
            signature,
            program_id: Some(program_id),
        }
    }

    #[must_use]
    pub fn recovered(signature: Signature) -> Self {
        Self {
            signature,
            program_id: None,
        }
    }
}

/// A signature as returned by `getSignaturesForAddress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureInfo {
    pub signature: Signature,
    pub slot: u64,
    pub block_time: Option<i64>,
}
