//! Transaction parsing into ordered events.
//!
//! Two independent passes run over every transaction:
//!
//! - the **log pass** decodes `Program data:` lines through the
//!   [`DecoderRegistry`];
//! - the **inner-instruction pass** decodes token-program inner instructions,
//!   resolving lookup-table accounts through the [`LutCache`] first.
//!
//! Each event gets a `log_index` that is unique within its transaction. The
//! two passes write to disjoint bands so they can never collide.

use crate::core::lut::{LutCache, TableLookup};
use crate::core::registry::{DecodeOutcome, DecoderRegistry};
use crate::core::token::{decode_token_instruction, is_token_program};
use crate::types::models::Event;
use crate::utils::error::{IngestorError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_transaction_status::option_serializer::OptionSerializer;
use solana_transaction_status::{
    EncodedConfirmedTransactionWithStatusMeta, EncodedTransaction, UiInnerInstructions,
    UiInstruction, UiMessage,
};
use std::str::FromStr;
use std::sync::Arc;

/// Prefix of log lines carrying program-emitted event data.
pub const PROGRAM_DATA_PREFIX: &str = "Program data: ";

/// First `log_index` of the log-message band.
pub const LOG_EVENT_INDEX_BASE: i32 = 2000;

/// Width of each outer instruction's slice of the inner band.
pub const INNER_BAND_WIDTH: i32 = 100;

/// `log_index` for the `inner`-th instruction executed inside outer instruction `outer`.
///
/// # Errors
///
/// Fails when the index would leave its band and reach the log band.
pub fn inner_log_index(outer: usize, inner: usize) -> Result<i32> {
    let out_of_band = || {
        IngestorError::DecodingError(format!(
            "inner instruction {outer}.{inner} exceeds the inner event index band"
        ))
    };
    let outer = i32::try_from(outer).map_err(|_| out_of_band())?;
    let inner = i32::try_from(inner).map_err(|_| out_of_band())?;
    if inner >= INNER_BAND_WIDTH {
        return Err(out_of_band());
    }
    let index = INNER_BAND_WIDTH * (outer + 1) + inner;
    if index >= LOG_EVENT_INDEX_BASE {
        return Err(out_of_band());
    }
    Ok(index)
}

/// `log_index` for an event found on log line `line`.
///
/// # Errors
///
/// Fails only if the line number overflows `i32`.
pub fn log_event_index(line: usize) -> Result<i32> {
    i32::try_from(line)
        .ok()
        .and_then(|line| LOG_EVENT_INDEX_BASE.checked_add(line))
        .ok_or_else(|| IngestorError::DecodingError(format!("log line {line} out of range")))
}

/// Account keys of a message before lookup-table resolution.
struct MessageKeys {
    static_keys: Vec<Pubkey>,
    lookups: Vec<TableLookup>,
}

fn parse_key(key: &str) -> Result<Pubkey> {
    Pubkey::from_str(key)
        .map_err(|e| IngestorError::DecodingError(format!("invalid account key '{key}': {e}")))
}

fn message_keys(transaction: &EncodedTransaction) -> Result<MessageKeys> {
    match transaction {
        EncodedTransaction::Json(ui) => match &ui.message {
            UiMessage::Raw(raw) => {
                let static_keys = raw
                    .account_keys
                    .iter()
                    .map(|k| parse_key(k))
                    .collect::<Result<Vec<_>>>()?;
                let lookups = raw
                    .address_table_lookups
                    .iter()
                    .flatten()
                    .map(|lookup| {
                        Ok(TableLookup {
                            table: parse_key(&lookup.account_key)?,
                            writable_indexes: lookup.writable_indexes.clone(),
                            readonly_indexes: lookup.readonly_indexes.clone(),
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(MessageKeys {
                    static_keys,
                    lookups,
                })
            }
            // Parsed messages already list loaded addresses.
            UiMessage::Parsed(parsed) => Ok(MessageKeys {
                static_keys: parsed
                    .account_keys
                    .iter()
                    .map(|account| parse_key(&account.pubkey))
                    .collect::<Result<Vec<_>>>()?,
                lookups: Vec::new(),
            }),
        },
        other => {
            let decoded = other.decode().ok_or_else(|| {
                IngestorError::DecodingError("transaction body could not be decoded".to_string())
            })?;
            let message = &decoded.message;
            Ok(MessageKeys {
                static_keys: message.static_account_keys().to_vec(),
                lookups: message
                    .address_table_lookups()
                    .unwrap_or_default()
                    .iter()
                    .map(|lookup| TableLookup {
                        table: lookup.account_key,
                        writable_indexes: lookup.writable_indexes.clone(),
                        readonly_indexes: lookup.readonly_indexes.clone(),
                    })
                    .collect(),
            })
        }
    }
}

/// Turns raw transactions into [`Event`]s.
///
/// Holds no state of its own beyond the shared registry and lookup-table
/// cache, so parsing the same body twice yields the same events.
pub struct TransactionParser {
    registry: Arc<DecoderRegistry>,
    luts: Arc<LutCache>,
}

impl TransactionParser {
    pub fn new(registry: Arc<DecoderRegistry>, luts: Arc<LutCache>) -> Self {
        Self { registry, luts }
    }

    pub fn registry(&self) -> &DecoderRegistry {
        &self.registry
    }

    /// Parses a stored raw body (JSON-serialized provider response).
    ///
    /// # Errors
    ///
    /// Fails if the body is not valid JSON for a transaction, or as [`Self::parse`].
    pub async fn parse_raw(&self, signature: &Signature, raw: &[u8]) -> Result<Vec<Event>> {
        let transaction: EncodedConfirmedTransactionWithStatusMeta = serde_json::from_slice(raw)?;
        self.parse(signature, &transaction).await
    }

    /// Parses a transaction into events ordered by `log_index`.
    ///
    /// # Errors
    ///
    /// Returns [`IngestorError::DecodingError`] if a known event does not fit
    /// its schema or the message cannot be read, and RPC errors raised while
    /// loading lookup tables.
    #[tracing::instrument(skip_all, fields(signature = %signature))]
    pub async fn parse(
        &self,
        signature: &Signature,
        transaction: &EncodedConfirmedTransactionWithStatusMeta,
    ) -> Result<Vec<Event>> {
        let signature = signature.to_string();
        let slot = transaction.slot;
        let block_time = transaction.block_time.unwrap_or(0);
        let meta = transaction.transaction.meta.as_ref();

        let mut events = Vec::new();

        if let Some(OptionSerializer::Some(logs)) = meta.map(|m| &m.log_messages) {
            events.extend(self.parse_logs(&signature, slot, block_time, logs)?);
        }

        if let Some(OptionSerializer::Some(inner)) = meta.map(|m| &m.inner_instructions) {
            events.extend(
                self.parse_inner_instructions(
                    &signature,
                    slot,
                    block_time,
                    &transaction.transaction.transaction,
                    inner,
                )
                .await?,
            );
        }

        events.sort_by_key(|event| event.log_index);
        Ok(events)
    }

    /// Decodes `Program data:` lines.
    ///
    /// Undecodable base64, short data and unknown discriminators are skipped
    /// with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`IngestorError::DecodingError`] if a known event's payload
    /// does not fit its schema.
    pub fn parse_logs(
        &self,
        signature: &str,
        slot: u64,
        block_time: i64,
        logs: &[String],
    ) -> Result<Vec<Event>> {
        let mut events = Vec::new();

        for (line, log) in logs.iter().enumerate() {
            let Some(encoded) = log.strip_prefix(PROGRAM_DATA_PREFIX) else {
                continue;
            };

            let data = match STANDARD.decode(encoded.trim()) {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!(signature, line, error = %e, "Skipping undecodable program data");
                    continue;
                }
            };

            match self.registry.decode(&data)? {
                DecodeOutcome::TooShort => {
                    tracing::warn!(
                        signature,
                        line,
                        len = data.len(),
                        "Skipping program data shorter than a discriminator"
                    );
                }
                DecodeOutcome::Unknown(discriminator) => {
                    tracing::warn!(
                        signature,
                        line,
                        discriminator = %bs58::encode(discriminator).into_string(),
                        "Skipping unknown event discriminator"
                    );
                }
                DecodeOutcome::Decoded { name, payload } => events.push(Event {
                    signature: signature.to_string(),
                    log_index: log_event_index(line)?,
                    slot,
                    block_time,
                    name: name.to_string(),
                    payload,
                }),
            }
        }

        Ok(events)
    }

    async fn parse_inner_instructions(
        &self,
        signature: &str,
        slot: u64,
        block_time: i64,
        transaction: &EncodedTransaction,
        inner: &[UiInnerInstructions],
    ) -> Result<Vec<Event>> {
        if inner.iter().all(|set| set.instructions.is_empty()) {
            return Ok(Vec::new());
        }

        let keys = message_keys(transaction)?;

        // Invoked programs are always static keys, so tables only need
        // loading when a token instruction is present.
        let touches_token = inner.iter().flat_map(|set| &set.instructions).any(|ix| {
            matches!(ix, UiInstruction::Compiled(c)
                if keys.static_keys.get(c.program_id_index as usize).is_some_and(is_token_program))
        });
        if !touches_token {
            return Ok(Vec::new());
        }

        let mut account_keys = keys.static_keys;
        if !keys.lookups.is_empty() {
            match self.luts.resolve_lookups(&keys.lookups).await {
                Ok(loaded) => {
                    account_keys.extend(loaded.writable);
                    account_keys.extend(loaded.readonly);
                }
                Err(IngestorError::LookupTableError(e)) => {
                    tracing::warn!(signature, error = %e, "Skipping inner instructions");
                    return Ok(Vec::new());
                }
                Err(e) => return Err(e),
            }
        }

        let mut events = Vec::new();

        for set in inner {
            for (position, instruction) in set.instructions.iter().enumerate() {
                let UiInstruction::Compiled(compiled) = instruction else {
                    continue;
                };
                let is_token = account_keys
                    .get(compiled.program_id_index as usize)
                    .is_some_and(is_token_program);
                if !is_token {
                    continue;
                }

                let accounts: Option<Vec<Pubkey>> = compiled
                    .accounts
                    .iter()
                    .map(|&i| account_keys.get(i as usize).copied())
                    .collect();
                let Some(accounts) = accounts else {
                    tracing::warn!(
                        signature,
                        outer = set.index,
                        inner = position,
                        "Skipping token instruction with unresolvable accounts"
                    );
                    continue;
                };

                let Ok(data) = bs58::decode(&compiled.data).into_vec() else {
                    tracing::warn!(signature, outer = set.index, inner = position, "Skipping undecodable instruction data");
                    continue;
                };

                if let Some((name, payload)) = decode_token_instruction(&data, &accounts) {
                    let log_index = match inner_log_index(set.index as usize, position) {
                        Ok(index) => index,
                        Err(e) => {
                            tracing::warn!(
                                signature,
                                outer = set.index,
                                inner = position,
                                error = %e,
                                "Skipping inner event outside its index band"
                            );
                            continue;
                        }
                    };
                    events.push(Event {
                        signature: signature.to_string(),
                        log_index,
                        slot,
                        block_time,
                        name: name.to_string(),
                        payload,
                    });
                }
            }
        }

        Ok(events)
    }
}
