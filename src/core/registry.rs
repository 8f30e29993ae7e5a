//! Discriminator registry for program-emitted events.
//!
//! The `DecoderRegistry` maps the 8-byte discriminator at the start of a
//! `Program data:` payload to the schema that decodes the rest of it. It is
//! built once at startup and shared read-only afterwards.

use crate::types::events::{
    DepositEvent, EventDiscriminator, FeeCollectedEvent, HarvestEvent, VaultInitializedEvent,
    WithdrawEvent,
};
use crate::utils::error::{IngestorError, Result};
use std::collections::HashMap;

/// Length of an event discriminator in bytes.
pub const DISCRIMINATOR_LEN: usize = 8;

type DecodeFn = fn(&[u8]) -> Result<serde_json::Value>;

struct RegisteredEvent {
    name: &'static str,
    decode: DecodeFn,
}

/// Outcome of decoding a single data payload.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeOutcome {
    /// Fewer than eight bytes, so no discriminator could be read.
    TooShort,
    /// The discriminator is not registered.
    Unknown([u8; DISCRIMINATOR_LEN]),
    /// The payload decoded into a known schema.
    Decoded {
        name: &'static str,
        payload: serde_json::Value,
    },
}

fn decode_as<T: EventDiscriminator>(payload: &[u8]) -> Result<serde_json::Value> {
    // Trailing bytes are tolerated, as Anchor readers do.
    let event = T::deserialize(&mut &payload[..]).map_err(|e| {
        IngestorError::DecodingError(format!("{} payload does not fit schema: {e}", T::NAME))
    })?;
    Ok(serde_json::to_value(&event)?)
}

/// Registry mapping discriminators to event decoders.
pub struct DecoderRegistry {
    decoders: HashMap<[u8; DISCRIMINATOR_LEN], RegisteredEvent>,
}

impl DecoderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Creates a registry holding every event schema this crate knows.
    #[must_use]
    pub fn with_known_events() -> Self {
        let mut registry = Self::new();
        registry.register::<DepositEvent>();
        registry.register::<WithdrawEvent>();
        registry.register::<HarvestEvent>();
        registry.register::<FeeCollectedEvent>();
        registry.register::<VaultInitializedEvent>();
        registry
    }

    /// Registers `T` under its discriminator, replacing any previous entry.
    pub fn register<T: EventDiscriminator>(&mut self) {
        self.decoders.insert(
            T::discriminator(),
            RegisteredEvent {
                name: T::NAME,
                decode: decode_as::<T>,
            },
        );
    }

    /// Returns the event name registered for `discriminator`.
    #[must_use]
    pub fn lookup(&self, discriminator: &[u8; DISCRIMINATOR_LEN]) -> Option<&'static str> {
        self.decoders.get(discriminator).map(|entry| entry.name)
    }

    /// Names of all registered events, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.decoders.values().map(|entry| entry.name).collect();
        names.sort_unstable();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Splits `data` into discriminator and payload and decodes it.
    ///
    /// # Errors
    ///
    /// Returns [`IngestorError::DecodingError`] when the discriminator is
    /// known but the payload does not fit the schema. Short data and unknown
    /// discriminators are reported through [`DecodeOutcome`] instead.
    pub fn decode(&self, data: &[u8]) -> Result<DecodeOutcome> {
        if data.len() < DISCRIMINATOR_LEN {
            return Ok(DecodeOutcome::TooShort);
        }

        let (head, payload) = data.split_at(DISCRIMINATOR_LEN);
        let mut discriminator = [0u8; DISCRIMINATOR_LEN];
        discriminator.copy_from_slice(head);

        match self.decoders.get(&discriminator) {
            Some(entry) => Ok(DecodeOutcome::Decoded {
                name: entry.name,
                payload: (entry.decode)(payload)?,
            }),
            None => Ok(DecodeOutcome::Unknown(discriminator)),
        }
    }
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
