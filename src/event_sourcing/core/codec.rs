use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::event::DomainEvent;

// ============================================================================
// Event Codec - Type-Tagged Payload Serialization
// ============================================================================
//
// Storage never sees domain types. A payload is stored as
// `{ type_tag, schema_version, payload bytes }` and rehydrated through a
// registry that maps each tag to a decode fn. Payloads written by an older
// schema revision are walked forward one version at a time by upcasters
// before decoding, so old shapes stay readable.
//
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SerializedEvent {
    pub type_tag: String,
    pub schema_version: u32,
    pub payload: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("unknown event type tag: {0}")]
    UnknownType(String),

    #[error("event serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("upcasting '{type_tag}' from schema v{from_version} failed: {reason}")]
    Upcast {
        type_tag: String,
        from_version: u32,
        reason: String,
    },

    #[error("'{type_tag}' has schema v{found}, newest supported is v{supported}")]
    UnsupportedVersion {
        type_tag: String,
        found: u32,
        supported: u32,
    },
}

/// Rewrites a payload written at `from_version` into the shape of
/// `from_version + 1`.
pub trait EventUpcaster: Send + Sync {
    fn upcast(&self, from_version: u32, payload: Value) -> Result<Value, String>;
}

impl<F> EventUpcaster for F
where
    F: Fn(u32, Value) -> Result<Value, String> + Send + Sync,
{
    fn upcast(&self, from_version: u32, payload: Value) -> Result<Value, String> {
        self(from_version, payload)
    }
}

pub type DecodeFn<E> = fn(Value) -> Result<E, serde_json::Error>;

struct Registration<E> {
    decode: DecodeFn<E>,
    upcasters: BTreeMap<u32, Box<dyn EventUpcaster>>,
}

/// Maps type tags to decoders for one event type `E`.
pub struct EventTypeRegistry<E> {
    entries: HashMap<String, Registration<E>>,
}

impl<E: DomainEvent> EventTypeRegistry<E> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Registry with every tag `E` declares, decoded with serde.
    pub fn for_domain() -> Self {
        E::event_types()
            .iter()
            .fold(Self::new(), |registry, tag| registry.register(tag))
    }

    pub fn register(self, type_tag: &str) -> Self {
        self.register_with_decoder(type_tag, serde_json::from_value::<E>)
    }

    pub fn register_with_decoder(mut self, type_tag: &str, decode: DecodeFn<E>) -> Self {
        self.entries.insert(
            type_tag.to_string(),
            Registration {
                decode,
                upcasters: BTreeMap::new(),
            },
        );
        self
    }

    /// Attach an upcaster for payloads of `type_tag` stored at `from_version`.
    /// Registers the tag if it was not registered yet.
    pub fn with_upcaster(
        mut self,
        type_tag: &str,
        from_version: u32,
        upcaster: impl EventUpcaster + 'static,
    ) -> Self {
        self.entries
            .entry(type_tag.to_string())
            .or_insert_with(|| Registration {
                decode: serde_json::from_value::<E>,
                upcasters: BTreeMap::new(),
            })
            .upcasters
            .insert(from_version, Box::new(upcaster));
        self
    }

    pub fn knows(&self, type_tag: &str) -> bool {
        self.entries.contains_key(type_tag)
    }

    pub fn encode(&self, event: &E) -> Result<SerializedEvent, CodecError> {
        let type_tag = event.event_type();
        if !self.knows(type_tag) {
            return Err(CodecError::UnknownType(type_tag.to_string()));
        }

        Ok(SerializedEvent {
            type_tag: type_tag.to_string(),
            schema_version: E::schema_version(),
            payload: serde_json::to_vec(event)?,
        })
    }

    pub fn decode(&self, stored: &SerializedEvent) -> Result<E, CodecError> {
        let registration = self
            .entries
            .get(&stored.type_tag)
            .ok_or_else(|| CodecError::UnknownType(stored.type_tag.clone()))?;

        let current = E::schema_version();
        if stored.schema_version > current {
            return Err(CodecError::UnsupportedVersion {
                type_tag: stored.type_tag.clone(),
                found: stored.schema_version,
                supported: current,
            });
        }

        let mut value: Value = serde_json::from_slice(&stored.payload)?;
        for version in stored.schema_version..current {
            if let Some(upcaster) = registration.upcasters.get(&version) {
                value = upcaster
                    .upcast(version, value)
                    .map_err(|reason| CodecError::Upcast {
                        type_tag: stored.type_tag.clone(),
                        from_version: version,
                        reason,
                    })?;
            }
        }

        Ok((registration.decode)(value)?)
    }
}

impl<E: DomainEvent> Default for EventTypeRegistry<E> {
    fn default() -> Self {
        Self::for_domain()
    }
}

impl<E> fmt::Debug for EventTypeRegistry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<&String> = self.entries.keys().collect();
        tags.sort();
        f.debug_struct("EventTypeRegistry").field("tags", &tags).finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
