//! Cache key layout.
//!
//! - `counters:<resource>:<id>`: hash of pending counter deltas.
//! - `counts:<resource>:<id>`: hash of cached durable baselines.
//! - `sync:counters:<resource>:<id>`: a counter hash claimed by a reconciliation cycle.
//! - `<relation>:<user>:<mod>`: tri-state relation flag.

use std::fmt;

use thiserror::Error;

use crate::domain::types::{Relation, ResourceId, ResourceType, UserId};

pub const COUNTER_NAMESPACE: &str = "counters";
pub const BASELINE_NAMESPACE: &str = "counts";
pub const CLAIM_PREFIX: &str = "sync:";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyParseError {
    #[error("key `{key}` has fewer than three segments")]
    TooFewSegments { key: String },
    #[error("key `{key}` is outside the `{COUNTER_NAMESPACE}` namespace")]
    WrongNamespace { key: String },
    #[error("key `{key}` names unknown resource type `{token}`")]
    UnknownResource { key: String, token: String },
    #[error("key `{key}` has non-numeric resource id `{value}`")]
    InvalidId { key: String, value: String },
}

/// Identifies the counter hash of one resource row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CounterKey {
    resource: ResourceType,
    id: ResourceId,
}

impl CounterKey {
    pub fn new(resource: ResourceType, id: ResourceId) -> Self {
        Self { resource, id }
    }

    /// Parse `counters:<resource>:<id>`. Segments past the third are ignored;
    /// any other namespace (baselines, claims, flags) is rejected.
    pub fn parse(key: &str) -> Result<Self, KeyParseError> {
        let mut parts = key.split(':');
        let (Some(namespace), Some(resource), Some(id)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(KeyParseError::TooFewSegments {
                key: key.to_string(),
            });
        };
        if namespace != COUNTER_NAMESPACE {
            return Err(KeyParseError::WrongNamespace {
                key: key.to_string(),
            });
        }

        let resource = resource
            .parse::<ResourceType>()
            .map_err(|_| KeyParseError::UnknownResource {
                key: key.to_string(),
                token: resource.to_string(),
            })?;
        let id = id
            .parse::<ResourceId>()
            .map_err(|_| KeyParseError::InvalidId {
                key: key.to_string(),
                value: id.to_string(),
            })?;

        Ok(Self { resource, id })
    }

    /// Parse a claimed key, i.e. a counter key carrying [`CLAIM_PREFIX`].
    pub fn parse_claim(key: &str) -> Result<Self, KeyParseError> {
        match key.strip_prefix(CLAIM_PREFIX) {
            Some(inner) => Self::parse(inner),
            None => Err(KeyParseError::WrongNamespace {
                key: key.to_string(),
            }),
        }
    }

    pub fn resource(&self) -> ResourceType {
        self.resource
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn render(&self) -> String {
        self.to_string()
    }

    pub fn baseline_key(&self) -> String {
        format!("{BASELINE_NAMESPACE}:{}:{}", self.resource, self.id)
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{COUNTER_NAMESPACE}:{}:{}", self.resource, self.id)
    }
}

/// Name under which a reconciliation cycle holds `key` while merging it.
pub fn claim_key(key: &str) -> String {
    format!("{CLAIM_PREFIX}{key}")
}

pub fn flag_key(relation: Relation, user: UserId, object: ResourceId) -> String {
    format!("{}:{user}:{object}", relation.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_key_renders_and_parses() {
        let key = CounterKey::new(ResourceType::Mod, 42);
        assert_eq!(key.render(), "counters:mod:42");
        assert_eq!(key.baseline_key(), "counts:mod:42");
        assert_eq!(CounterKey::parse("counters:mod:42"), Ok(key));
    }

    #[test]
    fn parse_rejects_short_keys() {
        assert!(matches!(
            CounterKey::parse("counters:mod"),
            Err(KeyParseError::TooFewSegments { .. })
        ));
    }

    #[test]
    fn parse_rejects_unknown_types_and_ids() {
        assert!(matches!(
            CounterKey::parse("counters:game:1"),
            Err(KeyParseError::UnknownResource { token, .. }) if token == "game"
        ));
        assert!(matches!(
            CounterKey::parse("counters:mod:abc"),
            Err(KeyParseError::InvalidId { value, .. }) if value == "abc"
        ));
    }

    #[test]
    fn parse_rejects_other_namespaces() {
        for key in ["counts:mod:42", "sync:counters:mod:42", "like:7:42"] {
            assert!(
                matches!(
                    CounterKey::parse(key),
                    Err(KeyParseError::WrongNamespace { .. })
                ),
                "{key}"
            );
        }
        assert!(matches!(
            CounterKey::parse_claim("sync:counts:mod:42"),
            Err(KeyParseError::WrongNamespace { .. })
        ));
        assert!(matches!(
            CounterKey::parse_claim("counters:mod:42"),
            Err(KeyParseError::WrongNamespace { .. })
        ));
    }

    #[test]
    fn claims_round_trip_through_prefix() {
        let claim = claim_key("counters:mod_version:7");
        assert_eq!(claim, "sync:counters:mod_version:7");
        assert_eq!(
            CounterKey::parse_claim(&claim),
            Ok(CounterKey::new(ResourceType::ModVersion, 7))
        );
    }

    #[test]
    fn flag_keys_use_relation_prefix() {
        assert_eq!(flag_key(Relation::Like, 7, 42), "like:7:42");
        assert_eq!(flag_key(Relation::Favorite, 7, 42), "favorite:7:42");
    }
}
