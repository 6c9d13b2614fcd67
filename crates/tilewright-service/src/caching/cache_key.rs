use std::collections::BTreeMap;
use std::fmt::{self, Write};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tilewright_sources::SourceId;

/// An ordered mapping from parameter names to their values.
///
/// Values are kept in their stable textual form, so two parameter sets are equal exactly when
/// they describe the same computation.
#[derive(Clone, Debug, Default, Hash, Eq, PartialEq)]
pub struct ParameterSet(BTreeMap<String, String>);

impl ParameterSet {
    /// Creates an empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `name` to the textual form of `value`, replacing a previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl fmt::Display) {
        self.0.insert(name.into(), value.to_string());
    }

    /// Returns the value of the parameter `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Iterates over all parameters in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The memoization identity of a computation.
///
/// A key is formed by the kind of the computation, the source it belongs to, and its
/// [`ParameterSet`]. These are written out as human readable, stable metadata, which is
/// hashed to compare and look up keys.
#[derive(Debug, Clone, Eq)]
pub struct ComputationKey {
    kind: Arc<str>,
    source: SourceId,
    params: Arc<ParameterSet>,
    metadata: Arc<str>,
    hash: [u8; 32],
}

impl fmt::Display for ComputationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.source)?;
        for (name, value) in self.params.iter() {
            write!(f, ":{name}={value}")?;
        }
        Ok(())
    }
}

impl PartialEq for ComputationKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl std::hash::Hash for ComputationKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl ComputationKey {
    /// Creates a [`ComputationKeyBuilder`] for a computation of `kind` on `source`.
    pub fn builder(kind: &str, source: &SourceId) -> ComputationKeyBuilder {
        ComputationKeyBuilder {
            kind: kind.into(),
            source: source.clone(),
            params: ParameterSet::new(),
        }
    }

    /// The kind of computation, such as `image` or `bounds`.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The source this computation belongs to.
    pub fn source(&self) -> &SourceId {
        &self.source
    }

    /// The parameters of this computation.
    pub fn params(&self) -> &ParameterSet {
        &self.params
    }

    /// Returns the human-readable metadata that forms the basis of the [`ComputationKey`].
    pub fn metadata(&self) -> &str {
        &self.metadata
    }

    /// The sha-256 hash of the metadata, hex-formatted.
    pub fn hash_hex(&self) -> String {
        let mut hex = String::with_capacity(64);
        for b in &self.hash {
            // writing to a `String` is infallible
            let _ = write!(hex, "{b:02x}");
        }
        hex
    }
}

/// A builder for [`ComputationKey`]s.
pub struct ComputationKeyBuilder {
    kind: String,
    source: SourceId,
    params: ParameterSet,
}

impl ComputationKeyBuilder {
    /// Adds a parameter to the key.
    pub fn param(mut self, name: impl Into<String>, value: impl fmt::Display) -> Self {
        self.params.insert(name, value);
        self
    }

    /// Finalize the [`ComputationKey`].
    pub fn build(self) -> ComputationKey {
        let mut metadata = format!("kind: {}\nsource: {}\n\n", self.kind, self.source);
        for (name, value) in self.params.iter() {
            metadata.push_str(name);
            metadata.push_str(": ");
            metadata.push_str(value);
            metadata.push('\n');
        }

        let hash: [u8; 32] = Sha256::digest(&metadata).into();

        ComputationKey {
            kind: self.kind.into(),
            source: self.source,
            params: Arc::new(self.params),
            metadata: metadata.into(),
            hash,
        }
    }
}
