//! Decoded HTTP/2 header blocks as plain string records.

use std::fmt;

use serde::{Serialize, Serializer, ser::SerializeMap};

/// Ordered list of decoded header fields.
///
/// Order and duplicates are preserved as they appeared in the header block.
/// Lookups are by exact (lower-case) name, as HTTP/2 requires.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeaderMap {
    fields: Vec<(String, String)>,
}

impl HeaderMap {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Append a field.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    /// First value recorded for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.as_str())
    }

    /// Whether `name` is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool { self.get(name).is_some() }

    /// Iterate over `(name, value)` pairs in block order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize { self.fields.len() }

    /// Whether the map holds no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.fields.is_empty() }

    /// The `:path` pseudo-header.
    #[must_use]
    pub fn path(&self) -> Option<&str> { self.get(":path") }

    /// The `:method` pseudo-header.
    #[must_use]
    pub fn method(&self) -> Option<&str> { self.get(":method") }

    /// The `:status` pseudo-header.
    #[must_use]
    pub fn status(&self) -> Option<&str> { self.get(":status") }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for HeaderMap {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        }
    }
}

impl fmt::Display for HeaderMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (name, value)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}: {value}")?;
        }
        f.write_str("}")
    }
}

impl Serialize for HeaderMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}
