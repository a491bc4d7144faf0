//! Stored value variants and their JSON encoding.
//!
//! Every key in a store maps to exactly one [`Value`]. The variant is fixed
//! at creation: a typed operation against an entry of another variant fails
//! without mutating the store. The JSON encoding (untagged: string / array of
//! strings / object of string-to-string) is shared by the snapshot file
//! format and the `set` replication record, so the same serde derives serve
//! both.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

/// A stored value: string, list of strings, or hash of string fields.
///
/// Lists use [`VecDeque`] so both ends pop in O(1) (`lpop`/`rpop`).
/// Hash fields are unordered; iteration order is never part of the contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// A plain UTF-8 string.
    Str(String),
    /// An ordered sequence of strings.
    List(VecDeque<String>),
    /// A mapping from field name to field value.
    Hash(HashMap<String, String>),
}

impl Value {
    /// Builds a string value.
    pub fn string(s: impl Into<String>) -> Self {
        Self::Str(s.into())
    }

    /// Builds a list value from an iterator of elements.
    pub fn list<I, S>(elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::List(elements.into_iter().map(Into::into).collect())
    }

    /// Builds a hash value from an iterator of field/value pairs.
    pub fn hash<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::Hash(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Returns the kind tag of this value.
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Str(_) => ValueKind::Str,
            Self::List(_) => ValueKind::List,
            Self::Hash(_) => ValueKind::Hash,
        }
    }

    /// Returns the string payload, or `None` for list/hash values.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Returns the list payload, or `None` for other variants.
    #[must_use]
    pub fn as_list(&self) -> Option<&VecDeque<String>> {
        match self {
            Self::List(l) => Some(l),
            _ => None,
        }
    }

    /// Returns the hash payload, or `None` for other variants.
    #[must_use]
    pub fn as_hash(&self) -> Option<&HashMap<String, String>> {
        match self {
            Self::Hash(h) => Some(h),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

/// The variant tag of a [`Value`], used in type-mismatch errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// String value.
    Str,
    /// List value.
    List,
    /// Hash value.
    Hash,
}

impl ValueKind {
    /// Lowercase name as it appears in error messages.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Str => "string",
            Self::List => "list",
            Self::Hash => "hash",
        }
    }
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---- JSON encoding ----

    #[test]
    fn string_encodes_as_json_string() {
        let v = Value::string("Alice");
        assert_eq!(serde_json::to_string(&v).unwrap(), r#""Alice""#);
    }

    #[test]
    fn list_encodes_as_json_array() {
        let v = Value::list(["a", "b", "c"]);
        assert_eq!(serde_json::to_string(&v).unwrap(), r#"["a","b","c"]"#);
    }

    #[test]
    fn hash_encodes_as_json_object() {
        let v = Value::hash([("name", "Bob")]);
        assert_eq!(serde_json::to_string(&v).unwrap(), r#"{"name":"Bob"}"#);
    }

    #[test]
    fn decoding_picks_variant_from_json_shape() {
        let s: Value = serde_json::from_str(r#""x""#).unwrap();
        assert_eq!(s.kind(), ValueKind::Str);

        let l: Value = serde_json::from_str(r#"["x","y"]"#).unwrap();
        assert_eq!(l.kind(), ValueKind::List);
        assert_eq!(l.as_list().unwrap().len(), 2);

        let h: Value = serde_json::from_str(r#"{"f":"v"}"#).unwrap();
        assert_eq!(h.kind(), ValueKind::Hash);
        assert_eq!(h.as_hash().unwrap().get("f").map(String::as_str), Some("v"));
    }

    #[test]
    fn round_trip_preserves_list_order() {
        let v = Value::list(["first", "second", "third"]);
        let json = serde_json::to_string(&v).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }

    // ---- Accessors ----

    #[test]
    fn accessors_return_none_for_other_variants() {
        let s = Value::string("x");
        assert!(s.as_str().is_some());
        assert!(s.as_list().is_none());
        assert!(s.as_hash().is_none());

        let l = Value::list(["x"]);
        assert!(l.as_str().is_none());
        assert!(l.as_list().is_some());
    }

    #[test]
    fn kind_names_match_error_vocabulary() {
        assert_eq!(ValueKind::Str.as_str(), "string");
        assert_eq!(ValueKind::List.as_str(), "list");
        assert_eq!(ValueKind::Hash.as_str(), "hash");
        assert_eq!(format!("{}", ValueKind::List), "list");
    }

    #[test]
    fn from_str_builds_string_variant() {
        let v: Value = "hello".into();
        assert_eq!(v, Value::Str("hello".to_string()));
    }
}
