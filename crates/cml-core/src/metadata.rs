//! Typed dynamic metadata tree with dotted-path access.
//!
//! Event metadata, scope filters (C7), and hook mutations (C9) all need the
//! same deep get/set/merge semantics over a JSON-shaped but statically typed
//! tree, so it lives here once rather than being reimplemented per caller.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A metadata value: map, list, or scalar leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Map(BTreeMap<String, MetaValue>),
    List(Vec<MetaValue>),
    Scalar(Value),
}

impl Default for MetaValue {
    fn default() -> Self {
        MetaValue::Map(BTreeMap::new())
    }
}

impl MetaValue {
    pub fn empty_map() -> Self {
        MetaValue::Map(BTreeMap::new())
    }

    pub fn scalar(v: impl Into<Value>) -> Self {
        MetaValue::Scalar(v.into())
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, MetaValue>> {
        match self {
            MetaValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            MetaValue::Scalar(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_scalar().and_then(Value::as_str)
    }

    /// Look up a dotted path, e.g. `"scope.project.id"`.
    pub fn get_path(&self, path: &str) -> Option<&MetaValue> {
        let mut cur = self;
        for segment in path.split('.') {
            cur = cur.as_map()?.get(segment)?;
        }
        Some(cur)
    }

    /// Set a dotted path, creating intermediate maps as needed. Overwrites
    /// any non-map value found along the way.
    pub fn set_path(&mut self, path: &str, value: MetaValue) {
        let segments: Vec<&str> = path.split('.').collect();
        self.set_path_segments(&segments, value);
    }

    fn set_path_segments(&mut self, segments: &[&str], value: MetaValue) {
        let Some((head, rest)) = segments.split_first() else {
            return;
        };

        if !matches!(self, MetaValue::Map(_)) {
            *self = MetaValue::empty_map();
        }
        let MetaValue::Map(map) = self else {
            unreachable!()
        };

        if rest.is_empty() {
            map.insert((*head).to_string(), value);
            return;
        }

        let entry = map.entry((*head).to_string()).or_insert_with(MetaValue::empty_map);
        entry.set_path_segments(rest, value);
    }

    /// Deep merge `other` into `self`: nested maps recurse key-wise, scalars
    /// and lists from `other` overwrite wholesale (per spec §4.1 "arrays are
    /// replaced wholesale").
    pub fn merge(&mut self, other: &MetaValue) {
        match (self, other) {
            (MetaValue::Map(a), MetaValue::Map(b)) => {
                for (k, v) in b {
                    match a.get_mut(k) {
                        Some(existing) => existing.merge(v),
                        None => {
                            a.insert(k.clone(), v.clone());
                        }
                    }
                }
            }
            (slot, other) => {
                *slot = other.clone();
            }
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            MetaValue::Map(m) => {
                Value::Object(m.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
            }
            MetaValue::List(l) => Value::Array(l.iter().map(MetaValue::to_json).collect()),
            MetaValue::Scalar(v) => v.clone(),
        }
    }

    pub fn from_json(v: &Value) -> Self {
        match v {
            Value::Object(m) => MetaValue::Map(
                m.iter().map(|(k, v)| (k.clone(), MetaValue::from_json(v))).collect(),
            ),
            Value::Array(a) => MetaValue::List(a.iter().map(MetaValue::from_json).collect()),
            other => MetaValue::Scalar(other.clone()),
        }
    }

    pub fn to_json_string(&self) -> String {
        self.to_json().to_string()
    }

    pub fn from_json_str(s: &str) -> Result<Self, serde_json::Error> {
        let v: Value = serde_json::from_str(s)?;
        Ok(Self::from_json(&v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_set_round_trip() {
        let mut m = MetaValue::empty_map();
        m.set_path("scope.project.id", MetaValue::scalar("alpha"));
        assert_eq!(
            m.get_path("scope.project.id").and_then(MetaValue::as_str),
            Some("alpha")
        );
    }

    #[test]
    fn merge_recurses_maps_and_overwrites_scalars() {
        let mut a = MetaValue::from_json_str(r#"{"scope":{"project":{"id":"alpha"}},"n":1}"#).unwrap();
        let b = MetaValue::from_json_str(r#"{"scope":{"project":{"env":"prod"}},"n":2}"#).unwrap();
        a.merge(&b);
        assert_eq!(a.get_path("scope.project.id").and_then(MetaValue::as_str), Some("alpha"));
        assert_eq!(a.get_path("scope.project.env").and_then(MetaValue::as_str), Some("prod"));
        assert_eq!(a.get_path("n").and_then(MetaValue::as_scalar), Some(&Value::from(2)));
    }

    #[test]
    fn merge_replaces_arrays_wholesale() {
        let mut a = MetaValue::from_json_str(r#"{"categoryPath":["a","b"]}"#).unwrap();
        let b = MetaValue::from_json_str(r#"{"categoryPath":["c"]}"#).unwrap();
        a.merge(&b);
        assert_eq!(a.get_path("categoryPath"), b.get_path("categoryPath"));
    }

    #[test]
    fn missing_path_returns_none() {
        let m = MetaValue::empty_map();
        assert!(m.get_path("a.b.c").is_none());
    }

    #[test]
    fn round_trips_through_json() {
        let json = r#"{"a":1,"b":[1,2,"x"],"c":{"d":true}}"#;
        let m = MetaValue::from_json_str(json).unwrap();
        let back: Value = serde_json::from_str(json).unwrap();
        assert_eq!(m.to_json(), back);
    }
}
