//! Sensitive-data masking
//!
//! Redacts values whose key is in a configured (case-insensitive) key set and
//! text regions matching configured regex patterns. Inputs are never mutated;
//! when nothing needs redacting, or masking is disabled, the input is handed
//! back without copying.
//!
//! Masking is best-effort: a value that cannot be serialized (for example a
//! graph that detects re-entrant serialization) is returned unmasked.

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Number, Value};
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};

use crate::config::MaskingConfig;
use crate::error::AgentError;

/// Result of masking an arbitrary serializable value
#[derive(Debug)]
pub enum Masked<'a, T: ?Sized> {
    /// JSON tree of the value with sensitive entries replaced
    Redacted(Value),
    /// The original value, untouched (masking disabled or serialization failed)
    Unchanged(&'a T),
}

impl<'a, T: ?Sized> Masked<'a, T> {
    pub fn is_redacted(&self) -> bool {
        matches!(self, Self::Redacted(_))
    }

    pub fn redacted(&self) -> Option<&Value> {
        match self {
            Self::Redacted(value) => Some(value),
            Self::Unchanged(_) => None,
        }
    }

    pub fn unchanged(&self) -> Option<&'a T> {
        match self {
            Self::Redacted(_) => None,
            Self::Unchanged(original) => Some(original),
        }
    }
}

pub struct SensitiveDataMasker {
    enabled: bool,
    mask_value: String,
    keys: HashSet<String>,
    patterns: Vec<Regex>,
}

impl SensitiveDataMasker {
    pub fn new(config: &MaskingConfig) -> Result<Self, AgentError> {
        let patterns = config
            .patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|source| AgentError::InvalidPattern {
                    pattern: pattern.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            enabled: config.enabled,
            mask_value: config.mask_value.clone(),
            keys: config
                .sensitive_keys
                .iter()
                .map(|k| k.to_lowercase())
                .collect(),
            patterns,
        })
    }

    /// A masker that returns every input unchanged
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            mask_value: String::new(),
            keys: HashSet::new(),
            patterns: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn mask_value(&self) -> &str {
        &self.mask_value
    }

    pub fn is_sensitive_key(&self, key: &str) -> bool {
        !self.keys.is_empty() && self.keys.contains(&key.to_lowercase())
    }

    /// Mask any serializable value through its JSON representation
    pub fn mask<'a, T>(&self, value: &'a T) -> Masked<'a, T>
    where
        T: Serialize + ?Sized,
    {
        if !self.enabled {
            return Masked::Unchanged(value);
        }

        match serde_json::to_value(value) {
            Ok(tree) => Masked::Redacted(self.rewrite(&tree)),
            Err(e) => {
                tracing::debug!(error = %e, "Masking skipped, value could not be serialized");
                Masked::Unchanged(value)
            }
        }
    }

    /// Mask a parsed JSON tree
    pub fn mask_json<'a>(&self, value: &'a Value) -> Cow<'a, Value> {
        if !self.enabled || !self.tree_has_sensitive_key(value) {
            return Cow::Borrowed(value);
        }
        Cow::Owned(self.rewrite(value))
    }

    /// Mask free text
    ///
    /// Valid JSON is masked structurally and re-rendered; anything else goes
    /// through the regex patterns. Text needing no change is borrowed back.
    pub fn mask_str<'a>(&self, text: &'a str) -> Cow<'a, str> {
        if !self.enabled || text.is_empty() {
            return Cow::Borrowed(text);
        }

        if let Ok(tree) = serde_json::from_str::<Value>(text) {
            if !self.tree_has_sensitive_key(&tree) {
                return Cow::Borrowed(text);
            }
            return match serde_json::to_string(&self.rewrite(&tree)) {
                Ok(rendered) => Cow::Owned(rendered),
                Err(e) => {
                    tracing::debug!(error = %e, "Masking skipped, JSON text could not be rendered");
                    Cow::Borrowed(text)
                }
            };
        }

        self.mask_patterns(text)
    }

    /// Mask a flat string map; values are never inspected
    pub fn mask_headers<'a>(
        &self,
        map: &'a HashMap<String, String>,
    ) -> Cow<'a, HashMap<String, String>> {
        if !self.enabled || !map.keys().any(|k| self.is_sensitive_key(k)) {
            return Cow::Borrowed(map);
        }

        Cow::Owned(
            map.iter()
                .map(|(k, v)| {
                    let value = if self.is_sensitive_key(k) {
                        self.mask_value.clone()
                    } else {
                        v.clone()
                    };
                    (k.clone(), value)
                })
                .collect(),
        )
    }

    /// Mask a multi-valued map; a sensitive key keeps a single mask entry
    pub fn mask_multi_map<'a>(
        &self,
        map: &'a HashMap<String, Vec<String>>,
    ) -> Cow<'a, HashMap<String, Vec<String>>> {
        if !self.enabled || !map.keys().any(|k| self.is_sensitive_key(k)) {
            return Cow::Borrowed(map);
        }

        Cow::Owned(
            map.iter()
                .map(|(k, v)| {
                    let values = if self.is_sensitive_key(k) {
                        vec![self.mask_value.clone()]
                    } else {
                        v.clone()
                    };
                    (k.clone(), values)
                })
                .collect(),
        )
    }

    /// Mask ordered key/value pairs, keeping order and duplicates
    pub fn mask_pairs<'a>(&self, pairs: &'a [(String, String)]) -> Cow<'a, [(String, String)]> {
        if !self.enabled || !pairs.iter().any(|(k, _)| self.is_sensitive_key(k)) {
            return Cow::Borrowed(pairs);
        }

        Cow::Owned(
            pairs
                .iter()
                .map(|(k, v)| {
                    if self.is_sensitive_key(k) {
                        (k.clone(), self.mask_value.clone())
                    } else {
                        (k.clone(), v.clone())
                    }
                })
                .collect(),
        )
    }

    fn mask_patterns<'a>(&self, text: &'a str) -> Cow<'a, str> {
        let mut masked = Cow::Borrowed(text);
        for pattern in &self.patterns {
            let replaced = match pattern.replace_all(&masked, self.mask_value.as_str()) {
                Cow::Owned(replaced) => Some(replaced),
                Cow::Borrowed(_) => None,
            };
            if let Some(replaced) = replaced {
                masked = Cow::Owned(replaced);
            }
        }
        masked
    }

    fn tree_has_sensitive_key(&self, value: &Value) -> bool {
        match value {
            Value::Object(map) => map
                .iter()
                .any(|(k, v)| self.is_sensitive_key(k) || self.tree_has_sensitive_key(v)),
            Value::Array(items) => items.iter().any(|v| self.tree_has_sensitive_key(v)),
            _ => false,
        }
    }

    fn rewrite(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut rebuilt = Map::with_capacity(map.len());
                for (key, child) in map {
                    let child = if self.is_sensitive_key(key) {
                        // Replaced wholesale, never descended into
                        Value::String(self.mask_value.clone())
                    } else {
                        self.rewrite(child)
                    };
                    rebuilt.insert(key.clone(), child);
                }
                Value::Object(rebuilt)
            }
            Value::Array(items) => Value::Array(items.iter().map(|v| self.rewrite(v)).collect()),
            Value::Number(number) => rewrite_number(number),
            Value::String(s) => Value::String(s.clone()),
            Value::Bool(b) => Value::Bool(*b),
            Value::Null => Value::Null,
        }
    }
}

/// Integer when lossless, else double, else the raw text
fn rewrite_number(number: &Number) -> Value {
    if let Some(i) = number.as_i64() {
        Value::Number(i.into())
    } else if let Some(u) = number.as_u64() {
        Value::Number(u.into())
    } else if let Some(f) = number.as_f64().and_then(Number::from_f64) {
        Value::Number(f)
    } else {
        Value::String(number.to_string())
    }
}
