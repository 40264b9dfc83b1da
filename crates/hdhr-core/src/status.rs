//! Defensive field extraction from device status JSON.
//!
//! Device firmware is inconsistent about key capitalization and about which
//! fields it sends, so every lookup here is case-insensitive and a missing or
//! null field yields the type's default instead of an error. Only a value of
//! the wrong shape is reported, as [`Error::MalformedField`].

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::error::Error;

/// Case-insensitive view over one JSON object.
#[derive(Debug)]
pub struct StatusObject<'a> {
    object: &'a Map<String, Value>,
    folded: HashMap<String, &'a str>,
}

impl<'a> StatusObject<'a> {
    /// `what` names the object in errors, e.g. `"tuner entry"`.
    pub fn new(value: &'a Value, what: &'static str) -> Result<Self, Error> {
        let object = match value {
            Value::Object(object) => object,
            Value::Null => return Err(Error::InvalidInput(what)),
            _ => return Err(Error::malformed(what, "object")),
        };

        let mut folded = HashMap::with_capacity(object.len());
        for key in object.keys() {
            folded.entry(key.to_ascii_lowercase()).or_insert(key.as_str());
        }

        Ok(Self { object, folded })
    }

    /// Non-null value of the first present field among `names`, with the key
    /// as the device spelled it. An exact-case key is preferred over a folded
    /// match.
    pub fn first(&self, names: &[&str]) -> Option<(&'a str, &'a Value)> {
        names.iter().find_map(|name| {
            self.lookup(name).filter(|(_, value)| !value.is_null())
        })
    }

    fn lookup(&self, name: &str) -> Option<(&'a str, &'a Value)> {
        if let Some((key, value)) = self.object.get_key_value(name) {
            return Some((key.as_str(), value));
        }

        let key = *self.folded.get(&name.to_ascii_lowercase())?;
        self.object.get(key).map(|value| (key, value))
    }

    pub fn get(&self, name: &str) -> Option<&'a Value> {
        self.first(&[name]).map(|(_, value)| value)
    }

    pub fn string(&self, name: &str) -> Result<String, Error> {
        let Some((key, value)) = self.first(&[name]) else {
            return Ok(String::new());
        };

        match value {
            Value::String(text) => Ok(text.clone()),
            Value::Number(number) => Ok(number.to_string()),
            Value::Bool(flag) => Ok(flag.to_string()),
            _ => Err(Error::malformed(key, "string")),
        }
    }

    /// Unsigned integer from the first present field, `0` when none is.
    pub fn unsigned(&self, names: &[&str]) -> Result<u64, Error> {
        let Some((key, value)) = self.first(names) else {
            return Ok(0);
        };

        match value {
            Value::Number(number) => number
                .as_u64()
                .ok_or_else(|| Error::malformed(key, "unsigned integer")),
            Value::String(text) if text.trim().is_empty() => Ok(0),
            Value::String(text) => text
                .trim()
                .parse()
                .map_err(|_| Error::malformed(key, "unsigned integer")),
            _ => Err(Error::malformed(key, "unsigned integer")),
        }
    }

    /// Resource index. Accepts `3`, `"3"` and the firmware's `"tuner3"`;
    /// anything else is an unknown index rather than an error.
    pub fn index(&self, names: &[&str]) -> Option<u32> {
        let (_, value) = self.first(names)?;

        match value {
            Value::Number(number) => number.as_u64().and_then(|n| u32::try_from(n).ok()),
            Value::String(text) => {
                let digits = text.trim().trim_start_matches(|c: char| c.is_ascii_alphabetic());
                if digits.is_empty() {
                    return None;
                }
                digits.parse().ok()
            }
            _ => None,
        }
    }

    /// Array field, empty when absent.
    pub fn array(&self, name: &str) -> Result<&'a [Value], Error> {
        let Some((key, value)) = self.first(&[name]) else {
            return Ok(&[]);
        };

        value
            .as_array()
            .map(Vec::as_slice)
            .ok_or_else(|| Error::malformed(key, "array"))
    }
}
