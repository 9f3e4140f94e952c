//! Typed access to server result rows.
//!
//! Every result line the server sends carries a flat list of `key=value`
//! tokens. `ValueMap` holds one decoded line and hands out typed values with
//! a caller-supplied default, so a missing or malformed field never aborts a
//! whole poll cycle.

use std::collections::HashMap;
use std::str::FromStr;

use crate::channel::ChannelError;

/// One decoded result row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueMap {
    values: HashMap<String, String>,
}

impl ValueMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the data part of a result line.
    ///
    /// Values are either bare tokens (`count=12`) or quoted strings
    /// (`name='daily backup'`), where `\` escapes the next character.
    pub fn parse(data: &str) -> Result<Self, ChannelError> {
        let mut values = HashMap::new();
        let mut chars = data.chars().peekable();

        loop {
            while chars.next_if(|c| c.is_whitespace()).is_some() {}
            if chars.peek().is_none() {
                break;
            }

            let mut key = String::new();
            while let Some(c) = chars.next_if(|c| *c != '=' && !c.is_whitespace()) {
                key.push(c);
            }
            if chars.next() != Some('=') || key.is_empty() {
                return Err(ChannelError::Communication(format!(
                    "malformed result field '{}' in '{}'",
                    key, data
                )));
            }

            let mut value = String::new();
            match chars.peek().copied() {
                Some(quote @ ('\'' | '"')) => {
                    chars.next();
                    let mut closed = false;
                    while let Some(c) = chars.next() {
                        match c {
                            '\\' => {
                                if let Some(escaped) = chars.next() {
                                    value.push(escaped);
                                }
                            }
                            c if c == quote => {
                                closed = true;
                                break;
                            }
                            c => value.push(c),
                        }
                    }
                    if !closed {
                        return Err(ChannelError::Communication(format!(
                            "unterminated string for field '{}'",
                            key
                        )));
                    }
                }
                _ => {
                    while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                        value.push(c);
                    }
                }
            }

            values.insert(key, value);
        }

        Ok(Self { values })
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Merge another row into this one; fields in `other` win.
    pub fn extend(&mut self, other: ValueMap) {
        self.values.extend(other.values);
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Fail with a communication error unless every key is present.
    pub fn require(&self, keys: &[&str]) -> Result<(), ChannelError> {
        match keys.iter().find(|key| !self.values.contains_key(**key)) {
            Some(missing) => Err(ChannelError::Communication(format!(
                "missing result field '{}'",
                missing
            ))),
            None => Ok(()),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_string()
    }

    pub fn int(&self, key: &str, default: i32) -> i32 {
        self.parsed(key).unwrap_or(default)
    }

    pub fn long(&self, key: &str, default: i64) -> i64 {
        self.parsed(key).unwrap_or(default)
    }

    /// Unsigned 64-bit value; negative values fall back to the default.
    pub fn ulong(&self, key: &str, default: u64) -> u64 {
        self.parsed(key).unwrap_or(default)
    }

    pub fn double(&self, key: &str, default: f64) -> f64 {
        self.parsed(key).unwrap_or(default)
    }

    pub fn boolean(&self, key: &str, default: bool) -> bool {
        match self.get(key).map(|v| v.to_ascii_lowercase()) {
            Some(v) => match v.as_str() {
                "1" | "yes" | "true" | "on" => true,
                "0" | "no" | "false" | "off" => false,
                _ => default,
            },
            None => default,
        }
    }

    /// Parse an enumeration; unknown names fall back to the default.
    pub fn enumeration<T: FromStr>(&self, key: &str, default: T) -> T {
        self.parsed(key).unwrap_or(default)
    }

    fn parsed<T: FromStr>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ValueMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
