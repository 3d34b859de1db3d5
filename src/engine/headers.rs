//! Ordered, multi-valued header map.
//!
//! Names are stored lowercase. Names keep the order in which they first
//! arrived and every value of a repeated header is kept in arrival order.

use std::collections::BTreeMap;

use crate::extproc::types::HeaderEntry;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Headers {
    entries: Vec<(String, Vec<String>)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from wire entries, skipping pseudo-headers (`:path`, ...).
    pub fn from_entries(entries: &[HeaderEntry]) -> Self {
        let mut headers = Self::new();
        for entry in entries.iter().filter(|e| !e.key.starts_with(':')) {
            headers.append(&entry.key, &entry.value);
        }
        headers
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Add a value, keeping any existing ones.
    pub fn append(&mut self, name: &str, value: &str) {
        match self.position(name) {
            Some(i) => self.entries[i].1.push(value.to_string()),
            None => self
                .entries
                .push((name.to_ascii_lowercase(), vec![value.to_string()])),
        }
    }

    /// Replace all values of `name`.
    pub fn set(&mut self, name: &str, value: &str) {
        match self.position(name) {
            Some(i) => self.entries[i].1 = vec![value.to_string()],
            None => self
                .entries
                .push((name.to_ascii_lowercase(), vec![value.to_string()])),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        self.position(name).map(|i| self.entries.remove(i).1)
    }

    /// First value of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).first().map(String::as_str)
    }

    pub fn get_all(&self, name: &str) -> &[String] {
        match self.position(name) {
            Some(i) => &self.entries[i].1,
            None => &[],
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Number of distinct names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot suitable for analytics.
    pub fn to_multimap(&self) -> BTreeMap<String, Vec<String>> {
        self.entries.iter().cloned().collect()
    }
}

/// Look up the first value of a header in raw wire entries.
pub fn first_value<'a>(entries: &'a [HeaderEntry], name: &str) -> Option<&'a str> {
    entries
        .iter()
        .find(|e| e.key.eq_ignore_ascii_case(name))
        .map(|e| e.value.as_str())
}
