//! Case-insensitive header access shared by [`Request`](crate::Request) and
//! [`Response`](crate::Response).
//!
//! [`HeaderView`] wraps an [`http::HeaderMap`] and gives it the lenient behavior of web
//! `Headers`: reads with an empty or malformed name simply find nothing, repeated values read
//! back joined with `", "`, and `referer` and `referrer` are interchangeable.

use crate::error::HeaderError;
use http::header::{HeaderMap, HeaderName, HeaderValue, REFERER, SET_COOKIE};
use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;

const REFERRER: &str = "referrer";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderView {
    inner: HeaderMap,
}

impl HeaderView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all values stored under `name` joined with `", "`.
    ///
    /// Reading `referer` or `referrer` consults both spellings; a stored `referrer` wins.
    pub fn get(&self, name: &str) -> Option<String> {
        if is_referrer(name) {
            return self.join(REFERRER).or_else(|| self.join(REFERER.as_str()));
        }
        self.join(name)
    }

    /// Returns every value stored under `name`, in insertion order.
    pub fn get_all(&self, name: &str) -> Vec<String> {
        let Some(name) = parse_name(name) else {
            return Vec::new();
        };
        self.inner.get_all(name).iter().map(value_to_string).collect()
    }

    pub fn get_set_cookie(&self) -> Vec<String> {
        self.inner.get_all(SET_COOKIE).iter().map(value_to_string).collect()
    }

    pub fn has(&self, name: &str) -> bool {
        parse_name(name).is_some_and(|name| self.inner.contains_key(name))
    }

    /// Replaces all values of `name` with `value`. An empty name is ignored.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), HeaderError> {
        if let Some((name, value)) = parse_pair(name, value)? {
            self.inner.insert(name, value);
        }
        Ok(())
    }

    /// Adds `value` to `name` without touching the values already there.
    pub fn append(&mut self, name: &str, value: &str) -> Result<(), HeaderError> {
        if let Some((name, value)) = parse_pair(name, value)? {
            self.inner.append(name, value);
        }
        Ok(())
    }

    pub fn set_many<K, V>(&mut self, headers: impl IntoIterator<Item = (K, V)>) -> Result<(), HeaderError>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (name, value) in headers {
            self.set(name.as_ref(), value.as_ref())?;
        }
        Ok(())
    }

    pub fn append_many<K, V>(&mut self, headers: impl IntoIterator<Item = (K, V)>) -> Result<(), HeaderError>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (name, value) in headers {
            self.append(name.as_ref(), value.as_ref())?;
        }
        Ok(())
    }

    pub fn delete(&mut self, name: &str) {
        if let Some(name) = parse_name(name) {
            self.inner.remove(name);
        }
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// A flattened snapshot with one entry per lowercase name.
    ///
    /// Repeated values are joined with `", "`, except `set-cookie` where the last value wins
    /// since cookie lines cannot be joined safely.
    pub fn entries(&self) -> BTreeMap<String, String> {
        let mut entries = BTreeMap::new();
        for name in self.inner.keys() {
            let value = if *name == SET_COOKIE {
                self.inner.get_all(name).iter().last().map(value_to_string).unwrap_or_default()
            } else {
                self.join(name.as_str()).unwrap_or_default()
            };
            entries.insert(name.as_str().to_string(), value);
        }
        entries
    }

    pub fn as_header_map(&self) -> &HeaderMap {
        &self.inner
    }

    pub fn as_header_map_mut(&mut self) -> &mut HeaderMap {
        &mut self.inner
    }

    pub fn into_header_map(self) -> HeaderMap {
        self.inner
    }

    fn join(&self, name: &str) -> Option<String> {
        let name = parse_name(name)?;
        let mut values = self.inner.get_all(name).iter();
        let mut joined = value_to_string(values.next()?);
        for value in values {
            joined.push_str(", ");
            joined.push_str(&value_to_string(value));
        }
        Some(joined)
    }
}

impl From<HeaderMap> for HeaderView {
    fn from(inner: HeaderMap) -> Self {
        Self { inner }
    }
}

impl From<HeaderView> for HeaderMap {
    fn from(view: HeaderView) -> Self {
        view.inner
    }
}

impl HeaderView {
    /// Builds a view from name and value pairs; a repeated name keeps every value.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Result<Self, HeaderError>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut view = HeaderView::new();
        view.append_many(pairs)?;
        Ok(view)
    }
}

impl<K: AsRef<str>, V: AsRef<str>> TryFrom<Vec<(K, V)>> for HeaderView {
    type Error = HeaderError;

    fn try_from(pairs: Vec<(K, V)>) -> Result<Self, Self::Error> {
        HeaderView::from_pairs(pairs)
    }
}

impl<K: AsRef<str>, V: AsRef<str>, S: BuildHasher> TryFrom<HashMap<K, V, S>> for HeaderView {
    type Error = HeaderError;

    fn try_from(map: HashMap<K, V, S>) -> Result<Self, Self::Error> {
        HeaderView::from_pairs(map)
    }
}

impl<K: AsRef<str>, V: AsRef<str>> TryFrom<BTreeMap<K, V>> for HeaderView {
    type Error = HeaderError;

    fn try_from(map: BTreeMap<K, V>) -> Result<Self, Self::Error> {
        HeaderView::from_pairs(map)
    }
}

fn is_referrer(name: &str) -> bool {
    name.eq_ignore_ascii_case(REFERER.as_str()) || name.eq_ignore_ascii_case(REFERRER)
}

fn parse_name(name: &str) -> Option<HeaderName> {
    if name.is_empty() {
        return None;
    }
    HeaderName::from_bytes(name.as_bytes()).ok()
}

fn parse_pair(name: &str, value: &str) -> Result<Option<(HeaderName, HeaderValue)>, HeaderError> {
    if name.is_empty() {
        return Ok(None);
    }
    let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| HeaderError::invalid_name(name))?;
    let header_value = HeaderValue::from_str(value.trim()).map_err(|_| HeaderError::invalid_value(name))?;
    Ok(Some((header_name, header_value)))
}

fn value_to_string(value: &HeaderValue) -> String {
    String::from_utf8_lossy(value.as_bytes()).into_owned()
}
