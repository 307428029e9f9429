//! Topic addressing
//!
//! A `Topic` is a feed name plus an optional instance identifier. It has two
//! renderings: the resource path (`name` or `name/instance`) appended to the
//! upstream base URL, and the display key (`name` or `name-instance`) used
//! for local bookkeeping. Topics are immutable once built.
//!
//! The upstream subscription endpoint also understands a `query` parameter
//! holding a JSON object and a comma-separated `fields` parameter; both ride
//! along in the URL and never change the path or the key.

use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};
use url::Url;

use crate::utils::{RelayError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    name: String,
    instance_id: Option<String>,
    query: Option<Map<String, Value>>,
    fields: Vec<String>,
}

impl Topic {
    /// Build a topic, rejecting empty names and ids and embedded `/`.
    pub fn new(name: &str, instance_id: Option<&str>) -> Result<Self> {
        let name = validate_segment("topic name", name)?;
        let instance_id = instance_id
            .map(|id| validate_segment("instance id", id))
            .transpose()?;

        Ok(Self {
            name,
            instance_id,
            query: None,
            fields: Vec::new(),
        })
    }

    /// Attach a filter query. The text must be a JSON object.
    pub fn with_query(mut self, query: &str) -> Result<Self> {
        match serde_json::from_str::<Value>(query) {
            Ok(Value::Object(map)) => {
                self.query = Some(map);
                Ok(self)
            }
            Ok(_) => Err(RelayError::InvalidArgument(
                "query must be a JSON object".to_string(),
            )),
            Err(e) => Err(RelayError::InvalidArgument(format!(
                "could not decode query: {e}"
            ))),
        }
    }

    /// Restrict the upstream payloads to the given fields. Names are
    /// trimmed and blank ones skipped; a name containing `,` is rejected
    /// since the list travels comma-separated.
    pub fn with_fields<I, S>(mut self, fields: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut kept = Vec::new();
        for field in fields {
            let field = field.as_ref().trim();
            if field.is_empty() {
                continue;
            }
            if field.contains(',') {
                return Err(RelayError::InvalidArgument(format!(
                    "field name must not contain ',': '{field}'"
                )));
            }
            kept.push(field.to_string());
        }
        self.fields = kept;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instance_id(&self) -> Option<&str> {
        self.instance_id.as_deref()
    }

    pub fn query(&self) -> Option<&Map<String, Value>> {
        self.query.as_ref()
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// `name` or `name/instance`.
    pub fn resource_path(&self) -> String {
        match &self.instance_id {
            Some(id) => format!("{}/{}", self.name, id),
            None => self.name.clone(),
        }
    }

    /// `name` or `name-instance`.
    pub fn display_key(&self) -> String {
        match &self.instance_id {
            Some(id) => format!("{}-{}", self.name, id),
            None => self.name.clone(),
        }
    }

    /// Resolve this topic against the upstream base URL, e.g.
    /// `ws://localhost:8888/subscribe/` becomes
    /// `ws://localhost:8888/subscribe/measurement/2`.
    pub fn url(&self, base: &Url) -> Result<Url> {
        if !matches!(base.scheme(), "ws" | "wss") {
            return Err(RelayError::InvalidArgument(format!(
                "upstream url must use ws:// or wss://, got '{base}'"
            )));
        }

        let mut url = base.clone();
        url.set_query(None);
        url.set_fragment(None);
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                RelayError::InvalidArgument(format!("'{base}' cannot be a base url"))
            })?;
            segments.pop_if_empty().push(&self.name);
            if let Some(id) = &self.instance_id {
                segments.push(id);
            }
        }

        if self.query.is_some() || !self.fields.is_empty() {
            let mut pairs = url.query_pairs_mut();
            if let Some(query) = &self.query {
                pairs.append_pair("query", &Value::Object(query.clone()).to_string());
            }
            if !self.fields.is_empty() {
                pairs.append_pair("fields", &self.fields.join(","));
            }
        }

        Ok(url)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.resource_path())
    }
}

/// Parses `name` or `name/instance`.
impl FromStr for Topic {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('/') {
            Some((name, id)) => Topic::new(name, Some(id)),
            None => Topic::new(s, None),
        }
    }
}

fn validate_segment(what: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(RelayError::InvalidArgument(format!("{what} must not be empty")));
    }
    if value.contains('/') {
        return Err(RelayError::InvalidArgument(format!(
            "{what} must not contain '/': '{value}'"
        )));
    }
    // url path building drops dot segments, which would alias another topic
    if value == "." || value == ".." {
        return Err(RelayError::InvalidArgument(format!(
            "{what} must not be '{value}'"
        )));
    }
    Ok(value.to_string())
}
