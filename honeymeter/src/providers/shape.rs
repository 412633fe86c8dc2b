use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::json_path;

/// Declarative predicate over a decoded response body.
///
/// A body matches when every `requires` path is present, every `equals`
/// path holds exactly the given value, and no `absent` path is present.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ShapeMatcher {
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub equals: BTreeMap<String, Value>,
    #[serde(default)]
    pub absent: Vec<String>,
}

impl ShapeMatcher {
    pub fn requiring<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            requires: paths.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_equals(mut self, path: &str, value: Value) -> Self {
        self.equals.insert(path.to_string(), value);
        self
    }

    pub fn with_absent(mut self, path: &str) -> Self {
        self.absent.push(path.to_string());
        self
    }

    /// A matcher that requires nothing would accept `{}`; registries reject it.
    pub fn is_unconstrained(&self) -> bool {
        self.requires.is_empty() && self.equals.is_empty()
    }

    pub fn matches(&self, json: &Value) -> bool {
        self.requires.iter().all(|p| json_path::exists(json, p))
            && self
                .equals
                .iter()
                .all(|(p, expected)| json_path::lookup(json, p) == Some(expected))
            && !self.absent.iter().any(|p| json_path::exists(json, p))
    }
}
