//! Field paths used to locate conversion failures

use std::fmt;

/// Dotted path from the conversion root to a field, e.g. `items[1].name`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldPath {
    rendered: String,
}

impl FieldPath {
    /// The empty path of the conversion root
    pub fn root() -> Self {
        Self::default()
    }

    /// Path of a named field below this one
    pub fn field(&self, name: &str) -> Self {
        let rendered = if self.rendered.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.rendered, name)
        };
        Self { rendered }
    }

    /// Path of a list element below this one
    pub fn index(&self, index: usize) -> Self {
        Self {
            rendered: format!("{}[{}]", self.rendered, index),
        }
    }

    /// Path of a map entry below this one
    pub fn key(&self, key: impl fmt::Display) -> Self {
        Self {
            rendered: format!("{}[{}]", self.rendered, key),
        }
    }

    /// Whether this is the root path
    pub fn is_root(&self) -> bool {
        self.rendered.is_empty()
    }

    /// The rendered path
    pub fn as_str(&self) -> &str {
        &self.rendered
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.rendered.is_empty() {
            f.write_str("<root>")
        } else {
            f.write_str(&self.rendered)
        }
    }
}

impl From<&str> for FieldPath {
    fn from(s: &str) -> Self {
        Self {
            rendered: s.to_string(),
        }
    }
}
