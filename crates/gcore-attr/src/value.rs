//! Attribute values and the assignments that produce them.

use std::fmt;

/// The state of one attribute for one path.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum AttrValue {
    /// No rule mentions the attribute.
    #[default]
    Unspecified,
    /// `name`
    True,
    /// `-name`
    False,
    /// `!name`: a rule explicitly cleared the attribute.
    Unset,
    /// `name=value`
    Value(String),
}

impl AttrValue {
    pub fn is_true(&self) -> bool {
        matches!(self, Self::True)
    }

    pub fn is_false(&self) -> bool {
        matches!(self, Self::False)
    }

    pub fn is_unspecified(&self) -> bool {
        matches!(self, Self::Unspecified)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unspecified => f.write_str("unspecified"),
            Self::True => f.write_str("set"),
            Self::False => f.write_str("unset"),
            Self::Unset => f.write_str("cleared"),
            Self::Value(v) => f.write_str(v),
        }
    }
}

/// One `name`, `-name`, `!name` or `name=value` token of a rule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Assignment {
    pub name: String,
    pub value: AttrValue,
}

impl Assignment {
    pub fn new(name: impl Into<String>, value: AttrValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    /// Parse a single token. Returns `None` when the name is not valid.
    pub fn parse(token: &str) -> Option<Self> {
        let (name, value) = if let Some(rest) = token.strip_prefix('-') {
            (rest, AttrValue::False)
        } else if let Some(rest) = token.strip_prefix('!') {
            (rest, AttrValue::Unset)
        } else if let Some((name, value)) = token.split_once('=') {
            (name, AttrValue::Value(value.to_string()))
        } else {
            (token, AttrValue::True)
        };
        is_valid_attr_name(name).then(|| Self::new(name, value))
    }

    /// Parse every whitespace-separated token, skipping invalid ones.
    pub fn parse_all(tokens: &str) -> Vec<Self> {
        tokens
            .split_whitespace()
            .filter_map(|token| {
                let parsed = Self::parse(token);
                if parsed.is_none() {
                    tracing::debug!(token, "skipping invalid attribute assignment");
                }
                parsed
            })
            .collect()
    }
}

/// Names are ASCII letters, digits, `-`, `_` and `.`, not starting with `-`.
pub fn is_valid_attr_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('-')
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}
