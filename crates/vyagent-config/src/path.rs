//! Typed configuration paths.
//!
//! A [`ConfigPath`] is the ordered token sequence naming one fact in the
//! configuration store, e.g. `service dns forwarding name-server 8.8.8.8`.
//! Paths are validated when built, so a malformed path is caught at the call
//! site instead of inside a commit script.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::lexer::{self, Token};

/// Builds a [`ConfigPath`] from a format string.
///
/// Expands to a `ConfigResult<ConfigPath>`.
///
/// ```
/// use vyagent_config::config_path;
///
/// let path = config_path!("protocols static route {} blackhole distance {}", "10.1.0.0/24", 1).unwrap();
/// assert_eq!(path.len(), 7);
/// ```
#[macro_export]
macro_rules! config_path {
    ($($arg:tt)*) => {
        $crate::ConfigPath::parse(&format!($($arg)*))
    };
}

/// An ordered, non-empty sequence of configuration tokens.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConfigPath {
    tokens: Vec<String>,
}

impl ConfigPath {
    /// Splits `text` into tokens using shell quoting rules.
    pub fn parse(text: &str) -> ConfigResult<Self> {
        let spanned = lexer::tokenize(text).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::invalid_path(text, message),
            other => other,
        })?;

        let mut tokens = Vec::with_capacity(spanned.len());
        for s in spanned {
            match s.token {
                Token::Word(w) => tokens.push(w),
                Token::Open | Token::Close => {
                    return Err(ConfigError::invalid_path(text, "braces are not allowed in a path"))
                }
                Token::Newline => {
                    return Err(ConfigError::invalid_path(text, "a path must fit on one line"))
                }
            }
        }

        Self::from_tokens(tokens).map_err(|e| match e {
            ConfigError::InvalidPath { reason, .. } => ConfigError::invalid_path(text, reason),
            other => other,
        })
    }

    /// Builds a path from already-split tokens.
    pub fn from_tokens<I, S>(tokens: I) -> ConfigResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tokens: Vec<String> = tokens.into_iter().map(Into::into).collect();
        if tokens.is_empty() {
            return Err(ConfigError::invalid_path("", "path is empty"));
        }
        for token in &tokens {
            check_token(token)?;
        }
        Ok(Self { tokens })
    }

    /// A single-token path.
    pub fn root(token: impl Into<String>) -> Self {
        Self {
            tokens: vec![token.into()],
        }
    }

    /// Wraps tokens already known to be non-empty.
    pub(crate) fn from_vec(tokens: Vec<String>) -> Self {
        debug_assert!(!tokens.is_empty());
        Self { tokens }
    }

    /// The tokens of this path.
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Number of tokens.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Always false; kept for the `len`/`is_empty` pair.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// The last token.
    pub fn last(&self) -> &str {
        self.tokens.last().map(String::as_str).unwrap_or_default()
    }

    /// Returns a new path with `token` appended.
    pub fn child(&self, token: impl Into<String>) -> Self {
        let mut tokens = self.tokens.clone();
        tokens.push(token.into());
        Self { tokens }
    }

    /// Like [`child`](Self::child), for tokens that come from outside the
    /// agent.
    pub fn try_child(&self, token: impl Into<String>) -> ConfigResult<Self> {
        let token = token.into();
        check_token(&token)?;
        Ok(self.child(token))
    }

    /// Returns a new path with every token of `other` appended.
    pub fn join(&self, other: &ConfigPath) -> Self {
        let mut tokens = self.tokens.clone();
        tokens.extend(other.tokens.iter().cloned());
        Self { tokens }
    }

    /// The path without its last token, `None` for a single-token path.
    pub fn parent(&self) -> Option<Self> {
        (self.tokens.len() > 1).then(|| Self {
            tokens: self.tokens[..self.tokens.len() - 1].to_vec(),
        })
    }

    /// Returns true if `prefix` is a leading part of this path.
    pub fn starts_with(&self, prefix: &ConfigPath) -> bool {
        self.tokens.starts_with(&prefix.tokens)
    }

    /// Returns the tokens after `prefix`, if any remain.
    pub fn strip_prefix(&self, prefix: &ConfigPath) -> Option<Self> {
        if !self.starts_with(prefix) || self.len() == prefix.len() {
            return None;
        }
        Some(Self {
            tokens: self.tokens[prefix.len()..].to_vec(),
        })
    }
}

fn check_token(token: &str) -> ConfigResult<()> {
    if token.contains(['{', '}']) {
        return Err(ConfigError::invalid_path(token, "braces are not allowed in a path"));
    }
    Ok(())
}

/// Quotes a token for a commit script or configuration text, if needed.
pub fn quote_token(token: &str) -> Cow<'_, str> {
    let safe = !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_.:/@%+=,-".contains(c));
    if safe {
        Cow::Borrowed(token)
    } else {
        Cow::Owned(format!("'{}'", token.replace('\'', r"'\''")))
    }
}

impl fmt::Display for ConfigPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, token) in self.tokens.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            f.write_str(&quote_token(token))?;
        }
        Ok(())
    }
}

impl FromStr for ConfigPath {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ConfigPath {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ConfigPath> for String {
    fn from(path: ConfigPath) -> Self {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_simple() {
        let path = ConfigPath::parse("service dns forwarding name-server 8.8.8.8").unwrap();
        assert_eq!(path.len(), 5);
        assert_eq!(path.last(), "8.8.8.8");
        assert_eq!(path.to_string(), "service dns forwarding name-server 8.8.8.8");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(ConfigPath::parse("").is_err());
        assert!(ConfigPath::parse("   ").is_err());
        assert!(ConfigPath::parse("interfaces { ethernet").is_err());
        assert!(ConfigPath::parse("a\nb").is_err());
        assert!(ConfigPath::parse("description 'open").is_err());
    }

    #[test]
    fn test_braces_rejected_even_when_quoted() {
        for text in ["a '{'", "description \"x}\"", "a b\\{"] {
            match ConfigPath::parse(text) {
                Err(ConfigError::InvalidPath { path, .. }) => assert_eq!(path, text),
                other => panic!("Expected InvalidPath for {text}, got {other:?}"),
            }
        }
        assert!(ConfigPath::from_tokens(["{"]).is_err());
        assert!(ConfigPath::from_tokens(["service", "dns}"]).is_err());

        let base = ConfigPath::root("service");
        assert!(base.try_child("dns{").is_err());
        assert_eq!(base.try_child("dns").unwrap().to_string(), "service dns");
    }

    #[test]
    fn test_display_quotes_when_needed() {
        let path = ConfigPath::from_tokens(["firewall", "name", "eth0.local", "rule", "1", "description", "mgmt port's"]).unwrap();
        assert_eq!(
            path.to_string(),
            r"firewall name eth0.local rule 1 description 'mgmt port'\''s'"
        );
        assert_eq!(ConfigPath::parse(&path.to_string()).unwrap(), path);
    }

    #[test]
    fn test_macro() {
        let path = config_path!("protocols static route {} next-hop {} distance {}", "10.1.0.0/24", "10.0.0.1", 1).unwrap();
        assert_eq!(
            path.to_string(),
            "protocols static route 10.1.0.0/24 next-hop 10.0.0.1 distance 1"
        );
    }

    #[test]
    fn test_parent_child_and_prefix() {
        let base = ConfigPath::parse("service dns").unwrap();
        let full = base.child("forwarding").join(&ConfigPath::parse("listen-address 10.0.0.1").unwrap());
        assert!(full.starts_with(&base));
        assert_eq!(full.strip_prefix(&base).unwrap().to_string(), "forwarding listen-address 10.0.0.1");
        assert_eq!(full.parent().unwrap().last(), "listen-address");
        assert!(ConfigPath::parse("service").unwrap().parent().is_none());
        assert!(base.strip_prefix(&base).is_none());
    }

    #[test]
    fn test_serde_as_string() {
        let path: ConfigPath = serde_json::from_str("\"system host-name vr1\"").unwrap();
        assert_eq!(path.len(), 3);
        assert_eq!(serde_json::to_string(&path).unwrap(), "\"system host-name vr1\"");
    }
}
