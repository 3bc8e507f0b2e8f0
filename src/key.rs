//! Key paths: the addresses of the ontology.
//!
//! A [`KeyPath`] is an ordered, non-empty sequence of opaque [`Token`]s. Both
//! the engine's registry and every rule's private fact store are tries keyed
//! by key paths. Facts themselves are arbitrary JSON values ([`Fact`]).

use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::error::KeyError;

/// An arbitrary, transportable fact value.
pub type Fact = serde_json::Value;

/// A single opaque, hashable path segment.
///
/// Human-readable formats carry tokens as a bare integer or string; binary
/// formats carry them tagged, since they cannot self-describe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Token {
    Int(i64),
    Text(String),
}

impl Token {
    /// Parse one text segment. Only canonical integer text (what
    /// `i64::to_string` produces) becomes [`Token::Int`], so `"007"`, `"+3"`
    /// and `"-0"` stay text and every path prints back as it was parsed.
    pub fn parse_segment(segment: &str) -> Self {
        match segment.parse::<i64>() {
            Ok(n) if n.to_string() == segment => Token::Int(n),
            _ => Token::Text(segment.to_string()),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Int(n) => write!(f, "{n}"),
            Token::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for Token {
    fn from(s: &str) -> Self {
        Token::Text(s.to_string())
    }
}

impl From<String> for Token {
    fn from(s: String) -> Self {
        Token::Text(s)
    }
}

impl From<i64> for Token {
    fn from(n: i64) -> Self {
        Token::Int(n)
    }
}

impl From<i32> for Token {
    fn from(n: i32) -> Self {
        Token::Int(n.into())
    }
}

/// Tagged form used by non-self-describing formats such as bincode.
#[derive(Serialize, Deserialize)]
enum TaggedToken {
    Int(i64),
    Text(String),
}

impl Serialize for Token {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            match self {
                Token::Int(n) => serializer.serialize_i64(*n),
                Token::Text(s) => serializer.serialize_str(s),
            }
        } else {
            match self {
                Token::Int(n) => TaggedToken::Int(*n),
                Token::Text(s) => TaggedToken::Text(s.clone()),
            }
            .serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Token {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            deserializer.deserialize_any(TokenVisitor)
        } else {
            Ok(match TaggedToken::deserialize(deserializer)? {
                TaggedToken::Int(n) => Token::Int(n),
                TaggedToken::Text(s) => Token::Text(s),
            })
        }
    }
}

struct TokenVisitor;

impl Visitor<'_> for TokenVisitor {
    type Value = Token;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an integer or string key token")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Token, E> {
        Ok(Token::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Token, E> {
        i64::try_from(v)
            .map(Token::Int)
            .map_err(|_| E::custom(format!("integer token {v} out of range")))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Token, E> {
        Ok(Token::Text(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Token, E> {
        Ok(Token::Text(v))
    }
}

/// An ordered, non-empty sequence of tokens identifying a trie location.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<Token>", into = "Vec<Token>")]
pub struct KeyPath(Vec<Token>);

impl KeyPath {
    /// Build a key path from tokens. Fails on an empty sequence.
    pub fn new<I, T>(tokens: I) -> Result<Self, KeyError>
    where
        I: IntoIterator<Item = T>,
        T: Into<Token>,
    {
        let tokens: Vec<Token> = tokens.into_iter().map(Into::into).collect();
        if tokens.is_empty() {
            return Err(KeyError::EmptyPath);
        }
        Ok(Self(tokens))
    }

    /// Build a key path from a guaranteed first token and any remainder.
    pub fn from_parts(first: Token, rest: Vec<Token>) -> Self {
        let mut tokens = Vec::with_capacity(rest.len() + 1);
        tokens.push(first);
        tokens.extend(rest);
        Self(tokens)
    }

    /// Parse the `/`-separated text form, e.g. `"sensor/kitchen/3"`.
    pub fn parse(input: &str) -> Result<Self, KeyError> {
        let trimmed = input.trim().trim_matches('/');
        if trimmed.is_empty() {
            return Err(KeyError::EmptyPath);
        }
        let mut tokens = Vec::new();
        for segment in trimmed.split('/') {
            if segment.is_empty() {
                return Err(KeyError::Parse {
                    input: input.to_string(),
                    message: "empty segment".into(),
                });
            }
            tokens.push(Token::parse_segment(segment));
        }
        Ok(Self(tokens))
    }

    pub fn tokens(&self) -> &[Token] {
        &self.0
    }

    /// Number of tokens (always at least one).
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; present for API symmetry with collections.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Split into the intermediate tokens and the terminal token.
    pub fn split_last(&self) -> (&[Token], &Token) {
        let (last, prefix) = self
            .0
            .split_last()
            .unwrap_or_else(|| unreachable!("KeyPath is never empty"));
        (prefix, last)
    }

    /// Return a new path with `token` appended.
    pub fn child(&self, token: impl Into<Token>) -> Self {
        let mut tokens = self.0.clone();
        tokens.push(token.into());
        Self(tokens)
    }
}

impl TryFrom<Vec<Token>> for KeyPath {
    type Error = KeyError;

    fn try_from(tokens: Vec<Token>) -> Result<Self, Self::Error> {
        Self::new(tokens)
    }
}

impl From<KeyPath> for Vec<Token> {
    fn from(path: KeyPath) -> Self {
        path.0
    }
}

impl std::str::FromStr for KeyPath {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, token) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{token}")?;
        }
        Ok(())
    }
}

/// Build a [`KeyPath`] from one or more token expressions.
///
/// ```
/// use rulenet::keypath;
/// let path = keypath!["sensor", "kitchen", 3];
/// assert_eq!(path.to_string(), "sensor/kitchen/3");
/// ```
#[macro_export]
macro_rules! keypath {
    ($first:expr $(, $rest:expr)* $(,)?) => {
        $crate::key::KeyPath::from_parts(
            $crate::key::Token::from($first),
            vec![$($crate::key::Token::from($rest)),*],
        )
    };
}
