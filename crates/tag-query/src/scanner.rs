//! Query tokenizer
//!
//! Splits a raw query into a flat token stream. Whitespace separates tokens
//! except inside a `name:"quoted phrase"`; `(` and `)` are group markers only
//! when they stand alone between whitespace, so tags such as `(ok)` or
//! `smile_(expression)` stay literal.

use serde::Serialize;
use unicode_normalization::UnicodeNormalization;

use crate::query::Polarity;

/// What a token is, independent of its polarity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TokenKind {
    PlainTag { name: String },
    /// A tag name containing `*`
    WildcardTag { pattern: String },
    MetaTag { name: String, value: String },
    /// `name:"phrase with spaces"`, quotes stripped
    QuotedMetaTag { name: String, phrase: String },
    GroupOpen,
    GroupClose,
}

/// One token with its prefix polarity and exact source text
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Token {
    pub polarity: Polarity,
    pub kind: TokenKind,
    /// Source substring, prefix included
    pub raw: String,
}

impl Token {
    #[must_use]
    pub const fn is_group_marker(&self) -> bool {
        matches!(self.kind, TokenKind::GroupOpen | TokenKind::GroupClose)
    }
}

/// Tokenize `query`. Never fails; any input yields some token stream.
#[must_use]
pub fn scan(query: &str) -> Vec<Token> {
    let normalized: String = query.nfc().collect();
    let mut rest = normalized.as_str();
    let mut tokens = Vec::new();

    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }
        let len = quoted_len(rest).unwrap_or_else(|| word_len(rest));
        let (raw, tail) = rest.split_at(len);
        tokens.push(classify(raw, tail.starts_with(char::is_whitespace)));
        rest = tail;
    }

    tracing::trace!(count = tokens.len(), "scanned query");
    tokens
}

fn word_len(s: &str) -> usize {
    s.find(char::is_whitespace).unwrap_or(s.len())
}

fn metatag_name_len(body: &str) -> usize {
    body.find(|c: char| !(c.is_ascii_alphabetic() || c == '_'))
        .unwrap_or(body.len())
}

/// Byte length of a `[-~]name:"..."` token at the start of `s`, when its
/// closing quote exists.
fn quoted_len(s: &str) -> Option<usize> {
    let body_start = usize::from(s.starts_with(['-', '~']));
    let body = &s[body_start..];
    let name_len = metatag_name_len(body);
    if name_len == 0 || !body[name_len..].starts_with(":\"") {
        return None;
    }
    let phrase_start = body_start + name_len + 2;
    let close = s[phrase_start..].find('"')?;
    Some(phrase_start + close + 1)
}

fn split_polarity(raw: &str) -> (Polarity, &str) {
    if raw.len() > 1 {
        if let Some(body) = raw.strip_prefix('-') {
            return (Polarity::MustNot, body);
        }
        if let Some(body) = raw.strip_prefix('~') {
            return (Polarity::Should, body);
        }
    }
    (Polarity::Must, raw)
}

fn quoted_parts(body: &str) -> Option<(&str, &str)> {
    let name_len = metatag_name_len(body);
    if name_len == 0 {
        return None;
    }
    let phrase = body[name_len..].strip_prefix(":\"")?.strip_suffix('"')?;
    Some((&body[..name_len], phrase))
}

fn metatag_parts(body: &str) -> Option<(&str, &str)> {
    let (name, value) = body.split_once(':')?;
    let valid_name =
        !name.is_empty() && name.chars().all(|c| c.is_ascii_alphabetic() || c == '_');
    (valid_name && !value.is_empty()).then_some((name, value))
}

/// `followed_by_ws`: whether whitespace comes right after `raw` in the input.
fn classify(raw: &str, followed_by_ws: bool) -> Token {
    let (polarity, body) = split_polarity(raw);
    let kind = if raw == ")" {
        TokenKind::GroupClose
    } else if body == "(" && followed_by_ws {
        TokenKind::GroupOpen
    } else if let Some((name, phrase)) = quoted_parts(body) {
        TokenKind::QuotedMetaTag {
            name: name.to_string(),
            phrase: phrase.to_string(),
        }
    } else if let Some((name, value)) = metatag_parts(body) {
        TokenKind::MetaTag {
            name: name.to_string(),
            value: value.to_string(),
        }
    } else if body.contains('*') {
        TokenKind::WildcardTag {
            pattern: body.to_string(),
        }
    } else {
        TokenKind::PlainTag {
            name: body.to_string(),
        }
    };
    Token {
        polarity,
        kind,
        raw: raw.to_string(),
    }
}
