//! Parsed query tree
//!
//! [`ParsedQuery`] is the output of [`crate::parser::parse_query`] and the
//! only input of [`crate::compiler::compile`]. It is never mutated after the
//! parser returns it.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;

use crate::range::TypedRange;

/// Whether a token must, must not, or should match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    /// No prefix
    #[default]
    Must,
    /// `-` prefix
    MustNot,
    /// `~` prefix
    Should,
}

impl Polarity {
    /// Source prefix that produces this polarity.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Must => "",
            Self::MustNot => "-",
            Self::Should => "~",
        }
    }
}

impl std::fmt::Display for Polarity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Must => write!(f, "must"),
            Self::MustNot => write!(f, "must_not"),
            Self::Should => write!(f, "should"),
        }
    }
}

/// Plain tag names of one group, split by polarity, in source order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TagBuckets {
    pub must: Vec<String>,
    pub must_not: Vec<String>,
    pub should: Vec<String>,
}

impl TagBuckets {
    pub fn push(&mut self, polarity: Polarity, name: impl Into<String>) {
        self.bucket_mut(polarity).push(name.into());
    }

    #[must_use]
    pub fn bucket(&self, polarity: Polarity) -> &[String] {
        match polarity {
            Polarity::Must => &self.must,
            Polarity::MustNot => &self.must_not,
            Polarity::Should => &self.should,
        }
    }

    pub const fn bucket_mut(&mut self, polarity: Polarity) -> &mut Vec<String> {
        match polarity {
            Polarity::Must => &mut self.must,
            Polarity::MustNot => &mut self.must_not,
            Polarity::Should => &mut self.should,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.must.is_empty() && self.must_not.is_empty() && self.should.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.must.len() + self.must_not.len() + self.should.len()
    }
}

/// `any` / `none` on a relational field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    Any,
    None,
}

/// Moderation state filter for `status:`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusFilter {
    Pending,
    Flagged,
    Modqueue,
    Deleted,
    /// Neither pending, flagged nor deleted
    Active,
    /// No status restriction at all
    Any,
}

impl StatusFilter {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "flagged" => Some(Self::Flagged),
            "modqueue" => Some(Self::Modqueue),
            "deleted" => Some(Self::Deleted),
            "active" => Some(Self::Active),
            "any" | "all" => Some(Self::Any),
            _ => None,
        }
    }
}

/// The typed right-hand side of a metatag
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldConstraint {
    Range(TypedRange),
    /// Resolved ids; `[-1]` when nothing resolved
    IdentityList(Vec<i64>),
    Presence(Presence),
    Enum(String),
    Boolean(bool),
    Status(StatusFilter),
    /// Text with `*` wildcards (a trailing-only `*` compiles to a prefix)
    Pattern(String),
    Phrase(String),
    /// Matches nothing; stands in for values that failed to parse
    MatchNone,
}

/// One constraint on an index field, with the polarity of its token
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldClause {
    pub polarity: Polarity,
    pub constraint: FieldConstraint,
}

/// A parenthesized group (or the implicit root)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Group {
    pub polarity: Polarity,
    pub tags: TagBuckets,
    /// Index field name to clauses, in first-seen order
    pub metatag_fields: IndexMap<String, Vec<FieldClause>>,
    pub subgroups: Vec<Group>,
}

impl Group {
    #[must_use]
    pub fn new(polarity: Polarity) -> Self {
        Self {
            polarity,
            ..Self::default()
        }
    }

    pub fn add_field(&mut self, field: impl Into<String>, clause: FieldClause) {
        self.metatag_fields
            .entry(field.into())
            .or_default()
            .push(clause);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.metatag_fields.is_empty() && self.subgroups.is_empty()
    }

    /// Clauses recorded for `field`, empty when the field never appeared.
    #[must_use]
    pub fn field(&self, field: &str) -> &[FieldClause] {
        self.metatag_fields.get(field).map_or(&[], Vec::as_slice)
    }

    /// Visit every tag bucket in this group and all descendants.
    pub fn for_each_bucket_mut(&mut self, f: &mut impl FnMut(&mut Vec<String>)) {
        f(&mut self.tags.must);
        f(&mut self.tags.must_not);
        f(&mut self.tags.should);
        for sub in &mut self.subgroups {
            sub.for_each_bucket_mut(f);
        }
    }

    /// Deepest nesting below this group (0 for a leaf group).
    #[must_use]
    pub fn depth(&self) -> usize {
        self.subgroups
            .iter()
            .map(|g| g.depth() + 1)
            .max()
            .unwrap_or(0)
    }
}

/// Sort direction for an index field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Requested result ordering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderSpec {
    /// Newest first (`id` descending)
    #[default]
    Default,
    /// Sort on one index field, then `id`
    Field {
        field: String,
        direction: SortDirection,
    },
    /// Hot-ranking: recent posts weighted by score
    Rank,
    Random,
}

/// A fully parsed, validated and alias-resolved query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedQuery {
    pub root: Group,
    pub order: OrderSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub random_seed: Option<i64>,
    /// Counted tokens across the whole tree
    pub total_tag_count: u32,
    /// Instant relative dates were resolved against
    pub now: DateTime<Utc>,
}
