//! Query compiler
//!
//! Lowers a [`ParsedQuery`] into a backend-neutral boolean search document:
//! nested must/must_not/should nodes over term, range, prefix, wildcard,
//! exists and phrase clauses, plus sort keys and an optional score function.
//! Field names are the index's:
//! - `tags`: one term per tag name
//! - metatag fields: as named by the metatag registry
//! - `is_pending`, `is_flagged`, `is_deleted`: status flags

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::query::{
    FieldConstraint, Group, OrderSpec, ParsedQuery, Polarity, Presence, SortDirection,
    StatusFilter,
};
use crate::range::{Range, TypedRange};

/// Index field holding tag names.
pub const TAGS_FIELD: &str = "tags";

/// Pseudo-field for sorting on the computed relevance score.
pub const SCORE_SORT_FIELD: &str = "_score";

/// `rank` only considers posts newer than this.
const RANK_WINDOW_DAYS: i64 = 2;
/// Seconds-since-epoch origin of the rank time term (2005-05-24).
const RANK_EPOCH_SECONDS: i64 = 1_116_936_000;
/// Seconds that weigh as much as one order of magnitude of score.
const RANK_TIME_DIVISOR: f64 = 35_000.0;
const RANK_LOG_BASE: f64 = 3.0;

// ── Output model ────────────────────────────────────────────────────────

/// A scalar compared against an index field
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TermValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Date(DateTime<Utc>),
    Text(String),
}

/// Open or closed bounds of a range clause
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RangeBounds {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gt: Option<TermValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gte: Option<TermValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lt: Option<TermValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lte: Option<TermValue>,
}

/// One query clause
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Clause {
    Bool(CompiledQueryNode),
    Term { field: String, value: TermValue },
    Terms {
        field: String,
        values: Vec<TermValue>,
    },
    Range { field: String, bounds: RangeBounds },
    Prefix { field: String, value: String },
    Wildcard { field: String, pattern: String },
    Exists { field: String },
    MatchPhrase { field: String, phrase: String },
    MatchAll,
}

impl Clause {
    fn term(field: &str, value: TermValue) -> Self {
        Self::Term {
            field: field.to_string(),
            value,
        }
    }

    /// A clause no document satisfies.
    #[must_use]
    pub fn match_none() -> Self {
        Self::term("id", TermValue::Int(-1))
    }
}

/// A boolean node
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CompiledQueryNode {
    pub must: Vec<Clause>,
    pub must_not: Vec<Clause>,
    pub should: Vec<Clause>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum_should_match: Option<u32>,
}

impl CompiledQueryNode {
    const fn bucket_mut(&mut self, polarity: Polarity) -> &mut Vec<Clause> {
        match polarity {
            Polarity::Must => &mut self.must,
            Polarity::MustNot => &mut self.must_not,
            Polarity::Should => &mut self.should,
        }
    }

    /// True for the node an empty group compiles to.
    #[must_use]
    pub fn is_match_all(&self) -> bool {
        self.must == [Clause::MatchAll] && self.must_not.is_empty() && self.should.is_empty()
    }

    /// Terminal clauses in this node and every nested node.
    #[must_use]
    pub fn clause_count(&self) -> usize {
        self.must
            .iter()
            .chain(&self.must_not)
            .chain(&self.should)
            .map(|clause| match clause {
                Clause::Bool(node) => node.clause_count(),
                _ => 1,
            })
            .sum()
    }
}

/// One sort key, applied in order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

impl SortKey {
    fn new(field: &str, direction: SortDirection) -> Self {
        Self {
            field: field.to_string(),
            direction,
        }
    }
}

/// Relevance function for the `_score` sort key
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScoreFunction {
    /// `log(score) / log(log_base) + (created_at - epoch_seconds) / time_divisor`
    Rank {
        score_field: String,
        created_field: String,
        log_base: f64,
        epoch_seconds: i64,
        time_divisor: f64,
    },
    /// Uniform random score; reproducible when seeded
    Random {
        #[serde(skip_serializing_if = "Option::is_none")]
        seed: Option<i64>,
    },
}

/// Everything the search index needs to execute a query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledSearch {
    pub query: CompiledQueryNode,
    pub sort: Vec<SortKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_function: Option<ScoreFunction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub random_seed: Option<i64>,
}

// ── Compilation ─────────────────────────────────────────────────────────

/// Compile a parsed query.
#[must_use]
pub fn compile(parsed: &ParsedQuery) -> CompiledSearch {
    let mut query = compile_group(&parsed.root);
    let mut sort = Vec::new();
    let mut score_function = None;

    match &parsed.order {
        OrderSpec::Default => {}
        OrderSpec::Field { field, direction } => sort.push(SortKey::new(field, *direction)),
        OrderSpec::Rank => {
            let since = parsed.now - TimeDelta::days(RANK_WINDOW_DAYS);
            let positive = RangeBounds {
                gt: Some(TermValue::Int(0)),
                ..RangeBounds::default()
            };
            let recent = RangeBounds {
                gte: Some(TermValue::Date(since)),
                ..RangeBounds::default()
            };
            add_filters(
                &mut query,
                [
                    range_clause("score", positive),
                    range_clause("created_at", recent),
                ],
            );
            score_function = Some(ScoreFunction::Rank {
                score_field: "score".into(),
                created_field: "created_at".into(),
                log_base: RANK_LOG_BASE,
                epoch_seconds: RANK_EPOCH_SECONDS,
                time_divisor: RANK_TIME_DIVISOR,
            });
            sort.push(SortKey::new(SCORE_SORT_FIELD, SortDirection::Desc));
        }
        OrderSpec::Random => {
            score_function = Some(ScoreFunction::Random {
                seed: parsed.random_seed,
            });
            sort.push(SortKey::new(SCORE_SORT_FIELD, SortDirection::Desc));
        }
    }
    if !sort.iter().any(|key| key.field == "id") {
        sort.push(SortKey::new("id", SortDirection::Desc));
    }

    tracing::debug!(
        clauses = query.clause_count(),
        sort_keys = sort.len(),
        "compiled tag query"
    );
    CompiledSearch {
        query,
        sort,
        score_function,
        limit: parsed.limit,
        random_seed: parsed.random_seed,
    }
}

/// Compile one group into a boolean node.
#[must_use]
pub fn compile_group(group: &Group) -> CompiledQueryNode {
    let mut node = CompiledQueryNode::default();

    for polarity in [Polarity::Must, Polarity::MustNot, Polarity::Should] {
        for name in group.tags.bucket(polarity) {
            node.bucket_mut(polarity)
                .push(Clause::term(TAGS_FIELD, TermValue::Text(name.clone())));
        }
    }
    for (field, clauses) in &group.metatag_fields {
        for clause in clauses {
            node.bucket_mut(clause.polarity)
                .push(constraint_clause(field, &clause.constraint));
        }
    }
    for sub in &group.subgroups {
        node.bucket_mut(sub.polarity)
            .push(Clause::Bool(compile_group(sub)));
    }

    if !node.should.is_empty() {
        node.minimum_should_match = Some(1);
    }
    if node.must.is_empty() && node.must_not.is_empty() && node.should.is_empty() {
        node.must.push(Clause::MatchAll);
    }
    node
}

/// Add required clauses to the top-level node, replacing a bare match-all.
fn add_filters(node: &mut CompiledQueryNode, filters: impl IntoIterator<Item = Clause>) {
    if node.is_match_all() {
        node.must.clear();
    }
    node.must.extend(filters);
}

fn range_clause(field: &str, bounds: RangeBounds) -> Clause {
    Clause::Range {
        field: field.to_string(),
        bounds,
    }
}

fn range_to_clause<T>(field: &str, range: &Range<T>, value: impl Fn(&T) -> TermValue) -> Clause {
    let bounds = match range {
        Range::Eq(v) => return Clause::term(field, value(v)),
        Range::In(values) => {
            return Clause::Terms {
                field: field.to_string(),
                values: values.iter().map(value).collect(),
            };
        }
        Range::Gt(v) => RangeBounds {
            gt: Some(value(v)),
            ..RangeBounds::default()
        },
        Range::Gte(v) => RangeBounds {
            gte: Some(value(v)),
            ..RangeBounds::default()
        },
        Range::Lt(v) => RangeBounds {
            lt: Some(value(v)),
            ..RangeBounds::default()
        },
        Range::Lte(v) => RangeBounds {
            lte: Some(value(v)),
            ..RangeBounds::default()
        },
        Range::Between(low, high) => RangeBounds {
            gte: Some(value(low)),
            lte: Some(value(high)),
            ..RangeBounds::default()
        },
    };
    range_clause(field, bounds)
}

fn flag(field: &str) -> Clause {
    Clause::term(field, TermValue::Bool(true))
}

fn status_clause(status: StatusFilter) -> Clause {
    match status {
        StatusFilter::Pending => flag("is_pending"),
        StatusFilter::Flagged => flag("is_flagged"),
        StatusFilter::Deleted => flag("is_deleted"),
        StatusFilter::Modqueue => Clause::Bool(CompiledQueryNode {
            should: vec![flag("is_pending"), flag("is_flagged")],
            minimum_should_match: Some(1),
            ..CompiledQueryNode::default()
        }),
        StatusFilter::Active => Clause::Bool(CompiledQueryNode {
            must_not: vec![flag("is_pending"), flag("is_flagged"), flag("is_deleted")],
            ..CompiledQueryNode::default()
        }),
        StatusFilter::Any => Clause::MatchAll,
    }
}

fn pattern_clause(field: &str, pattern: &str) -> Clause {
    match pattern.strip_suffix('*') {
        Some(prefix) if !prefix.contains('*') => Clause::Prefix {
            field: field.to_string(),
            value: prefix.to_string(),
        },
        _ => Clause::Wildcard {
            field: field.to_string(),
            pattern: pattern.to_string(),
        },
    }
}

fn constraint_clause(field: &str, constraint: &FieldConstraint) -> Clause {
    match constraint {
        FieldConstraint::Range(TypedRange::Int(range)) => {
            range_to_clause(field, range, |v| TermValue::Int(*v))
        }
        FieldConstraint::Range(TypedRange::Float(range)) => {
            range_to_clause(field, range, |v| TermValue::Float(*v))
        }
        FieldConstraint::Range(TypedRange::Date(range)) => {
            range_to_clause(field, range, |v| TermValue::Date(*v))
        }
        FieldConstraint::IdentityList(ids) => match ids.as_slice() {
            [id] => Clause::term(field, TermValue::Int(*id)),
            _ => Clause::Terms {
                field: field.to_string(),
                values: ids.iter().map(|id| TermValue::Int(*id)).collect(),
            },
        },
        FieldConstraint::Presence(Presence::Any) => Clause::Exists {
            field: field.to_string(),
        },
        FieldConstraint::Presence(Presence::None) => Clause::Bool(CompiledQueryNode {
            must_not: vec![Clause::Exists {
                field: field.to_string(),
            }],
            ..CompiledQueryNode::default()
        }),
        FieldConstraint::Enum(value) => Clause::term(field, TermValue::Text(value.clone())),
        FieldConstraint::Boolean(value) => Clause::term(field, TermValue::Bool(*value)),
        FieldConstraint::Status(status) => status_clause(*status),
        FieldConstraint::Pattern(pattern) => pattern_clause(field, pattern),
        FieldConstraint::Phrase(phrase) => Clause::MatchPhrase {
            field: field.to_string(),
            phrase: phrase.clone(),
        },
        FieldConstraint::MatchNone => Clause::match_none(),
    }
}
