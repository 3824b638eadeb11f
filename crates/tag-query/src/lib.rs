//! Tag query language: tokenizer, parser and search compiler
//!
//! A query such as `cat -dog ~( fox wolf ) score:>10 order:favcount` runs
//! through these stages:
//! - [`scanner`]: raw text to a flat [`Token`] stream
//! - [`parser`]: tokens to a validated, alias-resolved [`ParsedQuery`] tree
//!   (metatag values go through [`metatags`], [`range`] and [`value`])
//! - [`compiler`]: tree to a backend-neutral [`CompiledSearch`] document
//! - [`normalize`]: canonical query strings for cache keys
//!
//! The pipeline never touches storage. Everything external is reached
//! through the traits in [`lookup`].

#![forbid(unsafe_code)]

pub mod compiler;
pub mod error;
pub mod lookup;
pub mod metatags;
pub mod normalize;
pub mod parser;
pub mod query;
pub mod range;
pub mod scanner;
pub mod value;

pub use compiler::{
    Clause, CompiledQueryNode, CompiledSearch, RangeBounds, ScoreFunction, SortKey, TermValue,
    compile, compile_group,
};
pub use error::{QueryError, QueryResult};
pub use lookup::{
    AliasResolver, Collaborators, IdentityKind, IdentityLookup, PermissionCheck, StaticLookups,
    TagNameLookup,
};
pub use metatags::{MetatagRegistry, UNRESOLVED_ID};
pub use normalize::normalize_query;
pub use parser::{GroupParser, NOT_FOUND_TAG, parse_query};
pub use query::{
    FieldClause, FieldConstraint, Group, OrderSpec, ParsedQuery, Polarity, Presence,
    SortDirection, StatusFilter, TagBuckets,
};
pub use range::{Range, TypedRange};
pub use scanner::{Token, TokenKind, scan};

pub use tag_query_core::{Identity, QueryConfig, Role, SearchContext};

/// Parse, compile and normalize queries against one set of collaborators.
///
/// Cheap to construct; holds only references. One pipeline can serve many
/// requests, each with its own [`SearchContext`].
#[derive(Debug, Clone, Copy)]
pub struct QueryPipeline<'a> {
    config: &'a QueryConfig,
    metatags: &'a MetatagRegistry,
    collaborators: Collaborators<'a>,
}

impl<'a> QueryPipeline<'a> {
    #[must_use]
    pub fn new(config: &'a QueryConfig, collaborators: Collaborators<'a>) -> Self {
        Self {
            config,
            metatags: MetatagRegistry::standard(),
            collaborators,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &QueryConfig {
        self.config
    }

    /// Build the validated query tree.
    pub fn parse(&self, query: &str, context: &SearchContext) -> QueryResult<ParsedQuery> {
        GroupParser::new(self.config, context, self.metatags, self.collaborators).parse(query)
    }

    /// Parse and compile into a search document.
    pub fn compile(&self, query: &str, context: &SearchContext) -> QueryResult<CompiledSearch> {
        let parsed = self.parse(query, context)?;
        Ok(compile(&parsed))
    }

    /// Canonical form of `query`; aliases apply when the context asks for them.
    #[must_use]
    pub fn normalize(&self, query: &str, context: &SearchContext) -> String {
        let aliases = context.resolve_aliases.then_some(self.collaborators.aliases);
        normalize_query(query, aliases)
    }
}
