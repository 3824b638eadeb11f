//! Group parser
//!
//! Turns the scanner's flat token stream into a [`ParsedQuery`] tree. The
//! parser is iterative: an explicit stack of open groups, one entry per
//! unclosed `( `. A structural pass settles depth, balance and quotas first;
//! only then are identity values and wildcard patterns collected and
//! resolved in batches, before any token is dispatched.

use std::collections::HashMap;

use tag_query_core::{QueryConfig, SearchContext};

use crate::error::{QueryError, QueryResult};
use crate::lookup::Collaborators;
use crate::metatags::{DispatchEnv, Dispatched, MetatagRegistry, ResolvedIdentities};
use crate::query::{FieldClause, FieldConstraint, Group, OrderSpec, ParsedQuery, Polarity};
use crate::scanner::{self, Token, TokenKind};

/// Tag name that no post carries; stands in for a wildcard with no matches.
pub const NOT_FOUND_TAG: &str = "~~not_found~~";

/// Collaborator answers gathered before dispatch
#[derive(Debug, Default)]
struct Prefetched {
    identities: ResolvedIdentities,
    wildcards: HashMap<String, Vec<String>>,
    /// False when the collaborators were never asked.
    expanded: bool,
}

/// Builds query trees for one request.
pub struct GroupParser<'a> {
    config: &'a QueryConfig,
    context: &'a SearchContext,
    registry: &'a MetatagRegistry,
    collaborators: Collaborators<'a>,
}

impl<'a> GroupParser<'a> {
    #[must_use]
    pub const fn new(
        config: &'a QueryConfig,
        context: &'a SearchContext,
        registry: &'a MetatagRegistry,
        collaborators: Collaborators<'a>,
    ) -> Self {
        Self {
            config,
            context,
            registry,
            collaborators,
        }
    }

    /// Scan and parse `query`.
    pub fn parse(&self, query: &str) -> QueryResult<ParsedQuery> {
        let tokens = scanner::scan(query);
        self.parse_tokens(&tokens)
    }

    /// Parse an already scanned token stream.
    ///
    /// Depth, balance and both quotas are settled before any collaborator is
    /// called. The tree attached to `CountExceeded` is built without
    /// lookups: identities stay unresolved and wildcards keep their pattern.
    pub fn parse_tokens(&self, tokens: &[Token]) -> QueryResult<ParsedQuery> {
        let total = self.measure(tokens)?;
        let free = self.context.free_tags_count;
        let tag_limit = self.config.effective_tag_limit(free);
        let over_quota = total > tag_limit;

        let prefetched = if over_quota {
            Prefetched::default()
        } else {
            self.prefetch(tokens)
        };
        let env = DispatchEnv {
            context: self.context,
            config: self.config,
            identities: &prefetched.identities,
            permissions: self.collaborators.permissions,
        };

        let mut stack = vec![Group::new(Polarity::Must)];
        let mut order = OrderSpec::Default;
        let mut limit = None;
        let mut random_seed = None;

        for token in tokens {
            match &token.kind {
                TokenKind::GroupOpen => {
                    stack.push(Group::new(token.polarity));
                    continue;
                }
                TokenKind::GroupClose => {
                    if stack.len() < 2 {
                        return Err(QueryError::UnclosedGroup);
                    }
                    if let Some(group) = stack.pop() {
                        if !group.is_empty() {
                            if let Some(parent) = stack.last_mut() {
                                parent.subgroups.push(group);
                            }
                        }
                    }
                    continue;
                }
                _ => {}
            }

            let Some(group) = stack.last_mut() else {
                return Err(QueryError::UnclosedGroup);
            };
            match &token.kind {
                TokenKind::PlainTag { name } => {
                    group.tags.push(token.polarity, name.to_lowercase());
                }
                TokenKind::WildcardTag { pattern } => {
                    let pattern = pattern.to_lowercase();
                    let expanded = wildcard_group(&prefetched, &pattern, token.polarity);
                    group.subgroups.push(expanded);
                }
                TokenKind::MetaTag { name, value }
                | TokenKind::QuotedMetaTag {
                    name,
                    phrase: value,
                } => match self.registry.dispatch(name, value, token.polarity, &env)? {
                    Dispatched::Field { field, clause } => group.add_field(field, clause),
                    Dispatched::Order(spec) => order = spec,
                    Dispatched::Limit(n) => limit = Some(n),
                    Dispatched::RandomSeed(seed) => random_seed = Some(seed),
                    Dispatched::Ignored => {}
                    Dispatched::Tag(text) if text.contains('*') => {
                        group
                            .subgroups
                            .push(wildcard_group(&prefetched, &text, token.polarity));
                    }
                    Dispatched::Tag(text) => group.tags.push(token.polarity, text),
                },
                TokenKind::GroupOpen | TokenKind::GroupClose => {}
            }
        }

        if stack.len() != 1 {
            return Err(QueryError::UnclosedGroup);
        }
        let mut root = stack.pop().unwrap_or_default();
        flatten_single_group(&mut root);

        if self.context.safe_mode {
            root.add_field(
                "rating",
                FieldClause {
                    polarity: Polarity::Must,
                    constraint: FieldConstraint::Enum("s".into()),
                },
            );
        }

        if over_quota {
            tracing::debug!(count = total, limit = tag_limit, "tag quota exceeded");
            return Err(QueryError::CountExceeded {
                count: total,
                limit: tag_limit,
                tree: Box::new(root),
            });
        }

        if self.context.resolve_aliases {
            resolve_aliases(&mut root, &self.collaborators);
        }

        tracing::debug!(
            tokens = tokens.len(),
            counted = total,
            depth = root.depth(),
            "parsed tag query"
        );
        Ok(ParsedQuery {
            root,
            order,
            limit,
            random_seed,
            total_tag_count: total,
            now: self.context.now,
        })
    }

    /// Check group depth, balance and the per-group quota; returns the
    /// number of counted tokens.
    fn measure(&self, tokens: &[Token]) -> QueryResult<u32> {
        // One entry per open group, root first.
        let mut counts: Vec<u32> = vec![0];
        let mut total: u32 = 0;

        for token in tokens {
            match &token.kind {
                TokenKind::GroupOpen => {
                    if counts.len() > self.config.max_group_depth {
                        return Err(QueryError::MaxGroupDepthExceeded {
                            max: self.config.max_group_depth,
                        });
                    }
                    counts.push(0);
                }
                TokenKind::GroupClose => {
                    if counts.len() < 2 {
                        return Err(QueryError::UnclosedGroup);
                    }
                    counts.pop();
                }
                _ if self.is_counted(token) => {
                    total += 1;
                    // The root is bounded by the global quota alone.
                    let nested = counts.len() > 1;
                    if let Some(count) = counts.last_mut() {
                        *count += 1;
                        if nested && *count > self.config.max_tokens_in_group {
                            return Err(QueryError::MaxTokensInGroupExceeded {
                                max: self.config.max_tokens_in_group,
                            });
                        }
                    }
                }
                _ => {}
            }
        }

        if counts.len() != 1 {
            return Err(QueryError::UnclosedGroup);
        }
        Ok(total)
    }

    /// Whether `token` counts toward the group and global quotas.
    fn is_counted(&self, token: &Token) -> bool {
        match &token.kind {
            TokenKind::GroupOpen | TokenKind::GroupClose => false,
            TokenKind::PlainTag { .. } | TokenKind::WildcardTag { .. } => true,
            TokenKind::MetaTag { name, .. } | TokenKind::QuotedMetaTag { name, .. } => self
                .registry
                .canonical_name(name)
                .is_none_or(|canonical| !self.config.is_unlimited(canonical)),
        }
    }

    fn prefetch(&self, tokens: &[Token]) -> Prefetched {
        let mut requests = Vec::new();
        let mut patterns: Vec<String> = Vec::new();

        for token in tokens {
            match &token.kind {
                TokenKind::WildcardTag { pattern } => patterns.push(pattern.to_lowercase()),
                TokenKind::MetaTag { name, value }
                | TokenKind::QuotedMetaTag {
                    name,
                    phrase: value,
                } => match self.registry.handler(name) {
                    Some(handler) => {
                        if let Some(kind) = handler.identity_request(value, self.context) {
                            requests.push((kind, value.clone()));
                        }
                    }
                    None => {
                        let text = format!("{name}:{value}").to_lowercase();
                        if text.contains('*') {
                            patterns.push(text);
                        }
                    }
                },
                _ => {}
            }
        }

        if requests.is_empty() && patterns.is_empty() {
            return Prefetched {
                expanded: true,
                ..Prefetched::default()
            };
        }

        let identities = ResolvedIdentities::resolve(self.collaborators.identities, requests);
        patterns.sort_unstable();
        patterns.dedup();
        let wildcards = patterns
            .into_iter()
            .map(|pattern| {
                let names = self
                    .collaborators
                    .tags
                    .matching_names(&pattern, self.config.wildcard_expansion_limit);
                (pattern, names)
            })
            .collect();
        Prefetched {
            identities,
            wildcards,
            expanded: true,
        }
    }
}

/// The group a wildcard expands to: any one of its matches, with the
/// wildcard's own polarity.
fn wildcard_group(prefetched: &Prefetched, pattern: &str, polarity: Polarity) -> Group {
    let mut names = match prefetched.wildcards.get(pattern) {
        Some(names) => names.clone(),
        None if !prefetched.expanded => vec![pattern.to_string()],
        None => Vec::new(),
    };
    if names.is_empty() {
        tracing::warn!(pattern, "wildcard matched no tags");
        names.push(NOT_FOUND_TAG.to_string());
    }
    let mut group = Group::new(polarity);
    group.tags.should = names;
    group
}

/// `( cat dog )` is the same query as `cat dog`.
fn flatten_single_group(root: &mut Group) {
    while root.tags.is_empty()
        && root.metatag_fields.is_empty()
        && root.subgroups.len() == 1
        && root.subgroups[0].polarity == Polarity::Must
    {
        if let Some(only) = root.subgroups.pop() {
            *root = only;
        }
    }
    root.polarity = Polarity::Must;
}

/// Canonicalize every tag name in the tree with a single resolver call.
fn resolve_aliases(root: &mut Group, collaborators: &Collaborators<'_>) {
    let mut names = Vec::new();
    root.for_each_bucket_mut(&mut |bucket| names.extend(bucket.iter().cloned()));
    if names.is_empty() {
        return;
    }
    let resolved = collaborators.aliases.resolve_many(&names);
    if resolved.len() != names.len() {
        tracing::warn!(
            requested = names.len(),
            returned = resolved.len(),
            "alias resolver returned a mismatched batch; keeping original names"
        );
        return;
    }
    let mut resolved = resolved.into_iter();
    root.for_each_bucket_mut(&mut |bucket| {
        for name in bucket.iter_mut() {
            if let Some(canonical) = resolved.next() {
                *name = canonical;
            }
        }
    });
}

/// Parse `query` with the standard metatag registry.
pub fn parse_query(
    query: &str,
    context: &SearchContext,
    config: &QueryConfig,
    collaborators: Collaborators<'_>,
) -> QueryResult<ParsedQuery> {
    GroupParser::new(config, context, MetatagRegistry::standard(), collaborators).parse(query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::StaticLookups;
    use crate::range::{Range, TypedRange};
    use tag_query_core::{Identity, Role};

    fn lookups() -> StaticLookups {
        StaticLookups::new()
            .with_user("alice", 1)
            .with_tags(["cat", "cat_ears", "catgirl", "dog"])
            .with_alias("kitty", "cat")
    }

    fn parse_with(
        query: &str,
        context: &SearchContext,
        config: &QueryConfig,
    ) -> QueryResult<ParsedQuery> {
        let lookups = lookups();
        parse_query(query, context, config, Collaborators::from_one(&lookups))
    }

    fn parse(query: &str) -> QueryResult<ParsedQuery> {
        parse_with(
            query,
            &SearchContext::new(Identity::user(5, Role::Member)),
            &QueryConfig::default(),
        )
    }

    #[test]
    fn buckets_by_prefix() {
        let parsed = parse("cat dog -fish ~bird").unwrap();
        assert_eq!(parsed.root.tags.must, vec!["cat", "dog"]);
        assert_eq!(parsed.root.tags.must_not, vec!["fish"]);
        assert_eq!(parsed.root.tags.should, vec!["bird"]);
        assert_eq!(parsed.total_tag_count, 4);
    }

    #[test]
    fn tags_are_lowercased() {
        let parsed = parse("Cat DOG").unwrap();
        assert_eq!(parsed.root.tags.must, vec!["cat", "dog"]);
    }

    #[test]
    fn nested_groups() {
        let parsed = parse("cat -( dog ~( fish bird ) )").unwrap();
        assert_eq!(parsed.root.tags.must, vec!["cat"]);
        let outer = &parsed.root.subgroups[0];
        assert_eq!(outer.polarity, Polarity::MustNot);
        assert_eq!(outer.tags.must, vec!["dog"]);
        assert_eq!(outer.subgroups[0].polarity, Polarity::Should);
        assert_eq!(outer.subgroups[0].tags.must, vec!["fish", "bird"]);
    }

    #[test]
    fn single_group_flattens() {
        assert_eq!(parse("( cat dog )").unwrap().root, parse("cat dog").unwrap().root);
        assert_eq!(parse("( ( cat ) )").unwrap().root, parse("cat").unwrap().root);
        let negated = parse("-( cat )").unwrap();
        assert_eq!(negated.root.subgroups.len(), 1);
    }

    #[test]
    fn empty_groups_are_dropped() {
        let parsed = parse("cat ( )").unwrap();
        assert!(parsed.root.subgroups.is_empty());
    }

    #[test]
    fn depth_limit() {
        let ten = format!("{}cat{}", "( ".repeat(10), " )".repeat(10));
        assert!(parse(&ten).is_ok());
        let eleven = format!("{}cat{}", "( ".repeat(11), " )".repeat(11));
        assert!(matches!(
            parse(&eleven),
            Err(QueryError::MaxGroupDepthExceeded { max: 10 })
        ));
    }

    #[test]
    fn unbalanced_groups() {
        assert!(matches!(parse("( cat"), Err(QueryError::UnclosedGroup)));
        assert!(matches!(parse("cat )"), Err(QueryError::UnclosedGroup)));
        assert_eq!(parse("cat (").unwrap().root.tags.must, vec!["cat", "("]);
    }

    #[test]
    fn global_quota() {
        let forty: Vec<String> = (0..40).map(|i| format!("t{i}")).collect();
        assert!(parse(&forty.join(" ")).is_ok());
        let forty_one = format!("{} extra", forty.join(" "));
        let err = parse(&forty_one).unwrap_err();
        let QueryError::CountExceeded { count, limit, tree } = err else {
            panic!("expected CountExceeded");
        };
        assert_eq!((count, limit), (41, 40));
        assert_eq!(tree.tags.must.len(), 41);
    }

    #[test]
    fn quota_is_shared_across_groups() {
        let config = QueryConfig {
            tag_query_limit: 3,
            ..QueryConfig::default()
        };
        let ctx = SearchContext::default();
        assert!(parse_with("a ( b c )", &ctx, &config).is_ok());
        assert!(matches!(
            parse_with("a ( b c ) d", &ctx, &config),
            Err(QueryError::CountExceeded { count: 4, .. })
        ));
    }

    #[test]
    fn free_tags_reduce_quota() {
        let config = QueryConfig {
            tag_query_limit: 3,
            ..QueryConfig::default()
        };
        let ctx = SearchContext::default().with_free_tags(1);
        assert!(parse_with("a b", &ctx, &config).is_ok());
        assert!(parse_with("a b c", &ctx, &config).is_err());
    }

    #[test]
    fn control_metatags_do_not_count() {
        let config = QueryConfig {
            tag_query_limit: 1,
            ..QueryConfig::default()
        };
        let ctx = SearchContext::default();
        let parsed = parse_with("cat order:score limit:5 randseed:9", &ctx, &config).unwrap();
        assert_eq!(parsed.total_tag_count, 1);
        assert_eq!(parsed.limit, Some(5));
        assert_eq!(parsed.random_seed, Some(9));
    }

    #[test]
    fn per_group_token_limit() {
        let config = QueryConfig {
            max_tokens_in_group: 2,
            ..QueryConfig::default()
        };
        let ctx = SearchContext::default();
        assert!(parse_with("a b c ( d e ) ( f g )", &ctx, &config).is_ok());
        assert!(matches!(
            parse_with("a ( b c d )", &ctx, &config),
            Err(QueryError::MaxTokensInGroupExceeded { max: 2 })
        ));
    }

    #[test]
    fn metatags_land_in_fields() {
        let parsed = parse("score:>10 -score:>100 user:alice").unwrap();
        let score = parsed.root.field("score");
        assert_eq!(score.len(), 2);
        assert_eq!(
            score[0].constraint,
            FieldConstraint::Range(TypedRange::Int(Range::Gt(10)))
        );
        assert_eq!(score[1].polarity, Polarity::MustNot);
        assert_eq!(
            parsed.root.field("uploader")[0].constraint,
            FieldConstraint::IdentityList(vec![1])
        );
    }

    #[test]
    fn control_values_in_groups_apply_globally() {
        let parsed = parse("cat -( dog order:favcount )").unwrap();
        assert!(matches!(parsed.order, OrderSpec::Field { ref field, .. } if field == "fav_count"));
    }

    #[test]
    fn wildcard_expands_into_should_group() {
        let parsed = parse("-cat*").unwrap();
        let group = &parsed.root.subgroups[0];
        assert_eq!(group.polarity, Polarity::MustNot);
        assert_eq!(group.tags.should, vec!["cat", "cat_ears", "catgirl"]);
        assert_eq!(parsed.total_tag_count, 1);
    }

    #[test]
    fn wildcard_expansion_is_capped() {
        let config = QueryConfig {
            wildcard_expansion_limit: 2,
            ..QueryConfig::default()
        };
        let parsed = parse_with("dog cat*", &SearchContext::default(), &config).unwrap();
        assert_eq!(parsed.root.subgroups[0].tags.should.len(), 2);
    }

    #[test]
    fn wildcard_without_matches_uses_sentinel() {
        let parsed = parse("cat *zzz_no_such_tag*").unwrap();
        assert_eq!(parsed.root.subgroups[0].tags.should, vec![NOT_FOUND_TAG]);
    }

    #[test]
    fn lone_wildcard_becomes_the_root() {
        let parsed = parse("cat*").unwrap();
        assert!(parsed.root.subgroups.is_empty());
        assert_eq!(parsed.root.polarity, Polarity::Must);
        assert_eq!(parsed.root.tags.should, vec!["cat", "cat_ears", "catgirl"]);
    }

    #[test]
    fn over_quota_tree_keeps_unexpanded_wildcards() {
        let config = QueryConfig {
            tag_query_limit: 2,
            ..QueryConfig::default()
        };
        let err = parse_with("dog cat* user:alice", &SearchContext::default(), &config)
            .unwrap_err();
        let QueryError::CountExceeded { count, tree, .. } = err else {
            panic!("expected CountExceeded");
        };
        assert_eq!(count, 3);
        assert_eq!(tree.subgroups[0].tags.should, vec!["cat*"]);
        assert_eq!(
            tree.field("uploader")[0].constraint,
            FieldConstraint::IdentityList(vec![crate::metatags::UNRESOLVED_ID])
        );
    }

    #[test]
    fn structure_is_checked_before_dispatch() {
        // `set:` would need a lookup; the unbalanced paren wins first.
        assert!(matches!(parse("set:secret ( cat"), Err(QueryError::UnclosedGroup)));
    }

    #[test]
    fn aliases_apply_at_every_depth() {
        let ctx = SearchContext::default().with_aliases();
        let parsed = parse_with("kitty -( ~kitty dog )", &ctx, &QueryConfig::default()).unwrap();
        assert_eq!(parsed.root.tags.must, vec!["cat"]);
        assert_eq!(parsed.root.subgroups[0].tags.should, vec!["cat"]);

        let untouched = parse("kitty").unwrap();
        assert_eq!(untouched.root.tags.must, vec!["kitty"]);
    }

    #[test]
    fn safe_mode_adds_rating() {
        let ctx = SearchContext::default().with_safe_mode();
        let parsed = parse_with("cat", &ctx, &QueryConfig::default()).unwrap();
        assert_eq!(
            parsed.root.field("rating")[0].constraint,
            FieldConstraint::Enum("s".into())
        );
        assert_eq!(parsed.total_tag_count, 1);
    }

    #[test]
    fn unknown_metatag_is_a_tag() {
        let parsed = parse("re:zero").unwrap();
        assert_eq!(parsed.root.tags.must, vec!["re:zero"]);
    }

    #[test]
    fn empty_query() {
        let parsed = parse("   ").unwrap();
        assert!(parsed.root.is_empty());
        assert_eq!(parsed.total_tag_count, 0);
    }
}
