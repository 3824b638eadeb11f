//! Canonical query strings
//!
//! Two queries that differ only in case, ordering, duplicate terms, aliased
//! tag names or redundant outer parentheses normalize to the same string,
//! which makes the output usable as a cache key. Normalizing never fails:
//! stray `)` markers are dropped and unclosed groups are closed at the end.

use std::collections::{HashMap, HashSet};

use crate::lookup::AliasResolver;
use crate::query::Polarity;
use crate::scanner::{self, Token, TokenKind};

#[derive(Debug)]
enum Node {
    Leaf(String),
    Group(Polarity, Vec<Node>),
}

/// Render `query` in canonical form, resolving plain tag names through
/// `aliases` when given.
#[must_use]
pub fn normalize_query(query: &str, aliases: Option<&dyn AliasResolver>) -> String {
    let tokens = scanner::scan(query);
    let canonical = alias_table(&tokens, aliases);

    let mut stack: Vec<(Polarity, Vec<Node>)> = vec![(Polarity::Must, Vec::new())];
    for token in &tokens {
        match &token.kind {
            TokenKind::GroupOpen => stack.push((token.polarity, Vec::new())),
            TokenKind::GroupClose => close_group(&mut stack),
            _ => {
                if let (Some(text), Some((_, items))) =
                    (leaf_text(token, &canonical), stack.last_mut())
                {
                    items.push(Node::Leaf(text));
                }
            }
        }
    }
    while stack.len() > 1 {
        close_group(&mut stack);
    }

    let mut top = stack.pop().map(|(_, items)| items).unwrap_or_default();
    loop {
        dedup_nodes(&mut top);
        if !matches!(top.as_slice(), [Node::Group(Polarity::Must, _)]) {
            break;
        }
        match top.pop() {
            Some(Node::Group(_, children)) => top = children,
            _ => break,
        }
    }
    render_list(&top)
}

/// Pop the innermost open group into its parent. Empty groups vanish.
fn close_group(stack: &mut Vec<(Polarity, Vec<Node>)>) {
    if stack.len() < 2 {
        return;
    }
    if let Some((polarity, items)) = stack.pop() {
        if items.is_empty() {
            return;
        }
        if let Some((_, parent)) = stack.last_mut() {
            parent.push(Node::Group(polarity, items));
        }
    }
}

/// Drop nodes that render the same as an earlier sibling.
fn dedup_nodes(nodes: &mut Vec<Node>) {
    let mut seen = HashSet::new();
    nodes.retain(|node| render(node).is_some_and(|text| seen.insert(text)));
}

/// Lowercased plain tag name → canonical name, from one resolver call.
fn alias_table(tokens: &[Token], aliases: Option<&dyn AliasResolver>) -> HashMap<String, String> {
    let Some(aliases) = aliases else {
        return HashMap::new();
    };
    let mut names: Vec<String> = tokens
        .iter()
        .filter_map(|t| match &t.kind {
            TokenKind::PlainTag { name } => Some(name.to_lowercase()),
            _ => None,
        })
        .collect();
    names.sort_unstable();
    names.dedup();
    if names.is_empty() {
        return HashMap::new();
    }
    let resolved = aliases.resolve_many(&names);
    names.into_iter().zip(resolved).collect()
}

fn strip_quotes(text: &str) -> String {
    text.chars().filter(|c| *c != '"').collect()
}

fn leaf_body(token: &Token, canonical: &HashMap<String, String>) -> Option<String> {
    let body = match &token.kind {
        TokenKind::PlainTag { name } => {
            let name = name.to_lowercase();
            let resolved = canonical
                .get(&name)
                .map_or_else(|| name.clone(), |c| c.to_lowercase());
            strip_quotes(&resolved)
        }
        TokenKind::WildcardTag { pattern } => strip_quotes(&pattern.to_lowercase()),
        TokenKind::MetaTag { name, value } => {
            strip_quotes(&format!("{}:{}", name.to_lowercase(), value.to_lowercase()))
        }
        TokenKind::QuotedMetaTag { name, phrase } => {
            format!("{}:\"{}\"", name.to_lowercase(), phrase.to_lowercase())
        }
        TokenKind::GroupOpen | TokenKind::GroupClose => return None,
    };
    (!body.is_empty()).then_some(body)
}

/// Rendered leaf, or `None` when the text would not scan back to itself
/// once a separator follows it (`"-(` strips to a group marker).
fn leaf_text(token: &Token, canonical: &HashMap<String, String>) -> Option<String> {
    let text = format!("{}{}", token.polarity.prefix(), leaf_body(token, canonical)?);
    let rescanned = scanner::scan(&format!("{text} "));
    let [again] = rescanned.as_slice() else {
        return None;
    };
    let stable = !again.is_group_marker()
        && leaf_body(again, &HashMap::new())
            .is_some_and(|body| format!("{}{body}", again.polarity.prefix()) == text);
    stable.then_some(text)
}

fn render(node: &Node) -> Option<String> {
    match node {
        Node::Leaf(text) => Some(text.clone()),
        Node::Group(polarity, children) => {
            let inner = render_list(children);
            (!inner.is_empty()).then(|| format!("{}( {inner} )", polarity.prefix()))
        }
    }
}

fn render_list(nodes: &[Node]) -> String {
    let mut items: Vec<String> = nodes.iter().filter_map(render).collect();
    items.sort_unstable();
    items.dedup();
    items.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::StaticLookups;

    fn norm(query: &str) -> String {
        normalize_query(query, None)
    }

    #[test]
    fn lowercases_sorts_and_dedupes() {
        assert_eq!(norm("Dog cat  dog -Fish"), "-fish cat dog");
    }

    #[test]
    fn redundant_parens_are_removed() {
        assert_eq!(norm("( cat dog )"), "cat dog");
        assert_eq!(norm("( ( dog cat ) )"), "cat dog");
        assert_eq!(norm("-( cat )"), "-( cat )");
    }

    #[test]
    fn groups_render_recursively() {
        assert_eq!(
            norm("zebra ~( Dog cat ( b a ) )"),
            "zebra ~( ( a b ) cat dog )"
        );
    }

    #[test]
    fn empty_and_unbalanced_groups() {
        assert_eq!(norm("cat ( )"), "cat");
        assert_eq!(norm("cat )"), "cat");
        assert_eq!(norm("cat -( dog"), "-( dog ) cat");
        assert_eq!(norm("( a ) ( a )"), "a");
        assert_eq!(norm("( a ) ( )"), "a");
        assert_eq!(norm("cat ("), "cat");
    }

    #[test]
    fn metatags_and_phrases() {
        assert_eq!(
            norm(r#"Score:>10 description:"Big  Cat""#),
            r#"description:"big  cat" score:>10"#
        );
    }

    #[test]
    fn aliases_apply_to_plain_tags() {
        let lookups = StaticLookups::new().with_alias("kitty", "cat");
        assert_eq!(normalize_query("Kitty cat dog", Some(&lookups)), "cat dog");
        assert_eq!(normalize_query("user:kitty", Some(&lookups)), "user:kitty");
    }

    #[test]
    fn idempotent_on_samples() {
        for query in [
            "cat dog -fish",
            "~a ~b ( c -( d e ) )",
            r#"note:"x y" -source:none order:score"#,
            "stray\" quote",
            "\"( cat",
            "\"--( x \"-) y",
            "cat (",
            "-( dog ~(",
            "",
        ] {
            let once = norm(query);
            assert_eq!(norm(&once), once, "query {query:?}");
        }
    }
}
