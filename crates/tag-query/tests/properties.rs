//! Property tests for the scanner and the normalizer.

use proptest::prelude::*;
use tag_query::{AliasResolver, StaticLookups, TokenKind, normalize_query, scan};

fn pt_config() -> ProptestConfig {
    ProptestConfig {
        cases: 512,
        max_shrink_iters: 2000,
        ..ProptestConfig::default()
    }
}

/// A word with no quotes, parens or whitespace.
fn arb_word() -> impl Strategy<Value = String> {
    proptest::string::string_regex("[-~]?[a-zA-Z0-9_:*<>.,=!]{1,12}").expect("valid regex")
}

/// A query fragment that may open or close groups and quote phrases.
fn arb_fragment() -> impl Strategy<Value = String> {
    prop_oneof![
        4 => arb_word(),
        1 => Just("(".to_string()),
        1 => Just("-(".to_string()),
        1 => Just("~(".to_string()),
        1 => Just(")".to_string()),
        1 => proptest::string::string_regex("[a-z]{1,8}:\"[a-z ]{0,10}\"").expect("valid regex"),
    ]
}

/// Alias table with no chains: every consequent is already canonical.
fn alias_fixture() -> StaticLookups {
    StaticLookups::new()
        .with_alias("kitty", "cat")
        .with_alias("doggo", "dog")
        .with_alias("pup", "dog")
}

/// Fragments biased toward names the alias table rewrites.
fn arb_aliased_fragment() -> impl Strategy<Value = String> {
    prop_oneof![
        3 => arb_fragment(),
        2 => proptest::sample::select(vec!["kitty", "-doggo", "~Pup", "cat", "DOG", "-(", ")"])
            .prop_map(String::from),
    ]
}

proptest! {
    #![proptest_config(pt_config())]

    /// Without quotes or group markers the token stream is exactly the
    /// whitespace-separated words, in order.
    #[test]
    fn prop_scan_preserves_words(words in proptest::collection::vec(arb_word(), 0..20)) {
        let query = words.join("  ");
        let raws: Vec<String> = scan(&query).into_iter().map(|t| t.raw).collect();
        prop_assert_eq!(raws, words);
    }

    /// Group markers never appear inside a word.
    #[test]
    fn prop_attached_parens_stay_literal(word in "[a-z]{1,8}") {
        let query = format!("({word}) {word}_(x)");
        for token in scan(&query) {
            prop_assert!(!token.is_group_marker());
        }
    }

    /// Scanning never panics and never yields an empty token.
    #[test]
    fn prop_scan_total(query in ".{0,80}") {
        for token in scan(&query) {
            prop_assert!(!token.raw.is_empty());
            if let TokenKind::PlainTag { name } = &token.kind {
                prop_assert!(!name.is_empty());
            }
        }
    }

    #[test]
    fn prop_normalize_idempotent(fragments in proptest::collection::vec(arb_fragment(), 0..16)) {
        let query = fragments.join(" ");
        let once = normalize_query(&query, None);
        let twice = normalize_query(&once, None);
        prop_assert_eq!(twice, once);
    }

    #[test]
    fn prop_normalize_idempotent_with_aliases(
        fragments in proptest::collection::vec(arb_aliased_fragment(), 0..16),
    ) {
        let aliases = alias_fixture();
        let resolver: &dyn AliasResolver = &aliases;
        let query = fragments.join(" ");
        let once = normalize_query(&query, Some(resolver));
        let twice = normalize_query(&once, Some(resolver));
        prop_assert_eq!(twice, once);
    }

    /// Reordering the words of a flat query does not change its normal form.
    #[test]
    fn prop_normalize_ignores_order(mut words in proptest::collection::vec("[a-z]{1,6}", 1..10)) {
        let forward = normalize_query(&words.join(" "), None);
        words.reverse();
        prop_assert_eq!(normalize_query(&words.join(" "), None), forward);
    }
}
