//! Query limits and tunables
//!
//! Limits are loaded from environment variables with compiled-in defaults.
//! A malformed value never fails startup; it falls back to the default.

use std::env;
use std::sync::OnceLock;

/// Default number of counted tags a single search may carry.
pub const DEFAULT_TAG_QUERY_LIMIT: u32 = 40;
/// Default maximum nesting depth for parenthesized groups.
pub const DEFAULT_MAX_GROUP_DEPTH: usize = 10;
/// Default maximum number of counted tokens inside one group.
pub const DEFAULT_MAX_TOKENS_IN_GROUP: u32 = 40;
/// Default number of concrete names a wildcard expands into.
pub const DEFAULT_WILDCARD_EXPANSION_LIMIT: usize = 40;
/// Default upper bound for `limit:`.
pub const DEFAULT_MAX_POST_LIMIT: u32 = 320;
/// Metatags that never count toward the tag quota.
pub const DEFAULT_UNLIMITED_METATAGS: &[&str] = &["order", "limit", "randseed"];

static GLOBAL_CONFIG: OnceLock<QueryConfig> = OnceLock::new();

/// Immutable limits consulted by the parser and compiler.
///
/// Built once per process (see [`QueryConfig::global`]) and passed by
/// reference into every parse; nothing mutates it per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryConfig {
    /// Counted-tag quota for the whole tree (before `free_tags_count`).
    pub tag_query_limit: u32,
    /// `GroupOpen` tokens beyond this depth are rejected.
    pub max_group_depth: usize,
    /// Counted tokens allowed directly inside one parenthesized group.
    pub max_tokens_in_group: u32,
    /// Cap on wildcard expansion results.
    pub wildcard_expansion_limit: usize,
    /// `limit:` values are clamped to this.
    pub max_post_limit: u32,
    /// Canonical metatag names excluded from quota counting.
    pub unlimited_metatags: Vec<String>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            tag_query_limit: DEFAULT_TAG_QUERY_LIMIT,
            max_group_depth: DEFAULT_MAX_GROUP_DEPTH,
            max_tokens_in_group: DEFAULT_MAX_TOKENS_IN_GROUP,
            wildcard_expansion_limit: DEFAULT_WILDCARD_EXPANSION_LIMIT,
            max_post_limit: DEFAULT_MAX_POST_LIMIT,
            unlimited_metatags: DEFAULT_UNLIMITED_METATAGS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }
}

impl QueryConfig {
    /// Load configuration from `TAG_QUERY_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let mut config = Self {
            tag_query_limit: env_u32("TAG_QUERY_LIMIT", defaults.tag_query_limit),
            max_group_depth: env_usize("TAG_QUERY_MAX_GROUP_DEPTH", defaults.max_group_depth),
            max_tokens_in_group: env_u32(
                "TAG_QUERY_MAX_TOKENS_IN_GROUP",
                defaults.max_tokens_in_group,
            ),
            wildcard_expansion_limit: env_usize(
                "TAG_QUERY_WILDCARD_LIMIT",
                defaults.wildcard_expansion_limit,
            ),
            max_post_limit: env_u32("TAG_QUERY_MAX_POST_LIMIT", defaults.max_post_limit),
            unlimited_metatags: defaults.unlimited_metatags,
        };
        if let Some(v) = env_value("TAG_QUERY_UNLIMITED_METATAGS") {
            config.unlimited_metatags = parse_csv(&v)
                .into_iter()
                .map(|s| s.to_ascii_lowercase())
                .collect();
        }
        tracing::debug!(
            tag_query_limit = config.tag_query_limit,
            max_group_depth = config.max_group_depth,
            max_tokens_in_group = config.max_tokens_in_group,
            "tag query config loaded"
        );
        config
    }

    /// Process-wide configuration, read from the environment on first use.
    #[must_use]
    pub fn global() -> &'static Self {
        GLOBAL_CONFIG.get_or_init(Self::from_env)
    }

    /// Whether `metatag` (canonical, lowercase) is exempt from the quota.
    #[must_use]
    pub fn is_unlimited(&self, metatag: &str) -> bool {
        self.unlimited_metatags.iter().any(|m| m == metatag)
    }

    /// Quota left for this request after `free_tags_count` is spent elsewhere.
    #[must_use]
    pub const fn effective_tag_limit(&self, free_tags_count: u32) -> u32 {
        self.tag_query_limit.saturating_sub(free_tags_count)
    }
}

// Helper functions for environment variable parsing

#[cfg(test)]
thread_local! {
    static TEST_ENV_OVERRIDES: std::cell::RefCell<std::collections::HashMap<String, String>> =
        std::cell::RefCell::new(std::collections::HashMap::new());
}

#[cfg(test)]
fn test_env_override_value(key: &str) -> Option<String> {
    TEST_ENV_OVERRIDES.with(|cell| cell.borrow().get(key).cloned())
}

/// Read a value from the process environment.
#[must_use]
pub fn env_value(key: &str) -> Option<String> {
    #[cfg(test)]
    if let Some(v) = test_env_override_value(key) {
        return Some(v);
    }
    env::var(key).ok()
}

fn env_u32(key: &str, default: u32) -> u32 {
    env_value(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env_value(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
