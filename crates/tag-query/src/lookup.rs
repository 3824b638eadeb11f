//! Collaborator traits consumed by the parser
//!
//! The parser never talks to a database. Everything it needs from the outside
//! world (account and pool ids, tag names for wildcard expansion, alias
//! canonicalization, set visibility) comes through these traits, so the
//! storage layer can implement them without this crate depending on it.

use std::collections::HashMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tag_query_core::Identity;

/// Namespace an identity metatag value is resolved in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    User,
    Pool,
    Set,
}

/// Resolves user, pool and set names (or ids) to numeric ids.
pub trait IdentityLookup: Send + Sync {
    /// Resolve one name or id. Unknown values yield `None`.
    fn name_or_id_to_id(&self, kind: IdentityKind, value: &str) -> Option<i64>;

    /// Resolve many values of one kind in a single round trip.
    ///
    /// The result has the same length and order as `values`.
    fn names_or_ids_to_ids(&self, kind: IdentityKind, values: &[String]) -> Vec<Option<i64>> {
        values
            .iter()
            .map(|value| self.name_or_id_to_id(kind, value))
            .collect()
    }
}

/// Expands wildcard patterns into concrete tag names.
pub trait TagNameLookup: Send + Sync {
    /// Up to `limit` existing tag names matching `pattern` (`*` matches any
    /// run of characters), most popular first.
    fn matching_names(&self, pattern: &str, limit: usize) -> Vec<String>;
}

/// Canonicalizes tag names through the alias table.
pub trait AliasResolver: Send + Sync {
    /// Canonical name for every input, same length and order.
    fn resolve_many(&self, names: &[String]) -> Vec<String>;

    fn resolve(&self, name: &str) -> String {
        self.resolve_many(&[name.to_string()])
            .into_iter()
            .next()
            .unwrap_or_else(|| name.to_string())
    }
}

/// Visibility checks for private resources (currently sets).
pub trait PermissionCheck: Send + Sync {
    fn can_view_private_resource(&self, identity: &Identity, resource_id: i64) -> bool;
}

/// The collaborators one parse runs against
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub identities: &'a dyn IdentityLookup,
    pub tags: &'a dyn TagNameLookup,
    pub aliases: &'a dyn AliasResolver,
    pub permissions: &'a dyn PermissionCheck,
}

impl<'a> Collaborators<'a> {
    /// Use one value that implements every collaborator trait.
    pub fn from_one<T>(all: &'a T) -> Self
    where
        T: IdentityLookup + TagNameLookup + AliasResolver + PermissionCheck,
    {
        Self {
            identities: all,
            tags: all,
            aliases: all,
            permissions: all,
        }
    }
}

impl std::fmt::Debug for Collaborators<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

// ── In-memory implementation ────────────────────────────────────────────

/// Fixture-backed collaborators, loadable from JSON.
///
/// ```json
/// {
///   "users": { "alice": 1 },
///   "pools": { "best_of": 10 },
///   "sets": { "favs": 20 },
///   "private_sets": { "20": 1 },
///   "tags": ["cat", "cat_ears", "dog"],
///   "aliases": { "kitty": "cat" }
/// }
/// ```
///
/// `tags` is in popularity order. `private_sets` maps a set id to its owner.
/// A value of the form `!N` or plain digits resolves by id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticLookups {
    #[serde(default)]
    pub users: HashMap<String, i64>,
    #[serde(default)]
    pub pools: HashMap<String, i64>,
    #[serde(default)]
    pub sets: HashMap<String, i64>,
    #[serde(default)]
    pub private_sets: HashMap<i64, i64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub aliases: HashMap<String, String>,
}

impl StaticLookups {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON fixture.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    #[must_use]
    pub fn with_user(mut self, name: &str, id: i64) -> Self {
        self.users.insert(name.to_lowercase(), id);
        self
    }

    #[must_use]
    pub fn with_pool(mut self, name: &str, id: i64) -> Self {
        self.pools.insert(name.to_lowercase(), id);
        self
    }

    #[must_use]
    pub fn with_set(mut self, name: &str, id: i64) -> Self {
        self.sets.insert(name.to_lowercase(), id);
        self
    }

    #[must_use]
    pub fn with_private_set(mut self, name: &str, id: i64, owner: i64) -> Self {
        self.sets.insert(name.to_lowercase(), id);
        self.private_sets.insert(id, owner);
        self
    }

    #[must_use]
    pub fn with_tags<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(names.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_alias(mut self, antecedent: &str, consequent: &str) -> Self {
        self.aliases
            .insert(antecedent.to_lowercase(), consequent.to_lowercase());
        self
    }

    const fn table(&self, kind: IdentityKind) -> &HashMap<String, i64> {
        match kind {
            IdentityKind::User => &self.users,
            IdentityKind::Pool => &self.pools,
            IdentityKind::Set => &self.sets,
        }
    }
}

/// Compile a `*` glob into an anchored regex.
fn glob_regex(pattern: &str) -> Option<Regex> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{body}$")).ok()
}

impl IdentityLookup for StaticLookups {
    fn name_or_id_to_id(&self, kind: IdentityKind, value: &str) -> Option<i64> {
        let table = self.table(kind);
        let value = value.trim();
        let id_text = value.strip_prefix('!').unwrap_or(value);
        if let Ok(id) = id_text.parse::<i64>() {
            if table.values().any(|known| *known == id) {
                return Some(id);
            }
        }
        table.get(&value.to_lowercase()).copied()
    }
}

impl TagNameLookup for StaticLookups {
    fn matching_names(&self, pattern: &str, limit: usize) -> Vec<String> {
        let Some(re) = glob_regex(&pattern.to_lowercase()) else {
            return Vec::new();
        };
        self.tags
            .iter()
            .filter(|name| re.is_match(name))
            .take(limit)
            .cloned()
            .collect()
    }
}

impl AliasResolver for StaticLookups {
    fn resolve_many(&self, names: &[String]) -> Vec<String> {
        names
            .iter()
            .map(|name| self.aliases.get(name).unwrap_or(name).clone())
            .collect()
    }
}

impl PermissionCheck for StaticLookups {
    fn can_view_private_resource(&self, identity: &Identity, resource_id: i64) -> bool {
        match self.private_sets.get(&resource_id) {
            None => true,
            Some(owner) => identity.role.is_staff() || identity.id == Some(*owner),
        }
    }
}
