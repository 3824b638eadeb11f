//! Request-scoped models
//!
//! A [`SearchContext`] is built fresh for every search request and travels by
//! reference through parsing and compilation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Account level of the caller, ordered from least to most privileged.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Anonymous,
    Member,
    Privileged,
    Janitor,
    Moderator,
    Admin,
}

impl Role {
    /// Parse a role name (case-insensitive). Unknown names yield `None`.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "anonymous" | "anon" => Some(Self::Anonymous),
            "member" => Some(Self::Member),
            "privileged" => Some(Self::Privileged),
            "janitor" => Some(Self::Janitor),
            "moderator" | "mod" => Some(Self::Moderator),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    /// Janitors and above may inspect other users' private activity.
    #[must_use]
    pub const fn is_staff(self) -> bool {
        matches!(self, Self::Janitor | Self::Moderator | Self::Admin)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anonymous => write!(f, "anonymous"),
            Self::Member => write!(f, "member"),
            Self::Privileged => write!(f, "privileged"),
            Self::Janitor => write!(f, "janitor"),
            Self::Moderator => write!(f, "moderator"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

/// The caller performing the search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Identity {
    /// Account id; `None` for anonymous callers.
    pub id: Option<i64>,
    pub role: Role,
}

impl Identity {
    #[must_use]
    pub const fn anonymous() -> Self {
        Self {
            id: None,
            role: Role::Anonymous,
        }
    }

    #[must_use]
    pub const fn user(id: i64, role: Role) -> Self {
        Self { id: Some(id), role }
    }

    #[must_use]
    pub const fn is_anonymous(&self) -> bool {
        self.id.is_none()
    }
}

/// Per-request flags consumed by the parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchContext {
    /// Canonicalize tag names through the alias resolver after parsing.
    #[serde(default)]
    pub resolve_aliases: bool,
    /// Quota headroom already consumed elsewhere (e.g. implicit filters).
    #[serde(default)]
    pub free_tags_count: u32,
    /// Restrict results to safe-rated content.
    #[serde(default)]
    pub safe_mode: bool,
    #[serde(default)]
    pub current_identity: Identity,
    /// Reference instant for relative dates (`3_days_ago`, `yesterday`).
    #[serde(default = "Utc::now")]
    pub now: DateTime<Utc>,
}

impl Default for SearchContext {
    fn default() -> Self {
        Self {
            resolve_aliases: false,
            free_tags_count: 0,
            safe_mode: false,
            current_identity: Identity::anonymous(),
            now: Utc::now(),
        }
    }
}

impl SearchContext {
    #[must_use]
    pub fn new(current_identity: Identity) -> Self {
        Self {
            current_identity,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_aliases(mut self) -> Self {
        self.resolve_aliases = true;
        self
    }

    #[must_use]
    pub const fn with_safe_mode(mut self) -> Self {
        self.safe_mode = true;
        self
    }

    #[must_use]
    pub const fn with_free_tags(mut self, free_tags_count: u32) -> Self {
        self.free_tags_count = free_tags_count;
        self
    }

    /// Pin the clock, mainly for reproducible relative-date handling.
    #[must_use]
    pub const fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn role_ordering() {
        assert!(Role::Anonymous < Role::Member);
        assert!(Role::Janitor < Role::Admin);
        assert!(Role::Janitor.is_staff());
        assert!(!Role::Privileged.is_staff());
    }

    #[test]
    fn role_parse_and_display() {
        for role in [
            Role::Anonymous,
            Role::Member,
            Role::Privileged,
            Role::Janitor,
            Role::Moderator,
            Role::Admin,
        ] {
            assert_eq!(Role::parse(&role.to_string()), Some(role));
        }
        assert_eq!(Role::parse(" MOD "), Some(Role::Moderator));
        assert_eq!(Role::parse("owner"), None);
    }

    #[test]
    fn context_builder() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let ctx = SearchContext::new(Identity::user(7, Role::Member))
            .with_aliases()
            .with_safe_mode()
            .with_free_tags(2)
            .at(now);
        assert!(ctx.resolve_aliases);
        assert!(ctx.safe_mode);
        assert_eq!(ctx.free_tags_count, 2);
        assert_eq!(ctx.current_identity.id, Some(7));
        assert_eq!(ctx.now, now);
    }

    #[test]
    fn context_serde_defaults() {
        let ctx: SearchContext = serde_json::from_str("{}").unwrap();
        assert!(!ctx.resolve_aliases);
        assert_eq!(ctx.free_tags_count, 0);
        assert!(ctx.current_identity.is_anonymous());
    }
}
