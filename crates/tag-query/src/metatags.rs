//! Metatag registry and dispatcher
//!
//! A metatag is a `name:value` token that constrains an index field instead
//! of matching a tag. Names are matched case-insensitively against a table
//! built once per process; unknown names fall back to plain tags.

use std::collections::HashMap;
use std::sync::LazyLock;

use tag_query_core::{QueryConfig, SearchContext};

use crate::error::{QueryError, QueryResult};
use crate::lookup::{IdentityKind, IdentityLookup, PermissionCheck};
use crate::query::{
    FieldClause, FieldConstraint, OrderSpec, Polarity, Presence, SortDirection, StatusFilter,
};
use crate::range::{self, TypedRange};
use crate::value;

/// Id that no resource carries; used when a value does not resolve.
pub const UNRESOLVED_ID: i64 = -1;

/// How a metatag's value is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    /// User/pool/set reference. Relational fields also accept `any`/`none`.
    Identity {
        field: &'static str,
        kind: IdentityKind,
        relational: bool,
    },
    /// Vote history; scoped to the caller unless they are staff
    Vote { field: &'static str },
    Parent,
    Child,
    Int { field: &'static str },
    /// Byte size with `kb`/`mb` suffixes, fudged on equality
    FileSize,
    Float { field: &'static str, fudged: bool },
    Ratio,
    Date { field: &'static str },
    Rating,
    /// Exact lowercase keyword
    Keyword { field: &'static str },
    Status,
    Locked,
    Source,
    Phrase { field: &'static str },
    Pattern { field: &'static str },
    Flag { field: &'static str },
    Order,
    Limit,
    RandomSeed,
}

impl Handler {
    /// Identity namespace the value must be resolved in before dispatch, if any.
    #[must_use]
    pub fn identity_request(self, value: &str, context: &SearchContext) -> Option<IdentityKind> {
        match self {
            Self::Identity {
                kind, relational, ..
            } => {
                let presence = relational && presence_value(value).is_some();
                (!presence).then_some(kind)
            }
            Self::Vote { .. } if context.current_identity.role.is_staff() => {
                Some(IdentityKind::User)
            }
            _ => None,
        }
    }
}

/// Canonical metatag names and their handlers.
#[rustfmt::skip]
const METATAGS: &[(&str, Handler)] = &[
    ("user", Handler::Identity { field: "uploader", kind: IdentityKind::User, relational: false }),
    ("approver", Handler::Identity { field: "approver", kind: IdentityKind::User, relational: true }),
    ("commenter", Handler::Identity { field: "commenters", kind: IdentityKind::User, relational: true }),
    ("noter", Handler::Identity { field: "noters", kind: IdentityKind::User, relational: true }),
    ("noteupdater", Handler::Identity { field: "note_updaters", kind: IdentityKind::User, relational: false }),
    ("fav", Handler::Identity { field: "faves", kind: IdentityKind::User, relational: true }),
    ("deletedby", Handler::Identity { field: "deleter", kind: IdentityKind::User, relational: true }),
    ("pool", Handler::Identity { field: "pools", kind: IdentityKind::Pool, relational: true }),
    ("set", Handler::Identity { field: "sets", kind: IdentityKind::Set, relational: true }),
    ("upvote", Handler::Vote { field: "upvotes" }),
    ("downvote", Handler::Vote { field: "downvotes" }),
    ("voted", Handler::Vote { field: "voted" }),
    ("parent", Handler::Parent),
    ("child", Handler::Child),
    ("id", Handler::Int { field: "id" }),
    ("width", Handler::Int { field: "width" }),
    ("height", Handler::Int { field: "height" }),
    ("score", Handler::Int { field: "score" }),
    ("favcount", Handler::Int { field: "fav_count" }),
    ("comment_count", Handler::Int { field: "comment_count" }),
    ("tagcount", Handler::Int { field: "tag_count" }),
    ("gentags", Handler::Int { field: "tag_count_general" }),
    ("arttags", Handler::Int { field: "tag_count_artist" }),
    ("chartags", Handler::Int { field: "tag_count_character" }),
    ("copytags", Handler::Int { field: "tag_count_copyright" }),
    ("spectags", Handler::Int { field: "tag_count_species" }),
    ("invtags", Handler::Int { field: "tag_count_invalid" }),
    ("lortags", Handler::Int { field: "tag_count_lore" }),
    ("metatags", Handler::Int { field: "tag_count_meta" }),
    ("change", Handler::Int { field: "change_seq" }),
    ("filesize", Handler::FileSize),
    ("mpixels", Handler::Float { field: "mpixels", fudged: true }),
    ("ratio", Handler::Ratio),
    ("duration", Handler::Float { field: "duration", fudged: false }),
    ("date", Handler::Date { field: "created_at" }),
    ("rating", Handler::Rating),
    ("filetype", Handler::Keyword { field: "file_ext" }),
    ("md5", Handler::Keyword { field: "md5" }),
    ("status", Handler::Status),
    ("locked", Handler::Locked),
    ("source", Handler::Source),
    ("description", Handler::Phrase { field: "description" }),
    ("note", Handler::Phrase { field: "notes" }),
    ("delreason", Handler::Pattern { field: "del_reason" }),
    ("hassource", Handler::Flag { field: "has_source" }),
    ("hasdescription", Handler::Flag { field: "has_description" }),
    ("isparent", Handler::Flag { field: "has_children" }),
    ("ischild", Handler::Flag { field: "has_parent" }),
    ("inpool", Handler::Flag { field: "has_pools" }),
    ("pending_replacements", Handler::Flag { field: "has_pending_replacements" }),
    ("artverified", Handler::Flag { field: "artverified" }),
    ("ratinglocked", Handler::Flag { field: "rating_locked" }),
    ("notelocked", Handler::Flag { field: "note_locked" }),
    ("statuslocked", Handler::Flag { field: "status_locked" }),
    ("order", Handler::Order),
    ("limit", Handler::Limit),
    ("randseed", Handler::RandomSeed),
];

/// Alternate spellings, mapped to canonical names.
const METATAG_ALIASES: &[(&str, &str)] = &[
    ("uploader", "user"),
    ("comm", "commenter"),
    ("favoritedby", "fav"),
    ("commentcount", "comment_count"),
    ("size", "filesize"),
    ("type", "filetype"),
];

/// Sortable orders: name, index field, direction when no suffix is given.
const ORDERS: &[(&str, &str, SortDirection)] = &[
    ("id", "id", SortDirection::Asc),
    ("score", "score", SortDirection::Desc),
    ("favcount", "fav_count", SortDirection::Desc),
    ("tagcount", "tag_count", SortDirection::Desc),
    ("gentags", "tag_count_general", SortDirection::Desc),
    ("arttags", "tag_count_artist", SortDirection::Desc),
    ("chartags", "tag_count_character", SortDirection::Desc),
    ("copytags", "tag_count_copyright", SortDirection::Desc),
    ("spectags", "tag_count_species", SortDirection::Desc),
    ("invtags", "tag_count_invalid", SortDirection::Desc),
    ("lortags", "tag_count_lore", SortDirection::Desc),
    ("metatags", "tag_count_meta", SortDirection::Desc),
    ("mpixels", "mpixels", SortDirection::Desc),
    ("filesize", "file_size", SortDirection::Desc),
    ("duration", "duration", SortDirection::Desc),
    ("created", "created_at", SortDirection::Desc),
    ("change", "change_seq", SortDirection::Desc),
    ("comment_count", "comment_count", SortDirection::Desc),
    ("landscape", "aspect_ratio", SortDirection::Desc),
    ("portrait", "aspect_ratio", SortDirection::Asc),
];

/// Result of dispatching one metatag
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched {
    Field { field: String, clause: FieldClause },
    Order(OrderSpec),
    Limit(u32),
    RandomSeed(i64),
    /// A control metatag whose value did not parse
    Ignored,
    /// Not a metatag after all; treat the text as a tag name
    Tag(String),
}

/// Identity values resolved ahead of dispatch, keyed by kind and lowercase value
#[derive(Debug, Clone, Default)]
pub struct ResolvedIdentities {
    ids: HashMap<(IdentityKind, String), Option<i64>>,
}

impl ResolvedIdentities {
    /// Resolve `requests` with one lookup call per identity kind.
    pub fn resolve<I>(lookup: &dyn IdentityLookup, requests: I) -> Self
    where
        I: IntoIterator<Item = (IdentityKind, String)>,
    {
        let mut by_kind: Vec<(IdentityKind, Vec<String>)> = Vec::new();
        for (kind, value) in requests {
            let value = value.trim().to_lowercase();
            match by_kind.iter_mut().find(|(k, _)| *k == kind) {
                Some((_, values)) => {
                    if !values.contains(&value) {
                        values.push(value);
                    }
                }
                None => by_kind.push((kind, vec![value])),
            }
        }

        let mut ids = HashMap::new();
        for (kind, values) in by_kind {
            let resolved = lookup.names_or_ids_to_ids(kind, &values);
            tracing::debug!(?kind, count = values.len(), "resolved identity batch");
            for (value, id) in values.into_iter().zip(resolved) {
                ids.insert((kind, value), id);
            }
        }
        Self { ids }
    }

    #[must_use]
    pub fn get(&self, kind: IdentityKind, value: &str) -> Option<i64> {
        self.ids
            .get(&(kind, value.trim().to_lowercase()))
            .copied()
            .flatten()
    }
}

/// Per-parse inputs a handler may consult
#[derive(Clone, Copy)]
pub struct DispatchEnv<'a> {
    pub context: &'a SearchContext,
    pub config: &'a QueryConfig,
    pub identities: &'a ResolvedIdentities,
    pub permissions: &'a dyn PermissionCheck,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    canonical: &'static str,
    handler: Handler,
}

/// Case-insensitive name → handler table
#[derive(Debug)]
pub struct MetatagRegistry {
    entries: HashMap<&'static str, Entry>,
}

static STANDARD_REGISTRY: LazyLock<MetatagRegistry> = LazyLock::new(MetatagRegistry::build);

impl MetatagRegistry {
    fn build() -> Self {
        let mut entries = HashMap::with_capacity(METATAGS.len() + METATAG_ALIASES.len());
        for &(canonical, handler) in METATAGS {
            entries.insert(canonical, Entry { canonical, handler });
        }
        for &(alias, canonical) in METATAG_ALIASES {
            if let Some(entry) = entries.get(canonical).copied() {
                entries.insert(alias, entry);
            }
        }
        Self { entries }
    }

    /// The shared registry of every supported metatag.
    #[must_use]
    pub fn standard() -> &'static Self {
        &STANDARD_REGISTRY
    }

    fn entry(&self, name: &str) -> Option<Entry> {
        let key = name.to_ascii_lowercase();
        self.entries.get(key.as_str()).copied()
    }

    #[must_use]
    pub fn handler(&self, name: &str) -> Option<Handler> {
        self.entry(name).map(|e| e.handler)
    }

    /// Canonical spelling of a registered name (`comm` → `commenter`).
    #[must_use]
    pub fn canonical_name(&self, name: &str) -> Option<&'static str> {
        self.entry(name).map(|e| e.canonical)
    }

    #[must_use]
    pub fn is_registered(&self, name: &str) -> bool {
        self.entry(name).is_some()
    }

    /// Interpret `name:value` carrying `polarity`.
    ///
    /// Only `set:` can fail, when the caller may not view the named set.
    pub fn dispatch(
        &self,
        name: &str,
        value: &str,
        polarity: Polarity,
        env: &DispatchEnv<'_>,
    ) -> QueryResult<Dispatched> {
        let Some(entry) = self.entry(name) else {
            return Ok(Dispatched::Tag(format!("{name}:{value}").to_lowercase()));
        };
        let value = value.trim();

        let (field, constraint) = match entry.handler {
            Handler::Order => return Ok(Dispatched::Order(parse_order(value))),
            Handler::Limit => {
                return Ok(value::parse_int(value)
                    .and_then(|v| u32::try_from(v.max(0)).ok())
                    .map_or(Dispatched::Ignored, |v| {
                        Dispatched::Limit(v.min(env.config.max_post_limit))
                    }));
            }
            Handler::RandomSeed => {
                return Ok(value::parse_int(value)
                    .map_or(Dispatched::Ignored, Dispatched::RandomSeed));
            }
            Handler::Identity {
                field,
                kind,
                relational,
            } => (field, identity_constraint(value, kind, relational, env)?),
            Handler::Vote { field } => (field, vote_constraint(value, env)),
            Handler::Parent => ("parent_id", parent_constraint(value)),
            Handler::Child => ("has_children", child_constraint(value)),
            Handler::Int { field } => (field, int_constraint(value)),
            Handler::FileSize => ("file_size", filesize_constraint(value)),
            Handler::Float { field, fudged } => (field, float_constraint(value, fudged)),
            Handler::Ratio => (
                "aspect_ratio",
                typed(range::parse_ratio_range(value).map(TypedRange::Float)),
            ),
            Handler::Date { field } => (
                field,
                typed(range::parse_date_range(value, env.context.now).map(TypedRange::Date)),
            ),
            Handler::Rating => ("rating", rating_constraint(value)),
            Handler::Keyword { field } => (field, FieldConstraint::Enum(value.to_lowercase())),
            Handler::Status => (
                "status",
                StatusFilter::parse(value)
                    .map_or(FieldConstraint::MatchNone, FieldConstraint::Status),
            ),
            Handler::Locked => locked_constraint(value),
            Handler::Source => ("source", source_constraint(value)),
            Handler::Phrase { field } => (field, FieldConstraint::Phrase(value.to_lowercase())),
            Handler::Pattern { field } => (field, FieldConstraint::Pattern(value.to_lowercase())),
            Handler::Flag { field } => (
                field,
                value::parse_bool(value)
                    .map_or(FieldConstraint::MatchNone, FieldConstraint::Boolean),
            ),
        };

        if constraint == FieldConstraint::MatchNone {
            tracing::warn!(metatag = entry.canonical, value, "unparsable metatag value");
        }
        Ok(Dispatched::Field {
            field: field.to_string(),
            clause: FieldClause {
                polarity,
                constraint,
            },
        })
    }
}

fn typed(range: Option<TypedRange>) -> FieldConstraint {
    range.map_or(FieldConstraint::MatchNone, FieldConstraint::Range)
}

fn presence_value(value: &str) -> Option<Presence> {
    match value.trim().to_ascii_lowercase().as_str() {
        "any" => Some(Presence::Any),
        "none" => Some(Presence::None),
        _ => None,
    }
}

fn identity_constraint(
    value: &str,
    kind: IdentityKind,
    relational: bool,
    env: &DispatchEnv<'_>,
) -> QueryResult<FieldConstraint> {
    if relational {
        if let Some(presence) = presence_value(value) {
            return Ok(FieldConstraint::Presence(presence));
        }
    }
    let Some(id) = env.identities.get(kind, value) else {
        tracing::warn!(?kind, value, "unresolved identity");
        return Ok(FieldConstraint::IdentityList(vec![UNRESOLVED_ID]));
    };
    if kind == IdentityKind::Set
        && !env
            .permissions
            .can_view_private_resource(&env.context.current_identity, id)
    {
        return Err(QueryError::PrivilegeError(format!(
            "you cannot view set {value}"
        )));
    }
    Ok(FieldConstraint::IdentityList(vec![id]))
}

fn vote_constraint(value: &str, env: &DispatchEnv<'_>) -> FieldConstraint {
    let identity = env.context.current_identity;
    let id = if identity.role.is_staff() {
        env.identities.get(IdentityKind::User, value)
    } else {
        identity.id
    };
    FieldConstraint::IdentityList(vec![id.unwrap_or(UNRESOLVED_ID)])
}

fn parent_constraint(value: &str) -> FieldConstraint {
    if let Some(presence) = presence_value(value) {
        return FieldConstraint::Presence(presence);
    }
    value::parse_int(value).map_or(FieldConstraint::MatchNone, |id| {
        FieldConstraint::IdentityList(vec![id])
    })
}

fn child_constraint(value: &str) -> FieldConstraint {
    match presence_value(value) {
        Some(Presence::Any) => FieldConstraint::Boolean(true),
        Some(Presence::None) => FieldConstraint::Boolean(false),
        None => FieldConstraint::MatchNone,
    }
}

fn int_constraint(value: &str) -> FieldConstraint {
    typed(range::parse_int_range(value).map(TypedRange::Int))
}

fn filesize_constraint(value: &str) -> FieldConstraint {
    typed(
        range::parse_filesize_range(value)
            .map(range::Range::fudged)
            .map(TypedRange::Int),
    )
}

fn float_constraint(value: &str, fudged: bool) -> FieldConstraint {
    let parsed = range::parse_float_range(value);
    let parsed = if fudged {
        parsed.map(range::Range::fudged)
    } else {
        parsed
    };
    typed(parsed.map(TypedRange::Float))
}

fn rating_constraint(value: &str) -> FieldConstraint {
    match value.chars().next().map(|c| c.to_ascii_lowercase()) {
        Some(c @ ('s' | 'q' | 'e')) => FieldConstraint::Enum(c.to_string()),
        _ => FieldConstraint::MatchNone,
    }
}

fn locked_constraint(value: &str) -> (&'static str, FieldConstraint) {
    match value.to_ascii_lowercase().as_str() {
        "rating" => ("rating_locked", FieldConstraint::Boolean(true)),
        "note" | "notes" => ("note_locked", FieldConstraint::Boolean(true)),
        "status" => ("status_locked", FieldConstraint::Boolean(true)),
        _ => ("locked", FieldConstraint::MatchNone),
    }
}

fn source_constraint(value: &str) -> FieldConstraint {
    if value.eq_ignore_ascii_case("none") {
        return FieldConstraint::Presence(Presence::None);
    }
    let mut pattern = value.to_lowercase();
    if !pattern.ends_with('*') {
        pattern.push('*');
    }
    FieldConstraint::Pattern(pattern)
}

/// Parse an `order:` value. Unknown orders fall back to the default.
#[must_use]
pub fn parse_order(value: &str) -> OrderSpec {
    let value = value.trim().to_ascii_lowercase();
    match value.as_str() {
        "rank" => return OrderSpec::Rank,
        "random" => return OrderSpec::Random,
        _ => {}
    }
    let (base, direction) = if let Some(base) = value.strip_suffix("_asc") {
        (base, Some(SortDirection::Asc))
    } else if let Some(base) = value.strip_suffix("_desc") {
        (base, Some(SortDirection::Desc))
    } else {
        (value.as_str(), None)
    };
    ORDERS
        .iter()
        .find(|(name, _, _)| *name == base)
        .map_or(OrderSpec::Default, |(_, field, default)| OrderSpec::Field {
            field: (*field).to_string(),
            direction: direction.unwrap_or(*default),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::StaticLookups;
    use crate::range::Range;
    use chrono::TimeZone;
    use tag_query_core::{Identity, Role};

    struct Fixture {
        context: SearchContext,
        config: QueryConfig,
        identities: ResolvedIdentities,
        lookups: StaticLookups,
    }

    impl Fixture {
        fn new(identity: Identity) -> Self {
            let lookups = StaticLookups::new()
                .with_user("alice", 1)
                .with_user("bob", 2)
                .with_set("public", 30)
                .with_private_set("secret", 31, 1);
            let requests = [
                (IdentityKind::User, "alice".to_string()),
                (IdentityKind::User, "bob".to_string()),
                (IdentityKind::User, "ghost".to_string()),
                (IdentityKind::Set, "public".to_string()),
                (IdentityKind::Set, "secret".to_string()),
            ];
            let identities = ResolvedIdentities::resolve(&lookups, requests);
            Self {
                context: SearchContext::new(identity)
                    .at(chrono::Utc.with_ymd_and_hms(2024, 5, 15, 0, 0, 0).unwrap()),
                config: QueryConfig::default(),
                identities,
                lookups,
            }
        }

        fn dispatch(&self, name: &str, value: &str) -> QueryResult<Dispatched> {
            let env = DispatchEnv {
                context: &self.context,
                config: &self.config,
                identities: &self.identities,
                permissions: &self.lookups,
            };
            MetatagRegistry::standard().dispatch(name, value, Polarity::Must, &env)
        }

        fn constraint(&self, name: &str, value: &str) -> (String, FieldConstraint) {
            match self.dispatch(name, value).unwrap() {
                Dispatched::Field { field, clause } => (field, clause.constraint),
                other => panic!("expected field clause, got {other:?}"),
            }
        }
    }

    fn member() -> Fixture {
        Fixture::new(Identity::user(2, Role::Member))
    }

    #[test]
    fn names_are_case_insensitive_and_aliased() {
        let registry = MetatagRegistry::standard();
        assert_eq!(registry.canonical_name("SCORE"), Some("score"));
        assert_eq!(registry.canonical_name("comm"), Some("commenter"));
        assert_eq!(registry.canonical_name("favoritedby"), Some("fav"));
        assert_eq!(registry.canonical_name("Type"), Some("filetype"));
        assert!(!registry.is_registered("re"));
    }

    #[test]
    fn unknown_name_is_a_tag() {
        assert_eq!(
            member().dispatch("Re", "Zero").unwrap(),
            Dispatched::Tag("re:zero".into())
        );
    }

    #[test]
    fn integer_ranges() {
        let f = member();
        assert_eq!(
            f.constraint("score", ">10"),
            ("score".into(), FieldConstraint::Range(TypedRange::Int(Range::Gt(10))))
        );
        assert_eq!(
            f.constraint("gentags", "5"),
            (
                "tag_count_general".into(),
                FieldConstraint::Range(TypedRange::Int(Range::Eq(5)))
            )
        );
        assert_eq!(f.constraint("score", "lots").1, FieldConstraint::MatchNone);
    }

    #[test]
    fn filesize_is_fudged() {
        assert_eq!(
            member().constraint("size", "100kb"),
            (
                "file_size".into(),
                FieldConstraint::Range(TypedRange::Int(Range::Between(97_280, 107_520)))
            )
        );
    }

    #[test]
    fn user_resolution() {
        let f = member();
        assert_eq!(
            f.constraint("uploader", "Alice").1,
            FieldConstraint::IdentityList(vec![1])
        );
        assert_eq!(
            f.constraint("user", "ghost").1,
            FieldConstraint::IdentityList(vec![UNRESOLVED_ID])
        );
        assert_eq!(
            f.constraint("approver", "none").1,
            FieldConstraint::Presence(Presence::None)
        );
        assert_eq!(
            f.constraint("comm", "any").1,
            FieldConstraint::Presence(Presence::Any)
        );
    }

    #[test]
    fn private_set_requires_permission() {
        let outsider = member();
        let err = outsider.dispatch("set", "secret").unwrap_err();
        assert_eq!(err.error_type(), "PRIVILEGE_ERROR");
        assert_eq!(
            outsider.constraint("set", "public").1,
            FieldConstraint::IdentityList(vec![30])
        );

        let owner = Fixture::new(Identity::user(1, Role::Member));
        assert_eq!(
            owner.constraint("set", "secret").1,
            FieldConstraint::IdentityList(vec![31])
        );
    }

    #[test]
    fn votes_scope_to_caller() {
        assert_eq!(
            member().constraint("upvote", "alice").1,
            FieldConstraint::IdentityList(vec![2])
        );
        let staff = Fixture::new(Identity::user(9, Role::Janitor));
        assert_eq!(
            staff.constraint("upvote", "alice").1,
            FieldConstraint::IdentityList(vec![1])
        );
        let anon = Fixture::new(Identity::anonymous());
        assert_eq!(
            anon.constraint("voted", "alice").1,
            FieldConstraint::IdentityList(vec![UNRESOLVED_ID])
        );
    }

    #[test]
    fn enumerations() {
        let f = member();
        assert_eq!(f.constraint("rating", "Safe").1, FieldConstraint::Enum("s".into()));
        assert_eq!(f.constraint("rating", "x").1, FieldConstraint::MatchNone);
        assert_eq!(
            f.constraint("type", "PNG"),
            ("file_ext".into(), FieldConstraint::Enum("png".into()))
        );
        assert_eq!(
            f.constraint("status", "all").1,
            FieldConstraint::Status(StatusFilter::Any)
        );
        assert_eq!(
            f.constraint("locked", "note"),
            ("note_locked".into(), FieldConstraint::Boolean(true))
        );
    }

    #[test]
    fn text_fields() {
        let f = member();
        assert_eq!(
            f.constraint("source", "none").1,
            FieldConstraint::Presence(Presence::None)
        );
        assert_eq!(
            f.constraint("source", "Example.com/art").1,
            FieldConstraint::Pattern("example.com/art*".into())
        );
        assert_eq!(
            f.constraint("description", "Hello World"),
            ("description".into(), FieldConstraint::Phrase("hello world".into()))
        );
    }

    #[test]
    fn flags() {
        let f = member();
        assert_eq!(
            f.constraint("hassource", "yes"),
            ("has_source".into(), FieldConstraint::Boolean(true))
        );
        assert_eq!(f.constraint("isparent", "0").1, FieldConstraint::Boolean(false));
        assert_eq!(f.constraint("inpool", "perhaps").1, FieldConstraint::MatchNone);
    }

    #[test]
    fn parent_and_child() {
        let f = member();
        assert_eq!(
            f.constraint("parent", "12"),
            ("parent_id".into(), FieldConstraint::IdentityList(vec![12]))
        );
        assert_eq!(
            f.constraint("parent", "none").1,
            FieldConstraint::Presence(Presence::None)
        );
        assert_eq!(
            f.constraint("child", "any"),
            ("has_children".into(), FieldConstraint::Boolean(true))
        );
    }

    #[test]
    fn control_metatags() {
        let f = member();
        assert_eq!(f.dispatch("limit", "50").unwrap(), Dispatched::Limit(50));
        assert_eq!(f.dispatch("limit", "10000").unwrap(), Dispatched::Limit(320));
        assert_eq!(f.dispatch("limit", "many").unwrap(), Dispatched::Ignored);
        assert_eq!(f.dispatch("randseed", "7").unwrap(), Dispatched::RandomSeed(7));
        assert_eq!(
            f.dispatch("order", "rank").unwrap(),
            Dispatched::Order(OrderSpec::Rank)
        );
    }

    #[test]
    fn orders() {
        assert_eq!(
            parse_order("score"),
            OrderSpec::Field {
                field: "score".into(),
                direction: SortDirection::Desc
            }
        );
        assert_eq!(
            parse_order("score_asc"),
            OrderSpec::Field {
                field: "score".into(),
                direction: SortDirection::Asc
            }
        );
        assert_eq!(
            parse_order("id"),
            OrderSpec::Field {
                field: "id".into(),
                direction: SortDirection::Asc
            }
        );
        assert_eq!(
            parse_order("portrait"),
            OrderSpec::Field {
                field: "aspect_ratio".into(),
                direction: SortDirection::Asc
            }
        );
        assert_eq!(parse_order("random"), OrderSpec::Random);
        assert_eq!(parse_order("sideways"), OrderSpec::Default);
    }

    #[test]
    fn identity_requests() {
        let ctx = SearchContext::new(Identity::user(1, Role::Member));
        let staff = SearchContext::new(Identity::user(1, Role::Admin));
        let registry = MetatagRegistry::standard();
        let user = registry.handler("user").unwrap();
        let pool = registry.handler("pool").unwrap();
        let vote = registry.handler("upvote").unwrap();
        assert_eq!(user.identity_request("alice", &ctx), Some(IdentityKind::User));
        assert_eq!(pool.identity_request("none", &ctx), None);
        assert_eq!(vote.identity_request("alice", &ctx), None);
        assert_eq!(vote.identity_request("alice", &staff), Some(IdentityKind::User));
    }
}
