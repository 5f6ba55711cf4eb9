//! Policy registry: which data views each caller role may receive answers from.
//!
//! The registry is built once at startup and is read-only afterwards, so it
//! is shared across request tasks behind an `Arc` without locking.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Resource views
// ---------------------------------------------------------------------------

/// A named data view the engine may consult.
///
/// Identifiers may carry a namespace prefix (`"schema.view"`). Two views are
/// equal iff their unprefixed names match case-sensitively; the raw form is
/// kept only for audit output.
#[derive(Debug, Clone)]
pub struct ResourceView {
    raw: String,
    name: String,
}

impl ResourceView {
    /// Parse an identifier, stripping any namespace prefix.
    ///
    /// An identifier whose suffix is empty (`"schema."`) keeps its full
    /// trimmed form as its name, so it still counts as a distinct view.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let suffix = trimmed.rsplit('.').next().unwrap_or(trimmed);
        let mut name = suffix.trim().trim_matches('"').trim_matches('`').to_owned();
        if name.is_empty() {
            name = trimmed.to_owned();
        }
        Self {
            raw: trimmed.to_owned(),
            name,
        }
    }

    /// The unprefixed view name used for policy comparison.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The identifier exactly as reported.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Whether the identifier was blank.
    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }
}

impl PartialEq for ResourceView {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for ResourceView {}

impl Hash for ResourceView {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for ResourceView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Normalize a list of reported identifiers into unique views.
///
/// First-seen order is preserved and blank identifiers are dropped.
pub fn normalize_views<'a>(raw: impl IntoIterator<Item = &'a str>) -> Vec<ResourceView> {
    let mut seen = HashSet::new();
    raw.into_iter()
        .map(ResourceView::parse)
        .filter(|view| !view.is_empty())
        .filter(|view| seen.insert(view.name().to_owned()))
        .collect()
}

// ---------------------------------------------------------------------------
// Disclaim mode
// ---------------------------------------------------------------------------

/// How the gateway treats answers that used views outside the role's set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisclaimMode {
    /// Deliver the answer with an advisory notice appended.
    #[default]
    Disclose,
    /// Refuse the answer outright.
    Deny,
}

impl std::str::FromStr for DisclaimMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disclose" => Ok(Self::Disclose),
            "deny" | "strict" => Ok(Self::Deny),
            other => Err(format!("unknown disclaim mode: {other:?}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Errors building a policy registry.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// No roles were configured.
    #[error("policy defines no roles")]
    EmptyPolicy,
    /// The configured fallback role has no entry.
    #[error("default role {0:?} has no policy entry")]
    UnknownDefaultRole(String),
}

/// The views a resolved role may receive answers from.
#[derive(Debug, Clone, Copy)]
pub struct RoleGrant<'a> {
    /// The role whose entry was used; differs from the caller's claim on fallback.
    pub effective_role: &'a str,
    /// Whether the caller's role was unknown and the fallback was applied.
    pub fell_back: bool,
    /// Allowed views, by unprefixed name.
    pub allowed: &'a HashSet<ResourceView>,
}

impl RoleGrant<'_> {
    /// Whether `view` is inside this grant.
    pub fn permits(&self, view: &ResourceView) -> bool {
        self.allowed.contains(view)
    }

    /// Allowed views in their configured form, sorted, for the engine hint.
    pub fn hint(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .allowed
            .iter()
            .map(|view| view.raw().to_owned())
            .collect();
        names.sort();
        names
    }
}

/// Static role → allowed-views mapping.
#[derive(Debug, Clone)]
pub struct PolicyRegistry {
    roles: BTreeMap<String, HashSet<ResourceView>>,
    fallback_role: String,
}

impl PolicyRegistry {
    /// Build a registry.
    ///
    /// `default_role` names the entry used for unrecognized roles. When it is
    /// `None`, the role with the fewest allowed views is used, ties broken by
    /// name.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] when `roles` is empty or `default_role` has no
    /// entry.
    pub fn new(
        roles: &BTreeMap<String, Vec<String>>,
        default_role: Option<&str>,
    ) -> Result<Self, PolicyError> {
        if roles.is_empty() {
            return Err(PolicyError::EmptyPolicy);
        }

        let roles: BTreeMap<String, HashSet<ResourceView>> = roles
            .iter()
            .map(|(role, views)| {
                let set = normalize_views(views.iter().map(String::as_str))
                    .into_iter()
                    .collect();
                (role.clone(), set)
            })
            .collect();

        let fallback_role = match default_role {
            Some(role) if roles.contains_key(role) => role.to_owned(),
            Some(role) => return Err(PolicyError::UnknownDefaultRole(role.to_owned())),
            None => roles
                .iter()
                .min_by(|a, b| a.1.len().cmp(&b.1.len()).then_with(|| a.0.cmp(b.0)))
                .map(|(role, _)| role.clone())
                .ok_or(PolicyError::EmptyPolicy)?,
        };

        Ok(Self {
            roles,
            fallback_role,
        })
    }

    /// Resolve the grant for a caller role. Never returns an unrestricted set.
    pub fn grant(&self, role: &str) -> RoleGrant<'_> {
        if let Some((name, allowed)) = self.roles.get_key_value(role) {
            return RoleGrant {
                effective_role: name,
                fell_back: false,
                allowed,
            };
        }
        let allowed = self
            .roles
            .get(&self.fallback_role)
            .unwrap_or_else(|| empty_set());
        RoleGrant {
            effective_role: &self.fallback_role,
            fell_back: true,
            allowed,
        }
    }

    /// The allowed views for `role`, after fallback.
    pub fn allowed_resources(&self, role: &str) -> &HashSet<ResourceView> {
        self.grant(role).allowed
    }

    /// The role used for unrecognized callers.
    pub fn fallback_role(&self) -> &str {
        &self.fallback_role
    }

    /// Configured roles and their allowed view names, sorted.
    pub fn summary(&self) -> BTreeMap<&str, BTreeSet<&str>> {
        self.roles
            .iter()
            .map(|(role, views)| (role.as_str(), views.iter().map(ResourceView::name).collect()))
            .collect()
    }
}

fn empty_set() -> &'static HashSet<ResourceView> {
    static EMPTY: std::sync::OnceLock<HashSet<ResourceView>> = std::sync::OnceLock::new();
    EMPTY.get_or_init(HashSet::new)
}
