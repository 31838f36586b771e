use http::request::Parts;

/// Role assigned to unauthenticated callers for grant lookups.
pub const GUESTS_ROLE: &str = "guests";

/// Who is making a request. Stored in request extensions before routing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Caller {
    #[default]
    Anonymous,
    User { id: String, groups: Vec<String> },
}

impl Caller {
    pub fn user(id: impl Into<String>, groups: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Caller::User {
            id: id.into(),
            groups: groups.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Caller::User { .. })
    }

    /// Roles evaluated against the grant table, in the order they are checked.
    pub fn roles(&self) -> Vec<&str> {
        match self {
            Caller::Anonymous => vec![GUESTS_ROLE],
            Caller::User { groups, .. } => groups.iter().map(String::as_str).collect(),
        }
    }
}

/// Boundary to the session / credential layer: turns request parts into a [`Caller`].
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, parts: &Parts) -> Caller;
}

/// Treats every request as anonymous.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnonymousResolver;

impl IdentityResolver for AnonymousResolver {
    fn resolve(&self, _parts: &Parts) -> Caller {
        Caller::Anonymous
    }
}
