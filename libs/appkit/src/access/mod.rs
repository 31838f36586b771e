//! Role-based access control: grant table, per-route gates, caller identity.

pub mod declaration;
pub mod gate;
pub mod identity;
pub mod policy;

pub use declaration::AccessDeclaration;
pub use gate::{default_on_forbidden, AccessGate, Denial, OnForbidden};
pub use identity::{AnonymousResolver, Caller, IdentityResolver, GUESTS_ROLE};
pub use policy::{AccessPolicy, Grant, GrantTable, RbacEngine};
