//! Convention-based routes: a directory tree mirrors URL paths, method artifacts mark routes.

pub mod binder;
pub mod discover;
pub mod handler;
pub mod validation;

pub use binder::{bind, BindContext, BindError, BoundRoute};
pub use discover::{discover, DiscoverError, RouteDescriptor, RouteMethod};
pub use handler::{handler_fn, HandlerFactory, HandlerParams, HandlerTable, RouteHandler};
pub use validation::{
    FieldLocation, FieldRule, RequestInputs, RuleSet, RuleSetError, ValidationReport, ValueKind,
};
