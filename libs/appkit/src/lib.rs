//! Application scaffold: config-driven lifecycle, convention routes, access control, services.

pub mod access;
pub mod lifecycle;
pub mod model;
pub mod routing;
pub mod runtime;
pub mod services;
pub mod storage;

pub use access::{AccessDeclaration, AccessPolicy, Caller, IdentityResolver, OnForbidden};
pub use lifecycle::{AppError, Application, Step};
pub use model::{model_as, DomainModel, NullModel};
pub use routing::{BindContext, BoundRoute, HandlerTable, RouteMethod};
pub use runtime::{run, RunOptions, ShutdownOptions};
pub use services::{Service, ServiceCatalog, ServiceCtx, ServiceRegistry};
pub use storage::{StorageError, StoragePool};

pub use appkit_bootstrap as bootstrap;
