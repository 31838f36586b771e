//! Pluggable services started by the application after its model is open.

pub mod context;
pub mod contracts;
pub mod registry;

pub use context::{CertPair, CertificateLoader, FsCertificateLoader, ServiceCtx, ServiceDeps};
pub use contracts::{Service, ServiceCatalog, ServiceFactory};
pub use registry::{ServiceError, ServiceRegistry};
