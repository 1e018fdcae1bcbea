// Core library for the Trellis framework
// Dependency injection with scoped lifecycles, request scoping, and the
// guard / middleware / interceptor request pipeline

pub mod application;
pub mod container;
pub mod context;
pub mod error;
pub mod guard;
pub mod http;
pub mod interceptor;
pub mod lifecycle;
pub mod logging;
pub mod middleware;
pub mod params;
pub mod pipeline;
pub mod registry;
pub mod request_scope;
pub mod resolver;
pub mod router;
pub mod token;
pub mod traits;

// Re-export commonly used types
pub use application::*;
pub use container::{Container, ProviderBuilder, ProviderOptions, Scope};
pub use context::*;
pub use error::{Error, Outcome, Result};
pub use guard::*;
pub use interceptor::*;
pub use lifecycle::{LifecycleResult, OnDestroy, OnInit};
pub use middleware::*;
pub use params::*;
pub use pipeline::{ComponentRef, GuardRef, InterceptorRef, MiddlewareRef, PipelineDescriptor};
pub use registry::*;
pub use request_scope::{RequestContext, RequestScope};
pub use resolver::{Inject, Resolver};
pub use router::{Route, Router};
pub use self::http::*;
pub use token::Token;
pub use traits::*;
