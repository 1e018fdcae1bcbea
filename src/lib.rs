// Trellis - dependency injection and a request pipeline for Rust services
//
// Providers are declared on a container with singleton, transient or
// request scope. Controllers, routes and their guards, middleware and
// interceptors are declared on a registry and served by an Application.

// Re-export core functionality
pub use trellis_core::*;

// Re-export optional crates
#[cfg(feature = "config")]
pub use trellis_config;

// Prelude for common imports
pub mod prelude {
    pub use crate::{
        Application,
        CallHandler,
        Container,
        ControllerBuilder,
        Error,
        ExecutionContext,
        Guard,
        GuardRef,
        HandlerArgs,
        HttpMethod,
        HttpRequest,
        HttpResponse,
        Inject,
        Injectable,
        Interceptor,
        InterceptorRef,
        Middleware,
        MiddlewareRef,
        Next,
        ParamBinding,
        Provider,
        ProviderOptions,
        Registry,
        RequestContext,
        Resolver,
        RouteDef,
        Scope,
        Token,
    };

    #[cfg(feature = "config")]
    pub use trellis_config::{ConfigManager, ServerSettings};
}
