//! Controller and provider registry.
//!
//! Controllers, their routes and their pipeline components are declared
//! once, at startup, into a [`Registry`]. The registry is a plain side table
//! keyed by controller token and handler name; the router reads it as data
//! when an application is created and never writes to it.
//!
//! ```
//! use std::sync::Arc;
//! use trellis_core::{
//!     ControllerBuilder, Error, GuardRef, HttpResponse, Injectable, Provider, Registry,
//!     Resolver, RouteDef,
//! };
//!
//! struct UsersController;
//!
//! impl Provider for UsersController {}
//!
//! impl Injectable for UsersController {
//!     fn construct(_: &mut Resolver<'_>) -> Result<Self, Error> {
//!         Ok(UsersController)
//!     }
//! }
//!
//! let registry = Registry::new();
//! registry.register_controller(
//!     ControllerBuilder::<UsersController>::new("/users")
//!         .guard(GuardRef::from_fn("open", |_| Ok(true)))
//!         .route(RouteDef::get("/", "list", |_c: Arc<UsersController>, _args| async {
//!             HttpResponse::json(&serde_json::json!({"message": "success"}))
//!         })),
//! );
//!
//! assert_eq!(registry.controllers().len(), 1);
//! ```

use crate::container::{ProviderBuilder, Scope};
use crate::logging::debug;
use crate::params::{HandlerArgs, ParamBinding};
use crate::pipeline::{GuardRef, InterceptorRef, MiddlewareRef, PipelineDescriptor};
use crate::request_scope::Instance;
use crate::{Container, Error, HttpMethod, HttpResponse, Injectable, ProviderOptions, Token};
use futures_util::future::BoxFuture;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// Type-erased route handler; receives the resolved controller instance.
pub type RouteHandler =
    Arc<dyn Fn(Instance, HandlerArgs) -> BoxFuture<'static, Result<HttpResponse, Error>> + Send + Sync>;

type InstallFn = Arc<dyn Fn(&Container) -> bool + Send + Sync>;

/// What a registered provider is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderRole {
    /// A service built by the container
    Injectable,
    /// A configuration value bound as-is
    Config,
}

/// A provider declared through the registry
#[derive(Clone)]
pub struct ProviderDefinition {
    token: Token,
    role: ProviderRole,
    scope: Scope,
    install: InstallFn,
}

impl ProviderDefinition {
    /// An injectable keyed by its own type.
    pub fn injectable<T: Injectable>(options: ProviderOptions) -> Self {
        Self::from_builder(ProviderRole::Injectable, move || {
            Container::provider::<T>().options(options)
        })
    }

    /// A configuration value bound under `token`.
    pub fn config<T: Clone + Send + Sync + 'static>(token: Token, value: T) -> Self {
        Self::from_builder(ProviderRole::Config, move || {
            Container::value_provider(value.clone()).token(token)
        })
    }

    /// A provider described by a builder, e.g. one carrying lifecycle hooks.
    pub fn from_builder<T, F>(role: ProviderRole, build: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn() -> ProviderBuilder<T> + Send + Sync + 'static,
    {
        let probe = build();
        Self {
            token: probe.declared_token(),
            role,
            scope: probe.declared_scope(),
            install: Arc::new(move |container: &Container| container.declare(build())),
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn name(&self) -> &'static str {
        self.token.name()
    }

    pub fn role(&self) -> ProviderRole {
        self.role
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }
}

impl std::fmt::Debug for ProviderDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderDefinition")
            .field("token", &self.token)
            .field("role", &self.role)
            .field("scope", &self.scope)
            .finish()
    }
}

/// A route as stored in the registry
#[derive(Clone)]
pub struct RouteDefinition {
    pub method: HttpMethod,
    /// Full path including the controller prefix
    pub path: String,
    pub handler_name: &'static str,
    pub pipeline: PipelineDescriptor,
    pub params: Vec<ParamBinding>,
    pub(crate) handler: RouteHandler,
}

impl std::fmt::Debug for RouteDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteDefinition")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("handler_name", &self.handler_name)
            .field("pipeline", &self.pipeline)
            .field("params", &self.params)
            .finish()
    }
}

/// A controller as stored in the registry
pub struct ControllerDefinition {
    token: Token,
    prefix: String,
    scope: Scope,
    install: InstallFn,
    pipeline: PipelineDescriptor,
    routes: Vec<RouteDefinition>,
}

impl ControllerDefinition {
    pub fn token(&self) -> Token {
        self.token
    }

    pub fn name(&self) -> &'static str {
        self.token.name()
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Class-level pipeline components
    pub fn pipeline(&self) -> &PipelineDescriptor {
        &self.pipeline
    }

    pub fn routes(&self) -> &[RouteDefinition] {
        &self.routes
    }

    fn route(&self, member: &str) -> Option<&RouteDefinition> {
        self.routes.iter().find(|r| r.handler_name == member)
    }
}

impl std::fmt::Debug for ControllerDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerDefinition")
            .field("token", &self.token)
            .field("prefix", &self.prefix)
            .field("scope", &self.scope)
            .field("routes", &self.routes.len())
            .finish()
    }
}

/// Declares a controller, its class-level pipeline and its routes.
pub struct ControllerBuilder<C> {
    prefix: String,
    options: ProviderOptions,
    pipeline: PipelineDescriptor,
    routes: Vec<RouteDef<C>>,
}

impl<C: Injectable> ControllerBuilder<C> {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            options: ProviderOptions::singleton(),
            pipeline: PipelineDescriptor::new(),
            routes: Vec::new(),
        }
    }

    /// Container scope of the controller itself; singleton by default.
    pub fn scope(mut self, scope: Scope) -> Self {
        self.options.scope = scope;
        self
    }

    pub fn guard(mut self, guard: GuardRef) -> Self {
        self.pipeline.guards.push(guard);
        self
    }

    pub fn middleware(mut self, middleware: MiddlewareRef) -> Self {
        self.pipeline.middleware.push(middleware);
        self
    }

    pub fn interceptor(mut self, interceptor: InterceptorRef) -> Self {
        self.pipeline.interceptors.push(interceptor);
        self
    }

    pub fn route(mut self, route: RouteDef<C>) -> Self {
        self.routes.push(route);
        self
    }

    pub fn build(self) -> ControllerDefinition {
        let options = self.options;
        let prefix = self.prefix;
        let routes = self
            .routes
            .into_iter()
            .map(|route| RouteDefinition {
                method: route.method,
                path: join_paths(&prefix, &route.path),
                handler_name: route.handler_name,
                pipeline: route.pipeline,
                params: route.params,
                handler: route.handler,
            })
            .collect();

        ControllerDefinition {
            token: Token::of::<C>(),
            prefix,
            scope: options.scope,
            install: Arc::new(move |container: &Container| container.register::<C>(options)),
            pipeline: self.pipeline,
            routes,
        }
    }
}

/// Declares one route of controller `C`.
pub struct RouteDef<C> {
    method: HttpMethod,
    path: String,
    handler_name: &'static str,
    pipeline: PipelineDescriptor,
    params: Vec<ParamBinding>,
    handler: RouteHandler,
    _controller: PhantomData<fn() -> C>,
}

impl<C: Injectable> RouteDef<C> {
    pub fn new<F, Fut>(
        method: HttpMethod,
        path: impl Into<String>,
        handler_name: &'static str,
        handler: F,
    ) -> Self
    where
        F: Fn(Arc<C>, HandlerArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HttpResponse, Error>> + Send + 'static,
    {
        let handler: RouteHandler = Arc::new(
            move |instance: Instance, args: HandlerArgs| -> BoxFuture<'static, Result<HttpResponse, Error>> {
                match instance.downcast::<C>() {
                    Ok(controller) => Box::pin(handler(controller, args)),
                    Err(_) => Box::pin(async move {
                        Err(Error::Internal(format!(
                            "resolved controller is not a {}",
                            std::any::type_name::<C>()
                        )))
                    }),
                }
            },
        );

        Self {
            method,
            path: path.into(),
            handler_name,
            pipeline: PipelineDescriptor::new(),
            params: Vec::new(),
            handler,
            _controller: PhantomData,
        }
    }

    pub fn get<F, Fut>(path: impl Into<String>, handler_name: &'static str, handler: F) -> Self
    where
        F: Fn(Arc<C>, HandlerArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HttpResponse, Error>> + Send + 'static,
    {
        Self::new(HttpMethod::GET, path, handler_name, handler)
    }

    pub fn post<F, Fut>(path: impl Into<String>, handler_name: &'static str, handler: F) -> Self
    where
        F: Fn(Arc<C>, HandlerArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HttpResponse, Error>> + Send + 'static,
    {
        Self::new(HttpMethod::POST, path, handler_name, handler)
    }

    pub fn put<F, Fut>(path: impl Into<String>, handler_name: &'static str, handler: F) -> Self
    where
        F: Fn(Arc<C>, HandlerArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HttpResponse, Error>> + Send + 'static,
    {
        Self::new(HttpMethod::PUT, path, handler_name, handler)
    }

    pub fn delete<F, Fut>(path: impl Into<String>, handler_name: &'static str, handler: F) -> Self
    where
        F: Fn(Arc<C>, HandlerArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HttpResponse, Error>> + Send + 'static,
    {
        Self::new(HttpMethod::DELETE, path, handler_name, handler)
    }

    pub fn patch<F, Fut>(path: impl Into<String>, handler_name: &'static str, handler: F) -> Self
    where
        F: Fn(Arc<C>, HandlerArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HttpResponse, Error>> + Send + 'static,
    {
        Self::new(HttpMethod::PATCH, path, handler_name, handler)
    }

    pub fn guard(mut self, guard: GuardRef) -> Self {
        self.pipeline.guards.push(guard);
        self
    }

    pub fn middleware(mut self, middleware: MiddlewareRef) -> Self {
        self.pipeline.middleware.push(middleware);
        self
    }

    pub fn interceptor(mut self, interceptor: InterceptorRef) -> Self {
        self.pipeline.interceptors.push(interceptor);
        self
    }

    /// Append a handler parameter; parameters bind in declaration order.
    pub fn param(mut self, binding: ParamBinding) -> Self {
        self.params.push(binding);
        self
    }
}

fn join_paths(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let path = path.trim_matches('/');
    match (prefix.is_empty(), path.is_empty()) {
        (true, true) => "/".to_string(),
        (true, false) => format!("/{}", path),
        (false, true) => ensure_leading_slash(prefix),
        (false, false) => format!("{}/{}", ensure_leading_slash(prefix), path),
    }
}

fn ensure_leading_slash(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

#[derive(Default)]
struct RegistryInner {
    controllers: Vec<Arc<ControllerDefinition>>,
    providers: Vec<ProviderDefinition>,
}

static GLOBAL: Lazy<Registry> = Lazy::new(Registry::new);

/// Side-table of controllers and providers
#[derive(Default)]
pub struct Registry {
    inner: RwLock<RegistryInner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> &'static Registry {
        &GLOBAL
    }

    /// Add a controller. A controller type already present is kept as is.
    pub fn add_controller(&self, definition: ControllerDefinition) -> bool {
        let mut inner = self.inner.write();
        if inner.controllers.iter().any(|c| c.token == definition.token) {
            debug!(controller = definition.name(), "Controller already registered");
            return false;
        }
        debug!(
            controller = definition.name(),
            prefix = %definition.prefix,
            routes = definition.routes.len(),
            "Controller registered"
        );
        inner.controllers.push(Arc::new(definition));
        true
    }

    pub fn register_controller<C: Injectable>(&self, builder: ControllerBuilder<C>) -> bool {
        self.add_controller(builder.build())
    }

    /// Add a provider. A token already present is kept as is.
    pub fn add_provider(&self, definition: ProviderDefinition) -> bool {
        let mut inner = self.inner.write();
        if inner.providers.iter().any(|p| p.token == definition.token) {
            debug!(provider = definition.name(), "Provider already registered");
            return false;
        }
        debug!(provider = definition.name(), role = ?definition.role, "Provider registered");
        inner.providers.push(definition);
        true
    }

    // ========== Read API ==========

    pub fn controllers(&self) -> Vec<Arc<ControllerDefinition>> {
        self.inner.read().controllers.clone()
    }

    pub fn providers(&self) -> Vec<ProviderDefinition> {
        self.inner.read().providers.clone()
    }

    pub fn controller(&self, token: &Token) -> Option<Arc<ControllerDefinition>> {
        self.inner
            .read()
            .controllers
            .iter()
            .find(|c| c.token == *token)
            .cloned()
    }

    pub fn routes_of(&self, token: &Token) -> Vec<RouteDefinition> {
        self.controller(token)
            .map(|c| c.routes.clone())
            .unwrap_or_default()
    }

    /// Guards declared on the controller (`member` is `None`) or on one of
    /// its handlers.
    pub fn guards_of(&self, token: &Token, member: Option<&str>) -> Vec<GuardRef> {
        self.pipeline_of(token, member)
            .map(|p| p.guards)
            .unwrap_or_default()
    }

    pub fn middleware_of(&self, token: &Token, member: Option<&str>) -> Vec<MiddlewareRef> {
        self.pipeline_of(token, member)
            .map(|p| p.middleware)
            .unwrap_or_default()
    }

    pub fn interceptors_of(&self, token: &Token, member: Option<&str>) -> Vec<InterceptorRef> {
        self.pipeline_of(token, member)
            .map(|p| p.interceptors)
            .unwrap_or_default()
    }

    pub fn params_of(&self, token: &Token, member: &str) -> Vec<ParamBinding> {
        self.controller(token)
            .and_then(|c| c.route(member).map(|r| r.params.clone()))
            .unwrap_or_default()
    }

    fn pipeline_of(&self, token: &Token, member: Option<&str>) -> Option<PipelineDescriptor> {
        let controller = self.controller(token)?;
        match member {
            None => Some(controller.pipeline.clone()),
            Some(member) => controller.route(member).map(|r| r.pipeline.clone()),
        }
    }

    /// Declare every provider, then every controller, in `container`.
    ///
    /// Returns the number of new declarations.
    pub fn install(&self, container: &Container) -> usize {
        let inner = self.inner.read();
        let providers = inner
            .providers
            .iter()
            .filter(|p| (p.install)(container))
            .count();
        let controllers = inner
            .controllers
            .iter()
            .filter(|c| (c.install)(container))
            .count();
        debug!(providers, controllers, "Registry installed into container");
        providers + controllers
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.read();
        inner.controllers.len() + inner.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every declaration. For test isolation only.
    pub fn reset(&self) {
        let mut inner = self.inner.write();
        inner.controllers.clear();
        inner.providers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Provider, Resolver};

    struct Users;

    impl Provider for Users {}

    impl Injectable for Users {
        fn construct(_: &mut Resolver<'_>) -> Result<Self, Error> {
            Ok(Users)
        }
    }

    fn users_controller() -> ControllerBuilder<Users> {
        ControllerBuilder::<Users>::new("/users/")
            .guard(GuardRef::from_fn("class-guard", |_| Ok(true)))
            .route(
                RouteDef::get("/", "list", |_c: Arc<Users>, _args| async {
                    Ok(HttpResponse::ok())
                })
                .guard(GuardRef::from_fn("list-guard", |_| Ok(true))),
            )
            .route(
                RouteDef::get("/:id", "show", |_c: Arc<Users>, _args| async {
                    Ok(HttpResponse::ok())
                })
                .param(ParamBinding::path("id")),
            )
    }

    #[test]
    fn test_join_paths() {
        assert_eq!(join_paths("/users", "/"), "/users");
        assert_eq!(join_paths("/users/", "/:id"), "/users/:id");
        assert_eq!(join_paths("", ""), "/");
        assert_eq!(join_paths("api", "items"), "/api/items");
    }

    #[test]
    fn test_read_api() {
        let registry = Registry::new();
        assert!(registry.register_controller(users_controller()));
        assert!(!registry.register_controller(users_controller()));

        let token = Token::of::<Users>();
        let paths: Vec<_> = registry.routes_of(&token).into_iter().map(|r| r.path).collect();
        assert_eq!(paths, vec!["/users", "/users/:id"]);

        let class: Vec<_> = registry.guards_of(&token, None).iter().map(|g| g.name()).collect();
        assert_eq!(class, vec!["class-guard"]);
        let method: Vec<_> = registry
            .guards_of(&token, Some("list"))
            .iter()
            .map(|g| g.name())
            .collect();
        assert_eq!(method, vec!["list-guard"]);
        assert!(registry.guards_of(&token, Some("missing")).is_empty());
        assert_eq!(registry.params_of(&token, "show").len(), 1);
        assert!(registry.middleware_of(&token, None).is_empty());
    }

    #[test]
    fn test_install_and_reset() {
        let registry = Registry::new();
        registry.register_controller(users_controller());
        registry.add_provider(ProviderDefinition::config(Token::named("PORT"), 8080u16));

        let container = Container::new();
        assert_eq!(registry.install(&container), 2);
        assert_eq!(*container.resolve_token::<u16>(&Token::named("PORT")).unwrap(), 8080);
        assert!(container.has::<Users>());
        assert_eq!(registry.providers()[0].role(), ProviderRole::Config);

        registry.reset();
        assert!(registry.is_empty());
    }
}
