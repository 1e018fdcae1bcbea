// Dependency injection container

use crate::lifecycle::{self, HookFn, LifecycleManager, OnDestroy, OnInit};
use crate::logging::{debug, info, trace, warn};
use crate::request_scope::Instance;
use crate::resolver::Resolver;
use crate::{Error, Injectable, Provider, Token};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

/// Lifetime policy of a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Scope {
    /// One instance per container, created on first resolution
    #[default]
    Singleton,
    /// A new instance on every resolution
    Transient,
    /// One instance per active request scope
    Request,
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::Singleton => write!(f, "singleton"),
            Scope::Transient => write!(f, "transient"),
            Scope::Request => write!(f, "request"),
        }
    }
}

/// Declaration options for a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProviderOptions {
    pub scope: Scope,
    /// Orders lifecycle hooks only; higher runs first on init
    pub priority: i32,
}

impl ProviderOptions {
    pub fn singleton() -> Self {
        Self::default()
    }

    pub fn transient() -> Self {
        Self {
            scope: Scope::Transient,
            ..Self::default()
        }
    }

    pub fn request() -> Self {
        Self {
            scope: Scope::Request,
            ..Self::default()
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

pub(crate) type Factory = Arc<dyn Fn(&mut Resolver<'_>) -> Result<Instance, Error> + Send + Sync>;
pub(crate) type FieldInjector =
    Arc<dyn Fn(&Instance, &mut Resolver<'_>) -> Result<(), Error> + Send + Sync>;

/// A provider declaration as stored by the container.
pub(crate) struct Declaration {
    pub(crate) token: Token,
    pub(crate) options: ProviderOptions,
    pub(crate) factory: Factory,
    pub(crate) inject: Option<FieldInjector>,
    init: Option<HookFn>,
    destroy: Option<HookFn>,
}

/// Typed builder for a provider declaration.
///
/// Obtained from [`Container::provider`], [`Container::factory_provider`] or
/// [`Container::value_provider`] and handed to [`Container::declare`].
pub struct ProviderBuilder<T> {
    token: Token,
    options: ProviderOptions,
    factory: Factory,
    inject: Option<FieldInjector>,
    init: Option<HookFn>,
    destroy: Option<HookFn>,
    is_value: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> ProviderBuilder<T> {
    fn new(factory: Factory) -> Self {
        Self {
            token: Token::of::<T>(),
            options: ProviderOptions::default(),
            factory,
            inject: None,
            init: None,
            destroy: None,
            is_value: false,
            _marker: PhantomData,
        }
    }

    /// Resolve this provider under an explicit token instead of its type.
    pub fn token(mut self, token: Token) -> Self {
        self.token = token;
        self
    }

    /// Set the scope. Value bindings always stay singletons.
    pub fn scope(mut self, scope: Scope) -> Self {
        if !self.is_value {
            self.options.scope = scope;
        }
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.options.priority = priority;
        self
    }

    pub(crate) fn declared_token(&self) -> Token {
        self.token
    }

    pub(crate) fn declared_scope(&self) -> Scope {
        self.options.scope
    }

    pub fn options(self, options: ProviderOptions) -> Self {
        self.scope(options.scope).priority(options.priority)
    }

    /// Run [`OnInit::on_init`] during [`Container::initialize`]. Singleton
    /// declarations only.
    pub fn with_init_hook(mut self) -> Self
    where
        T: Provider + OnInit,
    {
        self.init = Some(lifecycle::init_hook::<T>());
        self
    }

    /// Run [`OnDestroy::on_destroy`] during [`Container::shutdown`]. Singleton
    /// declarations only.
    pub fn with_destroy_hook(mut self) -> Self
    where
        T: Provider + OnDestroy,
    {
        self.destroy = Some(lifecycle::destroy_hook::<T>());
        self
    }

    fn into_declaration(self) -> Declaration {
        Declaration {
            token: self.token,
            options: self.options,
            factory: self.factory,
            inject: self.inject,
            init: self.init,
            destroy: self.destroy,
        }
    }
}

struct ContainerInner {
    declarations: RwLock<HashMap<Token, Arc<Declaration>>>,
    order: RwLock<Vec<Token>>,
    singletons: RwLock<HashMap<Token, Instance>>,
    lifecycle: LifecycleManager,
}

/// The dependency injection container
///
/// Cloning is cheap; clones share declarations and the singleton cache.
#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
}

impl Container {
    pub fn new() -> Self {
        debug!("Creating new DI container");
        Self {
            inner: Arc::new(ContainerInner {
                declarations: RwLock::new(HashMap::new()),
                order: RwLock::new(Vec::new()),
                singletons: RwLock::new(HashMap::new()),
                lifecycle: LifecycleManager::new(),
            }),
        }
    }

    // ========== Declaration ==========

    /// Builder for an [`Injectable`] provider keyed by its type.
    pub fn provider<T: Injectable>() -> ProviderBuilder<T> {
        let mut builder = ProviderBuilder::<T>::new(Arc::new(construct_injectable::<T>));
        builder.inject = Some(Arc::new(inject_fields::<T>));
        builder
    }

    /// Builder for a provider constructed by `factory`.
    pub fn factory_provider<T, F>(factory: F) -> ProviderBuilder<T>
    where
        T: Send + Sync + 'static,
        F: Fn(&mut Resolver<'_>) -> Result<T, Error> + Send + Sync + 'static,
    {
        ProviderBuilder::new(Arc::new(
            move |resolver: &mut Resolver<'_>| -> Result<Instance, Error> {
                let instance: Instance = Arc::new(factory(resolver)?);
                Ok(instance)
            },
        ))
    }

    /// Builder for an already constructed value.
    pub fn value_provider<T: Send + Sync + 'static>(value: T) -> ProviderBuilder<T> {
        let instance: Instance = Arc::new(value);
        let mut builder = ProviderBuilder::new(Arc::new(
            move |_: &mut Resolver<'_>| -> Result<Instance, Error> { Ok(instance.clone()) },
        ));
        builder.is_value = true;
        builder
    }

    /// Add a declaration. Returns `false` when the token was already declared,
    /// in which case the first declaration is kept, or when the declaration
    /// is rejected by [`Container::try_declare`].
    pub fn declare<T: Send + Sync + 'static>(&self, builder: ProviderBuilder<T>) -> bool {
        match self.try_declare(builder) {
            Ok(added) => added,
            Err(e) => {
                warn!(error = %e, "Provider declaration rejected");
                false
            }
        }
    }

    /// Add a declaration, failing when it carries lifecycle hooks but is not
    /// a singleton. Hooks only run for instances built by
    /// [`Container::initialize`].
    pub fn try_declare<T: Send + Sync + 'static>(
        &self,
        builder: ProviderBuilder<T>,
    ) -> Result<bool, Error> {
        let declaration = builder.into_declaration();
        let token = declaration.token;
        let scope = declaration.options.scope;
        if scope != Scope::Singleton && (declaration.init.is_some() || declaration.destroy.is_some()) {
            return Err(Error::Lifecycle(format!(
                "{}: lifecycle hooks require singleton scope, declared {}",
                token, scope
            )));
        }

        let mut declarations = self.inner.declarations.write();
        if declarations.contains_key(&token) {
            debug!(provider = token.name(), "Provider already declared, keeping first declaration");
            return Ok(false);
        }
        declarations.insert(token, Arc::new(declaration));
        self.inner.order.write().push(token);

        debug!(provider = token.name(), "Provider registered in DI container");
        Ok(true)
    }

    /// Declare an [`Injectable`] keyed by its own type.
    pub fn register<T: Injectable>(&self, options: ProviderOptions) -> bool {
        self.declare(Self::provider::<T>().options(options))
    }

    /// Declare an [`Injectable`] under an explicit token.
    pub fn register_token<T: Injectable>(&self, token: Token, options: ProviderOptions) -> bool {
        self.declare(Self::provider::<T>().token(token).options(options))
    }

    /// Declare a provider built by a factory closure.
    pub fn register_factory<T, F>(&self, token: Token, options: ProviderOptions, factory: F) -> bool
    where
        T: Send + Sync + 'static,
        F: Fn(&mut Resolver<'_>) -> Result<T, Error> + Send + Sync + 'static,
    {
        self.declare(Self::factory_provider(factory).token(token).options(options))
    }

    /// Bind `token` to an externally created value.
    pub fn register_value<T: Send + Sync + 'static>(&self, token: Token, value: T) -> bool {
        self.declare(Self::value_provider(value).token(token))
    }

    /// Bind a value under its own type.
    pub fn register_instance<T: Send + Sync + 'static>(&self, value: T) -> bool {
        self.declare(Self::value_provider(value))
    }

    // ========== Resolution ==========

    /// Resolve a provider by type
    pub fn resolve<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, Error> {
        Resolver::new(self).get::<T>()
    }

    /// Resolve a provider by token
    pub fn resolve_token<T: Send + Sync + 'static>(&self, token: &Token) -> Result<Arc<T>, Error> {
        Resolver::new(self).get_token::<T>(token)
    }

    /// Resolve a provider without downcasting it.
    pub fn resolve_instance(&self, token: &Token) -> Result<Arc<dyn std::any::Any + Send + Sync>, Error> {
        Resolver::new(self).resolve_instance(token)
    }

    /// Resolve `T` if it is declared, otherwise build it directly with its
    /// dependencies resolved from this container. Undeclared instances are
    /// not cached.
    pub fn instantiate<T: Injectable>(&self) -> Result<Arc<T>, Error> {
        let token = Token::of::<T>();
        if self.has_token(&token) {
            return self.resolve::<T>();
        }

        trace!(provider = token.name(), "Instantiating undeclared injectable");
        let mut resolver = Resolver::new(self);
        let instance = Arc::new(resolver.construct_with::<T>(token)?);
        instance.inject(&mut resolver)?;
        Ok(instance)
    }

    /// Check if a provider is declared for type `T`
    pub fn has<T: 'static>(&self) -> bool {
        self.has_token(&Token::of::<T>())
    }

    pub fn has_token(&self, token: &Token) -> bool {
        self.inner.declarations.read().contains_key(token)
    }

    /// Declared scope of `token`, if any.
    pub fn scope_of(&self, token: &Token) -> Option<Scope> {
        self.inner
            .declarations
            .read()
            .get(token)
            .map(|d| d.options.scope)
    }

    /// Whether the singleton for `token` has been constructed.
    pub fn is_instantiated(&self, token: &Token) -> bool {
        self.inner.singletons.read().contains_key(token)
    }

    /// Number of declared providers.
    pub fn len(&self) -> usize {
        self.inner.declarations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn declaration(&self, token: &Token) -> Option<Arc<Declaration>> {
        self.inner.declarations.read().get(token).cloned()
    }

    pub(crate) fn cached_singleton(&self, token: &Token) -> Option<Instance> {
        self.inner.singletons.read().get(token).cloned()
    }

    /// Publish a fully wired singleton unless another caller won the race,
    /// returning whichever instance is cached.
    pub(crate) fn cache_singleton(&self, token: Token, instance: Instance) -> Instance {
        self.inner
            .singletons
            .write()
            .entry(token)
            .or_insert(instance)
            .clone()
    }

    // ========== Lifecycle ==========

    /// Eagerly construct every singleton and run init hooks.
    ///
    /// Providers are processed highest priority first, ties in declaration
    /// order. Each init hook is awaited before the next provider is touched.
    /// Wiring errors such as a constructor cycle surface here, at bootstrap.
    pub async fn initialize(&self) -> Result<(), Error> {
        let mut pending: Vec<Arc<Declaration>> = {
            let declarations = self.inner.declarations.read();
            self.inner
                .order
                .read()
                .iter()
                .filter_map(|token| declarations.get(token).cloned())
                .filter(|d| d.options.scope == Scope::Singleton)
                .collect()
        };
        pending.sort_by(|a, b| b.options.priority.cmp(&a.options.priority));

        for declaration in pending {
            if self.inner.lifecycle.is_initialized(&declaration.token) {
                continue;
            }
            let instance = self.resolve_instance(&declaration.token)?;
            self.inner
                .lifecycle
                .initialize(
                    declaration.token,
                    instance,
                    declaration.init.clone(),
                    declaration.destroy.clone(),
                )
                .await
                .map_err(|e| Error::Lifecycle(format!("{}: {}", declaration.token, e)))?;
        }

        info!(
            providers = self.inner.lifecycle.initialized().len(),
            "DI container initialized"
        );
        Ok(())
    }

    /// Run destroy hooks in reverse initialization order.
    pub async fn shutdown(&self) -> Result<(), Error> {
        self.inner.lifecycle.shutdown().await.map_err(|errors| {
            Error::Lifecycle(
                errors
                    .iter()
                    .map(|(name, e)| format!("{}: {}", name, e))
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        })
    }

    /// Tokens whose init step has completed, in order.
    pub fn initialized(&self) -> Vec<Token> {
        self.inner.lifecycle.initialized()
    }

    /// Clear all declarations and cached singletons.
    ///
    /// Intended for test isolation only; must not race with resolution.
    pub fn reset(&self) {
        let count = {
            let mut declarations = self.inner.declarations.write();
            let count = declarations.len();
            declarations.clear();
            count
        };
        self.inner.order.write().clear();
        self.inner.singletons.write().clear();
        self.inner.lifecycle.clear();

        debug!(provider_count = count, "Cleared all providers from container");
    }
}

fn construct_injectable<T: Injectable>(resolver: &mut Resolver<'_>) -> Result<Instance, Error> {
    let instance: Instance = Arc::new(T::construct(resolver)?);
    Ok(instance)
}

fn inject_fields<T: Injectable>(instance: &Instance, resolver: &mut Resolver<'_>) -> Result<(), Error> {
    match instance.clone().downcast::<T>() {
        Ok(typed) => typed.inject(resolver),
        Err(_) => Err(Error::Internal(format!(
            "field injection target is not a {}",
            std::any::type_name::<T>()
        ))),
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("providers", &self.len())
            .field("singletons", &self.inner.singletons.read().len())
            .finish()
    }
}
