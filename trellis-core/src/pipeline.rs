//! Pipeline components and their instance caches.
//!
//! Guards, middleware and interceptors are declared on controllers and
//! routes as [`ComponentRef`]s: either a type the container builds, or an
//! instance constructed up front. Type-based components are resolved on
//! first use and cached per component type, so one guard type shared by many
//! routes is built once. Components declared with a request or transient
//! scope in the container skip the cache and are resolved every time.

use crate::container::Scope;
use crate::guard::Guard;
use crate::interceptor::Interceptor;
use crate::logging::trace;
use crate::middleware::Middleware;
use crate::{Container, Error, Token};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

pub(crate) type ResolveFn<C> = fn(&Container) -> Result<Arc<C>, Error>;

enum Source<C: ?Sized> {
    Resolve(ResolveFn<C>),
    Instance(Arc<C>),
}

impl<C: ?Sized> Clone for Source<C> {
    fn clone(&self) -> Self {
        match self {
            Source::Resolve(resolve) => Source::Resolve(*resolve),
            Source::Instance(instance) => Source::Instance(instance.clone()),
        }
    }
}

/// Reference to a pipeline component as declared on a controller or route.
pub struct ComponentRef<C: ?Sized> {
    token: Token,
    source: Source<C>,
}

pub type GuardRef = ComponentRef<dyn Guard>;
pub type MiddlewareRef = ComponentRef<dyn Middleware>;
pub type InterceptorRef = ComponentRef<dyn Interceptor>;

impl<C: ?Sized> ComponentRef<C> {
    pub(crate) fn resolved(token: Token, resolve: ResolveFn<C>) -> Self {
        Self {
            token,
            source: Source::Resolve(resolve),
        }
    }

    pub(crate) fn prebuilt(name: &'static str, instance: Arc<C>) -> Self {
        Self {
            token: Token::named(name),
            source: Source::Instance(instance),
        }
    }

    pub fn name(&self) -> &'static str {
        self.token.name()
    }

    /// The cache key; the component's type token for type-based references.
    pub fn token(&self) -> Token {
        self.token
    }

    pub fn is_instance(&self) -> bool {
        matches!(self.source, Source::Instance(_))
    }
}

impl<C: ?Sized> Clone for ComponentRef<C> {
    fn clone(&self) -> Self {
        Self {
            token: self.token,
            source: self.source.clone(),
        }
    }
}

impl<C: ?Sized> std::fmt::Debug for ComponentRef<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentRef")
            .field("name", &self.token.name())
            .field("instance", &self.is_instance())
            .finish()
    }
}

/// Ordered pipeline components for a route.
///
/// Controllers and routes each carry one; the router layers the
/// controller's entries before the route's.
#[derive(Clone, Default, Debug)]
pub struct PipelineDescriptor {
    pub guards: Vec<GuardRef>,
    pub middleware: Vec<MiddlewareRef>,
    pub interceptors: Vec<InterceptorRef>,
}

impl PipelineDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Class-level entries followed by method-level entries.
    pub fn layered(class: &PipelineDescriptor, method: &PipelineDescriptor) -> Self {
        Self {
            guards: class.guards.iter().chain(&method.guards).cloned().collect(),
            middleware: class
                .middleware
                .iter()
                .chain(&method.middleware)
                .cloned()
                .collect(),
            interceptors: class
                .interceptors
                .iter()
                .chain(&method.interceptors)
                .cloned()
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty() && self.middleware.is_empty() && self.interceptors.is_empty()
    }
}

/// Instance cache for one kind of pipeline component.
pub(crate) struct ComponentCache<C: ?Sized> {
    kind: &'static str,
    entries: RwLock<HashMap<Token, Arc<C>>>,
}

impl<C: ?Sized> ComponentCache<C> {
    pub(crate) fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn get_or_resolve(
        &self,
        component: &ComponentRef<C>,
        container: &Container,
    ) -> Result<Arc<C>, Error> {
        let resolve = match &component.source {
            Source::Instance(instance) => return Ok(instance.clone()),
            Source::Resolve(resolve) => *resolve,
        };

        if let Some(cached) = self.entries.read().get(&component.token) {
            trace!(kind = self.kind, component = component.name(), "Component cache hit");
            return Ok(cached.clone());
        }

        let instance = resolve(container)?;
        if matches!(
            container.scope_of(&component.token),
            Some(Scope::Request | Scope::Transient)
        ) {
            return Ok(instance);
        }

        trace!(kind = self.kind, component = component.name(), "Caching component instance");
        Ok(self
            .entries
            .write()
            .entry(component.token)
            .or_insert(instance)
            .clone())
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub(crate) fn clear(&self) {
        self.entries.write().clear();
    }
}

/// The three component caches owned by a router.
pub(crate) struct ComponentCaches {
    pub(crate) guards: ComponentCache<dyn Guard>,
    pub(crate) middleware: ComponentCache<dyn Middleware>,
    pub(crate) interceptors: ComponentCache<dyn Interceptor>,
}

impl ComponentCaches {
    pub(crate) fn new() -> Self {
        Self {
            guards: ComponentCache::new("guard"),
            middleware: ComponentCache::new("middleware"),
            interceptors: ComponentCache::new("interceptor"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use crate::{Injectable, Provider, ProviderOptions, Resolver};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static BUILT: AtomicUsize = AtomicUsize::new(0);

    struct CountingGuard;

    impl Provider for CountingGuard {}

    impl Injectable for CountingGuard {
        fn construct(_: &mut Resolver<'_>) -> Result<Self, Error> {
            BUILT.fetch_add(1, Ordering::SeqCst);
            Ok(CountingGuard)
        }
    }

    #[async_trait]
    impl Guard for CountingGuard {
        async fn can_activate(&self, _: &ExecutionContext) -> Result<bool, Error> {
            Ok(true)
        }
    }

    #[test]
    fn test_cache_builds_once_and_clears() {
        let container = Container::new();
        let cache = ComponentCache::<dyn Guard>::new("guard");
        let guard = GuardRef::of::<CountingGuard>();

        let before = BUILT.load(Ordering::SeqCst);
        let a = cache.get_or_resolve(&guard, &container).unwrap();
        let b = cache.get_or_resolve(&guard, &container).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
        assert_eq!(BUILT.load(Ordering::SeqCst), before + 1);

        cache.clear();
        assert_eq!(cache.len(), 0);
        cache.get_or_resolve(&guard, &container).unwrap();
        assert_eq!(BUILT.load(Ordering::SeqCst), before + 2);
    }

    struct FreshGuard;

    impl Provider for FreshGuard {}

    impl Injectable for FreshGuard {
        fn construct(_: &mut Resolver<'_>) -> Result<Self, Error> {
            Ok(FreshGuard)
        }
    }

    #[async_trait]
    impl Guard for FreshGuard {
        async fn can_activate(&self, _: &ExecutionContext) -> Result<bool, Error> {
            Ok(true)
        }
    }

    #[test]
    fn test_transient_components_bypass_cache() {
        let container = Container::new();
        container.register::<FreshGuard>(ProviderOptions::transient());
        let cache = ComponentCache::<dyn Guard>::new("guard");
        let guard = GuardRef::of::<FreshGuard>();

        let a = cache.get_or_resolve(&guard, &container).unwrap();
        let b = cache.get_or_resolve(&guard, &container).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_layered_puts_class_entries_first() {
        let class = PipelineDescriptor {
            guards: vec![GuardRef::from_fn("class", |_| Ok(true))],
            ..PipelineDescriptor::default()
        };
        let method = PipelineDescriptor {
            guards: vec![GuardRef::from_fn("method", |_| Ok(true))],
            ..PipelineDescriptor::default()
        };
        let layered = PipelineDescriptor::layered(&class, &method);
        let names: Vec<_> = layered.guards.iter().map(|g| g.name()).collect();
        assert_eq!(names, vec!["class", "method"]);
        assert!(layered.guards.iter().all(|g| g.is_instance()));
    }
}
