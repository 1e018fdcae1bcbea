//! Resolution of provider graphs.
//!
//! A [`Resolver`] is created for every top-level `resolve` call and handed to
//! provider constructors, which use it to request their own dependencies. It
//! carries the chain of tokens currently under construction; reaching a token
//! that is already on the chain is a constructor cycle.
//!
//! Field-level dependencies are declared with [`Inject`] and filled in by
//! `Injectable::inject`, which the resolver calls right after construction.
//! While its fields are being filled, an instance is held in the resolver's
//! wiring table: a field pointing back at it gets that same instance instead
//! of tripping the cycle check or building a fresh peer. Singleton and
//! request instances are published to their scope only once wiring has
//! succeeded, so no other caller ever sees empty fields.

use crate::container::{Container, Scope};
use crate::logging::{debug, trace};
use crate::request_scope::{Instance, RequestContext, RequestScope};
use crate::{Error, Injectable, Token};
use std::any::type_name;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Resolution handle passed to provider constructors.
pub struct Resolver<'a> {
    container: &'a Container,
    chain: Vec<Token>,
    wiring: HashMap<Token, Instance>,
    request: Option<RequestScope>,
}

impl<'a> Resolver<'a> {
    pub(crate) fn new(container: &'a Container) -> Self {
        Self {
            container,
            chain: Vec::new(),
            wiring: HashMap::new(),
            request: RequestContext::current(),
        }
    }

    /// Resolve a dependency by type.
    pub fn get<T: Send + Sync + 'static>(&mut self) -> Result<Arc<T>, Error> {
        self.get_token(&Token::of::<T>())
    }

    /// Resolve a dependency by token.
    pub fn get_token<T: Send + Sync + 'static>(&mut self, token: &Token) -> Result<Arc<T>, Error> {
        let instance = self.resolve_instance(token)?;
        instance.downcast::<T>().map_err(|_| {
            Error::Internal(format!(
                "provider {} is not a {}",
                token,
                type_name::<T>()
            ))
        })
    }

    /// The container being resolved from.
    pub fn container(&self) -> &Container {
        self.container
    }

    /// Tokens currently under construction, outermost first.
    pub fn chain(&self) -> &[Token] {
        &self.chain
    }

    /// The request scope captured when resolution started.
    pub fn request_scope(&self) -> Option<&RequestScope> {
        self.request.as_ref()
    }

    pub(crate) fn resolve_instance(&mut self, token: &Token) -> Result<Instance, Error> {
        let declaration = self.container.declaration(token).ok_or_else(|| {
            debug!(provider = token.name(), "Provider not found in container");
            Error::UnknownProvider(token.name().to_string())
        })?;
        let scope = declaration.options.scope;

        if let Some(instance) = self.wiring.get(token) {
            trace!(provider = token.name(), "Back-reference to instance being wired");
            return Ok(instance.clone());
        }

        let request = match scope {
            Scope::Singleton => {
                if let Some(instance) = self.container.cached_singleton(token) {
                    trace!(provider = token.name(), "Singleton cache hit");
                    return Ok(instance);
                }
                None
            }
            Scope::Request => {
                let request = self.request.clone().ok_or_else(|| {
                    Error::ScopeViolation(format!(
                        "cannot resolve request-scoped provider outside of a request context ({})",
                        token
                    ))
                })?;
                if let Some(instance) = request.instance(token) {
                    trace!(provider = token.name(), "Request scope cache hit");
                    return Ok(instance);
                }
                Some(request)
            }
            Scope::Transient => None,
        };

        self.enter(*token)?;
        let built = (declaration.factory)(self);
        self.chain.pop();
        let instance = built?;

        if let Some(inject) = &declaration.inject {
            self.wiring.insert(*token, instance.clone());
            let wired = inject(&instance, self);
            self.wiring.remove(token);
            wired?;
        }

        // A concurrent caller may have published first; its instance wins
        let instance = match (scope, request) {
            (Scope::Singleton, _) => self.container.cache_singleton(*token, instance),
            (Scope::Request, Some(request)) => request.insert_if_absent(*token, instance),
            _ => instance,
        };
        debug!(provider = token.name(), scope = %scope, "Provider resolved");

        Ok(instance)
    }

    /// Construct an undeclared injectable, tracking it on the chain.
    pub(crate) fn construct_with<T: Injectable>(&mut self, token: Token) -> Result<T, Error> {
        self.enter(token)?;
        let built = T::construct(self);
        self.chain.pop();
        built
    }

    fn enter(&mut self, token: Token) -> Result<(), Error> {
        if self.chain.contains(&token) {
            let chain: Vec<String> = self
                .chain
                .iter()
                .chain(std::iter::once(&token))
                .map(|t| t.name().to_string())
                .collect();
            debug!(chain = %chain.join(" -> "), "Circular dependency detected");
            return Err(Error::CircularDependency { chain });
        }
        self.chain.push(token);
        Ok(())
    }
}

/// A field-level dependency, assigned after construction.
///
/// ```
/// use trellis_core::{Container, Error, Inject, Injectable, Provider, ProviderOptions, Resolver};
///
/// struct Parent {
///     child: Inject<Child>,
/// }
///
/// struct Child {
///     parent: Inject<Parent>,
/// }
///
/// impl Provider for Parent {}
/// impl Provider for Child {}
///
/// impl Injectable for Parent {
///     fn construct(_: &mut Resolver<'_>) -> Result<Self, Error> {
///         Ok(Parent { child: Inject::new() })
///     }
///
///     fn inject(&self, resolver: &mut Resolver<'_>) -> Result<(), Error> {
///         self.child.resolve(resolver)
///     }
/// }
///
/// impl Injectable for Child {
///     fn construct(_: &mut Resolver<'_>) -> Result<Self, Error> {
///         Ok(Child { parent: Inject::new() })
///     }
///
///     fn inject(&self, resolver: &mut Resolver<'_>) -> Result<(), Error> {
///         self.parent.resolve(resolver)
///     }
/// }
///
/// let container = Container::new();
/// container.register::<Parent>(ProviderOptions::singleton());
/// container.register::<Child>(ProviderOptions::singleton());
///
/// let parent = container.resolve::<Parent>().unwrap();
/// let child = parent.child.get().unwrap();
/// assert!(std::sync::Arc::ptr_eq(child.parent.get().unwrap(), &parent));
/// ```
///
/// Mutual back-references between singletons form an `Arc` cycle that lives
/// as long as the process, matching the singleton lifetime.
pub struct Inject<T: ?Sized> {
    token: Token,
    slot: OnceLock<Arc<T>>,
}

impl<T: Send + Sync + 'static> Inject<T> {
    /// Field resolved by type.
    pub fn new() -> Self {
        Self::with_token(Token::of::<T>())
    }

    /// Field resolved by an explicit token.
    pub fn with_token(token: Token) -> Self {
        Self {
            token,
            slot: OnceLock::new(),
        }
    }

    /// Resolve and assign the field. Assigning twice keeps the first value.
    pub fn resolve(&self, resolver: &mut Resolver<'_>) -> Result<(), Error> {
        if self.slot.get().is_some() {
            return Ok(());
        }
        let value = resolver.get_token::<T>(&self.token)?;
        let _ = self.slot.set(value);
        Ok(())
    }

    /// The injected value, once assigned.
    pub fn get(&self) -> Option<&Arc<T>> {
        self.slot.get()
    }

    pub fn is_injected(&self) -> bool {
        self.slot.get().is_some()
    }
}

impl<T: Send + Sync + 'static> Default for Inject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> std::fmt::Debug for Inject<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inject")
            .field("token", &self.token)
            .field("injected", &self.slot.get().is_some())
            .finish()
    }
}
