// Guards for route protection

use crate::context::ExecutionContext;
use crate::logging::{debug, trace};
use crate::pipeline::{ComponentCache, ComponentRef, GuardRef};
use crate::{Container, Error, Injectable, Provider, Resolver};
use async_trait::async_trait;
use std::any::type_name;
use std::sync::Arc;

/// Guard trait for protecting routes
///
/// Returning `Ok(false)` denies the request with a Forbidden outcome. An
/// error that is already access-denied (`Forbidden`, `Unauthorized`) is kept
/// as is; any other error is reported as Forbidden.
#[async_trait]
pub trait Guard: Send + Sync {
    /// Determine if the request can proceed
    async fn can_activate(&self, context: &ExecutionContext) -> Result<bool, Error>;
}

impl ComponentRef<dyn Guard> {
    /// A guard built by the container on first use.
    pub fn of<G: Guard + Injectable>() -> Self {
        ComponentRef::resolved(crate::Token::of::<G>(), resolve_guard::<G>)
    }

    /// A guard constructed up front.
    pub fn instance<G: Guard + 'static>(guard: G) -> Self {
        ComponentRef::prebuilt(type_name::<G>(), Arc::new(guard))
    }

    /// A guard from a synchronous predicate.
    pub fn from_fn<F>(name: &'static str, predicate: F) -> Self
    where
        F: Fn(&ExecutionContext) -> Result<bool, Error> + Send + Sync + 'static,
    {
        ComponentRef::prebuilt(name, Arc::new(CustomGuard::new(predicate)))
    }
}

fn resolve_guard<G: Guard + Injectable>(container: &Container) -> Result<Arc<dyn Guard>, Error> {
    let guard: Arc<dyn Guard> = container.instantiate::<G>()?;
    Ok(guard)
}

/// Evaluate guards in order; the first rejection ends evaluation.
pub(crate) async fn run_guards(
    guards: &[GuardRef],
    cache: &ComponentCache<dyn Guard>,
    container: &Container,
    context: &ExecutionContext,
) -> Result<(), Error> {
    for guard_ref in guards {
        let guard = cache.get_or_resolve(guard_ref, container)?;
        trace!(guard = guard_ref.name(), "Evaluating guard");

        match guard.can_activate(context).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(
                    guard = guard_ref.name(),
                    handler = context.handler_name(),
                    "Guard denied request"
                );
                return Err(Error::Forbidden(format!(
                    "access denied by {}",
                    guard_ref.name()
                )));
            }
            Err(e) if e.is_denied() => {
                debug!(guard = guard_ref.name(), error = %e, "Guard rejected request");
                return Err(e);
            }
            Err(e) => {
                debug!(guard = guard_ref.name(), error = %e, "Guard failed");
                return Err(Error::Forbidden(e.to_string()));
            }
        }
    }
    Ok(())
}

/// Authentication guard - requires a bearer token to be present.
///
/// Token verification is out of scope; pair with an application guard that
/// checks the credential.
pub struct AuthenticationGuard;

impl Provider for AuthenticationGuard {}

impl Injectable for AuthenticationGuard {
    fn construct(_: &mut Resolver<'_>) -> Result<Self, Error> {
        Ok(AuthenticationGuard)
    }
}

#[async_trait]
impl Guard for AuthenticationGuard {
    async fn can_activate(&self, context: &ExecutionContext) -> Result<bool, Error> {
        match context.get_header("authorization") {
            Some(header) if header.starts_with("Bearer ") => Ok(true),
            _ => Err(Error::Unauthorized(
                "Missing or invalid authorization header".to_string(),
            )),
        }
    }
}

/// Custom guard from a predicate
pub struct CustomGuard<F>
where
    F: Fn(&ExecutionContext) -> Result<bool, Error> + Send + Sync,
{
    predicate: F,
}

impl<F> CustomGuard<F>
where
    F: Fn(&ExecutionContext) -> Result<bool, Error> + Send + Sync,
{
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

#[async_trait]
impl<F> Guard for CustomGuard<F>
where
    F: Fn(&ExecutionContext) -> Result<bool, Error> + Send + Sync,
{
    async fn can_activate(&self, context: &ExecutionContext) -> Result<bool, Error> {
        (self.predicate)(context)
    }
}

/// API key guard
pub struct ApiKeyGuard {
    valid_keys: Vec<String>,
}

impl ApiKeyGuard {
    pub fn new(keys: Vec<String>) -> Self {
        Self { valid_keys: keys }
    }
}

#[async_trait]
impl Guard for ApiKeyGuard {
    async fn can_activate(&self, context: &ExecutionContext) -> Result<bool, Error> {
        let api_key = context
            .get_header("x-api-key")
            .ok_or_else(|| Error::Unauthorized("Missing API key".to_string()))?;

        Ok(self.valid_keys.contains(api_key))
    }
}
