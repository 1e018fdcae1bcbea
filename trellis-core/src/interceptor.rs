// Interceptors wrapping handler execution

use crate::context::ExecutionContext;
use crate::logging::{debug, trace};
use crate::pipeline::{ComponentCache, ComponentRef, InterceptorRef};
use crate::{Container, Error, HttpResponse, Injectable, Provider, Resolver, Token};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::any::type_name;
use std::sync::Arc;
use std::time::Instant;

/// Everything inside an interceptor: inner interceptors, then the handler.
pub struct CallHandler {
    inner: Box<dyn FnOnce() -> BoxFuture<'static, Result<HttpResponse, Error>> + Send>,
}

impl CallHandler {
    pub fn new<F>(inner: F) -> Self
    where
        F: FnOnce() -> BoxFuture<'static, Result<HttpResponse, Error>> + Send + 'static,
    {
        Self {
            inner: Box::new(inner),
        }
    }

    /// Run the inner layers and await their result.
    pub async fn handle(self) -> Result<HttpResponse, Error> {
        (self.inner)().await
    }
}

/// Interceptor trait for request/response transformation
///
/// An interceptor may act before calling `next.handle()`, after it resolves,
/// or instead of calling it. Errors raised by the inner layers arrive here
/// and may be turned into a successful response.
#[async_trait]
pub trait Interceptor: Send + Sync {
    async fn intercept(
        &self,
        context: &ExecutionContext,
        next: CallHandler,
    ) -> Result<HttpResponse, Error>;
}

impl ComponentRef<dyn Interceptor> {
    /// An interceptor built by the container on first use.
    pub fn of<I: Interceptor + Injectable>() -> Self {
        ComponentRef::resolved(Token::of::<I>(), resolve_interceptor::<I>)
    }

    /// An interceptor constructed up front.
    pub fn instance<I: Interceptor + 'static>(interceptor: I) -> Self {
        ComponentRef::prebuilt(type_name::<I>(), Arc::new(interceptor))
    }
}

fn resolve_interceptor<I: Interceptor + Injectable>(
    container: &Container,
) -> Result<Arc<dyn Interceptor>, Error> {
    let interceptor: Arc<dyn Interceptor> = container.instantiate::<I>()?;
    Ok(interceptor)
}

pub(crate) fn resolve_all(
    interceptors: &[InterceptorRef],
    cache: &ComponentCache<dyn Interceptor>,
    container: &Container,
) -> Result<Vec<Arc<dyn Interceptor>>, Error> {
    interceptors
        .iter()
        .map(|i| cache.get_or_resolve(i, container))
        .collect()
}

/// Wrap `handler` in `interceptors`, the first one outermost.
///
/// Built as a right fold so each layer only holds a continuation to the
/// next, with the handler innermost.
pub fn compose(
    interceptors: Vec<Arc<dyn Interceptor>>,
    context: ExecutionContext,
    handler: CallHandler,
) -> CallHandler {
    trace!(interceptor_count = interceptors.len(), "Composing interceptors");
    interceptors
        .into_iter()
        .rev()
        .fold(handler, |inner, interceptor| {
            let context = context.clone();
            CallHandler::new(move || {
                Box::pin(async move { interceptor.intercept(&context, inner).await })
            })
        })
}

/// Logs handler outcome and duration
pub struct LoggingInterceptor;

impl Provider for LoggingInterceptor {}

impl Injectable for LoggingInterceptor {
    fn construct(_: &mut Resolver<'_>) -> Result<Self, Error> {
        Ok(LoggingInterceptor)
    }
}

#[async_trait]
impl Interceptor for LoggingInterceptor {
    async fn intercept(
        &self,
        context: &ExecutionContext,
        next: CallHandler,
    ) -> Result<HttpResponse, Error> {
        let start = Instant::now();
        let result = next.handle().await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match &result {
            Ok(response) => debug!(
                request_id = %context.request_id(),
                controller = context.controller_name(),
                handler = context.handler_name(),
                status = response.status,
                duration_ms,
                "Handler completed"
            ),
            Err(e) => debug!(
                request_id = %context.request_id(),
                controller = context.controller_name(),
                handler = context.handler_name(),
                error = %e,
                duration_ms,
                "Handler failed"
            ),
        }
        result
    }
}

/// Transform interceptor for modifying responses
pub struct TransformInterceptor<F>
where
    F: Fn(HttpResponse) -> HttpResponse + Send + Sync,
{
    transform: F,
}

impl<F> TransformInterceptor<F>
where
    F: Fn(HttpResponse) -> HttpResponse + Send + Sync,
{
    pub fn new(transform: F) -> Self {
        Self { transform }
    }
}

#[async_trait]
impl<F> Interceptor for TransformInterceptor<F>
where
    F: Fn(HttpResponse) -> HttpResponse + Send + Sync,
{
    async fn intercept(
        &self,
        _context: &ExecutionContext,
        next: CallHandler,
    ) -> Result<HttpResponse, Error> {
        let response = next.handle().await?;
        Ok((self.transform)(response))
    }
}

/// Turns errors from inner layers into responses built by `recover`
pub struct RecoverInterceptor<F>
where
    F: Fn(&Error) -> Option<HttpResponse> + Send + Sync,
{
    recover: F,
}

impl<F> RecoverInterceptor<F>
where
    F: Fn(&Error) -> Option<HttpResponse> + Send + Sync,
{
    pub fn new(recover: F) -> Self {
        Self { recover }
    }
}

#[async_trait]
impl<F> Interceptor for RecoverInterceptor<F>
where
    F: Fn(&Error) -> Option<HttpResponse> + Send + Sync,
{
    async fn intercept(
        &self,
        _context: &ExecutionContext,
        next: CallHandler,
    ) -> Result<HttpResponse, Error> {
        match next.handle().await {
            Ok(response) => Ok(response),
            Err(e) => (self.recover)(&e).ok_or(e),
        }
    }
}
