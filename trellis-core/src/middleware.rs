// Middleware system for request/response processing

use crate::logging::{debug, info, trace};
use crate::pipeline::{ComponentCache, ComponentRef, MiddlewareRef};
use crate::request_scope::RequestContext;
use crate::{Container, Error, HttpRequest, HttpResponse, Injectable, Provider, Resolver, Token};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::any::type_name;
use std::sync::Arc;
use std::time::Instant;

/// The rest of the pipeline after a middleware.
///
/// A middleware advances by calling `next(req).await`. Returning without
/// calling it ends the request with the middleware's own response.
pub type Next = Box<dyn FnOnce(HttpRequest) -> BoxFuture<'static, Result<HttpResponse, Error>> + Send>;

/// Middleware trait for processing requests before they reach the handler
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Process the request and optionally pass to next middleware
    async fn handle(&self, req: HttpRequest, next: Next) -> Result<HttpResponse, Error>;
}

impl ComponentRef<dyn Middleware> {
    /// Middleware built by the container on first use.
    pub fn of<M: Middleware + Injectable>() -> Self {
        ComponentRef::resolved(Token::of::<M>(), resolve_middleware::<M>)
    }

    /// Middleware constructed up front.
    pub fn instance<M: Middleware + 'static>(middleware: M) -> Self {
        ComponentRef::prebuilt(type_name::<M>(), Arc::new(middleware))
    }
}

fn resolve_middleware<M: Middleware + Injectable>(
    container: &Container,
) -> Result<Arc<dyn Middleware>, Error> {
    let middleware: Arc<dyn Middleware> = container.instantiate::<M>()?;
    Ok(middleware)
}

/// Resolve every middleware of a route, in declared order.
pub(crate) fn resolve_chain(
    middleware: &[MiddlewareRef],
    cache: &ComponentCache<dyn Middleware>,
    container: &Container,
) -> Result<MiddlewareChain, Error> {
    let resolved = middleware
        .iter()
        .map(|m| cache.get_or_resolve(m, container))
        .collect::<Result<Vec<_>, Error>>()?;
    Ok(MiddlewareChain::new(resolved))
}

/// Middleware chain executor
#[derive(Clone)]
pub struct MiddlewareChain {
    middlewares: Arc<Vec<Arc<dyn Middleware>>>,
}

impl MiddlewareChain {
    pub fn new(middlewares: Vec<Arc<dyn Middleware>>) -> Self {
        Self {
            middlewares: Arc::new(middlewares),
        }
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Execute the middleware chain, ending in `endpoint`
    pub async fn apply(&self, req: HttpRequest, endpoint: Next) -> Result<HttpResponse, Error> {
        debug!(
            middleware_count = self.middlewares.len(),
            path = %req.path,
            method = %req.method,
            "Executing middleware chain"
        );
        self.execute_from(0, req, endpoint).await
    }

    fn execute_from(
        &self,
        index: usize,
        req: HttpRequest,
        endpoint: Next,
    ) -> BoxFuture<'static, Result<HttpResponse, Error>> {
        if index >= self.middlewares.len() {
            trace!("Middleware chain complete, calling endpoint");
            endpoint(req)
        } else {
            let middleware = self.middlewares[index].clone();
            let chain = self.clone();

            trace!(middleware_index = index, "Executing middleware");
            Box::pin(async move {
                middleware
                    .handle(
                        req,
                        Box::new(move |req| chain.execute_from(index + 1, req, endpoint)),
                    )
                    .await
            })
        }
    }
}

// ========== Built-in Middleware ==========

/// Logs method, path, status and duration of every request
pub struct LoggerMiddleware;

impl Provider for LoggerMiddleware {}

impl Injectable for LoggerMiddleware {
    fn construct(_: &mut Resolver<'_>) -> Result<Self, Error> {
        Ok(LoggerMiddleware)
    }
}

#[async_trait]
impl Middleware for LoggerMiddleware {
    async fn handle(&self, req: HttpRequest, next: Next) -> Result<HttpResponse, Error> {
        let start = Instant::now();
        let method = req.method.clone();
        let path = req.path.clone();

        let result = next(req).await;
        let duration_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(response) => info!(
                method = %method,
                path = %path,
                status = response.status,
                duration_ms,
                "Request completed"
            ),
            Err(e) => info!(
                method = %method,
                path = %path,
                status = e.status_code(),
                duration_ms,
                error = %e,
                "Request failed"
            ),
        }
        result
    }
}

/// Echoes an `x-request-id` header, taking the request scope id when the
/// client did not send one.
pub struct RequestIdMiddleware;

impl Provider for RequestIdMiddleware {}

impl Injectable for RequestIdMiddleware {
    fn construct(_: &mut Resolver<'_>) -> Result<Self, Error> {
        Ok(RequestIdMiddleware)
    }
}

#[async_trait]
impl Middleware for RequestIdMiddleware {
    async fn handle(&self, mut req: HttpRequest, next: Next) -> Result<HttpResponse, Error> {
        let request_id = req
            .header("x-request-id")
            .cloned()
            .or_else(|| RequestContext::current().map(|scope| scope.id().to_string()))
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        req.headers
            .insert("x-request-id".to_string(), request_id.clone());

        let mut response = next(req).await?;
        response
            .headers
            .insert("x-request-id".to_string(), request_id);

        Ok(response)
    }
}

/// Rejects bodies larger than `max_size` bytes with 413
pub struct BodySizeLimitMiddleware {
    max_size: usize,
}

impl BodySizeLimitMiddleware {
    pub fn new(max_size: usize) -> Self {
        Self { max_size }
    }
}

#[async_trait]
impl Middleware for BodySizeLimitMiddleware {
    async fn handle(&self, req: HttpRequest, next: Next) -> Result<HttpResponse, Error> {
        if req.body.len() > self.max_size {
            return Err(Error::status(
                413,
                format!("Request body exceeds maximum size of {} bytes", self.max_size),
            ));
        }

        next(req).await
    }
}
