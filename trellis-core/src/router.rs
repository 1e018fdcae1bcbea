// Routing and per-request pipeline execution

use crate::context::ExecutionContext;
use crate::guard::run_guards;
use crate::interceptor::{self, CallHandler};
use crate::logging::{debug, request_span, trace};
use crate::middleware::{self, Next};
use crate::params::{self, ParamBinding};
use crate::pipeline::{ComponentCaches, PipelineDescriptor};
use crate::registry::{Registry, RouteHandler};
use crate::request_scope::RequestContext;
use crate::{Container, Error, HttpMethod, HttpRequest, HttpResponse, Token};
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

/// A routable endpoint with its layered pipeline
#[derive(Clone)]
pub struct Route {
    pub method: HttpMethod,
    /// Pattern as declared, e.g. `/users/:id`
    pub path: String,
    pub controller: Token,
    pub handler_name: &'static str,
    pub pipeline: PipelineDescriptor,
    pub params: Vec<ParamBinding>,
    pub(crate) handler: RouteHandler,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("controller", &self.controller)
            .field("handler_name", &self.handler_name)
            .finish()
    }
}

/// Router for matching requests and running their pipeline
pub struct Router {
    container: Container,
    routes: Vec<Arc<Route>>,
    matchers: HashMap<HttpMethod, matchit::Router<usize>>,
    caches: ComponentCaches,
}

impl Router {
    pub fn new(container: Container) -> Self {
        Self {
            container,
            routes: Vec::new(),
            matchers: HashMap::new(),
            caches: ComponentCaches::new(),
        }
    }

    /// Build routes for every controller in `registry`.
    ///
    /// Each route's pipeline is the controller's components followed by the
    /// route's own.
    pub fn from_registry(registry: &Registry, container: Container) -> Result<Self, Error> {
        let mut router = Self::new(container);

        for controller in registry.controllers() {
            let token = controller.token();
            let class = PipelineDescriptor {
                guards: registry.guards_of(&token, None),
                middleware: registry.middleware_of(&token, None),
                interceptors: registry.interceptors_of(&token, None),
            };

            for definition in registry.routes_of(&token) {
                router.add_route(Route {
                    method: definition.method,
                    path: definition.path,
                    controller: token,
                    handler_name: definition.handler_name,
                    pipeline: PipelineDescriptor::layered(&class, &definition.pipeline),
                    params: definition.params,
                    handler: definition.handler,
                })?;
            }
        }

        debug!(routes = router.routes.len(), "Router built from registry");
        Ok(router)
    }

    /// Add a route to the router
    pub fn add_route(&mut self, route: Route) -> Result<(), Error> {
        let pattern = to_matchit_pattern(&route.path);
        let index = self.routes.len();

        self.matchers
            .entry(route.method)
            .or_insert_with(matchit::Router::new)
            .insert(pattern, index)
            .map_err(|e| {
                Error::Internal(format!(
                    "cannot register {} {}: {}",
                    route.method, route.path, e
                ))
            })?;

        trace!(
            method = %route.method,
            path = %route.path,
            controller = route.controller.name(),
            handler = route.handler_name,
            "Route registered"
        );
        self.routes.push(Arc::new(route));
        Ok(())
    }

    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    /// Find the route for `request`, filling its path and query parameters.
    pub fn match_route(&self, request: &mut HttpRequest) -> Result<Arc<Route>, Error> {
        let (path, query) = match request.path.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (request.path.clone(), None),
        };
        if let Some(query) = query {
            request.query_params = parse_query_string(&query);
        }
        request.path = normalize_path(&path);

        let not_found = || Error::RouteNotFound(format!("{} {}", request.method, request.path));
        let method = request
            .method
            .parse::<HttpMethod>()
            .map_err(|_| not_found())?;
        let matcher = self.matchers.get(&method).ok_or_else(not_found)?;
        let matched = matcher.at(&request.path).map_err(|_| not_found())?;

        let route = self.routes[*matched.value].clone();
        let params: HashMap<String, String> = matched
            .params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        request.path_params = params;
        Ok(route)
    }

    /// Run the full pipeline for `request` inside a fresh request scope.
    ///
    /// Errors are returned as-is; [`Router::handle`] translates them.
    pub async fn dispatch(&self, mut request: HttpRequest) -> Result<HttpResponse, Error> {
        let route = match self.match_route(&mut request) {
            Ok(route) => route,
            Err(e) => {
                debug!(method = %request.method, path = %request.path, "No route matched");
                return Err(e);
            }
        };
        RequestContext::run_async(self.execute(route, request)).await
    }

    /// Run the pipeline and translate uncaught errors into responses.
    pub async fn handle(&self, request: HttpRequest) -> HttpResponse {
        match self.dispatch(request).await {
            Ok(response) => response,
            Err(e) => {
                if e.is_server_error() {
                    crate::logging::error!(error = %e, "Request failed");
                }
                HttpResponse::from_error(&e)
            }
        }
    }

    async fn execute(&self, route: Arc<Route>, request: HttpRequest) -> Result<HttpResponse, Error> {
        let request_id = RequestContext::current()
            .map(|scope| scope.id())
            .unwrap_or_else(Uuid::new_v4);
        let span = request_span(&request_id, &request.method, &request.path);

        self.run_pipeline(request_id, route, request)
            .instrument(span)
            .await
    }

    async fn run_pipeline(
        &self,
        request_id: Uuid,
        route: Arc<Route>,
        request: HttpRequest,
    ) -> Result<HttpResponse, Error> {
        debug!(
            controller = route.controller.name(),
            handler = route.handler_name,
            "Dispatching request"
        );

        let controller = self.container.resolve_instance(&route.controller)?;
        let context = ExecutionContext::new(
            request_id,
            route.controller,
            route.handler_name,
            route.path.clone(),
            request.clone(),
        );

        run_guards(&route.pipeline.guards, &self.caches.guards, &self.container, &context).await?;

        let chain = middleware::resolve_chain(
            &route.pipeline.middleware,
            &self.caches.middleware,
            &self.container,
        )?;
        let interceptors = interceptor::resolve_all(
            &route.pipeline.interceptors,
            &self.caches.interceptors,
            &self.container,
        )?;

        let outer = context.clone();
        let endpoint: Next = Box::new(move |req: HttpRequest| -> BoxFuture<'static, Result<HttpResponse, Error>> {
            let context = outer.with_request(req);
            let inner = context.clone();
            let handler = CallHandler::new(move || {
                Box::pin(async move {
                    let args = params::bind(&route.params, inner)?;
                    trace!(handler = route.handler_name, "Invoking handler");
                    (route.handler)(controller, args).await
                })
            });
            Box::pin(interceptor::compose(interceptors, context, handler).handle())
        });

        let mut response = chain.apply(request, endpoint).await?;
        context.response().apply(&mut response);
        Ok(response)
    }

    // ========== Component caches ==========

    pub fn clear_guard_cache(&self) {
        self.caches.guards.clear();
    }

    pub fn clear_middleware_cache(&self) {
        self.caches.middleware.clear();
    }

    pub fn clear_interceptor_cache(&self) {
        self.caches.interceptors.clear();
    }

    pub fn clear_caches(&self) {
        self.clear_guard_cache();
        self.clear_middleware_cache();
        self.clear_interceptor_cache();
    }

    pub fn guard_cache_size(&self) -> usize {
        self.caches.guards.len()
    }

    pub fn middleware_cache_size(&self) -> usize {
        self.caches.middleware.len()
    }

    pub fn interceptor_cache_size(&self) -> usize {
        self.caches.interceptors.len()
    }
}

/// Rewrite `:name` and `*name` segments into matchit's `{name}` syntax.
fn to_matchit_pattern(path: &str) -> String {
    let normalized = normalize_path(path);
    let segments: Vec<String> = normalized
        .split('/')
        .map(|segment| {
            if let Some(name) = segment.strip_prefix(':') {
                format!("{{{}}}", name)
            } else if let Some(name) = segment.strip_prefix('*') {
                format!("{{*{}}}", name)
            } else {
                segment.to_string()
            }
        })
        .collect();
    segments.join("/")
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// Parse and percent-decode a query string. Later duplicates win.
pub(crate) fn parse_query_string(query: &str) -> HashMap<String, String> {
    match serde_urlencoded::from_str::<Vec<(String, String)>>(query) {
        Ok(pairs) => pairs.into_iter().collect(),
        Err(e) => {
            debug!(error = %e, "Ignoring malformed query string");
            HashMap::new()
        }
    }
}
