use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use trellis_core::{
    Application, CallHandler, Container, ControllerBuilder, Error, ExecutionContext, Guard,
    GuardRef, HandlerArgs, HttpRequest, HttpResponse, Injectable, Integer, Interceptor,
    InterceptorRef, Middleware, MiddlewareRef, Next, Outcome, ParamBinding, Provider, Registry,
    RequestContext, Resolver, RouteDef, Scope, Token,
};

/// Shared execution trace, bound as a value in the container
#[derive(Default)]
struct Trace(Mutex<Vec<String>>);

impl Trace {
    fn push(&self, entry: &str) {
        self.0.lock().push(entry.to_string());
    }

    fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

macro_rules! traced_guard {
    ($name:ident, $allow:expr) => {
        struct $name {
            trace: Arc<Trace>,
        }

        impl Provider for $name {}

        impl Injectable for $name {
            fn construct(resolver: &mut Resolver<'_>) -> Result<Self, Error> {
                Ok($name {
                    trace: resolver.get()?,
                })
            }
        }

        #[async_trait]
        impl Guard for $name {
            async fn can_activate(&self, _context: &ExecutionContext) -> Result<bool, Error> {
                self.trace.push(stringify!($name));
                Ok($allow)
            }
        }
    };
}

traced_guard!(G1, true);
traced_guard!(G2, false);
traced_guard!(G3, true);

macro_rules! traced_middleware {
    ($name:ident) => {
        struct $name {
            trace: Arc<Trace>,
        }

        impl Provider for $name {}

        impl Injectable for $name {
            fn construct(resolver: &mut Resolver<'_>) -> Result<Self, Error> {
                Ok($name {
                    trace: resolver.get()?,
                })
            }
        }

        #[async_trait]
        impl Middleware for $name {
            async fn handle(&self, req: HttpRequest, next: Next) -> Result<HttpResponse, Error> {
                self.trace.push(stringify!($name));
                next(req).await
            }
        }
    };
}

traced_middleware!(M1);
traced_middleware!(M2);

struct I1 {
    trace: Arc<Trace>,
}

impl Provider for I1 {}

impl Injectable for I1 {
    fn construct(resolver: &mut Resolver<'_>) -> Result<Self, Error> {
        Ok(I1 {
            trace: resolver.get()?,
        })
    }
}

#[async_trait]
impl Interceptor for I1 {
    async fn intercept(
        &self,
        _context: &ExecutionContext,
        next: CallHandler,
    ) -> Result<HttpResponse, Error> {
        self.trace.push("I1-before");
        let result = next.handle().await;
        self.trace.push("I1-after");
        result
    }
}

struct Controller {
    trace: Arc<Trace>,
}

impl Provider for Controller {}

impl Injectable for Controller {
    fn construct(resolver: &mut Resolver<'_>) -> Result<Self, Error> {
        Ok(Controller {
            trace: resolver.get()?,
        })
    }
}

async fn traced_handler(controller: Arc<Controller>, _args: HandlerArgs) -> Result<HttpResponse, Error> {
    controller.trace.push("H");
    HttpResponse::json(&serde_json::json!({"message": "success"}))
}

async fn app_with(registry: &Registry) -> (Application, Arc<Trace>) {
    let container = Container::new();
    container.register_instance(Trace::default());
    let trace = container.resolve::<Trace>().unwrap();
    let app = Application::with_container(registry, container).await.unwrap();
    (app, trace)
}

#[tokio::test]
async fn test_guard_short_circuit() {
    let registry = Registry::new();
    registry.register_controller(
        ControllerBuilder::<Controller>::new("/guarded").route(
            RouteDef::get("/", "guarded", traced_handler)
                .guard(GuardRef::of::<G1>())
                .guard(GuardRef::of::<G2>())
                .guard(GuardRef::of::<G3>()),
        ),
    );
    let (app, trace) = app_with(&registry).await;

    let res = app.handle(HttpRequest::get("/guarded")).await;
    assert_eq!(res.outcome(), Outcome::Denied);
    assert_eq!(res.status, 403);
    assert_eq!(trace.entries(), vec!["G1", "G2"]);

    // G3 was never needed, so never built
    assert_eq!(app.router().guard_cache_size(), 2);
}

#[tokio::test]
async fn test_pipeline_order() {
    let registry = Registry::new();
    registry.register_controller(
        ControllerBuilder::<Controller>::new("/ordered")
            .middleware(MiddlewareRef::of::<M1>())
            .interceptor(InterceptorRef::of::<I1>())
            .route(RouteDef::get("/", "ordered", traced_handler).middleware(MiddlewareRef::of::<M2>())),
    );
    let (app, trace) = app_with(&registry).await;

    let res = app.handle(HttpRequest::get("/ordered")).await;
    assert_eq!(res.outcome(), Outcome::Success);
    assert_eq!(trace.entries(), vec!["M1", "M2", "I1-before", "H", "I1-after"]);
}

static COUNTED_BUILDS: AtomicUsize = AtomicUsize::new(0);

struct CountedGuard;

impl Provider for CountedGuard {}

impl Injectable for CountedGuard {
    fn construct(_: &mut Resolver<'_>) -> Result<Self, Error> {
        COUNTED_BUILDS.fetch_add(1, Ordering::SeqCst);
        Ok(CountedGuard)
    }
}

#[async_trait]
impl Guard for CountedGuard {
    async fn can_activate(&self, _context: &ExecutionContext) -> Result<bool, Error> {
        Ok(true)
    }
}

#[tokio::test]
async fn test_guard_cache_is_shared_across_routes() {
    let registry = Registry::new();
    registry.register_controller(
        ControllerBuilder::<Controller>::new("/cached")
            .route(RouteDef::get("/a", "a", traced_handler).guard(GuardRef::of::<CountedGuard>()))
            .route(RouteDef::get("/b", "b", traced_handler).guard(GuardRef::of::<CountedGuard>())),
    );
    let (app, _trace) = app_with(&registry).await;

    assert_eq!(app.handle(HttpRequest::get("/cached/a")).await.status, 200);
    assert_eq!(app.handle(HttpRequest::get("/cached/b")).await.status, 200);
    assert_eq!(COUNTED_BUILDS.load(Ordering::SeqCst), 1);
    assert_eq!(app.router().guard_cache_size(), 1);

    app.router().clear_guard_cache();
    assert_eq!(app.router().guard_cache_size(), 0);

    assert_eq!(app.handle(HttpRequest::get("/cached/a")).await.status, 200);
    assert_eq!(COUNTED_BUILDS.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_clear_middleware_and_interceptor_caches() {
    let registry = Registry::new();
    registry.register_controller(
        ControllerBuilder::<Controller>::new("/")
            .middleware(MiddlewareRef::of::<M1>())
            .interceptor(InterceptorRef::of::<I1>())
            .route(RouteDef::get("/", "root", traced_handler)),
    );
    let (app, _trace) = app_with(&registry).await;

    app.handle(HttpRequest::get("/")).await;
    assert_eq!(app.router().middleware_cache_size(), 1);
    assert_eq!(app.router().interceptor_cache_size(), 1);

    app.router().clear_middleware_cache();
    app.router().clear_interceptor_cache();
    assert_eq!(app.router().middleware_cache_size(), 0);
    assert_eq!(app.router().interceptor_cache_size(), 0);
}

struct Rescue;

impl Provider for Rescue {}

impl Injectable for Rescue {
    fn construct(_: &mut Resolver<'_>) -> Result<Self, Error> {
        Ok(Rescue)
    }
}

#[async_trait]
impl Interceptor for Rescue {
    async fn intercept(
        &self,
        _context: &ExecutionContext,
        next: CallHandler,
    ) -> Result<HttpResponse, Error> {
        match next.handle().await {
            Err(Error::Internal(msg)) => {
                HttpResponse::json(&serde_json::json!({"recovered": msg}))
            }
            other => other,
        }
    }
}

async fn failing_handler(_c: Arc<Controller>, _args: HandlerArgs) -> Result<HttpResponse, Error> {
    Err(Error::Internal("database unavailable".to_string()))
}

#[tokio::test]
async fn test_handler_errors_propagate_through_interceptors() {
    let registry = Registry::new();
    registry.register_controller(
        ControllerBuilder::<Controller>::new("/errors")
            .route(RouteDef::get("/caught", "caught", failing_handler).interceptor(InterceptorRef::of::<Rescue>()))
            .route(RouteDef::get("/uncaught", "uncaught", failing_handler)),
    );
    let (app, _trace) = app_with(&registry).await;

    let caught = app.handle(HttpRequest::get("/errors/caught")).await;
    assert_eq!(caught.status, 200);
    let body: serde_json::Value = caught.json_body().unwrap();
    assert_eq!(body["recovered"], "database unavailable");

    let uncaught = app.handle(HttpRequest::get("/errors/uncaught")).await;
    assert_eq!(uncaught.outcome(), Outcome::ServerError);
    assert_eq!(uncaught.status, 500);
}

#[tokio::test]
async fn test_error_declaring_status_is_kept() {
    let registry = Registry::new();
    registry.register_controller(ControllerBuilder::<Controller>::new("/teapot").route(
        RouteDef::get("/", "teapot", |_c: Arc<Controller>, _args| async {
            Err(Error::status(418, "short and stout"))
        }),
    ));
    let (app, _trace) = app_with(&registry).await;

    let res = app.handle(HttpRequest::get("/teapot")).await;
    assert_eq!(res.status, 418);
    assert_eq!(res.outcome(), Outcome::ClientError);
}

#[tokio::test]
async fn test_unmatched_route_is_not_found() {
    let registry = Registry::new();
    registry.register_controller(
        ControllerBuilder::<Controller>::new("/users").route(RouteDef::get("/", "list", traced_handler)),
    );
    let (app, trace) = app_with(&registry).await;

    let res = app.handle(HttpRequest::post("/users")).await;
    assert_eq!(res.outcome(), Outcome::NotFound);
    assert!(trace.entries().is_empty());
}

#[tokio::test]
async fn test_param_binding_and_validation() {
    let registry = Registry::new();
    registry.register_controller(
        ControllerBuilder::<Controller>::new("/items").route(
            RouteDef::get("/:id", "show", |_c: Arc<Controller>, args: HandlerArgs| async move {
                let id: i64 = args.param(0)?;
                let verbose: Option<String> = args.param(1)?;
                HttpResponse::json(&serde_json::json!({"id": id, "verbose": verbose}))
            })
            .param(ParamBinding::path("id").with_schema(Integer))
            .param(ParamBinding::query("verbose")),
        ),
    );
    let (app, _trace) = app_with(&registry).await;

    let ok = app.handle(HttpRequest::get("/items/42?verbose=yes")).await;
    assert_eq!(ok.status, 200);
    let body: serde_json::Value = ok.json_body().unwrap();
    assert_eq!(body["id"], 42);
    assert_eq!(body["verbose"], "yes");

    let spaced = app.handle(HttpRequest::get("/items/7?verbose=very%20much+so")).await;
    let body: serde_json::Value = spaced.json_body().unwrap();
    assert_eq!(body["verbose"], "very much so");

    let invalid = app.handle(HttpRequest::get("/items/forty-two")).await;
    assert_eq!(invalid.status, 400);
    assert_eq!(invalid.outcome(), Outcome::ClientError);
}

#[tokio::test]
async fn test_middleware_can_answer_directly() {
    struct Maintenance;

    #[async_trait]
    impl Middleware for Maintenance {
        async fn handle(&self, _req: HttpRequest, _next: Next) -> Result<HttpResponse, Error> {
            Ok(HttpResponse::redirect("/status"))
        }
    }

    let registry = Registry::new();
    registry.register_controller(
        ControllerBuilder::<Controller>::new("/down")
            .middleware(MiddlewareRef::instance(Maintenance))
            .route(RouteDef::get("/", "down", traced_handler)),
    );
    let (app, trace) = app_with(&registry).await;

    let res = app.handle(HttpRequest::get("/down")).await;
    assert_eq!(res.status, 302);
    assert_eq!(res.headers["Location"], "/status");
    assert!(trace.entries().is_empty());
}

#[tokio::test]
async fn test_request_scoped_controller_and_context() {
    struct PerRequest {
        request_id: String,
    }

    impl Provider for PerRequest {}

    impl Injectable for PerRequest {
        fn construct(_: &mut Resolver<'_>) -> Result<Self, Error> {
            let scope = RequestContext::current()
                .ok_or_else(|| Error::Internal("no request scope".to_string()))?;
            Ok(PerRequest {
                request_id: scope.id().to_string(),
            })
        }
    }

    let registry = Registry::new();
    registry.register_controller(
        ControllerBuilder::<PerRequest>::new("/me")
            .scope(Scope::Request)
            .guard(GuardRef::from_fn("tag-response", |ctx| {
                ctx.response().set_header("X-Request-Id", ctx.request_id().to_string());
                Ok(true)
            }))
            .route(RouteDef::get("/", "me", |c: Arc<PerRequest>, _args| async move {
                HttpResponse::json(&serde_json::json!({"request_id": c.request_id}))
            })),
    );
    let (app, _trace) = app_with(&registry).await;

    let first = app.handle(HttpRequest::get("/me")).await;
    let second = app.handle(HttpRequest::get("/me")).await;
    let first_id: serde_json::Value = first.json_body().unwrap();
    let second_id: serde_json::Value = second.json_body().unwrap();

    assert_ne!(first_id["request_id"], second_id["request_id"]);
    assert_eq!(first.headers["X-Request-Id"], first_id["request_id"].as_str().unwrap());
    assert!(!app.container().is_instantiated(&Token::of::<PerRequest>()));
}
