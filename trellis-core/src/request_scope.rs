//! Per-request ambient state.
//!
//! Request-scoped providers live in a [`RequestScope`]: a token-keyed map
//! created fresh by [`RequestContext::run`] or [`RequestContext::run_async`]
//! and reachable only from the call chain those functions drive.
//!
//! The scope is stored in a tokio task-local, so it follows the future across
//! every `.await` (and across worker threads when the scheduler migrates the
//! task) while two concurrently running requests each see only their own
//! map. Work handed to `tokio::spawn` starts outside the scope; wrap it in
//! [`RequestScope::enter`] to carry the scope along explicitly.
//!
//! ```
//! use trellis_core::{RequestContext, Token};
//!
//! const USER: Token = Token::named("USER");
//!
//! RequestContext::run(|| {
//!     RequestContext::set(USER, String::from("ada")).unwrap();
//!     assert_eq!(*RequestContext::get::<String>(&USER).unwrap(), "ada");
//! });
//!
//! assert!(RequestContext::get::<String>(&USER).is_none());
//! ```

use crate::logging::trace;
use crate::{Error, Token};
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

/// A type-erased instance as stored by the container and request scopes.
pub(crate) type Instance = Arc<dyn Any + Send + Sync>;

tokio::task_local! {
    static REQUEST_SCOPE: RequestScope;
}

/// Handle to one request's entry map.
#[derive(Clone)]
pub struct RequestScope {
    id: Uuid,
    entries: Arc<RwLock<HashMap<Token, Instance>>>,
}

impl RequestScope {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Unique id of this request scope.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Number of instances currently held by the scope.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Run `fut` with this scope as the ambient request scope.
    pub async fn enter<F: Future>(self, fut: F) -> F::Output {
        REQUEST_SCOPE.scope(self, fut).await
    }

    pub(crate) fn instance(&self, token: &Token) -> Option<Instance> {
        self.entries.read().get(token).cloned()
    }

    /// Insert unless another instance was stored first; returns the stored
    /// instance.
    pub(crate) fn insert_if_absent(&self, token: Token, instance: Instance) -> Instance {
        self.entries.write().entry(token).or_insert(instance).clone()
    }

    pub(crate) fn insert(&self, token: Token, instance: Instance) {
        self.entries.write().insert(token, instance);
    }
}

/// Entry points for establishing and probing the ambient request scope.
pub struct RequestContext;

impl RequestContext {
    /// Run `f` synchronously inside a fresh, empty request scope.
    pub fn run<R>(f: impl FnOnce() -> R) -> R {
        let scope = RequestScope::new();
        trace!(request_scope = %scope.id, "Entering request scope");
        REQUEST_SCOPE.sync_scope(scope, f)
    }

    /// Drive `fut` to completion inside a fresh, empty request scope.
    ///
    /// ```
    /// use trellis_core::{RequestContext, Token};
    ///
    /// const TENANT: Token = Token::named("TENANT");
    ///
    /// # tokio_test::block_on(async {
    /// let tenant = RequestContext::run_async(async {
    ///     RequestContext::set(TENANT, 7u32).unwrap();
    ///     tokio::task::yield_now().await;
    ///     RequestContext::get::<u32>(&TENANT)
    /// })
    /// .await;
    /// assert_eq!(tenant.as_deref(), Some(&7));
    /// assert!(!RequestContext::is_in_request_scope());
    /// # });
    /// ```
    pub async fn run_async<F: Future>(fut: F) -> F::Output {
        let scope = RequestScope::new();
        trace!(request_scope = %scope.id, "Entering async request scope");
        scope.enter(fut).await
    }

    /// The active request scope, if any.
    pub fn current() -> Option<RequestScope> {
        REQUEST_SCOPE.try_with(Clone::clone).ok()
    }

    /// True when called from within a `run` / `run_async` call chain.
    pub fn is_in_request_scope() -> bool {
        REQUEST_SCOPE.try_with(|_| ()).is_ok()
    }

    /// Read a value from the active scope. Returns `None` outside a scope.
    pub fn get<T: Send + Sync + 'static>(token: &Token) -> Option<Arc<T>> {
        Self::current()?
            .instance(token)
            .and_then(|instance| instance.downcast::<T>().ok())
    }

    /// Store a value in the active scope.
    pub fn set<T: Send + Sync + 'static>(token: Token, value: T) -> Result<(), Error> {
        Self::set_arc(token, Arc::new(value))
    }

    /// Store an already shared value in the active scope.
    pub fn set_arc<T: Send + Sync + 'static>(token: Token, value: Arc<T>) -> Result<(), Error> {
        let scope = Self::current().ok_or_else(|| {
            Error::ScopeViolation(format!(
                "cannot set request-scoped instance outside of a request context ({})",
                token
            ))
        })?;
        scope.insert(token, value);
        Ok(())
    }

    /// Whether the active scope holds a value for `token`.
    pub fn has(token: &Token) -> bool {
        Self::current()
            .map(|scope| scope.instance(token).is_some())
            .unwrap_or(false)
    }
}
