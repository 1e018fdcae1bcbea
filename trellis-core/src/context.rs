// Execution context shared by guards and interceptors

use crate::{HttpRequest, HttpResponse, Token};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

struct Identity {
    request_id: Uuid,
    controller: Token,
    handler: &'static str,
    route: String,
}

/// Read-only view of the request being processed.
///
/// The identity (request id, controller, handler, route) is fixed for the
/// lifetime of the request. Guards see the request as it arrived;
/// interceptors see it after middleware has run.
#[derive(Clone)]
pub struct ExecutionContext {
    identity: Arc<Identity>,
    request: Arc<HttpRequest>,
    response: ResponseHandle,
}

impl ExecutionContext {
    pub fn new(
        request_id: Uuid,
        controller: Token,
        handler: &'static str,
        route: impl Into<String>,
        request: HttpRequest,
    ) -> Self {
        Self {
            identity: Arc::new(Identity {
                request_id,
                controller,
                handler,
                route: route.into(),
            }),
            request: Arc::new(request),
            response: ResponseHandle::default(),
        }
    }

    /// Same identity and response handle, different request payload.
    pub(crate) fn with_request(&self, request: HttpRequest) -> Self {
        Self {
            identity: self.identity.clone(),
            request: Arc::new(request),
            response: self.response.clone(),
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.identity.request_id
    }

    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    pub fn response(&self) -> &ResponseHandle {
        &self.response
    }

    /// Token of the controller that owns the matched route.
    pub fn controller(&self) -> Token {
        self.identity.controller
    }

    pub fn controller_name(&self) -> &'static str {
        self.identity.controller.name()
    }

    pub fn handler_name(&self) -> &'static str {
        self.identity.handler
    }

    /// Route pattern that matched, e.g. `/users/:id`.
    pub fn route(&self) -> &str {
        &self.identity.route
    }

    pub fn get_header(&self, name: &str) -> Option<&String> {
        self.request.header(name)
    }

    pub fn get_param(&self, name: &str) -> Option<&String> {
        self.request.param(name)
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("request_id", &self.identity.request_id)
            .field("controller", &self.identity.controller)
            .field("handler", &self.identity.handler)
            .field("route", &self.identity.route)
            .finish()
    }
}

#[derive(Debug, Default)]
struct ResponseParts {
    status: Option<u16>,
    headers: HashMap<String, String>,
}

/// Outbound response handle.
///
/// Headers set here are merged into the response the pipeline produces;
/// headers the handler set itself win. A status set here only replaces a
/// non-error status. Requests that end in an uncaught error are answered by
/// the error translation alone.
#[derive(Clone, Default, Debug)]
pub struct ResponseHandle {
    parts: Arc<Mutex<ResponseParts>>,
}

impl ResponseHandle {
    pub fn set_header(&self, name: impl Into<String>, value: impl Into<String>) {
        self.parts.lock().headers.insert(name.into(), value.into());
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.parts.lock().headers.get(name).cloned()
    }

    pub fn set_status(&self, status: u16) {
        self.parts.lock().status = Some(status);
    }

    pub fn status(&self) -> Option<u16> {
        self.parts.lock().status
    }

    pub(crate) fn apply(&self, response: &mut HttpResponse) {
        let parts = self.parts.lock();
        for (name, value) in parts.headers.iter() {
            response
                .headers
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }
        if let Some(status) = parts.status {
            if response.status < 400 {
                response.status = status;
            }
        }
    }
}
