//! Handler parameter binding.
//!
//! Each route declares its parameters as a list of [`ParamBinding`]s. Right
//! before the handler runs, every binding is extracted from the request as a
//! `serde_json::Value` and passed through its [`Schema`], if one is attached.
//! A schema failure is a client error (400) and flows back out through the
//! interceptors like any other handler error.

use crate::context::ExecutionContext;
use crate::logging::trace;
use crate::{Error, HttpRequest};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Where a handler parameter comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamSource {
    Path(String),
    Query(String),
    Header(String),
    /// The whole request body, parsed as JSON
    Body,
}

impl fmt::Display for ParamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamSource::Path(name) => write!(f, "path parameter '{}'", name),
            ParamSource::Query(name) => write!(f, "query parameter '{}'", name),
            ParamSource::Header(name) => write!(f, "header '{}'", name),
            ParamSource::Body => write!(f, "request body"),
        }
    }
}

/// Validates and coerces one extracted parameter.
pub trait Schema: Send + Sync {
    /// Return the value the handler should see, or a `Validation` error.
    fn validate(&self, value: Value) -> Result<Value, Error>;
}

/// Rejects missing values
pub struct Required;

impl Schema for Required {
    fn validate(&self, value: Value) -> Result<Value, Error> {
        match value {
            Value::Null => Err(Error::Validation("value is required".to_string())),
            Value::String(ref s) if s.is_empty() => {
                Err(Error::Validation("value is required".to_string()))
            }
            other => Ok(other),
        }
    }
}

/// Accepts integers and integer strings, yielding a JSON number
pub struct Integer;

impl Schema for Integer {
    fn validate(&self, value: Value) -> Result<Value, Error> {
        match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(Value::Number(n)),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| Error::Validation(format!("'{}' is not an integer", s))),
            other => Err(Error::Validation(format!("{} is not an integer", other))),
        }
    }
}

/// Requires the value to deserialize into `T`
pub struct Typed<T>(PhantomData<fn() -> T>);

impl<T> Typed<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for Typed<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> Schema for Typed<T> {
    fn validate(&self, value: Value) -> Result<Value, Error> {
        T::deserialize(&value).map_err(|e| Error::Validation(e.to_string()))?;
        Ok(value)
    }
}

/// Schema from a closure
pub struct FnSchema<F>(F);

impl<F> FnSchema<F>
where
    F: Fn(Value) -> Result<Value, Error> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Schema for FnSchema<F>
where
    F: Fn(Value) -> Result<Value, Error> + Send + Sync,
{
    fn validate(&self, value: Value) -> Result<Value, Error> {
        (self.0)(value)
    }
}

/// One declared handler parameter
#[derive(Clone)]
pub struct ParamBinding {
    pub source: ParamSource,
    schema: Option<Arc<dyn Schema>>,
}

impl ParamBinding {
    pub fn new(source: ParamSource) -> Self {
        Self {
            source,
            schema: None,
        }
    }

    pub fn path(name: impl Into<String>) -> Self {
        Self::new(ParamSource::Path(name.into()))
    }

    pub fn query(name: impl Into<String>) -> Self {
        Self::new(ParamSource::Query(name.into()))
    }

    pub fn header(name: impl Into<String>) -> Self {
        Self::new(ParamSource::Header(name.into()))
    }

    pub fn body() -> Self {
        Self::new(ParamSource::Body)
    }

    pub fn with_schema<S: Schema + 'static>(mut self, schema: S) -> Self {
        self.schema = Some(Arc::new(schema));
        self
    }

    pub fn has_schema(&self) -> bool {
        self.schema.is_some()
    }

    /// Extract the raw value, then validate it.
    pub fn extract(&self, req: &HttpRequest) -> Result<Value, Error> {
        let raw = match &self.source {
            ParamSource::Path(name) => string_or_null(req.param(name)),
            ParamSource::Query(name) => string_or_null(req.query(name)),
            ParamSource::Header(name) => string_or_null(req.header(name)),
            ParamSource::Body if req.body.is_empty() => Value::Null,
            ParamSource::Body => serde_json::from_slice(&req.body)
                .map_err(|e| Error::BadRequest(format!("Invalid JSON body: {}", e)))?,
        };

        let Some(schema) = &self.schema else {
            return Ok(raw);
        };
        schema.validate(raw).map_err(|e| match e {
            Error::Validation(msg) => Error::Validation(format!("{}: {}", self.source, msg)),
            other => Error::Validation(format!("{}: {}", self.source, other)),
        })
    }
}

impl fmt::Debug for ParamBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamBinding")
            .field("source", &self.source)
            .field("schema", &self.schema.is_some())
            .finish()
    }
}

fn string_or_null(value: Option<&String>) -> Value {
    value.map(|v| Value::String(v.clone())).unwrap_or(Value::Null)
}

/// Arguments handed to a route handler
pub struct HandlerArgs {
    context: ExecutionContext,
    params: Vec<Value>,
}

impl HandlerArgs {
    pub fn new(context: ExecutionContext, params: Vec<Value>) -> Self {
        Self { context, params }
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// The request after middleware
    pub fn request(&self) -> &HttpRequest {
        self.context.request()
    }

    /// Bound parameter `index`, deserialized as `T`.
    ///
    /// String values that do not deserialize directly are retried as JSON
    /// text, so `"42"` binds to an integer parameter.
    pub fn param<T: DeserializeOwned>(&self, index: usize) -> Result<T, Error> {
        let value = self.params.get(index).ok_or_else(|| {
            Error::Internal(format!(
                "handler {} has no parameter {}",
                self.context.handler_name(),
                index
            ))
        })?;

        T::deserialize(value).or_else(|e| match value {
            Value::String(s) => serde_json::from_str(s)
                .map_err(|_| Error::BadRequest(format!("parameter {}: {}", index, e))),
            _ => Err(Error::BadRequest(format!("parameter {}: {}", index, e))),
        })
    }

    pub fn raw(&self, index: usize) -> Option<&Value> {
        self.params.get(index)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

/// Extract every binding against the context's request.
pub(crate) fn bind(bindings: &[ParamBinding], context: ExecutionContext) -> Result<HandlerArgs, Error> {
    let params = bindings
        .iter()
        .map(|binding| binding.extract(context.request()))
        .collect::<Result<Vec<_>, Error>>()?;
    trace!(count = params.len(), handler = context.handler_name(), "Parameters bound");
    Ok(HandlerArgs::new(context, params))
}
