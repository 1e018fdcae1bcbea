// Core traits for the Trellis framework

use crate::resolver::Resolver;
use crate::Error;

/// Trait for types that can be provided by the DI container
pub trait Provider: Send + Sync + 'static {}

/// A provider the container knows how to build.
///
/// `construct` is the constructor: every dependency it requests from the
/// resolver is a constructor edge and takes part in cycle detection.
/// `inject` runs after the instance has been built and cached in its scope,
/// so field-level back-references (see [`crate::Inject`]) may point at a
/// provider that is still being wired.
pub trait Injectable: Provider + Sized {
    /// Build the instance, resolving constructor dependencies.
    fn construct(resolver: &mut Resolver<'_>) -> Result<Self, Error>;

    /// Assign field-level dependencies after construction.
    fn inject(&self, _resolver: &mut Resolver<'_>) -> Result<(), Error> {
        Ok(())
    }
}

/// HTTP methods
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    GET,
    POST,
    PUT,
    DELETE,
    PATCH,
    HEAD,
    OPTIONS,
}

impl std::str::FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(HttpMethod::GET),
            "POST" => Ok(HttpMethod::POST),
            "PUT" => Ok(HttpMethod::PUT),
            "DELETE" => Ok(HttpMethod::DELETE),
            "PATCH" => Ok(HttpMethod::PATCH),
            "HEAD" => Ok(HttpMethod::HEAD),
            "OPTIONS" => Ok(HttpMethod::OPTIONS),
            _ => Err(format!("unsupported HTTP method: {}", s)),
        }
    }
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::GET => "GET",
            HttpMethod::POST => "POST",
            HttpMethod::PUT => "PUT",
            HttpMethod::DELETE => "DELETE",
            HttpMethod::PATCH => "PATCH",
            HttpMethod::HEAD => "HEAD",
            HttpMethod::OPTIONS => "OPTIONS",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
