//! Lifecycle hooks for providers.
//!
//! A provider opts into hooks when it is declared:
//!
//! ```
//! use trellis_core::{Container, Injectable, Provider, Resolver, Error};
//! use trellis_core::lifecycle::{LifecycleResult, OnDestroy, OnInit};
//! use async_trait::async_trait;
//!
//! struct Pool;
//!
//! impl Provider for Pool {}
//!
//! impl Injectable for Pool {
//!     fn construct(_: &mut Resolver<'_>) -> Result<Self, Error> {
//!         Ok(Pool)
//!     }
//! }
//!
//! #[async_trait]
//! impl OnInit for Pool {
//!     async fn on_init(&self) -> LifecycleResult {
//!         Ok(())
//!     }
//! }
//!
//! #[async_trait]
//! impl OnDestroy for Pool {
//!     async fn on_destroy(&self) -> LifecycleResult {
//!         Ok(())
//!     }
//! }
//!
//! let container = Container::new();
//! container.declare(
//!     Container::provider::<Pool>()
//!         .priority(10)
//!         .with_init_hook()
//!         .with_destroy_hook(),
//! );
//! ```
//!
//! `Container::initialize` runs init hooks highest priority first and
//! `Container::shutdown` runs destroy hooks in the exact reverse order.

use crate::logging::{debug, error};
use crate::request_scope::Instance;
use crate::{Provider, Token};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::Arc;

/// Error type for lifecycle operations
pub type LifecycleResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Hook called once after a provider is constructed during bootstrap
#[async_trait]
pub trait OnInit: Send + Sync {
    async fn on_init(&self) -> LifecycleResult;
}

/// Hook called during orderly shutdown
#[async_trait]
pub trait OnDestroy: Send + Sync {
    async fn on_destroy(&self) -> LifecycleResult;
}

/// Type-erased hook bound to a concrete provider type.
pub(crate) type HookFn = Arc<dyn Fn(Instance) -> BoxFuture<'static, LifecycleResult> + Send + Sync>;

pub(crate) fn init_hook<T: Provider + OnInit>() -> HookFn {
    Arc::new(|instance: Instance| {
        Box::pin(async move {
            match instance.downcast::<T>() {
                Ok(provider) => provider.on_init().await,
                Err(_) => Err(format!("instance is not a {}", std::any::type_name::<T>()).into()),
            }
        })
    })
}

pub(crate) fn destroy_hook<T: Provider + OnDestroy>() -> HookFn {
    Arc::new(|instance: Instance| {
        Box::pin(async move {
            match instance.downcast::<T>() {
                Ok(provider) => provider.on_destroy().await,
                Err(_) => Err(format!("instance is not a {}", std::any::type_name::<T>()).into()),
            }
        })
    })
}

struct Initialized {
    token: Token,
    instance: Instance,
    destroy: Option<HookFn>,
}

/// Tracks initialized providers so they can be torn down in reverse order.
#[derive(Default)]
pub struct LifecycleManager {
    initialized: Mutex<Vec<Initialized>>,
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run an init hook for `instance` and remember it for shutdown.
    pub(crate) async fn initialize(
        &self,
        token: Token,
        instance: Instance,
        init: Option<HookFn>,
        destroy: Option<HookFn>,
    ) -> LifecycleResult {
        if let Some(hook) = init {
            hook(instance.clone()).await.inspect_err(|e| {
                error!(provider = token.name(), error = %e, "on_init failed");
            })?;
            debug!(provider = token.name(), "on_init completed");
        }

        self.initialized.lock().push(Initialized {
            token,
            instance,
            destroy,
        });
        Ok(())
    }

    /// Run every destroy hook, newest first, collecting failures.
    ///
    /// Each hook is awaited before the next one starts. Records are drained,
    /// so calling this twice only runs the hooks once.
    pub async fn shutdown(&self) -> Result<(), Vec<(String, String)>> {
        let records: Vec<Initialized> = std::mem::take(&mut *self.initialized.lock());
        let mut errors = Vec::new();

        for record in records.into_iter().rev() {
            let Some(hook) = record.destroy else {
                continue;
            };
            let name = record.token.name();
            match hook(record.instance).await {
                Ok(()) => debug!(provider = name, "on_destroy completed"),
                Err(e) => {
                    error!(provider = name, error = %e, "on_destroy failed");
                    errors.push((name.to_string(), e.to_string()));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Tokens of initialized providers, in initialization order.
    pub fn initialized(&self) -> Vec<Token> {
        self.initialized.lock().iter().map(|r| r.token).collect()
    }

    pub fn is_initialized(&self, token: &Token) -> bool {
        self.initialized.lock().iter().any(|r| &r.token == token)
    }

    pub fn clear(&self) {
        self.initialized.lock().clear();
    }
}
