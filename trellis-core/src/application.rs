// Application bootstrapper and HTTP server

use crate::logging::{debug, error, info, warn};
use crate::{Container, Error, HttpRequest, HttpResponse, Registry, Router};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode, body::Incoming as IncomingBody};
use hyper_util::rt::TokioIo;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// The main application struct
pub struct Application {
    container: Container,
    router: Arc<Router>,
}

impl Application {
    /// Bootstrap an application from a registry.
    ///
    /// Declares every registry entry in a fresh container, eagerly builds
    /// singletons and runs their init hooks, then builds the router.
    pub async fn create(registry: &Registry) -> Result<Self, Error> {
        Self::with_container(registry, Container::new()).await
    }

    /// Bootstrap into an existing container, e.g. one holding config values.
    pub async fn with_container(registry: &Registry, container: Container) -> Result<Self, Error> {
        info!("Bootstrapping Trellis application");

        let declared = registry.install(&container);
        debug!(declared, "Registry installed");

        container.initialize().await?;
        let router = Router::from_registry(registry, container.clone())?;

        info!(
            controllers = registry.controllers().len(),
            routes = router.routes().len(),
            "Application bootstrap complete"
        );
        Ok(Self {
            container,
            router: Arc::new(router),
        })
    }

    /// Get a reference to the DI container
    pub fn container(&self) -> &Container {
        &self.container
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Run one request through the pipeline without a server.
    ///
    /// ```
    /// use trellis_core::{Application, HttpRequest, Registry};
    ///
    /// # tokio_test::block_on(async {
    /// let app = Application::create(&Registry::new()).await.unwrap();
    /// let response = app.handle(HttpRequest::get("/missing")).await;
    /// assert_eq!(response.status, 404);
    /// # });
    /// ```
    pub async fn handle(&self, request: HttpRequest) -> HttpResponse {
        self.router.handle(request).await
    }

    /// Serve on `0.0.0.0:port` until Ctrl-C
    pub async fn listen(self, port: u16) -> Result<(), Error> {
        self.listen_on(SocketAddr::from(([0, 0, 0, 0], port))).await
    }

    /// Serve on `addr` until Ctrl-C
    pub async fn listen_on(self, addr: SocketAddr) -> Result<(), Error> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await
    }

    /// Accept connections on `listener` until `shutdown` resolves, then run
    /// destroy hooks.
    pub async fn serve<S>(self, listener: TcpListener, shutdown: S) -> Result<(), Error>
    where
        S: Future<Output = ()> + Send,
    {
        let addr = listener.local_addr()?;
        info!(address = %addr, "Server listening");

        let router = self.router.clone();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(error = %e, "Failed to accept connection");
                            continue;
                        }
                    };
                    let io = TokioIo::new(stream);
                    let router = router.clone();

                    tokio::spawn(async move {
                        let service = service_fn(move |req: Request<IncomingBody>| {
                            let router = router.clone();
                            async move { handle_request(req, router).await }
                        });

                        if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                            debug!(peer = %peer, error = %err, "Error serving connection");
                        }
                    });
                }
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.shutdown().await
    }

    /// Run destroy hooks in reverse initialization order
    pub async fn shutdown(&self) -> Result<(), Error> {
        let result = self.container.shutdown().await;
        match &result {
            Ok(()) => info!("Application shut down"),
            Err(e) => error!(error = %e, "Application shut down with errors"),
        }
        result
    }
}

/// Handle an incoming HTTP request
async fn handle_request(
    req: Request<IncomingBody>,
    router: Arc<Router>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().to_string();
    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let mut request = HttpRequest::new(method, path);
    for (name, value) in req.headers() {
        if let Ok(value) = value.to_str() {
            request
                .headers
                .insert(name.as_str().to_string(), value.to_string());
        }
    }

    request.body = req.collect().await?.to_bytes().to_vec();

    let response = router.handle(request).await;
    Ok(into_hyper_response(response))
}

fn into_hyper_response(response: HttpResponse) -> Response<Full<Bytes>> {
    let mut builder = Response::builder().status(response.status);
    for (key, value) in response.headers {
        builder = builder.header(key, value);
    }

    builder
        .body(Full::new(Bytes::from(response.body)))
        .unwrap_or_else(|e| {
            error!(error = %e, "Invalid response produced by pipeline");
            let mut fallback = Response::new(Full::new(Bytes::new()));
            *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            fallback
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_hyper_response() {
        let response = into_hyper_response(
            HttpResponse::created().with_header("X-Id".to_string(), "7".to_string()),
        );
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["x-id"], "7");
    }

    #[test]
    fn test_invalid_status_falls_back_to_500() {
        let response = into_hyper_response(HttpResponse::new(42));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_empty_registry_bootstraps() {
        let app = Application::create(&Registry::new()).await.unwrap();
        assert!(app.router().routes().is_empty());
        let res = app.handle(HttpRequest::get("/missing")).await;
        assert_eq!(res.status, 404);
        app.shutdown().await.unwrap();
    }
}
