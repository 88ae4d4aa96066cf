//! Decorator composition of request handler factories.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use http_body_util::Full;
use tokio::runtime::Handle;

use crate::net::connection::AdmittedConnection;

/// The request type handed to handlers.
pub type Request = http::Request<hyper::body::Incoming>;
/// The response type produced by handlers.
pub type Response = http::Response<Full<Bytes>>;

/// A per-request handler. One composed instance is shared by every admitted
/// connection; implementations must be internally synchronized.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, conn: &AdmittedConnection, req: Request) -> Response;
}

/// Produces one layer of the handler chain.
///
/// `wrap` receives the handler composed from the factories added after this
/// one and returns the decorated handler. The first factory added to the
/// chain therefore observes every request first.
pub trait HandlerFactory: Send + Sync {
    fn wrap(&self, next: Arc<dyn Handler>) -> Arc<dyn Handler>;

    /// Invoked once when the server transitions to running. `runtime` is
    /// the I/O context serving requests; factories may spawn onto it.
    fn on_server_start(&self, runtime: &Handle) {
        let _ = runtime;
    }

    /// Invoked once when the server stops.
    fn on_server_stop(&self) {}
}

/// An ordered, immutable sequence of handler factories.
///
/// Built once at configuration time and shared read-only across all
/// connections. Composition folds right-to-left so the first-added factory
/// is the outermost wrapper.
#[derive(Clone, Default)]
pub struct HandlerChain {
    factories: Arc<[Arc<dyn HandlerFactory>]>,
}

impl HandlerChain {
    pub fn builder() -> HandlerChainBuilder {
        HandlerChainBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Compose the chain into a single handler. Pure: no factory side
    /// effects are triggered here.
    pub fn compose(&self) -> Arc<dyn Handler> {
        let mut handler: Arc<dyn Handler> = Arc::new(UnhandledRequest);
        for factory in self.factories.iter().rev() {
            handler = factory.wrap(handler);
        }
        handler
    }

    /// Run start hooks in chain order.
    pub(crate) fn notify_start(&self, runtime: &Handle) {
        for factory in self.factories.iter() {
            factory.on_server_start(runtime);
        }
    }

    /// Run stop hooks in reverse chain order.
    pub(crate) fn notify_stop(&self) {
        for factory in self.factories.iter().rev() {
            factory.on_server_stop();
        }
    }
}

impl std::fmt::Debug for HandlerChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerChain")
            .field("factories", &self.factories.len())
            .finish()
    }
}

/// Builder for [`HandlerChain`].
#[derive(Default)]
pub struct HandlerChainBuilder {
    factories: Vec<Arc<dyn HandlerFactory>>,
}

impl HandlerChainBuilder {
    /// Append a factory. Earlier factories wrap later ones.
    pub fn add(mut self, factory: Arc<dyn HandlerFactory>) -> Self {
        self.factories.push(factory);
        self
    }

    pub fn build(self) -> HandlerChain {
        HandlerChain {
            factories: self.factories.into(),
        }
    }
}

/// Terminal handler behind the last factory: nothing claimed the request.
struct UnhandledRequest;

#[async_trait]
impl Handler for UnhandledRequest {
    async fn handle(&self, _conn: &AdmittedConnection, _req: Request) -> Response {
        let mut response = http::Response::new(Full::new(Bytes::new()));
        *response.status_mut() = StatusCode::NOT_FOUND;
        response
    }
}
