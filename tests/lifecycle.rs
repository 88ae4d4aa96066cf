//! Lifecycle tests: bind/start/stop semantics, conflicts, socket adoption,
//! and handler-chain ordering.

use std::sync::{Arc, Mutex};

use tokio::runtime::Handle;

use harbor::handler::chain::Handler;
use harbor::lifecycle::LifecycleState;
use harbor::net::socket::AdoptedSocket;
use harbor::{HandlerChain, HandlerFactory, ListenSpec, Server, ServerError};

mod common;

fn ephemeral() -> std::net::SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

#[tokio::test]
async fn bind_and_start_reports_sockets() {
    let server = Server::builder()
        .listener(ListenSpec::http(ephemeral()))
        .listener(ListenSpec::http(ephemeral()))
        .handler_chain(common::echo_chain())
        .build()
        .unwrap();

    server.bind().await.unwrap();
    server.start().await.unwrap();
    assert_eq!(server.state(), LifecycleState::Running);

    let sockets = server.listen_sockets().await;
    assert_eq!(sockets.len(), 2);
    assert!(server.listen_socket().await.is_some());

    let addrs = server.listen_addrs().await;
    assert_eq!(addrs.len(), 2);
    for addr in &addrs {
        assert_ne!(addr.port(), 0);
        let response = common::plain_get(*addr, "/").await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"hello");
    }

    server.stop().await;
    assert_eq!(server.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn external_bind_conflict_fails_whole_bind() {
    // An unrelated socket already owns the port.
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let taken_addr = taken.local_addr().unwrap();

    let server = Server::builder()
        .listener(ListenSpec::http(ephemeral()))
        .listener(ListenSpec::http(taken_addr))
        .build()
        .unwrap();

    let err = server.bind().await.unwrap_err();
    assert!(matches!(err, ServerError::BindConflict { .. }));
    assert_eq!(server.state(), LifecycleState::FailedToStart);

    // No partial listeners survive the failed bind.
    assert!(server.listen_sockets().await.is_empty());
    assert!(server.start().await.is_err());
}

#[tokio::test]
async fn duplicate_specs_are_refused_before_any_bind() {
    let spec = ListenSpec::http("127.0.0.1:47310".parse().unwrap());
    let result = Server::builder()
        .listener(spec.clone())
        .listener(spec)
        .build();
    assert!(matches!(result, Err(ServerError::Config(_))));
}

#[tokio::test]
async fn repeated_stop_is_benign() {
    let server = Server::builder()
        .listener(ListenSpec::http(ephemeral()))
        .build()
        .unwrap();

    server.bind().await.unwrap();
    server.start().await.unwrap();

    server.stop().await;
    // Calling stop again should be benign.
    server.stop().await;
    assert_eq!(server.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn concurrent_stops_serialize() {
    let server = Server::builder()
        .listener(ListenSpec::http(ephemeral()))
        .build()
        .unwrap();

    server.bind().await.unwrap();
    server.start().await.unwrap();

    let other = server.clone();
    tokio::join!(server.stop(), other.stop());
    assert_eq!(server.state(), LifecycleState::Stopped);

    server.stop().await;
    assert_eq!(server.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn start_without_bind_runs_with_no_listeners() {
    let server = Server::builder().build().unwrap();
    server.start().await.unwrap();
    assert_eq!(server.state(), LifecycleState::Running);
    assert_eq!(server.listen_socket().await, None);
    server.stop().await;
}

#[tokio::test]
async fn start_without_bind_brings_configured_listeners_up() {
    let server = Server::builder()
        .listener(ListenSpec::http(ephemeral()))
        .handler_chain(common::echo_chain())
        .build()
        .unwrap();

    // Skipping the explicit bind call must not skip the bind phase.
    server.start().await.unwrap();
    assert_eq!(server.state(), LifecycleState::Running);
    assert!(server.listen_socket().await.is_some());

    let addr = server.listen_addrs().await[0];
    let response = common::plain_get(addr, "/").await.unwrap();
    assert_eq!(response.status, 200);

    server.stop().await;
}

#[tokio::test]
async fn start_without_bind_surfaces_bind_failures_once() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let taken_addr = taken.local_addr().unwrap();

    let server = Server::builder()
        .listener(ListenSpec::http(taken_addr))
        .build()
        .unwrap();

    let err = server.start().await.unwrap_err();
    assert!(matches!(err, ServerError::ListenerStart(_)));
    assert_eq!(server.state(), LifecycleState::FailedToStart);
    assert!(server.listen_sockets().await.is_empty());
}

#[tokio::test]
async fn stop_listening_keeps_server_alive() {
    let server = Server::builder()
        .listener(ListenSpec::http(ephemeral()))
        .handler_chain(common::echo_chain())
        .build()
        .unwrap();

    server.bind().await.unwrap();
    server.start().await.unwrap();
    let addr = server.listen_addrs().await[0];
    assert!(common::plain_get(addr, "/").await.is_ok());

    server.stop_listening().await;
    assert_eq!(server.state(), LifecycleState::Running);
    assert_eq!(server.listen_socket().await, None);
    assert!(common::plain_get(addr, "/").await.is_err());

    server.stop().await;
    assert_eq!(server.state(), LifecycleState::Stopped);
}

#[cfg(unix)]
#[tokio::test]
async fn adopted_socket_identity_is_preserved() {
    use std::os::fd::AsRawFd;

    let external = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let external_fd = external.as_raw_fd();
    let external_addr = external.local_addr().unwrap();

    let server = Server::builder()
        .listener(ListenSpec::http(ephemeral()))
        .handler_chain(common::echo_chain())
        .adopt_socket(AdoptedSocket::Listener(external))
        .build()
        .unwrap();

    server.bind().await.unwrap();
    server.start().await.unwrap();

    assert_eq!(server.listen_socket().await, Some(external_fd));
    assert_eq!(server.listen_addrs().await[0], external_addr);

    let response = common::plain_get(external_addr, "/").await.unwrap();
    assert_eq!(response.status, 200);

    server.stop().await;
}

/// Appends its tag to the `x-path` response header on the way out.
struct TagFactory {
    tag: &'static str,
}

struct TagHandler {
    tag: &'static str,
    next: Arc<dyn Handler>,
}

#[async_trait::async_trait]
impl Handler for TagHandler {
    async fn handle(
        &self,
        conn: &harbor::AdmittedConnection,
        req: harbor::handler::chain::Request,
    ) -> harbor::handler::chain::Response {
        let mut response = self.next.handle(conn, req).await;
        let tagged = match response.headers().get("x-path") {
            Some(existing) => format!("{},{}", existing.to_str().unwrap_or(""), self.tag),
            None => self.tag.to_string(),
        };
        response
            .headers_mut()
            .insert("x-path", tagged.parse().unwrap());
        response
    }
}

impl HandlerFactory for TagFactory {
    fn wrap(&self, next: Arc<dyn Handler>) -> Arc<dyn Handler> {
        Arc::new(TagHandler {
            tag: self.tag,
            next,
        })
    }
}

/// Records lifecycle hook invocations.
struct HookRecorder {
    name: &'static str,
    events: Arc<Mutex<Vec<String>>>,
}

impl HandlerFactory for HookRecorder {
    fn wrap(&self, next: Arc<dyn Handler>) -> Arc<dyn Handler> {
        next
    }

    fn on_server_start(&self, _runtime: &Handle) {
        self.events
            .lock()
            .unwrap()
            .push(format!("start:{}", self.name));
    }

    fn on_server_stop(&self) {
        self.events
            .lock()
            .unwrap()
            .push(format!("stop:{}", self.name));
    }
}

#[tokio::test]
async fn first_added_factory_is_outermost() {
    let chain = HandlerChain::builder()
        .add(Arc::new(TagFactory { tag: "outer" }))
        .add(Arc::new(TagFactory { tag: "inner" }))
        .add(Arc::new(common::EchoFactory))
        .build();

    let server = Server::builder()
        .listener(ListenSpec::http(ephemeral()))
        .handler_chain(chain)
        .build()
        .unwrap();
    server.bind().await.unwrap();
    server.start().await.unwrap();

    let addr = server.listen_addrs().await[0];
    let response = common::plain_get(addr, "/").await.unwrap();
    // Response path unwinds inside out, so the outermost tag lands last.
    assert_eq!(response.header("x-path"), Some("inner,outer"));

    server.stop().await;
}

#[tokio::test]
async fn factory_hooks_run_in_chain_order_and_reverse() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let chain = HandlerChain::builder()
        .add(Arc::new(HookRecorder {
            name: "a",
            events: Arc::clone(&events),
        }))
        .add(Arc::new(HookRecorder {
            name: "b",
            events: Arc::clone(&events),
        }))
        .build();

    let server = Server::builder().handler_chain(chain).build().unwrap();
    server.start().await.unwrap();
    server.stop().await;

    assert_eq!(
        *events.lock().unwrap(),
        vec![
            "start:a".to_string(),
            "start:b".to_string(),
            "stop:b".to_string(),
            "stop:a".to_string()
        ]
    );
}
