//! The Render HTTP query engine.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::Request;
use axum::http::{HeaderValue, header};
use axum::middleware::{self, Next};
use axum::response::Response;
use graphite_metrics::RENDER_PATH;
use graphite_statsd::metric;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder;
use hyper_util::service::TowerToHyperService;
use parking_lot::RwLock;
use tokio::task::JoinError;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::timeout::TimeoutLayer;

use crate::listener::{HttpRequestListener, HttpRequestListeners, ListenerSlot, RenderListener};
use crate::net::{AcceptLoop, BindError};
use crate::statsd::ServerCounters;

mod endpoints;
mod format;

/// An additional request listener was registered for an empty path.
#[derive(Debug, thiserror::Error)]
#[error("invalid HTTPRequestListener : {0}")]
pub struct InvalidListenerPath(pub String);

/// Listeners shared by all requests of an engine.
#[derive(Clone, Default)]
pub(crate) struct RenderState {
    listener: ListenerSlot<dyn RenderListener>,
    http_listeners: Arc<RwLock<HttpRequestListeners>>,
}

impl RenderState {
    fn render_listener(&self) -> Option<Arc<dyn RenderListener>> {
        self.listener.get()
    }

    fn http_request_listener(&self, path: &str) -> Option<Arc<dyn HttpRequestListener>> {
        self.http_listeners.read().get(path).cloned()
    }
}

async fn track_requests(request: Request, next: Next) -> Response {
    let endpoint = match request.uri().path() {
        endpoints::FIND_PATH => "find",
        endpoints::INDEX_PATH => "index",
        RENDER_PATH => "render",
        _ => "other",
    };

    let response = next.run(request).await;

    metric!(
        counter(ServerCounters::RenderRequest) += 1,
        endpoint = endpoint,
        status = response.status().as_str(),
    );

    response
}

/// Build the axum application with all routes and middleware.
fn make_app(state: RenderState, connection_timeout: Duration) -> Router {
    let mut router = endpoints::routes(state);

    if !connection_timeout.is_zero() {
        router = router.layer(TimeoutLayer::new(connection_timeout));
    }

    router
        .layer(middleware::from_fn(track_requests))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
}

/// Serves the Render API over HTTP.
///
/// Requests are resolved by the registered [`RenderListener`]. Every connection is served by its
/// own task, with HTTP/1 and HTTP/2 detected automatically.
pub struct RenderEngine {
    addr: SocketAddr,
    connection_timeout: Duration,
    state: RenderState,
    running: Option<AcceptLoop>,
}

impl RenderEngine {
    /// Creates a stopped engine for `addr`.
    ///
    /// `connection_timeout` bounds the time to read request headers and to produce a response.
    /// Zero disables both limits.
    pub fn new(addr: SocketAddr, connection_timeout: Duration) -> Self {
        Self {
            addr,
            connection_timeout,
            state: RenderState::default(),
            running: None,
        }
    }

    /// Returns the configured address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Returns the bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(AcceptLoop::local_addr)
    }

    /// Returns `true` while the engine accepts connections.
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Registers the listener resolving find and render requests, replacing the previous one.
    pub fn set_listener(&self, listener: Arc<dyn RenderListener>) {
        self.state.listener.set(listener);
    }

    /// Registers a listener for requests to `path`.
    ///
    /// The built-in endpoints take precedence over additional listeners.
    pub fn set_http_request_listener(
        &self,
        path: &str,
        listener: Arc<dyn HttpRequestListener>,
    ) -> Result<(), InvalidListenerPath> {
        if path.is_empty() {
            return Err(InvalidListenerPath(path.to_owned()));
        }

        self.state
            .http_listeners
            .write()
            .insert(path.to_owned(), listener);

        Ok(())
    }

    /// Registers several listeners, returning the last error encountered.
    pub fn set_http_request_listeners<'a, I>(&self, listeners: I) -> Result<(), InvalidListenerPath>
    where
        I: IntoIterator<Item = (&'a str, Arc<dyn HttpRequestListener>)>,
    {
        let mut result = Ok(());
        for (path, listener) in listeners {
            if let Err(error) = self.set_http_request_listener(path, listener) {
                result = Err(error);
            }
        }
        result
    }

    /// Returns the application serving the Render API.
    ///
    /// The router shares its listeners with the engine.
    pub fn router(&self) -> Router {
        make_app(self.state.clone(), self.connection_timeout)
    }

    /// Binds the socket and starts serving requests.
    ///
    /// A running engine is stopped first.
    pub async fn start(&mut self) -> Result<(), BindError> {
        self.stop().await.ok();

        let router = self.router();
        let header_timeout = self.connection_timeout;

        let accept_loop = AcceptLoop::bind(self.addr, move |stream, peer| {
            let service = TowerToHyperService::new(router.clone());

            tokio::spawn(async move {
                let mut builder = Builder::new(TokioExecutor::new());
                if !header_timeout.is_zero() {
                    builder
                        .http1()
                        .timer(TokioTimer::new())
                        .header_read_timeout(header_timeout);
                }

                let connection = builder.serve_connection(TokioIo::new(stream), service);
                if let Err(error) = connection.await {
                    graphite_log::debug!("render connection from {peer} failed: {error}");
                }
            });
        })?;

        graphite_log::info!("render listening on http://{}/", accept_loop.local_addr());
        self.running = Some(accept_loop);
        Ok(())
    }

    /// Closes the listening socket. Connections that are being served are not interrupted.
    pub async fn stop(&mut self) -> Result<(), JoinError> {
        let Some(accept_loop) = self.running.take() else {
            return Ok(());
        };

        let addr = accept_loop.local_addr();
        accept_loop.shutdown().await?;
        graphite_log::info!("render stopped listening on {addr}");
        Ok(())
    }
}

impl std::fmt::Debug for RenderEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderEngine")
            .field("addr", &self.addr)
            .field("local_addr", &self.local_addr())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use axum::body::Body;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use graphite_metrics::{DataPoint, Metrics, Query, UnixTimestamp};
    use similar_asserts::assert_eq;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tower::ServiceExt;

    use super::*;
    use crate::ListenerError;

    const T: u64 = 1_500_000_000;

    /// Serves a fixed set of series and records the last query.
    struct FixedListener {
        metrics: Vec<Metrics>,
        last_query: parking_lot::Mutex<Option<Query>>,
    }

    impl FixedListener {
        fn new(metrics: Vec<Metrics>) -> Arc<Self> {
            Arc::new(Self {
                metrics,
                last_query: Default::default(),
            })
        }
    }

    impl RenderListener for FixedListener {
        fn find_metrics(&self, query: &Query) -> Result<Vec<Metrics>, ListenerError> {
            *self.last_query.lock() = Some(query.clone());
            Ok(self
                .metrics
                .iter()
                .map(|m| Metrics::new(m.name()))
                .collect())
        }

        fn query_metrics(&self, query: &Query) -> Result<Vec<Metrics>, ListenerError> {
            *self.last_query.lock() = Some(query.clone());
            Ok(self.metrics.clone())
        }
    }

    struct FailingListener;

    impl RenderListener for FailingListener {
        fn find_metrics(&self, _query: &Query) -> Result<Vec<Metrics>, ListenerError> {
            Err("storage unavailable".into())
        }

        fn query_metrics(&self, _query: &Query) -> Result<Vec<Metrics>, ListenerError> {
            Err("storage unavailable".into())
        }
    }

    struct HelloListener;

    #[async_trait::async_trait]
    impl HttpRequestListener for HelloListener {
        async fn handle(&self, request: Request) -> Response {
            format!("hello from {}", request.uri().path()).into_response()
        }
    }

    fn engine() -> RenderEngine {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        RenderEngine::new(addr, Duration::from_secs(5))
    }

    fn path0() -> Metrics {
        Metrics::with_data_points(
            "path0",
            vec![DataPoint::new(0.0, UnixTimestamp::from_secs(T))],
        )
    }

    async fn get(engine: &RenderEngine, uri: &str) -> (StatusCode, Option<String>, String) {
        let request = Request::get(uri).body(Body::empty()).unwrap();
        let response = engine.router().oneshot(request).await.unwrap();

        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "*",
            "{uri}"
        );

        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .map(|value| value.to_str().unwrap().to_owned());
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();

        (status, content_type, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_render_csv() {
        let engine = engine();
        engine.set_listener(FixedListener::new(vec![path0()]));

        let (status, content_type, body) = get(&engine, "/render?target=path0&format=csv").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some("text/csv"));

        let timestamp = path0().data_points()[0].timestamp_string();
        assert_eq!(body, format!("path0,{timestamp},0.000000\n"));
    }

    #[tokio::test]
    async fn test_render_json() {
        let engine = engine();
        engine.set_listener(FixedListener::new(vec![path0()]));

        let (status, content_type, body) = get(&engine, "/render?target=path0&format=json").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some("application/json"));
        assert_eq!(
            body,
            r#"[{"target":"path0","datapoints":[[0.000000,1500000000]]}]"#
        );
    }

    #[tokio::test]
    async fn test_render_raw() {
        let engine = engine();
        let series = Metrics::with_data_points(
            "a.b",
            vec![
                DataPoint::new(2.0, UnixTimestamp::from_secs(T + 60)),
                DataPoint::new(1.0, UnixTimestamp::from_secs(T)),
            ],
        );
        engine.set_listener(FixedListener::new(vec![series, Metrics::new("empty")]));

        let (status, content_type, body) = get(&engine, "/render?target=a.*&format=raw").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some("text/plain"));
        assert_eq!(body, "a.b,1500000000,1500000060,60|1.000000,2.000000\n");
    }

    #[tokio::test]
    async fn test_render_passes_query() {
        let engine = engine();
        let listener = FixedListener::new(vec![]);
        engine.set_listener(listener.clone());

        let uri = format!("/render?target=servers.*&from={T}&until={}&format=csv", T + 3600);
        let (status, _, _) = get(&engine, &uri).await;
        assert_eq!(status, StatusCode::OK);

        let query = listener.last_query.lock().clone().unwrap();
        assert_eq!(query.target, "servers.*");
        assert_eq!(query.from, Some(UnixTimestamp::from_secs(T)));
        assert_eq!(query.until, Some(UnixTimestamp::from_secs(T + 3600)));
    }

    #[tokio::test]
    async fn test_render_bad_requests() {
        let engine = engine();
        engine.set_listener(FixedListener::new(vec![path0()]));

        for uri in [
            "/render?target=path0",
            "/render?target=path0&format=png",
            "/render?target=path0&format=treejson",
            "/render?target=path0&format=csv&from=yesterday",
        ] {
            let (status, _, body) = get(&engine, uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(body, "Bad Request");
        }
    }

    #[tokio::test]
    async fn test_invalid_time_skips_listener() {
        let engine = engine();
        let listener = FixedListener::new(vec![]);
        engine.set_listener(listener.clone());

        let (status, _, _) = get(&engine, "/render?target=x&until=tomorrow&format=csv").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(listener.last_query.lock().is_none());
    }

    #[tokio::test]
    async fn test_missing_listener() {
        let engine = engine();
        for uri in [
            "/render?target=x&format=csv",
            "/metrics/find?query=x",
            "/metrics/index.json",
        ] {
            let (status, _, body) = get(&engine, uri).await;
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR, "{uri}");
            assert_eq!(body, "Internal Server Error");
        }
    }

    #[tokio::test]
    async fn test_listener_error() {
        let engine = engine();
        engine.set_listener(Arc::new(FailingListener));
        for uri in ["/render?target=x&format=csv", "/metrics/find?query=x"] {
            let (status, _, _) = get(&engine, uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        }
    }

    #[tokio::test]
    async fn test_find() {
        let engine = engine();
        let listener = FixedListener::new(vec![
            Metrics::new("servers.web.cpu"),
            Metrics::new("toplevel"),
        ]);
        engine.set_listener(listener.clone());

        let (status, content_type, body) = get(&engine, "/metrics/find?query=servers.*").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some("application/json"));
        assert_eq!(
            body,
            r#"{"metrics":[{"is_leaf":1,"name":"cpu","path":"servers.web"},{"is_leaf":1,"name":"toplevel","path":""}]}"#
        );
        assert_eq!(listener.last_query.lock().as_ref().unwrap().target, "servers.*");

        let (status, _, _) = get(&engine, "/metrics/find?query=x&format=treejson").await;
        assert_eq!(status, StatusCode::OK);

        let (status, _, _) = get(&engine, "/metrics/find?query=x&format=completer").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_index() {
        let engine = engine();
        let listener = FixedListener::new(vec![Metrics::new("a.b"), Metrics::new("c")]);
        engine.set_listener(listener.clone());

        let (status, content_type, body) = get(&engine, "/metrics/index.json").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some("application/json"));
        assert_eq!(body, r#"["a.b","c"]"#);
        assert_eq!(listener.last_query.lock().as_ref().unwrap().target, "*");
    }

    #[tokio::test]
    async fn test_extra_listeners() {
        let engine = engine();
        engine
            .set_http_request_listener("/hello", Arc::new(HelloListener))
            .unwrap();

        let (status, _, body) = get(&engine, "/hello").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "hello from /hello");

        let (status, _, body) = get(&engine, "/unknown").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "Not Found");

        let (status, _, _) = get(&engine, "/metrics/expand?query=x").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_expand_listener() {
        let engine = engine();
        engine
            .set_http_request_listener("/metrics/expand", Arc::new(HelloListener))
            .unwrap();

        let (status, _, body) = get(&engine, "/metrics/expand?query=servers.*").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "hello from /metrics/expand");
    }

    #[tokio::test]
    async fn test_index_lookup() {
        struct IndexListener;

        impl RenderListener for IndexListener {
            fn find_metrics(&self, _query: &Query) -> Result<Vec<Metrics>, ListenerError> {
                Ok(vec![Metrics::new("servers")])
            }

            fn query_metrics(&self, _query: &Query) -> Result<Vec<Metrics>, ListenerError> {
                Ok(vec![])
            }

            fn index_metrics(&self) -> Result<Vec<Metrics>, ListenerError> {
                Ok(vec![Metrics::new("servers.web.cpu"), Metrics::new("toplevel")])
            }
        }

        let engine = engine();
        engine.set_listener(Arc::new(IndexListener));

        let (status, _, body) = get(&engine, "/metrics/index.json").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"["servers.web.cpu","toplevel"]"#);
    }

    #[tokio::test]
    async fn test_invalid_listener_path() {
        let engine = engine();
        let error = engine
            .set_http_request_listener("", Arc::new(HelloListener))
            .unwrap_err();
        assert_eq!(error.to_string(), "invalid HTTPRequestListener : ");

        let listeners: Vec<(&str, Arc<dyn HttpRequestListener>)> = vec![
            ("", Arc::new(HelloListener)),
            ("/a", Arc::new(HelloListener)),
        ];
        assert!(engine.set_http_request_listeners(listeners).is_err());

        let (status, _, _) = get(&engine, "/a").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[test]
    fn test_request_metrics() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let engine = engine();

        let captures = graphite_statsd::with_capturing_test_client(|| {
            runtime.block_on(get(&engine, "/metrics/expand"));
        });
        assert_eq!(captures, ["render.requests:1|c|#endpoint:other,status:404"]);
    }

    #[tokio::test]
    async fn test_serve_http() {
        graphite_log::init_test!();
        let mut engine = engine();
        engine.set_listener(FixedListener::new(vec![path0()]));
        engine.start().await.unwrap();

        let mut stream = TcpStream::connect(engine.local_addr().unwrap())
            .await
            .unwrap();
        stream
            .write_all(
                b"GET /render?target=path0&format=json HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
            )
            .await
            .unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
        assert!(response.contains("access-control-allow-origin: *\r\n"));
        assert!(response.ends_with(r#"[{"target":"path0","datapoints":[[0.000000,1500000000]]}]"#));

        engine.stop().await.unwrap();
        assert!(!engine.is_running());
    }
}
