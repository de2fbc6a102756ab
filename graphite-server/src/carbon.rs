//! The Carbon plaintext ingestion engine.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use graphite_metrics::{MetricsSet, ParsedFeed};
use graphite_statsd::metric;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::task::JoinError;

use crate::listener::{CarbonListener, ListenerSlot};
use crate::net::{AcceptLoop, BindError};
use crate::statsd::{ServerCounters, ServerTimers};

/// Initial capacity of the per-connection read buffer.
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Buffered bytes at which complete lines are parsed without waiting for silence.
///
/// A partial line reaching this size is discarded.
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Parses feeds and hands them to the registered [`CarbonListener`].
#[derive(Clone, Default)]
struct Feeder {
    listener: ListenerSlot<dyn CarbonListener>,
}

impl Feeder {
    fn feed(&self, bytes: &[u8]) -> ParsedFeed {
        let feed = MetricsSet::parse_plain_text(bytes);

        metric!(
            counter(ServerCounters::CarbonLinesReceived) += feed.metrics.data_point_count() as i64
        );

        if let Some(error) = &feed.error {
            metric!(counter(ServerCounters::CarbonLinesRejected) += error.failed_lines as i64);
            graphite_log::warn!(
                error = &error.first as &dyn std::error::Error,
                "rejected {} carbon line(s)",
                error.failed_lines,
            );
        }

        if let Some(listener) = self.listener.get() {
            metric!(timer(ServerTimers::ListenerCallback), listener = "carbon", {
                listener.metrics_received(&feed.metrics, feed.error.as_ref());
            });
        }

        feed
    }
}

/// Settings of a single connection.
#[derive(Clone, Copy, Debug)]
struct ConnectionTimeouts {
    wait: Duration,
    idle: Duration,
}

/// Accepts Carbon plaintext connections and parses the lines they send.
///
/// Every connection is handled by its own task. Bytes are buffered until the peer closes the
/// connection or stays silent for the connection wait timeout, then the buffer is parsed as one
/// feed and passed to the [`CarbonListener`].
pub struct CarbonEngine {
    addr: SocketAddr,
    timeouts: ConnectionTimeouts,
    feeder: Feeder,
    running: Option<AcceptLoop>,
}

impl CarbonEngine {
    /// Creates a stopped engine for `addr`.
    ///
    /// `connection_wait_timeout` is the silence after which buffered bytes are parsed, and
    /// `connection_timeout` the silence after which the connection is closed. A zero
    /// `connection_timeout` keeps silent connections open.
    pub fn new(
        addr: SocketAddr,
        connection_wait_timeout: Duration,
        connection_timeout: Duration,
    ) -> Self {
        Self {
            addr,
            timeouts: ConnectionTimeouts {
                wait: connection_wait_timeout,
                idle: connection_timeout,
            },
            feeder: Feeder::default(),
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

    /// Registers the listener for parsed feeds, replacing the previous one.
    ///
    /// Running connections pick up the new listener with their next feed.
    pub fn set_listener(&self, listener: Arc<dyn CarbonListener>) {
        self.feeder.listener.set(listener);
    }

    /// Parses a feed and passes it to the listener, as if it had been received on a connection.
    pub fn feed_bytes(&self, bytes: &[u8]) -> ParsedFeed {
        self.feeder.feed(bytes)
    }

    /// Parses a textual feed. See [`feed_bytes`](Self::feed_bytes).
    pub fn feed_str(&self, text: &str) -> ParsedFeed {
        self.feed_bytes(text.as_bytes())
    }

    /// Binds the socket and starts accepting connections.
    ///
    /// A running engine is stopped first.
    pub async fn start(&mut self) -> Result<(), BindError> {
        self.stop().await.ok();

        let feeder = self.feeder.clone();
        let timeouts = self.timeouts;

        let accept_loop = AcceptLoop::bind(self.addr, move |stream, peer| {
            metric!(counter(ServerCounters::CarbonConnectionAccepted) += 1);
            tokio::spawn(receive(stream, peer, feeder.clone(), timeouts));
        })?;

        graphite_log::info!("carbon listening on {}", accept_loop.local_addr());
        self.running = Some(accept_loop);
        Ok(())
    }

    /// Closes the listening socket. Accepted connections are not interrupted.
    pub async fn stop(&mut self) -> Result<(), JoinError> {
        let Some(accept_loop) = self.running.take() else {
            return Ok(());
        };

        let addr = accept_loop.local_addr();
        accept_loop.shutdown().await?;
        graphite_log::info!("carbon stopped listening on {addr}");
        Ok(())
    }
}

impl std::fmt::Debug for CarbonEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CarbonEngine")
            .field("addr", &self.addr)
            .field("local_addr", &self.local_addr())
            .finish()
    }
}

/// Reads a connection until it is closed, parsing a feed whenever the peer goes silent.
async fn receive(
    mut stream: TcpStream,
    peer: SocketAddr,
    feeder: Feeder,
    timeouts: ConnectionTimeouts,
) {
    graphite_log::debug!("carbon connection from {peer}");

    let mut buffer = Vec::with_capacity(READ_BUFFER_SIZE);
    let mut silence = Duration::ZERO;
    let mut discarding = false;

    loop {
        let read = stream.read_buf(&mut buffer);
        let result = match timeouts.wait.is_zero() {
            true => Ok(read.await),
            false => tokio::time::timeout(timeouts.wait, read).await,
        };

        match result {
            Ok(Ok(0)) => break,
            Ok(Ok(_)) => {
                silence = Duration::ZERO;
                if discarding {
                    discarding = !skip_partial_line(&mut buffer);
                }
                if buffer.len() >= MAX_BUFFER_SIZE {
                    discarding = feed_complete_lines(&feeder, &mut buffer, MAX_BUFFER_SIZE);
                }
            }
            Ok(Err(error)) => {
                graphite_log::debug!("carbon connection from {peer} failed: {error}");
                break;
            }
            Err(_) => {
                if !buffer.is_empty() {
                    metric!(counter(ServerCounters::CarbonIdleFlush) += 1);
                    feeder.feed(&buffer);
                    buffer.clear();
                }

                silence += timeouts.wait;
                if !timeouts.idle.is_zero() && silence >= timeouts.idle {
                    graphite_log::debug!("closing idle carbon connection from {peer}");
                    break;
                }
            }
        }
    }

    if !buffer.is_empty() {
        feeder.feed(&buffer);
    }

    graphite_log::debug!("carbon connection from {peer} closed");
}

/// Parses all complete lines in `buffer` and keeps the trailing partial line.
///
/// A partial line of `max_size` bytes or more is dropped and counted as rejected. Returns `true`
/// in that case, the rest of the line must then be skipped with [`skip_partial_line`].
fn feed_complete_lines(feeder: &Feeder, buffer: &mut Vec<u8>, max_size: usize) -> bool {
    if let Some(end) = buffer.iter().rposition(|&b| b == b'\n') {
        feeder.feed(&buffer[..=end]);
        buffer.drain(..=end);
    }

    if buffer.len() < max_size {
        return false;
    }

    metric!(counter(ServerCounters::CarbonLinesRejected) += 1);
    graphite_log::warn!("discarding carbon line longer than {max_size} bytes");
    buffer.clear();
    true
}

/// Drops bytes up to and including the first newline. Returns `true` if a newline was found.
fn skip_partial_line(buffer: &mut Vec<u8>) -> bool {
    match buffer.iter().position(|&b| b == b'\n') {
        Some(end) => {
            buffer.drain(..=end);
            true
        }
        None => {
            buffer.clear();
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use graphite_metrics::{Metrics, PartialBatchError};
    use parking_lot::Mutex;
    use tokio::io::AsyncWriteExt;
    use tokio::sync::mpsc;

    use super::*;

    /// Forwards every received set to a channel.
    struct ChannelListener(mpsc::UnboundedSender<(MetricsSet, Option<PartialBatchError>)>);

    impl CarbonListener for ChannelListener {
        fn metrics_received(&self, metrics: &MetricsSet, error: Option<&PartialBatchError>) {
            self.0.send((metrics.clone(), error.cloned())).ok();
        }
    }

    #[derive(Default)]
    struct RecordingListener(Mutex<Vec<String>>);

    impl CarbonListener for RecordingListener {
        fn metrics_received(&self, metrics: &MetricsSet, _error: Option<&PartialBatchError>) {
            let mut names = self.0.lock();
            names.extend(metrics.iter().map(|m| m.name().to_owned()));
        }
    }

    fn engine(wait: Duration, idle: Duration) -> CarbonEngine {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        CarbonEngine::new(addr, wait, idle)
    }

    fn channel_engine(
        wait: Duration,
        idle: Duration,
    ) -> (
        CarbonEngine,
        mpsc::UnboundedReceiver<(MetricsSet, Option<PartialBatchError>)>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = engine(wait, idle);
        engine.set_listener(Arc::new(ChannelListener(tx)));
        (engine, rx)
    }

    #[test]
    fn test_feed_without_listener() {
        let engine = engine(Duration::from_secs(1), Duration::ZERO);
        let feed = engine.feed_str("foo 1 1500000000\nbar 2 1500000000\n");
        assert_eq!(feed.metrics.len(), 2);
        assert!(feed.error.is_none());
    }

    #[test]
    fn test_feed_notifies_listener() {
        let engine = engine(Duration::from_secs(1), Duration::ZERO);
        let listener = Arc::new(RecordingListener::default());
        engine.set_listener(listener.clone());

        let feed = engine.feed_bytes(b"a 1 1\nbroken\nb 2 2\na 3 3\n");
        assert_eq!(feed.metrics.data_point_count(), 3);
        assert_eq!(feed.error.unwrap().failed_lines, 1);
        assert_eq!(*listener.0.lock(), ["a", "b"]);
    }

    #[test]
    fn test_feed_metrics() {
        let engine = engine(Duration::from_secs(1), Duration::ZERO);
        let captures = graphite_statsd::with_capturing_test_client(|| {
            engine.feed_str("a 1 1\nbroken\n");
        });
        assert_eq!(
            captures,
            [
                "carbon.lines.received:1|c",
                "carbon.lines.rejected:1|c",
            ]
        );
    }

    #[tokio::test]
    async fn test_connection_close_flushes() {
        graphite_log::init_test!();
        let (mut engine, mut rx) = channel_engine(Duration::from_secs(60), Duration::ZERO);
        engine.start().await.unwrap();

        let mut stream = TcpStream::connect(engine.local_addr().unwrap())
            .await
            .unwrap();
        stream
            .write_all(b"servers.a 1.5 1500000000\r\nservers.b 2 1500000060\nservers.a 3 1500000120")
            .await
            .unwrap();
        drop(stream);

        let (metrics, error) = rx.recv().await.unwrap();
        assert!(error.is_none());
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics.get("servers.a").unwrap().data_point_count(), 2);

        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_idle_timeout_flush() {
        graphite_log::init_test!();
        let (mut engine, mut rx) = channel_engine(Duration::from_millis(100), Duration::ZERO);
        engine.start().await.unwrap();

        let mut stream = TcpStream::connect(engine.local_addr().unwrap())
            .await
            .unwrap();
        stream.write_all(b"path0 0 1500000000\n").await.unwrap();

        // the connection stays open, the line is delivered after the wait timeout
        let (metrics, _) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            metrics.iter().cloned().collect::<Vec<_>>(),
            [Metrics::parse_plain_text_line("path0 0 1500000000").unwrap()]
        );

        stream.write_all(b"path1 1 1500000000\n").await.unwrap();
        let (metrics, _) = rx.recv().await.unwrap();
        assert!(metrics.get("path1").is_some());

        drop(stream);
        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_partial_batch_over_tcp() {
        let (mut engine, mut rx) = channel_engine(Duration::from_secs(60), Duration::ZERO);
        engine.start().await.unwrap();

        let mut text = String::new();
        for i in 0..10 {
            match i {
                5 => text.push_str("not a carbon line\n"),
                i => text.push_str(&format!("path{i} {i} 1500000000\n")),
            }
        }

        let mut stream = TcpStream::connect(engine.local_addr().unwrap())
            .await
            .unwrap();
        stream.write_all(text.as_bytes()).await.unwrap();
        stream.shutdown().await.unwrap();

        let (metrics, error) = rx.recv().await.unwrap();
        assert_eq!(metrics.data_point_count(), 9);
        assert!(error.is_some());

        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_idle_connection_closed() {
        let (mut engine, _rx) = channel_engine(Duration::from_millis(50), Duration::from_millis(150));
        engine.start().await.unwrap();

        let mut stream = TcpStream::connect(engine.local_addr().unwrap())
            .await
            .unwrap();

        let mut buf = [0; 1];
        let read = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
            .await
            .unwrap();
        assert_eq!(read.unwrap(), 0);

        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_keeps_connections() {
        let (mut engine, mut rx) = channel_engine(Duration::from_secs(60), Duration::ZERO);
        engine.start().await.unwrap();
        let addr = engine.local_addr().unwrap();

        let mut stream = TcpStream::connect(addr).await.unwrap();
        // make sure the connection has been accepted before stopping
        stream.write_all(b"x 1 1\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        engine.stop().await.unwrap();
        assert!(!engine.is_running());
        assert!(TcpStream::connect(addr).await.is_err());

        stream.write_all(b"y 2 2\n").await.unwrap();
        drop(stream);

        let (metrics, _) = rx.recv().await.unwrap();
        assert_eq!(metrics.len(), 2);
    }

    #[tokio::test]
    async fn test_restart() {
        let mut engine = engine(Duration::from_secs(1), Duration::ZERO);
        assert_eq!(engine.local_addr(), None);
        engine.start().await.unwrap();
        engine.start().await.unwrap();
        assert!(engine.is_running());
        engine.stop().await.unwrap();
        engine.stop().await.unwrap();
        assert_eq!(engine.local_addr(), None);
    }

    #[test]
    fn test_feed_complete_lines() {
        let engine = engine(Duration::from_secs(1), Duration::ZERO);
        let mut buffer = b"a 1 1\nb 2 2\nc 3".to_vec();
        assert!(!feed_complete_lines(&engine.feeder, &mut buffer, 1024));
        assert_eq!(buffer, b"c 3");
    }

    #[test]
    fn test_oversized_line_discarded() {
        let engine = engine(Duration::from_secs(1), Duration::ZERO);
        let mut buffer = b"a 1 1\nxxxxxxxxxxxx".to_vec();

        let captures = graphite_statsd::with_capturing_test_client(|| {
            assert!(feed_complete_lines(&engine.feeder, &mut buffer, 8));
        });
        assert!(buffer.is_empty());
        assert_eq!(
            captures,
            ["carbon.lines.received:1|c", "carbon.lines.rejected:1|c"]
        );

        let mut buffer = b"xxxx".to_vec();
        assert!(!skip_partial_line(&mut buffer));
        assert!(buffer.is_empty());

        let mut buffer = b"xx 1 1\nb 2 2\n".to_vec();
        assert!(skip_partial_line(&mut buffer));
        assert_eq!(buffer, b"b 2 2\n");
    }
}
