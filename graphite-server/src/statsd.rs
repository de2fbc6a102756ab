use graphite_statsd::{CounterMetric, GaugeMetric, TimerMetric};

/// Counter metrics used by the servers.
pub enum ServerCounters {
    /// Number of connections accepted by the Carbon engine.
    CarbonConnectionAccepted,
    /// Number of data points parsed from Carbon feeds.
    CarbonLinesReceived,
    /// Number of Carbon lines that could not be parsed.
    CarbonLinesRejected,
    /// Number of feeds parsed because the connection went silent, without it being closed.
    CarbonIdleFlush,
    /// Number of requests handled by the Render engine.
    ///
    /// This metric is tagged with:
    /// - `endpoint`: `find`, `index`, `render` or `other`.
    /// - `status`: the HTTP status code of the response.
    RenderRequest,
    /// Number of attempts to start a server.
    ServerStartAttempt,
    /// Number of failed attempts to start a server.
    ServerStartFailed,
}

impl CounterMetric for ServerCounters {
    fn name(&self) -> &'static str {
        match self {
            Self::CarbonConnectionAccepted => "carbon.connection.accepted",
            Self::CarbonLinesReceived => "carbon.lines.received",
            Self::CarbonLinesRejected => "carbon.lines.rejected",
            Self::CarbonIdleFlush => "carbon.idle_flush",
            Self::RenderRequest => "render.requests",
            Self::ServerStartAttempt => "server.start.attempt",
            Self::ServerStartFailed => "server.start.failed",
        }
    }
}

/// Gauge metrics used by the servers.
pub enum ServerGauges {
    /// Number of servers run by the manager.
    RunningServers,
}

impl GaugeMetric for ServerGauges {
    fn name(&self) -> &'static str {
        match self {
            Self::RunningServers => "manager.running_servers",
        }
    }
}

/// Timer metrics used by the servers.
pub enum ServerTimers {
    /// Time spent in listener callbacks.
    ///
    /// This metric is tagged with:
    /// - `listener`: `carbon`, `find` or `query`.
    ListenerCallback,
}

impl TimerMetric for ServerTimers {
    fn name(&self) -> &'static str {
        match self {
            Self::ListenerCallback => "listener.callback",
        }
    }
}
