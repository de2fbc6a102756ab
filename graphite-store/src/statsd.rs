use graphite_statsd::{CounterMetric, GaugeMetric};

/// Counter metrics used by the stores.
pub enum StoreCounters {
    /// Number of data points written, including overwrites of an existing slot.
    DataPointsStored,
    /// Number of data points dropped because they fell out of the retention period.
    DataPointsVacuumed,
}

impl CounterMetric for StoreCounters {
    fn name(&self) -> &'static str {
        match self {
            Self::DataPointsStored => "store.data_points.stored",
            Self::DataPointsVacuumed => "store.data_points.vacuumed",
        }
    }
}

/// Gauge metrics used by the stores.
pub enum StoreGauges {
    /// Number of series held in memory.
    Series,
}

impl GaugeMetric for StoreGauges {
    fn name(&self) -> &'static str {
        match self {
            Self::Series => "store.series",
        }
    }
}
