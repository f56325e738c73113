use crate::{EngineError, Result};
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

/// Fed by the transmit worker once per cycle.
#[derive(Clone)]
pub struct TransmitMetrics {
    pub frames_sent: IntCounter,
    pub cycle_failures: IntCounter,
    /// Length of the current run of failed cycles; back to 0 on the next good frame.
    pub failure_streak: IntGauge,
}

impl TransmitMetrics {
    fn register(registry: &Registry) -> Result<Self> {
        Ok(Self {
            frames_sent: counter(registry, "dmx_frames_sent", "DMX frames written in full")?,
            cycle_failures: counter(
                registry,
                "dmx_cycle_failures",
                "Transmit cycles abandoned after a break or write failure",
            )?,
            failure_streak: gauge(
                registry,
                "dmx_failure_streak",
                "Consecutive failed transmit cycles",
            )?,
        })
    }

    pub(crate) fn record_frame(&self) {
        self.frames_sent.inc();
        self.failure_streak.set(0);
    }

    pub(crate) fn record_failure(&self, streak: u32) {
        self.cycle_failures.inc();
        self.failure_streak.set(i64::from(streak));
    }
}

/// Adapter enumeration, updated on every registry refresh.
#[derive(Clone)]
pub struct DeviceMetrics {
    pub adapters: IntGauge,
    pub enumeration_failures: IntCounter,
}

impl DeviceMetrics {
    fn register(registry: &Registry) -> Result<Self> {
        Ok(Self {
            adapters: gauge(
                registry,
                "dmx_adapters",
                "Adapters listed by the last successful enumeration",
            )?,
            enumeration_failures: counter(
                registry,
                "dmx_enumeration_failures",
                "Adapter enumerations that failed and kept the previous list",
            )?,
        })
    }

    /// A failed refresh leaves the adapter gauge at the retained list's size.
    pub(crate) fn record_refresh(&self, outcome: &dmx_transport::Result<usize>) {
        match outcome {
            Ok(count) => self.adapters.set(i64::try_from(*count).unwrap_or(i64::MAX)),
            Err(_) => self.enumeration_failures.inc(),
        }
    }
}

/// Private prometheus registry for one engine.
pub struct MetricsHub {
    registry: Registry,
    pub transmit: TransmitMetrics,
    pub devices: DeviceMetrics,
}

impl MetricsHub {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let transmit = TransmitMetrics::register(&registry)?;
        let devices = DeviceMetrics::register(&registry)?;
        Ok(Self {
            registry,
            transmit,
            devices,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Prometheus text exposition of every metric in the hub.
    pub fn encode_text(&self) -> Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf)
            .map_err(|e| EngineError::Metrics(prometheus::Error::Msg(e.to_string())))
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter> {
    let c = IntCounter::new(name, help)?;
    registry.register(Box::new(c.clone()))?;
    Ok(c)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<IntGauge> {
    let g = IntGauge::new(name, help)?;
    registry.register(Box::new(g.clone()))?;
    Ok(g)
}
