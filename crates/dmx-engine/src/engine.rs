use crate::{
    serial_listing, FrameIngest, FrameTiming, FrameUpdate, IngestOutcome, MetricsHub, Result,
    TransmitHealth, TransmitLoop, TransmitterState, UniverseBuffer,
};
use dmx_transport::{AdapterDriver, AdapterSession, DeviceDescriptor, DeviceRegistry, SessionState};
use std::sync::Arc;
use tracing::info;

/// The whole output path for one universe: registry, session, buffer,
/// transmitter and the ingest toggle, wired together.
///
/// Dropping the engine stops the transmitter and closes the adapter.
pub struct DmxEngine {
    registry: DeviceRegistry,
    ingest: FrameIngest,
    metrics: MetricsHub,
}

impl DmxEngine {
    /// Build the engine and run a first, best-effort enumeration.
    pub fn new(driver: Arc<dyn AdapterDriver>, timing: FrameTiming) -> Result<Self> {
        timing.validate()?;
        let metrics = MetricsHub::new()?;

        let registry = DeviceRegistry::new(driver.clone());
        let session = Arc::new(AdapterSession::new(driver));
        let buffer = UniverseBuffer::new();
        let transmitter = TransmitLoop::new(session.clone(), buffer.clone(), timing)
            .with_metrics(metrics.transmit.clone());
        let ingest = FrameIngest::new(session, transmitter, buffer);

        let mut engine = Self {
            registry,
            ingest,
            metrics,
        };
        // Failure is logged by the registry; the list just starts empty.
        if let Ok(count) = engine.refresh_devices() {
            info!(count, "dmx engine ready");
        }
        Ok(engine)
    }

    pub fn refresh_devices(&mut self) -> Result<usize> {
        let outcome = self.registry.refresh();
        self.metrics.devices.record_refresh(&outcome);
        Ok(outcome?)
    }

    pub fn devices(&self) -> &[DeviceDescriptor] {
        self.registry.list()
    }

    /// Rows for the host's info table: "Serials" then one serial per adapter.
    pub fn serial_listing(&self) -> Vec<String> {
        serial_listing(self.registry.list())
    }

    pub fn update(&mut self, update: &FrameUpdate<'_>) -> IngestOutcome {
        self.ingest.apply(&self.registry, update)
    }

    pub fn deactivate(&mut self) {
        self.ingest.deactivate();
    }

    pub fn is_active(&self) -> bool {
        self.ingest.is_active()
    }

    pub fn session_state(&self) -> SessionState {
        self.ingest.session().state()
    }

    pub fn transmitter_state(&self) -> TransmitterState {
        self.ingest.transmitter().state()
    }

    pub fn health(&self) -> TransmitHealth {
        self.ingest.transmitter().health()
    }

    pub fn buffer(&self) -> &UniverseBuffer {
        self.ingest.buffer()
    }

    pub fn metrics(&self) -> &MetricsHub {
        &self.metrics
    }
}

impl Drop for DmxEngine {
    fn drop(&mut self) {
        self.ingest.deactivate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EngineError;
    use dmx_transport::MockDriver;
    use std::thread;
    use std::time::{Duration, Instant};

    fn fast() -> FrameTiming {
        FrameTiming {
            frame_interval_us: 2_000,
            break_us: 100,
            mark_after_break_us: 10,
            poll_interval_us: 200,
        }
    }

    fn wait_for_writes(mock: &MockDriver, n: u64) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while mock.write_count() < n && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn end_to_end_activate_and_deactivate() {
        let mock = MockDriver::with_serials(&["ABC123"]);
        let mut engine = DmxEngine::new(Arc::new(mock.clone()), fast()).unwrap();
        assert_eq!(engine.serial_listing(), vec!["Serials", "ABC123"]);

        let channels: Vec<Vec<f32>> = vec![vec![0.0, 128.0], vec![255.0]];
        let out = engine.update(&FrameUpdate {
            active: true,
            serial_number: "ABC123",
            channels: Some(channels.as_slice()),
        });
        assert!(matches!(out, IngestOutcome::Activated));
        assert_eq!(engine.session_state(), SessionState::Open);
        assert_eq!(engine.transmitter_state(), TransmitterState::Running);

        wait_for_writes(&mock, 2);
        let last = mock.last_frame().unwrap();
        assert_eq!(&last[..3], &[0, 128, 255]);

        engine.update(&FrameUpdate {
            active: false,
            serial_number: "ABC123",
            channels: None,
        });
        assert_eq!(engine.session_state(), SessionState::Closed);
        assert_eq!(engine.transmitter_state(), TransmitterState::Stopped);

        let writes = mock.write_count();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(mock.write_count(), writes);
        assert_eq!(engine.metrics().transmit.frames_sent.get(), writes);
        assert_eq!(mock.stats().open_ports, 0);
    }

    #[test]
    fn drop_releases_adapter() {
        let mock = MockDriver::with_serials(&["ABC123"]);
        {
            let mut engine = DmxEngine::new(Arc::new(mock.clone()), fast()).unwrap();
            engine.update(&FrameUpdate {
                active: true,
                serial_number: "ABC123",
                channels: None,
            });
            wait_for_writes(&mock, 1);
        }
        assert_eq!(mock.stats().open_ports, 0);
        let writes = mock.write_count();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(mock.write_count(), writes);
    }

    #[test]
    fn initial_enumeration_failure_is_not_fatal() {
        let mock = MockDriver::with_serials(&["ABC123"]);
        mock.set_fail_enumerate(true);
        let mut engine = DmxEngine::new(Arc::new(mock.clone()), fast()).unwrap();
        assert_eq!(engine.serial_listing(), vec!["Serials"]);

        // Nothing enumerated yet, so the serial is unknown.
        let out = engine.update(&FrameUpdate {
            active: true,
            serial_number: "ABC123",
            channels: None,
        });
        assert!(matches!(out, IngestOutcome::ActivationFailed(_)));

        mock.set_fail_enumerate(false);
        assert_eq!(engine.metrics().devices.enumeration_failures.get(), 1);
        assert_eq!(engine.refresh_devices().unwrap(), 1);
        assert_eq!(engine.metrics().devices.adapters.get(), 1);
        engine.deactivate();
        let out = engine.update(&FrameUpdate {
            active: true,
            serial_number: "ABC123",
            channels: None,
        });
        assert!(matches!(out, IngestOutcome::Activated));
        assert!(engine.is_active());
    }

    #[test]
    fn invalid_timing_is_rejected() {
        let mock = MockDriver::with_serials(&["ABC123"]);
        let timing = FrameTiming {
            break_us: 10,
            ..FrameTiming::default()
        };
        assert!(matches!(
            DmxEngine::new(Arc::new(mock), timing),
            Err(EngineError::InvalidTiming(_))
        ));
    }

    #[test]
    fn deactivate_after_failures_still_reaches_closed() {
        let mock = MockDriver::with_serials(&["ABC123"]);
        let mut engine = DmxEngine::new(Arc::new(mock.clone()), fast()).unwrap();
        mock.set_fail_write(true);
        mock.set_fail_break_on(true);
        engine.update(&FrameUpdate {
            active: true,
            serial_number: "ABC123",
            channels: None,
        });
        thread::sleep(Duration::from_millis(10));
        mock.set_fail_close(true);

        engine.deactivate();
        assert_eq!(engine.session_state(), SessionState::Closed);
        assert_eq!(engine.transmitter_state(), TransmitterState::Stopped);
        assert!(engine.health().failed_cycles > 0);
    }
}
