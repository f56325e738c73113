use crate::{EngineError, FrameTiming, Result, TransmitMetrics, UniverseBuffer};
use dmx_transport::AdapterSession;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransmitterState {
    Stopped,
    Running,
}

/// Rolling view of how the transmit worker is doing.
#[derive(Clone, Debug, Default)]
pub struct TransmitHealth {
    pub frames_sent: u64,
    pub failed_cycles: u64,
    pub consecutive_failures: u32,
    pub last_frame_at: Option<OffsetDateTime>,
    pub last_error: Option<String>,
}

impl TransmitHealth {
    pub fn healthy(&self) -> bool {
        self.consecutive_failures == 0
    }
}

struct Worker {
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Background sender running break, mark-after-break and data on a fixed cadence.
pub struct TransmitLoop {
    session: Arc<AdapterSession>,
    buffer: UniverseBuffer,
    timing: FrameTiming,
    metrics: Option<TransmitMetrics>,
    health: Arc<Mutex<TransmitHealth>>,
    worker: Option<Worker>,
}

impl TransmitLoop {
    pub fn new(session: Arc<AdapterSession>, buffer: UniverseBuffer, timing: FrameTiming) -> Self {
        Self {
            session,
            buffer,
            timing,
            metrics: None,
            health: Arc::new(Mutex::new(TransmitHealth::default())),
            worker: None,
        }
    }

    pub fn with_metrics(mut self, metrics: TransmitMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn state(&self) -> TransmitterState {
        if self.worker.is_some() {
            TransmitterState::Running
        } else {
            TransmitterState::Stopped
        }
    }

    pub fn health(&self) -> TransmitHealth {
        lock_health(&self.health).clone()
    }

    /// Spawn the worker. No-op if already running.
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        if !self.session.is_open() {
            return Err(EngineError::SessionClosed);
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let cycle = Cycle {
            session: self.session.clone(),
            buffer: self.buffer.clone(),
            timing: self.timing,
            metrics: self.metrics.clone(),
            health: self.health.clone(),
        };
        let flag = cancel.clone();
        let handle = thread::Builder::new()
            .name("dmx-transmit".to_string())
            .spawn(move || cycle.run(&flag))
            .map_err(|e| EngineError::Spawn(e.to_string()))?;

        info!(
            interval_us = self.timing.frame_interval_us,
            break_us = self.timing.break_us,
            mab_us = self.timing.mark_after_break_us,
            "transmitter started"
        );
        self.worker = Some(Worker { cancel, handle });
        Ok(())
    }

    /// Signal the worker and wait for it to exit. Once this returns no
    /// further writes happen. Safe to call when not running.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        debug!("stopping transmitter");
        worker.cancel.store(true, Ordering::Release);
        if worker.handle.join().is_err() {
            error!("transmit worker panicked");
        }
        info!("transmitter stopped");
    }
}

impl Drop for TransmitLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock_health(health: &Mutex<TransmitHealth>) -> MutexGuard<'_, TransmitHealth> {
    health.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Everything the worker thread owns.
struct Cycle {
    session: Arc<AdapterSession>,
    buffer: UniverseBuffer,
    timing: FrameTiming,
    metrics: Option<TransmitMetrics>,
    health: Arc<Mutex<TransmitHealth>>,
}

impl Cycle {
    fn run(&self, cancel: &AtomicBool) {
        let interval = self.timing.frame_interval();
        let poll = self.timing.poll_interval();
        let mut last_start: Option<Instant> = None;

        while !cancel.load(Ordering::Acquire) {
            let due = last_start.map_or(true, |t| t.elapsed() >= interval);
            if due {
                last_start = Some(Instant::now());
                let outcome = self.send_frame();
                self.record(outcome);
            }
            thread::sleep(poll);
        }
    }

    /// One break / mark-after-break / data sequence. Stops at the first failure.
    fn send_frame(&self) -> dmx_transport::Result<()> {
        self.session.assert_break()?;
        thread::sleep(self.timing.break_duration());
        self.session.clear_break()?;
        thread::sleep(self.timing.mark_after_break());
        // Held across the write so the frame cannot change mid-transmission.
        self.buffer
            .with_frame(|frame| self.session.write_frame(frame.as_bytes()))
    }

    fn record(&self, outcome: dmx_transport::Result<()>) {
        let mut health = lock_health(&self.health);
        match outcome {
            Ok(()) => {
                if health.consecutive_failures > 0 {
                    info!(
                        failed_cycles = health.consecutive_failures,
                        "transmission recovered"
                    );
                }
                health.frames_sent += 1;
                health.consecutive_failures = 0;
                health.last_frame_at = Some(OffsetDateTime::now_utc());
                health.last_error = None;
                if let Some(m) = &self.metrics {
                    m.record_frame();
                }
            }
            Err(e) => {
                health.failed_cycles += 1;
                health.consecutive_failures = health.consecutive_failures.saturating_add(1);
                if health.consecutive_failures == 1 {
                    warn!(error = %e, "transmit cycle failed");
                } else {
                    debug!(
                        error = %e,
                        streak = health.consecutive_failures,
                        "transmit cycle failed"
                    );
                }
                health.last_error = Some(e.to_string());
                if let Some(m) = &self.metrics {
                    m.record_failure(health.consecutive_failures);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Universe;
    use dmx_transport::{AdapterDriver, DeviceRegistry, MockDriver, MockEvent, DMX_FRAME_LEN};
    use std::time::Duration;

    fn fast_timing() -> FrameTiming {
        FrameTiming {
            frame_interval_us: 2_000,
            break_us: 100,
            mark_after_break_us: 10,
            poll_interval_us: 200,
        }
    }

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        cond()
    }

    fn open_session(mock: &MockDriver) -> Arc<AdapterSession> {
        let driver: Arc<dyn AdapterDriver> = Arc::new(mock.clone());
        let mut reg = DeviceRegistry::new(driver.clone());
        reg.refresh().unwrap();
        let session = Arc::new(AdapterSession::new(driver));
        session.open(&reg, "ABC123").unwrap();
        session
    }

    #[test]
    fn stop_without_start_is_noop() {
        let mock = MockDriver::with_serials(&["ABC123"]);
        let session = open_session(&mock);
        let mut tx = TransmitLoop::new(session, UniverseBuffer::new(), fast_timing());

        tx.stop();
        tx.stop();
        assert_eq!(tx.state(), TransmitterState::Stopped);
        assert_eq!(mock.write_count(), 0);
    }

    #[test]
    fn start_requires_open_session() {
        let mock = MockDriver::with_serials(&["ABC123"]);
        let session = Arc::new(AdapterSession::new(Arc::new(mock)));
        let mut tx = TransmitLoop::new(session, UniverseBuffer::new(), fast_timing());

        assert!(matches!(tx.start(), Err(EngineError::SessionClosed)));
        assert_eq!(tx.state(), TransmitterState::Stopped);
    }

    #[test]
    fn no_writes_after_stop() {
        let mock = MockDriver::with_serials(&["ABC123"]);
        let session = open_session(&mock);
        let mut tx = TransmitLoop::new(session.clone(), UniverseBuffer::new(), fast_timing());

        tx.start().unwrap();
        tx.start().unwrap();
        assert_eq!(tx.state(), TransmitterState::Running);
        assert!(wait_until(Duration::from_secs(2), || mock.write_count() >= 3));

        tx.stop();
        session.close();
        let after_stop = mock.write_count();
        thread::sleep(Duration::from_millis(30));
        assert_eq!(mock.write_count(), after_stop);
        assert_eq!(tx.state(), TransmitterState::Stopped);
        assert_eq!(tx.health().frames_sent, after_stop);
    }

    #[test]
    fn cycle_is_break_then_mark_then_full_frame() {
        let mock = MockDriver::with_serials(&["ABC123"]);
        let session = open_session(&mock);
        let mut tx = TransmitLoop::new(session, UniverseBuffer::new(), fast_timing());

        tx.start().unwrap();
        assert!(wait_until(Duration::from_secs(2), || mock.write_count() >= 2));
        tx.stop();

        let events = mock.events();
        assert_eq!(
            &events[..3],
            &[
                MockEvent::BreakOn,
                MockEvent::BreakOff,
                MockEvent::Write(DMX_FRAME_LEN)
            ]
        );
        for chunk in events.chunks_exact(3) {
            assert_eq!(chunk[0], MockEvent::BreakOn);
            assert_eq!(chunk[1], MockEvent::BreakOff);
        }
    }

    #[test]
    fn cadence_spaces_frames_by_interval() {
        let mock = MockDriver::with_serials(&["ABC123"]);
        let session = open_session(&mock);
        let timing = FrameTiming {
            frame_interval_us: 20_000,
            ..fast_timing()
        };
        let mut tx = TransmitLoop::new(session, UniverseBuffer::new(), timing);

        tx.start().unwrap();
        thread::sleep(Duration::from_millis(110));
        tx.stop();

        // First frame goes out immediately, then at most one per 20 ms.
        let writes = mock.write_count();
        assert!(writes >= 2, "too few frames: {writes}");
        assert!(writes <= 7, "cadence not honoured: {writes}");
    }

    #[test]
    fn write_failures_keep_running_and_recover() {
        let mock = MockDriver::with_serials(&["ABC123"]);
        let session = open_session(&mock);
        let metrics = crate::MetricsHub::new().unwrap();
        let mut tx = TransmitLoop::new(session, UniverseBuffer::new(), fast_timing())
            .with_metrics(metrics.transmit.clone());

        mock.set_fail_write(true);
        tx.start().unwrap();
        assert!(wait_until(Duration::from_secs(2), || {
            tx.health().consecutive_failures >= 3
        }));
        assert_eq!(tx.state(), TransmitterState::Running);
        assert!(!tx.health().healthy());
        assert!(tx.health().last_error.is_some());

        mock.set_fail_write(false);
        assert!(wait_until(Duration::from_secs(2), || tx.health().frames_sent >= 1));
        assert!(wait_until(Duration::from_secs(2), || tx.health().healthy()));
        tx.stop();

        assert!(metrics.transmit.cycle_failures.get() >= 3);
        assert!(metrics.transmit.frames_sent.get() >= 1);
        assert_eq!(metrics.transmit.failure_streak.get(), 0);
        assert!(tx.health().last_frame_at.is_some());
    }

    #[test]
    fn break_failure_skips_data_for_that_cycle() {
        let mock = MockDriver::with_serials(&["ABC123"]);
        let session = open_session(&mock);
        let mut tx = TransmitLoop::new(session.clone(), UniverseBuffer::new(), fast_timing());

        mock.set_fail_break_on(true);
        tx.start().unwrap();
        assert!(wait_until(Duration::from_secs(2), || tx.health().failed_cycles >= 3));
        tx.stop();

        assert_eq!(mock.write_count(), 0);
        assert!(session.is_open());
    }

    #[test]
    fn clear_break_failure_abandons_cycle() {
        let mock = MockDriver::with_serials(&["ABC123"]);
        let session = open_session(&mock);
        let mut tx = TransmitLoop::new(session.clone(), UniverseBuffer::new(), fast_timing());

        mock.set_fail_break_off(true);
        tx.start().unwrap();
        assert!(wait_until(Duration::from_secs(2), || tx.health().failed_cycles >= 3));
        assert_eq!(tx.state(), TransmitterState::Running);

        // Line went into break every cycle but never back to mark or data.
        let events = mock.events();
        assert!(events.len() >= 3);
        assert!(events.iter().all(|e| *e == MockEvent::BreakOn));
        assert_eq!(mock.write_count(), 0);
        let last_error = tx.health().last_error.unwrap_or_default();
        assert!(last_error.contains("clear break"), "{last_error}");

        mock.set_fail_break_off(false);
        assert!(wait_until(Duration::from_secs(2), || mock.write_count() >= 1));
        tx.stop();
        assert!(tx.health().healthy());
        assert!(session.is_open());
    }

    #[test]
    fn frame_update_waits_for_write_in_flight() {
        let mock = MockDriver::with_serials(&["ABC123"]);
        mock.set_write_delay(Some(Duration::from_millis(200)));
        let session = open_session(&mock);
        let buffer = UniverseBuffer::new();
        let mut tx = TransmitLoop::new(session, buffer.clone(), fast_timing());

        tx.start().unwrap();
        // First cycle starts immediately, so its write is in flight by now.
        thread::sleep(Duration::from_millis(50));
        let began = Instant::now();
        buffer.replace(Universe::from_bytes([7; DMX_FRAME_LEN]));
        let waited = began.elapsed();
        tx.stop();

        assert!(
            waited >= Duration::from_millis(100),
            "update did not wait for the write: {waited:?}"
        );
        let first = &mock.frames()[0];
        assert!(first.iter().all(|&b| b == 0));
    }

    #[test]
    fn transmitted_frames_are_never_torn() {
        let mock = MockDriver::with_serials(&["ABC123"]);
        mock.set_write_delay(Some(Duration::from_millis(2)));
        let session = open_session(&mock);
        let buffer = UniverseBuffer::new();
        let mut tx = TransmitLoop::new(session, buffer.clone(), fast_timing());

        tx.start().unwrap();
        for generation in 1..=60u8 {
            let mut bytes = [generation; DMX_FRAME_LEN];
            bytes[0] = 0;
            buffer.replace(Universe::from_bytes(bytes));
            thread::sleep(Duration::from_micros(700));
        }
        let final_writes = mock.write_count();
        assert!(wait_until(Duration::from_secs(2), || {
            mock.write_count() >= final_writes + 2
        }));
        tx.stop();

        let frames = mock.frames();
        assert!(!frames.is_empty());
        for f in &frames {
            assert_eq!(f.len(), DMX_FRAME_LEN);
            assert_eq!(f[0], 0);
            assert!(f[1..].iter().all(|&b| b == f[1]), "mixed generations in one frame");
        }
        let last = frames.last().unwrap();
        assert!(last[1..].iter().all(|&b| b == 60));
    }
}
