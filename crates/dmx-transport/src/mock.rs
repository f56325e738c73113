use crate::{AdapterDriver, AdapterPort, DeviceDescriptor, LineSettings, Result, TransportError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

const HISTORY: usize = 256;

/// Line-level activity observed by the mock, in order.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MockEvent {
    BreakOn,
    BreakOff,
    Write(usize),
}

/// Counters exposed by [`MockDriver::stats`].
#[derive(Clone, Debug, Default)]
pub struct MockStats {
    pub opens: u32,
    pub closes: u32,
    pub writes: u64,
    pub breaks: u64,
    pub configured: Option<LineSettings>,
    pub open_ports: u32,
}

#[derive(Default)]
struct MockState {
    devices: Vec<DeviceDescriptor>,
    fail_enumerate: bool,
    fail_open: bool,
    fail_configure: bool,
    fail_break_on: bool,
    fail_break_off: bool,
    fail_write: bool,
    fail_close: bool,
    short_write: Option<usize>,
    write_delay: Option<Duration>,
    stats: MockStats,
    frames: VecDeque<Vec<u8>>,
    events: VecDeque<MockEvent>,
}

impl MockState {
    fn push_event(&mut self, ev: MockEvent) {
        if self.events.len() == HISTORY {
            self.events.pop_front();
        }
        self.events.push_back(ev);
    }
}

/// An in-process adapter driver with failure injection.
///
/// Clones share state, so a test can keep one handle while the engine owns another.
#[derive(Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_serials(serials: &[&str]) -> Self {
        let mock = Self::new();
        mock.set_devices(serials);
        mock
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_devices(&self, serials: &[&str]) {
        self.lock().devices = serials
            .iter()
            .enumerate()
            .map(|(i, s)| DeviceDescriptor {
                serial_number: (*s).to_string(),
                port: format!("mock{i}"),
                description: Some("mock adapter".to_string()),
            })
            .collect();
    }

    pub fn set_fail_enumerate(&self, fail: bool) {
        self.lock().fail_enumerate = fail;
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.lock().fail_open = fail;
    }

    pub fn set_fail_configure(&self, fail: bool) {
        self.lock().fail_configure = fail;
    }

    /// Fail `set_break(true)`.
    pub fn set_fail_break_on(&self, fail: bool) {
        self.lock().fail_break_on = fail;
    }

    /// Fail `set_break(false)`, leaving the line held in break.
    pub fn set_fail_break_off(&self, fail: bool) {
        self.lock().fail_break_off = fail;
    }

    pub fn set_fail_write(&self, fail: bool) {
        self.lock().fail_write = fail;
    }

    pub fn set_fail_close(&self, fail: bool) {
        self.lock().fail_close = fail;
    }

    /// Make every write report `n` bytes accepted.
    pub fn set_short_write(&self, n: Option<usize>) {
        self.lock().short_write = n;
    }

    /// Block inside each write for `delay` to simulate a slow adapter.
    pub fn set_write_delay(&self, delay: Option<Duration>) {
        self.lock().write_delay = delay;
    }

    pub fn stats(&self) -> MockStats {
        self.lock().stats.clone()
    }

    pub fn write_count(&self) -> u64 {
        self.lock().stats.writes
    }

    /// Most recent frames written (bounded history, oldest first).
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.lock().frames.iter().cloned().collect()
    }

    pub fn last_frame(&self) -> Option<Vec<u8>> {
        self.lock().frames.back().cloned()
    }

    pub fn events(&self) -> Vec<MockEvent> {
        self.lock().events.iter().copied().collect()
    }
}

impl AdapterDriver for MockDriver {
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>> {
        let st = self.lock();
        if st.fail_enumerate {
            return Err(TransportError::Enumeration("mock enumeration failure".into()));
        }
        Ok(st.devices.clone())
    }

    fn open(&self, device: &DeviceDescriptor) -> Result<Box<dyn AdapterPort>> {
        let mut st = self.lock();
        if st.fail_open {
            return Err(TransportError::driver("open", "mock open failure"));
        }
        st.stats.opens += 1;
        st.stats.open_ports += 1;
        Ok(Box::new(MockPort {
            name: device.port.clone(),
            state: self.state.clone(),
            closed: false,
        }))
    }
}

struct MockPort {
    name: String,
    state: Arc<Mutex<MockState>>,
    closed: bool,
}

impl MockPort {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AdapterPort for MockPort {
    fn configure(&mut self, settings: &LineSettings) -> Result<()> {
        let mut st = self.lock();
        if st.fail_configure {
            return Err(TransportError::driver("configure", "mock configure failure"));
        }
        st.stats.configured = Some(*settings);
        Ok(())
    }

    fn set_break(&mut self, on: bool) -> Result<()> {
        let mut st = self.lock();
        if on && st.fail_break_on {
            return Err(TransportError::driver("set break", "mock break failure"));
        }
        if !on && st.fail_break_off {
            return Err(TransportError::driver("clear break", "mock break failure"));
        }
        if on {
            st.stats.breaks += 1;
            st.push_event(MockEvent::BreakOn);
        } else {
            st.push_event(MockEvent::BreakOff);
        }
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        let delay = self.lock().write_delay;
        if let Some(d) = delay {
            thread::sleep(d);
        }
        let mut st = self.lock();
        if st.fail_write {
            let detail = format!("mock write failure on {}", self.name);
            return Err(TransportError::driver("write", detail));
        }
        let n = st.short_write.unwrap_or(bytes.len()).min(bytes.len());
        st.stats.writes += 1;
        if st.frames.len() == HISTORY {
            st.frames.pop_front();
        }
        st.frames.push_back(bytes[..n].to_vec());
        st.push_event(MockEvent::Write(n));
        Ok(n)
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut st = self.lock();
        st.stats.closes += 1;
        st.stats.open_ports = st.stats.open_ports.saturating_sub(1);
        if st.fail_close {
            return Err(TransportError::driver("close", "mock close failure"));
        }
        Ok(())
    }
}

impl Drop for MockPort {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
