use crate::{
    AdapterDriver, AdapterPort, DeviceRegistry, LineSettings, Result, SessionState,
    TransportError, DMX_FRAME_LEN,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

struct OpenPort {
    serial_number: String,
    port: Box<dyn AdapterPort>,
}

/// Owns at most one open adapter handle.
///
/// All methods take `&self` so the transmit worker can share the session
/// through an `Arc` while the owning thread drives open/close.
pub struct AdapterSession {
    driver: Arc<dyn AdapterDriver>,
    settings: LineSettings,
    port: Mutex<Option<OpenPort>>,
}

impl AdapterSession {
    pub fn new(driver: Arc<dyn AdapterDriver>) -> Self {
        Self::with_settings(driver, LineSettings::DMX512)
    }

    pub fn with_settings(driver: Arc<dyn AdapterDriver>, settings: LineSettings) -> Self {
        Self {
            driver,
            settings,
            port: Mutex::new(None),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<OpenPort>> {
        // The slot holds either a whole handle or none; a panic elsewhere cannot tear it.
        self.port.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> SessionState {
        if self.slot().is_some() {
            SessionState::Open
        } else {
            SessionState::Closed
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Serial number of the open adapter, if any.
    pub fn serial_number(&self) -> Option<String> {
        self.slot().as_ref().map(|p| p.serial_number.clone())
    }

    pub fn settings(&self) -> LineSettings {
        self.settings
    }

    /// Open the adapter with `serial_number` from the registry's last snapshot
    /// and apply the line settings. Any already-open adapter is closed first.
    pub fn open(&self, registry: &DeviceRegistry, serial_number: &str) -> Result<()> {
        self.close();

        let device = registry
            .find(serial_number)
            .ok_or_else(|| TransportError::NotFound(serial_number.to_string()))?;

        let mut port = self.driver.open(device)?;
        if let Err(e) = port.configure(&self.settings) {
            if let Err(close_err) = port.close() {
                warn!(serial = serial_number, error = %close_err, "close after failed configure");
            }
            return Err(e);
        }

        info!(
            serial = serial_number,
            port = %device.port,
            settings = %self.settings,
            "adapter opened"
        );
        *self.slot() = Some(OpenPort {
            serial_number: serial_number.to_string(),
            port,
        });
        Ok(())
    }

    /// Release the adapter. Always leaves the session closed.
    pub fn close(&self) {
        let Some(mut open) = self.slot().take() else {
            return;
        };
        match open.port.close() {
            Ok(()) => info!(serial = %open.serial_number, "adapter closed"),
            Err(e) => {
                warn!(serial = %open.serial_number, error = %e, "adapter close reported an error")
            }
        }
    }

    pub fn assert_break(&self) -> Result<()> {
        self.with_port(|p| p.set_break(true))
    }

    pub fn clear_break(&self) -> Result<()> {
        self.with_port(|p| p.set_break(false))
    }

    /// Write one complete frame. A short write is reported as a driver error.
    pub fn write_frame(&self, frame: &[u8; DMX_FRAME_LEN]) -> Result<()> {
        let written = self.with_port(|p| p.write(frame))?;
        if written != DMX_FRAME_LEN {
            return Err(TransportError::driver(
                "write",
                format!("short write: {written} of {DMX_FRAME_LEN} bytes"),
            ));
        }
        debug!(bytes = written, "frame written");
        Ok(())
    }

    fn with_port<T>(&self, f: impl FnOnce(&mut dyn AdapterPort) -> Result<T>) -> Result<T> {
        let mut slot = self.slot();
        let open = slot.as_mut().ok_or(TransportError::NotOpen)?;
        f(open.port.as_mut())
    }
}

impl Drop for AdapterSession {
    fn drop(&mut self) {
        self.close();
    }
}
