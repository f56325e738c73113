use crate::{DeviceDescriptor, LineSettings, Result};

/// Entry point of a serial adapter backend.
pub trait AdapterDriver: Send + Sync {
    /// List the adapters currently attached.
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>>;

    /// Open one adapter. The returned port is not yet configured.
    fn open(&self, device: &DeviceDescriptor) -> Result<Box<dyn AdapterPort>>;
}

/// An open adapter handle. Blocking; no timeouts are imposed on any call.
pub trait AdapterPort: Send {
    fn configure(&mut self, settings: &LineSettings) -> Result<()>;

    /// Drive the break (line low) condition on or off.
    fn set_break(&mut self, on: bool) -> Result<()>;

    /// Write bytes, returning how many the driver accepted.
    fn write(&mut self, bytes: &[u8]) -> Result<usize>;

    /// Release the handle. Called at most once.
    fn close(&mut self) -> Result<()>;
}
