use crate::{AdapterDriver, DeviceDescriptor, Result};
use std::sync::Arc;
use tracing::{debug, warn};

/// Snapshot of the attached adapters, refreshed explicitly.
pub struct DeviceRegistry {
    driver: Arc<dyn AdapterDriver>,
    devices: Vec<DeviceDescriptor>,
}

impl DeviceRegistry {
    /// Creates an empty registry. Nothing is enumerated until [`refresh`](Self::refresh).
    pub fn new(driver: Arc<dyn AdapterDriver>) -> Self {
        Self {
            driver,
            devices: Vec::new(),
        }
    }

    /// Re-enumerate adapters and return how many were found.
    ///
    /// On failure the previous snapshot is kept as-is.
    pub fn refresh(&mut self) -> Result<usize> {
        match self.driver.enumerate() {
            Ok(devices) => {
                debug!(count = devices.len(), "enumerated serial adapters");
                self.devices = devices;
                Ok(self.devices.len())
            }
            Err(e) => {
                warn!(error = %e, kept = self.devices.len(), "adapter enumeration failed");
                Err(e)
            }
        }
    }

    pub fn list(&self) -> &[DeviceDescriptor] {
        &self.devices
    }

    pub fn find(&self, serial_number: &str) -> Option<&DeviceDescriptor> {
        self.devices.iter().find(|d| d.matches(serial_number))
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::{MockDriver, TransportError};

    #[test]
    fn refresh_lists_serials_in_driver_order() {
        let mock = MockDriver::with_serials(&["ABC123", "XYZ789"]);
        let mut reg = DeviceRegistry::new(Arc::new(mock));
        assert!(reg.list().is_empty());

        assert_eq!(reg.refresh().unwrap(), 2);
        let serials: Vec<_> = reg.list().iter().map(|d| d.serial_number.as_str()).collect();
        assert_eq!(serials, vec!["ABC123", "XYZ789"]);
        assert!(reg.find("XYZ789").is_some());
        assert!(reg.find("xyz789").is_none());
    }

    #[test]
    fn failed_refresh_keeps_previous_list() {
        let mock = MockDriver::with_serials(&["ABC123"]);
        let mut reg = DeviceRegistry::new(Arc::new(mock.clone()));
        reg.refresh().unwrap();

        mock.set_fail_enumerate(true);
        let err = reg.refresh().unwrap_err();
        assert!(matches!(err, TransportError::Enumeration(_)));
        assert_eq!(reg.list().len(), 1);
        assert_eq!(reg.list()[0].serial_number, "ABC123");
    }

    #[test]
    fn empty_enumeration_clears_list() {
        let mock = MockDriver::with_serials(&["ABC123"]);
        let mut reg = DeviceRegistry::new(Arc::new(mock.clone()));
        reg.refresh().unwrap();

        mock.set_devices(&[]);
        assert_eq!(reg.refresh().unwrap(), 0);
        assert!(reg.list().is_empty());
    }

    #[test]
    fn refresh_tracks_reordered_devices() {
        let mock = MockDriver::with_serials(&["A", "B"]);
        let mut reg = DeviceRegistry::new(Arc::new(mock.clone()));
        reg.refresh().unwrap();

        mock.set_devices(&["B", "C", "A"]);
        reg.refresh().unwrap();
        assert_eq!(reg.list()[0].serial_number, "B");
        assert!(reg.find("A").is_some());
        assert!(reg.find("C").is_some());
    }
}
