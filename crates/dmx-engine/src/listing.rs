use dmx_transport::DeviceDescriptor;

pub const LISTING_HEADER: &str = "Serials";

/// One-column table for host introspection: a header row, then one serial per device.
pub fn serial_listing(devices: &[DeviceDescriptor]) -> Vec<String> {
    let mut rows = Vec::with_capacity(devices.len() + 1);
    rows.push(LISTING_HEADER.to_string());
    rows.extend(devices.iter().map(|d| d.serial_number.clone()));
    rows
}
