use crate::{
    AdapterDriver, AdapterPort, DataBits, DeviceDescriptor, FlowControl, LineSettings, Parity,
    Result, StopBits, TransportError, DMX_BAUD,
};
use serialport::{SerialPort, SerialPortType};
use std::io::Write;
use std::time::Duration;
use tracing::debug;

// serialport needs a finite write timeout; one frame takes ~23 ms at 250k 8N2.
const IO_TIMEOUT: Duration = Duration::from_secs(1);

/// USB-to-serial adapters (FTDI and similar) through the `serialport` crate.
///
/// Only USB ports that report a serial number are listed, since the serial
/// number is how adapters are selected.
#[derive(Clone, Copy, Debug, Default)]
pub struct SerialDriver;

impl SerialDriver {
    pub fn new() -> Self {
        Self
    }
}

impl AdapterDriver for SerialDriver {
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>> {
        let ports =
            serialport::available_ports().map_err(|e| TransportError::Enumeration(e.to_string()))?;
        let mut out = Vec::new();
        for p in ports {
            match p.port_type {
                SerialPortType::UsbPort(usb) => {
                    let Some(serial_number) = usb.serial_number else {
                        debug!(port = %p.port_name, "skipping USB port without serial number");
                        continue;
                    };
                    let description = match (usb.manufacturer, usb.product) {
                        (Some(maker), Some(product)) => Some(format!("{maker} {product}")),
                        (maker, product) => maker.or(product),
                    };
                    out.push(DeviceDescriptor {
                        serial_number,
                        port: p.port_name,
                        description,
                    });
                }
                _ => {
                    // Not selectable by serial number
                }
            }
        }
        Ok(out)
    }

    fn open(&self, device: &DeviceDescriptor) -> Result<Box<dyn AdapterPort>> {
        let port = serialport::new(&device.port, DMX_BAUD)
            .timeout(IO_TIMEOUT)
            .open()
            .map_err(|e| TransportError::driver("open", format!("{}: {e}", device.port)))?;
        Ok(Box::new(SerialAdapter { port: Some(port) }))
    }
}

struct SerialAdapter {
    port: Option<Box<dyn SerialPort>>,
}

impl SerialAdapter {
    fn port(&mut self, op: &'static str) -> Result<&mut Box<dyn SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| TransportError::driver(op, "port already closed"))
    }
}

impl AdapterPort for SerialAdapter {
    fn configure(&mut self, settings: &LineSettings) -> Result<()> {
        let port = self.port("configure")?;
        let cfg = |e: serialport::Error| TransportError::driver("configure", e.to_string());
        port.set_baud_rate(settings.baud_rate).map_err(cfg)?;
        port.set_data_bits(match settings.data_bits {
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        })
        .map_err(cfg)?;
        port.set_stop_bits(match settings.stop_bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        })
        .map_err(cfg)?;
        port.set_parity(match settings.parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        })
        .map_err(cfg)?;
        port.set_flow_control(match settings.flow_control {
            FlowControl::None => serialport::FlowControl::None,
            FlowControl::Software => serialport::FlowControl::Software,
            FlowControl::Hardware => serialport::FlowControl::Hardware,
        })
        .map_err(cfg)?;
        Ok(())
    }

    fn set_break(&mut self, on: bool) -> Result<()> {
        if on {
            let port = self.port("set break")?;
            port.set_break()
                .map_err(|e| TransportError::driver("set break", e.to_string()))
        } else {
            let port = self.port("clear break")?;
            port.clear_break()
                .map_err(|e| TransportError::driver("clear break", e.to_string()))
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        let port = self.port("write")?;
        let n = port
            .write(bytes)
            .map_err(|e| TransportError::driver("write", e.to_string()))?;
        port.flush()
            .map_err(|e| TransportError::driver("write", e.to_string()))?;
        Ok(n)
    }

    fn close(&mut self) -> Result<()> {
        // Dropping the handle closes the OS port.
        drop(self.port.take());
        Ok(())
    }
}
