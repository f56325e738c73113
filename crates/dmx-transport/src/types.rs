use core::fmt;

/// Start code followed by 512 slots.
pub const DMX_FRAME_LEN: usize = 513;
pub const DMX_BAUD: u32 = 250_000;

/// An enumerated serial adapter. The serial number is the only stable identity;
/// list positions change between enumerations.
#[derive(Clone, Debug)]
pub struct DeviceDescriptor {
    pub serial_number: String,
    /// OS port path/name used to open the device (e.g. `/dev/ttyUSB0`, `COM3`).
    pub port: String,
    pub description: Option<String>,
}

impl DeviceDescriptor {
    pub fn new(serial_number: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            serial_number: serial_number.into(),
            port: port.into(),
            description: None,
        }
    }

    pub fn matches(&self, serial_number: &str) -> bool {
        self.serial_number == serial_number
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.description {
            Some(d) => write!(f, "{} ({}, {d})", self.serial_number, self.port),
            None => write!(f, "{} ({})", self.serial_number, self.port),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DataBits {
    Seven,
    Eight,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StopBits {
    One,
    Two,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Parity {
    None,
    Odd,
    Even,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FlowControl {
    None,
    Software,
    Hardware,
}

/// Serial framing applied when an adapter is opened.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LineSettings {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
    pub flow_control: FlowControl,
}

impl LineSettings {
    /// DMX512 framing: 250k baud, 8N2, no flow control.
    pub const DMX512: LineSettings = LineSettings {
        baud_rate: DMX_BAUD,
        data_bits: DataBits::Eight,
        stop_bits: StopBits::Two,
        parity: Parity::None,
        flow_control: FlowControl::None,
    };
}

impl fmt::Display for LineSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = match self.data_bits {
            DataBits::Seven => '7',
            DataBits::Eight => '8',
        };
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
        };
        let stop = match self.stop_bits {
            StopBits::One => '1',
            StopBits::Two => '2',
        };
        write!(f, "{} {data}{parity}{stop}", self.baud_rate)
    }
}

/// Lifecycle of an [`AdapterSession`](crate::AdapterSession).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    Closed,
    Open,
}
