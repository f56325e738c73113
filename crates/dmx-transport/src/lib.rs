//! dmx-transport: serial adapter plumbing for DMX512 output
//!
//! This crate provides the driver traits, line settings and the two stateful
//! pieces that sit directly on top of a driver: the [`DeviceRegistry`] of
//! attached adapters and the [`AdapterSession`] that owns one open adapter.
//! The default build enables a `mock` backend so everything compiles and
//! tests without hardware; the `serial` feature adds a `serialport` backend.

mod types;
pub use types::{
    DataBits, DeviceDescriptor, FlowControl, LineSettings, Parity, SessionState, StopBits,
    DMX_BAUD, DMX_FRAME_LEN,
};

mod error;
pub use error::{Result, TransportError};

mod traits;
pub use traits::{AdapterDriver, AdapterPort};

mod registry;
pub use registry::DeviceRegistry;

mod session;
pub use session::AdapterSession;

#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "mock")]
pub use mock::{MockDriver, MockEvent, MockStats};

#[cfg(feature = "serial")]
mod serial;

#[cfg(feature = "serial")]
pub use serial::SerialDriver;
