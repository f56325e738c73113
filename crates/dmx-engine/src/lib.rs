//! dmx-engine: continuous DMX512 output for a single universe
//!
//! A producer overwrites the shared [`UniverseBuffer`] at whatever rate its
//! data arrives; a background [`TransmitLoop`] sends break, mark-after-break
//! and the current frame on a fixed cadence. [`FrameIngest`] turns external
//! samples into frames and owns the activation toggle, and [`DmxEngine`]
//! wires everything to a [`dmx_transport::AdapterDriver`].

mod error;
pub use error::{EngineError, Result};

mod universe;
pub use universe::{Universe, UniverseBuffer, CHANNEL_COUNT, NULL_START_CODE};

mod timing;
pub use timing::{FrameTiming, MIN_BREAK, MIN_MARK_AFTER_BREAK};

mod metrics;
pub use metrics::{DeviceMetrics, MetricsHub, TransmitMetrics};

mod transmit;
pub use transmit::{TransmitHealth, TransmitLoop, TransmitterState};

mod ingest;
pub use ingest::{build_frame, sample_to_level, FrameIngest, FrameUpdate, IngestOutcome};

mod listing;
pub use listing::{serial_listing, LISTING_HEADER};

mod engine;
pub use engine::DmxEngine;
