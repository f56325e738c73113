use crate::{EngineError, TransmitLoop, TransmitterState, Universe, UniverseBuffer, CHANNEL_COUNT};
use dmx_transport::{AdapterSession, DeviceRegistry};
use std::sync::Arc;
use tracing::{info, warn};

/// One external update: the activation toggle, the selected adapter and,
/// optionally, fresh channel samples (last sample of each channel counts).
#[derive(Clone, Copy, Debug)]
pub struct FrameUpdate<'a> {
    pub active: bool,
    pub serial_number: &'a str,
    pub channels: Option<&'a [Vec<f32>]>,
}

/// What an update did to the activation state.
#[derive(Debug)]
pub enum IngestOutcome {
    Unchanged,
    Activated,
    ActivationFailed(EngineError),
    Deactivated,
}

/// Map a sample to a channel level: clamp to 0..=255 then truncate. NaN maps to 0.
pub fn sample_to_level(sample: f32) -> u8 {
    sample.clamp(0.0, 255.0) as u8
}

/// Build a frame from per-channel sample sequences. Channels past 512 are
/// ignored; missing or empty channels stay at 0.
pub fn build_frame<C: AsRef<[f32]>>(channels: &[C]) -> Universe {
    let mut frame = Universe::new();
    for (i, samples) in channels.iter().take(CHANNEL_COUNT).enumerate() {
        if let Some(&last) = samples.as_ref().last() {
            frame.set_channel(i + 1, sample_to_level(last));
        }
    }
    frame
}

/// Turns external updates into frames and owns the on/off toggle that
/// opens the adapter and runs the transmitter.
pub struct FrameIngest {
    session: Arc<AdapterSession>,
    transmitter: TransmitLoop,
    buffer: UniverseBuffer,
    toggle: bool,
    target: Option<String>,
}

impl FrameIngest {
    pub fn new(
        session: Arc<AdapterSession>,
        transmitter: TransmitLoop,
        buffer: UniverseBuffer,
    ) -> Self {
        Self {
            session,
            transmitter,
            buffer,
            toggle: false,
            target: None,
        }
    }

    pub fn apply(&mut self, registry: &DeviceRegistry, update: &FrameUpdate<'_>) -> IngestOutcome {
        // Frame first, so the first cycle after activation already carries it.
        if let Some(channels) = update.channels {
            self.buffer.replace(build_frame(channels));
        }

        match (self.toggle, update.active) {
            (false, true) => {
                self.toggle = true;
                self.activate(registry, update.serial_number)
            }
            (true, false) => {
                self.deactivate();
                IngestOutcome::Deactivated
            }
            (true, true) if self.target.as_deref() != Some(update.serial_number) => {
                info!(
                    from = self.target.as_deref().unwrap_or(""),
                    to = update.serial_number,
                    "adapter selection changed"
                );
                self.shutdown();
                self.activate(registry, update.serial_number)
            }
            _ => IngestOutcome::Unchanged,
        }
    }

    /// Stop transmitting and release the adapter, then wait for the next
    /// off-to-on toggle.
    pub fn deactivate(&mut self) {
        self.toggle = false;
        self.target = None;
        self.shutdown();
    }

    pub fn is_active(&self) -> bool {
        self.transmitter.state() == TransmitterState::Running
    }

    pub fn session(&self) -> &AdapterSession {
        &self.session
    }

    pub fn transmitter(&self) -> &TransmitLoop {
        &self.transmitter
    }

    pub fn buffer(&self) -> &UniverseBuffer {
        &self.buffer
    }

    fn activate(&mut self, registry: &DeviceRegistry, serial_number: &str) -> IngestOutcome {
        self.target = Some(serial_number.to_string());
        if let Err(e) = self.session.open(registry, serial_number) {
            warn!(serial = serial_number, error = %e, "activation failed");
            return IngestOutcome::ActivationFailed(e.into());
        }
        if let Err(e) = self.transmitter.start() {
            warn!(serial = serial_number, error = %e, "activation failed");
            self.session.close();
            return IngestOutcome::ActivationFailed(e);
        }
        IngestOutcome::Activated
    }

    // Stop strictly before close: no write may race the handle teardown.
    fn shutdown(&mut self) {
        self.transmitter.stop();
        self.session.close();
    }
}
