use dmx_transport::DMX_FRAME_LEN;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub const CHANNEL_COUNT: usize = DMX_FRAME_LEN - 1;
/// Start code for standard dimmer/lighting data.
pub const NULL_START_CODE: u8 = 0x00;

/// One DMX512 frame: start code followed by 512 channel levels.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Universe([u8; DMX_FRAME_LEN]);

impl Universe {
    /// A blackout frame with the null start code.
    pub fn new() -> Self {
        Self([0u8; DMX_FRAME_LEN])
    }

    pub fn from_bytes(bytes: [u8; DMX_FRAME_LEN]) -> Self {
        Self(bytes)
    }

    pub fn start_code(&self) -> u8 {
        self.0[0]
    }

    /// Level of a 1-based channel (1..=512).
    pub fn channel(&self, channel: usize) -> Option<u8> {
        if (1..=CHANNEL_COUNT).contains(&channel) {
            Some(self.0[channel])
        } else {
            None
        }
    }

    /// Set a 1-based channel. Returns false if the channel is out of range.
    pub fn set_channel(&mut self, channel: usize, level: u8) -> bool {
        if (1..=CHANNEL_COUNT).contains(&channel) {
            self.0[channel] = level;
            true
        } else {
            false
        }
    }

    /// The 512 channel levels without the start code.
    pub fn levels(&self) -> &[u8] {
        &self.0[1..]
    }

    pub fn as_bytes(&self) -> &[u8; DMX_FRAME_LEN] {
        &self.0
    }
}

impl Default for Universe {
    fn default() -> Self {
        Self::new()
    }
}

/// The single frame shared between the ingest side and the transmit worker.
///
/// Cloning shares the same underlying frame.
#[derive(Clone, Debug, Default)]
pub struct UniverseBuffer {
    inner: Arc<Mutex<Universe>>,
}

impl UniverseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Universe> {
        // Frames are replaced by a single copy, so a poisoned lock still holds a whole frame.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the whole frame.
    pub fn replace(&self, frame: Universe) {
        *self.lock() = frame;
    }

    pub fn snapshot(&self) -> Universe {
        *self.lock()
    }

    /// Run `f` with the frame locked. Writers block until `f` returns.
    pub fn with_frame<R>(&self, f: impl FnOnce(&Universe) -> R) -> R {
        let guard = self.lock();
        f(&guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_universe_is_blackout() {
        let u = Universe::new();
        assert_eq!(u.as_bytes().len(), 513);
        assert_eq!(u.start_code(), NULL_START_CODE);
        assert!(u.levels().iter().all(|&l| l == 0));
        assert_eq!(u.levels().len(), CHANNEL_COUNT);
    }

    #[test]
    fn channels_are_one_based() {
        let mut u = Universe::new();
        assert!(u.set_channel(1, 10));
        assert!(u.set_channel(512, 20));
        assert!(!u.set_channel(0, 1));
        assert!(!u.set_channel(513, 1));

        assert_eq!(u.as_bytes()[1], 10);
        assert_eq!(u.as_bytes()[512], 20);
        assert_eq!(u.channel(0), None);
        assert_eq!(u.channel(512), Some(20));
        assert_eq!(u.start_code(), 0);
    }

    #[test]
    fn buffer_clones_share_frame() {
        let buf = UniverseBuffer::new();
        let other = buf.clone();
        let mut u = Universe::new();
        u.set_channel(3, 99);

        other.replace(u);
        assert_eq!(buf.snapshot().channel(3), Some(99));
        assert_eq!(buf.with_frame(|f| f.channel(3)), Some(99));
    }
}
