//! Deterministic snapshot encoding for I/O devices.
//!
//! The snapshot format uses a small tag-length-value (TLV) encoding to provide:
//! - deterministic byte output (canonical tag ordering)
//! - forward compatibility (unknown tags are skipped)
//! - explicit versioning (major/minor) at both format and device level

mod version;

pub use version::{
    codec, SnapshotError, SnapshotHeader, SnapshotReader, SnapshotResult, SnapshotVersion,
    SnapshotWriter, SNAPSHOT_FORMAT_VERSION, SNAPSHOT_MAGIC,
};

/// Restore-time options.
///
/// Devices that track host input (pointer buttons, queued events) normally drop that transient
/// state on restore so the guest does not observe input the host no longer holds.
/// `preserve_input` keeps it and only re-arms the device's pending timers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
    pub preserve_input: bool,
}

impl LoadOptions {
    pub const fn preserve_input() -> Self {
        Self {
            preserve_input: true,
        }
    }
}

/// Snapshotting contract for emulated I/O devices.
///
/// Implementations must keep `DEVICE_ID` stable forever and only perform forward-compatible
/// additions within the same major version by adding new TLV fields.
pub trait IoSnapshot {
    const DEVICE_ID: [u8; 4];
    const DEVICE_VERSION: SnapshotVersion;

    fn save_state(&self) -> Vec<u8>;
    fn load_state(&mut self, bytes: &[u8]) -> SnapshotResult<()>;

    /// Restore with explicit options. Devices without transient input state ignore them.
    fn load_state_with(&mut self, bytes: &[u8], options: LoadOptions) -> SnapshotResult<()> {
        let _ = options;
        self.load_state(bytes)
    }
}
