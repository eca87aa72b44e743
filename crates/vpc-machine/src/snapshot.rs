use super::{Machine, MachineError};
use vpc_audio::{CaptureChannel, DisneyConfig, DisneySoundSource, MixerChannel};
use vpc_devices_input::Int33Mouse;
use vpc_io_snapshot::io::state::{
    IoSnapshot, LoadOptions, SnapshotError, SnapshotReader, SnapshotResult, SnapshotVersion,
    SnapshotWriter,
};
use vpc_time::{Clock, NullClock};

pub const MACHINE_SNAPSHOT_ID: [u8; 4] = *b"VPCM";

const TAG_CLOCK_NS: u16 = 1;
const TAG_DISNEY: u16 = 2;
const TAG_MOUSE: u16 = 3;

impl<M: MixerChannel + 'static> IoSnapshot for Machine<M> {
    const DEVICE_ID: [u8; 4] = MACHINE_SNAPSHOT_ID;
    const DEVICE_VERSION: SnapshotVersion = SnapshotVersion::new(1, 0);

    /// Guest time plus one nested blob per installed device. Pending timers are not stored;
    /// each device records what it needs to re-arm them.
    fn save_state(&self) -> Vec<u8> {
        let mut w = SnapshotWriter::new(Self::DEVICE_ID, Self::DEVICE_VERSION);
        w.field_u64(TAG_CLOCK_NS, self.clock.now_ns());
        if let Some(disney) = &self.disney {
            w.field_bytes(TAG_DISNEY, disney.borrow().save_state());
        }
        if let Some(mouse) = &self.mouse {
            w.field_bytes(TAG_MOUSE, mouse.save_state());
        }
        w.finish()
    }

    fn load_state(&mut self, bytes: &[u8]) -> SnapshotResult<()> {
        self.load_state_with(bytes, LoadOptions::default())
    }

    fn load_state_with(&mut self, bytes: &[u8], options: LoadOptions) -> SnapshotResult<()> {
        let r = SnapshotReader::parse(bytes, Self::DEVICE_ID)?;
        r.ensure_device_major(Self::DEVICE_VERSION.major)?;
        let now_ns = r
            .u64(TAG_CLOCK_NS)?
            .ok_or(SnapshotError::InvalidFieldEncoding("machine clock missing"))?;

        // Dry-run every device blob on a scratch instance so a bad one leaves the machine intact.
        let disney_blob = match (&self.disney, r.bytes(TAG_DISNEY)) {
            (Some(disney), Some(blob)) => {
                let config = DisneyConfig {
                    base_port: disney.borrow().base_port(),
                };
                DisneySoundSource::new(config, NullClock, CaptureChannel::new()).load_state(blob)?;
                Some(blob)
            }
            _ => None,
        };
        let mouse_blob = match (&self.mouse, r.bytes(TAG_MOUSE)) {
            (Some(mouse), Some(blob)) => {
                Int33Mouse::new(*mouse.config(), NullClock).load_state_with(blob, options)?;
                Some(blob)
            }
            _ => None,
        };

        self.clock.set_now_ns(now_ns);
        self.timers.clear();
        if let (Some(disney), Some(blob)) = (&self.disney, disney_blob) {
            disney.borrow_mut().load_state(blob)?;
        }
        if let (Some(mouse), Some(blob)) = (self.mouse.as_mut(), mouse_blob) {
            mouse.load_state_with(blob, options)?;
        }

        if let Some(disney) = &self.disney {
            disney.borrow_mut().resume_timers(&mut self.timers);
        }
        if let Some(mouse) = self.mouse.as_mut() {
            mouse.resume_timers(&mut self.timers);
        }
        Ok(())
    }
}

impl<M: MixerChannel + 'static> Machine<M> {
    /// Restore a [`IoSnapshot::save_state`] blob.
    ///
    /// With `preserve_input` the mouse keeps the buttons, queued events and dispatch progress
    /// recorded in the snapshot; otherwise that transient input is dropped.
    pub fn restore_state(
        &mut self,
        bytes: &[u8],
        preserve_input: bool,
    ) -> Result<(), MachineError> {
        let options = LoadOptions { preserve_input };
        self.load_state_with(bytes, options)?;
        Ok(())
    }
}
