use super::channel::{ChannelId, DacChannel, DAC_CAPACITY};
use super::{DisneySoundSource, DisneyState, DisneyTimer, DISABLE_DELAY_NS};
use crate::sink::MixerChannel;
use vpc_io_snapshot::io::state::codec::{Decoder, Encoder};
use vpc_io_snapshot::io::state::{
    IoSnapshot, SnapshotError, SnapshotReader, SnapshotResult, SnapshotVersion, SnapshotWriter,
};
use vpc_time::{Clock, TimerQueue};

const LEADER_NONE: u8 = 0xFF;

fn encode_dac(ch: &DacChannel) -> Vec<u8> {
    Encoder::new()
        .u32(ch.len() as u32)
        .bytes(ch.raw_buffer())
        .u64(ch.speedcheck_sum.to_bits())
        .u64(ch.speedcheck_last.to_bits())
        .bool(ch.speedcheck_failed)
        .bool(ch.speedcheck_init)
        .finish()
}

fn decode_dac(bytes: &[u8]) -> SnapshotResult<DacChannel> {
    let mut d = Decoder::new(bytes);
    let used = d.u32()? as usize;
    if used > DAC_CAPACITY {
        return Err(SnapshotError::InvalidFieldEncoding("disney dac fill level"));
    }
    let buffer: [u8; DAC_CAPACITY] = d
        .bytes(DAC_CAPACITY)?
        .try_into()
        .map_err(|_| SnapshotError::InvalidFieldEncoding("disney dac buffer"))?;

    let mut ch = DacChannel::default();
    ch.restore_raw(buffer, used);
    ch.speedcheck_sum = f64::from_bits(d.u64()?);
    ch.speedcheck_last = f64::from_bits(d.u64()?);
    ch.speedcheck_failed = d.bool()?;
    ch.speedcheck_init = d.bool()?;
    d.finish()?;
    Ok(ch)
}

impl<C: Clock, M: MixerChannel> IoSnapshot for DisneySoundSource<C, M> {
    const DEVICE_ID: [u8; 4] = *b"DSNY";
    const DEVICE_VERSION: SnapshotVersion = SnapshotVersion::new(1, 0);

    fn save_state(&self) -> Vec<u8> {
        const TAG_DATA: u16 = 1;
        const TAG_STATUS: u16 = 2;
        const TAG_CONTROL: u16 = 3;
        const TAG_DAC0: u16 = 4;
        const TAG_DAC1: u16 = 5;
        const TAG_LAST_USED_MS: u16 = 6;
        const TAG_STEREO: u16 = 7;
        const TAG_LEADER: u16 = 8;
        const TAG_STATE: u16 = 9;
        const TAG_INTERFACE_DET: u16 = 10;
        const TAG_INTERFACE_DET_EXT: u16 = 11;
        const TAG_RATE_HZ: u16 = 12;
        const TAG_DISABLE_PENDING: u16 = 13;

        let mut w = SnapshotWriter::new(Self::DEVICE_ID, Self::DEVICE_VERSION);
        w.field_u8(TAG_DATA, self.data);
        w.field_u8(TAG_STATUS, self.status);
        w.field_u8(TAG_CONTROL, self.control);
        w.field_bytes(TAG_DAC0, encode_dac(&self.dac[0]));
        w.field_bytes(TAG_DAC1, encode_dac(&self.dac[1]));
        w.field_u64(TAG_LAST_USED_MS, self.last_used_ms);
        w.field_bool(TAG_STEREO, self.stereo);
        // The leader is a reference to one of the two DACs; store which one.
        w.field_u8(
            TAG_LEADER,
            self.leader.map_or(LEADER_NONE, |id| id.index() as u8),
        );
        w.field_u8(TAG_STATE, self.state.to_u8());
        w.field_u32(TAG_INTERFACE_DET, self.interface_det);
        w.field_u32(TAG_INTERFACE_DET_EXT, self.interface_det_ext);
        w.field_u32(TAG_RATE_HZ, self.rate_hz);
        w.field_bool(
            TAG_DISABLE_PENDING,
            self.pending_disable.is_some() || self.rearm_disable,
        );
        w.finish()
    }

    fn load_state(&mut self, bytes: &[u8]) -> SnapshotResult<()> {
        const TAG_DATA: u16 = 1;
        const TAG_STATUS: u16 = 2;
        const TAG_CONTROL: u16 = 3;
        const TAG_DAC0: u16 = 4;
        const TAG_DAC1: u16 = 5;
        const TAG_LAST_USED_MS: u16 = 6;
        const TAG_STEREO: u16 = 7;
        const TAG_LEADER: u16 = 8;
        const TAG_STATE: u16 = 9;
        const TAG_INTERFACE_DET: u16 = 10;
        const TAG_INTERFACE_DET_EXT: u16 = 11;
        const TAG_RATE_HZ: u16 = 12;
        const TAG_DISABLE_PENDING: u16 = 13;

        let r = SnapshotReader::parse(bytes, Self::DEVICE_ID)?;
        r.ensure_device_major(Self::DEVICE_VERSION.major)?;

        // Decode everything before touching `self` so a bad blob leaves the device untouched.
        let dac0 = match r.bytes(TAG_DAC0) {
            Some(buf) => decode_dac(buf)?,
            None => DacChannel::default(),
        };
        let dac1 = match r.bytes(TAG_DAC1) {
            Some(buf) => decode_dac(buf)?,
            None => DacChannel::default(),
        };
        let leader = match r.u8(TAG_LEADER)?.unwrap_or(LEADER_NONE) {
            LEADER_NONE => None,
            idx => Some(
                ChannelId::from_index(idx)
                    .ok_or(SnapshotError::InvalidFieldEncoding("disney leader"))?,
            ),
        };
        let state = match r.u8(TAG_STATE)? {
            Some(v) => DisneyState::from_u8(v)
                .ok_or(SnapshotError::InvalidFieldEncoding("disney state"))?,
            None => DisneyState::Idle,
        };

        let data = r.u8(TAG_DATA)?.unwrap_or(0);
        let status = r.u8(TAG_STATUS)?.unwrap_or(super::STATUS_POWER_ON);
        let control = r.u8(TAG_CONTROL)?.unwrap_or(0);
        let last_used_ms = r.u64(TAG_LAST_USED_MS)?.unwrap_or(0);
        let stereo = r.bool(TAG_STEREO)?.unwrap_or(false);
        let interface_det = r.u32(TAG_INTERFACE_DET)?.unwrap_or(0);
        let interface_det_ext = r.u32(TAG_INTERFACE_DET_EXT)?.unwrap_or(0);
        let rate_hz = r.u32(TAG_RATE_HZ)?.unwrap_or(0);
        let rearm_disable = r.bool(TAG_DISABLE_PENDING)?.unwrap_or(false);

        self.data = data;
        self.status = status;
        self.control = control;
        self.dac = [dac0, dac1];
        self.last_used_ms = last_used_ms;
        self.stereo = stereo;
        self.leader = leader;
        self.state = state;
        self.interface_det = interface_det;
        self.interface_det_ext = interface_det_ext;
        self.rate_hz = rate_hz;

        // Timer ids belong to the queue that was live when the snapshot was taken.
        self.pending_disable = None;
        self.rearm_disable = rearm_disable;

        // The mixer channel is owned by the host, not the snapshot; bring it in line.
        if let Some(channel) = self.channel.as_mut() {
            if self.state == DisneyState::Running {
                channel.set_freq(self.rate_hz);
                channel.enable(true);
            } else {
                channel.enable(false);
            }
        }
        Ok(())
    }
}

impl<C: Clock, M: MixerChannel> DisneySoundSource<C, M> {
    /// Re-arm a deferred disable that was pending when the restored snapshot was taken.
    pub fn resume_timers<T: From<DisneyTimer>>(&mut self, timers: &mut TimerQueue<T>) {
        if !std::mem::take(&mut self.rearm_disable) || self.pending_disable.is_some() {
            return;
        }
        let deadline = self.clock.now_ns() + DISABLE_DELAY_NS;
        self.pending_disable = Some(timers.schedule(deadline, DisneyTimer::Disable.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disney::{DisneyConfig, DISNEY_BASE};
    use crate::sink::CaptureChannel;
    use vpc_time::ManualClock;

    fn running_device() -> (ManualClock, DisneySoundSource<ManualClock, CaptureChannel>) {
        let clock = ManualClock::new();
        let mut dev =
            DisneySoundSource::new(DisneyConfig::default(), clock.clone(), CaptureChannel::new());
        for i in 0..45u8 {
            dev.write_port(DISNEY_BASE, i.wrapping_mul(7));
            clock.advance_ns(100_000);
        }
        (clock, dev)
    }

    #[test]
    fn restore_reapplies_mixer_rate_and_leader() {
        let (clock, dev) = running_device();
        assert_eq!(dev.state(), DisneyState::Running);
        let blob = dev.save_state();

        let mut fresh =
            DisneySoundSource::new(DisneyConfig::default(), clock.clone(), CaptureChannel::new());
        fresh.load_state(&blob).unwrap();

        assert_eq!(fresh.state(), DisneyState::Running);
        assert_eq!(fresh.leader(), Some(ChannelId::Ch0));
        assert_eq!(fresh.rate_hz(), dev.rate_hz());
        assert_eq!(
            fresh.dac(ChannelId::Ch0).samples(),
            dev.dac(ChannelId::Ch0).samples()
        );
        let ch = fresh.channel().unwrap();
        assert!(ch.is_enabled());
        assert_eq!(ch.freq_hz(), dev.rate_hz());
        assert_eq!(fresh.save_state(), blob);
    }

    #[test]
    fn pending_disable_is_rearmed_on_a_new_queue() {
        let (clock, mut dev) = running_device();
        let mut timers = TimerQueue::<DisneyTimer>::new();
        clock.advance_ns(150 * vpc_time::NS_PER_MS);
        dev.mix(1, &mut timers);
        assert!(dev.disable_pending());
        let blob = dev.save_state();

        let mut fresh =
            DisneySoundSource::new(DisneyConfig::default(), clock.clone(), CaptureChannel::new());
        fresh.load_state(&blob).unwrap();
        assert!(!fresh.disable_pending());

        let mut new_queue = TimerQueue::<DisneyTimer>::new();
        fresh.resume_timers(&mut new_queue);
        fresh.resume_timers(&mut new_queue);
        assert_eq!(new_queue.len(), 1);
        assert!(fresh.disable_pending());
    }

    #[test]
    fn rejects_unknown_leader_index() {
        let (_clock, dev) = running_device();
        let mut w = SnapshotWriter::new(
            DisneySoundSource::<ManualClock, CaptureChannel>::DEVICE_ID,
            SnapshotVersion::new(1, 0),
        );
        w.field_u8(8, 2);
        let mut target = dev;
        let err = target.load_state(&w.finish()).unwrap_err();
        assert_eq!(err, SnapshotError::InvalidFieldEncoding("disney leader"));
        assert_eq!(target.state(), DisneyState::Running, "failed load must not clobber state");
    }

    #[test]
    fn bad_late_field_leaves_buffers_and_registers_alone() {
        let (_clock, mut dev) = running_device();
        let before = dev.save_state();
        let queued = dev.dac(ChannelId::Ch0).len();
        assert!(queued > 0);

        let mut w = SnapshotWriter::new(
            DisneySoundSource::<ManualClock, CaptureChannel>::DEVICE_ID,
            SnapshotVersion::new(1, 0),
        );
        w.field_u8(1, 0x55);
        // Stereo flag encoded as 2 is not a bool.
        w.field_u8(7, 2);
        assert!(dev.load_state(&w.finish()).is_err());

        assert_eq!(dev.state(), DisneyState::Running);
        assert_eq!(dev.dac(ChannelId::Ch0).len(), queued);
        assert_eq!(dev.save_state(), before);
    }
}
