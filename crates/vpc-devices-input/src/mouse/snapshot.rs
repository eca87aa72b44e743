use super::cursor::{Cursor, CursorType, MaskTable, CURSOR_SIZE};
use super::events::{Buttons, DispatchState, EventQueue, MouseEvents, QueuedEvent, QUEUE_CAPACITY};
use super::motion::{MickeyRate, Sensitivity};
use super::vmware::VmwareState;
use super::{ButtonHistory, Int33Mouse, MouseTimer, Ps2State, BUTTON_COUNT, EVENT_INTERVAL_NS};
use vpc_io_snapshot::io::state::codec::{Decoder, Encoder};
use vpc_io_snapshot::io::state::{
    IoSnapshot, LoadOptions, SnapshotError, SnapshotReader, SnapshotResult, SnapshotVersion,
    SnapshotWriter,
};
use vpc_time::{Clock, TimerQueue};

const MASK_NONE: u8 = 0;
const MASK_DEFAULT: u8 = 1;
const MASK_USER: u8 = 2;

fn mask_to_u8(mask: Option<MaskTable>) -> u8 {
    match mask {
        None => MASK_NONE,
        Some(MaskTable::Default) => MASK_DEFAULT,
        Some(MaskTable::User) => MASK_USER,
    }
}

fn mask_from_u8(v: u8) -> SnapshotResult<Option<MaskTable>> {
    match v {
        MASK_NONE => Ok(None),
        MASK_DEFAULT => Ok(Some(MaskTable::Default)),
        MASK_USER => Ok(Some(MaskTable::User)),
        _ => Err(SnapshotError::InvalidFieldEncoding("mouse cursor mask table")),
    }
}

fn f32_pair(e: Encoder, a: f32, b: f32) -> Encoder {
    e.u32(a.to_bits()).u32(b.to_bits())
}

fn read_f32(d: &mut Decoder<'_>) -> SnapshotResult<f32> {
    Ok(f32::from_bits(d.u32()?))
}

fn encode_history(history: &[ButtonHistory; BUTTON_COUNT]) -> Vec<u8> {
    history
        .iter()
        .fold(Encoder::new(), |e, h| {
            e.u16(h.times_pressed)
                .u16(h.times_released)
                .u16(h.last_pressed_x)
                .u16(h.last_pressed_y)
                .u16(h.last_released_x)
                .u16(h.last_released_y)
        })
        .finish()
}

fn decode_history(bytes: &[u8]) -> SnapshotResult<[ButtonHistory; BUTTON_COUNT]> {
    let mut d = Decoder::new(bytes);
    let mut history = [ButtonHistory::default(); BUTTON_COUNT];
    for h in history.iter_mut() {
        h.times_pressed = d.u16()?;
        h.times_released = d.u16()?;
        h.last_pressed_x = d.u16()?;
        h.last_pressed_y = d.u16()?;
        h.last_released_x = d.u16()?;
        h.last_released_y = d.u16()?;
    }
    d.finish()?;
    Ok(history)
}

fn encode_masks(e: Encoder, mask: &[u16; CURSOR_SIZE]) -> Encoder {
    mask.iter().fold(e, |e, &w| e.u16(w))
}

fn decode_mask(d: &mut Decoder<'_>) -> SnapshotResult<[u16; CURSOR_SIZE]> {
    let mut mask = [0u16; CURSOR_SIZE];
    for w in mask.iter_mut() {
        *w = d.u16()?;
    }
    Ok(mask)
}

fn encode_cursor(c: &Cursor) -> Vec<u8> {
    let e = Encoder::new()
        .u16(c.hidden)
        .u16(c.old_hidden)
        .bool(c.inhibit_draw)
        .bool(c.background)
        .i16(c.back_x)
        .i16(c.back_y)
        .bytes(&c.back_data)
        .u8(mask_to_u8(c.screen_mask))
        .u8(mask_to_u8(c.cursor_mask));
    let e = encode_masks(e, &c.user_screen_mask);
    let e = encode_masks(e, &c.user_cursor_mask);
    e.i16(c.clip_x)
        .i16(c.clip_y)
        .i16(c.hot_x)
        .i16(c.hot_y)
        .u16(c.text_and_mask)
        .u16(c.text_xor_mask)
        .i16(c.update_region_x[0])
        .i16(c.update_region_x[1])
        .i16(c.update_region_y[0])
        .i16(c.update_region_y[1])
        .u16(c.cursor_type.to_u16())
        .u8(c.page)
        .finish()
}

fn decode_cursor(bytes: &[u8]) -> SnapshotResult<Cursor> {
    let mut d = Decoder::new(bytes);
    let c = Cursor {
        hidden: d.u16()?,
        old_hidden: d.u16()?,
        inhibit_draw: d.bool()?,
        background: d.bool()?,
        back_x: d.i16()?,
        back_y: d.i16()?,
        back_data: d
            .bytes(CURSOR_SIZE * CURSOR_SIZE)?
            .try_into()
            .map_err(|_| SnapshotError::InvalidFieldEncoding("mouse cursor background"))?,
        screen_mask: mask_from_u8(d.u8()?)?,
        cursor_mask: mask_from_u8(d.u8()?)?,
        user_screen_mask: decode_mask(&mut d)?,
        user_cursor_mask: decode_mask(&mut d)?,
        clip_x: d.i16()?,
        clip_y: d.i16()?,
        hot_x: d.i16()?,
        hot_y: d.i16()?,
        text_and_mask: d.u16()?,
        text_xor_mask: d.u16()?,
        update_region_x: [d.i16()?, d.i16()?],
        update_region_y: [d.i16()?, d.i16()?],
        cursor_type: CursorType::from_u16(d.u16()?),
        page: d.u8()?,
    };
    d.finish()?;
    Ok(c)
}

fn encode_queue(q: &EventQueue) -> Vec<u8> {
    // Always the full array so the blob size never depends on the queue level.
    q.raw()
        .iter()
        .fold(Encoder::new().u8(q.len() as u8), |e, ev| {
            e.u8(ev.kind.bits()).u8(ev.buttons.bits())
        })
        .finish()
}

fn decode_queue(bytes: &[u8]) -> SnapshotResult<EventQueue> {
    let mut d = Decoder::new(bytes);
    let len = usize::from(d.u8()?);
    if len > QUEUE_CAPACITY {
        return Err(SnapshotError::InvalidFieldEncoding("mouse event count"));
    }
    let mut entries = [QueuedEvent::default(); QUEUE_CAPACITY];
    for ev in entries.iter_mut() {
        ev.kind = MouseEvents::from_bits_truncate(d.u8()?);
        ev.buttons = Buttons::from_bits_truncate(d.u8()?);
    }
    d.finish()?;
    Ok(EventQueue::from_raw(entries, len))
}

fn encode_rate(r: &MickeyRate) -> Vec<u8> {
    let e = f32_pair(Encoder::new(), r.mickeys_per_pixel_x, r.mickeys_per_pixel_y);
    f32_pair(e, r.pixels_per_mickey_x, r.pixels_per_mickey_y).finish()
}

fn decode_rate(bytes: &[u8]) -> SnapshotResult<MickeyRate> {
    let mut d = Decoder::new(bytes);
    let rate = MickeyRate {
        mickeys_per_pixel_x: read_f32(&mut d)?,
        mickeys_per_pixel_y: read_f32(&mut d)?,
        pixels_per_mickey_x: read_f32(&mut d)?,
        pixels_per_mickey_y: read_f32(&mut d)?,
    };
    d.finish()?;
    Ok(rate)
}

fn encode_sensitivity(s: &Sensitivity) -> Vec<u8> {
    let e = Encoder::new()
        .u16(s.x_value)
        .u16(s.y_value)
        .u16(s.double_speed_value);
    f32_pair(e, s.x, s.y).finish()
}

fn decode_sensitivity(bytes: &[u8]) -> SnapshotResult<Sensitivity> {
    let mut d = Decoder::new(bytes);
    let s = Sensitivity {
        x_value: d.u16()?,
        y_value: d.u16()?,
        double_speed_value: d.u16()?,
        x: read_f32(&mut d)?,
        y: read_f32(&mut d)?,
    };
    d.finish()?;
    Ok(s)
}

fn encode_ps2(p: &Ps2State) -> Vec<u8> {
    Encoder::new()
        .bool(p.enabled)
        .bool(p.callback_installed)
        .u16(p.callback_segment)
        .u16(p.callback_offset)
        .i16(p.old_x)
        .i16(p.old_y)
        .finish()
}

fn decode_ps2(bytes: &[u8]) -> SnapshotResult<Ps2State> {
    let mut d = Decoder::new(bytes);
    let p = Ps2State {
        enabled: d.bool()?,
        callback_installed: d.bool()?,
        callback_segment: d.u16()?,
        callback_offset: d.u16()?,
        old_x: d.i16()?,
        old_y: d.i16()?,
    };
    d.finish()?;
    Ok(p)
}

fn encode_vmware(v: &VmwareState) -> Vec<u8> {
    f32_pair(Encoder::new(), v.x, v.y).bool(v.updated).finish()
}

fn decode_vmware(bytes: &[u8]) -> SnapshotResult<VmwareState> {
    let mut d = Decoder::new(bytes);
    let v = VmwareState {
        x: read_f32(&mut d)?,
        y: read_f32(&mut d)?,
        updated: d.bool()?,
    };
    d.finish()?;
    Ok(v)
}

fn decode_or<T>(
    bytes: Option<&[u8]>,
    decode: impl FnOnce(&[u8]) -> SnapshotResult<T>,
    default: T,
) -> SnapshotResult<T> {
    bytes.map_or(Ok(default), decode)
}

impl<C: Clock> IoSnapshot for Int33Mouse<C> {
    const DEVICE_ID: [u8; 4] = *b"MS33";
    const DEVICE_VERSION: SnapshotVersion = SnapshotVersion::new(1, 0);

    fn save_state(&self) -> Vec<u8> {
        const TAG_BUTTONS: u16 = 1;
        const TAG_HISTORY: u16 = 2;
        const TAG_POSITION: u16 = 3;
        const TAG_RANGE: u16 = 4;
        const TAG_GRANULARITY: u16 = 5;
        const TAG_MICKEYS: u16 = 6;
        const TAG_RATE: u16 = 7;
        const TAG_SENSITIVITY: u16 = 8;
        const TAG_DOUBLE_SPEED_THRESHOLD: u16 = 9;
        const TAG_VIDEO_MODE: u16 = 10;
        const TAG_CURSOR: u16 = 11;
        const TAG_LANGUAGE: u16 = 12;
        const TAG_ENABLED: u16 = 13;
        const TAG_EVENTS: u16 = 14;
        const TAG_HANDLER: u16 = 15;
        const TAG_DISPATCH: u16 = 16;
        const TAG_TIMER_IN_PROGRESS: u16 = 17;
        const TAG_PS2: u16 = 18;
        const TAG_VMWARE: u16 = 19;

        let mut w = SnapshotWriter::new(Self::DEVICE_ID, Self::DEVICE_VERSION);
        w.field_u8(TAG_BUTTONS, self.buttons.bits());
        w.field_bytes(TAG_HISTORY, encode_history(&self.history));
        w.field_bytes(TAG_POSITION, f32_pair(Encoder::new(), self.x, self.y).finish());
        w.field_bytes(
            TAG_RANGE,
            Encoder::new()
                .i16(self.min_x)
                .i16(self.max_x)
                .i16(self.min_y)
                .i16(self.max_y)
                .finish(),
        );
        w.field_bytes(
            TAG_GRANULARITY,
            Encoder::new().i16(self.gran_x).i16(self.gran_y).finish(),
        );
        w.field_bytes(
            TAG_MICKEYS,
            f32_pair(Encoder::new(), self.mickey_x, self.mickey_y).finish(),
        );
        w.field_bytes(TAG_RATE, encode_rate(&self.rate));
        w.field_bytes(TAG_SENSITIVITY, encode_sensitivity(&self.sensitivity));
        w.field_u16(TAG_DOUBLE_SPEED_THRESHOLD, self.double_speed_threshold);
        w.field_u8(TAG_VIDEO_MODE, self.mode);
        w.field_bytes(TAG_CURSOR, encode_cursor(&self.cursor));
        w.field_u16(TAG_LANGUAGE, self.language);
        w.field_bool(TAG_ENABLED, self.enabled);
        w.field_bytes(TAG_EVENTS, encode_queue(&self.events));
        w.field_bytes(
            TAG_HANDLER,
            Encoder::new()
                .u16(self.sub_mask)
                .u16(self.sub_seg)
                .u16(self.sub_ofs)
                .finish(),
        );
        w.field_u8(TAG_DISPATCH, self.dispatch.to_u8());
        w.field_bool(TAG_TIMER_IN_PROGRESS, self.timer_in_progress);
        w.field_bytes(TAG_PS2, encode_ps2(&self.ps2));
        w.field_bytes(TAG_VMWARE, encode_vmware(&self.vmware));
        w.finish()
    }

    fn load_state(&mut self, bytes: &[u8]) -> SnapshotResult<()> {
        self.load_state_with(bytes, LoadOptions::default())
    }

    fn load_state_with(&mut self, bytes: &[u8], options: LoadOptions) -> SnapshotResult<()> {
        const TAG_BUTTONS: u16 = 1;
        const TAG_HISTORY: u16 = 2;
        const TAG_POSITION: u16 = 3;
        const TAG_RANGE: u16 = 4;
        const TAG_GRANULARITY: u16 = 5;
        const TAG_MICKEYS: u16 = 6;
        const TAG_RATE: u16 = 7;
        const TAG_SENSITIVITY: u16 = 8;
        const TAG_DOUBLE_SPEED_THRESHOLD: u16 = 9;
        const TAG_VIDEO_MODE: u16 = 10;
        const TAG_CURSOR: u16 = 11;
        const TAG_LANGUAGE: u16 = 12;
        const TAG_ENABLED: u16 = 13;
        const TAG_EVENTS: u16 = 14;
        const TAG_HANDLER: u16 = 15;
        const TAG_DISPATCH: u16 = 16;
        const TAG_TIMER_IN_PROGRESS: u16 = 17;
        const TAG_PS2: u16 = 18;
        const TAG_VMWARE: u16 = 19;

        let r = SnapshotReader::parse(bytes, Self::DEVICE_ID)?;
        r.ensure_device_major(Self::DEVICE_VERSION.major)?;

        // Decode everything first; a rejected blob must leave the driver as it was.
        let history = decode_or(
            r.bytes(TAG_HISTORY),
            decode_history,
            [ButtonHistory::default(); BUTTON_COUNT],
        )?;
        let (x, y) = decode_or(
            r.bytes(TAG_POSITION),
            |b| {
                let mut d = Decoder::new(b);
                let pos = (read_f32(&mut d)?, read_f32(&mut d)?);
                d.finish()?;
                Ok(pos)
            },
            (0.0, 0.0),
        )?;
        let range = decode_or(
            r.bytes(TAG_RANGE),
            |b| {
                let mut d = Decoder::new(b);
                let range = (d.i16()?, d.i16()?, d.i16()?, d.i16()?);
                d.finish()?;
                Ok(range)
            },
            (0, 639, 0, 199),
        )?;
        let (gran_x, gran_y) = decode_or(
            r.bytes(TAG_GRANULARITY),
            |b| {
                let mut d = Decoder::new(b);
                let gran = (d.i16()?, d.i16()?);
                d.finish()?;
                Ok(gran)
            },
            (-1, -1),
        )?;
        let (mickey_x, mickey_y) = decode_or(
            r.bytes(TAG_MICKEYS),
            |b| {
                let mut d = Decoder::new(b);
                let m = (read_f32(&mut d)?, read_f32(&mut d)?);
                d.finish()?;
                Ok(m)
            },
            (0.0, 0.0),
        )?;
        let rate = decode_or(r.bytes(TAG_RATE), decode_rate, MickeyRate::default())?;
        let sensitivity =
            decode_or(r.bytes(TAG_SENSITIVITY), decode_sensitivity, self.sensitivity)?;
        let cursor = decode_or(r.bytes(TAG_CURSOR), decode_cursor, Cursor::default())?;
        let events = decode_or(r.bytes(TAG_EVENTS), decode_queue, EventQueue::default())?;
        let (sub_mask, sub_seg, sub_ofs) = decode_or(
            r.bytes(TAG_HANDLER),
            |b| {
                let mut d = Decoder::new(b);
                let h = (d.u16()?, d.u16()?, d.u16()?);
                d.finish()?;
                Ok(h)
            },
            (0, 0, 0),
        )?;
        let dispatch = match r.u8(TAG_DISPATCH)? {
            Some(v) => DispatchState::from_u8(v)
                .ok_or(SnapshotError::InvalidFieldEncoding("mouse dispatch state"))?,
            None => DispatchState::Idle,
        };
        let ps2 = decode_or(r.bytes(TAG_PS2), decode_ps2, Ps2State::default())?;
        let vmware = decode_or(r.bytes(TAG_VMWARE), decode_vmware, VmwareState::default())?;
        let buttons = Buttons::from_bits_truncate(r.u8(TAG_BUTTONS)?.unwrap_or(0));
        let double_speed_threshold = r.u16(TAG_DOUBLE_SPEED_THRESHOLD)?.unwrap_or(64);
        let mode = r.u8(TAG_VIDEO_MODE)?.unwrap_or(super::NO_VIDEO_MODE);
        let language = r.u16(TAG_LANGUAGE)?.unwrap_or(0);
        let enabled = r.bool(TAG_ENABLED)?.unwrap_or(false);
        let timer_in_progress = r.bool(TAG_TIMER_IN_PROGRESS)?.unwrap_or(false);

        self.buttons = buttons;
        self.history = history;
        self.x = x;
        self.y = y;
        (self.min_x, self.max_x, self.min_y, self.max_y) = range;
        self.gran_x = gran_x;
        self.gran_y = gran_y;
        self.mickey_x = mickey_x;
        self.mickey_y = mickey_y;
        self.rate = rate;
        self.sensitivity = sensitivity;
        self.double_speed_threshold = double_speed_threshold;
        self.mode = mode;
        self.cursor = cursor;
        self.language = language;
        self.enabled = enabled;
        self.events = events;
        self.sub_mask = sub_mask;
        self.sub_seg = sub_seg;
        self.sub_ofs = sub_ofs;
        self.dispatch = dispatch;
        self.timer_in_progress = timer_in_progress;
        self.ps2 = ps2;
        self.vmware = vmware;

        // Timer ids belong to the queue that was live when the snapshot was taken.
        self.limit_timer = None;

        if !options.preserve_input {
            // The host no longer holds whatever was pressed or queued back then.
            self.events.clear();
            self.dispatch = DispatchState::Idle;
            self.buttons = Buttons::empty();
            self.timer_in_progress = false;
            self.ps2.old_x = self.x as i16;
            self.ps2.old_y = self.y as i16;
        }
        Ok(())
    }
}

impl<C: Clock> Int33Mouse<C> {
    /// Re-arm the event rate limiter after a restore that kept it running.
    pub fn resume_timers<T: From<MouseTimer>>(&mut self, timers: &mut TimerQueue<T>) {
        if !self.timer_in_progress || self.limit_timer.is_some() {
            return;
        }
        let deadline = self.clock.now_ns() + EVENT_INTERVAL_NS;
        self.limit_timer = Some(timers.schedule(deadline, MouseTimer::LimitEvents.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::FlatMemory;
    use crate::mouse::{MouseConfig, MouseEnv};
    use crate::video::SimpleVideo;
    use vpc_time::{IrqLatch, ManualClock};

    struct Rig {
        video: SimpleVideo,
        memory: FlatMemory,
        pic: IrqLatch,
        timers: TimerQueue<MouseTimer>,
    }

    impl Rig {
        fn new() -> Self {
            Self {
                video: SimpleVideo::new(0x12),
                memory: FlatMemory::new(0x1000),
                pic: IrqLatch::new(),
                timers: TimerQueue::new(),
            }
        }

        fn env(&mut self) -> MouseEnv<'_, MouseTimer> {
            MouseEnv::new(&mut self.video, &mut self.memory, &mut self.pic, &mut self.timers)
        }
    }

    fn busy_mouse(rig: &mut Rig) -> Int33Mouse<ManualClock> {
        let mut mouse = Int33Mouse::new(MouseConfig::default(), ManualClock::new());
        mouse.install(&mut rig.env());
        mouse.button_pressed(0, &mut rig.env());
        mouse.button_pressed(1, &mut rig.env());
        mouse.cursor_moved(30.0, 5.0, 0.0, 0.0, true, &mut rig.env());
        mouse
    }

    #[test]
    fn blob_size_does_not_depend_on_queue_level() {
        let mut rig = Rig::new();
        let mut mouse = Int33Mouse::new(MouseConfig::default(), ManualClock::new());
        mouse.install(&mut rig.env());
        let idle = mouse.state_size();
        let busy = busy_mouse(&mut rig);
        assert_eq!(busy.state_size(), idle);
    }

    #[test]
    fn plain_restore_drops_transient_input() {
        let mut rig = Rig::new();
        let mouse = busy_mouse(&mut rig);
        assert_eq!(mouse.events().len(), 2);
        let blob = mouse.save_state();

        let mut restored = Int33Mouse::new(MouseConfig::default(), ManualClock::new());
        restored.load_state(&blob).unwrap();
        assert!(restored.events().is_empty());
        assert_eq!(restored.buttons(), Buttons::empty());
        assert!(!restored.timer_in_progress());
        assert_eq!(restored.position(), mouse.position());
        assert_eq!(restored.range(), mouse.range());
    }

    #[test]
    fn preserving_restore_keeps_queue_and_rearms_limiter() {
        let mut rig = Rig::new();
        let mouse = busy_mouse(&mut rig);
        let blob = mouse.save_state();

        let mut restored = Int33Mouse::new(MouseConfig::default(), ManualClock::new());
        restored
            .load_state_with(&blob, LoadOptions::preserve_input())
            .unwrap();
        assert_eq!(restored.events(), mouse.events());
        assert_eq!(restored.buttons(), Buttons::LEFT | Buttons::RIGHT);
        assert!(restored.timer_in_progress());

        let mut timers = TimerQueue::<MouseTimer>::new();
        restored.resume_timers(&mut timers);
        restored.resume_timers(&mut timers);
        assert_eq!(timers.len(), 1);
        assert_eq!(timers.next_deadline(), Some(EVENT_INTERVAL_NS));
        assert_eq!(restored.save_state(), blob);
    }

    #[test]
    fn user_mask_selection_survives_restore() {
        let mut rig = Rig::new();
        let mut mouse = busy_mouse(&mut rig);
        let screen = [0x1234; CURSOR_SIZE];
        let cursor = [0x8001; CURSOR_SIZE];
        mouse.cursor.set_user_bitmap(screen, cursor, 4, 5);
        let blob = mouse.save_state();

        let mut restored = Int33Mouse::new(MouseConfig::default(), ManualClock::new());
        restored.load_state(&blob).unwrap();
        assert_eq!(restored.cursor.screen_mask, Some(MaskTable::User));
        assert_eq!(restored.cursor.user_cursor_mask, cursor);
        assert_eq!(restored.cursor().hot_spot(), (4, 5));
    }

    #[test]
    fn rejects_bad_mask_selector_without_side_effects() {
        let mut rig = Rig::new();
        let mut mouse = busy_mouse(&mut rig);
        let mut cursor_blob = encode_cursor(&mouse.cursor);
        // Screen mask selector sits after hidden/old_hidden/flags/backpos/background.
        cursor_blob[2 + 2 + 1 + 1 + 2 + 2 + CURSOR_SIZE * CURSOR_SIZE] = 7;
        let mut w = SnapshotWriter::new(
            Int33Mouse::<ManualClock>::DEVICE_ID,
            SnapshotVersion::new(1, 0),
        );
        w.field_bytes(11, cursor_blob);

        let before = mouse.save_state();
        let err = mouse.load_state(&w.finish()).unwrap_err();
        assert_eq!(
            err,
            SnapshotError::InvalidFieldEncoding("mouse cursor mask table")
        );
        assert_eq!(mouse.save_state(), before);
    }
}
