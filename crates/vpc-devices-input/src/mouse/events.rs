use bitflags::bitflags;

/// Capacity of the pending event queue.
pub const QUEUE_CAPACITY: usize = 32;

bitflags! {
    /// Event condition bits, as reported in AX to an INT 33h event handler (and matched against
    /// the handler's CX mask).
    #[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
    pub struct MouseEvents: u8 {
        const MOVED = 1 << 0;
        const LEFT_PRESSED = 1 << 1;
        const LEFT_RELEASED = 1 << 2;
        const RIGHT_PRESSED = 1 << 3;
        const RIGHT_RELEASED = 1 << 4;
        const MIDDLE_PRESSED = 1 << 5;
        const MIDDLE_RELEASED = 1 << 6;
    }
}

bitflags! {
    /// Button state as reported in BX.
    #[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
    pub struct Buttons: u8 {
        const LEFT = 1 << 0;
        const RIGHT = 1 << 1;
        const MIDDLE = 1 << 2;
    }
}

impl Buttons {
    /// Host button index (0 = left, 1 = right, 2 = middle).
    pub fn from_index(button: u8) -> Option<Self> {
        match button {
            0 => Some(Buttons::LEFT),
            1 => Some(Buttons::RIGHT),
            2 => Some(Buttons::MIDDLE),
            _ => None,
        }
    }

    pub(crate) fn press_event(self) -> MouseEvents {
        if self == Buttons::LEFT {
            MouseEvents::LEFT_PRESSED
        } else if self == Buttons::RIGHT {
            MouseEvents::RIGHT_PRESSED
        } else {
            MouseEvents::MIDDLE_PRESSED
        }
    }

    pub(crate) fn release_event(self) -> MouseEvents {
        if self == Buttons::LEFT {
            MouseEvents::LEFT_RELEASED
        } else if self == Buttons::RIGHT {
            MouseEvents::RIGHT_RELEASED
        } else {
            MouseEvents::MIDDLE_RELEASED
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueuedEvent {
    pub kind: MouseEvents,
    /// Button state at the time the event was queued.
    pub buttons: Buttons,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PushOutcome {
    Queued,
    /// Queue full; the event was dropped.
    Dropped,
    /// Motion while other events are pending adds nothing.
    Coalesced,
}

/// Bounded event queue, newest entry at index 0.
///
/// Service pops from the tail, so events are delivered oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventQueue {
    entries: [QueuedEvent; QUEUE_CAPACITY],
    len: usize,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self {
            entries: [QueuedEvent::default(); QUEUE_CAPACITY],
            len: 0,
        }
    }
}

impl EventQueue {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Pending events, newest first.
    pub fn iter(&self) -> impl Iterator<Item = &QueuedEvent> {
        self.entries[..self.len].iter()
    }

    pub(crate) fn push(&mut self, kind: MouseEvents, buttons: Buttons) -> PushOutcome {
        if self.len >= QUEUE_CAPACITY {
            return PushOutcome::Dropped;
        }
        if self.len > 0 {
            if kind == MouseEvents::MOVED {
                return PushOutcome::Coalesced;
            }
            self.entries.copy_within(0..self.len, 1);
        }
        self.entries[0] = QueuedEvent { kind, buttons };
        self.len += 1;
        PushOutcome::Queued
    }

    pub(crate) fn pop_oldest(&mut self) -> Option<QueuedEvent> {
        self.len = self.len.checked_sub(1)?;
        Some(self.entries[self.len])
    }

    pub(crate) fn clear(&mut self) {
        self.len = 0;
    }

    pub(crate) fn raw(&self) -> &[QueuedEvent; QUEUE_CAPACITY] {
        &self.entries
    }

    pub(crate) fn from_raw(entries: [QueuedEvent; QUEUE_CAPACITY], len: usize) -> Self {
        Self {
            entries,
            len: len.min(QUEUE_CAPACITY),
        }
    }
}

/// Progress of one IRQ 12 service through the guest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DispatchState {
    #[default]
    Idle,
    /// The guest's event handler is running; further IRQs pass through until it returns.
    HandlerDispatched,
    /// Waiting for the interrupt service routine's epilogue.
    AwaitingReturn,
}

impl DispatchState {
    pub(crate) const fn to_u8(self) -> u8 {
        match self {
            DispatchState::Idle => 0,
            DispatchState::HandlerDispatched => 1,
            DispatchState::AwaitingReturn => 2,
        }
    }

    pub(crate) const fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(DispatchState::Idle),
            1 => Some(DispatchState::HandlerDispatched),
            2 => Some(DispatchState::AwaitingReturn),
            _ => None,
        }
    }
}

/// PS/2 BIOS pointing-device packet handed to the INT 15h C2 callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ps2Packet {
    /// Buttons, always-one bit 3, X/Y sign (bits 4/5) and overflow (bits 6/7).
    pub status: u8,
    pub x: u8,
    pub y: u8,
}

impl Ps2Packet {
    /// Build a packet from absolute positions; Y grows downward on screen but up on the wire.
    pub fn from_motion(buttons: Buttons, x: i16, y: i16, old_x: i16, old_y: i16) -> Self {
        let mut status = (buttons.bits() & 0x03) | 0x08;
        let mut xdiff = x.wrapping_sub(old_x);
        let mut ydiff = old_y.wrapping_sub(y);
        if !(-0xFF..=0xFF).contains(&xdiff) {
            status |= 0x40;
        }
        if !(-0xFF..=0xFF).contains(&ydiff) {
            status |= 0x80;
        }
        xdiff %= 256;
        ydiff %= 256;
        if xdiff < 0 {
            xdiff += 0x100;
            status |= 0x10;
        }
        if ydiff < 0 {
            ydiff += 0x100;
            status |= 0x20;
        }
        Self {
            status,
            x: xdiff as u8,
            y: ydiff as u8,
        }
    }

    /// The four words pushed for the callback, in push order.
    pub fn words(&self) -> [u16; 4] {
        [
            u16::from(self.status),
            u16::from(self.x),
            u16::from(self.y),
            0,
        ]
    }
}

/// Where IRQ 12 service continues after [`super::Int33Mouse::int74`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqDispatch {
    /// Far call the guest's event handler with the registers already loaded; call
    /// [`super::Int33Mouse::uir_return`] when it returns.
    UserRoutine { segment: u16, offset: u16 },
    /// Push the packet words and far call the PS/2 BIOS callback.
    Ps2Callback {
        segment: u16,
        offset: u16,
        packet: Ps2Packet,
    },
    /// Nothing to deliver; acknowledge and return.
    Passthrough,
}
