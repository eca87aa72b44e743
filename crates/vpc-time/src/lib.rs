//! Guest virtual time and event scheduling primitives shared by the peripheral models.
//!
//! Guest virtual time (monotonic nanoseconds since reset) is the single source of truth.
//! Device models read it through [`Clock`]; deferred work is expressed as payloads on a
//! [`TimerQueue`] that the machine drains in deadline order. The queue stores plain data rather
//! than callbacks, so it stays trivially serializable and a handler can never run while the
//! structure that scheduled it is still borrowed.

#![forbid(unsafe_code)]

mod clock;
mod interrupt;
mod timer_queue;

pub use clock::{Clock, ManualClock, NullClock, NS_PER_MS};
pub use interrupt::{InterruptSink, IrqLatch};
pub use timer_queue::{TimerEvent, TimerId, TimerQueue};
