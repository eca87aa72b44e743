//! Pointer input for DOS guests: the INT 33h mouse driver and the collaborator interfaces it
//! drives (real-mode registers, guest memory, BIOS video services).

#![forbid(unsafe_code)]

pub mod memory;
pub mod mouse;
pub mod regs;
pub mod video;

pub use memory::{FlatMemory, GuestMemory};
pub use mouse::{Int33Mouse, IrqDispatch, MouseConfig, MouseEnv, MouseTimer, Ps2Packet};
pub use regs::Registers;
pub use video::{DisplayKind, SimpleVideo, VideoMode, VideoServices};
