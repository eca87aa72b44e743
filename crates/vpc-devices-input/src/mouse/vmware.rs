//! VMware backdoor absolute-pointer protocol (read from I/O port 0x5658 with the magic in EAX).

use super::{Buttons, Int33Mouse};
use crate::regs::Registers;
use tracing::warn;
use vpc_time::Clock;

pub const VMWARE_PORT: u16 = 0x5658;
pub const VMWARE_MAGIC: u32 = 0x564D_5868;

const CMD_GETVERSION: u16 = 10;
const CMD_ABSPOINTER_DATA: u16 = 39;
const CMD_ABSPOINTER_STATUS: u16 = 40;
const CMD_ABSPOINTER_COMMAND: u16 = 41;

const ABSPOINTER_ENABLE: u32 = 0x4541_4552;
const ABSPOINTER_RELATIVE: u32 = 0xF5;
const ABSPOINTER_ABSOLUTE: u32 = 0x5342_4152;

const VERSION_REPLY: u32 = 0x3442_554A;
/// Pending-data word count reported by ABSPOINTER_STATUS.
const STATUS_PACKET_WORDS: u32 = 4;

/// Last host absolute position (normalized) and whether anything changed since the guest polled.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(super) struct VmwareState {
    pub(super) x: f32,
    pub(super) y: f32,
    pub(super) updated: bool,
}

impl<C: Clock> Int33Mouse<C> {
    /// Handle a read of the backdoor port. Command in CX, results in EAX..EDX.
    ///
    /// Returns the port value (AX after the command), or 0 when the call is not for us.
    pub fn vmware_port_read(&mut self, regs: &mut Registers) -> u32 {
        if !self.config.vmware_backdoor || regs.eax != VMWARE_MAGIC {
            return 0;
        }

        match regs.cx() {
            CMD_GETVERSION => {
                regs.eax = VERSION_REPLY;
                regs.ebx = VMWARE_MAGIC;
            }
            CMD_ABSPOINTER_DATA => {
                let b = self.buttons;
                regs.eax = (if b.contains(Buttons::LEFT) { 0x20 } else { 0 })
                    | (if b.contains(Buttons::RIGHT) { 0x10 } else { 0 })
                    | (if b.contains(Buttons::MIDDLE) { 0x08 } else { 0 });
                regs.ebx = (self.vmware.x * 65535.0) as u32;
                regs.ecx = (self.vmware.y * 65535.0) as u32;
                // No wheel.
                regs.edx = 0;
            }
            CMD_ABSPOINTER_STATUS => {
                regs.eax = if self.vmware.updated {
                    STATUS_PACKET_WORDS
                } else {
                    0
                };
                self.vmware.updated = false;
            }
            CMD_ABSPOINTER_COMMAND => match regs.ebx {
                ABSPOINTER_ENABLE | ABSPOINTER_RELATIVE | ABSPOINTER_ABSOLUTE => {}
                sub => warn!("vmware: unknown mouse subcommand {sub:#010x}"),
            },
            cmd => warn!("vmware: unknown command {cmd:#06x}"),
        }
        u32::from(regs.ax())
    }
}
