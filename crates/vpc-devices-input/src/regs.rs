/// Real-mode register file as seen by a trapped software interrupt.
///
/// Only the registers the driver's calling conventions touch are modelled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Registers {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
    pub esi: u32,
    pub edi: u32,
    pub esp: u32,

    pub ds: u16,
    pub es: u16,
    pub ss: u16,
}

macro_rules! word_reg {
    ($get:ident, $set:ident, $field:ident) => {
        pub fn $get(&self) -> u16 {
            self.$field as u16
        }

        pub fn $set(&mut self, val: u16) {
            self.$field = (self.$field & 0xFFFF_0000) | u32::from(val);
        }
    };
}

impl Registers {
    /// Linear address of `seg:off`.
    pub fn seg_off(seg: u16, off: u16) -> u32 {
        u32::from(seg) * 16 + u32::from(off)
    }

    word_reg!(ax, set_ax, eax);
    word_reg!(bx, set_bx, ebx);
    word_reg!(cx, set_cx, ecx);
    word_reg!(dx, set_dx, edx);
    word_reg!(si, set_si, esi);
    word_reg!(di, set_di, edi);
    word_reg!(sp, set_sp, esp);

    pub fn al(&self) -> u8 {
        self.eax as u8
    }

    pub fn set_al(&mut self, val: u8) {
        self.eax = (self.eax & 0xFFFF_FF00) | u32::from(val);
    }

    pub fn bl(&self) -> u8 {
        self.ebx as u8
    }

    pub fn cl(&self) -> u8 {
        self.ecx as u8
    }

    pub fn set_cl(&mut self, val: u8) {
        self.ecx = (self.ecx & 0xFFFF_FF00) | u32::from(val);
    }

    pub fn set_ch(&mut self, val: u8) {
        self.ecx = (self.ecx & 0xFFFF_00FF) | (u32::from(val) << 8);
    }

    pub fn dl(&self) -> u8 {
        self.edx as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_and_byte_writes_preserve_the_rest_of_the_register() {
        let mut r = Registers {
            eax: 0xDEAD_BEEF,
            ecx: 0x1234_5678,
            ..Registers::default()
        };
        r.set_ax(0x0102);
        assert_eq!(r.eax, 0xDEAD_0102);
        r.set_al(0xFF);
        assert_eq!(r.ax(), 0x01FF);

        r.set_ch(0x04);
        r.set_cl(0x00);
        assert_eq!(r.ecx, 0x1234_0400);
        assert_eq!(Registers::seg_off(0xB800, 0x0010), 0xB8010);
    }
}
