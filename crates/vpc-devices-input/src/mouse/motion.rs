//! Host motion to guest coordinates: mickey ratios, the sensitivity curve and 16-bit wrapping.

/// Mickeys per 8 pixels the ratio registers are expressed against.
const MICKEY_UNIT: f32 = 8.0;

/// Sensitivity coefficient for a user value, `((v - 1)^2) / 3600 + 1/3`.
///
/// Values above 100 are treated as 100; 0 has no coefficient of its own (the caller keeps the
/// previous one) and maps like 1 here.
pub fn sensitivity_coefficient(value: u16) -> f32 {
    let v = f32::from(value.clamp(1, 100) - 1);
    v * v / 3600.0 + 1.0 / 3.0
}

/// Wrap into the signed 16-bit range, leaving in-range values untouched.
pub(crate) fn wrap_signed_16(v: f32) -> f32 {
    if v < 32768.0 && v > -32769.0 {
        return v;
    }
    let wrapped = (v + 32768.0).rem_euclid(65536.0) - 32768.0;
    // rem_euclid can round up to the modulus itself.
    if wrapped >= 32768.0 {
        wrapped - 65536.0
    } else {
        wrapped
    }
}

/// Conversion between host pixels and mickeys (INT 33h 0Fh).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MickeyRate {
    pub mickeys_per_pixel_x: f32,
    pub mickeys_per_pixel_y: f32,
    pub pixels_per_mickey_x: f32,
    pub pixels_per_mickey_y: f32,
}

impl Default for MickeyRate {
    fn default() -> Self {
        let mut rate = Self {
            mickeys_per_pixel_x: 1.0,
            mickeys_per_pixel_y: 1.0,
            pixels_per_mickey_x: 1.0,
            pixels_per_mickey_y: 1.0,
        };
        rate.set(8, 16);
        rate
    }
}

impl MickeyRate {
    /// Mickeys per 8 pixels on each axis. A zero on either axis leaves both unchanged.
    pub fn set(&mut self, px: i16, py: i16) {
        if px == 0 || py == 0 {
            return;
        }
        let (px, py) = (f32::from(px), f32::from(py));
        self.mickeys_per_pixel_x = px / MICKEY_UNIT;
        self.mickeys_per_pixel_y = py / MICKEY_UNIT;
        self.pixels_per_mickey_x = MICKEY_UNIT / px;
        self.pixels_per_mickey_y = MICKEY_UNIT / py;
    }
}

/// User sensitivity settings (INT 33h 1Ah/1Bh) and the coefficients derived from them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sensitivity {
    pub x_value: u16,
    pub y_value: u16,
    pub double_speed_value: u16,
    pub x: f32,
    pub y: f32,
}

impl Sensitivity {
    pub fn new(x: u16, y: u16, double_speed: u16) -> Self {
        let mut s = Self {
            x_value: 0,
            y_value: 0,
            double_speed_value: 0,
            x: 1.0,
            y: 1.0,
        };
        s.set(x, y, double_speed);
        s
    }

    /// Store the (clamped) values; the coefficients only change when both axes are non-zero.
    pub fn set(&mut self, x: u16, y: u16, double_speed: u16) {
        self.x_value = x.min(100);
        self.y_value = y.min(100);
        self.double_speed_value = double_speed.min(100);
        if self.x_value != 0 && self.y_value != 0 {
            self.x = sensitivity_coefficient(self.x_value);
            self.y = sensitivity_coefficient(self.y_value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coefficient_endpoints() {
        assert_eq!(sensitivity_coefficient(1), 1.0 / 3.0);
        let top = sensitivity_coefficient(100);
        assert!((top - (99.0 * 99.0 / 3600.0 + 1.0 / 3.0)).abs() < 1e-6);
        assert_eq!(sensitivity_coefficient(250), top);
    }

    #[test]
    fn zero_axis_keeps_previous_coefficients() {
        let mut s = Sensitivity::new(50, 50, 50);
        let before = (s.x, s.y);
        s.set(0, 80, 120);
        assert_eq!((s.x, s.y), before);
        assert_eq!((s.x_value, s.y_value, s.double_speed_value), (0, 80, 100));
    }

    #[test]
    fn default_rate_is_eight_by_sixteen() {
        let r = MickeyRate::default();
        assert_eq!(r.mickeys_per_pixel_x, 1.0);
        assert_eq!(r.mickeys_per_pixel_y, 2.0);
        assert_eq!(r.pixels_per_mickey_y, 0.5);

        let mut r2 = r;
        r2.set(0, 4);
        assert_eq!(r2, r);
    }

    #[test]
    fn wrap_matches_single_step_for_small_overshoot() {
        assert_eq!(wrap_signed_16(32768.0), -32768.0);
        assert_eq!(wrap_signed_16(-32769.0), 32767.0);
        assert_eq!(wrap_signed_16(100.5), 100.5);
        assert_eq!(wrap_signed_16(-32768.5), -32768.5);
    }
}
