mod common;

use common::Rig;
use proptest::prelude::*;
use vpc_devices_input::mouse::{sensitivity_coefficient, IrqDispatch, QUEUE_CAPACITY};

#[derive(Debug, Clone)]
enum HostInput {
    Move(i8, i8),
    Press(u8),
    Release(u8),
    Service,
}

fn host_input() -> impl Strategy<Value = HostInput> {
    prop_oneof![
        (any::<i8>(), any::<i8>()).prop_map(|(x, y)| HostInput::Move(x, y)),
        (0u8..4).prop_map(HostInput::Press),
        (0u8..4).prop_map(HostInput::Release),
        Just(HostInput::Service),
    ]
}

fn apply(rig: &mut Rig, input: &HostInput) -> Option<IrqDispatch> {
    match *input {
        HostInput::Move(x, y) => rig.nudge(f32::from(x), f32::from(y)),
        HostInput::Press(b) => rig.press(b),
        HostInput::Release(b) => rig.release(b),
        HostInput::Service => return Some(rig.service_irq().0),
    }
    None
}

#[derive(Debug, Clone)]
enum RangeStep {
    Horizontal(i16, i16),
    Vertical(i16, i16),
    Relative(i8, i8),
    Absolute(i8, i8, f32, f32),
}

fn range_step() -> impl Strategy<Value = RangeStep> {
    prop_oneof![
        (any::<i16>(), any::<i16>()).prop_map(|(a, b)| RangeStep::Horizontal(a, b)),
        (any::<i16>(), any::<i16>()).prop_map(|(a, b)| RangeStep::Vertical(a, b)),
        (any::<i8>(), any::<i8>()).prop_map(|(x, y)| RangeStep::Relative(x, y)),
        (any::<i8>(), any::<i8>(), 0.0f32..=1.0, 0.0f32..=1.0)
            .prop_map(|(dx, dy, x, y)| RangeStep::Absolute(dx, dy, x, y)),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn pointer_stays_inside_guest_configured_ranges(
        mode in prop::sample::select(vec![0x03u8, 0x04, 0x12, 0x13]),
        steps in prop::collection::vec(range_step(), 1..150),
    ) {
        let mut rig = Rig::new(mode);
        for step in &steps {
            match *step {
                RangeStep::Horizontal(a, b) => {
                    rig.int33(0x07, 0, a as u16, b as u16);
                    let (min_x, max_x, _, _) = rig.mouse.range();
                    prop_assert_eq!((min_x, max_x), (a.min(b), a.max(b)));
                }
                RangeStep::Vertical(a, b) => {
                    rig.int33(0x08, 0, a as u16, b as u16);
                    let (_, _, min_y, max_y) = rig.mouse.range();
                    prop_assert_eq!((min_y, max_y), (a.min(b), a.max(b)));
                }
                RangeStep::Relative(dx, dy) => rig.nudge(f32::from(dx), f32::from(dy)),
                RangeStep::Absolute(dx, dy, x, y) => {
                    rig.move_abs(f32::from(dx), f32::from(dy), x, y)
                }
            }
            let (min_x, max_x, min_y, max_y) = rig.mouse.range();
            let (x, y) = rig.mouse.position();
            prop_assert!(x >= f32::from(min_x) && x <= f32::from(max_x), "x = {x} {step:?}");
            prop_assert!(y >= f32::from(min_y) && y <= f32::from(max_y), "y = {y} {step:?}");
        }
    }

    #[test]
    fn pointer_stays_inside_the_range(
        mode in prop::sample::select(vec![0x01u8, 0x03, 0x04, 0x0D, 0x10, 0x12, 0x13]),
        inputs in prop::collection::vec(host_input(), 1..200),
    ) {
        let mut rig = Rig::new(mode);
        let (min_x, max_x, min_y, max_y) = rig.mouse.range();
        for input in &inputs {
            apply(&mut rig, input);
            let (x, y) = rig.mouse.position();
            prop_assert!(x >= f32::from(min_x) && x <= f32::from(max_x), "x = {x}");
            prop_assert!(y >= f32::from(min_y) && y <= f32::from(max_y), "y = {y}");
        }
    }

    #[test]
    fn queue_is_bounded_and_irq_follows_pending_events(
        inputs in prop::collection::vec(host_input(), 1..300),
    ) {
        let mut rig = Rig::new(0x03);
        for input in &inputs {
            apply(&mut rig, input);
            prop_assert!(rig.mouse.events().len() <= QUEUE_CAPACITY);
            // Anything left pending always has a limiter tick coming to raise IRQ 12 again.
            if !rig.mouse.events().is_empty() {
                prop_assert!(rig.mouse.timer_in_progress());
                prop_assert_eq!(rig.timers.len(), 1);
            }
        }
    }

    #[test]
    fn ps2_mode_wraps_instead_of_clamping(
        moves in prop::collection::vec((any::<i8>(), any::<i8>()), 1..400),
    ) {
        let mut rig = Rig::new(0x12);
        rig.int33(0x1A, 100, 100, 50);
        rig.int33(0x0F, 0, 1, 1);
        rig.mouse.change_ps2_callback(0xF000, 0x0100);
        rig.mouse.set_ps2_state(true, &mut rig.pic);
        for (x, y) in moves {
            rig.nudge(f32::from(x), f32::from(y));
            let (px, py) = rig.mouse.position();
            prop_assert!(px > -32769.0 && px < 32768.0, "x = {px}");
            prop_assert!(py > -32769.0 && py < 32768.0, "y = {py}");
            let (mx, my) = rig.mouse.mickeys();
            prop_assert!(mx > -32769.0 && mx < 32768.0, "mickey x = {mx}");
            prop_assert!(my > -32769.0 && my < 32768.0, "mickey y = {my}");
        }
    }

    #[test]
    fn sensitivity_curve_is_monotonic(a in 0u16..=200, b in 0u16..=200) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(sensitivity_coefficient(lo) <= sensitivity_coefficient(hi));
        prop_assert!(sensitivity_coefficient(hi) <= sensitivity_coefficient(100));
        prop_assert!(sensitivity_coefficient(lo) >= 1.0 / 3.0);
    }
}

#[test]
fn sensitivity_curve_anchors() {
    assert_eq!(sensitivity_coefficient(1), 1.0 / 3.0);
    assert_eq!(sensitivity_coefficient(0), sensitivity_coefficient(1));
    assert_eq!(sensitivity_coefficient(500), sensitivity_coefficient(100));
    assert!((sensitivity_coefficient(100) - (99.0 * 99.0 / 3600.0 + 1.0 / 3.0)).abs() < 1e-6);
}
