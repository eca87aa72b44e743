mod common;

use common::Rig;
use vpc_devices_input::mouse::{DispatchState, MouseEvents, Ps2Packet, MOUSE_IRQ, QUEUE_CAPACITY};
use vpc_devices_input::{IrqDispatch, MouseConfig, Registers};

#[test]
fn first_event_raises_irq_and_arms_the_limiter() {
    let mut rig = Rig::new(0x03);
    rig.press(0);
    assert!(rig.pic.is_pending(MOUSE_IRQ));
    assert!(rig.mouse.timer_in_progress());
    assert_eq!(rig.timers.next_deadline(), Some(5_000_000));

    // Further events ride on the same interval.
    rig.press(1);
    assert_eq!(rig.pic.raised_total(), 1);
    assert_eq!(rig.timers.len(), 1);
}

#[test]
fn limiter_keeps_raising_until_the_queue_drains() {
    let mut rig = Rig::new(0x03);
    rig.press(0);
    rig.press(1);
    let (dispatch, _) = rig.service_irq();
    assert_eq!(dispatch, IrqDispatch::Passthrough);
    assert_eq!(rig.mouse.events().len(), 1);

    rig.advance_ms(4);
    assert_eq!(rig.pic.raised_total(), 1);
    rig.advance_ms(1);
    assert_eq!(rig.pic.raised_total(), 2);
    rig.service_irq();
    assert!(rig.mouse.events().is_empty());

    rig.advance_ms(5);
    assert_eq!(rig.pic.raised_total(), 2);
    assert!(!rig.mouse.timer_in_progress());
    assert!(rig.timers.is_empty());
}

#[test]
fn user_routine_receives_event_registers() {
    let mut rig = Rig::new(0x03);
    let mut regs = Registers::default();
    regs.set_ax(0x0C);
    regs.set_cx(MouseEvents::LEFT_PRESSED.bits().into());
    regs.set_dx(0x0020);
    regs.es = 0x1000;
    rig.call(&mut regs);
    rig.int33(0x04, 0, 200, 80);

    rig.press(0);
    let mut regs = Registers::default();
    let dispatch = rig.mouse.int74(&mut regs);
    assert_eq!(
        dispatch,
        IrqDispatch::UserRoutine {
            segment: 0x1000,
            offset: 0x0020
        }
    );
    assert_eq!(regs.ax(), 0x02);
    assert_eq!(regs.bx(), 0x01);
    assert_eq!((regs.cx(), regs.dx()), (200, 80));
    assert_eq!((regs.si(), regs.di()), (0, 0));
    assert_eq!(rig.mouse.dispatch_state(), DispatchState::HandlerDispatched);
}

#[test]
fn nothing_is_popped_while_the_handler_runs() {
    let mut rig = Rig::new(0x03);
    rig.int33(0x0C, 0, 0x7F, 0x0020);
    rig.press(0);
    rig.press(1);

    let mut regs = Registers::default();
    assert!(matches!(
        rig.mouse.int74(&mut regs),
        IrqDispatch::UserRoutine { .. }
    ));
    let mut again = Registers::default();
    assert_eq!(rig.mouse.int74(&mut again), IrqDispatch::Passthrough);
    assert_eq!(rig.mouse.events().len(), 1);

    rig.mouse.uir_return();
    assert_eq!(rig.mouse.dispatch_state(), DispatchState::AwaitingReturn);
    rig.mouse.irq_return(&mut rig.timers);
    assert_eq!(rig.mouse.dispatch_state(), DispatchState::Idle);
}

#[test]
fn events_are_delivered_oldest_first() {
    let mut rig = Rig::new(0x03);
    rig.int33(0x0C, 0, 0x7F, 0x0020);
    rig.press(0);
    rig.press(1);
    rig.release(0);

    let kinds: Vec<u16> = (0..3).map(|_| rig.service_irq().1.ax()).collect();
    assert_eq!(kinds, vec![0x02, 0x08, 0x04]);
    assert_eq!(rig.service_irq().0, IrqDispatch::Passthrough);
}

#[test]
fn events_outside_the_mask_are_consumed_silently() {
    let mut rig = Rig::new(0x03);
    rig.int33(0x0C, 0, MouseEvents::LEFT_RELEASED.bits().into(), 0x0020);
    rig.press(0);
    assert_eq!(rig.service_irq().0, IrqDispatch::Passthrough);
    assert!(rig.mouse.events().is_empty());

    rig.release(0);
    assert!(matches!(rig.service_irq().0, IrqDispatch::UserRoutine { .. }));
}

#[test]
fn motion_coalesces_behind_pending_events() {
    let mut rig = Rig::new(0x03);
    rig.nudge(1.0, 0.0);
    rig.nudge(1.0, 0.0);
    assert_eq!(rig.mouse.events().len(), 1);
    rig.press(0);
    rig.nudge(1.0, 0.0);
    assert_eq!(rig.mouse.events().len(), 2);
}

#[test]
fn queue_drops_events_when_full() {
    let mut rig = Rig::new(0x03);
    for _ in 0..QUEUE_CAPACITY {
        rig.press(0);
        rig.release(0);
    }
    assert_eq!(rig.mouse.events().len(), QUEUE_CAPACITY);
    // Button state still tracks the host even though the events were lost.
    rig.press(2);
    assert_eq!(rig.mouse.events().len(), QUEUE_CAPACITY);
    assert!(rig.mouse.buttons().bits() & 0x04 != 0);
}

#[test]
fn ps2_callback_needs_an_installed_handler() {
    let mut rig = Rig::new(0x03);
    assert!(!rig.mouse.set_ps2_state(true, &mut rig.pic));
    assert!(rig.pic.is_masked(MOUSE_IRQ));
    assert!(!rig.mouse.ps2_enabled());

    rig.mouse.change_ps2_callback(0xF000, 0x1234);
    assert!(rig.mouse.set_ps2_state(true, &mut rig.pic));
    assert!(!rig.pic.is_masked(MOUSE_IRQ));
    assert!(rig.mouse.autolock());

    assert!(rig.mouse.set_ps2_state(false, &mut rig.pic));
    assert!(rig.pic.is_masked(MOUSE_IRQ));
}

#[test]
fn ps2_packets_carry_deltas_since_the_last_packet() {
    let mut rig = Rig::new(0x03);
    rig.mouse.change_ps2_callback(0xF000, 0x1234);
    rig.mouse.set_ps2_state(true, &mut rig.pic);

    rig.press(0);
    let (dispatch, _) = rig.service_irq();
    assert_eq!(
        dispatch,
        IrqDispatch::Ps2Callback {
            segment: 0xF000,
            offset: 0x1234,
            packet: Ps2Packet {
                status: 0x09,
                x: 0,
                y: 0
            },
        }
    );
    rig.advance_ms(5);

    // PS/2 mode doubles vertical motion and skips range clamping.
    rig.nudge(10.0, 5.0);
    let (dispatch, _) = rig.service_irq();
    let IrqDispatch::Ps2Callback { packet, .. } = dispatch else {
        panic!("expected a PS/2 callback, got {dispatch:?}");
    };
    assert_eq!(packet.words(), [0x29, 10, 251, 0]);
}

#[test]
fn mode_change_flushes_events_and_cancels_the_limiter() {
    let mut rig = Rig::new(0x03);
    rig.press(0);
    rig.set_mode(0x12);
    assert!(rig.mouse.events().is_empty());
    assert!(!rig.mouse.timer_in_progress());
    assert!(rig.timers.is_empty());
}

#[test]
fn absolute_motion_maps_onto_the_text_grid() {
    let mut rig = Rig::new(0x03);
    rig.move_abs(0.0, 0.0, 0.5, 0.5);
    assert_eq!(rig.mouse.position(), (320.0, 100.0));
    rig.move_abs(0.0, 0.0, 1.0, 1.0);
    // Clamped into the range.
    assert_eq!(rig.mouse.position(), (639.0, 199.0));
}

#[test]
fn absolute_motion_scales_to_the_graphics_range() {
    let mut rig = Rig::new(0x12);
    rig.move_abs(0.0, 0.0, 0.5, 0.25);
    assert_eq!(rig.mouse.position(), (319.5, 119.75));
}

#[test]
fn huge_square_range_falls_back_to_relative_motion() {
    let mut rig = Rig::new(0x12);
    rig.int33(0x07, 0, 0, 4096);
    rig.int33(0x08, 0, 0, 4096);
    rig.move_abs(0.0, 8.0, 0.9, 0.9);
    let (x, y) = rig.mouse.position();
    assert_eq!(x, 320.0);
    assert!((y - 244.0).abs() < 0.01, "y = {y}");
}

#[test]
fn vmware_backdoor_reports_absolute_pointer() {
    let mut rig = Rig::new(0x12);
    let magic = vpc_devices_input::mouse::VMWARE_MAGIC;

    let mut regs = Registers {
        eax: magic,
        ecx: 10,
        ..Registers::default()
    };
    assert_eq!(rig.mouse.vmware_port_read(&mut regs), 0x554A);
    assert_eq!(regs.ebx, magic);

    rig.press(0);
    rig.move_abs(0.0, 0.0, 0.5, 0.25);

    let mut regs = Registers {
        eax: magic,
        ecx: 40,
        ..Registers::default()
    };
    rig.mouse.vmware_port_read(&mut regs);
    assert_eq!(regs.eax, 4);
    let mut regs = Registers {
        eax: magic,
        ecx: 40,
        ..Registers::default()
    };
    rig.mouse.vmware_port_read(&mut regs);
    assert_eq!(regs.eax, 0);

    let mut regs = Registers {
        eax: magic,
        ecx: 39,
        ..Registers::default()
    };
    rig.mouse.vmware_port_read(&mut regs);
    assert_eq!(regs.eax, 0x20);
    assert_eq!(regs.ebx, 32767);
    assert_eq!(regs.ecx, 16383);
    assert_eq!(regs.edx, 0);
}

#[test]
fn vmware_backdoor_ignores_foreign_calls() {
    let mut rig = Rig::with_config(
        0x12,
        MouseConfig {
            vmware_backdoor: false,
            ..MouseConfig::default()
        },
    );
    let mut regs = Registers {
        eax: vpc_devices_input::mouse::VMWARE_MAGIC,
        ecx: 10,
        ..Registers::default()
    };
    let before = regs;
    assert_eq!(rig.mouse.vmware_port_read(&mut regs), 0);
    assert_eq!(regs, before);

    let mut rig = Rig::new(0x12);
    let mut regs = Registers {
        eax: 0x1234_5678,
        ecx: 10,
        ..Registers::default()
    };
    assert_eq!(rig.mouse.vmware_port_read(&mut regs), 0);
    assert_eq!(regs.ebx, 0);
}
