//! PIO-assisted "wait for SD card ready" helper.
//!
//! After every SD command the card holds MISO low until it has finished an
//! internal operation, which on some cards can take tens of milliseconds.
//! Hot-polling SPI for that whole time wastes power. This module loads a
//! tiny PIO program onto an otherwise-idle state machine that toggles the
//! clock pin while MISO reads low, and raises a PIO interrupt the instant
//! MISO goes high. The caller `yield`s and sleeps until that interrupt,
//! exactly as it would for a DMA completion.
//!
//! The state machine owns the SCK/MOSI/MISO pins for the duration of the
//! wait; they are handed back to the SPI peripheral's pin function once the
//! wait concludes.

use pio_proc::pio_asm;
use rp2040_hal::pio::{PIOBuilder, PIOExt, Running, StateMachine, UninitStateMachine, PIO, SM0};

/// Clocks the SCK/MOSI pins high while sampling MISO (the jmp pin); once
/// MISO reads high it raises PIO interrupt 0 and parks.
fn program() -> pio::Program<32> {
    pio_asm!(
        ".side_set 1"
        ".wrap_target"
        "loop:"
        "    set pins, 1    side 0"
        "    jmp pin ready  side 1"
        "    jmp loop       side 0"
        "ready:"
        "    irq set 0      side 1"
        "    irq set 0      side 1"
        ".wrap"
    )
    .program
}

pub struct PioReady<P: PIOExt> {
    pio: PIO<P>,
    sm: Option<UninitStateMachine<(P, SM0)>>,
}

impl<P: PIOExt> PioReady<P> {
    pub fn new(pio: PIO<P>, sm: UninitStateMachine<(P, SM0)>) -> Self {
        PioReady { pio, sm: Some(sm) }
    }

    /// Install the program, configure the SCK/MOSI/MISO pins (by GPIO
    /// number) for PIO control, and start the state machine. Returns the
    /// running handle; call `[Self::finish]` once the interrupt has fired.
    pub fn start(
        &mut self,
        sck_pin: u8,
        mosi_pin: u8,
        miso_pin: u8,
        clock_div_int: u16,
        clock_div_frac: u8,
    ) -> StateMachine<(P, SM0), Running> {
        let sm = self.sm.take().expect("pio state machine already running");
        let installed = self.pio.install(&program()).expect("pio program install");

        let (mut sm, _rx, _tx) = PIOBuilder::from_program(installed)
            .side_set_pin_base(sck_pin)
            .jmp_pin(miso_pin)
            .set_pins(mosi_pin, 1)
            .clock_divisor_fixed_point(clock_div_int, clock_div_frac)
            .build(sm);

        sm.set_pindirs([(sck_pin, rp2040_hal::pio::PinDir::Output), (mosi_pin, rp2040_hal::pio::PinDir::Output), (miso_pin, rp2040_hal::pio::PinDir::Input)]);

        sm.start()
    }

    /// True once the PIO has observed MISO go high.
    pub fn interrupt_fired(&self) -> bool {
        self.pio.get_irq_raw() & 0b0001 != 0
    }

    /// Stop the state machine (must happen before clearing the interrupt, so
    /// it does not resume executing and re-raise it) and return ownership so
    /// a future wait can reuse the same state machine slot.
    pub fn finish(&mut self, sm: StateMachine<(P, SM0), Running>) {
        let (sm, installed) = sm.stop().uninit();
        self.pio.clear_irq(0b0001);
        self.pio.uninstall(installed);
        self.sm = Some(sm);
    }
}
