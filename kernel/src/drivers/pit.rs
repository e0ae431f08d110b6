// =============================================================================
// Ferrite OS — i8254 Programmable Interval Timer
// =============================================================================
//
// The PIT is a free-running 16-bit counter that counts DOWN from a
// programmed divisor to one and reloads, raising an interrupt each time it
// does. This driver turns that wrapping counter into a monotonic
// (seconds, sub-second-ticks) clock and feeds the clock framework one
// trigger per period for the scheduler tick.
//
// HOW TIME IS ACCUMULATED:
//   Every update latches the counter, converts it to an ascending tick
//   count within the current period, and adds the delta since the previous
//   read to an accumulator kept modulo the counter frequency. A read below
//   the previous one means the counter wrapped — at most ONCE, which is
//   the documented limit of this scheme: the 16-bit counter simply cannot
//   encode how many whole periods passed between two reads.
//
//   The interrupt handler has one extra piece of evidence the polled
//   update lacks: the interrupt itself proves a full period elapsed. If
//   the update saw no wrap, the handler credits one period outright.
//
// CONCURRENCY:
//   Driver state is shared between the interrupt handler and thread-
//   context gettime() callers on the boot core. Exclusion is purely the
//   masking discipline (IntrCell) — never a mutex, because the handler
//   must always be able to run.
// =============================================================================

use crate::bus::{
    Bus, Device, DeviceError, Driver, IntrFilter, IntrHandler, IrqController, Resource,
    ResourceKind, Services,
};
use crate::sync::IntrCell;
use crate::time::BinTime;
use crate::timer::{ClockFramework, Timer, TimerError, TimerFlags, TimerOps};
use alloc::sync::Arc;
use spin::Once;

/// Input clock of the i8254, in ticks per second.
pub const TIMER_FREQ: u32 = 1_193_182;

/// Unit number the ISA enumeration assigns to the PIT.
const PIT_UNIT: u32 = 3;

// Register offsets within the I/O port resource.
const REG_CNTR0: usize = 0;
const REG_MODE: usize = 3;

// Mode/command register bits, counter 0.
const TIMER_SEL0: u8 = 0x00;
const TIMER_LATCH: u8 = 0x00;
const TIMER_16BIT: u8 = 0x30;
const TIMER_RATEGEN: u8 = 0x04;

/// Mutable per-device timekeeping record.
///
/// `(sec, cntr_modulo)` never decreases across an update and
/// `cntr_modulo` stays strictly below `frequency` — both are asserted
/// after every update.
struct PitState {
    /// Counter ticks per second. A field rather than a constant so the
    /// accumulation algorithm can be exercised at any frequency.
    frequency: u32,
    /// Programmed divisor: counter ticks in one period.
    period_cntr: u16,
    /// Ascending counter value at the last read.
    prev_cntr16: u16,
    /// Ticks accumulated since start, modulo `frequency`.
    cntr_modulo: u32,
    /// Whole seconds accumulated since start.
    sec: u64,
    /// A wrap was noticed and accounted since the last interrupt.
    noticed_overflow: bool,
}

impl PitState {
    const fn new(frequency: u32) -> PitState {
        PitState {
            frequency,
            period_cntr: 0,
            prev_cntr16: 0,
            cntr_modulo: 0,
            sec: 0,
            noticed_overflow: false,
        }
    }

    /// Rewinds accumulated time to zero for a (re)start with the given
    /// divisor.
    fn reset(&mut self, period_cntr: u16) {
        self.period_cntr = period_cntr;
        self.prev_cntr16 = 0;
        self.cntr_modulo = 0;
        self.sec = 0;
        self.noticed_overflow = false;
    }

    /// Converts a raw (descending, `period_cntr..=1`) counter value into
    /// an ascending tick count within the current period.
    fn ascending(&self, raw: u16) -> u16 {
        self.period_cntr.wrapping_sub(raw)
    }

    /// Adds `ticks`, normalizing the accumulator below one second.
    fn incr_cntr(&mut self, ticks: u16) {
        self.cntr_modulo += u32::from(ticks);
        while self.cntr_modulo >= self.frequency {
            self.cntr_modulo -= self.frequency;
            self.sec += 1;
        }
    }

    /// Folds a fresh counter reading into the accumulated time.
    ///
    /// If the reading is below the previous one the counter wrapped; one
    /// full divisor's worth of ticks is added back. At most one wrap
    /// between reads can be detected (see the module header).
    fn update(&mut self, now_cntr16: u16) {
        let last_sec = self.sec;
        let last_cntr = self.cntr_modulo;

        let mut ticks_passed = now_cntr16.wrapping_sub(self.prev_cntr16);
        if self.prev_cntr16 > now_cntr16 {
            self.noticed_overflow = true;
            ticks_passed = ticks_passed.wrapping_add(self.period_cntr);
        }

        // Keep the reading so the next update can spot a wrap.
        self.prev_cntr16 = now_cntr16;

        self.incr_cntr(ticks_passed);
        assert!(
            (self.sec, self.cntr_modulo) >= (last_sec, last_cntr),
            "accumulated time went backwards"
        );
        assert!(self.cntr_modulo < self.frequency);
    }

    /// The per-interrupt variant of `update`.
    ///
    /// Periods can still be lost: masking interrupts across a whole period
    /// with no gettime in between drops `period_cntr` ticks. Time can also
    /// jump forward by `period_cntr`, because `update` cannot see a wrap
    /// when the current reading sits above the previous one, while this
    /// path can thanks to `noticed_overflow`.
    fn interrupt_update(&mut self, now_cntr16: u16) {
        self.update(now_cntr16);
        if !self.noticed_overflow {
            // No wrap was visible in the reading, but the interrupt we are
            // servicing proves a full period elapsed. Credit it.
            let period = self.period_cntr;
            self.incr_cntr(period);
        }
        // Cleared here so the next interrupt can tell a genuine wrap from
        // one already accounted.
        self.noticed_overflow = false;
    }
}

/// Register-level access to the counter hardware.
struct PitHw {
    bus: Arc<dyn Bus>,
    regs: Resource,
}

impl PitHw {
    /// Programs counter 0 as a rate generator with the given divisor.
    fn set_frequency(&self, period_cntr: u16) {
        self.bus
            .write_1(&self.regs, REG_MODE, TIMER_SEL0 | TIMER_16BIT | TIMER_RATEGEN);
        self.bus
            .write_1(&self.regs, REG_CNTR0, (period_cntr & 0xff) as u8);
        self.bus
            .write_1(&self.regs, REG_CNTR0, (period_cntr >> 8) as u8);
    }

    /// Latches and reads the raw descending counter value.
    fn read_raw(&self) -> u16 {
        self.bus.write_1(&self.regs, REG_MODE, TIMER_SEL0 | TIMER_LATCH);
        let lo = self.bus.read_1(&self.regs, REG_CNTR0);
        let hi = self.bus.read_1(&self.regs, REG_CNTR0);
        u16::from(lo) | (u16::from(hi) << 8)
    }
}

/// State shared between the interrupt path and thread-context callers.
struct PitCore {
    hw: PitHw,
    clock: Arc<dyn ClockFramework>,
    /// The registered descriptor; set once during attach, before the
    /// interrupt handler can possibly run.
    timer: Once<Arc<Timer>>,
    state: IntrCell<PitState>,
}

impl PitCore {
    /// Forces an update from the hardware and captures the accumulated
    /// (seconds, sub-second ticks) pair, all inside one masking scope.
    fn poll_update(&self) -> (u64, u32) {
        self.state.with(|s| {
            let raw = self.hw.read_raw();
            let now = s.ascending(raw);
            s.update(now);
            (s.sec, s.cntr_modulo)
        })
    }
}

impl IntrHandler for PitCore {
    fn filter(&self) -> IntrFilter {
        self.state.with(|s| {
            let raw = self.hw.read_raw();
            let now = s.ascending(raw);
            s.interrupt_update(now);
        });
        // One period elapsed — let the clock framework run the tick.
        if let Some(timer) = self.timer.get() {
            self.clock.trigger(timer);
        }
        IntrFilter::Handled
    }
}

/// The i8254 device: descriptor operations over a `PitCore`.
pub struct Pit {
    core: Arc<PitCore>,
    pic: Arc<dyn IrqController>,
    dev: Arc<Device>,
    irq: Resource,
}

impl TimerOps for Pit {
    fn start(&self, flags: TimerFlags, _start: BinTime, period: BinTime) -> Result<(), TimerError> {
        assert!(
            flags.contains(TimerFlags::PERIODIC) && !flags.contains(TimerFlags::ONESHOT),
            "i8254 runs in periodic mode only"
        );

        // A period the 16-bit counter cannot hold is a configuration
        // defect, not a runtime condition — refuse to limp along.
        let counter = period.scale(u64::from(TIMER_FREQ)).sec;
        assert!(
            counter > 0 && counter <= 0xFFFF,
            "period not representable by the 16-bit counter ({counter} ticks)"
        );
        let period_cntr = counter as u16;

        self.core.state.with(|s| s.reset(period_cntr));
        self.core.hw.set_frequency(period_cntr);
        self.pic.setup_intr(
            &self.dev,
            &self.irq,
            self.core.clone(),
            "i8254 timer",
        );
        log::debug!("i8254: started, divisor {period_cntr}");
        Ok(())
    }

    fn stop(&self) -> Result<(), TimerError> {
        // The counter keeps running but no longer accumulates time; a
        // later start() rewinds everything anyway.
        self.pic.teardown_intr(&self.dev, &self.irq);
        log::debug!("i8254: stopped");
        Ok(())
    }

    fn gettime(&self) -> BinTime {
        let (sec, cntr_modulo) = self.core.poll_update();

        let mut bt = BinTime::from_hz(TIMER_FREQ).scale(u64::from(cntr_modulo));
        assert!(bt.sec == 0, "sub-second ticks crossed a second boundary");
        bt.sec = sec;
        bt
    }
}

/// Device-framework entry points for the i8254.
pub struct PitDriver;

impl Driver for PitDriver {
    fn description(&self) -> &'static str {
        "i8254 programmable interval timer"
    }

    fn probe(&self, dev: &Device) -> bool {
        dev.unit == PIT_UNIT
    }

    fn attach(&self, dev: &Arc<Device>, services: &Services) -> Result<(), DeviceError> {
        let regs = dev
            .take_ioports(0)
            .ok_or(DeviceError::ResourceMissing(ResourceKind::IoPort, 0))?;
        services.bus.map_resource(dev, &regs)?;
        let irq = dev
            .take_irq(0)
            .ok_or(DeviceError::ResourceMissing(ResourceKind::Irq, 0))?;

        let core = Arc::new(PitCore {
            hw: PitHw {
                bus: services.bus.clone(),
                regs,
            },
            clock: services.clock.clone(),
            timer: Once::new(),
            state: IntrCell::new(PitState::new(TIMER_FREQ)),
        });

        let pit = Arc::new(Pit {
            core: core.clone(),
            pic: services.pic.clone(),
            dev: dev.clone(),
            irq,
        });

        let tick = BinTime::from_hz(TIMER_FREQ);
        let timer = Arc::new(Timer::new(
            "i8254",
            TimerFlags::PERIODIC,
            100,
            TIMER_FREQ,
            tick,
            tick.scale(65536),
            pit,
        ));
        core.timer.call_once(|| timer.clone());
        services.clock.register(timer)?;

        log::info!("i8254: attached (unit {}, {} Hz)", dev.unit, TIMER_FREQ);
        Ok(())
    }
}
