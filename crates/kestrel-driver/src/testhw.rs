//! Mock hardware backends shared by the unit tests.
//!
//! Everything here is state-in-a-mutex so mocks can be cloned into the board
//! while the test keeps a handle for inspection.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

use crate::board::BoardHardware;
use crate::clocking::{Daughterboard, RefClockConsumer};
use crate::error::{Error, Result};
use crate::gpio::{GpioExpander, GpioPins};
use crate::regmap::{MbRegs, RegisterBackend, RegisterWindow};
use crate::sensors::GpsClient;

use kestrel_regs::codec::encode_compat;
use kestrel_regs::regs::{clock_ctrl, MB_CLOCK_CTRL, MB_COMPAT_NUM, MB_LINK0_INFO, MB_LINK1_INFO};

// ── GPIO ─────────────────────────────────────────────────────────────────────

/// In-memory GPIO bank recording levels and write counts.
#[derive(Clone)]
pub struct MockPins {
    inner: Arc<Mutex<PinsState>>,
}

struct PinsState {
    levels: [u8; 32],
    writes: usize,
}

impl MockPins {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(PinsState {
                levels: [0; 32],
                writes: 0,
            })),
        }
    }

    /// Current level of a bit.
    pub fn level(&self, index: usize) -> u8 {
        self.inner.lock().unwrap().levels[index]
    }

    /// Force a bit from the test side without counting a write.
    pub fn force_level(&self, index: usize, value: u8) {
        self.inner.lock().unwrap().levels[index] = value;
    }

    /// Number of `set` calls seen so far.
    pub fn write_count(&self) -> usize {
        self.inner.lock().unwrap().writes
    }
}

impl GpioPins for MockPins {
    fn set(&self, index: usize, value: u8) -> Result<()> {
        let mut state = self.inner.lock().unwrap();
        state.levels[index] = value;
        state.writes += 1;
        Ok(())
    }

    fn get(&self, index: usize) -> Result<u8> {
        Ok(self.inner.lock().unwrap().levels[index])
    }
}

/// Expander over a mock bank, using the rev D pin table.
pub fn expander(pins: &MockPins) -> Arc<GpioExpander> {
    Arc::new(GpioExpander::new(3, Box::new(pins.clone())).unwrap())
}

// ── Registers ────────────────────────────────────────────────────────────────

/// In-memory register block tracking mappings and writes.
#[derive(Clone)]
pub struct MockRegisters {
    inner: Arc<Mutex<RegState>>,
}

struct RegState {
    mem: HashMap<usize, u32>,
    open_windows: usize,
    total_maps: usize,
    write_log: Vec<(usize, u32)>,
}

impl MockRegisters {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegState {
                mem: HashMap::new(),
                open_windows: 0,
                total_maps: 0,
                write_log: Vec::new(),
            })),
        }
    }

    /// Read a register from the test side.
    pub fn read(&self, offset: usize) -> u32 {
        *self.inner.lock().unwrap().mem.get(&offset).unwrap_or(&0)
    }

    /// Seed a register from the test side (not recorded in the write log).
    pub fn write(&self, offset: usize, value: u32) {
        self.inner.lock().unwrap().mem.insert(offset, value);
    }

    /// Windows currently mapped.
    pub fn open_windows(&self) -> usize {
        self.inner.lock().unwrap().open_windows
    }

    /// Mappings created since construction.
    pub fn total_maps(&self) -> usize {
        self.inner.lock().unwrap().total_maps
    }

    /// All pokes seen so far, in order.
    pub fn write_log(&self) -> Vec<(usize, u32)> {
        self.inner.lock().unwrap().write_log.clone()
    }

    pub fn clear_write_log(&self) {
        self.inner.lock().unwrap().write_log.clear();
    }
}

impl RegisterBackend for MockRegisters {
    fn map(&self) -> Result<Box<dyn RegisterWindow + '_>> {
        let mut state = self.inner.lock().unwrap();
        state.open_windows += 1;
        state.total_maps += 1;
        drop(state);
        Ok(Box::new(MockWindow { regs: self }))
    }
}

struct MockWindow<'a> {
    regs: &'a MockRegisters,
}

impl RegisterWindow for MockWindow<'_> {
    fn peek32(&self, offset: usize) -> u32 {
        *self
            .regs
            .inner
            .lock()
            .unwrap()
            .mem
            .get(&offset)
            .unwrap_or(&0)
    }

    fn poke32(&mut self, offset: usize, value: u32) {
        let mut state = self.regs.inner.lock().unwrap();
        state.mem.insert(offset, value);
        state.write_log.push((offset, value));
    }
}

impl Drop for MockWindow<'_> {
    fn drop(&mut self) {
        self.regs.inner.lock().unwrap().open_windows -= 1;
    }
}

/// Typed register interface over a mock block.
pub fn board_regs(regs: &MockRegisters) -> Arc<MbRegs> {
    Arc::new(MbRegs::new(Box::new(regs.clone())))
}

// ── Daughterboards ───────────────────────────────────────────────────────────

struct TrackingConsumer {
    last: Mutex<Option<f64>>,
}

impl RefClockConsumer for TrackingConsumer {
    fn update_ref_clock_freq(&self, freq_hz: f64) -> Result<()> {
        *self.last.lock().unwrap() = Some(freq_hz);
        Ok(())
    }
}

/// Daughterboard stub with configurable capabilities.
pub struct MockDboard {
    slot: usize,
    ref_lock: Option<bool>,
    consumer: Option<TrackingConsumer>,
}

impl MockDboard {
    /// A device that declares the ref-clock-consumer capability.
    pub fn tracking(slot: usize) -> Self {
        Self {
            slot,
            ref_lock: None,
            consumer: Some(TrackingConsumer {
                last: Mutex::new(None),
            }),
        }
    }

    /// A device with no optional capabilities.
    pub fn plain(slot: usize) -> Self {
        Self {
            slot,
            ref_lock: None,
            consumer: None,
        }
    }

    /// A device exposing a reference-lock sensor.
    pub fn with_ref_lock(slot: usize, locked: bool) -> Self {
        Self {
            slot,
            ref_lock: Some(locked),
            consumer: None,
        }
    }

    /// Last frequency pushed to the tracking capability.
    pub fn last_ref_clock_freq(&self) -> Option<f64> {
        self.consumer
            .as_ref()
            .and_then(|c| *c.last.lock().unwrap())
    }
}

impl Daughterboard for MockDboard {
    fn slot(&self) -> usize {
        self.slot
    }

    fn ref_clock_consumer(&self) -> Option<&dyn RefClockConsumer> {
        self.consumer.as_ref().map(|c| c as &dyn RefClockConsumer)
    }

    fn ref_lock(&self) -> Option<bool> {
        self.ref_lock
    }
}

// ── GPS ──────────────────────────────────────────────────────────────────────

/// GPS client replaying a scripted report sequence.
#[derive(Clone)]
pub struct ScriptedGps {
    queue: Arc<Mutex<VecDeque<Value>>>,
}

impl ScriptedGps {
    pub fn new(reports: Vec<Value>) -> Self {
        Self {
            queue: Arc::new(Mutex::new(reports.into())),
        }
    }
}

impl GpsClient for ScriptedGps {
    fn get_info(&mut self, resp_class: &str, timeout: Duration) -> Result<Value> {
        let mut queue = self.queue.lock().unwrap();
        while let Some(report) = queue.pop_front() {
            let matches = report
                .get("class")
                .and_then(Value::as_str)
                .is_some_and(|c| c.eq_ignore_ascii_case(resp_class));
            if matches {
                return Ok(report);
            }
        }
        Err(Error::Timeout {
            duration_ms: timeout.as_millis() as u64,
        })
    }
}

// ── Full bench ───────────────────────────────────────────────────────────────

/// A complete mock hardware bench for board-level tests.
pub struct MockBench {
    pub pins: MockPins,
    pub led_pins: MockPins,
    pub regs: MockRegisters,
    pub dboards: Vec<Arc<dyn Daughterboard>>,
    gps: ScriptedGps,
}

impl MockBench {
    /// A bench that brings up cleanly: matching compat, HG link pair, locked
    /// measurement clock.
    pub fn new() -> Self {
        let regs = MockRegisters::new();
        regs.write(MB_COMPAT_NUM, encode_compat(5, 2));
        regs.write(MB_LINK0_INFO, 0x0000_0100);
        regs.write(MB_LINK1_INFO, 0x0000_0200);
        regs.write(MB_CLOCK_CTRL, 1 << clock_ctrl::MEAS_CLK_LOCKED);
        Self {
            pins: MockPins::new(),
            led_pins: MockPins::new(),
            regs,
            dboards: Vec::new(),
            gps: ScriptedGps::new(Vec::new()),
        }
    }

    /// Replace the scripted GPS client.
    pub fn with_gps(mut self, gps: ScriptedGps) -> Self {
        self.gps = gps;
        self
    }

    /// Drop the measurement-clock lock bit.
    pub fn clear_mmcm_lock(&self) {
        let current = self.regs.read(MB_CLOCK_CTRL);
        self.regs
            .write(MB_CLOCK_CTRL, current & !(1 << clock_ctrl::MEAS_CLK_LOCKED));
    }

    /// Hardware handles for `Board::new`, sharing state with this bench.
    pub fn hardware(&self) -> BoardHardware {
        BoardHardware {
            hw_rev: 3,
            expander_pins: Box::new(self.pins.clone()),
            led_pins: Box::new(self.led_pins.clone()),
            regs: Box::new(self.regs.clone()),
            gps: Box::new(self.gps.clone()),
            dboards: self.dboards.clone(),
        }
    }
}
