//! Reference-clock and time-source state machine.
//!
//! Switching the reference clock is a fixed GPIO sequence per target source
//! (the analog mux must never see an ambiguous select state); switching the
//! time source is a read-modify-write of the clock-control register's one-hot
//! `pps_sel` subfield. Both states are owned exclusively by
//! [`ClockingControl`] — nothing else writes them.
//!
//! Callers are responsible for the non-glitch ordering contract: PPS output
//! must be disabled before a clock- or time-source change and re-enabled only
//! after both settle. The state machine does not enforce this itself.

use std::str::FromStr;
use std::sync::Arc;

use kestrel_regs::regs::clock_ctrl;

use crate::error::{Error, Result};
use crate::gpio::{GpioExpander, Pin};
use crate::regmap::MbRegs;

/// Reference clock frequency of the internal oscillator.
pub const INTERNAL_REF_CLOCK_FREQ: f64 = 25e6;

/// Reference clock frequency delivered by the GPSDO.
pub const GPSDO_REF_CLOCK_FREQ: f64 = 20e6;

/// External reference frequencies the hardware accepts.
pub const VALID_EXT_CLOCK_FREQS: [f64; 3] = [10e6, 20e6, 25e6];

// ── Source enumerations ──────────────────────────────────────────────────────

/// Reference clock source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockSource {
    /// On-board 25 MHz oscillator.
    Internal,
    /// Rear-panel reference input.
    External,
    /// GPS-disciplined oscillator.
    Gpsdo,
}

impl ClockSource {
    /// All selectable clock sources.
    pub const ALL: [ClockSource; 3] = [Self::External, Self::Internal, Self::Gpsdo];

    /// Canonical lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::External => "external",
            Self::Gpsdo => "gpsdo",
        }
    }
}

impl std::fmt::Display for ClockSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClockSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "internal" => Ok(Self::Internal),
            "external" => Ok(Self::External),
            "gpsdo" => Ok(Self::Gpsdo),
            other => Err(Error::invalid_argument(format!(
                "`{other}' is not a valid clock source"
            ))),
        }
    }
}

/// Time (PPS) source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeSource {
    /// PPS derived from the internal reference.
    Internal,
    /// Rear-panel PPS input.
    External,
    /// GPSDO PPS.
    Gpsdo,
}

impl TimeSource {
    /// All selectable time sources.
    pub const ALL: [TimeSource; 3] = [Self::Internal, Self::External, Self::Gpsdo];

    /// Canonical lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::External => "external",
            Self::Gpsdo => "gpsdo",
        }
    }
}

impl std::fmt::Display for TimeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "internal" => Ok(Self::Internal),
            "external" => Ok(Self::External),
            "gpsdo" => Ok(Self::Gpsdo),
            other => Err(Error::invalid_argument(format!(
                "`{other}' is not a valid time source"
            ))),
        }
    }
}

// ── Daughterboard capability surface ─────────────────────────────────────────

/// Capability: a daughter device that tracks reference-clock changes.
pub trait RefClockConsumer: Send + Sync {
    /// Tell the device the new reference clock frequency.
    ///
    /// # Errors
    ///
    /// Returns an error if the device fails to retune.
    fn update_ref_clock_freq(&self, freq_hz: f64) -> Result<()>;
}

/// A daughter device attached to the motherboard.
///
/// Capabilities are opt-in: the default implementations declare nothing, and
/// devices without a capability are silently skipped wherever it would be
/// exercised.
pub trait Daughterboard: Send + Sync {
    /// Slot index the device occupies.
    fn slot(&self) -> usize;

    /// Reference-clock tracking capability, if the device supports it.
    fn ref_clock_consumer(&self) -> Option<&dyn RefClockConsumer> {
        None
    }

    /// Reference-lock status, if the device has a lock sensor.
    fn ref_lock(&self) -> Option<bool> {
        None
    }
}

// ── State machine ────────────────────────────────────────────────────────────

/// Owner of the board's clock-source and time-source state.
///
/// Setters are not reentrant-safe against each other; `&mut self` makes the
/// required external serialization a compile-time fact.
pub struct ClockingControl {
    gpio: Arc<GpioExpander>,
    regs: Arc<MbRegs>,
    dboards: Vec<Arc<dyn Daughterboard>>,
    clock_source: Option<ClockSource>,
    time_source: Option<TimeSource>,
    ext_clock_freq: Option<f64>,
}

impl std::fmt::Debug for ClockingControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClockingControl")
            .field("clock_source", &self.clock_source)
            .field("time_source", &self.time_source)
            .field("ext_clock_freq", &self.ext_clock_freq)
            .finish_non_exhaustive()
    }
}

impl ClockingControl {
    /// Create the state machine. No hardware is touched until a setter runs.
    pub fn new(
        gpio: Arc<GpioExpander>,
        regs: Arc<MbRegs>,
        dboards: Vec<Arc<dyn Daughterboard>>,
    ) -> Self {
        Self {
            gpio,
            regs,
            dboards,
            clock_source: None,
            time_source: None,
            ext_clock_freq: None,
        }
    }

    /// Currently selected clock source, if one has been set.
    pub fn clock_source(&self) -> Option<ClockSource> {
        self.clock_source
    }

    /// Currently selected time source, if one has been set.
    pub fn time_source(&self) -> Option<TimeSource> {
        self.time_source
    }

    /// Switch the reference clock.
    ///
    /// Idempotent: selecting the already-active source performs no GPIO or
    /// register writes. Otherwise drives the three mux-select lines in the
    /// fixed order for the target, updates state, and propagates the new
    /// reference frequency to every daughter device that declares the
    /// ref-clock-consumer capability.
    ///
    /// # Errors
    ///
    /// Returns an error on GPIO failure, or `InvalidState` when switching to
    /// `external` before an external frequency was ever supplied.
    pub fn set_clock_source(&mut self, source: ClockSource) -> Result<()> {
        if self.clock_source == Some(source) {
            tracing::trace!("Nothing to do -- clock source already set.");
            return Ok(());
        }
        tracing::debug!("Setting clock source to `{source}'");
        match source {
            ClockSource::Internal => {
                self.gpio.set(Pin::ClkSelExtB)?;
                self.gpio.set(Pin::ClkSel25M)?;
                self.gpio.reset(Pin::ClkSelGps)?;
            }
            ClockSource::Gpsdo => {
                self.gpio.set(Pin::ClkSelExtB)?;
                self.gpio.reset(Pin::ClkSel25M)?;
                self.gpio.set(Pin::ClkSelGps)?;
            }
            ClockSource::External => {
                self.gpio.reset(Pin::ClkSelExtB)?;
                self.gpio.reset(Pin::ClkSelGps)?;
                // The analog switch needs to be in a known state.
                self.gpio.set(Pin::ClkSel25M)?;
            }
        }
        self.clock_source = Some(source);

        let freq = self.ref_clock_freq()?;
        tracing::debug!("Reference clock frequency is: {} MHz", freq / 1e6);
        self.propagate_ref_clock_freq(freq)
    }

    /// Record the frequency of the external reference input.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` unless the frequency is 10, 20, or 25 MHz.
    pub fn set_ref_clock_freq(&mut self, freq: f64) -> Result<()> {
        if !VALID_EXT_CLOCK_FREQS.contains(&freq) {
            return Err(Error::invalid_argument(format!(
                "{} MHz is not a valid external reference frequency",
                freq / 1e6
            )));
        }
        tracing::debug!(
            "External reference clock frequency is {} MHz.",
            freq / 1e6
        );
        if self.ext_clock_freq == Some(freq) {
            tracing::trace!(
                "New external reference clock frequency matches previous assignment. \
                 Ignoring update command."
            );
            return Ok(());
        }
        self.ext_clock_freq = Some(freq);
        if self.clock_source == Some(ClockSource::External) {
            self.propagate_ref_clock_freq(freq)?;
        }
        Ok(())
    }

    /// Currently active reference clock frequency in Hz.
    ///
    /// A pure function of the selected source: internal is 25 MHz, GPSDO is
    /// 20 MHz, external is whatever was last supplied.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if no clock source has been selected yet, or if
    /// `external` is selected and no frequency was ever supplied.
    pub fn ref_clock_freq(&self) -> Result<f64> {
        match self.clock_source {
            None => Err(Error::invalid_state("clock source not initialized")),
            Some(ClockSource::Internal) => Ok(INTERNAL_REF_CLOCK_FREQ),
            Some(ClockSource::Gpsdo) => Ok(GPSDO_REF_CLOCK_FREQ),
            Some(ClockSource::External) => self.ext_clock_freq.ok_or_else(|| {
                Error::invalid_state("external reference frequency was never supplied")
            }),
        }
    }

    /// Switch the time (PPS) source.
    ///
    /// Updates state, then read-modify-writes the one-hot `pps_sel` subfield
    /// derived from the source and the current reference frequency — the
    /// internal PPS generator has separate taps for 10 and 25 MHz references.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an internal source on a reference other
    /// than 10 or 25 MHz, or any register-access error.
    pub fn set_time_source(&mut self, source: TimeSource) -> Result<()> {
        self.time_source = Some(source);
        let freq = self.ref_clock_freq()?;
        let pps_sel = Self::pps_select_bits(source, freq)?;
        tracing::debug!("Setting time source to `{source}'...");
        self.regs.set_pps_select(pps_sel)
    }

    /// Derive the one-hot `pps_sel` encoding for `(source, ref_clk_freq)`.
    fn pps_select_bits(source: TimeSource, ref_clk_freq: f64) -> Result<u32> {
        match source {
            TimeSource::Internal => {
                if ref_clk_freq == 10e6 {
                    Ok(1 << clock_ctrl::PPS_SEL_INT_10)
                } else if ref_clk_freq == 25e6 {
                    Ok(1 << clock_ctrl::PPS_SEL_INT_25)
                } else {
                    Err(Error::invalid_argument(format!(
                        "internal time source requires a 10 or 25 MHz reference, \
                         not {} MHz",
                        ref_clk_freq / 1e6
                    )))
                }
            }
            TimeSource::External => Ok(1 << clock_ctrl::PPS_SEL_EXT),
            TimeSource::Gpsdo => Ok(1 << clock_ctrl::PPS_SEL_GPSDO),
        }
    }

    /// Export or withhold the PPS/trigger signal on the back panel.
    ///
    /// # Errors
    ///
    /// Returns an error if the register block cannot be mapped.
    pub fn enable_pps_out(&self, enable: bool) -> Result<()> {
        self.regs.enable_pps_out(enable)
    }

    /// Assert or clear the measurement-clock MMCM reset.
    ///
    /// # Errors
    ///
    /// Returns an error if the register block cannot be mapped.
    pub fn reset_meas_clk_mmcm(&self, reset: bool) -> Result<()> {
        self.regs.reset_meas_clk_mmcm(reset)
    }

    /// Lock status of the measurement-clock MMCM.
    ///
    /// # Errors
    ///
    /// Returns an error if the register block cannot be mapped.
    pub fn meas_clk_mmcm_locked(&self) -> Result<bool> {
        self.regs.meas_clk_mmcm_locked()
    }

    fn propagate_ref_clock_freq(&self, freq: f64) -> Result<()> {
        for dboard in &self.dboards {
            if let Some(consumer) = dboard.ref_clock_consumer() {
                tracing::trace!(
                    "Updating reference clock on dboard {} to {} MHz...",
                    dboard.slot(),
                    freq / 1e6
                );
                consumer.update_ref_clock_freq(freq)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testhw::{board_regs, expander, MockDboard, MockPins, MockRegisters};

    fn clocking(
        pins: &MockPins,
        regs: &MockRegisters,
        dboards: Vec<Arc<dyn Daughterboard>>,
    ) -> ClockingControl {
        ClockingControl::new(expander(pins), board_regs(regs), dboards)
    }

    #[test]
    fn set_clock_source_is_idempotent() {
        let pins = MockPins::new();
        let regs = MockRegisters::new();
        let mut clk = clocking(&pins, &regs, vec![]);

        clk.set_clock_source(ClockSource::Internal).unwrap();
        let writes_after_first = pins.write_count();
        assert_eq!(writes_after_first, 3);

        clk.set_clock_source(ClockSource::Internal).unwrap();
        assert_eq!(pins.write_count(), writes_after_first);
    }

    #[test]
    fn gpsdo_reference_is_20_mhz_without_ext_freq() {
        let pins = MockPins::new();
        let regs = MockRegisters::new();
        let mut clk = clocking(&pins, &regs, vec![]);

        clk.set_clock_source(ClockSource::Gpsdo).unwrap();
        let freq = clk.ref_clock_freq().unwrap();
        assert!((freq - 20e6).abs() < f64::EPSILON);
    }

    #[test]
    fn external_without_frequency_is_invalid_state() {
        let pins = MockPins::new();
        let regs = MockRegisters::new();
        let mut clk = clocking(&pins, &regs, vec![]);

        assert!(matches!(
            clk.set_clock_source(ClockSource::External),
            Err(Error::InvalidState { .. })
        ));
    }

    #[test]
    fn external_frequency_validation() {
        let pins = MockPins::new();
        let regs = MockRegisters::new();
        let mut clk = clocking(&pins, &regs, vec![]);

        assert!(matches!(
            clk.set_ref_clock_freq(15e6),
            Err(Error::InvalidArgument { .. })
        ));
        clk.set_ref_clock_freq(10e6).unwrap();
        clk.set_clock_source(ClockSource::External).unwrap();
        let freq = clk.ref_clock_freq().unwrap();
        assert!((freq - 10e6).abs() < f64::EPSILON);
    }

    #[test]
    fn time_source_one_hot_tracks_reference() {
        use kestrel_regs::regs::{clock_ctrl, MB_CLOCK_CTRL};

        let pins = MockPins::new();
        let regs = MockRegisters::new();
        let mut clk = clocking(&pins, &regs, vec![]);

        // Internal reference (25 MHz) selects the int-25 tap.
        clk.set_clock_source(ClockSource::Internal).unwrap();
        clk.set_time_source(TimeSource::Internal).unwrap();
        assert_eq!(
            regs.read(MB_CLOCK_CTRL) & clock_ctrl::PPS_SEL_MASK,
            1 << clock_ctrl::PPS_SEL_INT_25
        );

        // External 10 MHz reference selects the int-10 tap.
        clk.set_ref_clock_freq(10e6).unwrap();
        clk.set_clock_source(ClockSource::External).unwrap();
        clk.set_time_source(TimeSource::Internal).unwrap();
        assert_eq!(
            regs.read(MB_CLOCK_CTRL) & clock_ctrl::PPS_SEL_MASK,
            1 << clock_ctrl::PPS_SEL_INT_10
        );

        // GPSDO time source is reference-independent.
        clk.set_time_source(TimeSource::Gpsdo).unwrap();
        assert_eq!(
            regs.read(MB_CLOCK_CTRL) & clock_ctrl::PPS_SEL_MASK,
            1 << clock_ctrl::PPS_SEL_GPSDO
        );
    }

    #[test]
    fn internal_time_source_rejects_20_mhz_reference() {
        let pins = MockPins::new();
        let regs = MockRegisters::new();
        let mut clk = clocking(&pins, &regs, vec![]);

        clk.set_clock_source(ClockSource::Gpsdo).unwrap();
        assert!(matches!(
            clk.set_time_source(TimeSource::Internal),
            Err(Error::InvalidArgument { .. })
        ));
    }

    #[test]
    fn ref_clock_updates_reach_capable_dboards_only() {
        let pins = MockPins::new();
        let regs = MockRegisters::new();
        let tracking = Arc::new(MockDboard::tracking(0));
        let plain = Arc::new(MockDboard::plain(1));
        let mut clk = clocking(
            &pins,
            &regs,
            vec![tracking.clone() as _, plain.clone() as _],
        );

        clk.set_clock_source(ClockSource::Gpsdo).unwrap();
        assert_eq!(tracking.last_ref_clock_freq(), Some(20e6));

        clk.set_clock_source(ClockSource::Internal).unwrap();
        assert_eq!(tracking.last_ref_clock_freq(), Some(25e6));
        // The non-tracking board was silently skipped throughout.
    }

    #[test]
    fn source_parsing() {
        assert_eq!("gpsdo".parse::<ClockSource>().unwrap(), ClockSource::Gpsdo);
        assert_eq!(
            "external".parse::<TimeSource>().unwrap(),
            TimeSource::External
        );
        assert!(matches!(
            "Internal".parse::<ClockSource>(),
            Err(Error::InvalidArgument { .. })
        ));
        assert!("pulse".parse::<TimeSource>().is_err());
    }
}
