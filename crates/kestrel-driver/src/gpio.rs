//! Port-expander and indicator GPIO abstractions.
//!
//! The board routes clock selection, power enables, and GPS status through an
//! I2C port expander; the back panel carries three indicator LEDs on the SoC's
//! own GPIO bank. Pin positions moved between hardware revisions, so symbolic
//! pins are resolved to bit indices once, at construction, from a fixed
//! per-revision table — an unsupported revision fails fast instead of probing.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Low-level GPIO bank access, addressed by bit index.
///
/// The real implementation is [`SysfsGpioBank`]; tests substitute a mock.
pub trait GpioPins: Send + Sync {
    /// Drive a pin to `value` (0 or 1).
    ///
    /// # Errors
    ///
    /// Returns an error if the pin cannot be written.
    fn set(&self, index: usize, value: u8) -> Result<()>;

    /// Read back a pin.
    ///
    /// # Errors
    ///
    /// Returns an error if the pin cannot be read.
    fn get(&self, index: usize) -> Result<u8>;
}

// ── Symbolic pins ────────────────────────────────────────────────────────────

/// Symbolic pins on the port expander.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)] // Names are the documentation; see the revision tables.
pub enum Pin {
    PwrenClkMgt156M,
    NetclkCe,
    NetclkResetN,
    NetclkPr0,
    NetclkPr1,
    NetclkOd0,
    NetclkOd1,
    NetclkOd2,
    PwrenClkMainref,
    ClkSel25M,
    ClkSelExtB,
    ClkSelGps,
    FpgaGpioEn,
    PwrenClkWb20M,
    PwrenClkWb25M,
    GpsPhaselock,
    GpsNInitsurv,
    GpsNReset,
    GpsWarmup,
    GpsSurvey,
    GpsLockOk,
    GpsAlarm,
    PwrenGps,
    /// Unconnected expander bit, kept so the tables stay position-accurate.
    Reserved,
}

impl Pin {
    const COUNT: usize = 23;

    /// All connected pins, in enum order.
    const ALL: [Pin; Self::COUNT] = [
        Pin::PwrenClkMgt156M,
        Pin::NetclkCe,
        Pin::NetclkResetN,
        Pin::NetclkPr0,
        Pin::NetclkPr1,
        Pin::NetclkOd0,
        Pin::NetclkOd1,
        Pin::NetclkOd2,
        Pin::PwrenClkMainref,
        Pin::ClkSel25M,
        Pin::ClkSelExtB,
        Pin::ClkSelGps,
        Pin::FpgaGpioEn,
        Pin::PwrenClkWb20M,
        Pin::PwrenClkWb25M,
        Pin::GpsPhaselock,
        Pin::GpsNInitsurv,
        Pin::GpsNReset,
        Pin::GpsWarmup,
        Pin::GpsSurvey,
        Pin::GpsLockOk,
        Pin::GpsAlarm,
        Pin::PwrenGps,
    ];

    const fn ordinal(self) -> usize {
        self as usize
    }
}

/// Expander bit layout for revision C boards.
const PINS_REV_C: [Pin; 24] = [
    Pin::PwrenClkMgt156M,
    Pin::NetclkCe,
    Pin::NetclkResetN,
    Pin::NetclkPr0,
    Pin::NetclkPr1,
    Pin::NetclkOd0,
    Pin::NetclkOd1,
    Pin::NetclkOd2,
    Pin::PwrenClkMainref,
    Pin::ClkSel25M,
    Pin::ClkSelExtB,
    Pin::Reserved,
    Pin::ClkSelGps,
    Pin::FpgaGpioEn,
    Pin::PwrenClkWb20M,
    Pin::PwrenClkWb25M,
    Pin::GpsPhaselock,
    Pin::GpsNInitsurv,
    Pin::GpsNReset,
    Pin::GpsWarmup,
    Pin::GpsSurvey,
    Pin::GpsLockOk,
    Pin::GpsAlarm,
    Pin::PwrenGps,
];

/// Expander bit layout for revision D and later boards (the network-clock
/// synthesizer pins were reshuffled).
const PINS_REV_D: [Pin; 24] = [
    Pin::NetclkPr1,
    Pin::NetclkPr0,
    Pin::NetclkCe,
    Pin::NetclkResetN,
    Pin::NetclkOd2,
    Pin::NetclkOd1,
    Pin::NetclkOd0,
    Pin::PwrenClkMgt156M,
    Pin::PwrenClkMainref,
    Pin::ClkSel25M,
    Pin::ClkSelExtB,
    Pin::Reserved,
    Pin::ClkSelGps,
    Pin::FpgaGpioEn,
    Pin::PwrenClkWb20M,
    Pin::PwrenClkWb25M,
    Pin::GpsPhaselock,
    Pin::GpsNInitsurv,
    Pin::GpsNReset,
    Pin::GpsWarmup,
    Pin::GpsSurvey,
    Pin::GpsLockOk,
    Pin::GpsAlarm,
    Pin::PwrenGps,
];

/// Minimum supported hardware revision (rev C).
pub const MIN_HW_REV: u8 = 2;

// ── Port expander ────────────────────────────────────────────────────────────

/// Port-expander control, addressed by symbolic pin.
pub struct GpioExpander {
    pins: Box<dyn GpioPins>,
    /// Bit index per `Pin::ordinal()`, resolved at construction.
    index: [usize; Pin::COUNT],
}

impl std::fmt::Debug for GpioExpander {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpioExpander")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

impl GpioExpander {
    /// Resolve the pin table for `hw_rev` and wrap a GPIO bank.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for revisions older than [`MIN_HW_REV`] or a
    /// table that fails to account for a pin.
    pub fn new(hw_rev: u8, pins: Box<dyn GpioPins>) -> Result<Self> {
        if hw_rev < MIN_HW_REV {
            return Err(Error::invalid_argument(format!(
                "unsupported hardware revision {hw_rev} (minimum {MIN_HW_REV})"
            )));
        }
        let table: &[Pin; 24] = if hw_rev == MIN_HW_REV {
            &PINS_REV_C
        } else {
            &PINS_REV_D
        };

        let mut index = [0usize; Pin::COUNT];
        for pin in Pin::ALL {
            index[pin.ordinal()] = table
                .iter()
                .position(|&p| p == pin)
                .ok_or_else(|| {
                    Error::invalid_argument(format!(
                        "pin {pin:?} missing from rev {hw_rev} table"
                    ))
                })?;
        }
        Ok(Self { pins, index })
    }

    /// Assert a pin.
    ///
    /// # Errors
    ///
    /// Returns an error if the pin cannot be written.
    pub fn set(&self, pin: Pin) -> Result<()> {
        self.set_to(pin, 1)
    }

    /// Drive a pin to an explicit value.
    ///
    /// # Errors
    ///
    /// Returns an error if the pin cannot be written.
    pub fn set_to(&self, pin: Pin, value: u8) -> Result<()> {
        if pin == Pin::Reserved {
            return Err(Error::invalid_argument("reserved pin is not connected"));
        }
        self.pins.set(self.index[pin.ordinal()], value)
    }

    /// Deassert a pin.
    ///
    /// # Errors
    ///
    /// Returns an error if the pin cannot be written.
    pub fn reset(&self, pin: Pin) -> Result<()> {
        self.set_to(pin, 0)
    }

    /// Read back a pin.
    ///
    /// # Errors
    ///
    /// Returns an error if the pin cannot be read.
    pub fn get(&self, pin: Pin) -> Result<u8> {
        if pin == Pin::Reserved {
            return Err(Error::invalid_argument("reserved pin is not connected"));
        }
        self.pins.get(self.index[pin.ordinal()])
    }
}

// ── Back-panel indicators ────────────────────────────────────────────────────

/// Back-panel indicator channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Led {
    /// Session-claimed indicator.
    Link = 0,
    /// Reference-lock indicator.
    Ref = 1,
    /// GPS-lock indicator.
    Gps = 2,
}

/// Back-panel LED port: three independent single-bit outputs.
pub struct BackpanelLeds {
    pins: Box<dyn GpioPins>,
}

impl std::fmt::Debug for BackpanelLeds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackpanelLeds").finish_non_exhaustive()
    }
}

impl BackpanelLeds {
    /// Wrap a GPIO bank whose bits 0–2 drive the back-panel LEDs.
    pub fn new(pins: Box<dyn GpioPins>) -> Self {
        Self { pins }
    }

    /// Switch an indicator on or off.
    ///
    /// # Errors
    ///
    /// Returns an error if the pin cannot be written.
    pub fn set(&self, led: Led, on: bool) -> Result<()> {
        self.pins.set(led as usize, u8::from(on))
    }
}

// ── Sysfs GPIO bank ──────────────────────────────────────────────────────────

/// GPIO bank over the kernel's sysfs GPIO interface.
///
/// Pins are addressed relative to the bank's base line. `use_mask` marks
/// which bits are wired, `ddr` marks outputs; outputs are driven to
/// `default_val` at construction so the board comes up in a known state.
pub struct SysfsGpioBank {
    base: u32,
    use_mask: u32,
}

impl SysfsGpioBank {
    /// Open the GPIO chip whose sysfs label matches `chip_label` and
    /// configure the bank.
    ///
    /// # Errors
    ///
    /// Returns an error if the chip is not present or pins cannot be
    /// exported/configured.
    pub fn open(chip_label: &str, offset: u32, use_mask: u32, ddr: u32, default_val: u32) -> Result<Self> {
        let chip_base = Self::find_chip_base(chip_label)?;
        let bank = Self {
            base: chip_base + offset,
            use_mask,
        };

        for bit in 0..32 {
            if use_mask & (1 << bit) == 0 {
                continue;
            }
            let line = bank.base + bit;
            Self::export(line)?;
            let dir_path = format!("/sys/class/gpio/gpio{line}/direction");
            if ddr & (1 << bit) != 0 {
                // Writing "high"/"low" sets direction and value atomically.
                let initial = if default_val & (1 << bit) != 0 { "high" } else { "low" };
                std::fs::write(&dir_path, initial)?;
            } else {
                std::fs::write(&dir_path, "in")?;
            }
        }
        tracing::debug!("Configured GPIO bank `{chip_label}' at base {}", bank.base);
        Ok(bank)
    }

    /// Scan `/sys/class/gpio/gpiochip*` for a chip label.
    fn find_chip_base(chip_label: &str) -> Result<u32> {
        let entries = std::fs::read_dir("/sys/class/gpio")?;
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(label) = std::fs::read_to_string(path.join("label")) else {
                continue;
            };
            if !label.trim().contains(chip_label) {
                continue;
            }
            let base_raw = std::fs::read_to_string(path.join("base"))?;
            return base_raw
                .trim()
                .parse()
                .map_err(|e| Error::invalid_state(format!("bad gpiochip base: {e}")));
        }
        Err(Error::invalid_state(format!(
            "no GPIO chip labeled `{chip_label}' found"
        )))
    }

    fn export(line: u32) -> Result<()> {
        if Path::new(&format!("/sys/class/gpio/gpio{line}")).exists() {
            return Ok(());
        }
        std::fs::write("/sys/class/gpio/export", line.to_string())?;
        Ok(())
    }

    fn value_path(&self, index: usize) -> PathBuf {
        PathBuf::from(format!("/sys/class/gpio/gpio{}/value", self.base + index as u32))
    }

    fn check_wired(&self, index: usize) -> Result<()> {
        if self.use_mask & (1 << index) == 0 {
            return Err(Error::invalid_argument(format!(
                "GPIO bit {index} is not wired on this bank"
            )));
        }
        Ok(())
    }
}

impl GpioPins for SysfsGpioBank {
    fn set(&self, index: usize, value: u8) -> Result<()> {
        self.check_wired(index)?;
        std::fs::write(self.value_path(index), if value != 0 { "1" } else { "0" })?;
        Ok(())
    }

    fn get(&self, index: usize) -> Result<u8> {
        self.check_wired(index)?;
        let raw = std::fs::read_to_string(self.value_path(index))?;
        Ok(u8::from(raw.trim() != "0"))
    }
}
