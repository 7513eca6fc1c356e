//! Motherboard register-block access.
//!
//! The FPGA exposes its register block through a UIO window. Access is scoped:
//! every discrete operation maps the window, does its reads/writes, and
//! releases the mapping again — the mapping is never held across a suspension
//! point, and the RAII guard releases it on every exit path.

// MMIO registers are naturally aligned by hardware, so pointer casts are safe
#![allow(clippy::cast_ptr_alignment)]

use std::fs::File;
use std::os::unix::io::AsFd;
use std::path::Path;

use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};

use kestrel_regs::codec::{
    decode_compat, decode_datestamp, decode_git_hash, decode_link_type, derive_board_variant,
    BoardVariant, BuildTimestamp, LinkType,
};
use kestrel_regs::regs;

use crate::error::{Error, Result};

/// A mapped view of the register block.
///
/// Only exists while the scoped mapping is held; dropping the window releases
/// the mapping.
pub trait RegisterWindow {
    /// Read a 32-bit register.
    ///
    /// # Panics
    ///
    /// Panics if `offset + 4` exceeds the mapped region size.
    fn peek32(&self, offset: usize) -> u32;

    /// Write a 32-bit register.
    ///
    /// # Panics
    ///
    /// Panics if `offset + 4` exceeds the mapped region size.
    fn poke32(&mut self, offset: usize, value: u32);
}

/// Swappable provider of scoped register mappings.
///
/// The real implementation is [`UioRegisters`]; tests substitute an in-memory
/// fake.
pub trait RegisterBackend: Send + Sync {
    /// Map the register block, returning a window that releases it on drop.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying device cannot be mapped.
    fn map(&self) -> Result<Box<dyn RegisterWindow + '_>>;
}

// ── UIO backend ──────────────────────────────────────────────────────────────

/// Register backend over a UIO device, located by its sysfs label.
#[derive(Debug)]
pub struct UioRegisters {
    file: File,
    size: usize,
}

impl UioRegisters {
    /// Open the UIO device whose sysfs name matches `label`.
    ///
    /// Scans `/sys/class/uio/uio*/name` the way the kernel exports them and
    /// opens the matching `/dev/uioN`. The device stays open for the lifetime
    /// of this struct; mappings are created per access.
    ///
    /// # Errors
    ///
    /// Returns an error if no UIO node carries the label or the device node
    /// cannot be opened.
    pub fn open(label: &str) -> Result<Self> {
        let uio_class = Path::new("/sys/class/uio");
        let entries = std::fs::read_dir(uio_class)?;

        for entry in entries.flatten() {
            let name_path = entry.path().join("name");
            let Ok(name) = std::fs::read_to_string(&name_path) else {
                continue;
            };
            if name.trim() != label {
                continue;
            }

            let node = entry.file_name();
            let size = Self::read_map_size(&entry.path())?;
            let dev_path = Path::new("/dev").join(&node);
            let file = std::fs::OpenOptions::new()
                .read(true)
                .write(true)
                .open(&dev_path)?;

            tracing::debug!(
                "Opened register block `{label}' at {} ({size:#x} bytes)",
                dev_path.display()
            );
            return Ok(Self { file, size });
        }

        Err(Error::invalid_state(format!(
            "no UIO device labeled `{label}' found"
        )))
    }

    /// Read the size of map0 from sysfs (hex string).
    fn read_map_size(uio_path: &Path) -> Result<usize> {
        let raw = std::fs::read_to_string(uio_path.join("maps/map0/size"))?;
        usize::from_str_radix(raw.trim().trim_start_matches("0x"), 16)
            .map_err(|e| Error::invalid_state(format!("bad UIO map size: {e}")))
    }
}

impl RegisterBackend for UioRegisters {
    fn map(&self) -> Result<Box<dyn RegisterWindow + '_>> {
        // SAFETY: mmap of a UIO map0 region. Invariants: (1) self.file is an
        // open UIO device; (2) size came from the kernel's maps/map0/size;
        // (3) the returned ptr is valid for size bytes or Err.
        let ptr = unsafe {
            mmap(
                std::ptr::null_mut(),
                self.size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                self.file.as_fd(),
                0,
            )
            .map_err(|e| {
                Error::Io {
                    source: std::io::Error::from_raw_os_error(e.raw_os_error()),
                }
            })?
        };

        Ok(Box::new(UioWindow {
            ptr: ptr.cast(),
            size: self.size,
        }))
    }
}

struct UioWindow {
    ptr: *mut u8,
    size: usize,
}

// SAFETY: the window owns its mapping exclusively; mmap'd memory is
// process-wide, so moving it between threads does not invalidate it.
unsafe impl Send for UioWindow {}

impl RegisterWindow for UioWindow {
    fn peek32(&self, offset: usize) -> u32 {
        assert!(offset + 4 <= self.size, "Register offset out of bounds");
        // SAFETY: read_volatile necessary for MMIO - hardware can change the
        // value. ptr is valid for self.size bytes and offset is in bounds.
        unsafe { std::ptr::read_volatile(self.ptr.add(offset).cast::<u32>()) }
    }

    fn poke32(&mut self, offset: usize, value: u32) {
        assert!(offset + 4 <= self.size, "Register offset out of bounds");
        // SAFETY: write_volatile necessary for MMIO - triggers hardware side
        // effects. ptr is valid for self.size bytes and offset is in bounds.
        unsafe {
            std::ptr::write_volatile(self.ptr.add(offset).cast::<u32>(), value);
        }
    }
}

impl Drop for UioWindow {
    fn drop(&mut self) {
        // SAFETY: ptr/size were returned by mmap in map(); Drop runs at most
        // once and no references outlive the window.
        unsafe {
            // Ignore error in Drop (can't propagate, would need to log)
            let _ = munmap(self.ptr.cast(), self.size);
        }
    }
}

// ── Compat checking ──────────────────────────────────────────────────────────

/// Check a reported compat number against the minimum the software expects.
///
/// The major number must match exactly. The minor check is one-directional:
/// hardware may be newer, never older, than the minimum.
///
/// # Errors
///
/// Returns [`Error::Compatibility`] on a major mismatch or an old minor.
pub fn check_compat(
    component: &'static str,
    expected: (u8, u8),
    actual: (u8, u8),
) -> Result<()> {
    if actual.0 != expected.0 || actual.1 < expected.1 {
        return Err(Error::Compatibility {
            component,
            expected,
            actual,
        });
    }
    if actual.1 > expected.1 {
        tracing::debug!(
            "{component} minor compat number ({}.{}) is newer than expected ({}.{})",
            actual.0,
            actual.1,
            expected.0,
            expected.1
        );
    }
    Ok(())
}

// ── Typed register operations ────────────────────────────────────────────────

/// Control interface to the FPGA motherboard registers.
///
/// Every operation acquires the register mapping for its own duration only.
pub struct MbRegs {
    backend: Box<dyn RegisterBackend>,
}

impl std::fmt::Debug for MbRegs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MbRegs").finish_non_exhaustive()
    }
}

impl MbRegs {
    /// Wrap a register backend.
    pub fn new(backend: Box<dyn RegisterBackend>) -> Self {
        Self { backend }
    }

    /// Read the FPGA compat number as `(major, minor)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the register block cannot be mapped.
    pub fn compat_number(&self) -> Result<(u8, u8)> {
        let window = self.backend.map()?;
        Ok(decode_compat(window.peek32(regs::MB_COMPAT_NUM)))
    }

    /// Read the FPGA build timestamp, if the image carries one.
    ///
    /// # Errors
    ///
    /// Returns an error if the register block cannot be mapped.
    pub fn build_timestamp(&self) -> Result<Option<BuildTimestamp>> {
        let window = self.backend.map()?;
        let stamp = decode_datestamp(window.peek32(regs::MB_DATESTAMP));
        if let Some(stamp) = stamp {
            tracing::trace!("FPGA build timestamp: {stamp}");
        }
        Ok(stamp)
    }

    /// Read the FPGA build git hash as `(short_hash, dirty)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the register block cannot be mapped.
    pub fn git_hash(&self) -> Result<(u32, bool)> {
        let window = self.backend.map()?;
        let (hash, dirty) = decode_git_hash(window.peek32(regs::MB_GIT_HASH));
        tracing::trace!(
            "FPGA build GIT hash: {hash:07x} ({})",
            if dirty { "dirty" } else { "clean" }
        );
        Ok((hash, dirty))
    }

    /// Read both uplink link types and derive the board variant.
    ///
    /// Unrecognized combinations yield [`BoardVariant::Unknown`] with a
    /// warning; this is a diagnostic, never an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the register block cannot be mapped.
    pub fn board_variant(&self) -> Result<(LinkType, LinkType, BoardVariant)> {
        let window = self.backend.map()?;
        let link0_rb = window.peek32(regs::MB_LINK0_INFO);
        let link1_rb = window.peek32(regs::MB_LINK1_INFO);
        drop(window);

        tracing::trace!("Link0 info: {link0_rb:#010X}, Link1 info: {link1_rb:#010X}");
        let link0 = decode_link_type(link0_rb);
        let link1 = decode_link_type(link1_rb);
        let variant = derive_board_variant(link0, link1);
        if variant == BoardVariant::Unknown {
            tracing::warn!(
                "Unrecognized link type combination: ({}, {})",
                link0.label(),
                link1.label()
            );
        }
        Ok((link0, link1, variant))
    }

    /// Read-modify-write a register under one scoped mapping.
    ///
    /// Clears `mask` bits, ORs in `value & mask`, writes back. This is the
    /// only sanctioned way to mutate a multi-field register: bits outside
    /// `mask` — including hardware-owned read-only bits — survive the write.
    ///
    /// # Errors
    ///
    /// Returns an error if the register block cannot be mapped.
    pub fn read_modify_write(&self, offset: usize, mask: u32, value: u32) -> Result<()> {
        let mut window = self.backend.map()?;
        let current = window.peek32(offset);
        let updated = (current & !mask) | (value & mask);
        tracing::trace!("RMW {offset:#06x}: {current:#010X} -> {updated:#010X}");
        window.poke32(offset, updated);
        Ok(())
    }

    /// Write the one-hot `pps_sel` subfield of the clock-control register.
    ///
    /// # Errors
    ///
    /// Returns an error if the register block cannot be mapped.
    pub fn set_pps_select(&self, pps_sel: u32) -> Result<()> {
        self.read_modify_write(
            regs::MB_CLOCK_CTRL,
            regs::clock_ctrl::PPS_SEL_MASK,
            pps_sel,
        )
    }

    /// Enable or disable the PPS/trigger output on the back panel.
    ///
    /// # Errors
    ///
    /// Returns an error if the register block cannot be mapped.
    pub fn enable_pps_out(&self, enable: bool) -> Result<()> {
        tracing::trace!(
            "{} PPS/Trig output!",
            if enable { "Enabling" } else { "Disabling" }
        );
        let bit = 1 << regs::clock_ctrl::PPS_OUT_EN;
        self.read_modify_write(regs::MB_CLOCK_CTRL, bit, if enable { bit } else { 0 })
    }

    /// Assert or clear the measurement-clock MMCM reset.
    ///
    /// # Errors
    ///
    /// Returns an error if the register block cannot be mapped.
    pub fn reset_meas_clk_mmcm(&self, reset: bool) -> Result<()> {
        tracing::trace!(
            "{} measurement clock MMCM reset...",
            if reset { "Asserting" } else { "Clearing" }
        );
        let bit = 1 << regs::clock_ctrl::MEAS_CLK_RESET;
        self.read_modify_write(regs::MB_CLOCK_CTRL, bit, if reset { bit } else { 0 })
    }

    /// Check the lock status of the measurement-clock MMCM.
    ///
    /// An unlocked MMCM means the measurement subsystem is degraded, not that
    /// the device is unusable; this only logs.
    ///
    /// # Errors
    ///
    /// Returns an error if the register block cannot be mapped.
    pub fn meas_clk_mmcm_locked(&self) -> Result<bool> {
        let window = self.backend.map()?;
        let reg_val = window.peek32(regs::MB_CLOCK_CTRL);
        drop(window);

        let locked = reg_val & (1 << regs::clock_ctrl::MEAS_CLK_LOCKED) != 0;
        if locked {
            tracing::trace!("Measurement clock MMCM locked!");
        } else {
            tracing::warn!(
                "Measurement clock MMCM reporting unlocked. Clock-control reg: {reg_val:#010X}"
            );
        }
        Ok(locked)
    }

    /// Set the front-panel GPIO master select (one bit per pin, 12 pins).
    ///
    /// # Errors
    ///
    /// Returns an error if the register block cannot be mapped.
    pub fn set_fp_gpio_master(&self, value: u32) -> Result<()> {
        let mut window = self.backend.map()?;
        window.poke32(regs::MB_GPIO_MASTER, value);
        Ok(())
    }

    /// Read who is driving the front-panel GPIO pins (12-bit mask).
    ///
    /// # Errors
    ///
    /// Returns an error if the register block cannot be mapped.
    pub fn fp_gpio_master(&self) -> Result<u32> {
        let window = self.backend.map()?;
        Ok(window.peek32(regs::MB_GPIO_MASTER) & 0xFFF)
    }

    /// Set the per-pin radio source for the front-panel GPIO (2 bits per pin).
    ///
    /// # Errors
    ///
    /// Returns an error if the register block cannot be mapped.
    pub fn set_fp_gpio_radio_src(&self, value: u32) -> Result<()> {
        let mut window = self.backend.map()?;
        window.poke32(regs::MB_GPIO_RADIO_SRC, value);
        Ok(())
    }

    /// Read which radio drives each front-panel GPIO pin (24-bit mask).
    ///
    /// # Errors
    ///
    /// Returns an error if the register block cannot be mapped.
    pub fn fp_gpio_radio_src(&self) -> Result<u32> {
        let window = self.backend.map()?;
        Ok(window.peek32(regs::MB_GPIO_RADIO_SRC) & 0xFF_FFFF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testhw::MockRegisters;
    use kestrel_regs::regs::clock_ctrl;

    #[test]
    fn rmw_preserves_unmasked_bits() {
        let mock = MockRegisters::new();
        mock.write(regs::MB_CLOCK_CTRL, 0xDEAD_0000 | (1 << clock_ctrl::MEAS_CLK_LOCKED));
        let mb = MbRegs::new(Box::new(mock.clone()));

        mb.set_pps_select(1 << clock_ctrl::PPS_SEL_GPSDO).unwrap();

        let reg = mock.read(regs::MB_CLOCK_CTRL);
        // Hardware-owned bits survive the write.
        assert_eq!(reg & 0xDEAD_0000, 0xDEAD_0000);
        assert_ne!(reg & (1 << clock_ctrl::MEAS_CLK_LOCKED), 0);
        assert_eq!(reg & clock_ctrl::PPS_SEL_MASK, 1 << clock_ctrl::PPS_SEL_GPSDO);
    }

    #[test]
    fn pps_out_enable_is_single_bit() {
        let mock = MockRegisters::new();
        mock.write(regs::MB_CLOCK_CTRL, 1 << clock_ctrl::PPS_SEL_INT_25);
        let mb = MbRegs::new(Box::new(mock.clone()));

        mb.enable_pps_out(true).unwrap();
        assert_ne!(
            mock.read(regs::MB_CLOCK_CTRL) & (1 << clock_ctrl::PPS_OUT_EN),
            0
        );
        // pps_sel untouched
        assert_eq!(
            mock.read(regs::MB_CLOCK_CTRL) & clock_ctrl::PPS_SEL_MASK,
            1 << clock_ctrl::PPS_SEL_INT_25
        );

        mb.enable_pps_out(false).unwrap();
        assert_eq!(
            mock.read(regs::MB_CLOCK_CTRL) & (1 << clock_ctrl::PPS_OUT_EN),
            0
        );
    }

    #[test]
    fn mapping_released_after_each_operation() {
        let mock = MockRegisters::new();
        let mb = MbRegs::new(Box::new(mock.clone()));

        mb.compat_number().unwrap();
        mb.git_hash().unwrap();
        mb.enable_pps_out(true).unwrap();

        assert_eq!(mock.open_windows(), 0);
        assert_eq!(mock.total_maps(), 3);
    }

    #[test]
    fn compat_check_policy() {
        // Exact match passes.
        assert!(check_compat("FPGA", (5, 2), (5, 2)).is_ok());
        // Newer minor passes (one-directional check).
        assert!(check_compat("FPGA", (5, 2), (5, 3)).is_ok());
        // Older minor fails.
        assert!(matches!(
            check_compat("FPGA", (5, 2), (5, 1)),
            Err(Error::Compatibility { .. })
        ));
        // Major mismatch fails in either direction.
        assert!(check_compat("FPGA", (5, 2), (4, 9)).is_err());
        assert!(check_compat("FPGA", (5, 2), (6, 0)).is_err());
    }

    #[test]
    fn variant_detection_reads_both_ports() {
        let mock = MockRegisters::new();
        mock.write(regs::MB_LINK0_INFO, 0x0000_0100);
        mock.write(regs::MB_LINK1_INFO, 0x0000_0200);
        let mb = MbRegs::new(Box::new(mock));

        let (l0, l1, variant) = mb.board_variant().unwrap();
        assert_eq!(l0, LinkType::Gige);
        assert_eq!(l1, LinkType::TenGige);
        assert_eq!(variant, BoardVariant::Hg);
    }
}
