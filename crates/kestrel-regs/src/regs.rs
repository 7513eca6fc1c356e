//! Motherboard register map.
//!
//! A fixed-layout block of 32-bit registers exposed by the FPGA over a UIO
//! window. Offsets are in bytes from the start of the mapping. The block is
//! owned exclusively by the board instance; all access goes through a scoped
//! mapping (see `kestrel-driver`).

// ── Identity and provenance ──────────────────────────────────────────────────

/// Compat number register: major in bits 16–23, minor in bits 0–7.
pub const MB_COMPAT_NUM: usize = 0x0000;

/// FPGA build datestamp (packed calendar fields; 0 = not supported).
pub const MB_DATESTAMP: usize = 0x0004;

/// FPGA build git hash (low 28 bits) + dirty-tree flag (bits 28–31).
pub const MB_GIT_HASH: usize = 0x0008;

/// Scratch register, free for software use.
pub const MB_SCRATCH: usize = 0x000C;

// ── Topology ─────────────────────────────────────────────────────────────────

/// Number of computation engines in the image.
pub const MB_NUM_CE: usize = 0x0010;

/// Number of I/O-capable computation engines.
pub const MB_NUM_IO_CE: usize = 0x0014;

// ── Clocking ─────────────────────────────────────────────────────────────────

/// Clock-control bitfield; see [`clock_ctrl`] for bit positions.
pub const MB_CLOCK_CTRL: usize = 0x0018;

// ── Misc status ──────────────────────────────────────────────────────────────

/// XADC readback.
pub const MB_XADC_RB: usize = 0x001C;

/// Bus clock rate in Hz.
pub const MB_BUS_CLK_RATE: usize = 0x0020;

/// Free-running bus-clock cycle counter.
pub const MB_BUS_COUNTER: usize = 0x0024;

// ── Uplink ports ─────────────────────────────────────────────────────────────

/// Link-type info for uplink port 0 (type code in bits 8–15).
pub const MB_LINK0_INFO: usize = 0x0028;

/// Link-type info for uplink port 1 (type code in bits 8–15).
pub const MB_LINK1_INFO: usize = 0x002C;

// ── Front-panel GPIO ownership ───────────────────────────────────────────────

/// Front-panel GPIO master select: one bit per pin, 0 = PL drives, 1 = PS
/// drives. Low 12 bits are meaningful.
pub const MB_GPIO_MASTER: usize = 0x0030;

/// Front-panel GPIO radio source: two bits per pin selecting the driving
/// radio (0–3). Low 24 bits are meaningful.
pub const MB_GPIO_RADIO_SRC: usize = 0x0034;

// ── Clock-control bit definitions ────────────────────────────────────────────

/// Bit positions within [`MB_CLOCK_CTRL`].
pub mod clock_ctrl {
    /// PPS select, internal reference at 10 MHz. `pps_sel` is one-hot encoded.
    pub const PPS_SEL_INT_10: u32 = 0;
    /// PPS select, internal reference at 25 MHz.
    pub const PPS_SEL_INT_25: u32 = 1;
    /// PPS select, external reference.
    pub const PPS_SEL_EXT: u32 = 2;
    /// PPS select, GPSDO reference.
    pub const PPS_SEL_GPSDO: u32 = 3;
    /// Mask covering the whole one-hot `pps_sel` subfield.
    pub const PPS_SEL_MASK: u32 = 0xF;

    /// PPS/trigger output enable (1 = exported to the back panel).
    pub const PPS_OUT_EN: u32 = 4;

    /// Measurement-clock MMCM reset (write 1 to hold in reset, default 0).
    pub const MEAS_CLK_RESET: u32 = 12;
    /// Measurement-clock MMCM lock indication. Read-only; must survive writes.
    pub const MEAS_CLK_LOCKED: u32 = 13;
}

// ── Link-type codes ──────────────────────────────────────────────────────────

/// Type codes found in bits 8–15 of the link-info registers.
pub mod link_code {
    /// Port unpopulated / type not reported.
    pub const NONE: u32 = 0;
    /// 1 GbE uplink.
    pub const GIGE: u32 = 1;
    /// 10 GbE uplink.
    pub const TEN_GIGE: u32 = 2;
    /// Auxiliary (white-rabbit style) uplink.
    pub const AUX: u32 = 3;
}

/// Compat number the control core is built against: `(major, minor)`.
///
/// Major must match exactly; hardware minor may be newer, never older.
pub const EXPECTED_COMPAT: (u8, u8) = (5, 2);
