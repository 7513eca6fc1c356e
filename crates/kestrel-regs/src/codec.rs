//! Bitfield encode/decode for the motherboard register protocol.
//!
//! Everything here is a pure function of register values: no I/O, no state.
//! Decoders are deliberately permissive — unknown codes map to neutral values
//! and packed timestamps are not calendar-validated, so newer FPGA images
//! remain readable by older software.

use crate::regs::link_code;

// ── Compat number ────────────────────────────────────────────────────────────

/// Decode a compat-number register into `(major, minor)`.
pub const fn decode_compat(raw: u32) -> (u8, u8) {
    let major = ((raw >> 16) & 0xFF) as u8;
    let minor = (raw & 0xFF) as u8;
    (major, minor)
}

/// Encode `(major, minor)` into a compat-number register value.
pub const fn encode_compat(major: u8, minor: u8) -> u32 {
    ((major as u32) << 16) | (minor as u32)
}

// ── Build datestamp ──────────────────────────────────────────────────────────

/// FPGA build timestamp, decoded from the packed datestamp register.
///
/// Fields are raw bit extractions. Implausible values (month 15, hour 31, …)
/// are representable on purpose: the register layout may grow in future images
/// and a build timestamp is provenance, not control state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildTimestamp {
    /// Calendar year (offset +2000 already applied).
    pub year: u16,
    /// Month of year.
    pub month: u8,
    /// Day of month.
    pub day: u8,
    /// Hour of day.
    pub hour: u8,
    /// Minute of hour.
    pub minute: u8,
    /// Second of minute.
    pub second: u8,
}

impl std::fmt::Display for BuildTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

/// Decode the packed build-datestamp register.
///
/// Returns `None` for a raw value of zero — older FPGA images without the
/// datestamp capability read back all-zeros.
pub const fn decode_datestamp(raw: u32) -> Option<BuildTimestamp> {
    if raw == 0 {
        return None;
    }
    Some(BuildTimestamp {
        year: ((raw >> 17) & 0x3F) as u16 + 2000,
        month: ((raw >> 23) & 0x0F) as u8,
        day: ((raw >> 27) & 0x1F) as u8,
        hour: ((raw >> 12) & 0x1F) as u8,
        minute: ((raw >> 6) & 0x3F) as u8,
        second: (raw & 0x3F) as u8,
    })
}

// ── Git hash ─────────────────────────────────────────────────────────────────

/// Decode the git-hash register into `(short_hash, dirty)`.
///
/// The short hash occupies the low 28 bits; any nonzero value in bits 28–31
/// marks the build tree as dirty.
pub const fn decode_git_hash(raw: u32) -> (u32, bool) {
    (raw & 0x0FFF_FFFF, raw & 0xF000_0000 != 0)
}

// ── Link types ───────────────────────────────────────────────────────────────

/// Physical uplink port type, decoded from a link-info register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    /// Port unpopulated or type not reported.
    None,
    /// 1 GbE.
    Gige,
    /// 10 GbE.
    TenGige,
    /// Auxiliary uplink.
    Aux,
}

impl LinkType {
    /// Short label as printed in device info (`""`, `"1G"`, `"10G"`, `"Aux"`).
    pub const fn label(self) -> &'static str {
        match self {
            Self::None => "",
            Self::Gige => "1G",
            Self::TenGige => "10G",
            Self::Aux => "Aux",
        }
    }
}

/// Decode the link-type code in bits 8–15 of a link-info register.
///
/// Unknown codes map to [`LinkType::None`].
pub const fn decode_link_type(raw: u32) -> LinkType {
    match (raw & 0x0000_FF00) >> 8 {
        link_code::GIGE => LinkType::Gige,
        link_code::TEN_GIGE => LinkType::TenGige,
        link_code::AUX => LinkType::Aux,
        _ => LinkType::None,
    }
}

// ── Board variant ────────────────────────────────────────────────────────────

/// Board variant tag derived from the two uplink port types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardVariant {
    /// 1G + 10G.
    Hg,
    /// 10G + 10G.
    Xg,
    /// 10G + Aux.
    Xa,
    /// Aux + Aux.
    Aa,
    /// Unrecognized combination, or either port unreported.
    Unknown,
}

impl BoardVariant {
    /// Variant tag as printed in device info.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Hg => "HG",
            Self::Xg => "XG",
            Self::Xa => "XA",
            Self::Aa => "AA",
            Self::Unknown => "",
        }
    }
}

/// Derive the board variant from the pair of uplink port types.
///
/// The table is exact-match; anything else — including either side reading
/// [`LinkType::None`] — yields [`BoardVariant::Unknown`]. Callers treat that
/// as a diagnostic, never an error: future images may report combinations
/// this software predates.
pub const fn derive_board_variant(link0: LinkType, link1: LinkType) -> BoardVariant {
    match (link0, link1) {
        (LinkType::Gige, LinkType::TenGige) => BoardVariant::Hg,
        (LinkType::TenGige, LinkType::TenGige) => BoardVariant::Xg,
        (LinkType::TenGige, LinkType::Aux) => BoardVariant::Xa,
        (LinkType::Aux, LinkType::Aux) => BoardVariant::Aa,
        _ => BoardVariant::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compat_round_trip() {
        for major in [0u8, 1, 5, 127, 255] {
            for minor in [0u8, 2, 64, 255] {
                assert_eq!(decode_compat(encode_compat(major, minor)), (major, minor));
            }
        }
    }

    #[test]
    fn compat_ignores_reserved_bits() {
        // Bits 8–15 and 24–31 are reserved; decoding must mask them out.
        let raw = encode_compat(5, 2) | 0xAA00_AA00;
        assert_eq!(decode_compat(raw), (5, 2));
    }

    #[test]
    fn datestamp_zero_means_unsupported() {
        assert_eq!(decode_datestamp(0), None);
    }

    #[test]
    fn datestamp_any_nonzero_decodes() {
        // No calendar validation: every nonzero raw value yields a timestamp.
        for raw in [1u32, 0xFFFF_FFFF, 0x8000_0000, 0x0123_4567] {
            assert!(decode_datestamp(raw).is_some());
        }
    }

    #[test]
    fn datestamp_field_extraction() {
        // 2018-03-09 14:30:45
        let raw = (18u32 << 17) | (3 << 23) | (9 << 27) | (14 << 12) | (30 << 6) | 45;
        let ts = decode_datestamp(raw).unwrap();
        assert_eq!(ts.year, 2018);
        assert_eq!(ts.month, 3);
        assert_eq!(ts.day, 9);
        assert_eq!(ts.hour, 14);
        assert_eq!(ts.minute, 30);
        assert_eq!(ts.second, 45);
        assert_eq!(ts.to_string(), "2018-03-09 14:30:45");
    }

    #[test]
    fn git_hash_dirty_flag() {
        assert_eq!(decode_git_hash(0x0ABC_DEF1), (0x0ABC_DEF1, false));
        assert_eq!(decode_git_hash(0xFABC_DEF1), (0x0ABC_DEF1, true));
        // Any nonzero high nibble counts as dirty, not just bit 31.
        assert_eq!(decode_git_hash(0x1000_0000), (0, true));
    }

    #[test]
    fn link_type_codes() {
        assert_eq!(decode_link_type(0x0000_0000), LinkType::None);
        assert_eq!(decode_link_type(0x0000_0100), LinkType::Gige);
        assert_eq!(decode_link_type(0x0000_0200), LinkType::TenGige);
        assert_eq!(decode_link_type(0x0000_0300), LinkType::Aux);
        // Unknown codes are neutral, not an error.
        assert_eq!(decode_link_type(0x0000_7F00), LinkType::None);
    }

    #[test]
    fn board_variant_table() {
        assert_eq!(
            derive_board_variant(LinkType::Gige, LinkType::TenGige),
            BoardVariant::Hg
        );
        assert_eq!(
            derive_board_variant(LinkType::TenGige, LinkType::TenGige),
            BoardVariant::Xg
        );
        assert_eq!(
            derive_board_variant(LinkType::TenGige, LinkType::Aux),
            BoardVariant::Xa
        );
        assert_eq!(
            derive_board_variant(LinkType::Aux, LinkType::Aux),
            BoardVariant::Aa
        );
        assert_eq!(
            derive_board_variant(LinkType::None, LinkType::TenGige),
            BoardVariant::Unknown
        );
        // Reversed HG pair is not in the table.
        assert_eq!(
            derive_board_variant(LinkType::TenGige, LinkType::Gige),
            BoardVariant::Unknown
        );
    }
}
