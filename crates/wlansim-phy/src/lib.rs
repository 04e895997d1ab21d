//! # wlansim-phy
//!
//! IEEE 802.11 physical layer timing for wlansim.
//!
//! This crate provides:
//! - PHY mode selection ([`PhyMode`]) and the derived constants ([`PhyProfile`])
//! - Per-access-category timing ([`AccessTiming`])
//! - Frame protection choice ([`Protection`])
//! - Frame-exchange durations in slots ([`DurationModel`])
//! - OFDM padding arithmetic ([`pad_bits`], [`ndbps`])
//! - The mixed b/g OFDM exchange probability ([`ofdm_exchange_probability`])
//!
//! All time quantities are integer nanoseconds; conversions to slots truncate.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Frame Sizes
// ============================================================================

/// Control and header frame sizes in bits.
pub mod frame {
    /// ACK frame.
    pub const ACK_BITS: u64 = 112;
    /// RTS frame.
    pub const RTS_BITS: u64 = 160;
    /// CTS frame.
    pub const CTS_BITS: u64 = 112;
    /// MAC header plus FCS carried by every data frame.
    pub const MAC_BITS: u64 = 272;
}

/// OFDM SERVICE field length in bits.
const OFDM_SERVICE_BITS: u64 = 16;
/// OFDM tail length in bits.
const OFDM_TAIL_BITS: u64 = 6;

/// Control frame rate for OFDM exchanges.
pub const OFDM_CONTROL_RATE_BPS: u64 = 6_000_000;
/// Control frame rate for DSSS exchanges.
pub const DSSS_CONTROL_RATE_BPS: u64 = 1_000_000;

// ============================================================================
// PHY Modes
// ============================================================================

/// Configured physical layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhyMode {
    /// 802.11a, OFDM at 5 GHz.
    A,
    /// 802.11b, DSSS with short PLCP.
    #[default]
    B,
    /// 802.11g, ERP-OFDM.
    G,
    /// Mixed 802.11b/g cell.
    Mixed,
    /// Original 802.11 DSSS with long PLCP.
    Legacy,
}

impl PhyMode {
    /// Modulation used when no per-exchange draw is made.
    ///
    /// Mixed cells fall back to DSSS timing for collisions.
    pub fn base_modulation(&self) -> Modulation {
        match self {
            PhyMode::A | PhyMode::G => Modulation::Ofdm,
            PhyMode::B | PhyMode::Mixed | PhyMode::Legacy => Modulation::Dsss,
        }
    }
}

impl fmt::Display for PhyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PhyMode::A => "a",
            PhyMode::B => "b",
            PhyMode::G => "g",
            PhyMode::Mixed => "mixed",
            PhyMode::Legacy => "legacy",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for PhyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "a" => Ok(PhyMode::A),
            "b" => Ok(PhyMode::B),
            "g" => Ok(PhyMode::G),
            "m" | "mixed" => Ok(PhyMode::Mixed),
            "s" | "legacy" => Ok(PhyMode::Legacy),
            other => Err(format!("Unknown PHY mode '{}'. Use a, b, g, mixed or legacy.", other)),
        }
    }
}

/// Modulation family of a single frame exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modulation {
    /// OFDM (802.11a/g): padded symbols, 6 Mb/s control frames.
    Ofdm,
    /// DSSS (802.11b and legacy): no padding, 1 Mb/s control frames.
    Dsss,
}

// ============================================================================
// PHY Profile
// ============================================================================

/// Constants derived once from the configured [`PhyMode`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhyProfile {
    /// Mode the profile was derived from.
    pub mode: PhyMode,
    /// Slot length in nanoseconds.
    pub slot_ns: u64,
    /// SIFS in nanoseconds.
    pub sifs_ns: u64,
    /// Minimum contention window before per-category scaling.
    pub cw_min: u32,
    /// Maximum contention window before per-category scaling.
    pub cw_max: u32,
    /// OFDM preamble plus SIGNAL duration in nanoseconds.
    pub ofdm_phy_ns: u64,
    /// DSSS PLCP preamble plus header in nanoseconds.
    pub dsss_phy_ns: u64,
}

impl PhyProfile {
    /// ERP (802.11a/g) slot.
    pub const SLOT_ERP_NS: u64 = 9_000;
    /// Non-ERP slot.
    pub const SLOT_NON_ERP_NS: u64 = 20_000;
    /// SIFS for 802.11a.
    pub const SIFS_A_NS: u64 = 16_000;
    /// SIFS for 2.4 GHz PHYs.
    pub const SIFS_G_NS: u64 = 10_000;
    /// Minimum contention window for OFDM PHYs.
    pub const CW_MIN_OFDM: u32 = 15;
    /// Minimum contention window for DSSS PHYs.
    pub const CW_MIN_DSSS: u32 = 31;
    /// Maximum contention window.
    pub const CW_MAX: u32 = 1023;
    /// OFDM preamble plus SIGNAL.
    pub const OFDM_PHY_NS: u64 = 20_000;
    /// Short DSSS PLCP.
    pub const SHORT_PHY_NS: u64 = 96_000;
    /// Long DSSS PLCP.
    pub const LONG_PHY_NS: u64 = 192_000;

    /// Derive the profile for a PHY mode.
    pub fn for_mode(mode: PhyMode) -> Self {
        let (slot_ns, cw_min) = match mode {
            PhyMode::A | PhyMode::G => (Self::SLOT_ERP_NS, Self::CW_MIN_OFDM),
            PhyMode::B | PhyMode::Mixed | PhyMode::Legacy => (Self::SLOT_NON_ERP_NS, Self::CW_MIN_DSSS),
        };
        let sifs_ns = match mode {
            PhyMode::A => Self::SIFS_A_NS,
            _ => Self::SIFS_G_NS,
        };
        let dsss_phy_ns = match mode {
            PhyMode::Legacy => Self::LONG_PHY_NS,
            _ => Self::SHORT_PHY_NS,
        };
        PhyProfile {
            mode,
            slot_ns,
            sifs_ns,
            cw_min,
            cw_max: Self::CW_MAX,
            ofdm_phy_ns: Self::OFDM_PHY_NS,
            dsss_phy_ns,
        }
    }

    /// Whole slots covered by a nanosecond interval (truncating).
    pub fn slots_in(&self, ns: u64) -> u64 {
        ns / self.slot_ns
    }

    /// Bits a station at `rate_bps` sends in one slot, never zero.
    pub fn bits_per_slot(&self, rate_bps: u64) -> u64 {
        (rate_bps.saturating_mul(self.slot_ns) / 1_000_000_000).max(1)
    }

    /// PLCP duration for a modulation.
    pub fn phy_ns(&self, modulation: Modulation) -> u64 {
        match modulation {
            Modulation::Ofdm => self.ofdm_phy_ns,
            Modulation::Dsss => self.dsss_phy_ns,
        }
    }

    /// Derive the timing of one access category.
    ///
    /// Divisors of zero are treated as one; callers validate configuration
    /// before reaching this point.
    pub fn access_timing(&self, cw_min_divisor: u32, cw_max_divisor: u32, aifsn: u32) -> AccessTiming {
        let cw_min = (self.cw_min / cw_min_divisor.max(1)).max(1);
        let cw_max = (self.cw_max / cw_max_divisor.max(1)).max(cw_min);
        let aifs_ns = self.sifs_ns + aifsn as u64 * self.slot_ns;
        AccessTiming {
            cw_min,
            cw_max,
            aifs_ns,
            aifs_slots: self.slots_in(aifs_ns),
        }
    }
}

impl Default for PhyProfile {
    fn default() -> Self {
        Self::for_mode(PhyMode::default())
    }
}

/// Timing of one 802.11e access category under a given PHY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccessTiming {
    /// Minimum contention window.
    pub cw_min: u32,
    /// Maximum contention window.
    pub cw_max: u32,
    /// Arbitration inter-frame space in nanoseconds.
    pub aifs_ns: u64,
    /// AIFS expressed in whole slots.
    pub aifs_slots: u64,
}

// ============================================================================
// OFDM Padding
// ============================================================================

/// Data bits per OFDM symbol for a rate, or 1 for rates outside the OFDM table.
pub fn ndbps(rate_bps: u64) -> u64 {
    match rate_bps {
        6_000_000 => 24,
        9_000_000 => 36,
        12_000_000 => 48,
        18_000_000 => 72,
        24_000_000 => 96,
        36_000_000 => 144,
        48_000_000 => 192,
        54_000_000 => 216,
        _ => 1,
    }
}

/// Pad bits needed to fill the last OFDM symbol of a PSDU.
pub fn pad_bits(psdu_bits: u64, rate_bps: u64) -> u64 {
    let per_symbol = ndbps(rate_bps);
    let coded = OFDM_SERVICE_BITS + psdu_bits + OFDM_TAIL_BITS;
    let symbols = coded.div_ceil(per_symbol);
    symbols * per_symbol - coded
}

// ============================================================================
// Mixed Mode
// ============================================================================

/// Probability that an exchange in a mixed b/g cell runs as OFDM.
///
/// `total` stations of which `legacy` are 802.11b only: the transmitter and an
/// independently drawn receiver must both be 802.11g.
pub fn ofdm_exchange_probability(total: usize, legacy: usize) -> f64 {
    if total == 0 || legacy >= total {
        return 0.0;
    }
    let n = total as f64;
    let g = (total - legacy) as f64;
    if total == 1 {
        return 1.0;
    }
    (g / n) * ((g - 1.0) / (n - 1.0))
}

// ============================================================================
// Protection
// ============================================================================

/// Medium reservation used for a data frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Protection {
    /// RTS/CTS handshake.
    RtsCts,
    /// Transmitter-issued CTS.
    CtsToSelf,
    /// No reservation.
    Basic,
}

impl Protection {
    /// Choose the protection for a payload.
    pub fn select(payload_bits: u64, rts_threshold: u64, cts_to_self: bool) -> Self {
        if payload_bits > rts_threshold {
            if cts_to_self {
                Protection::CtsToSelf
            } else {
                Protection::RtsCts
            }
        } else {
            Protection::Basic
        }
    }
}

// ============================================================================
// Duration Model
// ============================================================================

/// One data frame exchange to be timed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameExchange {
    /// Payload length in bits.
    pub payload_bits: u64,
    /// Data rate of the transmitter.
    pub rate_bps: u64,
    /// AIFS of the transmitter's access category.
    pub aifs_ns: u64,
    /// Protection in use.
    pub protection: Protection,
}

/// Computes frame-exchange durations in slots.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DurationModel {
    profile: PhyProfile,
}

impl DurationModel {
    /// Create a duration model for a PHY profile.
    pub fn new(profile: PhyProfile) -> Self {
        DurationModel { profile }
    }

    /// Get the PHY profile.
    pub fn profile(&self) -> &PhyProfile {
        &self.profile
    }

    fn slots(&self, overhead_ns: u64, bits: u64, bits_per_slot: u64) -> u64 {
        (self.profile.slots_in(overhead_ns) + bits / bits_per_slot).max(1)
    }

    /// Duration of a complete, acknowledged exchange.
    pub fn success_slots(&self, exchange: &FrameExchange, modulation: Modulation) -> u64 {
        let p = &self.profile;
        let phy = p.phy_ns(modulation);
        let rate = exchange.rate_bps;
        let bps = p.bits_per_slot(rate);
        let data = frame::MAC_BITS + exchange.payload_bits + frame::ACK_BITS;
        let pad = |bits: u64| match modulation {
            Modulation::Ofdm => pad_bits(bits, rate),
            Modulation::Dsss => 0,
        };
        let data_pads = pad(frame::MAC_BITS) + pad(exchange.payload_bits) + pad(frame::ACK_BITS);

        match exchange.protection {
            Protection::RtsCts => {
                let overhead = exchange.aifs_ns + 3 * p.sifs_ns + 4 * phy;
                let bits = frame::RTS_BITS
                    + frame::CTS_BITS
                    + data
                    + pad(frame::RTS_BITS)
                    + pad(frame::CTS_BITS)
                    + data_pads;
                self.slots(overhead, bits, bps)
            }
            Protection::CtsToSelf => {
                let overhead = exchange.aifs_ns + 2 * p.sifs_ns + 3 * phy;
                let bits = frame::CTS_BITS + data + pad(frame::CTS_BITS) + data_pads;
                self.slots(overhead, bits, bps)
            }
            Protection::Basic => {
                let overhead = exchange.aifs_ns + p.sifs_ns + 2 * phy;
                self.slots(overhead, data + data_pads, bps)
            }
        }
    }

    /// Duration of a collision governed by `exchange`.
    ///
    /// A collided basic-access frame occupies the medium for its full data
    /// frame; a collided protected exchange only for its failed handshake.
    /// No ACK follows in either case.
    pub fn collision_slots(&self, exchange: &FrameExchange, modulation: Modulation) -> u64 {
        let p = &self.profile;
        let phy = p.phy_ns(modulation);
        let (control_rate, pad) = match modulation {
            Modulation::Ofdm => (OFDM_CONTROL_RATE_BPS, true),
            Modulation::Dsss => (DSSS_CONTROL_RATE_BPS, false),
        };
        let control_pad = |bits: u64| if pad { pad_bits(bits, control_rate) } else { 0 };
        let control_bps = p.bits_per_slot(control_rate);

        match exchange.protection {
            Protection::Basic => {
                let rate = exchange.rate_bps;
                let bits = frame::MAC_BITS + exchange.payload_bits;
                let pads = if pad {
                    pad_bits(frame::MAC_BITS, rate) + pad_bits(exchange.payload_bits, rate)
                } else {
                    0
                };
                self.slots(exchange.aifs_ns + phy, bits + pads, p.bits_per_slot(rate))
            }
            Protection::RtsCts => {
                let overhead = exchange.aifs_ns + 2 * phy + p.sifs_ns;
                let bits = frame::RTS_BITS
                    + frame::ACK_BITS
                    + control_pad(frame::RTS_BITS)
                    + control_pad(frame::ACK_BITS);
                self.slots(overhead, bits, control_bps)
            }
            Protection::CtsToSelf => {
                let overhead = exchange.aifs_ns + phy;
                let bits = frame::CTS_BITS + control_pad(frame::CTS_BITS);
                self.slots(overhead, bits, control_bps)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(payload_bits: u64, rate_bps: u64, aifs_ns: u64, protection: Protection) -> FrameExchange {
        FrameExchange {
            payload_bits,
            rate_bps,
            aifs_ns,
            protection,
        }
    }

    #[test]
    fn test_profiles() {
        let b = PhyProfile::for_mode(PhyMode::B);
        assert_eq!(b.slot_ns, 20_000);
        assert_eq!(b.cw_min, 31);
        assert_eq!(b.dsss_phy_ns, 96_000);

        let a = PhyProfile::for_mode(PhyMode::A);
        assert_eq!(a.slot_ns, 9_000);
        assert_eq!(a.sifs_ns, 16_000);
        assert_eq!(a.cw_min, 15);

        let legacy = PhyProfile::for_mode(PhyMode::Legacy);
        assert_eq!(legacy.dsss_phy_ns, 192_000);
        assert_eq!(PhyMode::Legacy.base_modulation(), Modulation::Dsss);
        assert_eq!(PhyMode::G.base_modulation(), Modulation::Ofdm);
    }

    #[test]
    fn test_phy_mode_parsing() {
        assert_eq!("a".parse::<PhyMode>(), Ok(PhyMode::A));
        assert_eq!("M".parse::<PhyMode>(), Ok(PhyMode::Mixed));
        assert_eq!("s".parse::<PhyMode>(), Ok(PhyMode::Legacy));
        assert!("n".parse::<PhyMode>().is_err());
    }

    #[test]
    fn test_access_timing() {
        let b = PhyProfile::for_mode(PhyMode::B);
        let be = b.access_timing(1, 1, 2);
        assert_eq!(be.cw_min, 31);
        assert_eq!(be.cw_max, 1023);
        // SIFS 10 us + 2 x 20 us = DIFS 50 us
        assert_eq!(be.aifs_ns, 50_000);
        assert_eq!(be.aifs_slots, 2);

        let vo = b.access_timing(4, 8, 2);
        assert_eq!(vo.cw_min, 7);
        assert_eq!(vo.cw_max, 127);
    }

    #[test]
    fn test_ndbps_has_distinct_entries() {
        assert_eq!(ndbps(6_000_000), 24);
        assert_eq!(ndbps(9_000_000), 36);
        assert_eq!(ndbps(12_000_000), 48);
        assert_eq!(ndbps(18_000_000), 72);
        assert_eq!(ndbps(24_000_000), 96);
        assert_eq!(ndbps(36_000_000), 144);
        assert_eq!(ndbps(48_000_000), 192);
        assert_eq!(ndbps(54_000_000), 216);
        assert_eq!(ndbps(11_000_000), 1);
    }

    #[test]
    fn test_pad_bits() {
        // 16 + 272 + 6 = 294 bits; at 54 Mb/s 2 symbols of 216 = 432 -> 138 pad
        assert_eq!(pad_bits(272, 54_000_000), 138);
        // At 6 Mb/s 13 symbols of 24 = 312 -> 18 pad
        assert_eq!(pad_bits(272, 6_000_000), 18);
        // Exact fit
        assert_eq!(pad_bits(24 * 10 - 22, 6_000_000), 0);
        // Rates outside the table never pad
        assert_eq!(pad_bits(8000, 11_000_000), 0);
    }

    #[test]
    fn test_ofdm_probability() {
        assert!((ofdm_exchange_probability(10, 0) - 1.0).abs() < 1e-12);
        assert_eq!(ofdm_exchange_probability(10, 10), 0.0);
        let p = ofdm_exchange_probability(4, 1);
        assert!((p - 0.75 * (2.0 / 3.0)).abs() < 1e-12);
        assert_eq!(ofdm_exchange_probability(1, 0), 1.0);
        assert_eq!(ofdm_exchange_probability(0, 0), 0.0);
    }

    #[test]
    fn test_protection_select() {
        assert_eq!(Protection::select(8000, 3000, false), Protection::RtsCts);
        assert_eq!(Protection::select(8000, 3000, true), Protection::CtsToSelf);
        assert_eq!(Protection::select(3000, 3000, false), Protection::Basic);
    }

    #[test]
    fn test_dsss_basic_success() {
        let model = DurationModel::new(PhyProfile::for_mode(PhyMode::B));
        // aifs 50 us + sifs 10 us + 2 x 96 us = 252 us -> 12 slots
        // (272 + 8000 + 112) bits at 20 bits/slot = 419 slots
        let d = model.success_slots(&exchange(8000, 1_000_000, 50_000, Protection::Basic), Modulation::Dsss);
        assert_eq!(d, 12 + 419);
    }

    #[test]
    fn test_dsss_rts_success_is_longer() {
        let model = DurationModel::new(PhyProfile::for_mode(PhyMode::B));
        let basic = model.success_slots(&exchange(8000, 1_000_000, 50_000, Protection::Basic), Modulation::Dsss);
        let rts = model.success_slots(&exchange(8000, 1_000_000, 50_000, Protection::RtsCts), Modulation::Dsss);
        let cts = model.success_slots(&exchange(8000, 1_000_000, 50_000, Protection::CtsToSelf), Modulation::Dsss);
        assert!(rts > cts);
        assert!(cts > basic);
    }

    #[test]
    fn test_ofdm_basic_success_includes_padding() {
        let model = DurationModel::new(PhyProfile::for_mode(PhyMode::G));
        // aifs = 10 + 2 x 9 = 28 us; overhead 28 + 10 + 40 = 78 us -> 8 slots
        // bits per slot at 54 Mb/s = 486
        let payload = 8000;
        let rate = 54_000_000;
        let pads = pad_bits(frame::MAC_BITS, rate) + pad_bits(payload, rate) + pad_bits(frame::ACK_BITS, rate);
        let bits = frame::MAC_BITS + payload + frame::ACK_BITS + pads;
        let d = model.success_slots(&exchange(payload, rate, 28_000, Protection::Basic), Modulation::Ofdm);
        assert_eq!(d, 8 + bits / 486);
    }

    #[test]
    fn test_dsss_basic_collision_has_no_ack() {
        let model = DurationModel::new(PhyProfile::for_mode(PhyMode::B));
        // aifs 50 us + 96 us = 146 us -> 7 slots; (272 + 8000) / 20 = 413
        let d = model.collision_slots(&exchange(8000, 1_000_000, 50_000, Protection::Basic), Modulation::Dsss);
        assert_eq!(d, 7 + 413);
    }

    #[test]
    fn test_protected_collision_uses_control_rate() {
        let model = DurationModel::new(PhyProfile::for_mode(PhyMode::B));
        // aifs 50 + 2 x 96 + 10 = 252 us -> 12 slots; (160 + 112) / 20 = 13
        let d = model.collision_slots(&exchange(20_000, 11_000_000, 50_000, Protection::RtsCts), Modulation::Dsss);
        assert_eq!(d, 12 + 13);
        // aifs 50 + 96 = 146 us -> 7 slots; 112 / 20 = 5
        let d = model.collision_slots(&exchange(20_000, 11_000_000, 50_000, Protection::CtsToSelf), Modulation::Dsss);
        assert_eq!(d, 7 + 5);
    }

    #[test]
    fn test_durations_at_least_one_slot() {
        let model = DurationModel::new(PhyProfile::for_mode(PhyMode::B));
        let d = model.collision_slots(&exchange(0, u64::MAX / 2, 0, Protection::Basic), Modulation::Dsss);
        assert!(d >= 1);
    }
}
