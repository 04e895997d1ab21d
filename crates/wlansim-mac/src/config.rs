//! System-wide MAC configuration.

use serde::{Deserialize, Serialize};
use tracing::warn;
use wlansim_phy::{AccessTiming, PhyMode, PhyProfile};

/// Number of 802.11e access categories.
pub const ACCESS_CATEGORIES: usize = 4;

/// Scaling of one access category relative to the PHY defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AccessCategoryParams {
    /// PHY CWmin is divided by this value.
    pub cw_min_divisor: u32,
    /// PHY CWmax is divided by this value.
    pub cw_max_divisor: u32,
    /// AIFS number: AIFS = SIFS + aifsn * slot.
    pub aifsn: u32,
}

impl Default for AccessCategoryParams {
    fn default() -> Self {
        AccessCategoryParams {
            cw_min_divisor: 1,
            cw_max_divisor: 1,
            aifsn: 2,
        }
    }
}

/// MAC parameters fixed for a whole run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MacConfig {
    /// Physical layer.
    pub phy: PhyMode,
    /// 802.11b-only stations in a mixed cell.
    pub mixed_legacy_nodes: usize,
    /// Payloads above this many bits are protected.
    pub rts_threshold: u64,
    /// Protect with CTS-to-self instead of RTS/CTS.
    pub cts_to_self: bool,
    /// Per-category scaling, indexed by access category.
    pub access_categories: [AccessCategoryParams; ACCESS_CATEGORIES],
}

impl MacConfig {
    /// Default RTS threshold (2347 octets).
    pub const DEFAULT_RTS_THRESHOLD_BITS: u64 = 2347 * 8;

    /// PHY profile of this configuration.
    pub fn profile(&self) -> PhyProfile {
        PhyProfile::for_mode(self.phy)
    }

    /// Check the configuration for values the engine cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        for (ac, params) in self.access_categories.iter().enumerate() {
            if params.cw_min_divisor == 0 || params.cw_max_divisor == 0 {
                return Err(format!("access category {} has a zero contention window divisor", ac));
            }
        }
        Ok(())
    }

    /// Map an access category to a valid index, coercing unknown ones to best effort.
    pub fn normalize_access_category(access_category: u8) -> u8 {
        if (access_category as usize) < ACCESS_CATEGORIES {
            access_category
        } else {
            warn!("Access category {} out of range, treating as 0", access_category);
            0
        }
    }

    /// Timing of an access category under the configured PHY.
    pub fn access_timing(&self, access_category: u8) -> AccessTiming {
        let ac = Self::normalize_access_category(access_category) as usize;
        let params = self.access_categories[ac];
        self.profile()
            .access_timing(params.cw_min_divisor, params.cw_max_divisor, params.aifsn)
    }
}

impl Default for MacConfig {
    fn default() -> Self {
        MacConfig {
            phy: PhyMode::default(),
            mixed_legacy_nodes: 0,
            rts_threshold: Self::DEFAULT_RTS_THRESHOLD_BITS,
            cts_to_self: false,
            access_categories: [AccessCategoryParams::default(); ACCESS_CATEGORIES],
        }
    }
}
