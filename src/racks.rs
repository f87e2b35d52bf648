// src/racks.rs
//
// =============================================================================
// NMR BATCH: RACK LAYOUTS (v 0.1 )
// =============================================================================
//
// The Inventory.
//
// Responsibilities:
// 1. Hold the gripper position tables for every supported rack layout.
// 2. Translate logical sample positions (1-based, as written in batch files)
//    into physical gripper positions.
//
// The two racks of a layout form one index space: rack A first, then rack B.

use crate::error::AcquisitionError;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// 1. POSITION TABLES
// ============================================================================

static KUKA_RACK_A: [u32; 18] = [
    40, 41, 42, 43, 44, 45, //
    48, 49, 50, 51, 52, 53, //
    56, 57, 58, 59, 60, 61,
];

static KUKA_RACK_B: [u32; 18] = [
    16, 17, 18, 19, 20, 21, //
    24, 25, 26, 27, 28, 29, //
    32, 33, 34, 35, 36, 37,
];

static PAL_RACK_A: [u32; 24] = [
    15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, //
    27, 28, 29, 30, 31, 32, 33, 34, 35, 36, 37, 38,
];

static PAL_RACK_B: [u32; 24] = [
    39, 40, 41, 42, 43, 44, 45, 46, 47, 48, 49, 50, //
    51, 52, 53, 54, 55, 56, 57, 58, 59, 60, 61, 62,
];

// ============================================================================
// 2. LAYOUT SELECTION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RackLayout {
    Kuka,
    Pal,
}

impl RackLayout {
    /// Case-insensitive lookup of a layout by name.
    pub fn from_name(name: &str) -> Result<Self, AcquisitionError> {
        match name.trim().to_ascii_uppercase().as_str() {
            "KUKA" => Ok(RackLayout::Kuka),
            "PAL" => Ok(RackLayout::Pal),
            _ => Err(AcquisitionError::InvalidConfiguration(format!(
                "Invalid rack configuration '{}' (expected KUKA or PAL)",
                name
            ))),
        }
    }

    pub fn racks(self) -> Racks {
        match self {
            RackLayout::Kuka => Racks {
                layout: self,
                rack_a: &KUKA_RACK_A,
                rack_b: &KUKA_RACK_B,
            },
            RackLayout::Pal => Racks {
                layout: self,
                rack_a: &PAL_RACK_A,
                rack_b: &PAL_RACK_B,
            },
        }
    }
}

impl FromStr for RackLayout {
    type Err = AcquisitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s)
    }
}

impl fmt::Display for RackLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RackLayout::Kuka => write!(f, "KUKA"),
            RackLayout::Pal => write!(f, "PAL"),
        }
    }
}

/// Resolves a layout name straight to its two position sequences.
pub fn get_racks(layout: &str) -> Result<Racks, AcquisitionError> {
    Ok(RackLayout::from_name(layout)?.racks())
}

// ============================================================================
// 3. RESOLVED RACKS
// ============================================================================

/// The pair of ordered gripper position sequences of one layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Racks {
    pub layout: RackLayout,
    pub rack_a: &'static [u32],
    pub rack_b: &'static [u32],
}

impl Racks {
    /// Number of addressable logical positions.
    pub fn capacity(&self) -> usize {
        self.rack_a.len() + self.rack_b.len()
    }

    /// Maps a 1-based logical position onto a gripper position.
    pub fn physical_position(&self, logical: i64) -> Result<u32, AcquisitionError> {
        let out_of_range = || AcquisitionError::PositionOutOfRange {
            position: logical,
            capacity: self.capacity(),
        };

        if logical < 1 {
            return Err(out_of_range());
        }
        let index = usize::try_from(logical - 1).map_err(|_| out_of_range())?;

        if index < self.rack_a.len() {
            Ok(self.rack_a[index])
        } else {
            self.rack_b
                .get(index - self.rack_a.len())
                .copied()
                .ok_or_else(out_of_range)
        }
    }
}
