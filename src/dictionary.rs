use std::{fmt, str::FromStr};

use thiserror::Error;

/// OpenCV's predefined ArUco dictionaries. Discriminants are OpenCV's ids.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(i32)]
pub enum ArucoDictionary {
    Dict4x4_50 = 0,
    Dict4x4_100,
    Dict4x4_250,
    Dict4x4_1000,
    Dict5x5_50,
    Dict5x5_100,
    Dict5x5_250,
    Dict5x5_1000,
    Dict6x6_50,
    Dict6x6_100,
    Dict6x6_250,
    Dict6x6_1000,
    Dict7x7_50,
    Dict7x7_100,
    Dict7x7_250,
    Dict7x7_1000,
    ArucoOriginal,
    AprilTag16h5,
    AprilTag25h9,
    AprilTag36h10,
    AprilTag36h11,
    ArucoMip36h12,
}

use ArucoDictionary::*;

pub const ALL: [ArucoDictionary; 22] = [
    Dict4x4_50,
    Dict4x4_100,
    Dict4x4_250,
    Dict4x4_1000,
    Dict5x5_50,
    Dict5x5_100,
    Dict5x5_250,
    Dict5x5_1000,
    Dict6x6_50,
    Dict6x6_100,
    Dict6x6_250,
    Dict6x6_1000,
    Dict7x7_50,
    Dict7x7_100,
    Dict7x7_250,
    Dict7x7_1000,
    ArucoOriginal,
    AprilTag16h5,
    AprilTag25h9,
    AprilTag36h10,
    AprilTag36h11,
    ArucoMip36h12,
];

#[derive(Debug, Error)]
#[error("unknown ArUco dictionary {0:?}")]
pub struct UnknownDictionary(pub String);

impl ArucoDictionary {
    pub fn id(self) -> i32 {
        self as i32
    }

    pub fn from_id(id: i32) -> Option<Self> {
        usize::try_from(id).ok().and_then(|i| ALL.get(i).copied())
    }

    pub fn name(self) -> &'static str {
        match self {
            Dict4x4_50 => "DICT_4X4_50",
            Dict4x4_100 => "DICT_4X4_100",
            Dict4x4_250 => "DICT_4X4_250",
            Dict4x4_1000 => "DICT_4X4_1000",
            Dict5x5_50 => "DICT_5X5_50",
            Dict5x5_100 => "DICT_5X5_100",
            Dict5x5_250 => "DICT_5X5_250",
            Dict5x5_1000 => "DICT_5X5_1000",
            Dict6x6_50 => "DICT_6X6_50",
            Dict6x6_100 => "DICT_6X6_100",
            Dict6x6_250 => "DICT_6X6_250",
            Dict6x6_1000 => "DICT_6X6_1000",
            Dict7x7_50 => "DICT_7X7_50",
            Dict7x7_100 => "DICT_7X7_100",
            Dict7x7_250 => "DICT_7X7_250",
            Dict7x7_1000 => "DICT_7X7_1000",
            ArucoOriginal => "DICT_ARUCO_ORIGINAL",
            AprilTag16h5 => "DICT_APRILTAG_16h5",
            AprilTag25h9 => "DICT_APRILTAG_25h9",
            AprilTag36h10 => "DICT_APRILTAG_36h10",
            AprilTag36h11 => "DICT_APRILTAG_36h11",
            ArucoMip36h12 => "DICT_ARUCO_MIP_36h12",
        }
    }

    /// Name for a raw id; ids outside the catalogue report the default.
    pub fn name_for_id(id: i32) -> &'static str {
        Self::from_id(id).unwrap_or_default().name()
    }

    /// Data bits per marker side, without the border.
    pub fn marker_bits(self) -> u32 {
        match self {
            Dict4x4_50 | Dict4x4_100 | Dict4x4_250 | Dict4x4_1000 | AprilTag16h5 => 4,
            Dict5x5_50 | Dict5x5_100 | Dict5x5_250 | Dict5x5_1000 | ArucoOriginal
            | AprilTag25h9 => 5,
            Dict6x6_50 | Dict6x6_100 | Dict6x6_250 | Dict6x6_1000 | AprilTag36h10
            | AprilTag36h11 | ArucoMip36h12 => 6,
            Dict7x7_50 | Dict7x7_100 | Dict7x7_250 | Dict7x7_1000 => 7,
        }
    }

    /// `id=NAME` per line, for help text.
    pub fn catalogue() -> String {
        ALL.iter()
            .map(|d| format!("{}={}\n", d.id(), d.name()))
            .collect()
    }
}

impl Default for ArucoDictionary {
    fn default() -> Self {
        Dict6x6_250
    }
}

impl fmt::Display for ArucoDictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Accepts the numeric id or the name, with or without the `DICT_` prefix.
impl FromStr for ArucoDictionary {
    type Err = UnknownDictionary;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(id) = s.parse::<i32>() {
            return Self::from_id(id).ok_or_else(|| UnknownDictionary(s.to_owned()));
        }
        let upper = s.to_ascii_uppercase();
        let wanted = upper.strip_prefix("DICT_").unwrap_or(&upper);
        ALL.iter()
            .copied()
            .find(|d| d.name()[5..].eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownDictionary(s.to_owned()))
    }
}
