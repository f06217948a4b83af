use std::cmp::Ordering;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Discipline {
    Batting,
    Bowling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchFormat {
    T20,
    Odi,
    Test,
}

impl MatchFormat {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "t20" => Some(Self::T20),
            "odi" => Some(Self::Odi),
            "test" => Some(Self::Test),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::T20 => "t20",
            Self::Odi => "odi",
            Self::Test => "test",
        }
    }

    /// Format-level scoring benchmarks used by the impact label and by the
    /// justification templates.
    pub fn benchmark(self) -> FormatBenchmark {
        match self {
            Self::T20 => FormatBenchmark {
                avg_strike_rate: 130.0,
                avg_economy: 8.0,
            },
            Self::Odi => FormatBenchmark {
                avg_strike_rate: 80.0,
                avg_economy: 5.5,
            },
            Self::Test => FormatBenchmark {
                avg_strike_rate: 50.0,
                avg_economy: 3.0,
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FormatBenchmark {
    pub avg_strike_rate: f64,
    pub avg_economy: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PitchType {
    Flat,
    Spin,
    Seam,
    Pace,
    Balanced,
}

impl PitchType {
    pub const ALL: [PitchType; 5] = [
        PitchType::Flat,
        PitchType::Spin,
        PitchType::Seam,
        PitchType::Pace,
        PitchType::Balanced,
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "flat" => Some(Self::Flat),
            "spin" => Some(Self::Spin),
            "seam" => Some(Self::Seam),
            "pace" => Some(Self::Pace),
            "balanced" => Some(Self::Balanced),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Flat => "flat",
            Self::Spin => "spin",
            Self::Seam => "seam",
            Self::Pace => "pace",
            Self::Balanced => "balanced",
        }
    }

    pub fn index(self) -> usize {
        match self {
            Self::Flat => 0,
            Self::Spin => 1,
            Self::Seam => 2,
            Self::Pace => 3,
            Self::Balanced => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Batter,
    Bowler,
    AllRounder,
    Keeper,
}

impl Role {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "BAT" | "BATTER" => Some(Self::Batter),
            "BOWL" | "BOWLER" => Some(Self::Bowler),
            "ALL" | "ALLROUNDER" | "ALL-ROUNDER" => Some(Self::AllRounder),
            "WK" | "KEEPER" => Some(Self::Keeper),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Batter => "BAT",
            Self::Bowler => "BOWL",
            Self::AllRounder => "ALL",
            Self::Keeper => "WK",
        }
    }

    /// Display ordering for squad reports: keeper first, bowlers last.
    pub fn display_rank(self) -> u8 {
        match self {
            Self::Keeper => 0,
            Self::Batter => 1,
            Self::AllRounder => 2,
            Self::Bowler => 3,
        }
    }
}

/// One innings-level outcome row for a single player in a single match.
///
/// The opponent side is an explicit field supplied by the upstream loader;
/// it is never re-derived here by comparing side names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InningsEvent {
    pub player_id: String,
    pub discipline: Discipline,
    pub match_id: String,
    pub seq: u32,
    pub date: NaiveDate,
    pub format: MatchFormat,
    pub venue: String,
    pub opponent: String,
    pub pitch: PitchType,
    /// Batting: runs scored. Bowling: runs conceded.
    pub runs: u32,
    /// Batting: legal balls faced. Bowling: balls bowled.
    pub balls: u32,
    /// Batting: dismissals (0 or 1). Bowling: bowler-credited wickets.
    pub wickets: u32,
}

impl InningsEvent {
    /// Chronological ordering: date, then match id, then sequence index.
    pub fn chronological(a: &InningsEvent, b: &InningsEvent) -> Ordering {
        a.date
            .cmp(&b.date)
            .then_with(|| a.match_id.cmp(&b.match_id))
            .then_with(|| a.seq.cmp(&b.seq))
    }
}
