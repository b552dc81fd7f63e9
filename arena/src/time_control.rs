//! Time controls and the per-move time allowance calculation.

use std::fmt;
use std::str::FromStr;

use engine::GoLimits;
use serde::{Deserialize, Serialize};

/// One stage of a time control, e.g. "40 moves in 5 minutes plus 2s per move".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSegment {
    /// Moves to play in this stage. 0 = sudden death, applies indefinitely.
    pub moves_to_play: u32,
    pub base_time_ms: u64,
    pub increment_ms: u64,
}

impl TimeSegment {
    pub fn new(moves_to_play: u32, base_time_ms: u64, increment_ms: u64) -> Self {
        Self {
            moves_to_play,
            base_time_ms,
            increment_ms,
        }
    }

    pub fn sudden_death(base_time_ms: u64, increment_ms: u64) -> Self {
        Self::new(0, base_time_ms, increment_ms)
    }

    pub fn is_sudden_death(&self) -> bool {
        self.moves_to_play == 0
    }
}

/// Time control of one side: ordered stages plus optional fixed limits.
///
/// Written as a string such as `40/300+2:60+1`, `300+2`, `inf`,
/// `movetime=1000`, `depth=8` or `nodes=100000` (base and increment in
/// seconds, decimals allowed). Several clauses can be combined with spaces.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeControl {
    pub segments: Vec<TimeSegment>,
    pub move_time_ms: Option<u64>,
    pub depth: Option<u32>,
    pub nodes: Option<u64>,
    pub mate: Option<u32>,
    pub infinite: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeControlError {
    #[error("Invalid time control segment: {0}")]
    InvalidSegment(String),
    #[error("Invalid time control limit: {0}")]
    InvalidLimit(String),
    #[error("Unknown time control clause: {0}")]
    UnknownClause(String),
}

impl TimeControl {
    /// A single sudden-death stage.
    pub fn sudden_death(base_time_ms: u64, increment_ms: u64) -> Self {
        Self {
            segments: vec![TimeSegment::sudden_death(base_time_ms, increment_ms)],
            ..Default::default()
        }
    }

    pub fn fixed_move_time(move_time_ms: u64) -> Self {
        Self {
            move_time_ms: Some(move_time_ms),
            ..Default::default()
        }
    }

    pub fn has_segments(&self) -> bool {
        !self.segments.is_empty()
    }

    pub fn has_fixed_limit(&self) -> bool {
        self.move_time_ms.is_some()
            || self.depth.is_some()
            || self.nodes.is_some()
            || self.mate.is_some()
            || self.infinite
    }

    /// No stage and no fixed limit.
    pub fn is_unlimited(&self) -> bool {
        !self.has_segments() && !self.has_fixed_limit()
    }

    /// Clock state of a side that has played `moves_played` moves.
    fn allowance(&self, moves_played: u64) -> Allowance {
        let Some(first) = self.segments.first() else {
            return Allowance::default();
        };

        let last = self.segments.len() - 1;
        let mut allotted = first.base_time_ms;
        let mut remaining_moves = moves_played;
        let mut index = 0;

        loop {
            let segment = self.segments[index];
            let span = u64::from(segment.moves_to_play);

            if segment.is_sudden_death() || remaining_moves < span {
                allotted = allotted
                    .saturating_add(remaining_moves.saturating_mul(segment.increment_ms));
                let moves_to_go = if segment.is_sudden_death() {
                    0
                } else {
                    (span - remaining_moves) as u32
                };
                return Allowance {
                    allotted_ms: allotted,
                    increment_ms: segment.increment_ms,
                    moves_to_go,
                };
            }

            if index == last {
                // The last finite stage repeats: take whole cycles at once.
                let cycles = remaining_moves / span;
                let per_cycle = span
                    .saturating_mul(segment.increment_ms)
                    .saturating_add(segment.base_time_ms);
                allotted = allotted.saturating_add(cycles.saturating_mul(per_cycle));
                remaining_moves %= span;
                continue;
            }

            allotted = allotted.saturating_add(span.saturating_mul(segment.increment_ms));
            remaining_moves -= span;
            index += 1;
            allotted = allotted.saturating_add(self.segments[index].base_time_ms);
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Allowance {
    allotted_ms: u64,
    increment_ms: u64,
    moves_to_go: u32,
}

/// Per-move budget for the side to move.
///
/// Each side's clock is computed independently from its own control and the
/// time it has used; remaining time never goes below zero.
pub fn create_go_limits(
    white_tc: &TimeControl,
    black_tc: &TimeControl,
    half_moves_played: usize,
    white_used_ms: u64,
    black_used_ms: u64,
    white_to_move: bool,
) -> GoLimits {
    let plies = half_moves_played as u64;
    let white_moves = if white_to_move { plies / 2 } else { (plies + 1) / 2 };
    let black_moves = plies - white_moves;

    let white = white_tc.allowance(white_moves);
    let black = black_tc.allowance(black_moves);
    let mover = if white_to_move { white_tc } else { black_tc };

    let has_time_control = white_tc.has_segments()
        || black_tc.has_segments()
        || white_tc.has_fixed_limit()
        || black_tc.has_fixed_limit();

    GoLimits {
        wtime_ms: white.allotted_ms.saturating_sub(white_used_ms),
        btime_ms: black.allotted_ms.saturating_sub(black_used_ms),
        winc_ms: white.increment_ms,
        binc_ms: black.increment_ms,
        moves_to_go: if white_to_move {
            white.moves_to_go
        } else {
            black.moves_to_go
        },
        move_time_ms: mover.move_time_ms,
        depth: mover.depth,
        nodes: mover.nodes,
        mate: mover.mate,
        infinite: mover.infinite,
        has_time_control,
    }
}

fn parse_seconds(text: &str) -> Option<u64> {
    let seconds: f64 = text.parse().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Some((seconds * 1000.0).round() as u64)
}

fn format_seconds(ms: u64) -> String {
    if ms % 1000 == 0 {
        (ms / 1000).to_string()
    } else {
        let text = format!("{:.3}", ms as f64 / 1000.0);
        text.trim_end_matches('0').to_string()
    }
}

fn parse_segment(text: &str) -> Result<TimeSegment, TimeControlError> {
    let invalid = || TimeControlError::InvalidSegment(text.to_string());

    let (moves, clock) = match text.split_once('/') {
        Some((moves, clock)) => (moves.parse().map_err(|_| invalid())?, clock),
        None => (0, text),
    };
    let (base, increment) = match clock.split_once('+') {
        Some((base, inc)) => (base, Some(inc)),
        None => (clock, None),
    };

    let base_time_ms = parse_seconds(base).ok_or_else(invalid)?;
    let increment_ms = match increment {
        Some(inc) => parse_seconds(inc).ok_or_else(invalid)?,
        None => 0,
    };
    Ok(TimeSegment::new(moves, base_time_ms, increment_ms))
}

impl FromStr for TimeControl {
    type Err = TimeControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut tc = TimeControl::default();

        for clause in s.split(|c: char| c.is_whitespace() || c == ',') {
            let clause = clause.trim();
            if clause.is_empty() || clause == "-" {
                continue;
            }

            if let Some((key, value)) = clause.split_once('=') {
                let invalid = || TimeControlError::InvalidLimit(clause.to_string());
                match key.to_ascii_lowercase().as_str() {
                    "movetime" | "st" => tc.move_time_ms = Some(value.parse().map_err(|_| invalid())?),
                    "depth" | "sd" => tc.depth = Some(value.parse().map_err(|_| invalid())?),
                    "nodes" => tc.nodes = Some(value.parse().map_err(|_| invalid())?),
                    "mate" => tc.mate = Some(value.parse().map_err(|_| invalid())?),
                    _ => return Err(TimeControlError::UnknownClause(clause.to_string())),
                }
                continue;
            }

            if clause.eq_ignore_ascii_case("inf") || clause.eq_ignore_ascii_case("infinite") {
                tc.infinite = true;
                continue;
            }

            if !clause.starts_with(|c: char| c.is_ascii_digit() || c == '.') {
                return Err(TimeControlError::UnknownClause(clause.to_string()));
            }
            for segment in clause.split(':') {
                tc.segments.push(parse_segment(segment)?);
            }
        }

        Ok(tc)
    }
}

impl fmt::Display for TimeControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut clauses = Vec::new();

        if self.has_segments() {
            let segments: Vec<String> = self
                .segments
                .iter()
                .map(|s| {
                    let mut text = String::new();
                    if !s.is_sudden_death() {
                        text.push_str(&format!("{}/", s.moves_to_play));
                    }
                    text.push_str(&format_seconds(s.base_time_ms));
                    if s.increment_ms > 0 {
                        text.push('+');
                        text.push_str(&format_seconds(s.increment_ms));
                    }
                    text
                })
                .collect();
            clauses.push(segments.join(":"));
        }
        if let Some(movetime) = self.move_time_ms {
            clauses.push(format!("movetime={}", movetime));
        }
        if let Some(depth) = self.depth {
            clauses.push(format!("depth={}", depth));
        }
        if let Some(nodes) = self.nodes {
            clauses.push(format!("nodes={}", nodes));
        }
        if let Some(mate) = self.mate {
            clauses.push(format!("mate={}", mate));
        }
        if self.infinite {
            clauses.push("inf".to_string());
        }

        if clauses.is_empty() {
            f.write_str("-")
        } else {
            f.write_str(&clauses.join(" "))
        }
    }
}

impl TryFrom<String> for TimeControl {
    type Error = TimeControlError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeControl> for String {
    fn from(tc: TimeControl) -> Self {
        tc.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tc(s: &str) -> TimeControl {
        s.parse().unwrap()
    }

    #[test]
    fn test_first_move_of_classical_stage() {
        let white = TimeControl {
            segments: vec![TimeSegment::new(40, 300_000, 2000)],
            ..Default::default()
        };
        let limits = create_go_limits(&white, &white, 0, 0, 0, true);
        assert_eq!(limits.wtime_ms, 300_000);
        assert_eq!(limits.winc_ms, 2000);
        assert_eq!(limits.moves_to_go, 40);
        assert!(limits.has_time_control);
    }

    #[test]
    fn test_increment_accumulates_per_move_played() {
        let t = tc("300+2");
        // White has played 10 moves and used 50s.
        let limits = create_go_limits(&t, &t, 20, 50_000, 0, true);
        assert_eq!(limits.wtime_ms, 300_000 + 10 * 2000 - 50_000);
        assert_eq!(limits.moves_to_go, 0);
    }

    #[test]
    fn test_stage_hand_off() {
        let t = tc("40/300+2:60+1");
        // White to move after 40 moves each: second (sudden-death) stage entered.
        let limits = create_go_limits(&t, &t, 80, 0, 0, true);
        assert_eq!(limits.wtime_ms, 300_000 + 40 * 2000 + 60_000);
        assert_eq!(limits.winc_ms, 1000);
        assert_eq!(limits.moves_to_go, 0);
    }

    #[test]
    fn test_last_finite_stage_repeats() {
        let t = tc("40/300");
        let limits = create_go_limits(&t, &t, 90, 0, 0, true);
        // 45 moves played: stage entered twice, 35 moves to go in the second.
        assert_eq!(limits.wtime_ms, 600_000);
        assert_eq!(limits.moves_to_go, 35);
    }

    #[test]
    fn test_black_to_move_counts_black_moves() {
        let t = tc("40/300");
        let limits = create_go_limits(&t, &t, 1, 0, 0, false);
        assert_eq!(limits.moves_to_go, 40);
        let limits = create_go_limits(&t, &t, 3, 0, 0, false);
        assert_eq!(limits.moves_to_go, 39);
    }

    #[test]
    fn test_overrun_clamps_to_zero() {
        let t = tc("60");
        let limits = create_go_limits(&t, &t, 10, 90_000, 90_000, true);
        assert_eq!(limits.wtime_ms, 0);
        assert_eq!(limits.btime_ms, 0);
    }

    #[test]
    fn test_fixed_limits_come_from_side_to_move() {
        let white = tc("movetime=500");
        let black = tc("depth=8");
        let limits = create_go_limits(&white, &black, 1, 0, 0, false);
        assert_eq!(limits.depth, Some(8));
        assert_eq!(limits.move_time_ms, None);
        assert!(limits.has_time_control);
    }

    #[test]
    fn test_no_time_control() {
        let none = TimeControl::default();
        let limits = create_go_limits(&none, &none, 0, 0, 0, true);
        assert!(!limits.has_time_control);
        assert!(none.is_unlimited());
    }

    #[test]
    fn test_parse_and_display() {
        let t = tc("40/300+2:60+1.5");
        assert_eq!(
            t.segments,
            vec![TimeSegment::new(40, 300_000, 2000), TimeSegment::new(0, 60_000, 1500)]
        );
        assert_eq!(t.to_string(), "40/300+2:60+1.5");

        assert!(tc("inf").infinite);
        assert_eq!(tc("nodes=100000").nodes, Some(100_000));
        assert_eq!(tc("300+2 depth=12").to_string(), "300+2 depth=12");
        assert_eq!(TimeControl::default().to_string(), "-");
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            "40/abc".parse::<TimeControl>(),
            Err(TimeControlError::InvalidSegment(_))
        ));
        assert!(matches!(
            "depth=deep".parse::<TimeControl>(),
            Err(TimeControlError::InvalidLimit(_))
        ));
        assert!(matches!(
            "blitz".parse::<TimeControl>(),
            Err(TimeControlError::UnknownClause(_))
        ));
    }

    #[test]
    fn test_serde_as_string() {
        let t: TimeControl = serde_json::from_str("\"40/300+2\"").unwrap();
        assert_eq!(serde_json::to_string(&t).unwrap(), "\"40/300+2\"");
    }

    fn arb_segment() -> impl Strategy<Value = TimeSegment> {
        (0u32..60, 0u64..10_000_000, 0u64..60_000)
            .prop_map(|(moves, base, inc)| TimeSegment::new(moves, base, inc))
    }

    fn arb_time_control() -> impl Strategy<Value = TimeControl> {
        prop::collection::vec(arb_segment(), 0..4).prop_map(|segments| TimeControl {
            segments,
            ..Default::default()
        })
    }

    proptest! {
        #[test]
        fn prop_remaining_time_never_exceeds_allotment(
            white in arb_time_control(),
            black in arb_time_control(),
            half_moves in 0usize..2000,
            white_used in any::<u64>(),
            black_used in any::<u64>(),
            white_to_move in any::<bool>(),
        ) {
            let limits = create_go_limits(&white, &black, half_moves, white_used, black_used, white_to_move);
            let fresh = create_go_limits(&white, &black, half_moves, 0, 0, white_to_move);
            prop_assert!(limits.wtime_ms <= fresh.wtime_ms);
            prop_assert!(limits.btime_ms <= fresh.btime_ms);
            prop_assert_eq!(limits.wtime_ms, fresh.wtime_ms.saturating_sub(white_used));
        }

        #[test]
        fn prop_moves_to_go_within_stage(
            tc in arb_time_control(),
            half_moves in 0usize..2000,
        ) {
            let limits = create_go_limits(&tc, &tc, half_moves, 0, 0, half_moves % 2 == 0);
            let longest = tc.segments.iter().map(|s| s.moves_to_play).max().unwrap_or(0);
            prop_assert!(limits.moves_to_go <= longest);
        }
    }
}
