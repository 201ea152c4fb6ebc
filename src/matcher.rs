/// Cross-side wave matching, direction and confidence.
///
/// Two completed waves, one per side, describe a transit when their exits
/// fall within the maximum peak gap of each other. The side whose wave has
/// the earlier center of mass was crossed first.
use serde::Serialize;

use crate::config::MatcherConfig;
use crate::wave::Wave;

/// Weight of the timing term in the confidence score
const TIMING_WEIGHT: f32 = 0.6;
/// Weight of the signal strength term
const STRENGTH_WEIGHT: f32 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    #[serde(rename = "A_TO_B")]
    AToB,
    #[serde(rename = "B_TO_A")]
    BToA,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::AToB => "A_TO_B",
            Direction::BToA => "B_TO_A",
        }
    }
}

/// A confirmed transit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub direction: Direction,
    /// 0.0 - 1.0
    pub confidence: f32,
    pub com_a_ms: f32,
    pub com_b_ms: f32,
    /// Absolute difference of the two centers of mass
    pub com_gap_ms: f32,
    pub peak_a: f32,
    pub peak_b: f32,
    /// Exit time of the later of the two waves
    pub timestamp_ms: u32,
}

fn unit(x: f32) -> f32 {
    x.clamp(0.0, 1.0)
}

/// Weighted sum of a timing term (gap over its scale) and a strength term
/// (mean peak over its scale), each saturating at 1.
pub fn confidence(com_gap_ms: f32, peak_a: f32, peak_b: f32, config: &MatcherConfig) -> f32 {
    let timing = unit(com_gap_ms / config.com_gap_scale_ms);
    let strength = unit((peak_a + peak_b) / 2.0 / config.peak_strength_scale);
    unit(TIMING_WEIGHT * timing + STRENGTH_WEIGHT * strength)
}

/// Direction from the wave timing. Equal centers of mass fall back to the
/// peak times; if those are equal too the transit is ambiguous.
pub fn resolve_direction(a: &Wave, b: &Wave) -> Option<Direction> {
    if a.center_of_mass_ms < b.center_of_mass_ms {
        Some(Direction::AToB)
    } else if b.center_of_mass_ms < a.center_of_mass_ms {
        Some(Direction::BToA)
    } else if a.peak_ms != b.peak_ms {
        // Wrapping difference keeps the comparison valid across rollover
        if (b.peak_ms.wrapping_sub(a.peak_ms) as i32) > 0 {
            Some(Direction::AToB)
        } else {
            Some(Direction::BToA)
        }
    } else {
        None
    }
}

/// Gap between the two waves' exits
pub fn exit_gap_ms(a: &Wave, b: &Wave) -> u32 {
    let d = a.exit_ms.wrapping_sub(b.exit_ms);
    d.min(d.wrapping_neg())
}

/// Build a detection from one completed wave per side, if they belong to
/// the same transit.
pub fn match_waves(a: &Wave, b: &Wave, config: &MatcherConfig) -> Option<Detection> {
    if exit_gap_ms(a, b) > config.max_peak_gap_ms {
        return None;
    }
    let direction = resolve_direction(a, b)?;
    let com_gap_ms = if a.center_of_mass_ms > b.center_of_mass_ms {
        a.center_of_mass_ms - b.center_of_mass_ms
    } else {
        b.center_of_mass_ms - a.center_of_mass_ms
    };
    let later_exit = if (b.exit_ms.wrapping_sub(a.exit_ms) as i32) > 0 {
        b.exit_ms
    } else {
        a.exit_ms
    };
    Some(Detection {
        direction,
        confidence: confidence(com_gap_ms, a.peak_value, b.peak_value, config),
        com_a_ms: a.center_of_mass_ms,
        com_b_ms: b.center_of_mass_ms,
        com_gap_ms,
        peak_a: a.peak_value,
        peak_b: b.peak_value,
        timestamp_ms: later_exit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::Side;

    fn wave(side: Side, com: f32, exit_ms: u32, peak: f32) -> Wave {
        Wave {
            side,
            entry_ms: exit_ms.saturating_sub(20),
            exit_ms,
            peak_value: peak,
            peak_ms: com as u32,
            center_of_mass_ms: com,
            forced: false,
        }
    }

    fn config() -> MatcherConfig {
        MatcherConfig::new()
    }

    #[test]
    fn scenario_a_to_b() {
        let a = wave(Side::A, 10.0, 20, 120.0);
        let b = wave(Side::B, 14.0, 24, 110.0);
        let det = match_waves(&a, &b, &config()).unwrap();
        assert_eq!(det.direction, Direction::AToB);
        assert_eq!(det.com_gap_ms, 4.0);
        assert!(det.confidence > 0.7);
        assert_eq!(det.timestamp_ms, 24);
    }

    #[test]
    fn b_first_is_b_to_a() {
        let a = wave(Side::A, 30.0, 40, 80.0);
        let b = wave(Side::B, 22.0, 35, 80.0);
        let det = match_waves(&a, &b, &config()).unwrap();
        assert_eq!(det.direction, Direction::BToA);
        assert_eq!(det.timestamp_ms, 40);
    }

    #[test]
    fn exits_too_far_apart_do_not_match() {
        let a = wave(Side::A, 10.0, 20, 100.0);
        let b = wave(Side::B, 200.0, 171, 100.0);
        assert!(match_waves(&a, &b, &config()).is_none());
        let b = wave(Side::B, 150.0, 170, 100.0);
        assert!(match_waves(&a, &b, &config()).is_some());
    }

    #[test]
    fn equal_com_falls_back_to_peak_time() {
        let mut a = wave(Side::A, 50.0, 60, 100.0);
        let mut b = wave(Side::B, 50.0, 60, 100.0);
        a.peak_ms = 52;
        b.peak_ms = 48;
        assert_eq!(resolve_direction(&a, &b), Some(Direction::BToA));
        b.peak_ms = 52;
        assert_eq!(resolve_direction(&a, &b), None);
        assert!(match_waves(&a, &b, &config()).is_none());
    }

    #[test]
    fn confidence_terms_saturate() {
        let c = config();
        assert_eq!(confidence(50.0, 500.0, 500.0, &c), 1.0);
        assert_eq!(confidence(0.0, 0.0, 0.0, &c), 0.0);
        // Timing only: 2.5 / 5 * 0.6
        assert!((confidence(2.5, 0.0, 0.0, &c) - 0.3).abs() < 1e-6);
        // Strength only: 50 / 100 * 0.4
        assert!((confidence(0.0, 40.0, 60.0, &c) - 0.2).abs() < 1e-6);
    }

    #[test]
    fn exit_gap_is_symmetric() {
        let a = wave(Side::A, 0.0, 100, 1.0);
        let b = wave(Side::B, 0.0, 130, 1.0);
        assert_eq!(exit_gap_ms(&a, &b), 30);
        assert_eq!(exit_gap_ms(&b, &a), 30);
    }

    #[test]
    fn direction_names() {
        assert_eq!(Direction::AToB.as_str(), "A_TO_B");
        assert_eq!(Direction::BToA.as_str(), "B_TO_A");
    }
}
