//! Severity model shared by the static analyzers
//!
//! Scores four risk factors and buckets the total:
//!
//! | factor          | weight |
//! |-----------------|--------|
//! | write present   | +3     |
//! | high frequency  | +2     |
//! | critical data   | +3     |
//! | unprotected     | +2     |
//!
//! `>= 8` critical, `>= 6` high, `>= 4` medium, otherwise low.
//! Deadlock cycles do not go through this model; they are always critical.

use crate::models::Severity;

const WRITE_WEIGHT: u8 = 3;
const FREQUENCY_WEIGHT: u8 = 2;
const CRITICAL_DATA_WEIGHT: u8 = 3;
const UNPROTECTED_WEIGHT: u8 = 2;

/// Inputs to the severity model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RiskFactors {
    pub write_present: bool,
    pub high_frequency: bool,
    pub critical_data: bool,
    pub unprotected: bool,
}

impl RiskFactors {
    /// Raw score in `0..=10`
    pub fn score(&self) -> u8 {
        let mut score = 0;
        if self.write_present {
            score += WRITE_WEIGHT;
        }
        if self.high_frequency {
            score += FREQUENCY_WEIGHT;
        }
        if self.critical_data {
            score += CRITICAL_DATA_WEIGHT;
        }
        if self.unprotected {
            score += UNPROTECTED_WEIGHT;
        }
        score
    }

    pub fn severity(&self) -> Severity {
        severity_for_score(self.score())
    }
}

/// Map a raw score onto the four severity buckets
pub fn severity_for_score(score: u8) -> Severity {
    match score {
        s if s >= 8 => Severity::Critical,
        s if s >= 6 => Severity::High,
        s if s >= 4 => Severity::Medium,
        _ => Severity::Low,
    }
}

/// Score a set of risk factors
pub fn score(
    write_present: bool,
    high_frequency: bool,
    critical_data: bool,
    unprotected: bool,
) -> Severity {
    RiskFactors {
        write_present,
        high_frequency,
        critical_data,
        unprotected,
    }
    .severity()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_boundaries() {
        assert_eq!(severity_for_score(0), Severity::Low);
        assert_eq!(severity_for_score(3), Severity::Low);
        assert_eq!(severity_for_score(4), Severity::Medium);
        assert_eq!(severity_for_score(6), Severity::High);
        assert_eq!(severity_for_score(8), Severity::Critical);
        assert_eq!(severity_for_score(10), Severity::Critical);
    }

    #[test]
    fn test_unprotected_write_is_at_least_medium() {
        assert_eq!(score(true, false, false, true), Severity::Medium);
        assert_eq!(score(true, true, false, true), Severity::High);
        assert_eq!(score(true, false, true, true), Severity::Critical);
        assert_eq!(score(true, true, true, true), Severity::Critical);
    }

    #[test]
    fn test_write_alone_is_low() {
        assert_eq!(score(true, false, false, false), Severity::Low);
        assert_eq!(score(false, false, false, false), Severity::Low);
    }

    #[test]
    fn test_model_is_total() {
        for bits in 0u8..16 {
            let factors = RiskFactors {
                write_present: bits & 1 != 0,
                high_frequency: bits & 2 != 0,
                critical_data: bits & 4 != 0,
                unprotected: bits & 8 != 0,
            };
            assert!(factors.score() <= 10);
            assert_eq!(factors.severity(), severity_for_score(factors.score()));
        }
    }
}
