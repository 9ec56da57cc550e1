//! Parser for CPU summary lines printed by `top`.
//!
//! Handles both the BusyBox layout
//! (`CPU:   2% usr   1% sys   0% nic  96% idle   0% io`) and the procps
//! layout (`%Cpu(s):  2.3 us,  0.8 sy,  0.0 ni, 96.7 id,  0.2 wa`).

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

static IDLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    // The number must not continue a longer one ("1234% idle", "1100.5% idle").
    Regex::new(r"(?i)(?:^|[^\d.])(\d{1,3}(?:\.\d+)?)\s*%?\s*id(?:le)?\b")
        .expect("idle pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("no idle percentage in output: {0:?}")]
    MissingIdle(String),

    #[error("idle percentage out of range: {0}")]
    OutOfRange(f64),
}

/// Extract the idle percentage from `top` output.
pub fn parse_idle_percent(output: &str) -> Result<f64, ParseError> {
    let caps = IDLE_RE
        .captures(output)
        .ok_or_else(|| ParseError::MissingIdle(excerpt(output)))?;
    let idle: f64 = caps[1]
        .parse()
        .map_err(|_| ParseError::MissingIdle(excerpt(output)))?;
    if !(0.0..=100.0).contains(&idle) {
        return Err(ParseError::OutOfRange(idle));
    }
    Ok(idle)
}

/// Busy percentage, `100 - idle`.
pub fn parse_utilization(output: &str) -> Result<f64, ParseError> {
    parse_idle_percent(output).map(|idle| 100.0 - idle)
}

fn excerpt(output: &str) -> String {
    let trimmed = output.trim();
    match trimmed.char_indices().nth(80) {
        Some((cut, _)) => format!("{}…", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busybox_layout() {
        let line = "CPU:   0% usr  55% sys   0% nic  45% idle   0% io   0% irq   0% sirq";
        assert_eq!(parse_idle_percent(line), Ok(45.0));
        assert_eq!(parse_utilization(line), Ok(55.0));
    }

    #[test]
    fn procps_layout() {
        let line = "%Cpu(s):  2.3 us,  0.8 sy,  0.0 ni, 96.7 id,  0.2 wa,  0.0 hi,  0.0 si,  0.0 st";
        assert_eq!(parse_idle_percent(line), Ok(96.7));
        let busy = parse_utilization(line).unwrap();
        assert!((busy - 3.3).abs() < 1e-9);
    }

    #[test]
    fn fully_idle() {
        assert_eq!(parse_utilization("CPU: 0% usr 0% sys 100% idle"), Ok(0.0));
    }

    #[test]
    fn missing_idle_is_error() {
        let err = parse_idle_percent("sh: top: not found").unwrap_err();
        assert!(matches!(err, ParseError::MissingIdle(_)));
    }

    #[test]
    fn empty_output_is_error() {
        assert!(matches!(
            parse_idle_percent(""),
            Err(ParseError::MissingIdle(_))
        ));
    }

    #[test]
    fn out_of_range_is_error() {
        assert_eq!(
            parse_idle_percent("CPU: 250% idle"),
            Err(ParseError::OutOfRange(250.0))
        );
    }

    #[test]
    fn digits_inside_longer_numbers_are_not_read() {
        for line in ["1234% idle", "CPU: 1100% idle", "CPU: 1100.5% idle"] {
            assert!(
                matches!(parse_idle_percent(line), Err(ParseError::MissingIdle(_))),
                "{line:?} should be rejected"
            );
        }
        assert_eq!(parse_idle_percent("99% idle"), Ok(99.0));
        assert_eq!(parse_idle_percent("x,12.5 id"), Ok(12.5));
    }

    #[test]
    fn long_output_is_truncated_in_error() {
        let noise = "x".repeat(500);
        match parse_idle_percent(&noise) {
            Err(ParseError::MissingIdle(s)) => assert!(s.chars().count() <= 81),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
