//! Frame-rate detection from probed stream metadata.

use crate::types::FrameRate;

/// Outcome of frame-rate detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectedFrameRate {
    pub frame_rate: FrameRate,
    /// `true` when metadata was missing or unparsable and [`FrameRate::FALLBACK`] was used.
    pub fallback: bool,
}

/// Parse `num/den` (or a plain number) and round to the nearest whole fps.
pub fn parse_rational(raw: &str) -> Option<FrameRate> {
    let raw = raw.trim();
    let fps = match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => raw.parse::<f64>().ok()?,
    };

    if !fps.is_finite() || fps <= 0.0 || fps > f64::from(u32::MAX) {
        return None;
    }
    FrameRate::new(fps.round() as u32)
}

/// Detect the output frame rate, falling back to 30 fps.
pub fn detect(raw: Option<&str>) -> DetectedFrameRate {
    match raw.and_then(parse_rational) {
        Some(frame_rate) => DetectedFrameRate {
            frame_rate,
            fallback: false,
        },
        None => {
            tracing::warn!(
                "Frame rate metadata unavailable ({:?}), using {} fps",
                raw,
                FrameRate::FALLBACK
            );
            DetectedFrameRate {
                frame_rate: FrameRate::FALLBACK,
                fallback: true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ntsc_rounds_to_30() {
        assert_eq!(parse_rational("30000/1001").map(FrameRate::get), Some(30));
    }

    #[test]
    fn test_integer_rational() {
        assert_eq!(parse_rational("25/1").map(FrameRate::get), Some(25));
        assert_eq!(parse_rational(" 60/1 \n").map(FrameRate::get), Some(60));
        assert_eq!(parse_rational("24000/1001").map(FrameRate::get), Some(24));
    }

    #[test]
    fn test_plain_number() {
        assert_eq!(parse_rational("50").map(FrameRate::get), Some(50));
        assert_eq!(parse_rational("29.97").map(FrameRate::get), Some(30));
    }

    #[test]
    fn test_unparsable_rates() {
        let cases = vec!["", "abc", "0/0", "30/0", "0/1", "-25/1", "1/3", "25/x", "nan/1"];
        for raw in cases {
            assert_eq!(parse_rational(raw), None, "{:?}", raw);
        }
    }

    #[test]
    fn test_fallback_is_exactly_30() {
        let missing = detect(None);
        assert_eq!(missing.frame_rate.get(), 30);
        assert!(missing.fallback);

        let garbage = detect(Some("not a rate"));
        assert_eq!(garbage.frame_rate.get(), 30);
        assert!(garbage.fallback);

        let detected = detect(Some("25/1"));
        assert_eq!(detected.frame_rate.get(), 25);
        assert!(!detected.fallback);
    }
}
