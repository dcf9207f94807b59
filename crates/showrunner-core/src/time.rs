/// Format a second count as zero-padded `MM:SS`. Minutes widen past two
/// digits rather than wrapping.
pub fn seconds_to_mmss(secs: u32) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

/// Parse `MM:SS` back to seconds. Accepts a single-digit minute field
/// (`"m:ss"`); the seconds field must be two digits below 60.
pub fn mmss_to_seconds(s: &str) -> Option<u32> {
    let (mm, ss) = s.split_once(':')?;
    if ss.len() != 2 {
        return None;
    }
    let minutes: u32 = mm.parse().ok()?;
    let seconds: u32 = ss.parse().ok()?;
    if seconds >= 60 {
        return None;
    }
    Some(minutes * 60 + seconds)
}

/// Milliseconds since the Unix epoch, used for the `t` field on event
/// envelopes and the `timestamp` field on warnings.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_zero_padded() {
        assert_eq!(seconds_to_mmss(0), "00:00");
        assert_eq!(seconds_to_mmss(3), "00:03");
        assert_eq!(seconds_to_mmss(65), "01:05");
        assert_eq!(seconds_to_mmss(600), "10:00");
    }

    #[test]
    fn minutes_widen_past_an_hour() {
        assert_eq!(seconds_to_mmss(3600), "60:00");
        assert_eq!(seconds_to_mmss(6000), "100:00");
    }

    #[test]
    fn parses_canonical_and_tolerant_forms() {
        assert_eq!(mmss_to_seconds("00:03"), Some(3));
        assert_eq!(mmss_to_seconds("01:05"), Some(65));
        assert_eq!(mmss_to_seconds("1:05"), Some(65));
        assert_eq!(mmss_to_seconds("100:00"), Some(6000));
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(mmss_to_seconds(""), None);
        assert_eq!(mmss_to_seconds("0105"), None);
        assert_eq!(mmss_to_seconds("01:5"), None);
        assert_eq!(mmss_to_seconds("01:60"), None);
        assert_eq!(mmss_to_seconds("aa:bb"), None);
    }

    #[test]
    fn round_trips_well_formed_values() {
        for secs in [0, 1, 59, 60, 61, 599, 600, 3599, 3600, 7265] {
            assert_eq!(mmss_to_seconds(&seconds_to_mmss(secs)), Some(secs));
        }
    }
}
