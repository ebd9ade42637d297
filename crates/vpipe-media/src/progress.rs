//! FFmpeg stderr progress parsing.
//!
//! FFmpeg reports encode progress on stderr as `... time=HH:MM:SS.cc
//! ... speed=1.23x`. The parser accumulates the latest value of each
//! token and yields a progress point whenever both have been seen.

/// One progress point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncodeProgress {
    /// Output timestamp reached, in seconds
    pub seconds: u64,
    /// Encode speed relative to realtime
    pub speed: f64,
}

impl EncodeProgress {
    /// Wall-clock completion percentage against the source duration.
    pub fn percent(&self, duration_secs: f64) -> f64 {
        if duration_secs <= 0.0 {
            return 0.0;
        }
        (self.seconds as f64 * 100.0) / duration_secs
    }
}

/// Incremental parser over stderr lines.
#[derive(Debug, Default)]
pub struct ProgressParser {
    seconds: Option<u64>,
    speed: Option<f64>,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one stderr line; returns a point when both tokens are known.
    pub fn push_line(&mut self, line: &str) -> Option<EncodeProgress> {
        if let Some(seconds) = parse_time(line) {
            self.seconds = Some(seconds);
        }
        if let Some(speed) = parse_speed(line) {
            self.speed = Some(speed);
        }

        match (self.seconds, self.speed) {
            (Some(seconds), Some(speed)) => {
                self.seconds = None;
                self.speed = None;
                Some(EncodeProgress { seconds, speed })
            }
            _ => None,
        }
    }
}

/// Extract `time=HH:MM:SS` as seconds.
fn parse_time(line: &str) -> Option<u64> {
    let start = line.find("time=")? + "time=".len();
    let rest = &line[start..];
    if rest.len() < 8 {
        return None;
    }
    let mut parts = rest[..8].split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: u64 = parts.next()?.parse().ok()?;
    Some(hours * 3600 + minutes * 60 + seconds)
}

/// Extract `speed=N.NNx`.
fn parse_speed(line: &str) -> Option<f64> {
    let start = line.find("speed=")? + "speed=".len();
    let rest = line[start..].trim_start();
    let end = rest.find('x')?;
    rest[..end].trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_time_token() {
        assert_eq!(parse_time("frame= 120 time=00:01:30.52 bitrate=x"), Some(90));
        assert_eq!(parse_time("time=01:00:00.00"), Some(3600));
        assert_eq!(parse_time("no tokens here"), None);
        assert_eq!(parse_time("time=00:01"), None);
    }

    #[test]
    fn parses_speed_token() {
        assert_eq!(parse_speed("... speed=1.5x"), Some(1.5));
        assert_eq!(parse_speed("speed=0.874x"), Some(0.874));
        assert_eq!(parse_speed("speed=N/A"), None);
        assert_eq!(parse_speed("nothing"), None);
    }

    #[test]
    fn emits_when_both_tokens_seen_then_resets() {
        let mut parser = ProgressParser::new();

        assert_eq!(parser.push_line("time=00:00:10.00"), None);
        let point = parser
            .push_line("speed=2.0x")
            .expect("both tokens present");
        assert_eq!(point.seconds, 10);
        assert!((point.speed - 2.0).abs() < f64::EPSILON);

        // State resets after emitting
        assert_eq!(parser.push_line("speed=2.1x"), None);
    }

    #[test]
    fn single_line_with_both_tokens_emits() {
        let mut parser = ProgressParser::new();
        let point = parser
            .push_line("frame= 240 fps= 48 time=00:00:10.00 bitrate= 929kbits/s speed=2x")
            .unwrap();
        assert_eq!(point.seconds, 10);
        assert!((point.speed - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn percent_is_wall_clock_based() {
        let point = EncodeProgress {
            seconds: 30,
            speed: 1.0,
        };
        assert!((point.percent(120.0) - 25.0).abs() < f64::EPSILON);
        assert_eq!(point.percent(0.0), 0.0);
    }
}
