const TIME_MARKER: &str = "time=";

/// Extracts the `time=HH:MM:SS.frac` elapsed marker from an encoder status
/// line, in milliseconds.
pub fn parse_time_marker(line: &str) -> Option<u64> {
    let start = line.find(TIME_MARKER)? + TIME_MARKER.len();
    let token = line[start..].split_whitespace().next()?;

    let mut fields = token.splitn(3, ':');
    let hours = parse_digits(fields.next()?)?;
    let minutes = parse_digits(fields.next()?)?;
    let (secs, frac) = fields.next()?.split_once('.')?;
    let secs = parse_digits(secs)?;
    if frac.is_empty() || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // Only millisecond resolution matters: "5" -> 500, "04" -> 40, "123456" -> 123
    let millis: u64 = format!("{:0<3}", &frac[..frac.len().min(3)]).parse().ok()?;

    hours
        .checked_mul(3_600_000)?
        .checked_add(minutes.checked_mul(60_000)?)?
        .checked_add(secs.checked_mul(1000)?)?
        .checked_add(millis)
}

fn parse_digits(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Turns encoder output into a completion fraction for one job.
///
/// Every matching line yields its own fraction; nothing keeps the value
/// from moving backwards if the encoder reports an earlier time.
#[derive(Debug, Clone, Copy)]
pub struct ProgressReporter {
    expected_total_ms: u64,
}

impl ProgressReporter {
    pub fn new(expected_total_ms: u64) -> Self {
        Self { expected_total_ms }
    }

    pub fn fraction(&self, elapsed_ms: u64) -> f64 {
        if self.expected_total_ms == 0 {
            return 1.0;
        }
        (elapsed_ms as f64 / self.expected_total_ms as f64).clamp(0.0, 1.0)
    }

    /// `None` for lines without a time marker.
    pub fn observe(&self, line: &str) -> Option<f64> {
        parse_time_marker(line).map(|ms| self.fraction(ms))
    }
}
