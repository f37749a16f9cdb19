// src/analysis/metrics.rs — Metric formulas over simulator data files

/// Rows of whitespace-separated numbers. Header or junk lines are skipped.
pub fn parse_columns(text: &str) -> Vec<Vec<f64>> {
    text.lines()
        .filter_map(|line| {
            let row: Option<Vec<f64>> = line
                .split_whitespace()
                .map(|t| t.parse::<f64>().ok())
                .collect();
            row.filter(|r| !r.is_empty())
        })
        .collect()
}

/// Small-signal response at the output node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AcResponse {
    pub freq: Vec<f64>,
    pub re: Vec<f64>,
    pub im: Vec<f64>,
}

impl AcResponse {
    /// Parse `wrdata` output: `freq re [im]` per row.
    pub fn parse(text: &str) -> Self {
        let mut resp = Self::default();
        for row in parse_columns(text) {
            if row.len() < 2 {
                continue;
            }
            resp.freq.push(row[0]);
            resp.re.push(row[1]);
            resp.im.push(row.get(2).copied().unwrap_or(0.0));
        }
        resp
    }

    pub fn is_empty(&self) -> bool {
        self.freq.is_empty()
    }

    fn mag_db(&self, i: usize) -> f64 {
        20.0 * self.re[i].hypot(self.im[i]).max(1e-30).log10()
    }

    fn phase_deg(&self, i: usize) -> f64 {
        self.im[i].atan2(self.re[i]).to_degrees()
    }

    /// Frequency span over which the gain stays at or above `floor_db`.
    fn span_above(&self, floor_db: f64) -> f64 {
        let above: Vec<usize> = (0..self.freq.len())
            .filter(|&i| self.mag_db(i) >= floor_db)
            .collect();
        match (above.first(), above.last()) {
            (Some(&first), Some(&last)) => self.freq[last] - self.freq[first],
            _ => 0.0,
        }
    }
}

/// Low-frequency gain in dB.
pub fn ac_gain_db(ac: &AcResponse) -> Option<f64> {
    (!ac.is_empty()).then(|| ac.mag_db(0))
}

/// -3 dB bandwidth relative to the low-frequency gain.
pub fn bandwidth_hz(ac: &AcResponse) -> Option<f64> {
    let gain0 = ac_gain_db(ac)?;
    Some(ac.span_above(gain0 - 3.0))
}

/// Span of frequencies with gain at or above 0 dB. Zero when the
/// amplifier never reaches unity gain.
pub fn unity_bandwidth_hz(ac: &AcResponse) -> Option<f64> {
    (!ac.is_empty()).then(|| ac.span_above(0.0))
}

/// Sample nearest the first 0 dB crossing. `None` unless the gain changes
/// sign around 0 dB between two adjacent samples.
fn unity_crossing(ac: &AcResponse) -> Option<usize> {
    (0..ac.freq.len().saturating_sub(1))
        .find(|&i| (ac.mag_db(i) >= 0.0) != (ac.mag_db(i + 1) >= 0.0))
        .map(|i| {
            if ac.mag_db(i).abs() <= ac.mag_db(i + 1).abs() {
                i
            } else {
                i + 1
            }
        })
}

/// Phase at the 0 dB crossing, normalized for inverting (starts near 180°)
/// and non-inverting (starts near 0°) stages. Other starting phases, or a
/// response that never crosses 0 dB, leave the metric unmeasured.
pub fn phase_margin_deg(ac: &AcResponse) -> Option<f64> {
    let crossing = unity_crossing(ac)?;
    let phi = ac.phase_deg(crossing);
    let initial = ac.phase_deg(0);

    if (initial.abs() - 180.0).abs() <= 15.0 {
        Some(phi)
    } else if initial.abs() <= 15.0 {
        Some(180.0 - phi.abs())
    } else {
        None
    }
}

/// Output samples of a transient run: `time value` per row.
pub fn parse_transient(text: &str) -> Vec<f64> {
    parse_columns(text)
        .into_iter()
        .filter(|row| row.len() >= 2)
        .map(|row| row[1])
        .collect()
}

fn peak_to_peak(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
    Some(max - min)
}

/// Large-signal gain: output peak-to-peak over the stimulus amplitude.
pub fn tran_gain_db(samples: &[f64], input_pp_v: f64) -> Option<f64> {
    let vpp = peak_to_peak(samples)?.max(1e-30);
    Some(20.0 * (vpp / input_pp_v.max(1e-30)).log10())
}

pub fn output_swing_v(samples: &[f64]) -> Option<f64> {
    peak_to_peak(samples)
}

/// Find `name = value` in simulator console output (`.meas` results).
pub fn measurement_from_log(log: &str, name: &str) -> Option<f64> {
    log.lines().find_map(|line| {
        let (lhs, rhs) = line.split_once('=')?;
        if !lhs.trim().eq_ignore_ascii_case(name) {
            return None;
        }
        let token = rhs.split_whitespace().next()?;
        crate::sim::netlist::parse_value(token).filter(|v| v.is_finite())
    })
}
