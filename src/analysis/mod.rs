// src/analysis/mod.rs — Raw simulator output → named metrics

pub mod metrics;
pub mod oplog;

use std::collections::BTreeSet;

use crate::core::types::{DeviceBias, Metrics, Target};
use crate::sim::ngspice::{AC_DATA, TRAN_DATA};
use crate::sim::MetricsRaw;
use metrics::AcResponse;

/// Metrics computed from waveform data whenever the data is present.
pub const BUILTIN_METRICS: [&str; 6] = [
    "ac_gain_db",
    "bandwidth_hz",
    "unity_bandwidth_hz",
    "phase_margin_deg",
    "tran_gain_db",
    "output_swing_v",
];

/// Smallest transistor gate overdrive, from the console bias table. Only
/// computed when a target tracks it.
pub const BIAS_MARGIN_METRIC: &str = "min_vgs_margin_v";

/// Pure conversion from raw artifacts to a `Metrics` map. Every builtin and
/// every tracked name appears in the result; absent ones are unmeasured.
#[derive(Debug, Clone)]
pub struct MetricsExtractor {
    tracked: BTreeSet<String>,
    input_pp_v: f64,
}

impl MetricsExtractor {
    pub fn new<I, S>(tracked: I, input_pp_v: f64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tracked: tracked.into_iter().map(Into::into).collect(),
            input_pp_v,
        }
    }

    /// Track every metric named by `targets`.
    pub fn for_targets(targets: &[Target], input_pp_v: f64) -> Self {
        Self::new(targets.iter().map(|t| t.metric.clone()), input_pp_v)
    }

    pub fn extract(&self, raw: &MetricsRaw) -> Metrics {
        let ac = raw.artifact(AC_DATA).map(AcResponse::parse);
        let tran = raw.artifact(TRAN_DATA).map(metrics::parse_transient);

        let builtin = |name: &str| -> Option<f64> {
            match name {
                "ac_gain_db" => metrics::ac_gain_db(ac.as_ref()?),
                "bandwidth_hz" => metrics::bandwidth_hz(ac.as_ref()?),
                "unity_bandwidth_hz" => metrics::unity_bandwidth_hz(ac.as_ref()?),
                "phase_margin_deg" => metrics::phase_margin_deg(ac.as_ref()?),
                "tran_gain_db" => metrics::tran_gain_db(tran.as_ref()?, self.input_pp_v),
                "output_swing_v" => metrics::output_swing_v(tran.as_ref()?),
                BIAS_MARGIN_METRIC => oplog::min_margin(&oplog::parse_bias(&raw.log)),
                _ => None,
            }
        };

        let names = BUILTIN_METRICS
            .iter()
            .map(|s| s.to_string())
            .chain(self.tracked.iter().cloned())
            .collect::<BTreeSet<_>>();

        let extracted: Metrics = names
            .into_iter()
            .map(|name| {
                let value = builtin(&name)
                    .or_else(|| metrics::measurement_from_log(&raw.log, &name))
                    .filter(|v| v.is_finite());
                (name, value)
            })
            .collect();

        let unmeasured: Vec<&str> = self
            .tracked
            .iter()
            .filter(|n| !extracted.is_measured(n))
            .map(String::as_str)
            .collect();
        if !unmeasured.is_empty() {
            tracing::debug!(?unmeasured, "Tracked metrics missing from simulator output");
        }
        extracted
    }

    /// Per-device bias reported in the simulator log, if any.
    pub fn bias(&self, raw: &MetricsRaw) -> Vec<DeviceBias> {
        oplog::parse_bias(&raw.log)
    }
}
