// benches/benchmarks.rs — Performance benchmarks (criterion)
//
// Hot paths that run on every model reply:
//   1. Response validation — payload location + schema checks
//   2. Proposal application — full-text acceptance and structured folding
//   3. Netlist parsing — element enumeration on larger circuits

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use ampsizer::core::applier::{apply, fold};
use ampsizer::core::types::{Action, SizingResponse, Suggestion};
use ampsizer::core::validator::{validate_analysis, validate_proposal, validate_sizing};
use ampsizer::sim::netlist::Netlist;

// ─── Helpers ────────────────────────────────────────────────────────────────

/// Two-stage amplifier padded with N extra resistors.
fn build_circuit(extra: usize) -> String {
    let mut text = String::from(
        "two stage opamp\n\
         VDD vdd 0 1.8\n\
         M1 n1 inp tail 0 nmos W=2u L=180n\n\
         M2 out1 inn tail 0 nmos W=2u L=180n\n\
         M3 n1 n1 vdd vdd pmos W=4u L=180n\n\
         M4 out1 n1 vdd vdd pmos W=4u L=180n\n\
         M5 tail bias 0 0 nmos W=1u L=360n\n\
         M6 out out1 vdd vdd pmos W=16u L=180n\n\
         M7 out bias 0 0 nmos W=4u L=360n\n\
         Cc out1 out 1p\n\
         CL out 0 2p\n",
    );
    for i in 0..extra {
        text.push_str(&format!("R{i} n{i} n{} 1k\n", i + 1));
    }
    text.push_str(".end\n");
    text
}

fn suggestions() -> Vec<Suggestion> {
    vec![
        Suggestion {
            component: "M6".into(),
            param: Some("W".into()),
            action: Action::Increase,
            magnitude: Some("25%".into()),
            rationale: "more second-stage gm".into(),
        },
        Suggestion {
            component: "Cc".into(),
            param: None,
            action: Action::Replace,
            magnitude: Some("1.5p".into()),
            rationale: "move the dominant pole".into(),
        },
        Suggestion {
            component: "M5".into(),
            param: Some("L".into()),
            action: Action::Decrease,
            magnitude: Some("2x".into()),
            rationale: "more tail current".into(),
        },
    ]
}

const ANALYSIS_REPLY: &str = r#"The gain is below target and phase margin is marginal.

```json
{"pass": false,
 "reasons": [{"metric": "ac_gain_db", "reason": "second stage gm too low"},
             {"metric": "phase_margin_deg", "reason": "compensation too light"}],
 "suggestions": [{"component": "M6", "param": "W", "action": "increase", "magnitude": "25%", "rationale": "gm"},
                 {"component": "Cc", "action": "replace", "magnitude": "1.5p", "rationale": "pm"}]}
```

Let me know if you need anything else."#;

const PROPOSAL_REPLY_UNFENCED: &str = r#"Sure! Here are the changes: {"changes": [{"component": "M6", "param": "W", "action": "increase", "magnitude": "25%", "rationale": "gm"}]} Good luck."#;

// ─── Benchmark: Response validation ─────────────────────────────────────────

fn bench_validator(c: &mut Criterion) {
    let mut group = c.benchmark_group("validator");

    group.bench_function("analysis_fenced", |b| {
        b.iter(|| validate_analysis(black_box(ANALYSIS_REPLY)))
    });

    group.bench_function("proposal_unfenced", |b| {
        b.iter(|| validate_proposal(black_box(PROPOSAL_REPLY_UNFENCED)))
    });

    let sizing = format!(
        "```json\n{}\n```",
        serde_json::json!({ "netlist_text": build_circuit(200) })
    );
    group.bench_function("sizing_200_elements", |b| {
        b.iter(|| validate_sizing(black_box(&sizing)))
    });

    group.bench_function("reject_free_text", |b| {
        b.iter(|| validate_analysis(black_box("Increase the width of M6 a bit.")))
    });

    group.finish();
}

// ─── Benchmark: Proposal application ────────────────────────────────────────

fn bench_applier(c: &mut Criterion) {
    let mut group = c.benchmark_group("applier");
    let base = build_circuit(50);
    let changes = suggestions();

    group.bench_function("fold_3_changes", |b| {
        b.iter(|| fold(black_box(&base), black_box(&changes)))
    });

    let full = SizingResponse::Circuit {
        netlist_text: build_circuit(50).replace("W=16u", "W=20u"),
    };
    group.bench_function("accept_full_text", |b| {
        b.iter(|| apply(black_box(&base), black_box(&changes), black_box(&full)))
    });

    let unusable = SizingResponse::Circuit {
        netlist_text: "see above".into(),
    };
    group.bench_function("fallback_to_fold", |b| {
        b.iter(|| apply(black_box(&base), black_box(&changes), black_box(&unusable)))
    });

    group.finish();
}

// ─── Benchmark: Netlist parsing ─────────────────────────────────────────────

fn bench_netlist(c: &mut Criterion) {
    let mut group = c.benchmark_group("netlist");

    for n in [10usize, 500] {
        let text = build_circuit(n);
        group.bench_function(format!("parse_render_{n}"), |b| {
            b.iter(|| Netlist::parse(black_box(&text)).render())
        });
    }

    group.finish();
}

// ─── Main ───────────────────────────────────────────────────────────────────

criterion_group!(benches, bench_validator, bench_applier, bench_netlist);
criterion_main!(benches);
