// src/core/prompts.rs — Prompt templates for the three model stages
//
// Each stage asks for a single fenced json block matching the schema the
// validator enforces. Wording is free to change; the schemas are not.

use minijinja::{context, Environment};

use super::types::{AnalysisSummary, DeviceBias, Metrics, Suggestion, Target};

pub const SYSTEM_PROMPT: &str = "You size analog circuits. Answer only with the requested JSON block.";

const ANALYSIS_TEMPLATE: &str = r#"You are an analog circuit design assistant.

Circuit under test:
```spice
{{ circuit }}
```

Performance targets:
{% for t in targets -%}
- {{ t.metric }} {{ t.op }} {{ t.threshold }}{% if t.unit %} {{ t.unit }}{% endif %}
{% endfor %}
Measured metrics:
{% for name, value in metrics|items -%}
- {{ name }}: {% if value is none %}unmeasured{% else %}{{ value }}{% endif %}
{% endfor %}
{%- if bias %}
Transistor bias (margin = |vgs| - |vth|):
{% for b in bias -%}
- {{ b.name }}: vgs={{ b.vgs }} vth={{ b.vth }} margin={{ b.margin }}{% if b.margin < 0 %} (not turned on){% endif %}
{% endfor %}
{%- endif %}
Decide whether every target is met. For each failing metric give a short
reason, then suggest concrete component changes that address it.

Reply with exactly one fenced json block:
```json
{"pass": false,
 "reasons": [{"metric": "<name>", "reason": "<why>"}],
 "suggestions": [{"component": "<element name>", "param": "<parameter or null>",
                  "action": "increase|decrease|replace|tweak",
                  "magnitude": "<e.g. 20%, 2x, 1.5u, or null>",
                  "rationale": "<why>"}]}
```
"#;

const PROPOSAL_TEMPLATE: &str = r#"You are an analog circuit design assistant.

Circuit under test:
```spice
{{ circuit }}
```

Performance targets:
{% for t in targets -%}
- {{ t.metric }} {{ t.op }} {{ t.threshold }}{% if t.unit %} {{ t.unit }}{% endif %}
{% endfor %}
Failing metrics:
{% for r in analysis.reasons -%}
- {{ r.metric }}: {{ r.reason }}
{% else -%}
- none reported
{% endfor %}
Candidate ideas from the analysis:
{% for s in analysis.suggestions -%}
- {{ s.action }} {{ s.component }}{% if s.param %}.{{ s.param }}{% endif %}{% if s.magnitude %} by {{ s.magnitude }}{% endif %}: {{ s.rationale }}
{% else -%}
- none
{% endfor %}
Choose the component changes to make next. Only reference elements that
exist in the circuit. Return an empty list if no change is worth making.

Reply with exactly one fenced json block:
```json
{"changes": [{"component": "<element name>", "param": "<parameter or null>",
              "action": "increase|decrease|replace|tweak",
              "magnitude": "<e.g. 20%, 2x, 1.5u, or null>",
              "rationale": "<why>"}]}
```
"#;

const SIZING_TEMPLATE: &str = r#"You are an analog circuit design assistant.

Apply the following changes to the circuit and return the complete updated
circuit text. Keep every other line unchanged and keep the final .end line.

Changes:
{% for s in changes -%}
- {{ s.action }} {{ s.component }}{% if s.param %}.{{ s.param }}{% endif %}{% if s.magnitude %} by {{ s.magnitude }}{% endif %}
{% endfor %}
Circuit:
```spice
{{ circuit }}
```

Reply with exactly one fenced json block, either
```json
{"netlist_text": "<full updated circuit>"}
```
or, if the changes cannot be applied,
```json
{"error": "<what went wrong>", "reason": "<details>"}
```
"#;

fn render(template: &str, ctx: minijinja::Value) -> Result<String, minijinja::Error> {
    Environment::new().render_str(template, ctx)
}

pub fn analysis_prompt(
    circuit: &str,
    targets: &[Target],
    metrics: &Metrics,
    bias: &[DeviceBias],
) -> Result<String, minijinja::Error> {
    let bias: Vec<minijinja::Value> = bias
        .iter()
        .map(|b| context! { name => b.name, vgs => b.vgs, vth => b.vth, margin => b.margin() })
        .collect();
    render(
        ANALYSIS_TEMPLATE,
        context! {
            circuit => circuit.trim_end(),
            targets => targets,
            metrics => metrics,
            bias => bias,
        },
    )
}

pub fn proposal_prompt(
    circuit: &str,
    targets: &[Target],
    analysis: &AnalysisSummary,
) -> Result<String, minijinja::Error> {
    render(
        PROPOSAL_TEMPLATE,
        context! { circuit => circuit.trim_end(), targets => targets, analysis => analysis },
    )
}

pub fn sizing_prompt(circuit: &str, changes: &[Suggestion]) -> Result<String, minijinja::Error> {
    render(
        SIZING_TEMPLATE,
        context! { circuit => circuit.trim_end(), changes => changes },
    )
}
