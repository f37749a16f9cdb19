// src/core/applier.rs — Turn a proposal into candidate circuit text
//
// A well-formed full circuit from the sizing stage is used as-is. Otherwise
// the structured suggestions are folded onto the base circuit one component
// at a time. Destructive or empty results are rejected.

use super::types::{Action, SizingResponse, Suggestion};
use crate::infra::errors::ApplyFailure;
use crate::sim::netlist::{check_syntax, format_value, parse_value, Netlist};

/// Relative step used when an increase/decrease carries no magnitude.
const DEFAULT_STEP: f64 = 0.10;

pub fn apply(
    base: &str,
    suggestions: &[Suggestion],
    sizing: &SizingResponse,
) -> Result<String, ApplyFailure> {
    let text = match sizing {
        SizingResponse::Error { error, reason } => {
            return Err(ApplyFailure::ModelError {
                error: error.clone(),
                reason: reason.clone(),
            })
        }
        SizingResponse::Circuit { netlist_text } => netlist_text,
    };

    if text.trim().is_empty() {
        return Err(ApplyFailure::EmptyBody);
    }

    match check_syntax(text) {
        Ok(()) => {
            let base_active = Netlist::parse(base).active_device_count();
            let candidate_active = Netlist::parse(text).active_device_count();
            if base_active > 0 && candidate_active == 0 {
                return Err(ApplyFailure::RemovesActiveDevices);
            }
            Ok(text.clone())
        }
        Err(reason) => {
            tracing::debug!("Sizing text rejected ({}), folding suggestions instead", reason);
            if suggestions.is_empty() {
                return Err(ApplyFailure::NothingToApply);
            }
            fold(base, suggestions)
        }
    }
}

/// Rewrite the referenced component values of `base` in place.
pub fn fold(base: &str, suggestions: &[Suggestion]) -> Result<String, ApplyFailure> {
    let mut netlist = Netlist::parse(base);

    for s in suggestions {
        let element = netlist
            .element_mut(&s.component)
            .ok_or_else(|| ApplyFailure::ComponentNotFound(s.component.clone()))?;

        let current_text = match &s.param {
            Some(p) => element.param(p),
            None => element.primary_value(),
        }
        .ok_or_else(|| ApplyFailure::ParameterNotFound {
            component: s.component.clone(),
            param: s.param.clone().unwrap_or_else(|| "value".into()),
        })?
        .to_string();

        let unrealizable = |message: String| ApplyFailure::Unrealizable {
            component: s.component.clone(),
            action: s.action.to_string(),
            message,
        };

        let current = parse_value(&current_text)
            .ok_or_else(|| unrealizable(format!("current value '{current_text}' is not numeric")))?;
        let magnitude = s
            .magnitude
            .as_deref()
            .map(|m| Magnitude::parse(m).ok_or_else(|| unrealizable(format!("unreadable magnitude '{m}'"))))
            .transpose()?;

        let next = next_value(s.action, current, magnitude).map_err(unrealizable)?;
        let rendered = format_value(next);

        let updated = match &s.param {
            Some(p) => element.set_param(p, &rendered),
            None => element.set_primary_value(&rendered),
        };
        debug_assert!(updated);
        tracing::debug!(
            component = %s.component,
            action = %s.action,
            from = %current_text,
            to = %rendered,
            "Folded suggestion"
        );
    }

    Ok(netlist.render())
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Magnitude {
    /// Signed fraction: `10%` → 0.1
    Relative(f64),
    /// Multiplier: `2x`
    Factor(f64),
    /// Engineering value: `1.5u`, `-200n`
    Absolute(f64),
}

impl Magnitude {
    fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if let Some(pct) = s.strip_suffix('%') {
            return pct.trim().parse::<f64>().ok().map(|p| Magnitude::Relative(p / 100.0));
        }
        if let Some(f) = s.strip_suffix(['x', 'X']) {
            return f.trim().parse::<f64>().ok().map(Magnitude::Factor);
        }
        parse_value(s).map(Magnitude::Absolute)
    }
}

fn next_value(action: Action, current: f64, magnitude: Option<Magnitude>) -> Result<f64, String> {
    let next = match (action, magnitude) {
        (Action::Increase, None) => current * (1.0 + DEFAULT_STEP),
        (Action::Decrease, None) => current * (1.0 - DEFAULT_STEP),

        (Action::Increase, Some(Magnitude::Relative(r))) => current * (1.0 + r.abs()),
        (Action::Decrease, Some(Magnitude::Relative(r))) => {
            if r.abs() >= 1.0 {
                return Err(format!("cannot decrease by {}%", r.abs() * 100.0));
            }
            current * (1.0 - r.abs())
        }

        (Action::Increase | Action::Decrease, Some(Magnitude::Factor(f))) => {
            if f <= 0.0 {
                return Err(format!("factor {f} must be positive"));
            }
            let f = f.max(1.0 / f);
            if action == Action::Increase {
                current * f
            } else {
                current / f
            }
        }

        (Action::Increase, Some(Magnitude::Absolute(a))) => current + a.abs(),
        (Action::Decrease, Some(Magnitude::Absolute(a))) => current - a.abs(),

        (Action::Replace, Some(Magnitude::Absolute(a))) => a,
        (Action::Replace, Some(_)) => return Err("replace needs an absolute value".into()),
        (Action::Replace, None) => return Err("replace needs a value".into()),

        (Action::Tweak, Some(Magnitude::Relative(r))) => current * (1.0 + r),
        (Action::Tweak, Some(Magnitude::Factor(f))) => current * f,
        (Action::Tweak, Some(Magnitude::Absolute(a))) => current + a,
        (Action::Tweak, None) => return Err("tweak needs a magnitude".into()),
    };

    if !next.is_finite() {
        return Err("result is not finite".into());
    }
    if current > 0.0 && next <= 0.0 {
        return Err(format!("result {next} would flip a positive value"));
    }
    Ok(next)
}
