// src/sim/netlist.rs — Lightweight SPICE netlist handling
//
// Just enough structure to check well-formedness, find components, rewrite
// parameter values, and swap analysis control blocks. Device models and
// subcircuit semantics are left to the simulator.

/// Element letters that count as active devices.
const ACTIVE_KINDS: [char; 4] = ['M', 'Q', 'J', 'X'];

// ─── Control blocks ─────────────────────────────────────────────

fn directive(line: &str) -> String {
    line.trim().to_ascii_lowercase()
}

fn is_control_start(line: &str) -> bool {
    directive(line).starts_with(".control")
}

fn is_control_end(line: &str) -> bool {
    directive(line).starts_with(".endc")
}

fn is_end(line: &str) -> bool {
    directive(line) == ".end"
}

/// Remove every `.control` ... `.endc` block, including the delimiters.
pub fn strip_control_blocks(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut inside = false;
    for line in text.lines() {
        if is_control_start(line) {
            inside = true;
            continue;
        }
        if inside {
            if is_control_end(line) {
                inside = false;
            }
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// Insert a control block before the last `.end` line, appending one if absent.
pub fn insert_control_block(text: &str, commands: &[String]) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let end_at = lines.iter().rposition(|l| is_end(l));

    let mut block = vec![".control".to_string()];
    block.extend(commands.iter().cloned());
    block.push(".endc".to_string());

    let mut out: Vec<String> = Vec::with_capacity(lines.len() + block.len() + 1);
    match end_at {
        Some(idx) => {
            out.extend(lines[..idx].iter().map(|s| s.to_string()));
            out.extend(block);
            out.extend(lines[idx..].iter().map(|s| s.to_string()));
        }
        None => {
            out.extend(lines.iter().map(|s| s.to_string()));
            out.extend(block);
            out.push(".end".to_string());
        }
    }
    let mut joined = out.join("\n");
    joined.push('\n');
    joined
}

// ─── Syntax check ───────────────────────────────────────────────

/// Cheap well-formedness check run before trusting model-authored text.
pub fn check_syntax(text: &str) -> Result<(), String> {
    if text.trim().len() < 10 {
        return Err("circuit text is too short".into());
    }

    let starts = text.lines().filter(|l| is_control_start(l)).count();
    let ends = text.lines().filter(|l| is_control_end(l)).count();
    if starts != ends {
        return Err(format!(
            "unbalanced control blocks ({starts} .control vs {ends} .endc)"
        ));
    }

    if !text.lines().any(is_end) {
        return Err("missing .end".into());
    }

    if Netlist::parse(text).elements().next().is_none() {
        return Err("no element statements".into());
    }
    Ok(())
}

// ─── Parsed netlist ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub name: String,
    pub tokens: Vec<String>,
}

impl Element {
    fn from_line(line: &str) -> Option<Self> {
        let tokens: Vec<String> = normalize_assignments(line)
            .split_whitespace()
            .map(str::to_string)
            .collect();
        let name = tokens.first()?.clone();
        if !name.chars().next()?.is_ascii_alphabetic() {
            return None;
        }
        Some(Self { name, tokens })
    }

    /// Upper-case element letter (`M`, `R`, `X`, ...).
    pub fn kind(&self) -> char {
        self.name
            .chars()
            .next()
            .map(|c| c.to_ascii_uppercase())
            .unwrap_or(' ')
    }

    pub fn is_active(&self) -> bool {
        ACTIVE_KINDS.contains(&self.kind())
    }

    fn param_index(&self, param: &str) -> Option<usize> {
        self.tokens.iter().position(|t| {
            t.split_once('=')
                .is_some_and(|(k, _)| k.eq_ignore_ascii_case(param))
        })
    }

    /// Value of a `name=value` parameter.
    pub fn param(&self, param: &str) -> Option<&str> {
        let idx = self.param_index(param)?;
        self.tokens[idx].split_once('=').map(|(_, v)| v)
    }

    pub fn set_param(&mut self, param: &str, value: &str) -> bool {
        match self.param_index(param) {
            Some(idx) => {
                let key = self.tokens[idx]
                    .split_once('=')
                    .map(|(k, _)| k.to_string())
                    .unwrap_or_else(|| param.to_string());
                self.tokens[idx] = format!("{key}={value}");
                true
            }
            None => false,
        }
    }

    /// Token index of the primary value of a two-terminal element:
    /// `R1 a b 10k`, `V1 in 0 DC 1.2 AC 1`, `I1 a b 5u`.
    fn primary_index(&self) -> Option<usize> {
        match self.kind() {
            'R' | 'C' | 'L' => (self.tokens.len() > 3).then_some(3),
            'V' | 'I' => {
                if let Some(dc) = self
                    .tokens
                    .iter()
                    .position(|t| t.eq_ignore_ascii_case("dc"))
                {
                    return (dc + 1 < self.tokens.len()).then_some(dc + 1);
                }
                self.tokens
                    .get(3)
                    .filter(|t| parse_value(t).is_some())
                    .map(|_| 3)
            }
            _ => None,
        }
    }

    pub fn primary_value(&self) -> Option<&str> {
        self.primary_index().map(|i| self.tokens[i].as_str())
    }

    pub fn set_primary_value(&mut self, value: &str) -> bool {
        match self.primary_index() {
            Some(i) => {
                self.tokens[i] = value.to_string();
                true
            }
            None => false,
        }
    }

    pub fn render(&self) -> String {
        self.tokens.join(" ")
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Line {
    Verbatim(String),
    Element(Element),
}

/// A netlist split into the title, element statements (continuations
/// folded in), and everything else kept verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct Netlist {
    lines: Vec<Line>,
}

impl Netlist {
    pub fn parse(text: &str) -> Self {
        let mut lines: Vec<Line> = Vec::new();
        let mut in_control = false;

        for (i, raw) in text.lines().enumerate() {
            if i == 0 {
                // SPICE treats the first line as the title
                lines.push(Line::Verbatim(raw.to_string()));
                continue;
            }

            let trimmed = raw.trim_start();
            if is_control_start(raw) {
                in_control = true;
            }
            if in_control {
                if is_control_end(raw) {
                    in_control = false;
                }
                lines.push(Line::Verbatim(raw.to_string()));
                continue;
            }

            if let Some(cont) = trimmed.strip_prefix('+') {
                if let Some(Line::Element(prev)) = lines.last_mut() {
                    let joined = format!("{} {}", prev.render(), cont.trim());
                    if let Some(el) = Element::from_line(&joined) {
                        *prev = el;
                        continue;
                    }
                }
                lines.push(Line::Verbatim(raw.to_string()));
                continue;
            }

            if trimmed.is_empty() || trimmed.starts_with('*') || trimmed.starts_with('.') {
                lines.push(Line::Verbatim(raw.to_string()));
                continue;
            }

            match Element::from_line(trimmed) {
                Some(el) => lines.push(Line::Element(el)),
                None => lines.push(Line::Verbatim(raw.to_string())),
            }
        }
        Self { lines }
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.lines.iter().filter_map(|l| match l {
            Line::Element(e) => Some(e),
            Line::Verbatim(_) => None,
        })
    }

    pub fn element(&self, name: &str) -> Option<&Element> {
        self.elements().find(|e| e.name.eq_ignore_ascii_case(name))
    }

    pub fn element_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.lines.iter_mut().find_map(|l| match l {
            Line::Element(e) if e.name.eq_ignore_ascii_case(name) => Some(e),
            _ => None,
        })
    }

    pub fn active_device_count(&self) -> usize {
        self.elements().filter(|e| e.is_active()).count()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            match line {
                Line::Verbatim(s) => out.push_str(s),
                Line::Element(e) => out.push_str(&e.render()),
            }
            out.push('\n');
        }
        out
    }
}

/// Collapse `W = 1u` into `W=1u` so assignments tokenize as one word.
fn normalize_assignments(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut skip_ws = false;
    for c in line.chars() {
        if c == '=' {
            while out.ends_with(char::is_whitespace) {
                out.pop();
            }
            out.push('=');
            skip_ws = true;
            continue;
        }
        if skip_ws && c.is_whitespace() {
            continue;
        }
        skip_ws = false;
        out.push(c);
    }
    out
}

// ─── Engineering notation ───────────────────────────────────────

/// Parse a SPICE number: `4.7k`, `10MEG`, `180n`, `1e-3`, `2.2uF`.
pub fn parse_value(s: &str) -> Option<f64> {
    let s = s.trim();
    let bytes = s.as_bytes();
    let mut end = 0;

    if end < bytes.len() && (bytes[end] == b'+' || bytes[end] == b'-') {
        end += 1;
    }
    let digits_start = end;
    while end < bytes.len() && (bytes[end].is_ascii_digit() || bytes[end] == b'.') {
        end += 1;
    }
    if end == digits_start {
        return None;
    }
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp_end = end + 1;
        if exp_end < bytes.len() && (bytes[exp_end] == b'+' || bytes[exp_end] == b'-') {
            exp_end += 1;
        }
        let exp_digits = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits {
            end = exp_end;
        }
    }

    let mantissa: f64 = s[..end].parse().ok()?;
    let suffix = s[end..].to_ascii_lowercase();
    let scale = if suffix.starts_with("meg") {
        1e6
    } else if suffix.starts_with("mil") {
        25.4e-6
    } else {
        match suffix.chars().next() {
            Some('t') => 1e12,
            Some('g') => 1e9,
            Some('k') => 1e3,
            Some('m') => 1e-3,
            Some('u') => 1e-6,
            Some('n') => 1e-9,
            Some('p') => 1e-12,
            Some('f') => 1e-15,
            _ => 1.0,
        }
    };
    Some(mantissa * scale)
}

/// Format a value with the nearest engineering suffix ngspice understands.
pub fn format_value(v: f64) -> String {
    if v == 0.0 || !v.is_finite() {
        return "0".into();
    }
    const SUFFIXES: [(f64, &str); 9] = [
        (1e12, "T"),
        (1e9, "G"),
        (1e6, "Meg"),
        (1e3, "k"),
        (1.0, ""),
        (1e-3, "m"),
        (1e-6, "u"),
        (1e-9, "n"),
        (1e-12, "p"),
    ];
    let abs = v.abs();
    let (scale, suffix) = SUFFIXES
        .iter()
        .copied()
        .find(|(scale, _)| abs >= *scale)
        .unwrap_or((1e-15, "f"));

    let mantissa = format!("{:.6}", v / scale);
    let mantissa = mantissa.trim_end_matches('0').trim_end_matches('.');
    format!("{mantissa}{suffix}")
}
