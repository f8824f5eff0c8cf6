//! Condition/path expression evaluation for structural markers.
//!
//! A deliberately small, explicit evaluator — no script engine. The grammar
//! is one optional comparison (`==`, `!=`, `>`, `>=`, `<`, `<=`) between two
//! operands, where an operand is a quoted string, a number, a boolean
//! literal, or a dotted identifier path. A bare path evaluates by
//! truthiness. Unresolvable paths and malformed expressions evaluate false
//! or empty — never an error.

use rust_decimal::Decimal;
use serde_json::Value;

/// Resolution scope: the root data object plus, inside a repeat block, one
/// named loop variable bound to the current element.
///
/// Top-level properties resolve as bare identifiers; the same object is also
/// reachable under the `Model.` prefix, so authors can write either form.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    root: &'a Value,
    var: Option<(&'a str, &'a Value)>,
}

impl<'a> Scope<'a> {
    /// Scope over the root object only.
    pub fn root(root: &'a Value) -> Self {
        Self { root, var: None }
    }

    /// Derive a scope binding `name` to `element`; all other paths keep
    /// resolving against the root.
    pub fn with_var(&self, name: &'a str, element: &'a Value) -> Self {
        Self {
            root: self.root,
            var: Some((name, element)),
        }
    }

    /// Resolve a dotted path to a value. `None` when any segment is absent.
    pub fn resolve(&self, path: &str) -> Option<&'a Value> {
        let mut segments = path.split('.').filter(|s| !s.is_empty());
        let first = segments.next()?;

        let mut current = if let Some((name, element)) = self.var {
            if first.eq_ignore_ascii_case(name) {
                element
            } else if first.eq_ignore_ascii_case("model") {
                self.root
            } else {
                // Bare identifier: a top-level property of the root.
                lookup(self.root, first)?
            }
        } else if first.eq_ignore_ascii_case("model") {
            self.root
        } else {
            lookup(self.root, first)?
        };

        for segment in segments {
            current = lookup(current, segment)?;
        }
        Some(current)
    }
}

/// Property lookup, exact key first, then case-insensitive.
fn lookup<'v>(value: &'v Value, key: &str) -> Option<&'v Value> {
    let obj = value.as_object()?;
    if let Some(v) = obj.get(key) {
        return Some(v);
    }
    obj.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v)
}

/// Evaluate a marker condition against a scope. Fail-closed: anything the
/// grammar does not cover is false.
pub fn eval_condition(expr: &str, scope: &Scope) -> bool {
    let expr = expr.trim();
    if expr.is_empty() {
        return false;
    }
    match split_comparison(expr) {
        Some((lhs, op, rhs)) => {
            let (Some(lhs), Some(rhs)) = (operand(lhs, scope), operand(rhs, scope)) else {
                return false;
            };
            compare(&lhs, &rhs, op)
        }
        None => operand(expr, scope).map(|v| v.truthy()).unwrap_or(false),
    }
}

/// Comparison operators, two-character forms first.
const COMPARISONS: [&str; 6] = ["==", "!=", ">=", "<=", ">", "<"];

/// Find the comparison operator outside quoted regions.
fn split_comparison(expr: &str) -> Option<(&str, &str, &str)> {
    let bytes = expr.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == q {
                    quote = None;
                }
            }
            None => {
                if b == b'"' || b == b'\'' {
                    quote = Some(b);
                } else if expr.is_char_boundary(i) {
                    for op in COMPARISONS {
                        if expr[i..].starts_with(op) {
                            return Some((expr[..i].trim(), op, expr[i + op.len()..].trim()));
                        }
                    }
                }
            }
        }
        i += 1;
    }
    None
}

/// A resolved operand value.
#[derive(Debug, Clone)]
enum Operand {
    Bool(bool),
    Num(Decimal),
    Str(String),
}

impl Operand {
    fn truthy(&self) -> bool {
        match self {
            Operand::Bool(b) => *b,
            Operand::Num(n) => !n.is_zero(),
            Operand::Str(s) => !s.is_empty() && !s.eq_ignore_ascii_case("false"),
        }
    }

    fn from_value(value: &Value) -> Option<Operand> {
        match value {
            Value::Null => None,
            Value::Bool(b) => Some(Operand::Bool(*b)),
            Value::Number(n) => n.to_string().parse().ok().map(Operand::Num),
            Value::String(s) => Some(Operand::Str(s.clone())),
            // Sequences and objects only matter for truthiness.
            Value::Array(items) => Some(Operand::Bool(!items.is_empty())),
            Value::Object(_) => Some(Operand::Bool(true)),
        }
    }
}

/// Resolve an operand token: literal first, then path lookup.
fn operand(token: &str, scope: &Scope) -> Option<Operand> {
    let token = token.trim();
    if token.is_empty() {
        return None;
    }
    if let Some(inner) = unquote(token) {
        return Some(Operand::Str(inner.to_string()));
    }
    if token.eq_ignore_ascii_case("true") {
        return Some(Operand::Bool(true));
    }
    if token.eq_ignore_ascii_case("false") {
        return Some(Operand::Bool(false));
    }
    if let Ok(n) = token.parse::<Decimal>() {
        return Some(Operand::Num(n));
    }
    scope.resolve(token).and_then(Operand::from_value)
}

fn unquote(token: &str) -> Option<&str> {
    for q in ['"', '\''] {
        if token.len() >= 2 && token.starts_with(q) && token.ends_with(q) {
            return Some(&token[1..token.len() - 1]);
        }
    }
    None
}

fn compare(lhs: &Operand, rhs: &Operand, op: &str) -> bool {
    // Numeric comparison when both sides are (or parse as) numbers.
    if let (Some(l), Some(r)) = (as_num(lhs), as_num(rhs)) {
        return match op {
            "==" => l == r,
            "!=" => l != r,
            ">" => l > r,
            ">=" => l >= r,
            "<" => l < r,
            "<=" => l <= r,
            _ => false,
        };
    }
    if let (Operand::Bool(l), Operand::Bool(r)) = (lhs, rhs) {
        return match op {
            "==" => l == r,
            "!=" => l != r,
            _ => false,
        };
    }
    let l = display(lhs).to_lowercase();
    let r = display(rhs).to_lowercase();
    match op {
        "==" => l == r,
        "!=" => l != r,
        ">" => l > r,
        ">=" => l >= r,
        "<" => l < r,
        "<=" => l <= r,
        _ => false,
    }
}

fn as_num(operand: &Operand) -> Option<Decimal> {
    match operand {
        Operand::Num(n) => Some(*n),
        Operand::Str(s) => s.trim().parse().ok(),
        Operand::Bool(_) => None,
    }
}

fn display(operand: &Operand) -> String {
    match operand {
        Operand::Bool(b) => b.to_string(),
        Operand::Num(n) => n.to_string(),
        Operand::Str(s) => s.clone(),
    }
}
