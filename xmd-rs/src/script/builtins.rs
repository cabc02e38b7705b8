//! Built-in functions.
//!
//! Each function receives already-evaluated arguments.  The dispatcher is
//! called by the interpreter after user-defined functions and before the
//! unknown-name fallback.  `print`, `exec` and `import` need interpreter
//! state and are handled there.
//!
//! Every builtin is also reachable as a method: `"a".upper()` calls
//! `upper("a")`.

use std::cmp::Ordering;

use super::value::{ArrayRef, Value};
use crate::error::EvalError;

/// Dispatch a built-in function call.
///
/// Returns `None` if `name` is not a builtin.
pub fn call_builtin(name: &str, args: &[Value]) -> Option<Result<Value, EvalError>> {
    // Ok(None) → not a builtin; `.transpose()` turns the result inside out.
    fn inner(name: &str, args: &[Value]) -> Result<Option<Value>, EvalError> {
        Ok(Some(match name {
            // ── Strings ──────────────────────────────────────────────────────
            "len" | "length" => {
                arity(name, args, 1, 1)?;
                let n = match &args[0] {
                    Value::Null => 0,
                    Value::String(s) => s.chars().count(),
                    Value::Array(items) => items.borrow().len(),
                    obj @ Value::Object(_) => obj.keys().len(),
                    other => {
                        return Err(EvalError::Type(format!(
                            "{name}: {} has no length",
                            other.type_name()
                        )))
                    }
                };
                Value::Number(n as f64)
            }
            "upper" => {
                arity(name, args, 1, 1)?;
                Value::String(get_str(args, 0).to_uppercase())
            }
            "lower" => {
                arity(name, args, 1, 1)?;
                Value::String(get_str(args, 0).to_lowercase())
            }
            "trim" => {
                arity(name, args, 1, 1)?;
                Value::String(get_str(args, 0).trim().to_owned())
            }
            "substr" => {
                arity(name, args, 2, 3)?;
                let s = get_str(args, 0);
                let start = get_num(args, 1, name)?.max(0.0) as usize;
                let chars = s.chars().skip(start);
                Value::String(match args.get(2) {
                    Some(_) => chars.take(get_num(args, 2, name)?.max(0.0) as usize).collect(),
                    None => chars.collect(),
                })
            }
            "replace" => {
                arity(name, args, 3, 3)?;
                let (s, from, to) = (get_str(args, 0), get_str(args, 1), get_str(args, 2));
                if from.is_empty() {
                    Value::String(s)
                } else {
                    Value::String(s.replace(&from, &to))
                }
            }
            "split" => {
                arity(name, args, 1, 2)?;
                let s = get_str(args, 0);
                let sep = args.get(1).map(Value::to_string).unwrap_or_else(|| " ".to_owned());
                let parts: Vec<Value> = if sep.trim().is_empty() {
                    s.split_whitespace().map(Value::from).collect()
                } else {
                    s.split(sep.as_str()).filter(|p| !p.is_empty()).map(Value::from).collect()
                };
                Value::array(parts)
            }
            "join" => {
                arity(name, args, 1, 2)?;
                let items = get_array(args, 0, name)?;
                let sep = args.get(1).map(Value::to_string).unwrap_or_else(|| ", ".to_owned());
                let parts: Vec<String> = items.borrow().iter().map(|v| v.get().to_string()).collect();
                Value::String(parts.join(&sep))
            }
            "contains" => {
                arity(name, args, 2, 2)?;
                let found = match &args[0] {
                    Value::Array(items) => items.borrow().iter().any(|v| v.get().equals(&args[1])),
                    obj @ Value::Object(_) => obj.keys().contains(&args[1].to_string()),
                    other => other.to_string().contains(&args[1].to_string()),
                };
                Value::Boolean(found)
            }

            // ── Types ────────────────────────────────────────────────────────
            "type" => {
                arity(name, args, 1, 1)?;
                Value::str(args[0].type_name())
            }
            "str" => {
                arity(name, args, 1, 1)?;
                Value::String(args[0].to_string())
            }
            "number" => {
                arity(name, args, 1, 1)?;
                args[0].to_number().map(Value::Number).unwrap_or_default()
            }

            // ── Numbers ──────────────────────────────────────────────────────
            "abs" => {
                arity(name, args, 1, 1)?;
                Value::Number(get_num(args, 0, name)?.abs())
            }
            "round" => {
                arity(name, args, 1, 2)?;
                let x = get_num(args, 0, name)?;
                match args.get(1) {
                    Some(_) => {
                        let scale = 10f64.powi(get_num(args, 1, name)? as i32);
                        Value::Number((x * scale).round() / scale)
                    }
                    None => Value::Number(x.round()),
                }
            }
            "floor" => {
                arity(name, args, 1, 1)?;
                Value::Number(get_num(args, 0, name)?.floor())
            }
            "ceil" => {
                arity(name, args, 1, 1)?;
                Value::Number(get_num(args, 0, name)?.ceil())
            }
            "min" | "max" => {
                let nums = numbers(name, args)?;
                let pick: fn(f64, f64) -> f64 = if name == "min" { f64::min } else { f64::max };
                match nums.into_iter().reduce(pick) {
                    Some(n) => Value::Number(n),
                    None => return Err(EvalError::Arity { name: name.to_owned(), expected: 1, found: 0 }),
                }
            }

            // ── Collections ──────────────────────────────────────────────────
            "keys" => {
                arity(name, args, 1, 1)?;
                Value::array(args[0].keys().into_iter().map(Value::String))
            }
            "values" => {
                arity(name, args, 1, 1)?;
                let keys = args[0].keys();
                Value::array(keys.iter().map(|k| args[0].property(k)))
            }
            "push" => {
                arity(name, args, 2, usize::MAX)?;
                let items = get_array(args, 0, name)?;
                let mut items = items.borrow_mut();
                for v in &args[1..] {
                    items.push(v.clone().into());
                }
                Value::Null
            }
            "reverse" => {
                arity(name, args, 1, 1)?;
                match &args[0] {
                    Value::String(s) => Value::String(s.chars().rev().collect()),
                    _ => {
                        let items = get_array(args, 0, name)?;
                        let reversed: Vec<Value> = items.borrow().iter().rev().map(|v| v.get()).collect();
                        Value::array(reversed)
                    }
                }
            }
            "sort" => {
                arity(name, args, 1, 1)?;
                let items = get_array(args, 0, name)?;
                let mut sorted: Vec<Value> = items.borrow().iter().map(|v| v.get()).collect();
                sorted.sort_by(compare_values);
                Value::array(sorted)
            }

            _ => return Ok(None),
        }))
    }

    inner(name, args).transpose()
}

/// Ordering used by `sort`: numbers numerically, everything else by its
/// display form.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

// ── Argument helpers ─────────────────────────────────────────────────────────

fn arity(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), EvalError> {
    if args.len() < min || args.len() > max {
        let expected = if args.len() < min { min } else { max };
        return Err(EvalError::Arity { name: name.to_owned(), expected, found: args.len() });
    }
    Ok(())
}

fn get_str(args: &[Value], idx: usize) -> String {
    args.get(idx).map(Value::to_string).unwrap_or_default()
}

fn get_num(args: &[Value], idx: usize, name: &str) -> Result<f64, EvalError> {
    let v = args.get(idx).unwrap_or(&Value::Null);
    v.to_number().ok_or_else(|| {
        EvalError::Type(format!("{name}: argument {} is not a number ({})", idx + 1, v.type_name()))
    })
}

fn get_array(args: &[Value], idx: usize, name: &str) -> Result<ArrayRef, EvalError> {
    match args.get(idx) {
        Some(Value::Array(items)) => Ok(items.clone()),
        other => Err(EvalError::Type(format!(
            "{name}: argument {} is not an array ({})",
            idx + 1,
            other.map_or("nothing", Value::type_name)
        ))),
    }
}

/// Arguments of `min`/`max`: either the numbers themselves or one array.
fn numbers(name: &str, args: &[Value]) -> Result<Vec<f64>, EvalError> {
    let values: Vec<Value> = match args {
        [Value::Array(items)] => items.borrow().iter().map(|v| v.get()).collect(),
        _ => args.to_vec(),
    };
    values
        .iter()
        .map(|v| {
            v.to_number()
                .ok_or_else(|| EvalError::Type(format!("{name}: {} is not a number", v.type_name())))
        })
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
