//! Implementations of the built-in library.
//!
//! Builtins share the ordinary call protocol: by the time `invoke` runs,
//! the VM has pushed a frame whose caller slot is the receiver (for
//! method-style calls) and whose argument list holds the evaluated
//! arguments. A method receiver and a leading free-function argument are
//! interchangeable: `"abc".length()` and `length("abc")` reach the same
//! code with the same effective operands.
//!
//! Higher-order builtins (map, filter, reduce, sorted) reenter the VM
//! through [`Vm::call_value`]; collection is deferred while any builtin
//! frame is live, so the values held here stay valid.

use crate::context::Effects;
use crate::vm::Vm;
use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};
use yq_core::builtin::Builtin;
use yq_core::error::{Error, Result};
use yq_core::value::{Collection, NumericPair, Ref, Value, ValueKind, numeric_pair};

pub fn invoke(vm: &mut Vm, b: Builtin, ctx: &mut dyn Effects) -> Result<Value> {
    let (receiver, args) = vm.builtin_frame()?;
    // Effective operands: the receiver (if any) followed by arguments.
    let mut operands = Vec::with_capacity(args.len() + 1);
    if let Some(p) = receiver {
        operands.push(vm.memory.read(p).clone());
    }
    for p in &args {
        operands.push(vm.memory.read(*p).clone());
    }
    let call = Call {
        name: b.name(),
        operands,
    };
    match b {
        Builtin::Number => number(vm, &call),
        Builtin::Integer => integer(vm, &call),
        Builtin::Float => float(vm, &call),
        Builtin::String => {
            let v = call.need(0)?;
            let text = vm.memory.display_value(v);
            Ok(vm.memory.alloc_string(text))
        }
        Builtin::Boolean => Ok(Value::Boolean(vm.memory.truthy(call.need(0)?))),
        Builtin::Object => object(vm, &call),
        Builtin::Ord => ord(vm, &call),
        Builtin::Chr => chr(vm, &call),
        Builtin::Abs => abs(vm, &call),
        Builtin::Pow => pow(vm, &call),
        Builtin::Sqrt => sqrt(vm, &call),
        Builtin::Length => length(vm, &call),
        Builtin::Contains => {
            let seq = call.need(0)?;
            let item = call.need(1)?;
            Ok(Value::Boolean(vm.memory.contains(seq, item)?))
        }
        Builtin::Find => find(vm, &call),
        Builtin::FindAll => find_all(vm, &call),
        Builtin::Split => split(vm, &call),
        Builtin::Join => join(vm, &call),
        Builtin::Random => random(vm, &call),
        Builtin::Enumerated => enumerated(vm, &call),
        Builtin::Sum => sum(vm, &call),
        Builtin::Filter => filter(vm, ctx, &call),
        Builtin::Reduce => reduce(vm, ctx, &call),
        Builtin::Map => map(vm, ctx, &call),
        Builtin::Max => extremum(vm, &call, true),
        Builtin::Min => extremum(vm, &call, false),
        Builtin::Reversed => reversed(vm, &call),
        Builtin::Sorted => sorted(vm, ctx, &call),
        Builtin::Range => range(vm, &call, false),
        Builtin::RangeInclusive => range(vm, &call, true),
        Builtin::Re => re(vm, &call),
        Builtin::Match => regex_match(vm, &call),
        Builtin::MatchAll => regex_match_all(vm, &call),
        Builtin::MatchEntire => regex_match_entire(vm, &call),
        Builtin::Replace => regex_replace(vm, &call),
        Builtin::RegexSplit => regex_split(vm, &call),
        Builtin::Time => {
            let ms = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_err(|_| Error::builtin("system clock before the epoch"))?
                .as_millis() as i64;
            Ok(Value::Integer(ms))
        }
        Builtin::Sleep => {
            let ms = call.int(vm, 0)?.max(0) as u64;
            ctx.sleep(ms);
            Ok(Value::Null)
        }
        Builtin::GetNickname => {
            let id = call.int(vm, 0)?;
            let name = ctx.nickname(id);
            Ok(vm.memory.alloc_string(name))
        }
    }
}

struct Call {
    name: &'static str,
    operands: Vec<Value>,
}

impl Call {
    fn need(&self, i: usize) -> Result<&Value> {
        self.operands.get(i).ok_or_else(|| {
            Error::builtin(format!(
                "{} expects at least {} argument(s)",
                self.name,
                i + 1
            ))
        })
    }

    fn opt(&self, i: usize) -> Option<&Value> {
        self.operands.get(i)
    }

    fn int(&self, vm: &Vm, i: usize) -> Result<i64> {
        let v = self.need(i)?;
        v.as_integer().ok_or_else(|| {
            Error::type_mismatch(&[ValueKind::Integer], vm.memory.kind_of(v))
        })
    }

    fn string(&self, vm: &Vm, i: usize) -> Result<String> {
        let v = self.need(i)?;
        vm.memory
            .read_string(v)
            .map(|s| s.to_string())
            .ok_or_else(|| Error::type_mismatch(&[ValueKind::String], vm.memory.kind_of(v)))
    }

    fn regex(&self, vm: &Vm) -> Result<(String, String)> {
        match self.need(0)? {
            Value::Regex { pattern, flags } => Ok((pattern.clone(), flags.clone())),
            other => Err(Error::type_mismatch(
                &[ValueKind::Regex],
                vm.memory.kind_of(other),
            )),
        }
    }
}

/// The elements of an iterable operand, materialized as values.
fn elements(vm: &mut Vm, v: &Value) -> Result<Vec<Value>> {
    match v {
        Value::Reference(r) => match vm.memory.resolve_ref(r).clone() {
            Collection::List(slots) => {
                Ok(slots.iter().map(|p| vm.memory.read(*p).clone()).collect())
            }
            Collection::String(s) => Ok(s
                .chars()
                .map(|c| vm.memory.alloc_string(c.to_string()))
                .collect()),
            Collection::Object(_) => Err(Error::type_mismatch(
                &[ValueKind::List, ValueKind::String, ValueKind::Range],
                ValueKind::Object,
            )),
        },
        Value::Range {
            begin,
            end,
            inclusive,
        } => {
            let end = if *inclusive { *end + 1 } else { *end };
            Ok((*begin..end).map(Value::Integer).collect())
        }
        Value::CharRange {
            begin,
            end,
            inclusive,
        } => {
            let last = *end as u32 + if *inclusive { 1 } else { 0 };
            let mut out = Vec::new();
            for code in (*begin as u32)..last {
                if let Some(c) = char::from_u32(code) {
                    out.push(vm.memory.alloc_string(c.to_string()));
                }
            }
            Ok(out)
        }
        other => Err(Error::type_mismatch(
            &[ValueKind::List, ValueKind::String, ValueKind::Range],
            vm.memory.kind_of(other),
        )),
    }
}

// ---- conversions ---------------------------------------------------------

fn number(vm: &mut Vm, call: &Call) -> Result<Value> {
    let v = call.need(0)?;
    if let Some(s) = vm.memory.read_string(v) {
        let s = s.trim();
        if let Ok(n) = s.parse::<i64>() {
            return Ok(Value::Integer(n));
        }
        if let Ok(x) = s.parse::<f64>() {
            return Ok(Value::Float(x));
        }
        return Err(Error::builtin(format!("cannot parse '{}' as a number", s)));
    }
    if v.is_arithmetic() {
        return Ok(v.clone());
    }
    Err(Error::type_mismatch(
        &[ValueKind::String, ValueKind::Integer, ValueKind::Float],
        vm.memory.kind_of(v),
    ))
}

fn integer(vm: &mut Vm, call: &Call) -> Result<Value> {
    let v = call.need(0)?;
    if let Some(s) = vm.memory.read_string(v) {
        let s = s.trim();
        if let Ok(n) = s.parse::<i64>() {
            return Ok(Value::Integer(n));
        }
        if let Ok(x) = s.parse::<f64>() {
            return Ok(Value::Integer(x as i64));
        }
        return Err(Error::builtin(format!("cannot parse '{}' as an integer", s)));
    }
    match v {
        Value::Float(x) => Ok(Value::Integer(*x as i64)),
        _ => match v.as_integer() {
            Some(n) => Ok(Value::Integer(n)),
            None => Err(Error::type_mismatch(
                &[ValueKind::String, ValueKind::Integer, ValueKind::Float],
                vm.memory.kind_of(v),
            )),
        },
    }
}

fn float(vm: &mut Vm, call: &Call) -> Result<Value> {
    let v = call.need(0)?;
    if let Some(s) = vm.memory.read_string(v) {
        return s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| Error::builtin(format!("cannot parse '{}' as a float", s.trim())));
    }
    match v.as_float() {
        Some(x) => Ok(Value::Float(x)),
        None => Err(Error::type_mismatch(
            &[ValueKind::String, ValueKind::Integer, ValueKind::Float],
            vm.memory.kind_of(v),
        )),
    }
}

fn object(vm: &mut Vm, call: &Call) -> Result<Value> {
    let mut map = std::collections::BTreeMap::new();
    if let Some(v) = call.opt(0) {
        for pair in elements(vm, &v.clone())? {
            let items = elements(vm, &pair)?;
            if items.len() != 2 {
                return Err(Error::builtin(
                    "object expects a list of [key, value] pairs",
                ));
            }
            let key = vm
                .memory
                .read_string(&items[0])
                .ok_or_else(|| {
                    Error::type_mismatch(&[ValueKind::String], vm.memory.kind_of(&items[0]))
                })?
                .to_string();
            let cell = vm.memory.allocate(items[1].clone());
            map.insert(key, cell);
        }
    }
    let id = vm.memory.put_collection(Collection::Object(map));
    Ok(Value::Reference(Ref::Bound(id)))
}

fn ord(vm: &mut Vm, call: &Call) -> Result<Value> {
    let s = call.string(vm, 0)?;
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(Value::Integer(c as i64)),
        _ => Err(Error::builtin("ord expects a one-character string")),
    }
}

fn chr(vm: &mut Vm, call: &Call) -> Result<Value> {
    let code = call.int(vm, 0)?;
    let c = u32::try_from(code)
        .ok()
        .and_then(char::from_u32)
        .ok_or_else(|| Error::builtin(format!("{} is not a valid code point", code)))?;
    Ok(vm.memory.alloc_string(c.to_string()))
}

// ---- math ----------------------------------------------------------------

fn abs(vm: &mut Vm, call: &Call) -> Result<Value> {
    match call.need(0)? {
        Value::Float(x) => Ok(Value::Float(x.abs())),
        v => match v.as_integer() {
            Some(n) => Ok(Value::Integer(n.wrapping_abs())),
            None => Err(Error::type_mismatch(
                &[ValueKind::Integer, ValueKind::Float],
                vm.memory.kind_of(v),
            )),
        },
    }
}

fn pow(vm: &mut Vm, call: &Call) -> Result<Value> {
    let base = call.need(0)?;
    let exp = call.need(1)?;
    match numeric_pair(base, exp) {
        Some(NumericPair::Integers(b, e)) if e >= 0 => {
            let e = u32::try_from(e).unwrap_or(u32::MAX);
            Ok(Value::Integer(b.wrapping_pow(e)))
        }
        Some(NumericPair::Integers(b, e)) => Ok(Value::Float((b as f64).powf(e as f64))),
        Some(NumericPair::Floats(b, e)) => Ok(Value::Float(b.powf(e))),
        None => Err(Error::type_mismatch(
            &[ValueKind::Integer, ValueKind::Float],
            vm.memory.kind_of(if base.is_arithmetic() { exp } else { base }),
        )),
    }
}

fn sqrt(vm: &mut Vm, call: &Call) -> Result<Value> {
    let v = call.need(0)?;
    let x = v.as_float().ok_or_else(|| {
        Error::type_mismatch(&[ValueKind::Integer, ValueKind::Float], vm.memory.kind_of(v))
    })?;
    if x < 0.0 {
        return Err(Error::builtin("sqrt of a negative number"));
    }
    Ok(Value::Float(x.sqrt()))
}

// ---- sequences -----------------------------------------------------------

fn length(vm: &mut Vm, call: &Call) -> Result<Value> {
    let v = call.need(0)?;
    let len = match v {
        Value::Reference(r) => vm.memory.resolve_ref(r).len(),
        Value::Range {
            begin,
            end,
            inclusive,
        } => {
            let end = if *inclusive { *end + 1 } else { *end };
            (end - begin).max(0) as usize
        }
        Value::CharRange { .. } => elements(vm, &v.clone())?.len(),
        other => {
            return Err(Error::type_mismatch(
                &[
                    ValueKind::String,
                    ValueKind::List,
                    ValueKind::Object,
                    ValueKind::Range,
                ],
                vm.memory.kind_of(other),
            ));
        }
    };
    Ok(Value::Integer(len as i64))
}

fn find(vm: &mut Vm, call: &Call) -> Result<Value> {
    let seq = call.need(0)?;
    let item = call.need(1)?;
    if let Some(hay) = vm.memory.read_string(seq) {
        let needle = vm.memory.read_string(item).ok_or_else(|| {
            Error::type_mismatch(&[ValueKind::String], vm.memory.kind_of(item))
        })?;
        let index = hay
            .find(needle)
            .map(|byte| hay[..byte].chars().count() as i64)
            .unwrap_or(-1);
        return Ok(Value::Integer(index));
    }
    let items = elements(vm, seq)?;
    for (i, v) in items.iter().enumerate() {
        if vm.memory.values_equal(v, item) {
            return Ok(Value::Integer(i as i64));
        }
    }
    Ok(Value::Integer(-1))
}

fn find_all(vm: &mut Vm, call: &Call) -> Result<Value> {
    let seq = call.need(0)?;
    let item = call.need(1)?;
    let mut indices = Vec::new();
    if let Some(hay) = vm.memory.read_string(seq) {
        let needle = vm.memory.read_string(item).ok_or_else(|| {
            Error::type_mismatch(&[ValueKind::String], vm.memory.kind_of(item))
        })?;
        if needle.is_empty() {
            return Err(Error::builtin("findAll needs a non-empty needle"));
        }
        for (byte, _) in hay.match_indices(needle) {
            indices.push(Value::Integer(hay[..byte].chars().count() as i64));
        }
    } else {
        for (i, v) in elements(vm, seq)?.iter().enumerate() {
            if vm.memory.values_equal(v, item) {
                indices.push(Value::Integer(i as i64));
            }
        }
    }
    Ok(vm.memory.alloc_list(indices))
}

fn split(vm: &mut Vm, call: &Call) -> Result<Value> {
    let text = call.string(vm, 0)?;
    let parts: Vec<String> = match call.opt(1) {
        None => text.split_whitespace().map(str::to_string).collect(),
        Some(Value::Regex { pattern, flags }) => {
            let (pattern, flags) = (pattern.clone(), flags.clone());
            let re = vm.compiled_regex(&pattern, &flags)?;
            re.split(&text).map(str::to_string).collect()
        }
        Some(sep) => {
            let sep = vm.memory.read_string(sep).ok_or_else(|| {
                Error::type_mismatch(
                    &[ValueKind::String, ValueKind::Regex],
                    vm.memory.kind_of(sep),
                )
            })?;
            if sep.is_empty() {
                return Err(Error::builtin("split needs a non-empty separator"));
            }
            text.split(sep).map(str::to_string).collect()
        }
    };
    let values: Vec<Value> = parts
        .into_iter()
        .map(|p| vm.memory.alloc_string(p))
        .collect();
    Ok(vm.memory.alloc_list(values))
}

fn join(vm: &mut Vm, call: &Call) -> Result<Value> {
    let items = elements(vm, call.need(0)?)?;
    let sep = match call.opt(1) {
        Some(v) => vm
            .memory
            .read_string(v)
            .ok_or_else(|| Error::type_mismatch(&[ValueKind::String], vm.memory.kind_of(v)))?
            .to_string(),
        None => String::new(),
    };
    let joined = items
        .iter()
        .map(|v| vm.memory.display_value(v))
        .collect::<Vec<_>>()
        .join(&sep);
    Ok(vm.memory.alloc_string(joined))
}

fn random(vm: &mut Vm, call: &Call) -> Result<Value> {
    let v = call.need(0)?;
    if let Value::Range {
        begin,
        end,
        inclusive,
    } = v
    {
        let end = if *inclusive { *end + 1 } else { *end };
        if *begin >= end {
            return Err(Error::builtin("random on an empty range"));
        }
        return Ok(Value::Integer(rand::thread_rng().gen_range(*begin..end)));
    }
    let items = elements(vm, v)?;
    if items.is_empty() {
        return Err(Error::builtin("random on an empty sequence"));
    }
    let i = rand::thread_rng().gen_range(0..items.len());
    Ok(items[i].clone())
}

fn enumerated(vm: &mut Vm, call: &Call) -> Result<Value> {
    let items = elements(vm, call.need(0)?)?;
    let pairs: Vec<Value> = items
        .into_iter()
        .enumerate()
        .map(|(i, v)| vm.memory.alloc_list(vec![Value::Integer(i as i64), v]))
        .collect();
    Ok(vm.memory.alloc_list(pairs))
}

fn sum(vm: &mut Vm, call: &Call) -> Result<Value> {
    let items = elements(vm, call.need(0)?)?;
    let mut acc = Value::Integer(0);
    for v in &items {
        acc = match numeric_pair(&acc, v) {
            Some(NumericPair::Integers(a, b)) => Value::Integer(a.wrapping_add(b)),
            Some(NumericPair::Floats(a, b)) => Value::Float(a + b),
            None => {
                return Err(Error::type_mismatch(
                    &[ValueKind::Integer, ValueKind::Float],
                    vm.memory.kind_of(v),
                ));
            }
        };
    }
    Ok(acc)
}

fn filter(vm: &mut Vm, ctx: &mut dyn Effects, call: &Call) -> Result<Value> {
    let items = elements(vm, call.need(0)?)?;
    let f = call.need(1)?.clone();
    let mut kept = Vec::new();
    for v in items {
        let verdict = vm.call_value(ctx, &f, vec![v.clone()])?;
        if vm.memory.truthy(&verdict) {
            kept.push(v);
        }
    }
    Ok(vm.memory.alloc_list(kept))
}

fn reduce(vm: &mut Vm, ctx: &mut dyn Effects, call: &Call) -> Result<Value> {
    let items = elements(vm, call.need(0)?)?;
    let mut acc = call.need(1)?.clone();
    let f = call.need(2)?.clone();
    for v in items {
        acc = vm.call_value(ctx, &f, vec![acc, v])?;
    }
    Ok(acc)
}

fn map(vm: &mut Vm, ctx: &mut dyn Effects, call: &Call) -> Result<Value> {
    let items = elements(vm, call.need(0)?)?;
    let f = call.need(1)?.clone();
    let mut out = Vec::with_capacity(items.len());
    for v in items {
        out.push(vm.call_value(ctx, &f, vec![v])?);
    }
    Ok(vm.memory.alloc_list(out))
}

fn extremum(vm: &mut Vm, call: &Call, largest: bool) -> Result<Value> {
    let items = elements(vm, call.need(0)?)?;
    let mut best: Option<Value> = None;
    for v in items {
        best = Some(match best {
            None => v,
            Some(b) => {
                let ordering = vm.memory.compare(&v, &b)?;
                if (largest && ordering.is_gt()) || (!largest && ordering.is_lt()) {
                    v
                } else {
                    b
                }
            }
        });
    }
    best.ok_or_else(|| Error::builtin(format!("{} on an empty sequence", call.name)))
}

fn reversed(vm: &mut Vm, call: &Call) -> Result<Value> {
    let v = call.need(0)?;
    if let Some(s) = vm.memory.read_string(v) {
        let out: String = s.chars().rev().collect();
        return Ok(vm.memory.alloc_string(out));
    }
    let mut items = elements(vm, v)?;
    items.reverse();
    Ok(vm.memory.alloc_list(items))
}

fn sorted(vm: &mut Vm, ctx: &mut dyn Effects, call: &Call) -> Result<Value> {
    let mut items = elements(vm, call.need(0)?)?;
    let comparator = call.opt(1).cloned();
    // Insertion sort: the comparator may reenter the VM, which rules out
    // `sort_by`.
    for i in 1..items.len() {
        let mut j = i;
        while j > 0 {
            let out_of_order = match &comparator {
                Some(f) => {
                    let verdict = vm.call_value(
                        ctx,
                        f,
                        vec![items[j - 1].clone(), items[j].clone()],
                    )?;
                    vm.memory.truthy(&verdict)
                }
                None => vm.memory.compare(&items[j - 1], &items[j])?.is_gt(),
            };
            if !out_of_order {
                break;
            }
            items.swap(j - 1, j);
            j -= 1;
        }
    }
    Ok(vm.memory.alloc_list(items))
}

fn range(vm: &mut Vm, call: &Call, inclusive: bool) -> Result<Value> {
    let begin = call.need(0)?;
    let end = call.need(1)?;
    if let (Some(b), Some(e)) = (begin.as_integer(), end.as_integer()) {
        return Ok(Value::Range {
            begin: b,
            end: e,
            inclusive,
        });
    }
    let single_char = |v: &Value| -> Option<char> {
        let s = vm.memory.read_string(v)?;
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Some(c),
            _ => None,
        }
    };
    if let (Some(b), Some(e)) = (single_char(begin), single_char(end)) {
        return Ok(Value::CharRange {
            begin: b,
            end: e,
            inclusive,
        });
    }
    Err(Error::type_mismatch(
        &[ValueKind::Integer, ValueKind::String],
        vm.memory.kind_of(begin),
    ))
}

// ---- regular expressions -------------------------------------------------

fn re(vm: &mut Vm, call: &Call) -> Result<Value> {
    let pattern = call.string(vm, 0)?;
    let flags = match call.opt(1) {
        Some(v) => vm
            .memory
            .read_string(v)
            .ok_or_else(|| Error::type_mismatch(&[ValueKind::String], vm.memory.kind_of(v)))?
            .to_string(),
        None => String::new(),
    };
    // Compile eagerly so a bad pattern fails at the `re` call site.
    vm.compiled_regex(&pattern, &flags)?;
    Ok(Value::Regex { pattern, flags })
}

fn regex_match(vm: &mut Vm, call: &Call) -> Result<Value> {
    let (pattern, flags) = call.regex(vm)?;
    let text = call.string(vm, 1)?;
    let re = vm.compiled_regex(&pattern, &flags)?;
    match re.find(&text) {
        Some(m) => Ok(vm.memory.alloc_string(m.as_str().to_string())),
        None => Ok(Value::Null),
    }
}

fn regex_match_all(vm: &mut Vm, call: &Call) -> Result<Value> {
    let (pattern, flags) = call.regex(vm)?;
    let text = call.string(vm, 1)?;
    let re = vm.compiled_regex(&pattern, &flags)?;
    let matches: Vec<String> = re.find_iter(&text).map(|m| m.as_str().to_string()).collect();
    let values: Vec<Value> = matches
        .into_iter()
        .map(|m| vm.memory.alloc_string(m))
        .collect();
    Ok(vm.memory.alloc_list(values))
}

fn regex_match_entire(vm: &mut Vm, call: &Call) -> Result<Value> {
    let (pattern, flags) = call.regex(vm)?;
    let text = call.string(vm, 1)?;
    let anchored = format!("^(?:{})$", pattern);
    let re = vm.compiled_regex(&anchored, &flags)?;
    if re.is_match(&text) {
        Ok(vm.memory.alloc_string(text))
    } else {
        Ok(Value::Null)
    }
}

fn regex_replace(vm: &mut Vm, call: &Call) -> Result<Value> {
    let (pattern, flags) = call.regex(vm)?;
    let text = call.string(vm, 1)?;
    let replacement = call.string(vm, 2)?;
    let re = vm.compiled_regex(&pattern, &flags)?;
    let out = re.replace_all(&text, replacement.as_str()).into_owned();
    Ok(vm.memory.alloc_string(out))
}

fn regex_split(vm: &mut Vm, call: &Call) -> Result<Value> {
    let (pattern, flags) = call.regex(vm)?;
    let text = call.string(vm, 1)?;
    let re = vm.compiled_regex(&pattern, &flags)?;
    let parts: Vec<String> = re.split(&text).map(str::to_string).collect();
    let values: Vec<Value> = parts
        .into_iter()
        .map(|p| vm.memory.alloc_string(p))
        .collect();
    Ok(vm.memory.alloc_list(values))
}
