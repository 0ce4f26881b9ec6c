//! Binary, unary, and compound-assignment operators.
//!
//! Arithmetic follows the coercion ladder (Bool < Int < Float): mixed
//! operands are promoted to the higher kind. Integer arithmetic wraps
//! with the host; there is no float modulus. `+` concatenates strings
//! (formatting the other operand) and appends to lists; `*` repeats
//! strings and lists.
//!
//! Compound assignment mutates collections in place so every alias
//! observes the update; `loved += nudged` grows the shared list rather
//! than rebinding the variable.

use yq_core::bytecode::{AssignOp, BinaryOp, UnaryOp};
use yq_core::error::{Error, Result};
use yq_core::memory::Memory;
use yq_core::pointer::Pointer;
use yq_core::value::{Collection, NumericPair, Ref, Value, ValueKind, numeric_pair};

pub fn binary(memory: &mut Memory, op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value> {
    match op {
        BinaryOp::Add => add(memory, lhs, rhs),
        BinaryOp::Sub => arith(memory, lhs, rhs, |a, b| a.wrapping_sub(b), |a, b| a - b),
        BinaryOp::Mul => mul(memory, lhs, rhs),
        BinaryOp::Div => div(memory, lhs, rhs),
        BinaryOp::Mod => modulo(memory, lhs, rhs),
        BinaryOp::Eq => Ok(Value::Boolean(memory.values_equal(lhs, rhs))),
        BinaryOp::Ne => Ok(Value::Boolean(!memory.values_equal(lhs, rhs))),
        BinaryOp::Gt => Ok(Value::Boolean(memory.compare(lhs, rhs)?.is_gt())),
        BinaryOp::Lt => Ok(Value::Boolean(memory.compare(lhs, rhs)?.is_lt())),
        BinaryOp::Ge => Ok(Value::Boolean(memory.compare(lhs, rhs)?.is_ge())),
        BinaryOp::Le => Ok(Value::Boolean(memory.compare(lhs, rhs)?.is_le())),
        BinaryOp::And => Ok(Value::Boolean(memory.truthy(lhs) && memory.truthy(rhs))),
        BinaryOp::Or => Ok(Value::Boolean(memory.truthy(lhs) || memory.truthy(rhs))),
        BinaryOp::In => Ok(Value::Boolean(memory.contains(rhs, lhs)?)),
    }
}

pub fn unary(memory: &Memory, op: UnaryOp, v: &Value) -> Result<Value> {
    match op {
        UnaryOp::Minus => match v {
            Value::Boolean(b) => Ok(Value::Integer(-(*b as i64))),
            Value::Integer(n) => Ok(Value::Integer(n.wrapping_neg())),
            Value::Float(x) => Ok(Value::Float(-x)),
            other => Err(Error::type_mismatch(
                &[ValueKind::Integer, ValueKind::Float],
                memory.kind_of(other),
            )),
        },
        UnaryOp::Not => Ok(Value::Boolean(!memory.truthy(v))),
    }
}

/// `target op= rhs`. Lists and strings grow in place; everything else
/// computes and writes back through the target cell.
pub fn op_assign(memory: &mut Memory, op: AssignOp, target: Pointer, rhs: &Value) -> Result<()> {
    let current = memory.read(target).clone();
    if op == AssignOp::Add {
        if let Value::Reference(Ref::Bound(id)) = &current {
            match memory.collection(*id).clone() {
                Collection::List(_) => {
                    let cells = match rhs {
                        Value::Reference(r) => match memory.resolve_ref(r).clone() {
                            Collection::List(slots) => {
                                slots.iter().map(|p| memory.copy(*p)).collect()
                            }
                            _ => vec![memory.allocate(rhs.clone())],
                        },
                        other => vec![memory.allocate(other.clone())],
                    };
                    match memory.collection_mut(*id) {
                        Collection::List(items) => items.extend(cells),
                        _ => unreachable!(),
                    }
                    return Ok(());
                }
                Collection::String(_) => {
                    let tail = memory.display_value(rhs);
                    match memory.collection_mut(*id) {
                        Collection::String(s) => s.push_str(&tail),
                        _ => unreachable!(),
                    }
                    return Ok(());
                }
                Collection::Object(_) => {
                    return Err(Error::type_mismatch(
                        &[ValueKind::List, ValueKind::String],
                        ValueKind::Object,
                    ));
                }
            }
        }
    }
    if op == AssignOp::Mul
        && let Value::Reference(Ref::Bound(id)) = &current
    {
        let times = rhs.as_integer().ok_or_else(|| {
            Error::type_mismatch(&[ValueKind::Integer], memory.kind_of(rhs))
        })?;
        return repeat_in_place(memory, *id, times);
    }
    let result = binary(memory, op.binary(), &current, rhs)?;
    memory.write(target, result);
    Ok(())
}

fn repeat_in_place(memory: &mut Memory, id: yq_core::pointer::CollectionId, times: i64) -> Result<()> {
    let times = times.max(0) as usize;
    match memory.collection(id).clone() {
        Collection::String(s) => {
            match memory.collection_mut(id) {
                Collection::String(out) => *out = s.repeat(times),
                _ => unreachable!(),
            }
            Ok(())
        }
        Collection::List(slots) => {
            let mut cells = Vec::with_capacity(slots.len() * times);
            for _ in 0..times {
                for p in &slots {
                    cells.push(memory.copy(*p));
                }
            }
            match memory.collection_mut(id) {
                Collection::List(items) => *items = cells,
                _ => unreachable!(),
            }
            Ok(())
        }
        Collection::Object(_) => Err(Error::type_mismatch(
            &[ValueKind::List, ValueKind::String],
            ValueKind::Object,
        )),
    }
}

fn add(memory: &mut Memory, lhs: &Value, rhs: &Value) -> Result<Value> {
    // String concatenation formats the other operand.
    if let Some(s) = memory.read_string(lhs) {
        let mut out = s.to_string();
        out.push_str(&memory.display_value(rhs));
        return Ok(memory.alloc_string(out));
    }
    if let Some(s) = memory.read_string(rhs) {
        let mut out = memory.display_value(lhs);
        out.push_str(s);
        return Ok(memory.alloc_string(out));
    }
    // List append; a non-list right operand joins as a single element.
    if let Value::Reference(r) = lhs
        && let Collection::List(slots) = memory.resolve_ref(r)
    {
        let mut values: Vec<Value> = slots
            .clone()
            .iter()
            .map(|p| memory.read(*p).clone())
            .collect();
        match rhs {
            Value::Reference(rr) => match memory.resolve_ref(rr).clone() {
                Collection::List(extra) => {
                    for p in extra {
                        values.push(memory.read(p).clone());
                    }
                }
                _ => values.push(rhs.clone()),
            },
            other => values.push(other.clone()),
        }
        return Ok(memory.alloc_list(values));
    }
    arith(memory, lhs, rhs, |a, b| a.wrapping_add(b), |a, b| a + b)
}

fn mul(memory: &mut Memory, lhs: &Value, rhs: &Value) -> Result<Value> {
    if let Some(s) = memory.read_string(lhs) {
        let times = expect_count(memory, rhs)?;
        let out = s.repeat(times);
        return Ok(memory.alloc_string(out));
    }
    if let Value::Reference(r) = lhs
        && let Collection::List(slots) = memory.resolve_ref(r)
    {
        let times = expect_count(memory, rhs)?;
        let slots = slots.clone();
        let mut values = Vec::with_capacity(slots.len() * times);
        for _ in 0..times {
            for p in &slots {
                values.push(memory.read(*p).clone());
            }
        }
        return Ok(memory.alloc_list(values));
    }
    arith(memory, lhs, rhs, |a, b| a.wrapping_mul(b), |a, b| a * b)
}

fn expect_count(memory: &Memory, v: &Value) -> Result<usize> {
    match v.as_integer() {
        Some(n) => Ok(n.max(0) as usize),
        None => Err(Error::type_mismatch(
            &[ValueKind::Integer],
            memory.kind_of(v),
        )),
    }
}

fn div(memory: &Memory, lhs: &Value, rhs: &Value) -> Result<Value> {
    match numeric_pair(lhs, rhs) {
        Some(NumericPair::Integers(a, b)) => {
            if b == 0 {
                Err(Error::builtin("division by zero"))
            } else {
                Ok(Value::Integer(a.wrapping_div(b)))
            }
        }
        Some(NumericPair::Floats(a, b)) => Ok(Value::Float(a / b)),
        None => Err(mismatch(memory, lhs, rhs)),
    }
}

/// Integer-only; float modulus is deliberately unsupported.
fn modulo(memory: &Memory, lhs: &Value, rhs: &Value) -> Result<Value> {
    match numeric_pair(lhs, rhs) {
        Some(NumericPair::Integers(a, b)) => {
            if b == 0 {
                Err(Error::builtin("division by zero"))
            } else {
                Ok(Value::Integer(a.wrapping_rem(b)))
            }
        }
        Some(NumericPair::Floats(_, _)) => Err(Error::type_mismatch(
            &[ValueKind::Integer],
            ValueKind::Float,
        )),
        None => Err(mismatch(memory, lhs, rhs)),
    }
}

fn arith(
    memory: &Memory,
    lhs: &Value,
    rhs: &Value,
    int_op: fn(i64, i64) -> i64,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value> {
    match numeric_pair(lhs, rhs) {
        Some(NumericPair::Integers(a, b)) => Ok(Value::Integer(int_op(a, b))),
        Some(NumericPair::Floats(a, b)) => Ok(Value::Float(float_op(a, b))),
        None => Err(mismatch(memory, lhs, rhs)),
    }
}

fn mismatch(memory: &Memory, lhs: &Value, rhs: &Value) -> Error {
    let found = if lhs.is_arithmetic() {
        memory.kind_of(rhs)
    } else {
        memory.kind_of(lhs)
    };
    Error::type_mismatch(&[ValueKind::Integer, ValueKind::Float], found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coercion_ladder() {
        let mut mem = Memory::new();
        assert_eq!(
            binary(&mut mem, BinaryOp::Add, &Value::Boolean(true), &Value::Integer(2)).unwrap(),
            Value::Integer(3)
        );
        assert_eq!(
            binary(&mut mem, BinaryOp::Add, &Value::Integer(1), &Value::Float(0.5)).unwrap(),
            Value::Float(1.5)
        );
    }

    #[test]
    fn test_string_concat_formats_other_operand() {
        let mut mem = Memory::new();
        let s = mem.alloc_string("n=");
        let out = binary(&mut mem, BinaryOp::Add, &s, &Value::Integer(4)).unwrap();
        assert_eq!(mem.display_value(&out), "n=4");
        let s = mem.alloc_string("!");
        let out = binary(&mut mem, BinaryOp::Add, &Value::Integer(4), &s).unwrap();
        assert_eq!(mem.display_value(&out), "4!");
    }

    #[test]
    fn test_string_repeat() {
        let mut mem = Memory::new();
        let s = mem.alloc_string("ab");
        let out = binary(&mut mem, BinaryOp::Mul, &s, &Value::Integer(3)).unwrap();
        assert_eq!(mem.display_value(&out), "ababab");
    }

    #[test]
    fn test_list_append_wraps_scalars() {
        let mut mem = Memory::new();
        let a = mem.alloc_list(vec![Value::Integer(1)]);
        let out = binary(&mut mem, BinaryOp::Add, &a, &Value::Integer(2)).unwrap();
        assert_eq!(mem.display_value(&out), "[1, 2]");
        let b = mem.alloc_list(vec![Value::Integer(3)]);
        let out = binary(&mut mem, BinaryOp::Add, &out, &b).unwrap();
        assert_eq!(mem.display_value(&out), "[1, 2, 3]");
    }

    #[test]
    fn test_integer_division_truncates_and_checks_zero() {
        let mut mem = Memory::new();
        assert_eq!(
            binary(&mut mem, BinaryOp::Div, &Value::Integer(7), &Value::Integer(2)).unwrap(),
            Value::Integer(3)
        );
        assert!(binary(&mut mem, BinaryOp::Div, &Value::Integer(7), &Value::Integer(0)).is_err());
    }

    #[test]
    fn test_float_modulus_is_rejected() {
        let mut mem = Memory::new();
        assert!(
            binary(&mut mem, BinaryOp::Mod, &Value::Float(7.0), &Value::Integer(2)).is_err()
        );
    }

    #[test]
    fn test_comparisons_on_strings() {
        let mut mem = Memory::new();
        let a = mem.alloc_string("apple");
        let b = mem.alloc_string("banana");
        assert_eq!(
            binary(&mut mem, BinaryOp::Lt, &a, &b).unwrap(),
            Value::Boolean(true)
        );
    }

    #[test]
    fn test_in_operator_order() {
        let mut mem = Memory::new();
        let list = mem.alloc_list(vec![Value::Integer(3)]);
        assert_eq!(
            binary(&mut mem, BinaryOp::In, &Value::Integer(3), &list).unwrap(),
            Value::Boolean(true)
        );
    }

    #[test]
    fn test_compound_add_appends_in_place() {
        let mut mem = Memory::new();
        let list = mem.alloc_list(vec![Value::Integer(1)]);
        let alias = list.clone();
        let cell = mem.allocate(list);
        op_assign(&mut mem, AssignOp::Add, cell, &Value::Integer(2)).unwrap();
        // The alias sees the append because the collection mutated.
        assert_eq!(mem.display_value(&alias), "[1, 2]");
    }

    #[test]
    fn test_compound_on_scalar_writes_through_cell() {
        let mut mem = Memory::new();
        let cell = mem.allocate(Value::Integer(5));
        op_assign(&mut mem, AssignOp::Mul, cell, &Value::Integer(3)).unwrap();
        assert_eq!(mem.read(cell), &Value::Integer(15));
    }

    #[test]
    fn test_unary() {
        let mem = Memory::new();
        assert_eq!(
            unary(&mem, UnaryOp::Minus, &Value::Integer(4)).unwrap(),
            Value::Integer(-4)
        );
        assert_eq!(
            unary(&mem, UnaryOp::Not, &Value::Null).unwrap(),
            Value::Boolean(true)
        );
    }
}
