use std::fmt;

use super::context::Context;
use crate::{schema::Symbol, transform::AttrValue};

/// Runtime value of a selector expression
///
/// Anything that cannot be computed (a missing attribute, a failed host call, an overflowing
/// addition) evaluates to `Null` instead of failing the match.
#[derive(Clone, PartialEq)]
pub enum Value<N> {
    Null,
    Bool(bool),
    Int(i32),
    Str(String),
    Node(N),
    Context(Context<N>),
}

impl<N> Value<N> {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl<N> From<AttrValue> for Value<N> {
    fn from(value: AttrValue) -> Self {
        match value {
            AttrValue::Null => Value::Null,
            AttrValue::Bool(b) => Value::Bool(b),
            AttrValue::Int(i) => Value::Int(i),
            AttrValue::Str(s) => Value::Str(s),
        }
    }
}

impl<N> From<Option<N>> for Value<N> {
    fn from(node: Option<N>) -> Self {
        node.map_or(Value::Null, Value::Node)
    }
}

impl<N: fmt::Debug> fmt::Debug for Value<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Node(n) => write!(f, "node {:?}", n),
            Value::Context(c) => write!(f, "context {:?}", c),
        }
    }
}

/// Properties of plain values
pub(crate) fn primitive_attr<N>(target: &Value<N>, symbol: Symbol) -> Value<N> {
    match (target, symbol) {
        (Value::Str(s), Symbol::Length) => Value::Int(s.chars().count() as i32),
        _ => Value::Null,
    }
}

/// Methods of plain values; arguments are never null here
pub(crate) fn invoke_primitive<N: Clone>(target: &Value<N>, symbol: Symbol, args: &[Value<N>]) -> Value<N> {
    match target {
        Value::Bool(b) => invoke_bool(*b, symbol, args),
        Value::Int(i) => invoke_int(*i, symbol, args),
        Value::Str(s) => invoke_str(s, symbol, args),
        _ => Value::Null,
    }
}

fn invoke_bool<N: Clone>(b: bool, symbol: Symbol, args: &[Value<N>]) -> Value<N> {
    match (symbol, args) {
        (Symbol::ToInt, []) => Value::Int(b as i32),
        (Symbol::Not, []) => Value::Bool(!b),
        (Symbol::Or, [Value::Bool(other)]) => Value::Bool(b || *other),
        (Symbol::And, [Value::Bool(other)]) => Value::Bool(b && *other),
        (Symbol::IfElse, [then, otherwise]) => {
            if b {
                then.clone()
            } else {
                otherwise.clone()
            }
        }
        _ => Value::Null,
    }
}

fn invoke_int<N>(i: i32, symbol: Symbol, args: &[Value<N>]) -> Value<N> {
    let int = |v: Option<i32>| v.map_or(Value::Null, Value::Int);
    match (symbol, args) {
        (Symbol::ToString, []) => Value::Str(i.to_string()),
        (Symbol::ToString, [Value::Int(radix)]) => {
            to_radix_string(i, *radix).map_or(Value::Null, Value::Str)
        }
        (Symbol::Plus, [Value::Int(o)]) => int(i.checked_add(*o)),
        (Symbol::Minus, [Value::Int(o)]) => int(i.checked_sub(*o)),
        (Symbol::Times, [Value::Int(o)]) => int(i.checked_mul(*o)),
        (Symbol::Div, [Value::Int(o)]) => int(i.checked_div(*o)),
        (Symbol::Rem, [Value::Int(o)]) => int(i.checked_rem(*o)),
        (Symbol::More, [Value::Int(o)]) => Value::Bool(i > *o),
        (Symbol::MoreEqual, [Value::Int(o)]) => Value::Bool(i >= *o),
        (Symbol::Less, [Value::Int(o)]) => Value::Bool(i < *o),
        (Symbol::LessEqual, [Value::Int(o)]) => Value::Bool(i <= *o),
        _ => Value::Null,
    }
}

fn invoke_str<N>(s: &str, symbol: Symbol, args: &[Value<N>]) -> Value<N> {
    let chars: Vec<char> = s.chars().collect();
    let len = chars.len() as i64;
    let slice = |start: i64, end: i64| {
        if 0 <= start && start <= end && end <= len {
            Value::Str(chars[start as usize..end as usize].iter().collect())
        } else {
            Value::Null
        }
    };

    match (symbol, args) {
        (Symbol::Get, [Value::Int(i)]) => slice(*i as i64, *i as i64 + 1),
        (Symbol::At, [Value::Int(i)]) => {
            // negative indices count from the end
            let i = if *i < 0 { len + *i as i64 } else { *i as i64 };
            slice(i, i + 1)
        }
        (Symbol::Substring, [Value::Int(start)]) => slice(*start as i64, len),
        (Symbol::Substring, [Value::Int(start), Value::Int(end)]) => {
            slice(*start as i64, *end as i64)
        }
        (Symbol::ToInt, []) => s.parse::<i32>().map_or(Value::Null, Value::Int),
        (Symbol::ToInt, [Value::Int(radix)]) => match u32::try_from(*radix) {
            Ok(radix @ 2..=36) => i32::from_str_radix(s, radix).map_or(Value::Null, Value::Int),
            _ => Value::Null,
        },
        (Symbol::IndexOf, [Value::Str(needle)]) => index_of(&chars, needle, 0),
        (Symbol::IndexOf, [Value::Str(needle), Value::Int(start)]) => {
            index_of(&chars, needle, (*start).max(0) as usize)
        }
        _ => Value::Null,
    }
}

fn index_of<N>(haystack: &[char], needle: &str, start: usize) -> Value<N> {
    let needle: Vec<char> = needle.chars().collect();
    if start > haystack.len() {
        return Value::Int(-1);
    }
    let found = if needle.is_empty() {
        Some(start)
    } else {
        haystack[start..]
            .windows(needle.len())
            .position(|w| w == needle.as_slice())
            .map(|p| p + start)
    };
    Value::Int(found.map_or(-1, |p| p as i32))
}

fn to_radix_string(value: i32, radix: i32) -> Option<String> {
    let radix = u32::try_from(radix).ok().filter(|r| (2..=36).contains(r))?;
    let mut n = (value as i64).unsigned_abs();
    if n == 0 {
        return Some("0".to_string());
    }
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(std::char::from_digit((n % radix as u64) as u32, radix)?);
        n /= radix as u64;
    }
    if value < 0 {
        digits.push('-');
    }
    Some(digits.into_iter().rev().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    type V = Value<u32>;

    #[test]
    fn test_int_methods() {
        assert_eq!(invoke_int::<u32>(7, Symbol::Plus, &[V::Int(3)]), V::Int(10));
        assert_eq!(invoke_int::<u32>(7, Symbol::Div, &[V::Int(0)]), V::Null);
        assert_eq!(invoke_int::<u32>(i32::MAX, Symbol::Plus, &[V::Int(1)]), V::Null);
        assert_eq!(
            invoke_int::<u32>(-255, Symbol::ToString, &[V::Int(16)]),
            V::Str("-ff".to_string())
        );
        assert_eq!(invoke_int::<u32>(1, Symbol::ToString, &[V::Int(1)]), V::Null);
    }

    #[test]
    fn test_string_methods() {
        let s = "跳过 5s";
        assert_eq!(invoke_str::<u32>(s, Symbol::Get, &[V::Int(0)]), V::Str("跳".to_string()));
        assert_eq!(invoke_str::<u32>(s, Symbol::At, &[V::Int(-1)]), V::Str("s".to_string()));
        assert_eq!(invoke_str::<u32>(s, Symbol::Get, &[V::Int(9)]), V::Null);
        assert_eq!(
            invoke_str::<u32>(s, Symbol::Substring, &[V::Int(3), V::Int(4)]),
            V::Str("5".to_string())
        );
        assert_eq!(
            invoke_str::<u32>(s, Symbol::IndexOf, &[V::Str("5s".to_string())]),
            V::Int(3)
        );
        assert_eq!(
            invoke_str::<u32>(s, Symbol::IndexOf, &[V::Str("x".to_string())]),
            V::Int(-1)
        );
        assert_eq!(invoke_str::<u32>("ff", Symbol::ToInt, &[V::Int(16)]), V::Int(255));
        assert_eq!(invoke_str::<u32>("12a", Symbol::ToInt, &[]), V::Null);
        assert_eq!(primitive_attr::<u32>(&V::Str(s.to_string()), Symbol::Length), V::Int(5));
    }

    #[test]
    fn test_bool_methods() {
        assert_eq!(invoke_bool::<u32>(true, Symbol::ToInt, &[]), V::Int(1));
        assert_eq!(
            invoke_bool::<u32>(false, Symbol::IfElse, &[V::Int(1), V::Int(2)]),
            V::Int(2)
        );
    }
}
