//! Evaluation of segment predicates against a [`Context`]

pub mod context;
pub mod value;

use context::Context;
use value::Value;

use crate::{
    parser::{BinaryExpression, Callee, CompareOperator, Expression, ValueExpression},
    schema::{Name, Symbol},
    transform::Transform,
};

/// Evaluate a segment predicate, short circuiting `&&` and `||`
pub fn eval_expression<T: Transform + ?Sized>(
    expression: &Expression,
    context: &Context<T::Node>,
    t: &T,
) -> bool {
    match expression {
        Expression::Binary(binary) => eval_binary(binary, context, t),
        Expression::And(l, r) => eval_expression(l, context, t) && eval_expression(r, context, t),
        Expression::Or(l, r) => eval_expression(l, context, t) || eval_expression(r, context, t),
    }
}

pub fn eval_binary<T: Transform + ?Sized>(
    binary: &BinaryExpression,
    context: &Context<T::Node>,
    t: &T,
) -> bool {
    let left = eval_value(&binary.left, context, t);

    if let CompareOperator::Matches | CompareOperator::NotMatches = binary.operator {
        let ValueExpression::String(literal) = &binary.right else {
            return false;
        };
        return match (left.as_str(), &literal.pattern) {
            (Some(text), Some(pattern)) => {
                pattern.is_match(text) == (binary.operator == CompareOperator::Matches)
            }
            _ => false,
        };
    }

    let right = eval_value(&binary.right, context, t);
    compare(binary.operator, &left, &right)
}

/// Apply a comparison operator to two evaluated operands
pub fn compare<N: PartialEq>(operator: CompareOperator, left: &Value<N>, right: &Value<N>) -> bool {
    use CompareOperator::*;

    let strings = match (left, right) {
        (Value::Str(l), Value::Str(r)) => Some((l.as_str(), r.as_str())),
        _ => None,
    };
    let ints = match (left, right) {
        (Value::Int(l), Value::Int(r)) => Some((*l, *r)),
        _ => None,
    };

    match operator {
        Equal => left == right,
        NotEqual => left != right,
        StartWith => strings.map_or(false, |(l, r)| l.starts_with(r)),
        NotStartWith => strings.map_or(false, |(l, r)| !l.starts_with(r)),
        Include => strings.map_or(false, |(l, r)| l.contains(r)),
        NotInclude => strings.map_or(false, |(l, r)| !l.contains(r)),
        EndWith => strings.map_or(false, |(l, r)| l.ends_with(r)),
        NotEndWith => strings.map_or(false, |(l, r)| !l.ends_with(r)),
        // patterns only come from literals and are handled before the right side is evaluated
        Matches | NotMatches => false,
        Less => ints.map_or(false, |(l, r)| l < r),
        LessEqual => ints.map_or(false, |(l, r)| l <= r),
        More => ints.map_or(false, |(l, r)| l > r),
        MoreEqual => ints.map_or(false, |(l, r)| l >= r),
    }
}

pub fn eval_value<T: Transform + ?Sized>(
    value: &ValueExpression,
    context: &Context<T::Node>,
    t: &T,
) -> Value<T::Node> {
    match value {
        ValueExpression::Null { .. } => Value::Null,
        ValueExpression::Boolean { value, .. } => Value::Bool(*value),
        ValueExpression::Int { value, .. } => Value::Int(*value),
        ValueExpression::String(literal) => Value::Str(literal.value.clone()),
        ValueExpression::Identifier { name, .. } => match name.symbol() {
            Some(symbol) => t.get_attr(&Value::Context(context.clone()), symbol),
            None => Value::Null,
        },
        ValueExpression::Member {
            object, property, ..
        } => {
            let object = eval_value(object, context, t);
            match property.symbol() {
                Some(symbol) if !object.is_null() => t.get_attr(&object, symbol),
                _ => Value::Null,
            }
        }
        ValueExpression::Call {
            callee, arguments, ..
        } => eval_call(callee, arguments, context, t),
    }
}

fn eval_call<T: Transform + ?Sized>(
    callee: &Callee,
    arguments: &[ValueExpression],
    context: &Context<T::Node>,
    t: &T,
) -> Value<T::Node> {
    let (target, method) = match callee {
        Callee::Identifier { name, .. } => {
            match (name.symbol(), arguments) {
                (Some(Symbol::Equal), [a, b]) => {
                    return Value::Bool(eval_value(a, context, t) == eval_value(b, context, t))
                }
                (Some(Symbol::NotEqual), [a, b]) => {
                    return Value::Bool(eval_value(a, context, t) != eval_value(b, context, t))
                }
                _ => {}
            }
            (Value::Context(context.clone()), name)
        }
        Callee::Member {
            object, property, ..
        } => (eval_value(object, context, t), property),
    };

    let Some(symbol) = method.symbol() else {
        return Value::Null;
    };
    if target.is_null() {
        return Value::Null;
    }

    // forms that only evaluate the arguments they need
    match (symbol, &target, arguments) {
        (Symbol::Or, Value::Bool(true), [_]) => return Value::Bool(true),
        (Symbol::And, Value::Bool(false), [_]) => return Value::Bool(false),
        (Symbol::Or | Symbol::And, Value::Bool(_), [other]) => {
            return match eval_value(other, context, t) {
                Value::Bool(b) => Value::Bool(b),
                _ => Value::Null,
            }
        }
        (Symbol::IfElse, Value::Bool(b), [then, otherwise]) => {
            return eval_value(if *b { then } else { otherwise }, context, t)
        }
        _ => {}
    }

    let mut args = Vec::with_capacity(arguments.len());
    for argument in arguments {
        let value = eval_value(argument, context, t);
        if value.is_null() {
            return Value::Null;
        }
        args.push(value);
    }
    t.invoke(&target, symbol, &args)
}

/// Whether evaluating the value may touch the given names
pub(crate) fn mentions(value: &ValueExpression, symbols: &[Symbol]) -> bool {
    let mut found = false;
    value.visit(&mut |v| {
        let name: Option<&Name> = match v {
            ValueExpression::Identifier { name, .. } => Some(name),
            ValueExpression::Member { property, .. } => Some(property),
            ValueExpression::Call { callee, .. } => match callee {
                Callee::Identifier { name, .. } => Some(name),
                Callee::Member { property, .. } => Some(property),
            },
            _ => None,
        };
        if name.and_then(Name::symbol).map_or(false, |s| symbols.contains(&s)) {
            found = true;
        }
    });
    found
}
