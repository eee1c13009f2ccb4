//! Static checking of a parsed selector against a [`Schema`]
//!
//! Every comparison is checked in chain order (head first, then left to right inside a
//! segment). The first problem found is reported; a selector that passes only touches
//! attributes and methods the schema declares, with matching arities and argument types.

use super::{
    ast::{BinaryExpression, Callee, CompareOperator, PropertyWrapper, Span, ValueExpression},
    error::SelectorError,
};
use crate::schema::{MethodInfo, Name, Schema, TypeId};

pub struct Typechecker;

impl Typechecker {
    pub fn check(
        wrapper: &PropertyWrapper,
        schema: &Schema,
        source: &str,
    ) -> Result<(), SelectorError> {
        let checker = Checker { schema, source };
        for link in wrapper.links() {
            for binary in link.segment.expression.binaries() {
                checker.check_binary(binary)?;
            }
        }
        Ok(())
    }
}

struct Checker<'a> {
    schema: &'a Schema,
    source: &'a str,
}

impl Checker<'_> {
    fn check_binary(&self, binary: &BinaryExpression) -> Result<(), SelectorError> {
        if !operand_shapes_allowed(binary) {
            return Err(self.operator_mismatch(binary));
        }

        let left = self.value_type(&binary.left)?;
        let right = self.value_type(&binary.right)?;

        if let (Some(l), Some(r)) = (left, right) {
            if l != r {
                return Err(SelectorError::MismatchExpressionType {
                    left: self.schema.name_of(l),
                    right: self.schema.name_of(r),
                    span: binary.span.into(),
                    src: self.source.to_string(),
                });
            }
        }

        let required = if binary.operator.is_string_operator() {
            Some(self.schema.string)
        } else if binary.operator.is_ordering() {
            Some(self.schema.int)
        } else {
            None
        };
        if let Some(required) = required {
            if [left, right].into_iter().flatten().any(|ty| ty != required) {
                return Err(self.operator_mismatch(binary));
            }
        }

        Ok(())
    }

    /// Type of an operand; `None` for the null literal, which fits anything
    fn value_type(&self, value: &ValueExpression) -> Result<Option<TypeId>, SelectorError> {
        match value {
            ValueExpression::Null { .. } => Ok(None),
            ValueExpression::Boolean { .. } => Ok(Some(self.schema.boolean)),
            ValueExpression::Int { .. } => Ok(Some(self.schema.int)),
            ValueExpression::String(_) => Ok(Some(self.schema.string)),
            ValueExpression::Identifier { .. }
            | ValueExpression::Member { .. }
            | ValueExpression::Call { .. } => self.resolve(value).map(Some),
        }
    }

    fn resolve(&self, value: &ValueExpression) -> Result<TypeId, SelectorError> {
        match value {
            ValueExpression::Identifier { name, span } => name
                .symbol()
                .and_then(|symbol| self.schema.get(self.schema.global).prop(symbol))
                .map(|prop| prop.ty)
                .ok_or_else(|| SelectorError::UnknownIdentifier {
                    name: name.to_string(),
                    span: (*span).into(),
                    src: self.source.to_string(),
                }),
            ValueExpression::Member {
                object,
                property,
                span,
            } => {
                let owner = self.owner_type(object, property, *span)?;
                property
                    .symbol()
                    .and_then(|symbol| self.schema.get(owner).prop(symbol))
                    .map(|prop| prop.ty)
                    .ok_or_else(|| SelectorError::UnknownMember {
                        member: property.to_string(),
                        owner: self.schema.name_of(owner),
                        span: (*span).into(),
                        src: self.source.to_string(),
                    })
            }
            ValueExpression::Call {
                callee, arguments, ..
            } => self.resolve_call(value, callee, arguments),
            ValueExpression::Null { span } => Err(SelectorError::UnknownIdentifier {
                name: "null".to_string(),
                span: (*span).into(),
                src: self.source.to_string(),
            }),
            ValueExpression::Boolean { .. } => Ok(self.schema.boolean),
            ValueExpression::Int { .. } => Ok(self.schema.int),
            ValueExpression::String(_) => Ok(self.schema.string),
        }
    }

    /// Type of the value a member or method is looked up on
    fn owner_type(
        &self,
        object: &ValueExpression,
        member: &Name,
        span: Span,
    ) -> Result<TypeId, SelectorError> {
        match object {
            ValueExpression::Null { .. } => Err(SelectorError::UnknownMember {
                member: member.to_string(),
                owner: "null".to_string(),
                span: span.into(),
                src: self.source.to_string(),
            }),
            _ => self.resolve(object),
        }
    }

    fn resolve_call(
        &self,
        call: &ValueExpression,
        callee: &Callee,
        arguments: &[ValueExpression],
    ) -> Result<TypeId, SelectorError> {
        let src = || self.source.to_string();
        let arity = arguments.len();

        let candidates: Vec<&MethodInfo> = match callee {
            Callee::Identifier { name, span } => {
                let named = self.methods_named(self.schema.global, name);
                if named.is_empty() {
                    return Err(SelectorError::UnknownIdentifierMethod {
                        name: name.to_string(),
                        span: (*span).into(),
                        src: src(),
                    });
                }
                let fitting: Vec<_> = named.into_iter().filter(|m| m.params.len() == arity).collect();
                if fitting.is_empty() {
                    return Err(SelectorError::UnknownIdentifierMethodParams {
                        name: name.to_string(),
                        arity,
                        span: call.span().into(),
                        src: src(),
                    });
                }
                fitting
            }
            Callee::Member {
                object,
                property,
                span,
            } => {
                let owner = self.owner_type(object, property, *span)?;
                let named = self.methods_named(owner, property);
                if named.is_empty() {
                    return Err(SelectorError::UnknownMemberMethod {
                        method: property.to_string(),
                        owner: self.schema.name_of(owner),
                        span: (*span).into(),
                        src: src(),
                    });
                }
                let fitting: Vec<_> = named.into_iter().filter(|m| m.params.len() == arity).collect();
                if fitting.is_empty() {
                    return Err(SelectorError::UnknownMemberMethodParams {
                        method: property.to_string(),
                        owner: self.schema.name_of(owner),
                        arity,
                        span: call.span().into(),
                        src: src(),
                    });
                }
                fitting
            }
        };

        let mut last_error = None;
        for method in candidates {
            match self.check_arguments(call, method, arguments) {
                Ok(()) => return Ok(method.return_type),
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error
            .unwrap_or_else(|| SelectorError::internal("overload list was empty").with_source(src())))
    }

    fn methods_named(&self, owner: TypeId, name: &Name) -> Vec<&MethodInfo> {
        match name.symbol() {
            Some(symbol) => self.schema.get(owner).methods_named(symbol).collect(),
            None => Vec::new(),
        }
    }

    fn check_arguments(
        &self,
        call: &ValueExpression,
        method: &MethodInfo,
        arguments: &[ValueExpression],
    ) -> Result<(), SelectorError> {
        for (param, argument) in method.params.iter().zip(arguments) {
            let Some(found) = self.value_type(argument)? else {
                continue;
            };
            if found != *param {
                return Err(SelectorError::MismatchParamType {
                    call: call.to_string(),
                    argument: argument.to_string(),
                    found: self.schema.name_of(found),
                    span: argument.span().into(),
                    src: self.source.to_string(),
                });
            }
        }
        Ok(())
    }

    fn operator_mismatch(&self, binary: &BinaryExpression) -> SelectorError {
        SelectorError::MismatchOperatorType {
            operator: binary.operator.to_string(),
            expression: binary.to_string(),
            span: binary.span.into(),
            src: self.source.to_string(),
        }
    }
}

/// Literal operands an operator can never accept, decided before any name is resolved
fn operand_shapes_allowed(binary: &BinaryExpression) -> bool {
    let variable = |v: &ValueExpression| !v.is_literal();
    let string_like = |v: &ValueExpression| matches!(v, ValueExpression::String(_)) || variable(v);
    let int_like = |v: &ValueExpression| matches!(v, ValueExpression::Int { .. }) || variable(v);

    match binary.operator {
        CompareOperator::Equal | CompareOperator::NotEqual => true,
        CompareOperator::Matches | CompareOperator::NotMatches => {
            string_like(&binary.left)
                && matches!(&binary.right, ValueExpression::String(s) if s.pattern.is_some())
        }
        op if op.is_string_operator() => string_like(&binary.left) && string_like(&binary.right),
        _ => int_like(&binary.left) && int_like(&binary.right),
    }
}
