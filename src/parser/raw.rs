use pest::{
    iterators::Pair,
    pratt_parser::{Assoc::*, Op, PrattParser},
    Parser,
};
use pest_derive::Parser;

use super::{
    ast::{
        BinaryExpression, Callee, CompareOperator, ConnectExpression, ConnectOperator, Expression,
        PropertyWrapper, Segment, Span, StringLiteral, ValueExpression,
    },
    error::{SelectorError, SpanExt},
    literal,
};
use crate::{pattern::Pattern, schema::Name};

#[derive(Parser)]
#[grammar = "parser/grammar.pest"]
pub struct RawParser;

impl RawParser {
    /// Parse selector source into its chain, head first
    pub fn parse_selector(input: &str) -> Result<PropertyWrapper, SelectorError> {
        let mut pairs = Self::parse(Rule::selector, input)
            .map_err(|e| SelectorError::from_pest(Box::new(e), input.to_string()))?;

        let selector_pair = pairs
            .next()
            .ok_or_else(|| SelectorError::internal("Grammar guarantees selector exists"))?;

        let mut segments = Vec::new();
        let mut connectors = Vec::new();
        let mut target_seen = false;

        for pair in selector_pair.into_inner() {
            match pair.as_rule() {
                Rule::segment => {
                    let segment = Self::parse_segment(pair, input)?;
                    if segments.is_empty() {
                        if let Some(window) = segment.window {
                            return Err(SelectorError::Malformed {
                                reason: format!(
                                    "offset window {} has no connector to bound",
                                    window
                                ),
                                span: segment.span.into(),
                                src: input.to_string(),
                            });
                        }
                    }
                    if segment.target {
                        if target_seen {
                            return Err(SelectorError::Malformed {
                                reason: "only one segment may be marked with @".to_string(),
                                span: segment.span.into(),
                                src: input.to_string(),
                            });
                        }
                        target_seen = true;
                    }
                    segments.push(segment);
                }
                Rule::connector => connectors.push(Self::parse_connector(pair)?),
                Rule::EOI => {}
                rule => {
                    return Err(SelectorError::internal(format!(
                        "Unexpected selector rule: {:?}",
                        rule
                    )))
                }
            }
        }

        PropertyWrapper::from_written(segments, connectors).ok_or_else(|| {
            SelectorError::internal("Grammar guarantees segments alternate with connectors")
                .with_source(input.to_string())
        })
    }

    fn parse_connector(pair: Pair<'_, Rule>) -> Result<ConnectOperator, SelectorError> {
        let inner = pair
            .into_inner()
            .next()
            .ok_or_else(|| SelectorError::internal("Grammar guarantees connector has content"))?;
        match inner.as_rule() {
            Rule::descendant => Ok(ConnectOperator::Descendant),
            Rule::child => Ok(ConnectOperator::Child),
            Rule::ancestor => Ok(ConnectOperator::Ancestor),
            Rule::before_brother => Ok(ConnectOperator::BeforeBrother),
            Rule::after_brother => Ok(ConnectOperator::AfterBrother),
            rule => Err(SelectorError::internal(format!(
                "Unexpected connector rule: {:?}",
                rule
            ))),
        }
    }

    fn parse_segment(pair: Pair<'_, Rule>, input: &str) -> Result<Segment, SelectorError> {
        let span = Span::from(pair.as_span());
        let mut target = false;
        let mut expression = None;
        let mut window = None;

        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::target => target = true,
                Rule::expression => expression = Some(Self::parse_expression(inner, input)?),
                Rule::window => window = Some(Self::parse_window(inner, input)?),
                rule => {
                    return Err(SelectorError::internal(format!(
                        "Unexpected segment rule: {:?}",
                        rule
                    )))
                }
            }
        }

        let expression = expression
            .ok_or_else(|| SelectorError::internal("Grammar guarantees segment has expression"))?;

        Ok(Segment {
            target,
            expression,
            window,
            span,
        })
    }

    fn parse_window(pair: Pair<'_, Rule>, input: &str) -> Result<ConnectExpression, SelectorError> {
        let span = pair.as_span();
        let range_error = |reason: &str| SelectorError::InvalidOffsetRange {
            range: span.as_str().to_string(),
            span: span.to_source_span(),
            reason: reason.to_string(),
            src: input.to_string(),
        };
        let offset = |p: Pair<Rule>| {
            p.as_str()
                .parse::<u32>()
                .map_err(|_| range_error("offset out of range"))
        };

        let body = pair
            .into_inner()
            .next()
            .ok_or_else(|| SelectorError::internal("Grammar guarantees window has content"))?;

        let expression = match body.as_rule() {
            Rule::window_exact => {
                let n = offset(body)?;
                ConnectExpression::new(n, Some(n))
            }
            Rule::window_range => {
                let mut min = 0;
                let mut max = None;
                for bound in body.into_inner() {
                    match bound.as_rule() {
                        Rule::window_min => min = offset(bound)?,
                        Rule::window_max => max = Some(offset(bound)?),
                        rule => {
                            return Err(SelectorError::internal(format!(
                                "Unexpected window rule: {:?}",
                                rule
                            )))
                        }
                    }
                }
                ConnectExpression::new(min, max)
            }
            rule => {
                return Err(SelectorError::internal(format!(
                    "Unexpected window rule: {:?}",
                    rule
                )))
            }
        };

        if expression.max.map_or(false, |max| max < expression.min) {
            return Err(range_error("lower bound exceeds upper bound"));
        }
        Ok(expression)
    }

    fn parse_expression(pair: Pair<'_, Rule>, input: &str) -> Result<Expression, SelectorError> {
        let pratt = PrattParser::new()
            .op(Op::infix(Rule::or, Left))
            .op(Op::infix(Rule::and, Left));

        pratt
            .map_primary(|primary| match primary.as_rule() {
                Rule::binary => Self::parse_binary(primary, input).map(Expression::Binary),
                Rule::expression => Self::parse_expression(primary, input),
                rule => Err(SelectorError::internal(format!(
                    "Unexpected primary rule: {:?}",
                    rule
                ))),
            })
            .map_infix(|lhs, op, rhs| match op.as_rule() {
                Rule::and => Ok(Expression::And(Box::new(lhs?), Box::new(rhs?))),
                Rule::or => Ok(Expression::Or(Box::new(lhs?), Box::new(rhs?))),
                rule => Err(SelectorError::internal(format!(
                    "Unexpected infix rule: {:?}",
                    rule
                ))),
            })
            .parse(pair.into_inner())
    }

    fn parse_binary(pair: Pair<'_, Rule>, input: &str) -> Result<BinaryExpression, SelectorError> {
        let span = Span::from(pair.as_span());
        let mut inner = pair.into_inner();

        let left_pair = inner
            .next()
            .ok_or_else(|| SelectorError::internal("Grammar guarantees comparison has left side"))?;
        let operator_pair = inner
            .next()
            .ok_or_else(|| SelectorError::internal("Grammar guarantees comparison has operator"))?;
        let right_pair = inner.next().ok_or_else(|| {
            SelectorError::internal("Grammar guarantees comparison has right side")
        })?;

        let operator = CompareOperator::parse(operator_pair.as_str()).ok_or_else(|| {
            SelectorError::internal(format!(
                "Grammar admitted unknown operator {}",
                operator_pair.as_str()
            ))
        })?;
        let left = Self::parse_value(left_pair, input)?;
        let mut right = Self::parse_value(right_pair, input)?;

        if matches!(operator, CompareOperator::Matches | CompareOperator::NotMatches) {
            if let ValueExpression::String(literal) = &mut right {
                let pattern = Pattern::compile(&literal.value).ok_or_else(|| {
                    SelectorError::UnsupportedPattern {
                        pattern: literal::quote(&literal.value),
                        span: literal.span.into(),
                        src: input.to_string(),
                    }
                })?;
                literal.pattern = Some(pattern);
            }
        }

        Ok(BinaryExpression {
            left,
            operator,
            right,
            span,
        })
    }

    fn parse_value(pair: Pair<'_, Rule>, input: &str) -> Result<ValueExpression, SelectorError> {
        let mut inner = pair.into_inner();
        let primary = inner
            .next()
            .ok_or_else(|| SelectorError::internal("Grammar guarantees value has a primary"))?;
        let mut value = Self::parse_primary(primary, input)?;

        for postfix in inner {
            let span = value.span().to(Span::from(postfix.as_span()));
            value = match postfix.as_rule() {
                Rule::member => {
                    let property = postfix.into_inner().next().ok_or_else(|| {
                        SelectorError::internal("Grammar guarantees member has a name")
                    })?;
                    ValueExpression::Member {
                        object: Box::new(value),
                        property: Name::new(property.as_str()),
                        span,
                    }
                }
                Rule::call => {
                    let arguments = postfix
                        .into_inner()
                        .map(|argument| Self::parse_value(argument, input))
                        .collect::<Result<Vec<_>, _>>()?;
                    let callee = match value {
                        ValueExpression::Identifier { name, span } => {
                            Callee::Identifier { name, span }
                        }
                        ValueExpression::Member {
                            object,
                            property,
                            span,
                        } => Callee::Member {
                            object,
                            property,
                            span,
                        },
                        other => {
                            return Err(SelectorError::Malformed {
                                reason: format!("{} cannot be called", other),
                                span: other.span().into(),
                                src: input.to_string(),
                            })
                        }
                    };
                    ValueExpression::Call {
                        callee,
                        arguments,
                        span,
                    }
                }
                rule => {
                    return Err(SelectorError::internal(format!(
                        "Unexpected value rule: {:?}",
                        rule
                    )))
                }
            };
        }

        Ok(value)
    }

    fn parse_primary(pair: Pair<'_, Rule>, input: &str) -> Result<ValueExpression, SelectorError> {
        let span = Span::from(pair.as_span());
        match pair.as_rule() {
            Rule::null => Ok(ValueExpression::Null { span }),
            Rule::boolean => Ok(ValueExpression::Boolean {
                value: pair.as_str() == "true",
                span,
            }),
            Rule::int => {
                let value = pair
                    .as_str()
                    .parse::<i32>()
                    .map_err(|_| SelectorError::Malformed {
                        reason: format!("integer {} is out of range", pair.as_str()),
                        span: span.into(),
                        src: input.to_string(),
                    })?;
                Ok(ValueExpression::Int { value, span })
            }
            Rule::identifier => Ok(ValueExpression::Identifier {
                name: Name::new(pair.as_str()),
                span,
            }),
            Rule::string => {
                // Grammar already separated the body from its quotes
                let body = pair.into_inner().next().ok_or_else(|| {
                    SelectorError::internal("Grammar guarantees string has a body")
                })?;
                let offset = body.as_span().start();
                let value =
                    literal::unescape(body.as_str()).map_err(|bad| SelectorError::InvalidEscape {
                        sequence: bad.sequence,
                        span: (offset + bad.start, bad.end - bad.start).into(),
                        src: input.to_string(),
                    })?;
                Ok(ValueExpression::String(StringLiteral {
                    value,
                    pattern: None,
                    span,
                }))
            }
            rule => Err(SelectorError::internal(format!(
                "Unexpected literal rule: {:?}",
                rule
            ))),
        }
    }
}
