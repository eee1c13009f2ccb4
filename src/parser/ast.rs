use std::fmt;

use miette::SourceSpan;

use super::literal::quote;
use crate::{pattern::Pattern, schema::Name};

/// Byte range of a syntax node in the selector source
///
/// Spans never take part in equality: two ASTs are equal when their structure is, wherever the
/// nodes were written.
#[derive(Debug, Clone, Copy, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }

    pub fn to(self, other: Span) -> Span {
        Span::new(self.start, other.end)
    }
}

impl PartialEq for Span {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl Eq for Span {}

impl From<pest::Span<'_>> for Span {
    fn from(span: pest::Span<'_>) -> Self {
        Span::new(span.start(), span.end())
    }
}

impl From<Span> for SourceSpan {
    fn from(span: Span) -> Self {
        (span.start, span.end.saturating_sub(span.start)).into()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringLiteral {
    pub value: String,
    /// Present when the literal is the right side of `~=`/`!~=`
    pub pattern: Option<Pattern>,
    pub span: Span,
}

/// Target of a call: only names can be called
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callee {
    Identifier {
        name: Name,
        span: Span,
    },
    Member {
        object: Box<ValueExpression>,
        property: Name,
        span: Span,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueExpression {
    Null {
        span: Span,
    },
    Boolean {
        value: bool,
        span: Span,
    },
    Int {
        value: i32,
        span: Span,
    },
    String(StringLiteral),
    Identifier {
        name: Name,
        span: Span,
    },
    Member {
        object: Box<ValueExpression>,
        property: Name,
        span: Span,
    },
    Call {
        callee: Callee,
        arguments: Vec<ValueExpression>,
        span: Span,
    },
}

impl ValueExpression {
    pub fn span(&self) -> Span {
        match self {
            ValueExpression::Null { span }
            | ValueExpression::Boolean { span, .. }
            | ValueExpression::Int { span, .. }
            | ValueExpression::String(StringLiteral { span, .. })
            | ValueExpression::Identifier { span, .. }
            | ValueExpression::Member { span, .. }
            | ValueExpression::Call { span, .. } => *span,
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            ValueExpression::Null { .. }
                | ValueExpression::Boolean { .. }
                | ValueExpression::Int { .. }
                | ValueExpression::String(_)
        )
    }

    /// Calls every node of this value tree, outermost first
    pub fn visit<'a>(&'a self, f: &mut dyn FnMut(&'a ValueExpression)) {
        f(self);
        match self {
            ValueExpression::Member { object, .. } => object.visit(f),
            ValueExpression::Call {
                callee, arguments, ..
            } => {
                if let Callee::Member { object, .. } = callee {
                    object.visit(f);
                }
                for argument in arguments {
                    argument.visit(f);
                }
            }
            _ => {}
        }
    }
}

impl fmt::Display for Callee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callee::Identifier { name, .. } => write!(f, "{}", name),
            Callee::Member {
                object, property, ..
            } => write!(f, "{}.{}", object, property),
        }
    }
}

impl fmt::Display for ValueExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueExpression::Null { .. } => f.write_str("null"),
            ValueExpression::Boolean { value, .. } => write!(f, "{}", value),
            ValueExpression::Int { value, .. } => write!(f, "{}", value),
            ValueExpression::String(s) => f.write_str(&quote(&s.value)),
            ValueExpression::Identifier { name, .. } => write!(f, "{}", name),
            ValueExpression::Member {
                object, property, ..
            } => write!(f, "{}.{}", object, property),
            ValueExpression::Call {
                callee, arguments, ..
            } => {
                write!(f, "{}(", callee)?;
                for (i, argument) in arguments.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", argument)?;
                }
                f.write_str(")")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOperator {
    Equal,
    NotEqual,
    StartWith,
    NotStartWith,
    Include,
    NotInclude,
    EndWith,
    NotEndWith,
    Matches,
    NotMatches,
    Less,
    LessEqual,
    More,
    MoreEqual,
}

impl CompareOperator {
    pub fn parse(s: &str) -> Option<Self> {
        use CompareOperator::*;
        Some(match s {
            "=" => Equal,
            "!=" => NotEqual,
            "^=" => StartWith,
            "!^=" => NotStartWith,
            "*=" => Include,
            "!*=" => NotInclude,
            "$=" => EndWith,
            "!$=" => NotEndWith,
            "~=" => Matches,
            "!~=" => NotMatches,
            "<" => Less,
            "<=" => LessEqual,
            ">" => More,
            ">=" => MoreEqual,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        use CompareOperator::*;
        match self {
            Equal => "=",
            NotEqual => "!=",
            StartWith => "^=",
            NotStartWith => "!^=",
            Include => "*=",
            NotInclude => "!*=",
            EndWith => "$=",
            NotEndWith => "!$=",
            Matches => "~=",
            NotMatches => "!~=",
            Less => "<",
            LessEqual => "<=",
            More => ">",
            MoreEqual => ">=",
        }
    }

    /// Operators that only hold between two strings
    pub fn is_string_operator(&self) -> bool {
        use CompareOperator::*;
        matches!(
            self,
            StartWith
                | NotStartWith
                | Include
                | NotInclude
                | EndWith
                | NotEndWith
                | Matches
                | NotMatches
        )
    }

    /// Operators that only hold between two ints
    pub fn is_ordering(&self) -> bool {
        use CompareOperator::*;
        matches!(self, Less | LessEqual | More | MoreEqual)
    }
}

impl fmt::Display for CompareOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryExpression {
    pub left: ValueExpression,
    pub operator: CompareOperator,
    pub right: ValueExpression,
    pub span: Span,
}

impl fmt::Display for BinaryExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.left, self.operator, self.right)
    }
}

/// The boolean predicate of one segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expression {
    Binary(BinaryExpression),
    And(Box<Expression>, Box<Expression>),
    Or(Box<Expression>, Box<Expression>),
}

impl Expression {
    fn precedence(&self) -> u8 {
        match self {
            Expression::Or(..) => 1,
            Expression::And(..) => 2,
            Expression::Binary(_) => 3,
        }
    }

    /// Comparisons in source order
    pub fn binaries(&self) -> Vec<&BinaryExpression> {
        let mut out = Vec::new();
        self.collect_binaries(&mut out);
        out
    }

    fn collect_binaries<'a>(&'a self, out: &mut Vec<&'a BinaryExpression>) {
        match self {
            Expression::Binary(b) => out.push(b),
            Expression::And(l, r) | Expression::Or(l, r) => {
                l.collect_binaries(out);
                r.collect_binaries(out);
            }
        }
    }

    /// Comparisons that must hold for the whole expression to hold
    pub fn conjuncts(&self) -> Vec<&BinaryExpression> {
        match self {
            Expression::Binary(b) => vec![b],
            Expression::And(l, r) => {
                let mut out = l.conjuncts();
                out.extend(r.conjuncts());
                out
            }
            Expression::Or(..) => Vec::new(),
        }
    }

    fn fmt_operand(&self, f: &mut fmt::Formatter<'_>, wrap: bool) -> fmt::Result {
        if wrap {
            write!(f, "({})", self)
        } else {
            write!(f, "{}", self)
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (l, r, op) = match self {
            Expression::Binary(b) => return write!(f, "{}", b),
            Expression::And(l, r) => (l, r, "&&"),
            Expression::Or(l, r) => (l, r, "||"),
        };
        // left associative: an equal-precedence right operand keeps its parentheses
        l.fmt_operand(f, l.precedence() < self.precedence())?;
        write!(f, " {} ", op)?;
        r.fmt_operand(f, r.precedence() <= self.precedence())
    }
}

/// Offset bounds for the candidates of one connector, counted from zero
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectExpression {
    pub min: u32,
    pub max: Option<u32>,
}

impl Default for ConnectExpression {
    fn default() -> Self {
        ConnectExpression { min: 0, max: None }
    }
}

impl ConnectExpression {
    pub fn new(min: u32, max: Option<u32>) -> Self {
        ConnectExpression { min, max }
    }

    pub fn check_offset(&self, offset: usize) -> bool {
        offset >= self.min as usize && !self.is_exhausted(offset)
    }

    /// No candidate at or beyond this offset can be accepted
    pub fn is_exhausted(&self, offset: usize) -> bool {
        self.max.map_or(false, |max| offset > max as usize)
    }
}

impl fmt::Display for ConnectExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) if max == self.min => write!(f, "{{{}}}", max),
            Some(max) => write!(f, "{{{},{}}}", self.min, max),
            None => write!(f, "{{{},}}", self.min),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectOperator {
    BeforeBrother,
    AfterBrother,
    Ancestor,
    Child,
    Descendant,
}

impl ConnectOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectOperator::BeforeBrother => "+",
            ConnectOperator::AfterBrother => "-",
            ConnectOperator::Ancestor => ">",
            ConnectOperator::Child => "<",
            ConnectOperator::Descendant => "<<",
        }
    }
}

impl fmt::Display for ConnectOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// `@` marker: this segment's node is the one returned by a match
    pub target: bool,
    pub expression: Expression,
    /// Bounds the connector walked from a node matched by this segment
    pub window: Option<ConnectExpression>,
    pub span: Span,
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.target {
            f.write_str("@")?;
        }
        write!(f, "[{}]", self.expression)?;
        if let Some(window) = &self.window {
            write!(f, "{}", window)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectWrapper {
    pub operator: ConnectOperator,
    pub expression: ConnectExpression,
    pub to: Box<PropertyWrapper>,
}

/// One link of a selector chain
///
/// The chain starts at the last written segment, the one a candidate node is tested against
/// first, and each connector leads to the segment written before it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyWrapper {
    pub segment: Segment,
    pub to: Option<ConnectWrapper>,
}

impl PropertyWrapper {
    /// Builds the chain from segments and connectors in written order
    ///
    /// `connectors[i]` sits between `segments[i]` and `segments[i + 1]`.
    pub fn from_written(segments: Vec<Segment>, connectors: Vec<ConnectOperator>) -> Option<Self> {
        if segments.len() != connectors.len() + 1 {
            return None;
        }
        let mut connectors = connectors.into_iter();
        let mut segments = segments.into_iter();
        let mut wrapper = PropertyWrapper {
            segment: segments.next()?,
            to: None,
        };
        for segment in segments {
            let operator = connectors.next()?;
            wrapper = PropertyWrapper {
                to: Some(ConnectWrapper {
                    operator,
                    expression: segment.window.unwrap_or_default(),
                    to: Box::new(wrapper),
                }),
                segment,
            };
        }
        Some(wrapper)
    }

    /// Links of the chain, head first
    pub fn links(&self) -> Vec<&PropertyWrapper> {
        let mut out = vec![self];
        let mut current = self;
        while let Some(connect) = &current.to {
            current = &connect.to;
            out.push(current);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.links().len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

impl fmt::Display for PropertyWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let links = self.links();
        for (i, link) in links.iter().rev().enumerate() {
            if i > 0 {
                // the connector to the previous written segment hangs off this link
                if let Some(connect) = &link.to {
                    write!(f, " {} ", connect.operator)?;
                }
            }
            write!(f, "{}", link.segment)?;
        }
        Ok(())
    }
}
