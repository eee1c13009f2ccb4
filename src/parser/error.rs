use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

use super::raw::Rule;

/// Coarse classification of a [`SelectorError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The source does not describe a selector; a rule carrying it is never activated
    Syntax,
    /// The selector uses the vocabulary wrongly; a rule carrying it is disabled
    TypeCheck,
    Internal,
}

/// Everything that can go wrong turning selector source into a checked selector
#[allow(dead_code)] // Fields are used by miette's derive macros
#[derive(Debug, Clone, Diagnostic, Error)]
pub enum SelectorError {
    #[error("Syntax error at line {line}, column {col}")]
    #[diagnostic(code(nodesel::syntax))]
    Syntax {
        #[source_code]
        src: String,
        #[label("{expected_msg}")]
        span: SourceSpan,
        #[help]
        help: Option<String>,
        expected_msg: String,
        line: usize,
        col: usize,
    },

    #[error("Invalid escape sequence '{sequence}'")]
    #[diagnostic(
        code(nodesel::invalid_escape),
        help("Valid escape sequences: \\\\, \\\", \\', \\n, \\r, \\t, \\b, \\xHH, \\uHHHH")
    )]
    InvalidEscape {
        sequence: String,
        #[label("invalid escape")]
        span: SourceSpan,
        #[source_code]
        src: String,
    },

    #[error("Invalid offset range {range}")]
    #[diagnostic(
        code(nodesel::invalid_offset_range),
        help("Offsets are non-negative and the lower bound may not exceed the upper one")
    )]
    InvalidOffsetRange {
        range: String,
        #[label("{reason}")]
        span: SourceSpan,
        reason: String,
        #[source_code]
        src: String,
    },

    #[error("Unsupported pattern {pattern}")]
    #[diagnostic(
        code(nodesel::unsupported_pattern),
        help("Only (?is)prefix.*, (?is).*infix.* and (?is).*suffix are supported")
    )]
    UnsupportedPattern {
        pattern: String,
        #[label("not a prefix, infix or suffix pattern")]
        span: SourceSpan,
        #[source_code]
        src: String,
    },

    #[error("Malformed selector: {reason}")]
    #[diagnostic(code(nodesel::malformed))]
    Malformed {
        reason: String,
        #[label("here")]
        span: SourceSpan,
        #[source_code]
        src: String,
    },

    #[error("Unknown identifier: {name}")]
    #[diagnostic(code(nodesel::unknown_identifier))]
    UnknownIdentifier {
        name: String,
        #[label("unknown identifier")]
        span: SourceSpan,
        #[source_code]
        src: String,
    },

    #[error("Unknown method: {name}")]
    #[diagnostic(code(nodesel::unknown_identifier_method))]
    UnknownIdentifierMethod {
        name: String,
        #[label("unknown method")]
        span: SourceSpan,
        #[source_code]
        src: String,
    },

    #[error("Method {name} does not take {arity} argument(s)")]
    #[diagnostic(code(nodesel::unknown_identifier_method_params))]
    UnknownIdentifierMethodParams {
        name: String,
        arity: usize,
        #[label("wrong number of arguments")]
        span: SourceSpan,
        #[source_code]
        src: String,
    },

    #[error("Unknown member {member} on {owner}")]
    #[diagnostic(code(nodesel::unknown_member))]
    UnknownMember {
        member: String,
        owner: String,
        #[label("unknown member")]
        span: SourceSpan,
        #[source_code]
        src: String,
    },

    #[error("Unknown method {method} on {owner}")]
    #[diagnostic(code(nodesel::unknown_member_method))]
    UnknownMemberMethod {
        method: String,
        owner: String,
        #[label("unknown method")]
        span: SourceSpan,
        #[source_code]
        src: String,
    },

    #[error("Method {method} on {owner} does not take {arity} argument(s)")]
    #[diagnostic(code(nodesel::unknown_member_method_params))]
    UnknownMemberMethodParams {
        method: String,
        owner: String,
        arity: usize,
        #[label("wrong number of arguments")]
        span: SourceSpan,
        #[source_code]
        src: String,
    },

    #[error("Operator {operator} cannot be used in {expression}")]
    #[diagnostic(
        code(nodesel::mismatch_operator_type),
        help("String operators need strings on both sides, <, <=, > and >= need ints, ~= needs a string literal")
    )]
    MismatchOperatorType {
        operator: String,
        expression: String,
        #[label("operand types do not fit this operator")]
        span: SourceSpan,
        #[source_code]
        src: String,
    },

    #[error("Cannot compare {left} with {right}")]
    #[diagnostic(code(nodesel::mismatch_expression_type))]
    MismatchExpressionType {
        left: String,
        right: String,
        #[label("{left} compared with {right}")]
        span: SourceSpan,
        #[source_code]
        src: String,
    },

    #[error("Argument {argument} of {call} has type {found}")]
    #[diagnostic(code(nodesel::mismatch_param_type))]
    MismatchParamType {
        call: String,
        argument: String,
        found: String,
        #[label("argument of the wrong type")]
        span: SourceSpan,
        #[source_code]
        src: String,
    },

    #[error("Internal parser error: {message}")]
    #[diagnostic(code(nodesel::internal))]
    Internal {
        message: String,
        #[source_code]
        src: String,
    },
}

// Extension trait for span location extraction
pub trait SpanExt {
    fn to_source_span(&self) -> SourceSpan;
}

impl SpanExt for pest::Span<'_> {
    #[inline]
    fn to_source_span(&self) -> SourceSpan {
        (self.start(), self.end() - self.start()).into()
    }
}

/// Convert pest Rule enum to user-friendly names
fn rule_to_friendly_name(rule: &Rule) -> &'static str {
    match rule {
        Rule::selector => "selector",
        Rule::segment => "segment",
        Rule::connector => "connector (<<, <, >, +, -)",
        Rule::target => "@",
        Rule::window => "offset window",
        Rule::window_range | Rule::window_exact | Rule::window_min | Rule::window_max => "offset",
        Rule::expression => "expression",
        Rule::and => "&&",
        Rule::or => "||",
        Rule::binary => "comparison",
        Rule::compare_op => "comparison operator",
        Rule::value => "value",
        Rule::member => "member access",
        Rule::call => "call",
        Rule::null => "null",
        Rule::boolean => "boolean",
        Rule::int => "integer",
        Rule::identifier | Rule::ident => "identifier",
        Rule::string => "string",
        Rule::double_inner | Rule::single_inner => "string content",
        Rule::EOI => "end of input",
        _ => "input",
    }
}

/// Generate contextual help text based on error patterns
fn generate_help_text(positives: &[Rule], found_eoi: bool) -> Option<String> {
    if positives.is_empty() {
        return None;
    }

    if positives.contains(&Rule::compare_op) {
        return Some("Each comparison needs an operator, like: text=\"ok\"".to_string());
    }

    if positives.contains(&Rule::value) {
        if found_eoi {
            return Some("Try adding a value after the operator, like: id=\"btn\"".to_string());
        }
        return Some("Expected a value here (a string, integer, boolean, null or name)".to_string());
    }

    if positives.contains(&Rule::segment) {
        return Some("Segments are written in brackets, like: [clickable=true]".to_string());
    }

    if positives.contains(&Rule::connector) || positives.contains(&Rule::EOI) {
        return Some("Unexpected input. Check for unbalanced brackets or quotes.".to_string());
    }

    None
}

impl SelectorError {
    /// Create a syntax error from pest error with diagnostic information
    pub fn from_pest(pest_err: Box<pest::error::Error<Rule>>, src: String) -> Self {
        use pest::error::{ErrorVariant, InputLocation};

        // miette needs a non-zero width to draw an arrow
        let span: SourceSpan = match pest_err.location {
            InputLocation::Pos(pos) if pos >= src.len() && pos > 0 => (pos - 1, 1).into(),
            InputLocation::Pos(pos) if pos < src.len() => (pos, 1).into(),
            InputLocation::Pos(_) => (0, 0).into(),
            InputLocation::Span((start, end)) => (start, end.saturating_sub(start).max(1)).into(),
        };

        let (line, col) = match pest_err.line_col {
            pest::error::LineColLocation::Pos((line, col)) => (line, col),
            pest::error::LineColLocation::Span((line, col), _) => (line, col),
        };

        let (expected_msg, help) = match &pest_err.variant {
            ErrorVariant::ParsingError { positives, .. } => {
                let found_eoi = match pest_err.location {
                    InputLocation::Pos(p) => p >= src.len(),
                    InputLocation::Span((_, end)) => end >= src.len(),
                };

                let mut names: Vec<&str> = positives.iter().map(rule_to_friendly_name).collect();
                names.dedup();
                let expected_msg = match names.as_slice() {
                    [] => "Unexpected input".to_string(),
                    [one] => format!("Expected {}", one),
                    names if names.len() <= 3 => format!("Expected one of: {}", names.join(", ")),
                    names => format!("Expected one of: {}, ...", names[..3].join(", ")),
                };

                (expected_msg, generate_help_text(positives, found_eoi))
            }
            ErrorVariant::CustomError { message } => (message.clone(), None),
        };

        SelectorError::Syntax {
            src,
            span,
            help,
            expected_msg,
            line,
            col,
        }
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        SelectorError::Internal {
            message: msg.into(),
            src: String::new(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        use SelectorError::*;
        match self {
            Syntax { .. }
            | InvalidEscape { .. }
            | InvalidOffsetRange { .. }
            | UnsupportedPattern { .. }
            | Malformed { .. } => ErrorKind::Syntax,
            UnknownIdentifier { .. }
            | UnknownIdentifierMethod { .. }
            | UnknownIdentifierMethodParams { .. }
            | UnknownMember { .. }
            | UnknownMemberMethod { .. }
            | UnknownMemberMethodParams { .. }
            | MismatchOperatorType { .. }
            | MismatchExpressionType { .. }
            | MismatchParamType { .. } => ErrorKind::TypeCheck,
            Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Add source code to the error
    pub fn with_source(mut self, source: String) -> Self {
        use SelectorError::*;
        match &mut self {
            Syntax { src, .. }
            | InvalidEscape { src, .. }
            | InvalidOffsetRange { src, .. }
            | UnsupportedPattern { src, .. }
            | Malformed { src, .. }
            | UnknownIdentifier { src, .. }
            | UnknownIdentifierMethod { src, .. }
            | UnknownIdentifierMethodParams { src, .. }
            | UnknownMember { src, .. }
            | UnknownMemberMethod { src, .. }
            | UnknownMemberMethodParams { src, .. }
            | MismatchOperatorType { src, .. }
            | MismatchExpressionType { src, .. }
            | MismatchParamType { src, .. }
            | Internal { src, .. } => *src = source,
        }
        self
    }
}

