pub mod ast;
pub mod error;
pub mod literal;
pub mod raw;
pub mod typechecker;

// Re-exports for clean API
pub use ast::{
    BinaryExpression, Callee, CompareOperator, ConnectExpression, ConnectOperator, ConnectWrapper,
    Expression, PropertyWrapper, Segment, Span, StringLiteral, ValueExpression,
};
pub use error::{ErrorKind, SelectorError};
pub use raw::RawParser;
pub use typechecker::Typechecker;
