//! Error types for the filter compiler.

use thiserror::Error;

/// Primary error type returned by [`crate::compile`].
#[derive(Debug, Error)]
pub enum CompileError {
    /// The lexer hit a character it has no token class for.
    #[error("lexer error: unexpected character {ch:?} at byte {pos}")]
    Lex { pos: usize, ch: char },

    /// The parser could not build an expression tree from the token stream.
    #[error("parse error: {0}")]
    Parse(String),

    /// A dotted name (`proto.field`) has no entry in the registry.
    #[error("unknown field `{0}`")]
    UnknownField(String),

    /// A bare protocol name has no entry in the registry.
    #[error("unknown protocol `{0}`")]
    UnknownProto(String),

    /// An expression nested deeper than the 16 available scratch slots.
    #[error("expression too deeply nested: ran out of scratch registers")]
    RegistersExhausted,

    /// The compiled program would need more than 4096 instructions, and so
    /// could not fit an 8-bit relative jump.
    #[error("compiled program too large: {0} instructions exceeds the 4096 cBPF limit")]
    ProgramTooLarge(usize),

    /// The expression text was empty.
    #[error("empty filter expression")]
    EmptyExpression,
}

impl From<crate::front::ParseError> for CompileError {
    fn from(e: crate::front::ParseError) -> Self {
        match e {
            crate::front::ParseError::Lex { pos, ch } => CompileError::Lex { pos, ch },
            crate::front::ParseError::Syntax(msg) => CompileError::Parse(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;

    #[test]
    fn lexer_failure_surfaces_as_the_lex_variant_not_parse() {
        let reg = Registry::with_builtins();
        let err = crate::compile("ether.type == $800", true, &reg).unwrap_err();
        assert!(matches!(err, CompileError::Lex { ch: '$', .. }));
    }

    #[test]
    fn syntax_failure_surfaces_as_the_parse_variant() {
        let reg = Registry::with_builtins();
        let err = crate::compile("1 + 2 )", true, &reg).unwrap_err();
        assert!(matches!(err, CompileError::Parse(_)));
    }
}
