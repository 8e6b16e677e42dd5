//! The lexer.

use derive_more::Display;
use regex::Regex;

/// Token classes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum TokenKind {
    #[display("num")]
    Num,
    #[display("field")]
    Field,
    #[display("and")]
    And,
    #[display("or")]
    Or,
    #[display("not")]
    Not,
    #[display("==")]
    Eq,
    #[display("!=")]
    Ne,
    #[display("<")]
    Lt,
    #[display("<=")]
    Le,
    #[display(">")]
    Gt,
    #[display(">=")]
    Ge,
    #[display("+")]
    Plus,
    #[display("-")]
    Minus,
    #[display("*")]
    Star,
    #[display("/")]
    Slash,
    #[display("&")]
    Amp,
    #[display("|")]
    Pipe,
    #[display("^")]
    Caret,
    #[display("<<")]
    Shl,
    #[display(">>")]
    Shr,
    #[display("(")]
    LParen,
    #[display(")")]
    RParen,
}

/// Tokens in the program.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Display)]
#[display("kind: '{kind}', part of input: '{text}'")]
pub struct Token<'src> {
    /// What token class this token belongs to.
    pub kind: TokenKind,
    /// What part of the input this token carries.
    pub text: &'src str,
    /// Byte offset of the first character of this token in the input.
    pub pos: usize,
}

pub struct LexError {
    pub pos: usize,
    pub ch: char,
}

impl std::fmt::Display for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Lexer error: unexpected character {:?} at {}", self.ch, self.pos)
    }
}

impl std::fmt::Debug for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Lexer error: unexpected character {:?} at {}", self.ch, self.pos)
    }
}

/// Keywords that the identifier matcher may produce; anything else matching
/// the identifier pattern is a `Field` token (possibly dotted).
fn keyword(text: &str) -> Option<TokenKind> {
    match text {
        "and" => Some(TokenKind::And),
        "or" => Some(TokenKind::Or),
        "not" => Some(TokenKind::Not),
        _ => None,
    }
}

pub struct Lexer<'input> {
    input: &'input str,
    pos: usize,
    whitespace: Regex,
    matchers: Vec<(Regex, TokenKind)>,
}

impl<'input> Lexer<'input> {
    pub fn new(input: &'input str) -> Self {
        // Longer operators are listed before their prefixes (`<=` before `<`)
        // so the ordered scan below picks the longest valid token.
        let matchers = vec![
            (r"0[xX][0-9a-fA-F]+", TokenKind::Num),
            (r"[0-9]+", TokenKind::Num),
            (r"[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*", TokenKind::Field),
            (r"==", TokenKind::Eq),
            (r"!=", TokenKind::Ne),
            (r"<=", TokenKind::Le),
            (r">=", TokenKind::Ge),
            (r"<<", TokenKind::Shl),
            (r">>", TokenKind::Shr),
            (r"<", TokenKind::Lt),
            (r">", TokenKind::Gt),
            (r"\+", TokenKind::Plus),
            (r"-", TokenKind::Minus),
            (r"\*", TokenKind::Star),
            (r"/", TokenKind::Slash),
            (r"&", TokenKind::Amp),
            (r"\|", TokenKind::Pipe),
            (r"\^", TokenKind::Caret),
            (r"\(", TokenKind::LParen),
            (r"\)", TokenKind::RParen),
        ]
        .into_iter()
        .map(|(pat, kind)| (Regex::new(&format!(r"\A(?:{pat})")).unwrap(), kind))
        .collect();

        Lexer {
            input,
            pos: 0,
            whitespace: Regex::new(r"\A[ \t\f\r\n\v]*").unwrap(),
            matchers,
        }
    }

    /// Has the lexer reached the end of input?
    pub fn end_of_input(&self) -> bool {
        self.pos == self.input.len()
    }

    fn skip_whitespace(&mut self) {
        if let Some(m) = self.whitespace.find(&self.input[self.pos..]) {
            self.pos += m.end();
        }
    }

    /// Get the next token if possible.
    ///
    /// The return type distinguishes between end-of-input and lexer error.
    pub fn next(&mut self) -> Result<Option<Token<'input>>, LexError> {
        self.skip_whitespace();

        if self.end_of_input() {
            return Ok(None);
        }

        let rest = &self.input[self.pos..];
        let mut best: Option<(usize, TokenKind)> = None;

        for (re, kind) in &self.matchers {
            if let Some(m) = re.find(rest) {
                if best.map(|(len, _)| m.end() > len).unwrap_or(true) {
                    best = Some((m.end(), *kind));
                }
            }
        }

        let Some((len, mut kind)) = best else {
            let ch = rest.chars().next().unwrap();
            return Err(LexError { pos: self.pos, ch });
        };

        let text = &rest[..len];
        if kind == TokenKind::Field {
            if let Some(kw) = keyword(text) {
                kind = kw;
            }
        }

        let tok = Token { kind, text, pos: self.pos };
        self.pos += len;
        Ok(Some(tok))
    }
}

/// Tokenize the whole input eagerly; used by the parser, which wants
/// lookahead rather than a pull-based stream.
pub fn lex(input: &str) -> Result<Vec<Token<'_>>, LexError> {
    let mut lexer = Lexer::new(input);
    let mut tokens = Vec::new();
    while let Some(tok) = lexer.next()? {
        tokens.push(tok);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        lex(input).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_a_comparison() {
        use TokenKind::*;
        assert_eq!(kinds("ether.type == 0x800"), vec![Field, Eq, Num]);
    }

    #[test]
    fn dotted_field_is_one_token() {
        let toks = lex("ipv4.ihl").unwrap();
        assert_eq!(toks.len(), 1);
        assert_eq!(toks[0].text, "ipv4.ihl");
    }

    #[test]
    fn keywords_are_not_fields() {
        use TokenKind::*;
        assert_eq!(kinds("a and not b"), vec![Field, And, Not, Field]);
    }

    #[test]
    fn le_is_not_split_into_lt_then_eq() {
        use TokenKind::*;
        assert_eq!(kinds("ipv4.ihl <= 5"), vec![Field, Le, Num]);
    }

    #[test]
    fn unexpected_character_is_an_error() {
        let err = lex("a $ b").unwrap_err();
        assert_eq!(err.ch, '$');
        assert_eq!(err.pos, 2);
    }
}
