// lexer.rs — Tokens of pipeline declaration files
//
// Uses the `logos` crate for DFA-based lexing. Newlines are significant:
// one declaration per line. `#` starts a comment that runs to end of line.
//
// Preconditions: `source` is the whole file.
// Postconditions: every token is paired with its byte range in `source`.
// Failure modes: a stray character becomes a `LexError` and is skipped.
// Side effects: none.

use logos::Logos;
use std::fmt;

use chumsky::span::Span as _;

use crate::ast::Span;

#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: Span,
    pub message: String,
}

#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<(Token, Span)>,
    pub errors: Vec<LexError>,
}

/// Identifiers carry no value; the span recovers the text.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r]+|#[^\n]*")]
pub enum Token {
    #[token("pipeline")]
    Pipeline,
    #[token("input")]
    Input,
    #[token("output")]
    Output,
    #[token("param")]
    Param,
    #[token("constrain")]
    Constrain,
    #[token("in")]
    In,

    #[token(":")]
    Colon,
    #[token(".")]
    Dot,
    #[token(",")]
    Comma,
    #[token("=")]
    Equals,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,

    /// Float literal: needs a fraction or an exponent.
    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?|[0-9]+[eE][+-]?[0-9]+", parse_float)]
    Float(f64),

    #[regex(r"[0-9]+", parse_int)]
    Int(u64),

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Ident,

    #[regex(r"\n+")]
    Newline,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Pipeline => write!(f, "pipeline"),
            Token::Input => write!(f, "input"),
            Token::Output => write!(f, "output"),
            Token::Param => write!(f, "param"),
            Token::Constrain => write!(f, "constrain"),
            Token::In => write!(f, "in"),
            Token::Colon => write!(f, ":"),
            Token::Dot => write!(f, "."),
            Token::Comma => write!(f, ","),
            Token::Equals => write!(f, "="),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Float(v) => write!(f, "{v}"),
            Token::Int(v) => write!(f, "{v}"),
            Token::Ident => write!(f, "<ident>"),
            Token::Newline => write!(f, "<newline>"),
        }
    }
}

fn parse_float(lex: &mut logos::Lexer<'_, Token>) -> Option<f64> {
    lex.slice().parse().ok()
}

fn parse_int(lex: &mut logos::Lexer<'_, Token>) -> Option<u64> {
    lex.slice().parse().ok()
}

/// Lex a declaration file. Errors are collected and lexing continues past
/// bad characters.
pub fn lex(source: &str) -> LexResult {
    let mut out = LexResult {
        tokens: Vec::new(),
        errors: Vec::new(),
    };
    for (next, range) in Token::lexer(source).spanned() {
        let span = Span::new((), range.clone());
        if let Ok(token) = next {
            out.tokens.push((token, span));
        } else {
            out.errors.push(LexError {
                span,
                message: format!("unexpected character: {:?}", &source[range]),
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        let LexResult { tokens, errors } = lex(source);
        assert_eq!(errors, Vec::new(), "{source:?} should lex cleanly");
        tokens.into_iter().map(|(token, _)| token).collect()
    }

    #[test]
    fn keywords_and_identifiers() {
        assert_eq!(
            kinds("pipeline input output param constrain in inputs"),
            vec![
                Token::Pipeline,
                Token::Input,
                Token::Output,
                Token::Param,
                Token::Constrain,
                Token::In,
                Token::Ident,
            ]
        );
    }

    #[test]
    fn bound_reference_splits_at_dots() {
        assert_eq!(
            kinds("img.extent.0"),
            vec![Token::Ident, Token::Dot, Token::Ident, Token::Dot, Token::Int(0)]
        );
    }

    #[test]
    fn numbers() {
        assert_eq!(
            kinds("3 0.25 1e3 2.5E-1"),
            vec![
                Token::Int(3),
                Token::Float(0.25),
                Token::Float(1000.0),
                Token::Float(0.25),
            ]
        );
    }

    #[test]
    fn comments_and_newlines() {
        assert_eq!(
            kinds("input a : uint8[2]   # the source\n\n\noutput"),
            vec![
                Token::Input,
                Token::Ident,
                Token::Colon,
                Token::Ident,
                Token::LBracket,
                Token::Int(2),
                Token::RBracket,
                Token::Newline,
                Token::Output,
            ]
        );
    }

    #[test]
    fn bad_character_is_reported_and_skipped() {
        let result = lex("param k : int32 @ 3");
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].span, Span::new((), 16..17));
        assert!(result.errors[0].message.contains("\"@\""));
        assert_eq!(result.tokens.len(), 5);
    }
}
