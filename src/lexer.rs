//! Hand-written scanner turning NotScheme source text into a flat token
//! stream. Order of recognition mirrors the reference lexer: comments are
//! discarded first, then delimiters, then keywords (`true`/`false`/`nil`),
//! then strings, then numbers (floats before bare integers), then the
//! permissive symbol grammar that also covers operator identifiers like
//! `+` and `<=`.

use crate::error::{Error, Pos, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    LParen,
    RParen,
    Quote,
    Symbol(String),
    Number(Num),
    Str(String),
    Boolean(bool),
    Nil,
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Num {
    Int(i64),
    Float(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub col: usize,
}

fn is_symbol_start(c: char) -> bool {
    c.is_ascii_alphabetic() || "_+-*/%<>=!?".contains(c)
}

fn is_symbol_cont(c: char) -> bool {
    c.is_ascii_alphanumeric() || "_+-*/%<>=!?".contains(c)
}

pub fn lex(source: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0usize;
    let mut line = 1usize;
    let mut col = 1usize;

    while i < chars.len() {
        let c = chars[i];

        if c == '\n' {
            i += 1;
            line += 1;
            col = 1;
            continue;
        }
        if c.is_whitespace() {
            i += 1;
            col += 1;
            continue;
        }
        if c == '/' && chars.get(i + 1) == Some(&'/') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }

        let (start_line, start_col) = (line, col);

        match c {
            '(' => {
                tokens.push(Token { kind: TokenKind::LParen, line: start_line, col: start_col });
                i += 1;
                col += 1;
                continue;
            }
            ')' => {
                tokens.push(Token { kind: TokenKind::RParen, line: start_line, col: start_col });
                i += 1;
                col += 1;
                continue;
            }
            '\'' => {
                tokens.push(Token { kind: TokenKind::Quote, line: start_line, col: start_col });
                i += 1;
                col += 1;
                continue;
            }
            '"' => {
                let mut s = String::new();
                i += 1;
                col += 1;
                let mut closed = false;
                while i < chars.len() {
                    let ch = chars[i];
                    if ch == '"' {
                        i += 1;
                        col += 1;
                        closed = true;
                        break;
                    }
                    if ch == '\\' && i + 1 < chars.len() {
                        let esc = chars[i + 1];
                        let mapped = match esc {
                            '"' => '"',
                            'n' => '\n',
                            't' => '\t',
                            '\\' => '\\',
                            other => other,
                        };
                        s.push(mapped);
                        i += 2;
                        col += 2;
                        continue;
                    }
                    if ch == '\n' {
                        line += 1;
                        col = 1;
                    } else {
                        col += 1;
                    }
                    s.push(ch);
                    i += 1;
                }
                if !closed {
                    return Err(Error::syntax(
                        "unterminated string literal",
                        Some(Pos { line: start_line, col: start_col }),
                    ));
                }
                tokens.push(Token { kind: TokenKind::Str(s), line: start_line, col: start_col });
                continue;
            }
            _ => {}
        }

        if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).map_or(false, |d| d.is_ascii_digit())) {
            let start = i;
            if c == '-' {
                i += 1;
                col += 1;
            }
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
                col += 1;
            }
            let mut is_float = false;
            if chars.get(i) == Some(&'.') && chars.get(i + 1).map_or(false, |d| d.is_ascii_digit()) {
                is_float = true;
                i += 1;
                col += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                    col += 1;
                }
            }
            let text: String = chars[start..i].iter().collect();
            let num = if is_float {
                text.parse::<f64>().map(Num::Float).map_err(|_| {
                    Error::syntax(
                        format!("invalid number format: {}", text),
                        Some(Pos { line: start_line, col: start_col }),
                    )
                })?
            } else {
                text.parse::<i64>().map(Num::Int).map_err(|_| {
                    Error::syntax(
                        format!("invalid number format: {}", text),
                        Some(Pos { line: start_line, col: start_col }),
                    )
                })?
            };
            tokens.push(Token {
                kind: TokenKind::Number(num),
                line: start_line,
                col: start_col,
            });
            continue;
        }

        if is_symbol_start(c) {
            let start = i;
            i += 1;
            col += 1;
            while i < chars.len() && is_symbol_cont(chars[i]) {
                i += 1;
                col += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let kind = match text.as_str() {
                "true" => TokenKind::Boolean(true),
                "false" => TokenKind::Boolean(false),
                "nil" => TokenKind::Nil,
                _ => TokenKind::Symbol(text),
            };
            tokens.push(Token { kind, line: start_line, col: start_col });
            continue;
        }

        return Err(Error::syntax(
            format!("unexpected character: '{}'", c),
            Some(Pos { line: start_line, col: start_col }),
        ));
    }

    tokens.push(Token { kind: TokenKind::Eof, line, col: 1 });
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        lex(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn numbers() {
        assert_eq!(kinds("10"), vec![TokenKind::Number(Num::Int(10)), TokenKind::Eof]);
        assert_eq!(kinds("-5"), vec![TokenKind::Number(Num::Int(-5)), TokenKind::Eof]);
        assert_eq!(kinds("3.14"), vec![TokenKind::Number(Num::Float(3.14)), TokenKind::Eof]);
        assert_eq!(kinds("-0.5"), vec![TokenKind::Number(Num::Float(-0.5)), TokenKind::Eof]);
    }

    #[test]
    fn strings_with_escapes() {
        assert_eq!(
            kinds(r#""a\nb""#),
            vec![TokenKind::Str("a\nb".to_string()), TokenKind::Eof]
        );
    }

    #[test]
    fn booleans_and_nil() {
        assert_eq!(kinds("true false nil"), vec![
            TokenKind::Boolean(true),
            TokenKind::Boolean(false),
            TokenKind::Nil,
            TokenKind::Eof,
        ]);
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(kinds("1 // a comment\n2"), vec![
            TokenKind::Number(Num::Int(1)),
            TokenKind::Number(Num::Int(2)),
            TokenKind::Eof,
        ]);
    }

    #[test]
    fn symbols_include_operators() {
        assert_eq!(kinds("+ <= my_sym?"), vec![
            TokenKind::Symbol("+".to_string()),
            TokenKind::Symbol("<=".to_string()),
            TokenKind::Symbol("my_sym?".to_string()),
            TokenKind::Eof,
        ]);
    }

    #[test]
    fn unknown_character_is_an_error() {
        assert!(lex("@").is_err());
    }
}
