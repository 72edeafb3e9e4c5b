//! Recursive-descent parser turning a token stream into a `Program`.

use crate::ast::*;
use crate::error::{Error, Pos, Result};
use crate::lexer::{Num, Token, TokenKind};

pub fn parse(tokens: Vec<Token>) -> Result<Program> {
    let mut parser = Parser { tokens, pos: 0 };
    parser.parse_program()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn pos_of(&self, tok: &Token) -> Pos {
        Pos { line: tok.line, col: tok.col }
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn is_eof(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    fn expect_lparen(&mut self) -> Result<()> {
        match self.advance().kind {
            TokenKind::LParen => Ok(()),
            other => Err(self.unexpected(&other, "'('")),
        }
    }

    fn expect_rparen(&mut self) -> Result<()> {
        match self.advance().kind {
            TokenKind::RParen => Ok(()),
            other => Err(self.unexpected(&other, "')'")),
        }
    }

    fn expect_symbol(&mut self) -> Result<String> {
        let tok = self.advance();
        match tok.kind {
            TokenKind::Symbol(s) => Ok(s),
            other => Err(Error::syntax(
                format!("expected a symbol, got {:?}", other),
                Some(self.pos_of(&tok)),
            )),
        }
    }

    fn unexpected(&self, kind: &TokenKind, wanted: &str) -> Error {
        Error::syntax(
            format!("expected {}, got {:?}", wanted, kind),
            Some(Pos { line: self.peek().line, col: self.peek().col }),
        )
    }

    fn peek_is_lparen(&self) -> bool {
        matches!(self.peek().kind, TokenKind::LParen)
    }

    /// Peeks the head symbol of an upcoming `(head ...)` form without
    /// consuming any tokens, or `None` if the next token isn't `(` followed
    /// by a symbol.
    fn peek_head(&self) -> Option<&str> {
        if !matches!(self.tokens.get(self.pos).map(|t| &t.kind), Some(TokenKind::LParen)) {
            return None;
        }
        match self.tokens.get(self.pos + 1).map(|t| &t.kind) {
            Some(TokenKind::Symbol(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    fn parse_program(&mut self) -> Result<Program> {
        let mut items = Vec::new();
        while !self.is_eof() {
            items.push(self.parse_item()?);
        }
        Ok(Program { items })
    }

    fn parse_item(&mut self) -> Result<Item> {
        match self.peek_head() {
            Some("static") => self.parse_static(),
            Some("fn") => self.parse_fn(),
            Some("struct") => self.parse_struct_def(),
            Some("use") => self.parse_use(),
            _ => Ok(Item::Expr(self.parse_expr()?)),
        }
    }

    fn parse_static(&mut self) -> Result<Item> {
        self.expect_lparen()?;
        self.expect_symbol()?; // "static"
        let name = self.expect_symbol()?;
        let value = self.parse_expr()?;
        self.expect_rparen()?;
        Ok(Item::Static { name, value })
    }

    fn parse_param_list(&mut self) -> Result<Vec<String>> {
        self.expect_lparen()?;
        let mut params = Vec::new();
        while !matches!(self.peek().kind, TokenKind::RParen) {
            params.push(self.expect_symbol()?);
        }
        self.expect_rparen()?;
        Ok(params)
    }

    fn parse_fn(&mut self) -> Result<Item> {
        self.expect_lparen()?;
        self.expect_symbol()?; // "fn"
        let name = self.expect_symbol()?;
        let params = self.parse_param_list()?;
        let mut body = Vec::new();
        while !matches!(self.peek().kind, TokenKind::RParen) {
            body.push(self.parse_expr()?);
        }
        self.expect_rparen()?;
        Ok(Item::Fn { name, params, body })
    }

    fn parse_struct_def(&mut self) -> Result<Item> {
        self.expect_lparen()?;
        self.expect_symbol()?; // "struct"
        let name = self.expect_symbol()?;
        let fields = self.parse_param_list()?;
        self.expect_rparen()?;
        Ok(Item::StructDef { name, fields })
    }

    fn parse_use(&mut self) -> Result<Item> {
        self.expect_lparen()?;
        self.expect_symbol()?; // "use"
        let module = self.expect_symbol()?;
        let items = match &self.peek().kind {
            TokenKind::Symbol(s) if s == "*" => {
                self.advance();
                UseItems::All
            }
            TokenKind::LParen => {
                self.advance();
                let mut names = Vec::new();
                while !matches!(self.peek().kind, TokenKind::RParen) {
                    names.push(self.expect_symbol()?);
                }
                self.expect_rparen()?;
                UseItems::Named(names)
            }
            other => return Err(self.unexpected(&other.clone(), "'*' or an import list")),
        };
        self.expect_rparen()?;
        Ok(Item::Use { module, items })
    }

    fn parse_datum(&mut self) -> Result<Datum> {
        let tok = self.advance();
        match tok.kind {
            TokenKind::Number(Num::Int(n)) => Ok(Datum::Number(Number::Int(n))),
            TokenKind::Number(Num::Float(x)) => Ok(Datum::Number(Number::Float(x))),
            TokenKind::Str(s) => Ok(Datum::Str(s)),
            TokenKind::Boolean(b) => Ok(Datum::Boolean(b)),
            TokenKind::Nil => Ok(Datum::Nil),
            TokenKind::Symbol(s) => Ok(Datum::Symbol(s)),
            TokenKind::Quote => {
                let inner = self.parse_datum()?;
                Ok(Datum::List(vec![Datum::Symbol("quote".to_string()), inner]))
            }
            TokenKind::LParen => {
                let mut items = Vec::new();
                while !matches!(self.peek().kind, TokenKind::RParen) {
                    items.push(self.parse_datum()?);
                }
                self.expect_rparen()?;
                Ok(Datum::List(items))
            }
            other => Err(Error::syntax(
                format!("unexpected token in quoted data: {:?}", other),
                Some(self.pos_of(&tok)),
            )),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr> {
        let tok = self.advance();
        match tok.kind {
            TokenKind::Number(Num::Int(n)) => Ok(Expr::Number(Number::Int(n))),
            TokenKind::Number(Num::Float(x)) => Ok(Expr::Number(Number::Float(x))),
            TokenKind::Str(s) => Ok(Expr::Str(s)),
            TokenKind::Boolean(b) => Ok(Expr::Boolean(b)),
            TokenKind::Nil => Ok(Expr::Nil),
            TokenKind::Symbol(s) => Ok(Expr::Symbol(s)),
            TokenKind::Quote => Ok(Expr::Quote(self.parse_datum()?)),
            TokenKind::LParen => self.parse_compound(tok),
            other => Err(Error::syntax(
                format!("unexpected token: {:?}", other),
                Some(self.pos_of(&tok)),
            )),
        }
    }

    fn parse_compound(&mut self, open: Token) -> Result<Expr> {
        if matches!(self.peek().kind, TokenKind::Symbol(ref s) if s == "if") {
            self.advance();
            let cond = self.parse_expr()?;
            let then = self.parse_expr()?;
            if matches!(self.peek().kind, TokenKind::RParen) {
                return Err(Error::syntax(
                    "'if' requires a condition, a then-branch, and an else-branch",
                    Some(self.pos_of(&open)),
                ));
            }
            let els = self.parse_expr()?;
            self.expect_rparen()?;
            return Ok(Expr::If { cond: Box::new(cond), then: Box::new(then), els: Box::new(els) });
        }
        if matches!(self.peek().kind, TokenKind::Symbol(ref s) if s == "let") {
            self.advance();
            let bindings = self.parse_let_bindings()?;
            let mut body = Vec::new();
            while !matches!(self.peek().kind, TokenKind::RParen) {
                body.push(self.parse_expr()?);
            }
            self.expect_rparen()?;
            return Ok(Expr::Let { bindings, body });
        }
        if matches!(self.peek().kind, TokenKind::Symbol(ref s) if s == "lambda") {
            self.advance();
            let params = self.parse_param_list()?;
            let mut body = Vec::new();
            while !matches!(self.peek().kind, TokenKind::RParen) {
                body.push(self.parse_expr()?);
            }
            self.expect_rparen()?;
            return Ok(Expr::Lambda { params, body });
        }
        if matches!(self.peek().kind, TokenKind::Symbol(ref s) if s == "get") {
            self.advance();
            let instance = self.parse_expr()?;
            let field = self.expect_symbol()?;
            self.expect_rparen()?;
            return Ok(Expr::Get { instance: Box::new(instance), field });
        }
        if matches!(self.peek().kind, TokenKind::Symbol(ref s) if s == "set") {
            self.advance();
            let instance = self.parse_expr()?;
            let field = self.expect_symbol()?;
            let value = self.parse_expr()?;
            self.expect_rparen()?;
            return Ok(Expr::Set { instance: Box::new(instance), field, value: Box::new(value) });
        }
        if matches!(self.peek().kind, TokenKind::Symbol(ref s) if s == "while") {
            self.advance();
            let cond = self.parse_expr()?;
            let mut body = Vec::new();
            while !matches!(self.peek().kind, TokenKind::RParen) {
                body.push(self.parse_expr()?);
            }
            self.expect_rparen()?;
            return Ok(Expr::While { cond: Box::new(cond), body });
        }
        if matches!(self.peek().kind, TokenKind::Symbol(ref s) if s == "begin") {
            self.advance();
            let mut body = Vec::new();
            while !matches!(self.peek().kind, TokenKind::RParen) {
                body.push(self.parse_expr()?);
            }
            self.expect_rparen()?;
            return Ok(Expr::Begin(body));
        }

        let callee = self.parse_expr()?;
        let mut args = Vec::new();
        while !matches!(self.peek().kind, TokenKind::RParen) {
            args.push(self.parse_expr()?);
        }
        self.expect_rparen()?;
        Ok(Expr::Call { callee: Box::new(callee), args })
    }

    /// `(let name expr)` shorthand (single binding, empty body) or
    /// `(let ((a 1) (b 2)) ...)`. The shorthand's name is always a bare
    /// symbol, so a leading `(` unambiguously signals the multi-binding
    /// form.
    fn parse_let_bindings(&mut self) -> Result<Vec<(String, Expr)>> {
        if self.peek_is_lparen() {
            self.expect_lparen()?;
            let mut bindings = Vec::new();
            while matches!(self.peek().kind, TokenKind::LParen) {
                self.expect_lparen()?;
                let name = self.expect_symbol()?;
                let value = self.parse_expr()?;
                self.expect_rparen()?;
                bindings.push((name, value));
            }
            self.expect_rparen()?;
            return Ok(bindings);
        }
        let name = self.expect_symbol()?;
        let value = self.parse_expr()?;
        Ok(vec![(name, value)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;

    fn parse_str(src: &str) -> Result<Program> {
        parse(lex(src).unwrap())
    }

    #[test]
    fn static_binding() {
        let p = parse_str("(static a 10)").unwrap();
        assert_eq!(p.items.len(), 1);
        assert!(matches!(p.items[0], Item::Static { .. }));
    }

    #[test]
    fn fn_definition() {
        let p = parse_str("(fn add (x y) (+ x y))").unwrap();
        match &p.items[0] {
            Item::Fn { name, params, body } => {
                assert_eq!(name, "add");
                assert_eq!(params, &vec!["x".to_string(), "y".to_string()]);
                assert_eq!(body.len(), 1);
            }
            other => panic!("expected Fn, got {:?}", other),
        }
    }

    #[test]
    fn let_single_binding_shorthand() {
        let p = parse_str(r#"(let message "A simple let")"#).unwrap();
        match &p.items[0] {
            Item::Expr(Expr::Let { bindings, body }) => {
                assert_eq!(bindings.len(), 1);
                assert_eq!(bindings[0].0, "message");
                assert!(body.is_empty());
            }
            other => panic!("expected Let, got {:?}", other),
        }
    }

    #[test]
    fn let_multi_binding() {
        let p = parse_str("(let ((a 10) (b 20)) (print (+ a b)))").unwrap();
        match &p.items[0] {
            Item::Expr(Expr::Let { bindings, body }) => {
                assert_eq!(bindings.len(), 2);
                assert_eq!(body.len(), 1);
            }
            other => panic!("expected Let, got {:?}", other),
        }
    }

    #[test]
    fn use_named_and_wildcard() {
        let p = parse_str("(use math_utils (gravity square))").unwrap();
        assert!(matches!(&p.items[0], Item::Use { items: UseItems::Named(n), .. } if n.len() == 2));
        let p2 = parse_str("(use string_ext *)").unwrap();
        assert!(matches!(&p2.items[0], Item::Use { items: UseItems::All, .. }));
    }

    #[test]
    fn quoted_symbol_and_list() {
        let p = parse_str("'my_symbol").unwrap();
        assert!(matches!(&p.items[0], Item::Expr(Expr::Quote(Datum::Symbol(s))) if s == "my_symbol"));
        let p2 = parse_str("'(item1 10 true nil)").unwrap();
        assert!(matches!(&p2.items[0], Item::Expr(Expr::Quote(Datum::List(items))) if items.len() == 4));
    }

    #[test]
    fn get_and_set_field_syntax() {
        let p = parse_str("(get v1 x)").unwrap();
        assert!(matches!(&p.items[0], Item::Expr(Expr::Get { .. })));
        let p2 = parse_str("(set counter_struct x_coord (+ 1 1))").unwrap();
        assert!(matches!(&p2.items[0], Item::Expr(Expr::Set { .. })));
    }

    #[test]
    fn if_missing_else_branch_is_a_parse_error() {
        assert!(parse_str("(if true 1)").is_err());
    }
}
