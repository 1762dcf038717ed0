//! Recursive-descent parser for rule expressions.
//!
//! Only the expression subset of the grammar exists here; statement
//! keywords are rejected outright so they can never reach the evaluator.

use std::str::FromStr;

use rust_decimal::Decimal;

use crate::ast::{BinOp, CmpOp, Expr, UnaryOp};
use crate::error::EvalError;
use crate::lexer::{lex, Spanned, Token};
use crate::value::Value;

/// Maximum nesting of the expression tree.
pub const MAX_DEPTH: usize = 64;

const RESERVED: &[&str] = &[
    "for", "while", "lambda", "def", "import", "from", "if", "else", "elif", "class", "return",
    "yield", "with", "as", "try", "except", "finally", "raise", "del", "global", "nonlocal",
    "assert", "pass", "break", "continue", "async", "await",
];

/// Parse expression text into a tree.
pub fn parse_expression(src: &str) -> Result<Expr, EvalError> {
    let tokens = lex(src)?;
    let mut p = Parser {
        tokens: &tokens,
        pos: 0,
        depth: 0,
    };
    if p.peek() == &Token::Eof {
        return Err(p.err("empty expression"));
    }
    let expr = p.parse_expr()?;
    if p.peek() != &Token::Eof {
        return Err(p.err(format!("unexpected {}", describe(p.peek()))));
    }
    Ok(expr)
}

// ──────────────────────────────────────────────
// Parser
// ──────────────────────────────────────────────

struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn cur(&self) -> &Spanned {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek(&self) -> &Token {
        &self.cur().token
    }

    fn peek_at(&self, ahead: usize) -> &Token {
        &self.tokens[(self.pos + ahead).min(self.tokens.len() - 1)].token
    }

    fn advance(&mut self) -> &Spanned {
        let t = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn err(&self, msg: impl Into<String>) -> EvalError {
        EvalError::syntax(self.cur().offset, msg)
    }

    fn is_word(&self, w: &str) -> bool {
        matches!(self.peek(), Token::Word(x) if x == w)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == token {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token) -> Result<(), EvalError> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(self.err(format!(
                "expected {}, got {}",
                describe(&token),
                describe(self.peek())
            )))
        }
    }

    fn enter(&mut self) -> Result<(), EvalError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.err(format!(
                "expression nested deeper than {} levels",
                MAX_DEPTH
            )));
        }
        Ok(())
    }

    fn leave(&mut self, levels: usize) {
        self.depth -= levels;
    }

    // ── Boolean layer ────────────────────────────────────────────────

    fn parse_expr(&mut self) -> Result<Expr, EvalError> {
        self.enter()?;
        let expr = self.parse_or();
        self.leave(1);
        expr
    }

    fn parse_or(&mut self) -> Result<Expr, EvalError> {
        let first = self.parse_and()?;
        if !self.is_word("or") {
            return Ok(first);
        }
        let mut operands = vec![first];
        while self.is_word("or") {
            self.advance();
            operands.push(self.parse_and()?);
        }
        Ok(Expr::Or(operands))
    }

    fn parse_and(&mut self) -> Result<Expr, EvalError> {
        let first = self.parse_not()?;
        if !self.is_word("and") {
            return Ok(first);
        }
        let mut operands = vec![first];
        while self.is_word("and") {
            self.advance();
            operands.push(self.parse_not()?);
        }
        Ok(Expr::And(operands))
    }

    fn parse_not(&mut self) -> Result<Expr, EvalError> {
        if self.is_word("not") {
            self.advance();
            self.enter()?;
            let operand = self.parse_not();
            self.leave(1);
            return Ok(Expr::Not(Box::new(operand?)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, EvalError> {
        let left = self.parse_arith()?;
        let mut rest = Vec::new();
        while let Some(op) = self.comparison_op() {
            rest.push((op, self.parse_arith()?));
        }
        if rest.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare {
                left: Box::new(left),
                rest,
            })
        }
    }

    /// Consume a comparison operator if one is next.
    fn comparison_op(&mut self) -> Option<CmpOp> {
        let (op, width) = match self.peek() {
            Token::Eq => (CmpOp::Eq, 1),
            Token::Neq => (CmpOp::Neq, 1),
            Token::Lt => (CmpOp::Lt, 1),
            Token::Lte => (CmpOp::Lte, 1),
            Token::Gt => (CmpOp::Gt, 1),
            Token::Gte => (CmpOp::Gte, 1),
            Token::Word(w) if w == "in" => (CmpOp::In, 1),
            Token::Word(w) if w == "not" => match self.peek_at(1) {
                Token::Word(n) if n == "in" => (CmpOp::NotIn, 2),
                _ => return None,
            },
            Token::Word(w) if w == "is" => match self.peek_at(1) {
                Token::Word(n) if n == "not" => (CmpOp::IsNot, 2),
                _ => (CmpOp::Is, 1),
            },
            _ => return None,
        };
        for _ in 0..width {
            self.advance();
        }
        Some(op)
    }

    // ── Arithmetic layer ─────────────────────────────────────────────

    fn parse_arith(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.parse_term()?;
        let mut levels = 0;
        let result = loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break Ok(left),
            };
            self.advance();
            if let Err(e) = self.enter() {
                break Err(e);
            }
            levels += 1;
            match self.parse_term() {
                Ok(right) => {
                    left = Expr::Binary {
                        op,
                        left: Box::new(left),
                        right: Box::new(right),
                    }
                }
                Err(e) => break Err(e),
            }
        };
        self.leave(levels);
        result
    }

    fn parse_term(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.parse_factor()?;
        let mut levels = 0;
        let result = loop {
            let op = match self.peek() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                Token::Percent => BinOp::Mod,
                _ => break Ok(left),
            };
            self.advance();
            if let Err(e) = self.enter() {
                break Err(e);
            }
            levels += 1;
            match self.parse_factor() {
                Ok(right) => {
                    left = Expr::Binary {
                        op,
                        left: Box::new(left),
                        right: Box::new(right),
                    }
                }
                Err(e) => break Err(e),
            }
        };
        self.leave(levels);
        result
    }

    fn parse_factor(&mut self) -> Result<Expr, EvalError> {
        let op = match self.peek() {
            Token::Plus => UnaryOp::Plus,
            Token::Minus => UnaryOp::Minus,
            _ => return self.parse_postfix(),
        };
        self.advance();
        self.enter()?;
        let operand = self.parse_factor();
        self.leave(1);
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand?),
        })
    }

    // ── Postfix: attribute, call, subscript ──────────────────────────

    fn parse_postfix(&mut self) -> Result<Expr, EvalError> {
        let mut expr = self.parse_atom()?;
        let mut levels = 0;
        let result = loop {
            if !matches!(
                self.peek(),
                Token::Dot | Token::LParen | Token::LBracket
            ) {
                break Ok(expr);
            }
            if let Err(e) = self.enter() {
                break Err(e);
            }
            levels += 1;
            match self.parse_trailer(expr) {
                Ok(next) => expr = next,
                Err(e) => break Err(e),
            }
        };
        self.leave(levels);
        result
    }

    fn parse_trailer(&mut self, target: Expr) -> Result<Expr, EvalError> {
        match self.peek() {
            Token::Dot => {
                self.advance();
                let name = match self.peek() {
                    Token::Word(w) => w.clone(),
                    other => {
                        return Err(self.err(format!(
                            "expected attribute name, got {}",
                            describe(other)
                        )))
                    }
                };
                if name.starts_with('_') {
                    return Err(EvalError::PrivateName { name });
                }
                self.advance();
                Ok(Expr::Attribute {
                    target: Box::new(target),
                    name,
                })
            }
            Token::LParen => {
                self.advance();
                let args = self.parse_sequence(Token::RParen)?.0;
                Ok(Expr::Call {
                    func: Box::new(target),
                    args,
                })
            }
            _ => {
                self.expect(Token::LBracket)?;
                let subscript = self.parse_subscript(target)?;
                self.expect(Token::RBracket)?;
                Ok(subscript)
            }
        }
    }

    fn parse_subscript(&mut self, target: Expr) -> Result<Expr, EvalError> {
        let lower = if self.peek() == &Token::Colon {
            None
        } else {
            Some(Box::new(self.parse_expr()?))
        };
        if !self.eat(&Token::Colon) {
            return match lower {
                Some(index) => Ok(Expr::Index {
                    target: Box::new(target),
                    index,
                }),
                None => Err(self.err("empty subscript")),
            };
        }
        let upper = if matches!(self.peek(), Token::Colon | Token::RBracket) {
            None
        } else {
            Some(Box::new(self.parse_expr()?))
        };
        let step = if self.eat(&Token::Colon) && self.peek() != &Token::RBracket {
            Some(Box::new(self.parse_expr()?))
        } else {
            None
        };
        Ok(Expr::Slice {
            target: Box::new(target),
            lower,
            upper,
            step,
        })
    }

    /// Comma-separated expressions up to `close`. Returns the items and
    /// whether a trailing comma was present.
    fn parse_sequence(&mut self, close: Token) -> Result<(Vec<Expr>, bool), EvalError> {
        let mut items = Vec::new();
        let mut trailing = false;
        while self.peek() != &close {
            items.push(self.parse_expr()?);
            trailing = false;
            if !self.eat(&Token::Comma) {
                break;
            }
            trailing = true;
        }
        self.expect(close)?;
        Ok((items, trailing))
    }

    // ── Atoms ────────────────────────────────────────────────────────

    fn parse_atom(&mut self) -> Result<Expr, EvalError> {
        let offset = self.cur().offset;
        match self.peek().clone() {
            Token::Int(n) => {
                self.advance();
                Ok(Expr::Literal(Value::Int(n)))
            }
            Token::Float(text) => {
                self.advance();
                parse_decimal(&text)
                    .map(|d| Expr::Literal(Value::Decimal(d)))
                    .ok_or_else(|| {
                        EvalError::syntax(offset, format!("invalid number literal '{}'", text))
                    })
            }
            Token::Str(s) => {
                self.advance();
                // Adjacent literals concatenate: 'a' 'b' == 'ab'
                let mut s = s;
                while let Token::Str(more) = self.peek().clone() {
                    s.push_str(&more);
                    self.advance();
                }
                Ok(Expr::Literal(Value::Str(s)))
            }
            Token::Word(w) => {
                self.advance();
                self.word_atom(w, offset)
            }
            Token::LParen => {
                self.advance();
                let (items, trailing) = self.parse_sequence(Token::RParen)?;
                if items.len() == 1 && !trailing {
                    Ok(items.into_iter().next().unwrap_or(Expr::Tuple(Vec::new())))
                } else {
                    Ok(Expr::Tuple(items))
                }
            }
            Token::LBracket => {
                self.advance();
                Ok(Expr::List(self.parse_sequence(Token::RBracket)?.0))
            }
            Token::LBrace => {
                self.advance();
                self.parse_dict()
            }
            other => Err(self.err(format!("unexpected {}", describe(&other)))),
        }
    }

    fn word_atom(&self, word: String, offset: usize) -> Result<Expr, EvalError> {
        match word.to_ascii_lowercase().as_str() {
            "true" => return Ok(Expr::Literal(Value::Bool(true))),
            "false" => return Ok(Expr::Literal(Value::Bool(false))),
            "none" | "null" => return Ok(Expr::Literal(Value::None)),
            _ => {}
        }
        if RESERVED.contains(&word.as_str()) {
            return Err(EvalError::syntax(
                offset,
                format!("keyword '{}' is not allowed in expressions", word),
            ));
        }
        if matches!(word.as_str(), "and" | "or" | "in" | "is" | "not") {
            return Err(EvalError::syntax(
                offset,
                format!("unexpected keyword '{}'", word),
            ));
        }
        if word.starts_with('_') {
            return Err(EvalError::PrivateName { name: word });
        }
        Ok(Expr::Name(word))
    }

    fn parse_dict(&mut self) -> Result<Expr, EvalError> {
        let mut entries = Vec::new();
        while self.peek() != &Token::RBrace {
            let key = self.parse_expr()?;
            self.expect(Token::Colon)?;
            let value = self.parse_expr()?;
            entries.push((key, value));
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(Token::RBrace)?;
        Ok(Expr::Dict(entries))
    }
}

fn parse_decimal(text: &str) -> Option<Decimal> {
    let mut text = text.to_ascii_lowercase();
    if text.starts_with('.') {
        text.insert(0, '0');
    }
    if text.contains('e') {
        return Decimal::from_scientific(&text).ok();
    }
    if text.ends_with('.') {
        text.push('0');
    }
    Decimal::from_str(&text).ok()
}

fn describe(token: &Token) -> String {
    match token {
        Token::Word(w) => format!("'{}'", w),
        Token::Str(_) => "string literal".to_owned(),
        Token::Int(n) => format!("number {}", n),
        Token::Float(f) => format!("number {}", f),
        Token::LParen => "'('".to_owned(),
        Token::RParen => "')'".to_owned(),
        Token::LBracket => "'['".to_owned(),
        Token::RBracket => "']'".to_owned(),
        Token::LBrace => "'{'".to_owned(),
        Token::RBrace => "'}'".to_owned(),
        Token::Comma => "','".to_owned(),
        Token::Colon => "':'".to_owned(),
        Token::Dot => "'.'".to_owned(),
        Token::Eq => "'=='".to_owned(),
        Token::Neq => "'!='".to_owned(),
        Token::Lt => "'<'".to_owned(),
        Token::Lte => "'<='".to_owned(),
        Token::Gt => "'>'".to_owned(),
        Token::Gte => "'>='".to_owned(),
        Token::Plus => "'+'".to_owned(),
        Token::Minus => "'-'".to_owned(),
        Token::Star => "'*'".to_owned(),
        Token::Slash => "'/'".to_owned(),
        Token::Percent => "'%'".to_owned(),
        Token::Eof => "end of expression".to_owned(),
    }
}
