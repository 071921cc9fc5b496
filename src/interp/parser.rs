//! Recursive-descent parser for the console script language.
//!
//! Two entry points mirror the context's evaluation policy:
//! [`parse_expression`] accepts the whole text as one standalone expression
//! (optionally `await`-prefixed) and rejects anything else, while
//! [`parse_program`] accepts a statement block. Whether a submission falls
//! back to block execution is decided purely by which entry point accepts
//! the text, never by inspecting runtime faults.

use num_bigint::BigInt;

use crate::interp::lexer::{lex, ParseError, Spanned, Token};

/// Hard bound on expression nesting. Without it a submission of many
/// thousands of nested brackets would exhaust the parser's own stack and
/// take the whole process down, which no fault is ever allowed to do.
const MAX_NESTING: usize = 200;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    BigInt(BigInt),
    Str(String),
    Bool(bool),
    Null,
    Undefined,
    Ident(String, usize),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        line: usize,
    },
    Member {
        object: Box<Expr>,
        name: String,
        line: usize,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
        line: usize,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        line: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

/// Assignment target: plain binding, member slot or index slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Ident(String),
    Member { object: Expr, name: String },
    Index { object: Expr, index: Expr },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Let {
        name: String,
        init: Expr,
        awaited: bool,
        line: usize,
    },
    Assign {
        target: Target,
        value: Expr,
        awaited: bool,
        line: usize,
    },
    Expr {
        expr: Expr,
        awaited: bool,
    },
    If {
        cond: Expr,
        then_block: Vec<Stmt>,
        else_block: Option<Vec<Stmt>>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    Throw {
        expr: Expr,
        line: usize,
    },
}

/// Parse the whole text as a single standalone expression.
///
/// Returns the expression and whether it was `await`-prefixed. Any leftover
/// tokens reject the text, which is what routes `let x = 1; x + 1` to the
/// block path.
pub fn parse_expression(source: &str) -> Result<(Expr, bool), ParseError> {
    let tokens = lex(source)?;
    let mut parser = Parser::new(tokens);
    let awaited = parser.eat(&Token::Await);
    let expr = parser.expression()?;
    parser.expect_end()?;
    Ok((expr, awaited))
}

/// Parse the whole text as a statement block. `await` is accepted on
/// top-level statements only.
pub fn parse_program(source: &str) -> Result<Vec<Stmt>, ParseError> {
    let tokens = lex(source)?;
    let mut parser = Parser::new(tokens);
    let stmts = parser.statements(true)?;
    parser.expect_end()?;
    Ok(stmts)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Spanned>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            Err(ParseError::new(
                "expression nesting is too deep",
                self.line(),
            ))
        } else {
            Ok(())
        }
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos.min(self.tokens.len().saturating_sub(1)))
            .map(|s| s.line)
            .unwrap_or(1)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|s| s.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, what: &str) -> Result<(), ParseError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(ParseError::new(format!("expected {}", what), self.line()))
        }
    }

    fn expect_end(&self) -> Result<(), ParseError> {
        if self.pos == self.tokens.len() {
            Ok(())
        } else {
            Err(ParseError::new("unexpected trailing input", self.line()))
        }
    }

    fn statements(&mut self, top_level: bool) -> Result<Vec<Stmt>, ParseError> {
        let mut stmts = Vec::new();
        while self.peek().is_some() && self.peek() != Some(&Token::RBrace) {
            stmts.push(self.statement(top_level)?);
            // Semicolons separate statements but are not mandatory after
            // block-shaped ones.
            while self.eat(&Token::Semi) {}
        }
        Ok(stmts)
    }

    fn statement(&mut self, top_level: bool) -> Result<Stmt, ParseError> {
        // Nested blocks recurse here without passing through `expression`,
        // so they count against the same bound.
        self.enter()?;
        let stmt = self.statement_inner(top_level);
        self.leave();
        stmt
    }

    fn statement_inner(&mut self, top_level: bool) -> Result<Stmt, ParseError> {
        let line = self.line();
        match self.peek() {
            Some(Token::Let) => {
                self.next();
                let name = match self.next() {
                    Some(Token::Ident(name)) => name,
                    _ => return Err(ParseError::new("expected binding name after 'let'", line)),
                };
                self.expect(&Token::Assign, "'=' in let binding")?;
                let awaited = self.awaited(top_level)?;
                let init = self.expression()?;
                Ok(Stmt::Let {
                    name,
                    init,
                    awaited,
                    line,
                })
            }
            Some(Token::If) => {
                self.next();
                self.expect(&Token::LParen, "'(' after 'if'")?;
                let cond = self.expression()?;
                self.expect(&Token::RParen, "')' after condition")?;
                let then_block = self.block()?;
                let else_block = if self.eat(&Token::Else) {
                    if self.peek() == Some(&Token::If) {
                        Some(vec![self.statement(false)?])
                    } else {
                        Some(self.block()?)
                    }
                } else {
                    None
                };
                Ok(Stmt::If {
                    cond,
                    then_block,
                    else_block,
                })
            }
            Some(Token::While) => {
                self.next();
                self.expect(&Token::LParen, "'(' after 'while'")?;
                let cond = self.expression()?;
                self.expect(&Token::RParen, "')' after condition")?;
                let body = self.block()?;
                Ok(Stmt::While { cond, body })
            }
            Some(Token::Throw) => {
                self.next();
                let expr = self.expression()?;
                Ok(Stmt::Throw { expr, line })
            }
            Some(Token::Await) => {
                self.next();
                if !top_level {
                    return Err(ParseError::new("await is only allowed at top level", line));
                }
                let expr = self.expression()?;
                self.expr_or_assign(expr, true, line)
            }
            _ => {
                let expr = self.expression()?;
                self.expr_or_assign(expr, false, line)
            }
        }
    }

    /// An expression statement, or an assignment if '=' follows an lvalue.
    fn expr_or_assign(
        &mut self,
        expr: Expr,
        awaited: bool,
        line: usize,
    ) -> Result<Stmt, ParseError> {
        if self.peek() == Some(&Token::Assign) {
            if awaited {
                return Err(ParseError::new("cannot assign to an awaited value", line));
            }
            self.next();
            let target = match expr {
                Expr::Ident(name, _) => Target::Ident(name),
                Expr::Member { object, name, .. } => Target::Member {
                    object: *object,
                    name,
                },
                Expr::Index { object, index, .. } => Target::Index {
                    object: *object,
                    index: *index,
                },
                _ => return Err(ParseError::new("invalid assignment target", line)),
            };
            let awaited = self.eat(&Token::Await);
            let value = self.expression()?;
            Ok(Stmt::Assign {
                target,
                value,
                awaited,
                line,
            })
        } else {
            Ok(Stmt::Expr { expr, awaited })
        }
    }

    fn awaited(&mut self, top_level: bool) -> Result<bool, ParseError> {
        if self.peek() == Some(&Token::Await) {
            let line = self.line();
            if !top_level {
                return Err(ParseError::new("await is only allowed at top level", line));
            }
            self.next();
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect(&Token::LBrace, "'{'")?;
        let stmts = self.statements(false)?;
        self.expect(&Token::RBrace, "'}'")?;
        Ok(stmts)
    }

    fn expression(&mut self) -> Result<Expr, ParseError> {
        self.enter()?;
        let expr = self.or_expr();
        self.leave();
        expr
    }

    fn or_expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.and_expr()?;
        while self.peek() == Some(&Token::OrOr) {
            let line = self.line();
            self.next();
            let rhs = self.and_expr()?;
            lhs = Expr::Binary {
                op: BinaryOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                line,
            };
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.equality()?;
        while self.peek() == Some(&Token::AndAnd) {
            let line = self.line();
            self.next();
            let rhs = self.equality()?;
            lhs = Expr::Binary {
                op: BinaryOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                line,
            };
        }
        Ok(lhs)
    }

    fn equality(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.comparison()?;
        loop {
            let op = match self.peek() {
                Some(Token::EqEq) => BinaryOp::Eq,
                Some(Token::NotEq) => BinaryOp::NotEq,
                _ => break,
            };
            let line = self.line();
            self.next();
            let rhs = self.comparison()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                line,
            };
        }
        Ok(lhs)
    }

    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::LtEq) => BinaryOp::LtEq,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::GtEq) => BinaryOp::GtEq,
                _ => break,
            };
            let line = self.line();
            self.next();
            let rhs = self.additive()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                line,
            };
        }
        Ok(lhs)
    }

    fn additive(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            let line = self.line();
            self.next();
            let rhs = self.multiplicative()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                line,
            };
        }
        Ok(lhs)
    }

    fn multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.power()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => break,
            };
            let line = self.line();
            self.next();
            let rhs = self.power()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                line,
            };
        }
        Ok(lhs)
    }

    /// `**` is right-associative and binds tighter than `* / %`.
    fn power(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.unary()?;
        if self.peek() == Some(&Token::StarStar) {
            let line = self.line();
            self.next();
            let rhs = self.power()?;
            return Ok(Expr::Binary {
                op: BinaryOp::Pow,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                line,
            });
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        // Guarded separately from `expression`: `-` and `**` chains recurse
        // without passing through it.
        self.enter()?;
        let expr = match self.peek() {
            Some(Token::Minus) => {
                self.next();
                let expr = self.unary()?;
                Ok(Expr::Unary {
                    op: UnaryOp::Neg,
                    expr: Box::new(expr),
                })
            }
            Some(Token::Bang) => {
                self.next();
                let expr = self.unary()?;
                Ok(Expr::Unary {
                    op: UnaryOp::Not,
                    expr: Box::new(expr),
                })
            }
            _ => self.postfix(),
        };
        self.leave();
        expr
    }

    fn postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    let line = self.line();
                    self.next();
                    let name = match self.next() {
                        Some(Token::Ident(name)) => name,
                        _ => return Err(ParseError::new("expected member name after '.'", line)),
                    };
                    expr = Expr::Member {
                        object: Box::new(expr),
                        name,
                        line,
                    };
                }
                Some(Token::LBracket) => {
                    let line = self.line();
                    self.next();
                    let index = self.expression()?;
                    self.expect(&Token::RBracket, "']'")?;
                    expr = Expr::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                        line,
                    };
                }
                Some(Token::LParen) => {
                    let line = self.line();
                    self.next();
                    let mut args = Vec::new();
                    if self.peek() != Some(&Token::RParen) {
                        loop {
                            args.push(self.expression()?);
                            if !self.eat(&Token::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(&Token::RParen, "')'")?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                        line,
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let line = self.line();
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::BigInt(n)) => Ok(Expr::BigInt(n)),
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::True) => Ok(Expr::Bool(true)),
            Some(Token::False) => Ok(Expr::Bool(false)),
            Some(Token::Null) => Ok(Expr::Null),
            Some(Token::Undefined) => Ok(Expr::Undefined),
            Some(Token::Ident(name)) => Ok(Expr::Ident(name, line)),
            Some(Token::LParen) => {
                let expr = self.expression()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(expr)
            }
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                if self.peek() != Some(&Token::RBracket) {
                    loop {
                        items.push(self.expression()?);
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&Token::RBracket, "']'")?;
                Ok(Expr::Array(items))
            }
            Some(Token::LBrace) => {
                let mut entries = Vec::new();
                if self.peek() != Some(&Token::RBrace) {
                    loop {
                        let key = match self.next() {
                            Some(Token::Ident(name)) => name,
                            Some(Token::Str(s)) => s,
                            _ => {
                                return Err(ParseError::new("expected object key", line));
                            }
                        };
                        self.expect(&Token::Colon, "':' after object key")?;
                        entries.push((key, self.expression()?));
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&Token::RBrace, "'}'")?;
                Ok(Expr::Object(entries))
            }
            _ => Err(ParseError::new("expected an expression", line)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expression_accepts_power() {
        let (expr, awaited) = parse_expression("2 ** 10").unwrap();
        assert!(!awaited);
        assert!(matches!(
            expr,
            Expr::Binary {
                op: BinaryOp::Pow,
                ..
            }
        ));
    }

    #[test]
    fn test_power_is_right_associative() {
        let (expr, _) = parse_expression("2 ** 3 ** 2").unwrap();
        if let Expr::Binary { op, rhs, .. } = expr {
            assert_eq!(op, BinaryOp::Pow);
            assert!(matches!(
                *rhs,
                Expr::Binary {
                    op: BinaryOp::Pow,
                    ..
                }
            ));
        } else {
            panic!("expected binary expression");
        }
    }

    #[test]
    fn test_expression_rejects_statements() {
        assert!(parse_expression("let x = 1; x + 1").is_err());
        assert!(parse_expression("1; 2").is_err());
        assert!(parse_expression("while (true) {}").is_err());
    }

    #[test]
    fn test_program_accepts_let_and_expression() {
        let stmts = parse_program("let x = 1; x + 1").unwrap();
        assert_eq!(stmts.len(), 2);
        assert!(matches!(stmts[0], Stmt::Let { ref name, .. } if name == "x"));
        assert!(matches!(stmts[1], Stmt::Expr { awaited: false, .. }));
    }

    #[test]
    fn test_top_level_await_placement() {
        assert!(parse_program("let x = await delay(1, 2); x").is_ok());
        assert!(parse_program("await sleep(1)").is_ok());
        let nested = parse_program("while (true) { await sleep(1); }");
        assert!(nested.is_err(), "await inside a nested block must reject");
    }

    #[test]
    fn test_await_expression_prefix() {
        let (_, awaited) = parse_expression("await delay(5, 1)").unwrap();
        assert!(awaited);
    }

    #[test]
    fn test_assignment_targets() {
        let stmts = parse_program("a[0] = a; b.k = 1; c = 2").unwrap();
        assert!(matches!(
            stmts[0],
            Stmt::Assign {
                target: Target::Index { .. },
                ..
            }
        ));
        assert!(matches!(
            stmts[1],
            Stmt::Assign {
                target: Target::Member { .. },
                ..
            }
        ));
        assert!(matches!(
            stmts[2],
            Stmt::Assign {
                target: Target::Ident(_),
                ..
            }
        ));
        assert!(parse_program("1 + 1 = 2").is_err());
    }

    #[test]
    fn test_object_and_array_literals() {
        let (expr, _) = parse_expression("[{a: 1, \"b c\": 2}, [3]]").unwrap();
        assert!(matches!(expr, Expr::Array(ref items) if items.len() == 2));
    }

    #[test]
    fn test_both_paths_reject_garbage() {
        assert!(parse_expression("2 **").is_err());
        assert!(parse_program("2 **").is_err());
    }

    #[test]
    fn test_nesting_depth_is_bounded() {
        // Each of these would otherwise recurse once per level and blow the
        // stack long before the tokens run out.
        let brackets = format!("{}1{}", "[".repeat(100_000), "]".repeat(100_000));
        assert!(parse_expression(&brackets).is_err());
        assert!(parse_program(&brackets).is_err());

        let parens = format!("{}1{}", "(".repeat(100_000), ")".repeat(100_000));
        assert!(parse_expression(&parens).is_err());

        let minuses = format!("{}1", "-".repeat(100_000));
        assert!(parse_expression(&minuses).is_err());

        let blocks = format!(
            "{}1{}",
            "while (true) { ".repeat(100_000),
            "}".repeat(100_000)
        );
        assert!(parse_program(&blocks).is_err());
    }

    #[test]
    fn test_reasonable_nesting_still_parses() {
        let nested = format!("{}1{}", "[".repeat(40), "]".repeat(40));
        assert!(parse_expression(&nested).is_ok());
    }
}
