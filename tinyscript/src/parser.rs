// Recursive descent parser
//
// Semicolons are optional statement terminators.

use crate::ast::*;
use crate::error::SyntaxError;
use crate::lexer::{tokenize, Keyword, Tok, Token};
use std::rc::Rc;

pub fn parse_program(source: &str) -> Result<Vec<Stmt>, SyntaxError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, index: 0 };
    let mut statements = Vec::new();
    while !parser.at_eof() {
        statements.push(parser.statement()?);
    }
    Ok(statements)
}

struct Parser {
    tokens: Vec<Token>,
    index: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        // tokenize always terminates the stream with Eof
        &self.tokens[self.index.min(self.tokens.len() - 1)]
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        let index = (self.index + offset).min(self.tokens.len() - 1);
        &self.tokens[index].tok
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.index < self.tokens.len() - 1 {
            self.index += 1;
        }
        token
    }

    fn at_eof(&self) -> bool {
        self.peek().tok == Tok::Eof
    }

    fn pos(&self) -> Pos {
        let token = self.peek();
        Pos {
            line: token.line,
            column: token.column,
        }
    }

    fn is_punct(&self, punct: &str) -> bool {
        matches!(&self.peek().tok, Tok::Punct(p) if *p == punct)
    }

    fn is_keyword(&self, keyword: Keyword) -> bool {
        self.peek().tok == Tok::Keyword(keyword)
    }

    fn eat_punct(&mut self, punct: &str) -> bool {
        if self.is_punct(punct) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: Keyword) -> bool {
        if self.is_keyword(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        let token = self.peek();
        SyntaxError::new(token.line, token.column, message)
    }

    fn expect_punct(&mut self, punct: &str) -> Result<(), SyntaxError> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            Err(self.error(format!("Expected '{}' but found {}", punct, describe(&self.peek().tok))))
        }
    }

    fn expect_ident(&mut self) -> Result<String, SyntaxError> {
        match self.peek().tok.clone() {
            Tok::Ident(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(self.error(format!("Expected identifier but found {}", describe(&other)))),
        }
    }

    fn end_statement(&mut self) {
        self.eat_punct(";");
    }

    fn statement(&mut self) -> Result<Stmt, SyntaxError> {
        let pos = self.pos();
        let kind = match self.peek().tok.clone() {
            Tok::Punct(";") => {
                self.advance();
                StmtKind::Empty
            }
            Tok::Punct("{") => StmtKind::Block(self.block()?),
            Tok::Keyword(Keyword::Var | Keyword::Let | Keyword::Const) => {
                let kind = self.var_declaration()?;
                self.end_statement();
                kind
            }
            Tok::Keyword(Keyword::Function) => {
                self.advance();
                let decl = self.function_rest(pos, true)?;
                StmtKind::Function(decl)
            }
            Tok::Keyword(Keyword::Return) => {
                self.advance();
                let value = if self.is_punct(";") || self.is_punct("}") || self.at_eof() {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.end_statement();
                StmtKind::Return(value)
            }
            Tok::Keyword(Keyword::If) => {
                self.advance();
                self.expect_punct("(")?;
                let cond = self.expression()?;
                self.expect_punct(")")?;
                let then = Box::new(self.statement()?);
                let otherwise = if self.eat_keyword(Keyword::Else) {
                    Some(Box::new(self.statement()?))
                } else {
                    None
                };
                StmtKind::If {
                    cond,
                    then,
                    otherwise,
                }
            }
            Tok::Keyword(Keyword::While) => {
                self.advance();
                self.expect_punct("(")?;
                let cond = self.expression()?;
                self.expect_punct(")")?;
                let body = Box::new(self.statement()?);
                StmtKind::While { cond, body }
            }
            Tok::Keyword(Keyword::For) => self.for_statement()?,
            Tok::Keyword(Keyword::Break) => {
                self.advance();
                self.end_statement();
                StmtKind::Break
            }
            Tok::Keyword(Keyword::Continue) => {
                self.advance();
                self.end_statement();
                StmtKind::Continue
            }
            Tok::Keyword(Keyword::Throw) => {
                self.advance();
                let value = self.expression()?;
                self.end_statement();
                StmtKind::Throw(value)
            }
            Tok::Keyword(Keyword::Try) => self.try_statement()?,
            _ => {
                let expr = self.expression()?;
                self.end_statement();
                StmtKind::Expr(expr)
            }
        };
        Ok(Stmt { pos, kind })
    }

    fn block(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        self.expect_punct("{")?;
        let mut statements = Vec::new();
        while !self.is_punct("}") {
            if self.at_eof() {
                return Err(self.error("Expected '}' before end of input"));
            }
            statements.push(self.statement()?);
        }
        self.advance();
        Ok(statements)
    }

    fn var_declaration(&mut self) -> Result<StmtKind, SyntaxError> {
        self.advance();
        let mut declarations = Vec::new();
        loop {
            let name = self.expect_ident()?;
            let init = if self.eat_punct("=") {
                Some(self.assignment()?)
            } else {
                None
            };
            declarations.push((name, init));
            if !self.eat_punct(",") {
                break;
            }
        }
        Ok(StmtKind::Var(declarations))
    }

    fn for_statement(&mut self) -> Result<StmtKind, SyntaxError> {
        self.advance();
        self.expect_punct("(")?;
        let init = if self.eat_punct(";") {
            None
        } else {
            let pos = self.pos();
            let kind = if matches!(
                self.peek().tok,
                Tok::Keyword(Keyword::Var | Keyword::Let | Keyword::Const)
            ) {
                self.var_declaration()?
            } else {
                StmtKind::Expr(self.expression()?)
            };
            self.expect_punct(";")?;
            Some(Box::new(Stmt { pos, kind }))
        };
        let cond = if self.is_punct(";") {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(";")?;
        let update = if self.is_punct(")") {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(")")?;
        let body = Box::new(self.statement()?);
        Ok(StmtKind::For {
            init,
            cond,
            update,
            body,
        })
    }

    fn try_statement(&mut self) -> Result<StmtKind, SyntaxError> {
        self.advance();
        let body = self.block()?;
        let catch = if self.eat_keyword(Keyword::Catch) {
            let binding = if self.eat_punct("(") {
                let name = self.expect_ident()?;
                self.expect_punct(")")?;
                Some(name)
            } else {
                None
            };
            Some((binding, self.block()?))
        } else {
            None
        };
        let finally = if self.eat_keyword(Keyword::Finally) {
            Some(self.block()?)
        } else {
            None
        };
        if catch.is_none() && finally.is_none() {
            return Err(self.error("Missing catch or finally after try"));
        }
        Ok(StmtKind::Try {
            body,
            catch,
            finally,
        })
    }

    /// Parses everything after the `function` keyword
    fn function_rest(&mut self, pos: Pos, require_name: bool) -> Result<Rc<FunctionDecl>, SyntaxError> {
        let name = match self.peek().tok.clone() {
            Tok::Ident(name) => {
                self.advance();
                Some(name)
            }
            _ if require_name => return Err(self.error("Function declaration requires a name")),
            _ => None,
        };
        self.expect_punct("(")?;
        let mut params = Vec::new();
        if !self.is_punct(")") {
            loop {
                params.push(self.expect_ident()?);
                if !self.eat_punct(",") {
                    break;
                }
            }
        }
        self.expect_punct(")")?;
        let body = self.block()?;
        Ok(Rc::new(FunctionDecl {
            name,
            params,
            body,
            pos,
        }))
    }

    fn expression(&mut self) -> Result<Expr, SyntaxError> {
        self.assignment()
    }

    fn assignment(&mut self) -> Result<Expr, SyntaxError> {
        let target = self.conditional()?;
        let op = match &self.peek().tok {
            Tok::Punct("=") => None,
            Tok::Punct("+=") => Some(BinaryOp::Add),
            Tok::Punct("-=") => Some(BinaryOp::Sub),
            Tok::Punct("*=") => Some(BinaryOp::Mul),
            Tok::Punct("/=") => Some(BinaryOp::Div),
            _ => return Ok(target),
        };
        if !matches!(
            target.kind,
            ExprKind::Ident(_) | ExprKind::Member(..) | ExprKind::Index(..)
        ) {
            return Err(self.error("Invalid assignment target"));
        }
        self.advance();
        let value = self.assignment()?;
        Ok(Expr {
            pos: target.pos,
            kind: ExprKind::Assign {
                target: Box::new(target),
                op,
                value: Box::new(value),
            },
        })
    }

    fn conditional(&mut self) -> Result<Expr, SyntaxError> {
        let cond = self.logical_or()?;
        if !self.eat_punct("?") {
            return Ok(cond);
        }
        let then = self.assignment()?;
        self.expect_punct(":")?;
        let otherwise = self.assignment()?;
        Ok(Expr {
            pos: cond.pos,
            kind: ExprKind::Conditional(Box::new(cond), Box::new(then), Box::new(otherwise)),
        })
    }

    fn logical_or(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.logical_and()?;
        while self.eat_punct("||") {
            let right = self.logical_and()?;
            left = Expr {
                pos: left.pos,
                kind: ExprKind::Logical(LogicalOp::Or, Box::new(left), Box::new(right)),
            };
        }
        Ok(left)
    }

    fn logical_and(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.equality()?;
        while self.eat_punct("&&") {
            let right = self.equality()?;
            left = Expr {
                pos: left.pos,
                kind: ExprKind::Logical(LogicalOp::And, Box::new(left), Box::new(right)),
            };
        }
        Ok(left)
    }

    fn binary_level(
        &mut self,
        ops: &[(&str, BinaryOp)],
        next: fn(&mut Self) -> Result<Expr, SyntaxError>,
    ) -> Result<Expr, SyntaxError> {
        let mut left = next(self)?;
        'outer: loop {
            for (punct, op) in ops {
                if self.eat_punct(punct) {
                    let right = next(self)?;
                    left = Expr {
                        pos: left.pos,
                        kind: ExprKind::Binary(*op, Box::new(left), Box::new(right)),
                    };
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn equality(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_level(
            &[
                ("===", BinaryOp::StrictEq),
                ("!==", BinaryOp::StrictNotEq),
                ("==", BinaryOp::Eq),
                ("!=", BinaryOp::NotEq),
            ],
            Self::relational,
        )
    }

    fn relational(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_level(
            &[
                ("<=", BinaryOp::LessEq),
                (">=", BinaryOp::GreaterEq),
                ("<", BinaryOp::Less),
                (">", BinaryOp::Greater),
            ],
            Self::additive,
        )
    }

    fn additive(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_level(
            &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
            Self::multiplicative,
        )
    }

    fn multiplicative(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_level(
            &[
                ("*", BinaryOp::Mul),
                ("/", BinaryOp::Div),
                ("%", BinaryOp::Rem),
            ],
            Self::unary,
        )
    }

    fn unary(&mut self) -> Result<Expr, SyntaxError> {
        let pos = self.pos();
        let op = match &self.peek().tok {
            Tok::Punct("!") => Some(UnaryOp::Not),
            Tok::Punct("-") => Some(UnaryOp::Neg),
            Tok::Punct("+") => Some(UnaryOp::Plus),
            Tok::Keyword(Keyword::Typeof) => Some(UnaryOp::Typeof),
            Tok::Punct("++") | Tok::Punct("--") => {
                let delta = if self.is_punct("++") { 1.0 } else { -1.0 };
                self.advance();
                let target = self.unary()?;
                return Ok(Expr {
                    pos,
                    kind: ExprKind::Update {
                        target: Box::new(target),
                        delta,
                        prefix: true,
                    },
                });
            }
            _ => None,
        };
        match op {
            Some(op) => {
                self.advance();
                let operand = self.unary()?;
                Ok(Expr {
                    pos,
                    kind: ExprKind::Unary(op, Box::new(operand)),
                })
            }
            None => self.postfix(),
        }
    }

    fn postfix(&mut self) -> Result<Expr, SyntaxError> {
        let expr = self.call_member()?;
        let delta = if self.is_punct("++") {
            1.0
        } else if self.is_punct("--") {
            -1.0
        } else {
            return Ok(expr);
        };
        self.advance();
        Ok(Expr {
            pos: expr.pos,
            kind: ExprKind::Update {
                target: Box::new(expr),
                delta,
                prefix: false,
            },
        })
    }

    fn call_member(&mut self) -> Result<Expr, SyntaxError> {
        // `new Foo(...)` is treated as a plain call
        self.eat_keyword(Keyword::New);
        let mut expr = self.primary()?;
        loop {
            if self.eat_punct(".") {
                let name = self.expect_ident()?;
                expr = Expr {
                    pos: expr.pos,
                    kind: ExprKind::Member(Box::new(expr), name),
                };
            } else if self.eat_punct("[") {
                let index = self.expression()?;
                self.expect_punct("]")?;
                expr = Expr {
                    pos: expr.pos,
                    kind: ExprKind::Index(Box::new(expr), Box::new(index)),
                };
            } else if self.is_punct("(") {
                self.advance();
                let mut args = Vec::new();
                if !self.is_punct(")") {
                    loop {
                        args.push(self.assignment()?);
                        if !self.eat_punct(",") {
                            break;
                        }
                    }
                }
                self.expect_punct(")")?;
                expr = Expr {
                    pos: expr.pos,
                    kind: ExprKind::Call(Box::new(expr), args),
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, SyntaxError> {
        let pos = self.pos();
        let token = self.advance();
        let kind = match token.tok {
            Tok::Number(n) => ExprKind::Number(n),
            Tok::Str(s) => ExprKind::Str(s),
            Tok::Ident(name) => ExprKind::Ident(name),
            Tok::Keyword(Keyword::True) => ExprKind::Bool(true),
            Tok::Keyword(Keyword::False) => ExprKind::Bool(false),
            Tok::Keyword(Keyword::Null) => ExprKind::Null,
            Tok::Keyword(Keyword::Undefined) => ExprKind::Undefined,
            Tok::Keyword(Keyword::Function) => ExprKind::Function(self.function_rest(pos, false)?),
            Tok::Punct("(") => {
                let inner = self.expression()?;
                self.expect_punct(")")?;
                return Ok(inner);
            }
            Tok::Punct("[") => {
                let mut items = Vec::new();
                while !self.is_punct("]") {
                    items.push(self.assignment()?);
                    if !self.eat_punct(",") {
                        break;
                    }
                }
                self.expect_punct("]")?;
                ExprKind::Array(items)
            }
            Tok::Punct("{") => {
                let mut properties = Vec::new();
                while !self.is_punct("}") {
                    let key = match self.advance().tok {
                        Tok::Ident(name) | Tok::Str(name) => name,
                        Tok::Number(n) => crate::value::format_number(n),
                        other => {
                            return Err(self.error(format!(
                                "Expected property name but found {}",
                                describe(&other)
                            )))
                        }
                    };
                    self.expect_punct(":")?;
                    properties.push((key, self.assignment()?));
                    if !self.eat_punct(",") {
                        break;
                    }
                }
                self.expect_punct("}")?;
                ExprKind::Object(properties)
            }
            other => {
                return Err(SyntaxError::new(
                    token.line,
                    token.column,
                    format!("Unexpected {}", describe(&other)),
                ))
            }
        };
        Ok(Expr { pos, kind })
    }
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Number(n) => format!("number {}", n),
        Tok::Str(s) => format!("string \"{}\"", s),
        Tok::Ident(name) => format!("identifier '{}'", name),
        Tok::Keyword(kw) => format!("keyword {:?}", kw).to_lowercase(),
        Tok::Punct(p) => format!("'{}'", p),
        Tok::Eof => "end of input".to_string(),
    }
}
