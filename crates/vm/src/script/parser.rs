use dvm_types::ValueKind;

use dvm_types::error::VmError;

use super::ast::{BinOp, Expr, Method, Param, Stmt, UnOp};
use super::token::{compile_err, Token, TokenKind};

/// Recursive-descent parser over the token stream. Produces the contract
/// name and its method declarations; semantic validation (reserved names,
/// duplicates) happens in `compile`.
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    pub fn parse_program(mut self) -> Result<(String, Vec<Method>), VmError> {
        self.expect(&TokenKind::Contract)?;
        let name = self.expect_ident()?;
        let mut methods = Vec::new();
        while !self.check(&TokenKind::Eof) {
            if self.check(&TokenKind::Contract) {
                return Err(self.err("only one contract declaration is allowed"));
            }
            methods.push(self.parse_method()?);
        }
        Ok((name, methods))
    }

    fn parse_method(&mut self) -> Result<Method, VmError> {
        let exported = if self.eat(&TokenKind::Export) {
            true
        } else {
            // `private` is the explicit spelling of the default.
            self.eat(&TokenKind::Private);
            false
        };
        self.expect(&TokenKind::Fn)?;
        let name = self.expect_ident()?;
        self.expect(&TokenKind::LParen)?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                let pname = self.expect_ident()?;
                self.expect(&TokenKind::Colon)?;
                let kind_name = self.expect_ident()?;
                let kind = ValueKind::parse(&kind_name)
                    .ok_or_else(|| self.err(format!("unknown parameter kind `{kind_name}`")))?;
                params.push(Param { name: pname, kind });
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen)?;
        let body = self.parse_block()?;
        Ok(Method {
            name,
            params,
            exported,
            body,
        })
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, VmError> {
        self.expect(&TokenKind::LBrace)?;
        let mut stmts = Vec::new();
        while !self.eat(&TokenKind::RBrace) {
            if self.check(&TokenKind::Eof) {
                return Err(self.err("unterminated block"));
            }
            stmts.push(self.parse_stmt()?);
        }
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> Result<Stmt, VmError> {
        if self.eat(&TokenKind::Let) {
            let name = self.expect_ident()?;
            self.expect(&TokenKind::Assign)?;
            let value = self.parse_expr()?;
            self.expect(&TokenKind::Semi)?;
            return Ok(Stmt::Let(name, value));
        }
        if self.check(&TokenKind::If) {
            return self.parse_if();
        }
        if self.eat(&TokenKind::While) {
            let cond = self.parse_expr()?;
            let body = self.parse_block()?;
            return Ok(Stmt::While { cond, body });
        }
        if self.eat(&TokenKind::For) {
            let var = self.expect_ident()?;
            self.expect(&TokenKind::In)?;
            let iter = self.parse_expr()?;
            let body = self.parse_block()?;
            return Ok(Stmt::For { var, iter, body });
        }
        if self.eat(&TokenKind::Return) {
            let value = if self.check(&TokenKind::Semi) {
                None
            } else {
                Some(self.parse_expr()?)
            };
            self.expect(&TokenKind::Semi)?;
            return Ok(Stmt::Return(value));
        }
        if self.eat(&TokenKind::Assert) {
            let cond = self.parse_expr()?;
            let message = if self.eat(&TokenKind::Comma) {
                Some(self.expect_string()?)
            } else {
                None
            };
            self.expect(&TokenKind::Semi)?;
            return Ok(Stmt::Assert(cond, message));
        }
        if self.eat(&TokenKind::Fail) {
            let message = self.expect_string()?;
            self.expect(&TokenKind::Semi)?;
            return Ok(Stmt::Fail(message));
        }

        let expr = self.parse_expr()?;
        if self.eat(&TokenKind::Assign) {
            let target = Self::validate_assign_target(expr)
                .map_err(|msg| self.err(msg))?;
            let value = self.parse_expr()?;
            self.expect(&TokenKind::Semi)?;
            return Ok(Stmt::Assign(target, value));
        }
        // `+=` / `-=` desugar to a read-modify-write of the same target.
        let compound = match self.peek() {
            TokenKind::PlusAssign => Some(BinOp::Add),
            TokenKind::MinusAssign => Some(BinOp::Sub),
            _ => None,
        };
        if let Some(op) = compound {
            self.advance();
            let target = Self::validate_assign_target(expr)
                .map_err(|msg| self.err(msg))?;
            let value = self.parse_expr()?;
            self.expect(&TokenKind::Semi)?;
            let updated = Expr::Binary(op, Box::new(target.clone()), Box::new(value));
            return Ok(Stmt::Assign(target, updated));
        }
        self.expect(&TokenKind::Semi)?;
        Ok(Stmt::Expr(expr))
    }

    fn parse_if(&mut self) -> Result<Stmt, VmError> {
        self.expect(&TokenKind::If)?;
        let cond = self.parse_expr()?;
        let then = self.parse_block()?;
        let els = if self.eat(&TokenKind::Else) {
            if self.check(&TokenKind::If) {
                vec![self.parse_if()?]
            } else {
                self.parse_block()?
            }
        } else {
            Vec::new()
        };
        Ok(Stmt::If { cond, then, els })
    }

    /// An assignment target is a name, `self.name`, or an index chain
    /// rooted in one of those.
    fn validate_assign_target(expr: Expr) -> Result<Expr, String> {
        fn ok(expr: &Expr) -> bool {
            match expr {
                Expr::Ident(_) => true,
                Expr::Attr(base, _) => matches!(**base, Expr::This),
                Expr::Index(base, _) => ok(base),
                _ => false,
            }
        }
        if ok(&expr) {
            Ok(expr)
        } else {
            Err("invalid assignment target".to_string())
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, VmError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, VmError> {
        let mut left = self.parse_and()?;
        while self.eat(&TokenKind::Or) {
            let right = self.parse_and()?;
            left = Expr::Binary(BinOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, VmError> {
        let mut left = self.parse_not()?;
        while self.eat(&TokenKind::And) {
            let right = self.parse_not()?;
            left = Expr::Binary(BinOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, VmError> {
        if self.eat(&TokenKind::Not) {
            let operand = self.parse_not()?;
            return Ok(Expr::Unary(UnOp::Not, Box::new(operand)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, VmError> {
        let left = self.parse_additive()?;
        let op = match self.peek() {
            TokenKind::Eq => BinOp::Eq,
            TokenKind::Ne => BinOp::Ne,
            TokenKind::Lt => BinOp::Lt,
            TokenKind::Le => BinOp::Le,
            TokenKind::Gt => BinOp::Gt,
            TokenKind::Ge => BinOp::Ge,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_additive()?;
        Ok(Expr::Binary(op, Box::new(left), Box::new(right)))
    }

    fn parse_additive(&mut self) -> Result<Expr, VmError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, VmError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::Percent => BinOp::Rem,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, VmError> {
        if self.eat(&TokenKind::Minus) {
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary(UnOp::Neg, Box::new(operand)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, VmError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(&TokenKind::Dot) {
                let name = self.expect_ident()?;
                expr = Expr::Attr(Box::new(expr), name);
            } else if self.eat(&TokenKind::LBracket) {
                let index = self.parse_expr()?;
                self.expect(&TokenKind::RBracket)?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else if self.eat(&TokenKind::LParen) {
                let mut args = Vec::new();
                if !self.check(&TokenKind::RParen) {
                    loop {
                        args.push(self.parse_expr()?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RParen)?;
                expr = Expr::Call(Box::new(expr), args);
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, VmError> {
        let token = self.advance().clone();
        match token.kind {
            TokenKind::Int(n) => Ok(Expr::Int(n)),
            TokenKind::Dec(d) => Ok(Expr::Dec(d)),
            TokenKind::Str(s) => Ok(Expr::Str(s)),
            TokenKind::True => Ok(Expr::Bool(true)),
            TokenKind::False => Ok(Expr::Bool(false)),
            TokenKind::SelfKw => Ok(Expr::This),
            TokenKind::Ident(name) => Ok(Expr::Ident(name)),
            TokenKind::LParen => {
                if self.eat(&TokenKind::RParen) {
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let first = self.parse_expr()?;
                if !self.check(&TokenKind::Comma) {
                    self.expect(&TokenKind::RParen)?;
                    return Ok(first);
                }
                let mut items = vec![first];
                while self.eat(&TokenKind::Comma) {
                    if self.check(&TokenKind::RParen) {
                        break;
                    }
                    items.push(self.parse_expr()?);
                }
                self.expect(&TokenKind::RParen)?;
                Ok(Expr::Tuple(items))
            }
            TokenKind::LBracket => {
                let mut items = Vec::new();
                if !self.check(&TokenKind::RBracket) {
                    loop {
                        items.push(self.parse_expr()?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RBracket)?;
                Ok(Expr::List(items))
            }
            TokenKind::LBrace => {
                let mut entries = Vec::new();
                if !self.check(&TokenKind::RBrace) {
                    loop {
                        let key = self.parse_expr()?;
                        self.expect(&TokenKind::Colon)?;
                        let value = self.parse_expr()?;
                        entries.push((key, value));
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RBrace)?;
                Ok(Expr::Map(entries))
            }
            other => Err(compile_err(
                token.line,
                format!("expected an expression, found {}", other.describe()),
            )),
        }
    }

    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek() == kind
    }

    fn advance(&mut self) -> &Token {
        let idx = self.pos;
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        &self.tokens[idx]
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<(), VmError> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(self.err(format!(
                "expected {}, found {}",
                kind.describe(),
                self.peek().describe()
            )))
        }
    }

    fn expect_ident(&mut self) -> Result<String, VmError> {
        match self.peek().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(self.err(format!("expected an identifier, found {}", other.describe()))),
        }
    }

    fn expect_string(&mut self) -> Result<String, VmError> {
        match self.peek().clone() {
            TokenKind::Str(s) => {
                self.advance();
                Ok(s)
            }
            other => Err(self.err(format!(
                "expected a string literal, found {}",
                other.describe()
            ))),
        }
    }

    fn err(&self, msg: impl std::fmt::Display) -> VmError {
        compile_err(self.tokens[self.pos].line, msg)
    }
}
