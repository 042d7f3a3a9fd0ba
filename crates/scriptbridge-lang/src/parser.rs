//! Recursive descent parser.

use scriptbridge_core::ScriptError;

use crate::{
    ast::{BinaryOp, Expr, LogicalOp, Stmt, UnaryOp},
    scanner::{Scanner, Token, TokenKind},
    value::Value,
};

type ParseResult<T> = Result<T, ScriptError>;

/// Deepest statement or expression nesting a script may use.
pub const MAX_NESTING: usize = 100;

/// Parse `source` into a list of statements.
///
/// # Errors
/// Returns the first syntax error encountered.
pub fn parse(source: &str) -> ParseResult<Vec<Stmt>> {
    let tokens = Scanner::new(source).scan()?;
    Parser {
        tokens,
        current: 0,
        depth: 0,
    }
    .program()
}

struct Parser {
    tokens: Vec<Token>,
    current: usize,
    depth: usize,
}

impl Parser {
    fn program(mut self) -> ParseResult<Vec<Stmt>> {
        let mut statements = Vec::new();
        while !self.check(TokenKind::Eof) {
            statements.push(self.declaration()?);
        }
        Ok(statements)
    }

    fn declaration(&mut self) -> ParseResult<Stmt> {
        if self.matches(TokenKind::Var) {
            self.var_declaration()
        } else {
            self.statement()
        }
    }

    fn var_declaration(&mut self) -> ParseResult<Stmt> {
        let name = self.consume(TokenKind::Identifier, "Expect variable name.")?.lexeme;
        let initializer = if self.matches(TokenKind::Equal) {
            Some(self.expression()?)
        } else {
            None
        };
        self.consume(TokenKind::Semicolon, "Expect ';' after variable declaration.")?;
        Ok(Stmt::Var { name, initializer })
    }

    fn statement(&mut self) -> ParseResult<Stmt> {
        self.nested(Self::bare_statement)
    }

    fn bare_statement(&mut self) -> ParseResult<Stmt> {
        if self.matches(TokenKind::If) {
            return self.if_statement();
        }
        if self.matches(TokenKind::While) {
            return self.while_statement();
        }
        if self.matches(TokenKind::LeftBrace) {
            return Ok(Stmt::Block(self.block()?));
        }
        let expr = self.expression()?;
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.")?;
        Ok(Stmt::Expression(expr))
    }

    fn if_statement(&mut self) -> ParseResult<Stmt> {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.")?;
        let condition = self.expression()?;
        self.consume(TokenKind::RightParen, "Expect ')' after if condition.")?;

        let then_branch = Box::new(self.statement()?);
        let else_branch = if self.matches(TokenKind::Else) {
            Some(Box::new(self.statement()?))
        } else {
            None
        };
        Ok(Stmt::If {
            condition,
            then_branch,
            else_branch,
        })
    }

    fn while_statement(&mut self) -> ParseResult<Stmt> {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.")?;
        let condition = self.expression()?;
        self.consume(TokenKind::RightParen, "Expect ')' after condition.")?;
        let body = Box::new(self.statement()?);
        Ok(Stmt::While { condition, body })
    }

    fn block(&mut self) -> ParseResult<Vec<Stmt>> {
        let mut statements = Vec::new();
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            statements.push(self.declaration()?);
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.")?;
        Ok(statements)
    }

    fn expression(&mut self) -> ParseResult<Expr> {
        self.nested(Self::assignment)
    }

    /// Run `rule` one level deeper.
    fn nested<T>(&mut self, rule: fn(&mut Self) -> ParseResult<T>) -> ParseResult<T> {
        self.descend()?;
        let result = rule(self);
        self.depth -= 1;
        result
    }

    fn descend(&mut self) -> ParseResult<()> {
        if self.depth >= MAX_NESTING {
            return Err(error_at(self.previous(), "Too much nesting."));
        }
        self.depth += 1;
        Ok(())
    }

    fn assignment(&mut self) -> ParseResult<Expr> {
        let expr = self.or()?;

        if self.matches(TokenKind::Equal) {
            let equals = self.previous().clone();
            let value = self.nested(Self::assignment)?;
            return match expr {
                Expr::Variable { name, line } => Ok(Expr::Assign {
                    name,
                    value: Box::new(value),
                    line,
                }),
                _ => Err(error_at(&equals, "Invalid assignment target.")),
            };
        }
        Ok(expr)
    }

    fn or(&mut self) -> ParseResult<Expr> {
        let outer = self.depth;
        let mut expr = self.and()?;
        while self.matches(TokenKind::Or) {
            self.descend()?;
            let right = self.and()?;
            expr = Expr::Logical {
                left: Box::new(expr),
                op: LogicalOp::Or,
                right: Box::new(right),
            };
        }
        self.depth = outer;
        Ok(expr)
    }

    fn and(&mut self) -> ParseResult<Expr> {
        let outer = self.depth;
        let mut expr = self.equality()?;
        while self.matches(TokenKind::And) {
            self.descend()?;
            let right = self.equality()?;
            expr = Expr::Logical {
                left: Box::new(expr),
                op: LogicalOp::And,
                right: Box::new(right),
            };
        }
        self.depth = outer;
        Ok(expr)
    }

    fn equality(&mut self) -> ParseResult<Expr> {
        self.binary(Self::comparison, |kind| match kind {
            TokenKind::EqualEqual => Some(BinaryOp::Equal),
            TokenKind::BangEqual => Some(BinaryOp::NotEqual),
            _ => None,
        })
    }

    fn comparison(&mut self) -> ParseResult<Expr> {
        self.binary(Self::term, |kind| match kind {
            TokenKind::Less => Some(BinaryOp::Less),
            TokenKind::LessEqual => Some(BinaryOp::LessEqual),
            TokenKind::Greater => Some(BinaryOp::Greater),
            TokenKind::GreaterEqual => Some(BinaryOp::GreaterEqual),
            _ => None,
        })
    }

    fn term(&mut self) -> ParseResult<Expr> {
        self.binary(Self::factor, |kind| match kind {
            TokenKind::Plus => Some(BinaryOp::Add),
            TokenKind::Minus => Some(BinaryOp::Subtract),
            _ => None,
        })
    }

    fn factor(&mut self) -> ParseResult<Expr> {
        self.binary(Self::unary, |kind| match kind {
            TokenKind::Star => Some(BinaryOp::Multiply),
            TokenKind::Slash => Some(BinaryOp::Divide),
            _ => None,
        })
    }

    /// Left-associative binary level: `operand (op operand)*`.
    ///
    /// Every operator in a chain deepens the tree by one.
    fn binary(
        &mut self,
        operand: fn(&mut Self) -> ParseResult<Expr>,
        operator: fn(TokenKind) -> Option<BinaryOp>,
    ) -> ParseResult<Expr> {
        let outer = self.depth;
        let mut expr = operand(self)?;
        while let Some(op) = operator(self.peek().kind) {
            let line = self.advance().line;
            self.descend()?;
            let right = operand(self)?;
            expr = Expr::Binary {
                left: Box::new(expr),
                op,
                right: Box::new(right),
                line,
            };
        }
        self.depth = outer;
        Ok(expr)
    }

    fn unary(&mut self) -> ParseResult<Expr> {
        let op = match self.peek().kind {
            TokenKind::Bang => UnaryOp::Not,
            TokenKind::Minus => UnaryOp::Negate,
            _ => return self.call(),
        };
        let line = self.advance().line;
        let operand = Box::new(self.nested(Self::unary)?);
        Ok(Expr::Unary { op, operand, line })
    }

    fn call(&mut self) -> ParseResult<Expr> {
        let expr = self.primary()?;
        if !self.check(TokenKind::LeftParen) {
            return Ok(expr);
        }

        let paren = self.advance().clone();
        let Expr::Variable { name, line } = expr else {
            return Err(error_at(&paren, "Can only call functions by name."));
        };

        let mut args = Vec::new();
        if !self.check(TokenKind::RightParen) {
            loop {
                args.push(self.expression()?);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.")?;
        Ok(Expr::Call {
            callee: name,
            args,
            line,
        })
    }

    fn primary(&mut self) -> ParseResult<Expr> {
        let token = self.advance().clone();
        let expr = match token.kind {
            TokenKind::False => Expr::Literal(Value::Bool(false)),
            TokenKind::True => Expr::Literal(Value::Bool(true)),
            TokenKind::Nil => Expr::Literal(Value::Nil),
            TokenKind::String => Expr::Literal(Value::Str(token.lexeme)),
            TokenKind::Number => {
                let n = token
                    .lexeme
                    .parse::<f64>()
                    .map_err(|_| error_at(&token, "Invalid number literal."))?;
                Expr::Literal(Value::Number(n))
            }
            TokenKind::Identifier => Expr::Variable {
                name: token.lexeme,
                line: token.line,
            },
            TokenKind::LeftParen => {
                let expr = self.expression()?;
                self.consume(TokenKind::RightParen, "Expect ')' after expression.")?;
                expr
            }
            _ => return Err(error_at(&token, "Expect expression.")),
        };
        Ok(expr)
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> ParseResult<Token> {
        if self.check(kind) {
            Ok(self.advance().clone())
        } else {
            Err(error_at(self.peek(), message))
        }
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn advance(&mut self) -> &Token {
        if !self.check(TokenKind::Eof) {
            self.current += 1;
        }
        self.previous()
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.current]
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current.saturating_sub(1)]
    }
}

fn error_at(token: &Token, message: &str) -> ScriptError {
    let location = if token.kind == TokenKind::Eof {
        " at end".to_string()
    } else {
        format!(" at '{}'", token.lexeme)
    };
    ScriptError::syntax(format!("[line {}] Error{location}: {message}", token.line))
}

#[cfg(test)]
mod tests {
    use scriptbridge_core::ErrorKind;

    use super::*;

    #[test]
    fn test_var_with_call() {
        let program = parse("var x = readAsync(\"name?\"); print(x);").unwrap();
        assert_eq!(
            program,
            vec![
                Stmt::Var {
                    name: "x".into(),
                    initializer: Some(Expr::Call {
                        callee: "readAsync".into(),
                        args: vec![Expr::Literal(Value::Str("name?".into()))],
                        line: 1,
                    }),
                },
                Stmt::Expression(Expr::Call {
                    callee: "print".into(),
                    args: vec![Expr::Variable {
                        name: "x".into(),
                        line: 1,
                    }],
                    line: 1,
                }),
            ]
        );
    }

    #[test]
    fn test_precedence() {
        let program = parse("1 + 2 * 3;").unwrap();
        let Stmt::Expression(Expr::Binary { op, right, .. }) = &program[0] else {
            panic!("expected binary expression");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(
            **right,
            Expr::Binary {
                op: BinaryOp::Multiply,
                ..
            }
        ));
    }

    #[test]
    fn test_control_flow() {
        let program = parse("var i = 0; while (i < 3) { if (i == 1) print(i); else i = i; i = i + 1; }").unwrap();
        assert_eq!(program.len(), 2);
        assert!(matches!(program[1], Stmt::While { .. }));
    }

    #[test]
    fn test_missing_semicolon() {
        let err = parse("print(\"hi\")").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert_eq!(err.message, "[line 1] Error at end: Expect ';' after expression.");
    }

    #[test]
    fn test_invalid_assignment_target() {
        let err = parse("1 = 2;").unwrap_err();
        assert_eq!(err.message, "[line 1] Error at '=': Invalid assignment target.");
    }

    #[test]
    fn test_call_requires_name() {
        let err = parse("(f)(1);").unwrap_err();
        assert!(err.message.contains("Can only call functions by name."));
    }

    #[test]
    fn test_nesting_limit() {
        let nested = |depth: usize| format!("{}1{};", "(".repeat(depth), ")".repeat(depth));

        assert!(parse(&nested(MAX_NESTING - 2)).is_ok());
        let err = parse(&nested(MAX_NESTING)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert_eq!(err.message, "[line 1] Error at '(': Too much nesting.");

        let err = parse(&format!("{}1;", "-".repeat(500))).unwrap_err();
        assert_eq!(err.message, "[line 1] Error at '-': Too much nesting.");

        let err = parse(&format!("{}{}", "{".repeat(500), "}".repeat(500))).unwrap_err();
        assert_eq!(err.message, "[line 1] Error at '{': Too much nesting.");
    }

    #[test]
    fn test_long_operator_chain_counts_as_nesting() {
        let chain = |terms: usize| format!("{};", vec!["1"; terms].join(" or "));

        assert!(parse(&chain(10)).is_ok());
        let err = parse(&chain(5000)).unwrap_err();
        assert_eq!(err.message, "[line 1] Error at 'or': Too much nesting.");

        let err = parse(&format!("x = {}1;", "y = ".repeat(500))).unwrap_err();
        assert_eq!(err.message, "[line 1] Error at '=': Too much nesting.");
    }
}
