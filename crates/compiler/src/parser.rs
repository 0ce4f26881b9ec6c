//! Recursive-descent parser with explicit precedence climbing.
//!
//! Statements are separated by runs of line breaks (newlines or
//! semicolons). `{` is ambiguous between a block, an object literal, and
//! a closure literal; in expression position it is disambiguated by
//! peeking at the first tokens inside, in statement position it is
//! always a block.

use crate::ast::{Expr, Literal, LogicalOp, Pattern, Program, Stmt, Subscript};
use crate::lexer::{Token, TokenKind, tokenize};
use yq_core::bytecode::{ActionKind, AssignOp, BinaryOp, UnaryOp};
use yq_core::error::{Error, Result};

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

/// Parse a whole program.
pub fn parse(source: &str) -> Result<Program> {
    let tokens = tokenize(source)?;
    Parser { tokens, pos: 0 }.parse_program()
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn peek_at(&self, ahead: usize) -> TokenKind {
        self.tokens
            .get(self.pos + ahead)
            .map(|t| t.kind)
            .unwrap_or(TokenKind::Eof)
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn consume(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, expected: &str) -> Result<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn unexpected(&self, expected: &str) -> Error {
        let found = match self.peek_kind() {
            TokenKind::Eof => "end of input".to_string(),
            TokenKind::LineBreak => "end of line".to_string(),
            _ => format!("'{}'", self.peek().lexeme),
        };
        Error::Parse {
            expected: expected.to_string(),
            found,
            line: self.peek().line,
        }
    }

    fn skip_breaks(&mut self) {
        while self.check(TokenKind::LineBreak) {
            self.advance();
        }
    }

    fn at_end(&self) -> bool {
        self.check(TokenKind::Eof)
    }

    // ---- statements ------------------------------------------------------

    fn parse_program(&mut self) -> Result<Program> {
        let mut body = Vec::new();
        self.skip_breaks();
        while !self.at_end() {
            body.push(self.parse_stmt()?);
            self.skip_breaks();
        }
        Ok(Program { body })
    }

    fn parse_stmt(&mut self) -> Result<Stmt> {
        match self.peek_kind() {
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::For => self.parse_for(),
            TokenKind::Init => {
                self.advance();
                self.skip_breaks();
                Ok(Stmt::Init(Box::new(self.parse_stmt()?)))
            }
            TokenKind::Func => self.parse_func_stmt(),
            TokenKind::Return => {
                self.advance();
                if matches!(
                    self.peek_kind(),
                    TokenKind::LineBreak | TokenKind::RBrace | TokenKind::Eof
                ) {
                    Ok(Stmt::Return(None))
                } else {
                    Ok(Stmt::Return(Some(self.parse_expr()?)))
                }
            }
            TokenKind::Break => {
                self.advance();
                Ok(Stmt::Break)
            }
            TokenKind::Continue => {
                self.advance();
                Ok(Stmt::Continue)
            }
            TokenKind::Say => self.parse_action(ActionKind::Say),
            TokenKind::Nudge => self.parse_action(ActionKind::Nudge),
            TokenKind::PicSave => self.parse_action(ActionKind::PicSave),
            TokenKind::PicSend => self.parse_action(ActionKind::PicSend),
            TokenKind::LBrace => {
                self.advance();
                let body = self.parse_block_body()?;
                Ok(Stmt::Block(body))
            }
            _ => self.parse_assignment_or_expr(),
        }
    }

    fn parse_action(&mut self, kind: ActionKind) -> Result<Stmt> {
        self.advance();
        let value = self.parse_expr()?;
        Ok(Stmt::Action { kind, value })
    }

    fn parse_if(&mut self) -> Result<Stmt> {
        self.advance();
        let cond = self.parse_expr()?;
        self.skip_breaks();
        let then_branch = Box::new(self.parse_stmt()?);
        // `else` may sit on its own line.
        let checkpoint = self.pos;
        self.skip_breaks();
        let else_branch = if self.consume(TokenKind::Else) {
            self.skip_breaks();
            Some(Box::new(self.parse_stmt()?))
        } else {
            self.pos = checkpoint;
            None
        };
        Ok(Stmt::If {
            cond,
            then_branch,
            else_branch,
        })
    }

    fn parse_while(&mut self) -> Result<Stmt> {
        self.advance();
        let cond = self.parse_expr()?;
        self.skip_breaks();
        let body = Box::new(self.parse_stmt()?);
        Ok(Stmt::While { cond, body })
    }

    fn parse_for(&mut self) -> Result<Stmt> {
        self.advance();
        let pattern = self.parse_binding_pattern()?;
        self.expect(TokenKind::In, "'in'")?;
        let iterable = self.parse_expr()?;
        self.skip_breaks();
        let body = Box::new(self.parse_stmt()?);
        Ok(Stmt::For {
            pattern,
            iterable,
            body,
        })
    }

    /// The restricted pattern grammar used by `for`: identifiers, nested
    /// list patterns, and constants.
    fn parse_binding_pattern(&mut self) -> Result<Pattern> {
        match self.peek_kind() {
            TokenKind::Ident => {
                let name = self.advance().lexeme;
                Ok(Pattern::Ident(name))
            }
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                self.skip_breaks();
                if !self.check(TokenKind::RBracket) {
                    loop {
                        items.push(self.parse_binding_pattern()?);
                        if !self.consume(TokenKind::Comma) {
                            break;
                        }
                        self.skip_breaks();
                    }
                }
                self.expect(TokenKind::RBracket, "']'")?;
                Ok(Pattern::List(items))
            }
            TokenKind::Int => {
                let lexeme = self.advance().lexeme;
                Ok(Pattern::Constant(Literal::Integer(parse_int(&lexeme)?)))
            }
            TokenKind::Str => {
                let text = self.advance().lexeme;
                Ok(Pattern::Constant(Literal::Str(text)))
            }
            _ => Err(self.unexpected("a binding pattern")),
        }
    }

    fn parse_func_stmt(&mut self) -> Result<Stmt> {
        self.advance();
        // Anonymous `func (params) body` in statement position is an
        // expression statement.
        if self.check(TokenKind::LParen) {
            let params = self.parse_params()?;
            let body = self.parse_closure_body_stmt()?;
            return Ok(Stmt::Expr(Expr::Closure { params, body }));
        }
        let name = self.expect(TokenKind::Ident, "a function name")?.lexeme;
        let params = self.parse_params()?;
        let body = self.parse_closure_body_stmt()?;
        Ok(Stmt::Func { name, params, body })
    }

    fn parse_params(&mut self) -> Result<Vec<String>> {
        self.expect(TokenKind::LParen, "'('")?;
        let mut params = Vec::new();
        if !self.check(TokenKind::RParen) {
            loop {
                params.push(self.expect(TokenKind::Ident, "a parameter name")?.lexeme);
                if !self.consume(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen, "')'")?;
        Ok(params)
    }

    /// A function body: a braced block's statements, or one statement.
    fn parse_closure_body_stmt(&mut self) -> Result<Vec<Stmt>> {
        self.skip_breaks();
        if self.consume(TokenKind::LBrace) {
            self.parse_block_body()
        } else {
            Ok(vec![self.parse_stmt()?])
        }
    }

    /// Statements until the matching `}` (already consumed the `{`).
    fn parse_block_body(&mut self) -> Result<Vec<Stmt>> {
        let mut body = Vec::new();
        self.skip_breaks();
        while !self.check(TokenKind::RBrace) {
            if self.at_end() {
                return Err(self.unexpected("'}'"));
            }
            body.push(self.parse_stmt()?);
            self.skip_breaks();
        }
        self.advance(); // '}'
        Ok(body)
    }

    fn parse_assignment_or_expr(&mut self) -> Result<Stmt> {
        let expr = self.parse_expr()?;
        if self.consume(TokenKind::Assign) {
            let target = expr.into_pattern()?;
            let value = self.parse_expr()?;
            return Ok(Stmt::Assign { target, value });
        }
        let op = match self.peek_kind() {
            TokenKind::PlusAssign => Some(AssignOp::Add),
            TokenKind::MinusAssign => Some(AssignOp::Sub),
            TokenKind::StarAssign => Some(AssignOp::Mul),
            TokenKind::SlashAssign => Some(AssignOp::Div),
            TokenKind::PercentAssign => Some(AssignOp::Mod),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let target = expr.into_pattern()?;
            if !matches!(target, Pattern::Ident(_) | Pattern::Access { .. }) {
                return Err(Error::compile(
                    "compound assignment needs a variable or subscript target",
                ));
            }
            let value = self.parse_expr()?;
            return Ok(Stmt::Compound { target, op, value });
        }
        Ok(Stmt::Expr(expr))
    }

    // ---- expressions -----------------------------------------------------

    fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_logic_or()
    }

    fn parse_logic_or(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_logic_and()?;
        while self.consume(TokenKind::OrOr) {
            let rhs = self.parse_logic_and()?;
            lhs = Expr::Logical {
                op: LogicalOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_logic_and(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_equality()?;
        while self.consume(TokenKind::AndAnd) {
            let rhs = self.parse_equality()?;
            lhs = Expr::Logical {
                op: LogicalOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_comparison()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::EqEq => BinaryOp::Eq,
                TokenKind::NotEq => BinaryOp::Ne,
                TokenKind::In => BinaryOp::In,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_comparison()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_term()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Less => BinaryOp::Lt,
                TokenKind::LessEq => BinaryOp::Le,
                TokenKind::Greater => BinaryOp::Gt,
                TokenKind::GreaterEq => BinaryOp::Ge,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_term()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_factor()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_factor()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_factor(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let op = match self.peek_kind() {
            TokenKind::Not => Some(UnaryOp::Not),
            TokenKind::Minus => Some(UnaryOp::Minus),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary {
                op,
                operand: Box::new(operand),
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek_kind() {
                TokenKind::Dot => {
                    self.advance();
                    let name = self.expect(TokenKind::Ident, "a member name")?.lexeme;
                    expr = extend_access(expr, Subscript::Member(name));
                }
                TokenKind::LBracket => {
                    self.advance();
                    let subscript = self.parse_subscript()?;
                    self.expect(TokenKind::RBracket, "']'")?;
                    expr = extend_access(expr, subscript);
                }
                TokenKind::LParen => {
                    self.advance();
                    let mut args = Vec::new();
                    if !self.check(TokenKind::RParen) {
                        loop {
                            args.push(self.parse_expr()?);
                            if !self.consume(TokenKind::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(TokenKind::RParen, "')'")?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_subscript(&mut self) -> Result<Subscript> {
        if self.consume(TokenKind::Colon) {
            // [:e] or [:]
            if self.check(TokenKind::RBracket) {
                return Ok(Subscript::Slice {
                    begin: None,
                    end: None,
                });
            }
            let end = self.parse_expr()?;
            return Ok(Subscript::Slice {
                begin: None,
                end: Some(Box::new(end)),
            });
        }
        let first = self.parse_expr()?;
        if self.consume(TokenKind::Colon) {
            if self.check(TokenKind::RBracket) {
                return Ok(Subscript::Slice {
                    begin: Some(Box::new(first)),
                    end: None,
                });
            }
            let end = self.parse_expr()?;
            return Ok(Subscript::Slice {
                begin: Some(Box::new(first)),
                end: Some(Box::new(end)),
            });
        }
        Ok(Subscript::Index(Box::new(first)))
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.peek_kind() {
            TokenKind::Int => {
                let lexeme = self.advance().lexeme;
                Ok(Expr::Literal(Literal::Integer(parse_int(&lexeme)?)))
            }
            TokenKind::Str => {
                let text = self.advance().lexeme;
                Ok(Expr::Literal(Literal::Str(text)))
            }
            TokenKind::Ident => {
                let name = self.advance().lexeme;
                Ok(match name.as_str() {
                    "true" => Expr::Literal(Literal::Boolean(true)),
                    "false" => Expr::Literal(Literal::Boolean(false)),
                    "null" => Expr::Literal(Literal::Null),
                    "$" => Expr::ArgsList,
                    _ => match shorthand_param(&name) {
                        Some(n) => Expr::NthArg(n),
                        None => Expr::Ident(name),
                    },
                })
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(expr)
            }
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                if !self.check(TokenKind::RBracket) {
                    loop {
                        items.push(self.parse_expr()?);
                        if !self.consume(TokenKind::Comma) {
                            break;
                        }
                        if self.check(TokenKind::RBracket) {
                            break; // trailing comma
                        }
                    }
                }
                self.expect(TokenKind::RBracket, "']'")?;
                Ok(Expr::List(items))
            }
            TokenKind::LBrace => {
                self.advance();
                self.parse_brace_expr()
            }
            TokenKind::Func => {
                self.advance();
                let params = self.parse_params()?;
                let body = self.parse_closure_body_stmt()?;
                Ok(Expr::Closure { params, body })
            }
            _ => Err(self.unexpected("an expression")),
        }
    }

    /// `{` in expression position: object literal or closure literal.
    fn parse_brace_expr(&mut self) -> Result<Expr> {
        self.skip_breaks();
        // Empty braces: an empty object.
        if self.consume(TokenKind::RBrace) {
            return Ok(Expr::Object(Vec::new()));
        }
        // `key: ...` opens an object literal.
        if matches!(self.peek_kind(), TokenKind::Ident | TokenKind::Str)
            && self.peek_at(1) == TokenKind::Colon
        {
            return self.parse_object_body();
        }
        // `a ->` or `a, b ->` opens a named-parameter closure.
        if self.check(TokenKind::Ident)
            && matches!(self.peek_at(1), TokenKind::Arrow | TokenKind::Comma)
            && !self.peek().lexeme.starts_with('$')
        {
            let mut params = Vec::new();
            loop {
                params.push(self.expect(TokenKind::Ident, "a parameter name")?.lexeme);
                if !self.consume(TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::Arrow, "'->'")?;
            let body = self.parse_block_body()?;
            return Ok(Expr::Closure { params, body });
        }
        // Anything else is a shorthand closure body using `$0`, `$1`, `$`.
        let body = self.parse_block_body()?;
        Ok(Expr::Closure {
            params: Vec::new(),
            body,
        })
    }

    fn parse_object_body(&mut self) -> Result<Expr> {
        let mut entries = Vec::new();
        loop {
            self.skip_breaks();
            if self.consume(TokenKind::RBrace) {
                break;
            }
            let key = match self.peek_kind() {
                TokenKind::Ident | TokenKind::Str => self.advance().lexeme,
                _ => return Err(self.unexpected("an object key")),
            };
            self.expect(TokenKind::Colon, "':'")?;
            let value = self.parse_expr()?;
            entries.push((key, value));
            if !self.consume(TokenKind::Comma) {
                self.skip_breaks();
                self.expect(TokenKind::RBrace, "'}' or ','")?;
                break;
            }
        }
        Ok(Expr::Object(entries))
    }
}

fn extend_access(expr: Expr, subscript: Subscript) -> Expr {
    match expr {
        Expr::Access { base, mut path } => {
            path.push(subscript);
            Expr::Access { base, path }
        }
        other => Expr::Access {
            base: Box::new(other),
            path: vec![subscript],
        },
    }
}

/// `$0`, `$1`, ... shorthand closure parameters.
fn shorthand_param(name: &str) -> Option<u32> {
    let digits = name.strip_prefix('$')?;
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

fn parse_int(lexeme: &str) -> Result<i64> {
    lexeme
        .parse()
        .map_err(|_| Error::compile(format!("integer literal '{}' is out of range", lexeme)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(source: &str) -> Stmt {
        let program = parse(source).unwrap();
        assert_eq!(program.body.len(), 1, "expected one statement");
        program.body.into_iter().next().unwrap()
    }

    #[test]
    fn test_precedence_mul_binds_tighter_than_add() {
        let stmt = parse_one("say 1 + 2 * 3");
        let Stmt::Action { value, .. } = stmt else {
            panic!("expected action");
        };
        let Expr::Binary { op, rhs, .. } = value else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOp::Add);
        assert!(matches!(
            *rhs,
            Expr::Binary {
                op: BinaryOp::Mul,
                ..
            }
        ));
    }

    #[test]
    fn test_assignment_converts_to_pattern() {
        let stmt = parse_one("[a, b] = pair");
        assert!(matches!(
            stmt,
            Stmt::Assign {
                target: Pattern::List(_),
                ..
            }
        ));
    }

    #[test]
    fn test_compound_assignment() {
        let stmt = parse_one("x += 2");
        assert!(matches!(
            stmt,
            Stmt::Compound {
                op: AssignOp::Add,
                ..
            }
        ));
    }

    #[test]
    fn test_slices() {
        let stmt = parse_one("a[1:2]");
        let Stmt::Expr(Expr::Access { path, .. }) = stmt else {
            panic!("expected access");
        };
        assert!(matches!(
            path[0],
            Subscript::Slice {
                begin: Some(_),
                end: Some(_)
            }
        ));
        let stmt = parse_one("a[1:]");
        let Stmt::Expr(Expr::Access { path, .. }) = stmt else {
            panic!();
        };
        assert!(matches!(
            path[0],
            Subscript::Slice {
                begin: Some(_),
                end: None
            }
        ));
        let stmt = parse_one("a[:2]");
        let Stmt::Expr(Expr::Access { path, .. }) = stmt else {
            panic!();
        };
        assert!(matches!(
            path[0],
            Subscript::Slice {
                begin: None,
                end: Some(_)
            }
        ));
    }

    #[test]
    fn test_member_chain_collects_into_one_access() {
        let stmt = parse_one("a.b[3].c");
        let Stmt::Expr(Expr::Access { base, path }) = stmt else {
            panic!();
        };
        assert_eq!(*base, Expr::Ident("a".to_string()));
        assert_eq!(path.len(), 3);
    }

    #[test]
    fn test_empty_braces_are_an_object() {
        let stmt = parse_one("x = {}");
        let Stmt::Assign { value, .. } = stmt else {
            panic!();
        };
        assert_eq!(value, Expr::Object(Vec::new()));
    }

    #[test]
    fn test_object_literal() {
        let stmt = parse_one("x = { a: 1, b: \"two\" }");
        let Stmt::Assign { value, .. } = stmt else {
            panic!();
        };
        let Expr::Object(entries) = value else {
            panic!("expected object, got {:?}", value);
        };
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "a");
    }

    #[test]
    fn test_arrow_closure() {
        let stmt = parse_one("f = { a, b -> a + b }");
        let Stmt::Assign { value, .. } = stmt else {
            panic!();
        };
        let Expr::Closure { params, body } = value else {
            panic!("expected closure, got {:?}", value);
        };
        assert_eq!(params, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(body.len(), 1);
    }

    #[test]
    fn test_shorthand_closure() {
        let stmt = parse_one("f = { $0 * $0 }");
        let Stmt::Assign { value, .. } = stmt else {
            panic!();
        };
        let Expr::Closure { params, body } = value else {
            panic!("expected closure, got {:?}", value);
        };
        assert!(params.is_empty());
        assert!(matches!(
            body[0],
            Stmt::Expr(Expr::Binary {
                op: BinaryOp::Mul,
                ..
            })
        ));
    }

    #[test]
    fn test_statement_brace_is_a_block() {
        let program = parse("{ say 1\n say 2 }").unwrap();
        assert!(matches!(&program.body[0], Stmt::Block(stmts) if stmts.len() == 2));
    }

    #[test]
    fn test_func_declaration_and_anonymous() {
        let stmt = parse_one("func add(a, b) { return a + b }");
        let Stmt::Func { name, params, body } = stmt else {
            panic!();
        };
        assert_eq!(name, "add");
        assert_eq!(params.len(), 2);
        assert_eq!(body.len(), 1);

        let stmt = parse_one("g = func(x) return x");
        assert!(matches!(
            stmt,
            Stmt::Assign {
                value: Expr::Closure { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_if_else_across_lines() {
        let program = parse("if x {\n say 1\n}\nelse {\n say 2\n}").unwrap();
        let Stmt::If { else_branch, .. } = &program.body[0] else {
            panic!();
        };
        assert!(else_branch.is_some());
    }

    #[test]
    fn test_chained_calls_and_methods() {
        let stmt = parse_one("say range(1, 5).map({ $0 * $0 }).reduce(0, { $0 + $1 })");
        let Stmt::Action { value, .. } = stmt else {
            panic!();
        };
        // Outermost is the reduce call.
        let Expr::Call { callee, args } = value else {
            panic!();
        };
        assert_eq!(args.len(), 2);
        assert!(matches!(*callee, Expr::Access { .. }));
    }

    #[test]
    fn test_for_with_list_pattern() {
        let stmt = parse_one("for [k, v] in pairs say k");
        let Stmt::For { pattern, .. } = stmt else {
            panic!();
        };
        assert!(matches!(pattern, Pattern::List(ref items) if items.len() == 2));
    }

    #[test]
    fn test_unexpected_token_reports_expected_and_found() {
        let err = parse("say )").unwrap_err();
        match err {
            Error::Parse {
                expected, found, ..
            } => {
                assert_eq!(expected, "an expression");
                assert_eq!(found, "')'");
            }
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_in_operator() {
        let stmt = parse_one("say 3 in [1, 2, 3]");
        let Stmt::Action { value, .. } = stmt else {
            panic!();
        };
        assert!(matches!(
            value,
            Expr::Binary {
                op: BinaryOp::In,
                ..
            }
        ));
    }
}
