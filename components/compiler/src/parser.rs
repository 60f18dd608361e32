//! Recursive-descent parser.
//!
//! Produces the AST the compiler lowers. TypeScript type annotations,
//! `interface`, and `type` declarations are parsed and erased. Constructs the
//! engine deliberately does not execute (classes, generators, `for..in`/
//! `for..of`, private identifiers) are rejected here with a diagnostic
//! rather than guessed at.
//!
//! The parser backtracks only through lexer state snapshots, which is how
//! arrow-function parameter lists are disambiguated from parenthesized
//! expressions.

use crate::ast::*;
use crate::lexer::{Lexer, LexerState, Token, TokenKind};
use core_types::{codes, Diagnostic, DiagnosticKind, Span};

/// A parsed module: the program plus the declarations the loader scans.
#[derive(Debug, Clone)]
pub struct ParsedModule {
    /// The full program.
    pub program: Program,
    /// Import declarations in source order.
    pub imports: Vec<ImportDecl>,
    /// Exported names (`default` for the default export).
    pub exports: Vec<String>,
}

/// Parses a script or expression input.
pub fn parse_program(source: &str) -> Result<Program, Diagnostic> {
    Parser::new(source)?.parse()
}

/// Parses module source and scans its import/export declarations.
pub fn parse_module(source: &str) -> Result<ParsedModule, Diagnostic> {
    let program = parse_program(source)?;
    let mut imports = Vec::new();
    let mut exports = Vec::new();
    for stmt in &program.body {
        match &stmt.kind {
            StmtKind::Import(decl) => imports.push(decl.clone()),
            StmtKind::Export(decl) => match decl {
                ExportDecl::Decl(inner) => match &inner.kind {
                    StmtKind::VarDecl { declarators, .. } => {
                        exports.extend(declarators.iter().map(|d| d.name.clone()));
                    }
                    StmtKind::FuncDecl(func) => {
                        if let Some(name) = &func.name {
                            exports.push(name.clone());
                        }
                    }
                    _ => {}
                },
                ExportDecl::List(names) => {
                    exports.extend(names.iter().map(|(_, alias)| alias.clone()));
                }
                ExportDecl::Default(_) => exports.push("default".to_string()),
            },
            _ => {}
        }
    }
    Ok(ParsedModule {
        program,
        imports,
        exports,
    })
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
}

type PResult<T> = Result<T, Diagnostic>;

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> PResult<Self> {
        let mut lexer = Lexer::new(source);
        let current = lexer.next_token()?;
        Ok(Self { lexer, current })
    }

    fn save(&self) -> (LexerState, Token) {
        (self.lexer.save_state(), self.current.clone())
    }

    fn restore(&mut self, saved: (LexerState, Token)) {
        self.lexer.restore_state(saved.0);
        self.current = saved.1;
    }

    fn advance(&mut self) -> PResult<Token> {
        let next = self.lexer.next_token()?;
        Ok(std::mem::replace(&mut self.current, next))
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.current.kind == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> PResult<bool> {
        if self.check(kind) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> PResult<Token> {
        if self.check(kind) {
            self.advance()
        } else {
            Err(self.unexpected(what))
        }
    }

    fn unexpected(&self, what: &str) -> Diagnostic {
        let code = if self.current.kind == TokenKind::Eof {
            codes::SYNTAX_UNEXPECTED_EOF
        } else {
            codes::SYNTAX_UNEXPECTED_TOKEN
        };
        Diagnostic::error(
            code,
            DiagnosticKind::Syntax,
            format!("expected {}, found {:?}", what, self.current.kind),
        )
        .with_span(self.current.span)
    }

    fn unsupported(&self, what: &str) -> Diagnostic {
        Diagnostic::error(
            codes::COMPILE_UNSUPPORTED,
            DiagnosticKind::Compile,
            format!("{} is not supported", what),
        )
        .with_span(self.current.span)
    }

    fn ident_name(&mut self) -> PResult<String> {
        match &self.current.kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance()?;
                Ok(name)
            }
            TokenKind::Default => {
                self.advance()?;
                Ok("default".to_string())
            }
            _ => Err(self.unexpected("an identifier")),
        }
    }

    fn line(&self) -> u32 {
        self.current.span.line
    }

    fn parse(&mut self) -> PResult<Program> {
        let mut body = Vec::new();
        while !self.check(&TokenKind::Eof) {
            if let Some(stmt) = self.statement()? {
                body.push(stmt);
            }
        }
        Ok(Program { body })
    }

    // Statements -----------------------------------------------------------

    /// Parses one statement. Returns `None` for erased type-level
    /// declarations (`interface`, `type`).
    fn statement(&mut self) -> PResult<Option<Stmt>> {
        let line = self.line();
        let span = self.current.span;
        let make = |kind: StmtKind| Stmt { kind, line, span };

        match &self.current.kind {
            TokenKind::Semicolon => {
                self.advance()?;
                Ok(Some(make(StmtKind::Empty)))
            }
            TokenKind::Let | TokenKind::Const | TokenKind::Var => {
                let kind = self.var_decl()?;
                self.eat(&TokenKind::Semicolon)?;
                Ok(Some(make(kind)))
            }
            TokenKind::Function => {
                let func = self.function(false)?;
                Ok(Some(make(StmtKind::FuncDecl(func))))
            }
            TokenKind::Ident(name) if name == "async" => {
                let saved = self.save();
                self.advance()?;
                if self.check(&TokenKind::Function) {
                    let func = self.function(true)?;
                    Ok(Some(make(StmtKind::FuncDecl(func))))
                } else {
                    self.restore(saved);
                    self.expr_statement().map(Some)
                }
            }
            TokenKind::Return => {
                self.advance()?;
                let arg = if self.check(&TokenKind::Semicolon)
                    || self.check(&TokenKind::RBrace)
                    || self.check(&TokenKind::Eof)
                {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.eat(&TokenKind::Semicolon)?;
                Ok(Some(make(StmtKind::Return(arg))))
            }
            TokenKind::If => {
                self.advance()?;
                self.expect(&TokenKind::LParen, "'('")?;
                let test = self.expression()?;
                self.expect(&TokenKind::RParen, "')'")?;
                let consequent = Box::new(self.required_statement()?);
                let alternate = if self.eat(&TokenKind::Else)? {
                    Some(Box::new(self.required_statement()?))
                } else {
                    None
                };
                Ok(Some(make(StmtKind::If {
                    test,
                    consequent,
                    alternate,
                })))
            }
            TokenKind::While => {
                self.advance()?;
                self.expect(&TokenKind::LParen, "'('")?;
                let test = self.expression()?;
                self.expect(&TokenKind::RParen, "')'")?;
                let body = Box::new(self.required_statement()?);
                Ok(Some(make(StmtKind::While { test, body })))
            }
            TokenKind::For => self.for_statement().map(Some),
            TokenKind::LBrace => {
                self.advance()?;
                let body = self.block_body()?;
                Ok(Some(make(StmtKind::Block(body))))
            }
            TokenKind::Throw => {
                self.advance()?;
                let value = self.expression()?;
                self.eat(&TokenKind::Semicolon)?;
                Ok(Some(make(StmtKind::Throw(value))))
            }
            TokenKind::Try => self.try_statement().map(Some),
            TokenKind::Break => {
                self.advance()?;
                self.eat(&TokenKind::Semicolon)?;
                Ok(Some(make(StmtKind::Break)))
            }
            TokenKind::Continue => {
                self.advance()?;
                self.eat(&TokenKind::Semicolon)?;
                Ok(Some(make(StmtKind::Continue)))
            }
            TokenKind::Import => {
                let decl = self.import_decl()?;
                Ok(Some(make(StmtKind::Import(decl))))
            }
            TokenKind::Export => {
                let decl = self.export_decl()?;
                Ok(Some(make(StmtKind::Export(decl))))
            }
            TokenKind::Interface => {
                // Type-level only: parse and erase (name, type params,
                // extends clause, body).
                self.advance()?;
                self.ident_name()?;
                while !self.check(&TokenKind::LBrace) {
                    if self.check(&TokenKind::Eof) {
                        return Err(self.unexpected("'{'"));
                    }
                    self.advance()?;
                }
                self.skip_balanced(&TokenKind::LBrace, &TokenKind::RBrace)?;
                Ok(None)
            }
            TokenKind::Ident(name) if name == "type" => {
                // `type X = …;` — erased. Backtrack when `type` is a plain
                // identifier expression instead.
                let saved = self.save();
                self.advance()?;
                if matches!(self.current.kind, TokenKind::Ident(_)) {
                    self.ident_name()?;
                    if self.eat(&TokenKind::Lt)? {
                        self.skip_angle_depth(1)?;
                    }
                    self.expect(&TokenKind::Assign, "'='")?;
                    self.skip_type()?;
                    self.eat(&TokenKind::Semicolon)?;
                    Ok(None)
                } else {
                    self.restore(saved);
                    self.expr_statement().map(Some)
                }
            }
            TokenKind::Class => Err(self.unsupported("class declaration")),
            TokenKind::PrivateIdent(_) => Err(self.unsupported("private identifier")),
            _ => self.expr_statement().map(Some),
        }
    }

    fn required_statement(&mut self) -> PResult<Stmt> {
        self.statement()?.ok_or_else(|| self.unexpected("a statement"))
    }

    fn expr_statement(&mut self) -> PResult<Stmt> {
        let line = self.line();
        let span = self.current.span;
        let expr = self.expression()?;
        self.eat(&TokenKind::Semicolon)?;
        Ok(Stmt {
            kind: StmtKind::ExprStmt(expr),
            line,
            span,
        })
    }

    fn var_decl(&mut self) -> PResult<StmtKind> {
        let kind = match self.current.kind {
            TokenKind::Let => VarKind::Let,
            TokenKind::Const => VarKind::Const,
            TokenKind::Var => VarKind::Var,
            _ => return Err(self.unexpected("a declaration keyword")),
        };
        self.advance()?;
        let mut declarators = Vec::new();
        loop {
            let name = self.ident_name()?;
            self.skip_optional_annotation()?;
            let init = if self.eat(&TokenKind::Assign)? {
                Some(self.assignment()?)
            } else {
                None
            };
            declarators.push(Declarator { name, init });
            if !self.eat(&TokenKind::Comma)? {
                break;
            }
        }
        Ok(StmtKind::VarDecl { kind, declarators })
    }

    fn for_statement(&mut self) -> PResult<Stmt> {
        let line = self.line();
        let span = self.current.span;
        self.advance()?;
        self.expect(&TokenKind::LParen, "'('")?;

        // Reject for..in / for..of up front.
        let probe = self.save();
        let mut depth = 0usize;
        loop {
            match &self.current.kind {
                TokenKind::In | TokenKind::Of if depth == 0 => {
                    let err = self.unsupported("for..in / for..of");
                    self.restore(probe);
                    return Err(err);
                }
                TokenKind::Semicolon | TokenKind::Eof if depth == 0 => break,
                TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace => {
                    depth += 1;
                    self.advance()?;
                }
                TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                    self.advance()?;
                }
                _ => {
                    self.advance()?;
                }
            }
        }
        self.restore(probe);

        let init = if self.check(&TokenKind::Semicolon) {
            self.advance()?;
            None
        } else if matches!(
            self.current.kind,
            TokenKind::Let | TokenKind::Const | TokenKind::Var
        ) {
            let decl_line = self.line();
            let decl_span = self.current.span;
            let kind = self.var_decl()?;
            self.expect(&TokenKind::Semicolon, "';'")?;
            Some(Box::new(Stmt {
                kind,
                line: decl_line,
                span: decl_span,
            }))
        } else {
            let stmt = Stmt {
                kind: StmtKind::ExprStmt(self.expression()?),
                line: self.line(),
                span: self.current.span,
            };
            self.expect(&TokenKind::Semicolon, "';'")?;
            Some(Box::new(stmt))
        };

        let test = if self.check(&TokenKind::Semicolon) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect(&TokenKind::Semicolon, "';'")?;

        let update = if self.check(&TokenKind::RParen) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect(&TokenKind::RParen, "')'")?;
        let body = Box::new(self.required_statement()?);
        Ok(Stmt {
            kind: StmtKind::For {
                init,
                test,
                update,
                body,
            },
            line,
            span,
        })
    }

    fn try_statement(&mut self) -> PResult<Stmt> {
        let line = self.line();
        let span = self.current.span;
        self.advance()?;
        self.expect(&TokenKind::LBrace, "'{'")?;
        let block = self.block_body()?;

        let mut catch_param = None;
        let mut catch = None;
        if self.eat(&TokenKind::Catch)? {
            if self.eat(&TokenKind::LParen)? {
                catch_param = Some(self.ident_name()?);
                self.skip_optional_annotation()?;
                self.expect(&TokenKind::RParen, "')'")?;
            }
            self.expect(&TokenKind::LBrace, "'{'")?;
            catch = Some(self.block_body()?);
        }
        let finally = if self.eat(&TokenKind::Finally)? {
            self.expect(&TokenKind::LBrace, "'{'")?;
            Some(self.block_body()?)
        } else {
            None
        };
        if catch.is_none() && finally.is_none() {
            return Err(self.unexpected("'catch' or 'finally'"));
        }
        Ok(Stmt {
            kind: StmtKind::Try {
                block,
                catch_param,
                catch,
                finally,
            },
            line,
            span,
        })
    }

    fn block_body(&mut self) -> PResult<Vec<Stmt>> {
        let mut body = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            if self.check(&TokenKind::Eof) {
                return Err(self.unexpected("'}'"));
            }
            if let Some(stmt) = self.statement()? {
                body.push(stmt);
            }
        }
        self.advance()?;
        Ok(body)
    }

    // Modules --------------------------------------------------------------

    fn import_decl(&mut self) -> PResult<ImportDecl> {
        self.advance()?;
        let mut default = None;
        let mut named = Vec::new();

        if let TokenKind::Str(specifier) = &self.current.kind {
            // Side-effect import: `import "./mod";`
            let specifier = specifier.clone();
            self.advance()?;
            let attributes = self.import_attributes()?;
            self.eat(&TokenKind::Semicolon)?;
            return Ok(ImportDecl {
                specifier,
                default,
                named,
                attributes,
            });
        }

        if self.check(&TokenKind::Star) {
            return Err(self.unsupported("namespace import"));
        }
        if matches!(self.current.kind, TokenKind::Ident(_)) {
            default = Some(self.ident_name()?);
            if self.eat(&TokenKind::Comma)? && !self.check(&TokenKind::LBrace) {
                return Err(self.unexpected("'{'"));
            }
        }
        if self.eat(&TokenKind::LBrace)? {
            while !self.check(&TokenKind::RBrace) {
                let imported = self.ident_name()?;
                let local = if self.eat_contextual("as")? {
                    self.ident_name()?
                } else {
                    imported.clone()
                };
                named.push((imported, local));
                if !self.eat(&TokenKind::Comma)? {
                    break;
                }
            }
            self.expect(&TokenKind::RBrace, "'}'")?;
        }

        if !self.eat_contextual("from")? {
            return Err(self.unexpected("'from'"));
        }
        let specifier = match &self.current.kind {
            TokenKind::Str(s) => {
                let s = s.clone();
                self.advance()?;
                s
            }
            _ => return Err(self.unexpected("a module specifier string")),
        };
        let attributes = self.import_attributes()?;
        self.eat(&TokenKind::Semicolon)?;
        Ok(ImportDecl {
            specifier,
            default,
            named,
            attributes,
        })
    }

    fn import_attributes(&mut self) -> PResult<Vec<(String, String)>> {
        if !self.eat_contextual("with")? && !self.eat_contextual("assert")? {
            return Ok(Vec::new());
        }
        self.expect(&TokenKind::LBrace, "'{'")?;
        let mut attributes = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            let key = match &self.current.kind {
                TokenKind::Ident(k) => k.clone(),
                TokenKind::Str(k) => k.clone(),
                _ => return Err(self.unexpected("an attribute key")),
            };
            self.advance()?;
            self.expect(&TokenKind::Colon, "':'")?;
            let value = match &self.current.kind {
                TokenKind::Str(v) => v.clone(),
                _ => return Err(self.unexpected("an attribute value string")),
            };
            self.advance()?;
            attributes.push((key, value));
            if !self.eat(&TokenKind::Comma)? {
                break;
            }
        }
        self.expect(&TokenKind::RBrace, "'}'")?;
        Ok(attributes)
    }

    fn export_decl(&mut self) -> PResult<ExportDecl> {
        self.advance()?;
        if self.eat(&TokenKind::Default)? {
            let value = self.assignment()?;
            self.eat(&TokenKind::Semicolon)?;
            return Ok(ExportDecl::Default(value));
        }
        if self.eat(&TokenKind::LBrace)? {
            let mut names = Vec::new();
            while !self.check(&TokenKind::RBrace) {
                let local = self.ident_name()?;
                let exported = if self.eat_contextual("as")? {
                    self.ident_name()?
                } else {
                    local.clone()
                };
                names.push((local, exported));
                if !self.eat(&TokenKind::Comma)? {
                    break;
                }
            }
            self.expect(&TokenKind::RBrace, "'}'")?;
            self.eat(&TokenKind::Semicolon)?;
            return Ok(ExportDecl::List(names));
        }
        let inner = self.required_statement()?;
        match inner.kind {
            StmtKind::VarDecl { .. } | StmtKind::FuncDecl(_) => {
                Ok(ExportDecl::Decl(Box::new(inner)))
            }
            _ => Err(Diagnostic::error(
                codes::SYNTAX_UNEXPECTED_TOKEN,
                DiagnosticKind::Syntax,
                "only declarations can follow 'export'",
            )
            .with_span(inner.span)),
        }
    }

    fn eat_contextual(&mut self, word: &str) -> PResult<bool> {
        if let TokenKind::Ident(name) = &self.current.kind {
            if name == word {
                self.advance()?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    // Functions ------------------------------------------------------------

    fn function(&mut self, is_async: bool) -> PResult<Function> {
        let line = self.line();
        self.expect(&TokenKind::Function, "'function'")?;
        if self.check(&TokenKind::Star) {
            return Err(self.unsupported("generator function"));
        }
        let name = if matches!(self.current.kind, TokenKind::Ident(_)) {
            Some(self.ident_name()?)
        } else {
            None
        };
        let params = self.param_list()?;
        self.skip_optional_annotation()?;
        self.expect(&TokenKind::LBrace, "'{'")?;
        let body = self.block_body()?;
        Ok(Function {
            name,
            params,
            body,
            is_async,
            is_arrow: false,
            line,
        })
    }

    fn param_list(&mut self) -> PResult<Vec<Param>> {
        self.expect(&TokenKind::LParen, "'('")?;
        let mut params = Vec::new();
        while !self.check(&TokenKind::RParen) {
            let rest = self.eat(&TokenKind::Ellipsis)?;
            let name = self.ident_name()?;
            self.eat(&TokenKind::Question)?;
            self.skip_optional_annotation()?;
            if self.eat(&TokenKind::Assign)? {
                return Err(self.unsupported("default parameter value"));
            }
            params.push(Param { name, rest });
            if rest {
                break;
            }
            if !self.eat(&TokenKind::Comma)? {
                break;
            }
        }
        self.expect(&TokenKind::RParen, "')'")?;
        Ok(params)
    }

    // Type erasure ---------------------------------------------------------

    fn skip_optional_annotation(&mut self) -> PResult<()> {
        if self.eat(&TokenKind::Colon)? {
            self.skip_type()?;
        }
        Ok(())
    }

    /// Skips one type expression (unions included).
    fn skip_type(&mut self) -> PResult<()> {
        loop {
            self.skip_type_term()?;
            if self.check(&TokenKind::Pipe) || self.check(&TokenKind::Amp) {
                self.advance()?;
                continue;
            }
            return Ok(());
        }
    }

    fn skip_type_term(&mut self) -> PResult<()> {
        match &self.current.kind {
            TokenKind::Ident(_)
            | TokenKind::Undefined
            | TokenKind::Null
            | TokenKind::TypeOf
            | TokenKind::True
            | TokenKind::False => {
                self.advance()?;
                // Dotted path
                while self.eat(&TokenKind::Dot)? {
                    self.ident_name()?;
                }
            }
            TokenKind::Str(_) | TokenKind::Number(_) => {
                self.advance()?;
            }
            TokenKind::LBrace => {
                self.skip_balanced(&TokenKind::LBrace, &TokenKind::RBrace)?;
            }
            TokenKind::LParen => {
                self.skip_balanced(&TokenKind::LParen, &TokenKind::RParen)?;
                if self.eat(&TokenKind::Arrow)? {
                    self.skip_type()?;
                }
            }
            TokenKind::LBracket => {
                self.skip_balanced(&TokenKind::LBracket, &TokenKind::RBracket)?;
            }
            _ => return Err(self.unexpected("a type")),
        }
        // Suffixes: generic arguments and array brackets.
        loop {
            if self.check(&TokenKind::Lt) {
                self.advance()?;
                self.skip_angle_depth(1)?;
                continue;
            }
            if self.check(&TokenKind::LBracket) {
                self.skip_balanced(&TokenKind::LBracket, &TokenKind::RBracket)?;
                continue;
            }
            return Ok(());
        }
    }

    fn skip_balanced(&mut self, open: &TokenKind, close: &TokenKind) -> PResult<()> {
        self.expect(open, "an opening bracket")?;
        let mut depth = 1usize;
        while depth > 0 {
            if self.check(&TokenKind::Eof) {
                return Err(self.unexpected("a closing bracket"));
            }
            if self.check(open) {
                depth += 1;
            } else if self.check(close) {
                depth -= 1;
            }
            self.advance()?;
        }
        Ok(())
    }

    /// Skips generic arguments, handling `>>` and `>>>` closing several
    /// angle levels at once (`Map<string, Array<number>>`).
    fn skip_angle_depth(&mut self, mut depth: usize) -> PResult<()> {
        while depth > 0 {
            match self.current.kind {
                TokenKind::Lt => depth += 1,
                TokenKind::Gt => depth -= 1,
                TokenKind::Shl => depth += 2,
                TokenKind::Shr => depth = depth.saturating_sub(2),
                TokenKind::UShr => depth = depth.saturating_sub(3),
                TokenKind::Eof => return Err(self.unexpected("'>'")),
                _ => {}
            }
            self.advance()?;
        }
        Ok(())
    }

    // Expressions ----------------------------------------------------------

    fn expression(&mut self) -> PResult<Expr> {
        self.assignment()
    }

    fn assignment(&mut self) -> PResult<Expr> {
        let line = self.line();
        let lhs = self.ternary()?;
        let op = match self.current.kind {
            TokenKind::Assign => None,
            TokenKind::PlusAssign => Some(BinaryOp::Add),
            TokenKind::MinusAssign => Some(BinaryOp::Sub),
            TokenKind::StarAssign => Some(BinaryOp::Mul),
            TokenKind::SlashAssign => Some(BinaryOp::Div),
            TokenKind::PercentAssign => Some(BinaryOp::Rem),
            _ => return Ok(lhs),
        };
        let op_span = self.current.span;
        self.advance()?;
        let target = Self::as_assign_target(lhs).ok_or_else(|| {
            Diagnostic::error(
                codes::SYNTAX_UNEXPECTED_TOKEN,
                DiagnosticKind::Syntax,
                "invalid assignment target",
            )
            .with_span(op_span)
        })?;
        let value = Box::new(self.assignment()?);
        Ok(Expr {
            kind: ExprKind::Assign { target, op, value },
            line,
        })
    }

    fn as_assign_target(expr: Expr) -> Option<AssignTarget> {
        match expr.kind {
            ExprKind::Ident(name) => Some(AssignTarget::Ident(name)),
            ExprKind::Member { obj, prop } => Some(AssignTarget::Member { obj, prop }),
            ExprKind::Index { obj, index } => Some(AssignTarget::Index { obj, index }),
            _ => None,
        }
    }

    fn ternary(&mut self) -> PResult<Expr> {
        let line = self.line();
        let test = self.nullish()?;
        if !self.eat(&TokenKind::Question)? {
            return Ok(test);
        }
        let cons = self.assignment()?;
        self.expect(&TokenKind::Colon, "':'")?;
        let alt = self.assignment()?;
        Ok(Expr {
            kind: ExprKind::Cond {
                test: Box::new(test),
                cons: Box::new(cons),
                alt: Box::new(alt),
            },
            line,
        })
    }

    fn logical(
        &mut self,
        op: LogicalOp,
        token: TokenKind,
        next: fn(&mut Self) -> PResult<Expr>,
    ) -> PResult<Expr> {
        let line = self.line();
        let mut lhs = next(self)?;
        while self.check(&token) {
            self.advance()?;
            let rhs = next(self)?;
            lhs = Expr {
                kind: ExprKind::Logical {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                line,
            };
        }
        Ok(lhs)
    }

    fn nullish(&mut self) -> PResult<Expr> {
        self.logical(LogicalOp::Nullish, TokenKind::NullishOp, Self::or)
    }

    fn or(&mut self) -> PResult<Expr> {
        self.logical(LogicalOp::Or, TokenKind::OrOr, Self::and)
    }

    fn and(&mut self) -> PResult<Expr> {
        self.logical(LogicalOp::And, TokenKind::AndAnd, Self::bit_or)
    }

    fn binary_level(
        &mut self,
        table: &[(TokenKind, BinaryOp)],
        next: fn(&mut Self) -> PResult<Expr>,
    ) -> PResult<Expr> {
        let line = self.line();
        let mut lhs = next(self)?;
        'outer: loop {
            for (token, op) in table {
                if self.check(token) {
                    self.advance()?;
                    let rhs = next(self)?;
                    lhs = Expr {
                        kind: ExprKind::Binary {
                            op: *op,
                            lhs: Box::new(lhs),
                            rhs: Box::new(rhs),
                        },
                        line,
                    };
                    continue 'outer;
                }
            }
            return Ok(lhs);
        }
    }

    fn bit_or(&mut self) -> PResult<Expr> {
        self.binary_level(&[(TokenKind::Pipe, BinaryOp::BitOr)], Self::bit_xor)
    }

    fn bit_xor(&mut self) -> PResult<Expr> {
        self.binary_level(&[(TokenKind::Caret, BinaryOp::BitXor)], Self::bit_and)
    }

    fn bit_and(&mut self) -> PResult<Expr> {
        self.binary_level(&[(TokenKind::Amp, BinaryOp::BitAnd)], Self::equality)
    }

    fn equality(&mut self) -> PResult<Expr> {
        self.binary_level(
            &[
                (TokenKind::StrictEq, BinaryOp::StrictEq),
                (TokenKind::StrictNotEq, BinaryOp::StrictNe),
                (TokenKind::EqEq, BinaryOp::Eq),
                (TokenKind::NotEq, BinaryOp::Ne),
            ],
            Self::relational,
        )
    }

    fn relational(&mut self) -> PResult<Expr> {
        self.binary_level(
            &[
                (TokenKind::Le, BinaryOp::Le),
                (TokenKind::Ge, BinaryOp::Ge),
                (TokenKind::Lt, BinaryOp::Lt),
                (TokenKind::Gt, BinaryOp::Gt),
            ],
            Self::shift,
        )
    }

    fn shift(&mut self) -> PResult<Expr> {
        self.binary_level(
            &[
                (TokenKind::Shl, BinaryOp::Shl),
                (TokenKind::UShr, BinaryOp::UShr),
                (TokenKind::Shr, BinaryOp::Shr),
            ],
            Self::additive,
        )
    }

    fn additive(&mut self) -> PResult<Expr> {
        self.binary_level(
            &[
                (TokenKind::Plus, BinaryOp::Add),
                (TokenKind::Minus, BinaryOp::Sub),
            ],
            Self::multiplicative,
        )
    }

    fn multiplicative(&mut self) -> PResult<Expr> {
        self.binary_level(
            &[
                (TokenKind::Star, BinaryOp::Mul),
                (TokenKind::Slash, BinaryOp::Div),
                (TokenKind::Percent, BinaryOp::Rem),
            ],
            Self::exponent,
        )
    }

    fn exponent(&mut self) -> PResult<Expr> {
        let line = self.line();
        let base = self.unary()?;
        if self.eat(&TokenKind::StarStar)? {
            // Right-associative.
            let exp = self.exponent()?;
            return Ok(Expr {
                kind: ExprKind::Binary {
                    op: BinaryOp::Pow,
                    lhs: Box::new(base),
                    rhs: Box::new(exp),
                },
                line,
            });
        }
        Ok(base)
    }

    fn unary(&mut self) -> PResult<Expr> {
        let line = self.line();
        let unary_op = match self.current.kind {
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Plus => Some(UnaryOp::Plus),
            TokenKind::Not => Some(UnaryOp::Not),
            TokenKind::Tilde => Some(UnaryOp::BitNot),
            TokenKind::TypeOf => Some(UnaryOp::TypeOf),
            _ => None,
        };
        if let Some(op) = unary_op {
            self.advance()?;
            let expr = Box::new(self.unary()?);
            return Ok(Expr {
                kind: ExprKind::Unary { op, expr },
                line,
            });
        }
        match self.current.kind {
            TokenKind::Await => {
                self.advance()?;
                let expr = Box::new(self.unary()?);
                Ok(Expr {
                    kind: ExprKind::Await(expr),
                    line,
                })
            }
            TokenKind::Delete => {
                self.advance()?;
                let expr = Box::new(self.unary()?);
                Ok(Expr {
                    kind: ExprKind::Delete(expr),
                    line,
                })
            }
            TokenKind::New => {
                self.advance()?;
                let callee = self.primary()?;
                let callee = self.member_chain(callee, false)?;
                let args = if self.check(&TokenKind::LParen) {
                    self.arg_list()?
                } else {
                    Vec::new()
                };
                let new_expr = Expr {
                    kind: ExprKind::New {
                        callee: Box::new(callee),
                        args,
                    },
                    line,
                };
                self.member_chain(new_expr, true)
            }
            TokenKind::PlusPlus | TokenKind::MinusMinus => {
                let inc = self.current.kind == TokenKind::PlusPlus;
                self.advance()?;
                let target_expr = self.unary()?;
                let target = Self::as_assign_target(target_expr).ok_or_else(|| {
                    Diagnostic::error(
                        codes::SYNTAX_UNEXPECTED_TOKEN,
                        DiagnosticKind::Syntax,
                        "invalid increment target",
                    )
                    .with_span(self.current.span)
                })?;
                Ok(Expr {
                    kind: ExprKind::Update {
                        target,
                        inc,
                        prefix: true,
                    },
                    line,
                })
            }
            _ => self.postfix(),
        }
    }

    fn postfix(&mut self) -> PResult<Expr> {
        let line = self.line();
        let primary = self.primary()?;
        let mut expr = self.member_chain(primary, true)?;
        if matches!(
            self.current.kind,
            TokenKind::PlusPlus | TokenKind::MinusMinus
        ) {
            let inc = self.current.kind == TokenKind::PlusPlus;
            let span = self.current.span;
            self.advance()?;
            let target = Self::as_assign_target(expr).ok_or_else(|| {
                Diagnostic::error(
                    codes::SYNTAX_UNEXPECTED_TOKEN,
                    DiagnosticKind::Syntax,
                    "invalid increment target",
                )
                .with_span(span)
            })?;
            expr = Expr {
                kind: ExprKind::Update {
                    target,
                    inc,
                    prefix: false,
                },
                line,
            };
        }
        Ok(expr)
    }

    /// Parses `.prop`, `[index]`, and (when `calls` is set) `(args)` chains.
    fn member_chain(&mut self, mut expr: Expr, calls: bool) -> PResult<Expr> {
        loop {
            let line = self.line();
            if self.eat(&TokenKind::Dot)? {
                if matches!(self.current.kind, TokenKind::PrivateIdent(_)) {
                    return Err(self.unsupported("private identifier"));
                }
                let prop = self.property_name()?;
                expr = Expr {
                    kind: ExprKind::Member {
                        obj: Box::new(expr),
                        prop,
                    },
                    line,
                };
                continue;
            }
            if self.check(&TokenKind::LBracket) {
                self.advance()?;
                let index = self.expression()?;
                self.expect(&TokenKind::RBracket, "']'")?;
                expr = Expr {
                    kind: ExprKind::Index {
                        obj: Box::new(expr),
                        index: Box::new(index),
                    },
                    line,
                };
                continue;
            }
            if calls && self.check(&TokenKind::LParen) {
                let args = self.arg_list()?;
                expr = Expr {
                    kind: ExprKind::Call {
                        callee: Box::new(expr),
                        args,
                    },
                    line,
                };
                continue;
            }
            return Ok(expr);
        }
    }

    fn property_name(&mut self) -> PResult<String> {
        match &self.current.kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance()?;
                Ok(name)
            }
            // Keywords are fine as property names.
            TokenKind::Default => {
                self.advance()?;
                Ok("default".into())
            }
            TokenKind::Catch => {
                self.advance()?;
                Ok("catch".into())
            }
            TokenKind::Finally => {
                self.advance()?;
                Ok("finally".into())
            }
            TokenKind::Delete => {
                self.advance()?;
                Ok("delete".into())
            }
            TokenKind::New => {
                self.advance()?;
                Ok("new".into())
            }
            TokenKind::Of => {
                self.advance()?;
                Ok("of".into())
            }
            TokenKind::In => {
                self.advance()?;
                Ok("in".into())
            }
            _ => Err(self.unexpected("a property name")),
        }
    }

    fn arg_list(&mut self) -> PResult<Vec<Expr>> {
        self.expect(&TokenKind::LParen, "'('")?;
        let mut args = Vec::new();
        while !self.check(&TokenKind::RParen) {
            args.push(self.assignment()?);
            if !self.eat(&TokenKind::Comma)? {
                break;
            }
        }
        self.expect(&TokenKind::RParen, "')'")?;
        Ok(args)
    }

    fn primary(&mut self) -> PResult<Expr> {
        let line = self.line();
        let make = |kind: ExprKind| Expr { kind, line };
        match &self.current.kind {
            TokenKind::Number(n) => {
                let n = *n;
                self.advance()?;
                Ok(make(ExprKind::Number(n)))
            }
            TokenKind::BigInt(digits) => {
                let digits = digits.clone();
                self.advance()?;
                Ok(make(ExprKind::BigInt(digits)))
            }
            TokenKind::Str(s) => {
                let s = s.clone();
                self.advance()?;
                Ok(make(ExprKind::String(s)))
            }
            TokenKind::True => {
                self.advance()?;
                Ok(make(ExprKind::Bool(true)))
            }
            TokenKind::False => {
                self.advance()?;
                Ok(make(ExprKind::Bool(false)))
            }
            TokenKind::Null => {
                self.advance()?;
                Ok(make(ExprKind::Null))
            }
            TokenKind::Undefined => {
                self.advance()?;
                Ok(make(ExprKind::Undefined))
            }
            TokenKind::This => {
                self.advance()?;
                Ok(make(ExprKind::This))
            }
            TokenKind::Function => {
                let func = self.function(false)?;
                Ok(make(ExprKind::Func(func)))
            }
            TokenKind::Ident(name) if name == "async" => {
                let saved = self.save();
                self.advance()?;
                if self.check(&TokenKind::Function) {
                    let func = self.function(true)?;
                    return Ok(make(ExprKind::Func(func)));
                }
                if let Some(func) = self.try_arrow(true, line)? {
                    return Ok(make(ExprKind::Func(func)));
                }
                self.restore(saved);
                let name = self.ident_name()?;
                Ok(make(ExprKind::Ident(name)))
            }
            TokenKind::Ident(_) => {
                if let Some(func) = self.try_arrow(false, line)? {
                    return Ok(make(ExprKind::Func(func)));
                }
                let name = self.ident_name()?;
                Ok(make(ExprKind::Ident(name)))
            }
            TokenKind::LParen => {
                if let Some(func) = self.try_arrow(false, line)? {
                    return Ok(make(ExprKind::Func(func)));
                }
                self.advance()?;
                let expr = self.expression()?;
                self.expect(&TokenKind::RParen, "')'")?;
                Ok(expr)
            }
            TokenKind::LBracket => {
                self.advance()?;
                let mut items = Vec::new();
                while !self.check(&TokenKind::RBracket) {
                    items.push(self.assignment()?);
                    if !self.eat(&TokenKind::Comma)? {
                        break;
                    }
                }
                self.expect(&TokenKind::RBracket, "']'")?;
                Ok(make(ExprKind::Array(items)))
            }
            TokenKind::LBrace => {
                self.advance()?;
                let props = self.object_literal()?;
                Ok(make(ExprKind::Object(props)))
            }
            TokenKind::Class => Err(self.unsupported("class expression")),
            TokenKind::PrivateIdent(_) => Err(self.unsupported("private identifier")),
            _ => Err(self.unexpected("an expression")),
        }
    }

    /// Attempts to parse an arrow function starting at the current token;
    /// restores the parser and returns `None` when it is not one.
    fn try_arrow(&mut self, is_async: bool, line: u32) -> PResult<Option<Function>> {
        let saved = self.save();
        let params = if matches!(self.current.kind, TokenKind::Ident(_)) {
            // Single-parameter shorthand: `x => …`
            let name = match self.ident_name() {
                Ok(n) => n,
                Err(_) => {
                    self.restore(saved);
                    return Ok(None);
                }
            };
            vec![Param { name, rest: false }]
        } else if self.check(&TokenKind::LParen) {
            match self.param_list() {
                Ok(params) => params,
                Err(_) => {
                    self.restore(saved);
                    return Ok(None);
                }
            }
        } else {
            self.restore(saved);
            return Ok(None);
        };
        // Optional return type annotation before `=>`.
        if self.check(&TokenKind::Colon) {
            let before_annotation = self.save();
            self.advance()?;
            if self.skip_type().is_err() {
                self.restore(before_annotation);
            }
        }
        if !self.check(&TokenKind::Arrow) {
            self.restore(saved);
            return Ok(None);
        }
        self.advance()?;
        let body = if self.eat(&TokenKind::LBrace)? {
            self.block_body()?
        } else {
            let value = self.assignment()?;
            let value_line = value.line;
            vec![Stmt {
                kind: StmtKind::Return(Some(value)),
                line: value_line,
                span: Span::default(),
            }]
        };
        Ok(Some(Function {
            name: None,
            params,
            body,
            is_async,
            is_arrow: true,
            line,
        }))
    }

    fn object_literal(&mut self) -> PResult<Vec<ObjProp>> {
        let mut props = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            // Accessors: `get key() { … }` / `set key(v) { … }`.
            let accessor = match &self.current.kind {
                TokenKind::Ident(word) if word == "get" || word == "set" => {
                    let is_getter = word == "get";
                    let saved = self.save();
                    self.advance()?;
                    let follows_key = matches!(
                        self.current.kind,
                        TokenKind::Ident(_) | TokenKind::Str(_)
                    );
                    self.restore(saved);
                    follows_key.then_some(is_getter)
                }
                _ => None,
            };
            if let Some(is_getter) = accessor {
                self.advance()?;
                let key = self.object_key()?;
                let line = self.line();
                let params = self.param_list()?;
                self.skip_optional_annotation()?;
                self.expect(&TokenKind::LBrace, "'{'")?;
                let body = self.block_body()?;
                let func = Function {
                    name: Some(key.clone()),
                    params,
                    body,
                    is_async: false,
                    is_arrow: false,
                    line,
                };
                props.push(ObjProp {
                    key,
                    value: if is_getter {
                        ObjPropValue::Getter(func)
                    } else {
                        ObjPropValue::Setter(func)
                    },
                });
                if !self.eat(&TokenKind::Comma)? {
                    break;
                }
                continue;
            }

            let key = self.object_key()?;
            let line = self.line();
            if self.check(&TokenKind::LParen) {
                // Method shorthand.
                let params = self.param_list()?;
                self.skip_optional_annotation()?;
                self.expect(&TokenKind::LBrace, "'{'")?;
                let body = self.block_body()?;
                props.push(ObjProp {
                    key: key.clone(),
                    value: ObjPropValue::Value(Expr {
                        kind: ExprKind::Func(Function {
                            name: Some(key),
                            params,
                            body,
                            is_async: false,
                            is_arrow: false,
                            line,
                        }),
                        line,
                    }),
                });
            } else if self.eat(&TokenKind::Colon)? {
                let value = self.assignment()?;
                props.push(ObjProp {
                    key,
                    value: ObjPropValue::Value(value),
                });
            } else {
                // Shorthand `{ key }`.
                props.push(ObjProp {
                    key: key.clone(),
                    value: ObjPropValue::Value(Expr {
                        kind: ExprKind::Ident(key),
                        line,
                    }),
                });
            }
            if !self.eat(&TokenKind::Comma)? {
                break;
            }
        }
        self.expect(&TokenKind::RBrace, "'}'")?;
        Ok(props)
    }

    fn object_key(&mut self) -> PResult<String> {
        match &self.current.kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance()?;
                Ok(name)
            }
            TokenKind::Str(s) => {
                let s = s.clone();
                self.advance()?;
                Ok(s)
            }
            TokenKind::Number(n) => {
                let key = if n.fract() == 0.0 {
                    format!("{}", *n as i64)
                } else {
                    format!("{}", n)
                };
                self.advance()?;
                Ok(key)
            }
            TokenKind::Default => {
                self.advance()?;
                Ok("default".into())
            }
            _ => Err(self.unexpected("a property key")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_let_and_expression() {
        let program = parse_program("let x = 1 + 2; x").expect("parse");
        assert_eq!(program.body.len(), 2);
        assert!(matches!(program.body[0].kind, StmtKind::VarDecl { .. }));
        assert!(matches!(program.body[1].kind, StmtKind::ExprStmt(_)));
    }

    #[test]
    fn test_parse_arrow_function() {
        let program = parse_program("const f = (n) => n <= 1 ? 1 : n * f(n - 1);").expect("parse");
        let StmtKind::VarDecl { declarators, .. } = &program.body[0].kind else {
            panic!("expected var decl");
        };
        let Some(Expr {
            kind: ExprKind::Func(func),
            ..
        }) = &declarators[0].init
        else {
            panic!("expected function initializer");
        };
        assert!(func.is_arrow);
        assert_eq!(func.params.len(), 1);
    }

    #[test]
    fn test_parenthesized_expression_is_not_arrow() {
        let program = parse_program("(1 + 2) * 3").expect("parse");
        let StmtKind::ExprStmt(expr) = &program.body[0].kind else {
            panic!("expected expression");
        };
        assert!(matches!(
            expr.kind,
            ExprKind::Binary {
                op: BinaryOp::Mul,
                ..
            }
        ));
    }

    #[test]
    fn test_type_annotations_erased() {
        let program =
            parse_program("let x: number = 1; const f = (a: string, b?: Map<string, number[]>): void => a;")
                .expect("parse");
        assert_eq!(program.body.len(), 2);
    }

    #[test]
    fn test_interface_and_type_erased() {
        let program = parse_program(
            "interface Point { x: number; y: number }\ntype Alias = Point | null;\n1",
        )
        .expect("parse");
        assert_eq!(program.body.len(), 1);
    }

    #[test]
    fn test_parse_import_named_with_attributes() {
        let program =
            parse_program(r#"import data, { a, b as c } from "./mod" with { type: "json" };"#)
                .expect("parse");
        let StmtKind::Import(decl) = &program.body[0].kind else {
            panic!("expected import");
        };
        assert_eq!(decl.specifier, "./mod");
        assert_eq!(decl.default.as_deref(), Some("data"));
        assert_eq!(
            decl.named,
            vec![("a".into(), "a".into()), ("b".into(), "c".into())]
        );
        assert_eq!(decl.attributes, vec![("type".into(), "json".into())]);
    }

    #[test]
    fn test_parse_exports() {
        let parsed = parse_module(
            "export const x = 1;\nexport function f() { return 2; }\nconst y = 3;\nexport { y as z };\nexport default f();",
        )
        .expect("parse");
        assert_eq!(parsed.exports, vec!["x", "f", "z", "default"]);
    }

    #[test]
    fn test_object_literal_forms() {
        let program = parse_program(
            "let o = { a: 1, b, \"c\": 3, m() { return 1; }, get v() { return 2; }, set v(x) {} };",
        )
        .expect("parse");
        let StmtKind::VarDecl { declarators, .. } = &program.body[0].kind else {
            panic!("expected decl");
        };
        let Some(Expr {
            kind: ExprKind::Object(props),
            ..
        }) = &declarators[0].init
        else {
            panic!("expected object literal");
        };
        assert_eq!(props.len(), 6);
        assert!(matches!(props[4].value, ObjPropValue::Getter(_)));
        assert!(matches!(props[5].value, ObjPropValue::Setter(_)));
    }

    #[test]
    fn test_generator_rejected() {
        let err = parse_program("function* g() {}").unwrap_err();
        assert_eq!(err.code, codes::COMPILE_UNSUPPORTED);
    }

    #[test]
    fn test_for_in_rejected() {
        let err = parse_program("for (let k in o) {}").unwrap_err();
        assert_eq!(err.code, codes::COMPILE_UNSUPPORTED);
    }

    #[test]
    fn test_private_ident_rejected() {
        let err = parse_program("obj.#secret").unwrap_err();
        assert_eq!(err.code, codes::COMPILE_UNSUPPORTED);
    }

    #[test]
    fn test_class_rejected() {
        let err = parse_program("class Foo {}").unwrap_err();
        assert_eq!(err.code, codes::COMPILE_UNSUPPORTED);
    }

    #[test]
    fn test_async_await_parse() {
        let program =
            parse_program("async function f() { return (await g()) + 1; }").expect("parse");
        let StmtKind::FuncDecl(func) = &program.body[0].kind else {
            panic!("expected function");
        };
        assert!(func.is_async);
    }

    #[test]
    fn test_try_catch_finally() {
        let program =
            parse_program("try { risky(); } catch (e) { handle(e); } finally { cleanup(); }")
                .expect("parse");
        let StmtKind::Try {
            catch_param,
            catch,
            finally,
            ..
        } = &program.body[0].kind
        else {
            panic!("expected try");
        };
        assert_eq!(catch_param.as_deref(), Some("e"));
        assert!(catch.is_some());
        assert!(finally.is_some());
    }

    #[test]
    fn test_syntax_error_span() {
        let err = parse_program("let = 5;").unwrap_err();
        assert_eq!(err.code, codes::SYNTAX_UNEXPECTED_TOKEN);
        assert!(err.span.is_some());
    }
}
