#![forbid(unsafe_code)]

use std::mem;

use typy_ast::{
    join, span_between, span_end, Alias, AnnAssignStmt, AssertStmt, AssignStmt, AugAssignStmt,
    BinOp, Block, BoolOp, CallArg, ClassDef, CmpOp, CompKind, Comprehension, DeleteStmt, DictItem,
    ExceptHandler, Expr, ExprKind, ForStmt, FunctionDef, Ident, IfStmt, ImportFromStmt, ImportStmt,
    Keyword, Module, NameListStmt, Param, ParamKind, RaiseStmt, ReturnStmt, Span, Stmt, TryStmt,
    UnaryOp, WhileStmt, WithItem, WithStmt,
};
use typy_lex::{Lexer, StrKind, Token, TokenKind};

use crate::error::SyntaxError;
use crate::fstring::replacement_fields;

type PResult<T> = Result<T, SyntaxError>;

/// Deepest expression nesting accepted, as in CPython's parser.
pub const MAX_NESTING: usize = 200;

pub struct Parser<'a> {
    tokens: &'a [Token],
    idx: usize,
    recover: bool,
    errors: Vec<SyntaxError>,
    /// Expressions currently being parsed inside one another.
    depth: usize,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token]) -> Self {
        Self {
            tokens,
            idx: 0,
            recover: false,
            errors: Vec::new(),
            depth: 0,
        }
    }

    pub fn parse_module(&mut self) -> PResult<Module> {
        self.recover = false;
        let body = self.parse_module_body()?;
        Ok(Module {
            span: self.module_span(),
            body,
        })
    }

    /// Parse a module while recovering from errors.
    ///
    /// On a statement error the parser skips to the end of the logical line
    /// and, if an indented block follows, skips that block as well. Recovery
    /// applies inside nested blocks too, so one broken statement never hides
    /// its siblings.
    pub fn parse_module_with_recovery(&mut self) -> (Module, Vec<SyntaxError>) {
        self.recover = true;
        let body = match self.parse_module_body() {
            Ok(body) => body,
            Err(err) => {
                self.errors.push(err);
                Vec::new()
            }
        };
        let module = Module {
            span: self.module_span(),
            body,
        };
        (module, mem::take(&mut self.errors))
    }

    pub fn parse_expr(&mut self) -> PResult<Expr> {
        self.parse_test()
    }

    pub fn parse_expr_eof(&mut self) -> PResult<Expr> {
        let expr = self.parse_expr()?;
        self.skip_newlines();
        if !self.at(TokenKind::Eof) {
            return Err(self.unexpected("end of input"));
        }
        Ok(expr)
    }

    fn parse_module_body(&mut self) -> PResult<Vec<Stmt>> {
        let mut body = Vec::new();
        loop {
            self.skip_newlines();
            if self.at(TokenKind::Eof) {
                break;
            }
            if self.at(TokenKind::Dedent) {
                self.next();
                continue;
            }
            self.parse_stmt_or_recover(&mut body)?;
        }
        Ok(body)
    }

    fn module_span(&self) -> Span {
        let end = self.tokens.last().map(|t| span_end(t.span)).unwrap_or(0);
        span_between(0, end)
    }

    fn parse_stmt_or_recover(&mut self, out: &mut Vec<Stmt>) -> PResult<()> {
        let start = self.idx;
        match self.parse_stmt_into(out) {
            Ok(()) => Ok(()),
            Err(err) if self.recover => {
                self.errors.push(err);
                self.recover_to_stmt_boundary();
                if self.idx == start && !self.at(TokenKind::Eof) && !self.at(TokenKind::Dedent) {
                    self.next();
                }
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn recover_to_stmt_boundary(&mut self) {
        if self.at(TokenKind::Indent) {
            self.skip_indented_block();
            return;
        }
        while !matches!(
            self.peek_kind(),
            None | Some(TokenKind::Newline | TokenKind::Eof | TokenKind::Dedent | TokenKind::Indent)
        ) {
            self.next();
        }
        if self.at(TokenKind::Newline) {
            self.next();
        }
        // The broken statement may have opened a block; it goes too.
        if self.at(TokenKind::Indent) {
            self.skip_indented_block();
        }
    }

    fn skip_indented_block(&mut self) {
        let mut depth = 0usize;
        loop {
            match self.peek_kind() {
                None | Some(TokenKind::Eof) => return,
                Some(TokenKind::Indent) => depth += 1,
                Some(TokenKind::Dedent) => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        self.next();
                        return;
                    }
                }
                Some(_) => {}
            }
            self.next();
        }
    }

    fn parse_stmt_into(&mut self, out: &mut Vec<Stmt>) -> PResult<()> {
        let stmt = match self.peek_kind() {
            Some(TokenKind::KwDef) => Stmt::FunctionDef(self.parse_function_def(Vec::new(), None)?),
            Some(TokenKind::KwClass) => Stmt::ClassDef(self.parse_class_def(Vec::new())?),
            Some(TokenKind::At) => self.parse_decorated()?,
            Some(TokenKind::KwAsync) => self.parse_async_stmt()?,
            Some(TokenKind::KwIf) => Stmt::If(self.parse_if_stmt()?),
            Some(TokenKind::KwWhile) => Stmt::While(self.parse_while_stmt()?),
            Some(TokenKind::KwFor) => Stmt::For(self.parse_for_stmt(None)?),
            Some(TokenKind::KwTry) => Stmt::Try(self.parse_try_stmt()?),
            Some(TokenKind::KwWith) => Stmt::With(self.parse_with_stmt(None)?),
            Some(TokenKind::Indent) => return Err(self.error_here("unexpected indent")),
            _ => return self.parse_simple_stmts(out),
        };
        out.push(stmt);
        Ok(())
    }

    /// `a; b; c` on one logical line.
    fn parse_simple_stmts(&mut self, out: &mut Vec<Stmt>) -> PResult<()> {
        loop {
            out.push(self.parse_simple_stmt()?);
            if self.at(TokenKind::Semicolon) {
                self.next();
                if self.at(TokenKind::Newline) || self.at(TokenKind::Eof) {
                    break;
                }
                continue;
            }
            break;
        }
        self.expect_stmt_terminator()
    }

    fn parse_simple_stmt(&mut self) -> PResult<Stmt> {
        match self.peek_kind() {
            Some(TokenKind::KwPass) => Ok(Stmt::Pass(self.next().span)),
            Some(TokenKind::KwBreak) => Ok(Stmt::Break(self.next().span)),
            Some(TokenKind::KwContinue) => Ok(Stmt::Continue(self.next().span)),
            Some(TokenKind::KwReturn) => {
                let t = self.next();
                let value = if self.starts_expr() {
                    Some(self.parse_star_exprs()?)
                } else {
                    None
                };
                let span = value.as_ref().map_or(t.span, |v| join(t.span, v.span));
                Ok(Stmt::Return(ReturnStmt { span, value }))
            }
            Some(TokenKind::KwImport) => Ok(Stmt::Import(self.parse_import_stmt()?)),
            Some(TokenKind::KwFrom) => Ok(Stmt::ImportFrom(self.parse_import_from_stmt()?)),
            Some(TokenKind::KwRaise) => Ok(Stmt::Raise(self.parse_raise_stmt()?)),
            Some(TokenKind::KwAssert) => {
                let t = self.next();
                let test = self.parse_test()?;
                let msg = if self.at(TokenKind::Comma) {
                    self.next();
                    Some(self.parse_test()?)
                } else {
                    None
                };
                Ok(Stmt::Assert(AssertStmt {
                    span: join(t.span, self.prev_span()),
                    test,
                    msg,
                }))
            }
            Some(TokenKind::KwDel) => {
                let t = self.next();
                let mut targets = Vec::new();
                loop {
                    let target = self.parse_bitor()?;
                    self.check_target(&target)?;
                    targets.push(target);
                    if !self.at(TokenKind::Comma) {
                        break;
                    }
                    self.next();
                    if !self.starts_expr() {
                        break;
                    }
                }
                Ok(Stmt::Delete(DeleteStmt {
                    span: join(t.span, self.prev_span()),
                    targets,
                }))
            }
            Some(TokenKind::KwGlobal) => Ok(Stmt::Global(self.parse_name_list()?)),
            Some(TokenKind::KwNonlocal) => Ok(Stmt::Nonlocal(self.parse_name_list()?)),
            _ => self.parse_expr_stmt(),
        }
    }

    fn parse_expr_stmt(&mut self) -> PResult<Stmt> {
        let first = self.parse_assign_value()?;

        if self.at(TokenKind::Colon) {
            self.next();
            if !matches!(
                first.kind,
                ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. }
            ) {
                return Err(SyntaxError {
                    message: "illegal target for annotation".to_string(),
                    span: first.span,
                });
            }
            let annotation = self.parse_test()?;
            let value = if self.at(TokenKind::Eq) {
                self.next();
                Some(self.parse_assign_value()?)
            } else {
                None
            };
            return Ok(Stmt::AnnAssign(AnnAssignStmt {
                span: join(first.span, self.prev_span()),
                target: first,
                annotation,
                value,
            }));
        }

        if self.at(TokenKind::Eq) {
            let mut targets = vec![first];
            let value = loop {
                self.next();
                let v = self.parse_assign_value()?;
                if self.at(TokenKind::Eq) {
                    targets.push(v);
                } else {
                    break v;
                }
            };
            for target in &targets {
                self.check_target(target)?;
            }
            let span = join(targets[0].span, value.span);
            return Ok(Stmt::Assign(AssignStmt {
                span,
                targets,
                value,
            }));
        }

        if let Some(op) = self.peek_kind().and_then(aug_assign_op) {
            self.next();
            if !matches!(
                first.kind,
                ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. }
            ) {
                return Err(SyntaxError {
                    message: "illegal expression for augmented assignment".to_string(),
                    span: first.span,
                });
            }
            let value = self.parse_assign_value()?;
            return Ok(Stmt::AugAssign(AugAssignStmt {
                span: join(first.span, value.span),
                target: first,
                op,
                value,
            }));
        }

        Ok(Stmt::Expr(first))
    }

    fn parse_assign_value(&mut self) -> PResult<Expr> {
        if self.at(TokenKind::KwYield) {
            self.parse_yield_expr()
        } else {
            self.parse_star_exprs()
        }
    }

    fn check_target(&self, target: &Expr) -> PResult<()> {
        match &target.kind {
            ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. } => Ok(()),
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                for item in items {
                    self.check_target(item)?;
                }
                Ok(())
            }
            ExprKind::Starred(inner) => self.check_target(inner),
            _ => Err(SyntaxError {
                message: "cannot assign to expression".to_string(),
                span: target.span,
            }),
        }
    }

    fn parse_name_list(&mut self) -> PResult<NameListStmt> {
        let t = self.next();
        let mut names = vec![self.expect_ident()?];
        while self.at(TokenKind::Comma) {
            self.next();
            names.push(self.expect_ident()?);
        }
        Ok(NameListStmt {
            span: join(t.span, self.prev_span()),
            names,
        })
    }

    fn parse_raise_stmt(&mut self) -> PResult<RaiseStmt> {
        let t = self.next();
        let mut exc = None;
        let mut cause = None;
        if self.starts_expr() {
            exc = Some(self.parse_test()?);
            if self.at(TokenKind::KwFrom) {
                self.next();
                cause = Some(self.parse_test()?);
            }
        }
        Ok(RaiseStmt {
            span: join(t.span, self.prev_span()),
            exc,
            cause,
        })
    }

    fn parse_import_stmt(&mut self) -> PResult<ImportStmt> {
        let t = self.expect(TokenKind::KwImport)?;
        let mut names = Vec::new();
        loop {
            names.push(self.parse_alias(true)?);
            if !self.at(TokenKind::Comma) {
                break;
            }
            self.next();
        }
        Ok(ImportStmt {
            span: join(t.span, self.prev_span()),
            names,
        })
    }

    fn parse_import_from_stmt(&mut self) -> PResult<ImportFromStmt> {
        let t = self.expect(TokenKind::KwFrom)?;
        let mut level = 0u32;
        loop {
            match self.peek_kind() {
                Some(TokenKind::Dot) => level += 1,
                Some(TokenKind::Ellipsis) => level += 3,
                _ => break,
            }
            self.next();
        }

        let module = if self.at(TokenKind::KwImport) {
            None
        } else {
            Some(self.parse_dotted_name()?)
        };
        if module.is_none() && level == 0 {
            return Err(self.unexpected("module name"));
        }
        self.expect(TokenKind::KwImport)?;

        let mut names = Vec::new();
        let mut star = None;
        if self.at(TokenKind::Star) {
            star = Some(self.next().span);
        } else {
            let parenthesized = self.at(TokenKind::LParen);
            if parenthesized {
                self.next();
            }
            loop {
                names.push(self.parse_alias(false)?);
                if !self.at(TokenKind::Comma) {
                    break;
                }
                self.next();
                if parenthesized && self.at(TokenKind::RParen) {
                    break;
                }
            }
            if parenthesized {
                self.expect(TokenKind::RParen)?;
            }
        }

        Ok(ImportFromStmt {
            span: join(t.span, self.prev_span()),
            module,
            level,
            names,
            star,
        })
    }

    fn parse_alias(&mut self, dotted: bool) -> PResult<Alias> {
        let name = if dotted {
            self.parse_dotted_name()?
        } else {
            self.expect_ident()?
        };
        let asname = if self.at(TokenKind::KwAs) {
            self.next();
            Some(self.expect_ident()?)
        } else {
            None
        };
        Ok(Alias {
            span: join(name.span, self.prev_span()),
            name,
            asname,
        })
    }

    fn parse_dotted_name(&mut self) -> PResult<Ident> {
        let mut name = self.expect_ident()?;
        while self.at(TokenKind::Dot) {
            self.next();
            let part = self.expect_ident()?;
            name.node.push('.');
            name.node.push_str(&part.node);
            name.span = join(name.span, part.span);
        }
        Ok(name)
    }

    fn parse_decorated(&mut self) -> PResult<Stmt> {
        let mut decorators = Vec::new();
        while self.at(TokenKind::At) {
            self.next();
            decorators.push(self.parse_named_expr()?);
            self.expect(TokenKind::Newline)?;
        }
        match self.peek_kind() {
            Some(TokenKind::KwDef) => Ok(Stmt::FunctionDef(self.parse_function_def(decorators, None)?)),
            Some(TokenKind::KwClass) => Ok(Stmt::ClassDef(self.parse_class_def(decorators)?)),
            Some(TokenKind::KwAsync) => {
                let t = self.next();
                Ok(Stmt::FunctionDef(self.parse_function_def(decorators, Some(t.span))?))
            }
            _ => Err(self.unexpected("'def' or 'class' after decorator")),
        }
    }

    fn parse_async_stmt(&mut self) -> PResult<Stmt> {
        let t = self.next();
        match self.peek_kind() {
            Some(TokenKind::KwDef) => Ok(Stmt::FunctionDef(self.parse_function_def(Vec::new(), Some(t.span))?)),
            Some(TokenKind::KwFor) => Ok(Stmt::For(self.parse_for_stmt(Some(t.span))?)),
            Some(TokenKind::KwWith) => Ok(Stmt::With(self.parse_with_stmt(Some(t.span))?)),
            _ => Err(self.unexpected("'def', 'for' or 'with' after 'async'")),
        }
    }

    fn parse_function_def(&mut self, decorators: Vec<Expr>, async_span: Option<Span>) -> PResult<FunctionDef> {
        let def = self.expect(TokenKind::KwDef)?;
        let start = async_span.unwrap_or(def.span);
        let name = self.expect_ident()?;
        self.expect(TokenKind::LParen)?;
        let params = self.parse_params(TokenKind::RParen, true)?;
        self.expect(TokenKind::RParen)?;
        let returns = if self.at(TokenKind::Arrow) {
            self.next();
            Some(self.parse_test()?)
        } else {
            None
        };
        self.expect(TokenKind::Colon)?;
        let body = self.parse_suite()?;
        Ok(FunctionDef {
            span: join(start, body.span),
            name,
            decorators,
            params,
            returns,
            body,
            is_async: async_span.is_some(),
        })
    }

    /// Parameter list up to (not including) `close`. Lambdas pass
    /// `annotated = false` so the closing `:` is never read as an annotation.
    fn parse_params(&mut self, close: TokenKind, annotated: bool) -> PResult<Vec<Param>> {
        let mut params: Vec<Param> = Vec::new();
        let mut kind = ParamKind::Regular;
        let mut seen_default = false;

        while !self.at(close.clone()) {
            if self.at(TokenKind::Slash) {
                let t = self.next();
                if params.is_empty()
                    || kind != ParamKind::Regular
                    || params.iter().any(|p| p.kind == ParamKind::PositionalOnly)
                {
                    return Err(SyntaxError {
                        message: "invalid '/' in parameter list".to_string(),
                        span: t.span,
                    });
                }
                for p in params.iter_mut() {
                    p.kind = ParamKind::PositionalOnly;
                }
            } else if self.at(TokenKind::Star) {
                let t = self.next();
                if kind != ParamKind::Regular {
                    return Err(SyntaxError {
                        message: "duplicate '*' in parameter list".to_string(),
                        span: t.span,
                    });
                }
                if !self.at(TokenKind::Comma) && !self.at(close.clone()) {
                    params.push(self.parse_param(annotated, ParamKind::VarPositional, t.span)?);
                }
                kind = ParamKind::KeywordOnly;
            } else if self.at(TokenKind::DoubleStar) {
                let t = self.next();
                params.push(self.parse_param(annotated, ParamKind::VarKeyword, t.span)?);
                if self.at(TokenKind::Comma) {
                    self.next();
                }
                if !self.at(close.clone()) {
                    return Err(self.error_here("parameter after '**' parameter"));
                }
                break;
            } else {
                let start = self.peek_span();
                let param = self.parse_param(annotated, kind, start)?;
                if kind == ParamKind::Regular {
                    if param.default.is_some() {
                        seen_default = true;
                    } else if seen_default {
                        return Err(SyntaxError {
                            message: "parameter without a default follows parameter with a default"
                                .to_string(),
                            span: param.span,
                        });
                    }
                }
                params.push(param);
            }

            if self.at(TokenKind::Comma) {
                self.next();
            } else {
                break;
            }
        }
        Ok(params)
    }

    fn parse_param(&mut self, annotated: bool, kind: ParamKind, start: Span) -> PResult<Param> {
        let name = match self.peek_kind() {
            Some(TokenKind::Ident(_)) => self.expect_ident()?,
            _ => return Err(self.unexpected("parameter name")),
        };
        let annotation = if annotated && self.at(TokenKind::Colon) {
            self.next();
            Some(self.parse_test()?)
        } else {
            None
        };
        let takes_default = matches!(kind, ParamKind::Regular | ParamKind::KeywordOnly);
        let default = if takes_default && self.at(TokenKind::Eq) {
            self.next();
            Some(self.parse_test()?)
        } else {
            None
        };
        Ok(Param {
            span: join(start, self.prev_span()),
            name,
            kind,
            annotation,
            default,
        })
    }

    fn parse_class_def(&mut self, decorators: Vec<Expr>) -> PResult<ClassDef> {
        let t = self.expect(TokenKind::KwClass)?;
        let name = self.expect_ident()?;
        let mut bases = Vec::new();
        let mut keywords = Vec::new();
        if self.at(TokenKind::LParen) {
            self.next();
            for arg in self.parse_call_args()? {
                match arg {
                    CallArg::Positional(e) => bases.push(e),
                    CallArg::Keyword { name, value } => keywords.push(Keyword {
                        span: join(name.span, value.span),
                        name,
                        value,
                    }),
                    CallArg::Star(_) | CallArg::DoubleStar(_) => {}
                }
            }
            self.expect(TokenKind::RParen)?;
        }
        self.expect(TokenKind::Colon)?;
        let body = self.parse_suite()?;
        Ok(ClassDef {
            span: join(t.span, body.span),
            name,
            decorators,
            bases,
            keywords,
            body,
        })
    }

    /// Handles both `if` and `elif`; `elif` chains nest in `orelse`.
    fn parse_if_stmt(&mut self) -> PResult<IfStmt> {
        let t = self.next();
        let test = self.parse_named_expr()?;
        self.expect(TokenKind::Colon)?;
        let body = self.parse_suite()?;
        let orelse = if self.at(TokenKind::KwElif) {
            let nested = self.parse_if_stmt()?;
            Some(Block {
                span: nested.span,
                stmts: vec![Stmt::If(nested)],
            })
        } else {
            self.parse_else_clause()?
        };
        let end = orelse.as_ref().map_or(body.span, |b| b.span);
        Ok(IfStmt {
            span: join(t.span, end),
            test,
            body,
            orelse,
        })
    }

    fn parse_else_clause(&mut self) -> PResult<Option<Block>> {
        if !self.at(TokenKind::KwElse) {
            return Ok(None);
        }
        self.next();
        self.expect(TokenKind::Colon)?;
        Ok(Some(self.parse_suite()?))
    }

    fn parse_while_stmt(&mut self) -> PResult<WhileStmt> {
        let t = self.expect(TokenKind::KwWhile)?;
        let test = self.parse_named_expr()?;
        self.expect(TokenKind::Colon)?;
        let body = self.parse_suite()?;
        let orelse = self.parse_else_clause()?;
        let end = orelse.as_ref().map_or(body.span, |b| b.span);
        Ok(WhileStmt {
            span: join(t.span, end),
            test,
            body,
            orelse,
        })
    }

    fn parse_for_stmt(&mut self, async_span: Option<Span>) -> PResult<ForStmt> {
        let t = self.expect(TokenKind::KwFor)?;
        let target = self.parse_target_list()?;
        self.check_target(&target)?;
        self.expect(TokenKind::KwIn)?;
        let iter = self.parse_star_exprs()?;
        self.expect(TokenKind::Colon)?;
        let body = self.parse_suite()?;
        let orelse = self.parse_else_clause()?;
        let end = orelse.as_ref().map_or(body.span, |b| b.span);
        Ok(ForStmt {
            span: join(async_span.unwrap_or(t.span), end),
            target,
            iter,
            body,
            orelse,
            is_async: async_span.is_some(),
        })
    }

    fn parse_try_stmt(&mut self) -> PResult<TryStmt> {
        let t = self.expect(TokenKind::KwTry)?;
        self.expect(TokenKind::Colon)?;
        let body = self.parse_suite()?;

        let mut handlers = Vec::new();
        while self.at(TokenKind::KwExcept) {
            let e = self.next();
            let ty = if self.at(TokenKind::Colon) {
                None
            } else {
                Some(self.parse_test()?)
            };
            let name = if ty.is_some() && self.at(TokenKind::KwAs) {
                self.next();
                Some(self.expect_ident()?)
            } else {
                None
            };
            self.expect(TokenKind::Colon)?;
            let hbody = self.parse_suite()?;
            handlers.push(ExceptHandler {
                span: join(e.span, hbody.span),
                ty,
                name,
                body: hbody,
            });
        }

        let orelse = if handlers.is_empty() {
            None
        } else {
            self.parse_else_clause()?
        };
        let finalbody = if self.at(TokenKind::KwFinally) {
            self.next();
            self.expect(TokenKind::Colon)?;
            Some(self.parse_suite()?)
        } else {
            None
        };
        if handlers.is_empty() && finalbody.is_none() {
            return Err(self.unexpected("'except' or 'finally' block"));
        }

        let end = finalbody
            .as_ref()
            .or(orelse.as_ref())
            .map(|b| b.span)
            .or_else(|| handlers.last().map(|h| h.span))
            .unwrap_or(body.span);
        Ok(TryStmt {
            span: join(t.span, end),
            body,
            handlers,
            orelse,
            finalbody,
        })
    }

    fn parse_with_stmt(&mut self, async_span: Option<Span>) -> PResult<WithStmt> {
        let t = self.expect(TokenKind::KwWith)?;
        let mut items = Vec::new();
        loop {
            let start = self.peek_span();
            let context = self.parse_test()?;
            let target = if self.at(TokenKind::KwAs) {
                self.next();
                let target = self.parse_star_or_bitor()?;
                self.check_target(&target)?;
                Some(target)
            } else {
                None
            };
            items.push(WithItem {
                span: join(start, self.prev_span()),
                context,
                target,
            });
            if !self.at(TokenKind::Comma) {
                break;
            }
            self.next();
        }
        self.expect(TokenKind::Colon)?;
        let body = self.parse_suite()?;
        Ok(WithStmt {
            span: join(async_span.unwrap_or(t.span), body.span),
            items,
            body,
            is_async: async_span.is_some(),
        })
    }

    /// Body after a compound statement header's `:`, either inline or an
    /// indented block.
    fn parse_suite(&mut self) -> PResult<Block> {
        typy_ast::ensure_stack(|| self.parse_suite_inner())
    }

    fn parse_suite_inner(&mut self) -> PResult<Block> {
        if !self.at(TokenKind::Newline) {
            let start = self.peek_span();
            let mut stmts = Vec::new();
            self.parse_simple_stmts(&mut stmts)?;
            let span = stmts.last().map_or(start, |s| join(start, s.span()));
            return Ok(Block { span, stmts });
        }
        self.next();
        if !self.at(TokenKind::Indent) {
            return Err(self.error_here("expected an indented block"));
        }
        let indent = self.next();

        let mut stmts = Vec::new();
        loop {
            self.skip_newlines();
            if self.at(TokenKind::Dedent) {
                self.next();
                break;
            }
            if self.at(TokenKind::Eof) {
                break;
            }
            self.parse_stmt_or_recover(&mut stmts)?;
        }

        let span = match (stmts.first(), stmts.last()) {
            (Some(a), Some(b)) => join(a.span(), b.span()),
            _ => indent.span,
        };
        Ok(Block { span, stmts })
    }

    // ---- expressions ----

    /// Comma-separated expressions (starred items allowed); more than one item
    /// or a trailing comma produces a tuple.
    fn parse_star_exprs(&mut self) -> PResult<Expr> {
        let first = self.parse_star_or_named()?;
        if !self.at(TokenKind::Comma) {
            return Ok(first);
        }
        let start = first.span;
        let mut items = vec![first];
        while self.at(TokenKind::Comma) {
            self.next();
            if !self.starts_expr() {
                break;
            }
            items.push(self.parse_star_or_named()?);
        }
        Ok(Expr {
            span: join(start, self.prev_span()),
            kind: ExprKind::Tuple(items),
        })
    }

    /// Assignment targets for `for` and comprehensions; stops before `in`.
    fn parse_target_list(&mut self) -> PResult<Expr> {
        let first = self.parse_star_or_bitor()?;
        if !self.at(TokenKind::Comma) {
            return Ok(first);
        }
        let start = first.span;
        let mut items = vec![first];
        while self.at(TokenKind::Comma) {
            self.next();
            if !self.starts_expr() {
                break;
            }
            items.push(self.parse_star_or_bitor()?);
        }
        Ok(Expr {
            span: join(start, self.prev_span()),
            kind: ExprKind::Tuple(items),
        })
    }

    fn parse_star_or_bitor(&mut self) -> PResult<Expr> {
        if self.at(TokenKind::Star) {
            let t = self.next();
            let inner = self.parse_bitor()?;
            return Ok(Expr {
                span: join(t.span, inner.span),
                kind: ExprKind::Starred(Box::new(inner)),
            });
        }
        self.parse_bitor()
    }

    fn parse_star_or_named(&mut self) -> PResult<Expr> {
        if self.at(TokenKind::Star) {
            return self.parse_star_or_bitor();
        }
        self.parse_named_expr()
    }

    fn parse_named_expr(&mut self) -> PResult<Expr> {
        let is_walrus = matches!(self.peek_kind(), Some(TokenKind::Ident(_)))
            && matches!(self.peek_kind_n(1), Some(TokenKind::Walrus));
        if !is_walrus {
            return self.parse_test();
        }
        let target = self.expect_ident()?;
        self.next();
        let value = self.parse_test()?;
        Ok(Expr {
            span: join(target.span, value.span),
            kind: ExprKind::Named {
                target,
                value: Box::new(value),
            },
        })
    }

    /// Runs a nested expression parse, enforcing [`MAX_NESTING`].
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        if self.depth >= MAX_NESTING {
            return Err(self.error_here("expression nested too deeply"));
        }
        self.depth += 1;
        let result = typy_ast::ensure_stack(|| parse(self));
        self.depth -= 1;
        result
    }

    fn parse_test(&mut self) -> PResult<Expr> {
        self.nested(Self::parse_test_inner)
    }

    fn parse_test_inner(&mut self) -> PResult<Expr> {
        if self.at(TokenKind::KwLambda) {
            return self.parse_lambda();
        }
        let body = self.parse_or_test()?;
        if !self.at(TokenKind::KwIf) {
            return Ok(body);
        }
        self.next();
        let test = self.parse_or_test()?;
        self.expect(TokenKind::KwElse)?;
        let orelse = self.parse_test()?;
        Ok(Expr {
            span: join(body.span, orelse.span),
            kind: ExprKind::IfExp {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
            },
        })
    }

    fn parse_lambda(&mut self) -> PResult<Expr> {
        let t = self.expect(TokenKind::KwLambda)?;
        let params = self.parse_params(TokenKind::Colon, false)?;
        self.expect(TokenKind::Colon)?;
        let body = self.parse_test()?;
        Ok(Expr {
            span: join(t.span, body.span),
            kind: ExprKind::Lambda {
                params,
                body: Box::new(body),
            },
        })
    }

    fn parse_yield_expr(&mut self) -> PResult<Expr> {
        let t = self.expect(TokenKind::KwYield)?;
        if self.at(TokenKind::KwFrom) {
            self.next();
            let value = self.parse_test()?;
            return Ok(Expr {
                span: join(t.span, value.span),
                kind: ExprKind::YieldFrom(Box::new(value)),
            });
        }
        if self.starts_expr() {
            let value = self.parse_star_exprs()?;
            return Ok(Expr {
                span: join(t.span, value.span),
                kind: ExprKind::Yield(Some(Box::new(value))),
            });
        }
        Ok(Expr {
            span: t.span,
            kind: ExprKind::Yield(None),
        })
    }

    fn parse_or_test(&mut self) -> PResult<Expr> {
        self.parse_bool_op(TokenKind::KwOr, BoolOp::Or, Self::parse_and_test)
    }

    fn parse_and_test(&mut self) -> PResult<Expr> {
        self.parse_bool_op(TokenKind::KwAnd, BoolOp::And, Self::parse_not_test)
    }

    fn parse_bool_op(
        &mut self,
        token: TokenKind,
        op: BoolOp,
        operand: fn(&mut Self) -> PResult<Expr>,
    ) -> PResult<Expr> {
        let first = operand(self)?;
        if !self.at(token.clone()) {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.at(token.clone()) {
            self.next();
            values.push(operand(self)?);
        }
        let span = join(values[0].span, values[values.len() - 1].span);
        Ok(Expr {
            span,
            kind: ExprKind::BoolOp { op, values },
        })
    }

    fn parse_not_test(&mut self) -> PResult<Expr> {
        if self.at(TokenKind::KwNot) {
            let t = self.next();
            let operand = typy_ast::ensure_stack(|| self.parse_not_test())?;
            return Ok(Expr {
                span: join(t.span, operand.span),
                kind: ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> PResult<Expr> {
        let left = self.parse_bitor()?;
        let mut ops = Vec::new();
        let mut comparators = Vec::new();
        loop {
            let (op, width) = match (self.peek_kind(), self.peek_kind_n(1)) {
                (Some(TokenKind::EqEq), _) => (CmpOp::Eq, 1),
                (Some(TokenKind::Neq), _) => (CmpOp::NotEq, 1),
                (Some(TokenKind::Lt), _) => (CmpOp::Lt, 1),
                (Some(TokenKind::Le), _) => (CmpOp::LtE, 1),
                (Some(TokenKind::Gt), _) => (CmpOp::Gt, 1),
                (Some(TokenKind::Ge), _) => (CmpOp::GtE, 1),
                (Some(TokenKind::KwIn), _) => (CmpOp::In, 1),
                (Some(TokenKind::KwIs), Some(TokenKind::KwNot)) => (CmpOp::IsNot, 2),
                (Some(TokenKind::KwIs), _) => (CmpOp::Is, 1),
                (Some(TokenKind::KwNot), Some(TokenKind::KwIn)) => (CmpOp::NotIn, 2),
                _ => break,
            };
            for _ in 0..width {
                self.next();
            }
            ops.push(op);
            comparators.push(self.parse_bitor()?);
        }
        if ops.is_empty() {
            return Ok(left);
        }
        let span = join(left.span, comparators[comparators.len() - 1].span);
        Ok(Expr {
            span,
            kind: ExprKind::Compare {
                left: Box::new(left),
                ops,
                comparators,
            },
        })
    }

    fn parse_binary_level(
        &mut self,
        operand: fn(&mut Self) -> PResult<Expr>,
        op_for: fn(&TokenKind) -> Option<BinOp>,
    ) -> PResult<Expr> {
        let mut left = operand(self)?;
        while let Some(op) = self.peek_kind().and_then(op_for) {
            self.next();
            let right = operand(self)?;
            let span = join(left.span, right.span);
            left = Expr {
                span,
                kind: ExprKind::Binary {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                },
            };
        }
        Ok(left)
    }

    fn parse_bitor(&mut self) -> PResult<Expr> {
        self.parse_binary_level(Self::parse_bitxor, |k| match k {
            TokenKind::Pipe => Some(BinOp::BitOr),
            _ => None,
        })
    }

    fn parse_bitxor(&mut self) -> PResult<Expr> {
        self.parse_binary_level(Self::parse_bitand, |k| match k {
            TokenKind::Caret => Some(BinOp::BitXor),
            _ => None,
        })
    }

    fn parse_bitand(&mut self) -> PResult<Expr> {
        self.parse_binary_level(Self::parse_shift, |k| match k {
            TokenKind::Amp => Some(BinOp::BitAnd),
            _ => None,
        })
    }

    fn parse_shift(&mut self) -> PResult<Expr> {
        self.parse_binary_level(Self::parse_arith, |k| match k {
            TokenKind::LShift => Some(BinOp::LShift),
            TokenKind::RShift => Some(BinOp::RShift),
            _ => None,
        })
    }

    fn parse_arith(&mut self) -> PResult<Expr> {
        self.parse_binary_level(Self::parse_term, |k| match k {
            TokenKind::Plus => Some(BinOp::Add),
            TokenKind::Minus => Some(BinOp::Sub),
            _ => None,
        })
    }

    fn parse_term(&mut self) -> PResult<Expr> {
        self.parse_binary_level(Self::parse_factor, |k| match k {
            TokenKind::Star => Some(BinOp::Mul),
            TokenKind::Slash => Some(BinOp::Div),
            TokenKind::DoubleSlash => Some(BinOp::FloorDiv),
            TokenKind::Percent => Some(BinOp::Mod),
            TokenKind::At => Some(BinOp::MatMul),
            _ => None,
        })
    }

    fn parse_factor(&mut self) -> PResult<Expr> {
        let op = match self.peek_kind() {
            Some(TokenKind::Minus) => UnaryOp::Neg,
            Some(TokenKind::Plus) => UnaryOp::Pos,
            Some(TokenKind::Tilde) => UnaryOp::Invert,
            _ => return self.parse_power(),
        };
        let t = self.next();
        let operand = typy_ast::ensure_stack(|| self.parse_factor())?;
        Ok(Expr {
            span: join(t.span, operand.span),
            kind: ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
        })
    }

    fn parse_power(&mut self) -> PResult<Expr> {
        let base = self.parse_await_primary()?;
        if !self.at(TokenKind::DoubleStar) {
            return Ok(base);
        }
        self.next();
        // Right-associative and binds tighter than a unary operator on its left.
        let exponent = self.parse_factor()?;
        Ok(Expr {
            span: join(base.span, exponent.span),
            kind: ExprKind::Binary {
                left: Box::new(base),
                op: BinOp::Pow,
                right: Box::new(exponent),
            },
        })
    }

    fn parse_await_primary(&mut self) -> PResult<Expr> {
        if self.at(TokenKind::KwAwait) {
            let t = self.next();
            let inner = self.parse_primary()?;
            return Ok(Expr {
                span: join(t.span, inner.span),
                kind: ExprKind::Await(Box::new(inner)),
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_atom()?;
        loop {
            match self.peek_kind() {
                Some(TokenKind::Dot) => {
                    self.next();
                    let attr = self.expect_ident()?;
                    expr = Expr {
                        span: join(expr.span, attr.span),
                        kind: ExprKind::Attribute {
                            value: Box::new(expr),
                            attr,
                        },
                    };
                }
                Some(TokenKind::LParen) => {
                    self.next();
                    let args = self.parse_call_args()?;
                    let rp = self.expect(TokenKind::RParen)?;
                    expr = Expr {
                        span: join(expr.span, rp.span),
                        kind: ExprKind::Call {
                            func: Box::new(expr),
                            args,
                        },
                    };
                }
                Some(TokenKind::LBracket) => {
                    self.next();
                    let index = self.parse_subscript_list()?;
                    let rb = self.expect(TokenKind::RBracket)?;
                    expr = Expr {
                        span: join(expr.span, rb.span),
                        kind: ExprKind::Subscript {
                            value: Box::new(expr),
                            index: Box::new(index),
                        },
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_call_args(&mut self) -> PResult<Vec<CallArg>> {
        let mut args = Vec::new();
        while !self.at(TokenKind::RParen) {
            let arg = if self.at(TokenKind::Star) {
                self.next();
                CallArg::Star(self.parse_test()?)
            } else if self.at(TokenKind::DoubleStar) {
                self.next();
                CallArg::DoubleStar(self.parse_test()?)
            } else if matches!(self.peek_kind(), Some(TokenKind::Ident(_)))
                && matches!(self.peek_kind_n(1), Some(TokenKind::Eq))
            {
                let name = self.expect_ident()?;
                self.next();
                let value = self.parse_test()?;
                CallArg::Keyword { name, value }
            } else {
                let value = self.parse_named_expr()?;
                if self.at_comp_for() {
                    let generators = self.parse_comp_clauses()?;
                    CallArg::Positional(Expr {
                        span: join(value.span, self.prev_span()),
                        kind: ExprKind::Comp {
                            kind: CompKind::Generator,
                            elt: Box::new(value),
                            generators,
                        },
                    })
                } else {
                    CallArg::Positional(value)
                }
            };
            args.push(arg);
            if self.at(TokenKind::Comma) {
                self.next();
            } else {
                break;
            }
        }
        Ok(args)
    }

    fn parse_subscript_list(&mut self) -> PResult<Expr> {
        let first = self.parse_slice_item()?;
        if !self.at(TokenKind::Comma) {
            return Ok(first);
        }
        let start = first.span;
        let mut items = vec![first];
        while self.at(TokenKind::Comma) {
            self.next();
            if self.at(TokenKind::RBracket) {
                break;
            }
            items.push(self.parse_slice_item()?);
        }
        Ok(Expr {
            span: join(start, self.prev_span()),
            kind: ExprKind::Tuple(items),
        })
    }

    fn parse_slice_item(&mut self) -> PResult<Expr> {
        let start = self.peek_span();
        let lower = if self.at(TokenKind::Colon) {
            None
        } else {
            let e = self.parse_star_or_named()?;
            if !self.at(TokenKind::Colon) {
                return Ok(e);
            }
            Some(Box::new(e))
        };
        self.expect(TokenKind::Colon)?;
        let upper = if self.starts_expr() {
            Some(Box::new(self.parse_test()?))
        } else {
            None
        };
        let step = if self.at(TokenKind::Colon) {
            self.next();
            if self.starts_expr() {
                Some(Box::new(self.parse_test()?))
            } else {
                None
            }
        } else {
            None
        };
        Ok(Expr {
            span: join(start, self.prev_span()),
            kind: ExprKind::Slice { lower, upper, step },
        })
    }

    fn parse_atom(&mut self) -> PResult<Expr> {
        let tokens = self.tokens;
        let Some(tok) = tokens.get(self.idx) else {
            return Err(self.unexpected("expression"));
        };
        let kind = match &tok.kind {
            TokenKind::Ident(name) => ExprKind::Name(name.clone()),
            TokenKind::Int(n) => ExprKind::IntLit(*n),
            TokenKind::Float(x) => ExprKind::FloatLit(*x),
            TokenKind::Imag => ExprKind::ImagLit,
            TokenKind::KwTrue => ExprKind::BoolLit(true),
            TokenKind::KwFalse => ExprKind::BoolLit(false),
            TokenKind::KwNone => ExprKind::NoneLit,
            TokenKind::Ellipsis => ExprKind::Ellipsis,
            TokenKind::String { .. } => return self.parse_strings(),
            TokenKind::LParen => return self.parse_paren(),
            TokenKind::LBracket => return self.parse_list_display(),
            TokenKind::LBrace => return self.parse_brace_display(),
            _ => return Err(self.unexpected("expression")),
        };
        self.next();
        Ok(Expr {
            span: tok.span,
            kind,
        })
    }

    /// Adjacent string literals concatenate.
    fn parse_strings(&mut self) -> PResult<Expr> {
        let start = self.peek_span();
        let mut text = String::new();
        let mut has_bytes = false;
        let mut has_text = false;
        let mut has_format = false;
        let mut fields = Vec::new();
        while let Some(TokenKind::String { value, kind, offset }) = self.peek_kind() {
            text.push_str(value);
            match kind {
                StrKind::Bytes => has_bytes = true,
                StrKind::Format => {
                    fields.extend(format_fields(value, *offset)?);
                    has_format = true;
                    has_text = true;
                }
                StrKind::Plain => has_text = true,
            }
            self.next();
        }
        let span = join(start, self.prev_span());
        if has_bytes && has_text {
            return Err(SyntaxError {
                message: "cannot mix bytes and nonbytes literals".to_string(),
                span,
            });
        }
        let kind = if has_bytes {
            ExprKind::BytesLit(text)
        } else if has_format {
            ExprKind::FStringLit(fields)
        } else {
            ExprKind::StrLit(text)
        };
        Ok(Expr { span, kind })
    }

    fn parse_paren(&mut self) -> PResult<Expr> {
        let lp = self.expect(TokenKind::LParen)?;
        if self.at(TokenKind::RParen) {
            let rp = self.next();
            return Ok(Expr {
                span: join(lp.span, rp.span),
                kind: ExprKind::Tuple(Vec::new()),
            });
        }
        if self.at(TokenKind::KwYield) {
            let e = self.parse_yield_expr()?;
            self.expect(TokenKind::RParen)?;
            return Ok(e);
        }

        let first = self.parse_star_or_named()?;
        if self.at_comp_for() {
            let generators = self.parse_comp_clauses()?;
            let rp = self.expect(TokenKind::RParen)?;
            return Ok(Expr {
                span: join(lp.span, rp.span),
                kind: ExprKind::Comp {
                    kind: CompKind::Generator,
                    elt: Box::new(first),
                    generators,
                },
            });
        }
        if !self.at(TokenKind::Comma) {
            self.expect(TokenKind::RParen)?;
            return Ok(first);
        }

        let mut items = vec![first];
        while self.at(TokenKind::Comma) {
            self.next();
            if self.at(TokenKind::RParen) {
                break;
            }
            items.push(self.parse_star_or_named()?);
        }
        let rp = self.expect(TokenKind::RParen)?;
        Ok(Expr {
            span: join(lp.span, rp.span),
            kind: ExprKind::Tuple(items),
        })
    }

    fn parse_list_display(&mut self) -> PResult<Expr> {
        let lb = self.expect(TokenKind::LBracket)?;
        if self.at(TokenKind::RBracket) {
            let rb = self.next();
            return Ok(Expr {
                span: join(lb.span, rb.span),
                kind: ExprKind::List(Vec::new()),
            });
        }
        let first = self.parse_star_or_named()?;
        if self.at_comp_for() {
            let generators = self.parse_comp_clauses()?;
            let rb = self.expect(TokenKind::RBracket)?;
            return Ok(Expr {
                span: join(lb.span, rb.span),
                kind: ExprKind::Comp {
                    kind: CompKind::List,
                    elt: Box::new(first),
                    generators,
                },
            });
        }
        let items = self.parse_display_tail(first, TokenKind::RBracket)?;
        let rb = self.expect(TokenKind::RBracket)?;
        Ok(Expr {
            span: join(lb.span, rb.span),
            kind: ExprKind::List(items),
        })
    }

    fn parse_display_tail(&mut self, first: Expr, close: TokenKind) -> PResult<Vec<Expr>> {
        let mut items = vec![first];
        while self.at(TokenKind::Comma) {
            self.next();
            if self.at(close.clone()) {
                break;
            }
            items.push(self.parse_star_or_named()?);
        }
        Ok(items)
    }

    fn parse_brace_display(&mut self) -> PResult<Expr> {
        let lb = self.expect(TokenKind::LBrace)?;
        if self.at(TokenKind::RBrace) {
            let rb = self.next();
            return Ok(Expr {
                span: join(lb.span, rb.span),
                kind: ExprKind::Dict(Vec::new()),
            });
        }

        let first_item = if self.at(TokenKind::DoubleStar) {
            self.next();
            DictItem::Spread(self.parse_bitor()?)
        } else {
            let first = self.parse_star_or_named()?;
            if !self.at(TokenKind::Colon) {
                // Set display or set comprehension.
                if self.at_comp_for() {
                    let generators = self.parse_comp_clauses()?;
                    let rb = self.expect(TokenKind::RBrace)?;
                    return Ok(Expr {
                        span: join(lb.span, rb.span),
                        kind: ExprKind::Comp {
                            kind: CompKind::Set,
                            elt: Box::new(first),
                            generators,
                        },
                    });
                }
                let items = self.parse_display_tail(first, TokenKind::RBrace)?;
                let rb = self.expect(TokenKind::RBrace)?;
                return Ok(Expr {
                    span: join(lb.span, rb.span),
                    kind: ExprKind::Set(items),
                });
            }
            self.next();
            let value = self.parse_test()?;
            if self.at_comp_for() {
                let generators = self.parse_comp_clauses()?;
                let rb = self.expect(TokenKind::RBrace)?;
                return Ok(Expr {
                    span: join(lb.span, rb.span),
                    kind: ExprKind::DictComp {
                        key: Box::new(first),
                        value: Box::new(value),
                        generators,
                    },
                });
            }
            DictItem::Pair(first, value)
        };

        let mut items = vec![first_item];
        while self.at(TokenKind::Comma) {
            self.next();
            if self.at(TokenKind::RBrace) {
                break;
            }
            if self.at(TokenKind::DoubleStar) {
                self.next();
                items.push(DictItem::Spread(self.parse_bitor()?));
            } else {
                let key = self.parse_test()?;
                self.expect(TokenKind::Colon)?;
                let value = self.parse_test()?;
                items.push(DictItem::Pair(key, value));
            }
        }
        let rb = self.expect(TokenKind::RBrace)?;
        Ok(Expr {
            span: join(lb.span, rb.span),
            kind: ExprKind::Dict(items),
        })
    }

    fn at_comp_for(&self) -> bool {
        self.at(TokenKind::KwFor)
            || (self.at(TokenKind::KwAsync) && matches!(self.peek_kind_n(1), Some(TokenKind::KwFor)))
    }

    fn parse_comp_clauses(&mut self) -> PResult<Vec<Comprehension>> {
        let mut generators = Vec::new();
        while self.at_comp_for() {
            let start = self.peek_span();
            let is_async = self.at(TokenKind::KwAsync);
            if is_async {
                self.next();
            }
            self.expect(TokenKind::KwFor)?;
            let target = self.parse_target_list()?;
            self.check_target(&target)?;
            self.expect(TokenKind::KwIn)?;
            let iter = self.parse_or_test()?;
            let mut ifs = Vec::new();
            while self.at(TokenKind::KwIf) {
                self.next();
                ifs.push(self.parse_or_test()?);
            }
            generators.push(Comprehension {
                span: join(start, self.prev_span()),
                target,
                iter,
                ifs,
                is_async,
            });
        }
        Ok(generators)
    }

    fn starts_expr(&self) -> bool {
        matches!(
            self.peek_kind(),
            Some(
                TokenKind::Ident(_)
                    | TokenKind::Int(_)
                    | TokenKind::Float(_)
                    | TokenKind::Imag
                    | TokenKind::String { .. }
                    | TokenKind::KwTrue
                    | TokenKind::KwFalse
                    | TokenKind::KwNone
                    | TokenKind::Ellipsis
                    | TokenKind::LParen
                    | TokenKind::LBracket
                    | TokenKind::LBrace
                    | TokenKind::Minus
                    | TokenKind::Plus
                    | TokenKind::Tilde
                    | TokenKind::KwNot
                    | TokenKind::KwLambda
                    | TokenKind::KwAwait
                    | TokenKind::Star
            )
        )
    }

    // ---- token helpers ----

    fn skip_newlines(&mut self) {
        while self.at(TokenKind::Newline) {
            self.next();
        }
    }

    fn expect_stmt_terminator(&mut self) -> PResult<()> {
        if self.at(TokenKind::Newline) {
            self.next();
            Ok(())
        } else if self.at(TokenKind::Eof) {
            Ok(())
        } else {
            Err(self.unexpected("end of line"))
        }
    }

    fn expect_ident(&mut self) -> PResult<Ident> {
        match self.peek_kind() {
            Some(TokenKind::Ident(name)) => {
                let name = name.clone();
                let tok = self.next();
                Ok(Ident {
                    span: tok.span,
                    node: name,
                })
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    /// Consumes the next token only if it has the expected kind.
    fn expect(&mut self, expected: TokenKind) -> PResult<Token> {
        if self.at(expected.clone()) {
            Ok(self.next())
        } else {
            Err(self.unexpected(&expected.to_string()))
        }
    }

    fn unexpected(&self, expected: &str) -> SyntaxError {
        let found = self
            .peek_kind()
            .map(|k| k.to_string())
            .unwrap_or_else(|| "end of file".to_string());
        SyntaxError {
            message: format!("expected {expected}, found {found}"),
            span: self.peek_span(),
        }
    }

    fn error_here(&self, message: &str) -> SyntaxError {
        SyntaxError {
            message: message.to_string(),
            span: self.peek_span(),
        }
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek_kind()
            .is_some_and(|k| mem::discriminant(k) == mem::discriminant(&kind))
    }

    /// Returns the current token and advances; `Eof` is never consumed.
    fn next(&mut self) -> Token {
        match self.tokens.get(self.idx) {
            Some(tok) => {
                if tok.kind != TokenKind::Eof {
                    self.idx += 1;
                }
                tok.clone()
            }
            None => Token {
                kind: TokenKind::Eof,
                span: self.peek_span(),
            },
        }
    }

    fn peek_kind(&self) -> Option<&'a TokenKind> {
        self.tokens.get(self.idx).map(|t| &t.kind)
    }

    fn peek_kind_n(&self, n: usize) -> Option<&'a TokenKind> {
        self.tokens.get(self.idx + n).map(|t| &t.kind)
    }

    fn peek_span(&self) -> Span {
        self.tokens
            .get(self.idx)
            .or_else(|| self.tokens.last())
            .map(|t| t.span)
            .unwrap_or_else(|| span_between(0, 0))
    }

    fn prev_span(&self) -> Span {
        self.idx
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map(|t| t.span)
            .unwrap_or_else(|| self.peek_span())
    }
}

fn aug_assign_op(kind: &TokenKind) -> Option<BinOp> {
    Some(match kind {
        TokenKind::PlusEq => BinOp::Add,
        TokenKind::MinusEq => BinOp::Sub,
        TokenKind::StarEq => BinOp::Mul,
        TokenKind::SlashEq => BinOp::Div,
        TokenKind::DoubleSlashEq => BinOp::FloorDiv,
        TokenKind::PercentEq => BinOp::Mod,
        TokenKind::DoubleStarEq => BinOp::Pow,
        TokenKind::AtEq => BinOp::MatMul,
        TokenKind::AmpEq => BinOp::BitAnd,
        TokenKind::PipeEq => BinOp::BitOr,
        TokenKind::CaretEq => BinOp::BitXor,
        TokenKind::LShiftEq => BinOp::LShift,
        TokenKind::RShiftEq => BinOp::RShift,
        _ => return None,
    })
}

/// Parses the replacement fields of f-string contents found at `offset`.
/// Each field is parsed as if parenthesized, so it may span lines.
fn format_fields(text: &str, offset: usize) -> PResult<Vec<Expr>> {
    let ranges = replacement_fields(text).map_err(|err| SyntaxError {
        message: err.message.to_string(),
        span: span_between(offset + err.offset, offset + err.offset + 1),
    })?;
    ranges
        .into_iter()
        .map(|range| -> PResult<Expr> {
            let source = format!("({})", &text[range.clone()]);
            let tokens = Lexer::at_offset(&source, offset + range.start - 1).lex()?;
            Parser::new(&tokens).parse_expr_eof()
        })
        .collect()
}
