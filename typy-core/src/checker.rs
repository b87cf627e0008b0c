#![forbid(unsafe_code)]

//! Body checking: statements, assignments and control flow.
//!
//! Expression inference lives in `infer`, call checking in `calls` and
//! narrowing in `narrow`; all of them extend [`Checker`].

use std::collections::{HashMap, HashSet};

use typy_ast::{
    AugAssignStmt, Block, ClassDef, Expr, ExprKind, ForStmt, FunctionDef, IfStmt, Module, ReturnStmt, Span, Stmt,
    TryStmt, WhileStmt, WithStmt,
};

use crate::diagnostics::{DiagnosticCode, Diagnostics};
use crate::scope::{BindingKind, FunctionId, ScopeId, ScopeKind, SymbolTable, decorator_name};
use crate::types::{Type, is_assignable};

/// A binding as seen from a checked expression: owner scope and name.
pub(crate) type Key = (ScopeId, String);

/// Types a test proves for the bindings it mentions.
pub(crate) type Narrowing = HashMap<Key, Type>;

/// Narrowed types in effect for one region. `None` masks an outer narrowing.
#[derive(Debug, Default)]
struct Frame {
    types: HashMap<Key, Option<Type>>,
    /// Lookups do not continue past a barrier (function and class bodies).
    barrier: bool,
}

impl Frame {
    fn barrier() -> Self {
        Self {
            types: HashMap::new(),
            barrier: true,
        }
    }
}

#[derive(Debug)]
struct FunctionContext {
    returns: Option<Type>,
    is_generator: bool,
}

pub struct Checker<'t, 'ast> {
    pub(crate) table: &'t mut SymbolTable<'ast>,
    diags: &'t mut Diagnostics,
    pub(crate) scope: ScopeId,
    frames: Vec<Frame>,
    functions: Vec<FunctionContext>,
    /// Diagnostics are dropped while positive (lazy inference).
    quiet: u32,
    pub(crate) resolving: HashSet<Key>,
}

/// Checks every statement of `module` against the resolved symbol table.
pub fn check_module<'ast>(module: &Module, table: &mut SymbolTable<'ast>, diags: &mut Diagnostics) {
    let scope = table.module_scope();
    let mut checker = Checker {
        table,
        diags,
        scope,
        frames: vec![Frame::barrier()],
        functions: Vec::new(),
        quiet: 0,
        resolving: HashSet::new(),
    };
    checker.stmts(&module.body);
}

impl<'t, 'ast> Checker<'t, 'ast> {
    pub(crate) fn report(&mut self, code: DiagnosticCode, span: Span, message: String) {
        if self.quiet == 0 {
            self.diags.add(code, span, message);
        }
    }

    pub(crate) fn mismatch(&mut self, span: Span, what: &str, expected: &Type, got: &Type) {
        self.report(
            DiagnosticCode::TypeMismatch,
            span,
            format!(
                "type mismatch for {what}: expected `{}`, got `{}`",
                expected.display(),
                got.display()
            ),
        );
    }

    pub(crate) fn assignable(&self, target: &Type, value: &Type) -> bool {
        is_assignable(target, value, &*self.table)
    }

    pub(crate) fn key(&self, name: &str) -> Key {
        (self.table.resolve_store(self.scope, name), name.to_string())
    }

    // ---- narrowing frames ----

    pub(crate) fn push_frame(&mut self, narrowing: Narrowing) {
        self.frames.push(Frame {
            types: narrowing.into_iter().map(|(k, t)| (k, Some(t))).collect(),
            barrier: false,
        });
    }

    fn pop_frame(&mut self) -> HashMap<Key, Option<Type>> {
        self.frames.pop().map(|f| f.types).unwrap_or_default()
    }

    pub(crate) fn drop_frame(&mut self) {
        self.frames.pop();
    }

    pub(crate) fn set_narrowed(&mut self, key: Key, ty: Option<Type>) {
        if let Some(frame) = self.frames.last_mut() {
            frame.types.insert(key, ty);
        }
    }

    pub(crate) fn apply(&mut self, narrowing: Narrowing) {
        for (key, ty) in narrowing {
            self.set_narrowed(key, Some(ty));
        }
    }

    pub(crate) fn narrowed(&self, key: &Key) -> Option<Type> {
        for frame in self.frames.iter().rev() {
            if let Some(ty) = frame.types.get(key) {
                return ty.clone();
            }
            if frame.barrier {
                break;
            }
        }
        None
    }

    /// Runs `f` in `scope` without the current narrowing and without reporting.
    pub(crate) fn detached<R>(&mut self, scope: ScopeId, f: impl FnOnce(&mut Self) -> R) -> R {
        let saved = std::mem::replace(&mut self.scope, scope);
        self.frames.push(Frame::barrier());
        self.quiet += 1;
        let result = f(self);
        self.quiet -= 1;
        self.frames.pop();
        self.scope = saved;
        result
    }

    pub(crate) fn quietly<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.quiet += 1;
        let result = f(self);
        self.quiet -= 1;
        result
    }

    /// Runs `f` in a nested scope behind a narrowing barrier.
    pub(crate) fn enter<R>(&mut self, scope: ScopeId, f: impl FnOnce(&mut Self) -> R) -> R {
        let saved = std::mem::replace(&mut self.scope, scope);
        self.frames.push(Frame::barrier());
        let result = f(self);
        self.frames.pop();
        self.scope = saved;
        result
    }

    fn mask_assigned(&mut self, blocks: &[&Block]) {
        let mut names = Vec::new();
        for block in blocks {
            assigned_names(&block.stmts, &mut names);
        }
        for name in names {
            let key = self.key(&name);
            self.set_narrowed(key, None);
        }
    }

    /// Merges the frames of the branches that fall through.
    fn merge(&mut self, branches: Vec<HashMap<Key, Option<Type>>>) {
        if branches.is_empty() {
            return;
        }
        let keys: HashSet<Key> = branches.iter().flat_map(|b| b.keys().cloned()).collect();
        for key in keys {
            let mut types = Vec::new();
            let mut masked = false;
            for branch in &branches {
                match branch.get(&key) {
                    Some(Some(ty)) => types.push(ty.clone()),
                    Some(None) => masked = true,
                    None => match self.narrowed(&key) {
                        Some(ty) => types.push(ty),
                        None => masked = true,
                    },
                }
            }
            let merged = if masked { None } else { Some(Type::union(types)) };
            self.set_narrowed(key, merged);
        }
    }

    // ---- statements ----

    fn stmts(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            self.stmt(stmt);
        }
    }

    fn block(&mut self, block: &Block) {
        self.stmts(&block.stmts);
    }

    fn stmt(&mut self, stmt: &Stmt) {
        typy_ast::ensure_stack(|| self.stmt_inner(stmt))
    }

    fn stmt_inner(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Expr(e) => {
                self.infer(e);
            }
            Stmt::Assign(a) => {
                let ty = match a.targets.as_slice() {
                    [target] => match self.target_declared(target) {
                        Some(declared) => self.infer_expected(&a.value, &declared),
                        None => self.infer(&a.value),
                    },
                    _ => self.infer(&a.value),
                };
                for target in &a.targets {
                    self.assign(target, &ty, Some(&a.value));
                }
            }
            Stmt::AnnAssign(a) => match &a.value {
                Some(value) => {
                    let ty = match self.target_declared(&a.target) {
                        Some(declared) => self.infer_expected(value, &declared),
                        None => self.infer(value),
                    };
                    self.assign(&a.target, &ty, Some(value));
                }
                None => {
                    if let ExprKind::Attribute { value, .. } = &a.target.kind {
                        self.infer(value);
                    }
                }
            },
            Stmt::AugAssign(a) => self.aug_assign(a),
            Stmt::FunctionDef(f) => self.function_def(f),
            Stmt::ClassDef(c) => self.class_def(c),
            Stmt::Return(r) => self.return_stmt(r),
            Stmt::Pass(_) | Stmt::Break(_) | Stmt::Continue(_) => {}
            Stmt::If(s) => self.if_stmt(s),
            Stmt::While(s) => self.while_stmt(s),
            Stmt::For(s) => self.for_stmt(s),
            Stmt::Import(_) | Stmt::ImportFrom(_) | Stmt::Global(_) | Stmt::Nonlocal(_) => {}
            Stmt::Raise(s) => {
                if let Some(exc) = &s.exc {
                    self.infer(exc);
                }
                if let Some(cause) = &s.cause {
                    self.infer(cause);
                }
            }
            Stmt::Assert(s) => {
                self.infer(&s.test);
                let (positive, _) = self.narrow(&s.test);
                if let Some(msg) = &s.msg {
                    self.infer(msg);
                }
                self.apply(positive);
            }
            Stmt::Try(s) => self.try_stmt(s),
            Stmt::With(s) => self.with_stmt(s),
            Stmt::Delete(s) => {
                for target in &s.targets {
                    self.infer(target);
                }
            }
        }
    }

    /// Declared type of a plain name target, used as the expected type of the value.
    fn target_declared(&self, target: &Expr) -> Option<Type> {
        let ExprKind::Name(name) = &target.kind else {
            return None;
        };
        let store = self.table.resolve_store(self.scope, name);
        self.table.binding(store, name).and_then(|b| b.declared.clone())
    }

    fn aug_assign(&mut self, a: &AugAssignStmt) {
        let current = self.infer(&a.target);
        let value = self.infer(&a.value);
        let result = self.binary_op(a.op, &current, &value, a.span);
        match &a.target.kind {
            ExprKind::Name(name) => self.assign_name(name, a.target.span, &result, Some(&a.value)),
            _ => self.assign(&a.target, &result, Some(&a.value)),
        }
    }

    // ---- assignment ----

    pub(crate) fn assign(&mut self, target: &Expr, ty: &Type, value: Option<&Expr>) {
        match &target.kind {
            ExprKind::Name(name) => self.assign_name(name, target.span, ty, value),
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                let types = self.unpack(items, ty, target.span);
                for (item, item_ty) in items.iter().zip(types) {
                    match &item.kind {
                        ExprKind::Starred(inner) => self.assign(inner, &item_ty, None),
                        _ => self.assign(item, &item_ty, None),
                    }
                }
            }
            ExprKind::Starred(inner) => self.assign(inner, ty, None),
            ExprKind::Attribute { value: obj, attr } => self.assign_attribute(obj, &attr.node, attr.span, ty, value),
            ExprKind::Subscript { value: obj, index } => {
                let span = value.map_or(target.span, |v| v.span);
                self.assign_subscript(obj, index, ty, span);
            }
            _ => {
                self.infer(target);
            }
        }
    }

    /// Binds a target that starts fresh on every visit (comprehension targets, `except` names).
    pub(crate) fn bind_fresh(&mut self, target: &Expr, ty: &Type) {
        match &target.kind {
            ExprKind::Name(name) => self.bind_name_fresh(name, ty),
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                let types = self.unpack(items, ty, target.span);
                for (item, item_ty) in items.iter().zip(types) {
                    match &item.kind {
                        ExprKind::Starred(inner) => self.bind_fresh(inner, &item_ty),
                        _ => self.bind_fresh(item, &item_ty),
                    }
                }
            }
            ExprKind::Starred(inner) => self.bind_fresh(inner, ty),
            _ => self.assign(target, ty, None),
        }
    }

    pub(crate) fn bind_name_fresh(&mut self, name: &str, ty: &Type) {
        let key = self.key(name);
        if let Some(binding) = self.table.binding_mut(key.0, name) {
            if binding.declared.is_none() && binding.inferred.is_none() {
                binding.inferred = Some(ty.clone());
            }
        }
        self.set_narrowed(key, Some(ty.clone()));
    }

    /// Element types for the items of an unpacking target.
    fn unpack(&mut self, items: &[Expr], ty: &Type, span: Span) -> Vec<Type> {
        let star = items.iter().position(|i| matches!(i.kind, ExprKind::Starred(_)));
        if let Type::Generic {
            base: crate::types::GenericBase::Tuple,
            args,
        } = ty
        {
            return match star {
                None if args.len() == items.len() => args.clone(),
                None => {
                    self.report(
                        DiagnosticCode::UnsupportedOperation,
                        span,
                        format!("cannot unpack {} values into {} targets", args.len(), items.len()),
                    );
                    vec![Type::Error; items.len()]
                }
                Some(i) => {
                    let after = items.len() - i - 1;
                    if args.len() < items.len() - 1 {
                        self.report(
                            DiagnosticCode::UnsupportedOperation,
                            span,
                            format!(
                                "cannot unpack {} values into at least {} targets",
                                args.len(),
                                items.len() - 1
                            ),
                        );
                        return vec![Type::Error; items.len()];
                    }
                    let mut types: Vec<Type> = args[..i].to_vec();
                    let middle = &args[i..args.len() - after];
                    types.push(Type::list(if middle.is_empty() {
                        Type::Unknown
                    } else {
                        Type::union(middle.iter().cloned())
                    }));
                    types.extend(args[args.len() - after..].iter().cloned());
                    types
                }
            };
        }
        let elem = self.iter_element(ty, span);
        items
            .iter()
            .map(|item| match item.kind {
                ExprKind::Starred(_) => Type::list(elem.clone()),
                _ => elem.clone(),
            })
            .collect()
    }

    pub(crate) fn assign_name(&mut self, name: &str, span: Span, ty: &Type, value: Option<&Expr>) {
        let key = self.key(name);
        let Some(binding) = self.table.binding(key.0, name) else {
            return;
        };
        let kind = binding.kind.clone();
        let declared = binding.declared.clone();
        let inferred = binding.inferred.clone();
        let first_value = binding.first_value;
        match kind {
            BindingKind::Variable => {}
            BindingKind::Parameter if declared.is_some() => {}
            BindingKind::Parameter => {
                self.set_narrowed(key, None);
                return;
            }
            _ => return,
        }
        let is_first = match (value, first_value) {
            (Some(v), Some(f)) => std::ptr::eq(v, f),
            _ => false,
        };
        let report_span = value.map_or(span, |v| v.span);
        let what = format!("`{name}`");

        let binding_ty = match declared {
            Some(declared) => {
                if !self.assignable(&declared, ty) {
                    self.mismatch(report_span, &what, &declared, ty);
                }
                declared
            }
            None => {
                let prior = match inferred {
                    Some(prior) => Some(prior),
                    None if is_first || first_value.is_none() => None,
                    None => Some(self.lazy_binding_type(key.0, name)),
                };
                let next = match prior {
                    None if *ty == Type::Error => Type::Unknown,
                    None => ty.clone(),
                    Some(prior) if prior.is_escape() => prior,
                    Some(prior) if prior.is_none() && !ty.is_none() && !ty.is_escape() => Type::optional(ty.clone()),
                    Some(prior) if prior.is_partial() && self.assignable(&prior, ty) && !ty.is_escape() => ty.clone(),
                    Some(prior) => {
                        if !self.assignable(&prior, ty) {
                            self.mismatch(report_span, &what, &prior, ty);
                        }
                        prior
                    }
                };
                if let Some(binding) = self.table.binding_mut(key.0, name) {
                    binding.inferred = Some(next.clone());
                }
                next
            }
        };

        let narrowed = match &binding_ty {
            Type::Union(_) if !ty.is_escape() && !ty.is_partial() && self.assignable(&binding_ty, ty) => {
                Some(ty.clone())
            }
            _ => None,
        };
        self.set_narrowed(key, narrowed);
    }

    fn assign_attribute(&mut self, obj: &Expr, attr: &str, attr_span: Span, ty: &Type, value: Option<&Expr>) {
        let receiver = self.infer(obj);
        let report_span = value.map_or(attr_span, |v| v.span);
        let Type::Instance(class) = &receiver else {
            if !receiver.is_escape() {
                self.attribute(&receiver, attr, attr_span);
            }
            return;
        };
        let what = format!("attribute `{attr}`");
        match self.find_member(class.id, attr) {
            crate::infer::Lookup::InstanceAttr(owner) => {
                let Some(info) = self.table.class(owner).attributes.get(attr) else {
                    return;
                };
                let is_first = match (value, info.value) {
                    (Some(v), Some(f)) => std::ptr::eq(v, f),
                    _ => false,
                };
                if is_first && info.declared.is_none() {
                    return;
                }
                let expected = self.instance_attr_type(owner, attr);
                if !self.assignable(&expected, ty) {
                    self.mismatch(report_span, &what, &expected, ty);
                }
            }
            crate::infer::Lookup::ClassVar(scope) => {
                let expected = self.binding_type(scope, attr);
                if !self.assignable(&expected, ty) {
                    self.mismatch(report_span, &what, &expected, ty);
                }
            }
            crate::infer::Lookup::Missing => {
                self.report(
                    DiagnosticCode::UnknownAttribute,
                    attr_span,
                    format!("`{}` has no attribute `{attr}`", class.name),
                );
            }
            _ => {}
        }
    }

    fn assign_subscript(&mut self, obj: &Expr, index: &Expr, ty: &Type, span: Span) {
        use crate::types::{GenericBase, Primitive};

        let container = self.infer(obj);
        let idx = self.infer(index);
        let is_slice = matches!(index.kind, ExprKind::Slice { .. });
        match &container {
            Type::Generic {
                base: GenericBase::List,
                ..
            } => {
                if is_slice {
                    return;
                }
                self.check_index(&idx, index.span, &container);
                let elem = container.arg(0).clone();
                if !self.assignable(&elem, ty) {
                    let what = format!("item of `{}`", container.display());
                    self.mismatch(span, &what, &elem, ty);
                }
            }
            Type::Generic {
                base: GenericBase::Dict,
                ..
            } => {
                let key = container.arg(0).clone();
                if !self.assignable(&key, &idx) {
                    self.report(
                        DiagnosticCode::TypeMismatch,
                        index.span,
                        format!(
                            "invalid key type `{}` for `{}`; expected `{}`",
                            idx.display(),
                            container.display(),
                            key.display()
                        ),
                    );
                }
                let value = container.arg(1).clone();
                if !self.assignable(&value, ty) {
                    let what = format!("item of `{}`", container.display());
                    self.mismatch(span, &what, &value, ty);
                }
            }
            Type::Generic {
                base: GenericBase::Tuple | GenericBase::VarTuple | GenericBase::FrozenSet | GenericBase::Range,
                ..
            }
            | Type::Primitive(Primitive::Str | Primitive::Bytes) => {
                self.report(
                    DiagnosticCode::UnsupportedOperation,
                    obj.span,
                    format!("`{}` does not support item assignment", container.display()),
                );
            }
            Type::Instance(class) => {
                if matches!(self.find_member(class.id, "__setitem__"), crate::infer::Lookup::Missing) {
                    self.report(
                        DiagnosticCode::UnsupportedOperation,
                        obj.span,
                        format!("`{}` does not support item assignment", class.name),
                    );
                }
            }
            _ => {}
        }
    }

    // ---- definitions ----

    fn function_def(&mut self, f: &FunctionDef) {
        for decorator in &f.decorators {
            self.infer(decorator);
        }
        let Some(scope) = self.table.scope_of(f.span, ScopeKind::Function) else {
            return;
        };
        let Some(fid) = self.table.function_by_scope(scope) else {
            return;
        };

        let params = self.table.function(fid).signature.params.clone();
        for (param, sig_param) in f.params.iter().zip(params.iter()) {
            let Some(default) = &param.default else {
                continue;
            };
            let declared = self
                .table
                .binding(scope, &param.name.node)
                .and_then(|b| b.annotation)
                .is_some();
            let ty = if declared {
                self.infer_expected(default, &sig_param.ty)
            } else {
                self.infer(default)
            };
            if declared && !self.assignable(&sig_param.ty, &ty) {
                let what = format!("`{}`", param.name.node);
                self.mismatch(default.span, &what, &sig_param.ty, &ty);
            }
        }

        let info = self.table.function(fid);
        let context = FunctionContext {
            returns: info.returns.clone(),
            is_generator: info.is_generator,
        };
        self.functions.push(context);
        self.enter(scope, |c| c.block(&f.body));
        self.functions.pop();
        self.check_missing_return(fid, f);
    }

    fn check_missing_return(&mut self, fid: FunctionId, f: &FunctionDef) {
        let info = self.table.function(fid);
        let (Some(ret), Some(annotation)) = (&info.returns, &f.returns) else {
            return;
        };
        if ret.is_escape() || info.is_generator || self.assignable(ret, &Type::NONE) {
            return;
        }
        if is_stub(&f.body) || exits(&f.body.stmts) {
            return;
        }
        let skipped = f
            .decorators
            .iter()
            .any(|d| matches!(decorator_name(d), "abstractmethod" | "overload"));
        if skipped {
            return;
        }
        let message = format!(
            "missing return statement in `{}`: declared return type `{}`",
            f.name.node,
            ret.display()
        );
        self.report(DiagnosticCode::TypeMismatch, annotation.span, message);
    }

    fn class_def(&mut self, c: &ClassDef) {
        for decorator in &c.decorators {
            self.infer(decorator);
        }
        for base in &c.bases {
            self.infer(base);
        }
        for keyword in &c.keywords {
            self.infer(&keyword.value);
        }
        let Some(scope) = self.table.scope_of(c.span, ScopeKind::Class) else {
            return;
        };
        let saved = std::mem::take(&mut self.functions);
        self.enter(scope, |checker| checker.block(&c.body));
        self.functions = saved;
    }

    fn return_stmt(&mut self, r: &ReturnStmt) {
        let Some(context) = self.functions.last() else {
            if let Some(value) = &r.value {
                self.infer(value);
            }
            return;
        };
        let declared = if context.is_generator {
            None
        } else {
            context.returns.clone()
        };
        match (&r.value, declared) {
            (Some(value), Some(expected)) => {
                let ty = self.infer_expected(value, &expected);
                if !self.assignable(&expected, &ty) {
                    self.report(
                        DiagnosticCode::TypeMismatch,
                        value.span,
                        format!(
                            "incompatible return value: expected `{}`, got `{}`",
                            expected.display(),
                            ty.display()
                        ),
                    );
                }
            }
            (None, Some(expected)) => {
                if !self.assignable(&expected, &Type::NONE) {
                    self.report(
                        DiagnosticCode::TypeMismatch,
                        r.span,
                        format!(
                            "incompatible return value: expected `{}`, got `None`",
                            expected.display()
                        ),
                    );
                }
            }
            (Some(value), None) => {
                self.infer(value);
            }
            (None, None) => {}
        }
    }

    // ---- control flow ----

    fn if_stmt(&mut self, s: &IfStmt) {
        self.infer(&s.test);
        let (positive, negative) = self.narrow(&s.test);

        self.push_frame(positive);
        self.block(&s.body);
        let body = self.pop_frame();

        self.push_frame(negative);
        if let Some(orelse) = &s.orelse {
            self.block(orelse);
        }
        let other = self.pop_frame();

        let mut live = Vec::new();
        if !terminates(&s.body.stmts) {
            live.push(body);
        }
        if !s.orelse.as_ref().is_some_and(|o| terminates(&o.stmts)) {
            live.push(other);
        }
        self.merge(live);
    }

    fn while_stmt(&mut self, s: &WhileStmt) {
        self.mask_assigned(&[&s.body]);
        self.infer(&s.test);
        let (positive, negative) = self.narrow(&s.test);
        self.push_frame(positive);
        self.block(&s.body);
        self.drop_frame();
        if !contains_break(&s.body.stmts) {
            self.apply(negative);
        }
        if let Some(orelse) = &s.orelse {
            self.block(orelse);
        }
    }

    fn for_stmt(&mut self, s: &ForStmt) {
        let iterable = self.infer(&s.iter);
        let elem = if s.is_async {
            Type::Unknown
        } else {
            self.iter_element(&iterable, s.iter.span)
        };
        self.mask_assigned(&[&s.body]);
        let mut target_names = Vec::new();
        target_names_of(&s.target, &mut target_names);
        for name in target_names {
            let key = self.key(&name);
            self.set_narrowed(key, None);
        }

        self.push_frame(Narrowing::new());
        self.assign(&s.target, &elem, None);
        self.block(&s.body);
        self.drop_frame();
        if let Some(orelse) = &s.orelse {
            self.block(orelse);
        }
    }

    fn try_stmt(&mut self, s: &TryStmt) {
        let mut blocks = vec![&s.body];
        blocks.extend(s.handlers.iter().map(|h| &h.body));
        self.mask_assigned(&blocks);

        self.push_frame(Narrowing::new());
        self.block(&s.body);
        self.drop_frame();

        for handler in &s.handlers {
            let exc = match &handler.ty {
                Some(ty) => {
                    let class = self.infer(ty);
                    self.exception_instance(&class)
                }
                None => Type::Any,
            };
            self.push_frame(Narrowing::new());
            if let Some(name) = &handler.name {
                self.bind_name_fresh(&name.node, &exc);
            }
            self.block(&handler.body);
            self.drop_frame();
        }
        if let Some(orelse) = &s.orelse {
            self.block(orelse);
        }
        if let Some(finalbody) = &s.finalbody {
            self.block(finalbody);
        }
    }

    fn with_stmt(&mut self, s: &WithStmt) {
        for item in &s.items {
            let context = self.infer(&item.context);
            let entered = self.entered(&context, s.is_async);
            if let Some(target) = &item.target {
                self.assign(target, &entered, None);
            }
        }
        self.block(&s.body);
    }

    /// Instance type bound by `except T as e`.
    fn exception_instance(&self, class: &Type) -> Type {
        match class {
            Type::Class(c) => Type::Instance(c.clone()),
            Type::Generic {
                base: crate::types::GenericBase::Type,
                args,
            } => args.first().cloned().unwrap_or(Type::Any),
            Type::Generic {
                base: crate::types::GenericBase::Tuple,
                args,
            } => Type::union(args.iter().map(|a| self.exception_instance(a))),
            _ => Type::Any,
        }
    }
}

/// Body is only `pass`, `...` and docstrings.
fn is_stub(body: &Block) -> bool {
    body.stmts.iter().all(|s| match s {
        Stmt::Pass(_) => true,
        Stmt::Expr(e) => matches!(e.kind, ExprKind::Ellipsis | ExprKind::StrLit(_)),
        _ => false,
    })
}

fn is_infinite(test: &Expr) -> bool {
    matches!(test.kind, ExprKind::BoolLit(true) | ExprKind::IntLit(1))
}

/// Contains a `return`, a `raise` or an infinite loop outside nested definitions.
fn exits(stmts: &[Stmt]) -> bool {
    stmts.iter().any(|s| match s {
        Stmt::Return(_) | Stmt::Raise(_) => true,
        Stmt::If(i) => exits(&i.body.stmts) || i.orelse.as_ref().is_some_and(|o| exits(&o.stmts)),
        Stmt::While(w) => is_infinite(&w.test) || exits(&w.body.stmts),
        Stmt::For(f) => exits(&f.body.stmts) || f.orelse.as_ref().is_some_and(|o| exits(&o.stmts)),
        Stmt::Try(t) => {
            exits(&t.body.stmts)
                || t.handlers.iter().any(|h| exits(&h.body.stmts))
                || t.orelse.as_ref().is_some_and(|o| exits(&o.stmts))
                || t.finalbody.as_ref().is_some_and(|o| exits(&o.stmts))
        }
        Stmt::With(w) => exits(&w.body.stmts),
        _ => false,
    })
}

/// The block never falls through to the next statement.
fn terminates(stmts: &[Stmt]) -> bool {
    match stmts.last() {
        Some(Stmt::Return(_) | Stmt::Raise(_) | Stmt::Break(_) | Stmt::Continue(_)) => true,
        Some(Stmt::If(i)) => {
            terminates(&i.body.stmts) && i.orelse.as_ref().is_some_and(|o| terminates(&o.stmts))
        }
        Some(Stmt::With(w)) => terminates(&w.body.stmts),
        Some(Stmt::While(w)) => is_infinite(&w.test) && !contains_break(&w.body.stmts),
        _ => false,
    }
}

/// `break` that leaves this loop; nested loops and definitions are not searched.
fn contains_break(stmts: &[Stmt]) -> bool {
    stmts.iter().any(|s| match s {
        Stmt::Break(_) => true,
        Stmt::If(i) => contains_break(&i.body.stmts) || i.orelse.as_ref().is_some_and(|o| contains_break(&o.stmts)),
        Stmt::Try(t) => {
            contains_break(&t.body.stmts)
                || t.handlers.iter().any(|h| contains_break(&h.body.stmts))
                || t.orelse.as_ref().is_some_and(|o| contains_break(&o.stmts))
                || t.finalbody.as_ref().is_some_and(|o| contains_break(&o.stmts))
        }
        Stmt::With(w) => contains_break(&w.body.stmts),
        _ => false,
    })
}

fn target_names_of(target: &Expr, out: &mut Vec<String>) {
    match &target.kind {
        ExprKind::Name(n) => out.push(n.clone()),
        ExprKind::Tuple(items) | ExprKind::List(items) => {
            for item in items {
                target_names_of(item, out);
            }
        }
        ExprKind::Starred(inner) => target_names_of(inner, out),
        _ => {}
    }
}

/// Plain names rebound anywhere in `stmts`, nested definitions excluded.
fn assigned_names(stmts: &[Stmt], out: &mut Vec<String>) {
    for stmt in stmts {
        match stmt {
            Stmt::Assign(a) => {
                for target in &a.targets {
                    target_names_of(target, out);
                }
            }
            Stmt::AnnAssign(a) => target_names_of(&a.target, out),
            Stmt::AugAssign(a) => target_names_of(&a.target, out),
            Stmt::For(f) => {
                target_names_of(&f.target, out);
                assigned_names(&f.body.stmts, out);
                if let Some(o) = &f.orelse {
                    assigned_names(&o.stmts, out);
                }
            }
            Stmt::While(w) => {
                assigned_names(&w.body.stmts, out);
                if let Some(o) = &w.orelse {
                    assigned_names(&o.stmts, out);
                }
            }
            Stmt::If(i) => {
                assigned_names(&i.body.stmts, out);
                if let Some(o) = &i.orelse {
                    assigned_names(&o.stmts, out);
                }
            }
            Stmt::With(w) => {
                for item in &w.items {
                    if let Some(t) = &item.target {
                        target_names_of(t, out);
                    }
                }
                assigned_names(&w.body.stmts, out);
            }
            Stmt::Try(t) => {
                assigned_names(&t.body.stmts, out);
                for h in &t.handlers {
                    if let Some(n) = &h.name {
                        out.push(n.node.clone());
                    }
                    assigned_names(&h.body.stmts, out);
                }
                for block in [&t.orelse, &t.finalbody].into_iter().flatten() {
                    assigned_names(&block.stmts, out);
                }
            }
            Stmt::Delete(d) => {
                for target in &d.targets {
                    target_names_of(target, out);
                }
            }
            _ => {}
        }
    }
}
