#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashMap};

use typy_ast::{
    Block, ClassDef, Comprehension, DictItem, Expr, ExprKind, FunctionDef, Module, Param, Span, Stmt,
    span_start,
};

use crate::diagnostics::{DiagnosticCode, Diagnostics};
use crate::types::{ClassHierarchy, ClassId, ClassRef, FunctionType, Type};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    Module,
    Class,
    Function,
    Lambda,
    Comprehension,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BindingKind {
    Variable,
    Parameter,
    Function(FunctionId),
    Class(ClassId),
    /// `origin` is the fully qualified imported name, e.g. `typing.Optional`.
    Import { origin: String },
    /// `global x`: the binding lives in the module scope.
    Global,
    /// `nonlocal x`: the binding lives in an enclosing function scope.
    Nonlocal,
}

impl BindingKind {
    fn describe(&self) -> &'static str {
        match self {
            BindingKind::Variable => "a variable",
            BindingKind::Parameter => "a parameter",
            BindingKind::Function(_) => "a function",
            BindingKind::Class(_) => "a class",
            BindingKind::Import { .. } => "an import",
            BindingKind::Global => "global",
            BindingKind::Nonlocal => "nonlocal",
        }
    }

    fn is_redirect(&self) -> bool {
        matches!(self, BindingKind::Global | BindingKind::Nonlocal)
    }
}

/// An annotation expression and the scope it is evaluated in.
#[derive(Clone, Copy, Debug)]
pub struct Annotation<'ast> {
    pub expr: &'ast Expr,
    pub scope: ScopeId,
}

#[derive(Clone, Debug)]
pub struct Binding<'ast> {
    pub kind: BindingKind,
    /// First declaration.
    pub span: Span,
    pub declared: Option<Type>,
    /// Set by the checker from the first assignment it visits.
    pub inferred: Option<Type>,
    pub annotation: Option<Annotation<'ast>>,
    /// Right-hand side of the first plain `name = value`.
    pub first_value: Option<&'ast Expr>,
    pub(crate) lazy: Option<Type>,
}

impl<'ast> Binding<'ast> {
    fn new(kind: BindingKind, span: Span) -> Self {
        Self {
            kind,
            span,
            declared: None,
            inferred: None,
            annotation: None,
            first_value: None,
            lazy: None,
        }
    }
}

#[derive(Debug)]
pub struct Scope<'ast> {
    pub kind: ScopeKind,
    pub parent: Option<ScopeId>,
    pub span: Span,
    pub bindings: BTreeMap<String, Binding<'ast>>,
    /// `from m import *` seen; unresolved names are not reported.
    pub star_import: bool,
}

/// `self.<name>` assigned inside a method.
#[derive(Clone, Debug)]
pub struct InstanceAttr<'ast> {
    pub span: Span,
    pub declared: Option<Type>,
    pub annotation: Option<Annotation<'ast>>,
    pub value: Option<&'ast Expr>,
    /// Method scope the value is evaluated in.
    pub scope: ScopeId,
    pub(crate) lazy: Option<Type>,
}

#[derive(Debug)]
pub struct ClassInfo<'ast> {
    pub id: ClassId,
    pub name: String,
    pub def: &'ast ClassDef,
    pub scope: ScopeId,
    pub enclosing: ScopeId,
    /// Instance types of the direct bases; `Any` for bases that could not be resolved.
    pub bases: Vec<Type>,
    pub attributes: BTreeMap<String, InstanceAttr<'ast>>,
    pub is_dataclass: bool,
    /// Synthesized `__init__` for dataclasses.
    pub init: Option<FunctionType>,
}

impl ClassInfo<'_> {
    pub fn class_ref(&self) -> ClassRef {
        ClassRef {
            id: self.id,
            name: self.name.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FunctionKind {
    Plain,
    Method,
    StaticMethod,
    ClassMethod,
    Property,
    /// Wrapped by a decorator we cannot see through.
    Opaque,
}

#[derive(Debug)]
pub struct FunctionInfo<'ast> {
    pub def: &'ast FunctionDef,
    pub scope: ScopeId,
    pub enclosing: ScopeId,
    pub class: Option<ClassId>,
    pub kind: FunctionKind,
    pub is_generator: bool,
    /// Signature as seen by callers.
    pub signature: FunctionType,
    /// Declared return type as seen by `return` statements in the body.
    pub returns: Option<Type>,
}

#[derive(Debug)]
pub struct SymbolTable<'ast> {
    scopes: Vec<Scope<'ast>>,
    classes: Vec<ClassInfo<'ast>>,
    functions: Vec<FunctionInfo<'ast>>,
    by_node: HashMap<(usize, ScopeKind), ScopeId>,
    pub(crate) reannotations: Vec<Reannotation<'ast>>,
}

/// A second annotation of an already annotated name, compared once both are resolved.
#[derive(Debug)]
pub(crate) struct Reannotation<'ast> {
    pub scope: ScopeId,
    pub name: String,
    pub annotation: Annotation<'ast>,
    pub span: Span,
}

impl<'ast> SymbolTable<'ast> {
    /// Declaration pass followed by annotation resolution.
    pub fn build(module: &'ast Module, diags: &mut Diagnostics) -> SymbolTable<'ast> {
        let mut table = SymbolTable {
            scopes: vec![Scope {
                kind: ScopeKind::Module,
                parent: None,
                span: module.span,
                bindings: BTreeMap::new(),
                star_import: false,
            }],
            classes: Vec::new(),
            functions: Vec::new(),
            by_node: HashMap::new(),
            reannotations: Vec::new(),
        };
        let mut builder = Builder {
            table: &mut table,
            diags: &mut *diags,
            current: ScopeId(0),
            in_function: false,
            loop_depth: 0,
            function: None,
            method_self: None,
        };
        for stmt in &module.body {
            builder.stmt(stmt);
        }
        crate::annotations::resolve_declarations(&mut table, diags);
        table
    }

    pub fn module_scope(&self) -> ScopeId {
        ScopeId(0)
    }

    pub fn scope(&self, id: ScopeId) -> &Scope<'ast> {
        &self.scopes[id.0 as usize]
    }

    pub(crate) fn scope_mut(&mut self, id: ScopeId) -> &mut Scope<'ast> {
        &mut self.scopes[id.0 as usize]
    }

    pub fn scope_count(&self) -> usize {
        self.scopes.len()
    }

    /// Scope opened by the node starting at `span`.
    pub fn scope_of(&self, span: Span, kind: ScopeKind) -> Option<ScopeId> {
        self.by_node.get(&(span_start(span), kind)).copied()
    }

    pub fn class(&self, id: ClassId) -> &ClassInfo<'ast> {
        &self.classes[id.0 as usize]
    }

    pub(crate) fn class_mut(&mut self, id: ClassId) -> &mut ClassInfo<'ast> {
        &mut self.classes[id.0 as usize]
    }

    pub fn classes(&self) -> &[ClassInfo<'ast>] {
        &self.classes
    }

    pub fn class_ref(&self, id: ClassId) -> ClassRef {
        self.class(id).class_ref()
    }

    pub fn function(&self, id: FunctionId) -> &FunctionInfo<'ast> {
        &self.functions[id.0 as usize]
    }

    pub(crate) fn function_mut(&mut self, id: FunctionId) -> &mut FunctionInfo<'ast> {
        &mut self.functions[id.0 as usize]
    }

    pub fn functions(&self) -> &[FunctionInfo<'ast>] {
        &self.functions
    }

    pub fn function_by_scope(&self, scope: ScopeId) -> Option<FunctionId> {
        self.functions
            .iter()
            .position(|f| f.scope == scope)
            .map(|i| FunctionId(i as u32))
    }

    /// Scope holding the binding `name` refers to when read from `from`.
    ///
    /// Class scopes are only visible from their own body.
    pub fn resolve(&self, from: ScopeId, name: &str) -> Option<ScopeId> {
        let mut current = Some(from);
        let mut first = true;
        while let Some(id) = current {
            let scope = self.scope(id);
            if first || scope.kind != ScopeKind::Class {
                if let Some(binding) = scope.bindings.get(name) {
                    match binding.kind {
                        BindingKind::Global => {
                            let module = self.module_scope();
                            return self.scope(module).bindings.get(name).map(|_| module);
                        }
                        BindingKind::Nonlocal => {}
                        _ => return Some(id),
                    }
                }
            }
            first = false;
            current = scope.parent;
        }
        None
    }

    pub fn lookup(&self, from: ScopeId, name: &str) -> Option<(ScopeId, &Binding<'ast>)> {
        let id = self.resolve(from, name)?;
        self.scope(id).bindings.get(name).map(|b| (id, b))
    }

    /// Scope an assignment to `name` in `from` writes to.
    pub fn resolve_store(&self, from: ScopeId, name: &str) -> ScopeId {
        match self.scope(from).bindings.get(name).map(|b| &b.kind) {
            Some(BindingKind::Global) => self.module_scope(),
            Some(BindingKind::Nonlocal) => self
                .scope(from)
                .parent
                .and_then(|p| self.resolve(p, name))
                .unwrap_or(from),
            _ => from,
        }
    }

    pub fn binding(&self, scope: ScopeId, name: &str) -> Option<&Binding<'ast>> {
        self.scope(scope).bindings.get(name)
    }

    pub(crate) fn binding_mut(&mut self, scope: ScopeId, name: &str) -> Option<&mut Binding<'ast>> {
        self.scope_mut(scope).bindings.get_mut(name)
    }

    /// Whether any scope between `from` and the module root saw `from m import *`.
    pub fn has_star_import(&self, from: ScopeId) -> bool {
        let mut current = Some(from);
        while let Some(id) = current {
            let scope = self.scope(id);
            if scope.star_import {
                return true;
            }
            current = scope.parent;
        }
        false
    }

    /// Nearest enclosing scope that is not a comprehension.
    pub fn non_comprehension_scope(&self, from: ScopeId) -> ScopeId {
        let mut id = from;
        while self.scope(id).kind == ScopeKind::Comprehension {
            match self.scope(id).parent {
                Some(p) => id = p,
                None => break,
            }
        }
        id
    }

    fn push_scope(&mut self, kind: ScopeKind, parent: ScopeId, span: Span) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope {
            kind,
            parent: Some(parent),
            span,
            bindings: BTreeMap::new(),
            star_import: false,
        });
        self.by_node.insert((span_start(span), kind), id);
        id
    }
}

impl ClassHierarchy for SymbolTable<'_> {
    fn bases(&self, class: ClassId) -> &[Type] {
        &self.class(class).bases
    }
}

/// Declaration pass.
struct Builder<'t, 'ast, 'd> {
    table: &'t mut SymbolTable<'ast>,
    diags: &'d mut Diagnostics,
    current: ScopeId,
    in_function: bool,
    loop_depth: u32,
    function: Option<FunctionId>,
    /// First parameter of the method being walked, its class and the method scope.
    method_self: Option<(String, ClassId, ScopeId)>,
}

struct Declaration<'ast> {
    kind: BindingKind,
    span: Span,
    annotation: Option<Annotation<'ast>>,
    first_value: Option<&'ast Expr>,
    /// Suppresses the redefinition warning (`@overload`, property setters).
    allow_redefinition: bool,
}

impl<'ast> Declaration<'ast> {
    fn new(kind: BindingKind, span: Span) -> Self {
        Self {
            kind,
            span,
            annotation: None,
            first_value: None,
            allow_redefinition: false,
        }
    }
}

enum Merge {
    Assign,
    Replace,
    Keep,
    Redefine,
    Conflict { old: &'static str, new: &'static str },
}

impl<'t, 'ast, 'd> Builder<'t, 'ast, 'd> {
    fn declare(&mut self, scope: ScopeId, name: &str, decl: Declaration<'ast>) {
        let Declaration {
            kind,
            span,
            annotation,
            first_value,
            allow_redefinition,
        } = decl;

        let Some(existing) = self.table.binding(scope, name) else {
            let mut binding = Binding::new(kind, span);
            binding.annotation = annotation;
            binding.first_value = first_value;
            self.table.scope_mut(scope).bindings.insert(name.to_string(), binding);
            return;
        };
        let previous = existing.span;
        let merge = match (&existing.kind, &kind) {
            (BindingKind::Variable | BindingKind::Parameter, BindingKind::Variable) => Merge::Assign,
            (BindingKind::Global | BindingKind::Nonlocal, _) => Merge::Keep,
            (BindingKind::Import { .. }, _) => Merge::Replace,
            (_, BindingKind::Import { .. }) => Merge::Keep,
            (BindingKind::Function(_), BindingKind::Function(_))
            | (BindingKind::Class(_), BindingKind::Class(_)) => Merge::Redefine,
            (old, new) => Merge::Conflict {
                old: old.describe(),
                new: new.describe(),
            },
        };

        match merge {
            Merge::Assign => {
                let mut reannotated = None;
                if let Some(existing) = self.table.binding_mut(scope, name) {
                    if existing.first_value.is_none() {
                        existing.first_value = first_value;
                    }
                    match (existing.annotation, annotation) {
                        (None, Some(a)) => existing.annotation = Some(a),
                        (Some(_), Some(a)) => reannotated = Some(a),
                        _ => {}
                    }
                }
                if let Some(annotation) = reannotated {
                    self.table.reannotations.push(Reannotation {
                        scope,
                        name: name.to_string(),
                        annotation,
                        span,
                    });
                }
            }
            Merge::Replace => {
                let mut binding = Binding::new(kind, span);
                binding.annotation = annotation;
                binding.first_value = first_value;
                self.table.scope_mut(scope).bindings.insert(name.to_string(), binding);
            }
            Merge::Keep => {}
            Merge::Redefine => {
                if let Some(existing) = self.table.binding_mut(scope, name) {
                    existing.kind = kind;
                    existing.span = span;
                }
                if !allow_redefinition {
                    self.diags.add_with_related(
                        DiagnosticCode::Redefinition,
                        span,
                        format!("redefinition of `{name}`"),
                        vec![(previous, format!("previous definition of `{name}`"))],
                    );
                }
            }
            Merge::Conflict { old, new } => {
                self.diags.add_with_related(
                    DiagnosticCode::SymbolConflictError,
                    span,
                    format!("cannot declare `{name}` as {new}: already declared as {old}"),
                    vec![(previous, format!("previous declaration of `{name}`"))],
                );
            }
        }
    }

    fn declare_here(&mut self, name: &str, decl: Declaration<'ast>) {
        let scope = self.table.resolve_store(self.current, name);
        self.declare(scope, name, decl);
    }

    fn syntax_error(&mut self, span: Span, message: &str) {
        self.diags.add(DiagnosticCode::SyntaxError, span, message);
    }

    fn block(&mut self, block: &'ast Block) {
        for stmt in &block.stmts {
            self.stmt(stmt);
        }
    }

    fn loop_block(&mut self, block: &'ast Block) {
        self.loop_depth += 1;
        self.block(block);
        self.loop_depth -= 1;
    }

    fn stmt(&mut self, stmt: &'ast Stmt) {
        typy_ast::ensure_stack(|| self.stmt_inner(stmt))
    }

    fn stmt_inner(&mut self, stmt: &'ast Stmt) {
        match stmt {
            Stmt::Expr(e) => self.expr(e),
            Stmt::Assign(a) => {
                self.expr(&a.value);
                for target in &a.targets {
                    self.target(target, Some(&a.value), None);
                }
            }
            Stmt::AnnAssign(a) => {
                if let Some(value) = &a.value {
                    self.expr(value);
                }
                let annotation = Annotation {
                    expr: &a.annotation,
                    scope: self.current,
                };
                self.target(&a.target, a.value.as_ref(), Some(annotation));
            }
            Stmt::AugAssign(a) => {
                self.expr(&a.value);
                match &a.target.kind {
                    ExprKind::Name(name) => {
                        self.declare_here(name, Declaration::new(BindingKind::Variable, a.target.span));
                    }
                    _ => self.expr(&a.target),
                }
            }
            Stmt::FunctionDef(f) => self.function_def(f),
            Stmt::ClassDef(c) => self.class_def(c),
            Stmt::Return(r) => {
                if !self.in_function {
                    self.syntax_error(r.span, "`return` outside function");
                }
                if let Some(value) = &r.value {
                    self.expr(value);
                }
            }
            Stmt::Pass(_) => {}
            Stmt::Break(span) => {
                if self.loop_depth == 0 {
                    self.syntax_error(*span, "`break` outside loop");
                }
            }
            Stmt::Continue(span) => {
                if self.loop_depth == 0 {
                    self.syntax_error(*span, "`continue` not properly in loop");
                }
            }
            Stmt::If(s) => {
                self.expr(&s.test);
                self.block(&s.body);
                if let Some(orelse) = &s.orelse {
                    self.block(orelse);
                }
            }
            Stmt::While(s) => {
                self.expr(&s.test);
                self.loop_block(&s.body);
                if let Some(orelse) = &s.orelse {
                    self.block(orelse);
                }
            }
            Stmt::For(s) => {
                self.expr(&s.iter);
                self.target(&s.target, None, None);
                self.loop_block(&s.body);
                if let Some(orelse) = &s.orelse {
                    self.block(orelse);
                }
            }
            Stmt::Import(s) => {
                for alias in &s.names {
                    let (bound, origin, span) = match &alias.asname {
                        Some(asname) => (asname.node.clone(), alias.name.node.clone(), asname.span),
                        None => {
                            let head = alias.name.node.split('.').next().unwrap_or_default().to_string();
                            (head.clone(), head, alias.name.span)
                        }
                    };
                    self.declare_here(&bound, Declaration::new(BindingKind::Import { origin }, span));
                }
            }
            Stmt::ImportFrom(s) => {
                let mut module = ".".repeat(s.level as usize);
                if let Some(m) = &s.module {
                    module.push_str(&m.node);
                }
                if s.star.is_some() {
                    self.table.scope_mut(self.current).star_import = true;
                }
                for alias in &s.names {
                    let origin = if module.ends_with('.') || module.is_empty() {
                        format!("{module}{}", alias.name.node)
                    } else {
                        format!("{module}.{}", alias.name.node)
                    };
                    let (bound, span) = match &alias.asname {
                        Some(asname) => (asname.node.as_str(), asname.span),
                        None => (alias.name.node.as_str(), alias.name.span),
                    };
                    self.declare_here(bound, Declaration::new(BindingKind::Import { origin }, span));
                }
            }
            Stmt::Raise(s) => {
                if let Some(exc) = &s.exc {
                    self.expr(exc);
                }
                if let Some(cause) = &s.cause {
                    self.expr(cause);
                }
            }
            Stmt::Assert(s) => {
                self.expr(&s.test);
                if let Some(msg) = &s.msg {
                    self.expr(msg);
                }
            }
            Stmt::Try(s) => {
                self.block(&s.body);
                for handler in &s.handlers {
                    if let Some(ty) = &handler.ty {
                        self.expr(ty);
                    }
                    if let Some(name) = &handler.name {
                        self.declare_here(&name.node, Declaration::new(BindingKind::Variable, name.span));
                    }
                    self.block(&handler.body);
                }
                if let Some(orelse) = &s.orelse {
                    self.block(orelse);
                }
                if let Some(finalbody) = &s.finalbody {
                    self.block(finalbody);
                }
            }
            Stmt::With(s) => {
                for item in &s.items {
                    self.expr(&item.context);
                    if let Some(target) = &item.target {
                        self.target(target, None, None);
                    }
                }
                self.block(&s.body);
            }
            Stmt::Delete(s) => {
                for target in &s.targets {
                    self.expr(target);
                }
            }
            Stmt::Global(s) => {
                if self.current == self.table.module_scope() {
                    return;
                }
                for name in &s.names {
                    let assigned_before = self
                        .table
                        .binding(self.current, &name.node)
                        .is_some_and(|b| !b.kind.is_redirect());
                    if assigned_before {
                        self.syntax_error(
                            name.span,
                            &format!("name `{}` is assigned to before global declaration", name.node),
                        );
                        continue;
                    }
                    let scope = self.current;
                    self.declare(scope, &name.node, Declaration::new(BindingKind::Global, name.span));
                }
            }
            Stmt::Nonlocal(s) => {
                if self.current == self.table.module_scope() {
                    self.syntax_error(s.span, "nonlocal declaration not allowed at module level");
                    return;
                }
                for name in &s.names {
                    let scope = self.current;
                    self.declare(scope, &name.node, Declaration::new(BindingKind::Nonlocal, name.span));
                }
            }
        }
    }

    /// Binds assignment targets; `value` is only kept for plain names.
    fn target(&mut self, target: &'ast Expr, value: Option<&'ast Expr>, annotation: Option<Annotation<'ast>>) {
        match &target.kind {
            ExprKind::Name(name) => {
                let mut decl = Declaration::new(BindingKind::Variable, target.span);
                decl.first_value = value;
                decl.annotation = annotation;
                self.declare_here(name, decl);
            }
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                for item in items {
                    self.target(item, None, None);
                }
            }
            ExprKind::Starred(inner) => self.target(inner, None, None),
            ExprKind::Attribute { value: obj, attr } => {
                self.expr(obj);
                self.instance_attribute(obj, &attr.node, attr.span, value, annotation);
            }
            _ => self.expr(target),
        }
    }

    fn instance_attribute(
        &mut self,
        obj: &'ast Expr,
        attr: &str,
        span: Span,
        value: Option<&'ast Expr>,
        annotation: Option<Annotation<'ast>>,
    ) {
        let Some((self_name, class, method_scope)) = &self.method_self else {
            return;
        };
        if *method_scope != self.current || !matches!(&obj.kind, ExprKind::Name(n) if n == self_name) {
            return;
        }
        let (class, method_scope) = (*class, *method_scope);
        let attrs = &mut self.table.class_mut(class).attributes;
        match attrs.get_mut(attr) {
            Some(existing) => {
                if existing.annotation.is_none() {
                    existing.annotation = annotation;
                }
            }
            None => {
                attrs.insert(
                    attr.to_string(),
                    InstanceAttr {
                        span,
                        declared: None,
                        annotation,
                        value,
                        scope: method_scope,
                        lazy: None,
                    },
                );
            }
        }
    }

    fn function_def(&mut self, f: &'ast FunctionDef) {
        for decorator in &f.decorators {
            self.expr(decorator);
        }
        for param in &f.params {
            if let Some(default) = &param.default {
                self.expr(default);
            }
        }

        let enclosing = self.current;
        let class = match self.table.scope(enclosing).kind {
            ScopeKind::Class => self
                .table
                .classes
                .iter()
                .find(|c| c.scope == enclosing)
                .map(|c| c.id),
            _ => None,
        };
        let kind = function_kind(&f.decorators, class.is_some());
        let allow_redefinition = f.decorators.iter().any(|d| {
            let name = decorator_name(d);
            name == "overload" || name == "setter" || name == "getter" || name == "deleter"
        });

        let scope = self.table.push_scope(ScopeKind::Function, enclosing, f.span);
        let fid = FunctionId(self.table.functions.len() as u32);
        self.table.functions.push(FunctionInfo {
            def: f,
            scope,
            enclosing,
            class,
            kind,
            is_generator: false,
            signature: FunctionType::gradual(Type::Unknown),
            returns: None,
        });

        let mut decl = Declaration::new(BindingKind::Function(fid), f.name.span);
        decl.allow_redefinition = allow_redefinition;
        self.declare_here(&f.name.node, decl);

        let saved = (
            self.current,
            self.in_function,
            self.loop_depth,
            self.function,
            self.method_self.take(),
        );
        self.current = scope;
        self.in_function = true;
        self.loop_depth = 0;
        self.function = Some(fid);
        if let Some(class) = class {
            if matches!(kind, FunctionKind::Method | FunctionKind::Property) {
                if let Some(first) = f.params.first().filter(|p| p.kind != typy_ast::ParamKind::VarPositional) {
                    self.method_self = Some((first.name.node.clone(), class, scope));
                }
            }
        }

        self.params(&f.params, enclosing);
        self.block(&f.body);

        (
            self.current,
            self.in_function,
            self.loop_depth,
            self.function,
            self.method_self,
        ) = saved;
    }

    fn params(&mut self, params: &'ast [Param], annotation_scope: ScopeId) {
        for param in params {
            let mut decl = Declaration::new(BindingKind::Parameter, param.name.span);
            decl.annotation = param.annotation.as_ref().map(|expr| Annotation {
                expr,
                scope: annotation_scope,
            });
            let scope = self.current;
            if self.table.binding(scope, &param.name.node).is_some() {
                self.syntax_error(
                    param.name.span,
                    &format!("duplicate argument `{}` in function definition", param.name.node),
                );
                continue;
            }
            self.declare(scope, &param.name.node, decl);
        }
    }

    fn class_def(&mut self, c: &'ast ClassDef) {
        for decorator in &c.decorators {
            self.expr(decorator);
        }
        for base in &c.bases {
            self.expr(base);
        }
        for keyword in &c.keywords {
            self.expr(&keyword.value);
        }

        let enclosing = self.current;
        let id = ClassId(self.table.classes.len() as u32);
        let scope = self.table.push_scope(ScopeKind::Class, enclosing, c.span);
        self.table.classes.push(ClassInfo {
            id,
            name: c.name.node.clone(),
            def: c,
            scope,
            enclosing,
            bases: Vec::new(),
            attributes: BTreeMap::new(),
            is_dataclass: c.decorators.iter().any(|d| decorator_name(d) == "dataclass"),
            init: None,
        });
        self.declare_here(&c.name.node, Declaration::new(BindingKind::Class(id), c.name.span));

        let saved = (
            self.current,
            self.in_function,
            self.loop_depth,
            self.function,
            self.method_self.take(),
        );
        self.current = scope;
        self.in_function = false;
        self.loop_depth = 0;
        self.function = None;
        self.block(&c.body);
        (
            self.current,
            self.in_function,
            self.loop_depth,
            self.function,
            self.method_self,
        ) = saved;
    }

    fn comprehension(&mut self, span: Span, generators: &'ast [Comprehension], elts: &[&'ast Expr]) {
        let Some((first, rest)) = generators.split_first() else {
            return;
        };
        self.expr(&first.iter);
        let saved = self.current;
        self.current = self.table.push_scope(ScopeKind::Comprehension, saved, span);
        self.target(&first.target, None, None);
        for cond in &first.ifs {
            self.expr(cond);
        }
        for generator in rest {
            self.expr(&generator.iter);
            self.target(&generator.target, None, None);
            for cond in &generator.ifs {
                self.expr(cond);
            }
        }
        for elt in elts {
            self.expr(elt);
        }
        self.current = saved;
    }

    fn expr(&mut self, e: &'ast Expr) {
        typy_ast::ensure_stack(|| self.expr_inner(e))
    }

    fn expr_inner(&mut self, e: &'ast Expr) {
        match &e.kind {
            ExprKind::Name(_)
            | ExprKind::IntLit(_)
            | ExprKind::FloatLit(_)
            | ExprKind::ImagLit
            | ExprKind::StrLit(_)
            | ExprKind::BytesLit(_)
            | ExprKind::BoolLit(_)
            | ExprKind::NoneLit
            | ExprKind::Ellipsis => {}
            ExprKind::FStringLit(fields) => {
                for field in fields {
                    self.expr(field);
                }
            }
            ExprKind::Unary { operand, .. } => self.expr(operand),
            ExprKind::Binary { left, right, .. } => {
                self.expr(left);
                self.expr(right);
            }
            ExprKind::BoolOp { values, .. } => {
                for v in values {
                    self.expr(v);
                }
            }
            ExprKind::Compare { left, comparators, .. } => {
                self.expr(left);
                for c in comparators {
                    self.expr(c);
                }
            }
            ExprKind::Call { func, args } => {
                self.expr(func);
                for arg in args {
                    self.expr(arg.value());
                }
            }
            ExprKind::Attribute { value, .. } => self.expr(value),
            ExprKind::Subscript { value, index } => {
                self.expr(value);
                self.expr(index);
            }
            ExprKind::Slice { lower, upper, step } => {
                for part in [lower, upper, step].into_iter().flatten() {
                    self.expr(part);
                }
            }
            ExprKind::List(items) | ExprKind::Tuple(items) | ExprKind::Set(items) => {
                for item in items {
                    self.expr(item);
                }
            }
            ExprKind::Dict(items) => {
                for item in items {
                    match item {
                        DictItem::Pair(k, v) => {
                            self.expr(k);
                            self.expr(v);
                        }
                        DictItem::Spread(m) => self.expr(m),
                    }
                }
            }
            ExprKind::Starred(inner) | ExprKind::Await(inner) => self.expr(inner),
            ExprKind::IfExp { test, body, orelse } => {
                self.expr(test);
                self.expr(body);
                self.expr(orelse);
            }
            ExprKind::Lambda { params, body } => {
                for param in params {
                    if let Some(default) = &param.default {
                        self.expr(default);
                    }
                }
                let enclosing = self.current;
                let saved = (self.current, self.function, self.in_function);
                self.current = self.table.push_scope(ScopeKind::Lambda, enclosing, e.span);
                self.function = None;
                self.params(params, enclosing);
                self.expr(body);
                (self.current, self.function, self.in_function) = saved;
            }
            ExprKind::Comp { elt, generators, .. } => {
                self.comprehension(e.span, generators, &[elt.as_ref()]);
            }
            ExprKind::DictComp { key, value, generators } => {
                self.comprehension(e.span, generators, &[key.as_ref(), value.as_ref()]);
            }
            ExprKind::Named { target, value } => {
                self.expr(value);
                let scope = self.table.non_comprehension_scope(self.current);
                let scope = self.table.resolve_store(scope, &target.node);
                let mut decl = Declaration::new(BindingKind::Variable, target.span);
                decl.first_value = Some(value);
                self.declare(scope, &target.node, decl);
            }
            ExprKind::Yield(value) => {
                self.mark_generator(e.span, "`yield` outside function");
                if let Some(v) = value {
                    self.expr(v);
                }
            }
            ExprKind::YieldFrom(value) => {
                self.mark_generator(e.span, "`yield from` outside function");
                self.expr(value);
            }
        }
    }

    fn mark_generator(&mut self, span: Span, message: &str) {
        match self.function {
            Some(fid) if self.table.function(fid).scope == self.current => {
                self.table.function_mut(fid).is_generator = true;
            }
            Some(_) => {}
            None => {
                if self.table.scope(self.current).kind != ScopeKind::Lambda {
                    self.syntax_error(span, message);
                }
            }
        }
    }
}

/// Last path component of a decorator, with calls unwrapped: `functools.lru_cache(1)` is `lru_cache`.
pub(crate) fn decorator_name(decorator: &Expr) -> &str {
    match &decorator.kind {
        ExprKind::Name(n) => n,
        ExprKind::Attribute { attr, .. } => &attr.node,
        ExprKind::Call { func, .. } => decorator_name(func),
        _ => "",
    }
}

fn function_kind(decorators: &[Expr], in_class: bool) -> FunctionKind {
    let mut kind = if in_class {
        FunctionKind::Method
    } else {
        FunctionKind::Plain
    };
    for decorator in decorators {
        kind = match decorator_name(decorator) {
            "staticmethod" if in_class => FunctionKind::StaticMethod,
            "classmethod" if in_class => FunctionKind::ClassMethod,
            "property" | "cached_property" | "getter" | "setter" | "deleter" if in_class => {
                FunctionKind::Property
            }
            "abstractmethod" | "override" | "final" | "overload" | "cache" | "lru_cache" | "wraps" => {
                continue;
            }
            _ => return FunctionKind::Opaque,
        };
    }
    kind
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn build(src: &str) -> (Module, Diagnostics) {
        let module = typy_parse::parse_source(src).expect("parses");
        let diags = Diagnostics::new(Path::new("t.py"), src);
        (module, diags)
    }

    #[test]
    fn class_scopes_are_skipped_from_methods() {
        let (module, mut diags) = build("X = 1\nclass A:\n    X = 'a'\n    def f(self):\n        return X\n");
        let table = SymbolTable::build(&module, &mut diags);
        let method = table.functions()[0].scope;
        assert_eq!(table.resolve(method, "X"), Some(table.module_scope()));
        let class_scope = table.classes()[0].scope;
        assert_eq!(table.resolve(class_scope, "X"), Some(class_scope));
    }

    #[test]
    fn global_redirects_assignments_to_module() {
        let (module, mut diags) = build("def f():\n    global n\n    n = 1\n");
        let table = SymbolTable::build(&module, &mut diags);
        let module_scope = table.module_scope();
        assert!(table.binding(module_scope, "n").is_some());
        let f = table.functions()[0].scope;
        assert_eq!(table.resolve_store(f, "n"), module_scope);
        assert!(diags.is_empty());
    }

    #[test]
    fn walrus_in_comprehension_binds_outside() {
        let (module, mut diags) = build("ys = [y for x in [1] if (y := x)]\n");
        let table = SymbolTable::build(&module, &mut diags);
        assert!(table.binding(table.module_scope(), "y").is_some());
        assert!(table.binding(table.module_scope(), "x").is_none());
    }

    #[test]
    fn self_attributes_are_collected() {
        let (module, mut diags) =
            build("class P:\n    def __init__(self, x: int):\n        self.x = x\n        self.y: str = 'a'\n");
        let table = SymbolTable::build(&module, &mut diags);
        let attrs = &table.classes()[0].attributes;
        assert!(attrs.contains_key("x"));
        assert_eq!(attrs["y"].declared, Some(Type::STR));
    }

    #[test]
    fn kind_conflict_points_at_previous_declaration() {
        let (module, mut diags) = build("def f():\n    pass\nf = 3\n");
        let _ = SymbolTable::build(&module, &mut diags);
        let items = diags.into_vec();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].code, DiagnosticCode::SymbolConflictError);
        assert_eq!(items[0].related.len(), 1);
        assert_eq!(items[0].related[0].location.line, 1);
    }

    #[test]
    fn property_setter_is_not_a_redefinition() {
        let src = "class A:\n    @property\n    def v(self) -> int:\n        return 1\n    @v.setter\n    def v(self, x: int) -> None:\n        pass\n";
        let (module, mut diags) = build(src);
        let _ = SymbolTable::build(&module, &mut diags);
        assert!(diags.is_empty());
    }

    #[test]
    fn misplaced_control_flow_is_a_syntax_error() {
        let (module, mut diags) = build("return 1\nbreak\n");
        let _ = SymbolTable::build(&module, &mut diags);
        let codes: Vec<_> = diags.iter().map(|d| d.code).collect();
        assert_eq!(codes, vec![DiagnosticCode::SyntaxError, DiagnosticCode::SyntaxError]);
    }
}
