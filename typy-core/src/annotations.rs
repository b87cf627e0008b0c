#![forbid(unsafe_code)]

use typy_ast::{BinOp, Expr, ExprKind, ParamKind, Span, Stmt, UnaryOp, span_start};

use crate::builtins::{self, Builtin};
use crate::diagnostics::{DiagnosticCode, Diagnostics};
use crate::scope::{BindingKind, FunctionId, FunctionKind, ScopeId, ScopeKind, SymbolTable, decorator_name};
use crate::types::{ClassId, ClassRef, FunctionType, GenericBase, ParamType, Type};

/// A problem found while resolving an annotation.
#[derive(Clone, Debug)]
pub(crate) struct Issue {
    pub code: DiagnosticCode,
    pub span: Span,
    pub message: String,
}

pub(crate) fn report(diags: &mut Diagnostics, issues: Vec<Issue>) {
    for issue in issues {
        diags.add(issue.code, issue.span, issue.message);
    }
}

/// Resolves a type annotation evaluated in `scope`.
pub(crate) fn resolve_annotation(table: &SymbolTable<'_>, expr: &Expr, scope: ScopeId) -> (Type, Vec<Issue>) {
    let mut resolver = Resolver {
        table,
        issues: Vec::new(),
        depth: 0,
        string_span: None,
    };
    let ty = resolver.resolve(expr, scope);
    (ty, resolver.issues)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Form {
    Any,
    Optional,
    Union,
    Callable,
    Literal,
    /// `ClassVar[T]`, `Final[T]`, `Annotated[T, ...]`: the first argument.
    Wrapper,
    /// `Generic`, `Protocol`, `TypeAlias`: no type of their own.
    Ignored,
    Generic(GenericBase),
    /// `Generator[Y, S, R]` is iterated as `Iterator[Y]`.
    GeneratorLike,
    Str,
    /// A typing member we do not model.
    Opaque,
}

fn typing_form(origin: &str) -> Option<Form> {
    let member = ["typing.", "typing_extensions.", "collections.abc."]
        .iter()
        .find_map(|prefix| origin.strip_prefix(prefix))?;
    Some(match member {
        "Any" | "NoReturn" | "Never" => Form::Any,
        "Optional" => Form::Optional,
        "Union" => Form::Union,
        "Callable" => Form::Callable,
        "Literal" => Form::Literal,
        "ClassVar" | "Final" | "Annotated" | "Required" | "NotRequired" | "ReadOnly" => Form::Wrapper,
        "Generic" | "Protocol" | "TypeAlias" => Form::Ignored,
        "List" => Form::Generic(GenericBase::List),
        "Dict" | "DefaultDict" | "OrderedDict" => Form::Generic(GenericBase::Dict),
        "Set" | "MutableSet" => Form::Generic(GenericBase::Set),
        "FrozenSet" => Form::Generic(GenericBase::FrozenSet),
        "Tuple" => Form::Generic(GenericBase::Tuple),
        "Type" => Form::Generic(GenericBase::Type),
        "Iterable" | "Collection" | "Container" | "Reversible" | "AbstractSet" | "KeysView" | "ValuesView" => {
            Form::Generic(GenericBase::Iterable)
        }
        "Iterator" => Form::Generic(GenericBase::Iterator),
        "Sequence" | "MutableSequence" => Form::Generic(GenericBase::Sequence),
        "Mapping" | "MutableMapping" => Form::Generic(GenericBase::Mapping),
        "Awaitable" => Form::Generic(GenericBase::Awaitable),
        "Generator" => Form::GeneratorLike,
        "Text" => Form::Str,
        _ => Form::Opaque,
    })
}

/// What the head of an annotation names.
enum Head {
    Type(Type),
    Generic(GenericBase),
    Form(Form),
    Class(ClassRef),
    /// Imported from a module we do not analyze.
    Dynamic,
    Invalid(Issue),
}

struct Resolver<'t, 'ast> {
    table: &'t SymbolTable<'ast>,
    issues: Vec<Issue>,
    depth: u32,
    /// Set while resolving the contents of a string annotation.
    string_span: Option<Span>,
}

const MAX_ALIAS_DEPTH: u32 = 8;

impl Resolver<'_, '_> {
    fn span(&self, span: Span) -> Span {
        self.string_span.unwrap_or(span)
    }

    fn issue(&self, code: DiagnosticCode, span: Span, message: String) -> Issue {
        Issue {
            code,
            span: self.span(span),
            message,
        }
    }

    fn invalid(&mut self, span: Span, message: String) -> Type {
        let issue = self.issue(DiagnosticCode::InvalidAnnotation, span, message);
        self.issues.push(issue);
        Type::Unknown
    }

    fn resolve(&mut self, expr: &Expr, scope: ScopeId) -> Type {
        typy_ast::ensure_stack(|| self.resolve_inner(expr, scope))
    }

    fn resolve_inner(&mut self, expr: &Expr, scope: ScopeId) -> Type {
        match &expr.kind {
            ExprKind::NoneLit => Type::NONE,
            ExprKind::StrLit(text) => self.string_annotation(text, expr.span, scope),
            ExprKind::Name(name) => {
                let head = self.classify_name(name, expr.span, scope);
                self.bare(head, name, expr.span)
            }
            ExprKind::Attribute { value, attr } => {
                let head = self.classify_attribute(value, &attr.node, expr.span, scope);
                self.bare(head, &attr.node, expr.span)
            }
            ExprKind::Subscript { value, index } => self.subscript(value, index, expr.span, scope),
            ExprKind::Binary {
                left,
                op: BinOp::BitOr,
                right,
            } => {
                let l = self.resolve(left, scope);
                let r = self.resolve(right, scope);
                Type::union(vec![l, r])
            }
            ExprKind::Ellipsis => self.invalid(expr.span, "`...` is not allowed here".to_string()),
            _ => self.invalid(expr.span, "invalid type annotation".to_string()),
        }
    }

    fn string_annotation(&mut self, text: &str, span: Span, scope: ScopeId) -> Type {
        match typy_parse::parse_expr(text.trim()) {
            Ok(parsed) => {
                let saved = self.string_span.replace(self.span(span));
                let ty = self.resolve(&parsed, scope);
                self.string_span = saved;
                ty
            }
            Err(_) => self.invalid(span, format!("invalid string annotation `{text}`")),
        }
    }

    fn classify_name(&mut self, name: &str, span: Span, scope: ScopeId) -> Head {
        if let Some((owner, binding)) = self.table.lookup(scope, name) {
            return match &binding.kind {
                BindingKind::Class(id) => Head::Class(self.table.class_ref(*id)),
                BindingKind::Import { origin } => typing_form(origin).map_or(Head::Dynamic, Head::Form),
                BindingKind::Variable => self.alias(name, owner, span),
                BindingKind::Parameter => Head::Invalid(self.issue(
                    DiagnosticCode::InvalidAnnotation,
                    span,
                    format!("`{name}` is a variable, not a type"),
                )),
                BindingKind::Function(_) => Head::Invalid(self.issue(
                    DiagnosticCode::InvalidAnnotation,
                    span,
                    format!("`{name}` is a function, not a type"),
                )),
                BindingKind::Global | BindingKind::Nonlocal => Head::Dynamic,
            };
        }
        match builtins::lookup(name) {
            Some(Builtin::Class(Type::Generic { base, .. })) if base != GenericBase::Range => {
                Head::Generic(match base {
                    GenericBase::VarTuple => GenericBase::Tuple,
                    other => other,
                })
            }
            Some(Builtin::Class(instance)) => Head::Type(instance),
            Some(Builtin::Opaque) => Head::Dynamic,
            Some(_) => Head::Invalid(self.issue(
                DiagnosticCode::InvalidAnnotation,
                span,
                format!("`{name}` is not a type"),
            )),
            None if self.table.has_star_import(scope) => Head::Dynamic,
            None => Head::Invalid(self.issue(
                DiagnosticCode::UndefinedName,
                span,
                format!("undefined name `{name}`"),
            )),
        }
    }

    /// `Vector = list[float]`, `T = TypeVar("T")`.
    fn not_a_type(&self, name: &str, span: Span) -> Head {
        Head::Invalid(self.issue(
            DiagnosticCode::InvalidAnnotation,
            span,
            format!("`{name}` is a variable, not a type"),
        ))
    }

    /// `Vector = list[float]`, `T = TypeVar("T")`.
    fn alias(&mut self, name: &str, owner: ScopeId, span: Span) -> Head {
        let Some(value) = self.table.binding(owner, name).and_then(|b| b.first_value) else {
            return self.not_a_type(name, span);
        };
        if let ExprKind::Call { func, .. } = &value.kind {
            let origin = self
                .qualified(func, owner)
                .unwrap_or_else(|| decorator_name(func).to_string());
            return match origin.rsplit('.').next() {
                Some("TypeVar" | "NewType" | "ParamSpec" | "TypeVarTuple") => Head::Type(Type::Any),
                _ => self.not_a_type(name, span),
            };
        }
        let looks_like_type = matches!(
            value.kind,
            ExprKind::Name(_)
                | ExprKind::Attribute { .. }
                | ExprKind::Subscript { .. }
                | ExprKind::NoneLit
                | ExprKind::Binary { op: BinOp::BitOr, .. }
        );
        if !looks_like_type || self.depth >= MAX_ALIAS_DEPTH {
            return self.not_a_type(name, span);
        }

        let mut inner = Resolver {
            table: self.table,
            issues: Vec::new(),
            depth: self.depth + 1,
            string_span: None,
        };
        let ty = inner.resolve(value, owner);
        if !inner.issues.is_empty() {
            return self.not_a_type(name, span);
        }
        match ty {
            Type::Instance(class) => Head::Class(class),
            other => Head::Type(other),
        }
    }

    /// Dotted origin of an imported name, e.g. `t.Optional` with `import typing as t`.
    fn qualified(&self, expr: &Expr, scope: ScopeId) -> Option<String> {
        match &expr.kind {
            ExprKind::Name(name) => match self.table.lookup(scope, name).map(|(_, b)| &b.kind) {
                Some(BindingKind::Import { origin }) => Some(origin.clone()),
                _ => None,
            },
            ExprKind::Attribute { value, attr } => {
                self.qualified(value, scope).map(|q| format!("{q}.{}", attr.node))
            }
            _ => None,
        }
    }

    fn classify_attribute(&mut self, value: &Expr, attr: &str, span: Span, scope: ScopeId) -> Head {
        if let Some(origin) = self.qualified(value, scope) {
            return typing_form(&format!("{origin}.{attr}")).map_or(Head::Dynamic, Head::Form);
        }
        if let ExprKind::Name(owner) = &value.kind {
            if let Some((_, binding)) = self.table.lookup(scope, owner) {
                if let BindingKind::Class(id) = binding.kind {
                    let class_scope = self.table.class(id).scope;
                    if let Some(BindingKind::Class(nested)) = self.table.binding(class_scope, attr).map(|b| &b.kind) {
                        return Head::Class(self.table.class_ref(*nested));
                    }
                }
            }
        }
        Head::Invalid(self.issue(
            DiagnosticCode::InvalidAnnotation,
            span,
            "invalid type annotation".to_string(),
        ))
    }

    fn bare(&mut self, head: Head, name: &str, span: Span) -> Type {
        match head {
            Head::Type(ty) => ty,
            Head::Generic(base) | Head::Form(Form::Generic(base)) => match base {
                GenericBase::Tuple | GenericBase::VarTuple => Type::var_tuple(Type::Unknown),
                GenericBase::Range => Type::range(),
                other => Type::generic(other, vec![Type::Unknown; other.arity().unwrap_or(1)]),
            },
            Head::Class(class) => Type::Instance(class),
            Head::Dynamic => Type::Any,
            Head::Form(form) => match form {
                Form::Any | Form::Opaque => Type::Any,
                Form::Str => Type::STR,
                Form::GeneratorLike => Type::iterator(Type::Unknown),
                Form::Callable => Type::Function(FunctionType::gradual(Type::Unknown)),
                Form::Wrapper | Form::Ignored => Type::Unknown,
                Form::Optional | Form::Union | Form::Literal => {
                    self.invalid(span, format!("`{name}` requires type arguments"))
                }
                Form::Generic(_) => Type::Unknown,
            },
            Head::Invalid(issue) => {
                self.issues.push(issue);
                Type::Unknown
            }
        }
    }

    fn subscript(&mut self, value: &Expr, index: &Expr, span: Span, scope: ScopeId) -> Type {
        let (head, name) = match &value.kind {
            ExprKind::Name(name) => (self.classify_name(name, value.span, scope), name.as_str()),
            ExprKind::Attribute { value: owner, attr } => (
                self.classify_attribute(owner, &attr.node, value.span, scope),
                attr.node.as_str(),
            ),
            _ => return self.invalid(value.span, "invalid type annotation".to_string()),
        };
        let args: Vec<&Expr> = match &index.kind {
            ExprKind::Tuple(items) => items.iter().collect(),
            _ => vec![index],
        };

        match head {
            Head::Generic(GenericBase::Tuple) | Head::Form(Form::Generic(GenericBase::Tuple)) => {
                self.tuple_args(&args, scope)
            }
            Head::Generic(base) | Head::Form(Form::Generic(base)) => {
                let expected = base.arity().unwrap_or(1);
                if args.len() != expected {
                    let plural = if expected == 1 { "" } else { "s" };
                    return self.invalid(
                        span,
                        format!(
                            "`{name}` expects {expected} type argument{plural}, got {}",
                            args.len()
                        ),
                    );
                }
                let resolved = args.iter().map(|a| self.resolve(a, scope)).collect();
                Type::generic(base, resolved)
            }
            Head::Form(Form::GeneratorLike) => {
                let resolved: Vec<Type> = args.iter().map(|a| self.resolve(a, scope)).collect();
                Type::iterator(resolved.into_iter().next().unwrap_or(Type::Unknown))
            }
            Head::Form(Form::Optional) => {
                if args.len() != 1 {
                    return self.invalid(span, format!("`{name}` expects 1 type argument, got {}", args.len()));
                }
                Type::optional(self.resolve(args[0], scope))
            }
            Head::Form(Form::Union) => {
                let members: Vec<Type> = args.iter().map(|a| self.resolve(a, scope)).collect();
                Type::union(members)
            }
            Head::Form(Form::Callable) => self.callable(&args, span, scope),
            Head::Form(Form::Literal) => {
                let members: Vec<Type> = args.iter().map(|a| self.literal(a)).collect();
                Type::union(members)
            }
            Head::Form(Form::Wrapper) => match args.first() {
                Some(first) => self.resolve(first, scope),
                None => Type::Unknown,
            },
            Head::Form(Form::Ignored) => {
                for arg in &args {
                    self.resolve(arg, scope);
                }
                Type::Unknown
            }
            Head::Form(Form::Any | Form::Str) | Head::Type(_) => {
                self.invalid(value.span, format!("`{name}` is not generic"))
            }
            Head::Form(Form::Opaque) | Head::Dynamic => Type::Any,
            Head::Class(class) => {
                for arg in &args {
                    self.resolve(arg, scope);
                }
                Type::Instance(class)
            }
            Head::Invalid(issue) => {
                self.issues.push(issue);
                Type::Unknown
            }
        }
    }

    fn tuple_args(&mut self, args: &[&Expr], scope: ScopeId) -> Type {
        if let [elem, rest] = args {
            if matches!(rest.kind, ExprKind::Ellipsis) {
                return Type::var_tuple(self.resolve(elem, scope));
            }
        }
        let items = args.iter().map(|a| self.resolve(a, scope)).collect();
        Type::tuple(items)
    }

    fn callable(&mut self, args: &[&Expr], span: Span, scope: ScopeId) -> Type {
        let [params, ret] = args else {
            return self.invalid(
                span,
                "`Callable` expects a parameter list and a return type".to_string(),
            );
        };
        let ret = self.resolve(ret, scope);
        match &params.kind {
            ExprKind::Ellipsis => Type::Function(FunctionType::gradual(ret)),
            ExprKind::List(items) => {
                let params = items
                    .iter()
                    .map(|item| ParamType {
                        name: None,
                        kind: ParamKind::PositionalOnly,
                        ty: self.resolve(item, scope),
                        has_default: false,
                    })
                    .collect();
                Type::Function(FunctionType::new(params, ret))
            }
            _ => self.invalid(
                params.span,
                "`Callable` parameters must be a list of types or `...`".to_string(),
            ),
        }
    }

    fn literal(&mut self, arg: &Expr) -> Type {
        match &arg.kind {
            ExprKind::IntLit(_) => Type::INT,
            ExprKind::Unary {
                op: UnaryOp::Neg,
                operand,
            } if matches!(operand.kind, ExprKind::IntLit(_)) => Type::INT,
            ExprKind::StrLit(_) => Type::STR,
            ExprKind::BytesLit(_) => Type::BYTES,
            ExprKind::BoolLit(_) => Type::BOOL,
            ExprKind::NoneLit => Type::NONE,
            ExprKind::Attribute { .. } => Type::Unknown,
            _ => self.invalid(arg.span, "invalid `Literal` value".to_string()),
        }
    }
}

enum Job {
    Binding { scope: ScopeId, name: String },
    Return(FunctionId),
    Attribute { class: ClassId, name: String },
    Reannotation(usize),
}

/// Resolution pass: annotations, class bases, signatures.
///
/// Annotations are resolved in source order so diagnostics come out sorted.
pub(crate) fn resolve_declarations(table: &mut SymbolTable<'_>, diags: &mut Diagnostics) {
    let mut jobs: Vec<(usize, Job, Span, ScopeId)> = Vec::new();
    for idx in 0..table.scope_count() {
        let scope = ScopeId(idx as u32);
        for (name, binding) in &table.scope(scope).bindings {
            if let Some(a) = binding.annotation {
                let job = Job::Binding {
                    scope,
                    name: name.clone(),
                };
                jobs.push((span_start(a.expr.span), job, a.expr.span, a.scope));
            }
        }
    }
    for (idx, info) in table.functions().iter().enumerate() {
        if let Some(returns) = &info.def.returns {
            jobs.push((
                span_start(returns.span),
                Job::Return(FunctionId(idx as u32)),
                returns.span,
                info.enclosing,
            ));
        }
    }
    for class in table.classes() {
        for (name, attr) in &class.attributes {
            if let Some(a) = attr.annotation {
                let job = Job::Attribute {
                    class: class.id,
                    name: name.clone(),
                };
                jobs.push((span_start(a.expr.span), job, a.expr.span, a.scope));
            }
        }
    }
    for (idx, re) in table.reannotations.iter().enumerate() {
        jobs.push((
            span_start(re.annotation.expr.span),
            Job::Reannotation(idx),
            re.annotation.expr.span,
            re.annotation.scope,
        ));
    }
    jobs.sort_by_key(|(pos, ..)| *pos);

    let mut resolved: Vec<(Job, Type)> = Vec::with_capacity(jobs.len());
    for (_, job, _, scope) in jobs {
        let expr = match &job {
            Job::Binding { scope: owner, name } => table.binding(*owner, name).and_then(|b| b.annotation).map(|a| a.expr),
            Job::Return(fid) => table.function(*fid).def.returns.as_ref(),
            Job::Attribute { class, name } => table
                .class(*class)
                .attributes
                .get(name)
                .and_then(|a| a.annotation)
                .map(|a| a.expr),
            Job::Reannotation(idx) => Some(table.reannotations[*idx].annotation.expr),
        };
        let Some(expr) = expr else {
            continue;
        };
        let (ty, issues) = resolve_annotation(table, expr, scope);
        report(diags, issues);
        resolved.push((job, ty));
    }

    let mut reannotated = Vec::new();
    for (job, ty) in resolved {
        match job {
            Job::Binding { scope, name } => {
                if let Some(binding) = table.binding_mut(scope, &name) {
                    binding.declared = Some(ty);
                }
            }
            Job::Return(fid) => table.function_mut(fid).returns = Some(ty),
            Job::Attribute { class, name } => {
                if let Some(attr) = table.class_mut(class).attributes.get_mut(&name) {
                    attr.declared = Some(ty);
                }
            }
            Job::Reannotation(idx) => reannotated.push((idx, ty)),
        }
    }

    for (idx, ty) in reannotated {
        let re = &table.reannotations[idx];
        let Some(binding) = table.binding(re.scope, &re.name) else {
            continue;
        };
        let Some(previous) = &binding.declared else {
            continue;
        };
        if previous.is_escape() || ty.is_escape() || *previous == ty {
            continue;
        }
        let previous_span = binding.annotation.map_or(binding.span, |a| a.expr.span);
        diags.add_with_related(
            DiagnosticCode::SymbolConflictError,
            re.span,
            format!(
                "conflicting annotations for `{}`: `{}` and `{}`",
                re.name,
                previous.display(),
                ty.display()
            ),
            vec![(previous_span, format!("previous annotation of `{}`", re.name))],
        );
    }

    resolve_bases(table);
    build_signatures(table);
    synthesize_dataclass_inits(table);
    check_nonlocals(table, diags);
}

fn resolve_bases(table: &mut SymbolTable<'_>) {
    for idx in 0..table.classes().len() {
        let id = ClassId(idx as u32);
        let class = table.class(id);
        let mut bases: Vec<Type> = class
            .def
            .bases
            .iter()
            .filter_map(|base| base_type(table, base, class.enclosing, id))
            .collect();
        if class.def.keywords.iter().any(|k| k.name.node == "metaclass") {
            bases.push(Type::Any);
        }
        table.class_mut(id).bases = bases;
    }
}

/// `None` for bases that contribute nothing (`Generic[T]`, `Protocol`).
fn base_type(table: &SymbolTable<'_>, base: &Expr, scope: ScopeId, class: ClassId) -> Option<Type> {
    match &base.kind {
        ExprKind::Name(name) => match table.lookup(scope, name).map(|(_, b)| &b.kind) {
            // Bases must be defined first; this also rules out cycles.
            Some(BindingKind::Class(id)) if id.0 < class.0 => Some(Type::Instance(table.class_ref(*id))),
            Some(BindingKind::Import { origin }) => match typing_form(origin) {
                Some(Form::Ignored) => None,
                _ => Some(Type::Any),
            },
            Some(_) => Some(Type::Any),
            None => match builtins::lookup(name) {
                Some(Builtin::Class(instance)) => Some(instance),
                _ => Some(Type::Any),
            },
        },
        ExprKind::Subscript { value, .. } => base_type(table, value, scope, class),
        _ => Some(Type::Any),
    }
}

fn build_signatures(table: &mut SymbolTable<'_>) {
    for idx in 0..table.functions().len() {
        let fid = FunctionId(idx as u32);
        let info = table.function(fid);
        let def = info.def;
        let (scope, kind) = (info.scope, info.kind);
        let owner = info.class.map(|c| table.class_ref(c));

        let mut params = Vec::with_capacity(def.params.len());
        let mut implicit_first = None;
        for (i, param) in def.params.iter().enumerate() {
            let declared = table
                .binding(scope, &param.name.node)
                .and_then(|b| b.declared.clone());
            let ty = match (declared, &owner) {
                (Some(ty), _) => ty,
                (None, Some(class)) if i == 0 => match kind {
                    FunctionKind::Method | FunctionKind::Property => {
                        let ty = Type::Instance(class.clone());
                        implicit_first = Some((param.name.node.clone(), ty.clone()));
                        ty
                    }
                    FunctionKind::ClassMethod => {
                        let ty = Type::Class(class.clone());
                        implicit_first = Some((param.name.node.clone(), ty.clone()));
                        ty
                    }
                    _ => Type::Unknown,
                },
                (None, _) => Type::Unknown,
            };
            params.push(ParamType {
                name: Some(param.name.node.clone()),
                kind: param.kind,
                ty,
                has_default: param.default.is_some(),
            });
        }

        // Inside the body `*args: T` is a tuple and `**kwargs: T` a dict.
        for (param, sig_param) in def.params.iter().zip(params.iter()) {
            let body_ty = match param.kind {
                ParamKind::VarPositional => Type::var_tuple(sig_param.ty.clone()),
                ParamKind::VarKeyword => Type::dict(Type::STR, sig_param.ty.clone()),
                _ => continue,
            };
            if let Some(binding) = table.binding_mut(scope, &param.name.node) {
                binding.declared = Some(body_ty);
            }
        }
        if let Some((name, ty)) = implicit_first {
            if let Some(binding) = table.binding_mut(scope, &name) {
                binding.declared = Some(ty);
            }
        }

        let info = table.function_mut(fid);
        let ret = info.returns.clone().unwrap_or(Type::Unknown);
        let ret = if def.is_async {
            Type::generic(GenericBase::Awaitable, vec![ret])
        } else {
            ret
        };
        info.signature = FunctionType::new(params, ret);
    }
}

fn is_class_var(annotation: &Expr) -> bool {
    match &annotation.kind {
        ExprKind::Name(n) => n == "ClassVar",
        ExprKind::Attribute { attr, .. } => attr.node == "ClassVar",
        ExprKind::Subscript { value, .. } => is_class_var(value),
        _ => false,
    }
}

fn synthesize_dataclass_inits(table: &mut SymbolTable<'_>) {
    for idx in 0..table.classes().len() {
        let id = ClassId(idx as u32);
        let class = table.class(id);
        if !class.is_dataclass {
            continue;
        }

        let mut params = vec![ParamType::positional("self", Type::Instance(class.class_ref()))];
        for base in &class.bases {
            if let Type::Instance(base) = base {
                if let Some(init) = &table.class(base.id).init {
                    params.extend(init.params.iter().skip(1).cloned());
                }
            }
        }
        for stmt in &class.def.body.stmts {
            let Stmt::AnnAssign(a) = stmt else {
                continue;
            };
            let ExprKind::Name(field) = &a.target.kind else {
                continue;
            };
            if is_class_var(&a.annotation) {
                continue;
            }
            let ty = table
                .binding(class.scope, field)
                .and_then(|b| b.declared.clone())
                .unwrap_or(Type::Unknown);
            let param = if a.value.is_some() {
                ParamType::optional(field, ty)
            } else {
                ParamType::positional(field, ty)
            };
            params.retain(|p| p.name.as_deref() != Some(field.as_str()));
            params.push(param);
        }
        table.class_mut(id).init = Some(FunctionType::new(params, Type::NONE));
    }
}

fn check_nonlocals(table: &SymbolTable<'_>, diags: &mut Diagnostics) {
    for idx in 0..table.scope_count() {
        let scope = table.scope(ScopeId(idx as u32));
        for (name, binding) in &scope.bindings {
            if binding.kind != BindingKind::Nonlocal {
                continue;
            }
            let found = scope
                .parent
                .and_then(|p| table.resolve(p, name))
                .is_some_and(|owner| table.scope(owner).kind != ScopeKind::Module);
            if !found {
                diags.add(
                    DiagnosticCode::SyntaxError,
                    binding.span,
                    format!("no binding for nonlocal `{name}` found"),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn declared(src: &str, name: &str) -> (Option<Type>, Vec<String>) {
        let module = typy_parse::parse_source(src).expect("parses");
        let mut diags = Diagnostics::new(Path::new("t.py"), src);
        let table = SymbolTable::build(&module, &mut diags);
        let ty = table
            .binding(table.module_scope(), name)
            .and_then(|b| b.declared.clone());
        (ty, diags.iter().map(|d| d.message.clone()).collect())
    }

    #[test]
    fn typing_forms_resolve() {
        let src = "from typing import Optional, Dict, List\nx: Optional[Dict[str, List[int]]] = None\n";
        let (ty, msgs) = declared(src, "x");
        assert!(msgs.is_empty(), "{msgs:?}");
        assert_eq!(
            ty.unwrap().display(),
            "dict[str, list[int]] | None"
        );
    }

    #[test]
    fn module_qualified_typing_names_resolve() {
        let (ty, msgs) = declared("import typing as t\nx: t.Sequence[int]\n", "x");
        assert!(msgs.is_empty());
        assert_eq!(ty, Some(Type::generic(GenericBase::Sequence, vec![Type::INT])));
    }

    #[test]
    fn pep604_and_string_forward_references() {
        let (ty, msgs) = declared("x: 'Node | None'\nclass Node:\n    pass\n", "x");
        assert!(msgs.is_empty(), "{msgs:?}");
        assert_eq!(ty.unwrap().display(), "Node | None");
    }

    #[test]
    fn variadic_and_empty_tuples() {
        assert_eq!(declared("x: tuple[int, ...]\n", "x").0, Some(Type::var_tuple(Type::INT)));
        assert_eq!(declared("x: tuple[()]\n", "x").0, Some(Type::tuple(Vec::new())));
    }

    #[test]
    fn aliases_and_type_vars() {
        let (ty, msgs) = declared("Vector = list[float]\nv: Vector\n", "v");
        assert!(msgs.is_empty());
        assert_eq!(ty, Some(Type::list(Type::FLOAT)));
        let (ty, _) = declared("from typing import TypeVar\nT = TypeVar('T')\nv: T\n", "v");
        assert_eq!(ty, Some(Type::Any));
    }

    #[test]
    fn invalid_annotations_are_reported() {
        let (ty, msgs) = declared("x: Missing\n", "x");
        assert_eq!(ty, Some(Type::Unknown));
        assert_eq!(msgs, vec!["undefined name `Missing`".to_string()]);

        let (_, msgs) = declared("def f():\n    pass\nx: f\n", "x");
        assert_eq!(msgs, vec!["`f` is a function, not a type".to_string()]);

        let (_, msgs) = declared("x: dict[int]\n", "x");
        assert_eq!(msgs, vec!["`dict` expects 2 type arguments, got 1".to_string()]);

        let (_, msgs) = declared("x: 'int +'\n", "x");
        assert_eq!(msgs, vec!["invalid string annotation `int +`".to_string()]);
    }

    #[test]
    fn conflicting_reannotation_is_reported() {
        let (_, msgs) = declared("x: int = 1\nx: str = 'a'\n", "x");
        assert_eq!(msgs, vec!["conflicting annotations for `x`: `int` and `str`".to_string()]);
        let (_, msgs) = declared("x: int = 1\nx: int = 2\n", "x");
        assert!(msgs.is_empty());
    }

    #[test]
    fn nonlocal_without_binding_is_a_syntax_error() {
        let (_, msgs) = declared("def f():\n    nonlocal q\n    q = 1\n", "f");
        assert_eq!(msgs, vec!["no binding for nonlocal `q` found".to_string()]);
    }
}
