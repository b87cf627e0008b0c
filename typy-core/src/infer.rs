#![forbid(unsafe_code)]

use std::collections::HashSet;

use typy_ast::{BinOp, BoolOp, CmpOp, CompKind, Comprehension, DictItem, Expr, ExprKind, Span, UnaryOp, join};

use crate::builtins::{self, Builtin};
use crate::checker::{Checker, Narrowing};
use crate::diagnostics::DiagnosticCode;
use crate::scope::{BindingKind, FunctionId, FunctionKind, ScopeId, ScopeKind};
use crate::types::{ClassId, ClassRef, FunctionType, GenericBase, ParamType, Primitive, Type};

/// Where a class member was found.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Lookup {
    Method(FunctionId),
    Nested(ClassId),
    /// Bound in the class body.
    ClassVar(ScopeId),
    /// Assigned through `self` in a method of this class.
    InstanceAttr(ClassId),
    /// Some base could not be resolved.
    Dynamic,
    Missing,
}

/// Attributes every object has.
fn is_object_attr(name: &str) -> bool {
    matches!(
        name,
        "__class__"
            | "__dict__"
            | "__doc__"
            | "__module__"
            | "__init__"
            | "__new__"
            | "__repr__"
            | "__str__"
            | "__eq__"
            | "__ne__"
            | "__hash__"
            | "__setattr__"
            | "__getattribute__"
            | "__delattr__"
            | "__init_subclass__"
            | "__annotations__"
            | "__slots__"
            | "__dataclass_fields__"
    )
}

fn is_type_attr(name: &str) -> bool {
    matches!(
        name,
        "__name__" | "__qualname__" | "__mro__" | "__bases__" | "__subclasses__" | "mro"
    )
}

fn none_has_attr(name: &str) -> bool {
    matches!(
        name,
        "__class__" | "__doc__" | "__bool__" | "__eq__" | "__ne__" | "__hash__" | "__repr__" | "__str__"
    )
}

fn numeric_rank(ty: &Type) -> Option<u8> {
    match ty {
        Type::Primitive(p) => p.numeric_rank(),
        _ => None,
    }
}

fn numeric_type(rank: u8) -> Type {
    match rank {
        0 => Type::BOOL,
        1 => Type::INT,
        2 => Type::FLOAT,
        _ => Type::COMPLEX,
    }
}

fn numeric_result(op: BinOp, a: u8, b: u8) -> Option<Type> {
    let top = a.max(b);
    match op {
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Pow => Some(numeric_type(top.max(1))),
        BinOp::Div => Some(numeric_type(top.max(2))),
        BinOp::FloorDiv | BinOp::Mod if top < 3 => Some(numeric_type(top.max(1))),
        BinOp::LShift | BinOp::RShift if top <= 1 => Some(Type::INT),
        BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor if top == 0 => Some(Type::BOOL),
        BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor if top == 1 => Some(Type::INT),
        _ => None,
    }
}

fn dunder(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "add",
        BinOp::Sub => "sub",
        BinOp::Mul => "mul",
        BinOp::Div => "truediv",
        BinOp::FloorDiv => "floordiv",
        BinOp::Mod => "mod",
        BinOp::Pow => "pow",
        BinOp::MatMul => "matmul",
        BinOp::LShift => "lshift",
        BinOp::RShift => "rshift",
        BinOp::BitAnd => "and",
        BinOp::BitOr => "or",
        BinOp::BitXor => "xor",
    }
}

fn unary_symbol(op: UnaryOp) -> &'static str {
    match op {
        UnaryOp::Neg => "-",
        UnaryOp::Pos => "+",
        UnaryOp::Invert => "~",
        UnaryOp::Not => "not",
    }
}

fn is_int(ty: &Type) -> bool {
    matches!(ty, Type::Primitive(Primitive::Int | Primitive::Bool))
}

fn is_tuple_like(ty: &Type) -> bool {
    matches!(
        ty,
        Type::Generic {
            base: GenericBase::Tuple | GenericBase::VarTuple,
            ..
        }
    )
}

fn tuple_element(ty: &Type) -> Type {
    match ty {
        Type::Generic {
            base: GenericBase::Tuple,
            args,
        } if args.is_empty() => Type::Unknown,
        other => other.builtin_element_type().unwrap_or(Type::Unknown),
    }
}

/// Integer literal used as an index, including `-1`.
fn literal_index(expr: &Expr) -> Option<i64> {
    match &expr.kind {
        ExprKind::IntLit(n) => i64::try_from(*n).ok(),
        ExprKind::Unary {
            op: UnaryOp::Neg,
            operand,
        } => match operand.kind {
            ExprKind::IntLit(n) => i64::try_from(n).ok().map(|n| -n),
            _ => None,
        },
        _ => None,
    }
}

/// Whether a display expression has the shape of `expected`.
fn display_matches(expr: &Expr, expected: &Type) -> bool {
    let Type::Generic { base, .. } = expected else {
        return false;
    };
    use GenericBase::{Dict, Iterable, List, Mapping, Sequence, Set, Tuple, VarTuple};
    match &expr.kind {
        ExprKind::List(_) | ExprKind::Comp { kind: CompKind::List, .. } => {
            matches!(base, List | Sequence | Iterable)
        }
        ExprKind::Set(_) | ExprKind::Comp { kind: CompKind::Set, .. } => matches!(base, Set | Iterable),
        ExprKind::Dict(_) | ExprKind::DictComp { .. } => matches!(base, Dict | Mapping),
        ExprKind::Tuple(_) => matches!(base, Tuple | VarTuple | Sequence | Iterable),
        _ => false,
    }
}

impl Checker<'_, '_> {
    pub(crate) fn infer(&mut self, expr: &Expr) -> Type {
        typy_ast::ensure_stack(|| self.infer_inner(expr))
    }

    fn infer_inner(&mut self, expr: &Expr) -> Type {
        match &expr.kind {
            ExprKind::Name(name) => self.name_type(name, expr.span),
            ExprKind::IntLit(_) => Type::INT,
            ExprKind::FloatLit(_) => Type::FLOAT,
            ExprKind::ImagLit => Type::COMPLEX,
            ExprKind::StrLit(_) => Type::STR,
            ExprKind::FStringLit(fields) => {
                for field in fields {
                    self.infer(field);
                }
                Type::STR
            }
            ExprKind::BytesLit(_) => Type::BYTES,
            ExprKind::BoolLit(_) => Type::BOOL,
            ExprKind::NoneLit => Type::NONE,
            ExprKind::Ellipsis => Type::Any,
            ExprKind::Unary { op, operand } => {
                let ty = self.infer(operand);
                self.unary_op(*op, &ty, expr.span)
            }
            ExprKind::Binary { left, op, right } => {
                let l = self.infer(left);
                let r = self.infer(right);
                self.binary_op(*op, &l, &r, expr.span)
            }
            ExprKind::BoolOp { op, values } => self.bool_op(*op, values),
            ExprKind::Compare {
                left,
                ops,
                comparators,
            } => self.compare(left, ops, comparators),
            ExprKind::Call { func, args } => self.call(expr, func, args),
            ExprKind::Attribute { value, attr } => {
                let receiver = self.infer(value);
                self.attribute(&receiver, &attr.node, attr.span)
            }
            ExprKind::Subscript { value, index } => {
                let receiver = self.infer(value);
                self.subscript(&receiver, index, expr.span)
            }
            ExprKind::Slice { lower, upper, step } => {
                for part in [lower, upper, step].into_iter().flatten() {
                    self.infer(part);
                }
                Type::Unknown
            }
            ExprKind::List(items) => {
                let elem = self.element_union(items);
                Type::list(elem)
            }
            ExprKind::Set(items) => {
                let elem = self.element_union(items);
                Type::set(elem)
            }
            ExprKind::Tuple(items) => {
                if items.iter().any(|i| matches!(i.kind, ExprKind::Starred(_))) {
                    Type::var_tuple(self.element_union(items))
                } else {
                    Type::tuple(items.iter().map(|i| self.infer(i)).collect())
                }
            }
            ExprKind::Dict(items) => self.dict_display(items, None),
            ExprKind::Starred(inner) => self.infer(inner),
            ExprKind::IfExp { test, body, orelse } => {
                self.infer(test);
                let (positive, negative) = self.narrow(test);
                self.push_frame(positive);
                let then = self.infer(body);
                self.drop_frame();
                self.push_frame(negative);
                let other = self.infer(orelse);
                self.drop_frame();
                Type::union(vec![then, other])
            }
            ExprKind::Lambda { params, body } => self.lambda(expr.span, params, body),
            ExprKind::Comp { kind, elt, generators } => {
                let elem = self.comprehension(expr.span, generators, |c| c.infer(elt));
                match kind {
                    CompKind::List => Type::list(elem),
                    CompKind::Set => Type::set(elem),
                    CompKind::Generator => Type::iterator(elem),
                }
            }
            ExprKind::DictComp { key, value, generators } => {
                let (k, v) = self.comprehension(expr.span, generators, |c| (c.infer(key), c.infer(value)));
                Type::dict(k, v)
            }
            ExprKind::Named { target, value } => {
                let ty = self.infer(value);
                let scope = self.table.non_comprehension_scope(self.scope);
                let saved = std::mem::replace(&mut self.scope, scope);
                self.assign_name(&target.node, target.span, &ty, Some(value));
                self.scope = saved;
                // Also visible inside the comprehension being evaluated.
                let key = (self.table.resolve_store(scope, &target.node), target.node.clone());
                if !ty.is_escape() {
                    self.set_narrowed(key, Some(ty.clone()));
                }
                ty
            }
            ExprKind::Await(inner) => {
                let ty = self.infer(inner);
                self.awaited(&ty)
            }
            ExprKind::Yield(value) => {
                if let Some(value) = value {
                    self.infer(value);
                }
                Type::Unknown
            }
            ExprKind::YieldFrom(value) => {
                let ty = self.infer(value);
                self.iter_element(&ty, value.span);
                Type::Unknown
            }
        }
    }

    /// Infers `expr` where a value of type `expected` is wanted.
    ///
    /// Displays take their element types from `expected` when every element
    /// fits, so `[1, 2.5]` checks against `list[float]`.
    pub(crate) fn infer_expected(&mut self, expr: &Expr, expected: &Type) -> Type {
        if let Type::Union(members) = expected {
            let target = members.iter().find(|m| display_matches(expr, m)).cloned();
            return match target {
                Some(member) => self.infer_expected(expr, &member),
                None => self.infer(expr),
            };
        }
        if !display_matches(expr, expected) {
            return self.infer(expr);
        }
        let Type::Generic { base, args } = expected else {
            return self.infer(expr);
        };
        match &expr.kind {
            ExprKind::List(items) | ExprKind::Set(items) => {
                let elem = expected.arg(0).clone();
                let (union, fits) = self.expected_elements(items, &elem);
                let elem = if fits { elem } else { union };
                match expr.kind {
                    ExprKind::Set(_) => Type::set(elem),
                    _ => Type::list(elem),
                }
            }
            ExprKind::Tuple(items) => {
                let fixed = *base == GenericBase::Tuple;
                if fixed && args.len() != items.len() {
                    return self.infer(expr);
                }
                let types = items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| {
                        let want = if fixed { args[i].clone() } else { expected.arg(0).clone() };
                        match item.kind {
                            ExprKind::Starred(_) => self.infer(item),
                            _ => self.infer_expected(item, &want),
                        }
                    })
                    .collect::<Vec<_>>();
                if items.iter().any(|i| matches!(i.kind, ExprKind::Starred(_))) {
                    Type::var_tuple(Type::union(types))
                } else {
                    Type::tuple(types)
                }
            }
            ExprKind::Dict(items) => self.dict_display(items, Some((expected.arg(0).clone(), expected.arg(1).clone()))),
            _ => {
                let ty = self.infer(expr);
                match (&ty, expected) {
                    (Type::Generic { base: vb, .. }, Type::Generic { .. })
                        if matches!(vb, GenericBase::List | GenericBase::Set | GenericBase::Dict)
                            && self.assignable(expected, &ty) =>
                    {
                        let args = match vb {
                            GenericBase::Dict => vec![expected.arg(0).clone(), expected.arg(1).clone()],
                            _ => vec![expected.arg(0).clone()],
                        };
                        Type::generic(*vb, args)
                    }
                    _ => ty,
                }
            }
        }
    }

    fn expected_elements(&mut self, items: &[Expr], elem: &Type) -> (Type, bool) {
        let mut types = Vec::with_capacity(items.len());
        let mut fits = true;
        for item in items {
            let ty = match &item.kind {
                ExprKind::Starred(inner) => {
                    let iterable = self.infer(inner);
                    self.iter_element(&iterable, inner.span)
                }
                _ => self.infer_expected(item, elem),
            };
            if !self.assignable(elem, &ty) {
                fits = false;
            }
            types.push(ty);
        }
        let union = if types.is_empty() {
            Type::Unknown
        } else {
            Type::union(types)
        };
        (union, fits)
    }

    fn element_union(&mut self, items: &[Expr]) -> Type {
        if items.is_empty() {
            return Type::Unknown;
        }
        let mut types = Vec::with_capacity(items.len());
        for item in items {
            let ty = match &item.kind {
                ExprKind::Starred(inner) => {
                    let iterable = self.infer(inner);
                    self.iter_element(&iterable, inner.span)
                }
                _ => self.infer(item),
            };
            types.push(ty);
        }
        Type::union(types)
    }

    fn dict_display(&mut self, items: &[DictItem], expected: Option<(Type, Type)>) -> Type {
        let mut keys = Vec::new();
        let mut values = Vec::new();
        let mut fits = true;
        for item in items {
            match item {
                DictItem::Pair(k, v) => {
                    let (kt, vt) = match &expected {
                        Some((ek, ev)) => {
                            let kt = self.infer_expected(k, ek);
                            let vt = self.infer_expected(v, ev);
                            fits &= self.assignable(ek, &kt) && self.assignable(ev, &vt);
                            (kt, vt)
                        }
                        None => (self.infer(k), self.infer(v)),
                    };
                    keys.push(kt);
                    values.push(vt);
                }
                DictItem::Spread(mapping) => {
                    let ty = self.infer(mapping);
                    match &ty {
                        Type::Generic {
                            base: GenericBase::Dict | GenericBase::Mapping,
                            ..
                        } => {
                            keys.push(ty.arg(0).clone());
                            values.push(ty.arg(1).clone());
                        }
                        t if t.is_escape() => {
                            keys.push(Type::Unknown);
                            values.push(Type::Unknown);
                        }
                        other => {
                            self.report(
                                DiagnosticCode::UnsupportedOperation,
                                mapping.span,
                                format!("`{}` is not a mapping", other.display()),
                            );
                            keys.push(Type::Error);
                            values.push(Type::Error);
                        }
                    }
                }
            }
        }
        match expected {
            Some((k, v)) if fits => Type::dict(k, v),
            _ if keys.is_empty() => Type::dict(Type::Unknown, Type::Unknown),
            _ => Type::dict(Type::union(keys), Type::union(values)),
        }
    }

    fn lambda(&mut self, span: Span, params: &[typy_ast::Param], body: &Expr) -> Type {
        for param in params {
            if let Some(default) = &param.default {
                self.infer(default);
            }
        }
        let Some(scope) = self.table.scope_of(span, ScopeKind::Lambda) else {
            return Type::Unknown;
        };
        let ret = self.enter(scope, |c| c.infer(body));
        let params = params
            .iter()
            .map(|p| ParamType {
                name: Some(p.name.node.clone()),
                kind: p.kind,
                ty: Type::Unknown,
                has_default: p.default.is_some(),
            })
            .collect();
        Type::Function(FunctionType::new(params, ret))
    }

    /// Evaluates the generators of a comprehension, then `body` inside its scope.
    fn comprehension<R>(&mut self, span: Span, generators: &[Comprehension], body: impl FnOnce(&mut Self) -> R) -> R {
        let Some((first, rest)) = generators.split_first() else {
            return body(self);
        };
        let iterable = self.infer(&first.iter);
        let Some(scope) = self.table.scope_of(span, ScopeKind::Comprehension) else {
            return body(self);
        };
        let saved = std::mem::replace(&mut self.scope, scope);
        self.push_frame(Narrowing::new());

        let elem = self.comprehension_element(&iterable, first);
        self.bind_fresh(&first.target, &elem);
        self.comprehension_conditions(first);
        for generator in rest {
            let iterable = self.infer(&generator.iter);
            let elem = self.comprehension_element(&iterable, generator);
            self.bind_fresh(&generator.target, &elem);
            self.comprehension_conditions(generator);
        }
        let result = body(self);

        self.drop_frame();
        self.scope = saved;
        result
    }

    fn comprehension_element(&mut self, iterable: &Type, generator: &Comprehension) -> Type {
        if generator.is_async {
            Type::Unknown
        } else {
            self.iter_element(iterable, generator.iter.span)
        }
    }

    fn comprehension_conditions(&mut self, generator: &Comprehension) {
        for cond in &generator.ifs {
            self.infer(cond);
            let (positive, _) = self.narrow(cond);
            self.apply(positive);
        }
    }

    // ---- names ----

    fn name_type(&mut self, name: &str, span: Span) -> Type {
        if let Some(owner) = self.table.resolve(self.scope, name) {
            let key = (owner, name.to_string());
            if let Some(ty) = self.narrowed(&key) {
                return ty;
            }
            return self.binding_type(owner, name);
        }
        match builtins::lookup(name) {
            Some(Builtin::Function(sig)) => Type::Function(sig),
            Some(Builtin::Class(instance)) => Type::type_of(instance),
            Some(Builtin::Special(_) | Builtin::Opaque) => Type::Any,
            Some(Builtin::Value(ty)) => ty,
            None if self.table.has_star_import(self.scope) => Type::Any,
            None => {
                self.report(DiagnosticCode::UndefinedName, span, format!("undefined name `{name}`"));
                Type::Error
            }
        }
    }

    /// Type of a binding ignoring narrowing.
    pub(crate) fn binding_type(&mut self, owner: ScopeId, name: &str) -> Type {
        let Some(binding) = self.table.binding(owner, name) else {
            return Type::Unknown;
        };
        match &binding.kind {
            BindingKind::Function(fid) => self.function_value(*fid),
            BindingKind::Class(id) => Type::Class(self.table.class_ref(*id)),
            BindingKind::Import { .. } => Type::Any,
            BindingKind::Global | BindingKind::Nonlocal => Type::Unknown,
            BindingKind::Parameter => binding.declared.clone().unwrap_or(Type::Unknown),
            BindingKind::Variable => {
                if let Some(ty) = binding.declared.as_ref().or(binding.inferred.as_ref()) {
                    return ty.clone();
                }
                self.lazy_binding_type(owner, name)
            }
        }
    }

    /// Type of the first plain assignment, inferred on demand.
    pub(crate) fn lazy_binding_type(&mut self, owner: ScopeId, name: &str) -> Type {
        let Some(binding) = self.table.binding(owner, name) else {
            return Type::Unknown;
        };
        if let Some(ty) = &binding.lazy {
            return ty.clone();
        }
        let Some(value) = binding.first_value else {
            return Type::Unknown;
        };
        let key = (owner, name.to_string());
        if !self.resolving.insert(key.clone()) {
            return Type::Unknown;
        }
        let ty = self.detached(owner, |c| c.infer(value));
        self.resolving.remove(&key);
        let ty = if ty == Type::Error { Type::Unknown } else { ty };
        if let Some(binding) = self.table.binding_mut(owner, name) {
            binding.lazy = Some(ty.clone());
        }
        ty
    }

    fn function_value(&self, fid: FunctionId) -> Type {
        let info = self.table.function(fid);
        match info.kind {
            FunctionKind::Opaque | FunctionKind::Property => Type::Any,
            _ => Type::Function(info.signature.clone()),
        }
    }

    // ---- members ----

    pub(crate) fn find_member(&self, class: ClassId, name: &str) -> Lookup {
        let mut stack = vec![class];
        let mut seen = HashSet::new();
        let mut dynamic = false;
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            let info = self.table.class(id);
            if let Some(binding) = self.table.binding(info.scope, name) {
                match binding.kind {
                    BindingKind::Function(fid) => return Lookup::Method(fid),
                    BindingKind::Class(nested) => return Lookup::Nested(nested),
                    BindingKind::Global | BindingKind::Nonlocal => {}
                    _ => return Lookup::ClassVar(info.scope),
                }
            }
            if info.attributes.contains_key(name) {
                return Lookup::InstanceAttr(id);
            }
            for base in info.bases.iter().rev() {
                match base {
                    Type::Instance(c) => stack.push(c.id),
                    Type::Primitive(Primitive::Object) => {}
                    _ => dynamic = true,
                }
            }
        }
        if dynamic { Lookup::Dynamic } else { Lookup::Missing }
    }

    /// Type of a method as seen through an instance or the class object.
    pub(crate) fn method_value(&self, fid: FunctionId, via_instance: bool) -> Type {
        let info = self.table.function(fid);
        match info.kind {
            FunctionKind::Opaque => Type::Any,
            FunctionKind::Property if via_instance => (*info.signature.ret).clone(),
            FunctionKind::Property => Type::Any,
            FunctionKind::Plain | FunctionKind::StaticMethod => Type::Function(info.signature.clone()),
            FunctionKind::ClassMethod => Type::Function(info.signature.bound()),
            FunctionKind::Method if via_instance => Type::Function(info.signature.bound()),
            FunctionKind::Method => Type::Function(info.signature.clone()),
        }
    }

    /// Return type of a dunder method, if the class has one.
    pub(crate) fn dunder_return(&self, class: &ClassRef, name: &str) -> Option<Type> {
        match self.find_member(class.id, name) {
            Lookup::Method(fid) => match self.method_value(fid, true) {
                Type::Function(f) => Some(*f.ret),
                other => Some(other),
            },
            Lookup::Dynamic => Some(Type::Unknown),
            Lookup::ClassVar(_) | Lookup::InstanceAttr(_) | Lookup::Nested(_) => Some(Type::Unknown),
            Lookup::Missing => None,
        }
    }

    pub(crate) fn instance_attr_type(&mut self, owner: ClassId, name: &str) -> Type {
        let Some(attr) = self.table.class(owner).attributes.get(name) else {
            return Type::Unknown;
        };
        if let Some(ty) = attr.declared.as_ref().or(attr.lazy.as_ref()) {
            return ty.clone();
        }
        let (Some(value), scope) = (attr.value, attr.scope) else {
            return Type::Unknown;
        };
        let key = (scope, format!("self.{name}"));
        if !self.resolving.insert(key.clone()) {
            return Type::Unknown;
        }
        let ty = self.detached(scope, |c| c.infer(value));
        self.resolving.remove(&key);
        let ty = if ty == Type::Error { Type::Unknown } else { ty };
        if let Some(attr) = self.table.class_mut(owner).attributes.get_mut(name) {
            attr.lazy = Some(ty.clone());
        }
        ty
    }

    pub(crate) fn attribute(&mut self, receiver: &Type, attr: &str, span: Span) -> Type {
        match receiver {
            Type::Unknown | Type::Any | Type::Error => receiver.clone(),
            Type::Instance(class) => self.instance_member(class, attr, span),
            Type::Class(class) => self.class_member(class, attr, span),
            Type::Union(members) => {
                let mut types = Vec::with_capacity(members.len());
                for member in members {
                    if member.is_none() {
                        if !none_has_attr(attr) {
                            self.report(
                                DiagnosticCode::UnknownAttribute,
                                span,
                                format!(
                                    "item `None` of `{}` has no attribute `{attr}`",
                                    receiver.display()
                                ),
                            );
                        }
                        continue;
                    }
                    types.push(self.attribute(member, attr, span));
                }
                Type::union(types)
            }
            Type::Primitive(Primitive::None) => {
                if none_has_attr(attr) {
                    return Type::Unknown;
                }
                self.report(
                    DiagnosticCode::UnknownAttribute,
                    span,
                    format!("`None` has no attribute `{attr}`"),
                );
                Type::Error
            }
            Type::Primitive(p) if p.numeric_rank().is_some() && matches!(attr, "real" | "imag") => {
                if *p == Primitive::Complex { Type::FLOAT } else { receiver.clone() }
            }
            Type::Primitive(_) | Type::Generic { .. } => builtins::method(receiver, attr)
                .map(Type::Function)
                .unwrap_or(Type::Unknown),
            Type::Function(_) => Type::Any,
        }
    }

    fn instance_member(&mut self, class: &ClassRef, attr: &str, span: Span) -> Type {
        match self.find_member(class.id, attr) {
            Lookup::Method(fid) => self.method_value(fid, true),
            Lookup::Nested(id) => Type::Class(self.table.class_ref(id)),
            Lookup::ClassVar(scope) => self.binding_type(scope, attr),
            Lookup::InstanceAttr(owner) => self.instance_attr_type(owner, attr),
            Lookup::Dynamic => Type::Unknown,
            Lookup::Missing => {
                if is_object_attr(attr) {
                    return Type::Any;
                }
                if self.find_member(class.id, "__getattr__") != Lookup::Missing {
                    return Type::Unknown;
                }
                self.report(
                    DiagnosticCode::UnknownAttribute,
                    span,
                    format!("`{}` has no attribute `{attr}`", class.name),
                );
                Type::Error
            }
        }
    }

    fn class_member(&mut self, class: &ClassRef, attr: &str, span: Span) -> Type {
        match self.find_member(class.id, attr) {
            Lookup::Method(fid) => self.method_value(fid, false),
            Lookup::Nested(id) => Type::Class(self.table.class_ref(id)),
            Lookup::ClassVar(scope) => self.binding_type(scope, attr),
            Lookup::InstanceAttr(owner) => self.instance_attr_type(owner, attr),
            Lookup::Dynamic => Type::Unknown,
            Lookup::Missing => {
                if is_object_attr(attr) || is_type_attr(attr) {
                    return Type::Any;
                }
                self.report(
                    DiagnosticCode::UnknownAttribute,
                    span,
                    format!("`type[{}]` has no attribute `{attr}`", class.name),
                );
                Type::Error
            }
        }
    }

    // ---- subscripts ----

    pub(crate) fn check_index(&mut self, index: &Type, span: Span, container: &Type) {
        if !self.assignable(&Type::INT, index) {
            self.report(
                DiagnosticCode::TypeMismatch,
                span,
                format!(
                    "invalid index type `{}` for `{}`; expected `int`",
                    index.display(),
                    container.display()
                ),
            );
        }
    }

    fn not_subscriptable(&mut self, ty: &Type, span: Span) -> Type {
        self.report(
            DiagnosticCode::UnsupportedOperation,
            span,
            format!("`{}` is not subscriptable", ty.display()),
        );
        Type::Error
    }

    fn subscript(&mut self, receiver: &Type, index: &Expr, span: Span) -> Type {
        if matches!(index.kind, ExprKind::Slice { .. }) {
            self.infer(index);
            return self.slice_result(receiver);
        }
        let idx = self.infer(index);
        match receiver {
            Type::Unknown | Type::Any | Type::Error => receiver.clone(),
            Type::Primitive(Primitive::Str) => {
                self.check_index(&idx, index.span, receiver);
                Type::STR
            }
            Type::Primitive(Primitive::Bytes) => {
                self.check_index(&idx, index.span, receiver);
                Type::INT
            }
            Type::Generic { base, args } => match base {
                GenericBase::List | GenericBase::Sequence | GenericBase::VarTuple => {
                    self.check_index(&idx, index.span, receiver);
                    receiver.arg(0).clone()
                }
                GenericBase::Range => {
                    self.check_index(&idx, index.span, receiver);
                    Type::INT
                }
                GenericBase::Dict | GenericBase::Mapping => {
                    let key = receiver.arg(0).clone();
                    if !self.assignable(&key, &idx) {
                        self.report(
                            DiagnosticCode::TypeMismatch,
                            index.span,
                            format!(
                                "invalid key type `{}` for `{}`; expected `{}`",
                                idx.display(),
                                receiver.display(),
                                key.display()
                            ),
                        );
                    }
                    receiver.arg(1).clone()
                }
                GenericBase::Tuple => match literal_index(index) {
                    Some(i) => {
                        let len = args.len() as i64;
                        let pos = if i < 0 { len + i } else { i };
                        match usize::try_from(pos).ok().and_then(|p| args.get(p)) {
                            Some(elem) => elem.clone(),
                            None => {
                                self.report(
                                    DiagnosticCode::UnsupportedOperation,
                                    index.span,
                                    format!("tuple index out of range: index {i}, length {len}"),
                                );
                                Type::Error
                            }
                        }
                    }
                    None => {
                        self.check_index(&idx, index.span, receiver);
                        tuple_element(receiver)
                    }
                },
                GenericBase::Type => Type::Any,
                GenericBase::Set
                | GenericBase::FrozenSet
                | GenericBase::Iterable
                | GenericBase::Iterator
                | GenericBase::Awaitable => self.not_subscriptable(receiver, span),
            },
            Type::Class(_) => Type::Any,
            Type::Instance(class) => match self.dunder_return(class, "__getitem__") {
                Some(ty) => ty,
                None => self.not_subscriptable(receiver, span),
            },
            Type::Union(members) => {
                let mut types = Vec::with_capacity(members.len());
                for member in members {
                    if member.is_none() {
                        self.report(
                            DiagnosticCode::UnsupportedOperation,
                            span,
                            format!("item `None` of `{}` is not subscriptable", receiver.display()),
                        );
                        continue;
                    }
                    types.push(self.subscript_member(member, &idx, index, span));
                }
                Type::union(types)
            }
            Type::Primitive(_) | Type::Function(_) => self.not_subscriptable(receiver, span),
        }
    }

    /// One member of a union receiver; the index is already inferred.
    fn subscript_member(&mut self, member: &Type, idx: &Type, index: &Expr, span: Span) -> Type {
        match member {
            Type::Generic {
                base: GenericBase::Dict | GenericBase::Mapping,
                ..
            } => member.arg(1).clone(),
            Type::Generic {
                base: GenericBase::Tuple,
                ..
            } => tuple_element(member),
            Type::Generic {
                base: GenericBase::List | GenericBase::Sequence | GenericBase::VarTuple,
                ..
            } => {
                self.check_index(idx, index.span, member);
                member.arg(0).clone()
            }
            Type::Primitive(Primitive::Str) => Type::STR,
            Type::Primitive(Primitive::Bytes) => Type::INT,
            Type::Instance(class) => self.dunder_return(class, "__getitem__").unwrap_or(Type::Unknown),
            t if t.is_escape() => t.clone(),
            other => self.not_subscriptable(other, span),
        }
    }

    fn slice_result(&mut self, receiver: &Type) -> Type {
        match receiver {
            Type::Generic {
                base: GenericBase::Tuple,
                ..
            } => Type::var_tuple(tuple_element(receiver)),
            Type::Primitive(Primitive::Str | Primitive::Bytes)
            | Type::Generic {
                base: GenericBase::List | GenericBase::Sequence | GenericBase::VarTuple | GenericBase::Range,
                ..
            } => receiver.clone(),
            Type::Instance(class) => self.dunder_return(class, "__getitem__").unwrap_or(Type::Unknown),
            Type::Any => Type::Any,
            Type::Error => Type::Error,
            _ => Type::Unknown,
        }
    }

    // ---- operators ----

    pub(crate) fn binary_op(&mut self, op: BinOp, left: &Type, right: &Type, span: Span) -> Type {
        if *left == Type::Error || *right == Type::Error {
            return Type::Error;
        }
        if *left == Type::Any || *right == Type::Any {
            return Type::Any;
        }
        if left.is_escape() || right.is_escape() {
            return Type::Unknown;
        }
        let mut results = Vec::new();
        for l in left.members() {
            for r in right.members() {
                match self.binary_member(op, l, r) {
                    Some(ty) => results.push(ty),
                    None => {
                        self.report(
                            DiagnosticCode::UnsupportedOperation,
                            span,
                            format!(
                                "unsupported operand types for {}: `{}` and `{}`",
                                op.symbol(),
                                left.display(),
                                right.display()
                            ),
                        );
                        return Type::Error;
                    }
                }
            }
        }
        Type::union(results)
    }

    fn binary_member(&self, op: BinOp, l: &Type, r: &Type) -> Option<Type> {
        use GenericBase::{Dict, FrozenSet, List, Set, Tuple};

        if l.is_escape() || r.is_escape() {
            return Some(Type::Unknown);
        }
        if let (Some(a), Some(b)) = (numeric_rank(l), numeric_rank(r)) {
            return numeric_result(op, a, b);
        }
        let sequence_repeat = |seq: &Type, n: &Type| is_int(n) && op == BinOp::Mul && !seq.is_numeric();
        match (l, r) {
            (Type::Primitive(Primitive::Str), Type::Primitive(Primitive::Str)) if op == BinOp::Add => Some(Type::STR),
            (Type::Primitive(Primitive::Bytes), Type::Primitive(Primitive::Bytes)) if op == BinOp::Add => {
                Some(Type::BYTES)
            }
            (Type::Primitive(p @ (Primitive::Str | Primitive::Bytes)), _) if op == BinOp::Mod => {
                Some(Type::Primitive(*p))
            }
            (Type::Primitive(Primitive::Str | Primitive::Bytes), n) if sequence_repeat(l, n) => Some(l.clone()),
            (n, Type::Primitive(Primitive::Str | Primitive::Bytes)) if sequence_repeat(r, n) => Some(r.clone()),
            (Type::Generic { base: List, .. }, Type::Generic { base: List, .. }) if op == BinOp::Add => {
                Some(Type::list(Type::union(vec![l.arg(0).clone(), r.arg(0).clone()])))
            }
            (Type::Generic { base: List, .. }, n) if sequence_repeat(l, n) => Some(l.clone()),
            (n, Type::Generic { base: List, .. }) if sequence_repeat(r, n) => Some(r.clone()),
            (
                Type::Generic {
                    base: Tuple,
                    args: la,
                },
                Type::Generic {
                    base: Tuple,
                    args: ra,
                },
            ) if op == BinOp::Add => Some(Type::tuple(la.iter().chain(ra.iter()).cloned().collect())),
            (a, b) if is_tuple_like(a) && is_tuple_like(b) && op == BinOp::Add => {
                Some(Type::var_tuple(Type::union(vec![tuple_element(a), tuple_element(b)])))
            }
            (a, n) if is_tuple_like(a) && sequence_repeat(a, n) => Some(Type::var_tuple(tuple_element(a))),
            (n, a) if is_tuple_like(a) && sequence_repeat(a, n) => Some(Type::var_tuple(tuple_element(a))),
            (Type::Generic { base: lb @ (Set | FrozenSet), .. }, Type::Generic { base: Set | FrozenSet, .. }) => {
                match op {
                    BinOp::BitOr | BinOp::BitXor => Some(Type::generic(
                        *lb,
                        vec![Type::union(vec![l.arg(0).clone(), r.arg(0).clone()])],
                    )),
                    BinOp::BitAnd | BinOp::Sub => Some(l.clone()),
                    _ => None,
                }
            }
            (Type::Generic { base: Dict, .. }, Type::Generic { base: Dict, .. }) if op == BinOp::BitOr => {
                Some(Type::dict(
                    Type::union(vec![l.arg(0).clone(), r.arg(0).clone()]),
                    Type::union(vec![l.arg(1).clone(), r.arg(1).clone()]),
                ))
            }
            _ => {
                let name = dunder(op);
                if let Type::Instance(class) = l {
                    if let Some(ty) = self.dunder_return(class, &format!("__{name}__")) {
                        return Some(ty);
                    }
                }
                if let Type::Instance(class) = r {
                    if let Some(ty) = self.dunder_return(class, &format!("__r{name}__")) {
                        return Some(ty);
                    }
                }
                None
            }
        }
    }

    fn unary_op(&mut self, op: UnaryOp, operand: &Type, span: Span) -> Type {
        if op == UnaryOp::Not {
            return Type::BOOL;
        }
        if operand.is_escape() {
            return operand.clone();
        }
        let mut results = Vec::new();
        for member in operand.members() {
            let result = match (op, member) {
                (UnaryOp::Neg | UnaryOp::Pos, m) if numeric_rank(m).is_some() => {
                    numeric_rank(m).map(|r| numeric_type(r.max(1)))
                }
                (UnaryOp::Invert, m) if is_int(m) => Some(Type::INT),
                (_, Type::Instance(class)) => {
                    let name = match op {
                        UnaryOp::Neg => "__neg__",
                        UnaryOp::Pos => "__pos__",
                        _ => "__invert__",
                    };
                    self.dunder_return(class, name)
                }
                _ => None,
            };
            match result {
                Some(ty) => results.push(ty),
                None => {
                    self.report(
                        DiagnosticCode::UnsupportedOperation,
                        span,
                        format!(
                            "unsupported operand type for {}: `{}`",
                            unary_symbol(op),
                            operand.display()
                        ),
                    );
                    return Type::Error;
                }
            }
        }
        Type::union(results)
    }

    fn bool_op(&mut self, op: BoolOp, values: &[Expr]) -> Type {
        let mut types = Vec::with_capacity(values.len());
        let mut pushed = 0;
        for (i, value) in values.iter().enumerate() {
            let ty = self.infer(value);
            if i + 1 == values.len() {
                types.push(ty);
                break;
            }
            let (positive, negative) = self.narrow(value);
            match op {
                BoolOp::And => {
                    types.push(ty);
                    self.push_frame(positive);
                }
                BoolOp::Or => {
                    if !ty.members().iter().all(Type::is_none) {
                        types.push(ty.without_none());
                    }
                    self.push_frame(negative);
                }
            }
            pushed += 1;
        }
        for _ in 0..pushed {
            self.drop_frame();
        }
        Type::union(types)
    }

    fn compare(&mut self, left: &Expr, ops: &[CmpOp], comparators: &[Expr]) -> Type {
        let mut l_ty = self.infer(left);
        let mut l_span = left.span;
        for (op, right) in ops.iter().zip(comparators) {
            let r_ty = self.infer(right);
            let ok = if op.is_ordering() {
                self.orderable(&l_ty, &r_ty)
            } else if matches!(op, CmpOp::In | CmpOp::NotIn) {
                self.contains_ok(&l_ty, &r_ty)
            } else {
                true
            };
            if !ok {
                self.report(
                    DiagnosticCode::UnsupportedOperation,
                    join(l_span, right.span),
                    format!(
                        "unsupported operand types for {}: `{}` and `{}`",
                        op.symbol(),
                        l_ty.display(),
                        r_ty.display()
                    ),
                );
            }
            l_ty = r_ty;
            l_span = right.span;
        }
        Type::BOOL
    }

    fn orderable(&self, l: &Type, r: &Type) -> bool {
        if l.is_escape() || r.is_escape() {
            return true;
        }
        l.members().iter().all(|lm| {
            r.members().iter().all(|rm| match (lm, rm) {
                (a, b) if a.is_escape() || b.is_escape() => true,
                (a, b) if a.is_numeric() && b.is_numeric() => true,
                (Type::Primitive(Primitive::Str), Type::Primitive(Primitive::Str))
                | (Type::Primitive(Primitive::Bytes), Type::Primitive(Primitive::Bytes)) => true,
                (Type::Generic { base: a, .. }, Type::Generic { base: b, .. }) => {
                    a == b || (is_tuple_like(lm) && is_tuple_like(rm))
                }
                (Type::Instance(class), _) | (_, Type::Instance(class)) => ["__lt__", "__le__", "__gt__", "__ge__"]
                    .iter()
                    .any(|m| self.find_member(class.id, m) != Lookup::Missing),
                _ => false,
            })
        })
    }

    fn contains_ok(&self, item: &Type, container: &Type) -> bool {
        if item.is_escape() || container.is_escape() {
            return true;
        }
        container.members().iter().all(|c| match c {
            t if t.is_escape() => true,
            Type::Primitive(Primitive::Str) => self.assignable(&Type::STR, item),
            Type::Primitive(Primitive::Bytes) => {
                self.assignable(&Type::union(vec![Type::INT, Type::BYTES]), item)
            }
            Type::Generic { base, .. } => !matches!(base, GenericBase::Type | GenericBase::Awaitable),
            Type::Instance(class) => ["__contains__", "__iter__", "__getitem__"]
                .iter()
                .any(|m| self.find_member(class.id, m) != Lookup::Missing),
            _ => false,
        })
    }

    // ---- iteration ----

    /// Element type produced by iterating `ty`.
    pub(crate) fn iter_element(&mut self, ty: &Type, span: Span) -> Type {
        match ty {
            Type::Unknown | Type::Any | Type::Error => ty.clone(),
            Type::Union(members) => {
                let mut types = Vec::with_capacity(members.len());
                for member in members {
                    if member.is_none() {
                        self.report(
                            DiagnosticCode::UnsupportedOperation,
                            span,
                            format!("item `None` of `{}` is not iterable", ty.display()),
                        );
                        continue;
                    }
                    types.push(self.iter_element(member, span));
                }
                Type::union(types)
            }
            Type::Instance(class) => {
                if let Some(iterator) = self.dunder_return(class, "__iter__") {
                    return match iterator {
                        Type::Generic {
                            base: GenericBase::Iterator | GenericBase::Iterable,
                            ..
                        } => iterator.arg(0).clone(),
                        _ => Type::Unknown,
                    };
                }
                match self.dunder_return(class, "__getitem__") {
                    Some(elem) => elem,
                    None => self.not_iterable(ty, span),
                }
            }
            other => match other.builtin_element_type() {
                Some(elem) => elem,
                None => self.not_iterable(ty, span),
            },
        }
    }

    fn not_iterable(&mut self, ty: &Type, span: Span) -> Type {
        self.report(
            DiagnosticCode::UnsupportedOperation,
            span,
            format!("`{}` is not iterable", ty.display()),
        );
        Type::Error
    }

    fn awaited(&self, ty: &Type) -> Type {
        match ty {
            Type::Generic {
                base: GenericBase::Awaitable,
                ..
            } => ty.arg(0).clone(),
            Type::Any | Type::Error => ty.clone(),
            _ => Type::Unknown,
        }
    }

    /// Value bound by `with ctx as target`.
    pub(crate) fn entered(&self, context: &Type, is_async: bool) -> Type {
        let Type::Instance(class) = context else {
            return match context {
                Type::Any => Type::Any,
                _ => Type::Unknown,
            };
        };
        let method = if is_async { "__aenter__" } else { "__enter__" };
        match self.dunder_return(class, method) {
            Some(ty) if is_async => self.awaited(&ty),
            Some(ty) => ty,
            None => Type::Unknown,
        }
    }
}
