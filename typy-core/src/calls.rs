#![forbid(unsafe_code)]

use typy_ast::{CallArg, Expr, ExprKind, ParamKind, Span};

use crate::annotations::resolve_annotation;
use crate::builtins::{self, Builtin, Special};
use crate::checker::Checker;
use crate::diagnostics::DiagnosticCode;
use crate::infer::Lookup;
use crate::scope::BindingKind;
use crate::types::{ClassRef, FunctionType, GenericBase, Primitive, Type};

fn callee_name(func: &Expr) -> String {
    match &func.kind {
        ExprKind::Name(name) => name.clone(),
        ExprKind::Attribute { attr, .. } => attr.node.clone(),
        _ => "function".to_string(),
    }
}

fn positional_args(args: &[CallArg]) -> Vec<&Expr> {
    args.iter()
        .filter_map(|a| match a {
            CallArg::Positional(e) => Some(e),
            _ => None,
        })
        .collect()
}

fn has_star_args(args: &[CallArg]) -> bool {
    args.iter()
        .any(|a| matches!(a, CallArg::Star(_) | CallArg::DoubleStar(_)))
}

fn backticked(names: &[String]) -> String {
    names
        .iter()
        .map(|n| format!("`{n}`"))
        .collect::<Vec<_>>()
        .join(", ")
}

impl Checker<'_, '_> {
    pub(crate) fn call(&mut self, call: &Expr, func: &Expr, args: &[CallArg]) -> Type {
        if let ExprKind::Name(name) = &func.kind {
            if self.table.resolve(self.scope, name).is_none() {
                if let Some(Builtin::Special(special)) = builtins::lookup(name) {
                    return self.special_call(special, args);
                }
            }
        }
        if self.import_origin(func).as_deref() == Some("typing.cast") {
            return self.cast(args, call.span);
        }
        if let ExprKind::Attribute { value, attr } = &func.kind {
            let receiver = self.infer(value);
            if let Some(ty) = self.mapping_lookup(&receiver, &attr.node, args) {
                return ty;
            }
            let callee = self.attribute(&receiver, &attr.node, attr.span);
            return self.call_type(&callee, func, args, call.span);
        }
        let callee = self.infer(func);
        self.call_type(&callee, func, args, call.span)
    }

    /// Fully qualified name of an imported callee such as `typing.cast`.
    fn import_origin(&self, func: &Expr) -> Option<String> {
        let origin_of = |name: &str| match self.table.lookup(self.scope, name) {
            Some((_, binding)) => match &binding.kind {
                BindingKind::Import { origin } => Some(origin.clone()),
                _ => None,
            },
            None => None,
        };
        match &func.kind {
            ExprKind::Name(name) => origin_of(name),
            ExprKind::Attribute { value, attr } => match &value.kind {
                ExprKind::Name(module) => origin_of(module).map(|m| format!("{m}.{}", attr.node)),
                _ => None,
            },
            _ => None,
        }
    }

    fn infer_args(&mut self, args: &[CallArg]) {
        for arg in args {
            self.infer(arg.value());
        }
    }

    fn cast(&mut self, args: &[CallArg], span: Span) -> Type {
        let positional = positional_args(args);
        let [target, value] = positional.as_slice() else {
            self.infer_args(args);
            self.report(
                DiagnosticCode::ArityError,
                span,
                format!("`cast` expects 2 arguments, got {}", args.len()),
            );
            return Type::Any;
        };
        self.infer(value);
        let (ty, issues) = resolve_annotation(&*self.table, target, self.scope);
        for issue in issues {
            self.report(issue.code, issue.span, issue.message);
        }
        ty
    }

    /// `dict.get` and `dict.pop` with a default widen to the default's type.
    fn mapping_lookup(&mut self, receiver: &Type, method: &str, args: &[CallArg]) -> Option<Type> {
        if !matches!(method, "get" | "pop" | "setdefault") {
            return None;
        }
        let Type::Generic {
            base: GenericBase::Dict | GenericBase::Mapping,
            ..
        } = receiver
        else {
            return None;
        };
        let positional = positional_args(args);
        let [key, default] = positional.as_slice() else {
            return None;
        };
        let key_ty = receiver.arg(0).clone();
        let value_ty = receiver.arg(1).clone();
        let got = self.infer(key);
        if !self.assignable(&key_ty, &got) {
            self.mismatch(key.span, &format!("argument `key` of `{method}`"), &key_ty, &got);
        }
        let default_ty = self.infer_expected(default, &value_ty);
        Some(match method {
            "setdefault" => value_ty,
            _ => Type::union(vec![value_ty, default_ty]),
        })
    }

    fn call_type(&mut self, callee: &Type, func: &Expr, args: &[CallArg], span: Span) -> Type {
        match callee {
            Type::Unknown | Type::Any | Type::Error => {
                self.infer_args(args);
                callee.clone()
            }
            Type::Function(sig) => {
                self.bind_args(sig, &callee_name(func), args, span);
                (*sig.ret).clone()
            }
            Type::Class(class) => self.construct(class, args, span),
            Type::Generic {
                base: GenericBase::Type,
                args: instance,
            } => {
                let instance = instance.first().cloned().unwrap_or(Type::Unknown);
                self.builtin_construct(&instance, args, span)
            }
            Type::Instance(class) => match self.find_member(class.id, "__call__") {
                Lookup::Method(fid) => match self.method_value(fid, true) {
                    Type::Function(sig) => {
                        self.bind_args(&sig, &class.name, args, span);
                        *sig.ret
                    }
                    other => {
                        self.infer_args(args);
                        other
                    }
                },
                Lookup::Missing => self.not_callable(callee, args, span),
                _ => {
                    self.infer_args(args);
                    Type::Unknown
                }
            },
            Type::Union(members) => {
                self.infer_args(args);
                let mut returns = Vec::with_capacity(members.len());
                for member in members {
                    match member {
                        Type::Function(sig) => returns.push((*sig.ret).clone()),
                        Type::Class(class) => returns.push(Type::Instance(class.clone())),
                        _ => returns.push(Type::Unknown),
                    }
                }
                Type::union(returns)
            }
            Type::Primitive(_) | Type::Generic { .. } => self.not_callable(callee, args, span),
        }
    }

    fn not_callable(&mut self, callee: &Type, args: &[CallArg], span: Span) -> Type {
        self.infer_args(args);
        self.report(
            DiagnosticCode::UnsupportedOperation,
            span,
            format!("`{}` object is not callable", callee.display()),
        );
        Type::Error
    }

    /// Matches `args` against `sig`, reporting arity and type errors.
    pub(crate) fn bind_args(&mut self, sig: &FunctionType, name: &str, args: &[CallArg], span: Span) {
        if sig.is_gradual() {
            self.infer_args(args);
            return;
        }
        let params = &sig.params;
        let positional: Vec<usize> = (0..params.len())
            .filter(|&i| params[i].accepts_positional())
            .collect();
        let var_positional = params.iter().position(|p| p.kind == ParamKind::VarPositional);
        let var_keyword = params.iter().position(|p| p.kind == ParamKind::VarKeyword);
        let star = has_star_args(args);

        let mut assigned = vec![false; params.len()];
        let mut given = 0;
        for arg in args {
            match arg {
                CallArg::Positional(value) => {
                    if let Some(&idx) = positional.get(given) {
                        self.check_arg(value, sig, idx, name);
                        assigned[idx] = true;
                    } else if let Some(idx) = var_positional {
                        self.check_arg(value, sig, idx, name);
                    } else {
                        self.infer(value);
                    }
                    given += 1;
                }
                CallArg::Keyword { name: keyword, value } => {
                    let target = params.iter().position(|p| {
                        p.name.as_deref() == Some(keyword.node.as_str())
                            && matches!(p.kind, ParamKind::Regular | ParamKind::KeywordOnly)
                    });
                    match target {
                        Some(idx) => {
                            if assigned[idx] {
                                self.report(
                                    DiagnosticCode::ArityError,
                                    keyword.span,
                                    format!("multiple values for argument `{}` in call to `{name}`", keyword.node),
                                );
                            }
                            self.check_arg(value, sig, idx, name);
                            assigned[idx] = true;
                        }
                        None => match var_keyword {
                            Some(idx) => self.check_arg(value, sig, idx, name),
                            None => {
                                self.infer(value);
                                self.report(
                                    DiagnosticCode::ArityError,
                                    keyword.span,
                                    format!("unexpected keyword argument `{}` for `{name}`", keyword.node),
                                );
                            }
                        },
                    }
                }
                CallArg::Star(value) => {
                    let ty = self.infer(value);
                    self.iter_element(&ty, value.span);
                }
                CallArg::DoubleStar(value) => {
                    self.infer(value);
                }
            }
        }

        if star {
            return;
        }
        if given > positional.len() && var_positional.is_none() {
            self.report(
                DiagnosticCode::ArityError,
                span,
                format!(
                    "too many positional arguments for `{name}`: expected {}, got {given}",
                    positional.len()
                ),
            );
        }
        let missing: Vec<String> = params
            .iter()
            .zip(&assigned)
            .filter(|(p, done)| {
                !**done && !p.has_default && !matches!(p.kind, ParamKind::VarPositional | ParamKind::VarKeyword)
            })
            .map(|(p, _)| p.name.clone().unwrap_or_else(|| "?".to_string()))
            .collect();
        match missing.as_slice() {
            [] => {}
            [one] => self.report(
                DiagnosticCode::ArityError,
                span,
                format!("missing required argument `{one}` in call to `{name}`"),
            ),
            many => self.report(
                DiagnosticCode::ArityError,
                span,
                format!("missing required arguments {} in call to `{name}`", backticked(many)),
            ),
        }
    }

    fn check_arg(&mut self, value: &Expr, sig: &FunctionType, idx: usize, name: &str) {
        let param = &sig.params[idx];
        let got = self.infer_expected(value, &param.ty);
        if !self.assignable(&param.ty, &got) {
            let what = match &param.name {
                Some(param_name) => format!("argument `{param_name}` of `{name}`"),
                None => format!("argument {} of `{name}`", idx + 1),
            };
            self.mismatch(value.span, &what, &param.ty, &got);
        }
    }

    /// Calling a user class checks its initializer and yields an instance.
    fn construct(&mut self, class: &ClassRef, args: &[CallArg], span: Span) -> Type {
        let instance = Type::Instance(class.clone());
        if let Some(init) = self.table.class(class.id).init.clone() {
            self.bind_args(&init.bound(), &class.name, args, span);
            return instance;
        }
        match self.find_member(class.id, "__init__") {
            Lookup::Method(fid) => match self.method_value(fid, true) {
                Type::Function(sig) => self.bind_args(&sig, &class.name, args, span),
                _ => self.infer_args(args),
            },
            Lookup::Missing if self.find_member(class.id, "__new__") == Lookup::Missing => {
                self.bind_args(&FunctionType::new(Vec::new(), Type::NONE), &class.name, args, span);
            }
            _ => self.infer_args(args),
        }
        instance
    }

    fn builtin_construct(&mut self, instance: &Type, args: &[CallArg], span: Span) -> Type {
        let positional = positional_args(args);
        match instance {
            Type::Generic { base, .. } => match base {
                GenericBase::List | GenericBase::Set | GenericBase::FrozenSet | GenericBase::VarTuple => {
                    let mut source = None;
                    for arg in args {
                        let ty = self.infer(arg.value());
                        if source.is_none() && matches!(arg, CallArg::Positional(_)) {
                            source = Some((ty, arg.value().span));
                        }
                    }
                    let elem = match source {
                        Some((ty, span)) => self.iter_element(&ty, span),
                        None => Type::Unknown,
                    };
                    Type::generic(*base, vec![elem])
                }
                GenericBase::Dict => self.dict_constructor(args),
                GenericBase::Range => {
                    if positional.is_empty() || positional.len() > 3 {
                        self.report(
                            DiagnosticCode::ArityError,
                            span,
                            format!("`range` expects 1 to 3 arguments, got {}", positional.len()),
                        );
                    }
                    for (i, arg) in args.iter().enumerate() {
                        let got = self.infer(arg.value());
                        if !self.assignable(&Type::INT, &got) {
                            self.mismatch(
                                arg.value().span,
                                &format!("argument {} of `range`", i + 1),
                                &Type::INT,
                                &got,
                            );
                        }
                    }
                    Type::range()
                }
                GenericBase::Type => {
                    let types: Vec<Type> = args.iter().map(|a| self.infer(a.value())).collect();
                    match types.as_slice() {
                        [Type::Instance(class)] => Type::Class(class.clone()),
                        [other @ (Type::Primitive(_) | Type::Generic { .. })] => Type::type_of(other.clone()),
                        _ => Type::Any,
                    }
                }
                _ => {
                    self.infer_args(args);
                    instance.clone()
                }
            },
            Type::Primitive(Primitive::None) => self.not_callable(instance, args, span),
            _ => {
                self.infer_args(args);
                instance.clone()
            }
        }
    }

    fn dict_constructor(&mut self, args: &[CallArg]) -> Type {
        let mut keys = Vec::new();
        let mut values = Vec::new();
        for arg in args {
            match arg {
                CallArg::Positional(source) => {
                    let ty = self.infer(source);
                    match &ty {
                        Type::Generic {
                            base: GenericBase::Dict | GenericBase::Mapping,
                            ..
                        } => {
                            keys.push(ty.arg(0).clone());
                            values.push(ty.arg(1).clone());
                        }
                        _ => match self.iter_element(&ty, source.span) {
                            Type::Generic {
                                base: GenericBase::Tuple,
                                args: pair,
                            } if pair.len() == 2 => {
                                keys.push(pair[0].clone());
                                values.push(pair[1].clone());
                            }
                            _ => {
                                keys.push(Type::Unknown);
                                values.push(Type::Unknown);
                            }
                        },
                    }
                }
                CallArg::Keyword { value, .. } => {
                    keys.push(Type::STR);
                    values.push(self.infer(value));
                }
                CallArg::Star(value) | CallArg::DoubleStar(value) => {
                    self.infer(value);
                    keys.push(Type::Unknown);
                    values.push(Type::Unknown);
                }
            }
        }
        if keys.is_empty() {
            return Type::dict(Type::Unknown, Type::Unknown);
        }
        Type::dict(Type::union(keys), Type::union(values))
    }

    // ---- builtins with element-aware results ----

    fn special_call(&mut self, special: Special, args: &[CallArg]) -> Type {
        let positional = positional_args(args);
        let mut types = Vec::with_capacity(args.len());
        let mut keywords = Vec::new();
        for arg in args {
            let ty = self.infer(arg.value());
            match arg {
                CallArg::Keyword { name, .. } => keywords.push((name.node.as_str(), ty)),
                _ => types.push(ty),
            }
        }
        let spans: Vec<Span> = positional.iter().map(|e| e.span).collect();
        let element = |c: &mut Self, idx: usize| match (types.get(idx), spans.get(idx)) {
            (Some(ty), Some(span)) => c.iter_element(ty, *span),
            _ => Type::Unknown,
        };
        let keyword = |name: &str| keywords.iter().find(|(k, _)| *k == name).map(|(_, t)| t.clone());

        match special {
            Special::Abs => match types.first() {
                Some(Type::Primitive(Primitive::Bool)) => Type::INT,
                Some(Type::Primitive(Primitive::Complex)) => Type::FLOAT,
                Some(ty @ Type::Primitive(Primitive::Int | Primitive::Float)) => ty.clone(),
                Some(Type::Instance(class)) => self.dunder_return(class, "__abs__").unwrap_or(Type::Unknown),
                _ => Type::Unknown,
            },
            Special::Min | Special::Max => {
                let result = if types.len() == 1 {
                    element(self, 0)
                } else {
                    Type::union(types.clone())
                };
                match keyword("default") {
                    Some(default) => Type::union(vec![result, default]),
                    None => result,
                }
            }
            Special::Sum => {
                let elem = match element(self, 0) {
                    Type::Primitive(Primitive::Bool) => Type::INT,
                    other => other,
                };
                match types.get(1).cloned().or_else(|| keyword("start")) {
                    Some(start) => Type::union(vec![elem, start]),
                    None if elem.is_numeric() || elem.is_escape() => elem,
                    None => Type::union(vec![elem, Type::INT]),
                }
            }
            Special::Sorted => Type::list(element(self, 0)),
            Special::Reversed | Special::Iter => Type::iterator(element(self, 0)),
            Special::Enumerate => Type::iterator(Type::tuple(vec![Type::INT, element(self, 0)])),
            Special::Zip => {
                let elems = (0..types.len()).map(|i| element(self, i)).collect();
                Type::iterator(Type::tuple(elems))
            }
            Special::Next => {
                let elem = element(self, 0);
                match types.get(1) {
                    Some(default) => Type::union(vec![elem, default.clone()]),
                    None => elem,
                }
            }
            Special::Map => match types.first() {
                Some(Type::Function(f)) => Type::iterator((*f.ret).clone()),
                Some(Type::Class(class)) => Type::iterator(Type::Instance(class.clone())),
                Some(Type::Generic {
                    base: GenericBase::Type,
                    args,
                }) => Type::iterator(args.first().cloned().unwrap_or(Type::Unknown)),
                _ => Type::iterator(Type::Unknown),
            },
            Special::Filter => {
                let elem = element(self, 1);
                match positional.first().map(|e| &e.kind) {
                    Some(ExprKind::NoneLit) => Type::iterator(elem.without_none()),
                    _ => Type::iterator(elem),
                }
            }
            Special::Round => match (types.first(), types.get(1).or(keywords.first().map(|(_, t)| t))) {
                (Some(Type::Primitive(Primitive::Float)), Some(_)) => Type::FLOAT,
                (Some(Type::Primitive(Primitive::Int | Primitive::Bool)), _) => Type::INT,
                (Some(Type::Primitive(Primitive::Float)), None) => Type::INT,
                _ => Type::Unknown,
            },
            Special::Super => Type::Any,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::check_source;

    fn messages(src: &str) -> Vec<String> {
        check_source("test.py", src).into_iter().map(|d| d.message).collect()
    }

    #[test]
    fn arity_errors() {
        let src = "def f(a: int, b: int = 0) -> int:\n    return a + b\n\nf()\nf(1, 2, 3)\nf(1, c=2)\nf(1, a=2)\n";
        assert_eq!(
            messages(src),
            vec![
                "missing required argument `a` in call to `f`",
                "too many positional arguments for `f`: expected 2, got 3",
                "unexpected keyword argument `c` for `f`",
                "multiple values for argument `a` in call to `f`",
            ]
        );
    }

    #[test]
    fn each_bad_argument_is_reported() {
        let src = "def f(a: int, b: str) -> None:\n    pass\n\nf('x', 1)\n";
        assert_eq!(
            messages(src),
            vec![
                "type mismatch for argument `a` of `f`: expected `int`, got `str`",
                "type mismatch for argument `b` of `f`: expected `str`, got `int`",
            ]
        );
    }

    #[test]
    fn bound_methods_drop_self() {
        let src = "class A:\n    def m(self, x: int) -> int:\n        return x\n\na = A()\ny: int = a.m(1)\na.m()\n";
        assert_eq!(messages(src), vec!["missing required argument `x` in call to `m`"]);
    }

    #[test]
    fn constructor_checks_init() {
        let src = "class P:\n    def __init__(self, x: int) -> None:\n        self.x = x\n\np = P('a')\nq: str = P(1).x\n";
        assert_eq!(
            messages(src),
            vec![
                "type mismatch for argument `x` of `P`: expected `int`, got `str`",
                "type mismatch for `q`: expected `str`, got `int`",
            ]
        );
    }

    #[test]
    fn dataclass_fields_become_init_parameters() {
        let src = "from dataclasses import dataclass\n\n@dataclass\nclass Point:\n    x: int\n    y: int = 0\n\nPoint(1)\nPoint()\n";
        assert_eq!(messages(src), vec!["missing required argument `x` in call to `Point`"]);
    }

    #[test]
    fn calling_a_non_callable() {
        let src = "x = 1\nx()\n";
        assert_eq!(messages(src), vec!["`int` object is not callable"]);
    }

    #[test]
    fn builtin_helpers_know_element_types() {
        let src = "xs = [3, 1, 2]\nfor i, v in enumerate(sorted(xs)):\n    s: str = v\n";
        assert_eq!(messages(src), vec!["type mismatch for `s`: expected `str`, got `int`"]);
    }

    #[test]
    fn cast_uses_the_annotation() {
        let src = "from typing import cast\n\ny: int = cast(str, 1)\n";
        assert_eq!(messages(src), vec!["type mismatch for `y`: expected `int`, got `str`"]);
    }
}
