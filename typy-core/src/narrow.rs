#![forbid(unsafe_code)]

//! Type narrowing from conditions.
//!
//! Only plain names are narrowed. A test yields two maps: the types proven
//! when it holds and the types proven when it does not.

use typy_ast::{BoolOp, CallArg, CmpOp, Expr, ExprKind, UnaryOp};

use crate::checker::{Checker, Key, Narrowing};
use crate::scope::BindingKind;
use crate::types::{GenericBase, Type};

impl Checker<'_, '_> {
    pub(crate) fn narrow(&mut self, test: &Expr) -> (Narrowing, Narrowing) {
        typy_ast::ensure_stack(|| self.narrow_inner(test))
    }

    fn narrow_inner(&mut self, test: &Expr) -> (Narrowing, Narrowing) {
        match &test.kind {
            ExprKind::Name(name) => self.narrow_truthy(name),
            ExprKind::Named { target, .. } => self.narrow_truthy(&target.node),
            ExprKind::Unary {
                op: UnaryOp::Not,
                operand,
            } => {
                let (positive, negative) = self.narrow(operand);
                (negative, positive)
            }
            ExprKind::BoolOp { op, values } => self.narrow_bool(*op, values),
            ExprKind::Compare {
                left,
                ops,
                comparators,
            } if ops.len() == 1 => self.narrow_compare(left, ops[0], &comparators[0]),
            ExprKind::Call { func, args } if self.is_builtin_name(func, "isinstance") => {
                self.narrow_isinstance(args)
            }
            _ => (Narrowing::new(), Narrowing::new()),
        }
    }

    fn is_builtin_name(&self, expr: &Expr, builtin: &str) -> bool {
        match &expr.kind {
            ExprKind::Name(name) => name == builtin && self.table.resolve(self.scope, name).is_none(),
            _ => false,
        }
    }

    /// Current type of a narrowable name.
    fn current(&mut self, name: &str) -> Option<(Key, Type)> {
        let owner = self.table.resolve(self.scope, name)?;
        let binding = self.table.binding(owner, name)?;
        if !matches!(binding.kind, BindingKind::Variable | BindingKind::Parameter) {
            return None;
        }
        let key = (owner, name.to_string());
        let ty = match self.narrowed(&key) {
            Some(ty) => ty,
            None => self.quietly(|c| c.binding_type(owner, name)),
        };
        Some((key, ty))
    }

    fn narrow_truthy(&mut self, name: &str) -> (Narrowing, Narrowing) {
        let mut positive = Narrowing::new();
        if let Some((key, ty)) = self.current(name) {
            if ty.contains_none() && !ty.is_none() {
                positive.insert(key, ty.without_none());
            }
        }
        (positive, Narrowing::new())
    }

    fn narrow_bool(&mut self, op: BoolOp, values: &[Expr]) -> (Narrowing, Narrowing) {
        // `a and b` proves both on success; `a or b` proves neither on failure.
        let mut proven = Narrowing::new();
        let mut pushed = 0;
        for value in values {
            let (positive, negative) = self.narrow(value);
            let step = match op {
                BoolOp::And => positive,
                BoolOp::Or => negative,
            };
            proven.extend(step.clone());
            self.push_frame(step);
            pushed += 1;
        }
        for _ in 0..pushed {
            self.drop_frame();
        }
        match op {
            BoolOp::And => (proven, Narrowing::new()),
            BoolOp::Or => (Narrowing::new(), proven),
        }
    }

    fn narrow_compare(&mut self, left: &Expr, op: CmpOp, right: &Expr) -> (Narrowing, Narrowing) {
        let equal = match op {
            CmpOp::Is | CmpOp::Eq => true,
            CmpOp::IsNot | CmpOp::NotEq => false,
            _ => return (Narrowing::new(), Narrowing::new()),
        };
        let name = match (&left.kind, &right.kind) {
            (ExprKind::Name(name), ExprKind::NoneLit) | (ExprKind::NoneLit, ExprKind::Name(name)) => name,
            _ => return (Narrowing::new(), Narrowing::new()),
        };
        let mut is_none = Narrowing::new();
        let mut not_none = Narrowing::new();
        if let Some((key, ty)) = self.current(name) {
            if ty.contains_none() {
                is_none.insert(key.clone(), Type::NONE);
                if !ty.is_none() {
                    not_none.insert(key, ty.without_none());
                }
            }
        }
        if equal { (is_none, not_none) } else { (not_none, is_none) }
    }

    fn narrow_isinstance(&mut self, args: &[CallArg]) -> (Narrowing, Narrowing) {
        let empty = (Narrowing::new(), Narrowing::new());
        let [CallArg::Positional(subject), CallArg::Positional(classes)] = args else {
            return empty;
        };
        let ExprKind::Name(name) = &subject.kind else {
            return empty;
        };
        let Some(targets) = self.isinstance_targets(classes) else {
            return empty;
        };
        let Some((key, ty)) = self.current(name) else {
            return empty;
        };

        let mut positive = Narrowing::new();
        let mut negative = Narrowing::new();
        if ty.is_escape() {
            positive.insert(key, Type::union(targets));
            return (positive, negative);
        }
        let mut matched = Vec::new();
        let mut rest = Vec::new();
        for member in ty.members() {
            if targets.iter().any(|t| self.assignable(t, member)) {
                matched.push(member.clone());
                continue;
            }
            // A target more specific than the member, e.g. a subclass.
            let narrower: Vec<Type> = targets
                .iter()
                .filter(|t| self.assignable(member, t))
                .cloned()
                .collect();
            matched.extend(narrower);
            rest.push(member.clone());
        }
        if !matched.is_empty() {
            positive.insert(key.clone(), Type::union(matched));
        }
        if !rest.is_empty() {
            negative.insert(key, Type::union(rest));
        }
        (positive, negative)
    }

    /// Instance types named by the second argument of `isinstance`.
    fn isinstance_targets(&mut self, classes: &Expr) -> Option<Vec<Type>> {
        let items = match &classes.kind {
            ExprKind::Tuple(items) => items.iter().collect::<Vec<_>>(),
            _ => vec![classes],
        };
        let mut targets = Vec::with_capacity(items.len());
        for item in items {
            let ty = self.quietly(|c| c.infer(item));
            match ty {
                Type::Class(class) => targets.push(Type::Instance(class)),
                Type::Generic {
                    base: GenericBase::Type,
                    args,
                } => targets.push(args.into_iter().next().unwrap_or(Type::Unknown)),
                _ => return None,
            }
        }
        Some(targets)
    }
}

#[cfg(test)]
mod tests {
    use crate::check_source;

    fn messages(src: &str) -> Vec<String> {
        check_source("test.py", src).into_iter().map(|d| d.message).collect()
    }

    #[test]
    fn is_not_none_narrows_optional() {
        let src = "def f(x: int | None) -> int:\n    if x is not None:\n        return x\n    return 0\n";
        assert!(messages(src).is_empty(), "{:?}", messages(src));
    }

    #[test]
    fn early_return_narrows_the_rest_of_the_body() {
        let src = "def f(x: str | None) -> str:\n    if x is None:\n        return ''\n    return x.upper()\n";
        assert!(messages(src).is_empty(), "{:?}", messages(src));
    }

    #[test]
    fn isinstance_splits_union() {
        let src = "def f(x: int | str) -> int:\n    if isinstance(x, str):\n        return len(x)\n    return x + 1\n";
        assert!(messages(src).is_empty(), "{:?}", messages(src));
    }

    #[test]
    fn truthiness_and_boolean_operators() {
        let src = "def f(x: list[int] | None) -> int:\n    if x and len(x) > 0:\n        return x[0]\n    return 0\n";
        assert!(messages(src).is_empty(), "{:?}", messages(src));
    }

    #[test]
    fn narrowing_does_not_leak_out_of_branch() {
        let src = "def f(x: str | None) -> None:\n    if x is not None:\n        print(x.upper())\n    print(x.upper())\n";
        let msgs = messages(src);
        assert_eq!(msgs, vec!["item `None` of `str | None` has no attribute `upper`".to_string()]);
    }

    #[test]
    fn not_swaps_branches() {
        let src = "def f(x: int | None) -> int:\n    if not x is None:\n        return x\n    return 1\n";
        assert!(messages(src).is_empty(), "{:?}", messages(src));
    }
}
