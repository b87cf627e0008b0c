#![forbid(unsafe_code)]

use typy_ast::ParamKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

/// A user-defined class; the name is kept for messages.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassRef {
    pub id: ClassId,
    pub name: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Primitive {
    Int,
    Float,
    Complex,
    Str,
    Bytes,
    Bool,
    None,
    Object,
}

impl Primitive {
    pub fn name(self) -> &'static str {
        match self {
            Primitive::Int => "int",
            Primitive::Float => "float",
            Primitive::Complex => "complex",
            Primitive::Str => "str",
            Primitive::Bytes => "bytes",
            Primitive::Bool => "bool",
            Primitive::None => "None",
            Primitive::Object => "object",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "int" => Primitive::Int,
            "float" => Primitive::Float,
            "complex" => Primitive::Complex,
            "str" => Primitive::Str,
            "bytes" => Primitive::Bytes,
            "bool" => Primitive::Bool,
            "object" => Primitive::Object,
            _ => return None,
        })
    }

    /// `bool <= int <= float <= complex`
    pub fn numeric_rank(self) -> Option<u8> {
        match self {
            Primitive::Bool => Some(0),
            Primitive::Int => Some(1),
            Primitive::Float => Some(2),
            Primitive::Complex => Some(3),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GenericBase {
    List,
    Dict,
    Set,
    FrozenSet,
    /// Fixed arity: one argument per element.
    Tuple,
    /// `tuple[T, ...]`
    VarTuple,
    Iterable,
    Iterator,
    Sequence,
    Mapping,
    Range,
    /// The class object of a builtin type, e.g. `type[int]`.
    Type,
    /// Result of calling an `async def`.
    Awaitable,
}

impl GenericBase {
    pub fn name(self) -> &'static str {
        match self {
            GenericBase::List => "list",
            GenericBase::Dict => "dict",
            GenericBase::Set => "set",
            GenericBase::FrozenSet => "frozenset",
            GenericBase::Tuple | GenericBase::VarTuple => "tuple",
            GenericBase::Iterable => "Iterable",
            GenericBase::Iterator => "Iterator",
            GenericBase::Sequence => "Sequence",
            GenericBase::Mapping => "Mapping",
            GenericBase::Range => "range",
            GenericBase::Type => "type",
            GenericBase::Awaitable => "Awaitable",
        }
    }

    /// Number of type arguments, `None` for fixed tuples.
    pub fn arity(self) -> Option<usize> {
        match self {
            GenericBase::Tuple => None,
            GenericBase::Range => Some(0),
            GenericBase::Dict | GenericBase::Mapping => Some(2),
            _ => Some(1),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParamType {
    pub name: Option<String>,
    pub kind: ParamKind,
    pub ty: Type,
    pub has_default: bool,
}

impl ParamType {
    pub fn positional(name: &str, ty: Type) -> Self {
        Self {
            name: Some(name.to_string()),
            kind: ParamKind::Regular,
            ty,
            has_default: false,
        }
    }

    pub fn optional(name: &str, ty: Type) -> Self {
        Self {
            has_default: true,
            ..Self::positional(name, ty)
        }
    }

    pub fn var_positional(ty: Type) -> Self {
        Self {
            name: Some("args".to_string()),
            kind: ParamKind::VarPositional,
            ty,
            has_default: false,
        }
    }

    pub fn var_keyword(ty: Type) -> Self {
        Self {
            name: Some("kwargs".to_string()),
            kind: ParamKind::VarKeyword,
            ty,
            has_default: false,
        }
    }

    pub fn accepts_positional(&self) -> bool {
        matches!(self.kind, ParamKind::PositionalOnly | ParamKind::Regular)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionType {
    pub params: Vec<ParamType>,
    pub ret: Box<Type>,
}

impl FunctionType {
    pub fn new(params: Vec<ParamType>, ret: Type) -> Self {
        Self {
            params,
            ret: Box::new(ret),
        }
    }

    /// `Callable[..., ret]`
    pub fn gradual(ret: Type) -> Self {
        Self::new(
            vec![
                ParamType::var_positional(Type::Any),
                ParamType::var_keyword(Type::Any),
            ],
            ret,
        )
    }

    /// Accepts any argument list.
    pub fn is_gradual(&self) -> bool {
        let has_var_pos = self
            .params
            .iter()
            .any(|p| p.kind == ParamKind::VarPositional && p.ty.is_escape());
        let has_var_kw = self
            .params
            .iter()
            .any(|p| p.kind == ParamKind::VarKeyword && p.ty.is_escape());
        has_var_pos && has_var_kw && self.params.iter().all(|p| !p.accepts_positional())
    }

    /// The signature seen through an instance: first positional parameter dropped.
    pub fn bound(&self) -> FunctionType {
        let mut params = self.params.clone();
        if let Some(idx) = params.iter().position(ParamType::accepts_positional) {
            if idx == 0 {
                params.remove(0);
            }
        }
        FunctionType {
            params,
            ret: self.ret.clone(),
        }
    }
}

/// Supplies class hierarchy facts to `is_assignable`.
pub trait ClassHierarchy {
    /// Direct bases as instance types; `Any` marks a base that could not be resolved.
    fn bases(&self, class: ClassId) -> &[Type];
}

/// A hierarchy with no user classes.
pub struct NoClasses;

impl ClassHierarchy for NoClasses {
    fn bases(&self, _class: ClassId) -> &[Type] {
        &[]
    }
}

static UNKNOWN: Type = Type::Unknown;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Type {
    Primitive(Primitive),
    /// Always normalized through `Type::union`: flat, deduplicated, two or more members.
    Union(Vec<Type>),
    Generic {
        base: GenericBase,
        args: Vec<Type>,
    },
    Function(FunctionType),
    Instance(ClassRef),
    Class(ClassRef),
    /// Not enough information; compatible with everything.
    Unknown,
    /// Explicitly dynamic; compatible with everything.
    Any,
    /// Result of an expression that already produced a diagnostic.
    Error,
}

impl Type {
    pub const INT: Type = Type::Primitive(Primitive::Int);
    pub const FLOAT: Type = Type::Primitive(Primitive::Float);
    pub const COMPLEX: Type = Type::Primitive(Primitive::Complex);
    pub const STR: Type = Type::Primitive(Primitive::Str);
    pub const BYTES: Type = Type::Primitive(Primitive::Bytes);
    pub const BOOL: Type = Type::Primitive(Primitive::Bool);
    pub const NONE: Type = Type::Primitive(Primitive::None);
    pub const OBJECT: Type = Type::Primitive(Primitive::Object);

    pub fn generic(base: GenericBase, args: Vec<Type>) -> Type {
        Type::Generic { base, args }
    }

    pub fn list(elem: Type) -> Type {
        Type::generic(GenericBase::List, vec![elem])
    }

    pub fn set(elem: Type) -> Type {
        Type::generic(GenericBase::Set, vec![elem])
    }

    pub fn dict(key: Type, value: Type) -> Type {
        Type::generic(GenericBase::Dict, vec![key, value])
    }

    pub fn tuple(items: Vec<Type>) -> Type {
        Type::generic(GenericBase::Tuple, items)
    }

    pub fn var_tuple(elem: Type) -> Type {
        Type::generic(GenericBase::VarTuple, vec![elem])
    }

    pub fn iterable(elem: Type) -> Type {
        Type::generic(GenericBase::Iterable, vec![elem])
    }

    pub fn iterator(elem: Type) -> Type {
        Type::generic(GenericBase::Iterator, vec![elem])
    }

    pub fn range() -> Type {
        Type::generic(GenericBase::Range, Vec::new())
    }

    pub fn type_of(instance: Type) -> Type {
        Type::generic(GenericBase::Type, vec![instance])
    }

    pub fn optional(inner: Type) -> Type {
        Type::union(vec![inner, Type::NONE])
    }

    /// Builds a normalized union.
    ///
    /// Nested unions are flattened and duplicates removed (first occurrence
    /// wins, so display order follows source order). `Any` or `Unknown`
    /// anywhere absorbs the union; `Error` members are dropped unless nothing
    /// else is left.
    pub fn union(items: impl IntoIterator<Item = Type>) -> Type {
        let mut flat: Vec<Type> = Vec::new();
        let mut saw_error = false;
        let mut stack: Vec<Type> = items.into_iter().collect();
        stack.reverse();
        while let Some(item) = stack.pop() {
            match item {
                Type::Union(members) => {
                    for m in members.into_iter().rev() {
                        stack.push(m);
                    }
                }
                Type::Any => return Type::Any,
                Type::Unknown => return Type::Unknown,
                Type::Error => saw_error = true,
                other => {
                    if !flat.contains(&other) {
                        flat.push(other);
                    }
                }
            }
        }
        match flat.len() {
            0 if saw_error => Type::Error,
            0 => Type::Unknown,
            1 => flat.remove(0),
            _ => Type::Union(flat),
        }
    }

    pub fn is_escape(&self) -> bool {
        matches!(self, Type::Any | Type::Unknown | Type::Error)
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Type::Primitive(Primitive::None))
    }

    pub fn members(&self) -> &[Type] {
        match self {
            Type::Union(members) => members,
            other => std::slice::from_ref(other),
        }
    }

    pub fn contains_none(&self) -> bool {
        self.members().iter().any(Type::is_none)
    }

    pub fn without_none(&self) -> Type {
        Type::union(self.members().iter().filter(|m| !m.is_none()).cloned())
    }

    /// True for containers whose element types are still open, e.g. `[]`.
    pub fn is_partial(&self) -> bool {
        match self {
            Type::Generic { args, .. } => args.iter().any(|a| matches!(a, Type::Unknown)),
            _ => false,
        }
    }

    pub fn arg(&self, idx: usize) -> &Type {
        match self {
            Type::Generic { args, .. } => args.get(idx).unwrap_or(&UNKNOWN),
            _ => &UNKNOWN,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Primitive(p) if p.numeric_rank().is_some())
    }

    /// Element type produced by iterating a builtin container.
    ///
    /// Returns `None` when the type is not a known iterable (user classes are
    /// resolved by the checker).
    pub fn builtin_element_type(&self) -> Option<Type> {
        match self {
            Type::Primitive(Primitive::Str) => Some(Type::STR),
            Type::Primitive(Primitive::Bytes) => Some(Type::INT),
            Type::Generic { base, args } => match base {
                GenericBase::List
                | GenericBase::Set
                | GenericBase::FrozenSet
                | GenericBase::VarTuple
                | GenericBase::Iterable
                | GenericBase::Iterator
                | GenericBase::Sequence
                | GenericBase::Dict
                | GenericBase::Mapping => Some(self.arg(0).clone()),
                GenericBase::Tuple => Some(Type::union(args.iter().cloned())),
                GenericBase::Range => Some(Type::INT),
                GenericBase::Type | GenericBase::Awaitable => None,
            },
            _ => None,
        }
    }

    pub fn display(&self) -> String {
        match self {
            Type::Primitive(p) => p.name().to_string(),
            Type::Union(members) => members
                .iter()
                .map(|m| match m {
                    Type::Function(_) => format!("({})", m.display()),
                    _ => m.display(),
                })
                .collect::<Vec<_>>()
                .join(" | "),
            Type::Generic { base, args } => match base {
                GenericBase::Range => "range".to_string(),
                GenericBase::Tuple if args.is_empty() => "tuple[()]".to_string(),
                GenericBase::VarTuple => format!("tuple[{}, ...]", self.arg(0).display()),
                _ => {
                    let args_s = args
                        .iter()
                        .map(|t| t.display())
                        .collect::<Vec<_>>()
                        .join(", ");
                    format!("{}[{args_s}]", base.name())
                }
            },
            Type::Function(f) => {
                if f.is_gradual() {
                    return format!("Callable[..., {}]", f.ret.display());
                }
                let params = f
                    .params
                    .iter()
                    .map(|p| match p.kind {
                        ParamKind::VarPositional => format!("*{}", p.ty.display()),
                        ParamKind::VarKeyword => format!("**{}", p.ty.display()),
                        _ => p.ty.display(),
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("Callable[[{params}], {}]", f.ret.display())
            }
            Type::Instance(c) => c.name.clone(),
            Type::Class(c) => format!("type[{}]", c.name),
            Type::Unknown => "Unknown".to_string(),
            Type::Any => "Any".to_string(),
            Type::Error => "<error>".to_string(),
        }
    }
}

/// Whether a value of type `value` may be stored where `target` is expected.
pub fn is_assignable(target: &Type, value: &Type, classes: &dyn ClassHierarchy) -> bool {
    if target.is_escape() || value.is_escape() {
        return true;
    }
    if let Type::Union(members) = value {
        return members.iter().all(|m| is_assignable(target, m, classes));
    }
    if let Type::Union(members) = target {
        return members.iter().any(|m| is_assignable(m, value, classes));
    }

    match (target, value) {
        (Type::Primitive(Primitive::Object), _) => true,
        (Type::Primitive(t), Type::Primitive(v)) => t == v || numeric_widens(*v, *t),
        (_, Type::Instance(c)) => instance_assignable(target, c, classes),
        (
            Type::Generic {
                base: tb,
                args: targs,
            },
            Type::Generic {
                base: vb,
                args: vargs,
            },
        ) => generic_assignable(*tb, targs, *vb, vargs, classes),
        (
            Type::Generic {
                base: GenericBase::Iterable | GenericBase::Sequence,
                ..
            },
            Type::Primitive(Primitive::Str),
        ) => is_assignable(target.arg(0), &Type::STR, classes),
        (
            Type::Generic {
                base: GenericBase::Iterable | GenericBase::Sequence,
                ..
            },
            Type::Primitive(Primitive::Bytes),
        ) => is_assignable(target.arg(0), &Type::INT, classes),
        (Type::Function(t), Type::Function(v)) => function_assignable(t, v, classes),
        (Type::Function(_), Type::Class(_)) => true,
        (
            Type::Function(_),
            Type::Generic {
                base: GenericBase::Type,
                ..
            },
        ) => true,
        (
            Type::Generic {
                base: GenericBase::Type,
                ..
            },
            Type::Class(c),
        ) => is_assignable(target.arg(0), &Type::Instance(c.clone()), classes),
        (Type::Class(t), Type::Class(v)) => {
            is_assignable(&Type::Instance(t.clone()), &Type::Instance(v.clone()), classes)
        }
        _ => false,
    }
}

fn numeric_widens(value: Primitive, target: Primitive) -> bool {
    match (value.numeric_rank(), target.numeric_rank()) {
        (Some(v), Some(t)) => v <= t,
        _ => false,
    }
}

fn instance_assignable(target: &Type, class: &ClassRef, classes: &dyn ClassHierarchy) -> bool {
    if let Type::Instance(t) = target {
        if t.id == class.id {
            return true;
        }
    }
    classes
        .bases(class.id)
        .iter()
        .any(|base| is_assignable(target, base, classes))
}

fn invariant(a: &Type, b: &Type, classes: &dyn ClassHierarchy) -> bool {
    a.is_escape()
        || b.is_escape()
        || (is_assignable(a, b, classes) && is_assignable(b, a, classes))
}

fn generic_assignable(
    tb: GenericBase,
    targs: &[Type],
    vb: GenericBase,
    vargs: &[Type],
    classes: &dyn ClassHierarchy,
) -> bool {
    use GenericBase as G;

    let t0 = targs.first().unwrap_or(&UNKNOWN);
    let v0 = vargs.first().unwrap_or(&UNKNOWN);
    let cov = |t: &Type, v: &Type| is_assignable(t, v, classes);

    match (tb, vb) {
        (G::List | G::Set | G::FrozenSet | G::Dict, _) if tb == vb => targs
            .iter()
            .zip(vargs.iter())
            .all(|(t, v)| invariant(t, v, classes)),
        (G::Range, G::Range) => true,
        (G::Tuple, G::Tuple) => {
            targs.len() == vargs.len() && targs.iter().zip(vargs.iter()).all(|(t, v)| cov(t, v))
        }
        (G::VarTuple | G::Iterable | G::Sequence, G::Tuple) => vargs.iter().all(|v| cov(t0, v)),
        (G::VarTuple, G::VarTuple) => cov(t0, v0),
        (
            G::Iterable,
            G::List
            | G::Set
            | G::FrozenSet
            | G::VarTuple
            | G::Iterable
            | G::Iterator
            | G::Sequence
            | G::Dict
            | G::Mapping,
        ) => cov(t0, v0),
        (G::Iterable | G::Sequence, G::Range) => cov(t0, &Type::INT),
        (G::Iterator, G::Iterator) => cov(t0, v0),
        (G::Sequence, G::List | G::VarTuple | G::Sequence) => cov(t0, v0),
        (G::Mapping, G::Dict | G::Mapping) => {
            let t1 = targs.get(1).unwrap_or(&UNKNOWN);
            let v1 = vargs.get(1).unwrap_or(&UNKNOWN);
            invariant(t0, v0, classes) && cov(t1, v1)
        }
        (G::Type, G::Type) | (G::Awaitable, G::Awaitable) => cov(t0, v0),
        _ => false,
    }
}

fn function_assignable(target: &FunctionType, value: &FunctionType, classes: &dyn ClassHierarchy) -> bool {
    let ret_ok = is_assignable(&target.ret, &value.ret, classes);
    if target.is_gradual() || value.is_gradual() {
        return ret_ok;
    }

    let target_pos: Vec<&ParamType> = target.params.iter().filter(|p| p.accepts_positional()).collect();
    let value_pos: Vec<&ParamType> = value.params.iter().filter(|p| p.accepts_positional()).collect();
    let value_var = value
        .params
        .iter()
        .find(|p| p.kind == ParamKind::VarPositional);

    if target_pos.len() > value_pos.len() && value_var.is_none() {
        return false;
    }
    if value_pos
        .iter()
        .skip(target_pos.len())
        .any(|p| !p.has_default)
    {
        return false;
    }
    for (idx, t) in target_pos.iter().enumerate() {
        let v_ty = match value_pos.get(idx) {
            Some(v) => &v.ty,
            None => value_var.map(|v| &v.ty).unwrap_or(&UNKNOWN),
        };
        // Parameters are contravariant.
        if !is_assignable(v_ty, &t.ty, classes) {
            return false;
        }
    }
    ret_ok
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(target: &Type, value: &Type) -> bool {
        is_assignable(target, value, &NoClasses)
    }

    #[test]
    fn numeric_promotion_goes_up_only() {
        assert!(ok(&Type::FLOAT, &Type::INT));
        assert!(ok(&Type::COMPLEX, &Type::BOOL));
        assert!(ok(&Type::INT, &Type::BOOL));
        assert!(!ok(&Type::INT, &Type::FLOAT));
        assert!(!ok(&Type::STR, &Type::INT));
    }

    #[test]
    fn union_rules() {
        let int_or_str = Type::union(vec![Type::INT, Type::STR]);
        assert!(ok(&int_or_str, &Type::INT));
        assert!(!ok(&Type::INT, &int_or_str));
        assert!(ok(&Type::OBJECT, &int_or_str));
        assert!(ok(&Type::optional(Type::INT), &Type::NONE));
    }

    #[test]
    fn union_normalization_flattens_and_absorbs() {
        let u = Type::union(vec![
            Type::INT,
            Type::union(vec![Type::STR, Type::INT]),
            Type::Error,
        ]);
        assert_eq!(u, Type::Union(vec![Type::INT, Type::STR]));
        assert_eq!(Type::union(vec![Type::INT, Type::Unknown]), Type::Unknown);
        assert_eq!(Type::union(vec![Type::Any, Type::INT]), Type::Any);
        assert_eq!(Type::union(vec![Type::INT, Type::INT]), Type::INT);
        assert_eq!(Type::union(vec![Type::Error]), Type::Error);
    }

    #[test]
    fn containers_are_invariant_except_readonly_views() {
        let list_int = Type::list(Type::INT);
        let list_float = Type::list(Type::FLOAT);
        assert!(!ok(&list_float, &list_int));
        assert!(ok(&Type::iterable(Type::FLOAT), &list_int));
        assert!(ok(&Type::var_tuple(Type::FLOAT), &Type::tuple(vec![Type::INT, Type::BOOL])));
        assert!(ok(&list_int, &Type::list(Type::Unknown)));
        assert!(!ok(&Type::tuple(vec![Type::INT]), &Type::tuple(vec![Type::INT, Type::INT])));
        assert!(ok(&Type::iterable(Type::STR), &Type::STR));
    }

    #[test]
    fn escape_types_are_compatible_both_ways() {
        for escape in [Type::Any, Type::Unknown, Type::Error] {
            assert!(ok(&Type::INT, &escape));
            assert!(ok(&escape, &Type::STR));
        }
    }

    #[test]
    fn functions_are_contravariant_in_params() {
        let takes_float = FunctionType::new(vec![ParamType::positional("x", Type::FLOAT)], Type::INT);
        let takes_int = FunctionType::new(vec![ParamType::positional("x", Type::INT)], Type::INT);
        assert!(ok(&Type::Function(takes_int.clone()), &Type::Function(takes_float.clone())));
        assert!(!ok(&Type::Function(takes_float), &Type::Function(takes_int)));
    }

    #[test]
    fn display_matches_python_spelling() {
        assert_eq!(Type::optional(Type::STR).display(), "str | None");
        assert_eq!(Type::dict(Type::STR, Type::list(Type::INT)).display(), "dict[str, list[int]]");
        assert_eq!(Type::var_tuple(Type::INT).display(), "tuple[int, ...]");
        assert_eq!(Type::tuple(Vec::new()).display(), "tuple[()]");
        assert_eq!(Type::Function(FunctionType::gradual(Type::INT)).display(), "Callable[..., int]");
    }

    struct Chain(Vec<Type>);

    impl ClassHierarchy for Chain {
        fn bases(&self, class: ClassId) -> &[Type] {
            if class.0 == 1 { &self.0 } else { &[] }
        }
    }

    #[test]
    fn instances_follow_their_bases() {
        let base = ClassRef {
            id: ClassId(0),
            name: "Base".to_string(),
        };
        let derived = ClassRef {
            id: ClassId(1),
            name: "Derived".to_string(),
        };
        let h = Chain(vec![Type::Instance(base.clone())]);
        assert!(is_assignable(&Type::Instance(base.clone()), &Type::Instance(derived.clone()), &h));
        assert!(!is_assignable(&Type::Instance(derived), &Type::Instance(base), &h));
    }
}
