#![forbid(unsafe_code)]

use typy_ast::ParamKind;

use crate::types::{FunctionType, GenericBase, ParamType, Primitive, Type};

#[derive(Clone, Debug, PartialEq)]
pub enum Builtin {
    Function(FunctionType),
    /// Result type depends on the argument types; computed by the checker.
    Special(Special),
    /// Class object; calling it yields the instance type.
    Class(Type),
    /// Exceptions and classes we do not model; typed as `Any`.
    Opaque,
    Value(Type),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Special {
    Abs,
    Min,
    Max,
    Sum,
    Sorted,
    Reversed,
    Enumerate,
    Zip,
    Iter,
    Next,
    Map,
    Filter,
    Round,
    Super,
}

const OPAQUE: &[&str] = &[
    "BaseException",
    "Exception",
    "ArithmeticError",
    "AssertionError",
    "AttributeError",
    "BlockingIOError",
    "BrokenPipeError",
    "BufferError",
    "ChildProcessError",
    "ConnectionAbortedError",
    "ConnectionError",
    "ConnectionRefusedError",
    "ConnectionResetError",
    "EOFError",
    "EnvironmentError",
    "FileExistsError",
    "FileNotFoundError",
    "FloatingPointError",
    "GeneratorExit",
    "IOError",
    "ImportError",
    "IndentationError",
    "IndexError",
    "InterruptedError",
    "IsADirectoryError",
    "KeyError",
    "KeyboardInterrupt",
    "LookupError",
    "MemoryError",
    "ModuleNotFoundError",
    "NameError",
    "NotADirectoryError",
    "NotImplementedError",
    "OSError",
    "OverflowError",
    "PermissionError",
    "ProcessLookupError",
    "RecursionError",
    "ReferenceError",
    "RuntimeError",
    "StopAsyncIteration",
    "StopIteration",
    "SyntaxError",
    "SystemError",
    "SystemExit",
    "TabError",
    "TimeoutError",
    "TypeError",
    "UnboundLocalError",
    "UnicodeDecodeError",
    "UnicodeEncodeError",
    "UnicodeError",
    "ValueError",
    "ZeroDivisionError",
    "Warning",
    "UserWarning",
    "DeprecationWarning",
    "RuntimeWarning",
    "FutureWarning",
    "ExceptionGroup",
    "BaseExceptionGroup",
    "bytearray",
    "memoryview",
    "slice",
    "property",
    "staticmethod",
    "classmethod",
];

pub fn lookup(name: &str) -> Option<Builtin> {
    if let Some(special) = special(name) {
        return Some(Builtin::Special(special));
    }
    if let Some(instance) = class(name) {
        return Some(Builtin::Class(instance));
    }
    if OPAQUE.contains(&name) {
        return Some(Builtin::Opaque);
    }
    if let Some(ty) = value(name) {
        return Some(Builtin::Value(ty));
    }
    function(name).map(Builtin::Function)
}

fn special(name: &str) -> Option<Special> {
    Some(match name {
        "abs" => Special::Abs,
        "min" => Special::Min,
        "max" => Special::Max,
        "sum" => Special::Sum,
        "sorted" => Special::Sorted,
        "reversed" => Special::Reversed,
        "enumerate" => Special::Enumerate,
        "zip" => Special::Zip,
        "iter" => Special::Iter,
        "next" => Special::Next,
        "map" => Special::Map,
        "filter" => Special::Filter,
        "round" => Special::Round,
        "super" => Special::Super,
        _ => return None,
    })
}

/// Instance type of a builtin class.
pub fn class(name: &str) -> Option<Type> {
    if let Some(p) = Primitive::from_name(name) {
        return Some(Type::Primitive(p));
    }
    Some(match name {
        "list" => Type::list(Type::Unknown),
        "dict" => Type::dict(Type::Unknown, Type::Unknown),
        "set" => Type::set(Type::Unknown),
        "frozenset" => Type::generic(GenericBase::FrozenSet, vec![Type::Unknown]),
        "tuple" => Type::var_tuple(Type::Unknown),
        "range" => Type::range(),
        "type" => Type::type_of(Type::Unknown),
        _ => return None,
    })
}

fn value(name: &str) -> Option<Type> {
    Some(match name {
        "__name__" | "__file__" | "__qualname__" => Type::STR,
        "__doc__" | "__package__" => Type::optional(Type::STR),
        "__debug__" => Type::BOOL,
        "__spec__" | "__loader__" | "__builtins__" | "__annotations__" | "__dict__" | "NotImplemented"
        | "Ellipsis" => Type::Any,
        _ => return None,
    })
}

fn pos(name: &str, ty: Type) -> ParamType {
    ParamType {
        kind: ParamKind::PositionalOnly,
        ..ParamType::positional(name, ty)
    }
}

fn pos_opt(name: &str, ty: Type) -> ParamType {
    ParamType {
        kind: ParamKind::PositionalOnly,
        ..ParamType::optional(name, ty)
    }
}

fn kw_opt(name: &str, ty: Type) -> ParamType {
    ParamType {
        kind: ParamKind::KeywordOnly,
        ..ParamType::optional(name, ty)
    }
}

fn sig(params: Vec<ParamType>, ret: Type) -> FunctionType {
    FunctionType::new(params, ret)
}

fn function(name: &str) -> Option<FunctionType> {
    let obj = || pos("obj", Type::OBJECT);
    Some(match name {
        "print" => sig(
            vec![
                ParamType::var_positional(Type::OBJECT),
                kw_opt("sep", Type::optional(Type::STR)),
                kw_opt("end", Type::optional(Type::STR)),
                kw_opt("file", Type::Any),
                kw_opt("flush", Type::BOOL),
            ],
            Type::NONE,
        ),
        "len" => sig(vec![obj()], Type::INT),
        "input" => sig(vec![pos_opt("prompt", Type::OBJECT)], Type::STR),
        "isinstance" | "issubclass" => sig(vec![obj(), pos("class_or_tuple", Type::Any)], Type::BOOL),
        "repr" | "ascii" => sig(vec![obj()], Type::STR),
        "hash" | "id" => sig(vec![obj()], Type::INT),
        "callable" => sig(vec![obj()], Type::BOOL),
        "chr" => sig(vec![pos("i", Type::INT)], Type::STR),
        "ord" => sig(vec![pos("c", Type::union(vec![Type::STR, Type::BYTES]))], Type::INT),
        "hex" | "oct" | "bin" => sig(vec![pos("number", Type::INT)], Type::STR),
        "any" | "all" => sig(vec![pos("iterable", Type::iterable(Type::OBJECT))], Type::BOOL),
        "hasattr" => sig(vec![obj(), pos("name", Type::STR)], Type::BOOL),
        "getattr" => sig(vec![obj(), pos("name", Type::STR), pos_opt("default", Type::Any)], Type::Any),
        "setattr" => sig(vec![obj(), pos("name", Type::STR), pos("value", Type::Any)], Type::NONE),
        "delattr" => sig(vec![obj(), pos("name", Type::STR)], Type::NONE),
        "format" => sig(vec![pos("value", Type::OBJECT), pos_opt("format_spec", Type::STR)], Type::STR),
        "dir" => sig(vec![pos_opt("obj", Type::OBJECT)], Type::list(Type::STR)),
        "open" | "vars" | "globals" | "locals" | "exit" | "quit" | "divmod" | "pow" | "eval" | "exec"
        | "compile" | "__import__" | "breakpoint" | "help" => FunctionType::gradual(Type::Any),
        _ => return None,
    })
}

/// Method of a builtin type, already bound to `receiver`.
///
/// `None` means the method is not in the table, which callers treat as
/// `Unknown` rather than an error.
pub fn method(receiver: &Type, name: &str) -> Option<FunctionType> {
    match receiver {
        Type::Primitive(Primitive::Str) => str_method(name),
        Type::Primitive(Primitive::Bytes) => bytes_method(name),
        Type::Primitive(Primitive::Int | Primitive::Bool) => int_method(name),
        Type::Primitive(Primitive::Float) => float_method(name),
        Type::Generic { base, .. } => {
            let t = receiver.arg(0).clone();
            match base {
                GenericBase::List => list_method(t, receiver, name),
                GenericBase::Dict => dict_method(t, receiver.arg(1).clone(), receiver, name),
                GenericBase::Mapping => match name {
                    "get" | "keys" | "values" | "items" => {
                        dict_method(t, receiver.arg(1).clone(), receiver, name)
                    }
                    _ => None,
                },
                GenericBase::Set | GenericBase::FrozenSet => set_method(t, receiver, name),
                GenericBase::Tuple | GenericBase::VarTuple | GenericBase::Sequence => match name {
                    "count" | "index" => Some(sig(vec![pos("value", Type::OBJECT)], Type::INT)),
                    _ => None,
                },
                GenericBase::Iterator => match name {
                    "__next__" => Some(sig(Vec::new(), t)),
                    _ => None,
                },
                _ => None,
            }
        }
        _ => None,
    }
}

fn str_method(name: &str) -> Option<FunctionType> {
    let opt_str = || Type::optional(Type::STR);
    let opt_int = || Type::optional(Type::INT);
    Some(match name {
        "upper" | "lower" | "title" | "capitalize" | "casefold" | "swapcase" => sig(Vec::new(), Type::STR),
        "strip" | "lstrip" | "rstrip" => sig(vec![pos_opt("chars", opt_str())], Type::STR),
        "split" | "rsplit" => sig(
            vec![
                ParamType::optional("sep", opt_str()),
                ParamType::optional("maxsplit", Type::INT),
            ],
            Type::list(Type::STR),
        ),
        "splitlines" => sig(vec![ParamType::optional("keepends", Type::BOOL)], Type::list(Type::STR)),
        "join" => sig(vec![pos("iterable", Type::iterable(Type::STR))], Type::STR),
        "replace" => sig(
            vec![pos("old", Type::STR), pos("new", Type::STR), pos_opt("count", Type::INT)],
            Type::STR,
        ),
        "startswith" | "endswith" => sig(
            vec![
                pos("prefix", Type::union(vec![Type::STR, Type::var_tuple(Type::STR)])),
                pos_opt("start", opt_int()),
                pos_opt("end", opt_int()),
            ],
            Type::BOOL,
        ),
        "find" | "rfind" | "index" | "rindex" | "count" => sig(
            vec![pos("sub", Type::STR), pos_opt("start", opt_int()), pos_opt("end", opt_int())],
            Type::INT,
        ),
        "format" => sig(
            vec![
                ParamType::var_positional(Type::OBJECT),
                ParamType::var_keyword(Type::OBJECT),
            ],
            Type::STR,
        ),
        "encode" => sig(
            vec![
                ParamType::optional("encoding", Type::STR),
                ParamType::optional("errors", Type::STR),
            ],
            Type::BYTES,
        ),
        "isdigit" | "isalpha" | "isalnum" | "isspace" | "isupper" | "islower" | "istitle" | "isdecimal"
        | "isnumeric" | "isidentifier" | "isascii" | "isprintable" => sig(Vec::new(), Type::BOOL),
        "zfill" => sig(vec![pos("width", Type::INT)], Type::STR),
        "center" | "ljust" | "rjust" => sig(vec![pos("width", Type::INT), pos_opt("fillchar", Type::STR)], Type::STR),
        "partition" | "rpartition" => sig(
            vec![pos("sep", Type::STR)],
            Type::tuple(vec![Type::STR, Type::STR, Type::STR]),
        ),
        "removeprefix" | "removesuffix" => sig(vec![pos("affix", Type::STR)], Type::STR),
        "expandtabs" => sig(vec![ParamType::optional("tabsize", Type::INT)], Type::STR),
        _ => return None,
    })
}

fn bytes_method(name: &str) -> Option<FunctionType> {
    Some(match name {
        "decode" => sig(
            vec![
                ParamType::optional("encoding", Type::STR),
                ParamType::optional("errors", Type::STR),
            ],
            Type::STR,
        ),
        "hex" => sig(Vec::new(), Type::STR),
        "startswith" | "endswith" => sig(vec![pos("prefix", Type::BYTES)], Type::BOOL),
        "strip" | "lstrip" | "rstrip" => sig(vec![pos_opt("bytes", Type::optional(Type::BYTES))], Type::BYTES),
        "split" => sig(vec![ParamType::optional("sep", Type::optional(Type::BYTES))], Type::list(Type::BYTES)),
        "join" => sig(vec![pos("iterable", Type::iterable(Type::BYTES))], Type::BYTES),
        _ => return None,
    })
}

fn int_method(name: &str) -> Option<FunctionType> {
    Some(match name {
        "bit_length" | "bit_count" => sig(Vec::new(), Type::INT),
        "to_bytes" => sig(
            vec![
                ParamType::optional("length", Type::INT),
                ParamType::optional("byteorder", Type::STR),
                kw_opt("signed", Type::BOOL),
            ],
            Type::BYTES,
        ),
        "conjugate" => sig(Vec::new(), Type::INT),
        "is_integer" => sig(Vec::new(), Type::BOOL),
        "as_integer_ratio" => sig(Vec::new(), Type::tuple(vec![Type::INT, Type::INT])),
        _ => return None,
    })
}

fn float_method(name: &str) -> Option<FunctionType> {
    Some(match name {
        "is_integer" => sig(Vec::new(), Type::BOOL),
        "hex" => sig(Vec::new(), Type::STR),
        "conjugate" => sig(Vec::new(), Type::FLOAT),
        "as_integer_ratio" => sig(Vec::new(), Type::tuple(vec![Type::INT, Type::INT])),
        _ => return None,
    })
}

fn list_method(t: Type, receiver: &Type, name: &str) -> Option<FunctionType> {
    Some(match name {
        "append" => sig(vec![pos("object", t)], Type::NONE),
        "extend" => sig(vec![pos("iterable", Type::iterable(t))], Type::NONE),
        "insert" => sig(vec![pos("index", Type::INT), pos("object", t)], Type::NONE),
        "pop" => sig(vec![pos_opt("index", Type::INT)], t),
        "remove" => sig(vec![pos("value", t)], Type::NONE),
        "index" => sig(
            vec![pos("value", t), pos_opt("start", Type::INT), pos_opt("stop", Type::INT)],
            Type::INT,
        ),
        "count" => sig(vec![pos("value", t)], Type::INT),
        "sort" => sig(vec![kw_opt("key", Type::Any), kw_opt("reverse", Type::BOOL)], Type::NONE),
        "reverse" | "clear" => sig(Vec::new(), Type::NONE),
        "copy" => sig(Vec::new(), receiver.clone()),
        _ => return None,
    })
}

fn dict_method(k: Type, v: Type, receiver: &Type, name: &str) -> Option<FunctionType> {
    Some(match name {
        "get" => sig(vec![pos("key", k), pos_opt("default", Type::Any)], Type::optional(v)),
        "keys" => sig(Vec::new(), Type::iterable(k)),
        "values" => sig(Vec::new(), Type::iterable(v)),
        "items" => sig(Vec::new(), Type::iterable(Type::tuple(vec![k, v]))),
        "pop" => sig(vec![pos("key", k), pos_opt("default", Type::Any)], v),
        "setdefault" => sig(vec![pos("key", k), pos_opt("default", v.clone())], v),
        "update" => FunctionType::new(
            vec![
                ParamType::var_positional(Type::Any),
                ParamType::var_keyword(Type::Any),
            ],
            Type::NONE,
        ),
        "copy" => sig(Vec::new(), receiver.clone()),
        "clear" => sig(Vec::new(), Type::NONE),
        "popitem" => sig(Vec::new(), Type::tuple(vec![k, v])),
        _ => return None,
    })
}

fn set_method(t: Type, receiver: &Type, name: &str) -> Option<FunctionType> {
    let others = || ParamType::var_positional(Type::iterable(t.clone()));
    Some(match name {
        "add" | "discard" | "remove" => sig(vec![pos("element", t)], Type::NONE),
        "pop" => sig(Vec::new(), t),
        "union" | "intersection" | "difference" | "symmetric_difference" => {
            sig(vec![others()], receiver.clone())
        }
        "update" | "intersection_update" | "difference_update" | "symmetric_difference_update" => {
            sig(vec![others()], Type::NONE)
        }
        "issubset" | "issuperset" | "isdisjoint" => sig(vec![pos("other", Type::iterable(t))], Type::BOOL),
        "copy" => sig(Vec::new(), receiver.clone()),
        "clear" => sig(Vec::new(), Type::NONE),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_categories() {
        assert!(matches!(lookup("len"), Some(Builtin::Function(_))));
        assert!(matches!(lookup("sorted"), Some(Builtin::Special(Special::Sorted))));
        assert_eq!(lookup("int"), Some(Builtin::Class(Type::INT)));
        assert_eq!(lookup("ValueError"), Some(Builtin::Opaque));
        assert_eq!(lookup("__name__"), Some(Builtin::Value(Type::STR)));
        assert_eq!(lookup("nope"), None);
    }

    #[test]
    fn list_methods_use_the_element_type() {
        let append = method(&Type::list(Type::INT), "append").expect("append");
        assert_eq!(append.params[0].ty, Type::INT);
        assert_eq!(append.params[0].kind, ParamKind::PositionalOnly);
        let pop = method(&Type::list(Type::STR), "pop").expect("pop");
        assert_eq!(*pop.ret, Type::STR);
    }

    #[test]
    fn unknown_methods_are_absent() {
        assert!(method(&Type::STR, "frobnicate").is_none());
        assert!(method(&Type::NONE, "upper").is_none());
    }
}
