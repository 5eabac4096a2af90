//! Mailbox Terms
//!
//! Dynamically typed values exchanged between processes and passed as call
//! arguments. Terms are cheap to clone: binaries are `Bytes` and resources
//! are reference counted.

use crate::registry::Pid;
use bytes::Bytes;
use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// Opaque, runtime-tracked reference to a native object.
///
/// The object is freed when the last term holding it is dropped, which is
/// how this runtime "collects" resources.
pub type ResourceRef = Arc<dyn Any + Send + Sync>;

/// A runtime value
#[derive(Clone)]
pub enum Term {
    Atom(Cow<'static, str>),
    Int(i64),
    Binary(Bytes),
    List(Vec<Term>),
    Tuple(Vec<Term>),
    Pid(Pid),
    Resource(ResourceRef),
}

impl Term {
    pub fn atom(name: impl Into<Cow<'static, str>>) -> Self {
        Term::Atom(name.into())
    }

    pub fn binary(data: impl Into<Bytes>) -> Self {
        Term::Binary(data.into())
    }

    pub fn tuple(elements: Vec<Term>) -> Self {
        Term::Tuple(elements)
    }

    pub fn tuple2(first: Term, second: Term) -> Self {
        Term::Tuple(vec![first, second])
    }

    pub fn list(elements: Vec<Term>) -> Self {
        Term::List(elements)
    }

    pub fn resource(object: ResourceRef) -> Self {
        Term::Resource(object)
    }

    /// The `ok` atom
    pub fn ok() -> Self {
        Term::atom("ok")
    }

    /// `{ok, value}`
    pub fn ok_tuple(value: Term) -> Self {
        Term::tuple2(Term::ok(), value)
    }

    /// `{error, message}` with the message as a binary
    pub fn error_tuple(message: impl Into<String>) -> Self {
        Term::tuple2(Term::atom("error"), Term::binary(message.into()))
    }

    /// The `nil` atom
    pub fn nil() -> Self {
        Term::atom("nil")
    }

    pub fn boolean(value: bool) -> Self {
        Term::atom(if value { "true" } else { "false" })
    }

    pub fn as_atom(&self) -> Option<&str> {
        match self {
            Term::Atom(name) => Some(name),
            _ => None,
        }
    }

    /// True when the term is the atom `name`
    pub fn is_atom(&self, name: &str) -> bool {
        self.as_atom() == Some(name)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Term::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Non-negative integers only
    pub fn as_u64(&self) -> Option<u64> {
        self.as_int().and_then(|value| u64::try_from(value).ok())
    }

    pub fn as_binary(&self) -> Option<&Bytes> {
        match self {
            Term::Binary(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Term]> {
        match self {
            Term::List(elements) => Some(elements),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&[Term]> {
        match self {
            Term::Tuple(elements) => Some(elements),
            _ => None,
        }
    }

    pub fn as_pid(&self) -> Option<Pid> {
        match self {
            Term::Pid(pid) => Some(*pid),
            _ => None,
        }
    }

    pub fn as_resource(&self) -> Option<&ResourceRef> {
        match self {
            Term::Resource(object) => Some(object),
            _ => None,
        }
    }

    /// Short name of the term's shape, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Term::Atom(_) => "atom",
            Term::Int(_) => "integer",
            Term::Binary(_) => "binary",
            Term::List(_) => "list",
            Term::Tuple(_) => "tuple",
            Term::Pid(_) => "pid",
            Term::Resource(_) => "resource",
        }
    }
}

impl PartialEq for Term {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Term::Atom(a), Term::Atom(b)) => a == b,
            (Term::Int(a), Term::Int(b)) => a == b,
            (Term::Binary(a), Term::Binary(b)) => a == b,
            (Term::List(a), Term::List(b)) => a == b,
            (Term::Tuple(a), Term::Tuple(b)) => a == b,
            (Term::Pid(a), Term::Pid(b)) => a == b,
            // Resources have identity, not value
            (Term::Resource(a), Term::Resource(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<bool> for Term {
    fn from(value: bool) -> Self {
        Term::boolean(value)
    }
}

impl From<i64> for Term {
    fn from(value: i64) -> Self {
        Term::Int(value)
    }
}

impl From<Bytes> for Term {
    fn from(value: Bytes) -> Self {
        Term::Binary(value)
    }
}

impl From<Vec<u8>> for Term {
    fn from(value: Vec<u8>) -> Self {
        Term::Binary(Bytes::from(value))
    }
}

impl From<Pid> for Term {
    fn from(value: Pid) -> Self {
        Term::Pid(value)
    }
}

fn write_seq(f: &mut fmt::Formatter<'_>, elements: &[Term]) -> fmt::Result {
    for (i, element) in elements.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{element}")?;
    }
    Ok(())
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Atom(name) => write!(f, "{name}"),
            Term::Int(value) => write!(f, "{value}"),
            Term::Binary(data) => match std::str::from_utf8(data) {
                Ok(text) => write!(f, "<<{text:?}>>"),
                Err(_) => write!(f, "<<{} bytes>>", data.len()),
            },
            Term::List(elements) => {
                write!(f, "[")?;
                write_seq(f, elements)?;
                write!(f, "]")
            }
            Term::Tuple(elements) => {
                write!(f, "{{")?;
                write_seq(f, elements)?;
                write!(f, "}}")
            }
            Term::Pid(pid) => write!(f, "{pid}"),
            Term::Resource(object) => write!(f, "#Resource<{:p}>", Arc::as_ptr(object)),
        }
    }
}

impl fmt::Debug for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_helpers() {
        assert!(Term::ok().is_atom("ok"));

        let reply = Term::ok_tuple(Term::Int(7));
        let elements = reply.as_tuple().unwrap();
        assert!(elements[0].is_atom("ok"));
        assert_eq!(elements[1].as_int(), Some(7));

        let error = Term::error_tuple("boom");
        let elements = error.as_tuple().unwrap();
        assert!(elements[0].is_atom("error"));
        assert_eq!(elements[1].as_binary().unwrap().as_ref(), b"boom");
    }

    #[test]
    fn test_resource_identity_equality() {
        let object: ResourceRef = Arc::new(5u32);
        let a = Term::resource(object.clone());
        let b = Term::resource(object);
        let c = Term::resource(Arc::new(5u32));

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_as_u64_rejects_negative() {
        assert_eq!(Term::Int(-1).as_u64(), None);
        assert_eq!(Term::Int(42).as_u64(), Some(42));
        assert_eq!(Term::atom("x").as_u64(), None);
    }

    #[test]
    fn test_display() {
        let term = Term::tuple2(Term::atom("sub"), Term::list(vec![Term::Int(1), Term::binary("hi")]));
        assert_eq!(term.to_string(), "{sub, [1, <<\"hi\">>]}");

        let binary = Term::binary(vec![0xff, 0xfe]);
        assert_eq!(binary.to_string(), "<<2 bytes>>");
    }
}
