//! Compile-time value model. A `Value` is attached to every instruction: it
//! is either opaque until runtime, explicitly undefined, or carries a
//! concrete static payload the folder can compute with. Types, functions,
//! namespaces and scopes are payloads like any other, which is what lets
//! type expressions run through the same analysis as arithmetic.

use crate::{
    middle::{
        bignum::BigNum,
        ir::InstId,
        scope::{FnId, ImportId, ScopeId},
        ty::Type,
    },
};

#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    pub special: Special,
    /// Set when the value was derived from a `@compileVar` query; propagates
    /// through every fold so cached results can be invalidated when the
    /// build configuration changes
    pub depends_on_compile_var: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Special {
    /// Not known until runtime
    Runtime,
    /// Explicitly `undefined`
    Undef,
    Static(StaticValue),
}

#[derive(Debug, Clone, PartialEq)]
pub enum StaticValue {
    Num(BigNum),
    Bool(bool),
    Type(Type),
    Fn(FnId),
    /// A function with its first argument captured from a field access
    BoundFn { func: FnId, bound: InstId },
    Namespace(ImportId),
    Scope(ScopeId),
    Array(Vec<Value>),
    /// Field index → value
    Struct(Vec<Value>),
    Enum {
        tag: usize,
        payload: Option<Box<Value>>,
    },
    Maybe(Option<Box<Value>>),
    Ptr(ConstPtr),
}

/// Compile-time address: either `base` itself or one element within
/// `base`'s array payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstPtr {
    pub base: Box<Value>,
    /// `None` addresses the base value itself
    pub index: Option<usize>,
    pub is_c_str: bool,
}

impl Value {
    pub fn runtime() -> Self {
        Self {
            special: Special::Runtime,
            depends_on_compile_var: false,
        }
    }

    pub fn undef() -> Self {
        Self {
            special: Special::Undef,
            depends_on_compile_var: false,
        }
    }

    pub fn new_static(payload: StaticValue) -> Self {
        Self {
            special: Special::Static(payload),
            depends_on_compile_var: false,
        }
    }

    pub fn from_num(num: BigNum) -> Self {
        Self::new_static(StaticValue::Num(num))
    }

    pub fn from_u64(value: u64) -> Self {
        Self::from_num(BigNum::from_u64(value))
    }

    pub fn from_usize(value: usize) -> Self {
        Self::from_num(BigNum::from_usize(value))
    }

    pub fn from_bool(value: bool) -> Self {
        Self::new_static(StaticValue::Bool(value))
    }

    pub fn from_type(ty: Type) -> Self {
        Self::new_static(StaticValue::Type(ty))
    }

    pub fn with_dependency(mut self, depends: bool) -> Self {
        self.depends_on_compile_var |= depends;
        self
    }

    pub fn is_runtime(&self) -> bool {
        matches!(self.special, Special::Runtime)
    }

    pub fn is_undef(&self) -> bool {
        matches!(self.special, Special::Undef)
    }

    pub fn is_static(&self) -> bool {
        matches!(self.special, Special::Static(_))
    }

    /// Known at compile time: static or explicitly undefined
    pub fn is_comptime(&self) -> bool {
        !self.is_runtime()
    }

    pub fn as_static(&self) -> Option<&StaticValue> {
        match &self.special {
            Special::Static(payload) => Some(payload),
            _ => None,
        }
    }

    pub fn as_num(&self) -> Option<&BigNum> {
        match self.as_static()? {
            StaticValue::Num(num) => Some(num),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.as_static()? {
            StaticValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_type(&self) -> Option<Type> {
        match self.as_static()? {
            StaticValue::Type(ty) => Some(ty.clone()),
            _ => None,
        }
    }

    pub fn as_usize(&self) -> Option<usize> {
        self.as_num()?.to_usize()
    }

    pub fn as_fn(&self) -> Option<FnId> {
        match self.as_static()? {
            StaticValue::Fn(id) => Some(*id),
            _ => None,
        }
    }
}

impl ConstPtr {
    pub fn to_base(base: Value, is_c_str: bool) -> Self {
        Self {
            base: Box::new(base),
            index: None,
            is_c_str,
        }
    }

    pub fn to_element(base: Value, index: usize) -> Self {
        Self {
            base: Box::new(base),
            index: Some(index),
            is_c_str: false,
        }
    }

    /// Resolves the addressed sub-value
    pub fn pointee(&self) -> Option<&Value> {
        match self.index {
            None => Some(&self.base),
            Some(index) => match self.base.as_static()? {
                StaticValue::Array(elements) => elements.get(index),
                _ => None,
            },
        }
    }

    /// Length of the array payload behind this pointer, when there is one
    pub fn base_len(&self) -> Option<usize> {
        match self.base.as_static()? {
            StaticValue::Array(elements) => Some(elements.len()),
            _ => None,
        }
    }
}

/// Structural, type-directed equality between two static values: numbers by
/// magnitude, aggregates element-wise, constant pointers by equal base and
/// equal index. Runtime or undef operands never compare equal.
pub fn const_values_equal(a: &Value, b: &Value) -> bool {
    let (Some(a), Some(b)) = (a.as_static(), b.as_static()) else {
        return false;
    };

    static_values_equal(a, b)
}

fn static_values_equal(a: &StaticValue, b: &StaticValue) -> bool {
    match (a, b) {
        (StaticValue::Num(a), StaticValue::Num(b)) => a.compare(b).is_eq(),
        (StaticValue::Bool(a), StaticValue::Bool(b)) => a == b,
        (StaticValue::Type(a), StaticValue::Type(b)) => a == b,
        (StaticValue::Fn(a), StaticValue::Fn(b)) => a == b,
        (StaticValue::Namespace(a), StaticValue::Namespace(b)) => a == b,
        (StaticValue::Scope(a), StaticValue::Scope(b)) => a == b,
        (StaticValue::Array(a), StaticValue::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| const_values_equal(x, y))
        }
        (StaticValue::Struct(a), StaticValue::Struct(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| const_values_equal(x, y))
        }
        (
            StaticValue::Enum { tag: a_tag, payload: a_payload },
            StaticValue::Enum { tag: b_tag, payload: b_payload },
        ) => {
            a_tag == b_tag
                && match (a_payload, b_payload) {
                    (None, None) => true,
                    (Some(x), Some(y)) => const_values_equal(x, y),
                    _ => false,
                }
        }
        (StaticValue::Maybe(a), StaticValue::Maybe(b)) => match (a, b) {
            (None, None) => true,
            (Some(x), Some(y)) => const_values_equal(x, y),
            _ => false,
        },
        (StaticValue::Ptr(a), StaticValue::Ptr(b)) => {
            a.index == b.index && const_values_equal(&a.base, &b.base)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pointee_resolves_sentinel_and_elements() {
        let array = Value::new_static(StaticValue::Array(vec![
            Value::from_u64(1),
            Value::from_u64(2),
            Value::from_u64(3),
        ]));

        let whole = ConstPtr::to_base(array.clone(), false);
        assert_eq!(whole.pointee(), Some(&array));

        let second = ConstPtr::to_element(array.clone(), 1);
        assert_eq!(second.pointee(), Some(&Value::from_u64(2)));

        let oob = ConstPtr::to_element(array, 7);
        assert_eq!(oob.pointee(), None);
    }

    #[test]
    fn structural_equality_is_elementwise() {
        let a = Value::new_static(StaticValue::Array(vec![
            Value::from_u64(1),
            Value::from_u64(2),
        ]));
        let b = Value::new_static(StaticValue::Array(vec![
            Value::from_u64(1),
            Value::from_u64(2),
        ]));
        let c = Value::new_static(StaticValue::Array(vec![
            Value::from_u64(1),
            Value::from_u64(9),
        ]));

        assert!(const_values_equal(&a, &b));
        assert!(!const_values_equal(&a, &c));
        assert!(!const_values_equal(&a, &Value::runtime()));
    }

    #[test]
    fn pointers_compare_by_base_and_index() {
        let array = Value::new_static(StaticValue::Array(vec![Value::from_u64(5)]));

        let p = Value::new_static(StaticValue::Ptr(ConstPtr::to_element(array.clone(), 0)));
        let q = Value::new_static(StaticValue::Ptr(ConstPtr::to_element(array.clone(), 0)));
        let r = Value::new_static(StaticValue::Ptr(ConstPtr::to_base(array, false)));

        assert!(const_values_equal(&p, &q));
        assert!(!const_values_equal(&p, &r));
    }
}
