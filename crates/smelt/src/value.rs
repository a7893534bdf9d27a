//! Constant values that can appear in a code object's constant pool.

use std::hash::{Hash, Hasher};

/// A constant operand value.
///
/// Constants are pooled by value equality, so the type must be `Eq + Hash`.
/// Floats compare and hash by bit pattern: `0.0` and `-0.0` are distinct pool
/// entries, and a NaN is equal to an identically encoded NaN. This keeps
/// pooling deterministic without giving floats an equivalence the runtime
/// does not have.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum Const {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Tuple(Vec<Const>),
}

impl Const {
    /// Returns the string content when this constant is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(value) => Some(value),
            _ => None,
        }
    }
}

impl PartialEq for Const {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Tuple(a), Self::Tuple(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Const {}

impl Hash for Const {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::None => {}
            Self::Bool(value) => value.hash(state),
            Self::Int(value) => value.hash(state),
            Self::Float(value) => value.to_bits().hash(state),
            Self::Str(value) => value.hash(state),
            Self::Tuple(items) => items.hash(state),
        }
    }
}

impl From<&str> for Const {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for Const {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for Const {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for Const {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for Const {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

#[cfg(test)]
mod tests {
    use std::hash::{BuildHasher, RandomState};

    use super::*;

    #[test]
    fn float_equality_is_bitwise() {
        assert_eq!(Const::Float(1.5), Const::Float(1.5));
        assert_ne!(Const::Float(0.0), Const::Float(-0.0));
        assert_eq!(Const::Float(f64::NAN), Const::Float(f64::NAN));
    }

    #[test]
    fn equal_values_hash_equal() {
        let a = Const::Tuple(vec![Const::Int(1), Const::Str("x".to_owned())]);
        let b = Const::Tuple(vec![Const::Int(1), Const::Str("x".to_owned())]);
        assert_eq!(a, b);
        let state = RandomState::new();
        assert_eq!(state.hash_one(&a), state.hash_one(&b));
    }

    #[test]
    fn cross_variant_inequality() {
        assert_ne!(Const::Int(0), Const::Bool(false));
        assert_ne!(Const::Int(1), Const::Float(1.0));
        assert_ne!(Const::None, Const::Int(0));
    }
}
