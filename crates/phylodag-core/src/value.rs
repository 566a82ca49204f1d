//! Values held by model-graph nodes.
//!
//! [`Value`] is the dynamic payload that flows along dependency edges: a
//! distribution or function receives its parents' values in parent order and
//! produces (or scores) a `Value`.
//!
//! Trees are *structural* values. They are mutated in place by tree
//! proposals and reverted by the proposal's own undo, so the graph never
//! snapshots them on touch.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, DensityError};
use crate::id::NodeId;
use crate::tree::TimeTree;

/// A value produced or consumed by a model-graph node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Real(f64),
    Integer(i64),
    RealVector(Vec<f64>),
    Tree(TimeTree),
}

impl Value {
    /// Short name of the variant, used in type-mismatch errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Real(_) => "Real",
            Value::Integer(_) => "Integer",
            Value::RealVector(_) => "RealVector",
            Value::Tree(_) => "Tree",
        }
    }

    /// Returns `true` for values that proposals revert themselves.
    pub fn is_structural(&self) -> bool {
        matches!(self, Value::Tree(_))
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            Value::Real(x) => Some(*x),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_tree(&self) -> Option<&TimeTree> {
        match self {
            Value::Tree(t) => Some(t),
            _ => None,
        }
    }

    /// Like [`as_real`](Self::as_real) but reports the offending node.
    pub fn expect_real(&self, node: NodeId) -> Result<f64, CoreError> {
        self.as_real().ok_or(CoreError::TypeMismatch {
            node,
            expected: "Real",
            got: self.kind(),
        })
    }

    /// Like [`as_tree`](Self::as_tree) but reports the offending node.
    pub fn expect_tree(&self, node: NodeId) -> Result<&TimeTree, CoreError> {
        match self {
            Value::Tree(t) => Ok(t),
            other => Err(CoreError::TypeMismatch {
                node,
                expected: "Tree",
                got: other.kind(),
            }),
        }
    }

    /// Mutable counterpart of [`expect_tree`](Self::expect_tree).
    pub fn expect_tree_mut(&mut self, node: NodeId) -> Result<&mut TimeTree, CoreError> {
        match self {
            Value::Tree(t) => Ok(t),
            other => Err(CoreError::TypeMismatch {
                node,
                expected: "Tree",
                got: other.kind(),
            }),
        }
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Real(x)
    }
}

impl From<TimeTree> for Value {
    fn from(t: TimeTree) -> Self {
        Value::Tree(t)
    }
}

/// Reads argument `index` of a distribution or function as a real number.
///
/// Argument-shape mistakes are wiring errors, reported as numerical failures
/// so they surface through the normal evaluation path.
pub fn real_arg(args: &[&Value], index: usize) -> Result<f64, DensityError> {
    args.get(index)
        .and_then(|v| v.as_real())
        .ok_or_else(|| DensityError::numerical(format!("argument {} is not a real number", index)))
}

/// Reads argument `index` as a tree.
pub fn tree_arg<'a>(args: &[&'a Value], index: usize) -> Result<&'a TimeTree, DensityError> {
    args.get(index)
        .and_then(|v| v.as_tree())
        .ok_or_else(|| DensityError::numerical(format!("argument {} is not a tree", index)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_read_as_reals() {
        assert_eq!(Value::Integer(3).as_real(), Some(3.0));
        assert_eq!(Value::RealVector(vec![1.0]).as_real(), None);
    }

    #[test]
    fn only_trees_are_structural() {
        assert!(!Value::Real(1.0).is_structural());
        assert!(Value::Tree(crate::tree::tests::caterpillar_five()).is_structural());
    }

    #[test]
    fn expect_real_reports_kind() {
        let err = Value::RealVector(vec![]).expect_real(NodeId(2)).unwrap_err();
        assert!(matches!(
            err,
            CoreError::TypeMismatch {
                expected: "Real",
                got: "RealVector",
                ..
            }
        ));
    }

    #[test]
    fn real_arg_rejects_missing_argument() {
        let x = Value::Real(1.5);
        assert_eq!(real_arg(&[&x], 0).unwrap(), 1.5);
        assert!(real_arg(&[&x], 1).is_err());
    }
}
