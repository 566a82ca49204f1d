//! Deterministic functions computed by deterministic nodes.
//!
//! A [`Function`] must be pure: the same parent values always produce the
//! same result. The graph relies on that to cache results and to restore a
//! cached result on rejection instead of recomputing it.

use std::fmt;

use crate::error::DensityError;
use crate::value::{real_arg, tree_arg, Value};

/// A pure function of a node's parents.
pub trait Function: fmt::Debug + Send {
    fn name(&self) -> &str;

    /// Computes the node's value from its parents' values, in parent order.
    fn compute(&self, args: &[&Value]) -> Result<Value, DensityError>;
}

/// Sum of all real-valued parents.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sum;

impl Function for Sum {
    fn name(&self) -> &str {
        "Sum"
    }

    fn compute(&self, args: &[&Value]) -> Result<Value, DensityError> {
        let mut total = 0.0;
        for i in 0..args.len() {
            total += real_arg(args, i)?;
        }
        Ok(Value::Real(total))
    }
}

/// Product of all real-valued parents.
#[derive(Debug, Clone, Copy, Default)]
pub struct Product;

impl Function for Product {
    fn name(&self) -> &str {
        "Product"
    }

    fn compute(&self, args: &[&Value]) -> Result<Value, DensityError> {
        let mut total = 1.0;
        for i in 0..args.len() {
            total *= real_arg(args, i)?;
        }
        Ok(Value::Real(total))
    }
}

/// `exp(x)` of a single real parent.
#[derive(Debug, Clone, Copy, Default)]
pub struct Exp;

impl Function for Exp {
    fn name(&self) -> &str {
        "Exp"
    }

    fn compute(&self, args: &[&Value]) -> Result<Value, DensityError> {
        let y = real_arg(args, 0)?.exp();
        if y.is_infinite() {
            return Err(DensityError::numerical("exp overflowed"));
        }
        Ok(Value::Real(y))
    }
}

/// Total branch length of a tree parent.
#[derive(Debug, Clone, Copy, Default)]
pub struct TreeLength;

impl Function for TreeLength {
    fn name(&self) -> &str {
        "TreeLength"
    }

    fn compute(&self, args: &[&Value]) -> Result<Value, DensityError> {
        Ok(Value::Real(tree_arg(args, 0)?.tree_length()))
    }
}

/// Adapts a closure into a [`Function`].
pub struct FnFunction<F> {
    name: String,
    f: F,
}

impl<F> FnFunction<F>
where
    F: Fn(&[&Value]) -> Result<Value, DensityError> + Send,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> fmt::Debug for FnFunction<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnFunction").field("name", &self.name).finish()
    }
}

impl<F> Function for FnFunction<F>
where
    F: Fn(&[&Value]) -> Result<Value, DensityError> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn compute(&self, args: &[&Value]) -> Result<Value, DensityError> {
        (self.f)(args)
    }
}
