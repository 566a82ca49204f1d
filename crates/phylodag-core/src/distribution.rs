//! The distribution contract consumed by stochastic nodes, plus a few
//! reference densities.
//!
//! A [`Distribution`] scores a value given its parents' values
//! (`ln_density`) and draws a fresh value (`sample`). Out-of-support values
//! score `-inf`; invalid parameters are reported as
//! [`DensityError::ConstraintViolation`]; a broken computation is a
//! [`DensityError::NumericalFailure`].
//!
//! The reference distributions are enough to exercise the engine end to
//! end. They are not a modelling library.

use std::f64::consts::PI;
use std::fmt;

use rand::{Rng, RngCore};
use rand_distr::Distribution as _;

use crate::error::DensityError;
use crate::tree::{TimeTree, TreeBuilder};
use crate::value::{real_arg, Value};

/// Density and sampler for a stochastic node.
pub trait Distribution: fmt::Debug + Send {
    fn name(&self) -> &str;

    /// Log-density of `value` given the parents' values, in parent order.
    fn ln_density(&self, value: &Value, args: &[&Value]) -> Result<f64, DensityError>;

    /// Draws a new value given the parents' values.
    fn sample(&self, args: &[&Value], rng: &mut dyn RngCore) -> Result<Value, DensityError>;
}

fn positive(name: &str, x: f64) -> Result<f64, DensityError> {
    if x > 0.0 && x.is_finite() {
        Ok(x)
    } else {
        Err(DensityError::constraint(format!(
            "{} must be positive and finite, got {}",
            name, x
        )))
    }
}

fn value_real(value: &Value) -> Result<f64, DensityError> {
    value
        .as_real()
        .ok_or_else(|| DensityError::numerical(format!("expected a real value, got {}", value.kind())))
}

// ---------------------------------------------------------------------------
// Normal
// ---------------------------------------------------------------------------

/// `Normal(mean, sd)`; parents are `[mean, sd]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Normal;

impl Distribution for Normal {
    fn name(&self) -> &str {
        "Normal"
    }

    fn ln_density(&self, value: &Value, args: &[&Value]) -> Result<f64, DensityError> {
        let x = value_real(value)?;
        let mean = real_arg(args, 0)?;
        let sd = positive("sd", real_arg(args, 1)?)?;
        let z = (x - mean) / sd;
        Ok(-0.5 * (2.0 * PI).ln() - sd.ln() - 0.5 * z * z)
    }

    fn sample(&self, args: &[&Value], rng: &mut dyn RngCore) -> Result<Value, DensityError> {
        let mean = real_arg(args, 0)?;
        let sd = positive("sd", real_arg(args, 1)?)?;
        let normal =
            rand_distr::Normal::new(mean, sd).map_err(|e| DensityError::numerical(e.to_string()))?;
        Ok(Value::Real(normal.sample(rng)))
    }
}

// ---------------------------------------------------------------------------
// Exponential
// ---------------------------------------------------------------------------

/// `Exponential(rate)`; parents are `[rate]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Exponential;

impl Distribution for Exponential {
    fn name(&self) -> &str {
        "Exponential"
    }

    fn ln_density(&self, value: &Value, args: &[&Value]) -> Result<f64, DensityError> {
        let x = value_real(value)?;
        let rate = positive("rate", real_arg(args, 0)?)?;
        if x < 0.0 {
            return Ok(f64::NEG_INFINITY);
        }
        Ok(rate.ln() - rate * x)
    }

    fn sample(&self, args: &[&Value], rng: &mut dyn RngCore) -> Result<Value, DensityError> {
        let rate = positive("rate", real_arg(args, 0)?)?;
        let exp = rand_distr::Exp::new(rate).map_err(|e| DensityError::numerical(e.to_string()))?;
        Ok(Value::Real(exp.sample(rng)))
    }
}

// ---------------------------------------------------------------------------
// Uniform
// ---------------------------------------------------------------------------

/// `Uniform(lower, upper)`; parents are `[lower, upper]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Uniform;

impl Uniform {
    fn bounds(args: &[&Value]) -> Result<(f64, f64), DensityError> {
        let lower = real_arg(args, 0)?;
        let upper = real_arg(args, 1)?;
        if !(lower < upper) {
            return Err(DensityError::constraint(format!(
                "uniform bounds out of order: [{}, {}]",
                lower, upper
            )));
        }
        Ok((lower, upper))
    }
}

impl Distribution for Uniform {
    fn name(&self) -> &str {
        "Uniform"
    }

    fn ln_density(&self, value: &Value, args: &[&Value]) -> Result<f64, DensityError> {
        let x = value_real(value)?;
        let (lower, upper) = Self::bounds(args)?;
        if x < lower || x > upper {
            return Ok(f64::NEG_INFINITY);
        }
        Ok(-(upper - lower).ln())
    }

    fn sample(&self, args: &[&Value], rng: &mut dyn RngCore) -> Result<Value, DensityError> {
        let (lower, upper) = Self::bounds(args)?;
        Ok(Value::Real(rng.gen_range(lower..upper)))
    }
}

// ---------------------------------------------------------------------------
// Uniform time tree
// ---------------------------------------------------------------------------

/// Uniform prior over labelled rooted topologies with a fixed root age.
///
/// Internal ages are free in `(0, root_age)`; the density is constant over
/// valid trees and `-inf` for trees whose ages are inconsistent. Tips are
/// contemporaneous at age zero when sampled.
#[derive(Debug, Clone)]
pub struct UniformTimeTree {
    pub taxa: Vec<String>,
    pub root_age: f64,
}

impl UniformTimeTree {
    pub fn new(taxa: Vec<String>, root_age: f64) -> Self {
        Self { taxa, root_age }
    }

    /// `ln (2n-3)!!`, the number of labelled rooted binary topologies.
    fn ln_num_topologies(n: usize) -> f64 {
        (3..=n).map(|k| ((2 * k - 3) as f64).ln()).sum()
    }
}

impl Distribution for UniformTimeTree {
    fn name(&self) -> &str {
        "UniformTimeTree"
    }

    fn ln_density(&self, value: &Value, _args: &[&Value]) -> Result<f64, DensityError> {
        let tree = value
            .as_tree()
            .ok_or_else(|| DensityError::numerical(format!("expected a tree, got {}", value.kind())))?;
        if tree.num_tips() != self.taxa.len() {
            return Ok(f64::NEG_INFINITY);
        }
        if tree.first_age_violation().is_some() {
            return Ok(f64::NEG_INFINITY);
        }
        let root_age = tree.age(tree.root()).map_err(|e| DensityError::numerical(e.to_string()))?;
        if (root_age - self.root_age).abs() > 1e-12 {
            return Ok(f64::NEG_INFINITY);
        }
        Ok(-Self::ln_num_topologies(self.taxa.len()))
    }

    fn sample(&self, _args: &[&Value], rng: &mut dyn RngCore) -> Result<Value, DensityError> {
        if self.taxa.len() < 2 {
            return Err(DensityError::constraint("a time tree needs at least two taxa"));
        }
        positive("root_age", self.root_age)?;
        let mut builder = TreeBuilder::new();
        let mut lineages: Vec<_> = self.taxa.iter().map(|t| builder.tip(t.clone(), 0.0)).collect();

        let mut ages: Vec<f64> = (0..self.taxa.len() - 2)
            .map(|_| rng.gen_range(0.0..self.root_age))
            .collect();
        ages.sort_by(f64::total_cmp);
        ages.push(self.root_age);

        for age in ages {
            let i = rng.gen_range(0..lineages.len());
            let left = lineages.swap_remove(i);
            let j = rng.gen_range(0..lineages.len());
            let right = lineages.swap_remove(j);
            let joined = builder
                .join(&[left, right], age)
                .map_err(|e| DensityError::numerical(e.to_string()))?;
            lineages.push(joined);
        }
        let tree: TimeTree = builder
            .build()
            .map_err(|e| DensityError::numerical(e.to_string()))?;
        Ok(Value::Tree(tree))
    }
}
