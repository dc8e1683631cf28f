//! Optimizer parameters, target bindings and the closed set of transforms
//! that derive a target value from one or more parameters.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single dimension of the optimizer's search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerParameter {
    /// Unique parameter name (e.g. "detuning").
    pub name: String,
    pub min: f64,
    pub max: f64,
    /// Initial value handed to the controller.
    pub start: f64,
}

impl OptimizerParameter {
    pub fn new(name: impl Into<String>, min: f64, max: f64, start: f64) -> Self {
        Self {
            name: name.into(),
            min,
            max,
            start,
        }
    }

    /// `min <= start <= max`, all finite.
    pub fn has_valid_bounds(&self) -> bool {
        self.min.is_finite()
            && self.max.is_finite()
            && self.start.is_finite()
            && self.min <= self.start
            && self.start <= self.max
    }
}

/// Number of arguments a transform accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exactly(usize),
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(&self, count: usize) -> bool {
        match *self {
            Self::Exactly(n) => count == n,
            Self::AtLeast(n) => count >= n,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exactly(n) => write!(f, "{n}"),
            Self::AtLeast(n) => write!(f, "at least {n}"),
        }
    }
}

/// Named operation used to derive a target value from its arguments.
///
/// Arguments are substituted positionally, in the order the binding lists them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transform {
    Identity,
    Negate,
    /// `scale * x + offset`
    Linear { scale: f64, offset: f64 },
    /// `x ^ exponent`
    Power { exponent: f64 },
    /// `a - b`
    Difference,
    /// `a / b`
    Quotient,
    Sum,
    Product,
    Mean,
}

impl Transform {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Negate => "negate",
            Self::Linear { .. } => "linear",
            Self::Power { .. } => "power",
            Self::Difference => "difference",
            Self::Quotient => "quotient",
            Self::Sum => "sum",
            Self::Product => "product",
            Self::Mean => "mean",
        }
    }

    pub fn arity(&self) -> Arity {
        match self {
            Self::Identity | Self::Negate | Self::Linear { .. } | Self::Power { .. } => {
                Arity::Exactly(1)
            }
            Self::Difference | Self::Quotient => Arity::Exactly(2),
            Self::Sum | Self::Product | Self::Mean => Arity::AtLeast(1),
        }
    }

    /// Evaluate the transform. `args` must satisfy [`Transform::arity`];
    /// bindings are checked for that before any evaluation happens.
    pub fn apply(&self, args: &[f64]) -> f64 {
        match self {
            Self::Identity => args[0],
            Self::Negate => -args[0],
            Self::Linear { scale, offset } => scale * args[0] + offset,
            Self::Power { exponent } => args[0].powf(*exponent),
            Self::Difference => args[0] - args[1],
            Self::Quotient => args[0] / args[1],
            Self::Sum => args.iter().sum(),
            Self::Product => args.iter().product(),
            Self::Mean => args.iter().sum::<f64>() / args.len() as f64,
        }
    }
}

/// Declared mapping from optimizer parameters to one experiment control
/// variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetBinding {
    /// Target variable name inside the experiment artifact.
    pub name: String,
    /// Group the variable lives in.
    pub group: String,
    /// `None` means identity passthrough of the single argument.
    pub transform: Option<Transform>,
    /// Ordered source parameter names.
    pub args: Vec<String>,
}

impl TargetBinding {
    pub fn identity(
        name: impl Into<String>,
        group: impl Into<String>,
        parameter: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
            transform: None,
            args: vec![parameter.into()],
        }
    }

    pub fn derived(
        name: impl Into<String>,
        group: impl Into<String>,
        transform: Transform,
        args: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
            transform: Some(transform),
            args,
        }
    }

    pub fn evaluate(&self, args: &[f64]) -> f64 {
        match &self.transform {
            Some(transform) => transform.apply(args),
            None => args[0],
        }
    }
}

/// A target value resolved for one trial, addressed the way the artifact
/// stores it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedTarget {
    pub group: String,
    pub variable: String,
    pub value: f64,
}
