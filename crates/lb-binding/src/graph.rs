//! Binding graph construction and resolution.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use lb_types::{
    BindingError, BindingResult, OptimizerParameter, ResolvedTarget, TargetBinding,
};

/// Validated bipartite mapping between optimizer parameters and targets.
///
/// Only [`validate`] constructs one, so holding a `BindingGraph` means every
/// parameter drives at least one target and every target argument names a
/// declared parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BindingGraph {
    parameters: Vec<OptimizerParameter>,
    bindings: Vec<TargetBinding>,
    /// For each binding, the parameter index of each argument.
    #[serde(skip)]
    arg_indices: Vec<Vec<usize>>,
}

/// Build a [`BindingGraph`] from already-filtered declarations.
///
/// Pure function: disabled declarations must be removed by the caller.
pub fn validate(
    parameters: Vec<OptimizerParameter>,
    bindings: Vec<TargetBinding>,
) -> BindingResult<BindingGraph> {
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(parameters.len());
    for (i, param) in parameters.iter().enumerate() {
        if index.insert(param.name.as_str(), i).is_some() {
            return Err(BindingError::DuplicateParameter {
                name: param.name.clone(),
            });
        }
        if !param.has_valid_bounds() {
            return Err(BindingError::InvalidBounds {
                name: param.name.clone(),
                min: param.min,
                max: param.max,
                start: param.start,
            });
        }
    }

    let mut targets = HashSet::with_capacity(bindings.len());
    let mut arg_indices = Vec::with_capacity(bindings.len());
    let mut bound = vec![false; parameters.len()];

    for binding in &bindings {
        if !targets.insert(binding.name.as_str()) {
            return Err(BindingError::DuplicateTarget {
                name: binding.name.clone(),
            });
        }

        match &binding.transform {
            None if binding.args.len() != 1 => {
                return Err(BindingError::IdentityArity {
                    target: binding.name.clone(),
                    count: binding.args.len(),
                });
            }
            Some(transform) if !transform.arity().accepts(binding.args.len()) => {
                return Err(BindingError::TransformArity {
                    target: binding.name.clone(),
                    transform: transform.name().to_string(),
                    expected: transform.arity().to_string(),
                    actual: binding.args.len(),
                });
            }
            _ => {}
        }

        let mut indices = Vec::with_capacity(binding.args.len());
        for arg in &binding.args {
            let i = *index
                .get(arg.as_str())
                .ok_or_else(|| BindingError::UndeclaredSource {
                    target: binding.name.clone(),
                    argument: arg.clone(),
                })?;
            bound[i] = true;
            indices.push(i);
        }
        arg_indices.push(indices);
    }

    if let Some(i) = bound.iter().position(|b| !b) {
        return Err(BindingError::UnboundParameter {
            name: parameters[i].name.clone(),
        });
    }

    debug!(
        parameters = parameters.len(),
        targets = bindings.len(),
        "binding graph validated"
    );

    Ok(BindingGraph {
        parameters,
        bindings,
        arg_indices,
    })
}

impl BindingGraph {
    pub fn parameters(&self) -> &[OptimizerParameter] {
        &self.parameters
    }

    pub fn bindings(&self) -> &[TargetBinding] {
        &self.bindings
    }

    /// Number of optimizer parameters (the vector dimension).
    pub fn dimension(&self) -> usize {
        self.parameters.len()
    }

    pub fn parameter_names(&self) -> impl Iterator<Item = &str> {
        self.parameters.iter().map(|p| p.name.as_str())
    }

    /// Every (parameter, target) edge, in binding then argument order.
    pub fn edges(&self) -> Vec<(&str, &str)> {
        self.bindings
            .iter()
            .flat_map(|b| b.args.iter().map(move |a| (a.as_str(), b.name.as_str())))
            .collect()
    }

    pub fn lower_bounds(&self) -> Vec<f64> {
        self.parameters.iter().map(|p| p.min).collect()
    }

    pub fn upper_bounds(&self) -> Vec<f64> {
        self.parameters.iter().map(|p| p.max).collect()
    }

    pub fn start_vector(&self) -> Vec<f64> {
        self.parameters.iter().map(|p| p.start).collect()
    }

    /// Resolve every target from a vector aligned to parameter order.
    pub fn resolve(&self, values: &[f64]) -> BindingResult<Vec<ResolvedTarget>> {
        let mut resolved = Vec::with_capacity(self.bindings.len());
        for (binding, indices) in self.bindings.iter().zip(&self.arg_indices) {
            let args = indices
                .iter()
                .map(|&i| {
                    values
                        .get(i)
                        .copied()
                        .ok_or_else(|| BindingError::ArgumentMissing {
                            target: binding.name.clone(),
                            argument: self.parameters[i].name.clone(),
                        })
                })
                .collect::<BindingResult<Vec<f64>>>()?;
            resolved.push(Self::resolved(binding, &args));
        }

        if values.len() != self.parameters.len() {
            return Err(BindingError::VectorLength {
                expected: self.parameters.len(),
                actual: values.len(),
            });
        }
        Ok(resolved)
    }

    fn resolved(binding: &TargetBinding, args: &[f64]) -> ResolvedTarget {
        ResolvedTarget {
            group: binding.group.clone(),
            variable: binding.name.clone(),
            value: binding.evaluate(args),
        }
    }
}
