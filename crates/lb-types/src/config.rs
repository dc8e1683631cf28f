//! LoopBridge configuration types and loading

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config_error;
use crate::errors::{BindingError, BindingResult, LbResult};
use crate::parameter::{OptimizerParameter, TargetBinding, Transform};
use crate::trial::ObjectiveDirection;

/// Project-local config file picked up when no explicit path is given.
pub const DEFAULT_CONFIG_FILE: &str = "loopbridge.yml";

/// Main LoopBridge configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How trials are produced
    pub compilation: CompilationConfig,

    /// How costs are interpreted
    pub analysis: AnalysisConfig,

    /// Reference controller settings
    pub controller: ControllerConfig,

    /// Local cost approximation used in mock mode
    pub mock: MockConfig,

    /// Remote shot service settings
    pub service: ServiceConfig,

    /// Groups whose declarations are considered; empty means all groups
    pub active_groups: Vec<String>,

    /// Optimizer parameter declarations, in vector order
    pub parameters: Vec<ParameterDecl>,

    /// Derived target declarations
    pub targets: Vec<TargetDecl>,
}

impl Config {
    /// Load configuration with fallback chain: explicit path, then
    /// `./loopbridge.yml`, then defaults.
    pub fn load(config_path: Option<&Path>) -> LbResult<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }

        let local_config = PathBuf::from(DEFAULT_CONFIG_FILE);
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> LbResult<Self> {
        let content = fs::read_to_string(&path).map_err(|e| {
            config_error!("failed to read {}: {}", path.as_ref().display(), e)
        })?;
        let config = Self::from_yaml_str(&content)?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> LbResult<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Cross-field checks that serde cannot express.
    pub fn validate(&self) -> LbResult<()> {
        if self.controller.max_runs == 0 {
            return Err(config_error!("controller.max_runs must be positive"));
        }
        if self.compilation.reply_timeout_ms == 0 {
            return Err(config_error!("compilation.reply_timeout_ms must be positive"));
        }
        if self.service.idle_timeout_secs == 0 {
            return Err(config_error!("service.idle_timeout_secs must be positive"));
        }
        if !(0.0..=1.0).contains(&self.controller.exploration_weight) {
            return Err(config_error!(
                "controller.exploration_weight must lie in [0, 1], got {}",
                self.controller.exploration_weight
            ));
        }
        let non_negative = [
            ("controller.trust_region", Some(self.controller.trust_region)),
            ("mock.noise", Some(self.mock.noise)),
            ("analysis.default_uncertainty", self.analysis.default_uncertainty),
        ];
        for (field, value) in non_negative {
            if let Some(value) = value {
                if !value.is_finite() || value < 0.0 {
                    return Err(config_error!(
                        "{} must be a finite non-negative number, got {}",
                        field,
                        value
                    ));
                }
            }
        }
        if self.compilation.mode == RunMode::Live && self.compilation.template.is_empty() {
            return Err(config_error!("compilation.template is required in live mode"));
        }
        Ok(())
    }

    fn group_active(&self, group: &str) -> bool {
        self.active_groups.is_empty() || self.active_groups.iter().any(|g| g == group)
    }

    /// Enabled parameter declarations, in declaration order.
    pub fn declared_parameters(&self) -> Vec<OptimizerParameter> {
        self.parameters
            .iter()
            .filter(|p| self.parameter_active(p))
            .map(|p| OptimizerParameter::new(p.name.clone(), p.min, p.max, p.start))
            .collect()
    }

    /// Enabled target bindings: identity bindings from parameters carrying a
    /// `target`, followed by derived targets.
    ///
    /// An argument naming a parameter that is declared but disabled (or in
    /// an inactive group) has no value to resolve from and is rejected with
    /// [`BindingError::ArgumentMissing`].
    pub fn declared_bindings(&self) -> BindingResult<Vec<TargetBinding>> {
        let identities = self
            .parameters
            .iter()
            .filter(|p| self.parameter_active(p))
            .filter_map(|p| {
                p.target
                    .as_ref()
                    .map(|target| TargetBinding::identity(target.clone(), p.group.clone(), p.name.clone()))
            });

        let derived = self
            .targets
            .iter()
            .filter(|t| t.enable && self.group_active(&t.group))
            .map(|t| TargetBinding {
                name: t.name.clone(),
                group: t.group.clone(),
                transform: t.transform.clone(),
                args: t.args.clone(),
            });

        let bindings: Vec<TargetBinding> = identities.chain(derived).collect();
        for binding in &bindings {
            let inactive = binding.args.iter().find(|arg| {
                let mut declared = self.parameters.iter().filter(|p| &p.name == *arg).peekable();
                declared.peek().is_some() && !declared.any(|p| self.parameter_active(p))
            });
            if let Some(argument) = inactive {
                return Err(BindingError::ArgumentMissing {
                    target: binding.name.clone(),
                    argument: argument.clone(),
                });
            }
        }
        Ok(bindings)
    }

    fn parameter_active(&self, param: &ParameterDecl) -> bool {
        param.enable && self.group_active(&param.group)
    }
}

fn default_true() -> bool {
    true
}

/// One optimizer parameter as written in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDecl {
    pub name: String,
    #[serde(default)]
    pub group: String,
    pub min: f64,
    pub max: f64,
    pub start: f64,
    #[serde(default = "default_true")]
    pub enable: bool,
    /// Target variable driven directly by this parameter.
    #[serde(default)]
    pub target: Option<String>,
}

/// One derived target as written in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetDecl {
    pub name: String,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub transform: Option<Transform>,
    pub args: Vec<String>,
    #[serde(default = "default_true")]
    pub enable: bool,
}

/// Whether trials are really executed or approximated locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Live,
    #[default]
    Mock,
}

/// Trial production settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilationConfig {
    pub mode: RunMode,

    /// Address of the remote shot service
    pub service_address: String,

    /// Template artifact the service derives each trial from
    pub template: String,

    /// Folder the service writes trial artifacts to
    pub output_folder: String,

    /// How long to wait for the service's acknowledgment
    pub reply_timeout_ms: u64,
}

impl Default for CompilationConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::Mock,
            service_address: "127.0.0.1:5555".to_string(),
            template: String::new(),
            output_folder: ".".to_string(),
            reply_timeout_ms: 5_000,
        }
    }
}

impl CompilationConfig {
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }
}

/// Cost interpretation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub direction: ObjectiveDirection,

    /// Drop bad trials instead of reporting them to the controller
    pub ignore_bad: bool,

    /// Uncertainty applied when a report carries none
    pub default_uncertainty: Option<f64>,

    /// How long a tick waits for the worker's next request
    pub request_grace_ms: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            direction: ObjectiveDirection::Minimize,
            ignore_bad: false,
            default_uncertainty: None,
            request_grace_ms: 1_000,
        }
    }
}

impl AnalysisConfig {
    pub fn request_grace(&self) -> Duration {
        Duration::from_millis(self.request_grace_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerKind {
    Random,
    #[default]
    Perturbation,
}

/// Reference controller settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub kind: ControllerKind,

    /// Hard cap on the number of trials
    pub max_runs: u64,

    /// Stop after this many trials without a better cost; `None` disables
    pub max_runs_without_better: Option<u64>,

    /// Stop once a cost at or below this value is seen (controller convention)
    pub target_cost: Option<f64>,

    /// Probability of exploring instead of perturbing the best point
    pub exploration_weight: f64,

    /// Perturbation half-width as a fraction of each parameter's range
    pub trust_region: f64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            kind: ControllerKind::Perturbation,
            max_runs: 20,
            max_runs_without_better: Some(10),
            target_cost: None,
            exploration_weight: 0.3,
            trust_region: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MockModelKind {
    #[default]
    Lorentzian,
    Sinc2,
}

/// Mock-mode cost approximation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MockConfig {
    pub model: MockModelKind,
    /// Amplitude of uniform noise added to each mock cost
    pub noise: f64,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            model: MockModelKind::Lorentzian,
            noise: 0.0,
        }
    }
}

/// Where the shot service hands compiled artifacts off to.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubmitConfig {
    #[default]
    Log,
    Tcp { address: String },
}

/// Remote shot service settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub bind_address: String,

    /// Shut down when no request arrives within this many seconds
    pub idle_timeout_secs: u64,

    pub submit: SubmitConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:5555".to_string(),
            idle_timeout_secs: 600,
            submit: SubmitConfig::Log,
        }
    }
}

impl ServiceConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}
