//! Immutable obfuscation strategy: which transform families run and how hard.
//!
//! A strategy arrives as a loosely-typed two-level map (category → feature →
//! activation) from configuration files or an external planner. It is
//! validated once, up front, by [`Strategy::from_raw`]; every pass afterwards
//! reads it through the typed [`Feature`] accessors and can never mutate it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("unknown strategy category '{0}'")]
    UnknownCategory(String),
    #[error("unknown feature '{feature}' in category '{category}'")]
    UnknownFeature { category: String, feature: String },
    #[error("intensity {value} for {category}.{feature} is outside [0, 1]")]
    IntensityOutOfRange {
        category: Category,
        feature: Feature,
        value: f64,
    },
    #[error("strategy parse error: {0}")]
    Parse(String),
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Data,
    ControlFlow,
    Instruction,
    Structure,
    Virtualization,
    Runtime,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    ConstantSplitting,
    DynamicCalculation,
    EncodingTable,
    StringEncryption,
    Flattening,
    FakeBranches,
    ExceptionFlow,
    LoopTransform,
    InstructionSubstitution,
    GarbageInjection,
    #[strum(to_string = "renaming", serialize = "register_allocation")]
    Renaming,
    FunctionSplitting,
    FunctionMerging,
    CallGraphObfuscation,
    BytecodeVm,
    IntegrityChecks,
}

impl Feature {
    pub fn category(self) -> Category {
        match self {
            Feature::ConstantSplitting
            | Feature::DynamicCalculation
            | Feature::EncodingTable
            | Feature::StringEncryption => Category::Data,
            Feature::Flattening
            | Feature::FakeBranches
            | Feature::ExceptionFlow
            | Feature::LoopTransform => Category::ControlFlow,
            Feature::InstructionSubstitution | Feature::GarbageInjection | Feature::Renaming => {
                Category::Instruction
            }
            Feature::FunctionSplitting
            | Feature::FunctionMerging
            | Feature::CallGraphObfuscation => Category::Structure,
            Feature::BytecodeVm => Category::Virtualization,
            Feature::IntegrityChecks => Category::Runtime,
        }
    }

    /// Strength at which the preset planner switches this feature on.
    fn preset_threshold(self) -> f64 {
        match self {
            Feature::ConstantSplitting | Feature::FakeBranches | Feature::GarbageInjection => 0.3,
            Feature::Flattening
            | Feature::DynamicCalculation
            | Feature::StringEncryption
            | Feature::InstructionSubstitution
            | Feature::FunctionSplitting
            | Feature::IntegrityChecks => 0.5,
            Feature::ExceptionFlow
            | Feature::LoopTransform
            | Feature::EncodingTable
            | Feature::Renaming
            | Feature::FunctionMerging
            | Feature::CallGraphObfuscation => 0.7,
            Feature::BytecodeVm => 0.9,
        }
    }
}

fn default_intensity() -> f64 {
    0.5
}

/// Activation record for one feature.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Activation {
    #[serde(default)]
    pub enabled: bool,
    /// Meaningful only when `enabled`.
    #[serde(default = "default_intensity")]
    pub intensity: f64,
}

impl Activation {
    pub fn on(intensity: f64) -> Self {
        Self {
            enabled: true,
            intensity,
        }
    }
}

/// Untyped strategy as written in configuration: category → feature → activation.
pub type RawStrategy = BTreeMap<String, BTreeMap<String, Activation>>;

/// Validated, read-only strategy.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Strategy {
    features: BTreeMap<Feature, Activation>,
}

impl Strategy {
    /// A strategy with every feature disabled.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn from_raw(raw: &RawStrategy) -> Result<Self, ConfigurationError> {
        let mut features = BTreeMap::new();
        for (category_name, entries) in raw {
            let category = Category::from_str(category_name)
                .map_err(|_| ConfigurationError::UnknownCategory(category_name.clone()))?;
            for (feature_name, activation) in entries {
                let feature = Feature::from_str(feature_name)
                    .ok()
                    .filter(|f| f.category() == category)
                    .ok_or_else(|| ConfigurationError::UnknownFeature {
                        category: category_name.clone(),
                        feature: feature_name.clone(),
                    })?;
                let value = activation.intensity;
                if !(0.0..=1.0).contains(&value) {
                    return Err(ConfigurationError::IntensityOutOfRange {
                        category,
                        feature,
                        value,
                    });
                }
                features.insert(feature, *activation);
            }
        }
        Ok(Self { features })
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigurationError> {
        let raw: RawStrategy =
            toml::from_str(text).map_err(|e| ConfigurationError::Parse(e.to_string()))?;
        Self::from_raw(&raw)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigurationError> {
        let raw: RawStrategy =
            serde_json::from_str(text).map_err(|e| ConfigurationError::Parse(e.to_string()))?;
        Self::from_raw(&raw)
    }

    /// Convenience constructor for a list of enabled features.
    pub fn with_features(
        enabled: impl IntoIterator<Item = (Feature, f64)>,
    ) -> Result<Self, ConfigurationError> {
        let mut raw = RawStrategy::new();
        for (feature, intensity) in enabled {
            raw.entry(feature.category().to_string())
                .or_default()
                .insert(feature.to_string(), Activation::on(intensity));
        }
        Self::from_raw(&raw)
    }

    pub fn is_enabled(&self, feature: Feature) -> bool {
        self.features.get(&feature).is_some_and(|a| a.enabled)
    }

    /// Stored intensity, `0.0` for features never mentioned.
    pub fn intensity(&self, feature: Feature) -> f64 {
        self.features.get(&feature).map_or(0.0, |a| a.intensity)
    }

    /// Intensity of an enabled feature, `None` when disabled.
    pub fn active(&self, feature: Feature) -> Option<f64> {
        self.features
            .get(&feature)
            .filter(|a| a.enabled)
            .map(|a| a.intensity)
    }

    /// Name-based lookup for callers holding configuration strings.
    pub fn is_enabled_by_name(&self, category: &str, feature: &str) -> Result<bool, ConfigurationError> {
        let feature = lookup(category, feature)?;
        Ok(self.is_enabled(feature))
    }

    pub fn intensity_by_name(&self, category: &str, feature: &str) -> Result<f64, ConfigurationError> {
        let feature = lookup(category, feature)?;
        Ok(self.intensity(feature))
    }

    pub fn to_raw(&self) -> RawStrategy {
        let mut raw = RawStrategy::new();
        for (feature, activation) in &self.features {
            raw.entry(feature.category().to_string())
                .or_default()
                .insert(feature.to_string(), *activation);
        }
        raw
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigurationError> {
        toml::to_string_pretty(&self.to_raw()).map_err(|e| ConfigurationError::Parse(e.to_string()))
    }

    /// Preset planner: strength level sets the base, mode scales it, and each
    /// feature switches on once the scaled strength reaches its threshold.
    pub fn preset(mode: Mode, level: StrengthLevel) -> Self {
        let base: f64 = match level {
            StrengthLevel::Low => 0.3,
            StrengthLevel::Medium => 0.5,
            StrengthLevel::High => 0.8,
        };
        let scale: f64 = match mode {
            Mode::Performance => 0.75,
            Mode::Balanced => 1.0,
            Mode::Security => 1.25,
        };
        let strength: f64 = (base * scale).clamp(0.0, 1.0);
        let features = Feature::iter()
            .map(|f| {
                let activation = Activation {
                    enabled: strength + 1e-9 >= f.preset_threshold(),
                    intensity: strength,
                };
                (f, activation)
            })
            .collect();
        Self { features }
    }
}

fn lookup(category: &str, feature: &str) -> Result<Feature, ConfigurationError> {
    let cat = Category::from_str(category)
        .map_err(|_| ConfigurationError::UnknownCategory(category.to_string()))?;
    Feature::from_str(feature)
        .ok()
        .filter(|f| f.category() == cat)
        .ok_or_else(|| ConfigurationError::UnknownFeature {
            category: category.to_string(),
            feature: feature.to_string(),
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Performance,
    Balanced,
    Security,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StrengthLevel {
    Low,
    Medium,
    High,
}
