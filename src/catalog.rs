// 📚 Definition Catalog - static fallback + operator overrides
//
// Two sources describe every skill:
//   - StaticCatalog: shipped with the program, keyed by CODE
//   - DynamicDefinition: edited by operators at runtime, keyed by NAME
//
// The join is code → static.name → dynamic. Operators never see codes, so
// an override whose name matches no static record silently does nothing.
// `validate()` surfaces those, plus override rows the store could not decode.

use crate::error::CatalogError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

const BUILTIN_CATALOG: &str = include_str!("../data/static_catalog.json");

/// Charges granted when neither source says otherwise
pub const DEFAULT_MAX_USES: u32 = 3;

/// Recharge cadence used when neither source says otherwise
pub const DEFAULT_RESET_PERIOD: ResetPeriod = ResetPeriod::Quarterly;

// ============================================================================
// ENUMS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SkillKind {
    /// Always-on effect, lives in `active_buffs`
    #[serde(alias = "PASSIVA")]
    Passive,

    /// Charge-limited ability, lives in `inventory`
    #[serde(alias = "ATIVA")]
    Active,
}

impl SkillKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkillKind::Passive => "PASSIVE",
            SkillKind::Active => "ACTIVE",
        }
    }
}

impl FromStr for SkillKind {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "PASSIVE" | "PASSIVA" => Ok(SkillKind::Passive),
            "ACTIVE" | "ATIVA" => Ok(SkillKind::Active),
            other => Err(CatalogError::UnknownValue(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResetPeriod {
    Never,
    Monthly,
    Quarterly,
}

impl ResetPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResetPeriod::Never => "NEVER",
            ResetPeriod::Monthly => "MONTHLY",
            ResetPeriod::Quarterly => "QUARTERLY",
        }
    }
}

impl FromStr for ResetPeriod {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "NEVER" => Ok(ResetPeriod::Never),
            "MONTHLY" => Ok(ResetPeriod::Monthly),
            "QUARTERLY" => Ok(ResetPeriod::Quarterly),
            other => Err(CatalogError::UnknownValue(other.to_string())),
        }
    }
}

// ============================================================================
// RAW SOURCES
// ============================================================================

/// Compiled-in definition, keyed by `code`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticDefinition {
    pub code: String,
    pub name: String,
    pub description: String,
    pub image: String,
    pub kind: SkillKind,
    #[serde(default)]
    pub uses: Option<u32>,
    #[serde(default)]
    pub reset: Option<ResetPeriod>,
}

/// Operator-managed override, keyed by `name`. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DynamicDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub kind: Option<SkillKind>,
    #[serde(default)]
    pub max_uses: Option<u32>,
    #[serde(default)]
    pub reset_period: Option<ResetPeriod>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl DynamicDefinition {
    pub fn named(name: &str) -> Self {
        DynamicDefinition {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

// ============================================================================
// MERGED DEFINITION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillDefinition {
    pub code: String,
    pub name: String,
    pub description: String,
    pub image: String,
    pub kind: SkillKind,
    pub max_uses: u32,
    pub reset_period: ResetPeriod,
}

// ============================================================================
// DIAGNOSTICS
// ============================================================================

/// Non-fatal findings. These are data-authoring problems, not runtime faults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Diagnostic {
    /// An entitled code has no static definition; the code was skipped
    UnresolvedSkill { code: String },

    /// An operator override matches no static name and will never apply
    OrphanOverride { name: String },

    /// A stored override row could not be decoded and was skipped
    InvalidOverride { name: String, reason: String },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::UnresolvedSkill { code } => {
                write!(f, "skill code {code:?} has no definition, skipped")
            }
            Diagnostic::OrphanOverride { name } => {
                write!(f, "override {name:?} matches no built-in skill name")
            }
            Diagnostic::InvalidOverride { name, reason } => {
                write!(f, "override {name:?} skipped: {reason}")
            }
        }
    }
}

/// Operator overrides as read from a store: the rows that decoded, and a
/// diagnostic for each row that did not
#[derive(Debug, Clone, Default)]
pub struct OverrideSet {
    pub definitions: Vec<DynamicDefinition>,
    pub invalid: Vec<Diagnostic>,
}

impl From<Vec<DynamicDefinition>> for OverrideSet {
    fn from(definitions: Vec<DynamicDefinition>) -> Self {
        OverrideSet {
            definitions,
            invalid: Vec::new(),
        }
    }
}

// ============================================================================
// STATIC CATALOG
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    by_code: HashMap<String, StaticDefinition>,
}

impl StaticCatalog {
    /// The catalog embedded in the binary
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_json(BUILTIN_CATALOG)
    }

    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let definitions: Vec<StaticDefinition> =
            serde_json::from_str(json).map_err(CatalogError::Parse)?;
        Ok(Self::from_definitions(definitions))
    }

    pub fn from_definitions(definitions: Vec<StaticDefinition>) -> Self {
        let by_code = definitions
            .into_iter()
            .map(|d| (d.code.clone(), d))
            .collect();
        StaticCatalog { by_code }
    }

    pub fn get(&self, code: &str) -> Option<&StaticDefinition> {
        self.by_code.get(code)
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.by_code.values().any(|d| d.name == name)
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }
}

// ============================================================================
// CATALOG RESOLVER
// ============================================================================

/// One authoritative definition per code: dynamic wins on every present field
pub struct CatalogResolver<'a> {
    statics: &'a StaticCatalog,
    dynamics: HashMap<String, DynamicDefinition>,
    invalid: Vec<Diagnostic>,
}

impl<'a> CatalogResolver<'a> {
    pub fn new(statics: &'a StaticCatalog, dynamics: Vec<DynamicDefinition>) -> Self {
        Self::from_overrides(statics, OverrideSet::from(dynamics))
    }

    /// Build from a store read; undecodable rows are kept only as diagnostics
    pub fn from_overrides(statics: &'a StaticCatalog, overrides: OverrideSet) -> Self {
        let dynamics = overrides
            .definitions
            .into_iter()
            .map(|d| (d.name.clone(), d))
            .collect();

        CatalogResolver {
            statics,
            dynamics,
            invalid: overrides.invalid,
        }
    }

    pub fn resolve(&self, code: &str) -> Result<SkillDefinition, CatalogError> {
        let base = self.statics.get(code).ok_or_else(|| CatalogError::NotFound {
            code: code.to_string(),
        })?;

        let mut merged = SkillDefinition {
            code: base.code.clone(),
            name: base.name.clone(),
            description: base.description.clone(),
            image: base.image.clone(),
            kind: base.kind,
            max_uses: base.uses.unwrap_or(DEFAULT_MAX_USES),
            reset_period: base.reset.unwrap_or(DEFAULT_RESET_PERIOD),
        };

        if let Some(over) = self.dynamics.get(&base.name) {
            debug!(code, name = %base.name, "applying operator override");
            if !over.name.is_empty() {
                merged.name = over.name.clone();
            }
            if let Some(description) = present(&over.description) {
                merged.description = description.to_string();
            }
            if let Some(image) = present(&over.image) {
                merged.image = image.to_string();
            }
            if let Some(kind) = over.kind {
                merged.kind = kind;
            }
            if let Some(max_uses) = over.max_uses {
                merged.max_uses = max_uses;
            }
            if let Some(reset) = over.reset_period {
                merged.reset_period = reset;
            }
        }

        Ok(merged)
    }

    /// Overrides that will never apply: undecodable rows and names that
    /// join to nothing
    pub fn validate(&self) -> Vec<Diagnostic> {
        let mut findings: Vec<Diagnostic> = self
            .dynamics
            .keys()
            .filter(|name| !self.statics.contains_name(name))
            .map(|name| Diagnostic::OrphanOverride { name: name.clone() })
            .chain(self.invalid.iter().cloned())
            .collect();
        findings.sort_by(|a, b| a.to_string().cmp(&b.to_string()));
        findings
    }
}

// Empty strings count as "not set", same as a missing field
fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

// ============================================================================
// TESTS
// ============================================================================
