use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{PlanError, Result};
use crate::stage::{Params, StageRegistry, StageSpec};

/// A run described in configuration (TOML).
///
/// ```toml
/// source = "/data/cell1"
/// t_range = [0, 1, 2]
///
/// [[stage]]
/// type = "deconvolution"
/// params = { otf_dir = "/data/otfs", iterations = 15 }
///
/// [[stage]]
/// type = "tiff_writer"
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunConfig {
    pub source: PathBuf,
    #[serde(default)]
    pub t_range: Option<Vec<usize>>,
    #[serde(default)]
    pub c_range: Option<Vec<usize>>,
    #[serde(default)]
    pub skip_warnings: bool,
    #[serde(default, rename = "stage")]
    pub stages: Vec<StageEntry>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StageEntry {
    #[serde(rename = "type")]
    pub stage_type: String,
    #[serde(default)]
    pub params: Params,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub collapsed: bool,
}

fn default_active() -> bool {
    true
}

impl RunConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text)
            .map_err(|e| PlanError::InvalidArgument(format!("invalid run configuration: {e}")))
    }

    /// Resolve stage types by name.
    pub fn specs(&self, registry: &StageRegistry) -> Result<Vec<StageSpec>> {
        self.stages
            .iter()
            .map(|entry| {
                let factory = registry.get(&entry.stage_type).ok_or_else(|| {
                    PlanError::InvalidArgument(format!("unknown stage type '{}'", entry.stage_type))
                })?;
                Ok(StageSpec {
                    stage_type: factory,
                    params: entry.params.clone(),
                    active: entry.active,
                    collapsed: entry.collapsed,
                })
            })
            .collect()
    }
}
