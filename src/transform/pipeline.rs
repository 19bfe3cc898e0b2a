//! Transformation pipeline for structured loop functions.
//!
//! Runs standalone tiling over every `generic` op, then peels every loop
//! until no loop is left untagged, then verifies the result. Markers make
//! the pipeline idempotent: running it on its own output changes nothing.

use crate::ir::{verify, IrFunction};
use crate::transform::peeling::{PeelMode, PeelStats, Peeling};
use crate::transform::tiling::{TileStats, Tiling};
use crate::transform::Transform;
use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};

/// Pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Tile sizes for `generic` ops (None = no tiling)
    pub tile_sizes: Option<Vec<i64>>,
    /// Which loop dimensions to peel
    pub peel: PeelMode,
    /// Restrict both phases to ops carrying this label
    pub label: Option<String>,
    /// Maximum number of peeling scans
    pub max_iterations: usize,
    /// Verify the function after transforming it
    pub verify: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tile_sizes: None,
            peel: PeelMode::All,
            label: None,
            max_iterations: 16,
            verify: true,
        }
    }
}

impl PipelineConfig {
    /// Peel every loop, no tiling.
    pub fn peel_only() -> Self {
        Self::default()
    }

    /// Tile `generic` ops, then peel the generated loops.
    pub fn tile_and_peel(tile_sizes: Vec<i64>) -> Self {
        Self {
            tile_sizes: Some(tile_sizes),
            ..Default::default()
        }
    }

    /// Tile `generic` ops and leave partial tiles clamped.
    pub fn tile_only(tile_sizes: Vec<i64>) -> Self {
        Self {
            tile_sizes: Some(tile_sizes),
            peel: PeelMode::None,
            ..Default::default()
        }
    }

    /// Do nothing but verify.
    pub fn identity() -> Self {
        Self {
            peel: PeelMode::None,
            ..Default::default()
        }
    }

    pub fn with_tile_sizes(mut self, tile_sizes: Vec<i64>) -> Self {
        self.tile_sizes = Some(tile_sizes);
        self
    }

    pub fn with_peel(mut self, peel: PeelMode) -> Self {
        self.peel = peel;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn without_verification(mut self) -> Self {
        self.verify = false;
        self
    }
}

/// What a pipeline run did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineReport {
    /// Name of the transformed function
    pub function: String,
    /// Passes that changed the function, in order
    pub applied_transforms: Vec<String>,
    pub tiling: Option<TileStats>,
    pub peeling: Option<PeelStats>,
    /// Live op count before and after
    pub ops_before: usize,
    pub ops_after: usize,
}

impl PipelineReport {
    /// Whether any pass changed the function.
    pub fn modified(&self) -> bool {
        !self.applied_transforms.is_empty()
    }

    /// Number of individual rewrites performed.
    pub fn changes(&self) -> usize {
        let tiled = self.tiling.as_ref().map(|t| t.ops_tiled).unwrap_or(0);
        let peeled = self.peeling.as_ref().map(|p| p.loops_visited).unwrap_or(0);
        tiled + peeled
    }

    /// Failures of both phases.
    pub fn failures(&self) -> Vec<&str> {
        let tiling = self.tiling.iter().flat_map(|t| t.failures.iter());
        let peeling = self.peeling.iter().flat_map(|p| p.failures.iter());
        tiling.chain(peeling).map(String::as_str).collect()
    }
}

/// Transformation pipeline.
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Create a new pipeline with the given configuration.
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Create a pipeline with default configuration.
    pub fn default_pipeline() -> Self {
        Self::new(PipelineConfig::default())
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn tiling(&self) -> Option<Tiling> {
        let sizes = self.config.tile_sizes.clone()?;
        let tiling = Tiling::new(sizes);
        Some(match &self.config.label {
            Some(label) => tiling.with_label(label.clone()),
            None => tiling,
        })
    }

    fn peeling(&self) -> Option<Peeling> {
        if self.config.peel == PeelMode::None {
            return None;
        }
        let peeling = Peeling::new(self.config.peel).with_max_iterations(self.config.max_iterations);
        Some(match &self.config.label {
            Some(label) => peeling.with_label(label.clone()),
            None => peeling,
        })
    }

    /// Run the pipeline on `func`.
    pub fn run(&self, func: &mut IrFunction) -> Result<PipelineReport> {
        let mut report = PipelineReport {
            function: func.name.clone(),
            ops_before: func.num_ops(),
            ..Default::default()
        };

        if let Some(tiling) = self.tiling() {
            let stats = tiling.run(func);
            debug!("tiling: {} op(s) tiled, {} loop(s) created", stats.ops_tiled, stats.loops_created);
            if stats.ops_tiled > 0 {
                report.applied_transforms.push(tiling.name().to_string());
            }
            report.tiling = Some(stats);
        }

        if let Some(peeling) = self.peeling() {
            let stats = peeling.run(func);
            debug!(
                "peeling: {} loop(s) visited, {} remainder(s) in {} scan(s)",
                stats.loops_visited, stats.remainders_created, stats.iterations
            );
            if stats.loops_visited > 0 {
                report.applied_transforms.push(peeling.name().to_string());
            }
            report.peeling = Some(stats);
        }

        if self.config.verify {
            verify(func).with_context(|| format!("@{} is invalid after transformation", func.name))?;
        }
        report.ops_after = func.num_ops();
        info!(
            "@{}: {} change(s), {} -> {} ops",
            report.function,
            report.changes(),
            report.ops_before,
            report.ops_after
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::parse;

    const UNEVEN: &str = r#"
        func @f(%n: i64) {
          %c0 = constant() {value = 0} : i64
          %c4 = constant() {value = 4} : i64
          %r = for(%c0, %n, %c4, %c0) {dims = 1} ({
          ^bb0(%i: i64, %acc: i64):
            %s = add(%acc, %i) : i64
            yield(%s)
          }) : i64
          return(%r)
        }
    "#;

    #[test]
    fn test_config_presets() {
        let config = PipelineConfig::tile_and_peel(vec![4, 0]);
        assert_eq!(config.tile_sizes, Some(vec![4, 0]));
        assert_eq!(config.peel, PeelMode::All);

        let config = PipelineConfig::tile_only(vec![8]).with_label("hot");
        assert_eq!(config.peel, PeelMode::None);
        assert_eq!(config.label.as_deref(), Some("hot"));

        let config = PipelineConfig::identity().without_verification();
        assert!(!config.verify);
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: PipelineConfig = serde_json::from_str(r#"{"tile_sizes": [4]}"#).unwrap();
        assert_eq!(config.tile_sizes, Some(vec![4]));
        assert_eq!(config.peel, PeelMode::All);
        assert!(config.verify);
    }

    #[test]
    fn test_second_run_changes_nothing() {
        let mut func = parse(UNEVEN).unwrap();
        let pipeline = Pipeline::default_pipeline();
        let first = pipeline.run(&mut func).unwrap();
        assert!(first.modified());
        assert_eq!(first.peeling.as_ref().map(|p| p.remainders_created), Some(1));

        let second = pipeline.run(&mut func).unwrap();
        assert!(!second.modified());
        assert_eq!(second.changes(), 0);
        assert_eq!(second.ops_before, second.ops_after);
    }

    #[test]
    fn test_label_filter() {
        let mut func = parse(UNEVEN).unwrap();
        let report = Pipeline::new(PipelineConfig::peel_only().with_label("other"))
            .run(&mut func)
            .unwrap();
        assert!(!report.modified());
    }

    #[test]
    fn test_report_serializes() {
        let mut func = parse(UNEVEN).unwrap();
        let report = Pipeline::default_pipeline().run(&mut func).unwrap();
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"function\":\"f\""));
        assert!(json.contains("\"remainders_created\":1"));
    }
}
