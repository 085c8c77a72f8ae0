//! Run configuration: TOML defaults merged with command-line flags.
//!
//! The file is optional; every value it sets can be overridden by the
//! matching flag. The merge happens once and yields an immutable
//! [`RunConfig`].

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use caustica_core::pipeline::DesignSettings;
use caustica_core::transport::TransportOptions;
use caustica_core::types::{LensParams, DEFAULT_MESH_RESOLUTION, REFINEMENT_ITERATIONS};

use crate::Cli;

/// Errors while assembling the run configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required input: {0}")]
    MissingInput(&'static str),

    #[error("Failed to read config '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Contents of a TOML configuration file. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub input: InputSection,
    #[serde(default)]
    pub mesh: MeshSection,
    #[serde(default)]
    pub lens: LensSection,
    #[serde(default)]
    pub solver: SolverSection,
    #[serde(default)]
    pub output: OutputSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputSection {
    pub source: Option<PathBuf>,
    pub target: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MeshSection {
    pub resolution: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LensSection {
    pub refractive_index: Option<f64>,
    pub receiver_distance: Option<f64>,
    pub thickness: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SolverSection {
    pub max_iterations: Option<usize>,
    pub threshold: Option<f64>,
    pub min_density: Option<f64>,
    pub map_resolution: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputSection {
    pub prefix: Option<String>,
    pub ptscale: Option<f64>,
    pub export_maps: Option<bool>,
    pub resolutions: Option<Vec<u32>>,
    pub report: Option<PathBuf>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Where and what to write.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSettings {
    pub prefix: Option<String>,
    pub ptscale: f64,
    pub export_maps: bool,
    pub report: Option<PathBuf>,
}

impl OutputSettings {
    /// Path stem of the files written for `label`: `<prefix>_<label>`, or the
    /// fixed `output` when no prefix is set.
    pub fn stem(&self, label: u32) -> PathBuf {
        match &self.prefix {
            Some(prefix) => PathBuf::from(format!("{prefix}_{label}")),
            None => PathBuf::from("output"),
        }
    }
}

/// Fully resolved settings of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub source: PathBuf,
    pub target: PathBuf,
    pub design: DesignSettings,
    pub output: OutputSettings,
}

impl RunConfig {
    /// Load the file named by `-config` (if any) and merge the flags over it.
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::resolve(cli, file)
    }

    /// Merge flags over file values over built-in defaults, then validate.
    pub fn resolve(cli: &Cli, file: FileConfig) -> Result<Self, ConfigError> {
        let source = cli
            .in_src
            .clone()
            .or(file.input.source)
            .ok_or(ConfigError::MissingInput("source density (-in_src)"))?;
        let target = cli
            .in_trg
            .clone()
            .or(file.input.target)
            .ok_or(ConfigError::MissingInput("target density (-in_trg)"))?;

        let defaults = LensParams::default();
        let lens = LensParams {
            refractive_index: file.lens.refractive_index.unwrap_or(defaults.refractive_index),
            receiver_distance: file.lens.receiver_distance.unwrap_or(defaults.receiver_distance),
            thickness: file.lens.thickness.unwrap_or(defaults.thickness),
        };

        let transport_defaults = TransportOptions::default();
        let transport = TransportOptions {
            max_iterations: cli
                .maxit
                .or(file.solver.max_iterations)
                .unwrap_or(transport_defaults.max_iterations),
            threshold: cli.th.or(file.solver.threshold).unwrap_or(transport_defaults.threshold),
            min_density: file.solver.min_density.unwrap_or(transport_defaults.min_density),
            ..transport_defaults
        };

        let labels = if cli.ores.is_empty() {
            file.output.resolutions.unwrap_or_else(|| vec![1])
        } else {
            cli.ores.clone()
        };

        let design = DesignSettings {
            mesh_resolution: cli.res.or(file.mesh.resolution).unwrap_or(DEFAULT_MESH_RESOLUTION),
            map_resolution: cli.map_res.or(file.solver.map_resolution),
            transport,
            lens,
            refinement_iterations: REFINEMENT_ITERATIONS,
            labels,
        };

        let output = OutputSettings {
            prefix: cli.out.clone().or(file.output.prefix),
            ptscale: cli.ptscale.or(file.output.ptscale).unwrap_or(1.0),
            export_maps: cli.export_maps || file.output.export_maps.unwrap_or(false),
            report: cli.report.clone().or(file.output.report),
        };

        let config = Self {
            source,
            target,
            design,
            output,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |name: &'static str, reason: String| Err(ConfigError::Invalid { name, reason });
        let d = &self.design;

        if d.mesh_resolution < 2 {
            return invalid("-res", format!("need at least 2, got {}", d.mesh_resolution));
        }
        if d.map_resolution == Some(0) {
            return invalid("-map_res", "must be positive".into());
        }
        if d.transport.max_iterations == 0 {
            return invalid("-maxit", "must be positive".into());
        }
        if !(d.transport.threshold > 0.0 && d.transport.threshold.is_finite()) {
            return invalid("-th", format!("must be positive, got {}", d.transport.threshold));
        }
        if !(d.transport.min_density > 0.0 && d.transport.min_density < 1.0) {
            return invalid(
                "solver.min_density",
                format!("must lie in (0, 1), got {}", d.transport.min_density),
            );
        }
        if !(d.lens.refractive_index > 1.0 && d.lens.refractive_index.is_finite()) {
            return invalid(
                "lens.refractive_index",
                format!("must exceed 1, got {}", d.lens.refractive_index),
            );
        }
        if !(d.lens.receiver_distance > 0.0 && d.lens.receiver_distance.is_finite()) {
            return invalid(
                "lens.receiver_distance",
                format!("must be positive, got {}", d.lens.receiver_distance),
            );
        }
        if !(d.lens.thickness > 0.0 && d.lens.thickness.is_finite()) {
            return invalid("lens.thickness", format!("must be positive, got {}", d.lens.thickness));
        }
        if d.labels.is_empty() {
            return invalid("-ores", "at least one label is required".into());
        }
        if !(self.output.ptscale > 0.0 && self.output.ptscale.is_finite()) {
            return invalid("-ptscale", format!("must be positive, got {}", self.output.ptscale));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn cli(list: &[&str]) -> Cli {
        let args = std::iter::once("caustica").chain(list.iter().copied()).map(Into::into);
        Cli::try_parse_from(crate::normalize_args(args)).unwrap()
    }

    fn file(toml: &str) -> FileConfig {
        toml::from_str(toml).unwrap()
    }

    #[test]
    fn test_flags_only() {
        let config = RunConfig::resolve(&cli(&["-in_src", "s.png", "-in_trg", "t.png"]), FileConfig::default())
            .unwrap();
        assert_eq!(config.source, PathBuf::from("s.png"));
        assert_eq!(config.design.mesh_resolution, 100);
        assert_eq!(config.design.labels, vec![1]);
        assert_eq!(config.design.map_resolution, None);
        assert_eq!(config.design.refinement_iterations, 20);
        assert_eq!(config.design.lens, LensParams::default());
        assert_eq!(config.output.stem(1), PathBuf::from("output"));
    }

    #[test]
    fn test_missing_inputs() {
        let err = RunConfig::resolve(&cli(&["-in_src", "s.png"]), FileConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingInput(_)));
        let err = RunConfig::resolve(&cli(&[]), FileConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingInput(_)));
    }

    #[test]
    fn test_file_supplies_defaults_and_flags_override() {
        let toml = r#"
            [input]
            source = "from_file_src.png"
            target = "from_file_trg.png"

            [mesh]
            resolution = 64

            [lens]
            refractive_index = 1.5
            receiver_distance = 3.0
            thickness = 0.1

            [solver]
            max_iterations = 50
            threshold = 1e-2
            min_density = 0.05
            map_resolution = 32

            [output]
            prefix = "out/lens"
            ptscale = 2.0
            export_maps = true
            resolutions = [1, 2]
            report = "out/report.json"
        "#;
        let config = RunConfig::resolve(&cli(&["-res", "12", "-ores", "7", "-th", "0.5"]), file(toml)).unwrap();

        assert_eq!(config.source, PathBuf::from("from_file_src.png"));
        assert_eq!(config.design.mesh_resolution, 12);
        assert_eq!(config.design.labels, vec![7]);
        assert_eq!(config.design.transport.threshold, 0.5);
        assert_eq!(config.design.transport.max_iterations, 50);
        assert_eq!(config.design.transport.min_density, 0.05);
        assert_eq!(config.design.map_resolution, Some(32));
        assert_eq!(config.design.lens.refractive_index, 1.5);
        assert_eq!(config.design.lens.receiver_distance, 3.0);
        assert!(config.output.export_maps);
        assert_eq!(config.output.ptscale, 2.0);
        assert_eq!(config.output.report, Some(PathBuf::from("out/report.json")));
        assert_eq!(config.output.stem(7), PathBuf::from("out/lens_7"));
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(toml::from_str::<FileConfig>("[mesh]\nresolutoin = 3\n").is_err());
    }

    #[test]
    fn test_invalid_values() {
        let base = ["-in_src", "s.png", "-in_trg", "t.png"];
        for extra in [["-res", "1"], ["-th", "0"], ["-maxit", "0"], ["-ptscale", "0"], ["-map_res", "0"]] {
            let args: Vec<&str> = base.iter().chain(extra.iter()).copied().collect();
            let err = RunConfig::resolve(&cli(&args), FileConfig::default()).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { .. }), "{extra:?} accepted");
        }
        let err = RunConfig::resolve(&cli(&base), file("[lens]\nrefractive_index = 0.9\n")).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "lens.refractive_index", .. }));
        let err = RunConfig::resolve(&cli(&base), file("[solver]\nmin_density = 0.0\n")).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "solver.min_density", .. }));
    }

    #[test]
    fn test_load_reports_path() {
        let err = FileConfig::load(Path::new("/nonexistent/caustica.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/caustica.toml"));
    }
}
