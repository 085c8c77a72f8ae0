//! Caustica command-line interface.
//!
//! Design a refractive caustic lens from two density images:
//! ```sh
//! caustica -in_src source.png -in_trg target.png -res 100 -out out/lens
//! caustica -config lens.toml -ores 1 2 3 -export_maps
//! ```
//!
//! Flags keep their single-dash spelling (`-in_src`, `-map_res`, ...); they
//! are rewritten to long options before parsing.

mod config;
mod runner;

use std::ffi::OsString;
use std::path::PathBuf;

use clap::{ArgAction, CommandFactory, Parser};

use crate::config::{ConfigError, RunConfig};

/// Flags accepted with a single leading dash.
const LEGACY_FLAGS: &[&str] = &[
    "in_src",
    "in_trg",
    "res",
    "ptscale",
    "export_maps",
    "out",
    "ores",
    "map_res",
    "maxit",
    "th",
    "v",
    "config",
    "report",
    "help",
];

#[derive(Parser, Debug)]
#[command(name = "caustica")]
#[command(about = "Caustica: refractive caustic lens design")]
#[command(version, disable_help_flag = true)]
pub struct Cli {
    /// Source (incoming light) density image.
    #[arg(long = "in_src", value_name = "PATH")]
    pub in_src: Option<PathBuf>,

    /// Target (desired caustic) density image.
    #[arg(long = "in_trg", value_name = "PATH")]
    pub in_trg: Option<PathBuf>,

    /// Mesh resolution, vertices per side [default: 100].
    #[arg(long, value_name = "N")]
    pub res: Option<usize>,

    /// Dot size scale of the EPS point plots [default: 1].
    #[arg(long, value_name = "SCALE")]
    pub ptscale: Option<f64>,

    /// Also write the transport map (OFF) and point plot (EPS) per pass.
    #[arg(long = "export_maps")]
    pub export_maps: bool,

    /// Output prefix; surfaces go to `<prefix>_<label>.obj` [default: output.obj].
    #[arg(long, value_name = "PREFIX")]
    pub out: Option<String>,

    /// Output pass labels; one refined surface is written per label [default: 1].
    #[arg(long, value_name = "LABEL", num_args = 1..)]
    pub ores: Vec<u32>,

    /// Transport grid resolution [default: density rows].
    #[arg(long = "map_res", value_name = "N")]
    pub map_res: Option<usize>,

    /// Transport solver iteration limit [default: 500].
    #[arg(long, value_name = "N")]
    pub maxit: Option<usize>,

    /// Transport convergence threshold [default: 1e-3].
    #[arg(long, value_name = "EPS")]
    pub th: Option<f64>,

    /// Verbosity: 0 warn, 1 info, 2 debug, 3 trace.
    #[arg(long, value_name = "LEVEL", default_value_t = 1)]
    pub v: u8,

    /// TOML file providing defaults; flags override it.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Write a JSON run report.
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,

    /// Print help.
    #[arg(short = 'h', long = "help", action = ArgAction::Help)]
    pub help: Option<bool>,
}

/// Rewrite `-name` to `--name` for every known flag. `-h` and values are
/// passed through untouched.
pub fn normalize_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    args.into_iter()
        .map(|arg| match arg.to_str() {
            Some(s) if s.len() > 1 && !s.starts_with("--") && s.starts_with('-') => {
                if LEGACY_FLAGS.contains(&&s[1..]) {
                    OsString::from(format!("-{s}"))
                } else {
                    arg
                }
            }
            _ => arg,
        })
        .collect()
}

fn log_filter(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse_from(normalize_args(std::env::args_os()));

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_filter(cli.v)))
        .init();

    let config = match RunConfig::from_cli(&cli) {
        Ok(config) => config,
        Err(err @ ConfigError::MissingInput(_)) => {
            eprintln!("{}", Cli::command().render_help());
            return Err(err.into());
        }
        Err(err) => return Err(err.into()),
    };

    println!("Caustica Lens Designer");
    println!("======================");
    if let Some(path) = &cli.config {
        println!("Configuration: {}", path.display());
    }

    runner::run_design(&config)?;

    println!("Design complete.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<OsString> {
        list.iter().map(OsString::from).collect()
    }

    fn parse(list: &[&str]) -> Cli {
        Cli::try_parse_from(normalize_args(args(list))).unwrap()
    }

    #[test]
    fn test_legacy_flags_are_rewritten() {
        let out = normalize_args(args(&["caustica", "-in_src", "a.png", "-res", "8", "-h", "--out", "x"]));
        assert_eq!(
            out,
            args(&["caustica", "--in_src", "a.png", "--res", "8", "-h", "--out", "x"])
        );
    }

    #[test]
    fn test_values_with_dashes_pass_through() {
        let out = normalize_args(args(&["caustica", "-th", "-1", "-out", "-"]));
        assert_eq!(out, args(&["caustica", "--th", "-1", "--out", "-"]));
    }

    #[test]
    fn test_parse_full_command_line() {
        let cli = parse(&[
            "caustica", "-in_src", "s.png", "-in_trg", "t.png", "-res", "50", "-ptscale", "2.5",
            "-export_maps", "-out", "out/lens", "-ores", "1", "2", "3", "-map_res", "64", "-maxit",
            "10", "-th", "0.01", "-v", "2", "-report", "r.json",
        ]);
        assert_eq!(cli.in_src, Some(PathBuf::from("s.png")));
        assert_eq!(cli.in_trg, Some(PathBuf::from("t.png")));
        assert_eq!(cli.res, Some(50));
        assert_eq!(cli.ptscale, Some(2.5));
        assert!(cli.export_maps);
        assert_eq!(cli.out.as_deref(), Some("out/lens"));
        assert_eq!(cli.ores, vec![1, 2, 3]);
        assert_eq!(cli.map_res, Some(64));
        assert_eq!(cli.maxit, Some(10));
        assert_eq!(cli.th, Some(0.01));
        assert_eq!(cli.v, 2);
        assert_eq!(cli.report, Some(PathBuf::from("r.json")));
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&["caustica"]);
        assert_eq!(cli.v, 1);
        assert!(cli.ores.is_empty());
        assert!(!cli.export_maps);
    }

    #[test]
    fn test_help_flags() {
        for flag in ["-h", "-help"] {
            let err = Cli::try_parse_from(normalize_args(args(&["caustica", flag]))).unwrap_err();
            assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
        }
    }

    #[test]
    fn test_log_filter_levels() {
        assert_eq!(log_filter(0), "warn");
        assert_eq!(log_filter(1), "info");
        assert_eq!(log_filter(2), "debug");
        assert_eq!(log_filter(7), "trace");
    }
}
