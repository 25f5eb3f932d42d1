// FILE: src/cli/mod.rs

mod config;

pub use config::ConfigFile;

use crate::error::Result;
use crate::{Generator, GeneratorOptions, RpcFormat, RunReport};
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::{Path, PathBuf};
use std::time::Instant;
use walkdir::WalkDir;

#[derive(Default)]
pub struct Cli {
    config: ConfigFile,
}

impl Cli {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the command line; returns the process exit status.
    pub fn run(&mut self) -> Result<i32> {
        let start_time = Instant::now();
        let matches = Self::build_cli().get_matches();

        if let Some(config_path) = matches.get_one::<String>("config") {
            self.config = config::load(config_path)?;
        }
        Self::setup_logging(matches.get_count("verbose"));

        let options = self.build_options(&matches);
        let inputs: Vec<String> = matches
            .get_many::<String>("input")
            .into_iter()
            .flatten()
            .cloned()
            .collect();
        let files = collect_inputs(&inputs);
        if files.is_empty() {
            log::warn!("No .h or .json inputs found");
        }

        let mut generator = Generator::new(options)?;
        let report = generator.run(&files);
        if matches.get_flag("dump") {
            dump(&report)?;
        }
        summarize(&report);
        log::info!("Processed {} file(s) in {:.2?}", report.files.len(), start_time.elapsed());
        Ok(if report.error_count() > 0 { 1 } else { 0 })
    }

    fn build_cli() -> Command {
        Command::new(crate::NAME)
            .version(crate::VERSION)
            .about(crate::DESCRIPTION)
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Configuration file path (.toml or .json)")
                    .action(ArgAction::Set),
            )
            .arg(
                Arg::new("verbose")
                    .short('v')
                    .long("verbose")
                    .help("Increase verbosity (can be used multiple times)")
                    .action(ArgAction::Count),
            )
            .arg(
                Arg::new("include")
                    .short('I')
                    .long("include")
                    .value_name("DIR")
                    .help("Search directory for JSON references ({interfacedir})")
                    .action(ArgAction::Append),
            )
            .arg(
                Arg::new("cpp-include")
                    .long("cpp-include")
                    .value_name("DIR")
                    .help("Search directory for C++ headers ({cppinterfacedir})")
                    .action(ArgAction::Append),
            )
            .arg(
                Arg::new("header")
                    .long("header")
                    .value_name("FILE")
                    .help("Header parsed ahead of every C++ input")
                    .action(ArgAction::Append),
            )
            .arg(
                Arg::new("format")
                    .long("format")
                    .value_name("FORMAT")
                    .value_parser(["compliant", "extended", "collapsed"])
                    .help("Default RPC format"),
            )
            .arg(
                Arg::new("no-verify")
                    .long("no-verify")
                    .help("Do not enforce return types and parameter directions")
                    .action(ArgAction::SetTrue),
            )
            .arg(
                Arg::new("all")
                    .long("all")
                    .help("Convert interfaces without a @json tag too")
                    .action(ArgAction::SetTrue),
            )
            .arg(
                Arg::new("dump")
                    .long("dump")
                    .help("Print the resolved object graphs as JSON")
                    .action(ArgAction::SetTrue),
            )
            .arg(
                Arg::new("input")
                    .help("Input .h/.json files or directories")
                    .required(true)
                    .num_args(1..)
                    .action(ArgAction::Append),
            )
    }

    fn setup_logging(verbose_count: u8) {
        let log_level = match verbose_count {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        };
        env_logger::Builder::from_default_env()
            .filter_level(log_level)
            .format_timestamp_secs()
            .init();
    }

    /// Config file values with command line flags on top.
    pub fn build_options(&self, matches: &ArgMatches) -> GeneratorOptions {
        let mut options = self.config.options();
        let paths = |id: &str| -> Vec<PathBuf> {
            matches.get_many::<String>(id).into_iter().flatten().map(PathBuf::from).collect()
        };
        options.include_dirs.extend(paths("include"));
        options.cpp_include_dirs.extend(paths("cpp-include"));
        options.extra_headers.extend(paths("header"));
        if let Some(format) = matches
            .get_one::<String>("format")
            .and_then(|f| RpcFormat::from_name(f))
        {
            options.format = format;
        }
        if matches.get_flag("no-verify") {
            options.verify = false;
        }
        if matches.get_flag("all") {
            options.all_interfaces = true;
        }
        options
    }
}

/// Expands directories into the `.h` and `.json` files below them.
pub fn collect_inputs(inputs: &[String]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for input in inputs {
        let path = Path::new(input);
        if !path.is_dir() {
            files.push(path.to_path_buf());
            continue;
        }
        let mut found: Vec<PathBuf> = WalkDir::new(path)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|p| matches!(p.extension().and_then(|e| e.to_str()), Some("h" | "json")))
            .collect();
        found.sort();
        log::debug!("{}: {} input file(s)", input, found.len());
        files.extend(found);
    }
    files
}

fn dump(report: &RunReport) -> Result<()> {
    let graphs: Vec<serde_json::Value> = report
        .schemas()
        .map(|schema| schema.to_value())
        .collect();
    let text = serde_json::to_string_pretty(&graphs)
        .map_err(|e| crate::GeneratorError::json(e.to_string()))?;
    println!("{}", text);
    Ok(())
}

fn summarize(report: &RunReport) {
    for file in &report.files {
        if let Err(e) = &file.outcome {
            eprintln!("{}: {}", file.path.display(), e);
        }
    }
    if report.error_count() > 0 {
        eprintln!(
            "{} of {} file(s) failed, {} warning(s)",
            report.error_count(),
            report.files.len(),
            report.warning_count()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_flags_override_defaults() {
        let matches = Cli::build_cli()
            .try_get_matches_from([
                "jsongen",
                "-I",
                "json",
                "--cpp-include",
                "interfaces",
                "--header",
                "Ids.h",
                "--format",
                "extended",
                "--no-verify",
                "--all",
                "IFoo.h",
                "IBar.h",
            ])
            .unwrap();
        let options = Cli::new().build_options(&matches);
        assert_eq!(options.include_dirs, vec![PathBuf::from("json")]);
        assert_eq!(options.cpp_include_dirs, vec![PathBuf::from("interfaces")]);
        assert_eq!(options.extra_headers, vec![PathBuf::from("Ids.h")]);
        assert_eq!(options.format, RpcFormat::Extended);
        assert!(!options.verify);
        assert!(options.all_interfaces);
        assert_eq!(matches.get_many::<String>("input").unwrap().count(), 2);
    }

    #[test]
    fn test_input_is_required() {
        assert!(Cli::build_cli().try_get_matches_from(["jsongen"]).is_err());
        assert!(Cli::build_cli()
            .try_get_matches_from(["jsongen", "--format", "loose", "IFoo.h"])
            .is_err());
    }

    #[test]
    fn test_directories_are_walked() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("IFoo.h"), "").unwrap();
        fs::write(dir.path().join("nested/bar.json"), "{}").unwrap();
        fs::write(dir.path().join("README.md"), "").unwrap();
        let root = dir.path().to_string_lossy().to_string();
        let files = collect_inputs(&[root, "single.json".to_string()]);
        assert_eq!(
            files,
            vec![
                dir.path().join("IFoo.h"),
                dir.path().join("nested/bar.json"),
                PathBuf::from("single.json")
            ]
        );
    }
}
