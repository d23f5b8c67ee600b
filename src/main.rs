//! sidewinder - run CommonJS JavaScript on the Boa engine
//!
//! With no FILE and no `--eval`, starts an interactive REPL.

use clap::Parser;
use colored::Colorize;
use miette::{IntoDiagnostic, Result, miette};
use std::path::PathBuf;
use tracing_subscriber::filter::EnvFilter;

use sidewinder::cli::{Repl, ReplConfig};
use sidewinder::resolver::ResolutionMode;
use sidewinder::runtime::{EvaluationError, LoadLimits, Runtime, RuntimeConfig};
use sidewinder::value::Value;

#[derive(Parser)]
#[command(name = "sidewinder")]
#[command(author, version, about = "An embeddable JavaScript runtime with Node-style require()")]
struct Cli {
    /// JavaScript file to run as the main module
    file: Option<PathBuf>,

    /// Evaluate code from the command line
    #[arg(short, long)]
    eval: Option<String>,

    /// Working directory for require(), fs and process.cwd()
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Run without require, module, process or the built-in shims
    #[arg(long)]
    no_node_compat: bool,

    /// Maximum number of modules a run may load
    #[arg(long)]
    max_modules: Option<usize>,

    /// Resolve packages through their package.json "exports" maps
    #[arg(long)]
    exports: bool,

    /// Log module resolution and loading
    #[arg(short, long)]
    verbose: bool,

    /// Arguments passed through to process.argv
    #[arg(last = true)]
    args: Vec<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "sidewinder=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(default_level.parse().into_diagnostic()?))
        .with_writer(std::io::stderr)
        .init();

    let config = build_config(&cli)?;

    if let Some(code) = &cli.eval {
        let mut runtime = Runtime::with_config(config).into_diagnostic()?;
        report(runtime.evaluate(code))?;
    } else if let Some(file) = &cli.file {
        let mut runtime = Runtime::with_config(config).into_diagnostic()?;
        report(runtime.run_main(file))?;
    } else {
        let mut repl = Repl::new(config, ReplConfig::default()).into_diagnostic()?;
        repl.run().into_diagnostic()?;
    }

    Ok(())
}

fn build_config(cli: &Cli) -> Result<RuntimeConfig> {
    let mut config = match &cli.cwd {
        Some(cwd) => {
            if !cwd.is_dir() {
                return Err(miette!("--cwd '{}' is not a directory", cwd.display()));
            }
            RuntimeConfig::with_cwd(cwd)
        }
        None => RuntimeConfig::default(),
    };
    config.enable_node_compat = !cli.no_node_compat;

    let mut argv = vec!["sidewinder".to_string()];
    if let Some(file) = &cli.file {
        argv.push(file.display().to_string());
    }
    argv.extend(cli.args.iter().cloned());
    config.argv = argv;

    if cli.exports {
        config.resolver.mode = ResolutionMode::PackageExports;
    }
    if let Some(max_modules) = cli.max_modules {
        config.limits = LoadLimits {
            max_modules,
            ..config.limits
        };
    }
    Ok(config)
}

fn report(result: std::result::Result<Value, EvaluationError>) -> Result<()> {
    match result {
        Ok(value) => {
            if !value.is_undefined() {
                println!("{value}");
            }
            Ok(())
        }
        Err(e) => {
            for line in e.stack.lines().skip(1) {
                eprintln!("{}", line.dimmed());
            }
            let code = e.code.clone().unwrap_or_else(|| e.kind.to_string());
            Err(miette!(code = code, "{}", e.message))
        }
    }
}
