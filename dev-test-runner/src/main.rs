//! Fixture runner: compile every case for every target and diff the output.
//!
//! A fixture file is JSON:
//!
//! ```json
//! { "name": "arithmetic",
//!   "cases": [
//!     { "source": "2 + 3 * 4",
//!       "expect": { "ruby": "2 + 3 * 4", "sql": "2 + CAST(3 AS BIGINT) * 4" },
//!       "errors": { "sql": "cannot express" },
//!       "helpers": { "javascript": ["eloAdd"] } } ] }
//! ```
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use colored::Colorize;
use rayon::prelude::*;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use elo::emit::compile_with;
use elo::{parse, transform, CompileError, CompileOptions, Ir, TargetKind};

// ————————————————————————————————————————————————————————————————————————————
// CLI
// ————————————————————————————————————————————————————————————————————————————

/// run Elo compiler fixtures against every target
#[derive(Parser, Debug)]
struct Cli {
    /// fixture files; literal paths or quoted glob patterns
    #[arg(default_value = "fixtures/*.json")]
    input: Vec<String>,

    /// only check this target (ruby, javascript, sql)
    #[arg(long, value_parser = parse_target)]
    target: Option<TargetKind>,

    /// print the typed IR of every case as JSON
    #[arg(long)]
    dump_ir: bool,

    /// more logging; repeat for trace-level dispatch decisions
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn parse_target(s: &str) -> Result<TargetKind, String> {
    TargetKind::ALL
        .into_iter()
        .find(|t| t.name() == s)
        .ok_or_else(|| format!("unknown target `{s}`"))
}

// ————————————————————————————————————————————————————————————————————————————
// FIXTURES
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Fixture {
    name: String,
    #[serde(default)]
    options: CompileOptions,
    cases: Vec<Case>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Case {
    source: String,
    /// exact expected code per target
    #[serde(default)]
    expect: HashMap<TargetKind, String>,
    /// substring of the expected error message per target
    #[serde(default)]
    errors: HashMap<TargetKind, String>,
    /// exact helper set per target
    #[serde(default)]
    helpers: HashMap<TargetKind, Vec<String>>,
}

/// Deserialize with JSON-path context in error messages.
fn from_str_with_path<T: DeserializeOwned>(src: &str) -> Result<T> {
    let de = &mut serde_json::Deserializer::from_str(src);
    serde_path_to_error::deserialize::<_, T>(de).map_err(|err| {
        let path = err.path().to_string();
        anyhow!("at JSON path {path} → {}", err.into_inner())
    })
}

fn resolve_file_path_patterns(patterns: &[String]) -> Result<Vec<PathBuf>> {
    fn has_glob_chars(s: &str) -> bool {
        s.bytes().any(|b| matches!(b, b'*' | b'?' | b'[' | b'{'))
    }

    let mut out = Vec::new();
    for pattern in patterns {
        if !has_glob_chars(pattern) {
            out.push(PathBuf::from(pattern));
            continue;
        }
        let before = out.len();
        for entry in glob::glob(pattern).with_context(|| format!("bad glob pattern: {pattern}"))? {
            out.push(entry?);
        }
        if out.len() == before {
            bail!("glob pattern matched no files: {pattern}");
        }
    }
    Ok(out)
}

fn load(path: &Path) -> Result<Fixture> {
    let source = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    from_str_with_path(&source).with_context(|| format!("decoding {}", path.display()))
}

// ————————————————————————————————————————————————————————————————————————————
// RUN
// ————————————————————————————————————————————————————————————————————————————

struct Outcome {
    fixture: String,
    source: String,
    target: TargetKind,
    failure: Option<String>,
}

fn check(case: &Case, ir: &Result<Ir, CompileError>, target: TargetKind, options: &CompileOptions) -> Option<String> {
    let compiled = match ir {
        Ok(ir) => compile_with(target.target(), ir, options),
        Err(e) => Err(e.clone()),
    };
    match (compiled, case.errors.get(&target)) {
        (Ok(out), None) => {
            if let Some(expected) = case.expect.get(&target) {
                if &out.code != expected {
                    return Some(format!("expected `{expected}`\n       got `{}`", out.code));
                }
            }
            if let Some(expected) = case.helpers.get(&target) {
                let got = out.helpers.iter().cloned().collect::<Vec<_>>();
                let mut expected = expected.clone();
                expected.sort();
                if got != expected {
                    return Some(format!("expected helpers {expected:?}, got {got:?}"));
                }
            }
            None
        }
        (Ok(out), Some(expected)) => Some(format!("expected error containing `{expected}`, compiled `{}`", out.code)),
        (Err(e), Some(expected)) if e.to_string().contains(expected.as_str()) => None,
        (Err(e), _) => Some(format!("error: {e}")),
    }
}

fn run_fixture(fixture: &Fixture, only: Option<TargetKind>, dump_ir: bool) -> Vec<Outcome> {
    fixture
        .cases
        .par_iter()
        .flat_map_iter(|case| {
            // one IR per case, shared by every target
            let ir = parse(&case.source)
                .map_err(CompileError::from)
                .and_then(|ast| transform(&ast).map_err(CompileError::from));
            if dump_ir {
                if let Ok(ir) = &ir {
                    match serde_json::to_string_pretty(ir) {
                        Ok(json) => println!("{} {}\n{json}", "IR".cyan(), case.source),
                        Err(e) => debug!(error = %e, "could not serialize IR"),
                    }
                }
            }
            TargetKind::ALL
                .into_iter()
                .filter(move |t| only.is_none_or(|o| o == *t))
                .map(move |target| Outcome {
                    fixture: fixture.name.clone(),
                    source: case.source.clone(),
                    target,
                    failure: check(case, &ir, target, &fixture.options),
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).with_writer(std::io::stderr).init();

    let paths = resolve_file_path_patterns(&cli.input)?;
    info!(files = paths.len(), "loading fixtures");
    let fixtures = paths.iter().map(|p| load(p)).collect::<Result<Vec<_>>>()?;

    let mut passed = 0usize;
    let mut failed = 0usize;
    for fixture in &fixtures {
        for outcome in run_fixture(fixture, cli.target, cli.dump_ir) {
            let label = format!("{} / {} / {}", outcome.fixture, outcome.target.name(), outcome.source);
            match outcome.failure {
                None => {
                    passed += 1;
                    println!("{} {label}", "PASS".green());
                }
                Some(why) => {
                    failed += 1;
                    println!("{} {label}\n       {why}", "FAIL".red().bold());
                }
            }
        }
    }

    let summary = format!("{passed} passed, {failed} failed");
    if failed == 0 {
        println!("{}", summary.green().bold());
        Ok(ExitCode::SUCCESS)
    } else {
        println!("{}", summary.red().bold());
        Ok(ExitCode::FAILURE)
    }
}
