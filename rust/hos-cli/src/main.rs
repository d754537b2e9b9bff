//! HOS CLI: protect, run, and inspect HOS IR modules.

mod config;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use hos_core::ir::Module;
use hos_core::strategy::{Mode, Strategy, StrengthLevel};
use hos_core::Value;
use hos_transform::{transform_batch, Seed, TransformReport};

fn green(s: &str) -> String {
    format!("\x1b[32m{}\x1b[0m", s)
}
fn red(s: &str) -> String {
    format!("\x1b[31m{}\x1b[0m", s)
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{}\x1b[0m", s)
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{}\x1b[0m", s)
}
fn gray(s: &str) -> String {
    format!("\x1b[90m{}\x1b[0m", s)
}
fn status_label(label: &str) -> String {
    format!("\x1b[1;32m{:>12}\x1b[0m", label)
}

#[derive(Parser)]
#[command(name = "hos", version, about = "Strategy-driven protection for HOS IR")]
struct Cli {
    /// Log pass decisions (same as RUST_LOG=hos=debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Obfuscate one module or a JSON array of modules
    Protect {
        /// IR file (JSON)
        #[arg()]
        input: PathBuf,

        /// Strategy file (TOML, or JSON by extension)
        #[arg(long, conflicts_with_all = ["mode", "level"])]
        strategy: Option<PathBuf>,

        /// Preset mode: performance, balanced, security
        #[arg(long)]
        mode: Option<Mode>,

        /// Preset strength: low, medium, high
        #[arg(long)]
        level: Option<StrengthLevel>,

        /// Genome; falls back to `genome` in hos.toml
        #[arg(long)]
        seed: Option<u64>,

        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write per-file transform reports (JSON) here
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Execute an exported function of a module
    Run {
        #[arg()]
        input: PathBuf,

        #[arg(long, short)]
        function: String,

        /// Integer argument, repeatable
        #[arg(long = "arg", allow_negative_numbers = true)]
        args: Vec<i64>,
    },
    /// Disassemble a module's bytecode blobs
    Inspect {
        #[arg()]
        input: PathBuf,
    },
    /// Print a preset strategy as TOML
    Preset {
        #[arg(long, default_value = "balanced")]
        mode: Mode,

        #[arg(long, default_value = "medium")]
        level: StrengthLevel,
    },
    /// Write a starter hos.toml in the current directory
    Init,
}

/// Input and output shape: a single module or a batch.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum Modules {
    One(Module),
    Many(Vec<Module>),
}

impl Modules {
    fn into_vec(self) -> Vec<Module> {
        match self {
            Modules::One(m) => vec![m],
            Modules::Many(ms) => ms,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "hos=debug" } else { "hos=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Protect {
            input,
            strategy,
            mode,
            level,
            seed,
            output,
            report,
        } => cmd_protect(&input, strategy, mode, level, seed, output, report),
        Commands::Run {
            input,
            function,
            args,
        } => cmd_run(&input, &function, args),
        Commands::Inspect { input } => cmd_inspect(&input),
        Commands::Preset { mode, level } => cmd_preset(mode, level),
        Commands::Init => cmd_init(),
    };
    if let Err(e) = result {
        eprintln!("{} {}", red("error:"), e);
        std::process::exit(1);
    }
}

fn read_modules(path: &Path) -> Result<Modules, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read '{}': {}", bold(&path.display().to_string()), e))?;
    serde_json::from_str(&text).map_err(|e| format!("invalid IR in '{}': {}", path.display(), e))
}

fn read_module(path: &Path) -> Result<Module, String> {
    match read_modules(path)? {
        Modules::One(m) => Ok(m),
        Modules::Many(_) => Err(format!("'{}' holds several modules, expected one", path.display())),
    }
}

fn load_strategy(path: &Path) -> Result<Strategy, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read strategy '{}': {}", path.display(), e))?;
    let parsed = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => Strategy::from_json_str(&text),
        _ => Strategy::from_toml_str(&text),
    };
    parsed.map_err(|e| format!("{}: {}", path.display(), e))
}

/// Command-line choices win over hos.toml; a preset wins over nothing.
fn resolve_strategy(
    cfg: &config::HosConfig,
    strategy: Option<PathBuf>,
    mode: Option<Mode>,
    level: Option<StrengthLevel>,
) -> Result<Strategy, String> {
    if let Some(path) = strategy {
        return load_strategy(&path);
    }
    if mode.is_none() && level.is_none() {
        if let Some(path) = &cfg.strategy {
            return load_strategy(path);
        }
    }
    let mode = mode.or(cfg.mode).unwrap_or(Mode::Balanced);
    let level = level.or(cfg.level).unwrap_or(StrengthLevel::Medium);
    Ok(Strategy::preset(mode, level))
}

fn print_report(report: &TransformReport) {
    eprintln!(
        "{} {} {}",
        status_label("Protected"),
        bold(&report.file),
        gray(&format!("({})", report.passes.join(", ")))
    );
    if !report.split.is_empty() {
        eprintln!("{:>12} {}", "split", report.split.join(", "));
    }
    if !report.merged.is_empty() {
        eprintln!("{:>12} {}", "merged", report.merged.join(", "));
    }
    if !report.flattened.is_empty() {
        eprintln!("{:>12} {}", "flattened", report.flattened.join(", "));
    }
    if !report.virtualized.is_empty() {
        eprintln!("{:>12} {}", "virtualized", report.virtualized.join(", "));
    }
    for d in &report.diagnostics {
        eprintln!("{} {}", yellow("warning:"), d);
    }
}

fn cmd_protect(
    input: &Path,
    strategy: Option<PathBuf>,
    mode: Option<Mode>,
    level: Option<StrengthLevel>,
    seed: Option<u64>,
    output: Option<PathBuf>,
    report_path: Option<PathBuf>,
) -> Result<(), String> {
    let cfg = config::HosConfig::load();
    let strategy = resolve_strategy(&cfg, strategy, mode, level)?;
    let genome = seed
        .or(cfg.genome)
        .ok_or("no genome: pass --seed or set `genome` in hos.toml")?;

    let parsed = read_modules(input)?;
    let single = matches!(parsed, Modules::One(_));
    tracing::debug!(input = %input.display(), strategy = ?strategy, "protecting");
    let results = transform_batch(parsed.into_vec(), &strategy, Seed::new(genome));

    let mut modules = Vec::with_capacity(results.len());
    let mut reports = Vec::new();
    let mut failed = 0;
    for result in results {
        match result {
            Ok(out) => {
                print_report(&out.report);
                reports.push(out.report);
                modules.push(out.module);
            }
            Err(failure) => {
                failed += 1;
                eprintln!("{} {} (kept unmodified)", red("error:"), failure);
                modules.push(failure.original);
            }
        }
    }

    let shaped = if single && modules.len() == 1 {
        Modules::One(modules.remove(0))
    } else {
        Modules::Many(modules)
    };
    let json = serde_json::to_string_pretty(&shaped).map_err(|e| e.to_string())?;
    match output {
        Some(path) => {
            std::fs::write(&path, json)
                .map_err(|e| format!("writing to '{}': {}", path.display(), e))?;
            eprintln!("{} {}", status_label("Wrote"), path.display());
        }
        None => println!("{json}"),
    }
    if let Some(path) = report_path {
        let json = serde_json::to_string_pretty(&reports).map_err(|e| e.to_string())?;
        std::fs::write(&path, json).map_err(|e| format!("writing to '{}': {}", path.display(), e))?;
    }

    if failed > 0 {
        return Err(format!("{failed} file(s) could not be protected"));
    }
    Ok(())
}

fn cmd_run(input: &Path, function: &str, args: Vec<i64>) -> Result<(), String> {
    let module = read_module(input)?;
    let args = args.into_iter().map(Value::Int).collect();
    let outcome = hos_rt::execute(&module, function, args).map_err(|e| e.to_string())?;
    for line in &outcome.output {
        println!("{line}");
    }
    match outcome.result {
        Ok(value) => {
            println!("{} {}", green("=>"), value);
            Ok(())
        }
        Err(exception) => Err(format!("uncaught exception {exception}")),
    }
}

fn cmd_inspect(input: &Path) -> Result<(), String> {
    let module = read_module(input)?;
    println!(
        "{} {} {}",
        status_label("Module"),
        bold(&module.name),
        gray(&format!(
            "({} functions, {} tables, {} strings, {} blobs)",
            module.functions.len(),
            module.tables.len(),
            module.strings.len(),
            module.blobs.len()
        ))
    );
    for (i, blob) in module.blobs.iter().enumerate() {
        println!();
        println!("{} {} <- {} / {}", bold(&format!("blob {i}")), gray("origin"), blob.origin, blob.arity);
        match hos_vm::codec::decode(&blob.bytes) {
            Ok(program) => print!("{}", program.disassemble()),
            Err(e) => println!("{} {}", red("undecodable:"), e),
        }
    }
    Ok(())
}

fn cmd_preset(mode: Mode, level: StrengthLevel) -> Result<(), String> {
    let text = Strategy::preset(mode, level)
        .to_toml_string()
        .map_err(|e| e.to_string())?;
    println!("# preset {mode}/{level}");
    print!("{text}");
    Ok(())
}

fn cmd_init() -> Result<(), String> {
    let path = PathBuf::from("hos.toml");
    if path.exists() {
        return Err("hos.toml already exists, not overwriting".into());
    }
    std::fs::write(&path, config::HosConfig::default_template())
        .map_err(|e| format!("writing hos.toml: {e}"))?;
    println!("{} created hos.toml", green("✓"));
    Ok(())
}
