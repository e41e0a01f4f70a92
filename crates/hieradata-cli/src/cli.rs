//! hieradata CLI - Command-line interface for hierarchical data lookups
//!
//! Usage:
//!   hieradata lookup ntp::servers --environment-dir envs/production --modulepath envs/production/modules
//!   hieradata lookup one::hash --merge deep --knock-out-prefix=-- --facts facts.yaml
//!   hieradata check envs/production envs/production/modules/ntp

use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use hieradata_core::{
    CheckStatus, Environment, Error, ErrorKind, ExpectedType, Explained, Layer, LayerKind,
    LookupEngine, LookupRequest, MergeKind, MergeOptions, Scope, Value,
};
use std::path::PathBuf;
use std::process::ExitCode;

const NO_KEYS: &str = "No keys were given to lookup.";
const DEEP_ONLY: &str = "The options --knock-out-prefix, --sort-merged-arrays, --unpack-arrays, and --merge-hash-arrays are only available with '--merge deep'";

/// hieradata - Hierarchical configuration data lookup
#[derive(Debug, Parser)]
#[command(name = "hieradata")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log what the lookup engine is doing (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Look up one or more keys; the first that yields a value wins
    Lookup(LookupArgs),

    /// Parse the hierarchy declaration and reachable data files of each layer
    Check {
        /// Layer root directories
        #[arg(required = true)]
        dirs: Vec<PathBuf>,
    },
}

#[derive(Debug, Args)]
struct LookupArgs {
    /// Keys to look up
    keys: Vec<String>,

    /// Root of the environment layer
    #[arg(long, default_value = ".")]
    environment_dir: PathBuf,

    /// Environment name
    #[arg(long, default_value = "production")]
    environment: String,

    /// Root of the global layer
    #[arg(long)]
    global_dir: Option<PathBuf>,

    /// Module layer (repeatable)
    #[arg(long = "module", value_name = "NAME=DIR", value_parser = parse_assignment)]
    modules: Vec<(String, String)>,

    /// Directory whose subdirectories are modules (repeatable)
    #[arg(long)]
    modulepath: Vec<PathBuf>,

    /// YAML or JSON file of facts
    #[arg(long)]
    facts: Option<PathBuf>,

    /// Scope variable (repeatable); the value is read as YAML
    #[arg(long = "var", value_name = "NAME=VALUE", value_parser = parse_assignment)]
    vars: Vec<(String, String)>,

    /// Node name, bound as trusted.certname and clientcert
    #[arg(long)]
    node: Option<String>,

    /// Merge strategy
    #[arg(long, value_enum)]
    merge: Option<MergeArg>,

    /// Prefix marking keys and array elements to remove (deep merge only)
    #[arg(long, allow_hyphen_values = true)]
    knock_out_prefix: Option<String>,

    /// Sort merged arrays (deep merge only)
    #[arg(long)]
    sort_merged_arrays: bool,

    /// Merge arrays of hashes element by element (deep merge only)
    #[arg(long)]
    merge_hash_arrays: bool,

    /// Split string array elements on this separator (deep merge only)
    #[arg(long)]
    unpack_arrays: Option<String>,

    /// Expected type, e.g. String or Hash[String, Integer]
    #[arg(long = "type")]
    expected_type: Option<String>,

    /// Value returned when no key is found; read as YAML
    #[arg(long)]
    default: Option<String>,

    /// Print how the value was found instead of the value
    #[arg(long)]
    explain: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum MergeArg {
    First,
    Unique,
    Hash,
    Deep,
}

impl From<MergeArg> for MergeKind {
    fn from(arg: MergeArg) -> Self {
        match arg {
            MergeArg::First => MergeKind::First,
            MergeArg::Unique => MergeKind::Unique,
            MergeArg::Hash => MergeKind::Hash,
            MergeArg::Deep => MergeKind::Deep,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
    Yaml,
}

fn parse_assignment(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected NAME=VALUE, got '{}'", s)),
    }
}

/// Read a command-line value as YAML, keeping it as text if that fails
fn parse_value(s: &str) -> Value {
    serde_yaml::from_str::<serde_yaml::Value>(s)
        .map(Value::from)
        .unwrap_or_else(|_| Value::from(s))
}

/// Run the CLI with the process arguments
pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Lookup(args) => cmd_lookup(args),
        Commands::Check { dirs } => cmd_check(dirs),
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let filter = if verbose { "debug" } else { "warn" };

    // Already installed when embedded; keep the existing subscriber
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

fn merge_options(args: &LookupArgs) -> Result<Option<MergeOptions>, String> {
    let deep_only = args.knock_out_prefix.is_some()
        || args.sort_merged_arrays
        || args.merge_hash_arrays
        || args.unpack_arrays.is_some();

    if deep_only && args.merge != Some(MergeArg::Deep) {
        return Err(DEEP_ONLY.to_string());
    }

    Ok(args.merge.map(|merge| {
        let mut options = MergeOptions::new(merge.into())
            .with_sort_merged_arrays(args.sort_merged_arrays)
            .with_merge_hash_arrays(args.merge_hash_arrays);
        if let Some(prefix) = &args.knock_out_prefix {
            options = options.with_knockout_prefix(prefix);
        }
        if let Some(separator) = &args.unpack_arrays {
            options = options.with_unpack_arrays(separator);
        }
        options
    }))
}

fn build_scope(args: &LookupArgs) -> hieradata_core::Result<Scope> {
    let mut scope = match &args.facts {
        Some(path) => Scope::from_facts_file(path)?,
        None => Scope::new(),
    };

    scope.set("environment", args.environment.as_str());
    if let Some(node) = &args.node {
        let hostname = node.split('.').next().unwrap_or(node);
        scope.set(
            "trusted",
            serde_json::json!({ "certname": node, "hostname": hostname }),
        );
        scope.set("clientcert", node.as_str());
    }
    for (name, value) in &args.vars {
        scope.set(name.as_str(), parse_value(value));
    }

    Ok(scope)
}

fn build_environment(args: &LookupArgs) -> hieradata_core::Result<Environment> {
    let mut builder = Environment::builder(&args.environment, &args.environment_dir);
    if let Some(global) = &args.global_dir {
        builder = builder.global_dir(global);
    }
    for dir in &args.modulepath {
        builder = builder.modulepath(dir);
    }
    for (name, dir) in &args.modules {
        builder = builder.module(name, dir);
    }
    builder.build()
}

fn build_request(args: &LookupArgs) -> Result<LookupRequest, String> {
    let mut request = LookupRequest::with_names(args.keys.iter().cloned());

    if let Some(merge) = merge_options(args)? {
        request = request.with_merge(merge);
    }
    if let Some(expected) = &args.expected_type {
        request = request.with_type(ExpectedType::parse(expected).map_err(|e| e.to_string())?);
    }
    if let Some(default) = &args.default {
        request = request.with_default(parse_value(default));
    }

    Ok(request)
}

/// Render a value for stdout
fn render(value: &Value, format: OutputFormat) -> Result<String, String> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(value)
            .map(|json| json + "\n")
            .map_err(|e| e.to_string()),
        OutputFormat::Yaml => serde_yaml::to_string(value).map_err(|e| e.to_string()),
        OutputFormat::Text => match value {
            Value::Sequence(_) | Value::Mapping(_) => {
                serde_yaml::to_string(value).map_err(|e| e.to_string())
            }
            scalar => Ok(format!("{}\n", scalar)),
        },
    }
}

fn render_explained(explained: &Explained, format: OutputFormat) -> Result<String, String> {
    match format {
        OutputFormat::Text => Ok(explained.explanation.to_string()),
        OutputFormat::Json => serde_json::to_string_pretty(&explained.explanation)
            .map(|json| json + "\n")
            .map_err(|e| e.to_string()),
        OutputFormat::Yaml => {
            serde_yaml::to_string(&explained.explanation).map_err(|e| e.to_string())
        }
    }
}

/// Exit status for a failed lookup
fn failure_code(error: &Error) -> u8 {
    match error.kind {
        ErrorKind::Config | ErrorKind::InvalidKey => 2,
        _ => 1,
    }
}

fn cmd_lookup(args: LookupArgs) -> ExitCode {
    if args.keys.is_empty() {
        eprintln!("{}", NO_KEYS.red());
        return ExitCode::from(2);
    }

    let request = match build_request(&args) {
        Ok(request) => request,
        Err(e) => {
            eprintln!("{}", e.red());
            return ExitCode::from(2);
        }
    };

    let scope = match build_scope(&args) {
        Ok(scope) => scope,
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            return ExitCode::from(2);
        }
    };

    let env = match build_environment(&args) {
        Ok(env) => env,
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            return ExitCode::from(2);
        }
    };

    let engine = LookupEngine::new(&env);

    let result = if args.explain {
        let explained = engine.explain(&request, &scope);
        match render_explained(&explained, args.format) {
            Ok(text) => print!("{}", text),
            Err(e) => eprintln!("{}: {}", "Error".red(), e),
        }
        explained.result.map(|_| None)
    } else {
        engine.lookup(&request, &scope).map(Some)
    };

    match result {
        Ok(Some(value)) => match render(&value, args.format) {
            Ok(text) => {
                print!("{}", text);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{}: {}", "Error".red(), e);
                ExitCode::from(1)
            }
        },
        Ok(None) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            ExitCode::from(failure_code(&e))
        }
    }
}

fn cmd_check(dirs: Vec<PathBuf>) -> ExitCode {
    let mut all_valid = true;
    let backends = hieradata_core::BackendRegistry::with_builtins();

    for dir in dirs {
        let layer = match Layer::load(LayerKind::Environment(dir.display().to_string()), &dir) {
            Ok(layer) => layer,
            Err(e) => {
                eprintln!("{} {}: {}", "✗".red(), dir.display(), e);
                all_valid = false;
                continue;
            }
        };

        match &layer.hierarchy.declared_in {
            Some(path) => println!(
                "{} {}: {} level(s)",
                "✓".green(),
                path.display(),
                layer.hierarchy.levels.len()
            ),
            None => println!("{} {}: default hierarchy", "✓".green(), dir.display()),
        }

        for check in layer.check(&backends) {
            match check.status {
                CheckStatus::Valid { keys } => println!(
                    "  {} {} [{}]: {} key(s)",
                    "✓".green(),
                    check.location.display(),
                    check.level,
                    keys
                ),
                CheckStatus::Missing => println!(
                    "  {} {} [{}]: not found",
                    "-".yellow(),
                    check.location.display(),
                    check.level
                ),
                CheckStatus::Invalid(e) => {
                    eprintln!("  {} {} [{}]: {}", "✗".red(), check.location.display(), check.level, e);
                    all_valid = false;
                }
            }
        }
    }

    if all_valid {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}
