//! tclhost - native Tcl runtime locator and host
//!
//! Main CLI entry point for finding, selecting and loading Tcl runtimes.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tclhost::build::{PatternCatalog, PatternList};
use tclhost::config::{parse_flags, HostConfig};
use tclhost::{
    available, find, select, FindFlags, FindOptions, LoadFlags, OsFamily, PatchLevel, PumpOptions,
    SelectOptions, TclBuild, TclRuntime, UnloadFlags, UnloadOutcome, VersionRange,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tclhost")]
#[command(version)]
#[command(about = "Locate, select and host native Tcl runtimes", long_about = None)]
struct Cli {
    /// Increase log output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Configuration file (default: tclhost.toml in this or a parent directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    // Commands sorted alphabetically for easier navigation
    /// Report whether any runtime can be found
    Available {
        #[command(flatten)]
        search: SearchArgs,

        /// Only count candidates whose path matches this glob
        #[arg(long)]
        glob: Option<String>,
    },

    /// List every candidate runtime
    Find {
        #[command(flatten)]
        search: SearchArgs,

        /// Show every field of each candidate
        #[arg(long)]
        full: bool,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Load the best runtime, report it, then unload it
    Load {
        #[command(flatten)]
        search: SearchArgs,

        #[command(flatten)]
        lifecycle: LifecycleArgs,
    },

    /// Show the name patterns in effect
    Patterns {
        /// Operating system family (windows, unix, darwin; default: host)
        #[arg(long)]
        family: Option<String>,

        /// Extra patterns tried before the built-in ones
        #[arg(long = "extra")]
        extra: Vec<String>,
    },

    /// Choose the best candidate runtime
    Select {
        #[command(flatten)]
        search: SearchArgs,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Load the best runtime and process its pending events
    Update {
        #[command(flatten)]
        search: SearchArgs,

        #[command(flatten)]
        lifecycle: LifecycleArgs,

        /// Stop after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Block until an event arrives
        #[arg(long)]
        wait: bool,

        /// Keep processing while events are produced
        #[arg(long)]
        all: bool,
    },

    /// List candidate versions between two bounds
    Versionrange {
        #[arg(long, default_value = "8.4")]
        minimum: String,

        #[arg(long, default_value = "9.1")]
        maximum: String,

        #[arg(long, default_value = "1")]
        major_increment: u32,

        #[arg(long, default_value = "1")]
        minor_increment: u32,

        /// First minor version of majors between the bounds
        #[arg(long, default_value = "0")]
        intermediate_minimum: u32,

        /// Last minor version of majors between the bounds
        #[arg(long, default_value = "9")]
        intermediate_maximum: u32,
    },
}

/// Search inputs shared by most subcommands.
#[derive(Args)]
struct SearchArgs {
    /// Files or directories searched first
    paths: Vec<PathBuf>,

    /// Find flags, e.g. "DEFAULT | RECURSIVE"
    #[arg(long)]
    flags: Option<String>,

    /// Lowest acceptable version
    #[arg(long)]
    minimum: Option<String>,

    /// Highest acceptable version
    #[arg(long)]
    maximum: Option<String>,

    /// Version assumed when a recognized file has none
    #[arg(long)]
    unknown: Option<String>,

    /// Also run the script-evaluation fallback
    #[arg(long)]
    script: bool,
}

#[derive(Args)]
struct LifecycleArgs {
    /// Load flags, e.g. "FIND_EXECUTABLE | REQUIRE_THREADED"
    #[arg(long)]
    load_flags: Option<String>,

    /// Unload flags, e.g. "DEFAULT | FORCE"
    #[arg(long)]
    unload_flags: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => {
            HostConfig::load(path).with_context(|| format!("loading {}", path.display()))?
        }
        None => HostConfig::load_from_cwd().context("loading tclhost.toml")?,
    };

    match cli.command {
        Commands::Available { search, glob } => cmd_available(&config, &search, glob.as_deref()),
        Commands::Find { search, full, json } => cmd_find(&config, &search, full, json),
        Commands::Load { search, lifecycle } => cmd_load(&config, &search, &lifecycle),
        Commands::Patterns { family, extra } => cmd_patterns(family.as_deref(), &extra),
        Commands::Select { search, json } => cmd_select(&config, &search, json),
        Commands::Update {
            search,
            lifecycle,
            timeout_ms,
            wait,
            all,
        } => {
            let pump = PumpOptions {
                timeout: timeout_ms.map(Duration::from_millis),
                wait,
                drain_all: all,
                cancel: None,
            };
            cmd_update(&config, &search, &lifecycle, &pump)
        }
        Commands::Versionrange {
            minimum,
            maximum,
            major_increment,
            minor_increment,
            intermediate_minimum,
            intermediate_maximum,
        } => {
            let range = VersionRange {
                minimum: parse_version(&minimum)?,
                maximum: parse_version(&maximum)?,
                major_increment,
                minor_increment,
                intermediate_minimum,
                intermediate_maximum,
            };
            cmd_versionrange(&range)
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_version(text: &str) -> Result<PatchLevel> {
    text.parse::<PatchLevel>()
        .map_err(|_| anyhow::anyhow!("invalid version: {}", text))
}

/// Configuration first, then command-line overrides.
fn find_options(config: &HostConfig, search: &SearchArgs) -> Result<FindOptions> {
    let mut options = config.find_options().context("invalid [find] configuration")?;
    if let Some(text) = &search.flags {
        options.flags = parse_flags::<FindFlags>(text)?;
    }
    if search.script {
        options.flags |= FindFlags::EVALUATE_SCRIPT;
    }
    if !search.paths.is_empty() {
        options.flags |= FindFlags::SPECIFIC_PATH;
        options.paths = search.paths.clone();
    }
    if let Some(text) = &search.minimum {
        options.bounds.minimum = Some(parse_version(text)?);
    }
    if let Some(text) = &search.maximum {
        options.bounds.maximum = Some(parse_version(text)?);
    }
    if let Some(text) = &search.unknown {
        options.unknown_version = Some(parse_version(text)?);
    }
    Ok(options)
}

fn runtime_flags(
    config: &HostConfig,
    lifecycle: &LifecycleArgs,
) -> Result<(LoadFlags, UnloadFlags)> {
    let load = match &lifecycle.load_flags {
        Some(text) => parse_flags::<LoadFlags>(text)?,
        None => config.load_options().context("invalid [load] configuration")?.flags,
    };
    let unload = match &lifecycle.unload_flags {
        Some(text) => parse_flags::<UnloadFlags>(text)?,
        None => config.unload_flags().context("invalid [unload] configuration")?,
    };
    Ok((load, unload))
}

fn print_build(build: &TclBuild, full: bool) {
    if full {
        for (key, value) in build.to_pairs() {
            println!("  {:<16} {}", key, value);
        }
        println!();
    } else {
        println!(
            "{:<10} {:<8} {:<9} {}",
            build.patch_level.to_string(),
            if build.threaded { "thread" } else { "" },
            build.priority.to_string(),
            build.path.display()
        );
    }
}

fn cmd_available(config: &HostConfig, search: &SearchArgs, glob: Option<&str>) -> Result<()> {
    let runtime = TclRuntime::system();
    let options = find_options(config, search)?;
    let found = available(&options, runtime.platform(), glob)?;
    println!("{}", found);
    if !found {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_find(config: &HostConfig, search: &SearchArgs, full: bool, json: bool) -> Result<()> {
    let runtime = TclRuntime::system();
    let options = find_options(config, search)?;
    let outcome = find(&options, runtime.platform())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome.catalog)?);
        return Ok(());
    }

    println!("Candidate Runtimes ({} found)", outcome.catalog.len());
    println!("==========================");
    println!();
    if !full {
        println!("{:<10} {:<8} {:<9} PATH", "VERSION", "THREADS", "PRIORITY");
        println!("{:-<10} {:-<8} {:-<9} {:-<40}", "", "", "", "");
    }
    for build in outcome.catalog.iter() {
        print_build(build, full);
    }

    if !outcome.diagnostics.is_empty() {
        println!();
        println!("Diagnostics:");
        for message in outcome.diagnostics.iter() {
            println!("  {}", message);
        }
    }
    Ok(())
}

fn cmd_select(config: &HostConfig, search: &SearchArgs, json: bool) -> Result<()> {
    let runtime = TclRuntime::system();
    let options = find_options(config, search)?;
    let outcome = find(&options, runtime.platform())?;
    let select_options = SelectOptions::new(options.flags, options.bounds.clone());
    let build = select(&outcome.catalog, &select_options, runtime.platform())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&build)?);
    } else {
        println!("Selected: {}", build.path.display());
        print_build(&build, true);
    }
    Ok(())
}

fn cmd_load(config: &HostConfig, search: &SearchArgs, lifecycle: &LifecycleArgs) -> Result<()> {
    let runtime = TclRuntime::system();
    let (load_flags, unload_flags) = runtime_flags(config, lifecycle)?;
    let mut load_options = config.load_options()?.with_flags(load_flags);
    load_options.find = find_options(config, search)?;

    let mut session = None;
    runtime.load_into(&mut session, &load_options)?;
    if let Some(session) = &session {
        println!("Loaded:      {}", session.path().display());
        println!("Patch level: {}", session.patch_level());
        println!("Threaded:    {}", session.is_threaded());
        if let Some(library) = session.get_var("tcl_library", None)? {
            println!("Library:     {}", library);
        }
    }

    report_unload(runtime.unload(&mut session, unload_flags)?);
    Ok(())
}

fn cmd_update(
    config: &HostConfig,
    search: &SearchArgs,
    lifecycle: &LifecycleArgs,
    pump: &PumpOptions,
) -> Result<()> {
    let runtime = TclRuntime::system();
    let (load_flags, unload_flags) = runtime_flags(config, lifecycle)?;
    let mut load_options = config.load_options()?.with_flags(load_flags);
    load_options.find = find_options(config, search)?;

    let mut session = Some(runtime.load(&load_options)?);
    let path = session
        .as_ref()
        .map(|s| s.path().to_path_buf())
        .context("session vanished after load")?;

    let stats = runtime.pump_events(&path, pump)?;
    println!("Events processed: {}", stats.event_count);
    println!("Yields:           {}", stats.yield_count);
    if stats.timed_out {
        println!("Stopped after timeout");
    }

    report_unload(runtime.unload(&mut session, unload_flags)?);
    Ok(())
}

fn report_unload(outcome: UnloadOutcome) {
    match outcome {
        UnloadOutcome::Unloaded { finalized, freed } => {
            println!("Unloaded (finalized: {}, freed: {})", finalized, freed);
        }
        UnloadOutcome::Released { remaining } => {
            println!("Released; {} reference(s) still hold the module", remaining);
        }
    }
}

fn cmd_patterns(family: Option<&str>, extra: &[String]) -> Result<()> {
    let family = match family.map(|f| f.to_ascii_lowercase()) {
        None => OsFamily::current(),
        Some(f) if f == "windows" => OsFamily::Windows,
        Some(f) if f == "unix" => OsFamily::Unix,
        Some(f) if f == "darwin" => OsFamily::Darwin,
        Some(other) => anyhow::bail!("unknown family: {}", other),
    };
    let catalog = PatternCatalog::new(extra).context("invalid extra pattern")?;

    println!("Name Patterns ({})", family);
    println!("==================");
    println!();
    println!("{:<8} {:<10} PATTERN", "PRIORITY", "LIST");
    println!("{:-<8} {:-<10} {:-<40}", "", "", "");
    let flags = FindFlags::NAME_PATTERN_MASK;
    for (index, pattern) in catalog.enabled(family, flags).into_iter().enumerate() {
        let list = match pattern.list {
            PatternList::Extra => "extra",
            PatternList::Primary => "primary",
            PatternList::Secondary => "secondary",
            PatternList::Other => "other",
        };
        println!("{:<8} {:<10} {}", index, list, pattern.as_str());
    }
    Ok(())
}

fn cmd_versionrange(range: &VersionRange) -> Result<()> {
    let versions: Vec<String> = range.versions().iter().map(|v| v.to_string()).collect();
    println!("{}", versions.join(" "));
    Ok(())
}
