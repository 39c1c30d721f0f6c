//! CLI tool for Posture Agent (pagent)

#[cfg(feature = "cli")]
use clap::{Parser, Subcommand};
#[cfg(feature = "cli")]
use colored::Colorize;
#[cfg(feature = "cli")]
use posturelib::config::{ConfigOrigin, DEFAULT_CONFIG_PATH};
#[cfg(feature = "cli")]
use posturelib::{
    providers, AgentConfig, AgentContext, CommandRunner, DeliveryClient, ProviderKind, Scheduler,
    TelemetryAssembler, AGENT_VERSION,
};
#[cfg(feature = "cli")]
use std::path::PathBuf;

#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "pagent")]
#[command(about = "Posture Agent: collects device posture telemetry and delivers it to a collection service", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file (JSON, or TOML when the name ends in .toml)
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override the configured log level (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[cfg(feature = "cli")]
#[derive(Subcommand)]
enum Commands {
    /// Collect and deliver on the configured interval until interrupted (default)
    Run,
    /// Run a single cycle; exits 0 when delivery succeeded, 1 otherwise
    Once,
    /// Run a single collection and print the envelope without delivering it
    Collect {
        /// Print compact JSON instead of pretty-printed
        #[arg(long)]
        compact: bool,
    },
    /// Show the effective configuration and resolved device identity
    Config {
        /// Print a sample configuration file instead
        #[arg(long)]
        sample: bool,
    },
}

#[cfg(feature = "cli")]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Run);

    if let Commands::Config { sample: true } = command {
        print!("{}", AgentConfig::sample_json());
        return Ok(());
    }

    let loaded = AgentConfig::load(&cli.config);
    let mut config = loaded.config;
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.log_filter()))
        .format_timestamp_secs()
        .init();

    if let Some(warning) = &loaded.warning {
        log::warn!("{}; continuing with defaults", warning);
        eprintln!(
            "{} {} ({})",
            "[WARN]".yellow(),
            "configuration unusable, running with defaults".yellow(),
            warning
        );
    }
    if !cfg!(target_os = "macos") {
        log::warn!(
            "most probes target macOS; running on {} with reduced coverage",
            std::env::consts::OS
        );
    }

    match command {
        Commands::Run => run_forever(config),
        Commands::Once => run_once(config),
        Commands::Collect { compact } => collect(config, compact),
        Commands::Config { .. } => show_config(config, &loaded.origin),
    }
}

#[cfg(feature = "cli")]
fn build_scheduler(
    config: AgentConfig,
) -> Result<Scheduler<DeliveryClient>, Box<dyn std::error::Error>> {
    let runner = CommandRunner::new(config.command_timeout());
    let providers = providers::default_providers(&config);
    let delivery = DeliveryClient::from_config(&config)?;
    let context = AgentContext::new(config);
    Ok(Scheduler::new(
        context,
        providers,
        TelemetryAssembler::new(runner),
        delivery,
    ))
}

#[cfg(feature = "cli")]
fn run_forever(config: AgentConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!(
        "{} {}",
        "Posture Agent".cyan().bold(),
        format!("v{}", AGENT_VERSION).white()
    );
    println!(
        "  {} {}",
        "Endpoint:".white().bold(),
        config.telemetry_url().green()
    );
    println!(
        "  {} {}s",
        "Interval:".white().bold(),
        config.collection_interval.to_string().cyan()
    );
    println!();
    println!("{}", "Press Ctrl+C to stop...".yellow().italic());
    println!();

    let mut scheduler = build_scheduler(config)?;
    let signal = scheduler.stop_signal();
    // Covers SIGTERM as well through the `termination` feature
    ctrlc::set_handler(move || {
        log::info!("stop requested");
        signal.stop();
    })
    .map_err(|e| format!("Error setting Ctrl-C handler: {}", e))?;

    scheduler.run()?;
    println!(
        "{} after {} cycle(s)",
        "Stopped".green().bold(),
        scheduler.cycles()
    );
    Ok(())
}

#[cfg(feature = "cli")]
fn run_once(config: AgentConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut scheduler = build_scheduler(config)?;
    let report = scheduler.run_once()?;

    let status = if report.delivered {
        "delivered".green().bold()
    } else {
        "delivery failed".red().bold()
    };
    println!(
        "{} {} collected, {} failed: {}",
        "Cycle:".white().bold(),
        report.collected.to_string().cyan(),
        report.failed.to_string().yellow(),
        status
    );

    if !report.delivered {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(feature = "cli")]
fn collect(config: AgentConfig, compact: bool) -> Result<(), Box<dyn std::error::Error>> {
    let runner = CommandRunner::new(config.command_timeout());
    let providers = providers::default_providers(&config);
    let context = AgentContext::new(config);
    let envelope = TelemetryAssembler::new(runner).collect_all(&context, &providers)?;

    let json = if compact {
        serde_json::to_string(&envelope)?
    } else {
        serde_json::to_string_pretty(&envelope)?
    };
    println!("{}", json);

    for failure in &envelope.collection_errors {
        eprintln!(
            "{} {} ({}): {}",
            "[FAILED]".red(),
            failure.provider.bold(),
            failure.kind,
            failure.message
        );
    }
    Ok(())
}

#[cfg(feature = "cli")]
fn show_config(config: AgentConfig, origin: &ConfigOrigin) -> Result<(), Box<dyn std::error::Error>> {
    let source = match origin {
        ConfigOrigin::File(path) => path.display().to_string(),
        ConfigOrigin::Defaults => "built-in defaults".to_string(),
    };
    println!("{} {}", "Source:".white().bold(), source.green());
    println!();
    print!("{}", config.to_redacted_toml());
    println!();

    println!("{}", "Providers:".white().bold());
    for kind in ProviderKind::ALL {
        let state = if config.collectors_enabled.is_enabled(kind.name()) {
            "enabled".green()
        } else {
            "disabled".red()
        };
        println!("  {:<20} {}", kind.name(), state);
    }
    println!();

    let context = AgentContext::new(config);
    println!(
        "{} {} ({})",
        "Device ID:".white().bold(),
        context.identity().id().cyan(),
        context.identity().source()
    );
    Ok(())
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI features not enabled. Please compile with --features cli");
    std::process::exit(1);
}
