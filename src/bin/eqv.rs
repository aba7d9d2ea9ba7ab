//! eqv - Command-line interface for EQ Vault
//!
//! Commands:
//! - metrics: Compute EQ metrics for a signal batch
//! - analyze: Run batches through the local pipeline (metrics, patterns, coaching)
//! - price: Value patterns for optional monetization
//! - aggregate: Merge anonymized contributions under the k-anonymity floor
//! - doctor: Diagnose configuration and crypto health

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use eq_vault::{
    AnonymousAggregator, CoachingStyle, Contribution, EmotionalSignal, EngineConfig, EqAnalysis,
    EqError, EqPattern, EqProcessor, KeyManager, MetricsCalculator, MetricsHistory,
    ValuationResult, ValueCreator, ValueFactors, EQ_VAULT_VERSION, PRODUCER_NAME,
};

/// eqv - On-device emotional-intelligence analytics
#[derive(Parser)]
#[command(name = "eqv")]
#[command(version = EQ_VAULT_VERSION)]
#[command(about = "Compute, analyze and privately share EQ metrics", long_about = None)]
struct Cli {
    /// Engine config file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute EQ metrics for a JSON array of signals
    Metrics {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        #[arg(long, default_value = "json")]
        output_format: OutputFormat,
    },

    /// Run signal batches through the local pipeline
    Analyze {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// json: one batch as a JSON array; ndjson: one batch per line, oldest first
        #[arg(long, default_value = "json")]
        input_format: InputFormat,

        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,

        /// Coaching style (overrides config)
        #[arg(long)]
        style: Option<StyleArg>,

        /// Load metrics history from file
        #[arg(long)]
        load_history: Option<PathBuf>,

        /// Save metrics history to file after processing
        #[arg(long)]
        save_history: Option<PathBuf>,
    },

    /// Price one pattern or a JSON array of patterns
    Price {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        #[arg(long, default_value = "0")]
        rarity: f64,

        #[arg(long, default_value = "0")]
        impact: f64,

        #[arg(long, default_value = "0")]
        insight: f64,
    },

    /// Aggregate a JSON array of contributions
    Aggregate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Confirm that every participant consented to aggregation
        #[arg(long)]
        consent: bool,

        /// k-anonymity floor (overrides config)
        #[arg(long)]
        minimum_participants: Option<usize>,
    },

    /// Diagnose configuration and crypto health
    Doctor {
        /// Check a saved history file
        #[arg(long)]
        history: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// JSON array of signals (a single batch)
    Json,
    /// One JSON array of signals per line
    Ndjson,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// JSON array of records
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

#[derive(Clone, Copy, ValueEnum)]
enum StyleArg {
    GentleGuide,
    DirectMentor,
    SocraticQuestioner,
    SupportiveCompanion,
}

impl From<StyleArg> for CoachingStyle {
    fn from(style: StyleArg) -> Self {
        match style {
            StyleArg::GentleGuide => CoachingStyle::GentleGuide,
            StyleArg::DirectMentor => CoachingStyle::DirectMentor,
            StyleArg::SocraticQuestioner => CoachingStyle::SocraticQuestioner,
            StyleArg::SupportiveCompanion => CoachingStyle::SupportiveCompanion,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PatternInput {
    Many(Vec<EqPattern>),
    One(EqPattern),
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

/// Log to stderr; filter from `EQV_LOG`, then `RUST_LOG`, else warnings only
fn init_logging() {
    let filter = EnvFilter::try_from_env("EQV_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn run(cli: Cli) -> Result<(), EqvCliError> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Metrics {
            input,
            output,
            output_format,
        } => cmd_metrics(&input, &output, &output_format),
        Commands::Analyze {
            input,
            output,
            input_format,
            output_format,
            style,
            load_history,
            save_history,
        } => {
            let mut config = config;
            if let Some(style) = style {
                config.coaching_style = style.into();
            }
            cmd_analyze(
                &config,
                &input,
                &output,
                &input_format,
                &output_format,
                load_history.as_deref(),
                save_history.as_deref(),
            )
        }
        Commands::Price {
            input,
            rarity,
            impact,
            insight,
        } => cmd_price(&config, &input, ValueFactors::new(rarity, impact, insight)),
        Commands::Aggregate {
            input,
            consent,
            minimum_participants,
        } => {
            let mut config = config;
            if let Some(minimum) = minimum_participants {
                config.minimum_participants = minimum;
            }
            cmd_aggregate(&config, &input, consent)
        }
        Commands::Doctor { history, json } => cmd_doctor(&config, history.as_deref(), json),
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, EqvCliError> {
    match path {
        Some(path) => Ok(EngineConfig::from_json(&fs::read_to_string(path)?)?),
        None => Ok(EngineConfig::default()),
    }
}

fn read_input(input: &Path) -> Result<String, EqvCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn write_output(output: &Path, data: &str) -> Result<(), EqvCliError> {
    if output.to_string_lossy() == "-" {
        print!("{data}");
    } else {
        fs::write(output, data)?;
    }
    Ok(())
}

fn format_output<T: Serialize>(records: &[T], format: &OutputFormat) -> Result<String, EqvCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut lines = String::new();
            for record in records {
                lines.push_str(&serde_json::to_string(record)?);
                lines.push('\n');
            }
            Ok(lines)
        }
        OutputFormat::Json => Ok(format!("{}\n", serde_json::to_string(records)?)),
        OutputFormat::JsonPretty => Ok(format!("{}\n", serde_json::to_string_pretty(records)?)),
    }
}

fn cmd_metrics(input: &Path, output: &Path, output_format: &OutputFormat) -> Result<(), EqvCliError> {
    let signals: Vec<EmotionalSignal> = serde_json::from_str(&read_input(input)?)?;
    if signals.is_empty() {
        return Err(EqvCliError::NoSignals);
    }

    let metrics = MetricsCalculator::calculate(&signals)?;
    let data = match output_format {
        OutputFormat::JsonPretty => format!("{}\n", serde_json::to_string_pretty(&metrics)?),
        _ => format!("{}\n", serde_json::to_string(&metrics)?),
    };
    write_output(output, &data)
}

fn cmd_analyze(
    config: &EngineConfig,
    input: &Path,
    output: &Path,
    input_format: &InputFormat,
    output_format: &OutputFormat,
    load_history: Option<&Path>,
    save_history: Option<&Path>,
) -> Result<(), EqvCliError> {
    let input_data = read_input(input)?;
    let batches: Vec<Vec<EmotionalSignal>> = match input_format {
        InputFormat::Json => vec![serde_json::from_str(&input_data)?],
        InputFormat::Ndjson => input_data
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(serde_json::from_str::<Vec<EmotionalSignal>>)
            .collect::<Result<_, _>>()?,
    };

    if batches.iter().all(|b| b.is_empty()) {
        return Err(EqvCliError::NoSignals);
    }

    let mut processor = EqProcessor::from_config(config)?;
    if let Some(path) = load_history {
        processor.load_history(&fs::read_to_string(path)?)?;
    }

    let analyses: Vec<EqAnalysis> = batches
        .iter()
        .filter(|b| !b.is_empty())
        .map(|batch| processor.process(batch))
        .collect::<Result<_, _>>()?;

    if let Some(path) = save_history {
        fs::write(path, processor.save_history()?)?;
    }

    write_output(output, &format_output(&analyses, output_format)?)
}

fn cmd_price(config: &EngineConfig, input: &Path, factors: ValueFactors) -> Result<(), EqvCliError> {
    let patterns = match serde_json::from_str(&read_input(input)?)? {
        PatternInput::Many(patterns) => patterns,
        PatternInput::One(pattern) => vec![pattern],
    };

    let creator = ValueCreator::from_config(config)?;
    let valuations: Vec<ValuationResult> = patterns
        .iter()
        .map(|p| creator.price(p, &factors))
        .collect::<Result<_, _>>()?;

    println!("{}", serde_json::to_string_pretty(&valuations)?);
    Ok(())
}

fn cmd_aggregate(config: &EngineConfig, input: &Path, consent: bool) -> Result<(), EqvCliError> {
    let contributions: Vec<Contribution> = serde_json::from_str(&read_input(input)?)?;
    let aggregation = AnonymousAggregator::from_config(config)?.create(&contributions, consent)?;
    println!("{}", serde_json::to_string_pretty(&aggregation)?);
    Ok(())
}

fn cmd_doctor(config: &EngineConfig, history: Option<&Path>, json: bool) -> Result<(), EqvCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck::ok("version", format!("EQ Vault version {EQ_VAULT_VERSION}")));

    checks.push(match config.validate() {
        Ok(()) => DoctorCheck::ok(
            "config",
            format!(
                "Config valid (history window {}, k-anonymity floor {})",
                config.history_window, config.minimum_participants
            ),
        ),
        Err(e) => DoctorCheck::error("config", e.to_string()),
    });

    checks.push(crypto_check(config));

    if let Some(path) = history {
        let check = if !path.exists() {
            DoctorCheck::warning("history", "History file does not exist".to_string())
        } else {
            match fs::read_to_string(path) {
                Ok(content) => match MetricsHistory::from_json(&content) {
                    Ok(history) => DoctorCheck::ok(
                        "history",
                        format!("History file valid ({} snapshots)", history.len()),
                    ),
                    Err(e) => DoctorCheck::error("history", format!("Invalid history: {e}")),
                },
                Err(e) => DoctorCheck::error("history", format!("Cannot read history file: {e}")),
            }
        };
        checks.push(check);
    }

    checks.push(if atty::is(atty::Stream::Stdin) {
        DoctorCheck::ok("stdin", "stdin is a TTY (interactive mode)".to_string())
    } else {
        DoctorCheck::ok("stdin", "stdin is a pipe (input ready)".to_string())
    });

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: EQ_VAULT_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("EQ Vault Doctor Report");
        println!("======================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    if report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error)) {
        Err(EqvCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

/// Derive a throwaway key and round-trip a message through it
fn crypto_check(config: &EngineConfig) -> DoctorCheck {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => return DoctorCheck::error("crypto", format!("Cannot start runtime: {e}")),
    };

    let result: Result<(), EqError> = runtime.block_on(async {
        let mut keys = KeyManager::from_config(config)?;
        keys.initialize("eqv-doctor", "eqv-doctor-device").await?;
        let blob = keys.encrypt(b"eqv doctor")?;
        if keys.decrypt(&blob)? != b"eqv doctor" {
            return Err(EqError::Crypto("round trip mismatch".into()));
        }
        Ok(())
    });

    match result {
        Ok(()) => DoctorCheck::ok(
            "crypto",
            format!(
                "Key derivation and AEAD round trip ok ({} iterations)",
                config.kdf_iterations
            ),
        ),
        Err(e) => DoctorCheck::error("crypto", e.to_string()),
    }
}

// Error types

#[derive(Debug)]
enum EqvCliError {
    Io(io::Error),
    Engine(EqError),
    Json(serde_json::Error),
    NoSignals,
    DoctorFailed,
}

impl From<io::Error> for EqvCliError {
    fn from(e: io::Error) -> Self {
        EqvCliError::Io(e)
    }
}

impl From<EqError> for EqvCliError {
    fn from(e: EqError) -> Self {
        EqvCliError::Engine(e)
    }
}

impl From<serde_json::Error> for EqvCliError {
    fn from(e: serde_json::Error) -> Self {
        EqvCliError::Json(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<EqvCliError> for CliError {
    fn from(e: EqvCliError) -> Self {
        match e {
            EqvCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            EqvCliError::Engine(e) => {
                let (code, hint) = match &e {
                    EqError::ConsentRequired(_) => (
                        "CONSENT_REQUIRED",
                        "Pass --consent only if every participant agreed",
                    ),
                    EqError::InsufficientParticipants { .. } => (
                        "INSUFFICIENT_PARTICIPANTS",
                        "Collect more contributions before aggregating",
                    ),
                    EqError::InvalidInput(_) => ("INVALID_INPUT", "Check the input values"),
                    EqError::Config(_) => ("CONFIG_ERROR", "Fix the config file or omit --config to use defaults"),
                    EqError::JsonError(_) => ("JSON_ERROR", "Check JSON syntax"),
                    _ => ("ENGINE_ERROR", "Re-run with EQV_LOG=debug for details"),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            EqvCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            EqvCliError::NoSignals => CliError {
                code: "NO_SIGNALS".to_string(),
                message: "No signals found in input".to_string(),
                hint: Some("Ensure input contains at least one signal".to_string()),
            },
            EqvCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Doctor types

#[derive(Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

impl DoctorCheck {
    fn ok(name: &str, message: String) -> Self {
        Self::with_status(name, CheckStatus::Ok, message)
    }

    fn warning(name: &str, message: String) -> Self {
        Self::with_status(name, CheckStatus::Warning, message)
    }

    fn error(name: &str, message: String) -> Self {
        Self::with_status(name, CheckStatus::Error, message)
    }

    fn with_status(name: &str, status: CheckStatus, message: String) -> Self {
        Self {
            name: name.to_string(),
            status,
            message,
        }
    }
}

#[derive(Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
