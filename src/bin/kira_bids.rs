use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use directories::BaseDirs;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_bids::app::{App, FetchOptions};
use kira_bids::archive::{Login, XnatHttpClient};
use kira_bids::config::{ConfigLoader, ResolvedConfig};
use kira_bids::convert::Dcm2niixConverter;
use kira_bids::error::KiraError;
use kira_bids::output::{JsonOutput, LogSink, OutputMode};
use kira_bids::pattern::{Decomposition, decompose};
use kira_bids::report::RunReport;
use kira_bids::session::SessionMode;
use kira_bids::store::Layout;

#[derive(Parser)]
#[command(name = "kira-bids")]
#[command(about = "Download XNAT scans and store them in a BIDS layout")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Fetch and convert every scan named by a batch specification")]
    Run(RunArgs),
    #[command(about = "Resolve destination names without fetching or converting")]
    Plan(RunArgs),
    #[command(about = "Show how a scan label decomposes into BIDS components")]
    Name(NameArgs),
}

#[derive(Args, Clone)]
struct RunArgs {
    #[arg(short = 'i', long = "input-json", help = "JSON batch specification")]
    input_json: String,

    #[arg(short = 'c', long = "config", help = "Login file with server, user and password")]
    login: Option<PathBuf>,

    #[arg(long)]
    server: Option<String>,

    #[arg(short = 'b', long, help = "Sessions are stored as sub-<label>_ses-<label>")]
    bids: bool,

    #[arg(long)]
    overwrite: bool,

    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct NameArgs {
    label: String,
}

fn main() -> ExitCode {
    match run() {
        Ok(report) => {
            if report.as_ref().map(RunReport::has_failures).unwrap_or(false) {
                return ExitCode::from(3);
            }
            ExitCode::SUCCESS
        }
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(kira) = report.downcast_ref::<KiraError>() {
                return ExitCode::from(map_exit_code(kira));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &KiraError) -> u8 {
    if error.is_config() {
        return 2;
    }
    match error {
        KiraError::ArchiveHttp(_)
        | KiraError::ArchiveStatus { .. }
        | KiraError::TransientFetch(_)
        | KiraError::MissingTool(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<Option<RunReport>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    match cli.command {
        Commands::Run(args) => run_batch(args, false, output_mode).map(Some),
        Commands::Plan(args) => run_batch(args, true, output_mode).map(Some),
        Commands::Name(args) => {
            print_decomposition(&args.label);
            Ok(None)
        }
    }
}

fn run_batch(args: RunArgs, plan: bool, output_mode: OutputMode) -> miette::Result<RunReport> {
    let mut config = ConfigLoader::resolve(&args.input_json)?;
    apply_overrides(&mut config, &args);

    let login = load_login(&args)?;
    let archive = XnatHttpClient::new(login)?;
    let converter = Dcm2niixConverter::new();
    if let Some(version) = converter.version() {
        tracing::debug!("using dcm2niix {version}");
    }

    let layout = Layout::new(config.destination.clone());
    let app = App::new(layout, archive, converter);
    let options = FetchOptions {
        force: config.overwrite,
        dry_run: plan || args.dry_run,
    };

    let report = match output_mode {
        OutputMode::Interactive => app.run(&config, options, &LogSink),
        OutputMode::NonInteractive => app.run(&config, options, &JsonOutput),
    }?;

    if !options.dry_run {
        let bytes = serde_json::to_vec_pretty(&report).into_diagnostic()?;
        Layout::write_bytes_atomic(&app.layout().report_path(), &bytes)?;
    }

    match output_mode {
        OutputMode::Interactive => print_summary(&report),
        OutputMode::NonInteractive => JsonOutput::print_report(&report).into_diagnostic()?,
    }
    Ok(report)
}

fn apply_overrides(config: &mut ResolvedConfig, args: &RunArgs) {
    if args.overwrite {
        config.overwrite = true;
    }
    if args.bids {
        config.session_mode = SessionMode::Direct;
    }
}

fn load_login(args: &RunArgs) -> Result<Login, KiraError> {
    let path = args.login.clone().or_else(default_login_path);
    let mut login = match path {
        Some(path) if args.login.is_some() || path.exists() => Login::load(&path)?,
        _ => Login::default(),
    };
    if let Some(server) = &args.server {
        login.server = Some(server.clone());
    }
    Ok(login)
}

fn default_login_path() -> Option<PathBuf> {
    BaseDirs::new().map(|dirs| dirs.config_dir().join("kira-bids").join("login.json"))
}

fn print_decomposition(label: &str) {
    match decompose(label) {
        Decomposition::Valid(spec) => {
            println!("modality: {}", spec.modality);
            println!("suffix:   {}", spec.suffix_label());
            for entity in spec.entities() {
                println!("entity:   {entity}");
            }
        }
        Decomposition::NoMatch(reason) => {
            println!("not expressible in target scheme: {reason}");
        }
    }
}

fn print_summary(report: &RunReport) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";

    println!("{cyan}KIRA-BIDS summary{reset}");
    for (kind, count) in report.counts() {
        println!("{cyan}  {kind}: {count}{reset}");
    }

    for record in &report.records {
        let color = if record.outcome.is_failure() {
            red
        } else if matches!(record.outcome, kira_bids::report::ScanOutcome::Skipped(_)) {
            yellow
        } else {
            green
        };
        println!(
            "{color}{} {} scan {} ({}): {}{reset}",
            record.subject,
            record.session,
            record.scan_id,
            record.scan_label,
            record.outcome.kind()
        );
        if let kira_bids::report::ScanOutcome::Skipped(reason) = &record.outcome {
            println!("{color}   reason: {reason}{reset}");
        }
        if let Some(path) = &record.destination {
            println!("{color}   -> {path}{reset}");
        }
    }

    if !report.warnings.is_empty() {
        println!("{yellow}Warnings: {}{reset}", report.warnings.len());
        for warning in &report.warnings {
            let subject = warning.subject.as_deref().unwrap_or("-");
            println!("{yellow}  [{subject}] {}{reset}", warning.message);
        }
    }

    let failures: Vec<_> = report.failures().collect();
    if !failures.is_empty() {
        println!("{red}Failed scans: {}{reset}", failures.len());
    }
}
