use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use console::Emoji;
use log::{debug, LevelFilter};
use rml::analyze::{self, AnalyzeRequest};
use rml::auth::{self, CredentialStore, DeviceFlow, TerminalPrompt};
use rml::client::{self, ApiClient};
use rml::config::Settings;
use rml::error::{self, AuthFailure, Error, Result};
use rml::git::Repo;
use rml::render::{Format, Renderer};
use rml::retry::{Sleeper, TokioSleeper};
use rml::workflow::{LogReporter, ProgressReporter, Reporter};
use tokio::sync::Notify;

const ISSUES_URL: &str = "https://github.com/Recurse-ML/rml/issues/new";

#[derive(Parser, Debug)]
#[clap(author, version, about = "Find bugs in code. Analyzes changes between two git states for bugs.")]
struct Cli {
  #[clap(short, long, global = true, help = "Enables verbose logging")]
  verbose: bool,

  #[clap(subcommand)]
  command: Command
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Analyze changes between two git states for bugs
  Analyze(AnalyzeArgs),

  /// Authentication commands
  Auth {
    #[clap(subcommand)]
    command: AuthCommand
  }
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
  /// Files to analyze. Defaults to every file changed since --from
  targets: Vec<String>,

  #[clap(long = "from", default_value = "HEAD", value_name = "GIT_REF", help = "Git reference to compare FROM (older state)")]
  from_ref: String,

  #[clap(long = "to", value_name = "GIT_REF", help = "Git reference to compare TO (newer state). Default: working directory")]
  to_ref: Option<String>,

  #[clap(long, help = "Output results in markdown")]
  markdown: bool
}

#[derive(Subcommand, Debug)]
enum AuthCommand {
  /// Authenticate with GitHub
  Login,
  /// Clear authentication credentials
  Logout,
  /// Show authentication status
  Status
}

fn init_logging(settings: &Settings, verbose: bool) {
  let level = match verbose {
    true => LevelFilter::Debug,
    false => settings.log_level.parse().unwrap_or(LevelFilter::Warn)
  };

  env_logger::builder()
    .filter_level(level)
    .format_target(false)
    .format_timestamp(None)
    .init();
  debug!("Log level: {level}");
}

#[tokio::main]
async fn main() -> ExitCode {
  let cli = Cli::parse();

  let cancelled = Arc::new(Notify::new());
  let on_interrupt = cancelled.clone();
  if let Err(err) = ctrlc::set_handler(move || on_interrupt.notify_one()) {
    eprintln!("Failed to install Ctrl-C handler: {err}");
  }

  let settings = match Settings::load() {
    Ok(settings) => settings,
    Err(err) => {
      eprintln!("{} {}", "Failed to load settings:".red(), err);
      return ExitCode::FAILURE;
    }
  };
  init_logging(&settings, cli.verbose);

  // Dropping the run future on Ctrl-C removes the analysis working directory
  tokio::select! {
    result = run(cli.command, &settings) => match result {
      Ok(()) => ExitCode::SUCCESS,
      Err(err) => {
        report(&err);
        ExitCode::FAILURE
      }
    },
    _ = cancelled.notified() => {
      eprintln!("\n{}", "Cancelled".yellow());
      ExitCode::FAILURE
    }
  }
}

async fn run(command: Command, settings: &Settings) -> Result<()> {
  let http = client::http_client(settings)?;
  let sleeper: Arc<dyn Sleeper> = Arc::new(TokioSleeper);
  let store = CredentialStore::new(&settings.credentials_file);
  let flow = DeviceFlow::new(settings, http.clone(), sleeper.clone(), Box::new(TerminalPrompt));

  match command {
    Command::Auth { command: AuthCommand::Login } => {
      auth::login(&flow, &store).await?;
      println!("{} Authentication successful", Emoji("✅", ""));
    },
    Command::Auth { command: AuthCommand::Logout } => {
      auth::logout(&store)?;
      println!("{} Logged out successfully", Emoji("✅", ""));
    },
    Command::Auth { command: AuthCommand::Status } => {
      match auth::status(&store)? {
        true => println!("{} Authenticated", Emoji("✅", "")),
        false => println!("{} Not authenticated", Emoji("❌", ""))
      }
    },
    Command::Analyze(args) => {
      let credentials = auth::require_auth(settings, &store, &flow).await?;
      let client = Arc::new(ApiClient::new(settings, http, credentials, sleeper)?);
      let cwd = std::env::current_dir()?;

      let reporter: Box<dyn Reporter> = match args.markdown {
        true => Box::new(LogReporter),
        false => Box::new(ProgressReporter::new()?)
      };

      let request = AnalyzeRequest {
        repo_path:         cwd.clone(),
        targets:           args.targets,
        from_ref:          args.from_ref,
        to_ref:            args.to_ref,
        max_archive_bytes: settings.max_archive_bytes,
        scratch_dir:       None
      };

      let Some(comments) = analyze::analyze(request, client, reporter).await? else {
        return Ok(());
      };

      let root = Repo::discover(&cwd)?.root().to_path_buf();
      let format = match args.markdown {
        true => Format::Markdown,
        false => Format::Terminal
      };

      let renderer = Renderer::new(format, settings.context_window, root);
      renderer.render(&comments, &mut std::io::stdout().lock())?;
    }
  }

  Ok(())
}

fn report(err: &Error) {
  let plan_required = err.http_status() == Some(402) || matches!(err, Error::AuthFailed(AuthFailure::PlanRequired));

  if plan_required {
    eprintln!("{} {}", Emoji("💳", ""), "Subscription Required".bold().yellow());
    eprintln!("To analyze your code with rml, you need an active subscription.");
    eprintln!("Please purchase a plan to continue.");
  } else if error::is_auth_error(err) {
    let message = match err.http_status() {
      Some(401) => "Authentication failed. Please run `rml auth login` again.".to_string(),
      _ => err.to_string()
    };
    eprintln!("{} {}", Emoji("❌", ""), message.red());
  } else if err.is_contract_violation() {
    eprintln!("{}", err.to_string().red());
    eprintln!("The server response did not match what rml expects. Please submit an issue on {ISSUES_URL} with the error message and the command you ran.");
  } else {
    eprintln!("{} {}", "An error occurred:".red(), err);
    eprintln!("Please submit an issue on {ISSUES_URL} with the error message and the command you ran.");
  }
}
