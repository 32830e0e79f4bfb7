use std::fs::File;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use clap::{Parser, Subcommand};
use ratatui::DefaultTerminal;
use tracing::{error, info};
use tracing_error::{ErrorLayer, SpanTrace};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod controller;
mod domain;
mod inputter;
mod model;
mod session;
mod table;
mod transfer;
mod ui;
mod worker;

use api::{ApiError, HttpRegistry, RegistryApi};
use controller::Controller;
use domain::{Message, RegConfig, RegError};
use model::{Model, Status};
use session::Session;
use ui::TableUI;
use worker::{Completion, Job, Worker};

const DEFAULT_TOKEN_FILE: &str = "~/.regtv_token";

/// Terminal client for the membership registry.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// TOML config file
    #[arg(short, long)]
    config: Option<String>,
    /// Base url of the registry api
    #[arg(short, long)]
    server: Option<String>,
    /// File the session token is kept in
    #[arg(long)]
    token_file: Option<String>,
    #[arg(long)]
    log_file: Option<String>,
    /// Members per page
    #[arg(long)]
    page_size: Option<usize>,
    /// Initial search query for the members table
    #[arg(long)]
    search: Option<String>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write all members to a CSV file
    Export { path: String },
    /// Upload members from a CSV file
    Import { path: String },
    /// Forget the stored session token
    Logout,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Err(e) => {
            error!("{e}\n{}", SpanTrace::capture());
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
        Ok(_) => ExitCode::SUCCESS,
    }
}

fn load_config(cli: &Cli) -> Result<RegConfig, RegError> {
    let mut config = match &cli.config {
        Some(path) => RegConfig::load(&transfer::expand_path(path)?)?,
        None => RegConfig::default(),
    };
    if let Some(server) = &cli.server {
        config = config.with_server(server.as_str());
    }
    if let Some(path) = &cli.token_file {
        config = config.with_token_file(Some(transfer::expand_path(path)?));
    }
    if let Some(path) = &cli.log_file {
        config = config.with_log_file(transfer::expand_path(path)?);
    }
    if let Some(page_size) = cli.page_size {
        config = config.with_page_size(page_size.max(1));
    }
    Ok(config)
}

/// The terminal belongs to the UI, so everything is logged to a file.
fn init_logging(config: &RegConfig) -> Result<(), RegError> {
    let file = File::create(&config.log_file)?;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false),
        )
        .with(ErrorLayer::default())
        .try_init()
        .map_err(|e| RegError::LoadingFailed(format!("can not initialize logging: {e}")))
}

fn open_session(config: &RegConfig) -> Result<Session, RegError> {
    let path = match &config.token_file {
        Some(path) => transfer::expand_path(&path.to_string_lossy())?,
        None => transfer::expand_path(DEFAULT_TOKEN_FILE)?,
    };
    Ok(Session::load(path)?)
}

fn run(cli: Cli) -> Result<(), RegError> {
    let config = load_config(&cli)?;
    init_logging(&config)?;
    info!("Starting regtv against {}", config.base_url());

    let session = open_session(&config)?;
    let api: Arc<dyn RegistryApi> = Arc::new(HttpRegistry::new(config.base_url(), session.clone())?);

    match cli.command {
        Some(command) => run_command(command, &config, &session, api.as_ref()),
        None => run_tui(&config, session, api, cli.search),
    }
}

fn run_command(
    command: Command,
    config: &RegConfig,
    session: &Session,
    api: &dyn RegistryApi,
) -> Result<(), RegError> {
    let job = match command {
        Command::Logout => {
            session.clear()?;
            println!("Logged out");
            return Ok(());
        }
        Command::Export { path } => Job::Export {
            path: transfer::expand_path(&path)?,
        },
        Command::Import { path } => Job::Import {
            path: transfer::expand_path(&path)?,
        },
    };
    if !session.is_authenticated() {
        return Err(ApiError::Unauthorized.into());
    }

    match worker::execute(api, config.routes, job) {
        Completion::Exported(result) => println!("Exported members to {}", result?.display()),
        Completion::Imported(result) => {
            let report = result?;
            println!("{}", report.message);
            for line in &report.errors {
                println!("  {line}");
            }
        }
        other => error!("Unexpected completion {other:?}"),
    }
    Ok(())
}

fn run_tui(
    config: &RegConfig,
    session: Session,
    api: Arc<dyn RegistryApi>,
    search: Option<String>,
) -> Result<(), RegError> {
    let mut model = Model::init(config, session);
    if let Some(query) = search {
        model = model.with_search(&query);
    }
    let mut ui = TableUI::new(config);
    let controller = Controller::new(config);
    let mut worker = Worker::new(api, config.routes);

    let mut terminal = ratatui::init();
    let result = event_loop(&mut terminal, &mut model, &mut ui, &controller, &mut worker);
    ratatui::restore();
    result
}

fn event_loop(
    terminal: &mut DefaultTerminal,
    model: &mut Model,
    ui: &mut TableUI,
    controller: &Controller,
    worker: &mut Worker,
) -> Result<(), RegError> {
    let size = terminal.size()?;
    model.update(Some(Message::Resize(size.width, size.height)))?;

    while model.status != Status::Quitting {
        for job in model.take_jobs() {
            worker.submit(job);
        }

        // Render the current view
        terminal.draw(|f| ui.draw(model, f))?;
        if let Some((kind, widths)) = ui.take_measurement() {
            model.freeze_columns(kind, &widths);
        }

        for completion in worker.poll() {
            model.update(Some(Message::Completed(completion)))?;
        }

        // Handle events and map to a Message
        let message = controller.handle_event(model)?;
        model.update(message)?;
    }

    info!("Quitting, {} requests still in flight", worker.in_flight());
    Ok(())
}
