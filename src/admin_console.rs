use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Instrument};

use admin_console::app_system::{setup_tracing, AdminSystem, Route};
use admin_console::config::{parse_api_url, ConsoleConfig, DEFAULT_API_URL};
use admin_console::credentials::Credentials;
use admin_console::domain::Record;
use admin_console::error::ApiError;
use admin_console::screen::{render, DeleteOutcome, EntityScreen, SaveOutcome};

/// Exit status when the session has expired and `login` is required.
const EXIT_LOGIN_REQUIRED: u8 = 2;

/// Admin console - browse and edit the tables of the admin REST backend
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Backend root; requests go to {api_url}/v1
    #[arg(long, env = "API_URL", default_value = DEFAULT_API_URL)]
    api_url: String,

    /// Entity catalog (TOML) replacing the bundled one
    #[arg(long, env = "ADMIN_CATALOG")]
    catalog: Option<PathBuf>,

    /// Credentials file (default: ~/.admin-console/credentials.json)
    #[arg(long, env = "ADMIN_CREDENTIALS")]
    credentials: Option<PathBuf>,

    /// Enable JSON log format
    #[arg(long, env = "ADMIN_LOG_JSON", default_value = "false")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the entities of the catalog
    Entities,
    /// Show one page of an entity
    List {
        entity: String,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        page: Option<u32>,
        /// Filter the loaded page by case-insensitive substring
        #[arg(long)]
        search: Option<String>,
    },
    /// Show one record
    Get { entity: String, id: String },
    /// Create a record from field=value pairs
    Create { entity: String, fields: Vec<String> },
    /// Update a record with field=value pairs
    Update {
        entity: String,
        id: String,
        fields: Vec<String>,
    },
    /// Delete a record
    Delete { entity: String, id: String },
    /// Store session tokens
    Login {
        #[arg(long)]
        access_token: String,
        #[arg(long)]
        csrf_token: Option<String>,
        #[arg(long)]
        refresh_token: Option<String>,
    },
    /// Forget the stored session
    Logout,
}

impl Command {
    fn route(&self) -> Route {
        match self {
            Command::Entities => Route::Entities,
            Command::List { entity, .. }
            | Command::Get { entity, .. }
            | Command::Create { entity, .. }
            | Command::Update { entity, .. }
            | Command::Delete { entity, .. } => Route::Screen(entity.clone()),
            Command::Login { .. } | Command::Logout => Route::Login,
        }
    }
}

impl Args {
    /// Environment first, then the flags given on the command line.
    fn config(&self) -> Result<ConsoleConfig> {
        let mut config = ConsoleConfig::from_env()?;
        config.api_url = parse_api_url(&self.api_url)?;
        if let Some(catalog) = &self.catalog {
            config.catalog_path = Some(catalog.clone());
        }
        if let Some(credentials) = &self.credentials {
            config.credentials_path = credentials.clone();
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    setup_tracing(args.log_json);

    let config = args.config()?;
    let system = AdminSystem::from_config(config).context("failed to start admin console")?;

    let route = args.command.route();
    let span = tracing::info_span!("command", route = %route);
    let outcome = run(&system, args.command).instrument(span).await;
    system.shutdown().await?;

    match outcome {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) => match e.downcast_ref::<ApiError>() {
            Some(api_error) if route.clone().after_error(api_error) == Route::Login => {
                eprintln!("Session expired. Run `admin_console login --access-token ...` and try again.");
                Ok(ExitCode::from(EXIT_LOGIN_REQUIRED))
            }
            _ => Err(e),
        },
    }
}

async fn run(system: &AdminSystem, command: Command) -> Result<()> {
    match command {
        Command::Entities => {
            for descriptor in system.catalog().iter() {
                println!(
                    "{:<18} {:<20} {}",
                    descriptor.name, descriptor.label, descriptor.path
                );
            }
        }
        Command::List {
            entity,
            limit,
            page,
            search,
        } => {
            let mut screen = system.screen(&entity)?;
            if let Some(limit) = limit {
                screen.set_page_size(limit);
            }
            if let Some(page) = page {
                screen.query().set_page(page);
            }
            if let Some(search) = search {
                screen.set_search(search);
            }
            let state = screen.load().await?;
            print!(
                "{}",
                render::render_list(screen.query().descriptor(), &state, screen.search())
            );
        }
        Command::Get { entity, id } => {
            let query = system.query(&entity)?;
            let id = query.descriptor().parse_id(&id)?;
            let record = query.fetch_by_id(&id).await?;
            print_record(&record);
        }
        Command::Create { entity, fields } => {
            let mut screen = system.screen(&entity)?;
            fill_form(&mut screen, &fields)?;
            let created = save(&mut screen).await?;
            info!("Created");
            print_record(&created);
        }
        Command::Update { entity, id, fields } => {
            let mut screen = system.screen(&entity)?;
            let id = screen.query().descriptor().parse_id(&id)?;
            screen.edit(id).await?;
            fill_form(&mut screen, &fields)?;
            let updated = save(&mut screen).await?;
            print_record(&updated);
        }
        Command::Delete { entity, id } => {
            let mut screen = system.screen(&entity)?;
            let id = screen.query().descriptor().parse_id(&id)?;
            match screen.delete(&id).await {
                DeleteOutcome::Deleted => println!("Deleted {entity} {id}"),
                DeleteOutcome::Rejected(e) => return Err(e.into()),
            }
        }
        Command::Login {
            access_token,
            csrf_token,
            refresh_token,
        } => {
            system.login(&Credentials {
                access_token: Some(access_token),
                csrf_token,
                refresh_token,
            })?;
            println!("Logged in");
        }
        Command::Logout => {
            system.logout().await?;
            println!("Logged out");
        }
    }
    Ok(())
}

fn fill_form(screen: &mut EntityScreen, pairs: &[String]) -> Result<()> {
    for pair in pairs {
        let Some((field, value)) = pair.split_once('=') else {
            bail!("expected field=value, got {pair:?}");
        };
        screen.form_mut().set(field.trim(), value)?;
    }
    Ok(())
}

async fn save(screen: &mut EntityScreen) -> Result<Record> {
    match screen.save().await {
        SaveOutcome::Created(record) | SaveOutcome::Updated(record) => Ok(record),
        SaveOutcome::Invalid(e) => Err(anyhow!(e)),
        SaveOutcome::Rejected(e) => Err(e.into()),
    }
}

fn print_record(record: &Record) {
    for (field, value) in record.iter() {
        println!("{field}: {value}");
    }
}
