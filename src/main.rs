use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{debug, info, warn};
use serde_json::Value;
use std::io::{self, Write};
use std::sync::Arc;
use tabled::{Table, Tabled};

use tnse::config::{self, Config, ConfigTokenSink};
use tnse::constants::DEFAULT_REGION;
use tnse::{region, RegionInfo, Session, TnseClient};

#[derive(Parser)]
#[command(name = "tnse")]
#[command(about = "A CLI for the TNS-Energo customer account API")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    conn: ConnectionArgs,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ConnectionArgs {
    /// Email for the TNS-Energo account
    #[arg(long, env = "TNSE_EMAIL", global = true)]
    email: Option<String>,

    /// Password for the TNS-Energo account
    #[arg(long, env = "TNSE_PASSWORD", global = true, hide_env_values = true)]
    password: Option<String>,

    /// Region code, e.g. rostov, nn or penza
    #[arg(long, env = "TNSE_REGION", global = true)]
    region: Option<String>,

    /// Override the API host (for testing against a local server)
    #[arg(long, env = "TNSE_BASE_URL", global = true, hide = true)]
    base_url: Option<String>,
}

impl ConnectionArgs {
    fn base_url_for(&self, region: &str) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| region::base_url(region))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Login and store the session for future use (email and password will be prompted if not provided)
    Login,
    /// Log out and remove the stored session
    Logout,
    /// List the regions served by the API
    Regions,
    /// Check whether this client version is still supported
    VersionCheck,
    /// Show the current user
    User,
    /// List the accounts linked to the user
    Accounts,
    /// Show account details by ID
    AccountInfo { id: u64 },
    /// Show the meters of an account
    Counters { account: String },
    /// Show the balance of an account
    Balance { account: String },
    /// Show the reading history of a meter
    Readings { counter_id: String, account: String },
    /// Show payments, readings and invoices for a month
    History {
        account: String,
        year: i32,
        month: u32,
    },
    /// List the invoices of a year
    Invoices { account: String, year: i32 },
    /// Submit meter readings
    Send {
        account: String,
        /// Row ID from the counters response
        row_id: String,
        /// Reading values, one per tariff zone (T1 T2 ...)
        #[arg(required = true)]
        readings: Vec<String>,
        /// Do not ask for confirmation
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Tabled)]
struct RegionRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Code")]
    code: String,
    #[tabled(rename = "Name")]
    name: String,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(err) = run(cli).await {
        match err.downcast_ref::<tnse::Error>() {
            Some(tnse::Error::Http(e)) => eprintln!("Error: Connection failed: {}", e),
            Some(e) => eprintln!("Error: {}", e),
            None => eprintln!("Error: {:#}", err),
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let client = reqwest::Client::new();
    let conn = &cli.conn;

    match cli.command {
        Commands::Regions => {
            print_regions(&client, &conn.base_url_for(DEFAULT_REGION)).await?;
            Ok(())
        }
        Commands::VersionCheck => {
            let region = conn.region.as_deref().unwrap_or(DEFAULT_REGION);
            let data = tnse::check_version(&client, &conn.base_url_for(region), region).await?;
            print_json(&data)
        }
        Commands::Login => login(conn, client).await,
        Commands::Logout => logout(conn, client).await,
        command => {
            let api = TnseClient::new(restore_session(conn, client)?);
            run_api_command(&api, command).await
        }
    }
}

async fn run_api_command(api: &TnseClient<Session>, command: Commands) -> Result<()> {
    let result = match command {
        Commands::User => api.user_info().await?,
        Commands::Accounts => api.accounts().await?,
        Commands::AccountInfo { id } => api.account_info(id).await?,
        Commands::Counters { account } => api.counters(&account).await?,
        Commands::Balance { account } => api.balance(&account).await?,
        Commands::Readings {
            counter_id,
            account,
        } => api.counter_readings(&counter_id, &account).await?,
        Commands::History {
            account,
            year,
            month,
        } => api.history(&account, year, month).await?,
        Commands::Invoices { account, year } => api.invoices(&account, year).await?,
        Commands::Send {
            account,
            row_id,
            readings,
            yes,
        } => {
            println!(
                "Sending readings for account {}, row {}: {}",
                account,
                row_id,
                readings.join(", ")
            );
            if !yes && !confirm("Confirm? (y/n): ")? {
                println!("Cancelled.");
                return Ok(());
            }
            let result = api.send_readings(&account, &row_id, &readings).await?;
            println!("Readings sent successfully.");
            result
        }
        Commands::Login | Commands::Logout | Commands::Regions | Commands::VersionCheck => {
            return Err(anyhow::anyhow!("Command does not use an account session"))
        }
    };

    print_json(&result)
}

/// Build a session from the stored config and/or command-line credentials.
fn restore_session(cli: &ConnectionArgs, client: reqwest::Client) -> Result<Session> {
    let path = config::config_path()?;
    let stored = if path.exists() {
        Some(config::load_config_from(&path)?)
    } else {
        None
    };

    let has_credentials = cli.email.is_some() && cli.password.is_some();
    if stored.is_none() && !has_credentials {
        return Err(anyhow::anyhow!("Not logged in. Run 'tnse login' first."));
    }

    let region = cli
        .region
        .clone()
        .or_else(|| stored.as_ref().map(|c| c.region.clone()))
        .unwrap_or_else(|| DEFAULT_REGION.to_string());

    let mut builder = Session::builder(client, region.clone());
    if let Some(url) = &cli.base_url {
        builder = builder.base_url(url.clone());
    }
    if let (Some(email), Some(password)) = (&cli.email, &cli.password) {
        builder = builder.credentials(email.clone(), password.clone());
    }
    if let Some(config) = stored {
        debug!("Restoring session for region {}", config.region);
        builder = builder
            .tokens(config.tokens)
            .callback(Arc::new(ConfigTokenSink::new(path, config.email, region)));
    }

    Ok(builder.build())
}

async fn login(cli: &ConnectionArgs, client: reqwest::Client) -> Result<()> {
    let region = match &cli.region {
        Some(region) => region.clone(),
        None => select_region(&client, &cli.base_url_for(DEFAULT_REGION)).await?,
    };
    let email = match &cli.email {
        Some(email) => email.clone(),
        None => prompt("Email: ")?,
    };
    let password = match &cli.password {
        Some(password) => password.clone(),
        None => rpassword::prompt_password("Password: ").context("Failed to read password")?,
    };

    let mut builder = Session::builder(client, region.clone()).credentials(email.clone(), password);
    if let Some(url) = &cli.base_url {
        builder = builder.base_url(url.clone());
    }
    let session = builder.build();

    println!("Logging in as {} (region: {})...", email, region);
    let tokens = session.login().await?;

    config::save_config(&Config {
        email: Some(email),
        region,
        tokens,
    })?;
    println!("Login successful.");
    Ok(())
}

async fn logout(cli: &ConnectionArgs, client: reqwest::Client) -> Result<()> {
    let path = config::config_path()?;
    if path.exists() {
        match restore_session(cli, client) {
            Ok(session) => {
                if let Err(e) = session.logout().await {
                    warn!("Server-side logout failed: {}", e);
                }
            }
            Err(e) => warn!("Could not restore session: {:#}", e),
        }
    }

    config::clear_config_at(&path)?;
    println!("Logged out successfully.");
    Ok(())
}

async fn print_regions(client: &reqwest::Client, base_url: &str) -> Result<Vec<RegionInfo>> {
    info!("Fetching region list...");
    let regions = tnse::get_regions(client, base_url).await?;

    let rows: Vec<RegionRow> = regions
        .iter()
        .enumerate()
        .map(|(i, r)| RegionRow {
            index: i + 1,
            code: r.code.clone(),
            name: r.name.clone(),
        })
        .collect();
    println!("{}", Table::new(&rows));
    Ok(regions)
}

/// Show the region list and let the user pick one.
async fn select_region(client: &reqwest::Client, base_url: &str) -> Result<String> {
    let regions = print_regions(client, base_url).await?;
    if regions.is_empty() {
        return Err(anyhow::anyhow!("No regions available"));
    }

    loop {
        let answer = prompt("\nRegion number: ")?;
        match answer.parse::<usize>() {
            Ok(n) if (1..=regions.len()).contains(&n) => return Ok(regions[n - 1].code.clone()),
            Ok(_) => println!("Enter a number from 1 to {}", regions.len()),
            Err(_) => println!("Enter a valid number"),
        }
    }
}

fn prompt(message: &str) -> Result<String> {
    print!("{}", message);
    io::stdout().flush()?;

    let mut line = String::new();
    if io::stdin().read_line(&mut line)? == 0 {
        return Err(anyhow::anyhow!("No input provided"));
    }
    Ok(line.trim().to_string())
}

fn confirm(message: &str) -> Result<bool> {
    Ok(prompt(message)?.eq_ignore_ascii_case("y"))
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
