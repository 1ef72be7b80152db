//! `sanad` - CLI for the sanad donor identity layer.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::debug;

use sanad::cli::{Cli, Command, ConfigCommand, FindCommand, OutputFormat};
use sanad::connectivity::{
    Connectivity, ConnectivityMonitor, ConnectivityOracle, StaticConnectivity, TcpProbe,
};
use sanad::profile::{is_valid_phone, validate_input, validate_update, ValidationError};
use sanad::session::{SessionContext, SessionError};
use sanad::{
    init_logging, Config, IdentityResolver, Profile, RestDirectory, SqliteIdentityStore,
    SyncOutcome,
};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    init_logging(cli.verbosity());

    let config = Config::load_from(cli.config.clone()).context("failed to load configuration")?;

    match cli.command {
        Command::Config(cmd) => handle_config(&config, cmd),
        command => {
            let probe = if cli.offline {
                None
            } else {
                Some(Arc::new(TcpProbe::new(
                    config.probe_address()?,
                    config.probe_timeout(),
                )?))
            };
            let context = build_context(&config, probe.clone())?;
            context.mount().await;
            run(&context, &config, probe, command).await
        }
    }
}

fn build_context(config: &Config, probe: Option<Arc<TcpProbe>>) -> anyhow::Result<SessionContext> {
    let store = Arc::new(
        SqliteIdentityStore::open(config.database_path())
            .context("failed to open identity store")?,
    );
    let directory = Arc::new(RestDirectory::from_config(config)?);
    let connectivity: Arc<dyn ConnectivityOracle> = match probe {
        Some(probe) => Arc::new(Connectivity::new(probe)),
        None => Arc::new(StaticConnectivity(false)),
    };

    Ok(SessionContext::new(IdentityResolver::new(
        connectivity,
        directory,
        store,
    )))
}

fn fail(err: &SessionError) -> ExitCode {
    debug!(error = %err, "Command failed");
    eprintln!("{}", err.user_message());
    if let SessionError::Auth(auth) = err {
        if auth.needs_registration() {
            eprintln!("Run `sanad register --help` to create a profile.");
        }
    }
    ExitCode::FAILURE
}

fn invalid(errors: &[ValidationError]) -> ExitCode {
    for e in errors {
        eprintln!("{}", e.user_message());
    }
    ExitCode::FAILURE
}

fn print_profile(profile: &Profile, is_local_only: bool) {
    println!("Name:          {}", profile.name);
    println!("Phone:         {}", profile.phone);
    println!("Blood type:    {}", profile.blood_type);
    println!("Location:      {}, {}", profile.city, profile.governorate);
    println!("Contact:       {}", profile.contact_preference);
    if let (Some(from), Some(to)) = (&profile.morning_from, &profile.morning_to) {
        println!("Morning:       {from} - {to}");
    }
    if let (Some(from), Some(to)) = (&profile.evening_from, &profile.evening_to) {
        println!("Evening:       {from} - {to}");
    }
    println!(
        "Available:     {}",
        if profile.is_active { "yes" } else { "no" }
    );
    if let Some(date) = profile.last_donation_date {
        println!("Last donation: {date}");
    }
    if let Some(notes) = &profile.notes {
        println!("Notes:         {notes}");
    }
    if profile.is_demo() {
        println!("(demo account)");
    } else if is_local_only {
        println!("(saved on this device only; run `sanad sync` when online)");
    }
}

async fn run(
    context: &SessionContext,
    config: &Config,
    probe: Option<Arc<TcpProbe>>,
    command: Command,
) -> anyhow::Result<ExitCode> {
    match command {
        Command::Login(cmd) => {
            let phone = cmd.phone.unwrap_or_default();
            if !cmd.demo && !is_valid_phone(&phone) {
                return Ok(invalid(&[ValidationError::InvalidPhone(phone)]));
            }
            match context.sign_in(&phone, cmd.demo).await {
                Ok(outcome) => print_profile(&outcome.profile, outcome.is_local_only),
                Err(e) => return Ok(fail(&e)),
            }
        }
        Command::Register(cmd) => {
            let input = cmd.to_input();
            if let Err(errors) = validate_input(&input) {
                return Ok(invalid(&errors));
            }
            match context.create_profile(input).await {
                Ok(outcome) => {
                    println!("Profile created.");
                    print_profile(&outcome.profile, outcome.is_local_only);
                }
                Err(e) => return Ok(fail(&e)),
            }
        }
        Command::Update(cmd) => {
            let updates = cmd.to_update();
            if updates.is_empty() {
                eprintln!("Nothing to update. See `sanad update --help`.");
                return Ok(ExitCode::FAILURE);
            }
            if let Err(errors) = validate_update(&updates) {
                return Ok(invalid(&errors));
            }
            match context.update_profile(&updates).await {
                Ok(outcome) => print_profile(&outcome.profile, outcome.is_local_only),
                Err(e) => return Ok(fail(&e)),
            }
        }
        Command::Logout => match context.sign_out().await {
            Ok(()) => println!("Signed out."),
            Err(e) => return Ok(fail(&e)),
        },
        Command::Whoami { json } => handle_whoami(context, config, probe, json).await?,
        Command::Guest { exit } => {
            let result = if exit {
                context.exit_guest_mode().await
            } else {
                context.continue_as_guest().await
            };
            match result {
                Ok(()) if exit => println!("Left guest mode."),
                Ok(()) => println!("Browsing as guest."),
                Err(e) => return Ok(fail(&e)),
            }
        }
        Command::Sync => match context.sync().await {
            Ok(SyncOutcome::UpToDate(_)) => println!("Nothing to sync."),
            Ok(SyncOutcome::Synced(outcome)) => {
                println!("Profile synced.");
                print_profile(&outcome.profile, false);
            }
            Err(e) => return Ok(fail(&e)),
        },
        Command::Delete { yes } => {
            if !yes {
                println!("This deletes your donor profile and signs you out.");
                println!("Use --yes to confirm.");
                return Ok(ExitCode::SUCCESS);
            }
            match context.delete_profile().await {
                Ok(()) => println!("Profile deleted."),
                Err(e) => return Ok(fail(&e)),
            }
        }
        Command::Availability(cmd) => {
            match context
                .update_availability(cmd.state.is_active(), cmd.last_donation_change())
                .await
            {
                Ok(outcome) => print_profile(&outcome.profile, outcome.is_local_only),
                Err(e) => return Ok(fail(&e)),
            }
        }
        Command::Find(cmd) => match context.search_donors(&cmd.filters()).await {
            Ok(donors) => print_donors(&cmd, &donors)?,
            Err(e) => return Ok(fail(&e)),
        },
        Command::Stats { json } => match context.donor_stats().await {
            Ok(stats) if json => println!("{}", serde_json::to_string_pretty(&stats)?),
            Ok(stats) => {
                println!("Registered donors: {}", stats.total_donors);
                println!("Available donors:  {}", stats.available_donors);
            }
            Err(e) => return Ok(fail(&e)),
        },
        Command::Reset { yes } => {
            if !yes {
                println!("This removes all sanad data stored on this device.");
                println!("Use --yes to confirm.");
                return Ok(ExitCode::SUCCESS);
            }
            match context.reset_local_data().await {
                Ok(()) => println!("Local data removed."),
                Err(e) => return Ok(fail(&e)),
            }
        }
        Command::Config(cmd) => return handle_config(config, cmd),
    }
    Ok(ExitCode::SUCCESS)
}

async fn handle_whoami(
    context: &SessionContext,
    config: &Config,
    probe: Option<Arc<TcpProbe>>,
    json: bool,
) -> anyhow::Result<()> {
    let session = context.snapshot();

    let reachable = match probe {
        Some(probe) => {
            let monitor = ConnectivityMonitor::spawn(probe, config.poll_interval());
            let mut rx = monitor.subscribe();
            let wait = config.probe_timeout() * 2;
            let changed = tokio::time::timeout(wait, rx.wait_for(Option::is_some)).await;
            changed.ok().and_then(|seen| seen.ok().and_then(|value| *value))
        }
        None => Some(false),
    };

    if json {
        let status = serde_json::json!({
            "profile": session.profile,
            "is_guest": session.is_guest,
            "needs_login": session.needs_login(),
            "directory_reachable": reachable,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    match &session.profile {
        Some(profile) => {
            let pending = context.resolver().store().has_pending_changes().await?;
            print_profile(profile, profile.is_local_only() || pending);
        }
        None if session.is_guest => println!("Browsing as guest."),
        None => println!("Not signed in. Run `sanad login <phone>` or `sanad register`."),
    }
    let state = match reachable {
        Some(true) => "reachable",
        Some(false) => "unreachable",
        None => "unknown",
    };
    println!("Directory:     {state}");
    Ok(())
}

fn print_donors(cmd: &FindCommand, donors: &[Profile]) -> anyhow::Result<()> {
    if cmd.format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(donors)?);
        return Ok(());
    }
    if donors.is_empty() {
        println!("No donors found.");
        return Ok(());
    }

    println!(
        "{:<24} {:<5} {:<16} {:<16} {:<12} {}",
        "NAME", "TYPE", "GOVERNORATE", "CITY", "PHONE", "CONTACT"
    );
    for donor in donors {
        println!(
            "{:<24} {:<5} {:<16} {:<16} {:<12} {}",
            donor.name,
            donor.blood_type.as_str(),
            donor.governorate,
            donor.city,
            donor.phone,
            donor.contact_preference
        );
    }
    println!();
    println!("{} donor(s)", donors.len());
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<ExitCode> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
                println!();
                println!("[Directory]");
                println!("  URL:                {}", config.directory.url);
                println!("  Table:              {}", config.directory.table);
                println!(
                    "  API key:            {}",
                    if config.directory.anon_key.is_empty() {
                        "(not set)"
                    } else {
                        "(set)"
                    }
                );
                println!(
                    "  Request timeout:    {}s",
                    config.directory.request_timeout_secs
                );
                println!();
                println!("[Connectivity]");
                println!("  Probe address:      {}", config.probe_address()?);
                println!(
                    "  Probe timeout:      {}ms",
                    config.connectivity.probe_timeout_ms
                );
                println!(
                    "  Poll interval:      {}ms",
                    config.connectivity.poll_interval_ms
                );
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => {
                    println!("Configuration error: {e}");
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}
