use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use vchat_core::ClientConfig;
use vchat_services::{ChatSession, Role, SendOutcome, Services, SwitchCommand};

#[derive(Parser)]
#[command(name = "vchat")]
#[command(about = "Chat with models served by a vchat gateway", long_about = None)]
struct Cli {
    /// JSON config file (defaults plus VCHAT_* environment overrides otherwise)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the serving profile and backend status
    Status {
        /// Print the raw catalog as JSON
        #[arg(long)]
        json: bool,
    },

    /// List model profiles with hardware compatibility
    Profiles,

    /// Profiles the gateway recommends for its hardware
    Recommend,

    /// Ask the gateway to re-read its profile definitions
    Reload,

    /// Switch the backend to another profile
    Switch {
        profile: String,

        /// Return once the switch is accepted instead of waiting for it
        #[arg(long)]
        no_wait: bool,
    },

    /// Send one prompt and print the reply
    Ask {
        prompt: String,

        #[arg(short, long)]
        profile: Option<String>,

        #[arg(short, long)]
        stream: bool,
    },

    /// Interactive chat session
    Chat {
        #[arg(short, long)]
        profile: Option<String>,

        #[arg(short, long)]
        stream: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::from_env()?,
    };
    let services = Services::new(config)?;
    debug!(api_base = services.gateway.api_base(), "Gateway configured");

    match cli.command {
        Some(Commands::Status { json }) => cmd_status(&services, json).await?,
        Some(Commands::Profiles) => cmd_profiles(&services).await?,
        Some(Commands::Recommend) => cmd_recommend(&services).await?,
        Some(Commands::Reload) => cmd_reload(&services).await?,
        Some(Commands::Switch { profile, no_wait }) => {
            cmd_switch(&services, &profile, no_wait).await?
        }
        Some(Commands::Ask {
            prompt,
            profile,
            stream,
        }) => cmd_ask(&services, &prompt, profile, stream).await?,
        Some(Commands::Chat { profile, stream }) => run_chat(&services, profile, stream).await?,
        None => run_chat(&services, None, services.config.generation.stream).await?,
    }

    Ok(())
}

async fn cmd_status(services: &Services, json: bool) -> Result<()> {
    let catalog = services.switcher.refresh().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(catalog.as_ref())?);
        return Ok(());
    }

    println!();
    println!("  Gateway:  {}", services.gateway.api_base());
    println!(
        "  Profile:  {}",
        catalog.current_profile.as_deref().unwrap_or("(none)")
    );
    if let Some(profile) = catalog.current() {
        println!("  Model:    {}", profile.model_id);
    }
    println!("  Status:   {}", catalog.status.as_str());
    if let Some(message) = &catalog.message {
        println!("  Message:  {}", message);
    }
    if let Some(hw) = &catalog.hardware_info {
        println!(
            "  GPUs:     {} ({:.1}GB free of {:.1}GB)",
            hw.gpu_count, hw.available_vram_gb, hw.total_vram_gb
        );
    }
    println!();
    Ok(())
}

async fn cmd_profiles(services: &Services) -> Result<()> {
    let listing = services.gateway.profiles().await?;
    // Hardware info only comes with the status endpoint
    let hardware = match services.switcher.refresh().await {
        Ok(catalog) => catalog.hardware_info.clone(),
        Err(_) => None,
    };

    if listing.profiles.is_empty() {
        println!("No profiles configured.");
        return Ok(());
    }

    println!();
    println!("  {:<3} {:<20} {:<45} {:>8}  {}", "", "ID", "MODEL", "CONTEXT", "HARDWARE");
    println!("  {}", "-".repeat(95));
    for (id, profile) in &listing.profiles {
        let marker = if listing.current_profile.as_deref() == Some(id.as_str()) {
            "*"
        } else {
            ""
        };
        let fit = match &hardware {
            Some(hw) => profile.check_compatibility(hw).message,
            None => "unknown".to_string(),
        };
        println!(
            "  {:<3} {:<20} {:<45} {:>8}  {}",
            marker, id, profile.model_id, profile.max_model_len, fit
        );
    }
    println!();
    Ok(())
}

async fn cmd_recommend(services: &Services) -> Result<()> {
    let recs = services.gateway.hardware_recommendations().await?;

    println!();
    if let Some(hw) = &recs.current_hardware {
        println!(
            "  GPUs: {} ({:.1}GB free of {:.1}GB)",
            hw.gpu_count, hw.available_vram_gb, hw.total_vram_gb
        );
        println!();
    }

    if recs.compatible_profiles.is_empty() && recs.incompatible_profiles.is_empty() {
        println!("  No profiles configured.");
        println!();
        return Ok(());
    }

    // Recommended profiles are also listed as compatible
    for fit in recs.compatible_profiles.iter().chain(&recs.incompatible_profiles) {
        let marker = if recs
            .recommended_profiles
            .iter()
            .any(|r| r.profile_id == fit.profile_id)
        {
            "*"
        } else {
            ""
        };
        println!(
            "  {:<3} {:<20} {:<30} {}",
            marker, fit.profile_id, fit.name, fit.compatibility.message
        );
    }
    println!();
    println!("  * recommended for the available VRAM");
    println!();
    Ok(())
}

async fn cmd_reload(services: &Services) -> Result<()> {
    let reload = services.gateway.reload_profiles().await?;
    if !reload.success {
        bail!("reload failed: {}", reload.message);
    }
    println!("{} ({} profiles)", reload.message, reload.profiles.len());
    Ok(())
}

async fn cmd_switch(services: &Services, profile: &str, no_wait: bool) -> Result<()> {
    if no_wait {
        let ack = services.gateway.request_switch(profile).await?;
        if !ack.success {
            bail!("switch rejected: {}", ack.message);
        }
        println!("{}", ack.message);
        return Ok(());
    }

    println!("Switching to '{}'...", profile);
    let outcome = services.switcher.switch_to(profile).await;
    if !outcome.is_success() {
        bail!("{}", outcome);
    }
    println!("{}", outcome);
    Ok(())
}

async fn cmd_ask(
    services: &Services,
    prompt: &str,
    profile: Option<String>,
    stream: bool,
) -> Result<()> {
    let session = services.chat_session();
    session.set_streaming(stream);
    if let Some(profile) = profile {
        session.set_model(profile);
    } else {
        select_current_profile(services, &session).await?;
    }

    match run_turn(&session, prompt).await? {
        SendOutcome::Failed(_) => bail!("request failed"),
        _ => Ok(()),
    }
}

/// Default the session to whatever the backend is serving
async fn select_current_profile(services: &Services, session: &ChatSession) -> Result<()> {
    let catalog = services.switcher.refresh().await?;
    match &catalog.current_profile {
        Some(current) => {
            session.set_model(current.clone());
            Ok(())
        }
        None => bail!("no profile is loaded; pass --profile or run `vchat switch <profile>`"),
    }
}

/// Send one turn, echoing the reply as it grows. Ctrl-C stops the reply.
async fn run_turn(session: &ChatSession, text: &str) -> Result<SendOutcome> {
    let mut updates = session.subscribe();
    let mut task = tokio::spawn({
        let session = session.clone();
        let text = text.to_string();
        async move { session.send(&text, None).await }
    });

    let mut stdout = io::stdout();
    let mut printed = 0;
    let mut echo = |content: &str| -> io::Result<()> {
        if content.len() > printed {
            print!("{}", &content[printed..]);
            stdout.flush()?;
            printed = content.len();
        }
        Ok(())
    };

    let outcome = loop {
        tokio::select! {
            joined = &mut task => break joined?,
            _ = tokio::signal::ctrl_c() => {
                session.stop();
            }
            Ok(()) = updates.changed() => {
                let state = updates.borrow_and_update();
                if let Some(reply) = state.last().filter(|m| m.role == Role::Assistant) {
                    echo(&reply.content)?;
                }
            }
        }
    };

    match &outcome {
        SendOutcome::Completed {
            message_id,
            token_count,
        } => {
            if let Some(reply) = session.snapshot().message(message_id) {
                echo(&reply.content)?;
            }
            println!();
            println!("  [{} tokens]", token_count);
        }
        SendOutcome::Cancelled => println!("\n  [stopped]"),
        SendOutcome::Failed(e) => println!("Error: {}", e),
        SendOutcome::Ignored => {}
    }

    Ok(outcome)
}

async fn run_chat(services: &Services, profile: Option<String>, stream: bool) -> Result<()> {
    let session = services.chat_session();
    session.set_streaming(stream);
    match profile {
        Some(profile) => session.set_model(profile),
        None => {
            if let Err(e) = select_current_profile(services, &session).await {
                println!("Warning: {}", e);
            }
        }
    }

    display_help(&session);

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break; // EOF
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let Some(command) = trimmed.strip_prefix('/') else {
            run_turn(&session, trimmed).await?;
            continue;
        };

        let parts: Vec<&str> = command.split_whitespace().collect();
        match parts.as_slice() {
            ["model", id] => {
                session.set_model(*id);
                println!("  Using profile '{}'", id);
            }
            ["switch", id] => {
                println!("  Switching to '{}'...", id);
                let outcome = services.switcher.switch_to(id).await;
                if outcome.is_success() {
                    session.set_model(*id);
                }
                println!("  {}", outcome);
            }
            ["stream"] => {
                session.set_streaming(!session.is_streaming());
                println!("  Streaming {}", if session.is_streaming() { "on" } else { "off" });
            }
            ["clear"] => {
                session.clear();
                println!("  Transcript cleared");
            }
            ["help"] => display_help(&session),
            ["quit"] | ["exit"] | ["q"] => break,
            _ => println!("Unknown command: /{}. Type /help for available commands.", command),
        }
    }

    Ok(())
}

fn display_help(session: &ChatSession) {
    let state = session.snapshot();
    println!();
    println!(
        "  Profile: {}   Streaming: {}",
        state.selected_model.as_deref().unwrap_or("(none)"),
        if session.is_streaming() { "on" } else { "off" }
    );
    println!();
    println!("  /model <id>     # Use another profile for the next message");
    println!("  /switch <id>    # Switch the backend and wait until it is serving");
    println!("  /stream         # Toggle streaming replies");
    println!("  /clear          # Start a new transcript");
    println!("  /quit           # Leave the chat");
    println!();
    println!("  Ctrl-C stops a reply in progress.");
    println!();
}
