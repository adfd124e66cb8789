use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::info;

use gatekeeper::api::{self, ApiError, ApproveRequest, CheckQuery, QualifyRequest};
use gatekeeper::cartridge::ReplyIntent;
use gatekeeper::config::GatekeeperConfig;
use outreach_agents::{keyword_intent, OutreachConfig, Runtime, Scenario};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Scenario fixture (JSON) seeding the in-memory deployment
    #[arg(long, global = true)]
    scenario: Option<PathBuf>,

    /// Gatekeeper config file (TOML); LUCI_* variables apply on top
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Shared sending number (overrides OUTREACH_FROM_NUMBER)
    #[arg(long, global = true)]
    from_number: Option<String>,

    /// Hours between attempts (overrides OUTREACH_MIN_HOURS_BETWEEN_ATTEMPTS)
    #[arg(long, global = true)]
    min_hours_between_attempts: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Approve one contact for outreach
    Approve {
        #[arg(long)]
        contact: String,
        #[arg(long)]
        team: String,
    },
    /// Read-only eligibility check
    Check {
        #[arg(long)]
        contact: String,
        #[arg(long)]
        team: String,
    },
    /// Batch-approve every undecided contact of a team
    Qualify {
        #[arg(long)]
        team: String,
    },
    /// Qualify a team, then run dispatcher ticks one attempt gap apart
    Tick {
        #[arg(long)]
        team: String,
        #[arg(long, default_value_t = 1)]
        rounds: u32,
    },
    /// Approve a contact, then apply an inbound reply
    Reply {
        #[arg(long)]
        contact: String,
        #[arg(long)]
        team: String,
        /// Classified intent
        #[arg(long, value_enum, conflicts_with = "text")]
        intent: Option<IntentArg>,
        /// Raw reply body; only opt-out keywords are recognized
        #[arg(long)]
        text: Option<String>,
    },
    /// Print the JSON schemas of the endpoint payloads
    Schema,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum IntentArg {
    OptOut,
    WrongNumber,
    Interested,
    AppointmentRequested,
    NotNow,
}

impl From<IntentArg> for ReplyIntent {
    fn from(arg: IntentArg) -> Self {
        match arg {
            IntentArg::OptOut => ReplyIntent::OptOut,
            IntentArg::WrongNumber => ReplyIntent::WrongNumber,
            IntentArg::Interested => ReplyIntent::Interested,
            IntentArg::AppointmentRequested => ReplyIntent::AppointmentRequested,
            IntentArg::NotNow => ReplyIntent::NotNow,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Command::Schema = args.command {
        return emit(&api::schemas());
    }

    let runtime = build_runtime(&args)?;
    match args.command {
        Command::Approve { contact, team } => {
            let request = ApproveRequest {
                contact_id: Some(contact),
                team_id: Some(team),
            };
            respond(api::approve(&runtime.gatekeeper, request).await)
        }
        Command::Check { contact, team } => {
            let query = CheckQuery {
                contact_id: Some(contact),
                team_id: Some(team),
            };
            respond(api::check(&runtime.gatekeeper, query))
        }
        Command::Qualify { team } => {
            let request = QualifyRequest {
                team_id: Some(team),
            };
            respond(api::qualify(&runtime.gatekeeper, request).await)
        }
        Command::Tick { team, rounds } => run_ticks(&runtime, &team, rounds).await,
        Command::Reply {
            contact,
            team,
            intent,
            text,
        } => {
            let intent = match (intent, text.as_deref()) {
                (Some(arg), _) => ReplyIntent::from(arg),
                (None, Some(body)) => match keyword_intent(body) {
                    Some(intent) => intent,
                    None => bail!("reply {body:?} needs a classified --intent"),
                },
                (None, None) => bail!("either --intent or --text is required"),
            };
            let approval = runtime.gatekeeper.approve(&contact, &team).await?;
            info!(contact_id = %contact, success = approval.success, "pre-reply approval");
            let outcome = runtime
                .dispatcher
                .handle_inbound(&contact, &team, intent)
                .await?;
            emit(&outcome)
        }
        Command::Schema => Ok(()),
    }
}

fn build_runtime(args: &Args) -> Result<Runtime> {
    let path = args
        .scenario
        .as_deref()
        .context("--scenario is required for this command")?;
    let scenario = Scenario::load(path)?;

    let config = match &args.config {
        Some(path) => GatekeeperConfig::from_toml_file(path)?,
        None => GatekeeperConfig::from_env()?,
    };

    let mut outreach = OutreachConfig::from_env()?;
    if let Some(number) = &args.from_number {
        outreach = outreach.with_from_number(number)?;
    }
    if let Some(hours) = args.min_hours_between_attempts {
        outreach = outreach.with_min_hours(hours);
    }

    info!(
        scenario = %path.display(),
        min_hours = outreach.min_hours_between_attempts,
        "outreach runtime starting"
    );
    Ok(scenario.build(&config, outreach)?)
}

#[derive(Serialize)]
struct TickRun {
    qualify: gatekeeper::compliance::QualifySummary,
    ticks: Vec<outreach_agents::TickReport>,
    messages: Vec<gatekeeper::providers::SentMessage>,
}

async fn run_ticks(runtime: &Runtime, team: &str, rounds: u32) -> Result<()> {
    let qualify = runtime.gatekeeper.qualify(team).await?;
    let gap = runtime.dispatcher.config().min_gap();

    let mut ticks = Vec::with_capacity(rounds as usize);
    for round in 0..rounds {
        if round > 0 {
            runtime.clock.advance(gap);
        }
        ticks.push(runtime.dispatcher.tick(team).await?);
    }

    emit(&TickRun {
        qualify,
        ticks,
        messages: runtime.messenger.sent(),
    })
}

fn respond<T: Serialize>(result: std::result::Result<T, ApiError>) -> Result<()> {
    match result {
        Ok(body) => emit(&body),
        Err(e) => {
            emit(&e.body)?;
            bail!("request failed with status {}", e.status)
        }
    }
}

fn emit<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{json}");
    Ok(())
}
