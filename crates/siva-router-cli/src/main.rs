//! SIVA Router CLI - capability-based model routing

mod http;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;
use siva_router_core::admin::{DecisionQuery, DenialQuery, EligibilityPatch, ModelQuery};
use siva_router_core::audit::ReplayStatus;
use siva_router_core::catalog::Catalog;
use siva_router_core::config::Config;
use siva_router_core::routing::{CapabilityRequest, DenialReason, GatewayOutcome, new_interaction_id};
use siva_router_core::service::RouterService;
use tracing::{info, warn};

/// Exit status for a policy denial
const EXIT_DENIED: u8 = 2;

#[derive(Parser)]
#[command(name = "siva-router")]
#[command(author, version, about = "Capability-based model routing for SIVA", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Database file (overrides storage.database_path)
    #[arg(long, global = true)]
    database: Option<PathBuf>,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and import a catalog
    Init {
        /// Catalog TOML file (defaults to catalog.path, then the built-in catalog)
        #[arg(short, long)]
        catalog: Option<PathBuf>,
        /// Import the built-in development catalog
        #[arg(long, conflicts_with = "catalog")]
        defaults: bool,
    },

    /// Check a persona's policy for a capability
    Authorize {
        persona: String,
        capability: String,
        /// Interaction id (generated when omitted)
        #[arg(short, long)]
        interaction: Option<String>,
    },

    /// Authorize and route a capability request
    Route {
        persona: String,
        capability: String,
        /// Interaction id (generated when omitted)
        #[arg(short, long)]
        interaction: Option<String>,
        /// Rank candidates without recording a decision
        #[arg(long)]
        dry_run: bool,
    },

    /// Resolve the model a logged interaction should replay with
    Replay { interaction_id: String },

    /// Observe registries and logs
    Admin {
        #[command(subcommand)]
        action: AdminAction,
    },

    /// Decision and denial totals
    Summary,

    /// Run the HTTP server
    Serve {
        /// Listen address (overrides server.bind)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum AdminAction {
    /// List capabilities
    Capabilities,
    /// List models with their capability support
    Models {
        /// Only models that declare this capability
        #[arg(short, long)]
        capability: Option<String>,
    },
    /// List routing decisions
    Decisions {
        #[arg(short, long)]
        capability: Option<String>,
        #[arg(short, long)]
        persona: Option<String>,
        /// REPLAYABLE, MODEL_DELETED, MODEL_INELIGIBLE or CAPABILITY_CHANGED
        #[arg(long)]
        replay_status: Option<ReplayStatus>,
        #[arg(short, long)]
        limit: Option<u32>,
    },
    /// List capability denials
    Denials {
        #[arg(short, long)]
        capability: Option<String>,
        #[arg(short, long)]
        persona: Option<String>,
        /// CAPABILITY_NOT_FOUND, IN_FORBIDDEN or NOT_IN_ALLOWED
        #[arg(short, long)]
        reason: Option<DenialReason>,
        #[arg(short, long)]
        limit: Option<u32>,
    },
    /// Toggle a model's routing eligibility
    SetEligibility {
        model_id: String,
        #[arg(long, action = ArgAction::Set)]
        eligible: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Show the configuration file path
    Path,
}

#[derive(Serialize)]
struct ErrorOutput<'a> {
    error: &'a str,
    message: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("siva_router=info,siva_router_core=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let format = cli.format;

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err, format);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut config = Config::load().map_err(config_error)?;
    if let Some(path) = cli.database {
        config.storage.database_path = path;
    }

    let format = cli.format;
    let quiet = cli.quiet;

    match cli.command {
        Commands::Init { catalog, defaults } => {
            cmd_init(&config, catalog, defaults, format, quiet).await?;
        }
        Commands::Authorize {
            persona,
            capability,
            interaction,
        } => {
            let service = RouterService::open(&config).await?;
            return cmd_authorize(&service, &persona, &capability, interaction, format, quiet).await;
        }
        Commands::Route {
            persona,
            capability,
            interaction,
            dry_run,
        } => {
            let service = RouterService::open(&config).await?;
            if dry_run {
                cmd_preview(&service, &persona, &capability, format).await?;
            } else {
                return cmd_route(&service, &persona, &capability, interaction, format, quiet).await;
            }
        }
        Commands::Replay { interaction_id } => {
            let service = RouterService::open(&config).await?;
            cmd_replay(&service, &interaction_id, format).await?;
        }
        Commands::Admin { action } => {
            let service = RouterService::open(&config).await?;
            cmd_admin(&service, action, format, quiet).await?;
        }
        Commands::Summary => {
            let service = RouterService::open(&config).await?;
            cmd_summary(&service, format).await?;
        }
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            let addr = config.server.socket_addr().map_err(config_error)?;
            let service = RouterService::open(&config).await?;
            http::serve(service, addr).await?;
        }
        Commands::Config { action } => cmd_config(&config, action, format)?,
    }

    Ok(ExitCode::SUCCESS)
}

fn config_error(err: anyhow::Error) -> siva_router_core::Error {
    siva_router_core::Error::ConfigError(format!("{:#}", err))
}

fn report_error(err: &anyhow::Error, format: OutputFormat) {
    let routed = err.downcast_ref::<siva_router_core::Error>();
    let code = routed.map_or("ERROR", |e| e.code());

    match format {
        OutputFormat::Json => {
            let body = ErrorOutput {
                error: code,
                message: format!("{:#}", err),
            };
            match serde_json::to_string(&body) {
                Ok(json) => println!("{}", json),
                Err(_) => eprintln!("Error: {:#}", err),
            }
        }
        OutputFormat::Text => {
            eprintln!("Error [{}]: {:#}", code, err);
            if let Some(suggestion) = routed.and_then(|e| e.suggestion()) {
                eprintln!("  Try: {}", suggestion);
            }
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn cmd_init(
    config: &Config,
    catalog_path: Option<PathBuf>,
    defaults: bool,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<()> {
    let source = if defaults {
        None
    } else {
        catalog_path.or_else(|| config.catalog.path.clone())
    };

    let catalog = match &source {
        Some(path) => Catalog::load(path)?,
        None => Catalog::with_defaults(),
    };

    let service = RouterService::open(config).await?;
    let summary = service.import_catalog(&catalog).await?;

    info!(
        capabilities = summary.capabilities,
        models = summary.models,
        personas = summary.personas,
        "Catalog imported"
    );
    for model_id in &summary.retired_preserved {
        warn!(model_id = %model_id, "Catalog lists a retired model as active; it stays retired");
    }

    match format {
        OutputFormat::Json => print_json(&summary)?,
        OutputFormat::Text if !quiet => {
            let origin = source
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "built-in catalog".to_string());
            println!("Imported {}", origin);
            println!("  Database:     {}", service.database().path().display());
            println!("  Capabilities: {}", summary.capabilities);
            println!("  Models:       {}", summary.models);
            println!("  Personas:     {}", summary.personas);
            if !summary.retired_preserved.is_empty() {
                println!("  Kept retired: {}", summary.retired_preserved.join(", "));
            }
        }
        OutputFormat::Text => {}
    }
    Ok(())
}

#[derive(Serialize)]
struct AuthorizeOutput<'a> {
    interaction_id: &'a str,
    decision: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<DenialReason>,
}

async fn cmd_authorize(
    service: &RouterService,
    persona: &str,
    capability: &str,
    interaction: Option<String>,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<ExitCode> {
    let interaction_id = interaction.unwrap_or_else(new_interaction_id);
    let outcome = service
        .authorizer()
        .authorize(persona, capability, &interaction_id)
        .await?;

    let output = AuthorizeOutput {
        interaction_id: &interaction_id,
        decision: if outcome.is_allowed() { "ALLOW" } else { "DENY" },
        reason: outcome.denial_reason(),
    };

    match format {
        OutputFormat::Json => print_json(&output)?,
        OutputFormat::Text if quiet => println!("{}", output.decision),
        OutputFormat::Text => match output.reason {
            None => println!("ALLOW {} -> {} ({})", persona, capability, interaction_id),
            Some(reason) => println!(
                "DENY {} -> {}: {} ({})",
                persona, capability, reason, interaction_id
            ),
        },
    }

    Ok(if outcome.is_allowed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_DENIED)
    })
}

async fn cmd_route(
    service: &RouterService,
    persona: &str,
    capability: &str,
    interaction: Option<String>,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<ExitCode> {
    let mut request = CapabilityRequest::new(persona, capability);
    if let Some(id) = interaction {
        request = request.with_interaction_id(id);
    }

    let outcome = service.gateway().resolve(request).await?;

    match format {
        OutputFormat::Json => print_json(&outcome)?,
        OutputFormat::Text => match &outcome {
            GatewayOutcome::Denied {
                interaction_id,
                reason,
            } => {
                println!("DENY {} -> {}: {} ({})", persona, capability, reason, interaction_id);
            }
            GatewayOutcome::Routed { decision } if quiet => println!("{}", decision.model_id),
            GatewayOutcome::Routed { decision } => {
                println!("Routed {} -> {}", capability, decision.model_id);
                println!("  Interaction: {}", decision.interaction_id);
                println!("  Persona:     {}", decision.persona_id);
                println!("  Score:       {:.2}", decision.score);
                println!("  Digest:      {}", decision.inputs_digest);
                let alternatives: Vec<&str> = decision
                    .alternatives()
                    .map(|c| c.model_id.as_str())
                    .collect();
                if !alternatives.is_empty() {
                    println!("  Alternatives: {}", alternatives.join(", "));
                }
            }
        },
    }

    Ok(match outcome {
        GatewayOutcome::Denied { .. } => ExitCode::from(EXIT_DENIED),
        GatewayOutcome::Routed { .. } => ExitCode::SUCCESS,
    })
}

async fn cmd_preview(
    service: &RouterService,
    persona: &str,
    capability: &str,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let candidates = service.router().preview(capability, persona).await?;

    match format {
        OutputFormat::Json => print_json(&candidates)?,
        OutputFormat::Text => {
            if candidates.is_empty() {
                println!("No eligible model for {} within the budget of {}", capability, persona);
                return Ok(());
            }
            println!("{:<40} {:>8} {:>10} {:>10} {:>9}", "MODEL", "SCORE", "COST", "LATENCY", "STABILITY");
            for candidate in &candidates {
                println!(
                    "{:<40} {:>8.2} {:>10.5} {:>8}ms {:>9}",
                    candidate.model_id,
                    candidate.breakdown.score,
                    candidate.cost_per_call,
                    candidate.avg_latency_ms,
                    candidate.stability_score
                );
            }
        }
    }
    Ok(())
}

async fn cmd_replay(service: &RouterService, interaction_id: &str, format: OutputFormat) -> anyhow::Result<()> {
    let resolution = service.replay().resolve_for_replay(interaction_id).await?;

    match format {
        OutputFormat::Json => print_json(&resolution)?,
        OutputFormat::Text => {
            println!("{} {}", resolution.model_id, resolution.replay_status);
            if let Some(reason) = &resolution.deviation_reason {
                println!("  Deviation: {}", reason);
            }
        }
    }
    Ok(())
}

async fn cmd_admin(
    service: &RouterService,
    action: AdminAction,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<()> {
    let admin = service.admin();

    match action {
        AdminAction::Capabilities => {
            let capabilities = admin.list_capabilities().await;
            if format == OutputFormat::Json {
                return print_json(&capabilities);
            }
            if capabilities.is_empty() {
                println!("No capabilities registered. Run `siva-router init` first.");
                return Ok(());
            }
            println!("{:<24} {:<8} {:<8} {:<8} {:>8}", "CAPABILITY", "LATENCY", "RISK", "REPLAY", "MODELS");
            for c in capabilities {
                println!(
                    "{:<24} {:<8} {:<8} {:<8} {:>8}",
                    c.capability_key, c.latency_class, c.risk_class, c.replay_tolerance, c.routable_models
                );
            }
        }
        AdminAction::Models { capability } => {
            let models = admin
                .list_models(&ModelQuery {
                    capability_key: capability,
                })
                .await;
            if format == OutputFormat::Json {
                return print_json(&models);
            }
            for m in models {
                let state = match (m.is_active, m.is_eligible) {
                    (false, _) => "retired",
                    (true, false) => "ineligible",
                    (true, true) => "eligible",
                };
                println!("{} ({}) [{}]", m.model_id, m.model_slug, state);
                println!(
                    "  cost {:.5}/call, {}ms, stability {}",
                    m.cost_per_call, m.avg_latency_ms, m.stability_score
                );
                if !m.supported_capabilities.is_empty() {
                    println!("  routes:  {}", m.supported_capabilities.join(", "));
                }
                if !m.blocked_capabilities.is_empty() {
                    println!("  blocked: {}", m.blocked_capabilities.join(", "));
                }
            }
        }
        AdminAction::Decisions {
            capability,
            persona,
            replay_status,
            limit,
        } => {
            let decisions = admin
                .list_decisions(&DecisionQuery {
                    capability_key: capability,
                    persona_id: persona,
                    replay_status,
                    limit,
                })
                .await?;
            if format == OutputFormat::Json {
                return print_json(&decisions);
            }
            for d in decisions {
                println!(
                    "{} {} {} {} -> {} ({:.2}) {}",
                    d.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    d.interaction_id,
                    d.persona_id,
                    d.capability_key,
                    d.model_id,
                    d.score,
                    d.replay_status
                );
            }
        }
        AdminAction::Denials {
            capability,
            persona,
            reason,
            limit,
        } => {
            let denials = admin
                .list_denials(&DenialQuery {
                    capability_key: capability,
                    persona_id: persona,
                    reason,
                    limit,
                })
                .await?;
            if format == OutputFormat::Json {
                return print_json(&denials);
            }
            for d in denials {
                println!(
                    "{} {} {} {} {}",
                    d.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    d.interaction_id,
                    d.persona_id,
                    d.capability_key,
                    d.reason
                );
            }
        }
        AdminAction::SetEligibility { model_id, eligible } => {
            let model = admin
                .set_model_eligibility(&EligibilityPatch::new(model_id, eligible))
                .await?;
            match format {
                OutputFormat::Json => print_json(&model)?,
                OutputFormat::Text if !quiet => println!(
                    "{} is now {}",
                    model.model_id,
                    if model.is_eligible { "eligible" } else { "ineligible" }
                ),
                OutputFormat::Text => {}
            }
        }
    }
    Ok(())
}

async fn cmd_summary(service: &RouterService, format: OutputFormat) -> anyhow::Result<()> {
    let summary = service.admin().summary().await?;

    if format == OutputFormat::Json {
        return print_json(&summary);
    }

    println!("Decisions: {}", summary.decisions);
    for (model_id, count) in &summary.decisions_by_model {
        println!("  {:<40} {:>6}", model_id, count);
    }
    println!("Denials:   {}", summary.denials);
    for (reason, count) in &summary.denials_by_reason {
        println!("  {:<40} {:>6}", reason, count);
    }
    Ok(())
}

fn cmd_config(config: &Config, action: ConfigAction, format: OutputFormat) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            if format == OutputFormat::Json {
                return print_json(config);
            }
            for (key, value) in config.list()? {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}
