//! FleetMind command-line interface.
//!
//! Boot order: configuration (file + `FLEETMIND_*` env overrides),
//! logging, runtime availability, template library, then the command
//! loop. Components are wired over channels at startup; the terminal
//! subscribes to stream updates instead of being called back into.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use fleetmind_approval::{ApprovalFlow, AuthCredentials, FleetApiClient};
use fleetmind_core::config::{AppConfig, AuthMode};
use fleetmind_core::llm::LlmRuntime;
use fleetmind_core::{EventBus, FleetEvent, Interpretation, ServerEvent};
use fleetmind_llm::ServerManager;
use fleetmind_reasoning::{EngineConfig, ReasoningEngine, ResultQuery, SubmitOptions, UiUpdate};
use fleetmind_templates::{examples, AiSelector, TemplateStore};

/// FleetMind - natural language to fleet API requests, with approval.
#[derive(Parser, Debug)]
#[command(name = "fleetmind")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the model runtime base URL.
    #[arg(long)]
    base_url: Option<String>,

    /// Override the reasoning model.
    #[arg(short, long)]
    model: Option<String>,

    /// Emit logs as JSON.
    #[arg(long)]
    json_logs: bool,

    /// Verbose output.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(&args);

    if let Err(e) = run(args).await {
        // Critical initialization failure: name the operation, no
        // backtraces, non-zero exit.
        eprintln!("fleetmind: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing(args: &Args) {
    let default_filter = if args.verbose {
        "fleetmind=debug"
    } else {
        "fleetmind=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    if args.json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }
}

async fn run(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => {
            let loaded = AppConfig::load(path)
                .with_context(|| format!("could not load config from {}", path.display()))?;
            if let Err(e) = fleetmind_storage::backup::backup_file(path, loaded.storage.backup_retain)
            {
                tracing::warn!(target: "fleetmind", error = %e, "config backup failed");
            }
            loaded
        }
        None => AppConfig::from_env(),
    };
    if let Some(base_url) = args.base_url {
        config.llm.base_url = base_url;
    }
    if let Some(model) = args.model {
        config.llm.model = model;
    }

    let bus = EventBus::new();

    // Model runtime: locate, start, make sure the model is present.
    let manager =
        ServerManager::new(config.llm.clone()).context("could not create the model server manager")?;
    forward_server_events(&manager, &bus);
    manager
        .ensure_available()
        .await
        .context("could not make the model runtime available")?;

    let engine = ReasoningEngine::new(
        Arc::clone(&manager) as Arc<dyn LlmRuntime>,
        EngineConfig {
            model: manager.default_model(),
            generate_timeout_secs: config.llm.generate_timeout_secs,
            blocking_timeout_secs: config.llm.blocking_timeout_secs,
            stream: config.stream.clone(),
        },
    );
    spawn_ui_printer(&engine);

    // Template library and AI selector.
    let store = Arc::new(
        TemplateStore::load_dir(std::path::Path::new(&config.templates.dir))
            .with_context(|| format!("could not load templates from {}", config.templates.dir))?,
    );
    if store.is_empty() {
        anyhow::bail!("no templates found in {}", config.templates.dir);
    }
    let few_shot = match &config.templates.examples_file {
        Some(path) => examples::load_examples(std::path::Path::new(path)).unwrap_or_default(),
        None => HashMap::new(),
    };
    let selector = AiSelector::new(Arc::clone(&store), Arc::clone(&engine), few_shot);

    // Fleet API client with stored credentials.
    let credentials = load_credentials(&config).unwrap_or(AuthCredentials::None);
    let fleet_api = FleetApiClient::new(config.fleet_api.clone(), credentials)
        .context("could not create the fleet API client")?;

    let mut approval = ApprovalFlow::new();

    println!("FleetMind ready. Type a request, or 'quit' to exit.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim().to_string();
        if input.is_empty() {
            continue;
        }
        if input == "quit" || input == "exit" {
            break;
        }

        // A regenerate decision hands back the amended input text.
        let mut next_input = Some(input);
        while let Some(input) = next_input.take() {
            match handle_request(
                &input,
                &engine,
                &selector,
                &store,
                &fleet_api,
                &mut approval,
                &mut lines,
                &bus,
            )
            .await
            {
                Ok(retry) => next_input = retry,
                Err(e) => println!("{e:#}"),
            }
        }
    }

    manager.stop().await;
    tracing::info!(target: "fleetmind", "clean shutdown");
    Ok(())
}

fn forward_server_events(manager: &Arc<ServerManager>, bus: &EventBus) {
    let mut events = manager.subscribe();
    let bus = bus.clone();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ServerEvent::StateChanged(state) => {
                    bus.publish(FleetEvent::ServerState(state));
                }
                ServerEvent::Download(progress) => {
                    println!("  [download] {} {:.0}%", progress.status, progress.percent);
                    bus.publish(FleetEvent::Download(progress));
                }
            }
        }
    });
}

fn spawn_ui_printer(engine: &Arc<ReasoningEngine>) {
    let mut updates = engine.subscribe_ui();
    tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(UiUpdate::Step { ordinal, name }) => {
                    println!("  [{}] {}", ordinal + 1, name);
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

fn load_credentials(config: &AppConfig) -> Option<AuthCredentials> {
    let store = match &config.storage.credentials_dir {
        Some(dir) => fleetmind_storage::CredentialStore::open(dir).ok()?,
        None => fleetmind_storage::CredentialStore::open_default().ok()?,
    };
    let secret = store.get("fleet_api").ok()??;
    Some(match config.fleet_api.auth_mode {
        AuthMode::Cookie => AuthCredentials::Cookie(secret),
        AuthMode::Bearer => AuthCredentials::Bearer(secret),
        AuthMode::Oauth => AuthCredentials::OAuth(secret),
        AuthMode::ApiKey => AuthCredentials::ApiKey(secret),
    })
}

/// Run one input through the pipeline. Returns the amended input text
/// when the user asked for a regeneration.
#[allow(clippy::too_many_arguments)]
async fn handle_request(
    input: &str,
    engine: &Arc<ReasoningEngine>,
    selector: &AiSelector,
    store: &Arc<TemplateStore>,
    fleet_api: &FleetApiClient,
    approval: &mut ApprovalFlow,
    lines: &mut tokio::io::Lines<BufReader<tokio::io::Stdin>>,
    bus: &EventBus,
) -> Result<Option<String>> {
    let request_id = engine
        .submit(input, SubmitOptions::default())
        .context("request was rejected")?;

    let result = match engine.wait_for(&request_id).await {
        ResultQuery::Ready(result) => result,
        _ => anyhow::bail!("reasoning request {request_id} produced no result"),
    };
    bus.publish(FleetEvent::ReasoningComplete {
        request_id: request_id.clone(),
        success: result.is_success(),
    });
    if let Some(error) = &result.error {
        anyhow::bail!("reasoning failed: {error}");
    }

    let report = engine.validate(&result);
    println!(
        "intent: {}  confidence: {:.2} ({})",
        result
            .intent
            .map(|i| i.to_string())
            .unwrap_or_else(|| "unknown".to_string()),
        result.confidence,
        report.confidence_band,
    );
    for recommendation in &report.recommendations {
        println!("  note: {recommendation}");
    }

    let choice = selector.select(input).await;
    println!(
        "template: {} ({:.2}, {}) - {}",
        choice.template_name, choice.confidence, choice.confidence_band, choice.reasoning
    );

    let entities = ReasoningEngine::canonical_entities(&result);
    let request = store.fill(&choice.template_name, &entities, input)?;

    let interpretation = Interpretation {
        id: uuid::Uuid::new_v4(),
        input_text: input.to_string(),
        intent: result.intent.unwrap_or(fleetmind_core::IntentTag::Unknown),
        entities,
        template_name: choice.template_name.clone(),
        request,
        intent_confidence: Some(result.confidence),
        entity_confidence: entity_confidence(&result),
    };

    let findings = approval.load(interpretation);
    for finding in findings {
        println!("  {:?} {}: {}", finding.severity, finding.field, finding.message);
    }

    println!("approve / edit <field> <value> / regenerate <feedback> / reject [feedback] ?");
    while let Some(line) = lines.next_line().await? {
        let command = line.trim();
        if command == "approve" {
            if let Err(e) = approval.approve("operator") {
                println!("{e}");
                continue;
            }

            let request_body = approval
                .interpretation()
                .map(|i| i.request.clone())
                .unwrap_or(serde_json::Value::Null);
            let metadata = store.metadata(&choice.template_name);
            let method = metadata
                .as_ref()
                .map(|m| m.http_method.clone())
                .unwrap_or_else(|| "POST".to_string());
            let endpoint = metadata.map(|m| m.api_endpoint).unwrap_or_default();

            let outcome = fleet_api.execute(&method, &endpoint, &request_body).await;
            let success = outcome.as_ref().map(|o| o.is_success()).unwrap_or(false);
            store.record_usage(&choice.template_name, success);
            approval.mark_executed(success)?;
            bus.publish(FleetEvent::Decision {
                interpretation_id: request_id.clone(),
                action: "approve".to_string(),
            });
            match outcome {
                Ok(outcome) => println!("executed: HTTP {}", outcome.status),
                Err(e) => println!("execution failed: {e}"),
            }
            break;
        } else if let Some(rest) = command.strip_prefix("edit ") {
            let mut parts = rest.splitn(2, ' ');
            let (Some(field), Some(value)) = (parts.next(), parts.next()) else {
                println!("usage: edit <field> <value>");
                continue;
            };
            let field = field.to_string();
            let value = value.to_string();
            let findings = approval.edit(move |request| {
                request[field] = serde_json::Value::String(value);
            })?;
            for finding in findings {
                println!("  {:?} {}: {}", finding.severity, finding.field, finding.message);
            }
            println!("edited; approve / reject ?");
        } else if let Some(feedback) = command.strip_prefix("regenerate ") {
            let retry = approval.regenerate("operator", feedback)?;
            println!("regenerating with: {retry}");
            return Ok(Some(retry));
        } else if command == "reject" || command.starts_with("reject ") {
            let feedback = command.strip_prefix("reject").map(str::trim).filter(|s| !s.is_empty());
            approval.reject("operator", feedback)?;
            println!("rejected");
            break;
        } else {
            println!("approve / edit <field> <value> / regenerate <feedback> / reject [feedback] ?");
        }
    }

    Ok(None)
}

fn entity_confidence(result: &fleetmind_core::ReasoningResult) -> Option<f32> {
    result
        .steps
        .iter()
        .find(|step| step.name == fleetmind_core::reasoning::STEP_ENTITY_EXTRACTION)
        .and_then(|step| step.confidence)
}
