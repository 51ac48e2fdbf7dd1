use anyhow::{Context, Result};
use meridian::agents::{Orchestrator, RequestContext};
use meridian::cli::output::Output;
use meridian::cli::{read_line, Cli};
use meridian::llm::LLMClient;
use meridian::memory::ConversationHistory;
use meridian::metrics::TracingMetricsTracker;
use meridian::rag::{DocumentIndex, Retriever};
use meridian::types::AppError;
use meridian::utils::toml_config::MeridianConfig;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse_args();
    let output = if cli.no_color {
        Output::no_color()
    } else {
        Output::new()
    };

    let config = MeridianConfig::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    init_tracing(&config, cli.verbose);

    let provider = config.llm.provider()?;
    tracing::info!(provider = provider.name(), model = provider.model(), "Reasoning service");
    let llm: Arc<dyn LLMClient> =
        Arc::from(provider.create_client(config.llm.generation_settings())?);

    let retriever = match &config.retrieval.documents_dir {
        Some(dir) => {
            let index = DocumentIndex::from_dir(dir)?;
            Some(Arc::new(index) as Arc<dyn Retriever>)
        }
        None => None,
    };

    let orchestrator = Orchestrator::from_config(&config, llm, retriever)?;
    let ctx = RequestContext::new(
        Arc::new(ConversationHistory::with_max_turns(config.memory.max_turns)),
        Arc::new(TracingMetricsTracker),
    );

    if let Some(query) = cli.query.as_deref() {
        return handle(&orchestrator, &ctx, &output, query, cli.route_only).await;
    }

    output.banner();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        output.prompt();
        let interrupt = async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        };
        let Some(line) = read_line(&mut lines, interrupt).await? else {
            println!();
            break;
        };
        let line = line.trim();
        match line {
            "" => continue,
            "exit" | "quit" => break,
            "clear" => {
                ctx.history.clear();
                output.info("Conversation history cleared");
            }
            query => {
                if let Err(e) = handle(&orchestrator, &ctx, &output, query, cli.route_only).await {
                    output.error(&e.to_string());
                }
            }
        }
    }

    Ok(())
}

fn init_tracing(config: &MeridianConfig, verbose: bool) {
    let level = if verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if config.logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Answers or routes one query. Ctrl-C cancels the in-flight request.
async fn handle(
    orchestrator: &Orchestrator,
    ctx: &RequestContext,
    output: &Output,
    query: &str,
    route_only: bool,
) -> Result<()> {
    if route_only {
        let decision = orchestrator.decide(query, ctx).await?;
        println!("{}", serde_json::to_string_pretty(&decision)?);
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let result = orchestrator.process_with_cancel(query, ctx, &cancel).await;
    watcher.abort();

    match result {
        Ok(response) => output.response(&response),
        Err(AppError::Cancelled) => output.warning("Request cancelled"),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}
