use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::sync::Arc;

use askweb::answer_generator::AnswerGenerator;
use askweb::api::client::ApiClient;
use askweb::api::{AppState, create_router};
use askweb::citations::{cited_indices, preprocess_citations, render_links};
use askweb::config::CONFIG;
use askweb::data_models::{Message, find_domain_option};
use askweb::display::{format_duration, format_timestamp, source_icon};
use askweb::orchestrator::{AnswerBackend, CycleOutcome, SearchBackend, SearchOrchestrator};
use askweb::search_client::SearchClient;

#[derive(Parser)]
#[command(name = "askweb", about = "Web search answers with inline citations")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP api (default)
    Serve,
    /// Ask one question and stream the cited answer to the terminal
    Ask {
        query: String,
        /// Domain filter preset: all, reddit, news, academic, tech
        #[arg(long, default_value = "all")]
        domain: String,
        /// Base url of a running server
        #[arg(long, default_value = "http://127.0.0.1:3000")]
        server: String,
        /// Call the search and completion providers directly instead of a server
        #[arg(long)]
        direct: bool,
        /// Print the finished answer once with citations turned into source links
        #[arg(long)]
        links: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber (handles both tracing and log crate)
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(true)
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve().await,
        Command::Ask {
            query,
            domain,
            server,
            direct,
            links,
        } => ask(&query, &domain, &server, direct, links).await,
    }
}

async fn serve() -> anyhow::Result<()> {
    let config = (*CONFIG).clone();
    let bind_addr = config.bind_addr.clone();
    let app = create_router(AppState::from_config(config));

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {bind_addr}"))?;
    tracing::info!("listening on {bind_addr}");

    axum::serve(listener, app).await?;
    Ok(())
}

async fn ask(
    query: &str,
    domain: &str,
    server: &str,
    direct: bool,
    links: bool,
) -> anyhow::Result<()> {
    let domain =
        find_domain_option(domain).ok_or_else(|| anyhow!("Unknown domain filter: {domain}"))?;

    let search: Arc<dyn SearchBackend>;
    let answers: Arc<dyn AnswerBackend>;
    if direct {
        let config = &*CONFIG;
        search = Arc::new(SearchClient::new(
            config.tavily_api_key.clone(),
            &config.tavily_api_url,
        ));
        answers = Arc::new(AnswerGenerator::new(
            config.openai_api_key.clone(),
            &config.openai_base_url,
            &config.openai_model,
        ));
    } else {
        let client = Arc::new(ApiClient::new(server));
        search = client.clone();
        answers = client;
    }

    let orchestrator = SearchOrchestrator::new(search, answers);
    orchestrator.update_query(query);
    orchestrator.update_selected_domain(domain);

    let mut updates = orchestrator.subscribe();
    let printer = tokio::spawn(async move {
        let mut printed = 0usize;
        while updates.changed().await.is_ok() {
            if links {
                continue;
            }
            let state = updates.borrow_and_update();
            let response = &state.current_ai_response;
            if response.len() > printed {
                print!("{}", &response[printed..]);
                // a failed flush only delays output until the next write
                std::io::stdout().flush().ok();
                printed = response.len();
            }
        }
        printed
    });

    let outcome = orchestrator.handle_search().await;
    drop(orchestrator);
    let printed = printer.await?;

    match outcome {
        CycleOutcome::Completed(message) => {
            if links {
                let cited = preprocess_citations(&message.ai_response, &message.results);
                print!("{}", render_links(&cited, &message.results));
            } else if let Some(rest) = message.ai_response.get(printed..) {
                // updates may coalesce, so the last fragments can still be unprinted
                print!("{rest}");
            }
            print_summary(&message);
            Ok(())
        }
        CycleOutcome::Failed(status) => Err(anyhow!(status)),
        CycleOutcome::Rejected => Err(anyhow!("Query cannot be empty")),
    }
}

fn print_summary(message: &Message) {
    let cited = cited_indices(&message.ai_response, &message.results);

    println!("\n\nSources:");
    for (i, result) in message.results.iter().enumerate() {
        let marker = if cited.contains(&i) { "*" } else { " " };
        println!(
            "{marker}[{}] {} {} — {}",
            i + 1,
            source_icon(&result.domain),
            result.title,
            result.url
        );
    }

    println!("\nSteps ({}):", format_timestamp(&message.timestamp));
    for step in &message.search_steps {
        let duration = step
            .details
            .as_ref()
            .and_then(|d| d.duration)
            .map(format_duration)
            .unwrap_or_default();
        println!("  {} {duration}", step.title);
    }
}
