use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use time::{format_description::well_known, OffsetDateTime};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use explorer_live::{
    AgentSummary, ApiConfig, FetchCoordinator, HttpTransport, ListState, LogNotifier, Query,
    Refresh, ScanFilters, ScanPhase, ScanProgress, ScanSession, ScanSource, ScanStatus,
    SessionConfig,
};

/// explorer-live: headless host for the agent explorer's list and scan controllers.
#[derive(Debug, Parser)]
#[command(
    name = "explorer-live",
    version,
    about = "Browse explorer agents and drive the endpoint-health scan from a terminal.",
    long_about = None
)]
struct Cli {
    #[command(flatten)]
    api: ApiConfig,

    #[command(flatten)]
    session: SessionConfig,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print one page of agents.
    List {
        /// List tab: all, active, new, top.
        #[arg(long, default_value = "all")]
        tab: String,

        /// Network key filter (e.g. sepolia).
        #[arg(long)]
        network: Option<String>,

        #[arg(long)]
        search: Option<String>,

        #[arg(long, default_value_t = 1)]
        page: u32,

        /// Write the page as pretty JSON to this path (optional).
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print the server's scan status.
    Status,
    /// Start a scan (or follow the running one) until it finishes. Ctrl+C stops watching.
    Scan {
        #[arg(long)]
        network: Option<String>,

        /// Scan at most this many agents.
        #[arg(long)]
        limit: Option<u32>,

        /// Re-check agents that were already scanned.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "explorer_live=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let transport = Arc::new(HttpTransport::new(cli.api.clone())?);

    match cli.command {
        Command::List {
            tab,
            network,
            search,
            page,
            output,
        } => {
            let query = list_query(cli.session.page_size, &tab, network.as_deref())
                .with_search(search.unwrap_or_default())
                .with_page(page);
            let coordinator = FetchCoordinator::<AgentSummary>::new(transport, cli.session.page_size);
            let state = load(&coordinator, query).await?;
            print_agents_table(&state);
            if let Some(path) = output.as_deref() {
                if let Err(e) = write_items_json(path, &state.items) {
                    eprintln!("Failed to write JSON to {}: {}", path.display(), e);
                } else {
                    println!("Wrote JSON results to {}", path.display());
                }
            }
        }
        Command::Status => {
            let status = transport.status().await?;
            print_status(&status);
        }
        Command::Scan {
            network,
            limit,
            force,
        } => {
            let coordinator = Arc::new(FetchCoordinator::<AgentSummary>::new(
                transport.clone(),
                cli.session.page_size,
            ));
            let query = list_query(cli.session.page_size, "all", network.as_deref());
            coordinator.submit(query.clone());
            let session = ScanSession::new(
                transport,
                Some(coordinator.clone() as Arc<dyn Refresh>),
                Arc::new(LogNotifier),
                &cli.session,
            );

            if session.attach().await {
                println!("A scan is already running on the server; following it.");
            } else {
                session
                    .start(ScanFilters {
                        network,
                        limit,
                        force,
                    })
                    .await;
            }

            let last = watch_scan(&session).await;
            if last.phase == ScanPhase::Completed {
                let state = load(&coordinator, query).await?;
                print_agents_table(&state);
            }
            session.teardown();
            coordinator.teardown();
        }
    }

    Ok(())
}

fn list_query(page_size: u32, tab: &str, network: Option<&str>) -> Query {
    Query::new(page_size)
        .with_filter("tab", tab)
        .with_filter("network", network.unwrap_or_default())
}

/// Submit `query` and wait for the coordinator to settle.
async fn load(
    coordinator: &FetchCoordinator<AgentSummary>,
    query: Query,
) -> Result<ListState<AgentSummary>> {
    coordinator.submit(query);
    let mut rx = coordinator.subscribe();
    let state = rx.wait_for(|s| !s.loading).await?.clone();
    if let Some(err) = state.error.as_deref() {
        if state.retryable {
            bail!("failed to load agents (try again later): {err}");
        }
        bail!("failed to load agents: {err}");
    }
    Ok(state)
}

async fn watch_scan(session: &ScanSession) -> ScanProgress {
    let mut rx = session.subscribe();
    loop {
        let progress = rx.borrow_and_update().clone();
        print_progress(&progress);
        if progress.phase.is_terminal() || progress.phase == ScanPhase::Idle {
            return progress;
        }
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    return session.progress();
                }
            }
            _ = tokio::signal::ctrl_c() => {
                session.cancel();
            }
        }
    }
}

fn print_progress(p: &ScanProgress) {
    let phase = format!("{:?}", p.phase).to_lowercase();
    match p.phase {
        ScanPhase::Errored => println!(
            "[{phase}] {}/{} checked, {} working: {}{}",
            p.checked,
            p.total,
            p.working,
            p.error.as_deref().unwrap_or("unknown error"),
            if p.retryable { " (retry may help)" } else { "" }
        ),
        _ => println!(
            "[{phase}] {}/{} ({}%) working: {}{}",
            p.checked,
            p.total,
            p.percent(),
            p.working,
            p.current_agent
                .as_deref()
                .map(|a| format!("  current: {a}"))
                .unwrap_or_default()
        ),
    }
}

fn print_status(s: &ScanStatus) {
    println!("scan status:");
    println!("  scanning     : {}", s.is_scanning);
    println!("  checked      : {}/{}", s.checked, s.total);
    println!("  working      : {}", s.working);
    println!(
        "  network      : {}",
        s.network.as_deref().unwrap_or("<all>")
    );
    println!(
        "  started_at   : {}",
        s.started_at.as_deref().unwrap_or("<none>")
    );
    if let Some(agent) = s.current_agent.as_deref() {
        println!("  current      : {agent}");
    }
}

const NAME_MAX: usize = 40;

/// First `max` characters of `s`.
fn clip(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Column width in characters: the widest of the header and every cell.
fn width<'a>(header: &str, cells: impl IntoIterator<Item = &'a str>) -> usize {
    cells
        .into_iter()
        .map(|c| c.chars().count())
        .fold(header.chars().count(), usize::max)
}

fn print_agents_table(state: &ListState<AgentSummary>) {
    let names: Vec<String> = state.items.iter().map(|a| clip(&a.name, NAME_MAX)).collect();
    let name_w = width("name", names.iter().map(String::as_str));
    let net_w = width("network", state.items.iter().map(|a| a.network_id.as_str()));
    let score_w = "score".len().max(6);
    let status_w = width("status", state.items.iter().map(|a| a.status.as_str())).max(8);

    println!(
        "\nShowing {} of {} agents (page {} of {}, updated {})",
        state.items.len(),
        state.total,
        state.page,
        state.total_pages.max(1),
        state
            .updated_at
            .map(format_time)
            .unwrap_or_else(|| "never".to_string())
    );
    println!(
        "{:<name_w$}  {:<net_w$}  {:>score_w$}  {:<status_w$}",
        "name",
        "network",
        "score",
        "status",
        name_w = name_w,
        net_w = net_w,
        score_w = score_w,
        status_w = status_w
    );
    println!(
        "{:-<name_w$}  {:-<net_w$}  {:-<score_w$}  {:-<status_w$}",
        "",
        "",
        "",
        "",
        name_w = name_w,
        net_w = net_w,
        score_w = score_w,
        status_w = status_w
    );
    for (a, name) in state.items.iter().zip(&names) {
        println!(
            "{:<name_w$}  {:<net_w$}  {:>score_w$.1}  {:<status_w$}",
            name,
            a.network_id,
            a.reputation_score,
            a.status,
            name_w = name_w,
            net_w = net_w,
            score_w = score_w,
            status_w = status_w
        );
    }
}

fn write_items_json(path: &std::path::Path, items: &[AgentSummary]) -> anyhow::Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, items)?;
    Ok(())
}

fn format_time(t: OffsetDateTime) -> String {
    t.format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
