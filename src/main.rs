use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hot_or_not::config::DEFAULT_CONFIG_PATH;
use hot_or_not::github::parse_repo;
use hot_or_not::{
    render_leaderboard, router, serve, Ballot, Config, DocumentStore, GitHubClient,
    GitHubContentsStore, MemoryStore, Side, VoteRecorder, VoteRelay,
};

#[derive(Parser)]
#[command(name = "hot-or-not")]
#[command(about = "Two-photo voting backed by a JSON tally in a GitHub repository")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Repository holding the tally (owner/repo), overrides the config file
    #[arg(long)]
    repo: Option<String>,

    /// GitHub token used to read and commit the tally
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the vote endpoint
    Serve {
        /// Address to listen on
        #[arg(long)]
        bind: Option<String>,

        /// Keep the tally in memory instead of GitHub
        #[arg(long)]
        in_memory: bool,
    },

    /// Record a single vote
    Vote {
        /// Photo key, e.g. photo-3
        photo: String,
    },

    /// Print the stored tally ranked by votes
    Leaderboard,

    /// Vote from the terminal, two photos per round
    Play {
        /// Vote endpoint to post to
        #[arg(long)]
        endpoint: Option<String>,

        /// Snapshot URL or file used to seed counts
        #[arg(long)]
        snapshot: Option<String>,

        /// Seed for photo pairing
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Verify the token can reach and write the tally repository
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("hot_or_not=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)?;
    if let Some(repo) = &cli.repo {
        let (owner, name) = parse_repo(repo)?;
        config.store.owner = owner.to_string();
        config.store.repo = name.to_string();
    }

    match cli.command {
        Commands::Serve { bind, in_memory } => {
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            run_server(&config, cli.token, &bind, in_memory).await?;
        }
        Commands::Vote { photo } => {
            let recorder = github_recorder(&config, cli.token)?;
            cast_vote(&recorder, &photo).await?;
        }
        Commands::Leaderboard => {
            let recorder = github_recorder(&config, cli.token)?;
            print_leaderboard(&recorder).await?;
        }
        Commands::Play {
            endpoint,
            snapshot,
            seed,
        } => {
            let endpoint = endpoint.unwrap_or_else(|| config.widget.endpoint.clone());
            let snapshot = snapshot.unwrap_or_else(|| config.widget.snapshot.clone());
            play(&config, &endpoint, &snapshot, seed).await?;
        }
        Commands::Check => {
            check_access(&config, cli.token).await?;
        }
    }

    Ok(())
}

fn github_recorder(
    config: &Config,
    token: Option<String>,
) -> Result<VoteRecorder<GitHubContentsStore>> {
    config.validate_store()?;

    let store = GitHubContentsStore::new(&config.store, token)?;
    if !store.has_credential() {
        warn!("GITHUB_TOKEN not set, every vote will fail with a configuration error");
    }

    Ok(VoteRecorder::new(store).with_max_attempts(config.voting.max_attempts))
}

async fn run_server(
    config: &Config,
    token: Option<String>,
    bind: &str,
    in_memory: bool,
) -> Result<()> {
    if in_memory {
        info!(path = %config.store.path, "Using in-memory tally");
        let store = MemoryStore::new(config.store.path.clone());
        let recorder = VoteRecorder::new(store).with_max_attempts(config.voting.max_attempts);
        return serve(bind, router(Arc::new(recorder))).await;
    }

    let recorder = github_recorder(config, token)?;
    info!(
        owner = %config.store.owner,
        repo = %config.store.repo,
        path = %config.store.path,
        max_attempts = recorder.max_attempts(),
        "Recording votes to GitHub"
    );

    serve(bind, router(Arc::new(recorder))).await
}

async fn cast_vote<S: DocumentStore>(recorder: &VoteRecorder<S>, photo: &str) -> Result<()> {
    let key = hot_or_not::VoteRequest::new(photo)
        .validated_key()
        .map(str::to_string)
        .with_context(|| format!("Invalid photo key: {:?}", photo))?;

    let recorded = recorder.record(&key).await?;
    println!(
        "Recorded vote for {} (now {} votes, attempt {})",
        recorded.key, recorded.votes, recorded.attempts
    );

    Ok(())
}

async fn print_leaderboard<S: DocumentStore>(recorder: &VoteRecorder<S>) -> Result<()> {
    let tally = recorder.snapshot().await?;

    if tally.is_empty() {
        println!("No votes yet.");
        return Ok(());
    }

    for standing in tally.ranked() {
        println!(
            "Rank {}: {} - {} votes",
            standing.rank, standing.key, standing.votes
        );
    }

    Ok(())
}

async fn refresh_counts(relay: &VoteRelay, ballot: &mut Ballot, snapshot: &str) {
    match relay.load_snapshot(snapshot).await {
        Ok(tally) => ballot.seed(&tally),
        Err(err) => warn!(error = %format!("{:#}", err), "Could not load vote snapshot"),
    }
}

async fn play(config: &Config, endpoint: &str, snapshot: &str, seed: Option<u64>) -> Result<()> {
    let mut ballot = Ballot::from_config(&config.widget);
    if ballot.photos().len() < 2 {
        anyhow::bail!("widget.photos needs at least two photos to play");
    }

    let relay = VoteRelay::new(endpoint);
    refresh_counts(&relay, &mut ballot, snapshot).await;

    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut pending = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        if ballot.current().is_none() {
            if let Some(pair) = ballot.next_round(&mut rng) {
                let left = ballot.photo(pair.left).context("photo index out of range")?;
                let right = ballot.photo(pair.right).context("photo index out of range")?;
                println!("\nRound {}", pair.round);
                println!("  1) {} [{}]", left.name, left.file);
                println!("  2) {} [{}]", right.name, right.file);
            }
        }
        println!("Pick 1 or 2, l for leaderboard, q to quit:");

        let Some(line) = lines.next_line().await.context("Failed to read input")? else {
            break;
        };

        let side = match line.trim() {
            "1" => Side::Left,
            "2" => Side::Right,
            "l" => {
                refresh_counts(&relay, &mut ballot, snapshot).await;
                print!("{}", render_leaderboard(&ballot.leaderboard()));
                continue;
            }
            "q" => break,
            other => {
                println!("Unknown choice: {}", other);
                continue;
            }
        };

        if let Some(key) = ballot.choose(side) {
            pending.retain(|handle: &tokio::task::JoinHandle<()>| !handle.is_finished());
            pending.push(relay.submit_detached(key));
        }
    }

    // Let in-flight votes land before the runtime shuts down
    for handle in pending {
        if let Err(err) = handle.await {
            warn!(error = %err, "Vote submission task did not complete");
        }
    }

    Ok(())
}

async fn check_access(config: &Config, token: Option<String>) -> Result<()> {
    config.validate_store()?;
    let token = token.context("GITHUB_TOKEN not set")?;

    let github = GitHubClient::new(&token, &config.store.api_url)?;
    let access = github
        .verify_access(&config.store.owner, &config.store.repo)
        .await?;

    println!("Repository: {}", access.full_name);
    println!(
        "Branch: {}",
        config
            .store
            .branch
            .as_deref()
            .or(access.default_branch.as_deref())
            .unwrap_or("(default)")
    );
    println!("Push access: {}", if access.can_push { "yes" } else { "no" });

    let recorder = github_recorder(config, Some(token))?;
    let tally = recorder.snapshot().await?;
    println!(
        "Tally {}: {} photos, {} votes",
        config.store.path,
        tally.len(),
        tally.iter().map(|(_, votes)| votes).sum::<u64>()
    );

    if !access.can_push {
        anyhow::bail!("Token cannot push to {}, votes would fail", access.full_name);
    }

    Ok(())
}
