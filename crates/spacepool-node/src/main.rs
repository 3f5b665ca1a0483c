// SPDX-License-Identifier: AGPL-3.0-only
#![forbid(unsafe_code)]
#![deny(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde::{Deserialize, Serialize};
use sp_chain::mock::{MockAbsorbTxBuilder, MockChainClient};
use sp_chain::{AbsorbTxBuilder, BlockchainState, ChainClient, SignagePoint};
use sp_crypto::blake3_32;
use sp_pool::orchestrator::PoolContext;
use sp_pool::{Pool, PoolConfig, PoolState, PushOutcome};
use sp_store::{FileStore, SingletonStore};
use sp_types::{validate_partial_sanity, LauncherId, Partial};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

// Max. erlaubte Größe für HTTP-Request-Bodies (1 MiB)
const MAX_HTTP_BODY_BYTES: usize = 1_048_576;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[derive(Parser, Debug)]
#[command(name = "spacepool-node", about = "Proof-of-Space pool server")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Pool-Server starten
    Serve(ServeArgs),
    /// BLS-Schlüsselpaar erzeugen und als Hex ausgeben
    Keygen,
    /// Default-Konfiguration als TOML ausgeben
    PrintDefaultConfig,
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Pfad zur TOML-Konfiguration; ohne Angabe gelten Defaults + CLI
    #[arg(long)]
    config: Option<PathBuf>,
    /// Bind-Adresse der API, überschreibt den Port aus der Konfiguration
    #[arg(long)]
    addr: Option<String>,
    /// Datenverzeichnis für persistierte Singletons
    #[arg(long, default_value = "./spacepool-data")]
    data_dir: PathBuf,
    /// Dev-Betrieb: eingebauter Mock-ChainClient mit fester Challenge
    #[arg(long, default_value = "mock")]
    chain_mode: String,
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let code = match cli.command {
        Commands::Serve(args) => run_serve(&args),
        Commands::Keygen => run_keygen(),
        Commands::PrintDefaultConfig => run_print_default_config(),
    };
    std::process::exit(code);
}

fn run_keygen() -> i32 {
    use rand::RngCore;
    let mut ikm = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut ikm);
    match sp_crypto::bls_keygen_from_ikm(&ikm) {
        Some(kp) => {
            println!("secret_key={}", hex::encode(kp.sk.0.to_bytes()));
            println!("public_key={}", hex::encode(kp.pk.to_bytes()));
            0
        }
        None => {
            eprintln!("keygen failed");
            2
        }
    }
}

fn run_print_default_config() -> i32 {
    // Abgleich mit PoolConfig::default(); Kommentarfreie Minimalvorlage
    println!("pool_name = \"SpacePool\"");
    println!("pool_url = \"https://pool.example.com\"");
    println!("port = 8444");
    println!("pool_fee = 0.01");
    println!("min_payout = 1000000000");
    println!("partial_deadline = 28");
    println!("difficulty_target = 300");
    println!();
    println!("[node_rpc]");
    println!("host = \"localhost\"");
    println!("port = 8555");
    0
}

/// Exit-Codes: 0 sauber, 1 Konfiguration ungültig, 2 Laufzeitfehler.
fn run_serve(args: &ServeArgs) -> i32 {
    let config = match load_config(args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            return 1;
        }
    };
    if let Err(e) = config.validate() {
        eprintln!("invalid configuration: {e}");
        return 1;
    }

    match serve(args, config) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("fatal: {e}");
            2
        }
    }
}

fn load_config(args: &ServeArgs) -> Result<PoolConfig> {
    match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| anyhow!("read config {}: {e}", path.display()))?;
            let cfg: PoolConfig =
                toml::from_str(&raw).map_err(|e| anyhow!("parse config: {e}"))?;
            Ok(cfg)
        }
        None => Ok(PoolConfig::default()),
    }
}

/// Dev-ChainClient: liefert sofort eine Challenge und plausible Chain-Daten,
/// damit der Server ohne Full Node hochfährt. Der produktive RPC-Client ist
/// ein externer Kollaborateur.
fn build_chain(args: &ServeArgs) -> Result<Arc<dyn ChainClient>> {
    match args.chain_mode.as_str() {
        "mock" => {
            let mock = MockChainClient::new();
            mock.set_state(BlockchainState {
                tip_height: 1,
                synced_height: 1,
                network_space: 0,
                progress: 1.0,
                is_syncing: false,
            });
            mock.push_signage_point(SignagePoint {
                challenge_hash: blake3_32(b"spacepool:dev:challenge"),
                signage_point_index: 0,
                peak_height: 1,
                timestamp: sp_pool::unix_now(),
            });
            Ok(Arc::new(mock))
        }
        other => Err(anyhow!(
            "unknown chain_mode '{other}' (the rpc client is an external collaborator; only 'mock' is built in)"
        )),
    }
}

fn serve(args: &ServeArgs, config: PoolConfig) -> Result<()> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| anyhow!("failed to build tokio runtime: {e}"))?;

    let chain = build_chain(args)?;
    let store: Arc<dyn SingletonStore> =
        Arc::new(FileStore::open(&args.data_dir, config.fsync)?);
    let tx_builder: Arc<dyn AbsorbTxBuilder> = Arc::new(MockAbsorbTxBuilder);
    // Pool-Puzzle-Hash: im Dev-Betrieb deterministisch aus der Pool-URL
    let pool_puzzle_hash = blake3_32(config.pool_url.as_bytes());

    let addr_str = args
        .addr
        .clone()
        .unwrap_or_else(|| format!("0.0.0.0:{}", config.port));
    let addr: SocketAddr = addr_str
        .parse()
        .map_err(|e| anyhow!("invalid addr '{addr_str}': {e}"))?;

    let pool = Arc::new(
        Pool::init(config, chain, Some(store), Some(tx_builder), pool_puzzle_hash)
            .map_err(|e| anyhow!("pool init: {e}"))?,
    );
    pool.start().map_err(|e| anyhow!("pool start: {e}"))?;
    let ctx = pool.context();

    rt.block_on(async move {
        let make_svc = make_service_fn(move |_conn| {
            let ctx = ctx.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| handle_request(ctx.clone(), req)))
            }
        });
        let server = Server::bind(&addr).serve(make_svc);
        info!(%addr, "api listening");
        let graceful = server.with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        });
        graceful.await.map_err(|e| anyhow!("server error: {e}"))
    })?;

    pool.stop().map_err(|e| anyhow!("pool stop: {e}"))?;
    pool.cleanup();
    if pool.state() == PoolState::Error {
        return Err(anyhow!("pool terminated in error state"));
    }
    Ok(())
}

// ============================
// HTTP-API
// ============================

#[derive(Deserialize)]
struct PartialRequest {
    launcher_id: String,
    challenge: String,
    proof: String,
    signature: String,
    timestamp: u64,
    difficulty: u64,
    plot_size: u8,
}

#[derive(Serialize)]
struct PartialResponse {
    accepted: bool,
    /// Punkt-Schätzung aus Quality-Feld und aktueller Farmer-Difficulty;
    /// verbindlich wird erst die Gutschrift des Validators
    points: u64,
}

#[derive(Serialize)]
struct ErrorResponse {
    accepted: bool,
    error: &'static str,
}

fn json_response(status: StatusCode, body: String) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap_or_default()
}

fn error_response(status: StatusCode, error: &'static str) -> Response<Body> {
    let body = serde_json::to_string(&ErrorResponse {
        accepted: false,
        error,
    })
    .unwrap_or_default();
    json_response(status, body)
}

fn hex_array<const N: usize>(s: &str) -> Option<[u8; N]> {
    if s.len() != N * 2 {
        return None;
    }
    let raw = hex::decode(s).ok()?;
    let mut out = [0u8; N];
    if raw.len() != N {
        return None;
    }
    out.copy_from_slice(&raw);
    Some(out)
}

fn parse_partial(req: &PartialRequest) -> Option<Partial> {
    let launcher = hex_array::<32>(&req.launcher_id)?;
    let challenge = hex_array::<32>(&req.challenge)?;
    let signature = hex_array::<96>(&req.signature)?;
    let proof = hex::decode(&req.proof).ok()?;
    Some(Partial {
        launcher_id: LauncherId(launcher),
        challenge,
        proof,
        signature,
        timestamp: req.timestamp,
        difficulty: req.difficulty,
        plot_size: req.plot_size,
    })
}

/// Billige Punkt-Vorschätzung für die Enqueue-Antwort: Quality-Feld des
/// Proofs gegen die aktuelle Difficulty des Farmers.
fn estimate_points(ctx: &PoolContext, partial: &Partial) -> u64 {
    let quality = partial
        .proof
        .get(..8)
        .map(|head| {
            let mut b = [0u8; 8];
            b.copy_from_slice(head);
            let q = u64::from_le_bytes(b);
            if q == 0 {
                1
            } else {
                q
            }
        })
        .unwrap_or(1);
    let difficulty = ctx
        .registry
        .lookup(&partial.launcher_id)
        .map(|s| s.current_difficulty)
        .unwrap_or(partial.difficulty.max(1));
    sp_accounting::points_for_partial(quality, difficulty)
}

async fn handle_request(
    ctx: Arc<PoolContext>,
    req: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    let resp = if req.uri().path() == "/partial" && req.method() == Method::POST {
        handle_partial(ctx, req).await
    } else if req.uri().path() == "/pool_info" && req.method() == Method::GET {
        handle_pool_info(&ctx)
    } else if req.uri().path() == "/stats" && req.method() == Method::GET {
        handle_stats(&ctx)
    } else if req.uri().path() == "/healthz" && req.method() == Method::GET {
        json_response(StatusCode::OK, "{\"ok\":true}".to_string())
    } else if req.uri().path() == "/readyz" && req.method() == Method::GET {
        if ctx.challenges.current().is_some() {
            json_response(StatusCode::OK, "{\"ready\":true}".to_string())
        } else {
            json_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "{\"ready\":false}".to_string(),
            )
        }
    } else {
        error_response(StatusCode::NOT_FOUND, "NOT_FOUND")
    };
    Ok(resp)
}

async fn handle_partial(ctx: Arc<PoolContext>, req: Request<Body>) -> Response<Body> {
    let body = match hyper::body::to_bytes(req.into_body()).await {
        Ok(b) if b.len() <= MAX_HTTP_BODY_BYTES => b,
        Ok(_) => return error_response(StatusCode::PAYLOAD_TOO_LARGE, "BODY_TOO_LARGE"),
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "BAD_BODY"),
    };
    let parsed: PartialRequest = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "BAD_JSON"),
    };
    let Some(partial) = parse_partial(&parsed) else {
        return error_response(StatusCode::BAD_REQUEST, "BAD_HEX_FIELD");
    };
    if let Err(reason) = validate_partial_sanity(&partial) {
        warn!(reason, "partial failed sanity check");
        return error_response(StatusCode::BAD_REQUEST, "INVALID_PARTIAL");
    }

    // Rate-Limit pro Farmer vor der Queue
    if !ctx
        .sessions
        .check_rate_limit(&partial.launcher_id.0, sp_pool::unix_now())
    {
        return error_response(StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED");
    }

    let points = estimate_points(&ctx, &partial);
    match ctx.queue.push(partial) {
        PushOutcome::Enqueued => {
            let body = serde_json::to_string(&PartialResponse {
                accepted: true,
                points,
            })
            .unwrap_or_default();
            json_response(StatusCode::OK, body)
        }
        // Backpressure: Queue voll → 503 an den Farmer
        PushOutcome::Full => error_response(StatusCode::SERVICE_UNAVAILABLE, "QUEUE_FULL"),
    }
}

#[derive(Serialize)]
struct PoolInfoResponse {
    pool_name: String,
    pool_url: String,
    total_farmers: u64,
    total_netspace: u64,
    current_difficulty: u64,
    pool_fee: f64,
    min_payout: u64,
}

fn handle_pool_info(ctx: &PoolContext) -> Response<Body> {
    let snapshot = ctx.registry.snapshot();
    let current_difficulty = if snapshot.is_empty() {
        0
    } else {
        snapshot.iter().map(|s| s.current_difficulty).sum::<u64>() / snapshot.len() as u64
    };
    let info = PoolInfoResponse {
        pool_name: ctx.config.pool_name.clone(),
        pool_url: ctx.config.pool_url.clone(),
        total_farmers: snapshot.len() as u64,
        total_netspace: ctx.netspace_bytes(),
        current_difficulty,
        pool_fee: ctx.config.pool_fee,
        min_payout: ctx.config.min_payout,
    };
    json_response(
        StatusCode::OK,
        serde_json::to_string(&info).unwrap_or_default(),
    )
}

#[derive(Serialize)]
struct StatsResponse {
    total_farmers: u64,
    total_partials: u64,
    valid_partials: u64,
    total_points: u64,
}

fn handle_stats(ctx: &PoolContext) -> Response<Body> {
    let s = ctx.stats.snapshot();
    let body = StatsResponse {
        total_farmers: ctx.registry.len() as u64,
        total_partials: s.total_partials,
        valid_partials: s.valid_partials,
        total_points: s.total_points,
    };
    json_response(
        StatusCode::OK,
        serde_json::to_string(&body).unwrap_or_default(),
    )
}
