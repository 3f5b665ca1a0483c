// SPDX-License-Identifier: AGPL-3.0-only

//! Pool-Orchestrierung: Lebenszyklus, Worker-Pool und periodische Tasks.
//!
//! Ein einziger geteilter Kontext (`PoolContext`) besitzt Queue, Registry,
//! Caches und Session-Tabelle; Worker erhalten ihn per `Arc`. Es gibt keine
//! prozessweiten Mutables außerhalb dieses Kontexts. Chain-I/O läuft
//! ausschließlich auf dem Sync-Thread, nie auf einem Validator-Worker.

use crate::challenge::ChallengeTracker;
use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::queue::{PartialQueue, Popped};
use crate::session::SessionManager;
use crate::stats::PoolStats;
use crate::validator::{DifficultyTick, PartialValidator};
use crate::unix_now;
use sp_accounting::{DifficultyController, PointsWindow};
use sp_cache::VerificationCache;
use sp_chain::{AbsorbTxBuilder, ChainClient, TxStatus};
use sp_registry::SingletonRegistry;
use sp_store::SingletonStore;
use sp_types::LauncherId;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Worker-Neustarts pro Minute, bevor der Slot aufgegeben wird
const MAX_WORKER_RESTARTS_PER_MINUTE: u32 = 5;
/// Kadenz des Chain-Sync (≈ Signage-Point-Fenster)
const CHAIN_SYNC_INTERVAL: Duration = Duration::from_secs(5);
const STATS_LOG_INTERVAL: Duration = Duration::from_secs(30);
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoolState {
    Init,
    Running,
    ShuttingDown,
    Stopped,
    Error,
}

impl PoolState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Running => "RUNNING",
            Self::ShuttingDown => "SHUTTING_DOWN",
            Self::Stopped => "STOPPED",
            Self::Error => "ERROR",
        }
    }
}

/// Shutdown-Signal mit Condvar, damit periodische Threads sofort aufwachen.
struct ShutdownSignal {
    flag: Mutex<bool>,
    cond: Condvar,
}

impl ShutdownSignal {
    fn new() -> Self {
        Self {
            flag: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    fn request(&self) {
        if let Ok(mut g) = self.flag.lock() {
            *g = true;
        }
        self.cond.notify_all();
    }

    fn is_requested(&self) -> bool {
        self.flag.lock().map(|g| *g).unwrap_or(true)
    }

    /// Wartet höchstens `dur`; true, wenn Shutdown angefordert wurde.
    fn wait_for(&self, dur: Duration) -> bool {
        let Ok(mut g) = self.flag.lock() else { return true };
        let deadline = Instant::now() + dur;
        while !*g {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            match self.cond.wait_timeout(g, deadline - now) {
                Ok((guard, _)) => g = guard,
                Err(_) => return true,
            }
        }
        true
    }
}

/// Geteilter Kontext aller Subsysteme.
pub struct PoolContext {
    pub config: PoolConfig,
    pub queue: Arc<PartialQueue>,
    pub registry: Arc<SingletonRegistry>,
    pub cache: Arc<VerificationCache>,
    pub sessions: Arc<SessionManager>,
    pub stats: Arc<PoolStats>,
    pub challenges: Arc<ChallengeTracker>,
    pub validator: Arc<PartialValidator>,
    chain: Arc<dyn ChainClient>,
    store: Option<Arc<dyn SingletonStore>>,
    tx_builder: Option<Arc<dyn AbsorbTxBuilder>>,
    shutdown: ShutdownSignal,
    /// zuletzt gesehener Netspace (Bytes), fürs API/Statistik-Log
    netspace_bytes: AtomicU64,
}

impl PoolContext {
    pub fn netspace_bytes(&self) -> u64 {
        self.netspace_bytes.load(Ordering::Relaxed)
    }
}

pub struct Pool {
    ctx: Arc<PoolContext>,
    state: Mutex<PoolState>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    tick_rx: Mutex<Option<Receiver<DifficultyTick>>>,
}

impl Pool {
    /// Validiert die Konfiguration, konstruiert alle Subsysteme und lädt
    /// persistierte Singletons. Zustand danach: `Init`.
    pub fn init(
        config: PoolConfig,
        chain: Arc<dyn ChainClient>,
        store: Option<Arc<dyn SingletonStore>>,
        tx_builder: Option<Arc<dyn AbsorbTxBuilder>>,
        pool_puzzle_hash: [u8; 32],
    ) -> Result<Self, PoolError> {
        config.validate()?;

        let queue = Arc::new(PartialQueue::new(config.queue_max_size));
        let registry = Arc::new(SingletonRegistry::new(pool_puzzle_hash));
        let cache = Arc::new(VerificationCache::new(
            config.cache_budget_bytes,
            config.cache_ttl_seconds,
        ));
        let sessions = Arc::new(SessionManager::new(config.rate_limit_per_minute));
        let stats = Arc::new(PoolStats::new());
        let challenges = Arc::new(ChallengeTracker::new(config.partial_deadline));

        // Warmstart aus dem Store
        if let Some(st) = &store {
            let loaded = st
                .load_all()
                .map_err(|e| PoolError::Persistence(e.to_string()))?;
            let n = loaded.len();
            for s in loaded {
                registry
                    .upsert(s)
                    .map_err(|e| PoolError::Persistence(e.to_string()))?;
            }
            if n > 0 {
                info!(singletons = n, "registry warm-started from store");
            }
        }

        let (tick_tx, tick_rx) = std::sync::mpsc::channel();
        let validator = Arc::new(PartialValidator::new(
            registry.clone(),
            cache.clone(),
            challenges.clone(),
            stats.clone(),
            chain.clone(),
            tick_tx,
            config.partial_deadline,
            config.sub_slot_iters,
        ));

        info!(pool = %config.pool_name, "pool initialized");
        Ok(Self {
            ctx: Arc::new(PoolContext {
                config,
                queue,
                registry,
                cache,
                sessions,
                stats,
                challenges,
                validator,
                chain,
                store,
                tx_builder,
                shutdown: ShutdownSignal::new(),
                netspace_bytes: AtomicU64::new(0),
            }),
            state: Mutex::new(PoolState::Init),
            threads: Mutex::new(Vec::new()),
            tick_rx: Mutex::new(Some(tick_rx)),
        })
    }

    pub fn context(&self) -> Arc<PoolContext> {
        self.ctx.clone()
    }

    pub fn state(&self) -> PoolState {
        self.state.lock().map(|g| *g).unwrap_or(PoolState::Error)
    }

    fn transition(&self, from: PoolState, to: PoolState) -> Result<(), PoolError> {
        let mut g = self
            .state
            .lock()
            .map_err(|_| PoolError::InvalidStateTransition("state lock poisoned"))?;
        if *g != from {
            return Err(PoolError::InvalidStateTransition(to.as_str()));
        }
        *g = to;
        Ok(())
    }

    /// Markiert einen nicht behebbaren Zustand; terminal aus jedem Zustand.
    pub fn set_error(&self, reason: &str) {
        error!(reason, "pool entering error state");
        if let Ok(mut g) = self.state.lock() {
            *g = PoolState::Error;
        }
        self.ctx.shutdown.request();
        self.ctx.queue.close();
    }

    /// Startet Worker-Pool, Sync-Thread und periodische Tasks.
    pub fn start(&self) -> Result<(), PoolError> {
        self.transition(PoolState::Init, PoolState::Running)?;
        let mut threads = self
            .threads
            .lock()
            .map_err(|_| PoolError::InvalidStateTransition("thread table poisoned"))?;

        for worker_id in 0..self.ctx.config.worker_threads {
            threads.push(spawn_supervised_worker(self.ctx.clone(), worker_id));
        }
        threads.push(spawn_chain_sync(self.ctx.clone()));
        threads.push(spawn_periodic("stats-log", STATS_LOG_INTERVAL, self.ctx.clone(), |ctx| {
            let snap = ctx.registry.snapshot();
            let avg_difficulty = if snap.is_empty() {
                0
            } else {
                snap.iter().map(|s| s.current_difficulty).sum::<u64>() / snap.len() as u64
            };
            ctx.stats
                .log_statistics(snap.len() as u64, ctx.netspace_bytes(), avg_difficulty);
        }));
        threads.push(spawn_periodic(
            "session-sweep",
            SESSION_SWEEP_INTERVAL,
            self.ctx.clone(),
            |ctx| {
                ctx.sessions.sweep_expired(unix_now());
            },
        ));
        threads.push(spawn_periodic(
            "cache-sweep",
            CACHE_SWEEP_INTERVAL,
            self.ctx.clone(),
            |ctx| {
                ctx.cache.sweep_expired();
            },
        ));

        let tick_rx = self
            .tick_rx
            .lock()
            .ok()
            .and_then(|mut g| g.take())
            .ok_or(PoolError::InvalidStateTransition("already started once"))?;
        threads.push(spawn_retarget(self.ctx.clone(), tick_rx));

        info!(workers = self.ctx.config.worker_threads, "pool started");
        Ok(())
    }

    /// Fährt den Pool herunter: Queue schließen, Threads joinen, Zustand
    /// persistieren. Ein bereits gepopptes Partial wird noch zu Ende
    /// validiert; noch eingereihte werden verworfen.
    pub fn stop(&self) -> Result<(), PoolError> {
        self.transition(PoolState::Running, PoolState::ShuttingDown)?;
        info!("pool stopping");
        self.ctx.shutdown.request();
        self.ctx.queue.close();

        let handles: Vec<JoinHandle<()>> = match self.threads.lock() {
            Ok(mut g) => g.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for h in handles {
            if h.join().is_err() {
                warn!("worker thread panicked during join");
            }
        }

        self.persist_all();
        if let Ok(mut g) = self.state.lock() {
            *g = PoolState::Stopped;
        }
        info!("pool stopped");
        Ok(())
    }

    /// Gibt Ressourcen frei; idempotent, auch nach `stop()` aufrufbar.
    pub fn cleanup(&self) {
        self.persist_all();
        for p in sp_cache::Partition::all() {
            self.ctx.cache.clear(p);
        }
    }

    fn persist_all(&self) {
        let Some(store) = &self.ctx.store else { return };
        let snapshot = self.ctx.registry.snapshot();
        let mut failed = 0usize;
        for s in &snapshot {
            if store.put(s).is_err() {
                failed += 1;
            }
        }
        if failed > 0 {
            warn!(failed, total = snapshot.len(), "singleton persistence incomplete");
        } else {
            info!(persisted = snapshot.len(), "singletons persisted");
        }
    }
}

fn worker_loop(ctx: &PoolContext) {
    loop {
        match ctx.queue.pop() {
            Popped::Item(partial) => {
                let _ = ctx.validator.validate_and_apply(&partial, unix_now());
            }
            Popped::Shutdown => break,
        }
    }
}

/// Worker mit Panic-Überwachung: ein abgestürzter Worker reißt keine Peers
/// mit und wird innerhalb eines Minutenbudgets neu gestartet.
fn spawn_supervised_worker(ctx: Arc<PoolContext>, worker_id: usize) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name(format!("validator-{worker_id}"))
        .spawn(move || {
            let mut window_start = Instant::now();
            let mut restarts: u32 = 0;
            loop {
                let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| worker_loop(&ctx)));
                match outcome {
                    Ok(()) => break,
                    Err(_) => {
                        if ctx.shutdown.is_requested() {
                            break;
                        }
                        if window_start.elapsed() > Duration::from_secs(60) {
                            window_start = Instant::now();
                            restarts = 0;
                        }
                        restarts += 1;
                        ctx.stats.record_worker_restart();
                        if restarts > MAX_WORKER_RESTARTS_PER_MINUTE {
                            error!(worker_id, "worker restart budget exhausted, giving up slot");
                            break;
                        }
                        warn!(worker_id, restarts, "validator worker panicked, restarting");
                    }
                }
            }
        })
        .unwrap_or_else(|_| std::thread::spawn(|| {}))
}

fn spawn_periodic(
    name: &'static str,
    interval: Duration,
    ctx: Arc<PoolContext>,
    task: fn(&PoolContext),
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            while !ctx.shutdown.wait_for(interval) {
                task(&ctx);
            }
        })
        .unwrap_or_else(|_| std::thread::spawn(|| {}))
}

/// Dedizierter Sync-Thread: Signage Points einziehen, Chain-Zustand lesen,
/// Absorb-Pass fahren. Blockierende Netzaufrufe sind hier erlaubt.
fn spawn_chain_sync(ctx: Arc<PoolContext>) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("chain-sync".to_string())
        .spawn(move || loop {
            // erster Tick sofort, damit Challenges ohne Verzögerung rotieren
            chain_sync_tick(&ctx);
            if ctx.shutdown.wait_for(CHAIN_SYNC_INTERVAL) {
                break;
            }
        })
        .unwrap_or_else(|_| std::thread::spawn(|| {}))
}

fn chain_sync_tick(ctx: &PoolContext) {
    // Signage Points → Challenge-Rotation
    loop {
        match ctx.chain.poll_signage_point() {
            Ok(Some(sp)) => ctx.challenges.rotate(&sp),
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "signage point poll failed");
                break;
            }
        }
    }
    // Netspace/Höhe für API und Log
    match ctx.chain.blockchain_state() {
        Ok(state) => {
            ctx.netspace_bytes.store(state.network_space, Ordering::Relaxed);
        }
        Err(e) => warn!(error = %e, "blockchain state unavailable"),
    }
    absorb_pass(ctx);
}

/// Baut und versendet Absorb-Transaktionen für Singletons mit offenem Saldo.
fn absorb_pass(ctx: &PoolContext) {
    let Some(builder) = &ctx.tx_builder else { return };
    for s in ctx.registry.snapshot() {
        if s.balance == 0 || !s.is_pool_member {
            continue;
        }
        let tx = match builder.build_absorb_tx(&s.launcher_id, s.balance, 0) {
            Ok(tx) => tx,
            Err(e) => {
                warn!(launcher = %s.launcher_id.to_hex(), error = %e, "absorb build failed");
                continue;
            }
        };
        match ctx.chain.push_tx(&tx) {
            Ok(TxStatus::Accepted) => {
                let _ = ctx.registry.mark_absorbed(&s.launcher_id, s.balance);
            }
            Ok(TxStatus::Rejected) => {
                warn!(launcher = %s.launcher_id.to_hex(), "absorb tx rejected");
            }
            Err(e) => {
                warn!(launcher = %s.launcher_id.to_hex(), error = %e, "absorb push failed");
            }
        }
    }
}

/// Retarget-Thread: konsumiert Difficulty-Ticks der Validator-Worker, führt
/// 24h-Fenster pro Farmer und wendet die Regel gemäß Intervall an.
fn spawn_retarget(ctx: Arc<PoolContext>, tick_rx: Receiver<DifficultyTick>) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("difficulty-retarget".to_string())
        .spawn(move || {
            let mut controller = DifficultyController::new(
                ctx.config.difficulty_target,
                ctx.config.min_difficulty,
                ctx.config.max_difficulty,
                ctx.config.difficulty_adjust_interval_secs,
            );
            let mut windows: HashMap<LauncherId, PointsWindow> = HashMap::new();
            loop {
                match tick_rx.recv_timeout(Duration::from_millis(250)) {
                    Ok(tick) => {
                        let window = windows.entry(tick.launcher_id).or_default();
                        window.add(tick.timestamp, tick.points);
                        let points_24h = window.total_24h(tick.timestamp);
                        let Some(current) = ctx
                            .registry
                            .lookup(&tick.launcher_id)
                            .map(|s| (s.current_difficulty, s.last_partial_time))
                        else {
                            continue;
                        };
                        let (current_difficulty, last_partial) = current;
                        let since_last = tick.timestamp.saturating_sub(last_partial);
                        if let Some(decision) = controller.adjust(
                            &tick.launcher_id,
                            current_difficulty,
                            points_24h,
                            since_last,
                            tick.timestamp,
                        ) {
                            if decision.new_difficulty != current_difficulty {
                                let _ = ctx
                                    .registry
                                    .set_difficulty(&tick.launcher_id, decision.new_difficulty);
                            }
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        if ctx.shutdown.is_requested() {
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        })
        .unwrap_or_else(|_| std::thread::spawn(|| {}))
}
