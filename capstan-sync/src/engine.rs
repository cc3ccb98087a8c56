//! The chain-tracking state machine.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use capstan_chain::ChainClient;
use capstan_core::{txnum, AnchorRecord, BlockInfo, Config, Error, Result};
use capstan_fee::{batch_id, batch_start, is_batch_boundary, QuantileCalculator, ReservoirSampler};
use capstan_store::{QuantileStore, TransactionLog};

use crate::extractor::extract_anchors;
use crate::fees::transaction_fee;

/// Where the engine currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    /// Between ticks.
    #[default]
    Idle,
    /// Processing blocks forward.
    Syncing {
        /// First block of the range being processed.
        from: u64,
        /// Last block of the range being processed.
        to: u64,
    },
    /// Repairing a detected fork.
    Reverting,
    /// Rollback failed; external restart required.
    Halted,
}

/// Read-committed view of the engine, shared with the query surface.
#[derive(Debug, Clone, Default)]
pub struct SyncStatus {
    /// Current lifecycle state.
    pub state: EngineState,
    /// The newest block known to be fully processed.
    pub last_seen: Option<BlockInfo>,
}

/// Shared handle onto [`SyncStatus`].
pub type StatusHandle = Arc<RwLock<SyncStatus>>;

/// The sync engine: polls the upstream tip, extracts anchors into the
/// transaction log, feeds the proof-of-fee sampler, and repairs chain
/// reorganizations by truncating log and quantile state in lock-step.
///
/// Exactly one tick runs at a time, and `last_seen` moves only at tick
/// end or rollback end, so a failure anywhere simply means the same
/// blocks are processed again next tick (all writes are idempotent).
pub struct SyncEngine {
    client: Arc<dyn ChainClient>,
    log: Arc<dyn TransactionLog>,
    quantile: QuantileCalculator,
    sampler: ReservoirSampler<String>,
    config: Config,
    last_seen: Option<BlockInfo>,
    /// Highest block whose transactions were fed to the sampler in the
    /// current batch. Re-processed blocks (tick retry) skip sampling so
    /// the reservoir stays a faithful single-pass sample.
    sampled_through: Option<u64>,
    status: StatusHandle,
}

impl SyncEngine {
    /// Build an engine over a chain client and the two stores.
    pub fn new(
        client: Arc<dyn ChainClient>,
        log: Arc<dyn TransactionLog>,
        quantile_store: Arc<dyn QuantileStore>,
        config: Config,
    ) -> Result<Self> {
        config.validate()?;
        let quantile_config = config.proof_of_fee.transaction_fee_quantile.clone();
        if config.genesis_block_number % quantile_config.batch_size_in_blocks != 0 {
            return Err(Error::Config(format!(
                "genesis block {} must start a batch (batch size {})",
                config.genesis_block_number, quantile_config.batch_size_in_blocks
            )));
        }

        let sampler = ReservoirSampler::new(quantile_config.sample_size);
        let quantile = QuantileCalculator::open(quantile_store, quantile_config)?;
        let last_seen = log.last()?.map(|record| BlockInfo {
            height: record.block_height,
            hash: record.block_hash,
        });

        let status = Arc::new(RwLock::new(SyncStatus {
            state: EngineState::Idle,
            last_seen: last_seen.clone(),
        }));

        Ok(Self {
            client,
            log,
            quantile,
            sampler,
            config,
            last_seen,
            sampled_through: None,
            status,
        })
    }

    /// Handle for concurrent readers (the query API).
    pub fn status_handle(&self) -> StatusHandle {
        Arc::clone(&self.status)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        self.status.read().state
    }

    /// The newest fully processed block.
    pub fn last_seen(&self) -> Option<BlockInfo> {
        self.last_seen.clone()
    }

    fn batch_size(&self) -> u64 {
        self.config
            .proof_of_fee
            .transaction_fee_quantile
            .batch_size_in_blocks
    }

    fn set_state(&mut self, state: EngineState) {
        let mut status = self.status.write();
        status.state = state;
        status.last_seen = self.last_seen.clone();
    }

    /// Reconcile in-memory position with persisted state after a
    /// restart.
    ///
    /// The transaction log pins us to the last anchor's block; complete
    /// quantile batches may reach further, in which case we resume from
    /// the end of the last one. If the upstream no longer has that
    /// block the chain reorganized while we were down, and a rollback
    /// reconciles before the first tick.
    pub async fn recover(&mut self) -> Result<()> {
        self.last_seen = self.log.last()?.map(|record| BlockInfo {
            height: record.block_height,
            hash: record.block_hash,
        });

        if let Some(last_batch) = self.quantile.last_batch_id() {
            let batch_end = (last_batch + 1) * self.batch_size() - 1;
            let beyond_anchor = self
                .last_seen
                .as_ref()
                .map_or(true, |last| batch_end > last.height);
            if beyond_anchor {
                match self.client.block_hash(batch_end).await {
                    Ok(hash) => {
                        self.last_seen = Some(BlockInfo {
                            height: batch_end,
                            hash,
                        });
                    }
                    Err(Error::NotFound(_)) => {
                        warn!(batch_end, "upstream lost our last batch, reverting");
                        self.revert().await?;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        self.set_state(EngineState::Idle);
        info!(
            last_seen = ?self.last_seen.as_ref().map(|b| b.height),
            "sync engine recovered"
        );
        Ok(())
    }

    /// One poll cycle: detect forks, then process new blocks forward.
    ///
    /// `last_seen` advances only when the whole tick succeeds.
    pub async fn tick(&mut self) -> Result<()> {
        if matches!(self.state(), EngineState::Halted) {
            return Err(Error::invariant("sync engine is halted"));
        }

        let tip = self.client.tip_height().await?;

        if let Some(last) = self.last_seen.clone() {
            let forked = match self.client.block_hash(last.height).await {
                Ok(hash) => hash != last.hash,
                Err(Error::NotFound(_)) => true,
                Err(e) => return Err(e),
            };
            if forked {
                self.set_state(EngineState::Reverting);
                return match self.revert().await {
                    Ok(()) => {
                        self.set_state(EngineState::Idle);
                        Ok(())
                    }
                    Err(e) => {
                        error!(error = %e, "rollback failed, halting");
                        self.set_state(EngineState::Halted);
                        Err(e)
                    }
                };
            }
        }

        let start = self
            .last_seen
            .as_ref()
            .map(|last| last.height + 1)
            .unwrap_or(self.config.genesis_block_number);
        if start > tip {
            self.set_state(EngineState::Idle);
            return Ok(());
        }

        self.set_state(EngineState::Syncing { from: start, to: tip });
        debug!(from = start, to = tip, "processing blocks");

        let mut newest: Option<BlockInfo> = None;
        for height in start..=tip {
            match self.process_block(height).await {
                Ok(info) => newest = Some(info),
                Err(e) => {
                    warn!(height, error = %e, "block processing failed, tick aborted");
                    self.set_state(EngineState::Idle);
                    return Err(e);
                }
            }
        }

        if let Some(info) = newest {
            self.last_seen = Some(info);
        }
        self.set_state(EngineState::Idle);
        Ok(())
    }

    /// Ingest one block: extract anchors, feed the sampler, and at a
    /// batch boundary compute sampled fees and persist the quantile
    /// snapshot.
    async fn process_block(&mut self, height: u64) -> Result<BlockInfo> {
        let block = self.client.block(height).await?;
        let batch_size = self.batch_size();

        self.sampler.reseed(block.hash.as_bytes());

        let extraction = extract_anchors(
            &block,
            self.config.anchor_prefix.as_bytes(),
            self.config.max_transaction_input_count,
        );

        for anchor in &extraction.anchors {
            let tx = &block.transactions[anchor.tx_index as usize];
            let fee_paid = transaction_fee(self.client.as_ref(), tx).await?;
            let record = AnchorRecord {
                transaction_number: txnum::construct(height, anchor.tx_index)?,
                block_height: height,
                block_hash: block.hash.clone(),
                anchor_payload: anchor.payload.clone(),
                fee_paid,
            };
            self.log.append(&record)?;
            info!(
                height,
                tx_index = anchor.tx_index,
                fee_paid,
                "anchor recorded"
            );
        }

        let already_sampled = self
            .sampled_through
            .map_or(false, |through| height <= through);
        if !already_sampled {
            for candidate in &extraction.sampling_candidates {
                self.sampler.observe(candidate.clone());
            }
            self.sampled_through = Some(height);
        }

        if is_batch_boundary(height, batch_size) {
            let id = batch_id(height, batch_size);
            let already_persisted = self
                .quantile
                .last_batch_id()
                .map_or(false, |last| id <= last);
            if already_persisted {
                // Tick retry over a boundary whose snapshot survived;
                // nothing to recompute.
                debug!(batch = id, "batch snapshot already persisted, skipping");
            } else {
                let sampled: Vec<String> = self.sampler.sample().to_vec();
                let mut fees = Vec::with_capacity(sampled.len());
                for txid in &sampled {
                    let tx = self.client.raw_transaction(txid).await?;
                    fees.push(transaction_fee(self.client.as_ref(), &tx).await?);
                }
                self.quantile.add(id, &fees)?;
            }
            self.sampler.clear();
        }

        Ok(BlockInfo {
            height,
            hash: block.hash,
        })
    }

    /// Roll the transaction log and quantile state back to a chain
    /// prefix that agrees with the upstream at every stored height.
    ///
    /// Probes the log at exponentially spaced offsets from the tail; on
    /// finding a survivor, truncates to the start of the survivor's
    /// successor batch so every remaining snapshot covers a fully
    /// observed batch. If nothing survives, shrinks past the deepest
    /// probe and tries again.
    pub async fn revert(&mut self) -> Result<()> {
        warn!("chain reorganization detected, reverting local state");
        let batch_size = self.batch_size();

        loop {
            if self.log.count()? == 0 {
                return self.reset_to_genesis();
            }

            let probes = self.log.exponentially_spaced()?;
            let mut survivor = None;
            for probe in &probes {
                match self.client.block_hash(probe.block_height).await {
                    Ok(hash) if hash == probe.block_hash => {
                        survivor = Some(probe.clone());
                        break;
                    }
                    Ok(_) | Err(Error::NotFound(_)) => continue,
                    Err(e) => return Err(e),
                }
            }

            match survivor {
                Some(survivor) => {
                    debug!(height = survivor.block_height, "found surviving record");
                    let revert_to = batch_start(survivor.block_height + 1, batch_size);
                    if revert_to <= self.config.genesis_block_number {
                        return self.reset_to_genesis();
                    }

                    let keep_below = txnum::construct(revert_to, 0)?;
                    self.log.remove_later_than(Some(keep_below - 1))?;
                    self.sampler.clear();
                    self.sampled_through = None;
                    self.quantile
                        .remove_batches_ge(batch_id(revert_to, batch_size))?;

                    let resume_height = revert_to - 1;
                    let resume_hash = self.client.block_hash(resume_height).await?;
                    self.last_seen = Some(BlockInfo {
                        height: resume_height,
                        hash: resume_hash,
                    });
                    info!(resume_height, "rollback complete");
                    return Ok(());
                }
                None => {
                    let oldest = probes
                        .last()
                        .ok_or_else(|| Error::invariant("no probes for a non-empty log"))?;
                    let bound = txnum::construct(oldest.block_height, 0)?;
                    debug!(
                        height = oldest.block_height,
                        "no probe survived, shrinking history"
                    );
                    if bound == 0 {
                        self.log.remove_later_than(None)?;
                    } else {
                        self.log.remove_later_than(Some(bound - 1))?;
                    }
                }
            }
        }
    }

    /// Forget everything and resume scanning from the genesis block.
    fn reset_to_genesis(&mut self) -> Result<()> {
        self.log.remove_later_than(None)?;
        self.quantile.remove_batches_ge(0)?;
        self.sampler.clear();
        self.sampled_through = None;
        self.last_seen = None;
        info!(
            genesis = self.config.genesis_block_number,
            "rollback exhausted history, resuming from genesis"
        );
        Ok(())
    }

    /// Poll loop: one tick per period, stopping on shutdown or halt.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_secs(self.config.transaction_poll_period_seconds);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(period_secs = period.as_secs(), "sync engine started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("sync engine stopping");
                    return;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        if matches!(self.state(), EngineState::Halted) {
                            error!(error = %e, "sync engine halted, external restart required");
                            return;
                        }
                        warn!(error = %e, "tick failed, retrying next period");
                    }
                }
            }
        }
    }
}
