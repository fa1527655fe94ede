//! Chain-tip monitor with reorg detection
//!
//! The monitor keeps a window of the most recent (height, hash) checkpoints,
//! persisted in storage. Every poll compares the window with the node's
//! chain to find the common tip, then notifies each subscribed account with
//! `(chain_tip, common_tip)`. Block hashes are always computed locally from
//! the raw header.

use crate::{CancelToken, Error, NodeClient, Result};
use hsw_core::Block;
use hsw_storage_sqlite::{BlockCheckpoint, CheckpointStorage, SharedDatabase};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, warn};

/// Checkpoints kept in the window
pub const DEFAULT_CHECKPOINT_WINDOW: u32 = 10;

/// Tip advance beyond which only the newest checkpoint is re-verified
pub const DEFAULT_FINALITY_DEPTH: u32 = 10;

/// Poll interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Monitor configuration
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Time between polls
    pub poll_interval: Duration,
    /// Finality depth
    pub finality_depth: u32,
    /// Number of checkpoints kept
    pub checkpoint_window: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            finality_depth: DEFAULT_FINALITY_DEPTH,
            checkpoint_window: DEFAULT_CHECKPOINT_WINDOW,
        }
    }
}

/// Published after each successful poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockNotification {
    /// Node's chain height
    pub chain_tip: u32,
    /// Highest height on which our previous view and the chain agree
    pub common_tip: u32,
}

impl BlockNotification {
    /// True when blocks above `common_tip` were replaced
    pub fn is_reorg(&self) -> bool {
        self.common_tip < self.chain_tip
    }
}

/// Monitor counters
#[derive(Debug, Default)]
pub struct MonitorCounters {
    /// Completed polls
    pub polls: AtomicU64,
    /// Reorgs detected
    pub reorgs: AtomicU64,
    /// Notifications delivered
    pub notifications: AtomicU64,
    /// Failed polls
    pub errors: AtomicU64,
}

/// Monitor counters snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorCountersSnapshot {
    /// Completed polls
    pub polls: u64,
    /// Reorgs detected
    pub reorgs: u64,
    /// Notifications delivered
    pub notifications: u64,
    /// Failed polls
    pub errors: u64,
}

impl MonitorCounters {
    /// Snapshot the counters
    pub fn snapshot(&self) -> MonitorCountersSnapshot {
        MonitorCountersSnapshot {
            polls: self.polls.load(Ordering::Relaxed),
            reorgs: self.reorgs.load(Ordering::Relaxed),
            notifications: self.notifications.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Block monitor
pub struct BlockMonitor {
    client: Arc<dyn NodeClient>,
    db: SharedDatabase,
    config: MonitorConfig,
    /// Highest first
    window: RwLock<Vec<BlockCheckpoint>>,
    subscribers: Mutex<Vec<mpsc::Sender<BlockNotification>>>,
    poke: Notify,
    counters: MonitorCounters,
}

impl BlockMonitor {
    /// Create a monitor, restoring the persisted checkpoint window
    pub fn new(client: Arc<dyn NodeClient>, db: SharedDatabase, config: MonitorConfig) -> Result<Self> {
        let window = {
            let mut guard = db.lock();
            CheckpointStorage::new(&mut guard).load_window()?
        };
        if let Some(top) = window.first() {
            info!("Restored {} checkpoints, tip {}", window.len(), top.height);
        }
        Ok(Self {
            client,
            db,
            config,
            window: RwLock::new(window),
            subscribers: Mutex::new(Vec::new()),
            poke: Notify::new(),
            counters: MonitorCounters::default(),
        })
    }

    /// Register a subscriber. Each gets a channel of depth 1; a slow
    /// subscriber holds up the poll loop.
    pub fn subscribe(&self) -> mpsc::Receiver<BlockNotification> {
        let (tx, rx) = mpsc::channel(1);
        self.subscribers.lock().push(tx);
        rx
    }

    /// Trigger a poll without waiting for the interval
    pub fn poke(&self) {
        self.poke.notify_one();
    }

    /// Current checkpoint window, highest first
    pub fn checkpoints(&self) -> Vec<BlockCheckpoint> {
        self.window.read().clone()
    }

    /// Highest checkpointed height
    pub fn tip(&self) -> Option<u32> {
        self.window.read().first().map(|c| c.height)
    }

    /// Counters snapshot
    pub fn counters(&self) -> MonitorCountersSnapshot {
        self.counters.snapshot()
    }

    /// One poll cycle. Returns the notification to publish, or `None` when
    /// there is nothing to report yet.
    pub async fn poll(&self) -> Result<Option<BlockNotification>> {
        let height = self.client.get_info().await?.height;
        if height == 0 {
            return Ok(None);
        }

        let check_tip = match self.tip_checkpoint() {
            Some(cp) => cp,
            None => {
                self.refresh_window(height, None).await?;
                info!("Seeded checkpoint window at height {}", height);
                return Ok(None);
            }
        };

        if check_tip.height > height {
            return Err(Error::SafetyStop(format!(
                "node height {} is below checkpoint {}",
                height, check_tip.height
            )));
        }

        let common_tip = if height - check_tip.height > self.config.finality_depth {
            let raw = self.client.get_raw_block(check_tip.height).await?;
            let hash = Block::hash_from_raw(&raw)?;
            if hash != check_tip.hash {
                return Err(Error::SafetyStop(format!(
                    "checkpoint {} changed beyond finality depth ({} -> {})",
                    check_tip.height, check_tip.hash, hash
                )));
            }
            height
        } else {
            let ancestor = self.find_common_ancestor().await?;
            if ancestor == check_tip.height {
                height
            } else {
                self.counters.reorgs.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Reorg detected: checkpoints above {} replaced (previous tip {}, chain tip {})",
                    ancestor, check_tip.height, height
                );
                ancestor
            }
        };

        let reorg = (common_tip < height).then_some(common_tip);
        self.refresh_window(height, reorg).await?;
        Ok(Some(BlockNotification {
            chain_tip: height,
            common_tip,
        }))
    }

    /// Poll until cancelled or a safety stop. Subscriber channels close when
    /// this returns.
    pub async fn run(self: Arc<Self>, cancel: CancelToken) -> Result<()> {
        info!(
            "Block monitor started (interval {:?}, finality {}, window {})",
            self.config.poll_interval, self.config.finality_depth, self.config.checkpoint_window
        );

        let result = loop {
            if cancel.is_cancelled() {
                break Ok(());
            }

            match self.poll().await {
                Ok(notification) => {
                    self.counters.polls.fetch_add(1, Ordering::Relaxed);
                    if let Some(n) = notification {
                        debug!("Poll: chain_tip={} common_tip={}", n.chain_tip, n.common_tip);
                        self.notify(n, &cancel).await;
                    }
                }
                Err(e) if e.is_safety_stop() => {
                    error!("Block monitor stopping: {}", e);
                    break Err(e);
                }
                Err(e) => {
                    self.counters.errors.fetch_add(1, Ordering::Relaxed);
                    warn!("Poll failed, retrying next tick: {}", e);
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = self.poke.notified() => {}
            }
        };

        self.subscribers.lock().clear();
        info!("Block monitor stopped");
        result
    }

    /// Deliver to every subscriber, dropping those whose receiver is gone
    async fn notify(&self, notification: BlockNotification, cancel: &CancelToken) {
        let senders: Vec<_> = self.subscribers.lock().clone();
        let mut closed = Vec::new();

        for (i, tx) in senders.iter().enumerate() {
            tokio::select! {
                sent = tx.send(notification) => match sent {
                    Ok(()) => {
                        self.counters.notifications.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(_) => closed.push(i),
                },
                _ = cancel.cancelled() => return,
            }
        }

        if !closed.is_empty() {
            let mut subs = self.subscribers.lock();
            subs.retain(|s| !s.is_closed());
            debug!("Dropped {} closed subscribers", closed.len());
        }
    }

    fn tip_checkpoint(&self) -> Option<BlockCheckpoint> {
        self.window.read().first().copied()
    }

    /// Highest checkpoint whose hash still matches the chain
    async fn find_common_ancestor(&self) -> Result<u32> {
        let window = self.checkpoints();
        let (Some(top), Some(bottom)) = (window.first(), window.last()) else {
            return Err(Error::SafetyStop("empty checkpoint window".into()));
        };

        let raws = self
            .client
            .get_raw_blocks_batch(bottom.height, top.height - bottom.height + 1)
            .await?;
        for cp in &window {
            let offset = (cp.height - bottom.height) as usize;
            let raw = raws
                .get(offset)
                .ok_or_else(|| Error::InvalidResponse(format!("missing block {}", cp.height)))?;
            if Block::hash_from_raw(raw)? == cp.hash {
                return Ok(cp.height);
            }
        }

        Err(Error::SafetyStop(format!(
            "no checkpoint between {} and {} matches the chain",
            bottom.height, top.height
        )))
    }

    /// Rebuild the window from the blocks ending at `height` and persist it,
    /// together with the accounts' rollback target when `reorg` is set
    async fn refresh_window(&self, height: u32, reorg: Option<u32>) -> Result<()> {
        let size = self.config.checkpoint_window.max(1);
        let start = height.saturating_sub(size - 1);
        let raws = self
            .client
            .get_raw_blocks_batch(start, height - start + 1)
            .await?;

        let mut window = raws
            .iter()
            .enumerate()
            .map(|(i, raw)| -> Result<BlockCheckpoint> {
                Ok(BlockCheckpoint {
                    height: start + i as u32,
                    hash: Block::hash_from_raw(raw)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        window.reverse();

        {
            let mut guard = self.db.lock();
            CheckpointStorage::new(&mut guard).replace_window(&window, reorg)?;
        }
        *self.window.write() = window;
        Ok(())
    }
}
