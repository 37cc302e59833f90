//! Rolling cache of recent blocks used to find punishments.

#[cfg(test)]
#[path = "block_window_tests.rs"]
mod tests;

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::chain::ChainClient;
use crate::types::{BlockRecord, PunishmentEvent};

/// Average block production interval of the chain.
pub const BLOCK_INTERVAL: Duration = Duration::from_secs(6);

/// Number of blocks produced during `interval`, at least one.
pub fn window_capacity(interval: Duration) -> usize {
    ((interval.as_secs() / BLOCK_INTERVAL.as_secs()) as usize).max(1)
}

/// Bounded sequence of blocks, oldest first.
#[derive(Debug, Clone)]
pub struct BlockWindow {
    blocks: VecDeque<BlockRecord>,
    numbers: HashSet<u64>,
    max_size: usize,
}

impl BlockWindow {
    pub fn new(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            blocks: VecDeque::with_capacity(max_size),
            numbers: HashSet::with_capacity(max_size),
            max_size,
        }
    }

    /// Append a block, evicting the oldest when full.
    ///
    /// Returns `false` and leaves the window unchanged when `record` is not
    /// newer than the newest resident block.
    pub fn push(&mut self, record: BlockRecord) -> bool {
        if let Some(newest) = self.blocks.back() {
            if record.number <= newest.number {
                return false;
            }
        }
        if self.blocks.len() >= self.max_size {
            if let Some(evicted) = self.blocks.pop_front() {
                self.numbers.remove(&evicted.number);
            }
        }
        self.numbers.insert(record.number);
        self.blocks.push_back(record);
        true
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn contains(&self, number: u64) -> bool {
        self.numbers.contains(&number)
    }

    pub fn oldest(&self) -> Option<u64> {
        self.blocks.front().map(|b| b.number)
    }

    pub fn newest(&self) -> Option<u64> {
        self.blocks.back().map(|b| b.number)
    }

    pub fn blocks(&self) -> impl Iterator<Item = &BlockRecord> {
        self.blocks.iter()
    }

    /// Punishments whose source is `account`, oldest block first.
    pub fn punishments_for(&self, account: &str) -> Vec<PunishmentEvent> {
        self.blocks
            .iter()
            .flat_map(|b| b.punishments.iter())
            .filter(|p| p.from == account)
            .cloned()
            .collect()
    }
}

/// Size and bounds of the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowStatus {
    pub len: usize,
    pub oldest: Option<u64>,
    pub newest: Option<u64>,
}

/// Shared block window fed by a polling task.
pub struct BlockWindowCache {
    window: RwLock<BlockWindow>,
    chain: Arc<dyn ChainClient>,
    /// Highest block number already requested.
    cursor: AtomicU64,
    initialized: AtomicBool,
    active: AtomicBool,
    poll_interval: Duration,
}

impl BlockWindowCache {
    pub fn new(chain: Arc<dyn ChainClient>, capacity: usize) -> Self {
        Self {
            window: RwLock::new(BlockWindow::new(capacity)),
            chain,
            cursor: AtomicU64::new(0),
            initialized: AtomicBool::new(false),
            active: AtomicBool::new(true),
            poll_interval: BLOCK_INTERVAL / 2,
        }
    }

    /// Sized to cover one scrape interval.
    pub fn for_interval(chain: Arc<dyn ChainClient>, interval: Duration) -> Self {
        Self::new(chain, window_capacity(interval))
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn capacity(&self) -> usize {
        self.window.read().max_size()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Highest block number ingested so far.
    pub fn cursor(&self) -> u64 {
        self.cursor.load(Ordering::Acquire)
    }

    /// Back-fill the window up to the current head.
    ///
    /// Runs at most once per cache. Blocks that fail to load are skipped. If
    /// the head cannot be read the cache stays uninitialized so the poller
    /// can try again.
    pub async fn initialize(&self) {
        if self
            .initialized
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let head = match self.chain.current_block_height().await {
            Ok(head) => head,
            Err(e) => {
                warn!("Failed to query chain head, block window starts empty: {}", e);
                self.initialized.store(false, Ordering::Release);
                return;
            }
        };

        let capacity = self.capacity() as u64;
        let first = head.saturating_sub(capacity - 1).max(1);
        for number in first..=head {
            self.fetch_and_push(number).await;
        }
        self.cursor.store(head, Ordering::Release);

        let status = self.status();
        info!(
            "Block window initialized with {} of {} blocks up to #{}",
            status.len, capacity, head
        );
    }

    /// Fetch every block after the cursor up to the current head.
    pub async fn poll_once(&self) {
        if !self.is_initialized() {
            self.initialize().await;
            return;
        }

        let head = match self.chain.current_block_height().await {
            Ok(head) => head,
            Err(e) => {
                warn!("Failed to query chain head: {}", e);
                return;
            }
        };

        let cursor = self.cursor();
        if head <= cursor {
            return;
        }
        for number in cursor + 1..=head {
            self.fetch_and_push(number).await;
        }
        self.cursor.store(head, Ordering::Release);
    }

    /// Poll until [`deactivate`](Self::deactivate) is called.
    pub async fn run_poller(self: Arc<Self>) {
        debug!("Block window poller started");
        while self.active.load(Ordering::Acquire) {
            self.poll_once().await;
            tokio::time::sleep(self.poll_interval).await;
        }
        debug!("Block window poller stopped");
    }

    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    async fn fetch_and_push(&self, number: u64) {
        match self.chain.block_by_number(number).await {
            Ok(record) => {
                if !self.push(record) {
                    debug!("Ignored block #{} older than the window", number);
                }
            }
            Err(e) => warn!("Failed to load block #{}: {}", number, e),
        }
    }

    pub fn push(&self, record: BlockRecord) -> bool {
        self.window.write().push(record)
    }

    /// Owned copy of the resident blocks, oldest first.
    pub fn snapshot(&self) -> Vec<BlockRecord> {
        self.window.read().blocks().cloned().collect()
    }

    pub fn punishments_for(&self, account: &str) -> Vec<PunishmentEvent> {
        self.window.read().punishments_for(account)
    }

    pub fn status(&self) -> WindowStatus {
        let window = self.window.read();
        WindowStatus {
            len: window.len(),
            oldest: window.oldest(),
            newest: window.newest(),
        }
    }
}
