//! Chain store contracts and RocksDB implementation
//!
//! Ingestion only ever needs the write side ([`ChainWriter`]) and the query
//! tooling only the read side ([`ChainReader`]). A single [`RocksChainStore`]
//! implements both, using column families to organize the data.

use crate::keys::{
    decode_block_key, decode_block_tx_key, encode_block_key, encode_block_tx_key, encode_tx_key,
};
use crate::records::{BlockRecord, BlockView, RangeStats, TxRecord};
use alloy_primitives::B256;
use anyhow::{Context, Result};
use rocksdb::{ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;
use std::sync::Mutex;

const CF_BLOCKS: &str = "blocks";
const CF_TRANSACTIONS: &str = "transactions";
const CF_BLOCK_TXS: &str = "block_txs";
const CF_META: &str = "meta";

/// Write-side contract used by the ingestion engine.
///
/// Implementations must be safe for concurrent use by every worker.
pub trait ChainWriter: Send + Sync {
    /// Check that the store is reachable.
    fn ping(&self) -> Result<()>;

    /// Whether a block row already exists for `number`.
    fn has_scanned(&self, number: u64) -> Result<bool>;

    /// Persist a block row. Fails if a row for the same number already exists.
    fn save_block(&self, block: &BlockRecord) -> Result<()>;

    /// Persist a transaction row. Fails if a row for the same hash already exists.
    fn save_tx(&self, tx: &TxRecord) -> Result<()>;
}

/// Read-side contract used by query tooling.
pub trait ChainReader: Send + Sync {
    /// Check that the store is reachable.
    fn ping(&self) -> Result<()>;

    /// The highest-numbered persisted block.
    fn latest_block(&self) -> Result<Option<BlockView>>;

    /// A block by number, with its transaction hashes in order.
    fn block(&self, number: u64) -> Result<Option<BlockView>>;

    /// The last transaction (highest order) of the latest block.
    fn latest_tx(&self) -> Result<Option<TxRecord>>;

    /// A transaction by hash.
    fn tx(&self, hash: B256) -> Result<Option<TxRecord>>;

    /// All transactions with block number in `[start, end]` and their summed amount.
    fn range_stats(&self, start: u64, end: u64) -> Result<RangeStats>;
}

/// RocksDB-backed implementation of both store contracts.
///
/// Column families:
/// - blocks: block rows keyed by number
/// - transactions: transaction rows keyed by hash
/// - block_txs: (number, order) -> tx hash index
/// - meta: reserved for store metadata
pub struct RocksChainStore {
    db: DB,
    /// Serializes the exists-check and insert of every write.
    write_lock: Mutex<()>,
}

impl RocksChainStore {
    /// Open or create a RocksDB database at the given path.
    ///
    /// Creates all required column families if they don't exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let column_families = vec![
            ColumnFamilyDescriptor::new(CF_BLOCKS, Options::default()),
            ColumnFamilyDescriptor::new(CF_TRANSACTIONS, Options::default()),
            ColumnFamilyDescriptor::new(CF_BLOCK_TXS, Options::default()),
            ColumnFamilyDescriptor::new(CF_META, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, path, column_families)
            .context("Failed to open RocksDB database")?;

        Ok(Self {
            db,
            write_lock: Mutex::new(()),
        })
    }

    /// Open an existing database without taking the write lock.
    ///
    /// Used by query tooling while an indexer owns the database.
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        let opts = Options::default();
        let db = DB::open_cf_for_read_only(
            &opts,
            path,
            [CF_BLOCKS, CF_TRANSACTIONS, CF_BLOCK_TXS, CF_META],
            false,
        )
        .context("Failed to open RocksDB database read-only")?;

        Ok(Self {
            db,
            write_lock: Mutex::new(()),
        })
    }

    /// Get a column family handle by name.
    fn get_cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(name)
            .with_context(|| format!("Column family '{}' not found", name))
    }

    fn lock_writes(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("Store write lock poisoned"))
    }

    fn get_block_record(&self, number: u64) -> Result<Option<BlockRecord>> {
        let cf = self.get_cf(CF_BLOCKS)?;
        match self
            .db
            .get_cf(cf, encode_block_key(number))
            .context("Failed to get block")?
        {
            Some(bytes) => {
                let record =
                    postcard::from_bytes(&bytes).context("Failed to deserialize block record")?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Transaction hashes of a block, in `order`.
    fn block_tx_hashes(&self, number: u64) -> Result<Vec<B256>> {
        Ok(self
            .scan_block_txs(number, number)?
            .into_iter()
            .map(|(_, _, hash)| hash)
            .collect())
    }

    /// Walk the block_txs index for blocks in `[start, end]`.
    fn scan_block_txs(&self, start: u64, end: u64) -> Result<Vec<(u64, u32, B256)>> {
        let cf = self.get_cf(CF_BLOCK_TXS)?;
        let start_key = encode_block_tx_key(start, 0);
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&start_key, Direction::Forward));

        let mut entries = Vec::new();
        for item in iter {
            let (key, value) = item.context("Failed to read iterator")?;
            let (number, order) =
                decode_block_tx_key(&key).context("Failed to decode block tx key")?;
            if number > end {
                break;
            }
            if value.len() != 32 {
                anyhow::bail!("Tx hash must be 32 bytes, got {}", value.len());
            }
            entries.push((number, order, B256::from_slice(&value)));
        }
        Ok(entries)
    }

    fn view(&self, block: BlockRecord) -> Result<BlockView> {
        let txs = self.block_tx_hashes(block.number)?;
        Ok(BlockView { block, txs })
    }

    fn latest_block_number(&self) -> Result<Option<u64>> {
        let cf = self.get_cf(CF_BLOCKS)?;
        match self.db.iterator_cf(cf, IteratorMode::End).next() {
            Some(item) => {
                let (key, _) = item.context("Failed to read iterator")?;
                Ok(Some(decode_block_key(&key)?))
            }
            None => Ok(None),
        }
    }

    fn ping_db(&self) -> Result<()> {
        let cf = self.get_cf(CF_META)?;
        self.db
            .get_cf(cf, b"ping")
            .context("Store is not readable")?;
        Ok(())
    }
}

impl ChainWriter for RocksChainStore {
    fn ping(&self) -> Result<()> {
        self.ping_db()
    }

    fn has_scanned(&self, number: u64) -> Result<bool> {
        let cf = self.get_cf(CF_BLOCKS)?;
        let found = self
            .db
            .get_pinned_cf(cf, encode_block_key(number))
            .context("Failed to check block")?;
        Ok(found.is_some())
    }

    fn save_block(&self, block: &BlockRecord) -> Result<()> {
        let cf = self.get_cf(CF_BLOCKS)?;
        let key = encode_block_key(block.number);
        let value = postcard::to_allocvec(block).context("Failed to serialize block record")?;

        let _guard = self.lock_writes()?;
        if self
            .db
            .get_pinned_cf(cf, &key)
            .context("Failed to check block")?
            .is_some()
        {
            anyhow::bail!("Block {} is already stored", block.number);
        }
        self.db
            .put_cf(cf, &key, &value)
            .context("Failed to put block")?;
        Ok(())
    }

    fn save_tx(&self, tx: &TxRecord) -> Result<()> {
        let tx_cf = self.get_cf(CF_TRANSACTIONS)?;
        let index_cf = self.get_cf(CF_BLOCK_TXS)?;
        let key = encode_tx_key(tx.hash);
        let value = postcard::to_allocvec(tx).context("Failed to serialize tx record")?;

        let _guard = self.lock_writes()?;
        if self
            .db
            .get_pinned_cf(tx_cf, &key)
            .context("Failed to check tx")?
            .is_some()
        {
            anyhow::bail!("Transaction {:?} is already stored", tx.hash);
        }

        let mut batch = WriteBatch::default();
        batch.put_cf(tx_cf, &key, &value);
        batch.put_cf(
            index_cf,
            encode_block_tx_key(tx.block_number, tx.order),
            tx.hash.as_slice(),
        );
        self.db.write(batch).context("Failed to put tx")?;
        Ok(())
    }
}

impl ChainReader for RocksChainStore {
    fn ping(&self) -> Result<()> {
        self.ping_db()
    }

    fn latest_block(&self) -> Result<Option<BlockView>> {
        let Some(number) = self.latest_block_number()? else {
            return Ok(None);
        };
        match self.get_block_record(number)? {
            Some(block) => self.view(block).map(Some),
            None => Ok(None),
        }
    }

    fn block(&self, number: u64) -> Result<Option<BlockView>> {
        match self.get_block_record(number)? {
            Some(block) => self.view(block).map(Some),
            None => Ok(None),
        }
    }

    fn latest_tx(&self) -> Result<Option<TxRecord>> {
        let Some(number) = self.latest_block_number()? else {
            return Ok(None);
        };
        match self.block_tx_hashes(number)?.last() {
            Some(hash) => self.tx(*hash),
            None => Ok(None),
        }
    }

    fn tx(&self, hash: B256) -> Result<Option<TxRecord>> {
        let cf = self.get_cf(CF_TRANSACTIONS)?;
        match self
            .db
            .get_cf(cf, encode_tx_key(hash))
            .context("Failed to get tx")?
        {
            Some(bytes) => {
                let record =
                    postcard::from_bytes(&bytes).context("Failed to deserialize tx record")?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn range_stats(&self, start: u64, end: u64) -> Result<RangeStats> {
        let mut stats = RangeStats::default();
        if start > end {
            return Ok(stats);
        }

        for (number, order, hash) in self.scan_block_txs(start, end)? {
            let tx = self.tx(hash)?.with_context(|| {
                format!(
                    "Index entry ({}, {}) points at missing tx {:?}",
                    number, order, hash
                )
            })?;
            stats.total_amount = stats.total_amount.saturating_add(tx.amount);
            stats.txs.push(hash);
        }
        Ok(stats)
    }
}
