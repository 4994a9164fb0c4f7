// 9.0: durable state. consumed at startup (recovery) and shutdown (save), never mid-loop.
// the trait is the contract; MemoryStore backs tests, JsonFileStore a single-process bot.

use crate::position::Position;
use crate::runner::EquityPoint;
use crate::signal::OrderIntent;
use crate::types::{Quote, Timestamp};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Aggregate bot state. The kill switch flag survives restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotState {
    pub equity: Quote,
    pub high_water_mark: Quote,
    pub kill_switch_active: bool,
    pub kill_switch_since: Option<Timestamp>,
    pub saved_at: Timestamp,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub trait StateStore: Send + Sync {
    fn save_snapshot(&self, point: &EquityPoint) -> Result<(), StoreError>;
    fn load_snapshots(&self) -> Result<Vec<EquityPoint>, StoreError>;

    fn save_positions(&self, positions: &[Position]) -> Result<(), StoreError>;
    fn load_positions(&self) -> Result<Vec<Position>, StoreError>;

    fn save_pending_orders(&self, orders: &[OrderIntent]) -> Result<(), StoreError>;
    fn load_pending_orders(&self) -> Result<Vec<OrderIntent>, StoreError>;

    fn save_bot_state(&self, state: &BotState) -> Result<(), StoreError>;
    /// None on first start.
    fn load_bot_state(&self) -> Result<Option<BotState>, StoreError>;

    fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    snapshots: Vec<EquityPoint>,
    positions: Vec<Position>,
    orders: Vec<OrderIntent>,
    bot: Option<BotState>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn save_snapshot(&self, point: &EquityPoint) -> Result<(), StoreError> {
        self.inner.lock().snapshots.push(point.clone());
        Ok(())
    }

    fn load_snapshots(&self) -> Result<Vec<EquityPoint>, StoreError> {
        Ok(self.inner.lock().snapshots.clone())
    }

    fn save_positions(&self, positions: &[Position]) -> Result<(), StoreError> {
        self.inner.lock().positions = positions.to_vec();
        Ok(())
    }

    fn load_positions(&self) -> Result<Vec<Position>, StoreError> {
        Ok(self.inner.lock().positions.clone())
    }

    fn save_pending_orders(&self, orders: &[OrderIntent]) -> Result<(), StoreError> {
        self.inner.lock().orders = orders.to_vec();
        Ok(())
    }

    fn load_pending_orders(&self) -> Result<Vec<OrderIntent>, StoreError> {
        Ok(self.inner.lock().orders.clone())
    }

    fn save_bot_state(&self, state: &BotState) -> Result<(), StoreError> {
        self.inner.lock().bot = Some(state.clone());
        Ok(())
    }

    fn load_bot_state(&self) -> Result<Option<BotState>, StoreError> {
        Ok(self.inner.lock().bot.clone())
    }
}

// 9.1: one json file per collection, equity appended as json lines
const BOT_STATE_FILE: &str = "bot_state.json";
const POSITIONS_FILE: &str = "positions.json";
const ORDERS_FILE: &str = "pending_orders.json";
const EQUITY_FILE: &str = "equity.jsonl";

#[derive(Debug)]
pub struct JsonFileStore {
    dir: PathBuf,
    // serializes writers inside one process
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    // write to a temp file then rename, so a crash never leaves half a file
    fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        let target = self.path(name);
        let tmp = self.path(&format!("{name}.tmp"));
        let bytes = serde_json::to_vec_pretty(value)?;
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &target)?;
        debug!(file = %target.display(), "state saved");
        Ok(())
    }

    fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, StoreError> {
        let target = self.path(name);
        if !target.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&target)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}

impl StateStore for JsonFileStore {
    fn save_snapshot(&self, point: &EquityPoint) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(EQUITY_FILE))?;
        let line = serde_json::to_string(point)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    fn load_snapshots(&self) -> Result<Vec<EquityPoint>, StoreError> {
        let target = self.path(EQUITY_FILE);
        if !target.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(fs::File::open(target)?);
        let mut out = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            out.push(serde_json::from_str(&line)?);
        }
        Ok(out)
    }

    fn save_positions(&self, positions: &[Position]) -> Result<(), StoreError> {
        self.write_json(POSITIONS_FILE, positions)
    }

    fn load_positions(&self) -> Result<Vec<Position>, StoreError> {
        Ok(self.read_json::<Vec<Position>>(POSITIONS_FILE)?.unwrap_or_default())
    }

    fn save_pending_orders(&self, orders: &[OrderIntent]) -> Result<(), StoreError> {
        self.write_json(ORDERS_FILE, orders)
    }

    fn load_pending_orders(&self) -> Result<Vec<OrderIntent>, StoreError> {
        Ok(self.read_json::<Vec<OrderIntent>>(ORDERS_FILE)?.unwrap_or_default())
    }

    fn save_bot_state(&self, state: &BotState) -> Result<(), StoreError> {
        self.write_json(BOT_STATE_FILE, state)
    }

    fn load_bot_state(&self) -> Result<Option<BotState>, StoreError> {
        self.read_json(BOT_STATE_FILE)
    }
}
