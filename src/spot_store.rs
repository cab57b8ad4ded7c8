use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use thiserror::Error;
use uuid::Uuid;

use crate::config::PersistenceMode;
use crate::main_db::SpotDb;
use crate::visited_spot::{BoundingBox, Coordinate, VisitedSpot};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum UpsertAction {
    Inserted,
    Merged,
}

/// The state of a spot right after an upsert touched it.
#[derive(Clone, Debug, PartialEq)]
pub struct Upserted {
    pub spot: VisitedSpot,
    pub action: UpsertAction,
}

#[derive(Error, Debug)]
pub enum StoreError {
    /// The in-memory store has the change, the database does not. The
    /// in-memory state stays authoritative for the session.
    #[error("spot {} was updated in memory but could not be persisted: {source}", .upserted.spot.id)]
    Degraded {
        upserted: Upserted,
        #[source]
        source: anyhow::Error,
    },
}

// Spots plus a uniform grid over them. A grid cell is (slightly more than)
// one merge delta wide, so any spot within the merge box of a coordinate
// sits in the 3x3 cells around it.
struct SpotIndex {
    spots: Vec<VisitedSpot>,
    by_id: HashMap<Uuid, usize>,
    grid: HashMap<(i64, i64), Vec<usize>>,
    cell_size: f64,
}

impl SpotIndex {
    fn new(merge_delta: f64) -> Self {
        Self {
            spots: Vec::new(),
            by_id: HashMap::new(),
            grid: HashMap::new(),
            // the extra margin keeps float rounding from pushing a match two
            // cells away
            cell_size: merge_delta * (1.0 + 1e-9),
        }
    }

    fn cell_of(&self, coordinate: &Coordinate) -> (i64, i64) {
        (
            (coordinate.latitude() / self.cell_size).floor() as i64,
            (coordinate.longitude() / self.cell_size).floor() as i64,
        )
    }

    // Earliest inserted spot wins when more than one is in range, same as a
    // linear scan would give.
    fn find_match(&self, coordinate: &Coordinate, merge_delta: f64) -> Option<usize> {
        let (row, col) = self.cell_of(coordinate);
        (row - 1..=row + 1)
            .flat_map(|r| (col - 1..=col + 1).map(move |c| (r, c)))
            .filter_map(|cell| self.grid.get(&cell))
            .flatten()
            .copied()
            .filter(|i| self.spots[*i].coordinate.within_box_of(coordinate, merge_delta))
            .min()
    }

    fn push(&mut self, spot: VisitedSpot) {
        let i = self.spots.len();
        let cell = self.cell_of(&spot.coordinate);
        self.grid.entry(cell).or_default().push(i);
        self.by_id.insert(spot.id, i);
        self.spots.push(spot);
    }
}

fn write_to_db(db: &mut dyn SpotDb, upserted: &Upserted) -> Result<()> {
    match upserted.action {
        UpsertAction::Inserted => db.insert(&upserted.spot),
        UpsertAction::Merged => db.save(&upserted.spot),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// How many background write failures are kept until the caller takes
/// them. Older ones are dropped and only counted.
pub const MAX_PENDING_WRITE_FAILURES: usize = 100;

#[derive(Default)]
struct FailureLog {
    recent: VecDeque<StoreError>,
    dropped: usize,
}

impl FailureLog {
    fn push(&mut self, error: StoreError) {
        if self.recent.len() == MAX_PENDING_WRITE_FAILURES {
            self.recent.pop_front();
            self.dropped += 1;
        }
        self.recent.push_back(error);
    }
}

enum WriteCommand {
    Write(Upserted),
    Flush(mpsc::Sender<Result<()>>),
}

// Owns the database on a dedicated thread so callers never wait on disk.
struct WriteBehind {
    sender: Mutex<Option<mpsc::Sender<WriteCommand>>>,
    failures: Arc<Mutex<FailureLog>>,
    worker: Option<JoinHandle<()>>,
}

impl WriteBehind {
    fn start(mut db: Box<dyn SpotDb>) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<WriteCommand>();
        let failures = Arc::new(Mutex::new(FailureLog::default()));
        let worker_failures = failures.clone();
        let worker = thread::Builder::new()
            .name("spot-writer".to_string())
            .spawn(move || {
                // exits once every sender is dropped
                while let Ok(command) = rx.recv() {
                    match command {
                        WriteCommand::Write(upserted) => {
                            if let Err(source) = write_to_db(db.as_mut(), &upserted) {
                                warn!(
                                    "[spot_store] background write failed for spot {}: {:#}",
                                    upserted.spot.id, source
                                );
                                lock(&worker_failures)
                                    .push(StoreError::Degraded { upserted, source });
                            }
                        }
                        WriteCommand::Flush(ack) => {
                            let _ = ack.send(db.flush());
                        }
                    }
                }
                debug!("[spot_store] writer thread stopped");
            })?;
        Ok(Self {
            sender: Mutex::new(Some(tx)),
            failures,
            worker: Some(worker),
        })
    }

    fn send(&self, command: WriteCommand) -> Result<()> {
        match lock(&self.sender).as_ref() {
            None => bail!("writer thread is stopped"),
            Some(sender) => sender
                .send(command)
                .map_err(|_| anyhow!("writer thread is gone")),
        }
    }
}

impl Drop for WriteBehind {
    fn drop(&mut self) {
        // dropping the sender lets the worker drain the queue and exit
        lock(&self.sender).take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("[spot_store] writer thread panicked");
            }
        }
    }
}

enum Persister {
    Immediate(Mutex<Box<dyn SpotDb>>),
    WriteBehind(WriteBehind),
}

impl Persister {
    fn write(&self, upserted: Upserted) -> Result<Upserted, StoreError> {
        let result = match self {
            Persister::Immediate(db) => write_to_db(lock(db).as_mut(), &upserted),
            Persister::WriteBehind(write_behind) => {
                write_behind.send(WriteCommand::Write(upserted.clone()))
            }
        };
        match result {
            Ok(()) => Ok(upserted),
            Err(source) => {
                warn!(
                    "[spot_store] failed to persist spot {}: {:#}",
                    upserted.spot.id, source
                );
                Err(StoreError::Degraded { upserted, source })
            }
        }
    }
}

/// The set of visited spots. Shared between the ingest side and the
/// readers (renderer, statistics), see `upsert` and `snapshot`.
pub struct SpotStore {
    merge_delta: f64,
    index: RwLock<SpotIndex>,
    persister: Option<Persister>,
}

impl SpotStore {
    /// A store that only lives in memory.
    pub fn in_memory(merge_delta: f64) -> Self {
        Self {
            merge_delta,
            index: RwLock::new(SpotIndex::new(merge_delta)),
            persister: None,
        }
    }

    /// Loads everything `db` has and keeps writing changes back to it.
    pub fn open(merge_delta: f64, mut db: Box<dyn SpotDb>, mode: PersistenceMode) -> Result<Self> {
        let spots = db.load()?;
        info!(
            "[spot_store] loaded {} spots, persistence mode: {:?}",
            spots.len(),
            mode
        );
        let mut index = SpotIndex::new(merge_delta);
        for spot in spots {
            index.push(spot);
        }
        let persister = match mode {
            PersistenceMode::Immediate => Persister::Immediate(Mutex::new(db)),
            PersistenceMode::WriteBehind => Persister::WriteBehind(WriteBehind::start(db)?),
        };
        Ok(Self {
            merge_delta,
            index: RwLock::new(index),
            persister: Some(persister),
        })
    }

    pub fn merge_delta(&self) -> f64 {
        self.merge_delta
    }

    /// Records a visit at `coordinate`. Either bumps the first spot whose
    /// merge box contains it or creates a new one.
    ///
    /// The lookup and the mutation happen under one write lock, so fixes
    /// racing for the same new place still produce a single spot. The
    /// database write happens after the lock is released; if it fails the
    /// in-memory change is kept and `StoreError::Degraded` is returned.
    pub fn upsert(&self, coordinate: Coordinate, at: DateTime<Utc>) -> Result<Upserted, StoreError> {
        let upserted = {
            let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
            match index.find_match(&coordinate, self.merge_delta) {
                Some(i) => {
                    let spot = &mut index.spots[i];
                    spot.visit(at);
                    Upserted {
                        spot: spot.clone(),
                        action: UpsertAction::Merged,
                    }
                }
                None => {
                    let spot = VisitedSpot::new(coordinate, at);
                    index.push(spot.clone());
                    Upserted {
                        spot,
                        action: UpsertAction::Inserted,
                    }
                }
            }
        };

        match &self.persister {
            None => Ok(upserted),
            Some(persister) => persister.write(upserted),
        }
    }

    /// A copy of every spot, in insertion order.
    pub fn snapshot(&self) -> Vec<VisitedSpot> {
        self.read_index().spots.clone()
    }

    /// Spots inside `bbox` (inclusive), in insertion order.
    pub fn query(&self, bbox: &BoundingBox) -> Vec<VisitedSpot> {
        self.read_index()
            .spots
            .iter()
            .filter(|spot| bbox.contains(&spot.coordinate))
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &Uuid) -> Option<VisitedSpot> {
        let index = self.read_index();
        index.by_id.get(id).map(|i| index.spots[*i].clone())
    }

    pub fn len(&self) -> usize {
        self.read_index().spots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits until every queued write reached the database.
    pub fn flush(&self) -> Result<()> {
        match &self.persister {
            None => Ok(()),
            Some(Persister::Immediate(db)) => lock(db).flush(),
            Some(Persister::WriteBehind(write_behind)) => {
                let (ack_tx, ack_rx) = mpsc::channel();
                write_behind.send(WriteCommand::Flush(ack_tx))?;
                ack_rx
                    .recv()
                    .map_err(|_| anyhow!("writer thread is gone"))?
            }
        }
    }

    /// Failures of background writes since the last call, at most
    /// `MAX_PENDING_WRITE_FAILURES` of the newest. Always empty unless the
    /// store runs in `PersistenceMode::WriteBehind`.
    pub fn take_write_failures(&self) -> Vec<StoreError> {
        match &self.persister {
            Some(Persister::WriteBehind(write_behind)) => {
                let mut failures = lock(&write_behind.failures);
                std::mem::take(&mut failures.recent).into()
            }
            _ => Vec::new(),
        }
    }

    /// Background write failures that were discarded because nobody took
    /// them in time, over the lifetime of the store.
    pub fn dropped_write_failures(&self) -> usize {
        match &self.persister {
            Some(Persister::WriteBehind(write_behind)) => lock(&write_behind.failures).dropped,
            _ => 0,
        }
    }

    fn read_index(&self) -> std::sync::RwLockReadGuard<'_, SpotIndex> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }
}
