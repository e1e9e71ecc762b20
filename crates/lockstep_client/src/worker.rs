//! Background worker.
//!
//! The worker is a tokio task that owns a shared copy of the terrain map and
//! answers path queries off the tick loop. [`WorkerClient::initialize`] must
//! succeed before a runner can be built; the runner only accepts the
//! [`ReadyWorker`] it returns.

use std::sync::Arc;

use lockstep_core::pathfinding;
use lockstep_core::terrain::{Cell, Terrain, TerrainMap};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::error::WorkerError;

const REQUEST_QUEUE: usize = 64;

type Reply<T> = oneshot::Sender<Result<T, WorkerError>>;

enum WorkerRequest {
    Initialize {
        reply: Reply<WorkerInfo>,
    },
    FindPath {
        start: Cell,
        goal: Cell,
        over: Terrain,
        reply: Reply<Vec<Cell>>,
    },
}

/// Summary returned by a successful initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerInfo {
    /// Map width in tiles.
    pub width: u32,
    /// Map height in tiles.
    pub height: u32,
    /// Number of land tiles.
    pub land_tiles: usize,
}

/// Handle to a worker that has not been initialized yet.
#[derive(Debug)]
pub struct WorkerClient {
    requests: mpsc::Sender<WorkerRequest>,
    map: Arc<TerrainMap>,
}

/// Handle to an initialized worker.
#[derive(Debug, Clone)]
pub struct ReadyWorker {
    requests: mpsc::Sender<WorkerRequest>,
    map: Arc<TerrainMap>,
    info: WorkerInfo,
}

impl std::fmt::Debug for WorkerRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initialize { .. } => f.write_str("Initialize"),
            Self::FindPath {
                start, goal, over, ..
            } => f
                .debug_struct("FindPath")
                .field("start", start)
                .field("goal", goal)
                .field("over", over)
                .finish(),
        }
    }
}

impl WorkerClient {
    /// Start the worker task. Must be called inside a tokio runtime.
    #[must_use]
    pub fn spawn(map: Arc<TerrainMap>) -> Self {
        let (requests, rx) = mpsc::channel(REQUEST_QUEUE);
        tokio::spawn(serve(Arc::clone(&map), rx));
        Self { requests, map }
    }

    /// Initialize the worker. Failure is fatal to startup.
    pub async fn initialize(self) -> Result<ReadyWorker, WorkerError> {
        let info = request(&self.requests, |reply| WorkerRequest::Initialize { reply }).await?;
        info!(
            width = info.width,
            height = info.height,
            land_tiles = info.land_tiles,
            "worker initialized"
        );
        Ok(ReadyWorker {
            requests: self.requests,
            map: self.map,
            info,
        })
    }
}

impl ReadyWorker {
    /// Map summary reported at initialization.
    #[must_use]
    pub const fn info(&self) -> WorkerInfo {
        self.info
    }

    /// The map the worker was initialized with.
    #[must_use]
    pub fn map(&self) -> Arc<TerrainMap> {
        Arc::clone(&self.map)
    }

    /// Shortest 4-connected path from `start` to `goal` over `over` tiles.
    pub async fn find_path(
        &self,
        start: Cell,
        goal: Cell,
        over: Terrain,
    ) -> Result<Vec<Cell>, WorkerError> {
        request(&self.requests, |reply| WorkerRequest::FindPath {
            start,
            goal,
            over,
            reply,
        })
        .await
    }
}

async fn request<T>(
    requests: &mpsc::Sender<WorkerRequest>,
    build: impl FnOnce(Reply<T>) -> WorkerRequest,
) -> Result<T, WorkerError> {
    let (reply, response) = oneshot::channel();
    requests
        .send(build(reply))
        .await
        .map_err(|_| WorkerError::Unavailable)?;
    response.await.map_err(|_| WorkerError::Unavailable)?
}

async fn serve(map: Arc<TerrainMap>, mut requests: mpsc::Receiver<WorkerRequest>) {
    let mut initialized = false;
    while let Some(request) = requests.recv().await {
        match request {
            WorkerRequest::Initialize { reply } => {
                let result = validate(&map);
                initialized = result.is_ok();
                let _ = reply.send(result);
            }
            WorkerRequest::FindPath {
                start,
                goal,
                over,
                reply,
            } => {
                let result = if initialized {
                    pathfinding::find_path(&map, start, goal, over)
                        .map_err(|e| WorkerError::Path(e.to_string()))
                } else {
                    Err(WorkerError::NotInitialized)
                };
                let _ = reply.send(result);
            }
        }
    }
    debug!("worker stopped");
}

fn validate(map: &TerrainMap) -> Result<WorkerInfo, WorkerError> {
    let land_tiles = map.land_count();
    if land_tiles == 0 {
        return Err(WorkerError::Init(format!(
            "{}x{} map has no land tiles",
            map.width(),
            map.height()
        )));
    }
    Ok(WorkerInfo {
        width: map.width(),
        height: map.height(),
        land_tiles,
    })
}
