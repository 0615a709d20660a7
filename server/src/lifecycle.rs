//! Engine lifecycle: one-time map preload and readiness gating.
//!
//! The only shared mutable state in the server is [`LifecycleState`], kept
//! behind a single mutex. The first caller of [`Lifecycle::ensure_initialized`]
//! moves it to `Loading` and starts a background thread; everyone else just
//! observes the current state. Loading never happens under the lock.

use crate::pathfinding::{GridSearch, GridSearchConfig, PathSource, Pathfinder};
use crate::physics::PhysicsStepper;
use crate::world::{StaticWorld, WorldError, WorldQuery};
use log::{error, info, warn};
use shared::ServiceStatus;
use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    World(#[from] WorldError),
    #[error("map loader panicked")]
    Panicked,
    #[error("failed to start loader thread: {0}")]
    Spawn(std::io::Error),
}

/// Everything request handlers need once maps are resident.
pub struct Engines {
    pub world: Arc<dyn WorldQuery>,
    pub pathfinder: Pathfinder,
    pub stepper: PhysicsStepper,
    pub loaded_maps: BTreeSet<u32>,
}

impl Engines {
    pub fn new(
        world: Arc<dyn WorldQuery>,
        primary: Option<Arc<dyn PathSource>>,
        grid: GridSearchConfig,
    ) -> Self {
        let loaded_maps = world.loaded_maps();
        Self {
            pathfinder: Pathfinder::new(primary, Arc::clone(&world), GridSearch::new(grid)),
            stepper: PhysicsStepper::new(Arc::clone(&world)),
            world,
            loaded_maps,
        }
    }
}

/// Builds the engines. Runs once, off the request path.
pub trait EngineLoader: Send + Sync {
    fn load(&self) -> Result<Engines, LoadError>;
}

/// Loads map geometry from a data directory.
pub struct DataDirLoader {
    data_dir: PathBuf,
    grid: GridSearchConfig,
}

impl DataDirLoader {
    pub fn new(data_dir: PathBuf, grid: GridSearchConfig) -> Self {
        Self { data_dir, grid }
    }
}

impl EngineLoader for DataDirLoader {
    #[cfg(not(feature = "native"))]
    fn load(&self) -> Result<Engines, LoadError> {
        let world = StaticWorld::load_dir(&self.data_dir)?;
        Ok(Engines::new(Arc::new(world), None, self.grid))
    }

    #[cfg(feature = "native")]
    fn load(&self) -> Result<Engines, LoadError> {
        use crate::native::{NativeMeshSource, NativeWorld};

        match NativeWorld::open(&self.data_dir) {
            Ok(native) => {
                let native = Arc::new(native);
                let source: Arc<dyn PathSource> = Arc::new(NativeMeshSource::new(Arc::clone(&native)));
                Ok(Engines::new(native, Some(source), self.grid))
            }
            Err(e) => {
                warn!("Native library unavailable ({}), using map files only", e);
                let world = StaticWorld::load_dir(&self.data_dir)?;
                Ok(Engines::new(Arc::new(world), None, self.grid))
            }
        }
    }
}

/// Writes status transitions to the side-channel file. Failures are logged
/// and otherwise ignored.
#[derive(Debug, Clone, Default)]
pub struct StatusReporter {
    path: Option<PathBuf>,
}

impl StatusReporter {
    pub fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    /// A reporter that writes nothing.
    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn publish(&self, status: &ServiceStatus) {
        if let Some(path) = &self.path {
            if let Err(e) = status.write_to(path) {
                warn!("Failed to write status file {}: {}", path.display(), e);
            }
        }
    }

    pub fn clear(&self) {
        if let Some(path) = &self.path {
            if let Err(e) = ServiceStatus::delete(path) {
                warn!("Failed to remove status file {}: {}", path.display(), e);
            }
        }
    }
}

pub enum LifecycleState {
    Uninitialized,
    Loading,
    Ready(Arc<Engines>),
    /// Terminal: no reload path exists.
    Failed(String),
}

/// What a caller sees when polling the lifecycle.
#[derive(Clone)]
pub enum Readiness {
    Loading,
    Ready(Arc<Engines>),
    Failed(String),
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready(_))
    }

    pub fn status(&self) -> ServiceStatus {
        match self {
            Readiness::Loading => ServiceStatus::loading(),
            Readiness::Ready(engines) => ServiceStatus::ready(engines.loaded_maps.clone()),
            Readiness::Failed(reason) => ServiceStatus::failed(reason),
        }
    }
}

pub struct Lifecycle {
    state: Mutex<LifecycleState>,
    loader: Arc<dyn EngineLoader>,
    status: StatusReporter,
}

impl Lifecycle {
    pub fn new(loader: Arc<dyn EngineLoader>, status: StatusReporter) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(LifecycleState::Uninitialized),
            loader,
            status,
        })
    }

    pub fn status_reporter(&self) -> &StatusReporter {
        &self.status
    }

    fn lock(&self) -> MutexGuard<'_, LifecycleState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Non-blocking. Starts the preload on the first call and reports the
    /// current readiness on every call.
    pub fn ensure_initialized(self: &Arc<Self>) -> Readiness {
        let mut state = self.lock();
        match &*state {
            LifecycleState::Ready(engines) => return Readiness::Ready(Arc::clone(engines)),
            LifecycleState::Failed(reason) => return Readiness::Failed(reason.clone()),
            LifecycleState::Loading => return Readiness::Loading,
            LifecycleState::Uninitialized => {}
        }
        *state = LifecycleState::Loading;
        drop(state);

        info!("Starting map preload");
        self.status.publish(&ServiceStatus::loading());

        let lifecycle = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("map-preload".to_string())
            .spawn(move || lifecycle.run_loader());

        if let Err(e) = spawned {
            self.finish(Err(LoadError::Spawn(e)));
            return self.poll();
        }
        Readiness::Loading
    }

    /// Current readiness without triggering a load.
    pub fn poll(&self) -> Readiness {
        match &*self.lock() {
            LifecycleState::Ready(engines) => Readiness::Ready(Arc::clone(engines)),
            LifecycleState::Failed(reason) => Readiness::Failed(reason.clone()),
            LifecycleState::Uninitialized | LifecycleState::Loading => Readiness::Loading,
        }
    }

    /// Blocks the calling thread until loading settles or `timeout` passes.
    pub fn wait_until_settled(self: &Arc<Self>, timeout: Duration) -> Readiness {
        let deadline = Instant::now() + timeout;
        loop {
            let readiness = self.ensure_initialized();
            if !matches!(readiness, Readiness::Loading) || Instant::now() >= deadline {
                return readiness;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    fn run_loader(&self) {
        let started = Instant::now();
        let result = catch_unwind(AssertUnwindSafe(|| self.loader.load()))
            .unwrap_or(Err(LoadError::Panicked));
        if result.is_ok() {
            info!("Map preload finished in {:.2?}", started.elapsed());
        }
        self.finish(result);
    }

    fn finish(&self, result: Result<Engines, LoadError>) {
        let mut state = self.lock();
        match result {
            Ok(engines) => {
                info!("Navigation ready with maps {:?}", engines.loaded_maps);
                self.status
                    .publish(&ServiceStatus::ready(engines.loaded_maps.clone()));
                *state = LifecycleState::Ready(Arc::new(engines));
            }
            Err(e) => {
                error!("Map preload failed: {}", e);
                let reason = e.to_string();
                self.status.publish(&ServiceStatus::failed(&reason));
                *state = LifecycleState::Failed(reason);
            }
        }
    }
}
