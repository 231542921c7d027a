//! Route probes
//!
//! The worker polls its probe at a bounded interval. `StaticRoute` never
//! changes; `SharedRoute` lets a control thread (or a test) flip the route
//! while the worker is running.

use crossbeam::atomic::AtomicCell;
use earshot_core::domain::audio::{PathState, RouteProbe};
use tracing::debug;

/// Fixed route for the whole session
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticRoute(pub PathState);

impl RouteProbe for StaticRoute {
    fn path_state(&self) -> PathState {
        self.0
    }
}

/// Route that can be updated from another thread
#[derive(Debug, Default)]
pub struct SharedRoute {
    state: AtomicCell<PathState>,
}

impl SharedRoute {
    pub fn new(initial: PathState) -> Self {
        Self {
            state: AtomicCell::new(initial),
        }
    }

    pub fn set(&self, path: PathState) {
        let previous = self.state.swap(path);
        if previous != path {
            debug!(?path, "Route updated");
        }
    }

    pub fn set_feedback_prone(&self, feedback_prone: bool) {
        self.set(PathState {
            feedback_prone,
            ..self.state.load()
        });
    }
}

impl RouteProbe for SharedRoute {
    fn path_state(&self) -> PathState {
        self.state.load()
    }
}
