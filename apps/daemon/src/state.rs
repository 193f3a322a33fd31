use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

use crate::supervisor::Supervisor;

pub struct DaemonState {
    pub supervisor: Arc<Supervisor>,
    pub shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl DaemonState {
    pub fn new(supervisor: Arc<Supervisor>, shutdown_tx: Option<oneshot::Sender<()>>) -> Self {
        Self {
            supervisor,
            shutdown_tx: Mutex::new(shutdown_tx),
        }
    }
}

pub type SharedState = Arc<DaemonState>;
