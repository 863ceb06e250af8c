use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use log::debug;

use super::consumer::{Observer, StreamHandle};
use super::source::{Intent, StreamRequest, StreamSource};
use crate::filters::compile;
use crate::models::{PlaylistRequest, SearchRequest};

/// Holds at most one live stream per [`Intent`].
///
/// Starting a stream cancels the previous one of the same intent; the other intent is left
/// alone. Dropping the coordinator cancels everything it still holds.
pub struct StreamCoordinator {
    source: Arc<dyn StreamSource>,
    active: HashMap<Intent, StreamHandle>,
}

impl StreamCoordinator {
    pub fn new(source: Arc<dyn StreamSource>) -> Self {
        Self { source, active: HashMap::new() }
    }

    pub fn start(&mut self, request: StreamRequest, observer: Option<Observer>) -> StreamHandle {
        let intent = request.intent();
        if let Some(previous) = self.active.remove(&intent) {
            debug!("Replacing in-flight {:?} stream", intent);
            previous.cancel();
        }
        let handle = StreamHandle::start(Arc::clone(&self.source), request, observer);
        self.active.insert(intent, handle.clone());
        handle
    }

    /// Validate and stream a search. Requests without filters never open a connection.
    pub fn search(
        &mut self,
        mut request: SearchRequest,
        observer: Option<Observer>,
    ) -> Result<StreamHandle> {
        compile(&request)?;
        request.stream = true;
        Ok(self.start(StreamRequest::Search(request), observer))
    }

    pub fn synthesize(
        &mut self,
        request: PlaylistRequest,
        token: Option<String>,
        observer: Option<Observer>,
    ) -> StreamHandle {
        self.start(StreamRequest::Playlist { request, token }, observer)
    }

    pub fn active(&self, intent: Intent) -> Option<&StreamHandle> {
        self.active.get(&intent)
    }

    pub fn cancel(&mut self, intent: Intent) {
        if let Some(handle) = self.active.remove(&intent) {
            handle.cancel();
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, handle) in self.active.drain() {
            handle.cancel();
        }
    }
}

impl Drop for StreamCoordinator {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
