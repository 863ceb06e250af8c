//! Playlist synthesis.
//!
//! A run moves through three stages, each owning a slice of the progress bar:
//!
//! | Stage        | Progress | Work                                                     |
//! |--------------|----------|----------------------------------------------------------|
//! | `collecting` | 0-20     | load each selected conversation, extract and dedup links |
//! | `resolving`  | 20-40    | follow short links, confirm IDs in batches of 50         |
//! | `adding`     | 40-100   | skip tracks already present, add the rest in batches     |
//!
//! # Error Handling Strategy
//!
//! - **Per-track failures** (unknown ID, dead short link, rejected add) are recorded in the
//!   run's failures and the run continues
//! - **Batch add failures** that are not fatal are retried one track at a time
//! - **Fatal failures** (corpus errors, 401/403, target playlist or membership unavailable)
//!   end the run with [`SynthesisError::Fatal`]
//! - **Sink failures** mean the client went away: the run stops with
//!   [`SynthesisError::Cancelled`] and performs no further catalog writes

use std::collections::HashSet;
use std::fmt::Display;
use std::io::{self, Write};

use log::{debug, info, warn};
use thiserror::Error;

use super::catalog::{ADD_BATCH_LIMIT, Catalog, CatalogPlaylist, LOOKUP_BATCH_LIMIT, track_uri};
use crate::corpus::SqliteCorpus;
use crate::filters::compile_scoped;
use crate::links::track_references;
use crate::models::{
    PlaylistRef, PlaylistRequest, PlaylistRun, PlaylistSummary, ProgressUpdate, RunStatus, Stage,
    TrackKey,
};
use crate::protocol::{EventWriter, Unit};

/// Receiver of progress updates. An error means nobody is listening any more.
pub trait ProgressSink {
    fn progress(&mut self, update: &ProgressUpdate) -> io::Result<()>;
}

impl<F> ProgressSink for F
where
    F: FnMut(&ProgressUpdate) -> io::Result<()>,
{
    fn progress(&mut self, update: &ProgressUpdate) -> io::Result<()> {
        self(update)
    }
}

impl<W: Write> ProgressSink for EventWriter<W> {
    fn progress(&mut self, update: &ProgressUpdate) -> io::Result<()> {
        self.send(&Unit::Progress(update.clone()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SynthesisError {
    #[error("{0}")]
    Fatal(String),
    #[error("Synthesis cancelled: progress receiver disconnected")]
    Cancelled,
}

fn fatal(context: &str, error: impl Display) -> SynthesisError {
    SynthesisError::Fatal(format!("{}: {}", context, error))
}

/// Percent within a stage slice
fn scaled(base: u8, span: u8, done: usize, total: usize) -> u8 {
    if total == 0 {
        return base.saturating_add(span);
    }
    let within = usize::from(span) * done.min(total) / total;
    base.saturating_add(within as u8).min(100)
}

pub struct Synthesizer<'a, C: Catalog + ?Sized> {
    corpus: &'a SqliteCorpus,
    catalog: &'a C,
    batch_size: usize,
}

impl<'a, C: Catalog + ?Sized> Synthesizer<'a, C> {
    pub fn new(corpus: &'a SqliteCorpus, catalog: &'a C) -> Self {
        Self { corpus, catalog, batch_size: ADD_BATCH_LIMIT }
    }

    /// Tracks per add request, clamped to 1..=100
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.clamp(1, ADD_BATCH_LIMIT);
        self
    }

    /// Execute the run, reporting progress to `sink`. Updates `run.status` before returning.
    pub fn run(
        &self,
        run: &mut PlaylistRun,
        sink: &mut dyn ProgressSink,
    ) -> Result<PlaylistSummary, SynthesisError> {
        info!(
            "Run {} started: {} conversations, target {:?}",
            run.id,
            run.request.chat_ids.len(),
            run.request.target_id().or(run.request.target_name())
        );
        let result = self.execute(run, sink);
        run.status = match &result {
            Ok(summary) => {
                info!(
                    "Run {} complete: {} added, {} skipped, {} failed",
                    run.id, summary.tracks_added, summary.tracks_skipped, summary.tracks_failed
                );
                RunStatus::Complete
            }
            Err(SynthesisError::Cancelled) => {
                info!("Run {} cancelled", run.id);
                RunStatus::Cancelled
            }
            Err(SynthesisError::Fatal(message)) => {
                warn!("Run {} failed: {}", run.id, message);
                RunStatus::Failed(message.clone())
            }
        };
        result
    }

    fn execute(
        &self,
        run: &mut PlaylistRun,
        sink: &mut dyn ProgressSink,
    ) -> Result<PlaylistSummary, SynthesisError> {
        if run.request.target_id().is_none() && run.request.target_name().is_none() {
            return Err(SynthesisError::Fatal("A playlist name or id is required".to_string()));
        }
        if run.request.chat_ids.is_empty() {
            return Err(SynthesisError::Fatal("No conversations selected".to_string()));
        }

        let keys = self.collect(run, sink)?;
        let playlist = self.target(&run.request)?;
        let existing = self
            .catalog
            .playlist_track_ids(&playlist.id)
            .map_err(|e| fatal("Failed to read playlist contents", e))?;
        let resolved = self.resolve(run, keys, sink)?;
        self.add(run, &playlist, resolved, &existing, sink)?;

        Ok(run.summary(PlaylistRef { id: playlist.id, url: playlist.url, name: playlist.name }))
    }

    fn emit(
        run: &PlaylistRun,
        sink: &mut dyn ProgressSink,
        stage: Stage,
        progress: u8,
        message: String,
    ) -> Result<(), SynthesisError> {
        debug!("Run {} [{}] {}% {}", run.id, stage.as_str(), progress, message);
        let update =
            ProgressUpdate { stage, message, progress: progress.min(100), totals: run.totals };
        sink.progress(&update).map_err(|e| {
            debug!("Run {} progress receiver gone: {}", run.id, e);
            SynthesisError::Cancelled
        })
    }

    /// Unique track keys across all selected conversations, in order of first appearance
    fn collect(
        &self,
        run: &mut PlaylistRun,
        sink: &mut dyn ProgressSink,
    ) -> Result<Vec<TrackKey>, SynthesisError> {
        let mut selected = HashSet::new();
        let chat_ids: Vec<i64> =
            run.request.chat_ids.iter().copied().filter(|id| selected.insert(*id)).collect();
        let range = run.request.date_range;

        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        for (index, chat_id) in chat_ids.iter().enumerate() {
            let filter = compile_scoped(*chat_id, range).map_err(|e| fatal("Invalid request", e))?;
            let load_failed = |e: anyhow::Error| {
                fatal(&format!("Failed to load conversation {}", chat_id), format!("{:#}", e))
            };
            let in_scope = self.corpus.candidates(&filter).map_err(load_failed)?;

            if in_scope.is_empty() {
                warn!("Conversation {} has no messages in the selected range", chat_id);
            } else {
                let units = self.corpus.messages(*chat_id, &filter.scope).map_err(load_failed)?;
                let before = keys.len();
                for reference in track_references(&units) {
                    if seen.insert(reference.key.clone()) {
                        keys.push(reference.key);
                    }
                }
                debug!("Conversation {}: {} new track links", chat_id, keys.len() - before);
            }

            run.totals.found = keys.len();
            Self::emit(
                run,
                sink,
                Stage::Collecting,
                scaled(0, 20, index + 1, chat_ids.len()),
                format!(
                    "Collected {} unique tracks from {} of {} conversations",
                    keys.len(),
                    index + 1,
                    chat_ids.len()
                ),
            )?;
        }
        Ok(keys)
    }

    fn target(&self, request: &PlaylistRequest) -> Result<CatalogPlaylist, SynthesisError> {
        if let Some(id) = request.target_id() {
            return self
                .catalog
                .playlist(id)
                .map_err(|e| fatal(&format!("Failed to open playlist {}", id), e));
        }
        let name = request.target_name().unwrap_or_default();
        match self.catalog.find_playlist(name).map_err(|e| fatal("Failed to list playlists", e))? {
            Some(playlist) => {
                info!("Reusing playlist '{}' ({})", playlist.name, playlist.id);
                Ok(playlist)
            }
            None => {
                info!("Creating playlist '{}'", name);
                self.catalog
                    .create_playlist(name)
                    .map_err(|e| fatal(&format!("Failed to create playlist '{}'", name), e))
            }
        }
    }

    /// Catalog-confirmed track IDs, deduplicated
    fn resolve(
        &self,
        run: &mut PlaylistRun,
        keys: Vec<TrackKey>,
        sink: &mut dyn ProgressSink,
    ) -> Result<Vec<String>, SynthesisError> {
        let mut known = HashSet::new();
        let mut ids = Vec::new();
        let mut short_links = Vec::new();
        for key in keys {
            match key {
                TrackKey::Canonical(id) => {
                    if known.insert(id.clone()) {
                        ids.push(id);
                    }
                }
                TrackKey::ShortLink(url) => short_links.push(url),
            }
        }

        if !short_links.is_empty() {
            for url in &short_links {
                match self.catalog.resolve_short_link(url) {
                    Ok(id) if known.insert(id.clone()) => ids.push(id),
                    Ok(id) => {
                        debug!("Short link {} duplicates track {}", url, id);
                        run.totals.skipped += 1;
                    }
                    Err(e) if e.is_fatal() => return Err(fatal("Catalog authorization failed", e)),
                    Err(e) => {
                        warn!("Could not resolve {}: {}", url, e);
                        run.record_failure(url.clone(), e.to_string());
                    }
                }
            }
            Self::emit(
                run,
                sink,
                Stage::Resolving,
                20,
                format!("Resolved {} short links", short_links.len()),
            )?;
        }

        let batches = ids.len().div_ceil(LOOKUP_BATCH_LIMIT);
        let mut confirmed = HashSet::new();
        let mut resolved = Vec::new();
        for (index, batch) in ids.chunks(LOOKUP_BATCH_LIMIT).enumerate() {
            match self.catalog.lookup_tracks(batch) {
                Ok(tracks) => {
                    for (i, id) in batch.iter().enumerate() {
                        match tracks.get(i).cloned().flatten() {
                            Some(track) => {
                                if confirmed.insert(track.id.clone()) {
                                    run.totals.resolved += 1;
                                    resolved.push(track.id);
                                } else {
                                    run.totals.skipped += 1;
                                }
                            }
                            None => run.record_failure(track_uri(id), "Track not found in catalog"),
                        }
                    }
                }
                Err(e) if e.is_fatal() => return Err(fatal("Catalog authorization failed", e)),
                Err(e) => {
                    warn!("Track lookup batch {} failed: {}", index + 1, e);
                    for id in batch {
                        run.record_failure(track_uri(id), e.to_string());
                    }
                }
            }
            Self::emit(
                run,
                sink,
                Stage::Resolving,
                scaled(20, 20, index + 1, batches),
                format!("Resolved {} of {} tracks", run.totals.resolved, ids.len()),
            )?;
        }
        Ok(resolved)
    }

    fn add(
        &self,
        run: &mut PlaylistRun,
        playlist: &CatalogPlaylist,
        resolved: Vec<String>,
        existing: &HashSet<String>,
        sink: &mut dyn ProgressSink,
    ) -> Result<(), SynthesisError> {
        let (present, pending): (Vec<String>, Vec<String>) =
            resolved.into_iter().partition(|id| existing.contains(id));
        run.totals.skipped += present.len();

        if pending.is_empty() {
            return Self::emit(
                run,
                sink,
                Stage::Adding,
                100,
                format!("Nothing to add: {} tracks already in '{}'", present.len(), playlist.name),
            );
        }

        let batches = pending.len().div_ceil(self.batch_size);
        for (index, batch) in pending.chunks(self.batch_size).enumerate() {
            match self.catalog.add_tracks(&playlist.id, batch) {
                Ok(()) => run.totals.added += batch.len(),
                Err(e) if e.is_fatal() => return Err(fatal("Failed to add tracks", e)),
                Err(e) => {
                    warn!("Add batch {} failed ({}), retrying tracks one at a time", index + 1, e);
                    self.add_individually(run, playlist, batch)?;
                }
            }
            Self::emit(
                run,
                sink,
                Stage::Adding,
                scaled(40, 60, index + 1, batches),
                format!("Added {} of {} new tracks", run.totals.added, pending.len()),
            )?;
        }
        Ok(())
    }

    fn add_individually(
        &self,
        run: &mut PlaylistRun,
        playlist: &CatalogPlaylist,
        batch: &[String],
    ) -> Result<(), SynthesisError> {
        for id in batch {
            match self.catalog.add_tracks(&playlist.id, std::slice::from_ref(id)) {
                Ok(()) => run.totals.added += 1,
                Err(e) if e.is_fatal() => return Err(fatal("Failed to add tracks", e)),
                Err(e) => run.record_failure(track_uri(id), e.to_string()),
            }
        }
        Ok(())
    }
}
