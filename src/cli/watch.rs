//! `watch` command: rebuild workflows when their sources change.
//!
//! Filesystem events only trigger a heap check; the rebuild itself is driven
//! by the heap's change notification, so changes found by polling rebuild
//! the same way.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use rustc_hash::FxHashSet;

use assetflow::config::EngineConfig;
use assetflow::heap::{Heap, HeapListener};
use assetflow::logger::{status_error, status_success, status_unchanged};
use assetflow::{Engine, debug, log};

use super::build::{build_all, build_workflow};
use super::is_shutdown;

/// Quiet period before a burst of filesystem events is handled
const DEBOUNCE: Duration = Duration::from_millis(100);

/// How often the loop wakes up to observe shutdown
const TICK: Duration = Duration::from_millis(250);

static WATCHING: AtomicBool = AtomicBool::new(false);

/// Whether the watch loop is running
pub fn is_watching() -> bool {
    WATCHING.load(Ordering::Relaxed)
}

enum WatchEvent {
    Fs(Vec<PathBuf>),
    Changed(String),
}

/// Forwards heap changes of one workflow to the watch loop.
struct RebuildListener {
    workflow_id: String,
    tx: Sender<WatchEvent>,
}

impl HeapListener for RebuildListener {
    fn on_resource_changed(&self, _heap: &Heap) {
        let _ = self.tx.send(WatchEvent::Changed(self.workflow_id.clone()));
    }
}

/// Build once, then rebuild on change until Ctrl+C.
pub fn watch(engine: &Engine, config: EngineConfig, config_path: Option<PathBuf>, out: &Path) -> Result<()> {
    WATCHING.store(true, Ordering::Relaxed);
    let result = run(engine, config, config_path, out);
    WATCHING.store(false, Ordering::Relaxed);
    result
}

fn run(engine: &Engine, mut config: EngineConfig, config_path: Option<PathBuf>, out: &Path) -> Result<()> {
    let (tx, rx) = channel::unbounded();

    build_all(engine, out, None, false)?;

    // Listeners live as long as this token
    let mut token = Arc::new(());
    attach(engine, &token, &tx);
    let mut dirs = workflow_dirs(&config);
    let mut _watcher = start_watcher(&dirs, config_path.as_deref(), &tx)?;
    log!("watch"; "watching {} workflow(s), Ctrl+C to stop", dirs.len());

    while !is_shutdown() {
        let Some(batch) = next_batch(&rx) else {
            continue;
        };

        let mut changed_ids = FxHashSet::default();
        let mut fs_paths = Vec::new();
        for event in batch {
            match event {
                WatchEvent::Fs(paths) => fs_paths.extend(paths),
                WatchEvent::Changed(id) => {
                    changed_ids.insert(id);
                }
            }
        }

        if let Some(path) = &config_path
            && fs_paths.iter().any(|p| same_file(p, path))
        {
            match reload(engine, path, out) {
                Ok(reloaded) => {
                    config = reloaded;
                    token = Arc::new(());
                    attach(engine, &token, &tx);
                    dirs = workflow_dirs(&config);
                    _watcher = start_watcher(&dirs, Some(path), &tx)?;
                    status_success("config reloaded");
                }
                Err(e) => status_error("config reload failed", &format!("{e:#}")),
            }
            continue;
        }

        // Checking a heap fires its listener, which queues a rebuild
        for id in affected_workflows(&dirs, &fs_paths) {
            match engine.workflow(&id).map(|wf| wf.heap().check_now()) {
                Ok(Ok(true)) => {}
                Ok(Ok(false)) => status_unchanged(&format!("unchanged: {id}")),
                Ok(Err(e)) | Err(e) => status_error(&format!("check failed: {id}"), &e.to_string()),
            }
        }

        for id in changed_ids {
            rebuild(engine, &id, out);
        }
    }
    Ok(())
}

/// Wait for an event, then collect everything arriving within the debounce window.
fn next_batch(rx: &Receiver<WatchEvent>) -> Option<Vec<WatchEvent>> {
    let first = match rx.recv_timeout(TICK) {
        Ok(event) => event,
        Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return None,
    };
    let mut batch = vec![first];
    while let Ok(event) = rx.recv_timeout(DEBOUNCE) {
        batch.push(event);
    }
    Some(batch)
}

fn rebuild(engine: &Engine, id: &str, out: &Path) {
    let result = engine
        .workflow(id)
        .map_err(anyhow::Error::from)
        .and_then(|wf| build_workflow(&wf, out));
    match result {
        Ok(files) => status_success(&format!("rebuilt: {id} ({files} file(s))")),
        Err(e) => status_error(&format!("failed: {id}"), &format!("{e:#}")),
    }
}

fn reload(engine: &Engine, path: &Path, out: &Path) -> Result<EngineConfig> {
    let config = EngineConfig::load(Some(path))?;
    engine.reload(&config).context("reloading workflows")?;
    build_all(engine, out, None, true)?;
    Ok(config)
}

fn attach(engine: &Engine, token: &Arc<()>, tx: &Sender<WatchEvent>) {
    for workflow in engine.workflows() {
        workflow.heap().add_listener(
            token,
            Arc::new(RebuildListener {
                workflow_id: workflow.id().to_string(),
                tx: tx.clone(),
            }),
        );
    }
}

fn workflow_dirs(config: &EngineConfig) -> Vec<(String, PathBuf)> {
    config
        .workflow
        .iter()
        .map(|w| {
            let dir = w.dir.canonicalize().unwrap_or_else(|_| w.dir.clone());
            (w.id.clone(), dir)
        })
        .collect()
}

fn start_watcher(
    dirs: &[(String, PathBuf)],
    config_path: Option<&Path>,
    tx: &Sender<WatchEvent>,
) -> notify::Result<RecommendedWatcher> {
    let tx = tx.clone();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
        Ok(event) if !event.kind.is_access() => {
            let _ = tx.send(WatchEvent::Fs(event.paths));
        }
        Ok(_) => {}
        Err(e) => debug!("watch"; "notify error: {e}"),
    })?;

    for (_, dir) in dirs {
        if dir.exists() {
            watcher.watch(dir, RecursiveMode::Recursive)?;
        }
    }
    if let Some(path) = config_path
        && path.exists()
    {
        watcher.watch(path, RecursiveMode::NonRecursive)?;
    }
    Ok(watcher)
}

/// Workflows whose directory contains one of `paths`, in declaration order.
fn affected_workflows(dirs: &[(String, PathBuf)], paths: &[PathBuf]) -> Vec<String> {
    dirs.iter()
        .filter(|(_, dir)| paths.iter().any(|p| p.starts_with(dir)))
        .map(|(id, _)| id.clone())
        .collect()
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
