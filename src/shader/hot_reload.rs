// src/shader/hot_reload.rs
//! Shader hot reload
//! - Watches the shader directory with `notify`
//! - Debounces bursts of write events per file
//! - Hands changed paths to the renderer, which recompiles on its own thread
//!
//! Usage:
//!  let mut watcher = ShaderWatcher::new(&config.shader_directory, Duration::from_millis(150))?;
//!  // each frame:
//!  for path in watcher.poll() { /* recompile the shader loaded from `path` */ }

use super::SHADER_EXTENSION;
use crate::error::{Error, Result};
use crossbeam::channel::{unbounded, Receiver};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(150);

/// Collapses repeated change notifications for a path into one, once it has been quiet for `window`.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    pending: HashMap<PathBuf, Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    pub fn touch(&mut self, path: PathBuf, now: Instant) {
        self.pending.insert(path, now);
    }

    /// Paths quiet for at least the window, removed from the pending set. Sorted for stable order.
    pub fn ready(&mut self, now: Instant) -> Vec<PathBuf> {
        let window = self.window;
        let mut ready: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, touched)| now.saturating_duration_since(**touched) >= window)
            .map(|(path, _)| path.clone())
            .collect();
        for path in &ready {
            self.pending.remove(path);
        }
        ready.sort();
        ready
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

fn is_shader_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == SHADER_EXTENSION)
}

pub struct ShaderWatcher {
    root: PathBuf,
    _watcher: RecommendedWatcher,
    events: Receiver<PathBuf>,
    debouncer: Debouncer,
}

impl ShaderWatcher {
    pub fn new(root: impl AsRef<Path>, debounce: Duration) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let (tx, events) = unbounded::<PathBuf>();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    for path in event.paths.into_iter().filter(|p| is_shader_file(p)) {
                        let _ = tx.send(path);
                    }
                }
            }
            Err(e) => log::warn!("notify error: {e:?}"),
        })
        .map_err(|e| Error::custom(format!("failed to create shader watcher: {e}")))?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| Error::custom(format!("failed to watch {}: {e}", root.display())))?;
        log::info!("Watching {} for shader changes", root.display());

        Ok(Self {
            root,
            _watcher: watcher,
            events,
            debouncer: Debouncer::new(debounce),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Drain watcher events and return the files whose changes have settled.
    pub fn poll(&mut self) -> Vec<PathBuf> {
        let now = Instant::now();
        while let Ok(path) = self.events.try_recv() {
            self.debouncer.touch(path, now);
        }
        self.debouncer.ready(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bursts_collapse_into_one_change() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        let path = PathBuf::from("assets/shaders/StaticMesh.glsl");
        debouncer.touch(path.clone(), start);
        debouncer.touch(path.clone(), start + Duration::from_millis(60));

        assert!(debouncer.ready(start + Duration::from_millis(120)).is_empty());
        assert_eq!(debouncer.ready(start + Duration::from_millis(160)), vec![path]);
        assert!(debouncer.is_empty());
    }

    #[test]
    fn independent_files_settle_independently() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(50));
        debouncer.touch(PathBuf::from("b.glsl"), start);
        debouncer.touch(PathBuf::from("a.glsl"), start);
        debouncer.touch(PathBuf::from("c.glsl"), start + Duration::from_millis(40));

        let ready = debouncer.ready(start + Duration::from_millis(60));
        assert_eq!(ready, vec![PathBuf::from("a.glsl"), PathBuf::from("b.glsl")]);
        assert!(!debouncer.is_empty());
    }

    #[test]
    fn only_shader_files_are_watched() {
        assert!(is_shader_file(Path::new("x/Bloom.glsl")));
        assert!(!is_shader_file(Path::new("x/Bloom.glsl.swp")));
        assert!(!is_shader_file(Path::new("x/README")));
    }
}
