//! 共享目录监听：逐目录注册非递归监听，合并短时间内的变更后推送 `dirsChanged`。

use chrono::{SecondsFormat, Utc};
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::WATCH_IGNORED_DIRS;
use crate::events::{DirsChanged, EventHub};
use crate::sandbox::{clean_path, relative_slash_path, same_path};

pub const DIRS_CHANGED_EVENT: &str = "dirsChanged";

fn is_ignored_dir_name(name: &str) -> bool {
    WATCH_IGNORED_DIRS.contains(&name)
}

/// 事件路径所在目录相对根目录的路径；根外或位于忽略子树内时返回 `None`。
pub fn relative_dir_for_event(root: &Path, path: &Path) -> Option<String> {
    let path = clean_path(path);
    let dir = path.parent()?;
    let rel = relative_slash_path(root, dir)?;
    if rel.split('/').any(is_ignored_dir_name) {
        return None;
    }
    Some(rel)
}

enum Signal {
    Fs(notify::Result<Event>),
    Stop,
}

struct WatchState {
    watcher: RecommendedWatcher,
    roots: Vec<PathBuf>,
    watched: HashSet<PathBuf>,
}

impl WatchState {
    fn add_recursive(&mut self, dir: &Path, required: bool) -> notify::Result<()> {
        let walker = WalkDir::new(dir)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !(entry.file_type().is_dir()
                        && is_ignored_dir_name(&entry.file_name().to_string_lossy()))
            });
        for entry in walker {
            let Ok(entry) = entry else {
                continue;
            };
            if !entry.file_type().is_dir() {
                continue;
            }
            let is_top = entry.depth() == 0;
            let path = entry.into_path();
            if self.watched.contains(&path) {
                continue;
            }
            match self.watcher.watch(&path, RecursiveMode::NonRecursive) {
                Ok(()) => {
                    self.watched.insert(path);
                }
                Err(err) if required && is_top => return Err(err),
                Err(err) => debug!(path = %path.display(), error = %err, "skip watch"),
            }
        }
        Ok(())
    }

    fn add_if_dir(&mut self, path: &Path) {
        let ignored = path
            .file_name()
            .is_some_and(|name| is_ignored_dir_name(&name.to_string_lossy()));
        if ignored || self.watched.contains(path) {
            return;
        }
        if std::fs::metadata(path).is_ok_and(|metadata| metadata.is_dir()) {
            let _ = self.add_recursive(path, false);
        }
    }

    /// 目录被删除或移走后清理其下的监听记录。
    fn prune(&mut self, path: &Path) {
        if std::fs::symlink_metadata(path).is_ok() {
            return;
        }
        let stale: Vec<PathBuf> = self
            .watched
            .iter()
            .filter(|watched| watched.starts_with(path))
            .cloned()
            .collect();
        for dir in stale {
            let _ = self.watcher.unwatch(&dir);
            self.watched.remove(&dir);
        }
    }

    /// 处理一条文件系统事件，有需要推送的目录时返回 true。
    fn handle(&mut self, event: Event, pending: &mut BTreeSet<String>) -> bool {
        let (created, removed) = match event.kind {
            EventKind::Create(_) => (true, false),
            EventKind::Remove(_) => (false, true),
            EventKind::Modify(ModifyKind::Name(_)) => (true, true),
            _ => return false,
        };

        let mut changed = false;
        for path in &event.paths {
            if created {
                self.add_if_dir(path);
            }
            if removed {
                self.prune(path);
            }
            let rel = self
                .roots
                .iter()
                .find_map(|root| relative_dir_for_event(root, path));
            if let Some(rel) = rel {
                pending.insert(rel);
                changed = true;
            }
        }
        changed
    }

    fn run(mut self, signals: Receiver<Signal>, hub: EventHub, debounce: Duration) {
        let mut pending = BTreeSet::new();
        let mut deadline: Option<Instant> = None;
        loop {
            let signal = match deadline {
                Some(at) => {
                    match signals.recv_timeout(at.saturating_duration_since(Instant::now())) {
                        Ok(signal) => signal,
                        Err(RecvTimeoutError::Timeout) => {
                            flush(&hub, &mut pending);
                            deadline = None;
                            continue;
                        }
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match signals.recv() {
                    Ok(signal) => signal,
                    Err(_) => break,
                },
            };
            match signal {
                Signal::Stop => break,
                Signal::Fs(Err(err)) => debug!(error = %err, "watch error"),
                Signal::Fs(Ok(event)) => {
                    if self.handle(event, &mut pending) {
                        deadline = Some(Instant::now() + debounce);
                    }
                }
            }
        }
        flush(&hub, &mut pending);
    }
}

fn flush(hub: &EventHub, pending: &mut BTreeSet<String>) {
    if pending.is_empty() {
        return;
    }
    let dirs: Vec<String> = std::mem::take(pending).into_iter().collect();
    debug!(count = dirs.len(), "directories changed");
    hub.broadcast(
        DIRS_CHANGED_EVENT,
        &DirsChanged {
            dirs,
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
        },
    );
}

/// 运行在独立线程上的目录监听器。
pub struct DirectoryWatcher {
    root: PathBuf,
    control: Sender<Signal>,
    thread: Option<JoinHandle<()>>,
    watched_dirs: usize,
}

impl DirectoryWatcher {
    /// 注册根目录及其子目录的监听并启动后台线程；根目录无法监听时返回错误。
    pub fn start(root: &Path, hub: EventHub, debounce: Duration) -> notify::Result<Self> {
        let root = clean_path(root);
        let (control, signals) = mpsc::channel();
        let fs_tx = control.clone();
        let watcher = notify::recommended_watcher(move |result| {
            let _ = fs_tx.send(Signal::Fs(result));
        })?;

        let mut roots = vec![root.clone()];
        if let Ok(canonical) = std::fs::canonicalize(&root)
            && canonical != root
        {
            roots.push(canonical);
        }
        let mut state = WatchState {
            watcher,
            roots,
            watched: HashSet::new(),
        };
        state.add_recursive(&root, true)?;
        let watched_dirs = state.watched.len();

        let thread = std::thread::Builder::new()
            .name("share-watcher".into())
            .spawn(move || state.run(signals, hub, debounce))
            .map_err(notify::Error::io)?;
        Ok(Self {
            root,
            control,
            thread: Some(thread),
            watched_dirs,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 通知线程退出并等待其结束。
    pub fn stop(mut self) {
        let _ = self.control.send(Signal::Stop);
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!(root = %self.root.display(), "watcher thread panicked");
        }
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        let _ = self.control.send(Signal::Stop);
    }
}

async fn shutdown(watcher: DirectoryWatcher) {
    let _ = tokio::task::spawn_blocking(move || watcher.stop()).await;
}

/// 持有当前监听器，根目录切换时重建。
pub struct WatchController {
    hub: EventHub,
    debounce: Duration,
    active: Mutex<Option<DirectoryWatcher>>,
}

impl WatchController {
    pub fn new(hub: EventHub, debounce: Duration) -> Self {
        Self {
            hub,
            debounce,
            active: Mutex::new(None),
        }
    }

    pub fn root(&self) -> Option<PathBuf> {
        self.active
            .lock()
            .as_ref()
            .map(|watcher| watcher.root().to_path_buf())
    }

    /// 切换到新的根目录；与当前根目录相同时不做任何事。监听失败只记录日志。
    pub async fn reset(&self, root: &Path) {
        let previous = {
            let mut active = self.active.lock();
            if active
                .as_ref()
                .is_some_and(|watcher| same_path(watcher.root(), root))
            {
                return;
            }
            active.take()
        };
        if let Some(previous) = previous {
            shutdown(previous).await;
        }

        let hub = self.hub.clone();
        let debounce = self.debounce;
        let start_root = root.to_path_buf();
        let started =
            tokio::task::spawn_blocking(move || DirectoryWatcher::start(&start_root, hub, debounce))
                .await;
        match started {
            Ok(Ok(watcher)) => {
                info!(
                    root = %watcher.root().display(),
                    dirs = watcher.watched_dirs,
                    "directory watcher started"
                );
                let stale = self.active.lock().replace(watcher);
                if let Some(stale) = stale {
                    shutdown(stale).await;
                }
            }
            Ok(Err(err)) => warn!(root = %root.display(), error = %err, "directory watcher unavailable"),
            Err(err) => warn!(root = %root.display(), error = %err, "directory watcher task failed"),
        }
    }

    pub async fn stop(&self) {
        let previous = self.active.lock().take();
        if let Some(previous) = previous {
            debug!(root = %previous.root().display(), "stopping directory watcher");
            shutdown(previous).await;
        }
    }
}
