//! Filesystem watchers that run for the lifetime of one expedition.
//!
//! Both are best-effort: setup failures and malformed files are logged and
//! skipped, and nothing here can fail the expedition itself.

use notify::{Event, EventKind, RecursiveMode, Watcher};
use paintress_dmail::DMail;
use paintress_journal::read_flag;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::notify::Notifier;

type FsEvent = notify::Result<Event>;

fn start_watcher(dir: &Path) -> Option<(notify::RecommendedWatcher, mpsc::UnboundedReceiver<FsEvent>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut watcher = match notify::recommended_watcher(move |res: FsEvent| {
        let _ = tx.send(res);
    }) {
        Ok(w) => w,
        Err(e) => {
            warn!(error = %e, "failed to create filesystem watcher");
            return None;
        }
    };
    if let Err(e) = watcher.watch(dir, RecursiveMode::NonRecursive) {
        warn!(dir = %dir.display(), error = %e, "failed to watch directory");
        return None;
    }
    Some((watcher, rx))
}

fn is_write_event(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}

/// Watch `.run/` for writes to `flag.md` and report each change of
/// `current_issue` to a new value. A pre-existing flag fires once up
/// front.
pub fn spawn_flag_watcher(
    run_dir: PathBuf,
    flag_path: PathBuf,
    notifier: Arc<dyn Notifier>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_issue: Option<String> = None;

        if flag_path.exists() {
            let flag = read_flag(&flag_path);
            notifier.issue_changed(&flag.current_issue, &flag.current_title);
            last_issue = Some(flag.current_issue);
        }

        // The watcher handle must stay alive for the duration of the task.
        let Some((_watcher, mut rx)) = start_watcher(&run_dir) else {
            cancel.cancelled().await;
            return;
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = rx.recv() => {
                    let Some(Ok(event)) = event else { break };
                    if !is_write_event(&event.kind) {
                        continue;
                    }
                    if !event.paths.iter().any(|p| p.file_name().is_some_and(|n| n == "flag.md")) {
                        continue;
                    }
                    let flag = read_flag(&flag_path);
                    let changed = last_issue.as_deref() != Some(flag.current_issue.as_str());
                    if changed && !flag.current_issue.is_empty() {
                        notifier.issue_changed(&flag.current_issue, &flag.current_title);
                    }
                    if changed {
                        last_issue = Some(flag.current_issue);
                    }
                }
            }
        }
    })
}

/// Watch the inbox for the expedition's duration. Existing messages fire
/// once at startup; later create-or-write events are deduplicated by
/// (modTime, size). Returns the HIGH-severity arrivals so the caller can
/// report them once the watcher has drained.
pub fn spawn_inbox_watcher(
    inbox_dir: PathBuf,
    notifier: Arc<dyn Notifier>,
    cancel: CancellationToken,
) -> JoinHandle<Vec<DMail>> {
    tokio::spawn(async move {
        let mut high_arrivals: Vec<DMail> = Vec::new();
        let mut seen: HashMap<PathBuf, (SystemTime, u64)> = HashMap::new();

        for path in existing_md_files(&inbox_dir) {
            if let Some(stamp) = file_stamp(&path) {
                seen.insert(path.clone(), stamp);
            }
            if let Some(dmail) = parse_lenient(&path) {
                notifier.dmail_arrived(&dmail);
            }
        }

        let Some((_watcher, mut rx)) = start_watcher(&inbox_dir) else {
            cancel.cancelled().await;
            return high_arrivals;
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = rx.recv() => {
                    let Some(Ok(event)) = event else { break };
                    if !is_write_event(&event.kind) {
                        continue;
                    }
                    for path in &event.paths {
                        if path.extension().is_none_or(|ext| ext != "md") {
                            continue;
                        }
                        let Some(stamp) = file_stamp(path) else { continue };
                        if seen.get(path) == Some(&stamp) {
                            continue;
                        }
                        seen.insert(path.clone(), stamp);

                        let Some(dmail) = parse_lenient(path) else { continue };
                        debug!(name = %dmail.name, "inbox arrival");
                        notifier.dmail_arrived(&dmail);
                        if dmail.is_high_severity() {
                            notifier.high_severity_arrived(&dmail);
                            high_arrivals.push(dmail);
                        }
                    }
                }
            }
        }
        high_arrivals
    })
}

fn existing_md_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "md"))
        .collect();
    paths.sort();
    paths
}

fn file_stamp(path: &Path) -> Option<(SystemTime, u64)> {
    let meta = std::fs::metadata(path).ok()?;
    Some((meta.modified().ok()?, meta.len()))
}

/// Watcher delivery is best-effort: malformed files are skipped with a
/// warning rather than surfaced.
fn parse_lenient(path: &Path) -> Option<DMail> {
    let name = path.file_name()?.to_str()?.to_string();
    let content = std::fs::read_to_string(path).ok()?;
    match DMail::parse(&content, &name) {
        Ok(dmail) => Some(dmail),
        Err(e) => {
            warn!(file = %name, error = %e, "skipping malformed inbox D-Mail");
            None
        }
    }
}
