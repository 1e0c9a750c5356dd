use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::error;

const COMPONENT: &str = "dedlog";
const WINDOW: Duration = Duration::from_secs(5);

/// Log entry for deduplication
pub struct LogEntry {
    err: Option<String>,
    reason: String,
    extra: Option<String>,
    count: usize,
}

impl LogEntry {
    fn new(err: Option<String>, extra: Option<String>, reason: String) -> Self {
        Self {
            err,
            reason,
            extra,
            count: 1,
        }
    }
}

/// One aggregation window: identical reasons collapse into a single counted entry.
#[derive(Default)]
pub(crate) struct Window {
    entries: DashMap<String, LogEntry>,
}

impl Window {
    pub(crate) fn record(&self, entry: LogEntry) {
        if let Some(mut existing) = self.entries.get_mut(&entry.reason) {
            existing.count += 1;
            return;
        }
        self.entries.insert(entry.reason.clone(), entry);
    }

    /// Drains the window, returning entries sorted by reason.
    pub(crate) fn drain(&self) -> Vec<LogEntry> {
        let keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        let mut out: Vec<LogEntry> = keys
            .into_iter()
            .filter_map(|k| self.entries.remove(&k).map(|(_, v)| v))
            .collect();
        out.sort_by(|a, b| a.reason.cmp(&b.reason));
        out
    }
}

static ERR_CH: Lazy<Mutex<Option<mpsc::Sender<LogEntry>>>> = Lazy::new(|| Mutex::new(None));

fn get_err_ch() -> Option<mpsc::Sender<LogEntry>> {
    ERR_CH.try_lock().and_then(|guard| guard.clone())
}

/// Hot path method for logging errors without blocking.
/// Drops the entry when the logger is not running or its buffer is full.
pub fn err(err: Option<&dyn std::error::Error>, extra: Option<&str>, msg: &str) {
    if let Some(tx) = get_err_ch() {
        let entry = LogEntry::new(
            err.map(|e| e.to_string()),
            extra.map(|s| s.to_string()),
            msg.to_string(),
        );
        let _ = tx.try_send(entry);
    }
}

fn emit(entry: &LogEntry) {
    match (&entry.err, &entry.extra) {
        (Some(err), Some(extra)) => error!(
            component = COMPONENT,
            count = entry.count,
            err = %err,
            extra = %extra,
            "{}", entry.reason
        ),
        (Some(err), None) => error!(
            component = COMPONENT,
            count = entry.count,
            err = %err,
            "{}", entry.reason
        ),
        (None, Some(extra)) => error!(
            component = COMPONENT,
            count = entry.count,
            extra = %extra,
            "{}", entry.reason
        ),
        (None, None) => error!(component = COMPONENT, count = entry.count, "{}", entry.reason),
    }
}

/// Starts the deduplicated logger. Runs until `ctx` is cancelled.
pub async fn start_dedup_logger(ctx: CancellationToken) {
    let (tx, mut rx) = mpsc::channel(1024);
    *ERR_CH.lock() = Some(tx);

    let window = Window::default();
    let mut interval = tokio::time::interval(WINDOW);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ctx.cancelled() => {
                break;
            }
            entry = rx.recv() => {
                if let Some(entry) = entry {
                    window.record(entry);
                }
            }
            _ = interval.tick() => {
                for entry in window.drain() {
                    emit(&entry);
                }
            }
        }
    }

    *ERR_CH.lock() = None;
    for entry in window.drain() {
        emit(&entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_collapses_identical_reasons() {
        let window = Window::default();
        window.record(LogEntry::new(None, None, "write failed".into()));
        window.record(LogEntry::new(Some("quota".into()), None, "write failed".into()));
        window.record(LogEntry::new(None, Some("k".into()), "corrupt entry".into()));

        let drained = window.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].reason, "corrupt entry");
        assert_eq!(drained[0].count, 1);
        assert_eq!(drained[1].reason, "write failed");
        assert_eq!(drained[1].count, 2);

        assert!(window.drain().is_empty());
    }

    #[test]
    fn test_err_without_logger_is_noop() {
        err(None, Some("extra"), "nobody listens");
    }
}
