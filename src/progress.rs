use clap::ValueEnum;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::IsTerminal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::util::fmt_duration;

const MAX_STORED_WARNINGS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lower")]
pub enum ProgressMode {
    Auto,
    Rich,
    Plain,
    Quiet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedProgressMode {
    Rich,
    Plain,
    Quiet,
}

#[derive(Debug, Clone, Copy)]
pub struct ProgressConfig {
    pub mode: ProgressMode,
    /// A directory that stays busy longer than this gets an idle warning.
    pub idle_threshold: Duration,
    tty_override: Option<bool>,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            mode: ProgressMode::Auto,
            idle_threshold: Duration::from_secs(15 * 60),
            tty_override: None,
        }
    }
}

impl ProgressConfig {
    pub fn new(mode: ProgressMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    #[cfg(test)]
    pub fn with_tty_override(mut self, is_tty: bool) -> Self {
        self.tty_override = Some(is_tty);
        self
    }

    pub fn resolve_mode(self) -> ResolvedProgressMode {
        self.mode.resolve(
            self.tty_override
                .unwrap_or_else(|| std::io::stderr().is_terminal()),
        )
    }
}

impl ProgressMode {
    fn resolve(self, stderr_is_tty: bool) -> ResolvedProgressMode {
        match self {
            ProgressMode::Auto => {
                if stderr_is_tty {
                    ResolvedProgressMode::Rich
                } else {
                    ResolvedProgressMode::Plain
                }
            }
            ProgressMode::Rich => ResolvedProgressMode::Rich,
            ProgressMode::Plain => ResolvedProgressMode::Plain,
            ProgressMode::Quiet => ResolvedProgressMode::Quiet,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProgressOutcome {
    pub elapsed: Duration,
    pub total_dirs: u64,
    pub processed_dirs: u64,
    pub warnings: Vec<String>,
}

/// Cheap clonable handle shared with workers.
#[derive(Clone)]
pub struct ProgressHandle {
    inner: Arc<ProgressInner>,
}

pub struct ProgressReporter {
    handle: ProgressHandle,
    ticker: Option<JoinHandle<()>>,
}

struct ProgressInner {
    label: String,
    mode: ResolvedProgressMode,
    idle_threshold: Duration,
    state: Mutex<ProgressState>,
    rich: Option<RichUi>,
    stop: AtomicBool,
}

struct RichUi {
    multi: MultiProgress,
    overall: ProgressBar,
    ops: Mutex<HashMap<String, ProgressBar>>,
}

#[derive(Debug)]
struct ProgressState {
    started: Instant,
    total_dirs: u64,
    processed_dirs: u64,
    /// operation id -> (status, since)
    operations: HashMap<String, (String, Instant)>,
    last_idle_warn: HashMap<String, Instant>,
    warnings: Vec<String>,
}

impl ProgressReporter {
    pub fn new(label: impl Into<String>, total_dirs: u64, config: ProgressConfig) -> Self {
        let label = label.into();
        let mode = config.resolve_mode();
        let rich = (mode == ResolvedProgressMode::Rich).then(|| RichUi::new(total_dirs));

        let inner = Arc::new(ProgressInner {
            label,
            mode,
            idle_threshold: config.idle_threshold,
            state: Mutex::new(ProgressState {
                started: Instant::now(),
                total_dirs,
                processed_dirs: 0,
                operations: HashMap::new(),
                last_idle_warn: HashMap::new(),
                warnings: Vec::new(),
            }),
            rich,
            stop: AtomicBool::new(false),
        });

        let ticker_inner = Arc::clone(&inner);
        let ticker = thread::spawn(move || {
            while !ticker_inner.stop.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(500));
                ticker_inner.check_idle(Instant::now());
            }
        });

        Self {
            handle: ProgressHandle { inner },
            ticker: Some(ticker),
        }
    }

    pub fn handle(&self) -> ProgressHandle {
        self.handle.clone()
    }

    pub fn finish(mut self, final_message: impl Into<String>) -> ProgressOutcome {
        self.shutdown_ticker();
        self.handle.inner.finalize(&final_message.into())
    }

    fn shutdown_ticker(&mut self) {
        self.handle.inner.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.ticker.take() {
            let _ = join.join();
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.shutdown_ticker();
    }
}

impl ProgressHandle {
    /// Marks `operation_id` (one per directory) as being in `status`.
    pub fn set_operation_status(&self, operation_id: &str, status: &str) {
        {
            let mut state = self.inner.lock_state();
            state
                .operations
                .insert(operation_id.to_string(), (status.to_string(), Instant::now()));
        }
        match (&self.inner.mode, &self.inner.rich) {
            (ResolvedProgressMode::Rich, Some(rich)) => rich.set_operation(operation_id, status),
            (ResolvedProgressMode::Plain, _) => {
                eprintln!("[PROGRESS] {}: {} -> {}", self.inner.label, operation_id, status)
            }
            _ => {}
        }
    }

    /// Ends an operation and advances the directory counter.
    pub fn complete_operation(&self, operation_id: &str, final_status: &str) {
        let (processed, total) = {
            let mut state = self.inner.lock_state();
            state.operations.remove(operation_id);
            state.last_idle_warn.remove(operation_id);
            state.processed_dirs += 1;
            (state.processed_dirs, state.total_dirs)
        };
        match (&self.inner.mode, &self.inner.rich) {
            (ResolvedProgressMode::Rich, Some(rich)) => {
                rich.clear_operation(operation_id);
                rich.overall.set_position(processed);
            }
            (ResolvedProgressMode::Plain, _) => eprintln!(
                "[PROGRESS] {}: {} {} ({}/{})",
                self.inner.label, operation_id, final_status, processed, total
            ),
            _ => {}
        }
    }

    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        push_warning(&mut self.inner.lock_state(), &message);
        self.inner.emit("WARN", &message);
    }
}

impl ProgressInner {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, ProgressState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_idle(&self, now: Instant) {
        if self.mode == ResolvedProgressMode::Quiet {
            return;
        }
        let messages = {
            let mut state = self.lock_state();
            let mut due = vec![];
            for (op, (status, since)) in &state.operations {
                let last = state.last_idle_warn.get(op).copied();
                if idle_warning_due(now, *since, last, self.idle_threshold) {
                    due.push((op.clone(), status.clone(), now.duration_since(*since)));
                }
            }
            let mut messages = vec![];
            for (op, status, busy) in due {
                state.last_idle_warn.insert(op.clone(), now);
                let msg = format!(
                    "IDLE WARNING: {} has been in '{}' for {}",
                    op,
                    status,
                    fmt_duration(busy)
                );
                push_warning(&mut state, &msg);
                messages.push(msg);
            }
            messages
        };
        for msg in messages {
            self.emit("WARN", &msg);
        }
        if let Some(rich) = &self.rich {
            rich.overall.tick();
        }
    }

    fn emit(&self, level: &str, message: &str) {
        match (&self.mode, &self.rich) {
            (ResolvedProgressMode::Quiet, _) => {}
            (ResolvedProgressMode::Rich, Some(rich)) => {
                let _ = rich
                    .multi
                    .println(format!("[{}] {}: {}", level, self.label, message));
            }
            _ => eprintln!("[{}] {}: {}", level, self.label, message),
        }
    }

    fn finalize(&self, final_message: &str) -> ProgressOutcome {
        let outcome = {
            let state = self.lock_state();
            ProgressOutcome {
                elapsed: state.started.elapsed(),
                total_dirs: state.total_dirs,
                processed_dirs: state.processed_dirs,
                warnings: state.warnings.clone(),
            }
        };
        match (&self.mode, &self.rich) {
            (ResolvedProgressMode::Quiet, _) => {}
            (ResolvedProgressMode::Rich, Some(rich)) => {
                rich.clear_all_ops();
                rich.overall.finish_with_message(final_message.to_string());
            }
            _ => eprintln!(
                "[DONE] {}: {} ({}/{} directories, {})",
                self.label,
                final_message,
                outcome.processed_dirs,
                outcome.total_dirs,
                fmt_duration(outcome.elapsed)
            ),
        }
        outcome
    }
}

impl RichUi {
    fn new(total_dirs: u64) -> Self {
        let multi = MultiProgress::new();
        let overall = multi.add(ProgressBar::new(total_dirs.max(1)));
        overall.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] {wide_bar:.cyan/blue} {pos}/{len} dirs | {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        overall.enable_steady_tick(Duration::from_millis(120));
        Self {
            multi,
            overall,
            ops: Mutex::new(HashMap::new()),
        }
    }

    fn set_operation(&self, op_id: &str, status: &str) {
        let mut ops = self.ops.lock().unwrap_or_else(|p| p.into_inner());
        let bar = ops.entry(op_id.to_string()).or_insert_with(|| {
            let pb = self.multi.add(ProgressBar::new_spinner());
            pb.set_style(
                ProgressStyle::with_template("{spinner:.magenta} {prefix:.bold} {msg} ({elapsed})")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner())
                    .tick_chars("|/-\\ "),
            );
            pb.enable_steady_tick(Duration::from_millis(120));
            pb.set_prefix(op_id.to_string());
            pb
        });
        bar.set_message(status.to_string());
    }

    fn clear_operation(&self, op_id: &str) {
        let mut ops = self.ops.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(bar) = ops.remove(op_id) {
            bar.finish_and_clear();
        }
    }

    fn clear_all_ops(&self) {
        let mut ops = self.ops.lock().unwrap_or_else(|p| p.into_inner());
        for (_id, bar) in ops.drain() {
            bar.finish_and_clear();
        }
    }
}

fn push_warning(state: &mut ProgressState, message: &str) {
    if state.warnings.len() >= MAX_STORED_WARNINGS {
        state.warnings.remove(0);
    }
    state.warnings.push(message.to_string());
}

fn idle_warning_due(
    now: Instant,
    busy_since: Instant,
    last_idle_warn: Option<Instant>,
    idle_threshold: Duration,
) -> bool {
    if now.duration_since(busy_since) < idle_threshold {
        return false;
    }
    match last_idle_warn {
        Some(last_warn) => now.duration_since(last_warn) >= idle_threshold,
        None => true,
    }
}
