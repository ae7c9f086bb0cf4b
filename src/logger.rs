//! Terminal output: module-prefixed log lines, watch status, progress.
//!
//! ```ignore
//! log!("heap"; "resolved {} nuts for '{}'", count, id);
//! debug!("cache"; "hit for {}", key);
//! ```
//!
//! `debug!` prints only once `--verbose` has switched the global flag on.

use crossterm::{
    cursor, execute,
    terminal::{Clear, ClearType},
};
use owo_colors::OwoColorize;
use parking_lot::Mutex;
use std::{
    io::{StdoutLock, Write, stdout},
    sync::LazyLock,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

static VERBOSE: AtomicBool = AtomicBool::new(false);

pub fn set_verbose(v: bool) {
    VERBOSE.store(v, Ordering::SeqCst);
}

pub fn is_verbose() -> bool {
    VERBOSE.load(Ordering::SeqCst)
}

/// Lines held by an active progress display, kept below log output
static BAR_COUNT: AtomicUsize = AtomicUsize::new(0);

// ============================================================================
// Macros
// ============================================================================

/// Log a message with a colored module prefix
#[macro_export]
macro_rules! log {
    ($module:expr; $($arg:tt)*) => {{
        $crate::logger::log($module, &format!($($arg)*))
    }};
}

/// Log a message only when verbose output is on
#[macro_export]
macro_rules! debug {
    ($module:expr; $($arg:tt)*) => {{
        if $crate::logger::is_verbose() {
            $crate::logger::log($module, &format!($($arg)*))
        }
    }};
}

// ============================================================================
// Log lines
// ============================================================================

#[allow(clippy::cast_possible_truncation)] // bar count is 0 or 1
pub fn log(module: &str, message: &str) {
    let prefix = colorize_prefix(module);
    let mut stdout = stdout().lock();

    let bars = BAR_COUNT.load(Ordering::SeqCst);
    if bars > 0 {
        execute!(stdout, cursor::MoveUp(bars as u16), Clear(ClearType::FromCursorDown)).ok();
    } else {
        execute!(stdout, Clear(ClearType::UntilNewLine)).ok();
    }
    writeln!(stdout, "{prefix} {message}").ok();
    // Leave room for the progress line to redraw under the message
    for _ in 0..bars {
        writeln!(stdout).ok();
    }
    stdout.flush().ok();
}

fn colorize_prefix(module: &str) -> String {
    let prefix = format!("[{module}]");
    match module.to_ascii_lowercase().as_str() {
        "serve" | "cache" => prefix.bright_blue().bold().to_string(),
        "watch" | "heap" | "poll" => prefix.bright_green().bold().to_string(),
        "error" => prefix.bright_red().bold().to_string(),
        _ => prefix.bright_yellow().bold().to_string(),
    }
}

/// Clear the current line and write `text` without a newline.
fn rewrite_line(stdout: &mut StdoutLock<'_>, text: &str, newline: bool) {
    execute!(stdout, cursor::MoveToColumn(0), Clear(ClearType::CurrentLine)).ok();
    if newline {
        writeln!(stdout, "{text}").ok();
    } else {
        write!(stdout, "{text}").ok();
    }
    stdout.flush().ok();
}

// ============================================================================
// Watch status
// ============================================================================

/// Wall clock as HH:MM:SS (UTC)
fn now() -> String {
    use std::time::SystemTime;
    let secs = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("{:02}:{:02}:{:02}", (secs / 3600) % 24, (secs / 60) % 60, secs % 60)
}

/// Status block that replaces the previous one, so a long watch session
/// shows only the latest outcome.
///
/// ```ignore
/// status_success("rebuilt: app (3 file(s))");
/// status_error("failed: styles", "backend 'dir' failed on 'main.css'");
/// ```
pub struct WatchStatus {
    /// Lines of previous output to clear
    last_lines: usize,
}

static WATCH_STATUS: LazyLock<Mutex<WatchStatus>> = LazyLock::new(|| Mutex::new(WatchStatus::new()));

impl WatchStatus {
    pub const fn new() -> Self {
        Self { last_lines: 0 }
    }

    pub fn success(&mut self, message: &str) {
        self.display(Some("✓".green().to_string()), message);
    }

    pub fn unchanged(&mut self, message: &str) {
        self.display(None, &message.dimmed().to_string());
    }

    pub fn error(&mut self, summary: &str, detail: &str) {
        let message = if detail.is_empty() {
            summary.to_string()
        } else {
            format!("{summary}\n{detail}")
        };
        self.display(Some("✗".red().to_string()), &message);
    }

    fn display(&mut self, symbol: Option<String>, message: &str) {
        let mut stdout = stdout().lock();
        if self.last_lines > 0 {
            #[allow(clippy::cast_possible_truncation)]
            let lines = self.last_lines as u16;
            execute!(stdout, cursor::MoveUp(lines), Clear(ClearType::FromCursorDown)).ok();
        }

        let timestamp = format!("[{}]", now()).dimmed().to_string();
        match symbol {
            Some(symbol) => writeln!(stdout, "{timestamp} {symbol} {message}").ok(),
            None => writeln!(stdout, "{timestamp} {message}").ok(),
        };
        stdout.flush().ok();

        self.last_lines = line_count(message);
    }
}

impl Default for WatchStatus {
    fn default() -> Self {
        Self::new()
    }
}

fn line_count(message: &str) -> usize {
    message.matches('\n').count() + 1
}

pub fn status_success(message: &str) {
    WATCH_STATUS.lock().success(message);
}

pub fn status_unchanged(message: &str) {
    WATCH_STATUS.lock().unchanged(message);
}

pub fn status_error(summary: &str, detail: &str) {
    WATCH_STATUS.lock().error(summary, detail);
}

// ============================================================================
// Progress line
// ============================================================================

/// Single-line counters, e.g. `[build] workflows(2/3)`.
///
/// Updates from worker threads use `try_lock`; a busy display skips the
/// redraw instead of blocking.
pub struct ProgressLine {
    module: &'static str,
    counters: Vec<Counter>,
    lock: Mutex<()>,
}

struct Counter {
    name: &'static str,
    total: usize,
    current: AtomicUsize,
}

impl ProgressLine {
    /// Counters with a zero total are left out.
    pub fn new(module: &'static str, items: &[(&'static str, usize)]) -> Self {
        let counters = items
            .iter()
            .filter(|(_, total)| *total > 0)
            .map(|&(name, total)| Counter {
                name,
                total,
                current: AtomicUsize::new(0),
            })
            .collect();

        BAR_COUNT.store(1, Ordering::SeqCst);
        let progress = Self {
            module,
            counters,
            lock: Mutex::new(()),
        };
        progress.display(false);
        progress
    }

    pub fn inc(&self, name: &str) {
        if let Some(counter) = self.counters.iter().find(|c| c.name == name) {
            counter.current.fetch_add(1, Ordering::Relaxed);
            if self.lock.try_lock().is_some() {
                self.display(false);
            }
        }
    }

    fn render(&self) -> String {
        let counters = self
            .counters
            .iter()
            .map(|c| format!("{}({}/{})", c.name, c.current.load(Ordering::Relaxed), c.total))
            .collect::<Vec<_>>()
            .join(" ");
        format!("{} {}", colorize_prefix(self.module), counters)
    }

    fn display(&self, newline: bool) {
        rewrite_line(&mut stdout().lock(), &self.render(), newline);
    }

    /// Keep the final counts on screen and move below them.
    pub fn finish(self) {
        BAR_COUNT.store(0, Ordering::SeqCst);
        {
            let _guard = self.lock.lock();
            self.display(true);
        }
        std::mem::forget(self); // Drop would clear the line
    }
}

impl Drop for ProgressLine {
    fn drop(&mut self) {
        BAR_COUNT.store(0, Ordering::SeqCst);
        rewrite_line(&mut stdout().lock(), "", false);
    }
}
