//! Plain console progress sink.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::ui::progress::ProgressSink;

/// Format bytes as human readable.
pub fn format_size(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;

    if bytes >= GIB {
        format!("{:.1} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Line-oriented sink for non-interactive output. Download progress is
/// rate-limited so log files stay readable.
#[derive(Debug)]
pub struct ConsoleSink {
    quiet: bool,
    last_line: Mutex<Instant>,
}

impl ConsoleSink {
    pub fn new(quiet: bool) -> Self {
        Self {
            quiet,
            last_line: Mutex::new(Instant::now()),
        }
    }
}

impl ProgressSink for ConsoleSink {
    fn start(&self, name: &str, detail: &str) {
        if !self.quiet {
            println!("  {name}: {detail}");
        }
    }

    fn advance(&self, name: &str, current: u64, total: u64) {
        if self.quiet {
            return;
        }
        let mut last = self.last_line.lock().expect("sink lock poisoned");
        if last.elapsed() < Duration::from_secs(1) {
            return;
        }
        *last = Instant::now();
        if total > 0 {
            println!(
                "  {name}: {} / {} ({:.0}%)",
                format_size(current),
                format_size(total),
                current as f64 / total as f64 * 100.0
            );
        } else {
            println!("  {name}: {}", format_size(current));
        }
    }

    fn set_description(&self, name: &str, description: &str) {
        if !self.quiet {
            println!("  {name}: {description}");
        }
    }

    fn success(&self, name: &str, detail: &str) {
        println!("  {name}: ok {detail}");
    }

    fn fail(&self, name: &str, reason: &str) {
        eprintln!("  {name}: failed: {reason}");
    }
}
