//! Leak sentinels: deferred detection of buffers dropped without disposal.
//!
//! A sentinel is armed when its buffer is constructed and cleared by the
//! buffer's `dispose()`. If the sentinel is dropped while still armed, the
//! buffer was abandoned: the sentinel logs a leak report through `tracing`
//! and appends it to a process-wide registry that tests and tooling can
//! drain with [`take_leak_reports`].
//!
//! Sentinels are diagnostic only. Storage correctness never depends on them.

use std::backtrace::Backtrace;
use std::fmt;
use std::panic::Location;
use std::sync::Mutex;

use ballast_core::{leak_detection_mode, AllocatorLabel, BufferId, LeakDetectionMode};

/// Reports collected from sentinels that fired.
static LEAKS: Mutex<Vec<LeakReport>> = Mutex::new(Vec::new());

/// Description of one buffer abandoned without disposal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeakReport {
    /// The leaked buffer.
    pub buffer: BufferId,
    /// Label the buffer allocated under.
    pub label: AllocatorLabel,
    /// Source location that constructed the buffer.
    pub origin: &'static Location<'static>,
    /// Backtrace captured at construction, truncated to the configured
    /// depth. Present only in [`LeakDetectionMode::EnabledWithStackTrace`].
    pub backtrace: Option<String>,
}

impl fmt::Display for LeakReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "native buffer {} ({}) allocated at {} was never disposed",
            self.buffer, self.label, self.origin
        )?;
        if let Some(bt) = &self.backtrace {
            write!(f, "\n{bt}")?;
        }
        Ok(())
    }
}

/// Drain all leak reports recorded so far.
pub fn take_leak_reports() -> Vec<LeakReport> {
    let mut guard = match LEAKS.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    };
    std::mem::take(&mut *guard)
}

/// Drain the leak reports for one buffer, leaving the others in place.
pub fn take_leak_reports_for(buffer: BufferId) -> Vec<LeakReport> {
    let mut guard = match LEAKS.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    };
    let (mine, rest): (Vec<_>, Vec<_>) = guard.drain(..).partition(|r| r.buffer == buffer);
    *guard = rest;
    mine
}

fn record(report: LeakReport) {
    tracing::error!(
        buffer = %report.buffer,
        label = %report.label,
        origin = %report.origin,
        "native buffer dropped without dispose()"
    );
    if let Some(bt) = &report.backtrace {
        tracing::error!(buffer = %report.buffer, "allocation backtrace:\n{bt}");
    }
    let mut guard = match LEAKS.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    };
    guard.push(report);
}

/// Crates whose frames sit between a buffer constructor's caller and the
/// backtrace capture.
const INTERNAL_CRATES: [&str; 5] = [
    "std::backtrace",
    "ballast_alloc::",
    "ballast_buffer::",
    "ballast_vm::",
    "ballast_core::",
];

fn is_internal_frame(symbol: &str) -> bool {
    let path = symbol.trim_start_matches('<');
    INTERNAL_CRATES.iter().any(|c| path.starts_with(c)) && !path.contains("::tests::")
}

/// Keep the first `depth` caller frames of a rendered backtrace.
///
/// Leading frames of the capture machinery and of Ballast's own crates are
/// dropped first, so the kept frames start at the code that constructed the
/// buffer. Frame headers are the lines of the form `  N: symbol`; the
/// `at file:line` and inlined-symbol lines that follow a kept header are kept
/// with it.
pub fn caller_frames(rendered: &str, depth: usize) -> String {
    let mut out = String::new();
    let mut kept = 0usize;
    let mut skipping = true;
    let mut keeping = false;
    for line in rendered.lines() {
        let header = line
            .trim_start()
            .split_once(": ")
            .filter(|(n, _)| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()));
        if let Some((_, symbol)) = header {
            if skipping && is_internal_frame(symbol) {
                keeping = false;
                continue;
            }
            skipping = false;
            kept += 1;
            if kept > depth {
                break;
            }
            keeping = true;
        }
        if keeping {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

/// Diagnostic guard owned by a buffer.
pub trait LeakSentinel {
    /// Arm a sentinel for a freshly constructed buffer.
    fn arm(
        buffer: BufferId,
        label: AllocatorLabel,
        origin: &'static Location<'static>,
        capture_depth: u16,
    ) -> Self;

    /// Disarm after a normal disposal. Idempotent.
    fn clear(&mut self);

    /// Whether the deferred check would fire if dropped now.
    fn is_armed(&self) -> bool;
}

/// Sentinel for buffers that opt out of leak tracking. Zero-sized.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NoLeakCheck;

impl LeakSentinel for NoLeakCheck {
    #[inline]
    fn arm(_: BufferId, _: AllocatorLabel, _: &'static Location<'static>, _: u16) -> Self {
        NoLeakCheck
    }

    #[inline]
    fn clear(&mut self) {}

    #[inline]
    fn is_armed(&self) -> bool {
        false
    }
}

/// Sentinel that reports an abandoned buffer exactly once, on drop.
#[derive(Debug)]
pub struct TrackedSentinel {
    armed: bool,
    buffer: BufferId,
    label: AllocatorLabel,
    origin: &'static Location<'static>,
    backtrace: Option<String>,
}

impl TrackedSentinel {
    /// Source location that constructed the buffer.
    pub fn origin(&self) -> &'static Location<'static> {
        self.origin
    }

    /// Backtrace captured at arm time, if any.
    pub fn backtrace(&self) -> Option<&str> {
        self.backtrace.as_deref()
    }
}

impl LeakSentinel for TrackedSentinel {
    fn arm(
        buffer: BufferId,
        label: AllocatorLabel,
        origin: &'static Location<'static>,
        capture_depth: u16,
    ) -> Self {
        let backtrace = match leak_detection_mode() {
            LeakDetectionMode::EnabledWithStackTrace if capture_depth > 0 => Some(caller_frames(
                &Backtrace::force_capture().to_string(),
                capture_depth as usize,
            )),
            _ => None,
        };
        Self {
            armed: true,
            buffer,
            label,
            origin,
            backtrace,
        }
    }

    fn clear(&mut self) {
        self.armed = false;
    }

    fn is_armed(&self) -> bool {
        self.armed
    }
}

impl Drop for TrackedSentinel {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.armed = false;
        if leak_detection_mode() == LeakDetectionMode::Disabled {
            return;
        }
        record(LeakReport {
            buffer: self.buffer,
            label: self.label,
            origin: self.origin,
            backtrace: self.backtrace.take(),
        });
    }
}

/// Sentinel used by buffers unless they pick one explicitly.
#[cfg(feature = "leak-check")]
pub type DefaultSentinel = TrackedSentinel;

/// Sentinel used by buffers unless they pick one explicitly.
#[cfg(not(feature = "leak-check"))]
pub type DefaultSentinel = NoLeakCheck;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleared_sentinel_does_not_report() {
        let id = BufferId::next();
        let mut s = TrackedSentinel::arm(id, AllocatorLabel::Persistent, Location::caller(), 0);
        assert!(s.is_armed());
        s.clear();
        drop(s);
        assert!(take_leak_reports_for(id).is_empty());
    }

    #[test]
    fn armed_sentinel_reports_once_with_origin() {
        let id = BufferId::next();
        let here = Location::caller();
        let s = TrackedSentinel::arm(id, AllocatorLabel::ThreadTemp, here, 0);
        drop(s);
        let reports = take_leak_reports_for(id);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].label, AllocatorLabel::ThreadTemp);
        assert_eq!(reports[0].origin.file(), here.file());
        assert!(take_leak_reports_for(id).is_empty());
    }

    #[test]
    fn no_leak_check_is_zero_sized_and_never_armed() {
        assert_eq!(std::mem::size_of::<NoLeakCheck>(), 0);
        let s = NoLeakCheck::arm(BufferId::next(), AllocatorLabel::Persistent, Location::caller(), 4);
        assert!(!s.is_armed());
    }

    #[test]
    fn caller_frames_keeps_requested_frames() {
        let rendered = "\
   0: first
             at src/a.rs:1:1
   1: second
             at src/b.rs:2:2
   2: third
             at src/c.rs:3:3
";
        let kept = caller_frames(rendered, 2);
        assert!(kept.contains("first"));
        assert!(kept.contains("src/b.rs"));
        assert!(!kept.contains("third"));
    }

    #[test]
    fn caller_frames_skips_capture_and_constructor_frames() {
        let rendered = "\
   0: std::backtrace_rs::backtrace::libunwind::trace
             at /rustc/library/std/src/../../backtrace/src/backtrace/libunwind.rs:117:9
   1: std::backtrace::Backtrace::create
   2: <ballast_alloc::sentinel::TrackedSentinel as ballast_alloc::sentinel::LeakSentinel>::arm
             at crates/ballast-alloc/src/sentinel.rs:10:5
   3: ballast_buffer::list::NativeList<T,A,S>::with_config_in
   4: ballast_buffer::list::NativeList<T>::with_capacity
   5: app::build_index
             at src/index.rs:40:9
   6: app::main
   7: core::ops::function::FnOnce::call_once
";
        let kept = caller_frames(rendered, 2);
        assert!(kept.trim_start().starts_with("5: app::build_index"));
        assert!(kept.contains("src/index.rs:40:9"));
        assert!(kept.contains("app::main"));
        assert!(!kept.contains("with_capacity"));
        assert!(!kept.contains("call_once"));
    }

    #[test]
    fn crate_test_frames_count_as_callers() {
        let rendered = "\
   0: ballast_buffer::list::NativeList<T>::with_capacity
   1: ballast_buffer::list::tests::leaks
";
        assert!(caller_frames(rendered, 1).contains("tests::leaks"));
    }

    #[test]
    fn report_display_names_origin() {
        let report = LeakReport {
            buffer: BufferId::next(),
            label: AllocatorLabel::Persistent,
            origin: Location::caller(),
            backtrace: None,
        };
        let text = report.to_string();
        assert!(text.contains("never disposed"));
        assert!(text.contains(file!()));
    }
}
