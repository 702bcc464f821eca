//! Buffer configuration and process-wide leak detection settings.

use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::BufferError;
use crate::label::AllocatorLabel;

/// Construction parameters for a growable buffer.
///
/// Validated by [`ListConfig::validate`] when the buffer is built; all values
/// are immutable afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListConfig {
    /// Initial capacity in elements. Values below 1 are rounded up to 1.
    pub initial_capacity: usize,

    /// Memory domain the buffer allocates from. Must not be
    /// [`AllocatorLabel::Invalid`].
    pub label: AllocatorLabel,

    /// Number of stack frames kept in a leak report when leak detection runs
    /// in [`LeakDetectionMode::EnabledWithStackTrace`].
    ///
    /// Default: 8. At most [`ListConfig::MAX_CAPTURE_DEPTH`].
    pub capture_depth: u16,
}

impl ListConfig {
    /// Default number of frames captured for leak reports.
    pub const DEFAULT_CAPTURE_DEPTH: u16 = 8;

    /// Upper bound on `capture_depth`.
    pub const MAX_CAPTURE_DEPTH: u16 = 128;

    /// Create a config for the given capacity and label with default depth.
    pub fn new(initial_capacity: usize, label: AllocatorLabel) -> Self {
        Self {
            initial_capacity,
            label,
            capture_depth: Self::DEFAULT_CAPTURE_DEPTH,
        }
    }

    /// Set the leak-report capture depth.
    pub fn with_capture_depth(mut self, depth: u16) -> Self {
        self.capture_depth = depth;
        self
    }

    /// Capacity actually allocated: `initial_capacity` rounded up to 1.
    pub fn effective_capacity(&self) -> usize {
        self.initial_capacity.max(1)
    }

    /// Check the config for programming errors.
    pub fn validate(&self) -> Result<(), BufferError> {
        if self.label.is_invalid() {
            return Err(BufferError::InvalidAllocator { label: self.label });
        }
        if self.capture_depth > Self::MAX_CAPTURE_DEPTH {
            return Err(BufferError::InvalidArgument {
                reason: format!(
                    "capture_depth must be <= {} (got {})",
                    Self::MAX_CAPTURE_DEPTH,
                    self.capture_depth
                ),
            });
        }
        Ok(())
    }
}

impl Default for ListConfig {
    fn default() -> Self {
        Self::new(1, AllocatorLabel::Persistent)
    }
}

/// How buffers abandoned without disposal are reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum LeakDetectionMode {
    /// No leak tracking. Sentinels are armed but never report.
    Disabled = 0,
    /// Report the originating source location of leaked buffers.
    Enabled = 1,
    /// Additionally capture a backtrace at construction, truncated to the
    /// buffer's capture depth.
    EnabledWithStackTrace = 2,
}

impl LeakDetectionMode {
    /// Environment variable read once to seed the process-wide mode.
    pub const ENV_VAR: &'static str = "BALLAST_LEAK_DETECTION";

    /// Parse the environment-variable spelling (`off`, `on`, `stack`).
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "off" | "0" | "disabled" => Some(Self::Disabled),
            "on" | "1" | "enabled" => Some(Self::Enabled),
            "stack" | "2" | "full" => Some(Self::EnabledWithStackTrace),
            _ => None,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Disabled,
            2 => Self::EnabledWithStackTrace,
            _ => Self::Enabled,
        }
    }
}

/// Sentinel value meaning "not yet read from the environment".
const MODE_UNSET: u8 = u8::MAX;

static LEAK_MODE: AtomicU8 = AtomicU8::new(MODE_UNSET);

/// Current process-wide leak detection mode.
///
/// On first call the mode is read from [`LeakDetectionMode::ENV_VAR`];
/// unset or unparseable values fall back to [`LeakDetectionMode::Enabled`].
pub fn leak_detection_mode() -> LeakDetectionMode {
    let raw = LEAK_MODE.load(Ordering::Relaxed);
    if raw != MODE_UNSET {
        return LeakDetectionMode::from_u8(raw);
    }
    let mode = match std::env::var(LeakDetectionMode::ENV_VAR) {
        Ok(value) => LeakDetectionMode::parse(&value).unwrap_or_else(|| {
            tracing::warn!(
                var = LeakDetectionMode::ENV_VAR,
                value = %value,
                "unrecognised leak detection mode, using 'on'"
            );
            LeakDetectionMode::Enabled
        }),
        Err(_) => LeakDetectionMode::Enabled,
    };
    // A concurrent `set_leak_detection_mode` wins over the environment.
    match LEAK_MODE.compare_exchange(MODE_UNSET, mode as u8, Ordering::Relaxed, Ordering::Relaxed)
    {
        Ok(_) => mode,
        Err(current) => LeakDetectionMode::from_u8(current),
    }
}

/// Override the process-wide leak detection mode.
pub fn set_leak_detection_mode(mode: LeakDetectionMode) {
    LEAK_MODE.store(mode as u8, Ordering::Relaxed);
}
