//! Virtual-memory error state.
//!
//! Every range operation yields an explicit [`VmError`] on failure instead of
//! panicking: callers decide whether to log, retry, or abort. The error
//! carries the failing operation, a kind, the platform sub-code (`errno` on
//! Unix) and the source location of the call that failed.

use std::error::Error;
use std::fmt::{self, Write as _};
use std::panic::Location;

/// Which range operation failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VmOp {
    /// Reserving address space.
    Reserve,
    /// Making reserved pages readable and writable.
    Commit,
    /// Returning committed pages to the reserved state.
    Decommit,
    /// Releasing the address space.
    Free,
}

impl fmt::Display for VmOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Reserve => "reserve",
            Self::Commit => "commit",
            Self::Decommit => "decommit",
            Self::Free => "free",
        })
    }
}

/// Classification of a virtual-memory failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VmErrorKind {
    /// The platform could not provide the pages.
    OutOfMemory,
    /// The range is empty, overflows, was already freed, or the platform
    /// rejected the address range.
    InvalidAddressRange,
    /// The page size is not a power of two or is not supported.
    InvalidPageSize,
    /// The backend cannot perform this operation.
    Unsupported,
}

impl fmt::Display for VmErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::OutOfMemory => "out of memory",
            Self::InvalidAddressRange => "invalid address range",
            Self::InvalidPageSize => "invalid page size",
            Self::Unsupported => "unsupported",
        })
    }
}

/// Raw failure reported by a page backend, before the caller's location is
/// attached.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OsFailure {
    /// Classification.
    pub kind: VmErrorKind,
    /// Platform sub-code; 0 when there is none.
    pub os_code: i32,
}

impl OsFailure {
    /// A failure without a platform sub-code.
    pub fn new(kind: VmErrorKind) -> Self {
        Self { kind, os_code: 0 }
    }
}

/// Error state of a failed range operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VmError {
    /// The operation that failed.
    pub op: VmOp,
    /// Classification.
    pub kind: VmErrorKind,
    /// Platform sub-code (`errno` on Unix); 0 when there is none.
    pub os_code: i32,
    /// Call site of the failing operation.
    pub location: &'static Location<'static>,
}

impl VmError {
    pub(crate) fn new(op: VmOp, failure: OsFailure, location: &'static Location<'static>) -> Self {
        Self {
            op,
            kind: failure.kind,
            os_code: failure.os_code,
            location,
        }
    }

    /// Render a short description into `buf`, returning the filled prefix.
    ///
    /// Output that does not fit is truncated at a character boundary.
    pub fn render<'b>(&self, buf: &'b mut [u8]) -> &'b [u8] {
        let mut sink = ByteSink {
            buf,
            len: 0,
            full: false,
        };
        // ByteSink never reports an error; it truncates instead.
        let _ = write!(sink, "{self}");
        let ByteSink { buf, len, .. } = sink;
        let filled: &'b [u8] = buf;
        &filled[..len]
    }
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vm {} failed: {}", self.op, self.kind)?;
        if self.os_code != 0 {
            write!(f, " (os error {})", self.os_code)?;
        }
        write!(f, " at {}", self.location)
    }
}

impl Error for VmError {}

/// Fixed-capacity `fmt::Write` target that truncates instead of failing.
///
/// Once a piece has been cut short, everything after it is dropped, so the
/// output is always a prefix of the full message.
struct ByteSink<'b> {
    buf: &'b mut [u8],
    len: usize,
    full: bool,
}

impl fmt::Write for ByteSink<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if self.full {
            return Ok(());
        }
        let room = self.buf.len() - self.len;
        let mut take = s.len().min(room);
        while !s.is_char_boundary(take) {
            take -= 1;
        }
        self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        self.full = take < s.len();
        Ok(())
    }
}
