//! Page-size discovery.
//!
//! The platform's default page size and the set of additionally supported
//! page sizes are queried once and cached for the process lifetime. The set
//! is stored as a bitmask over exponents: bit `n` set means pages of `2^n`
//! bytes are available.

use std::fmt;
use std::sync::OnceLock;

use smallvec::SmallVec;

/// Default and available page sizes of a page backend.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PageSizeInfo {
    default_page_size: usize,
    available: u64,
}

impl PageSizeInfo {
    /// Build from a default size and any alternate sizes.
    ///
    /// Sizes that are not powers of two are ignored; the default is always
    /// part of the available set.
    pub fn new(default_page_size: usize, alternates: &[usize]) -> Self {
        debug_assert!(default_page_size.is_power_of_two());
        let mut available = 1u64 << default_page_size.trailing_zeros();
        for &size in alternates {
            if size.is_power_of_two() {
                available |= 1u64 << size.trailing_zeros();
            }
        }
        Self {
            default_page_size,
            available,
        }
    }

    /// The platform's default page size in bytes.
    pub fn default_page_size(&self) -> usize {
        self.default_page_size
    }

    /// Bitmask of available page-size exponents.
    pub fn available_mask(&self) -> u64 {
        self.available
    }

    /// Whether pages of `size` bytes can be reserved.
    pub fn supports(&self, size: usize) -> bool {
        size.is_power_of_two()
            && size.trailing_zeros() < u64::BITS
            && self.available & (1u64 << size.trailing_zeros()) != 0
    }

    /// All available page sizes, ascending.
    pub fn sizes(&self) -> SmallVec<[usize; 4]> {
        (0..usize::BITS)
            .filter(|&exp| exp < u64::BITS && self.available & (1u64 << exp) != 0)
            .map(|exp| 1usize << exp)
            .collect()
    }

    /// Smallest available page size that is at least `min` bytes.
    pub fn smallest_at_least(&self, min: usize) -> Option<usize> {
        self.sizes().into_iter().find(|&s| s >= min)
    }
}

impl fmt::Debug for PageSizeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageSizeInfo")
            .field("default_page_size", &self.default_page_size)
            .field("sizes", &self.sizes())
            .finish()
    }
}

/// Cached discovery result for the system page backend.
static SYSTEM_PAGE_SIZES: OnceLock<PageSizeInfo> = OnceLock::new();

/// Page sizes of the system page backend, discovered on first call.
///
/// Recomputing yields the same answer, so concurrent first calls are
/// harmless; exactly one result is kept.
pub fn page_size_info() -> PageSizeInfo {
    *SYSTEM_PAGE_SIZES.get_or_init(|| {
        let info = discover();
        tracing::debug!(
            default = info.default_page_size(),
            mask = info.available_mask(),
            "discovered page sizes"
        );
        info
    })
}

#[cfg(unix)]
fn discover() -> PageSizeInfo {
    // SAFETY: sysconf has no memory-safety preconditions.
    let raw = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    let default = usize::try_from(raw)
        .ok()
        .filter(|s| s.is_power_of_two())
        .unwrap_or(FALLBACK_PAGE_SIZE);
    PageSizeInfo::new(default, &huge_page_sizes())
}

#[cfg(not(unix))]
fn discover() -> PageSizeInfo {
    PageSizeInfo::new(FALLBACK_PAGE_SIZE, &[])
}

/// Page size assumed when the platform cannot be queried.
pub const FALLBACK_PAGE_SIZE: usize = 4096;

/// Huge page sizes configured on this host, from
/// `/sys/kernel/mm/hugepages/hugepages-<N>kB`.
#[cfg(target_os = "linux")]
fn huge_page_sizes() -> Vec<usize> {
    let Ok(entries) = std::fs::read_dir("/sys/kernel/mm/hugepages") else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter_map(|e| parse_hugepage_dir(&e.file_name().to_string_lossy()))
        .collect()
}

#[cfg(all(unix, not(target_os = "linux")))]
fn huge_page_sizes() -> Vec<usize> {
    Vec::new()
}

/// Parse `hugepages-2048kB` into a byte count.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
pub(crate) fn parse_hugepage_dir(name: &str) -> Option<usize> {
    let kb = name.strip_prefix("hugepages-")?.strip_suffix("kB")?;
    kb.parse::<usize>().ok()?.checked_mul(1024)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_always_available() {
        let info = PageSizeInfo::new(4096, &[]);
        assert!(info.supports(4096));
        assert_eq!(info.available_mask(), 1 << 12);
        assert_eq!(info.sizes().as_slice(), &[4096]);
    }

    #[test]
    fn alternates_set_exponent_bits() {
        let info = PageSizeInfo::new(4096, &[2 * 1024 * 1024, 1 << 30, 3000]);
        assert!(info.supports(2 * 1024 * 1024));
        assert!(info.supports(1 << 30));
        assert!(!info.supports(3000));
        assert!(!info.supports(8192));
        assert_eq!(info.sizes().as_slice(), &[4096, 2 * 1024 * 1024, 1 << 30]);
    }

    #[test]
    fn smallest_at_least_picks_next_size() {
        let info = PageSizeInfo::new(4096, &[2 * 1024 * 1024]);
        assert_eq!(info.smallest_at_least(1), Some(4096));
        assert_eq!(info.smallest_at_least(8192), Some(2 * 1024 * 1024));
        assert_eq!(info.smallest_at_least(4 * 1024 * 1024), None);
    }

    #[test]
    fn system_discovery_is_cached_and_sane() {
        let a = page_size_info();
        let b = page_size_info();
        assert_eq!(a, b);
        assert!(a.default_page_size().is_power_of_two());
        assert!(a.supports(a.default_page_size()));
    }

    #[test]
    fn hugepage_dir_names_parse() {
        assert_eq!(parse_hugepage_dir("hugepages-2048kB"), Some(2 * 1024 * 1024));
        assert_eq!(parse_hugepage_dir("hugepages-1048576kB"), Some(1 << 30));
        assert_eq!(parse_hugepage_dir("nr_hugepages"), None);
    }

    #[cfg(not(miri))]
    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn sizes_and_supports_agree_with_the_mask(
                default_exp in 9u32..17,
                alternate_exps in proptest::collection::vec(0u32..40, 0..6),
            ) {
                let alternates: Vec<usize> = alternate_exps.iter().map(|&e| 1usize << e).collect();
                let info = PageSizeInfo::new(1usize << default_exp, &alternates);

                let sizes = info.sizes();
                prop_assert!(sizes.windows(2).all(|w| w[0] < w[1]));
                prop_assert_eq!(sizes.len() as u32, info.available_mask().count_ones());
                prop_assert!(info.supports(1usize << default_exp));
                for &size in &alternates {
                    prop_assert!(info.supports(size));
                    prop_assert!(sizes.contains(&size));
                }
                for &size in &sizes {
                    prop_assert!(info.supports(size));
                    prop_assert_eq!(info.smallest_at_least(size), Some(size));
                    if size > 1 {
                        prop_assert!(!info.supports(size + 1));
                    }
                }
            }
        }
    }
}
