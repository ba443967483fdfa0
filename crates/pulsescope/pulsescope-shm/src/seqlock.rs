//! Bounded seqlock read against an external, uncooperative writer.
//!
//! The producer brackets every update with the header's `sequence` counter:
//! odd while it is writing, even once the header and the regions it points
//! into are stable. This side only ever reads the counter.
//!
//! # Protocol
//!
//! **Reader (one attempt):**
//! 1. Load seq (Acquire); if odd, yield and start the next attempt
//! 2. Copy the fields and regions of interest with plain loads
//! 3. Acquire fence, then load seq again
//! 4. If seq changed, the copy may be torn: yield and start the next attempt
//! 5. Otherwise the copy is consistent
//!
//! Unlike an in-process seqlock the reader does not spin forever. The writer
//! may have stalled or died mid-update, so after a fixed number of attempts
//! the read reports "not ready" and the caller skips its tick.

use crate::header::HeaderView;
use std::sync::atomic::{Ordering, fence};

/// Run `read` under the seqlock, at most `attempts` times.
///
/// `read` returns `None` to reject what it saw (out-of-range offsets and the
/// like); that ends the whole read immediately without a retry.
///
/// Returns `None` when every attempt overlapped a write or `read` rejected.
pub fn read_consistent<T, F>(view: &HeaderView<'_>, attempts: u32, mut read: F) -> Option<T>
where
    F: FnMut(&HeaderView<'_>) -> Option<T>,
{
    for _ in 0..attempts {
        let s1 = view.sequence();
        if (s1 & 1) == 1 {
            std::thread::yield_now();
            continue;
        }

        let value = read(view)?;

        fence(Ordering::Acquire);
        let s2 = view.sequence_relaxed();
        if s1 == s2 {
            return Some(value);
        }

        std::thread::yield_now();
    }
    None
}
