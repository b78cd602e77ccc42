use std::sync::LazyLock;
use std::time::Instant;

static BOOT: LazyLock<Instant> = LazyLock::new(Instant::now);

/// Monotonic microseconds since the first call in this process.
pub(crate) fn now_us() -> u64 {
    BOOT.elapsed().as_micros() as u64
}
