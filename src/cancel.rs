use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Marker error returned by every search step once cancellation is observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

/// Shared cooperative cancellation flag.
///
/// Cloning hands out another handle to the same flag; the host keeps one and
/// the unit of work polls the other.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// `Err(Cancelled)` once the flag is set, for use with `?`.
    #[inline]
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Monotonic integer percentage sink that drops repeated and backward values.
pub struct Progress<'a> {
    sink: Box<dyn FnMut(u8) + Send + 'a>,
    last: Option<u8>,
}

impl<'a> Progress<'a> {
    pub fn new(sink: impl FnMut(u8) + Send + 'a) -> Self {
        Self {
            sink: Box::new(sink),
            last: None,
        }
    }

    /// A reporter that discards everything.
    pub fn silent() -> Progress<'static> {
        Progress::new(|_| {})
    }

    pub fn report(&mut self, percent: u8) {
        let percent = percent.min(100);
        if self.last.is_some_and(|last| percent <= last) {
            return;
        }
        self.last = Some(percent);
        (self.sink)(percent);
    }

    /// Reports `done / total` of the `[from, to]` percentage band.
    pub fn report_span(&mut self, from: u8, to: u8, done: u64, total: u64) {
        let total = total.max(1);
        let span = u64::from(to.saturating_sub(from));
        let step = (span * done.min(total) / total) as u8;
        self.report(from + step);
    }

    pub fn last(&self) -> Option<u8> {
        self.last
    }
}
