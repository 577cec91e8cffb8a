//! Breakpoints over compiled expressions.
use super::position::{LineCol, LineSpan};
use crate::Error;
use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError, RwLock},
};

/// Receives breakpoint notifications.
pub trait BreakpointListener: Send + Sync {
    /// A node overlapping the breakpoint is about to be evaluated.
    /// `start` and `end` are the node's position.
    fn on_hit(&self, breakpoint: &Breakpoint, start: LineCol, end: LineCol);

    /// An error was raised by a node overlapping an on-exception breakpoint.
    /// The error already carries the call stack.
    fn on_error(&self, breakpoint: &Breakpoint, error: &Error) {
        let _ = (breakpoint, error);
    }
}

pub struct Breakpoint {
    span: LineSpan,
    listener: Arc<dyn BreakpointListener>,
    on_exception: bool,
}

impl Breakpoint {
    pub fn span(&self) -> LineSpan {
        self.span
    }

    /// If the breakpoint only reports errors.
    pub fn is_on_exception(&self) -> bool {
        self.on_exception
    }
}

impl fmt::Debug for Breakpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Breakpoint")
            .field("span", &self.span)
            .field("on_exception", &self.on_exception)
            .finish_non_exhaustive()
    }
}

/// Breakpoint registry shared by every unit compiled with it.
///
/// Breakpoints can be added at any time, including while compiled units
/// are being evaluated. Evaluation reads the currently published list.
#[derive(Clone, Default)]
pub struct DebugContext(Arc<Registry>);

#[derive(Default)]
struct Registry {
    breakpoints: RwLock<Arc<Vec<Arc<Breakpoint>>>>,
    add: Mutex<()>,
}

impl DebugContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_breakpoint(
        &self,
        start: LineCol,
        end: LineCol,
        listener: Arc<dyn BreakpointListener>,
        on_exception: bool,
    ) -> Arc<Breakpoint> {
        let breakpoint = Arc::new(Breakpoint {
            span: LineSpan::new(start, end),
            listener,
            on_exception,
        });

        let _guard = self.0.add.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = (*self.breakpoints()).clone();
        next.push(breakpoint.clone());
        *self
            .0
            .breakpoints
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(next);

        #[cfg(feature = "tracing")]
        tracing::debug!(%start, %end, on_exception, "add breakpoint");

        breakpoint
    }

    /// Currently published breakpoints.
    pub fn breakpoints(&self) -> Arc<Vec<Arc<Breakpoint>>> {
        self.0
            .breakpoints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Notify the breakpoints overlapping a node about to be evaluated.
    pub(crate) fn hit(&self, node: &LineSpan) {
        for breakpoint in self.breakpoints().iter() {
            if !breakpoint.on_exception && breakpoint.span.overlaps(node) {
                #[cfg(feature = "tracing")]
                tracing::debug!(start = %node.start, end = %node.end, "breakpoint hit");

                breakpoint.listener.on_hit(breakpoint, node.start, node.end);
            }
        }
    }

    /// Report an error to the on-exception breakpoints overlapping the node.
    pub(crate) fn fail(&self, node: &LineSpan, error: &Error) {
        for breakpoint in self.breakpoints().iter() {
            if breakpoint.on_exception && breakpoint.span.overlaps(node) {
                breakpoint.listener.on_error(breakpoint, error);
            }
        }
    }
}

impl fmt::Debug for DebugContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DebugContext")
            .field(&self.breakpoints().len())
            .finish()
    }
}
