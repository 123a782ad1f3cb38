// SPDX-License-Identifier: CEPL-1.0
use prism_render::RenderSize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResizeDecision {
    /// Nothing pending.
    Idle,
    /// A rebuild is pending but the window is minimised; skip the frame.
    Defer,
    /// Rebuild now at this size. Yielded once per pending change.
    Rebuild(RenderSize),
}

/// Collects resize notifications and staleness reports between frames and
/// turns them into at most one rebuild.
#[derive(Clone, Copy, Debug)]
pub struct ResizeGate {
    latest: RenderSize,
    pending: bool,
}

impl ResizeGate {
    pub fn new(initial: RenderSize) -> Self {
        Self {
            latest: initial,
            pending: false,
        }
    }

    pub fn notify(&mut self, size: RenderSize) {
        if size != self.latest {
            self.latest = size;
            self.pending = true;
        }
    }

    /// Present or acquire reported the surface out of date.
    pub fn mark_stale(&mut self) {
        self.pending = true;
    }

    pub fn latest(&self) -> RenderSize {
        self.latest
    }

    pub fn is_minimized(&self) -> bool {
        self.latest.is_zero()
    }

    pub fn poll(&mut self) -> ResizeDecision {
        if self.is_minimized() {
            return ResizeDecision::Defer;
        }
        if self.pending {
            self.pending = false;
            return ResizeDecision::Rebuild(self.latest);
        }
        ResizeDecision::Idle
    }
}
