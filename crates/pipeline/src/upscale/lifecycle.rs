//! Accelerator context lifecycle bookkeeping
//!
//! The context's internal buffers are sized to the (render, display)
//! extent pair, so any extent change demands destroy + recreate. The
//! bookkeeping lives in one explicit per-session struct; nothing here
//! survives a session.

use capture_x11::Extent;

// Alternating sub-pixel offsets for temporal sample accumulation;
// there is no real camera, so two phases suffice.
const JITTER_PHASES: [[f32; 2]; 2] = [[0.25, -0.25], [-0.25, 0.25]];

/// Generation and dispatch counters for one accelerator context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpscaleLifecycle {
    render_extent: Extent,
    display_extent: Extent,
    generation: u64,
    dispatches: u64,
}

impl UpscaleLifecycle {
    pub fn new(render_extent: Extent, display_extent: Extent) -> Self {
        Self {
            render_extent,
            display_extent,
            generation: 0,
            dispatches: 0,
        }
    }

    /// Does the current context survive the observed geometry?
    pub fn needs_recreate(&self, render_extent: Extent, display_extent: Extent) -> bool {
        render_extent != self.render_extent || display_extent != self.display_extent
    }

    /// Note a freshly created context for the given geometry.
    pub fn on_recreated(&mut self, render_extent: Extent, display_extent: Extent) {
        self.render_extent = render_extent;
        self.display_extent = display_extent;
        self.generation += 1;
        self.dispatches = 0;
    }

    /// Distinct per context instance within the session.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn render_extent(&self) -> Extent {
        self.render_extent
    }

    pub fn display_extent(&self) -> Extent {
        self.display_extent
    }

    /// The accelerator must drop its temporal history exactly on the
    /// first dispatch after (re)creation.
    pub fn reset_flag(&self) -> bool {
        self.dispatches == 0
    }

    /// Sub-pixel jitter offset for the upcoming dispatch.
    pub fn jitter_offset(&self) -> [f32; 2] {
        JITTER_PHASES[(self.dispatches % 2) as usize]
    }

    /// Note one successfully recorded dispatch.
    pub fn on_dispatched(&mut self) {
        self.dispatches += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lifecycle() -> UpscaleLifecycle {
        UpscaleLifecycle::new(Extent::new(800, 600), Extent::new(1920, 1080))
    }

    #[test]
    fn reset_is_asserted_only_for_the_first_dispatch() {
        let mut lc = lifecycle();
        assert!(lc.reset_flag());
        lc.on_dispatched();
        assert!(!lc.reset_flag());
        lc.on_dispatched();
        assert!(!lc.reset_flag());
    }

    #[test]
    fn recreation_rearms_the_reset_flag() {
        let mut lc = lifecycle();
        lc.on_dispatched();
        lc.on_dispatched();
        assert!(!lc.reset_flag());

        lc.on_recreated(Extent::new(800, 600), Extent::new(2560, 1440));
        assert!(lc.reset_flag());
        lc.on_dispatched();
        assert!(!lc.reset_flag());
    }

    #[test]
    fn extent_changes_demand_recreation() {
        let lc = lifecycle();
        assert!(!lc.needs_recreate(Extent::new(800, 600), Extent::new(1920, 1080)));
        assert!(lc.needs_recreate(Extent::new(640, 480), Extent::new(1920, 1080)));
        assert!(lc.needs_recreate(Extent::new(800, 600), Extent::new(2560, 1440)));
    }

    #[test]
    fn each_recreation_yields_a_distinct_generation() {
        let mut lc = lifecycle();
        let first = lc.generation();
        lc.on_recreated(Extent::new(640, 480), Extent::new(1920, 1080));
        let second = lc.generation();
        lc.on_recreated(Extent::new(800, 600), Extent::new(1920, 1080));
        let third = lc.generation();
        assert_ne!(first, second);
        assert_ne!(second, third);
    }

    #[test]
    fn jitter_alternates_between_two_phases() {
        let mut lc = lifecycle();
        let a = lc.jitter_offset();
        lc.on_dispatched();
        let b = lc.jitter_offset();
        lc.on_dispatched();
        let c = lc.jitter_offset();
        assert_ne!(a, b);
        assert_eq!(a, c);
    }
}
