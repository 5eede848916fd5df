//! Fixed pass order and the semaphore chain between pass submissions.
//!
//! Every frame submits one command buffer per [`PassKind`], always in the same
//! order and always all of them, so the wait/signal topology never changes.
//! Pass `k` waits on the semaphore pass `k - 1` signalled; the first pass waits
//! on the slot's image-available semaphore and the last signals the acquired
//! image's render-finished semaphore, which present consumes.

use ash::vk;

/// The fixed passes of a frame, in submission order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PassKind {
    /// Opaque geometry into the offscreen scene target
    Geometry,
    /// Compute lighting over the scene target
    Lighting,
    /// Compute filter chain
    PostProcess,
    /// Scene blit to the swapchain image, then 2D overlay and text
    Overlay,
    /// Debug UI, drawn on top of everything
    DebugUi,
}

impl PassKind {
    pub const COUNT: usize = 5;

    /// Every pass in submission order.
    pub const ALL: [PassKind; Self::COUNT] = [
        PassKind::Geometry,
        PassKind::Lighting,
        PassKind::PostProcess,
        PassKind::Overlay,
        PassKind::DebugUi,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Name used in logs and debug labels.
    pub fn name(self) -> &'static str {
        match self {
            PassKind::Geometry => "geometry",
            PassKind::Lighting => "lighting",
            PassKind::PostProcess => "post-process",
            PassKind::Overlay => "overlay",
            PassKind::DebugUi => "debug-ui",
        }
    }

    #[inline]
    pub fn is_first(self) -> bool {
        self.index() == 0
    }

    #[inline]
    pub fn is_last(self) -> bool {
        self.index() == Self::COUNT - 1
    }
}

/// Semaphore roles in the chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainSemaphore {
    /// Owned by the frame slot, signalled by acquire
    ImageAvailable,
    /// Owned by the frame slot; index into its pass-complete semaphores
    PassComplete(usize),
    /// Owned by the acquired swapchain image, waited on by present
    RenderFinished,
}

/// Synchronization for one pass submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PassLink {
    pub pass: PassKind,
    pub wait: ChainSemaphore,
    pub wait_stage: vk::PipelineStageFlags,
    pub signal: ChainSemaphore,
    /// Only the last submission of a frame carries the slot fence.
    pub signals_fence: bool,
}

/// Plans the semaphore chain that orders the passes of a frame.
pub struct SemaphoreChain;

impl SemaphoreChain {
    /// Pass-complete semaphores a frame slot must own.
    pub const INTERMEDIATE_COUNT: usize = PassKind::COUNT - 1;

    /// Each pass waits on its predecessor's semaphore and signals the next one.
    /// The first waits on image acquisition and the last signals presentation.
    pub fn plan() -> [PassLink; PassKind::COUNT] {
        PassKind::ALL.map(|pass| {
            let k = pass.index();
            PassLink {
                pass,
                wait: if pass.is_first() {
                    ChainSemaphore::ImageAvailable
                } else {
                    ChainSemaphore::PassComplete(k - 1)
                },
                wait_stage: vk::PipelineStageFlags::ALL_COMMANDS,
                signal: if pass.is_last() {
                    ChainSemaphore::RenderFinished
                } else {
                    ChainSemaphore::PassComplete(k)
                },
                signals_fence: pass.is_last(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_order_is_fixed() {
        let names: Vec<_> = PassKind::ALL.iter().map(|p| p.name()).collect();
        assert_eq!(
            names,
            ["geometry", "lighting", "post-process", "overlay", "debug-ui"]
        );
        for (i, pass) in PassKind::ALL.iter().enumerate() {
            assert_eq!(pass.index(), i);
        }
        assert!(PassKind::Geometry < PassKind::DebugUi);
    }

    #[test]
    fn test_first_pass_waits_on_image_available() {
        let plan = SemaphoreChain::plan();
        assert_eq!(plan[0].pass, PassKind::Geometry);
        assert_eq!(plan[0].wait, ChainSemaphore::ImageAvailable);
    }

    #[test]
    fn test_each_pass_waits_on_previous_signal() {
        let plan = SemaphoreChain::plan();
        for pair in plan.windows(2) {
            assert_eq!(pair[1].wait, pair[0].signal);
        }
    }

    #[test]
    fn test_last_pass_signals_render_finished_and_fence() {
        let plan = SemaphoreChain::plan();
        let last = plan[PassKind::COUNT - 1];
        assert_eq!(last.pass, PassKind::DebugUi);
        assert_eq!(last.signal, ChainSemaphore::RenderFinished);
        assert!(last.signals_fence);
        assert_eq!(plan.iter().filter(|link| link.signals_fence).count(), 1);
    }

    #[test]
    fn test_intermediate_semaphores_are_all_used_once() {
        let plan = SemaphoreChain::plan();
        let mut signalled: Vec<usize> = plan
            .iter()
            .filter_map(|link| match link.signal {
                ChainSemaphore::PassComplete(i) => Some(i),
                _ => None,
            })
            .collect();
        signalled.sort_unstable();
        assert_eq!(
            signalled,
            (0..SemaphoreChain::INTERMEDIATE_COUNT).collect::<Vec<_>>()
        );
    }
}
