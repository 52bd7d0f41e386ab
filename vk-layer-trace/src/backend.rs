//! Process-wide trace sink. Events go out as `tracing` events on the
//! [`TARGET`] target and are tallied so the layer can report what it saw.

use std::ffi::CStr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::OnceLock;

use vk_layer_base::ash::vk::{self, Handle};

/// `tracing` target every trace event is emitted on.
pub const TARGET: &str = "gfxr";

/// Name of the capture layer's block index query, resolved through the chain.
pub const BLOCK_INDEX_FN: &CStr = c"GetBlockIndexGFXR";

#[allow(non_camel_case_types)]
pub type PFN_GetBlockIndexGFXR = unsafe extern "system" fn() -> u64;

/// Totals of the events emitted since the backend came up.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct Counters {
    pub submits: u64,
    pub empty_submits: u64,
    pub command_buffers: u64,
    pub presents: u64,
    pub frame_boundaries: u64,
}

#[derive(Default)]
pub struct Backend {
    block_index_fn: AtomicUsize,
    submits: AtomicU64,
    empty_submits: AtomicU64,
    command_buffers: AtomicU64,
    presents: AtomicU64,
    frame_boundaries: AtomicU64,
}

static BACKEND: OnceLock<Backend> = OnceLock::new();

/// Brings the backend up. Called once an instance exists.
pub fn ensure_initialized() -> &'static Backend {
    BACKEND.get_or_init(|| {
        tracing::info!(target: TARGET, "trace backend initialized");
        Backend::default()
    })
}

/// The backend, if an instance has brought it up.
pub fn get() -> Option<&'static Backend> {
    BACKEND.get()
}

impl Backend {
    /// Replaces the block index source; `None` makes every event report 0.
    pub fn set_block_index_fn(&self, block_index_fn: Option<PFN_GetBlockIndexGFXR>) {
        let raw = block_index_fn.map_or(0, |f| f as usize);
        self.block_index_fn.store(raw, Ordering::Release);
    }

    pub fn has_block_index_fn(&self) -> bool {
        self.block_index_fn.load(Ordering::Acquire) != 0
    }

    /// The capture layer's current block index, or 0 without one.
    pub fn block_index(&self) -> u64 {
        match self.block_index_fn.load(Ordering::Acquire) {
            0 => 0,
            raw => {
                // SAFETY: only ever stored from a `PFN_GetBlockIndexGFXR`.
                let block_index_fn = unsafe { std::mem::transmute::<usize, PFN_GetBlockIndexGFXR>(raw) };
                unsafe { block_index_fn() }
            }
        }
    }

    /// Emits one event per submit call, listing every command buffer in it.
    pub fn queue_submit(&self, submits: &[&[vk::CommandBuffer]]) {
        let command_buffers: Vec<u64> = submits
            .iter()
            .flat_map(|buffers| buffers.iter())
            .map(|buffer| buffer.as_raw())
            .collect();
        self.submits.fetch_add(1, Ordering::Relaxed);

        if command_buffers.is_empty() {
            self.empty_submits.fetch_add(1, Ordering::Relaxed);
            tracing::info!(target: TARGET, "vkQueueSubmit (empty)");
            return;
        }

        let block_index = self.block_index();
        self.command_buffers.fetch_add(command_buffers.len() as u64, Ordering::Relaxed);
        tracing::info!(target: TARGET, block_index, "vkQueueSubmit");
        for (index, buffer) in command_buffers.iter().enumerate() {
            tracing::info!(
                target: TARGET,
                block_index,
                index,
                command_buffer = %format_args!("{buffer:#x}"),
                "vkQueueSubmit command buffer"
            );
        }
    }

    pub fn queue_present(&self) {
        self.presents.fetch_add(1, Ordering::Relaxed);
        tracing::info!(target: TARGET, block_index = self.block_index(), "QueuePresent");
    }

    pub fn frame_boundary(&self) {
        self.frame_boundaries.fetch_add(1, Ordering::Relaxed);
        tracing::info!(target: TARGET, block_index = self.block_index(), "FrameBoundaryANDROID");
    }

    pub fn counters(&self) -> Counters {
        Counters {
            submits: self.submits.load(Ordering::Relaxed),
            empty_submits: self.empty_submits.load(Ordering::Relaxed),
            command_buffers: self.command_buffers.load(Ordering::Relaxed),
            presents: self.presents.load(Ordering::Relaxed),
            frame_boundaries: self.frame_boundaries.load(Ordering::Relaxed),
        }
    }

    /// Logs the totals seen so far and returns them.
    pub fn report(&self, instance: vk::Instance) -> Counters {
        let counters = self.counters();
        tracing::info!(
            target: TARGET,
            ?instance,
            submits = counters.submits,
            empty_submits = counters.empty_submits,
            command_buffers = counters.command_buffers,
            presents = counters.presents,
            frame_boundaries = counters.frame_boundaries,
            "trace summary"
        );
        counters
    }
}
