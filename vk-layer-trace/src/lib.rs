//! `VK_LAYER_LUNARG_gfxreconstruct_trace`: marks queue submits, presents and
//! frame boundaries on a trace, tagged with the capture layer's block index.

use std::slice;

use vk_layer_base::ash::vk;
use vk_layer_base::{
    export_layer, void_fn, Command, DeviceCommand, DeviceEntry, InstanceEntry, Layer, LayerInfo, LayerRegistry,
    LayerVersion,
};

pub mod backend;

use backend::PFN_GetBlockIndexGFXR;

static REGISTRY: LayerRegistry = unsafe { LayerRegistry::new() };

pub struct TraceLayer;

impl Layer for TraceLayer {
    const INFO: LayerInfo = LayerInfo {
        name: "VK_LAYER_LUNARG_gfxreconstruct_trace",
        description: "GFXReconstruct trace layer",
        version: LayerVersion { major: 0, minor: 1, patch: 0 },
        designation: "-dev",
    };

    fn registry() -> &'static LayerRegistry {
        &REGISTRY
    }

    fn intercept(command: Command) -> vk::PFN_vkVoidFunction {
        match command {
            Command::Device(DeviceCommand::QueueSubmit) => void_fn!(queue_submit => vk::PFN_vkQueueSubmit),
            Command::Device(DeviceCommand::QueuePresentKHR) => {
                void_fn!(queue_present_khr => vk::PFN_vkQueuePresentKHR)
            }
            Command::Device(DeviceCommand::FrameBoundaryANDROID) => {
                void_fn!(frame_boundary_android => vk_layer_base::sys::PFN_vkFrameBoundaryANDROID)
            }
            _ => None,
        }
    }

    fn after_create_instance(entry: &InstanceEntry) {
        let backend = backend::ensure_initialized();
        let instance = entry.handle();

        let Some(gipa) = entry.table().get_instance_proc_addr() else {
            tracing::error!(?instance, "instance table has no vkGetInstanceProcAddr");
            return;
        };
        // SAFETY: the chain hands this name out with the block index signature.
        let block_index_fn = unsafe {
            std::mem::transmute::<vk::PFN_vkVoidFunction, Option<PFN_GetBlockIndexGFXR>>(gipa(
                instance,
                backend::BLOCK_INDEX_FN.as_ptr(),
            ))
        };
        match block_index_fn {
            Some(_) => tracing::info!(?instance, "acquired GetBlockIndexGFXR"),
            None => tracing::error!(?instance, "GetBlockIndexGFXR was not acquired"),
        }
        backend.set_block_index_fn(block_index_fn);
    }

    fn before_destroy_instance(instance: vk::Instance) {
        if let Some(backend) = backend::get() {
            backend.report(instance);
        }
    }

    fn after_create_device(entry: &DeviceEntry) {
        let device = entry.handle();
        for command in [DeviceCommand::QueueSubmit, DeviceCommand::QueuePresentKHR] {
            if !entry.table().supports(command) {
                tracing::error!(?device, command = command.name(), "missing from the dispatch table");
            }
        }
    }
}

/// Borrows a Vulkan `(count, pointer)` pair as a slice.
unsafe fn array<'a, T>(count: u32, items: *const T) -> &'a [T] {
    if count == 0 || items.is_null() {
        return &[];
    }
    slice::from_raw_parts(items, count as usize)
}

/// # Safety
/// Called through the dispatch chain with the arguments of `vkQueueSubmit`.
pub unsafe extern "system" fn queue_submit(
    queue: vk::Queue,
    submit_count: u32,
    p_submits: *const vk::SubmitInfo,
    fence: vk::Fence,
) -> vk::Result {
    let next = TraceLayer::registry()
        .lookup_device(queue)
        .and_then(|entry| entry.table().queue_submit());
    let result = match next {
        Some(next) => next(queue, submit_count, p_submits, fence),
        None => vk::Result::SUCCESS,
    };

    let batches: Vec<&[vk::CommandBuffer]> = array(submit_count, p_submits)
        .iter()
        .map(|submit| array(submit.command_buffer_count, submit.p_command_buffers))
        .collect();
    if let Some(backend) = backend::get() {
        backend.queue_submit(&batches);
    }

    result
}

/// # Safety
/// Called through the dispatch chain with the arguments of `vkQueuePresentKHR`.
pub unsafe extern "system" fn queue_present_khr(queue: vk::Queue, p_present_info: *const vk::PresentInfoKHR) -> vk::Result {
    let next = TraceLayer::registry()
        .lookup_device(queue)
        .and_then(|entry| entry.table().queue_present_khr());
    let result = match next {
        Some(next) => next(queue, p_present_info),
        None => vk::Result::SUCCESS,
    };

    if let Some(backend) = backend::get() {
        backend.queue_present();
    }
    result
}

/// # Safety
/// Called through the dispatch chain with the arguments of `vkFrameBoundaryANDROID`.
pub unsafe extern "system" fn frame_boundary_android(device: vk::Device, semaphore: vk::Semaphore, image: vk::Image) {
    let next = TraceLayer::registry()
        .lookup_device(device)
        .and_then(|entry| entry.table().frame_boundary_android());
    if let Some(next) = next {
        next(device, semaphore, image);
    }

    if let Some(backend) = backend::get() {
        backend.frame_boundary();
    }
}

export_layer!(TraceLayer);
