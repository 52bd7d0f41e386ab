//! `VK_LAYER_LUNARG_342`: makes buffer and memory device addresses
//! replayable by enabling the capture/replay features at device creation
//! and flagging device-address allocations.

use vk_layer_base::ash::vk;
use vk_layer_base::{export_layer, void_fn, Command, DeviceCommand, Layer, LayerInfo, LayerRegistry, LayerVersion};

pub mod capture_replay;

static REGISTRY: LayerRegistry = unsafe { LayerRegistry::new() };

pub struct Layer342;

impl Layer for Layer342 {
    const INFO: LayerInfo = LayerInfo {
        name: "VK_LAYER_LUNARG_342",
        description: "342 layer",
        version: LayerVersion { major: 0, minor: 1, patch: 0 },
        designation: "-dev",
    };

    fn registry() -> &'static LayerRegistry {
        &REGISTRY
    }

    fn intercept(command: Command) -> vk::PFN_vkVoidFunction {
        match command {
            Command::Device(DeviceCommand::AllocateMemory) => void_fn!(allocate_memory => vk::PFN_vkAllocateMemory),
            _ => None,
        }
    }

    unsafe fn before_create_device(physical_device: vk::PhysicalDevice, create_info: *const vk::DeviceCreateInfo) {
        let Some(create_info) = create_info.as_ref() else {
            return;
        };
        let enabled = capture_replay::enable_features(create_info.p_next);
        tracing::info!(?physical_device, enabled, "capture/replay features enabled");
    }
}

/// `vkAllocateMemory`: requests a replayable address for device-address
/// allocations, then forwards.
///
/// # Safety
/// Called through the dispatch chain with the arguments of `vkAllocateMemory`.
pub unsafe extern "system" fn allocate_memory(
    device: vk::Device,
    p_allocate_info: *const vk::MemoryAllocateInfo,
    p_allocator: *const vk::AllocationCallbacks,
    p_memory: *mut vk::DeviceMemory,
) -> vk::Result {
    let next = Layer342::registry()
        .lookup_device(device)
        .and_then(|entry| entry.table().allocate_memory());
    let Some(next) = next else {
        tracing::error!(?device, "vkAllocateMemory is not in the dispatch table");
        return vk::Result::ERROR_OUT_OF_DEVICE_MEMORY;
    };

    if let Some(allocate_info) = p_allocate_info.as_ref() {
        tracing::info!(size = allocate_info.allocation_size, "vkAllocateMemory");
        if capture_replay::request_replayable_address(allocate_info.p_next) {
            tracing::debug!("added DEVICE_ADDRESS_CAPTURE_REPLAY");
        }
    }

    next(device, p_allocate_info, p_allocator, p_memory)
}

export_layer!(Layer342);
