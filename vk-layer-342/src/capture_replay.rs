//! Rewrites create/allocate infos so every address the application can
//! observe is replayable.

use std::ffi::c_void;

use vk_layer_base::ash::vk;
use vk_layer_base::sys::p_next_chain;

/// Turns on the capture/replay bit of every feature struct in a device
/// create info's `pNext` chain that has one. Returns how many were changed.
///
/// # Safety
/// `p_next` must be null or a well-formed, writable `pNext` chain.
pub unsafe fn enable_features(p_next: *const c_void) -> usize {
    let mut enabled = 0;
    for current in p_next_chain(p_next) {
        let s_type = (*current).s_type;
        tracing::debug!(?s_type, "device create info pNext");

        match s_type {
            vk::StructureType::PHYSICAL_DEVICE_BUFFER_DEVICE_ADDRESS_FEATURES => {
                let features = &mut *current.cast::<vk::PhysicalDeviceBufferDeviceAddressFeatures>();
                tracing::info!(
                    buffer_device_address = features.buffer_device_address,
                    capture_replay = features.buffer_device_address_capture_replay,
                    multi_device = features.buffer_device_address_multi_device,
                    "enabling bufferDeviceAddressCaptureReplay"
                );
                features.buffer_device_address_capture_replay = vk::TRUE;
            }
            vk::StructureType::PHYSICAL_DEVICE_ACCELERATION_STRUCTURE_FEATURES_KHR => {
                let features = &mut *current.cast::<vk::PhysicalDeviceAccelerationStructureFeaturesKHR>();
                tracing::info!(
                    acceleration_structure = features.acceleration_structure,
                    capture_replay = features.acceleration_structure_capture_replay,
                    indirect_build = features.acceleration_structure_indirect_build,
                    host_commands = features.acceleration_structure_host_commands,
                    update_after_bind = features.descriptor_binding_acceleration_structure_update_after_bind,
                    "enabling accelerationStructureCaptureReplay"
                );
                features.acceleration_structure_capture_replay = vk::TRUE;
            }
            vk::StructureType::PHYSICAL_DEVICE_RAY_TRACING_PIPELINE_FEATURES_KHR => {
                let features = &mut *current.cast::<vk::PhysicalDeviceRayTracingPipelineFeaturesKHR>();
                tracing::info!(
                    ray_tracing_pipeline = features.ray_tracing_pipeline,
                    capture_replay = features.ray_tracing_pipeline_shader_group_handle_capture_replay,
                    capture_replay_mixed = features.ray_tracing_pipeline_shader_group_handle_capture_replay_mixed,
                    trace_rays_indirect = features.ray_tracing_pipeline_trace_rays_indirect,
                    primitive_culling = features.ray_traversal_primitive_culling,
                    "enabling rayTracingPipelineShaderGroupHandleCaptureReplay"
                );
                features.ray_tracing_pipeline_shader_group_handle_capture_replay = vk::TRUE;
            }
            _ => continue,
        }
        enabled += 1;
    }
    enabled
}

/// Adds `DEVICE_ADDRESS_CAPTURE_REPLAY` to the first
/// `VkMemoryAllocateFlagsInfo` in the chain when it asks for
/// `DEVICE_ADDRESS`. Returns whether the flags were changed.
///
/// # Safety
/// `p_next` must be null or a well-formed, writable `pNext` chain.
pub unsafe fn request_replayable_address(p_next: *const c_void) -> bool {
    let Some(flags_info) = p_next_chain(p_next)
        .find(|&current| (*current).s_type == vk::StructureType::MEMORY_ALLOCATE_FLAGS_INFO)
    else {
        return false;
    };
    let flags_info = &mut *flags_info.cast::<vk::MemoryAllocateFlagsInfo>();
    tracing::debug!(flags = ?flags_info.flags, "VkMemoryAllocateFlagsInfo");

    if !flags_info.flags.contains(vk::MemoryAllocateFlags::DEVICE_ADDRESS) {
        return false;
    }
    flags_info.flags |= vk::MemoryAllocateFlags::DEVICE_ADDRESS_CAPTURE_REPLAY;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;

    #[test]
    fn every_known_feature_struct_is_enabled() {
        let mut ray_tracing = vk::PhysicalDeviceRayTracingPipelineFeaturesKHR {
            ray_tracing_pipeline: vk::TRUE,
            ..Default::default()
        };
        let mut acceleration = vk::PhysicalDeviceAccelerationStructureFeaturesKHR {
            p_next: ptr::addr_of_mut!(ray_tracing).cast(),
            ..Default::default()
        };
        let mut vulkan_11 = vk::PhysicalDeviceVulkan11Features {
            p_next: ptr::addr_of_mut!(acceleration).cast(),
            ..Default::default()
        };
        let mut buffer_address = vk::PhysicalDeviceBufferDeviceAddressFeatures {
            p_next: ptr::addr_of_mut!(vulkan_11).cast(),
            buffer_device_address: vk::TRUE,
            ..Default::default()
        };

        let enabled = unsafe { enable_features(ptr::addr_of_mut!(buffer_address).cast_const().cast()) };

        assert_eq!(enabled, 3);
        assert_eq!(buffer_address.buffer_device_address_capture_replay, vk::TRUE);
        assert_eq!(acceleration.acceleration_structure_capture_replay, vk::TRUE);
        assert_eq!(ray_tracing.ray_tracing_pipeline_shader_group_handle_capture_replay, vk::TRUE);
        // Unrelated bits are left alone.
        assert_eq!(buffer_address.buffer_device_address_multi_device, vk::FALSE);
        assert_eq!(ray_tracing.ray_tracing_pipeline_trace_rays_indirect, vk::FALSE);
    }

    #[test]
    fn empty_chain_changes_nothing() {
        assert_eq!(unsafe { enable_features(ptr::null()) }, 0);
        assert!(!unsafe { request_replayable_address(ptr::null()) });
    }

    #[test]
    fn device_address_allocations_become_replayable() {
        let mut flags_info = vk::MemoryAllocateFlagsInfo {
            flags: vk::MemoryAllocateFlags::DEVICE_ADDRESS,
            ..Default::default()
        };
        assert!(unsafe { request_replayable_address(ptr::addr_of_mut!(flags_info).cast_const().cast()) });
        assert_eq!(
            flags_info.flags,
            vk::MemoryAllocateFlags::DEVICE_ADDRESS | vk::MemoryAllocateFlags::DEVICE_ADDRESS_CAPTURE_REPLAY
        );
    }

    #[test]
    fn other_allocations_are_untouched() {
        let mut flags_info = vk::MemoryAllocateFlagsInfo {
            flags: vk::MemoryAllocateFlags::DEVICE_MASK,
            device_mask: 1,
            ..Default::default()
        };
        assert!(!unsafe { request_replayable_address(ptr::addr_of_mut!(flags_info).cast_const().cast()) });
        assert_eq!(flags_info.flags, vk::MemoryAllocateFlags::DEVICE_MASK);
    }
}
