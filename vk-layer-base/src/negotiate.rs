//! Loader negotiation and the layer/extension enumeration entry points.

use std::ffi::{c_char, CStr};

use ash::vk;

use crate::layer::Layer;
use crate::sys::{VkLayerNegotiateStructType, VkNegotiateLayerInterface};
use crate::{logging, resolve};

/// The loader/layer interface version this layer speaks.
pub const LAYER_INTERFACE_VERSION: u32 = 2;

/// `vkNegotiateLoaderLayerInterfaceVersion` for a layer.
///
/// # Safety
/// `interface` must be null or point to a loader-owned negotiation struct.
pub unsafe extern "system" fn negotiate_loader_layer_interface_version<L: Layer>(
    interface: *mut VkNegotiateLayerInterface,
) -> vk::Result {
    logging::ensure_initialized::<L>();

    let Some(interface) = interface.as_mut() else {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    };
    if interface.s_type != VkLayerNegotiateStructType::LAYER_NEGOTIATE_INTERFACE_STRUCT {
        tracing::error!(s_type = ?interface.s_type, "unexpected negotiation struct");
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    }

    let requested = interface.loader_layer_interface_version;
    if requested < LAYER_INTERFACE_VERSION {
        tracing::error!(requested, "loader interface version too old");
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    }

    interface.loader_layer_interface_version = LAYER_INTERFACE_VERSION;
    interface.pfn_get_instance_proc_addr = Some(resolve::get_instance_proc_addr::<L>);
    interface.pfn_get_device_proc_addr = Some(resolve::get_device_proc_addr::<L>);
    interface.pfn_get_physical_device_proc_addr = Some(resolve::get_physical_device_proc_addr::<L>);

    tracing::info!(requested, agreed = LAYER_INTERFACE_VERSION, layer = L::INFO.name, "negotiated loader interface");
    vk::Result::SUCCESS
}

/// Standard two-call enumeration: report the count when `p_properties` is
/// null, otherwise copy as many as fit.
unsafe fn enumerate<T: Copy>(items: &[T], p_count: *mut u32, p_properties: *mut T) -> vk::Result {
    let Some(count) = p_count.as_mut() else {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    };
    if p_properties.is_null() {
        *count = items.len() as u32;
        return vk::Result::SUCCESS;
    }

    let written = items.len().min(*count as usize);
    std::ptr::copy_nonoverlapping(items.as_ptr(), p_properties, written);
    *count = written as u32;
    if written < items.len() {
        vk::Result::INCOMPLETE
    } else {
        vk::Result::SUCCESS
    }
}

unsafe fn names_this_layer<L: Layer>(p_layer_name: *const c_char) -> bool {
    !p_layer_name.is_null() && L::INFO.is_named(CStr::from_ptr(p_layer_name).to_bytes())
}

/// # Safety
/// Called by the loader with the arguments of `vkEnumerateInstanceLayerProperties`.
pub unsafe extern "system" fn enumerate_instance_layer_properties<L: Layer>(
    p_property_count: *mut u32,
    p_properties: *mut vk::LayerProperties,
) -> vk::Result {
    enumerate(&[L::INFO.layer_properties()], p_property_count, p_properties)
}

/// # Safety
/// Called by the loader with the arguments of `vkEnumerateDeviceLayerProperties`.
pub unsafe extern "system" fn enumerate_device_layer_properties<L: Layer>(
    _physical_device: vk::PhysicalDevice,
    p_property_count: *mut u32,
    p_properties: *mut vk::LayerProperties,
) -> vk::Result {
    enumerate(&[L::INFO.layer_properties()], p_property_count, p_properties)
}

/// This layer exposes no instance extensions of its own.
///
/// # Safety
/// Called by the loader with the arguments of `vkEnumerateInstanceExtensionProperties`.
pub unsafe extern "system" fn enumerate_instance_extension_properties<L: Layer>(
    p_layer_name: *const c_char,
    p_property_count: *mut u32,
    p_properties: *mut vk::ExtensionProperties,
) -> vk::Result {
    if !names_this_layer::<L>(p_layer_name) {
        return vk::Result::ERROR_LAYER_NOT_PRESENT;
    }
    enumerate(&[], p_property_count, p_properties)
}

/// Answers for this layer and forwards every other query down the chain.
///
/// # Safety
/// Called by the loader with the arguments of `vkEnumerateDeviceExtensionProperties`.
pub unsafe extern "system" fn enumerate_device_extension_properties<L: Layer>(
    physical_device: vk::PhysicalDevice,
    p_layer_name: *const c_char,
    p_property_count: *mut u32,
    p_properties: *mut vk::ExtensionProperties,
) -> vk::Result {
    if names_this_layer::<L>(p_layer_name) {
        return enumerate(&[], p_property_count, p_properties);
    }

    let next = L::registry()
        .lookup_instance(physical_device)
        .and_then(|entry| entry.table().enumerate_device_extension_properties());
    match next {
        Some(next) => next(physical_device, p_layer_name, p_property_count, p_properties),
        None => vk::Result::ERROR_LAYER_NOT_PRESENT,
    }
}
