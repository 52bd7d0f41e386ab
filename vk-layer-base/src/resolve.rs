//! `vkGet*ProcAddr` for a layer.
//!
//! Resolution order: the layer's intercepts, then the entry points the base
//! implements itself (answered without touching the registry so they work
//! before any table exists), then the object's dispatch table.

use std::ffi::{c_char, CStr};

use ash::vk;

use crate::dispatch::Command;
use crate::layer::Layer;
use crate::{lifecycle, negotiate, void_fn};

/// Entry points the base answers for `vkGetInstanceProcAddr`.
fn base_instance_entry_point<L: Layer>(name: &[u8]) -> vk::PFN_vkVoidFunction {
    match name {
        b"vkGetInstanceProcAddr" => void_fn!(get_instance_proc_addr::<L> => vk::PFN_vkGetInstanceProcAddr),
        b"vk_layerGetPhysicalDeviceProcAddr" => {
            void_fn!(get_physical_device_proc_addr::<L> => crate::sys::PFN_GetPhysicalDeviceProcAddr)
        }
        b"vkCreateInstance" => void_fn!(lifecycle::create_instance::<L> => vk::PFN_vkCreateInstance),
        b"vkDestroyInstance" => void_fn!(lifecycle::destroy_instance::<L> => vk::PFN_vkDestroyInstance),
        b"vkEnumerateInstanceLayerProperties" => void_fn!(
            negotiate::enumerate_instance_layer_properties::<L> => vk::PFN_vkEnumerateInstanceLayerProperties
        ),
        b"vkEnumerateInstanceExtensionProperties" => void_fn!(
            negotiate::enumerate_instance_extension_properties::<L> => vk::PFN_vkEnumerateInstanceExtensionProperties
        ),
        b"vkEnumerateDeviceLayerProperties" => void_fn!(
            negotiate::enumerate_device_layer_properties::<L> => vk::PFN_vkEnumerateDeviceLayerProperties
        ),
        b"vkEnumerateDeviceExtensionProperties" => void_fn!(
            negotiate::enumerate_device_extension_properties::<L> => vk::PFN_vkEnumerateDeviceExtensionProperties
        ),
        _ => base_device_entry_point::<L>(name),
    }
}

/// Entry points the base answers for `vkGetDeviceProcAddr`.
fn base_device_entry_point<L: Layer>(name: &[u8]) -> vk::PFN_vkVoidFunction {
    match name {
        b"vkGetDeviceProcAddr" => void_fn!(get_device_proc_addr::<L> => vk::PFN_vkGetDeviceProcAddr),
        b"vkCreateDevice" => void_fn!(lifecycle::create_device::<L> => vk::PFN_vkCreateDevice),
        b"vkDestroyDevice" => void_fn!(lifecycle::destroy_device::<L> => vk::PFN_vkDestroyDevice),
        _ => None,
    }
}

/// Resolves `name` for an instance through this layer.
///
/// # Safety
/// `p_name` must be null or a nul-terminated string; `instance` must be null
/// or a live instance (or physical device) handle.
pub unsafe extern "system" fn get_instance_proc_addr<L: Layer>(
    instance: vk::Instance,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    if p_name.is_null() {
        return None;
    }
    let name = CStr::from_ptr(p_name);
    let command = Command::parse(name);

    if let Some(local) = command.and_then(L::intercept) {
        return Some(local);
    }
    if let Some(own) = base_instance_entry_point::<L>(name.to_bytes()) {
        return Some(own);
    }

    let Some(entry) = L::registry().lookup_instance(instance) else {
        tracing::debug!(?instance, ?name, "no dispatch entry for instance");
        return None;
    };
    match command {
        Some(Command::Instance(command)) => entry.table().get(command),
        _ => entry
            .table()
            .get_instance_proc_addr()
            .and_then(|next| next(instance, p_name)),
    }
}

/// Resolves `name` for a device through this layer.
///
/// # Safety
/// `p_name` must be null or a nul-terminated string; `device` must be null
/// or a live device handle.
pub unsafe extern "system" fn get_device_proc_addr<L: Layer>(
    device: vk::Device,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    if p_name.is_null() {
        return None;
    }
    let name = CStr::from_ptr(p_name);
    let command = Command::parse(name);

    if let Some(local) = command.and_then(L::intercept) {
        return Some(local);
    }
    if let Some(own) = base_device_entry_point::<L>(name.to_bytes()) {
        return Some(own);
    }

    let Some(entry) = L::registry().lookup_device(device) else {
        tracing::debug!(?device, ?name, "no dispatch entry for device");
        return None;
    };
    match command {
        Some(Command::Device(command)) => entry.table().get(command),
        _ => entry
            .table()
            .get_device_proc_addr()
            .and_then(|next| next(device, p_name)),
    }
}

/// Physical-device command lookups: the layer's intercepts, else the next link.
///
/// # Safety
/// Same as [`get_instance_proc_addr`].
pub unsafe extern "system" fn get_physical_device_proc_addr<L: Layer>(
    instance: vk::Instance,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    if p_name.is_null() {
        return None;
    }
    if let Some(local) = Command::parse(CStr::from_ptr(p_name)).and_then(L::intercept) {
        return Some(local);
    }
    L::registry()
        .lookup_instance(instance)?
        .table()
        .get_physical_device_proc_addr()
        .and_then(|next| next(instance, p_name))
}
