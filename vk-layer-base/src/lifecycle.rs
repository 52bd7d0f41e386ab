//! Instance and device creation/destruction.
//!
//! Creation calls down the chain first and only publishes a table once the
//! chain has produced a handle. Destruction unpublishes the table first and
//! then calls down, so no lookup can hand out a table for a handle that is
//! being torn down.

use std::sync::Arc;

use ash::vk;

use crate::dispatch::{DeviceCommand, DeviceTable, InstanceCommand, InstanceTable};
use crate::error::LayerError;
use crate::layer::Layer;
use crate::registry::{DeviceEntry, DeviceParent, InstanceEntry};
use crate::{logging, sys};

unsafe fn try_create_instance<L: Layer>(
    p_create_info: *const vk::InstanceCreateInfo,
    p_allocator: *const vk::AllocationCallbacks,
    p_instance: *mut vk::Instance,
) -> Result<Arc<InstanceEntry>, LayerError> {
    let link = sys::take_instance_link(p_create_info).ok_or(LayerError::MissingLinkInfo("instance"))?;
    let gipa = link.get_instance_proc_addr;

    let fp_create_instance: Option<vk::PFN_vkCreateInstance> =
        std::mem::transmute(gipa(vk::Instance::null(), c"vkCreateInstance".as_ptr()));
    let fp_create_instance = fp_create_instance.ok_or(LayerError::UnresolvedEntryPoint("vkCreateInstance"))?;

    L::before_create_instance(p_create_info);

    let result = fp_create_instance(p_create_info, p_allocator, p_instance);
    if result != vk::Result::SUCCESS {
        return Err(LayerError::ChainCreate { object: "instance", result });
    }
    let instance = *p_instance;

    let table = InstanceTable::load(|command| match command {
        InstanceCommand::GetInstanceProcAddr => crate::void_fn!(gipa => vk::PFN_vkGetInstanceProcAddr),
        InstanceCommand::GetPhysicalDeviceProcAddr if link.get_physical_device_proc_addr.is_some() => {
            std::mem::transmute::<Option<sys::PFN_GetPhysicalDeviceProcAddr>, vk::PFN_vkVoidFunction>(
                link.get_physical_device_proc_addr,
            )
        }
        _ => gipa(instance, command.c_name().as_ptr()),
    });

    Ok(L::registry().register_instance(instance, table)?)
}

/// `vkCreateInstance` for a layer.
///
/// # Safety
/// Called by the loader with the arguments of `vkCreateInstance`.
pub unsafe extern "system" fn create_instance<L: Layer>(
    p_create_info: *const vk::InstanceCreateInfo,
    p_allocator: *const vk::AllocationCallbacks,
    p_instance: *mut vk::Instance,
) -> vk::Result {
    logging::ensure_initialized::<L>();

    match try_create_instance::<L>(p_create_info, p_allocator, p_instance) {
        Ok(entry) => {
            tracing::info!(instance = ?entry.handle(), table = ?entry.table(), "instance created");
            L::after_create_instance(&entry);
            vk::Result::SUCCESS
        }
        Err(err) => {
            tracing::error!("vkCreateInstance: {}", err);
            err.into()
        }
    }
}

/// `vkDestroyInstance` for a layer.
///
/// # Safety
/// Called by the loader with the arguments of `vkDestroyInstance`.
pub unsafe extern "system" fn destroy_instance<L: Layer>(
    instance: vk::Instance,
    p_allocator: *const vk::AllocationCallbacks,
) {
    if instance == vk::Instance::null() {
        return;
    }
    L::before_destroy_instance(instance);

    let Some(entry) = L::registry().unregister_instance(instance) else {
        tracing::warn!(?instance, "vkDestroyInstance for an instance with no dispatch entry");
        return;
    };
    match entry.table().destroy_instance() {
        Some(destroy) => destroy(instance, p_allocator),
        None => tracing::error!(?instance, "next link does not expose vkDestroyInstance"),
    }
    tracing::info!(?instance, "instance destroyed");
}

unsafe fn try_create_device<L: Layer>(
    physical_device: vk::PhysicalDevice,
    p_create_info: *const vk::DeviceCreateInfo,
    p_allocator: *const vk::AllocationCallbacks,
    p_device: *mut vk::Device,
) -> Result<Arc<DeviceEntry>, LayerError> {
    let link = sys::take_device_link(p_create_info).ok_or(LayerError::MissingLinkInfo("device"))?;
    let gipa = link.get_instance_proc_addr;
    let gdpa = link.get_device_proc_addr;

    // Physical devices carry their instance's dispatch key.
    let instance = L::registry().lookup_instance(physical_device).map(|owner| owner.handle());
    if instance.is_none() {
        tracing::warn!(?physical_device, "creating a device whose instance has no dispatch entry");
    }

    let fp_create_device: Option<vk::PFN_vkCreateDevice> = std::mem::transmute(gipa(
        instance.unwrap_or_default(),
        InstanceCommand::CreateDevice.c_name().as_ptr(),
    ));
    let fp_create_device = fp_create_device.ok_or(LayerError::UnresolvedEntryPoint("vkCreateDevice"))?;

    L::before_create_device(physical_device, p_create_info);

    let result = fp_create_device(physical_device, p_create_info, p_allocator, p_device);
    if result != vk::Result::SUCCESS {
        return Err(LayerError::ChainCreate { object: "device", result });
    }
    let device = *p_device;

    let table = DeviceTable::load(|command| match command {
        DeviceCommand::GetDeviceProcAddr => crate::void_fn!(gdpa => vk::PFN_vkGetDeviceProcAddr),
        _ => gdpa(device, command.c_name().as_ptr()),
    });
    let parent = DeviceParent { physical_device, instance };

    Ok(L::registry().register_device(device, table, parent)?)
}

/// `vkCreateDevice` for a layer.
///
/// # Safety
/// Called by the loader with the arguments of `vkCreateDevice`.
pub unsafe extern "system" fn create_device<L: Layer>(
    physical_device: vk::PhysicalDevice,
    p_create_info: *const vk::DeviceCreateInfo,
    p_allocator: *const vk::AllocationCallbacks,
    p_device: *mut vk::Device,
) -> vk::Result {
    match try_create_device::<L>(physical_device, p_create_info, p_allocator, p_device) {
        Ok(entry) => {
            tracing::info!(device = ?entry.handle(), parent = ?entry.parent(), table = ?entry.table(), "device created");
            L::after_create_device(&entry);
            vk::Result::SUCCESS
        }
        Err(err) => {
            tracing::error!("vkCreateDevice: {}", err);
            err.into()
        }
    }
}

/// `vkDestroyDevice` for a layer.
///
/// # Safety
/// Called by the loader with the arguments of `vkDestroyDevice`.
pub unsafe extern "system" fn destroy_device<L: Layer>(
    device: vk::Device,
    p_allocator: *const vk::AllocationCallbacks,
) {
    if device == vk::Device::null() {
        return;
    }
    L::before_destroy_device(device);

    let Some(entry) = L::registry().unregister_device(device) else {
        tracing::warn!(?device, "vkDestroyDevice for a device with no dispatch entry");
        return;
    };
    match entry.table().destroy_device() {
        Some(destroy) => destroy(device, p_allocator),
        None => tracing::error!(?device, "next link does not expose vkDestroyDevice"),
    }
    tracing::info!(?device, "device destroyed");
}
