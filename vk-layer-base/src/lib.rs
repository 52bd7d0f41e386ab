//! Shared machinery for Vulkan interception layers.
//!
//! A layer crate implements [`Layer`], keeps a `static` [`LayerRegistry`],
//! and calls [`export_layer!`] to emit the loader-facing entry points. The
//! base takes care of negotiation, creating and destroying instances and
//! devices, the per-object dispatch tables, and proc-address resolution.

pub mod dispatch;
pub mod error;
pub mod layer;
pub mod lifecycle;
pub mod logging;
pub mod negotiate;
pub mod registry;
pub mod resolve;
pub mod sys;

#[cfg(any(test, feature = "mock"))]
pub mod mock;


pub use ash;

pub use dispatch::{Command, DeviceCommand, DeviceTable, InstanceCommand, InstanceTable};
pub use error::{LayerError, RegistryError};
pub use layer::{Layer, LayerInfo, LayerVersion};
pub use registry::{DeviceEntry, DeviceParent, DispatchKey, InstanceEntry, LayerRegistry};

/// Emits the exported symbols the loader looks up in a layer library.
///
/// ```ignore
/// static REGISTRY: LayerRegistry = unsafe { LayerRegistry::new() };
///
/// impl Layer for MyLayer { /* ... */ }
///
/// vk_layer_base::export_layer!(MyLayer);
/// ```
#[macro_export]
macro_rules! export_layer {
    ($layer:ty) => {
        #[no_mangle]
        #[allow(non_snake_case)]
        pub unsafe extern "system" fn vkNegotiateLoaderLayerInterfaceVersion(
            interface: *mut $crate::sys::VkNegotiateLayerInterface,
        ) -> $crate::ash::vk::Result {
            $crate::negotiate::negotiate_loader_layer_interface_version::<$layer>(interface)
        }

        #[no_mangle]
        #[allow(non_snake_case)]
        pub unsafe extern "system" fn vkGetInstanceProcAddr(
            instance: $crate::ash::vk::Instance,
            p_name: *const ::std::ffi::c_char,
        ) -> $crate::ash::vk::PFN_vkVoidFunction {
            $crate::resolve::get_instance_proc_addr::<$layer>(instance, p_name)
        }

        #[no_mangle]
        #[allow(non_snake_case)]
        pub unsafe extern "system" fn vkGetDeviceProcAddr(
            device: $crate::ash::vk::Device,
            p_name: *const ::std::ffi::c_char,
        ) -> $crate::ash::vk::PFN_vkVoidFunction {
            $crate::resolve::get_device_proc_addr::<$layer>(device, p_name)
        }

        #[no_mangle]
        #[allow(non_snake_case)]
        pub unsafe extern "system" fn vkEnumerateInstanceLayerProperties(
            p_property_count: *mut u32,
            p_properties: *mut $crate::ash::vk::LayerProperties,
        ) -> $crate::ash::vk::Result {
            $crate::negotiate::enumerate_instance_layer_properties::<$layer>(p_property_count, p_properties)
        }

        #[no_mangle]
        #[allow(non_snake_case)]
        pub unsafe extern "system" fn vkEnumerateInstanceExtensionProperties(
            p_layer_name: *const ::std::ffi::c_char,
            p_property_count: *mut u32,
            p_properties: *mut $crate::ash::vk::ExtensionProperties,
        ) -> $crate::ash::vk::Result {
            $crate::negotiate::enumerate_instance_extension_properties::<$layer>(
                p_layer_name,
                p_property_count,
                p_properties,
            )
        }

        #[no_mangle]
        #[allow(non_snake_case)]
        pub unsafe extern "system" fn vkEnumerateDeviceLayerProperties(
            physical_device: $crate::ash::vk::PhysicalDevice,
            p_property_count: *mut u32,
            p_properties: *mut $crate::ash::vk::LayerProperties,
        ) -> $crate::ash::vk::Result {
            $crate::negotiate::enumerate_device_layer_properties::<$layer>(
                physical_device,
                p_property_count,
                p_properties,
            )
        }

        #[no_mangle]
        #[allow(non_snake_case)]
        pub unsafe extern "system" fn vkEnumerateDeviceExtensionProperties(
            physical_device: $crate::ash::vk::PhysicalDevice,
            p_layer_name: *const ::std::ffi::c_char,
            p_property_count: *mut u32,
            p_properties: *mut $crate::ash::vk::ExtensionProperties,
        ) -> $crate::ash::vk::Result {
            $crate::negotiate::enumerate_device_extension_properties::<$layer>(
                physical_device,
                p_layer_name,
                p_property_count,
                p_properties,
            )
        }
    };
}
