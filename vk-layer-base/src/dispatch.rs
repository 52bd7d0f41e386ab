//! Per-object dispatch tables.
//!
//! Each table is a fixed array of chain-forwarded entry points indexed by a
//! closed command enum. Tables are filled once by [`InstanceTable::load`] /
//! [`DeviceTable::load`] and are never written again after being published
//! to the registry.

use std::ffi::{c_char, CStr};
use std::fmt;

use ash::vk;

use crate::sys;

macro_rules! dispatch_table {
    (
        $(#[$command_meta:meta])*
        pub enum $command:ident;
        $(#[$table_meta:meta])*
        pub struct $table:ident {
            $($variant:ident => $name:literal as $accessor:ident: $pfn:ty,)+
        }
    ) => {
        $(#[$command_meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
        pub enum $command {
            $($variant,)+
        }

        impl $command {
            pub const ALL: &'static [Self] = &[$(Self::$variant,)+];
            pub const COUNT: usize = Self::ALL.len();

            /// The Vulkan name of the command, e.g. `vkQueueSubmit`.
            pub const fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }

            /// Nul-terminated name for handing to a `vkGet*ProcAddr`.
            pub fn c_name(self) -> &'static CStr {
                let bytes: &'static [u8] = match self {
                    $(Self::$variant => concat!($name, "\0").as_bytes(),)+
                };
                // SAFETY: every name is a literal with a single trailing nul.
                unsafe { CStr::from_bytes_with_nul_unchecked(bytes) }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($name => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        $(#[$table_meta])*
        #[derive(Clone, Copy)]
        pub struct $table {
            entries: [vk::PFN_vkVoidFunction; $command::COUNT],
        }

        impl $table {
            /// A table where every command is unsupported.
            pub const fn empty() -> Self {
                Self { entries: [None; $command::COUNT] }
            }

            /// Fills every slot by asking `resolve` once per command.
            /// Null results are kept as-is and mean "unsupported by the chain".
            pub fn load(mut resolve: impl FnMut($command) -> vk::PFN_vkVoidFunction) -> Self {
                let mut table = Self::empty();
                for &command in $command::ALL {
                    table.entries[command as usize] = resolve(command);
                }
                table
            }

            pub fn get(&self, command: $command) -> vk::PFN_vkVoidFunction {
                self.entries[command as usize]
            }

            pub fn supports(&self, command: $command) -> bool {
                self.get(command).is_some()
            }

            $(
                pub fn $accessor(&self) -> Option<$pfn> {
                    // SAFETY: the slot was filled by resolving `$name`, so the
                    // erased pointer has exactly this signature.
                    unsafe { std::mem::transmute::<vk::PFN_vkVoidFunction, Option<$pfn>>(self.get($command::$variant)) }
                }
            )+
        }

        impl Default for $table {
            fn default() -> Self {
                Self::empty()
            }
        }

        impl fmt::Debug for $table {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let supported = self.entries.iter().filter(|entry| entry.is_some()).count();
                f.debug_struct(stringify!($table))
                    .field("supported", &supported)
                    .field("total", &$command::COUNT)
                    .finish()
            }
        }
    };
}

dispatch_table! {
    /// Instance-level commands forwarded through an instance's table.
    pub enum InstanceCommand;
    pub struct InstanceTable {
        GetInstanceProcAddr => "vkGetInstanceProcAddr" as get_instance_proc_addr: vk::PFN_vkGetInstanceProcAddr,
        GetPhysicalDeviceProcAddr => "vk_layerGetPhysicalDeviceProcAddr" as get_physical_device_proc_addr: sys::PFN_GetPhysicalDeviceProcAddr,
        DestroyInstance => "vkDestroyInstance" as destroy_instance: vk::PFN_vkDestroyInstance,
        EnumeratePhysicalDevices => "vkEnumeratePhysicalDevices" as enumerate_physical_devices: vk::PFN_vkEnumeratePhysicalDevices,
        EnumeratePhysicalDeviceGroups => "vkEnumeratePhysicalDeviceGroups" as enumerate_physical_device_groups: vk::PFN_vkEnumeratePhysicalDeviceGroups,
        GetPhysicalDeviceFeatures => "vkGetPhysicalDeviceFeatures" as get_physical_device_features: vk::PFN_vkGetPhysicalDeviceFeatures,
        GetPhysicalDeviceFeatures2 => "vkGetPhysicalDeviceFeatures2" as get_physical_device_features2: vk::PFN_vkGetPhysicalDeviceFeatures2,
        GetPhysicalDeviceProperties => "vkGetPhysicalDeviceProperties" as get_physical_device_properties: vk::PFN_vkGetPhysicalDeviceProperties,
        GetPhysicalDeviceProperties2 => "vkGetPhysicalDeviceProperties2" as get_physical_device_properties2: vk::PFN_vkGetPhysicalDeviceProperties2,
        GetPhysicalDeviceFormatProperties => "vkGetPhysicalDeviceFormatProperties" as get_physical_device_format_properties: vk::PFN_vkGetPhysicalDeviceFormatProperties,
        GetPhysicalDeviceImageFormatProperties => "vkGetPhysicalDeviceImageFormatProperties" as get_physical_device_image_format_properties: vk::PFN_vkGetPhysicalDeviceImageFormatProperties,
        GetPhysicalDeviceQueueFamilyProperties => "vkGetPhysicalDeviceQueueFamilyProperties" as get_physical_device_queue_family_properties: vk::PFN_vkGetPhysicalDeviceQueueFamilyProperties,
        GetPhysicalDeviceMemoryProperties => "vkGetPhysicalDeviceMemoryProperties" as get_physical_device_memory_properties: vk::PFN_vkGetPhysicalDeviceMemoryProperties,
        GetPhysicalDeviceMemoryProperties2 => "vkGetPhysicalDeviceMemoryProperties2" as get_physical_device_memory_properties2: vk::PFN_vkGetPhysicalDeviceMemoryProperties2,
        CreateDevice => "vkCreateDevice" as create_device: vk::PFN_vkCreateDevice,
        EnumerateDeviceExtensionProperties => "vkEnumerateDeviceExtensionProperties" as enumerate_device_extension_properties: vk::PFN_vkEnumerateDeviceExtensionProperties,
        DestroySurfaceKHR => "vkDestroySurfaceKHR" as destroy_surface_khr: vk::PFN_vkDestroySurfaceKHR,
        GetPhysicalDeviceSurfaceSupportKHR => "vkGetPhysicalDeviceSurfaceSupportKHR" as get_physical_device_surface_support_khr: vk::PFN_vkGetPhysicalDeviceSurfaceSupportKHR,
        GetPhysicalDeviceSurfaceCapabilitiesKHR => "vkGetPhysicalDeviceSurfaceCapabilitiesKHR" as get_physical_device_surface_capabilities_khr: vk::PFN_vkGetPhysicalDeviceSurfaceCapabilitiesKHR,
        GetPhysicalDeviceSurfaceFormatsKHR => "vkGetPhysicalDeviceSurfaceFormatsKHR" as get_physical_device_surface_formats_khr: vk::PFN_vkGetPhysicalDeviceSurfaceFormatsKHR,
        GetPhysicalDeviceSurfacePresentModesKHR => "vkGetPhysicalDeviceSurfacePresentModesKHR" as get_physical_device_surface_present_modes_khr: vk::PFN_vkGetPhysicalDeviceSurfacePresentModesKHR,
        CreateDebugUtilsMessengerEXT => "vkCreateDebugUtilsMessengerEXT" as create_debug_utils_messenger_ext: vk::PFN_vkCreateDebugUtilsMessengerEXT,
        DestroyDebugUtilsMessengerEXT => "vkDestroyDebugUtilsMessengerEXT" as destroy_debug_utils_messenger_ext: vk::PFN_vkDestroyDebugUtilsMessengerEXT,
        SubmitDebugUtilsMessageEXT => "vkSubmitDebugUtilsMessageEXT" as submit_debug_utils_message_ext: vk::PFN_vkSubmitDebugUtilsMessageEXT,
    }
}

dispatch_table! {
    /// Device-level commands forwarded through a device's table.
    ///
    /// Queues and command buffers share their device's dispatch key, so they
    /// resolve through the same table.
    pub enum DeviceCommand;
    pub struct DeviceTable {
        GetDeviceProcAddr => "vkGetDeviceProcAddr" as get_device_proc_addr: vk::PFN_vkGetDeviceProcAddr,
        DestroyDevice => "vkDestroyDevice" as destroy_device: vk::PFN_vkDestroyDevice,
        GetDeviceQueue => "vkGetDeviceQueue" as get_device_queue: vk::PFN_vkGetDeviceQueue,
        GetDeviceQueue2 => "vkGetDeviceQueue2" as get_device_queue2: vk::PFN_vkGetDeviceQueue2,
        QueueSubmit => "vkQueueSubmit" as queue_submit: vk::PFN_vkQueueSubmit,
        QueueWaitIdle => "vkQueueWaitIdle" as queue_wait_idle: vk::PFN_vkQueueWaitIdle,
        DeviceWaitIdle => "vkDeviceWaitIdle" as device_wait_idle: vk::PFN_vkDeviceWaitIdle,
        AllocateMemory => "vkAllocateMemory" as allocate_memory: vk::PFN_vkAllocateMemory,
        FreeMemory => "vkFreeMemory" as free_memory: vk::PFN_vkFreeMemory,
        MapMemory => "vkMapMemory" as map_memory: vk::PFN_vkMapMemory,
        UnmapMemory => "vkUnmapMemory" as unmap_memory: vk::PFN_vkUnmapMemory,
        FlushMappedMemoryRanges => "vkFlushMappedMemoryRanges" as flush_mapped_memory_ranges: vk::PFN_vkFlushMappedMemoryRanges,
        BindBufferMemory => "vkBindBufferMemory" as bind_buffer_memory: vk::PFN_vkBindBufferMemory,
        BindImageMemory => "vkBindImageMemory" as bind_image_memory: vk::PFN_vkBindImageMemory,
        CreateBuffer => "vkCreateBuffer" as create_buffer: vk::PFN_vkCreateBuffer,
        DestroyBuffer => "vkDestroyBuffer" as destroy_buffer: vk::PFN_vkDestroyBuffer,
        CreateImage => "vkCreateImage" as create_image: vk::PFN_vkCreateImage,
        DestroyImage => "vkDestroyImage" as destroy_image: vk::PFN_vkDestroyImage,
        GetBufferDeviceAddress => "vkGetBufferDeviceAddress" as get_buffer_device_address: vk::PFN_vkGetBufferDeviceAddress,
        CreateFence => "vkCreateFence" as create_fence: vk::PFN_vkCreateFence,
        DestroyFence => "vkDestroyFence" as destroy_fence: vk::PFN_vkDestroyFence,
        ResetFences => "vkResetFences" as reset_fences: vk::PFN_vkResetFences,
        WaitForFences => "vkWaitForFences" as wait_for_fences: vk::PFN_vkWaitForFences,
        CreateSemaphore => "vkCreateSemaphore" as create_semaphore: vk::PFN_vkCreateSemaphore,
        DestroySemaphore => "vkDestroySemaphore" as destroy_semaphore: vk::PFN_vkDestroySemaphore,
        CreateCommandPool => "vkCreateCommandPool" as create_command_pool: vk::PFN_vkCreateCommandPool,
        DestroyCommandPool => "vkDestroyCommandPool" as destroy_command_pool: vk::PFN_vkDestroyCommandPool,
        AllocateCommandBuffers => "vkAllocateCommandBuffers" as allocate_command_buffers: vk::PFN_vkAllocateCommandBuffers,
        FreeCommandBuffers => "vkFreeCommandBuffers" as free_command_buffers: vk::PFN_vkFreeCommandBuffers,
        BeginCommandBuffer => "vkBeginCommandBuffer" as begin_command_buffer: vk::PFN_vkBeginCommandBuffer,
        EndCommandBuffer => "vkEndCommandBuffer" as end_command_buffer: vk::PFN_vkEndCommandBuffer,
        CreateSwapchainKHR => "vkCreateSwapchainKHR" as create_swapchain_khr: vk::PFN_vkCreateSwapchainKHR,
        DestroySwapchainKHR => "vkDestroySwapchainKHR" as destroy_swapchain_khr: vk::PFN_vkDestroySwapchainKHR,
        GetSwapchainImagesKHR => "vkGetSwapchainImagesKHR" as get_swapchain_images_khr: vk::PFN_vkGetSwapchainImagesKHR,
        AcquireNextImageKHR => "vkAcquireNextImageKHR" as acquire_next_image_khr: vk::PFN_vkAcquireNextImageKHR,
        QueuePresentKHR => "vkQueuePresentKHR" as queue_present_khr: vk::PFN_vkQueuePresentKHR,
        FrameBoundaryANDROID => "vkFrameBoundaryANDROID" as frame_boundary_android: sys::PFN_vkFrameBoundaryANDROID,
    }
}

/// A command name from the host, sorted into the scope of the table that
/// forwards it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Command {
    Instance(InstanceCommand),
    Device(DeviceCommand),
}

impl Command {
    pub fn parse(name: &CStr) -> Option<Self> {
        let name = name.to_str().ok()?;
        InstanceCommand::from_name(name)
            .map(Self::Instance)
            .or_else(|| DeviceCommand::from_name(name).map(Self::Device))
    }

    /// # Safety
    /// `name` must be null or point to a nul-terminated string.
    pub unsafe fn parse_ptr(name: *const c_char) -> Option<Self> {
        if name.is_null() {
            return None;
        }
        Self::parse(CStr::from_ptr(name))
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Instance(command) => command.name(),
            Self::Device(command) => command.name(),
        }
    }
}

/// Erases a typed entry point into the loader's `PFN_vkVoidFunction`.
///
/// ```ignore
/// void_fn!(allocate_memory => vk::PFN_vkAllocateMemory)
/// ```
#[macro_export]
macro_rules! void_fn {
    ($f:expr => $pfn:ty) => {
        Some(unsafe { ::std::mem::transmute::<$pfn, unsafe extern "system" fn()>($f as $pfn) })
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    unsafe extern "system" fn fake_allocate(
        _: vk::Device,
        _: *const vk::MemoryAllocateInfo,
        _: *const vk::AllocationCallbacks,
        _: *mut vk::DeviceMemory,
    ) -> vk::Result {
        vk::Result::ERROR_OUT_OF_HOST_MEMORY
    }

    #[test]
    fn command_names_are_unique_across_scopes() {
        let mut seen = HashSet::new();
        for command in InstanceCommand::ALL {
            assert!(seen.insert(command.name()), "{} listed twice", command.name());
        }
        for command in DeviceCommand::ALL {
            assert!(seen.insert(command.name()), "{} listed twice", command.name());
        }
    }

    #[test]
    fn parse_sorts_by_scope() {
        assert_eq!(
            Command::parse(c"vkQueueSubmit"),
            Some(Command::Device(DeviceCommand::QueueSubmit))
        );
        assert_eq!(
            Command::parse(c"vkEnumeratePhysicalDevices"),
            Some(Command::Instance(InstanceCommand::EnumeratePhysicalDevices))
        );
        assert_eq!(Command::parse(c"vkCmdDrawMeshTasksEXT"), None);
        assert_eq!(unsafe { Command::parse_ptr(std::ptr::null()) }, None);
    }

    #[test]
    fn c_name_matches_name() {
        for command in DeviceCommand::ALL {
            assert_eq!(command.c_name().to_str().unwrap(), command.name());
        }
    }

    #[test]
    fn load_asks_once_per_command_and_keeps_nulls() {
        let mut asked = Vec::new();
        let table = DeviceTable::load(|command| {
            asked.push(command);
            match command {
                DeviceCommand::AllocateMemory => void_fn!(fake_allocate => vk::PFN_vkAllocateMemory),
                _ => None,
            }
        });

        assert_eq!(asked, DeviceCommand::ALL);
        assert!(table.supports(DeviceCommand::AllocateMemory));
        assert!(!table.supports(DeviceCommand::QueueSubmit));
        assert!(table.queue_submit().is_none());

        let allocate = table.allocate_memory().expect("allocate slot");
        let result = unsafe {
            allocate(
                vk::Device::null(),
                std::ptr::null(),
                std::ptr::null(),
                std::ptr::null_mut(),
            )
        };
        assert_eq!(result, vk::Result::ERROR_OUT_OF_HOST_MEMORY);
    }

    #[test]
    fn empty_table_supports_nothing() {
        let table = InstanceTable::default();
        assert!(InstanceCommand::ALL.iter().all(|&command| !table.supports(command)));
        assert_eq!(format!("{:?}", table), format!("InstanceTable {{ supported: 0, total: {} }}", InstanceCommand::COUNT));
    }
}
