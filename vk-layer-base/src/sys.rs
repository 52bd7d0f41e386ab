//! Loader/layer interface records that `ash` does not define.
//!
//! Layouts follow `vk_layer.h`; the loader hands these to every layer in the
//! `pNext` chain of the instance and device create infos.

use std::ffi::{c_char, c_void};
use std::ptr;

use ash::vk;

/// `PFN_GetPhysicalDeviceProcAddr`, which shares its shape with `vkGetInstanceProcAddr`.
#[allow(non_camel_case_types)]
pub type PFN_GetPhysicalDeviceProcAddr =
    unsafe extern "system" fn(instance: vk::Instance, p_name: *const c_char) -> vk::PFN_vkVoidFunction;

/// `VK_ANDROID_frame_boundary` is not part of the headers `ash` was generated from.
#[allow(non_camel_case_types)]
pub type PFN_vkFrameBoundaryANDROID =
    unsafe extern "system" fn(device: vk::Device, semaphore: vk::Semaphore, image: vk::Image);

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Debug)]
#[repr(transparent)]
#[must_use]
pub struct VkLayerNegotiateStructType(pub(crate) i32);
impl VkLayerNegotiateStructType {
    pub const LAYER_NEGOTIATE_INTERFACE_STRUCT: Self = Self(1);
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Debug)]
#[repr(transparent)]
#[must_use]
pub struct VkLayerFunction(pub(crate) i32);
impl VkLayerFunction {
    pub const LAYER_LINK_INFO: Self = Self(0);
    pub const LOADER_DATA_CALLBACK: Self = Self(1);
}

#[repr(C)]
pub struct VkLayerInstanceLink {
    pub p_next: *mut VkLayerInstanceLink,
    pub pfn_next_get_instance_proc_addr: vk::PFN_vkGetInstanceProcAddr,
    pub pfn_next_get_physical_device_proc_addr: Option<PFN_GetPhysicalDeviceProcAddr>,
}

#[repr(C)]
pub struct VkLayerInstanceCreateInfo {
    pub s_type: vk::StructureType,
    pub p_next: *const c_void,
    pub function: VkLayerFunction,
    /* This is a union with PFN_vkSetInstanceLoaderData on the loader side.
       Only LAYER_LINK_INFO records are ever read through it.
     */
    pub p_layer_info: *mut VkLayerInstanceLink,
}

#[repr(C)]
pub struct VkLayerDeviceLink {
    pub p_next: *mut VkLayerDeviceLink,
    pub pfn_next_get_instance_proc_addr: vk::PFN_vkGetInstanceProcAddr,
    pub pfn_next_get_device_proc_addr: vk::PFN_vkGetDeviceProcAddr,
}

#[repr(C)]
pub struct VkLayerDeviceCreateInfo {
    pub s_type: vk::StructureType,
    pub p_next: *const c_void,
    pub function: VkLayerFunction,
    pub p_layer_info: *mut VkLayerDeviceLink,
}

#[repr(C)]
pub struct VkNegotiateLayerInterface {
    pub s_type: VkLayerNegotiateStructType,
    pub p_next: *const c_void,
    pub loader_layer_interface_version: u32,
    pub pfn_get_instance_proc_addr: Option<vk::PFN_vkGetInstanceProcAddr>,
    pub pfn_get_device_proc_addr: Option<vk::PFN_vkGetDeviceProcAddr>,
    pub pfn_get_physical_device_proc_addr: Option<PFN_GetPhysicalDeviceProcAddr>,
}

static_assertions::assert_eq_size!(VkLayerInstanceLink, [usize; 3]);
static_assertions::assert_eq_size!(VkLayerDeviceLink, [usize; 3]);
static_assertions::assert_eq_size!(VkLayerInstanceCreateInfo, [usize; 4]);
static_assertions::assert_eq_size!(VkLayerDeviceCreateInfo, [usize; 4]);
static_assertions::assert_eq_size!(vk::PFN_vkVoidFunction, usize);

/// The next link's entry points for an instance, taken off the loader's chain.
#[derive(Clone, Copy)]
pub struct NextInstanceLink {
    pub get_instance_proc_addr: vk::PFN_vkGetInstanceProcAddr,
    pub get_physical_device_proc_addr: Option<PFN_GetPhysicalDeviceProcAddr>,
}

/// The next link's entry points for a device, taken off the loader's chain.
#[derive(Clone, Copy)]
pub struct NextDeviceLink {
    pub get_instance_proc_addr: vk::PFN_vkGetInstanceProcAddr,
    pub get_device_proc_addr: vk::PFN_vkGetDeviceProcAddr,
}

/// Walks a `pNext` chain, yielding every structure in order.
///
/// # Safety
/// Every structure reachable from `p_next` must start with a valid
/// `sType`/`pNext` header and outlive the iterator.
pub unsafe fn p_next_chain(p_next: *const c_void) -> impl Iterator<Item = *mut vk::BaseOutStructure> {
    std::iter::successors(
        Some(p_next as *mut vk::BaseOutStructure).filter(|s| !s.is_null()),
        |&current| Some((*current).p_next).filter(|s| !s.is_null()),
    )
}

unsafe fn find_link_info<T>(p_next: *const c_void, s_type: vk::StructureType) -> *mut T {
    for current in p_next_chain(p_next) {
        if (*current).s_type == s_type
            && (*current.cast::<VkLayerInstanceCreateInfo>()).function == VkLayerFunction::LAYER_LINK_INFO
        {
            return current.cast();
        }
    }
    ptr::null_mut()
}

/// Takes this layer's link off an instance create info and advances the chain
/// so the next layer sees its own link.
///
/// # Safety
/// `create_info` must be null or a valid create info whose `pNext` chain is
/// well formed.
pub unsafe fn take_instance_link(create_info: *const vk::InstanceCreateInfo) -> Option<NextInstanceLink> {
    let create_info = create_info.as_ref()?;
    let layer_info = find_link_info::<VkLayerInstanceCreateInfo>(
        create_info.p_next,
        vk::StructureType::LOADER_INSTANCE_CREATE_INFO,
    );
    let layer_info = layer_info.as_mut()?;
    let link = layer_info.p_layer_info.as_ref()?;

    // Move the chain on for the next layer.
    layer_info.p_layer_info = link.p_next;

    Some(NextInstanceLink {
        get_instance_proc_addr: link.pfn_next_get_instance_proc_addr,
        get_physical_device_proc_addr: link.pfn_next_get_physical_device_proc_addr,
    })
}

/// Device counterpart of [`take_instance_link`].
///
/// # Safety
/// Same as [`take_instance_link`].
pub unsafe fn take_device_link(create_info: *const vk::DeviceCreateInfo) -> Option<NextDeviceLink> {
    let create_info = create_info.as_ref()?;
    let layer_info = find_link_info::<VkLayerDeviceCreateInfo>(
        create_info.p_next,
        vk::StructureType::LOADER_DEVICE_CREATE_INFO,
    );
    let layer_info = layer_info.as_mut()?;
    let link = layer_info.p_layer_info.as_ref()?;

    layer_info.p_layer_info = link.p_next;

    Some(NextDeviceLink {
        get_instance_proc_addr: link.pfn_next_get_instance_proc_addr,
        get_device_proc_addr: link.pfn_next_get_device_proc_addr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe extern "system" fn next_gipa(_: vk::Instance, _: *const c_char) -> vk::PFN_vkVoidFunction {
        None
    }

    #[test]
    fn take_instance_link_skips_callback_records_and_advances() {
        let mut second = VkLayerInstanceLink {
            p_next: ptr::null_mut(),
            pfn_next_get_instance_proc_addr: next_gipa,
            pfn_next_get_physical_device_proc_addr: None,
        };
        let mut first = VkLayerInstanceLink {
            p_next: &mut second,
            pfn_next_get_instance_proc_addr: next_gipa,
            pfn_next_get_physical_device_proc_addr: None,
        };
        let mut link_info = VkLayerInstanceCreateInfo {
            s_type: vk::StructureType::LOADER_INSTANCE_CREATE_INFO,
            p_next: ptr::null(),
            function: VkLayerFunction::LAYER_LINK_INFO,
            p_layer_info: &mut first,
        };
        let callback_info = VkLayerInstanceCreateInfo {
            s_type: vk::StructureType::LOADER_INSTANCE_CREATE_INFO,
            p_next: ptr::addr_of_mut!(link_info).cast_const().cast(),
            function: VkLayerFunction::LOADER_DATA_CALLBACK,
            p_layer_info: ptr::null_mut(),
        };
        let create_info = vk::InstanceCreateInfo {
            p_next: (&callback_info as *const VkLayerInstanceCreateInfo).cast(),
            ..Default::default()
        };

        let link = unsafe { take_instance_link(&create_info) };
        assert!(link.is_some());
        assert_eq!(link_info.p_layer_info, ptr::addr_of_mut!(second));

        let link = unsafe { take_instance_link(&create_info) };
        assert!(link.is_some());
        assert!(link_info.p_layer_info.is_null());

        // Chain exhausted.
        assert!(unsafe { take_instance_link(&create_info) }.is_none());
    }

    #[test]
    fn take_device_link_without_loader_info() {
        let create_info = vk::DeviceCreateInfo::default();
        assert!(unsafe { take_device_link(&create_info) }.is_none());
        assert!(unsafe { take_device_link(ptr::null()) }.is_none());
    }

    #[test]
    fn p_next_chain_visits_in_order() {
        let mut tail = vk::PhysicalDeviceBufferDeviceAddressFeatures::default();
        let head = vk::PhysicalDeviceFeatures2 {
            p_next: (&mut tail as *mut vk::PhysicalDeviceBufferDeviceAddressFeatures).cast(),
            ..Default::default()
        };
        let kinds: Vec<_> = unsafe { p_next_chain((&head as *const vk::PhysicalDeviceFeatures2).cast()) }
            .map(|s| unsafe { (*s).s_type })
            .collect();
        assert_eq!(
            kinds,
            vec![
                vk::StructureType::PHYSICAL_DEVICE_FEATURES_2,
                vk::StructureType::PHYSICAL_DEVICE_BUFFER_DEVICE_ADDRESS_FEATURES,
            ]
        );
        assert_eq!(unsafe { p_next_chain(ptr::null()) }.count(), 0);
    }
}
