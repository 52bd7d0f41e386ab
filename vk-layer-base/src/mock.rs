//! A stand-in for the next link in the chain.
//!
//! Hands out dispatchable objects laid out the way the loader lays them out
//! (first word is the dispatch pointer, shared by an instance and its
//! physical devices, and by a device and its queues) and implements just
//! enough commands for the lifecycle to run end to end. Objects are leaked
//! on purpose: tests may still look up handles after destroying them.

use std::cell::Cell;
use std::ffi::{c_char, c_void, CStr};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use ash::vk::{self, Handle};
use parking_lot::Mutex;

use crate::layer::Layer;
use crate::sys::{self, VkLayerDeviceCreateInfo, VkLayerDeviceLink, VkLayerFunction, VkLayerInstanceCreateInfo, VkLayerInstanceLink};
use crate::{lifecycle, void_fn};

/// Value `GetBlockIndexGFXR` reports.
pub const BLOCK_INDEX: u64 = 42;

/// Extension every mock physical device reports.
pub const DEVICE_EXTENSION: &CStr = c"VK_KHR_swapchain";

static NEXT_KEY: AtomicUsize = AtomicUsize::new(0x1000);

thread_local! {
    static FAIL_NEXT_CREATE: Cell<Option<vk::Result>> = const { Cell::new(None) };
}

#[repr(C)]
pub struct MockObject {
    loader_data: usize,
    destroyed: AtomicBool,
    last_allocate_flags: AtomicU32,
    calls: Mutex<Vec<&'static str>>,
}

impl MockObject {
    fn leak(loader_data: usize) -> u64 {
        let object = Box::leak(Box::new(MockObject {
            loader_data,
            destroyed: AtomicBool::new(false),
            last_allocate_flags: AtomicU32::new(0),
            calls: Mutex::new(Vec::new()),
        }));
        object as *mut MockObject as u64
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().push(call);
    }

    pub fn dispatch_key(&self) -> usize {
        self.loader_data
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Commands the next link has seen for this object, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    /// Flags of the last `VkMemoryAllocateFlagsInfo` seen by `vkAllocateMemory`.
    pub fn last_allocate_flags(&self) -> vk::MemoryAllocateFlags {
        vk::MemoryAllocateFlags::from_raw(self.last_allocate_flags.load(Ordering::SeqCst))
    }
}

/// # Safety
/// `handle` must have been produced by this module.
pub unsafe fn object(handle: impl Handle) -> &'static MockObject {
    &*(handle.as_raw() as usize as *const MockObject)
}

fn next_key() -> usize {
    NEXT_KEY.fetch_add(0x10, Ordering::Relaxed)
}

/// Makes the next mock `vkCreateInstance`/`vkCreateDevice` on this thread fail.
pub fn fail_next_create(result: vk::Result) {
    FAIL_NEXT_CREATE.with(|fail| fail.set(Some(result)));
}

fn take_failure() -> Option<vk::Result> {
    FAIL_NEXT_CREATE.with(|fail| fail.take())
}

/// A physical device belonging to `instance`.
///
/// # Safety
/// `instance` must have been produced by this module.
pub unsafe fn physical_device(instance: vk::Instance) -> vk::PhysicalDevice {
    vk::PhysicalDevice::from_raw(MockObject::leak(object(instance).dispatch_key()))
}

/// A queue belonging to `device`.
///
/// # Safety
/// `device` must have been produced by this module.
pub unsafe fn queue(device: vk::Device) -> vk::Queue {
    vk::Queue::from_raw(MockObject::leak(object(device).dispatch_key()))
}

/// A physical device whose instance was never created.
pub fn orphan_physical_device() -> vk::PhysicalDevice {
    vk::PhysicalDevice::from_raw(MockObject::leak(next_key()))
}

pub unsafe extern "system" fn get_instance_proc_addr(
    instance: vk::Instance,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    match CStr::from_ptr(p_name).to_bytes() {
        b"vkGetInstanceProcAddr" => void_fn!(get_instance_proc_addr => vk::PFN_vkGetInstanceProcAddr),
        b"vkCreateInstance" => void_fn!(driver_create_instance => vk::PFN_vkCreateInstance),
        b"vkCreateDevice" => void_fn!(driver_create_device => vk::PFN_vkCreateDevice),
        _ if instance == vk::Instance::null() => None,
        b"vkDestroyInstance" => void_fn!(destroy_instance => vk::PFN_vkDestroyInstance),
        b"vkEnumeratePhysicalDevices" => void_fn!(enumerate_physical_devices => vk::PFN_vkEnumeratePhysicalDevices),
        b"vkEnumerateDeviceExtensionProperties" => void_fn!(
            enumerate_device_extension_properties => vk::PFN_vkEnumerateDeviceExtensionProperties
        ),
        b"GetBlockIndexGFXR" => void_fn!(get_block_index => unsafe extern "system" fn() -> u64),
        _ => None,
    }
}

unsafe extern "system" fn get_physical_device_proc_addr(
    instance: vk::Instance,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    match CStr::from_ptr(p_name).to_bytes() {
        b"vkEnumerateDeviceExtensionProperties" => get_instance_proc_addr(instance, p_name),
        _ => None,
    }
}

pub unsafe extern "system" fn get_device_proc_addr(
    _device: vk::Device,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    match CStr::from_ptr(p_name).to_bytes() {
        b"vkGetDeviceProcAddr" => void_fn!(get_device_proc_addr => vk::PFN_vkGetDeviceProcAddr),
        b"vkDestroyDevice" => void_fn!(destroy_device => vk::PFN_vkDestroyDevice),
        b"vkDeviceWaitIdle" => void_fn!(device_wait_idle => vk::PFN_vkDeviceWaitIdle),
        b"vkAllocateMemory" => void_fn!(allocate_memory => vk::PFN_vkAllocateMemory),
        b"vkQueueSubmit" => void_fn!(queue_submit => vk::PFN_vkQueueSubmit),
        b"vkQueuePresentKHR" => void_fn!(queue_present_khr => vk::PFN_vkQueuePresentKHR),
        // vkFrameBoundaryANDROID is deliberately unsupported.
        _ => None,
    }
}

unsafe extern "system" fn driver_create_instance(
    _p_create_info: *const vk::InstanceCreateInfo,
    _p_allocator: *const vk::AllocationCallbacks,
    p_instance: *mut vk::Instance,
) -> vk::Result {
    if let Some(result) = take_failure() {
        return result;
    }
    let instance = vk::Instance::from_raw(MockObject::leak(next_key()));
    object(instance).record("vkCreateInstance");
    p_instance.write(instance);
    vk::Result::SUCCESS
}

unsafe extern "system" fn destroy_instance(instance: vk::Instance, _p_allocator: *const vk::AllocationCallbacks) {
    let object = object(instance);
    object.record("vkDestroyInstance");
    object.destroyed.store(true, Ordering::SeqCst);
}

unsafe extern "system" fn enumerate_physical_devices(
    instance: vk::Instance,
    p_count: *mut u32,
    p_physical_devices: *mut vk::PhysicalDevice,
) -> vk::Result {
    object(instance).record("vkEnumeratePhysicalDevices");
    if !p_physical_devices.is_null() && *p_count > 0 {
        p_physical_devices.write(physical_device(instance));
    }
    *p_count = 1;
    vk::Result::SUCCESS
}

unsafe extern "system" fn enumerate_device_extension_properties(
    _physical_device: vk::PhysicalDevice,
    _p_layer_name: *const c_char,
    p_count: *mut u32,
    p_properties: *mut vk::ExtensionProperties,
) -> vk::Result {
    if !p_properties.is_null() && *p_count > 0 {
        let mut properties = vk::ExtensionProperties::default();
        for (d, &s) in properties.extension_name.iter_mut().zip(DEVICE_EXTENSION.to_bytes_with_nul()) {
            *d = s as c_char;
        }
        p_properties.write(properties);
    }
    *p_count = 1;
    vk::Result::SUCCESS
}

unsafe extern "system" fn get_block_index() -> u64 {
    BLOCK_INDEX
}

unsafe extern "system" fn driver_create_device(
    physical_device: vk::PhysicalDevice,
    _p_create_info: *const vk::DeviceCreateInfo,
    _p_allocator: *const vk::AllocationCallbacks,
    p_device: *mut vk::Device,
) -> vk::Result {
    if let Some(result) = take_failure() {
        return result;
    }
    object(physical_device).record("vkCreateDevice");
    let device = vk::Device::from_raw(MockObject::leak(next_key()));
    p_device.write(device);
    vk::Result::SUCCESS
}

unsafe extern "system" fn destroy_device(device: vk::Device, _p_allocator: *const vk::AllocationCallbacks) {
    let object = object(device);
    object.record("vkDestroyDevice");
    object.destroyed.store(true, Ordering::SeqCst);
}

unsafe extern "system" fn device_wait_idle(device: vk::Device) -> vk::Result {
    object(device).record("vkDeviceWaitIdle");
    vk::Result::SUCCESS
}

unsafe extern "system" fn allocate_memory(
    device: vk::Device,
    p_allocate_info: *const vk::MemoryAllocateInfo,
    _p_allocator: *const vk::AllocationCallbacks,
    p_memory: *mut vk::DeviceMemory,
) -> vk::Result {
    let object = object(device);
    object.record("vkAllocateMemory");
    let allocate_info = &*p_allocate_info;
    for current in sys::p_next_chain(allocate_info.p_next) {
        if (*current).s_type == vk::StructureType::MEMORY_ALLOCATE_FLAGS_INFO {
            let flags = &*current.cast::<vk::MemoryAllocateFlagsInfo>();
            object.last_allocate_flags.store(flags.flags.as_raw(), Ordering::SeqCst);
        }
    }
    p_memory.write(vk::DeviceMemory::from_raw(allocate_info.allocation_size));
    vk::Result::SUCCESS
}

unsafe extern "system" fn queue_submit(
    queue: vk::Queue,
    _submit_count: u32,
    _p_submits: *const vk::SubmitInfo,
    _fence: vk::Fence,
) -> vk::Result {
    object(queue).record("vkQueueSubmit");
    vk::Result::SUCCESS
}

unsafe extern "system" fn queue_present_khr(queue: vk::Queue, _p_present_info: *const vk::PresentInfoKHR) -> vk::Result {
    object(queue).record("vkQueuePresentKHR");
    vk::Result::SUCCESS
}

/// An instance create info carrying a single loader link to the mock.
pub struct InstanceChain {
    link: *mut VkLayerInstanceLink,
    layer_info: *mut VkLayerInstanceCreateInfo,
    create_info: *mut vk::InstanceCreateInfo,
}

impl InstanceChain {
    pub fn new() -> Self {
        let link = Box::into_raw(Box::new(VkLayerInstanceLink {
            p_next: ptr::null_mut(),
            pfn_next_get_instance_proc_addr: get_instance_proc_addr,
            pfn_next_get_physical_device_proc_addr: Some(get_physical_device_proc_addr),
        }));
        let layer_info = Box::into_raw(Box::new(VkLayerInstanceCreateInfo {
            s_type: vk::StructureType::LOADER_INSTANCE_CREATE_INFO,
            p_next: ptr::null(),
            function: VkLayerFunction::LAYER_LINK_INFO,
            p_layer_info: link,
        }));
        let create_info = Box::into_raw(Box::new(vk::InstanceCreateInfo {
            p_next: layer_info.cast_const().cast(),
            ..Default::default()
        }));
        Self { link, layer_info, create_info }
    }

    pub fn create_info(&self) -> *const vk::InstanceCreateInfo {
        self.create_info
    }
}

impl Default for InstanceChain {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InstanceChain {
    fn drop(&mut self) {
        unsafe {
            drop(Box::from_raw(self.create_info));
            drop(Box::from_raw(self.layer_info));
            drop(Box::from_raw(self.link));
        }
    }
}

/// A device create info carrying a single loader link to the mock, followed
/// by whatever structures the caller chains after it.
pub struct DeviceChain {
    link: *mut VkLayerDeviceLink,
    layer_info: *mut VkLayerDeviceCreateInfo,
    create_info: *mut vk::DeviceCreateInfo,
}

impl DeviceChain {
    pub fn new(p_next: *const c_void) -> Self {
        let link = Box::into_raw(Box::new(VkLayerDeviceLink {
            p_next: ptr::null_mut(),
            pfn_next_get_instance_proc_addr: get_instance_proc_addr,
            pfn_next_get_device_proc_addr: get_device_proc_addr,
        }));
        let layer_info = Box::into_raw(Box::new(VkLayerDeviceCreateInfo {
            s_type: vk::StructureType::LOADER_DEVICE_CREATE_INFO,
            p_next,
            function: VkLayerFunction::LAYER_LINK_INFO,
            p_layer_info: link,
        }));
        let create_info = Box::into_raw(Box::new(vk::DeviceCreateInfo {
            p_next: layer_info.cast_const().cast(),
            ..Default::default()
        }));
        Self { link, layer_info, create_info }
    }

    pub fn create_info(&self) -> *const vk::DeviceCreateInfo {
        self.create_info
    }
}

impl Drop for DeviceChain {
    fn drop(&mut self) {
        unsafe {
            drop(Box::from_raw(self.create_info));
            drop(Box::from_raw(self.layer_info));
            drop(Box::from_raw(self.link));
        }
    }
}

/// Runs the layer's `vkCreateInstance` against the mock.
pub fn create_instance<L: Layer>() -> Result<vk::Instance, vk::Result> {
    let chain = InstanceChain::new();
    let mut instance = vk::Instance::null();
    match unsafe { lifecycle::create_instance::<L>(chain.create_info(), ptr::null(), &mut instance) } {
        vk::Result::SUCCESS => Ok(instance),
        err => Err(err),
    }
}

/// Runs the layer's `vkCreateDevice` against the mock, with `p_next`
/// chained after the loader link.
pub fn create_device<L: Layer>(
    physical_device: vk::PhysicalDevice,
    p_next: *const c_void,
) -> Result<vk::Device, vk::Result> {
    let chain = DeviceChain::new(p_next);
    let mut device = vk::Device::null();
    match unsafe { lifecycle::create_device::<L>(physical_device, chain.create_info(), ptr::null(), &mut device) } {
        vk::Result::SUCCESS => Ok(device),
        err => Err(err),
    }
}

/// Creates an instance and a device on it, returning both.
pub fn create_instance_and_device<L: Layer>() -> Result<(vk::Instance, vk::Device), vk::Result> {
    let instance = create_instance::<L>()?;
    let device = create_device::<L>(unsafe { physical_device(instance) }, ptr::null())?;
    Ok((instance, device))
}
