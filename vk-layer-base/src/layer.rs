use std::ffi::c_char;

use ash::vk;

use crate::dispatch::Command;
use crate::registry::{DeviceEntry, InstanceEntry, LayerRegistry};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct LayerVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

/// Identity a layer reports to the loader.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct LayerInfo {
    /// e.g. `VK_LAYER_LUNARG_342`. Must match the layer manifest.
    pub name: &'static str,
    pub description: &'static str,
    pub version: LayerVersion,
    /// Build designation appended to the version, e.g. `-dev`.
    pub designation: &'static str,
}

impl LayerInfo {
    pub fn version_string(&self) -> String {
        let LayerVersion { major, minor, patch } = self.version;
        format!("{major}.{minor}.{patch}{}", self.designation)
    }

    pub const fn implementation_version(&self) -> u32 {
        vk::make_api_version(0, self.version.major, self.version.minor, self.version.patch)
    }

    pub fn layer_properties(&self) -> vk::LayerProperties {
        let mut properties = vk::LayerProperties {
            spec_version: vk::HEADER_VERSION_COMPLETE,
            implementation_version: self.implementation_version(),
            ..Default::default()
        };
        copy_c_str(&mut properties.layer_name, self.name);
        copy_c_str(&mut properties.description, self.description);
        properties
    }

    /// Whether a name handed in by the loader refers to this layer.
    pub fn is_named(&self, name: &[u8]) -> bool {
        self.name.as_bytes() == name
    }
}

/// Copies `src` into a fixed-size C string field, truncating if needed.
fn copy_c_str(dst: &mut [c_char], src: &str) {
    let len = src.len().min(dst.len().saturating_sub(1));
    for (d, &s) in dst.iter_mut().zip(&src.as_bytes()[..len]) {
        *d = s as c_char;
    }
    if let Some(terminator) = dst.get_mut(len) {
        *terminator = 0;
    }
}

/// A concrete interception module built on the base chaining machinery.
///
/// A layer names itself through [`Layer::INFO`], owns a [`LayerRegistry`],
/// and lists the commands it intercepts in [`Layer::intercept`]. Everything
/// else resolves through the chain. The lifecycle hooks default to no-ops.
pub trait Layer: 'static {
    const INFO: LayerInfo;

    /// Environment variable holding the `tracing` filter for this layer.
    const LOG_ENV: &'static str = "VK_LAYER_LOG";

    fn registry() -> &'static LayerRegistry;

    /// This layer's own implementation of `command`, if it has one.
    fn intercept(_command: Command) -> vk::PFN_vkVoidFunction {
        None
    }

    /// Runs before the chain creates the instance; may adjust `create_info`.
    ///
    /// # Safety
    /// `create_info` is the pointer the application passed in.
    unsafe fn before_create_instance(_create_info: *const vk::InstanceCreateInfo) {}

    /// Runs once the instance's entry is published.
    fn after_create_instance(_entry: &InstanceEntry) {}

    /// Runs before the chain creates the device; may adjust `create_info`.
    ///
    /// # Safety
    /// `create_info` is the pointer the application passed in.
    unsafe fn before_create_device(
        _physical_device: vk::PhysicalDevice,
        _create_info: *const vk::DeviceCreateInfo,
    ) {
    }

    /// Runs once the device's entry is published.
    fn after_create_device(_entry: &DeviceEntry) {}

    /// Runs while the instance's entry is still published.
    fn before_destroy_instance(_instance: vk::Instance) {}

    /// Runs while the device's entry is still published.
    fn before_destroy_device(_device: vk::Device) {}
}
