//! Handle registries mapping dispatch keys to published dispatch tables.
//!
//! Two registries exist per layer, one for instances and one for devices,
//! grouped in [`LayerRegistry`]. Writers (create/destroy) take the lock
//! exclusively, lookups share it. Entries are handed out as `Arc`s, so a
//! lookup racing an unregister still holds a table that is safe to read.

use std::collections::BTreeMap;
use std::ffi::c_void;
use std::fmt;
use std::sync::Arc;

use ash::vk::{self, Handle};
use parking_lot::RwLock;

use crate::dispatch::{DeviceTable, InstanceTable};
use crate::error::RegistryError;

/// The identity a registry is indexed by.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DispatchKey(usize);

impl DispatchKey {
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> usize {
        self.0
    }
}

impl fmt::Debug for DispatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DispatchKey({:#x})", self.0)
    }
}

/// Derives a key from a non-null dispatchable handle.
pub type KeyExtractor = unsafe fn(handle: *const c_void) -> DispatchKey;

/// The loader's rule: a dispatchable handle points at an object whose first
/// word is the loader dispatch table pointer, and that pointer is the identity.
/// Every child object of an instance or device shares it.
///
/// # Safety
/// `handle` must point to a live dispatchable object.
pub unsafe fn loader_dispatch_key(handle: *const c_void) -> DispatchKey {
    DispatchKey(*handle.cast::<usize>())
}

/// Uses the handle value itself as the key.
pub fn handle_value_key(handle: *const c_void) -> DispatchKey {
    DispatchKey(handle as usize)
}

/// A published table together with the handle that registered it.
pub struct DispatchEntry<H, T, P = ()> {
    handle: H,
    table: T,
    parent: P,
}

impl<H: Copy, T, P> DispatchEntry<H, T, P> {
    pub fn handle(&self) -> H {
        self.handle
    }

    pub fn table(&self) -> &T {
        &self.table
    }

    pub fn parent(&self) -> &P {
        &self.parent
    }
}

impl<H: fmt::Debug, T: fmt::Debug, P: fmt::Debug> fmt::Debug for DispatchEntry<H, T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchEntry")
            .field("handle", &self.handle)
            .field("table", &self.table)
            .field("parent", &self.parent)
            .finish()
    }
}

pub struct Registry<H, T, P = ()> {
    key_of: KeyExtractor,
    entries: RwLock<BTreeMap<DispatchKey, Arc<DispatchEntry<H, T, P>>>>,
}

impl<H: Handle + Copy, T, P> Registry<H, T, P> {
    /// Creates an empty registry that keys handles with `key_of`.
    ///
    /// # Safety
    /// Every non-null handle later passed to this registry must satisfy the
    /// safety contract of `key_of`.
    pub const unsafe fn with_key_extractor(key_of: KeyExtractor) -> Self {
        Self {
            key_of,
            entries: parking_lot::const_rwlock(BTreeMap::new()),
        }
    }

    /// The key `handle` is indexed by, or `None` for a null handle.
    pub fn key(&self, handle: impl Handle) -> Option<DispatchKey> {
        let raw = handle.as_raw();
        if raw == 0 {
            return None;
        }
        // SAFETY: upheld by the constructor's contract.
        Some(unsafe { (self.key_of)(raw as usize as *const c_void) })
    }

    /// Publishes a table for `handle`, refusing to replace a live entry.
    pub fn try_register(
        &self,
        handle: H,
        table: T,
        parent: P,
    ) -> Result<Arc<DispatchEntry<H, T, P>>, RegistryError> {
        let key = self.key(handle).ok_or(RegistryError::NullHandle)?;
        let mut entries = self.entries.write();
        if entries.contains_key(&key) {
            return Err(RegistryError::DuplicateKey(key));
        }
        let entry = Arc::new(DispatchEntry { handle, table, parent });
        entries.insert(key, entry.clone());
        Ok(entry)
    }

    /// Publishes a table for `handle`. A live entry under the same key is
    /// replaced and the collision is logged; other keys are never touched.
    pub fn register(
        &self,
        handle: H,
        table: T,
        parent: P,
    ) -> Result<Arc<DispatchEntry<H, T, P>>, RegistryError> {
        let key = self.key(handle).ok_or(RegistryError::NullHandle)?;
        let entry = Arc::new(DispatchEntry { handle, table, parent });
        let replaced = self.entries.write().insert(key, entry.clone());
        if replaced.is_some() {
            tracing::warn!(?key, handle = handle.as_raw(), "{}", RegistryError::DuplicateKey(key));
        }
        Ok(entry)
    }

    /// Removes the entry for `handle`, returning it. Absent keys are not an error.
    pub fn unregister(&self, handle: impl Handle) -> Option<Arc<DispatchEntry<H, T, P>>> {
        let key = self.key(handle)?;
        self.entries.write().remove(&key)
    }

    pub fn lookup(&self, handle: impl Handle) -> Option<Arc<DispatchEntry<H, T, P>>> {
        let key = self.key(handle)?;
        self.entries.read().get(&key).cloned()
    }

    pub fn contains(&self, handle: impl Handle) -> bool {
        self.lookup(handle).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// What a device entry remembers about where it came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceParent {
    pub physical_device: vk::PhysicalDevice,
    /// `None` when the owning instance was already gone at device creation.
    pub instance: Option<vk::Instance>,
}

pub type InstanceEntry = DispatchEntry<vk::Instance, InstanceTable>;
pub type DeviceEntry = DispatchEntry<vk::Device, DeviceTable, DeviceParent>;
pub type InstanceRegistry = Registry<vk::Instance, InstanceTable>;
pub type DeviceRegistry = Registry<vk::Device, DeviceTable, DeviceParent>;

/// The pair of registries a layer owns.
///
/// Construction is `const`, so a layer keeps its registry in a plain `static`
/// that exists before the loader can call any entry point.
pub struct LayerRegistry {
    instances: InstanceRegistry,
    devices: DeviceRegistry,
}

impl LayerRegistry {
    /// A registry keyed by the loader's dispatch key.
    ///
    /// # Safety
    /// Only handles handed out by the loader (or a stand-in that lays objects
    /// out the same way) may be passed to it.
    pub const unsafe fn new() -> Self {
        Self::with_key_extractor(loader_dispatch_key)
    }

    /// # Safety
    /// See [`Registry::with_key_extractor`].
    pub const unsafe fn with_key_extractor(key_of: KeyExtractor) -> Self {
        Self {
            instances: Registry::with_key_extractor(key_of),
            devices: Registry::with_key_extractor(key_of),
        }
    }

    pub fn instances(&self) -> &InstanceRegistry {
        &self.instances
    }

    pub fn devices(&self) -> &DeviceRegistry {
        &self.devices
    }

    pub fn register_instance(
        &self,
        instance: vk::Instance,
        table: InstanceTable,
    ) -> Result<Arc<InstanceEntry>, RegistryError> {
        self.instances.register(instance, table, ())
    }

    pub fn unregister_instance(&self, instance: vk::Instance) -> Option<Arc<InstanceEntry>> {
        self.instances.unregister(instance)
    }

    /// Looks up the instance owning `handle`, which may be the instance itself
    /// or one of its physical devices.
    pub fn lookup_instance(&self, handle: impl Handle) -> Option<Arc<InstanceEntry>> {
        self.instances.lookup(handle)
    }

    pub fn register_device(
        &self,
        device: vk::Device,
        table: DeviceTable,
        parent: DeviceParent,
    ) -> Result<Arc<DeviceEntry>, RegistryError> {
        self.devices.register(device, table, parent)
    }

    pub fn unregister_device(&self, device: vk::Device) -> Option<Arc<DeviceEntry>> {
        self.devices.unregister(device)
    }

    /// Looks up the device owning `handle`: the device, a queue, or a command buffer.
    pub fn lookup_device(&self, handle: impl Handle) -> Option<Arc<DeviceEntry>> {
        self.devices.lookup(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DeviceCommand;
    use std::thread;

    fn by_value() -> LayerRegistry {
        unsafe { LayerRegistry::with_key_extractor(handle_value_key) }
    }

    unsafe extern "system" fn fake_wait_idle(_: vk::Device) -> vk::Result {
        vk::Result::SUCCESS
    }

    #[test]
    fn register_then_lookup_returns_the_published_entry() {
        let registry = by_value();
        let instance = vk::Instance::from_raw(0x1000);
        let published = registry.register_instance(instance, InstanceTable::empty()).unwrap();

        let found = registry.lookup_instance(instance).expect("registered");
        assert!(Arc::ptr_eq(&published, &found));
        assert_eq!(found.handle(), instance);
    }

    #[test]
    fn unregister_twice_is_a_no_op() {
        let registry = by_value();
        let instance = vk::Instance::from_raw(0x1000);
        registry.register_instance(instance, InstanceTable::empty()).unwrap();

        assert!(registry.unregister_instance(instance).is_some());
        assert!(registry.unregister_instance(instance).is_none());
        assert!(registry.lookup_instance(instance).is_none());
        assert!(registry.instances().is_empty());
    }

    #[test]
    fn null_handles_are_never_found() {
        let registry = by_value();
        assert_eq!(
            registry.register_instance(vk::Instance::null(), InstanceTable::empty()).unwrap_err(),
            RegistryError::NullHandle
        );
        assert!(registry.lookup_instance(vk::Instance::null()).is_none());
        assert!(registry.unregister_device(vk::Device::null()).is_none());
    }

    #[test]
    fn duplicate_key_is_rejected_by_try_register() {
        let registry = by_value();
        let instance = vk::Instance::from_raw(0x1000);
        registry.instances().try_register(instance, InstanceTable::empty(), ()).unwrap();
        assert_eq!(
            registry.instances().try_register(instance, InstanceTable::empty(), ()).unwrap_err(),
            RegistryError::DuplicateKey(DispatchKey::from_raw(0x1000))
        );
    }

    #[test]
    fn duplicate_key_overwrites_only_its_own_entry() {
        let registry = by_value();
        let parent = DeviceParent {
            physical_device: vk::PhysicalDevice::from_raw(0x10),
            instance: None,
        };
        let bystander = vk::Device::from_raw(0x2000);
        let target = vk::Device::from_raw(0x1000);
        let bystander_entry = registry.register_device(bystander, DeviceTable::empty(), parent).unwrap();
        registry.register_device(target, DeviceTable::empty(), parent).unwrap();

        let table = DeviceTable::load(|command| match command {
            DeviceCommand::DeviceWaitIdle => crate::void_fn!(fake_wait_idle => vk::PFN_vkDeviceWaitIdle),
            _ => None,
        });
        let replacement = registry.register_device(target, table, parent).unwrap();

        assert_eq!(registry.devices().len(), 2);
        assert!(Arc::ptr_eq(&registry.lookup_device(target).unwrap(), &replacement));
        assert!(registry.lookup_device(target).unwrap().table().device_wait_idle().is_some());
        assert!(Arc::ptr_eq(&registry.lookup_device(bystander).unwrap(), &bystander_entry));
    }

    #[test]
    fn instance_and_device_keys_do_not_collide() {
        let registry = by_value();
        let parent = DeviceParent {
            physical_device: vk::PhysicalDevice::null(),
            instance: None,
        };
        registry.register_instance(vk::Instance::from_raw(0x1000), InstanceTable::empty()).unwrap();
        assert!(registry.lookup_device(vk::Device::from_raw(0x1000)).is_none());

        registry.register_device(vk::Device::from_raw(0x1000), DeviceTable::empty(), parent).unwrap();
        registry.unregister_device(vk::Device::from_raw(0x1000));
        assert!(registry.lookup_instance(vk::Instance::from_raw(0x1000)).is_some());
    }

    #[test]
    fn loader_key_is_the_first_word() {
        let registry = unsafe { LayerRegistry::new() };
        let shared_dispatch: usize = 0xD15_7A7C;
        let mut device_object = Box::new(shared_dispatch);
        let mut queue_object = Box::new(shared_dispatch);
        let device = vk::Device::from_raw(&mut *device_object as *mut usize as u64);
        let queue = vk::Queue::from_raw(&mut *queue_object as *mut usize as u64);

        let parent = DeviceParent {
            physical_device: vk::PhysicalDevice::null(),
            instance: None,
        };
        registry.register_device(device, DeviceTable::empty(), parent).unwrap();
        assert_eq!(registry.devices().key(queue), Some(DispatchKey::from_raw(shared_dispatch)));
        assert_eq!(registry.lookup_device(queue).unwrap().handle(), device);
    }

    #[test]
    fn entry_survives_concurrent_unregister() {
        let registry = by_value();
        let instance = vk::Instance::from_raw(0x1000);
        registry.register_instance(instance, InstanceTable::empty()).unwrap();

        let held = registry.lookup_instance(instance).unwrap();
        registry.unregister_instance(instance);
        assert!(registry.lookup_instance(instance).is_none());
        // The reader's copy is still intact.
        assert_eq!(held.handle(), instance);
        assert!(held.table().destroy_instance().is_none());
    }

    #[test]
    fn concurrent_register_lookup_unregister_leaves_registry_empty() {
        const WRITERS: u64 = 4;
        const PER_WRITER: u64 = 500;
        let registry = by_value();

        thread::scope(|scope| {
            for writer in 0..WRITERS {
                let registry = &registry;
                scope.spawn(move || {
                    for n in 0..PER_WRITER {
                        let instance = vk::Instance::from_raw(0x1000 + writer * PER_WRITER + n);
                        registry.register_instance(instance, InstanceTable::empty()).unwrap();
                        assert!(registry.lookup_instance(instance).is_some());
                        registry.unregister_instance(instance);
                        assert!(registry.lookup_instance(instance).is_none());
                    }
                });
            }
            for reader in 0..2 {
                let registry = &registry;
                scope.spawn(move || {
                    for n in 0..WRITERS * PER_WRITER {
                        let instance = vk::Instance::from_raw(0x1000 + (n * 7 + reader) % (WRITERS * PER_WRITER));
                        if let Some(entry) = registry.lookup_instance(instance) {
                            assert_eq!(entry.handle(), instance);
                        }
                    }
                });
            }
        });

        assert!(registry.instances().is_empty());
    }
}
