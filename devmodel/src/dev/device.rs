//! Devices and their registration.
//!
//! A [Device] embeds a node that lives in the root `devices` container, below its parent
//! device's node if it has one. Binding state (bus, driver, probe phase) is guarded by a short
//! spin lock; the per-device semaphore serializes the binding protocol itself and is always taken
//! parent first.
use super::{Bus, BusEvent, Driver};
use crate::{
    debug_ex,
    error::{Error, Result},
    kobject::{Attribute, KObject, KSet, KSetUeventOps, KType},
    model::DeviceModel,
    uevent::{Action, UeventEnv},
};
use core::{
    any::Any,
    fmt,
    sync::atomic::{AtomicBool, Ordering},
};
use log::{error, warn};
use spin::Mutex;
use std::sync::{Arc, Mutex as Semaphore, MutexGuard, PoisonError};
use utils::handle::Handle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindState {
    Unbound,
    /// A driver is set tentatively while its probe runs.
    Probing,
    Bound,
}

struct Binding {
    bus: Option<Bus>,
    driver: Option<Driver>,
    state: BindState,
}

pub struct DeviceInner {
    kobj: KObject,
    parent: Option<Device>,
    sem: Semaphore<()>,
    /// Set under the semaphore once deletion starts. A dead device is never probed or put
    /// back on a bus list.
    dead: AtomicBool,
    binding: Mutex<Binding>,
    drvdata: Mutex<Option<Arc<dyn Any + Send + Sync>>>,
}

#[derive(Clone)]
pub struct Device {
    pub(crate) inner: Handle<DeviceInner>,
}

/// Holds the device semaphore, and its parent's if requested, until dropped.
pub(crate) struct DeviceGuard<'a> {
    _dev: MutexGuard<'a, ()>,
    _parent: Option<MutexGuard<'a, ()>>,
}

fn down(sem: &Semaphore<()>) -> MutexGuard<'_, ()> {
    sem.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Device {
    pub fn new(name: &str, parent: Option<&Device>) -> Device {
        Device {
            inner: Handle::from(DeviceInner {
                kobj: KObject::create(Arc::new(DeviceKType), Some(name)),
                parent: parent.cloned(),
                sem: Semaphore::new(()),
                dead: AtomicBool::new(false),
                binding: Mutex::new(Binding {
                    bus: None,
                    driver: None,
                    state: BindState::Unbound,
                }),
                drvdata: Mutex::new(None),
            }),
        }
    }

    /// A device that will sit on `bus` once registered.
    pub fn on_bus(name: &str, parent: Option<&Device>, bus: &Bus) -> Device {
        let dev = Self::new(name, parent);
        dev.set_bus(Some(bus.clone()));
        dev
    }

    pub fn name(&self) -> String {
        self.inner.kobj.display_name()
    }

    pub fn kobj(&self) -> &KObject {
        &self.inner.kobj
    }

    pub fn parent(&self) -> Option<Device> {
        self.inner.parent.clone()
    }

    pub fn is_registered(&self) -> bool {
        self.inner.kobj.is_registered()
    }

    /// Whether deletion of the device has started.
    pub fn is_dead(&self) -> bool {
        self.inner.dead.load(Ordering::Acquire)
    }

    /// Mark the device as going away. Waits for a probe in flight to settle.
    fn kill(&self) {
        let _guard = self.lock();
        self.inner.dead.store(true, Ordering::Release);
    }

    pub fn bus(&self) -> Option<Bus> {
        self.inner.binding.lock().bus.clone()
    }

    pub(crate) fn set_bus(&self, bus: Option<Bus>) {
        self.inner.binding.lock().bus = bus;
    }

    pub fn driver(&self) -> Option<Driver> {
        self.inner.binding.lock().driver.clone()
    }

    pub fn bind_state(&self) -> BindState {
        self.inner.binding.lock().state
    }

    pub fn is_bound(&self) -> bool {
        self.bind_state() == BindState::Bound
    }

    /// Pick the driver the next attach should bind without probing.
    pub fn set_driver(&self, driver: Option<&Driver>) -> Result<()> {
        let mut binding = self.inner.binding.lock();
        if binding.state != BindState::Unbound {
            return Err(Error::AlreadyBound);
        }
        binding.driver = driver.cloned();
        Ok(())
    }

    pub(crate) fn set_binding(&self, driver: Option<&Driver>, state: BindState) {
        let mut binding = self.inner.binding.lock();
        binding.driver = driver.cloned();
        binding.state = state;
    }

    /// Attach driver-private data to the device.
    pub fn set_drvdata<T: Any + Send + Sync>(&self, data: T) {
        *self.inner.drvdata.lock() = Some(Arc::new(data));
    }

    pub fn drvdata<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let data = self.inner.drvdata.lock().clone()?;
        data.downcast::<T>().ok()
    }

    pub fn clear_drvdata(&self) {
        self.inner.drvdata.lock().take();
    }

    /// Take the device semaphore.
    pub(crate) fn lock(&self) -> DeviceGuard<'_> {
        DeviceGuard {
            _dev: down(&self.inner.sem),
            _parent: None,
        }
    }

    /// Take the parent's semaphore, then the device's.
    pub(crate) fn lock_with_parent(&self) -> DeviceGuard<'_> {
        let parent = self.parent_guard();
        DeviceGuard {
            _dev: down(&self.inner.sem),
            _parent: parent,
        }
    }

    pub(crate) fn parent_guard(&self) -> Option<MutexGuard<'_, ()>> {
        self.inner.parent.as_ref().map(|parent| down(&parent.inner.sem))
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.inner.ptr_eq(&other.inner)
    }
}

impl Eq for Device {}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name())
            .field("state", &self.bind_state())
            .finish()
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

// region: Node types

struct DeviceKType;

impl KType for DeviceKType {
    fn release(&self, kobj: &KObject) {
        debug_ex!("device: '{}': device_release", kobj.display_name());
    }

    fn default_attrs(&self) -> &[Attribute] {
        const ATTRS: &[Attribute] = &[Attribute::wo("uevent")];
        ATTRS
    }

    fn store(&self, kobj: &KObject, attr: &Attribute, buf: &str) -> Result<usize> {
        match attr.name {
            "uevent" => kobj
                .model()
                .ok_or(Error::NotRegistered)?
                .uevent_store(kobj, buf),
            _ => Err(Error::InvalidArgument),
        }
    }
}

/// Event hooks of the root `devices` container.
///
/// Devices report their bus as subsystem and are silent until they sit on a bus. Other nodes
/// in the container report `devices`.
pub(crate) struct DeviceUeventOps;

fn device_of(kobj: &KObject) -> Option<Device> {
    kobj.model()?.device_of(kobj)
}

impl KSetUeventOps for DeviceUeventOps {
    fn filter(&self, _kset: &KSet, kobj: &KObject) -> bool {
        device_of(kobj).is_none_or(|dev| dev.bus().is_some())
    }

    fn name(&self, kset: &KSet, kobj: &KObject) -> Option<String> {
        match device_of(kobj).and_then(|dev| dev.bus()) {
            Some(bus) => Some(bus.name().to_string()),
            None => kset.name(),
        }
    }

    fn uevent(&self, _kset: &KSet, kobj: &KObject, env: &mut UeventEnv) -> Result<()> {
        let Some(dev) = device_of(kobj) else {
            return Ok(());
        };
        if dev.is_bound()
            && let Some(driver) = dev.driver()
        {
            env.add("DRIVER", driver.name())?;
        }
        if let Some(bus) = dev.bus()
            && let Err(err) = bus.ops().uevent(&dev, env)
        {
            debug_ex!("{}: bus uevent() returned {}", dev.name(), err);
            return Err(err);
        }
        Ok(())
    }
}

// endregion

// region: Registration

impl DeviceModel {
    /// Device registered under `kobj`, if any.
    pub fn device_of(&self, kobj: &KObject) -> Option<Device> {
        self.inner
            .devices
            .get(kobj.id())
            .map(|inner| Device { inner })
    }

    /// Publish a device, announce it and, if it sits on a bus, link and probe it.
    pub fn device_add(&self, dev: &Device) -> Result<()> {
        let kobj = dev.kobj();
        if kobj.kset().is_none() {
            kobj.set_kset(Some(self.devices_kset()))?;
        }
        let parent = dev.parent().map(|parent| parent.kobj().clone());
        debug_ex!("device: '{}': device_add", dev.name());

        self.kobject_add(kobj, parent.as_ref(), None)?;
        dev.inner.dead.store(false, Ordering::Release);
        self.inner.devices.insert(kobj.id(), &dev.inner);

        let bus = dev.bus();
        if let Some(bus) = &bus {
            if let Err(err) = self.bus_link_device(bus, dev) {
                error!("device: '{}': failed to join bus '{}': {}", dev.name(), bus.name(), err);
                self.inner.devices.remove(kobj.id());
                if let Err(del_err) = self.kobject_del(kobj) {
                    warn!("device: '{}': rollback failed: {}", dev.name(), del_err);
                }
                return Err(err);
            }
            bus.notify(BusEvent::AddDevice, dev);
        }
        if let Err(err) = self.kobject_uevent(kobj, Action::Add) {
            debug_ex!("device: '{}': add event dropped: {}", dev.name(), err);
        }
        if let Some(bus) = &bus {
            self.bus_attach_device(bus, dev);
        }
        Ok(())
    }

    pub fn device_register(&self, dev: &Device) -> Result<()> {
        self.device_add(dev)
    }

    /// Undo [device_add](Self::device_add). Waits for a probe in flight on the device.
    pub fn device_del(&self, dev: &Device) -> Result<()> {
        let kobj = dev.kobj();
        if !kobj.is_registered() {
            return Err(Error::NotRegistered);
        }
        dev.kill();
        if let Some(bus) = dev.bus() {
            bus.notify(BusEvent::DelDevice, dev);
            self.bus_remove_device(&bus, dev);
        }
        if let Err(err) = self.kobject_uevent(kobj, Action::Remove) {
            debug_ex!("device: '{}': remove event dropped: {}", dev.name(), err);
        }
        self.kobject_del(kobj)?;
        self.inner.devices.remove(kobj.id());
        Ok(())
    }

    /// Re-point the bus and driver links of every device at or below `kobj` after it was renamed
    /// or moved. `old_name` is the name `kobj` had when its links were made.
    pub(crate) fn refresh_device_links(&self, kobj: &KObject, old_name: &str) {
        let Some(top) = kobj.path() else {
            return;
        };
        let below = format!("{}/", top);
        for inner in self.inner.devices.live() {
            let dev = Device { inner };
            let Some(dev_path) = dev.kobj().path() else {
                continue;
            };
            if dev.kobj().ptr_eq(kobj) {
                self.relink_device(&dev, old_name, &dev_path);
            } else if dev_path.starts_with(&below) {
                self.relink_device(&dev, &dev.name(), &dev_path);
            }
        }
    }

    fn relink_device(&self, dev: &Device, old_name: &str, dev_path: &str) {
        let mut dirs = Vec::new();
        if let Some(bus) = dev.bus()
            && let Some(dir) = bus.devices_kset().kobj().path()
        {
            dirs.push(dir);
        }
        if let Some(drv) = dev.driver()
            && let Some(dir) = drv.kobj().path()
        {
            dirs.push(dir);
        }
        let name = dev.name();
        for dir in dirs {
            // Only links that exist are carried over.
            if self.fs().remove_link(&dir, old_name).is_err() {
                continue;
            }
            if let Err(err) = self.fs().create_link(&dir, &name, dev_path) {
                warn!("device: '{}': relink in {} failed: {}", name, dir, err);
            }
        }
    }

    /// Delete the device and drop the registration reference.
    pub fn device_unregister(&self, dev: &Device) -> Result<()> {
        debug_ex!("device: '{}': device_unregister", dev.name());
        self.device_del(dev)?;
        dev.kobj().put();
        Ok(())
    }
}

// endregion

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::model_with_fs;

    #[test]
    fn registration_places_device_under_parent() {
        let (model, fs) = model_with_fs();
        let host = Device::new("host0", None);
        let disk = Device::new("disk0", Some(&host));
        model.device_register(&host).unwrap();
        model.device_register(&disk).unwrap();
        assert_eq!(disk.kobj().path().as_deref(), Some("/devices/host0/disk0"));
        assert!(fs.is_dir("/devices/host0/disk0"));
        assert!(model.devices_kset().contains(disk.kobj()));
        assert_eq!(model.device_of(disk.kobj()), Some(disk.clone()));

        model.device_unregister(&disk).unwrap();
        assert!(!fs.exists("/devices/host0/disk0"));
        assert!(model.device_of(disk.kobj()).is_none());
        assert_eq!(model.device_del(&disk), Err(Error::NotRegistered));
    }

    #[test]
    fn busless_devices_are_silent() {
        let (model, _fs) = model_with_fs();
        let listener = model.subscribe();
        let dev = Device::new("lonely", None);
        model.device_register(&dev).unwrap();
        assert!(listener.try_recv().is_none());
    }

    #[test]
    fn drvdata_is_typed() {
        let dev = Device::new("d", None);
        assert!(dev.drvdata::<u32>().is_none());
        dev.set_drvdata(7u32);
        assert_eq!(dev.drvdata::<u32>().as_deref(), Some(&7));
        assert!(dev.drvdata::<String>().is_none());
        dev.clear_drvdata();
        assert!(dev.drvdata::<u32>().is_none());
    }

    #[test]
    fn manual_driver_needs_unbound_device() {
        let dev = Device::new("d", None);
        dev.set_binding(None, BindState::Bound);
        assert_eq!(dev.set_driver(None), Err(Error::AlreadyBound));
    }
}
