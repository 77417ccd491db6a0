//! Drivers: registration on a bus and the probe contract.
//!
//! Responsibilities:
//! - Provide the [DriverOps] trait that concrete drivers implement. [DriverOps::probe] is asked to
//!   take a device and answers with `Ok(())` or a [ProbeError].
//! - Publish each registered driver as a node under its bus's `drivers` container, with `bind`,
//!   `unbind` and `uevent` attributes.
//! - Keep the set of devices the driver is bound to. A device is in exactly one such set while it
//!   is bound, and in none otherwise.
use super::{Bus, Device};
use crate::{
    debug_ex,
    error::{Error, Result},
    kobject::{Attribute, KObject, KType},
    model::DeviceModel,
    uevent::Action,
};
use core::fmt;
use log::{error, warn};
use spin::Mutex;
use std::sync::Arc;
use utils::handle::Handle;

/// Trait implemented by drivers.
///
/// Guarantees and expectations:
/// - [probe] runs with the device's semaphore held; it must not call back into attach or detach
///   for the same device.
/// - [remove] runs only for devices this driver was successfully probed against.
pub trait DriverOps: Send + Sync {
    fn probe(&self, dev: &Device) -> core::result::Result<(), ProbeError>;

    fn remove(&self, _dev: &Device) {}
}

pub struct DriverInner {
    kobj: KObject,
    name: String,
    ops: Arc<dyn DriverOps>,
    bus: Mutex<Option<Bus>>,
    devices: Mutex<Vec<Device>>,
}

#[derive(Clone)]
pub struct Driver {
    pub(crate) inner: Handle<DriverInner>,
}

impl Driver {
    pub fn new(name: &str, ops: Arc<dyn DriverOps>) -> Driver {
        Driver {
            inner: Handle::from(DriverInner {
                kobj: KObject::create(Arc::new(DriverKType), Some(name)),
                name: name.to_string(),
                ops,
                bus: Mutex::new(None),
                devices: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn kobj(&self) -> &KObject {
        &self.inner.kobj
    }

    pub fn ops(&self) -> &dyn DriverOps {
        self.inner.ops.as_ref()
    }

    /// Bus the driver is registered on.
    pub fn bus(&self) -> Option<Bus> {
        self.inner.bus.lock().clone()
    }

    pub(crate) fn set_bus(&self, bus: Option<Bus>) {
        *self.inner.bus.lock() = bus;
    }

    /// Devices currently bound to this driver.
    pub fn devices(&self) -> Vec<Device> {
        self.inner.devices.lock().clone()
    }

    pub fn is_bound_to(&self, dev: &Device) -> bool {
        self.inner.devices.lock().contains(dev)
    }

    /// Record `dev` as bound. Returns `false` if it already was.
    pub(crate) fn add_device(&self, dev: &Device) -> bool {
        let mut devices = self.inner.devices.lock();
        if devices.contains(dev) {
            return false;
        }
        devices.push(dev.clone());
        true
    }

    pub(crate) fn remove_device(&self, dev: &Device) {
        self.inner.devices.lock().retain(|bound| bound != dev);
    }

    pub(crate) fn last_device(&self) -> Option<Device> {
        self.inner.devices.lock().last().cloned()
    }
}

impl PartialEq for Driver {
    fn eq(&self, other: &Self) -> bool {
        self.inner.ptr_eq(&other.inner)
    }
}

impl Eq for Driver {}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("name", &self.inner.name)
            .field("devices", &self.inner.devices.lock().len())
            .finish()
    }
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.name)
    }
}

struct DriverKType;

impl KType for DriverKType {
    fn release(&self, kobj: &KObject) {
        debug_ex!("driver: '{}': driver_release", kobj.display_name());
    }

    fn default_attrs(&self) -> &[Attribute] {
        const ATTRS: &[Attribute] = &[
            Attribute::wo("bind"),
            Attribute::wo("unbind"),
            Attribute::wo("uevent"),
        ];
        ATTRS
    }

    fn store(&self, kobj: &KObject, attr: &Attribute, buf: &str) -> Result<usize> {
        let model = kobj.model().ok_or(Error::NotRegistered)?;
        let drv = model.driver_of(kobj).ok_or(Error::NotRegistered)?;
        match attr.name {
            "bind" => model.bind_by_name(&drv, buf.trim()).map(|()| buf.len()),
            "unbind" => model.unbind_by_name(&drv, buf.trim()).map(|()| buf.len()),
            "uevent" => model.uevent_store(kobj, buf),
            _ => Err(Error::InvalidArgument),
        }
    }
}

// region: Error Types

/// Errors that may be returned by [DriverOps::probe].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    /// The driver does not handle this device. Not reported as a failure.
    Declined,
    /// The driver handles the device but could not bring it up.
    Failed(String),
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeError::Declined => write!(f, "declined"),
            ProbeError::Failed(reason) => write!(f, "{}", reason),
        }
    }
}

impl core::error::Error for ProbeError {}

// endregion

// region: Registration

impl DeviceModel {
    /// Driver registered under `kobj`, if any.
    pub fn driver_of(&self, kobj: &KObject) -> Option<Driver> {
        self.inner
            .drivers
            .get(kobj.id())
            .map(|inner| Driver { inner })
    }

    /// Look a driver up by name on `bus`.
    pub fn driver_find(&self, bus: &Bus, name: &str) -> Option<Driver> {
        bus.find_driver(name)
    }

    /// Register `drv` on `bus`, publish it, and if the bus autoprobes, bind it to every matching
    /// unbound device.
    pub fn driver_register(&self, bus: &Bus, drv: &Driver) -> Result<()> {
        if drv.bus().is_some() {
            return Err(Error::InvalidState);
        }
        if !bus.is_registered() {
            return Err(Error::NotRegistered);
        }
        if bus.find_driver(drv.name()).is_some() {
            error!(
                "Error: Driver '{}' is already registered, aborting...",
                drv.name()
            );
            return Err(Error::NameConflict(drv.name().to_string()));
        }
        debug_ex!("bus: '{}': add driver {}", bus.name(), drv.name());

        let kobj = drv.kobj();
        kobj.set_kset(Some(bus.drivers_kset()))?;
        drv.set_bus(Some(bus.clone()));
        if let Err(err) = self.kobject_add(kobj, None, None) {
            drv.set_bus(None);
            return Err(err);
        }
        self.inner.drivers.insert(kobj.id(), &drv.inner);

        if bus.autoprobe() {
            self.driver_attach(drv)?;
        }
        bus.add_driver(drv);
        if let Err(err) = self.kobject_uevent(kobj, Action::Add) {
            debug_ex!("driver: '{}': add event dropped: {}", drv.name(), err);
        }
        Ok(())
    }

    /// Detach `drv` from every device and remove it from its bus. The driver may be registered
    /// again afterwards.
    pub fn driver_unregister(&self, drv: &Driver) -> Result<()> {
        let bus = drv.bus().ok_or(Error::NotRegistered)?;
        debug_ex!("bus: '{}': remove driver {}", bus.name(), drv.name());
        bus.remove_driver(drv);
        self.driver_detach(drv);

        let kobj = drv.kobj();
        if let Err(err) = self.kobject_uevent(kobj, Action::Remove) {
            debug_ex!("driver: '{}': remove event dropped: {}", drv.name(), err);
        }
        if let Err(err) = self.kobject_del(kobj) {
            warn!("driver: '{}': kobject_del failed: {}", drv.name(), err);
        }
        self.inner.drivers.remove(kobj.id());
        drv.set_bus(None);
        Ok(())
    }
}

// endregion
