//! Buses: the matching domain that pairs devices with drivers.
//!
//! A registered bus appears as `/bus/<name>` with `devices` and `drivers` containers below it.
//! Devices on the bus are linked from `/bus/<name>/devices/<dev>`; drivers are real nodes in
//! `/bus/<name>/drivers`. The bus directory carries `drivers_autoprobe`, `drivers_probe` and
//! `uevent` attributes.
//!
//! Iteration over a bus's devices or drivers never holds the list lock across the callback, so
//! callbacks may register and unregister. Elements added or removed meanwhile may or may not be
//! visited; no element is visited twice unless it is removed and added back.
use super::{Device, Driver, ProbeError};
use crate::{
    debug_ex,
    error::{Error, Result},
    kobject::{Attribute, KObject, KSet, KSetUeventOps, KType},
    model::DeviceModel,
    uevent::{Action, UeventEnv},
};
use core::{
    fmt,
    ops::ControlFlow,
    sync::atomic::{AtomicBool, Ordering},
};
use log::warn;
use spin::RwLock;
use std::sync::Arc;
use utils::handle::Handle;

/// Bus-specific behavior.
pub trait BusOps: Send + Sync {
    /// Whether `drv` can handle `dev`. Called before every probe attempt.
    fn matches(&self, dev: &Device, drv: &Driver) -> bool;

    /// Bring `dev` up with `drv`. Defaults to the driver's own probe.
    fn probe(&self, dev: &Device, drv: &Driver) -> core::result::Result<(), ProbeError> {
        drv.ops().probe(dev)
    }

    /// Undo a successful probe. Defaults to the driver's own remove.
    fn remove(&self, dev: &Device, drv: &Driver) {
        drv.ops().remove(dev)
    }

    /// Add bus-specific variables to a device event.
    fn uevent(&self, _dev: &Device, _env: &mut UeventEnv) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEvent {
    /// A device joined the bus. Sent before any probe.
    AddDevice,
    /// A device is about to leave the bus.
    DelDevice,
    /// A driver was bound to a device.
    BoundDriver,
    /// A driver is about to be unbound from a device.
    UnbindDriver,
}

pub trait BusNotifier: Send + Sync {
    fn notify(&self, bus: &Bus, event: BusEvent, dev: &Device);
}

pub struct BusInner {
    name: String,
    ops: Arc<dyn BusOps>,
    subsys: KSet,
    devices_kset: KSet,
    drivers_kset: KSet,
    devices: RwLock<Vec<Device>>,
    drivers: RwLock<Vec<Driver>>,
    autoprobe: AtomicBool,
    notifiers: RwLock<Vec<Arc<dyn BusNotifier>>>,
}

#[derive(Clone)]
pub struct Bus {
    pub(crate) inner: Handle<BusInner>,
}

/// Visit `list` from just after `start` (or from the head), re-locating the cursor after every
/// callback.
fn walk<T, B>(
    list: &RwLock<Vec<T>>,
    start: Option<&T>,
    mut f: impl FnMut(&T) -> ControlFlow<B>,
) -> Option<B>
where
    T: Clone + PartialEq,
{
    let mut next = match start {
        Some(start) => list
            .read()
            .iter()
            .position(|item| item == start)
            .map_or(0, |pos| pos + 1),
        None => 0,
    };
    loop {
        let item = list.read().get(next).cloned()?;
        if let ControlFlow::Break(found) = f(&item) {
            return Some(found);
        }
        // If `item` went away during the callback its successor moved into its slot.
        next = list
            .read()
            .iter()
            .position(|current| *current == item)
            .map_or(next, |pos| pos + 1);
    }
}

impl Bus {
    pub fn new(name: &str, ops: Arc<dyn BusOps>) -> Bus {
        Bus {
            inner: Handle::from(BusInner {
                name: name.to_string(),
                ops,
                subsys: KSet::with_ktype(name, None, Arc::new(BusKType)),
                devices_kset: KSet::new("devices", None),
                drivers_kset: KSet::new("drivers", None),
                devices: RwLock::new(Vec::new()),
                drivers: RwLock::new(Vec::new()),
                autoprobe: AtomicBool::new(false),
                notifiers: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn ops(&self) -> &dyn BusOps {
        self.inner.ops.as_ref()
    }

    /// The bus's own container, published as `/bus/<name>`.
    pub fn subsys(&self) -> &KSet {
        &self.inner.subsys
    }

    pub fn devices_kset(&self) -> &KSet {
        &self.inner.devices_kset
    }

    pub fn drivers_kset(&self) -> &KSet {
        &self.inner.drivers_kset
    }

    pub fn is_registered(&self) -> bool {
        self.inner.subsys.kobj().is_registered()
    }

    /// Whether new devices and drivers are matched automatically.
    pub fn autoprobe(&self) -> bool {
        self.inner.autoprobe.load(Ordering::Acquire)
    }

    pub fn set_autoprobe(&self, enabled: bool) {
        self.inner.autoprobe.store(enabled, Ordering::Release);
    }

    pub fn devices(&self) -> Vec<Device> {
        self.inner.devices.read().clone()
    }

    pub fn drivers(&self) -> Vec<Driver> {
        self.inner.drivers.read().clone()
    }

    pub fn has_device(&self, dev: &Device) -> bool {
        self.inner.devices.read().contains(dev)
    }

    pub(crate) fn add_device(&self, dev: &Device) {
        let mut devices = self.inner.devices.write();
        if !devices.contains(dev) {
            devices.push(dev.clone());
        }
    }

    pub(crate) fn remove_device(&self, dev: &Device) {
        self.inner.devices.write().retain(|current| current != dev);
    }

    pub(crate) fn add_driver(&self, drv: &Driver) {
        let mut drivers = self.inner.drivers.write();
        if !drivers.contains(drv) {
            drivers.push(drv.clone());
        }
    }

    pub(crate) fn remove_driver(&self, drv: &Driver) {
        self.inner.drivers.write().retain(|current| current != drv);
    }

    /// Call `f` on each device after `start`, stopping at the first `Break`.
    pub fn for_each_device<B>(
        &self,
        start: Option<&Device>,
        f: impl FnMut(&Device) -> ControlFlow<B>,
    ) -> Option<B> {
        walk(&self.inner.devices, start, f)
    }

    /// Call `f` on each driver after `start`, stopping at the first `Break`.
    pub fn for_each_driver<B>(
        &self,
        start: Option<&Driver>,
        f: impl FnMut(&Driver) -> ControlFlow<B>,
    ) -> Option<B> {
        walk(&self.inner.drivers, start, f)
    }

    /// First device after `start` that satisfies `pred`.
    pub fn find_device(
        &self,
        start: Option<&Device>,
        mut pred: impl FnMut(&Device) -> bool,
    ) -> Option<Device> {
        self.for_each_device(start, |dev| {
            if pred(dev) {
                ControlFlow::Break(dev.clone())
            } else {
                ControlFlow::Continue(())
            }
        })
    }

    pub fn find_device_by_name(&self, start: Option<&Device>, name: &str) -> Option<Device> {
        self.find_device(start, |dev| dev.name() == name)
    }

    pub fn find_driver(&self, name: &str) -> Option<Driver> {
        self.inner
            .drivers
            .read()
            .iter()
            .find(|drv| drv.name() == name)
            .cloned()
    }

    pub fn register_notifier(&self, notifier: Arc<dyn BusNotifier>) {
        self.inner.notifiers.write().push(notifier);
    }

    /// Returns whether `notifier` was registered.
    pub fn unregister_notifier(&self, notifier: &Arc<dyn BusNotifier>) -> bool {
        let mut notifiers = self.inner.notifiers.write();
        let before = notifiers.len();
        notifiers.retain(|current| !Arc::ptr_eq(current, notifier));
        before != notifiers.len()
    }

    pub(crate) fn notify(&self, event: BusEvent, dev: &Device) {
        let notifiers = self.inner.notifiers.read().clone();
        for notifier in notifiers {
            notifier.notify(self, event, dev);
        }
    }
}

impl PartialEq for Bus {
    fn eq(&self, other: &Self) -> bool {
        self.inner.ptr_eq(&other.inner)
    }
}

impl Eq for Bus {}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("name", &self.inner.name)
            .field("devices", &self.inner.devices.read().len())
            .field("drivers", &self.inner.drivers.read().len())
            .finish()
    }
}

// region: Node types

struct BusKType;

impl KType for BusKType {
    fn release(&self, kobj: &KObject) {
        debug_ex!("bus: '{}': release", kobj.display_name());
    }

    fn default_attrs(&self) -> &[Attribute] {
        const ATTRS: &[Attribute] = &[
            Attribute::rw("drivers_autoprobe"),
            Attribute::wo("drivers_probe"),
            Attribute::wo("uevent"),
        ];
        ATTRS
    }

    fn show(&self, kobj: &KObject, attr: &Attribute) -> Result<String> {
        let model = kobj.model().ok_or(Error::NotRegistered)?;
        let bus = model.bus_of(kobj).ok_or(Error::NotRegistered)?;
        match attr.name {
            "drivers_autoprobe" => Ok(format!("{}\n", u8::from(bus.autoprobe()))),
            _ => Err(Error::InvalidArgument),
        }
    }

    fn store(&self, kobj: &KObject, attr: &Attribute, buf: &str) -> Result<usize> {
        let model = kobj.model().ok_or(Error::NotRegistered)?;
        let bus = model.bus_of(kobj).ok_or(Error::NotRegistered)?;
        match attr.name {
            "drivers_autoprobe" => {
                bus.set_autoprobe(!buf.starts_with('0'));
                Ok(buf.len())
            }
            "drivers_probe" => {
                let dev = bus
                    .find_device_by_name(None, buf.trim())
                    .ok_or(Error::NotFound)?;
                model.rescan_device(&dev)?;
                Ok(buf.len())
            }
            "uevent" => model.uevent_store(kobj, buf),
            _ => Err(Error::InvalidArgument),
        }
    }
}

/// Event hooks of the root `bus` container: only bus directories report, as `bus`.
pub(crate) struct BusUeventOps;

impl KSetUeventOps for BusUeventOps {
    fn filter(&self, _kset: &KSet, kobj: &KObject) -> bool {
        kobj.model().and_then(|model| model.bus_of(kobj)).is_some()
    }
}

// endregion

// region: Registration

impl DeviceModel {
    /// Bus whose directory node is `kobj`, if any.
    pub fn bus_of(&self, kobj: &KObject) -> Option<Bus> {
        self.inner.buses.get(kobj.id()).map(|inner| Bus { inner })
    }

    pub fn find_bus(&self, name: &str) -> Option<Bus> {
        self.inner
            .buses
            .live()
            .into_iter()
            .map(|inner| Bus { inner })
            .find(|bus| bus.name() == name)
    }

    /// Publish `bus` under `/bus` with its `devices` and `drivers` containers, and enable
    /// autoprobe.
    pub fn bus_register(&self, bus: &Bus) -> Result<()> {
        let subsys = bus.subsys();
        subsys.kobj().set_kset(Some(self.bus_kset()))?;
        // The subsystem's node must resolve to the bus before its add event goes out.
        self.inner.buses.insert(subsys.kobj().id(), &bus.inner);
        if let Err(err) = self.kset_register(subsys, None) {
            self.inner.buses.remove(subsys.kobj().id());
            return Err(err);
        }

        if let Err(err) = self.kset_register(bus.devices_kset(), Some(subsys.kobj())) {
            self.withdraw(subsys);
            self.inner.buses.remove(subsys.kobj().id());
            return Err(err);
        }
        if let Err(err) = self.kset_register(bus.drivers_kset(), Some(subsys.kobj())) {
            self.withdraw(bus.devices_kset());
            self.withdraw(subsys);
            self.inner.buses.remove(subsys.kobj().id());
            return Err(err);
        }
        bus.set_autoprobe(true);
        debug_ex!("bus: '{}': registered", bus.name());
        Ok(())
    }

    /// Take a registered container back down without dropping its reference.
    fn withdraw(&self, kset: &KSet) {
        if let Err(err) = self.kobject_uevent(kset.kobj(), Action::Remove) {
            debug_ex!("kset '{}': remove event dropped: {}", kset.kobj().display_name(), err);
        }
        if let Err(err) = self.kobject_del(kset.kobj()) {
            warn!("kset '{}': withdraw failed: {}", kset.kobj().display_name(), err);
        }
    }

    /// Unregister every driver, detach every device, and remove the bus's directories.
    pub fn bus_unregister(&self, bus: &Bus) {
        debug_ex!("bus: '{}': unregistering", bus.name());
        for drv in bus.drivers() {
            if let Err(err) = self.driver_unregister(&drv) {
                warn!("bus: '{}': driver '{}': {}", bus.name(), drv.name(), err);
            }
        }
        for dev in bus.devices() {
            bus.notify(BusEvent::DelDevice, &dev);
            self.bus_remove_device(bus, &dev);
            dev.set_bus(None);
        }
        self.kset_unregister(bus.drivers_kset());
        self.kset_unregister(bus.devices_kset());
        self.kset_unregister(bus.subsys());
        self.inner.buses.remove(bus.subsys().kobj().id());
    }

    /// Put a registered device on `bus`: link it into the bus directory and, if the bus
    /// autoprobes, try to bind it.
    pub fn bus_add_device(&self, bus: &Bus, dev: &Device) -> Result<()> {
        match dev.bus() {
            Some(current) if current != *bus => return Err(Error::InvalidArgument),
            _ => {}
        }
        if bus.has_device(dev) {
            return Err(Error::InvalidState);
        }
        dev.set_bus(Some(bus.clone()));
        if let Err(err) = self.bus_link_device(bus, dev) {
            dev.set_bus(None);
            return Err(err);
        }
        bus.notify(BusEvent::AddDevice, dev);
        self.bus_attach_device(bus, dev);
        Ok(())
    }

    pub(crate) fn bus_link_device(&self, bus: &Bus, dev: &Device) -> Result<()> {
        let dev_path = dev.kobj().path().ok_or(Error::NotRegistered)?;
        let devices_dir = bus
            .devices_kset()
            .kobj()
            .path()
            .ok_or(Error::NotRegistered)?;
        let subsys_path = bus.subsys().kobj().path().ok_or(Error::NotRegistered)?;
        debug_ex!("bus: '{}': add device {}", bus.name(), dev.name());

        self.fs().create_link(&devices_dir, &dev.name(), &dev_path)?;
        if let Err(err) = self.fs().create_link(&dev_path, "subsystem", &subsys_path) {
            if let Err(undo) = self.fs().remove_link(&devices_dir, &dev.name()) {
                warn!("bus: '{}': unlink {} failed: {}", bus.name(), dev.name(), undo);
            }
            return Err(err.into());
        }
        Ok(())
    }

    pub(crate) fn bus_attach_device(&self, bus: &Bus, dev: &Device) {
        if bus.autoprobe()
            && let Err(err) = self.device_attach(dev)
        {
            warn!("bus: '{}': attach {} failed: {}", bus.name(), dev.name(), err);
        }
        // A concurrent delete may have run while the probe held the device.
        let _guard = dev.lock();
        if dev.is_dead() {
            debug_ex!("bus: '{}': {} deleted during attach", bus.name(), dev.name());
            return;
        }
        bus.add_device(dev);
    }

    pub(crate) fn bus_remove_device(&self, bus: &Bus, dev: &Device) {
        if let Some(dev_path) = dev.kobj().path()
            && let Err(err) = self.fs().remove_link(&dev_path, "subsystem")
        {
            debug_ex!("bus: '{}': {}", bus.name(), err);
        }
        if let Some(devices_dir) = bus.devices_kset().kobj().path()
            && let Err(err) = self.fs().remove_link(&devices_dir, &dev.name())
        {
            debug_ex!("bus: '{}': {}", bus.name(), err);
        }
        bus.remove_device(dev);
        debug_ex!("bus: '{}': remove device {}", bus.name(), dev.name());
        if let Err(err) = self.device_release_driver(dev) {
            warn!("bus: '{}': release {} failed: {}", bus.name(), dev.name(), err);
        }
    }

    /// Retry matching for every device on `bus` that has no driver. Returns how many got bound.
    pub fn bus_rescan_devices(&self, bus: &Bus) -> usize {
        let mut bound = 0;
        bus.for_each_device(None, |dev| {
            match self.rescan_device(dev) {
                Ok(true) => bound += 1,
                Ok(false) => {}
                Err(err) => warn!("bus: '{}': rescan {} failed: {}", bus.name(), dev.name(), err),
            }
            ControlFlow::<()>::Continue(())
        });
        bound
    }
}

// endregion
