//! The device model instance.
//!
//! A [DeviceModel] owns everything that is global in a kernel's device core: the path store,
//! the event emitter, the probe accounting and the two root containers `/devices` and `/bus`.
//! Several models can live side by side, which is how the tests isolate themselves.
//!
//! Registered nodes only keep a weak reference back to their model. Dropping the last
//! [DeviceModel] handle does not unregister anything; call [DeviceModel::shutdown] first.
use crate::{
    config::Config,
    debug_ex,
    dev::{Bus, BusInner, BusUeventOps, DeviceInner, DeviceUeventOps, DriverInner, ProbeTracker},
    error::Result,
    kobject::KSet,
    sysfs::SysfsBackend,
    uevent::UeventEmitter,
};
use log::info;
use std::sync::Arc;
use utils::{
    handle::{Handle, HandleRef},
    registry::Registry,
};

pub struct ModelInner {
    fs: Arc<dyn SysfsBackend>,
    uevent: UeventEmitter,
    pub(crate) probes: ProbeTracker,
    devices_kset: KSet,
    bus_kset: KSet,
    pub(crate) buses: Registry<BusInner>,
    pub(crate) devices: Registry<DeviceInner>,
    pub(crate) drivers: Registry<DriverInner>,
    config: Config,
}

#[derive(Clone)]
pub struct DeviceModel {
    pub(crate) inner: Handle<ModelInner>,
}

impl DeviceModel {
    /// A model over `fs` with the compile-time configuration.
    pub fn new(fs: Arc<dyn SysfsBackend>) -> Result<DeviceModel> {
        Self::with_config(fs, Config::default())
    }

    /// A model over `fs`. Publishes the `/devices` and `/bus` root containers.
    pub fn with_config(fs: Arc<dyn SysfsBackend>, config: Config) -> Result<DeviceModel> {
        let uevent = UeventEmitter::new(&config);
        uevent.set_helper(config.uevent_helper.as_deref())?;
        let model = DeviceModel {
            inner: Handle::from(ModelInner {
                fs,
                uevent,
                probes: ProbeTracker::new(),
                devices_kset: KSet::new("devices", Some(Arc::new(DeviceUeventOps))),
                bus_kset: KSet::new("bus", Some(Arc::new(BusUeventOps))),
                buses: Registry::new(),
                devices: Registry::new(),
                drivers: Registry::new(),
                config,
            }),
        };
        model.kset_register(model.devices_kset(), None)?;
        if let Err(err) = model.kset_register(model.bus_kset(), None) {
            model.kset_unregister(model.devices_kset());
            return Err(err);
        }
        debug_ex!("device model ready");
        Ok(model)
    }

    pub(crate) fn from_handle(inner: Handle<ModelInner>) -> DeviceModel {
        DeviceModel { inner }
    }

    pub(crate) fn downgrade(&self) -> HandleRef<ModelInner> {
        self.inner.create_ref()
    }

    pub fn fs(&self) -> &dyn SysfsBackend {
        self.inner.fs.as_ref()
    }

    pub fn uevent(&self) -> &UeventEmitter {
        &self.inner.uevent
    }

    pub fn probes(&self) -> &ProbeTracker {
        &self.inner.probes
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Root container of every device, published as `/devices`.
    pub fn devices_kset(&self) -> &KSet {
        &self.inner.devices_kset
    }

    /// Root container of every bus, published as `/bus`.
    pub fn bus_kset(&self) -> &KSet {
        &self.inner.bus_kset
    }

    /// Unregister every bus and both root containers, then stop the helper worker.
    pub fn shutdown(&self) {
        info!("device model shutting down");
        for bus in self.inner.buses.live() {
            self.bus_unregister(&Bus { inner: bus });
        }
        if self.bus_kset().kobj().is_registered() {
            self.kset_unregister(self.bus_kset());
        }
        if self.devices_kset().kobj().is_registered() {
            self.kset_unregister(self.devices_kset());
        }
        self.inner.uevent.shutdown();
    }
}

impl PartialEq for DeviceModel {
    fn eq(&self, other: &Self) -> bool {
        self.inner.ptr_eq(&other.inner)
    }
}

impl Eq for DeviceModel {}

impl core::fmt::Debug for DeviceModel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DeviceModel")
            .field("seqnum", &self.inner.uevent.seqnum())
            .field("buses", &self.inner.buses.live().len())
            .finish()
    }
}
