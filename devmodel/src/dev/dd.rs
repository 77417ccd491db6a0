//! Binding devices to drivers.
//!
//! Probe protocol, per device and with the device semaphore held:
//! 1. The driver is set on the device tentatively and the state becomes `Probing`.
//! 2. Cross-links are published: `<driver dir>/<device name>` and `<device dir>/driver`.
//! 3. The bus's probe runs (by default the driver's own probe).
//! 4. On success the device becomes `Bound` and joins the driver's bound set. On failure the
//!    links and the tentative driver are removed and the device is `Unbound` again.
//!
//! A failed probe is not an error for the caller: matching simply moves on to the next driver.
//! [ProbeError::Declined] is expected and stays quiet; other failures are logged as warnings.
//!
//! Lock order is parent before child. Attaching from inside a parent's probe is allowed: the
//! device-triggered paths only take the device's own semaphore.
use super::{BindState, BusEvent, Device, Driver, ProbeError};
use crate::{
    debug_ex,
    error::{Error, Result},
    model::DeviceModel,
};
use core::ops::ControlFlow;
use log::{error, warn};

impl DeviceModel {
    fn driver_sysfs_add(&self, dev: &Device, drv: &Driver) -> Result<()> {
        let dev_path = dev.kobj().path().ok_or(Error::NotRegistered)?;
        let drv_path = drv.kobj().path().ok_or(Error::NotRegistered)?;
        let dev_name = dev.name();
        self.fs().create_link(&drv_path, &dev_name, &dev_path)?;
        if let Err(err) = self.fs().create_link(&dev_path, "driver", &drv_path) {
            if let Err(undo) = self.fs().remove_link(&drv_path, &dev_name) {
                warn!("{}: unlink from {} failed: {}", dev_name, drv.name(), undo);
            }
            return Err(err.into());
        }
        Ok(())
    }

    fn driver_sysfs_remove(&self, dev: &Device, drv: &Driver) {
        if let Some(drv_path) = drv.kobj().path()
            && let Err(err) = self.fs().remove_link(&drv_path, &dev.name())
        {
            debug_ex!("{}: {}", dev.name(), err);
        }
        if let Some(dev_path) = dev.kobj().path()
            && let Err(err) = self.fs().remove_link(&dev_path, "driver")
        {
            debug_ex!("{}: {}", dev.name(), err);
        }
    }

    fn driver_bound(&self, dev: &Device, drv: &Driver) {
        if !drv.add_device(dev) {
            warn!(
                "{}: device {} already bound",
                drv.name(),
                dev.name()
            );
            return;
        }
        debug_ex!(
            "driver: '{}': bound to device '{}'",
            drv.name(),
            dev.name()
        );
        dev.set_binding(Some(drv), BindState::Bound);
        if let Some(bus) = drv.bus() {
            bus.notify(BusEvent::BoundDriver, dev);
        }
    }

    /// Finish a bind for a device whose driver was chosen by the caller. Device semaphore held.
    fn device_bind_driver(&self, dev: &Device, drv: &Driver) -> Result<()> {
        self.driver_sysfs_add(dev, drv)?;
        self.driver_bound(dev, drv);
        Ok(())
    }

    /// Run the probe protocol. Device semaphore held. Returns whether the device got bound.
    fn really_probe(&self, dev: &Device, drv: &Driver) -> bool {
        let _in_flight = self.inner.probes.begin();
        let Some(bus) = drv.bus() else {
            return false;
        };
        debug_ex!(
            "bus: '{}': probing driver {} with device {}",
            bus.name(),
            drv.name(),
            dev.name()
        );
        dev.set_binding(Some(drv), BindState::Probing);

        let outcome = match self.driver_sysfs_add(dev, drv) {
            Ok(()) => bus.ops().probe(dev, drv),
            Err(err) => {
                error!(
                    "driver_sysfs_add({}) failed: {}",
                    dev.name(),
                    err
                );
                Err(ProbeError::Failed(err.to_string()))
            }
        };

        match outcome {
            Ok(()) => {
                self.driver_bound(dev, drv);
                true
            }
            Err(err) => {
                self.driver_sysfs_remove(dev, drv);
                dev.set_binding(None, BindState::Unbound);
                if err == ProbeError::Declined {
                    debug_ex!("{}: probe of {} declined", drv.name(), dev.name());
                } else {
                    // Probe failures do not fail matching.
                    warn!(
                        "{}: probe of {} failed with error {}",
                        drv.name(),
                        dev.name(),
                        err
                    );
                }
                false
            }
        }
    }

    /// Probe one driver against one device. Device semaphore held.
    fn driver_probe_device(&self, drv: &Driver, dev: &Device) -> Result<bool> {
        if !dev.is_registered() || dev.is_dead() {
            return Err(Error::NotRegistered);
        }
        Ok(self.really_probe(dev, drv))
    }

    /// Try `drv` on `dev`. Fails with [Error::AlreadyBound] if the device has a driver.
    pub fn probe(&self, drv: &Driver, dev: &Device) -> Result<bool> {
        let _guard = dev.lock_with_parent();
        if dev.driver().is_some() {
            return Err(Error::AlreadyBound);
        }
        self.driver_probe_device(drv, dev)
    }

    /// Find a driver for `dev`.
    ///
    /// A driver chosen with [Device::set_driver] is bound without probing. Otherwise every
    /// driver on the device's bus is tried in registration order until one binds. Returns
    /// whether the device ended up bound.
    pub fn device_attach(&self, dev: &Device) -> Result<bool> {
        let _guard = dev.lock();
        if dev.is_dead() {
            return Ok(false);
        }
        if dev.is_bound() {
            return Ok(true);
        }
        if let Some(drv) = dev.driver() {
            return match self.device_bind_driver(dev, &drv) {
                Ok(()) => Ok(true),
                Err(err) => {
                    debug_ex!("{}: manual bind to {} failed: {}", dev.name(), drv.name(), err);
                    dev.set_binding(None, BindState::Unbound);
                    Ok(false)
                }
            };
        }
        let Some(bus) = dev.bus() else {
            return Ok(false);
        };
        let found = bus.for_each_driver(None, |drv| {
            if !bus.ops().matches(dev, drv) {
                return ControlFlow::Continue(());
            }
            match self.driver_probe_device(drv, dev) {
                Ok(true) => ControlFlow::Break(Ok(())),
                Ok(false) => ControlFlow::Continue(()),
                Err(err) => ControlFlow::Break(Err(err)),
            }
        });
        match found {
            Some(Ok(())) => Ok(true),
            Some(Err(err)) => Err(err),
            None => Ok(false),
        }
    }

    /// Try `drv` on every unbound matching device of its bus.
    pub fn driver_attach(&self, drv: &Driver) -> Result<()> {
        let bus = drv.bus().ok_or(Error::NotRegistered)?;
        bus.for_each_device(None, |dev| {
            if !bus.ops().matches(dev, drv) {
                return ControlFlow::<()>::Continue(());
            }
            let _guard = dev.lock_with_parent();
            if dev.driver().is_none()
                && let Err(err) = self.driver_probe_device(drv, dev)
            {
                debug_ex!("{}: skipping {}: {}", drv.name(), dev.name(), err);
            }
            ControlFlow::Continue(())
        });
        Ok(())
    }

    /// Unbind with the device semaphore held.
    fn release_driver_locked(&self, dev: &Device) {
        let Some(drv) = dev.driver() else {
            return;
        };
        if !dev.is_bound() {
            dev.set_binding(None, BindState::Unbound);
            return;
        }
        debug_ex!("driver: '{}': unbinding {}", drv.name(), dev.name());
        self.driver_sysfs_remove(dev, &drv);
        let bus = drv.bus();
        if let Some(bus) = &bus {
            bus.notify(BusEvent::UnbindDriver, dev);
            bus.ops().remove(dev, &drv);
        } else {
            drv.ops().remove(dev);
        }
        dev.set_binding(None, BindState::Unbound);
        drv.remove_device(dev);
    }

    /// Unbind `dev` from its driver. A device without a driver is left alone.
    pub fn device_release_driver(&self, dev: &Device) -> Result<()> {
        let _guard = dev.lock();
        self.release_driver_locked(dev);
        Ok(())
    }

    /// Unbind every device bound to `drv`.
    pub fn driver_detach(&self, drv: &Driver) {
        while let Some(dev) = drv.last_device() {
            let _guard = dev.lock_with_parent();
            if dev.driver().as_ref() == Some(drv) {
                self.release_driver_locked(&dev);
            }
            drv.remove_device(&dev);
        }
    }

    /// Drop the current driver, if any, and match `dev` again.
    pub fn device_reprobe(&self, dev: &Device) -> Result<bool> {
        self.device_release_driver(dev)?;
        self.rescan_device(dev)
    }

    /// Attach `dev` if it has no driver, holding its parent's semaphore.
    pub(crate) fn rescan_device(&self, dev: &Device) -> Result<bool> {
        if dev.driver().is_some() {
            return Ok(false);
        }
        let _parent = dev.parent_guard();
        self.device_attach(dev)
    }

    /// Bind `drv` to the device named `name` on its bus, as for a write to the driver's `bind`
    /// attribute.
    pub fn bind_by_name(&self, drv: &Driver, name: &str) -> Result<()> {
        let bus = drv.bus().ok_or(Error::NotRegistered)?;
        let dev = bus
            .find_device_by_name(None, name)
            .ok_or(Error::NotFound)?;
        if !bus.ops().matches(&dev, drv) {
            return Err(Error::NotFound);
        }
        let _guard = dev.lock_with_parent();
        if dev.driver().is_some() {
            return Err(Error::AlreadyBound);
        }
        match self.driver_probe_device(drv, &dev)? {
            true => Ok(()),
            false => Err(Error::ProbeDeclined),
        }
    }

    /// Unbind the device named `name` from `drv`, as for a write to the driver's `unbind`
    /// attribute.
    pub fn unbind_by_name(&self, drv: &Driver, name: &str) -> Result<()> {
        let bus = drv.bus().ok_or(Error::NotRegistered)?;
        let dev = bus
            .find_device_by_name(None, name)
            .ok_or(Error::NotFound)?;
        let _guard = dev.lock_with_parent();
        if dev.driver().as_ref() != Some(drv) {
            return Err(Error::NotBound);
        }
        self.release_driver_locked(&dev);
        Ok(())
    }

    /// [Error::Busy] while any probe is running.
    pub fn probe_done(&self) -> Result<()> {
        self.inner.probes.probe_done()
    }

    /// Block until every probe in flight has finished.
    pub fn wait_for_device_probe(&self) {
        self.inner.probes.wait();
    }
}
