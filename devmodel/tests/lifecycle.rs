use devmodel::{
    Bus, BusOps, Device, DeviceModel, Driver, DriverOps, Error, KObjectState, ProbeError,
    sysfs::MemFs,
};
use std::sync::Arc;

struct ByPrefix;

impl BusOps for ByPrefix {
    fn matches(&self, dev: &Device, drv: &Driver) -> bool {
        dev.name().starts_with(drv.name())
    }
}

struct Accept;

impl DriverOps for Accept {
    fn probe(&self, dev: &Device) -> Result<(), ProbeError> {
        dev.set_drvdata(dev.name().len());
        Ok(())
    }

    fn remove(&self, dev: &Device) {
        dev.clear_drvdata();
    }
}

fn fresh() -> (DeviceModel, Arc<MemFs>) {
    devmodel::logging::init();
    let fs = Arc::new(MemFs::new());
    let model = DeviceModel::new(fs.clone()).unwrap();
    (model, fs)
}

#[test]
fn registration_round_trip_restores_the_tree() {
    let (model, fs) = fresh();
    let before = fs.snapshot();
    assert_eq!(before, ["/bus", "/devices"]);

    let bus = Bus::new("pci", Arc::new(ByPrefix));
    model.bus_register(&bus).unwrap();
    let drv = Driver::new("nvme", Arc::new(Accept));
    model.driver_register(&bus, &drv).unwrap();
    let host = Device::new("pci0000:00", None);
    model.device_register(&host).unwrap();
    let nvme = Device::on_bus("nvme0", Some(&host), &bus);
    model.device_register(&nvme).unwrap();
    assert!(nvme.is_bound());
    assert_eq!(nvme.drvdata::<usize>().as_deref(), Some(&5));
    assert!(fs.exists("/devices/pci0000:00/nvme0/driver"));
    assert!(fs.exists("/bus/pci/drivers/nvme/nvme0"));

    model.device_unregister(&nvme).unwrap();
    assert!(nvme.drvdata::<usize>().is_none());
    assert!(!bus.has_device(&nvme));
    model.device_unregister(&host).unwrap();
    model.driver_unregister(&drv).unwrap();
    model.bus_unregister(&bus);

    assert_eq!(fs.snapshot(), before);
    assert!(model.find_bus("pci").is_none());
}

#[test]
fn matching_follows_the_bus() {
    let (model, _fs) = fresh();
    let bus = Bus::new("pci", Arc::new(ByPrefix));
    model.bus_register(&bus).unwrap();
    let nvme = Driver::new("nvme", Arc::new(Accept));
    let ahci = Driver::new("ahci", Arc::new(Accept));
    model.driver_register(&bus, &nvme).unwrap();
    model.driver_register(&bus, &ahci).unwrap();

    let disk = Device::on_bus("ahci1", None, &bus);
    let other = Device::on_bus("xhci0", None, &bus);
    model.device_register(&disk).unwrap();
    model.device_register(&other).unwrap();

    assert_eq!(disk.driver(), Some(ahci.clone()));
    assert!(!other.is_bound());
    assert_eq!(model.bind_by_name(&nvme, "xhci0"), Err(Error::NotFound));
    assert_eq!(ahci.devices(), vec![disk]);
    assert_eq!(bus.find_device_by_name(None, "xhci0"), Some(other));
}

#[test]
fn devices_can_join_a_bus_after_registration() {
    let (model, fs) = fresh();
    let bus = Bus::new("virtio", Arc::new(ByPrefix));
    model.bus_register(&bus).unwrap();
    let drv = Driver::new("virtio", Arc::new(Accept));
    model.driver_register(&bus, &drv).unwrap();

    let dev = Device::new("virtio0", None);
    model.device_register(&dev).unwrap();
    assert!(!dev.is_bound());

    model.bus_add_device(&bus, &dev).unwrap();
    assert!(dev.is_bound());
    assert!(fs.exists("/bus/virtio/devices/virtio0"));
    assert_eq!(model.bus_add_device(&bus, &dev), Err(Error::InvalidState));

    let other = Bus::new("other", Arc::new(ByPrefix));
    model.bus_register(&other).unwrap();
    assert_eq!(model.bus_add_device(&other, &dev), Err(Error::InvalidArgument));
}

#[test]
fn shutdown_clears_everything() {
    let (model, fs) = fresh();
    let bus = Bus::new("pci", Arc::new(ByPrefix));
    model.bus_register(&bus).unwrap();
    let drv = Driver::new("nvme", Arc::new(Accept));
    model.driver_register(&bus, &drv).unwrap();

    model.shutdown();
    assert!(fs.snapshot().is_empty());
    assert_eq!(drv.bus(), None);
    assert_eq!(model.devices_kset().kobj().state(), KObjectState::Destroying);
}

#[test]
fn renamed_devices_move_in_the_tree() {
    let (model, fs) = fresh();
    let dev = Device::new("eth0", None);
    model.device_register(&dev).unwrap();
    model.kobject_rename(dev.kobj(), "enp3s0").unwrap();
    assert!(fs.is_dir("/devices/enp3s0"));
    assert!(!fs.exists("/devices/eth0"));
    assert_eq!(dev.name(), "enp3s0");

    let parent = Device::new("pci0", None);
    model.device_register(&parent).unwrap();
    model.kobject_move(dev.kobj(), Some(parent.kobj())).unwrap();
    assert_eq!(dev.kobj().path().as_deref(), Some("/devices/pci0/enp3s0"));
}
