use devmodel::{
    Action, Bus, BusOps, Config, Device, DeviceModel, Driver, DriverOps, Error, HelperWait,
    KObject, ProbeError, UeventEnv, UeventMessage, kobject::DynamicKType, sysfs::MemFs,
};
use std::{collections::HashSet, io::ErrorKind, sync::Arc, thread};

fn model(config: Config) -> (DeviceModel, Arc<MemFs>) {
    devmodel::logging::init();
    let fs = Arc::new(MemFs::new());
    let model = DeviceModel::with_config(fs.clone(), config).unwrap();
    (model, fs)
}

/// A plain node in the root `devices` container.
fn plain_device_node(model: &DeviceModel, name: &str) -> KObject {
    let kobj = KObject::create(Arc::new(DynamicKType), Some(name));
    kobj.set_kset(Some(model.devices_kset())).unwrap();
    model.kobject_add(&kobj, None, None).unwrap();
    kobj
}

#[test]
fn add_event_carries_standard_variables() {
    let (model, _fs) = model(Config::default());
    let listener = model.subscribe();
    let kobj = plain_device_node(&model, "disk0");

    model.kobject_uevent(&kobj, Action::Add).unwrap();
    let msg = listener.try_recv().unwrap();
    assert_eq!(msg.action, Action::Add);
    assert_eq!(msg.devpath, "/devices/disk0");
    assert_eq!(msg.get("ACTION"), Some("add"));
    assert_eq!(msg.get("DEVPATH"), Some("/devices/disk0"));
    assert_eq!(msg.get("SUBSYSTEM"), Some("devices"));
    assert_eq!(msg.get("SEQNUM"), Some(msg.seqnum.to_string().as_str()));
    assert_eq!(msg.seqnum, model.uevent().seqnum());
    assert_eq!(
        UeventMessage::decode(&msg.encode()).as_ref(),
        Some(&msg)
    );
}

#[test]
fn extra_variables_follow_the_standard_ones() {
    let (model, _fs) = model(Config::default());
    let listener = model.subscribe();
    let kobj = plain_device_node(&model, "disk0");

    model
        .kobject_uevent_env(&kobj, Action::Change, &["DISK_MEDIA_CHANGE=1"])
        .unwrap();
    let msg = listener.try_recv().unwrap();
    assert_eq!(
        msg.env[..4],
        [
            "ACTION=change",
            "DEVPATH=/devices/disk0",
            "SUBSYSTEM=devices",
            "DISK_MEDIA_CHANGE=1",
        ]
    );
    assert!(msg.env[4].starts_with("SEQNUM="));
}

#[test]
fn rename_and_move_report_the_old_path() {
    let (model, fs) = model(Config::default());
    let kobj = plain_device_node(&model, "disk0");
    let host = plain_device_node(&model, "host");
    let listener = model.subscribe();

    model.kobject_rename(&kobj, "disk1").unwrap();
    let renamed = listener.try_recv().unwrap();
    assert_eq!(renamed.action, Action::Move);
    assert_eq!(renamed.get("ACTION"), Some("move"));
    assert_eq!(renamed.get("DEVPATH"), Some("/devices/disk1"));
    assert_eq!(renamed.get("DEVPATH_OLD"), Some("/devices/disk0"));
    assert_eq!(renamed.get("SUBSYSTEM"), Some("devices"));

    model.kobject_move(&kobj, Some(&host)).unwrap();
    let moved = listener.try_recv().unwrap();
    assert_eq!(moved.action, Action::Move);
    assert_eq!(moved.devpath, "/devices/host/disk1");
    assert_eq!(moved.get("DEVPATH_OLD"), Some("/devices/disk1"));
    assert!(moved.seqnum > renamed.seqnum);
    assert!(fs.is_dir("/devices/host/disk1"));
    assert!(listener.try_recv().is_none());
}

#[test]
fn seqnums_are_unique_across_threads() {
    let (model, _fs) = model(Config::default().with_listener_backlog(512));
    let listener = model.subscribe();
    let kobj = plain_device_node(&model, "busy");

    thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for _ in 0..50 {
                    model.kobject_uevent(&kobj, Action::Change).unwrap();
                }
            });
        }
    });

    let seqnums: Vec<u64> = listener.drain().iter().map(|msg| msg.seqnum).collect();
    assert_eq!(seqnums.len(), 200);
    assert!(seqnums.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(seqnums.iter().collect::<HashSet<_>>().len(), 200);
    assert_eq!(model.uevent().broadcast().dropped(), 0);
}

#[test]
fn full_listener_queues_drop_only_for_that_listener() {
    let (model, _fs) = model(Config::default().with_listener_backlog(1));
    let slow = model.subscribe();
    let kobj = plain_device_node(&model, "noisy");

    model.kobject_uevent(&kobj, Action::Change).unwrap();
    model.kobject_uevent(&kobj, Action::Change).unwrap();
    let fresh = model.subscribe();
    model.kobject_uevent(&kobj, Action::Online).unwrap();

    assert_eq!(slow.drain().len(), 1);
    assert_eq!(fresh.try_recv().map(|msg| msg.action), Some(Action::Online));
    assert_eq!(model.uevent().broadcast().dropped(), 2);
}

#[test]
fn helper_spawn_failure_is_reported_by_default() {
    let (model, _fs) = model(Config::default());
    model
        .set_uevent_helper(Some("/nonexistent/uevent-helper"))
        .unwrap();
    let listener = model.subscribe();
    let kobj = plain_device_node(&model, "disk0");

    assert_eq!(
        model.kobject_uevent(&kobj, Action::Add),
        Err(Error::HelperSpawn(ErrorKind::NotFound))
    );
    // Listeners are served before the helper runs.
    assert_eq!(listener.try_recv().map(|msg| msg.action), Some(Action::Add));
    model.shutdown();
}

#[test]
fn helper_spawn_failure_is_silent_when_not_waiting() {
    let (model, _fs) = model(
        Config::default().with_helper("/nonexistent/uevent-helper", HelperWait::NoWait),
    );
    let kobj = plain_device_node(&model, "disk0");
    assert_eq!(model.kobject_uevent(&kobj, Action::Add), Ok(()));
    model.shutdown();
}

struct TagBus;

impl BusOps for TagBus {
    fn matches(&self, _dev: &Device, _drv: &Driver) -> bool {
        true
    }

    fn uevent(&self, dev: &Device, env: &mut UeventEnv) -> devmodel::Result<()> {
        env.add("TAG", dev.name())
    }
}

struct Accept;

impl DriverOps for Accept {
    fn probe(&self, _dev: &Device) -> Result<(), ProbeError> {
        Ok(())
    }
}

#[test]
fn device_events_name_the_bus_and_driver() {
    let (model, fs) = model(Config::default());
    let bus = Bus::new("virt", Arc::new(TagBus));
    model.bus_register(&bus).unwrap();
    let listener = model.subscribe();

    let dev = Device::on_bus("x", None, &bus);
    model.device_register(&dev).unwrap();
    let add = listener.try_recv().unwrap();
    assert_eq!(add.action, Action::Add);
    assert_eq!(add.get("SUBSYSTEM"), Some("virt"));
    assert_eq!(add.get("TAG"), Some("x"));
    assert_eq!(add.get("DRIVER"), None);

    let drv = Driver::new("d", Arc::new(Accept));
    model.driver_register(&bus, &drv).unwrap();
    let drv_add = listener.try_recv().unwrap();
    assert_eq!(drv_add.devpath, "/bus/virt/drivers/d");
    assert_eq!(drv_add.get("SUBSYSTEM"), Some("drivers"));

    assert_eq!(fs.write("/devices/x/uevent", "change\n"), Ok(7));
    let change = listener.try_recv().unwrap();
    assert_eq!(change.action, Action::Change);
    assert_eq!(change.get("DRIVER"), Some("d"));

    // Unknown actions are treated as `add`.
    assert_eq!(fs.write("/devices/x/uevent", "poke"), Ok(4));
    assert_eq!(listener.try_recv().map(|msg| msg.action), Some(Action::Add));
}

#[test]
fn busless_devices_and_bus_internals_stay_quiet() {
    let (model, _fs) = model(Config::default());
    let bus = Bus::new("virt", Arc::new(TagBus));
    let listener = model.subscribe();
    model.bus_register(&bus).unwrap();

    // Only the bus directory itself is announced.
    let announced: Vec<String> = listener.drain().into_iter().map(|msg| msg.devpath).collect();
    assert_eq!(announced, ["/bus/virt"]);

    model.device_register(&Device::new("lonely", None)).unwrap();
    assert!(listener.try_recv().is_none());
}

#[test]
fn unregistering_sends_remove() {
    let (model, _fs) = model(Config::default());
    let kobj = plain_device_node(&model, "gone");
    model.kobject_uevent(&kobj, Action::Add).unwrap();
    let listener = model.subscribe();

    // Dropping the last reference synthesizes the missing `remove`.
    kobj.put();
    let msg = listener.try_recv().unwrap();
    assert_eq!(msg.action, Action::Remove);
    assert_eq!(msg.devpath, "/devices/gone");
    assert!(listener.try_recv().is_none());
}
