//! Device model core.
//!
//! A registry of reference-counted named nodes ([KObject]) arranged in a tree and grouped into
//! containers ([KSet]), published into a hierarchical path store ([sysfs]), announcing lifecycle
//! changes as hotplug events ([uevent]), and binding [Device]s to [Driver]s on a [Bus].
//!
//! Everything hangs off a [DeviceModel] instance:
//!
//! ```
//! use devmodel::{DeviceModel, Device, sysfs::MemFs};
//! use std::sync::Arc;
//!
//! let fs = Arc::new(MemFs::new());
//! let model = DeviceModel::new(fs.clone()).unwrap();
//! let dev = Device::new("disk0", None);
//! model.device_register(&dev).unwrap();
//! assert!(fs.is_dir("/devices/disk0"));
//! ```

#[macro_use]
pub mod logging;

pub mod config;
pub mod dev;
pub mod error;
pub mod kobject;
pub mod model;
pub mod sysfs;
pub mod uevent;

pub use config::Config;
pub use dev::{
    BindState, Bus, BusEvent, BusNotifier, BusOps, Device, Driver, DriverOps, ProbeError,
};
pub use error::{Error, Result};
pub use kobject::{Attribute, KObject, KObjectState, KSet, KSetUeventOps, KType, UeventFlags};
pub use model::DeviceModel;
pub use uevent::{Action, HelperWait, UeventEnv, UeventListener, UeventMessage};

#[cfg(test)]
pub(crate) mod test_utils {
    use crate::{config::Config, model::DeviceModel, sysfs::MemFs};
    use std::sync::Arc;

    pub fn model_with_fs() -> (DeviceModel, Arc<MemFs>) {
        model_with_config(Config::default())
    }

    pub fn model_with_config(config: Config) -> (DeviceModel, Arc<MemFs>) {
        crate::logging::init();
        let fs = Arc::new(MemFs::new());
        let model = DeviceModel::with_config(fs.clone(), config).unwrap();
        (model, fs)
    }
}
