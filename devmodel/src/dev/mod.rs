//! Buses, devices and drivers, and the protocol that binds them.
mod bus;
mod dd;
mod device;
mod driver;
mod probe;

pub use bus::{Bus, BusEvent, BusNotifier, BusOps};
pub use device::{BindState, Device};
pub use driver::{Driver, DriverOps, ProbeError};
pub use probe::{ProbeGuard, ProbeTracker};

pub(crate) use bus::{BusInner, BusUeventOps};
pub(crate) use device::{DeviceInner, DeviceUeventOps};
pub(crate) use driver::DriverInner;
