//! Containers of nodes.
//!
//! A [KSet] is itself a node (its embedded [KObject]) plus a membership list and optional event
//! hooks. Every member holds one logical reference on the container's node for as long as it is
//! a member, so the container cannot be torn down under its members.
use super::{KObject, KType};
use crate::{
    debug_ex,
    error::{Error, Result},
    model::DeviceModel,
    uevent::{Action, UeventEnv},
};
use log::warn;
use spin::Mutex;
use std::sync::Arc;
use utils::handle::Handle;

/// Hooks a container applies to events raised by its members.
///
/// All hooks receive the node the event is about, which may be a descendant of an actual member.
pub trait KSetUeventOps: Send + Sync {
    /// Return `false` to drop the event silently.
    fn filter(&self, _kset: &KSet, _kobj: &KObject) -> bool {
        true
    }

    /// Subsystem name reported in `SUBSYSTEM=`. Defaults to the container's own name; `None`
    /// drops the event silently.
    fn name(&self, kset: &KSet, _kobj: &KObject) -> Option<String> {
        kset.name()
    }

    /// Append extra variables. An error aborts dispatch and is returned to the emitter's caller.
    fn uevent(&self, _kset: &KSet, _kobj: &KObject, _env: &mut UeventEnv) -> Result<()> {
        Ok(())
    }
}

pub struct KSetInner {
    kobj: KObject,
    members: Mutex<Vec<KObject>>,
    ops: Option<Arc<dyn KSetUeventOps>>,
}

#[derive(Clone)]
pub struct KSet {
    inner: Handle<KSetInner>,
}

struct KSetKType;

impl KType for KSetKType {
    fn release(&self, kobj: &KObject) {
        debug_ex!("kobject: '{}': kset release", kobj.display_name());
    }
}

impl KSet {
    pub fn new(name: &str, ops: Option<Arc<dyn KSetUeventOps>>) -> KSet {
        Self::with_ktype(name, ops, Arc::new(KSetKType))
    }

    /// A container whose own node uses `ktype`, for containers that expose attributes.
    pub fn with_ktype(
        name: &str,
        ops: Option<Arc<dyn KSetUeventOps>>,
        ktype: Arc<dyn KType>,
    ) -> KSet {
        KSet {
            inner: Handle::from(KSetInner {
                kobj: KObject::create(ktype, Some(name)),
                members: Mutex::new(Vec::new()),
                ops,
            }),
        }
    }

    pub fn kobj(&self) -> &KObject {
        &self.inner.kobj
    }

    pub fn name(&self) -> Option<String> {
        self.inner.kobj.name()
    }

    pub fn ops(&self) -> Option<Arc<dyn KSetUeventOps>> {
        self.inner.ops.clone()
    }

    pub(crate) fn join(&self, kobj: &KObject) -> Result<()> {
        let pinned = self.inner.kobj.get().ok_or(Error::InvalidState)?;
        let mut members = self.inner.members.lock();
        if members.iter().any(|member| member.ptr_eq(kobj)) {
            drop(members);
            pinned.put();
            return Ok(());
        }
        members.push(kobj.clone());
        Ok(())
    }

    pub(crate) fn leave(&self, kobj: &KObject) {
        let removed = {
            let mut members = self.inner.members.lock();
            let before = members.len();
            members.retain(|member| !member.ptr_eq(kobj));
            before != members.len()
        };
        if removed {
            self.inner.kobj.put();
        }
    }

    /// Look a member up by name.
    ///
    /// The returned node carries a logical reference that the caller must drop with
    /// [KObject::put].
    pub fn find(&self, name: &str) -> Option<KObject> {
        let members = self.inner.members.lock();
        members
            .iter()
            .find(|member| member.name().as_deref() == Some(name))
            .and_then(KObject::get)
    }

    /// Snapshot of the current members.
    pub fn members(&self) -> Vec<KObject> {
        self.inner.members.lock().clone()
    }

    pub fn contains(&self, kobj: &KObject) -> bool {
        self.inner
            .members
            .lock()
            .iter()
            .any(|member| member.ptr_eq(kobj))
    }

    pub fn len(&self) -> usize {
        self.inner.members.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PartialEq for KSet {
    fn eq(&self, other: &Self) -> bool {
        self.inner.ptr_eq(&other.inner)
    }
}

impl Eq for KSet {}

impl core::fmt::Debug for KSet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KSet")
            .field("kobj", &self.inner.kobj)
            .field("members", &self.len())
            .finish()
    }
}

impl DeviceModel {
    /// Register a container and announce it with an `add` event.
    pub fn kset_register(&self, kset: &KSet, parent: Option<&KObject>) -> Result<()> {
        self.kobject_add(kset.kobj(), parent, None)?;
        if let Err(err) = self.kobject_uevent(kset.kobj(), Action::Add) {
            debug_ex!("kset '{}': add event dropped: {}", kset.kobj().display_name(), err);
        }
        Ok(())
    }

    /// Unregister a container and drop the registration reference.
    pub fn kset_unregister(&self, kset: &KSet) {
        let kobj = kset.kobj();
        if kobj.is_registered() {
            if let Err(err) = self.kobject_uevent(kobj, Action::Remove) {
                debug_ex!("kset '{}': remove event dropped: {}", kobj.display_name(), err);
            }
            if let Err(err) = self.kobject_del(kobj) {
                warn!("kset '{}': unregister failed: {}", kobj.display_name(), err);
            }
        }
        kobj.put();
    }

    pub fn kset_create_and_add(
        &self,
        name: &str,
        ops: Option<Arc<dyn KSetUeventOps>>,
        parent: Option<&KObject>,
    ) -> Result<KSet> {
        let kset = KSet::new(name, ops);
        if let Err(err) = self.kset_register(&kset, parent) {
            warn!("kset_create_and_add: kset_register error: {}", err);
            kset.kobj().put();
            return Err(err);
        }
        Ok(kset)
    }
}
