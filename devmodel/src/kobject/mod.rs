//! Reference-counted registry nodes.
//!
//! A [KObject] is the generic node every registered object embeds: it carries a name, a parent
//! link, an optional containing [KSet], a shared [KType] and a logical reference count.
//!
//! Lifecycle:
//! - `Uninitialized -> Initialized` via [KObject::init], which sets the count to one.
//! - `Initialized -> Registered` via [DeviceModel::kobject_add]; the node's path is published
//!   before it becomes visible in its container.
//! - `Registered -> Initialized` via [DeviceModel::kobject_del].
//! - `* -> Destroying` when [KObject::put] drops the count to zero. Teardown then synthesizes a
//!   `remove` event if an `add` was sent without one, unregisters the node if needed, and finally
//!   calls [KType::release]. Teardown runs once per node.
//!
//! The logical count is separate from Rust ownership: a [KObject] value is a cheap handle, and
//! cloning it does not take a logical reference. Use [KObject::get] and [KObject::put] to pin a
//! node's registration.
//!
//! Locking: every node has one short-lived state lock. It is never held across a call into the
//! path store, the event emitter or a user callback.
mod kref;
mod kset;
mod ktype;

pub use kref::{Kref, KrefPut};
pub use kset::{KSet, KSetUeventOps};
pub use ktype::{Attribute, DynamicKType, KType};

use crate::{
    debug_ex,
    error::{Error, Result},
    model::{DeviceModel, ModelInner},
    sysfs::{FsError, join_path, split_path},
    uevent::Action,
};
use bitflags::bitflags;
use core::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};
use log::{error, warn};
use spin::Mutex;
use std::sync::Arc;
use utils::handle::{Handle, HandleRef};

bitflags! {
    /// Event bookkeeping of one node.
    pub struct UeventFlags: u8 {
        const ADD_SENT = 1 << 0;
        const REMOVE_SENT = 1 << 1;
        /// Events for this node are dropped silently.
        const SUPPRESS = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KObjectState {
    Uninitialized,
    Initialized,
    Registered,
    Destroying,
}

struct State {
    name: Option<String>,
    parent: Option<KObject>,
    kset: Option<KSet>,
    ktype: Option<Arc<dyn KType>>,
    lifecycle: KObjectState,
    flags: UeventFlags,
    model: HandleRef<ModelInner>,
}

pub struct KObjectInner {
    id: u64,
    kref: Kref,
    state: Mutex<State>,
}

#[derive(Clone)]
pub struct KObject {
    inner: Handle<KObjectInner>,
}

/// Non-owning reference to a [KObject].
#[derive(Clone, Debug)]
pub struct KObjectRef {
    inner: HandleRef<KObjectInner>,
}

impl KObjectRef {
    pub fn upgrade(&self) -> Option<KObject> {
        self.inner.get_handle().map(|inner| KObject { inner })
    }
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Path separators are not allowed inside a name.
fn sanitize_name(name: &str) -> String {
    name.replace('/', "!")
}

impl Default for KObject {
    fn default() -> Self {
        Self::new()
    }
}

impl KObject {
    /// A blank, uninitialized node.
    pub fn new() -> KObject {
        KObject {
            inner: Handle::from(KObjectInner {
                id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                kref: Kref::new(),
                state: Mutex::new(State {
                    name: None,
                    parent: None,
                    kset: None,
                    ktype: None,
                    lifecycle: KObjectState::Uninitialized,
                    flags: UeventFlags::empty(),
                    model: HandleRef::dangling(),
                }),
            }),
        }
    }

    /// A node that is already initialized with `ktype` and, if given, named.
    pub fn create(ktype: Arc<dyn KType>, name: Option<&str>) -> KObject {
        let kobj = Self::new();
        {
            let mut state = kobj.inner.state.lock();
            state.ktype = Some(ktype);
            state.name = name.map(sanitize_name);
            state.lifecycle = KObjectState::Initialized;
        }
        kobj.inner.kref.init();
        kobj
    }

    /// Process-unique id of this node.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn ptr_eq(&self, other: &KObject) -> bool {
        self.inner.ptr_eq(&other.inner)
    }

    pub fn downgrade(&self) -> KObjectRef {
        KObjectRef {
            inner: self.inner.create_ref(),
        }
    }

    /// Bind the node to its type and set the count to one.
    ///
    /// Fails with [Error::InvalidState] unless the node is still uninitialized.
    pub fn init(&self, ktype: Arc<dyn KType>) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if state.lifecycle != KObjectState::Uninitialized {
                error!(
                    "kobject ({}): tried to init an initialized object, something is seriously wrong.",
                    self.id()
                );
                return Err(Error::InvalidState);
            }
            state.ktype = Some(ktype);
            state.flags = UeventFlags::empty();
            state.lifecycle = KObjectState::Initialized;
        }
        self.inner.kref.init();
        Ok(())
    }

    /// Set the node's name. `/` is replaced by `!`.
    ///
    /// Passing `None` keeps an existing name and fails with [Error::InvalidArgument] if there is
    /// none.
    pub fn set_name(&self, name: Option<&str>) -> Result<()> {
        let mut state = self.inner.state.lock();
        match name {
            None if state.name.as_deref().is_some_and(|name| !name.is_empty()) => Ok(()),
            None => Err(Error::InvalidArgument),
            Some("") => Err(Error::InvalidArgument),
            Some(name) => {
                state.name = Some(sanitize_name(name));
                Ok(())
            }
        }
    }

    pub fn name(&self) -> Option<String> {
        self.inner.state.lock().name.clone()
    }

    pub fn state(&self) -> KObjectState {
        self.inner.state.lock().lifecycle
    }

    pub fn is_registered(&self) -> bool {
        self.state() == KObjectState::Registered
    }

    pub fn flags(&self) -> UeventFlags {
        self.inner.state.lock().flags
    }

    pub fn set_uevent_suppress(&self, suppress: bool) {
        self.inner
            .state
            .lock()
            .flags
            .set(UeventFlags::SUPPRESS, suppress);
    }

    pub(crate) fn mark_sent(&self, action: Action) {
        let mut state = self.inner.state.lock();
        match action {
            Action::Add => {
                state.flags.insert(UeventFlags::ADD_SENT);
                state.flags.remove(UeventFlags::REMOVE_SENT);
            }
            Action::Remove => state.flags.insert(UeventFlags::REMOVE_SENT),
            _ => {}
        }
    }

    pub fn parent(&self) -> Option<KObject> {
        self.inner.state.lock().parent.clone()
    }

    pub fn kset(&self) -> Option<KSet> {
        self.inner.state.lock().kset.clone()
    }

    /// Choose the container the node joins when it is added.
    pub fn set_kset(&self, kset: Option<&KSet>) -> Result<()> {
        let mut state = self.inner.state.lock();
        if state.lifecycle == KObjectState::Registered {
            return Err(Error::InvalidState);
        }
        state.kset = kset.cloned();
        Ok(())
    }

    pub fn ktype(&self) -> Option<Arc<dyn KType>> {
        self.inner.state.lock().ktype.clone()
    }

    /// Current logical reference count.
    pub fn refcount(&self) -> usize {
        self.inner.kref.read()
    }

    /// Take a logical reference. Returns `None` once the node started tearing down.
    pub fn get(&self) -> Option<KObject> {
        self.inner.kref.get_unless_zero().then(|| self.clone())
    }

    /// Drop a logical reference, tearing the node down if it was the last one.
    pub fn put(&self) {
        match self.inner.kref.put() {
            KrefPut::Alive => {}
            KrefPut::Released => self.cleanup(),
            KrefPut::Underflow => error!(
                "kobject: '{}' ({}): put on a released object",
                self.display_name(),
                self.id()
            ),
        }
    }

    /// Full path of the node. `None` unless the node is registered.
    pub fn path(&self) -> Option<String> {
        if !self.is_registered() {
            return None;
        }
        self.compose_path()
    }

    /// Path from the current names along the parent chain, whatever the node's state.
    pub(crate) fn compose_path(&self) -> Option<String> {
        let mut names = Vec::new();
        let mut cursor = Some(self.clone());
        while let Some(node) = cursor {
            let state = node.inner.state.lock();
            names.push(state.name.clone()?);
            cursor = state.parent.clone();
        }
        let mut path = String::new();
        for name in names.iter().rev() {
            path.push('/');
            path.push_str(name);
        }
        Some(path)
    }

    /// First node up the parent chain that belongs to a container, with that container.
    pub(crate) fn owning_kset(&self) -> Option<(KObject, KSet)> {
        let mut top = self.clone();
        loop {
            let (kset, parent) = {
                let state = top.inner.state.lock();
                (state.kset.clone(), state.parent.clone())
            };
            match (kset, parent) {
                (Some(kset), _) => return Some((top, kset)),
                (None, Some(parent)) => top = parent,
                (None, None) => return None,
            }
        }
    }

    pub(crate) fn model(&self) -> Option<DeviceModel> {
        self.inner
            .state
            .lock()
            .model
            .get_handle()
            .map(DeviceModel::from_handle)
    }

    pub(crate) fn display_name(&self) -> String {
        self.name().unwrap_or_else(|| String::from("(null)"))
    }

    fn find_attr(&self, name: &str) -> Result<(Arc<dyn KType>, Attribute)> {
        let ktype = self.ktype().ok_or(Error::InvalidState)?;
        let attr = ktype
            .default_attrs()
            .iter()
            .find(|attr| attr.name == name)
            .copied()
            .ok_or(Error::NotFound)?;
        Ok((ktype, attr))
    }

    pub fn show_attr(&self, name: &str) -> Result<String> {
        let (ktype, attr) = self.find_attr(name)?;
        if !attr.readable() {
            return Err(Error::InvalidArgument);
        }
        ktype.show(self, &attr)
    }

    pub fn store_attr(&self, name: &str, buf: &str) -> Result<usize> {
        let (ktype, attr) = self.find_attr(name)?;
        if !attr.writable() {
            return Err(Error::InvalidArgument);
        }
        ktype.store(self, &attr, buf)
    }

    /// Unpublish, leave the container and drop the parent reference.
    pub(crate) fn unlink(&self, model: Option<&DeviceModel>) {
        if let Some(model) = model
            && let Some(path) = self.compose_path()
            && let Err(err) = model.fs().unpublish(&path)
        {
            warn!("kobject: '{}': unpublish failed: {}", path, err);
        }
        if let Some(kset) = self.kset() {
            kset.leave(self);
        }
        let parent = {
            let mut state = self.inner.state.lock();
            if state.lifecycle == KObjectState::Registered {
                state.lifecycle = KObjectState::Initialized;
            }
            state.parent.take()
        };
        if let Some(parent) = parent {
            parent.put();
        }
    }

    fn cleanup(&self) {
        let (lifecycle, flags, model, ktype) = {
            let mut state = self.inner.state.lock();
            let lifecycle = state.lifecycle;
            state.lifecycle = KObjectState::Destroying;
            (
                lifecycle,
                state.flags,
                state.model.get_handle().map(DeviceModel::from_handle),
                state.ktype.clone(),
            )
        };
        debug_ex!(
            "kobject: '{}' ({}): cleaning up",
            self.display_name(),
            self.id()
        );

        if flags.contains(UeventFlags::ADD_SENT)
            && !flags.contains(UeventFlags::REMOVE_SENT)
            && let Some(model) = &model
        {
            debug_ex!(
                "kobject: '{}' ({}): auto cleanup 'remove' event",
                self.display_name(),
                self.id()
            );
            if let Err(err) = model.kobject_uevent(self, Action::Remove) {
                debug_ex!("kobject: '{}': remove event dropped: {}", self.display_name(), err);
            }
        }
        if lifecycle == KObjectState::Registered {
            debug_ex!(
                "kobject: '{}' ({}): auto cleanup kobject_del",
                self.display_name(),
                self.id()
            );
            self.unlink(model.as_ref());
        }

        match ktype {
            Some(ktype) => ktype.release(self),
            None => error!(
                "kobject: '{}' ({}): does not have a release() function, it is broken and must be fixed.",
                self.display_name(),
                self.id()
            ),
        }
        self.inner.state.lock().name = None;
    }
}

impl PartialEq for KObject {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for KObject {}

impl fmt::Debug for KObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("KObject")
            .field("id", &self.inner.id)
            .field("name", &state.name)
            .field("state", &state.lifecycle)
            .field("refcount", &self.inner.kref.read())
            .finish()
    }
}

// region: Registration

impl DeviceModel {
    /// Register `kobj` below `parent`, or below its container's node if `parent` is `None`.
    ///
    /// Order of effects: parent reference taken, path published, node marked registered, node
    /// inserted into its container. On failure every completed step is undone.
    pub fn kobject_add(
        &self,
        kobj: &KObject,
        parent: Option<&KObject>,
        name: Option<&str>,
    ) -> Result<()> {
        let state = kobj.state();
        if state != KObjectState::Initialized {
            error!(
                "kobject '{}' ({}): tried to add in state {:?}",
                kobj.display_name(),
                kobj.id(),
                state
            );
            return Err(Error::InvalidState);
        }
        if let Err(err) = kobj.set_name(name) {
            error!(
                "kobject: ({}): attempted to be registered with empty name!",
                kobj.id()
            );
            return Err(err);
        }

        let kset = kobj.kset();
        let parent = match parent {
            Some(parent) => Some(parent.clone()),
            None => kset.as_ref().map(|kset| kset.kobj().clone()),
        };
        let parent = match parent {
            Some(parent) => Some(parent.get().ok_or(Error::InvalidState)?),
            None => None,
        };
        {
            let mut state = kobj.inner.state.lock();
            state.parent = parent.clone();
            state.model = self.downgrade();
        }
        debug_ex!(
            "kobject: '{}' ({}): parent: '{}', set: '{}'",
            kobj.display_name(),
            kobj.id(),
            parent
                .as_ref()
                .map_or_else(|| String::from("<NULL>"), KObject::display_name),
            kset.as_ref()
                .and_then(KSet::name)
                .unwrap_or_else(|| String::from("<NULL>"))
        );

        if let Err(err) = self.publish(kobj, kset.as_ref()) {
            let parent = kobj.inner.state.lock().parent.take();
            if let Some(parent) = parent {
                parent.put();
            }
            return Err(err);
        }
        Ok(())
    }

    fn publish(&self, kobj: &KObject, kset: Option<&KSet>) -> Result<()> {
        let path = kobj.compose_path().ok_or(Error::InvalidArgument)?;
        if let Err(err) = self.fs().publish(&path, kobj) {
            return Err(match err {
                FsError::AlreadyExists(path) => {
                    error!(
                        "kobject_add failed for {} with -EEXIST, don't try to register things with the same name in the same directory.",
                        path
                    );
                    Error::NameConflict(path)
                }
                other => {
                    error!("kobject_add failed for {} ({})", path, other);
                    Error::PathCreateFailed(other)
                }
            });
        }
        kobj.inner.state.lock().lifecycle = KObjectState::Registered;

        if let Some(kset) = kset
            && let Err(err) = kset.join(kobj)
        {
            kobj.inner.state.lock().lifecycle = KObjectState::Initialized;
            if let Err(fs_err) = self.fs().unpublish(&path) {
                warn!("kobject: '{}': unpublish failed: {}", path, fs_err);
            }
            return Err(err);
        }
        Ok(())
    }

    pub fn kobject_init_and_add(
        &self,
        kobj: &KObject,
        ktype: Arc<dyn KType>,
        parent: Option<&KObject>,
        name: &str,
    ) -> Result<()> {
        kobj.init(ktype)?;
        self.kobject_add(kobj, parent, Some(name))
    }

    /// Create and register a bare node with no backing object.
    pub fn kobject_create_and_add(&self, name: &str, parent: Option<&KObject>) -> Result<KObject> {
        let kobj = KObject::create(Arc::new(DynamicKType), None);
        if let Err(err) = self.kobject_add(&kobj, parent, Some(name)) {
            warn!("kobject_create_and_add: kobject_add error: {}", err);
            kobj.put();
            return Err(err);
        }
        Ok(kobj)
    }

    /// Undo [kobject_add](Self::kobject_add). The node returns to `Initialized` and may be added
    /// again.
    pub fn kobject_del(&self, kobj: &KObject) -> Result<()> {
        if !kobj.is_registered() {
            return Err(Error::InvalidState);
        }
        kobj.unlink(Some(self));
        debug_ex!(
            "kobject: '{}' ({}): deleted",
            kobj.display_name(),
            kobj.id()
        );
        Ok(())
    }

    /// Give a registered node a new name in place and announce it with a `move` event.
    pub fn kobject_rename(&self, kobj: &KObject, new_name: &str) -> Result<()> {
        if new_name.is_empty() {
            return Err(Error::InvalidArgument);
        }
        if !kobj.is_registered() {
            return Err(Error::InvalidState);
        }
        let new_name = sanitize_name(new_name);
        let old_path = kobj.compose_path().ok_or(Error::InvalidState)?;
        let dir = split_path(&old_path).map_or("", |(dir, _)| dir);
        let new_path = join_path(dir, &new_name);

        let old_name = kobj.display_name();
        self.fs().rename_entry(&old_path, &new_path)?;
        kobj.inner.state.lock().name = Some(new_name);
        self.refresh_device_links(kobj, &old_name);
        self.announce_move(kobj, &old_path);
        Ok(())
    }

    /// Re-parent a registered node, keeping its name, and announce it with a `move` event.
    ///
    /// With no `new_parent` the node moves below its container's node, or to the root.
    pub fn kobject_move(&self, kobj: &KObject, new_parent: Option<&KObject>) -> Result<()> {
        if !kobj.is_registered() {
            return Err(Error::InvalidState);
        }
        let target = match new_parent {
            Some(parent) => Some(parent.clone()),
            None => kobj.kset().map(|kset| kset.kobj().clone()),
        };
        let target = match target {
            Some(parent) => Some(parent.get().ok_or(Error::InvalidState)?),
            None => None,
        };

        let result = (|| -> Result<String> {
            let old_path = kobj.compose_path().ok_or(Error::InvalidState)?;
            let dir = match &target {
                Some(parent) => parent.path().ok_or(Error::NotRegistered)?,
                None => String::new(),
            };
            let name = kobj.name().ok_or(Error::InvalidState)?;
            self.fs()
                .rename_entry(&old_path, &join_path(&dir, &name))?;
            Ok(old_path)
        })();
        let old_path = match result {
            Ok(old_path) => old_path,
            Err(err) => {
                if let Some(target) = target {
                    target.put();
                }
                return Err(err);
            }
        };

        let old_parent = core::mem::replace(&mut kobj.inner.state.lock().parent, target);
        self.refresh_device_links(kobj, &kobj.display_name());
        self.announce_move(kobj, &old_path);
        if let Some(old_parent) = old_parent {
            old_parent.put();
        }
        Ok(())
    }

    fn announce_move(&self, kobj: &KObject, old_path: &str) {
        let devpath_old = format!("DEVPATH_OLD={}", old_path);
        match self.kobject_uevent_env(kobj, Action::Move, &[&devpath_old]) {
            Ok(()) | Err(Error::NoContainer) => {}
            Err(err) => warn!(
                "kobject: '{}': move event failed: {}",
                kobj.display_name(),
                err
            ),
        }
    }
}

// endregion

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{sysfs::MemFs, test_utils::model_with_fs};
    use std::sync::atomic::AtomicUsize;

    struct CountingType(Arc<AtomicUsize>);

    impl KType for CountingType {
        fn release(&self, _kobj: &KObject) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn init_twice_is_rejected() {
        let kobj = KObject::new();
        assert_eq!(kobj.refcount(), 0);
        assert!(kobj.get().is_none());
        kobj.init(Arc::new(DynamicKType)).unwrap();
        assert_eq!(kobj.refcount(), 1);
        assert_eq!(kobj.init(Arc::new(DynamicKType)), Err(Error::InvalidState));
    }

    #[test]
    fn names_are_sanitized() {
        let kobj = KObject::create(Arc::new(DynamicKType), None);
        assert_eq!(kobj.set_name(None), Err(Error::InvalidArgument));
        kobj.set_name(Some("sda/1")).unwrap();
        assert_eq!(kobj.name().as_deref(), Some("sda!1"));
        // No new name keeps the current one.
        kobj.set_name(None).unwrap();
        assert_eq!(kobj.name().as_deref(), Some("sda!1"));
    }

    #[test]
    fn path_follows_parents() {
        let (model, fs) = model_with_fs();
        let a = model.kobject_create_and_add("a", None).unwrap();
        let b = model.kobject_create_and_add("b", Some(&a)).unwrap();
        assert_eq!(b.path().as_deref(), Some("/a/b"));
        assert!(fs.is_dir("/a/b"));
        // The child pins its parent.
        assert_eq!(a.refcount(), 2);
        b.put();
        assert_eq!(a.refcount(), 1);
        assert!(!fs.exists("/a/b"));
    }

    #[test]
    fn add_requires_initialized_node() {
        let (model, _fs) = model_with_fs();
        let kobj = KObject::new();
        assert_eq!(
            model.kobject_add(&kobj, None, Some("x")),
            Err(Error::InvalidState)
        );
        let unnamed = KObject::create(Arc::new(DynamicKType), None);
        assert_eq!(
            model.kobject_add(&unnamed, None, None),
            Err(Error::InvalidArgument)
        );
    }

    #[test]
    fn duplicate_name_leaves_node_unregistered() {
        let (model, _fs) = model_with_fs();
        let first = model.kobject_create_and_add("dup", None).unwrap();
        let second = KObject::create(Arc::new(DynamicKType), None);
        assert_eq!(
            model.kobject_add(&second, None, Some("dup")),
            Err(Error::NameConflict("/dup".into()))
        );
        assert_eq!(second.state(), KObjectState::Initialized);
        assert!(second.parent().is_none());
        assert!(first.is_registered());
    }

    #[test]
    fn del_then_add_again() {
        let (model, fs) = model_with_fs();
        let kobj = model.kobject_create_and_add("again", None).unwrap();
        model.kobject_del(&kobj).unwrap();
        assert_eq!(kobj.state(), KObjectState::Initialized);
        assert_eq!(kobj.path(), None);
        assert_eq!(model.kobject_del(&kobj), Err(Error::InvalidState));
        model.kobject_add(&kobj, None, None).unwrap();
        assert!(fs.is_dir("/again"));
    }

    #[test]
    fn release_runs_once_after_last_put() {
        let (model, fs) = model_with_fs();
        let released = Arc::new(AtomicUsize::new(0));
        let kobj = KObject::new();
        model
            .kobject_init_and_add(&kobj, Arc::new(CountingType(released.clone())), None, "r")
            .unwrap();
        let extra = kobj.get().unwrap();
        kobj.put();
        assert_eq!(released.load(Ordering::SeqCst), 0);
        extra.put();
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert_eq!(kobj.state(), KObjectState::Destroying);
        assert!(kobj.get().is_none());
        assert!(!fs.exists("/r"));
        // A stray put must not release twice.
        kobj.put();
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rename_and_move() {
        let (model, fs) = model_with_fs();
        let a = model.kobject_create_and_add("a", None).unwrap();
        let b = model.kobject_create_and_add("b", None).unwrap();
        let c = model.kobject_create_and_add("c", Some(&a)).unwrap();

        model.kobject_rename(&c, "d").unwrap();
        assert_eq!(c.path().as_deref(), Some("/a/d"));
        let other = model.kobject_create_and_add("e", Some(&a)).unwrap();
        assert_eq!(
            model.kobject_rename(&other, "d"),
            Err(Error::NameConflict("/a/d".into()))
        );

        model.kobject_move(&c, Some(&b)).unwrap();
        assert_eq!(c.path().as_deref(), Some("/b/d"));
        assert!(c.parent().unwrap().ptr_eq(&b));
        assert_eq!(a.refcount(), 2);
        assert_eq!(b.refcount(), 2);
        assert!(fs.is_dir("/b/d") && !fs.exists("/a/d"));
    }

    #[test]
    fn attributes_dispatch_to_type() {
        struct Echo;
        impl KType for Echo {
            fn default_attrs(&self) -> &[Attribute] {
                const ATTRS: &[Attribute] = &[Attribute::ro("name"), Attribute::wo("poke")];
                ATTRS
            }
            fn show(&self, kobj: &KObject, _attr: &Attribute) -> Result<String> {
                Ok(format!("{}\n", kobj.display_name()))
            }
            fn store(&self, _kobj: &KObject, _attr: &Attribute, buf: &str) -> Result<usize> {
                Ok(buf.len())
            }
        }

        let fs = Arc::new(MemFs::new());
        let model = DeviceModel::new(fs.clone()).unwrap();
        let kobj = KObject::new();
        model
            .kobject_init_and_add(&kobj, Arc::new(Echo), None, "echo")
            .unwrap();
        assert_eq!(fs.read("/echo/name").unwrap(), "echo\n");
        assert_eq!(fs.write("/echo/poke", "1").unwrap(), 1);
        assert_eq!(fs.read("/echo/poke"), Err(Error::InvalidArgument));
        assert_eq!(fs.write("/echo/name", "x"), Err(Error::InvalidArgument));
        assert_eq!(kobj.show_attr("missing"), Err(Error::NotFound));
    }
}
