//! Hotplug event emission.
//!
//! An event is raised for a node, routed through the first container found up the node's parent
//! chain, and delivered two ways: broadcast to every in-process [UeventListener], and handed to
//! the configured helper program.
//!
//! Dispatch for one event:
//! 1. Find the owning container; none means [Error::NoContainer].
//! 2. Drop silently if the node is suppressed, the container's filter rejects it, or no
//!    subsystem name can be derived.
//! 3. Build `ACTION`, `DEVPATH`, `SUBSYSTEM`, caller extras, then the container's own variables.
//! 4. Record `add`/`remove` on the node.
//! 5. Under the sequence lock: assign `SEQNUM`, broadcast, queue the helper launch.
//!
//! Holding the sequence lock across steps in 5 keeps every listener's view in `SEQNUM` order.
//! Neither the broadcast nor the helper hand-off blocks, so the lock is held only briefly.
mod broadcast;
mod env;
mod helper;

pub use broadcast::{UeventBroadcast, UeventListener, UeventMessage};
pub use env::UeventEnv;
pub use helper::{HelperRequest, HelperWait, HelperWorker};

use crate::{
    config::Config,
    debug_ex,
    error::{Error, Result},
    kobject::KObject,
    model::DeviceModel,
};
use core::{fmt, str::FromStr};
use helper::HELPER_ENV;
use log::warn;
use spin::{Mutex, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Add,
    Remove,
    Change,
    Move,
    Online,
    Offline,
}

impl Action {
    pub const ALL: [Action; 6] = [
        Action::Add,
        Action::Remove,
        Action::Change,
        Action::Move,
        Action::Online,
        Action::Offline,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Action::Add => "add",
            Action::Remove => "remove",
            Action::Change => "change",
            Action::Move => "move",
            Action::Online => "online",
            Action::Offline => "offline",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = Error;

    /// Parse an action word. A single trailing newline or NUL is accepted.
    fn from_str(s: &str) -> Result<Action> {
        let word = s
            .strip_suffix('\n')
            .or_else(|| s.strip_suffix('\0'))
            .unwrap_or(s);
        Action::ALL
            .into_iter()
            .find(|action| action.as_str() == word)
            .ok_or(Error::InvalidArgument)
    }
}

pub struct UeventEmitter {
    /// Last assigned sequence number. Also the lock that orders dispatch.
    seqnum: Mutex<u64>,
    broadcast: UeventBroadcast,
    helper_path: RwLock<Option<String>>,
    helper_wait: HelperWait,
    worker: Mutex<Option<HelperWorker>>,
    num_envp: usize,
    buffer_size: usize,
    helper_path_len: usize,
}

impl UeventEmitter {
    pub fn new(config: &Config) -> UeventEmitter {
        UeventEmitter {
            seqnum: Mutex::new(0),
            broadcast: UeventBroadcast::new(config.listener_backlog),
            helper_path: RwLock::new(None),
            helper_wait: config.helper_wait,
            worker: Mutex::new(None),
            num_envp: config.uevent_num_envp,
            buffer_size: config.uevent_buffer_size,
            helper_path_len: config.uevent_helper_path_len,
        }
    }

    /// Last sequence number handed out.
    pub fn seqnum(&self) -> u64 {
        *self.seqnum.lock()
    }

    pub fn subscribe(&self) -> UeventListener {
        self.broadcast.subscribe()
    }

    pub fn broadcast(&self) -> &UeventBroadcast {
        &self.broadcast
    }

    /// An empty environment with this emitter's limits.
    pub fn new_env(&self) -> UeventEnv {
        UeventEnv::new(self.num_envp, self.buffer_size)
    }

    pub fn helper(&self) -> Option<String> {
        self.helper_path.read().clone()
    }

    /// Set or clear the helper program.
    pub fn set_helper(&self, path: Option<&str>) -> Result<()> {
        let path = match path.map(str::trim) {
            None | Some("") => None,
            Some(path) if path.len() >= self.helper_path_len => {
                return Err(Error::InvalidArgument);
            }
            Some(path) => Some(path.to_string()),
        };
        *self.helper_path.write() = path;
        Ok(())
    }

    pub fn emit(&self, kobj: &KObject, action: Action, extra: &[&str]) -> Result<()> {
        debug_ex!(
            "kobject: '{}' ({}): kobject_uevent_env",
            kobj.display_name(),
            kobj.id()
        );

        let Some((_top, kset)) = kobj.owning_kset() else {
            debug_ex!(
                "kobject: '{}' ({}): attempted to send uevent without kset!",
                kobj.display_name(),
                kobj.id()
            );
            return Err(Error::NoContainer);
        };
        let ops = kset.ops();

        if kobj.flags().contains(crate::kobject::UeventFlags::SUPPRESS) {
            debug_ex!(
                "kobject: '{}' ({}): uevent_suppress caused the event to drop!",
                kobj.display_name(),
                kobj.id()
            );
            return Ok(());
        }
        if let Some(ops) = &ops
            && !ops.filter(&kset, kobj)
        {
            debug_ex!(
                "kobject: '{}' ({}): filter function caused the event to drop!",
                kobj.display_name(),
                kobj.id()
            );
            return Ok(());
        }
        let subsystem = match &ops {
            Some(ops) => ops.name(&kset, kobj),
            None => kset.name(),
        };
        let Some(subsystem) = subsystem.filter(|name| !name.is_empty()) else {
            debug_ex!(
                "kobject: '{}' ({}): unset subsystem caused the event to drop!",
                kobj.display_name(),
                kobj.id()
            );
            return Ok(());
        };

        let devpath = kobj.compose_path().ok_or(Error::NotFound)?;
        let mut env = self.new_env();
        env.add("ACTION", action)?;
        env.add("DEVPATH", &devpath)?;
        env.add("SUBSYSTEM", &subsystem)?;
        for var in extra {
            env.add_var(format_args!("{}", var))?;
        }
        if let Some(ops) = &ops
            && let Err(err) = ops.uevent(&kset, kobj, &mut env)
        {
            debug_ex!(
                "kobject: '{}' ({}): uevent() returned {}",
                kobj.display_name(),
                kobj.id(),
                err
            );
            return Err(err);
        }
        kobj.mark_sent(action);

        let outcome = {
            let mut seqnum = self.seqnum.lock();
            *seqnum += 1;
            env.add("SEQNUM", *seqnum)?;

            self.broadcast.send(&UeventMessage {
                action,
                devpath,
                seqnum: *seqnum,
                env: env.vars().to_vec(),
            });

            match self.helper() {
                Some(program) => {
                    for var in HELPER_ENV {
                        env.add_var(format_args!("{}", var))?;
                    }
                    let request = HelperRequest {
                        program,
                        subsystem,
                        env: env.into_vars(),
                    };
                    self.submit(request)?
                }
                None => None,
            }
        };

        match outcome {
            Some(outcome) => helper::wait_exec(outcome),
            None => Ok(()),
        }
    }

    fn submit(
        &self,
        request: HelperRequest,
    ) -> Result<Option<std::sync::mpsc::Receiver<core::result::Result<(), std::io::ErrorKind>>>>
    {
        let mut guard = self.worker.lock();
        if guard.is_none() {
            let worker = HelperWorker::start().map_err(|err| {
                warn!("uevent: cannot start helper worker: {}", err);
                Error::HelperUnavailable
            })?;
            *guard = Some(worker);
        }
        guard
            .as_ref()
            .ok_or(Error::HelperUnavailable)?
            .submit(request, self.helper_wait)
    }

    /// Stop the helper worker, waiting for queued launches.
    pub fn shutdown(&self) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            worker.shutdown();
        }
    }
}

impl DeviceModel {
    pub fn kobject_uevent(&self, kobj: &KObject, action: Action) -> Result<()> {
        self.uevent().emit(kobj, action, &[])
    }

    /// Emit with extra `KEY=value` variables placed after the standard ones.
    pub fn kobject_uevent_env(&self, kobj: &KObject, action: Action, extra: &[&str]) -> Result<()> {
        self.uevent().emit(kobj, action, extra)
    }

    /// Handle a write to a node's `uevent` attribute.
    ///
    /// An unknown action word falls back to `add`. Returns the number of bytes consumed.
    pub fn uevent_store(&self, kobj: &KObject, buf: &str) -> Result<usize> {
        let action = buf.parse().unwrap_or_else(|_| {
            warn!(
                "{}: uevent: unsupported action-string; this will be ignored in a future version",
                kobj.display_name()
            );
            Action::Add
        });
        self.kobject_uevent(kobj, action)?;
        Ok(buf.len())
    }

    pub fn subscribe(&self) -> UeventListener {
        self.uevent().subscribe()
    }

    pub fn set_uevent_helper(&self, path: Option<&str>) -> Result<()> {
        self.uevent().set_helper(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        kobject::{DynamicKType, KSet, KSetUeventOps},
        test_utils::model_with_fs,
    };
    use std::sync::Arc;

    #[test]
    fn action_words() {
        for action in Action::ALL {
            assert_eq!(action.as_str().parse::<Action>(), Ok(action));
        }
        assert_eq!("change\n".parse::<Action>(), Ok(Action::Change));
        assert_eq!("online\0".parse::<Action>(), Ok(Action::Online));
        assert_eq!("add\n\n".parse::<Action>(), Err(Error::InvalidArgument));
        assert_eq!("bogus".parse::<Action>(), Err(Error::InvalidArgument));
        assert_eq!(Action::Offline.to_string(), "offline");
    }

    #[test]
    fn no_container_no_event() {
        let (model, _fs) = model_with_fs();
        let listener = model.subscribe();
        let lone = model.kobject_create_and_add("lone", None).unwrap();
        assert_eq!(
            model.kobject_uevent(&lone, Action::Change),
            Err(Error::NoContainer)
        );
        assert!(listener.try_recv().is_none());
    }

    struct Picky;

    impl KSetUeventOps for Picky {
        fn filter(&self, _kset: &KSet, kobj: &KObject) -> bool {
            kobj.name().as_deref() != Some("hidden")
        }

        fn name(&self, _kset: &KSet, kobj: &KObject) -> Option<String> {
            (kobj.name().as_deref() != Some("nameless")).then(|| String::from("picky"))
        }

        fn uevent(&self, _kset: &KSet, kobj: &KObject, env: &mut UeventEnv) -> Result<()> {
            if kobj.name().as_deref() == Some("broken") {
                return Err(Error::Callback(-22));
            }
            env.add("PICKY", 1)
        }
    }

    fn member(model: &DeviceModel, kset: &KSet, name: &str) -> KObject {
        let kobj = KObject::create(Arc::new(DynamicKType), Some(name));
        kobj.set_kset(Some(kset)).unwrap();
        model.kobject_add(&kobj, None, None).unwrap();
        kobj
    }

    #[test]
    fn container_hooks() {
        let (model, _fs) = model_with_fs();
        let kset = model
            .kset_create_and_add("picky", Some(Arc::new(Picky)), None)
            .unwrap();
        let listener = model.subscribe();

        for name in ["hidden", "nameless"] {
            let kobj = member(&model, &kset, name);
            assert_eq!(model.kobject_uevent(&kobj, Action::Add), Ok(()));
        }
        assert!(listener.try_recv().is_none());

        let broken = member(&model, &kset, "broken");
        assert_eq!(
            model.kobject_uevent(&broken, Action::Add),
            Err(Error::Callback(-22))
        );
        assert!(!broken.flags().contains(crate::kobject::UeventFlags::ADD_SENT));

        let fine = member(&model, &kset, "fine");
        model
            .kobject_uevent_env(&fine, Action::Change, &["REASON=test"])
            .unwrap();
        let msg = listener.try_recv().unwrap();
        assert_eq!(msg.action, Action::Change);
        assert_eq!(
            msg.env[..4],
            [
                "ACTION=change",
                "DEVPATH=/picky/fine",
                "SUBSYSTEM=picky",
                "REASON=test"
            ]
        );
        assert_eq!(msg.get("PICKY"), Some("1"));
        assert_eq!(msg.get("SEQNUM"), Some(msg.seqnum.to_string().as_str()));
    }

    #[test]
    fn suppressed_node_is_silent() {
        let (model, _fs) = model_with_fs();
        let kset = model.kset_create_and_add("quiet", None, None).unwrap();
        let listener = model.subscribe();
        let kobj = member(&model, &kset, "mute");
        kobj.set_uevent_suppress(true);
        let before = model.uevent().seqnum();
        model.kobject_uevent(&kobj, Action::Add).unwrap();
        assert_eq!(model.uevent().seqnum(), before);
        assert!(listener.try_recv().is_none());
    }

    #[test]
    fn tiny_environment_overflows() {
        let (model, _fs) = crate::test_utils::model_with_config(
            Config::default().with_env_limits(2, 2048),
        );
        let kset = model.kset_create_and_add("tiny", None, None).unwrap();
        let kobj = member(&model, &kset, "x");
        assert_eq!(
            model.kobject_uevent(&kobj, Action::Add),
            Err(Error::EnvOverflow)
        );
    }

    #[test]
    fn store_falls_back_to_add() {
        let (model, _fs) = model_with_fs();
        let kset = model.kset_create_and_add("store", None, None).unwrap();
        let kobj = member(&model, &kset, "node");
        let listener = model.subscribe();
        assert_eq!(model.uevent_store(&kobj, "online\n"), Ok(7));
        assert_eq!(model.uevent_store(&kobj, "jump"), Ok(4));
        let actions: Vec<_> = listener.drain().into_iter().map(|m| m.action).collect();
        assert_eq!(actions, [Action::Online, Action::Add]);
    }

    #[test]
    fn helper_path_is_bounded() {
        let (model, _fs) = model_with_fs();
        let long = "/".repeat(::config::UEVENT_HELPER_PATH_LEN);
        assert_eq!(model.set_uevent_helper(Some(&long)), Err(Error::InvalidArgument));
        model.set_uevent_helper(Some("/sbin/mdev\n")).unwrap();
        assert_eq!(model.uevent().helper().as_deref(), Some("/sbin/mdev"));
        model.set_uevent_helper(Some("")).unwrap();
        assert_eq!(model.uevent().helper(), None);
    }
}
