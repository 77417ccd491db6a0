//! Runtime configuration of a [DeviceModel](crate::DeviceModel).
//!
//! Defaults come from the build profile compiled into the `config` crate (see `config.json` at
//! the workspace root); every field can be overridden per model instance.
use crate::uevent::HelperWait;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Maximum number of `KEY=value` pairs in one event.
    pub uevent_num_envp: usize,
    /// Maximum total bytes of one event environment, separators included.
    pub uevent_buffer_size: usize,
    /// Maximum length of the helper program path.
    pub uevent_helper_path_len: usize,
    /// Program launched for every event, if any.
    pub uevent_helper: Option<String>,
    pub helper_wait: HelperWait,
    /// Messages buffered per listener before new ones are dropped for it.
    pub listener_backlog: usize,
}

impl Default for Config {
    fn default() -> Self {
        let helper = ::config::UEVENT_HELPER_PATH;
        Config {
            uevent_num_envp: ::config::UEVENT_NUM_ENVP,
            uevent_buffer_size: ::config::UEVENT_BUFFER_SIZE,
            uevent_helper_path_len: ::config::UEVENT_HELPER_PATH_LEN,
            uevent_helper: (!helper.is_empty()).then(|| helper.to_string()),
            helper_wait: HelperWait::Exec,
            listener_backlog: ::config::UEVENT_LISTENER_BACKLOG,
        }
    }
}

impl Config {
    pub fn with_helper(mut self, path: &str, wait: HelperWait) -> Self {
        self.uevent_helper = Some(path.to_string());
        self.helper_wait = wait;
        self
    }

    pub fn with_env_limits(mut self, num_envp: usize, buffer_size: usize) -> Self {
        self.uevent_num_envp = num_envp;
        self.uevent_buffer_size = buffer_size;
        self
    }

    pub fn with_listener_backlog(mut self, backlog: usize) -> Self {
        self.listener_backlog = backlog;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_build_profile() {
        let config = Config::default();
        assert_eq!(config.uevent_num_envp, ::config::UEVENT_NUM_ENVP);
        assert_eq!(config.uevent_buffer_size, ::config::UEVENT_BUFFER_SIZE);
        assert_eq!(config.helper_wait, HelperWait::Exec);
    }

    #[test]
    fn builders_override() {
        let config = Config::default()
            .with_helper("/sbin/hotplug", HelperWait::NoWait)
            .with_env_limits(4, 128)
            .with_listener_backlog(2);
        assert_eq!(config.uevent_helper.as_deref(), Some("/sbin/hotplug"));
        assert_eq!(config.helper_wait, HelperWait::NoWait);
        assert_eq!((config.uevent_num_envp, config.uevent_buffer_size), (4, 128));
        assert_eq!(config.listener_backlog, 2);
    }
}
