use crate::error::{Error, Result};
use log::warn;
use std::fmt;

/// Bounded `KEY=value` list handed to listeners and to the helper program.
///
/// Both limits count the terminating separator of each variable, so a buffer of `n` bytes holds
/// variables whose lengths plus one sum to at most `n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UeventEnv {
    vars: Vec<String>,
    buflen: usize,
    max_vars: usize,
    max_len: usize,
}

/// Append a formatted variable to a [UeventEnv].
///
/// `add_uevent_var!(env, "MAJOR={}", major)?;`
#[macro_export]
macro_rules! add_uevent_var {
    ($env:expr, $($arg:tt)+) => {
        $env.add_var(format_args!($($arg)+))
    };
}

impl UeventEnv {
    pub fn new(max_vars: usize, max_len: usize) -> UeventEnv {
        UeventEnv {
            vars: Vec::with_capacity(max_vars),
            buflen: 0,
            max_vars,
            max_len,
        }
    }

    /// Append one `KEY=value` variable.
    ///
    /// Fails with [Error::EnvOverflow] if either bound would be exceeded and with
    /// [Error::InvalidArgument] if the text contains a NUL or a newline. The environment is left
    /// unchanged on failure.
    pub fn add_var(&mut self, args: fmt::Arguments<'_>) -> Result<()> {
        if self.vars.len() >= self.max_vars {
            warn!("add_uevent_var: too many keys");
            return Err(Error::EnvOverflow);
        }
        let var = fmt::format(args);
        if var.contains(['\0', '\n']) {
            return Err(Error::InvalidArgument);
        }
        if self.buflen + var.len() + 1 > self.max_len {
            warn!("add_uevent_var: buffer size too small");
            return Err(Error::EnvOverflow);
        }
        self.buflen += var.len() + 1;
        self.vars.push(var);
        Ok(())
    }

    pub fn add(&mut self, key: &str, value: impl fmt::Display) -> Result<()> {
        self.add_var(format_args!("{}={}", key, value))
    }

    pub fn vars(&self) -> &[String] {
        &self.vars
    }

    /// Value of the first variable named `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.iter().find_map(|var| {
            let (name, value) = var.split_once('=')?;
            (name == key).then_some(value)
        })
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Bytes used, separators included.
    pub fn buflen(&self) -> usize {
        self.buflen
    }

    pub(crate) fn into_vars(self) -> Vec<String> {
        self.vars
    }
}
