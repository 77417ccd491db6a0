use super::KObject;
use crate::{
    debug_ex,
    error::{Error, Result},
};

/// A file published in every directory of a given node type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attribute {
    pub name: &'static str,
    /// Unix permission bits. Any read bit makes the attribute showable, any write bit storable.
    pub mode: u16,
}

impl Attribute {
    pub const fn ro(name: &'static str) -> Attribute {
        Attribute { name, mode: 0o444 }
    }

    pub const fn rw(name: &'static str) -> Attribute {
        Attribute { name, mode: 0o644 }
    }

    pub const fn wo(name: &'static str) -> Attribute {
        Attribute { name, mode: 0o200 }
    }

    pub fn readable(&self) -> bool {
        self.mode & 0o444 != 0
    }

    pub fn writable(&self) -> bool {
        self.mode & 0o222 != 0
    }
}

/// Behavior shared by every node of one class.
///
/// Guarantees:
/// - [release] runs exactly once per node, after the last reference is dropped and the node is
///   unregistered. The node is still readable but no longer reachable from any container.
/// - [show] and [store] are only called for attributes listed by [default_attrs] whose mode
///   allows the access.
pub trait KType: Send + Sync {
    fn release(&self, _kobj: &KObject) {}

    fn default_attrs(&self) -> &[Attribute] {
        &[]
    }

    fn show(&self, _kobj: &KObject, _attr: &Attribute) -> Result<String> {
        Err(Error::InvalidArgument)
    }

    /// Returns the number of bytes consumed from `buf`.
    fn store(&self, _kobj: &KObject, _attr: &Attribute, _buf: &str) -> Result<usize> {
        Err(Error::InvalidArgument)
    }
}

/// Type of nodes created on the fly with no backing object.
#[derive(Debug, Default)]
pub struct DynamicKType;

impl KType for DynamicKType {
    fn release(&self, kobj: &KObject) {
        debug_ex!("kobject: ({}): dynamic release", kobj.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes() {
        assert!(Attribute::ro("a").readable());
        assert!(!Attribute::ro("a").writable());
        assert!(Attribute::rw("a").writable());
        assert!(!Attribute::wo("a").readable());
    }
}
