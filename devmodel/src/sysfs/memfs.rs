//! In-memory path store.
//!
//! Entries live in a generational [Arena] and point at each other by [Index]: every entry keeps
//! its parent index and the indices of its children, and paths are resolved by walking children
//! from the root one section at a time. Directories remember the node they were published for
//! and expose that node's default attributes as files; reading or writing such a file calls
//! back into the node's type.
use super::{FsError, SysfsBackend, join_path, split_path};
use crate::{
    error::{Error, Result},
    kobject::{Attribute, KObject, KObjectRef},
};
use spin::RwLock;
use utils::arena::{Arena, Index};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    Dir,
    Attr(Attribute),
    Link(String),
}

struct Entry {
    name: String,
    parent: Option<Index>,
    children: Vec<Index>,
    kind: EntryKind,
    /// Node that published the directory, or that owns the attribute file.
    owner: Option<KObjectRef>,
}

struct Tree {
    arena: Arena<Entry>,
    root: Index,
}

impl Tree {
    fn new() -> Tree {
        let mut arena = Arena::new();
        let root = arena.insert(Entry {
            name: String::new(),
            parent: None,
            children: Vec::new(),
            kind: EntryKind::Dir,
            owner: None,
        });
        Tree { arena, root }
    }

    fn child(&self, dir: Index, name: &str) -> Option<Index> {
        let entry = self.arena.get(dir)?;
        entry
            .children
            .iter()
            .copied()
            .find(|idx| self.arena.get(*idx).is_some_and(|child| child.name == name))
    }

    fn lookup(&self, path: &str) -> Option<Index> {
        let mut node = self.root;
        for section in path.split('/') {
            if section.is_empty() {
                continue;
            }
            node = self.child(node, section)?;
        }
        Some(node)
    }

    fn dir(&self, path: &str) -> core::result::Result<Index, FsError> {
        let idx = self
            .lookup(path)
            .ok_or_else(|| FsError::NotFound(path.to_string()))?;
        match self.arena.get(idx).map(|entry| &entry.kind) {
            Some(EntryKind::Dir) => Ok(idx),
            _ => Err(FsError::NotADirectory(path.to_string())),
        }
    }

    fn attach(&mut self, parent: Index, entry: Entry) -> Index {
        let idx = self.arena.insert(Entry {
            parent: Some(parent),
            ..entry
        });
        if let Some(dir) = self.arena.get_mut(parent) {
            dir.children.push(idx);
        }
        idx
    }

    fn detach(&mut self, idx: Index) {
        let Some(parent) = self.arena.get(idx).and_then(|entry| entry.parent) else {
            return;
        };
        if let Some(dir) = self.arena.get_mut(parent) {
            dir.children.retain(|child| *child != idx);
        }
    }

    fn remove_subtree(&mut self, idx: Index) {
        self.detach(idx);
        let mut pending = vec![idx];
        while let Some(next) = pending.pop() {
            if let Some(entry) = self.arena.remove(next) {
                pending.extend(entry.children);
            }
        }
    }

    fn is_ancestor(&self, ancestor: Index, mut idx: Index) -> bool {
        loop {
            if idx == ancestor {
                return true;
            }
            match self.arena.get(idx).and_then(|entry| entry.parent) {
                Some(parent) => idx = parent,
                None => return false,
            }
        }
    }

    fn full_path(&self, idx: Index) -> String {
        let Some(entry) = self.arena.get(idx) else {
            return String::new();
        };
        match entry.parent {
            None => String::new(),
            Some(parent) => self.full_path(parent) + "/" + &entry.name,
        }
    }
}

pub struct MemFs {
    tree: RwLock<Tree>,
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemFs {
    pub fn new() -> MemFs {
        MemFs {
            tree: RwLock::new(Tree::new()),
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        self.tree.read().lookup(path).is_some()
    }

    pub fn kind(&self, path: &str) -> Option<EntryKind> {
        let tree = self.tree.read();
        let idx = tree.lookup(path)?;
        tree.arena.get(idx).map(|entry| entry.kind.clone())
    }

    pub fn is_dir(&self, path: &str) -> bool {
        self.kind(path) == Some(EntryKind::Dir)
    }

    /// Names of the entries directly below `path`, in creation order.
    pub fn list(&self, path: &str) -> Option<Vec<String>> {
        let tree = self.tree.read();
        let idx = tree.lookup(path)?;
        let entry = tree.arena.get(idx)?;
        Some(
            entry
                .children
                .iter()
                .filter_map(|child| tree.arena.get(*child))
                .map(|child| child.name.clone())
                .collect(),
        )
    }

    pub fn read_link(&self, path: &str) -> Option<String> {
        match self.kind(path)? {
            EntryKind::Link(target) => Some(target),
            _ => None,
        }
    }

    /// Node published at `path`, if it is still alive.
    pub fn lookup_kobject(&self, path: &str) -> Option<KObject> {
        let tree = self.tree.read();
        let idx = tree.lookup(path)?;
        let entry = tree.arena.get(idx)?;
        match entry.kind {
            EntryKind::Dir => entry.owner.as_ref()?.upgrade(),
            _ => None,
        }
    }

    /// Every path in the store, sorted. The root is not included.
    pub fn snapshot(&self) -> Vec<String> {
        let tree = self.tree.read();
        let mut paths: Vec<String> = tree
            .arena
            .iter()
            .filter(|(idx, _)| *idx != tree.root)
            .map(|(idx, _)| tree.full_path(idx))
            .collect();
        paths.sort();
        paths
    }

    fn attribute(&self, path: &str) -> Result<(KObject, Attribute)> {
        let tree = self.tree.read();
        let idx = tree.lookup(path).ok_or(Error::NotFound)?;
        let entry = tree.arena.get(idx).ok_or(Error::NotFound)?;
        let EntryKind::Attr(attr) = &entry.kind else {
            return Err(Error::InvalidArgument);
        };
        let owner = entry
            .owner
            .as_ref()
            .and_then(KObjectRef::upgrade)
            .ok_or(Error::NotFound)?;
        Ok((owner, *attr))
    }

    /// Read the attribute file at `path`.
    ///
    /// The store lock is released before the owning node's type is consulted, so the callback
    /// may itself touch the store.
    pub fn read(&self, path: &str) -> Result<String> {
        let (kobj, attr) = self.attribute(path)?;
        kobj.show_attr(attr.name)
    }

    /// Write `buf` to the attribute file at `path`. Returns the number of bytes consumed.
    pub fn write(&self, path: &str, buf: &str) -> Result<usize> {
        let (kobj, attr) = self.attribute(path)?;
        kobj.store_attr(attr.name, buf)
    }
}

impl SysfsBackend for MemFs {
    fn publish(&self, path: &str, kobj: &KObject) -> core::result::Result<(), FsError> {
        let (parent_path, name) =
            split_path(path).ok_or_else(|| FsError::NotFound(path.to_string()))?;
        let attrs = kobj
            .ktype()
            .map(|ktype| ktype.default_attrs().to_vec())
            .unwrap_or_default();

        let mut tree = self.tree.write();
        let parent = tree.dir(parent_path)?;
        if tree.child(parent, name).is_some() {
            return Err(FsError::AlreadyExists(path.to_string()));
        }
        let dir = tree.attach(
            parent,
            Entry {
                name: name.to_string(),
                parent: None,
                children: Vec::new(),
                kind: EntryKind::Dir,
                owner: Some(kobj.downgrade()),
            },
        );
        for attr in attrs {
            tree.attach(
                dir,
                Entry {
                    name: attr.name.to_string(),
                    parent: None,
                    children: Vec::new(),
                    kind: EntryKind::Attr(attr),
                    owner: Some(kobj.downgrade()),
                },
            );
        }
        Ok(())
    }

    fn unpublish(&self, path: &str) -> core::result::Result<(), FsError> {
        let mut tree = self.tree.write();
        let idx = tree.dir(path)?;
        if idx == tree.root {
            return Err(FsError::Busy(path.to_string()));
        }
        tree.remove_subtree(idx);
        Ok(())
    }

    fn rename_entry(&self, old_path: &str, new_path: &str) -> core::result::Result<(), FsError> {
        let (new_parent_path, new_name) =
            split_path(new_path).ok_or_else(|| FsError::NotFound(new_path.to_string()))?;
        let mut tree = self.tree.write();
        let idx = tree.dir(old_path)?;
        if idx == tree.root {
            return Err(FsError::Busy(old_path.to_string()));
        }
        let new_parent = tree.dir(new_parent_path)?;
        if tree.child(new_parent, new_name).is_some() {
            return Err(FsError::AlreadyExists(new_path.to_string()));
        }
        if tree.is_ancestor(idx, new_parent) {
            return Err(FsError::Busy(old_path.to_string()));
        }
        tree.detach(idx);
        if let Some(entry) = tree.arena.get_mut(idx) {
            entry.name = new_name.to_string();
            entry.parent = Some(new_parent);
        }
        if let Some(dir) = tree.arena.get_mut(new_parent) {
            dir.children.push(idx);
        }
        Ok(())
    }

    fn create_link(&self, dir: &str, name: &str, target: &str) -> core::result::Result<(), FsError> {
        let mut tree = self.tree.write();
        let parent = tree.dir(dir)?;
        if tree.child(parent, name).is_some() {
            return Err(FsError::AlreadyExists(join_path(dir, name)));
        }
        tree.attach(
            parent,
            Entry {
                name: name.to_string(),
                parent: None,
                children: Vec::new(),
                kind: EntryKind::Link(target.to_string()),
                owner: None,
            },
        );
        Ok(())
    }

    fn remove_link(&self, dir: &str, name: &str) -> core::result::Result<(), FsError> {
        let mut tree = self.tree.write();
        let parent = tree.dir(dir)?;
        let link = tree
            .child(parent, name)
            .filter(|idx| matches!(tree.arena.get(*idx).map(|e| &e.kind), Some(EntryKind::Link(_))))
            .ok_or_else(|| FsError::NotFound(join_path(dir, name)))?;
        tree.remove_subtree(link);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kobject::{DynamicKType, KObject};
    use std::sync::Arc;

    fn node(name: &str) -> KObject {
        let kobj = KObject::new();
        kobj.init(Arc::new(DynamicKType)).unwrap();
        kobj.set_name(Some(name)).unwrap();
        kobj
    }

    #[test]
    fn publish_requires_parent() {
        let fs = MemFs::new();
        let a = node("a");
        assert_eq!(
            fs.publish("/missing/a", &a),
            Err(FsError::NotFound("/missing".into()))
        );
        fs.publish("/a", &a).unwrap();
        assert_eq!(
            fs.publish("/a", &node("a")),
            Err(FsError::AlreadyExists("/a".into()))
        );
        assert!(fs.is_dir("/a"));
        assert!(fs.lookup_kobject("/a").unwrap().ptr_eq(&a));
    }

    #[test]
    fn unpublish_removes_subtree() {
        let fs = MemFs::new();
        let (a, b) = (node("a"), node("b"));
        fs.publish("/a", &a).unwrap();
        fs.publish("/a/b", &b).unwrap();
        fs.create_link("/a/b", "peer", "/a").unwrap();
        fs.unpublish("/a").unwrap();
        assert!(fs.snapshot().is_empty());
        assert_eq!(fs.unpublish("/a"), Err(FsError::NotFound("/a".into())));
        assert_eq!(fs.unpublish("/"), Err(FsError::Busy("/".into())));
    }

    #[test]
    fn rename_moves_children_along() {
        let fs = MemFs::new();
        let (a, b, c) = (node("a"), node("b"), node("c"));
        fs.publish("/a", &a).unwrap();
        fs.publish("/a/b", &b).unwrap();
        fs.publish("/c", &c).unwrap();
        fs.rename_entry("/a", "/c/z").unwrap();
        assert_eq!(fs.snapshot(), ["/c", "/c/z", "/c/z/b"]);
        // A directory cannot move below itself.
        assert_eq!(
            fs.rename_entry("/c", "/c/z/b/q"),
            Err(FsError::Busy("/c".into()))
        );
        assert_eq!(
            fs.rename_entry("/c/z", "/c/z"),
            Err(FsError::AlreadyExists("/c/z".into()))
        );
    }

    #[test]
    fn blank_names_are_real_entries() {
        let fs = MemFs::new();
        let (blank, a, b) = (node(" "), node("a"), node("a"));
        fs.publish("/ ", &blank).unwrap();
        fs.publish("/ /a", &a).unwrap();
        fs.publish("/a", &b).unwrap();
        assert_eq!(fs.snapshot(), ["/ ", "/ /a", "/a"]);
        assert!(fs.lookup_kobject("/ /a").unwrap().ptr_eq(&a));
        assert!(fs.lookup_kobject("/a").unwrap().ptr_eq(&b));
    }

    #[test]
    fn links() {
        let fs = MemFs::new();
        fs.publish("/a", &node("a")).unwrap();
        fs.create_link("/a", "self", "/a").unwrap();
        assert_eq!(fs.read_link("/a/self").as_deref(), Some("/a"));
        assert_eq!(
            fs.create_link("/a", "self", "/a"),
            Err(FsError::AlreadyExists("/a/self".into()))
        );
        assert_eq!(fs.list("/a").unwrap(), ["self"]);
        fs.remove_link("/a", "self").unwrap();
        assert_eq!(
            fs.remove_link("/a", "self"),
            Err(FsError::NotFound("/a/self".into()))
        );
        // Directories cannot be removed through the link call.
        fs.publish("/a/d", &node("d")).unwrap();
        assert!(fs.remove_link("/a", "d").is_err());
    }
}
