//! Path trie keyed by path segment
//!
//! Built fresh for every batch of requests to find requests whose path is
//! already covered by another request.

use std::collections::BTreeMap;
use std::path::Path;

/// Trie mapping paths to values
#[derive(Debug)]
pub struct PathTrie<T> {
    root: Node<T>,
    ignore_case: bool,
    len: usize,
}

#[derive(Debug)]
struct Node<T> {
    value: Option<T>,
    children: BTreeMap<String, Node<T>>,
}

impl<T> Default for Node<T> {
    fn default() -> Self {
        Self {
            value: None,
            children: BTreeMap::new(),
        }
    }
}

impl<T> PathTrie<T> {
    pub fn new(ignore_case: bool) -> Self {
        Self {
            root: Node::default(),
            ignore_case,
            len: 0,
        }
    }

    fn segments(&self, path: &Path) -> Vec<String> {
        path.components()
            .map(|c| {
                let segment = c.as_os_str().to_string_lossy();
                if self.ignore_case {
                    segment.to_lowercase()
                } else {
                    segment.into_owned()
                }
            })
            .collect()
    }

    /// Insert a value, returning the one previously stored at `path`
    pub fn insert(&mut self, path: &Path, value: T) -> Option<T> {
        let segments = self.segments(path);
        let mut node = &mut self.root;
        for segment in segments {
            node = node.children.entry(segment).or_default();
        }
        let previous = node.value.replace(value);
        if previous.is_none() {
            self.len += 1;
        }
        previous
    }

    pub fn get(&self, path: &Path) -> Option<&T> {
        let mut node = &self.root;
        for segment in self.segments(path) {
            node = node.children.get(&segment)?;
        }
        node.value.as_ref()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.get(path).is_some()
    }

    /// Find the value stored at the shortest prefix of `path` (including `path` itself)
    pub fn find_prefix(&self, path: &Path) -> Option<&T> {
        let mut node = &self.root;
        for segment in self.segments(path) {
            node = node.children.get(&segment)?;
            if let Some(value) = node.value.as_ref() {
                return Some(value);
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Consume the trie, yielding values in depth-first order
    pub fn into_values(self) -> Vec<T> {
        let mut values = Vec::with_capacity(self.len);
        let mut stack = vec![self.root];
        while let Some(node) = stack.pop() {
            if let Some(value) = node.value {
                values.push(value);
            }
            stack.extend(node.children.into_values().rev());
        }
        values
    }
}
