//! Ordered multimap of authorization parameters.

use alloc::vec::Vec;

use keystone_wire::types::{KeyParam, Tag};

use crate::{Error, FallibleAllocExt};

/// An ordered collection of [`KeyParam`]s.  Iteration order is insertion
/// order and duplicate tags are permitted (some tags are repeatable).
///
/// Growth is fallible: if an allocation fails the set is emptied and the
/// failed call reports [`Error::Alloc`]; later lookups on the emptied set
/// simply miss.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthorizationSet {
    params: Vec<KeyParam>,
}

impl AuthorizationSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self { params: Vec::new() }
    }

    /// Create a set holding a copy of `params`.
    pub fn try_from_slice(params: &[KeyParam]) -> Result<Self, Error> {
        let mut set = Self::new();
        set.reinitialize(params)?;
        Ok(set)
    }

    /// Discard the current contents and replace them with a copy of
    /// `params`.
    pub fn reinitialize(&mut self, params: &[KeyParam]) -> Result<(), Error> {
        self.params.clear();
        if let Err(e) = self.params.try_extend_from_slice(params) {
            self.params = Vec::new();
            return Err(e);
        }
        Ok(())
    }

    /// Append a single parameter.
    pub fn try_push(&mut self, param: KeyParam) -> Result<(), Error> {
        if let Err(e) = self.params.try_push(param) {
            self.params = Vec::new();
            return Err(e);
        }
        Ok(())
    }

    /// Append a copy of all of `params`.
    pub fn try_extend_from_slice(&mut self, params: &[KeyParam]) -> Result<(), Error> {
        if let Err(e) = self.params.try_extend_from_slice(params) {
            self.params = Vec::new();
            return Err(e);
        }
        Ok(())
    }

    /// Return the first parameter carrying `tag`, if any.
    pub fn get_tag_value(&self, tag: Tag) -> Option<&KeyParam> {
        self.params.iter().find(|param| param.tag() == tag)
    }

    /// Indicate whether any parameter carries `tag`.
    pub fn contains_tag(&self, tag: Tag) -> bool {
        self.get_tag_value(tag).is_some()
    }

    /// Indicate whether the set holds an entry equal to `param` (same tag
    /// and same value).
    pub fn contains(&self, param: &KeyParam) -> bool {
        self.params.iter().any(|p| p == param)
    }

    /// Return the index of the first parameter carrying `tag`.
    pub fn find(&self, tag: Tag) -> Option<usize> {
        self.params.iter().position(|param| param.tag() == tag)
    }

    /// Remove and return the parameter at `index`; out-of-range indices are
    /// a no-op.
    pub fn erase(&mut self, index: usize) -> Option<KeyParam> {
        if index < self.params.len() {
            Some(self.params.remove(index))
        } else {
            None
        }
    }

    /// Remove all parameters.
    pub fn clear(&mut self) {
        self.params.clear();
    }

    /// Consume the set, returning the underlying parameters.
    pub fn into_vec(self) -> Vec<KeyParam> {
        self.params
    }
}

impl From<Vec<KeyParam>> for AuthorizationSet {
    fn from(params: Vec<KeyParam>) -> Self {
        Self { params }
    }
}

impl core::ops::Deref for AuthorizationSet {
    type Target = [KeyParam];
    fn deref(&self) -> &Self::Target {
        &self.params
    }
}
