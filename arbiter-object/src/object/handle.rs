use {
    super::*,
    crate::{ArbError, ArbResult},
    std::sync::Arc,
};

/// The value a client uses to refer to a handle, unique within the owning
/// process only.
pub type HandleValue = u32;

/// Invalid handle value. Requests that accept it treat it as "the caller's
/// own process/thread" where documented, and reject it everywhere else.
pub const INVALID_HANDLE: HandleValue = 0;

/// A Handle is how a specific process refers to a specific kernel object.
///
/// Cloning a handle clones the `Arc`, so the number of table entries (plus
/// pending wait registrations) is exactly the object's reference count.
#[derive(Debug, Clone)]
pub struct Handle {
    /// The object referred to by the handle.
    pub object: ObjectRef,
    /// The handle's associated access rights.
    pub rights: Rights,
    /// Whether the handle is copied into child processes created with
    /// handle inheritance.
    pub inherit: bool,
}

impl Handle {
    /// Create a new handle referring to `object` with the given rights.
    pub fn new(object: ObjectRef, rights: Rights, inherit: bool) -> Self {
        Handle {
            object,
            rights,
            inherit,
        }
    }

    /// Check that the handle grants `required`, then hand out its object.
    pub fn object_with_rights(&self, required: Rights) -> ArbResult<ObjectRef> {
        if !self.rights.contains(required) {
            return Err(ArbError::ACCESS_DENIED);
        }
        Ok(Arc::clone(&self.object))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::EventState;

    #[test]
    fn rights_check() {
        let obj = KObject::new(1, None, Payload::Event(EventState::new(false, false)));
        let handle = Handle::new(obj.clone(), Rights::SYNCHRONIZE, false);

        let got = handle.object_with_rights(Rights::SYNCHRONIZE).unwrap();
        assert!(Arc::ptr_eq(&got, &obj));

        assert_eq!(
            handle.object_with_rights(Rights::MODIFY_STATE).err(),
            Some(ArbError::ACCESS_DENIED)
        );
    }
}
