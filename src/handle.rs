//! Shared, dynamically typed object handles.
//!
//! A [`Handle`] is the unit of identity in an object graph: two fields refer
//! to "the same object" exactly when their handles point at the same
//! allocation. Handles are reference counted and interior mutable so that
//! cyclic graphs can be rebuilt in place while they are being read.

use std::any::{Any, TypeId};
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use crate::error::{PersistError, Result};

/// A shared reference to a persistable object of any registered type.
#[derive(Clone)]
pub struct Handle {
    cell: Rc<RefCell<dyn Any>>,
    type_id: TypeId,
    type_name: &'static str,
}

impl Handle {
    /// Moves `value` into a new shared allocation.
    pub fn new<T: Any>(value: T) -> Self {
        Self {
            cell: Rc::new(RefCell::new(value)),
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Returns true if both handles point at the same object.
    #[inline]
    pub fn ptr_eq(&self, other: &Handle) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(&self.cell), Rc::as_ptr(&other.cell))
    }

    /// The address of the shared allocation; stable for the handle's lifetime.
    #[inline]
    pub fn addr(&self) -> usize {
        Rc::as_ptr(&self.cell).cast::<()>() as usize
    }

    /// The `TypeId` of the concrete value.
    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// The Rust type name of the concrete value.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns true if the value is a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    /// Borrows the value as a `T`.
    ///
    /// Returns `None` if the value is not a `T` or is currently mutably borrowed.
    pub fn borrow<T: Any>(&self) -> Option<Ref<'_, T>> {
        let guard = self.cell.try_borrow().ok()?;
        Ref::filter_map(guard, |v| v.downcast_ref::<T>()).ok()
    }

    /// Mutably borrows the value as a `T`.
    ///
    /// Returns `None` if the value is not a `T` or is currently borrowed.
    pub fn borrow_mut<T: Any>(&self) -> Option<RefMut<'_, T>> {
        let guard = self.cell.try_borrow_mut().ok()?;
        RefMut::filter_map(guard, |v| v.downcast_mut::<T>()).ok()
    }

    /// Number of live handles to this object.
    pub fn strong_count(&self) -> usize {
        Rc::strong_count(&self.cell)
    }

    pub(crate) fn borrow_any(&self) -> Result<Ref<'_, dyn Any>> {
        self.cell.try_borrow().map_err(|_| {
            PersistError::Internal(format!(
                "object of type {} is mutably borrowed while being written",
                self.type_name
            ))
        })
    }

    pub(crate) fn borrow_any_mut(&self) -> Result<RefMut<'_, dyn Any>> {
        self.cell.try_borrow_mut().map_err(|_| {
            PersistError::Internal(format!(
                "object of type {} is borrowed while being read",
                self.type_name
            ))
        })
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle<{}>({:#x})", self.type_name, self.addr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Point {
        x: i32,
    }

    #[test]
    fn identity_follows_the_allocation() {
        let a = Handle::new(Point { x: 1 });
        let b = a.clone();
        let c = Handle::new(Point { x: 1 });
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
        assert_eq!(a.addr(), b.addr());
        assert_eq!(a.strong_count(), 2);
    }

    #[test]
    fn typed_borrows() {
        let h = Handle::new(Point { x: 7 });
        assert!(h.is::<Point>());
        assert_eq!(h.borrow::<Point>().map(|p| p.x), Some(7));
        assert!(h.borrow::<String>().is_none());
        if let Some(mut p) = h.borrow_mut::<Point>() {
            p.x = 9;
        }
        assert_eq!(*h.borrow::<Point>().expect("point"), Point { x: 9 });
    }

    #[test]
    fn conflicting_borrows_are_reported() {
        let h = Handle::new(Point { x: 0 });
        let _guard = h.borrow_mut::<Point>().expect("first borrow");
        assert!(h.borrow::<Point>().is_none());
        assert!(matches!(h.borrow_any(), Err(PersistError::Internal(_))));
    }
}
