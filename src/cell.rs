//! A `RefCell` whose borrow flag is atomic, so it can be shared between
//! worker threads.
//!
//! Every component store sits behind one of these. The scheduler already keeps
//! conflicting jobs apart; the flag turns any slip in that guarantee into a
//! failed borrow instead of aliased `&mut` access.

use std::{
    any,
    cell::UnsafeCell,
    mem::ManuallyDrop,
    ops::{Deref, DerefMut},
    ptr,
    sync::atomic::{AtomicUsize, Ordering},
};

#[derive(Debug)]
pub struct AtomicRefCell<T: ?Sized> {
    borrow: AtomicUsize,
    data: UnsafeCell<T>,
}

impl<T> AtomicRefCell<T> {
    pub fn new(data: T) -> Self {
        Self {
            borrow: AtomicUsize::new(0),
            data: UnsafeCell::new(data),
        }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> AtomicRefCell<T> {
    const MUTABLY_BORROWED: usize = usize::MAX;

    /// Exclusive access through `&mut self` needs no flag bookkeeping.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    pub fn borrow(&self) -> AtomicRef<'_, T> {
        self.try_borrow()
            .unwrap_or_else(|| panic!("{} was already borrowed mutably!", any::type_name::<T>()))
    }

    pub fn try_borrow(&self) -> Option<AtomicRef<'_, T>> {
        let mut current = self.borrow.load(Ordering::Acquire);

        loop {
            if current == Self::MUTABLY_BORROWED || current == Self::MUTABLY_BORROWED - 1 {
                return None;
            }

            match self.borrow.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        // SAFETY: the shared count was raised above and no mutable borrow
        // can be taken until it drops back to zero.
        let data = unsafe { &*self.data.get() };

        Some(AtomicRef {
            flag: &self.borrow,
            data,
        })
    }

    pub fn borrow_mut(&self) -> AtomicRefMut<'_, T> {
        self.try_borrow_mut()
            .unwrap_or_else(|| panic!("{} was already borrowed!", any::type_name::<T>()))
    }

    pub fn try_borrow_mut(&self) -> Option<AtomicRefMut<'_, T>> {
        self.borrow
            .compare_exchange(0, Self::MUTABLY_BORROWED, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;

        // SAFETY: the flag moved from "unborrowed" to "mutably borrowed", so
        // this is the only live reference.
        let data = unsafe { &mut *self.data.get() };

        Some(AtomicRefMut {
            flag: &self.borrow,
            data,
        })
    }
}

unsafe impl<T: ?Sized + Send> Send for AtomicRefCell<T> {}

unsafe impl<T: ?Sized + Send + Sync> Sync for AtomicRefCell<T> {}

#[derive(Debug)]
pub struct AtomicRef<'a, T: ?Sized> {
    flag: &'a AtomicUsize,
    data: &'a T,
}

impl<'a, T: ?Sized> AtomicRef<'a, T> {
    pub fn map<U, F>(this: Self, f: F) -> AtomicRef<'a, U>
    where
        F: FnOnce(&T) -> &U,
        U: ?Sized,
    {
        let this = ManuallyDrop::new(this);

        AtomicRef {
            flag: this.flag,
            data: f(this.data),
        }
    }

    /// Like [`AtomicRef::map`], but the projection may fail, in which case
    /// the original borrow is handed back.
    pub fn filter_map<U, F>(this: Self, f: F) -> Result<AtomicRef<'a, U>, Self>
    where
        F: FnOnce(&T) -> Option<&U>,
        U: ?Sized,
    {
        match f(this.data) {
            Some(data) => {
                let this = ManuallyDrop::new(this);
                Ok(AtomicRef {
                    flag: this.flag,
                    data,
                })
            }
            None => Err(this),
        }
    }
}

impl<T: ?Sized> Deref for AtomicRef<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.data
    }
}

impl<T: ?Sized> Drop for AtomicRef<'_, T> {
    fn drop(&mut self) {
        let old_val = self.flag.fetch_sub(1, Ordering::AcqRel);
        debug_assert_ne!(old_val, AtomicRefCell::<T>::MUTABLY_BORROWED);
    }
}

#[derive(Debug)]
pub struct AtomicRefMut<'a, T: ?Sized> {
    flag: &'a AtomicUsize,
    data: &'a mut T,
}

impl<'a, T: ?Sized> AtomicRefMut<'a, T> {
    pub fn map<U, F>(this: Self, f: F) -> AtomicRefMut<'a, U>
    where
        F: FnOnce(&mut T) -> &mut U,
        U: ?Sized,
    {
        let this = ManuallyDrop::new(this);

        let flag = this.flag;
        // SAFETY: moves the reference out of the guard without running its
        // Drop impl, which would release the flag too early.
        let data = f(unsafe { ptr::read(&this.data) });

        AtomicRefMut { flag, data }
    }

    pub fn filter_map<U, F>(this: Self, f: F) -> Result<AtomicRefMut<'a, U>, Self>
    where
        F: FnOnce(&mut T) -> Option<&mut U>,
        U: ?Sized,
    {
        let this = ManuallyDrop::new(this);

        let flag = this.flag;
        // SAFETY: see `map`. On failure the reference is put back into a
        // fresh guard, so the flag is still released exactly once.
        let data = unsafe { ptr::read(&this.data) };
        let raw: *mut T = &mut *data;

        match f(data) {
            Some(data) => Ok(AtomicRefMut { flag, data }),
            None => Err(AtomicRefMut {
                flag,
                data: unsafe { &mut *raw },
            }),
        }
    }
}

impl<T: ?Sized> Deref for AtomicRefMut<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.data
    }
}

impl<T: ?Sized> DerefMut for AtomicRefMut<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.data
    }
}

impl<T: ?Sized> Drop for AtomicRefMut<'_, T> {
    fn drop(&mut self) {
        let old_val = self.flag.swap(0, Ordering::Release);
        debug_assert_eq!(old_val, AtomicRefCell::<T>::MUTABLY_BORROWED);
    }
}
