use std::sync::{Mutex, MutexGuard};

/// Every critical section in this crate leaves the guarded data consistent between statements, so
/// a panic on another thread does not make the data unusable.
pub(crate) trait LockExt<T> {
    fn lock_unpoisoned(&self) -> MutexGuard<'_, T>;
}
impl<T> LockExt<T> for Mutex<T> {
    #[inline]
    fn lock_unpoisoned(&self) -> MutexGuard<'_, T> {
        self.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

pub(crate) trait BoolExt {
    fn to_i32(self) -> i32;
}
impl BoolExt for bool {
    #[inline(always)] #[rustfmt::skip] // oh come on now
    fn to_i32(self) -> i32 {
        if self { 1 } else { 0 }
    }
}

pub(crate) trait RawOsErrorExt {
    fn is_errno(&self, errno: i32) -> bool;
}
impl RawOsErrorExt for std::io::Error {
    #[inline(always)]
    fn is_errno(&self, errno: i32) -> bool { self.raw_os_error() == Some(errno) }
}
