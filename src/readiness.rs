//! Readiness stub
//!
//! No real descriptor ever becomes ready in virtual time. The stub keeps
//! registrations only so that code which registers and unregisters watchers
//! keeps working, and so tests can inspect what was registered.

use bitflags::bitflags;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;
use tracing::trace;

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct Interest: u8 {
        const READABLE = 1 << 0;
        const WRITABLE = 1 << 1;
    }
}

/// A file-descriptor-like handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IoHandle(pub i32);

impl fmt::Display for IoHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd {}", self.0)
    }
}

/// Token identifying one registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RegistrationToken(pub u64);

/// A reusable watcher callback. Identity is `Rc` pointer identity.
pub type WatchCallback = Rc<dyn Fn()>;

/// The callbacks attached to one handle, one per direction.
/// Arguments are captured by the closures.
#[derive(Clone, Default)]
pub struct WatchData {
    pub reader: Option<WatchCallback>,
    pub writer: Option<WatchCallback>,
}

impl WatchData {
    /// Interest implied by which callbacks are present.
    pub fn interest(&self) -> Interest {
        let mut interest = Interest::empty();
        if self.reader.is_some() {
            interest |= Interest::READABLE;
        }
        if self.writer.is_some() {
            interest |= Interest::WRITABLE;
        }
        interest
    }
}

impl fmt::Debug for WatchData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchData")
            .field("reader", &self.reader.is_some())
            .field("writer", &self.writer.is_some())
            .finish()
    }
}

/// A stored registration: the handle, its interest, and the callbacks to run.
#[derive(Clone, Debug)]
pub struct Registration {
    pub handle: IoHandle,
    pub interest: Interest,
    pub token: RegistrationToken,
    pub data: WatchData,
}

/// A readiness event. Never produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadyEvent {
    pub handle: IoHandle,
    pub ready: Interest,
}

/// Stand-in for an I/O multiplexer.
#[derive(Debug, Default)]
pub struct ReadinessStub {
    keys: BTreeMap<IoHandle, Registration>,
    next_token: u64,
}

impl ReadinessStub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in `handle` with its callbacks. Replaces any
    /// previous registration and issues a fresh token.
    pub fn register(
        &mut self,
        handle: IoHandle,
        interest: Interest,
        data: WatchData,
    ) -> RegistrationToken {
        let token = RegistrationToken(self.next_token);
        self.next_token += 1;
        self.keys.insert(
            handle,
            Registration {
                handle,
                interest,
                token,
                data,
            },
        );
        token
    }

    /// Replace interest and callbacks of an existing registration, keeping its
    /// token. Returns false if `handle` is not registered.
    pub fn modify(&mut self, handle: IoHandle, interest: Interest, data: WatchData) -> bool {
        match self.keys.get_mut(&handle) {
            Some(reg) => {
                reg.interest = interest;
                reg.data = data;
                true
            }
            None => false,
        }
    }

    /// Remove a registration. Returns true if it existed.
    pub fn unregister(&mut self, handle: IoHandle) -> bool {
        self.keys.remove(&handle).is_some()
    }

    /// Always empty.
    pub fn poll(&mut self, _timeout: Option<f64>) -> Vec<ReadyEvent> {
        Vec::new()
    }

    /// Every registration, keyed by handle. Callbacks are in each entry's `data`.
    pub fn snapshot(&self) -> &BTreeMap<IoHandle, Registration> {
        &self.keys
    }

    pub fn get(&self, handle: IoHandle) -> Option<&Registration> {
        self.keys.get(&handle)
    }
}

/// Reader/writer watch surface over the stub, plus per-handle removal counters.
#[derive(Default)]
pub struct Watchers {
    stub: ReadinessStub,
    remove_reader_count: HashMap<IoHandle, usize>,
    remove_writer_count: HashMap<IoHandle, usize>,
}

impl Watchers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stub(&self) -> &ReadinessStub {
        &self.stub
    }

    pub fn poll(&mut self, timeout: Option<f64>) -> Vec<ReadyEvent> {
        self.stub.poll(timeout)
    }

    pub fn add_reader(&mut self, handle: IoHandle, callback: WatchCallback) {
        self.update(handle, |data| data.reader = Some(callback));
    }

    pub fn add_writer(&mut self, handle: IoHandle, callback: WatchCallback) {
        self.update(handle, |data| data.writer = Some(callback));
    }

    /// Remove the reader for `handle`. Counts the call even if nothing was registered.
    pub fn remove_reader(&mut self, handle: IoHandle) -> bool {
        *self.remove_reader_count.entry(handle).or_default() += 1;
        self.update(handle, |data| data.reader.take().is_some())
    }

    pub fn remove_writer(&mut self, handle: IoHandle) -> bool {
        *self.remove_writer_count.entry(handle).or_default() += 1;
        self.update(handle, |data| data.writer.take().is_some())
    }

    pub fn reader(&self, handle: IoHandle) -> Option<&WatchCallback> {
        self.stub.get(handle).and_then(|r| r.data.reader.as_ref())
    }

    pub fn writer(&self, handle: IoHandle) -> Option<&WatchCallback> {
        self.stub.get(handle).and_then(|r| r.data.writer.as_ref())
    }

    pub fn has_reader(&self, handle: IoHandle, callback: &WatchCallback) -> bool {
        self.reader(handle).is_some_and(|cb| Rc::ptr_eq(cb, callback))
    }

    pub fn has_writer(&self, handle: IoHandle, callback: &WatchCallback) -> bool {
        self.writer(handle).is_some_and(|cb| Rc::ptr_eq(cb, callback))
    }

    pub fn remove_reader_count(&self, handle: IoHandle) -> usize {
        self.remove_reader_count.get(&handle).copied().unwrap_or(0)
    }

    pub fn remove_writer_count(&self, handle: IoHandle) -> usize {
        self.remove_writer_count.get(&handle).copied().unwrap_or(0)
    }

    pub fn reset_counters(&mut self) {
        self.remove_reader_count.clear();
        self.remove_writer_count.clear();
    }

    /// Apply `f` to the callbacks of `handle`, then register, modify or
    /// unregister so the stub's interest matches what is left.
    fn update<R>(&mut self, handle: IoHandle, f: impl FnOnce(&mut WatchData) -> R) -> R {
        let existing = self.stub.get(handle).map(|r| r.data.clone());
        let registered = existing.is_some();
        let mut data = existing.unwrap_or_default();
        let out = f(&mut data);

        let interest = data.interest();
        if interest.is_empty() {
            self.stub.unregister(handle);
        } else if registered {
            self.stub.modify(handle, interest, data);
        } else {
            self.stub.register(handle, interest, data);
        }
        trace!(%handle, ?interest, "Watchers::update");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> WatchCallback {
        Rc::new(|| {})
    }

    fn reading(cb: &WatchCallback) -> WatchData {
        WatchData {
            reader: Some(cb.clone()),
            writer: None,
        }
    }

    #[test]
    fn test_stub_register_unregister() {
        let mut stub = ReadinessStub::new();
        let cb = noop();
        let t0 = stub.register(IoHandle(3), Interest::READABLE, reading(&cb));
        let t1 = stub.register(IoHandle(4), Interest::WRITABLE, WatchData::default());
        assert_ne!(t0, t1);
        assert_eq!(stub.snapshot().len(), 2);

        let reg = stub.get(IoHandle(3)).unwrap();
        assert_eq!(reg.token, t0);
        assert!(reg.data.reader.as_ref().is_some_and(|r| Rc::ptr_eq(r, &cb)));

        assert!(stub.unregister(IoHandle(3)));
        assert!(!stub.unregister(IoHandle(3)));
        assert_eq!(stub.snapshot().len(), 1);
    }

    #[test]
    fn test_stub_modify_keeps_token() {
        let mut stub = ReadinessStub::new();
        let cb = noop();
        let token = stub.register(IoHandle(2), Interest::READABLE, reading(&cb));

        assert!(stub.modify(
            IoHandle(2),
            Interest::READABLE | Interest::WRITABLE,
            WatchData {
                reader: Some(cb.clone()),
                writer: Some(noop()),
            },
        ));
        let reg = stub.get(IoHandle(2)).unwrap();
        assert_eq!(reg.token, token);
        assert_eq!(reg.interest, reg.data.interest());
        assert!(!stub.modify(IoHandle(9), Interest::READABLE, WatchData::default()));
    }

    #[test]
    fn test_stub_poll_is_always_empty() {
        let mut stub = ReadinessStub::new();
        stub.register(
            IoHandle(1),
            Interest::READABLE | Interest::WRITABLE,
            WatchData::default(),
        );
        assert!(stub.poll(None).is_empty());
        assert!(stub.poll(Some(0.0)).is_empty());
    }

    #[test]
    fn test_reader_registration() {
        let mut w = Watchers::new();
        let cb = noop();
        let other = noop();

        w.add_reader(IoHandle(5), cb.clone());
        assert!(w.has_reader(IoHandle(5), &cb));
        assert!(!w.has_reader(IoHandle(5), &other));
        assert_eq!(
            w.stub().get(IoHandle(5)).map(|r| r.interest),
            Some(Interest::READABLE)
        );

        assert!(w.remove_reader(IoHandle(5)));
        assert!(!w.remove_reader(IoHandle(5)));
        assert_eq!(w.remove_reader_count(IoHandle(5)), 2);
        assert!(w.stub().get(IoHandle(5)).is_none());
    }

    #[test]
    fn test_reader_and_writer_share_registration() {
        let mut w = Watchers::new();
        let reader = noop();
        w.add_reader(IoHandle(7), reader.clone());
        let token = w.stub().get(IoHandle(7)).map(|r| r.token);
        w.add_writer(IoHandle(7), noop());
        assert_eq!(
            w.stub().get(IoHandle(7)).map(|r| r.interest),
            Some(Interest::READABLE | Interest::WRITABLE)
        );
        assert_eq!(w.stub().get(IoHandle(7)).map(|r| r.token), token);

        w.remove_writer(IoHandle(7));
        assert_eq!(
            w.stub().get(IoHandle(7)).map(|r| r.interest),
            Some(Interest::READABLE)
        );
        assert!(w.has_reader(IoHandle(7), &reader));
        assert!(w.writer(IoHandle(7)).is_none());
        assert_eq!(w.remove_writer_count(IoHandle(7)), 1);
        assert_eq!(w.remove_reader_count(IoHandle(7)), 0);
    }

    #[test]
    fn test_reset_counters() {
        let mut w = Watchers::new();
        w.remove_reader(IoHandle(1));
        w.remove_writer(IoHandle(1));
        w.reset_counters();
        assert_eq!(w.remove_reader_count(IoHandle(1)), 0);
        assert_eq!(w.remove_writer_count(IoHandle(1)), 0);
    }
}
