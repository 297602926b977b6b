//! Observable property cells.
//!
//! A [`LiveValue`] caches the last known value of one device property. Local
//! writes and re-fetch requests are turned into [`Request`] messages on the
//! owning connection's outbound queue; values reported by the device come in
//! through [`LiveValue::update`] and are fanned out to subscribers over
//! channels.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use crate::connection::Request;
use crate::error::{Error, Result, ValidationError};
use crate::field::FieldCode;
use crate::property::{PropertyDescriptor, PropertyType, PropertyValue};
use crate::registry::FieldValue;

/// Link between a value and the connection serving it.
#[derive(Clone)]
struct Binding {
    requests: Sender<Request>,
    field: FieldCode,
    writable: bool,
}

struct Shared<T> {
    value: RwLock<T>,
    descriptor: RwLock<PropertyDescriptor>,
    binding: Mutex<Option<Binding>>,
    observers: Mutex<Vec<Sender<T>>>,
}

/// A cached, observable device property.
///
/// Clones share the same cell.
pub struct LiveValue<T> {
    name: &'static str,
    inner: Arc<Shared<T>>,
}

impl<T> Clone for LiveValue<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: core::fmt::Debug + Clone + Send + Sync + 'static> core::fmt::Debug for LiveValue<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LiveValue")
            .field("name", &self.name)
            .field("value", &self.get())
            .field("readonly", &self.readonly())
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> LiveValue<T> {
    /// A detached value. It stays read-only until bound to a connection.
    pub fn new(name: &'static str, initial: T, descriptor: PropertyDescriptor) -> Self {
        Self {
            name,
            inner: Arc::new(Shared {
                value: RwLock::new(initial),
                descriptor: RwLock::new(descriptor),
                binding: Mutex::new(None),
                observers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Latest known value. Never blocks on the transport.
    pub fn get(&self) -> T {
        self.inner
            .value
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn descriptor(&self) -> PropertyDescriptor {
        self.inner
            .descriptor
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// True when local writes are refused, e.g. for measurements.
    pub fn readonly(&self) -> bool {
        self.binding().is_none_or(|binding| !binding.writable)
    }

    /// Field this value is served from, while connected.
    pub fn field(&self) -> Option<FieldCode> {
        self.binding().map(|binding| binding.field)
    }

    /// Ask the device to report this value again.
    ///
    /// Returns once the request is queued; the new value shows up through
    /// [`Self::subscribe`] or a later [`Self::get`].
    pub fn query(&self) -> Result<()> {
        let binding = self.binding().ok_or(Error::Disconnected)?;
        binding
            .requests
            .send(Request::Query {
                field: binding.field,
            })
            .map_err(|_| Error::Disconnected)
    }

    /// Query and wait for the device's answer.
    pub fn query_wait(&self, timeout: Duration) -> Result<T> {
        let changes = self.subscribe();
        self.query()?;
        changes.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => Error::Timeout,
            RecvTimeoutError::Disconnected => Error::Disconnected,
        })
    }

    /// Receive every subsequent value change. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> Receiver<T> {
        let (tx, rx) = mpsc::channel();
        self.inner
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Device-driven path: store a reported value and notify subscribers.
    pub(crate) fn update(&self, value: T) {
        let mut cached = self
            .inner
            .value
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *cached = value.clone();
        self.notify(value);
    }

    pub(crate) fn set_descriptor(&self, descriptor: PropertyDescriptor) {
        *self
            .inner
            .descriptor
            .write()
            .unwrap_or_else(PoisonError::into_inner) = descriptor;
    }

    pub(crate) fn bind(&self, requests: Sender<Request>, field: FieldCode, writable: bool) {
        *self
            .inner
            .binding
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Binding {
            requests,
            field,
            writable,
        });
    }

    /// Detach from the connection and drop all subscribers, waking any pending
    /// [`Self::query_wait`] with [`Error::Disconnected`].
    pub(crate) fn unbind(&self) {
        self.inner
            .binding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.inner
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn binding(&self) -> Option<Binding> {
        self.inner
            .binding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Fan `value` out to subscribers. Callers hold the cache write lock.
    fn notify(&self, value: T) {
        let mut observers = self
            .inner
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        observers.retain(|observer| observer.send(value.clone()).is_ok());
    }
}

impl<T: PropertyType> LiveValue<T> {
    /// Write a new value to the device.
    ///
    /// Read-only values and values outside the descriptor's domain are
    /// rejected before anything is queued, leaving the cache untouched.
    pub fn set(&self, value: T) -> Result<()> {
        let binding = self
            .binding()
            .filter(|binding| binding.writable)
            .ok_or(Error::ReadOnly)?;
        let wire = value.to_property();
        self.descriptor().validate(&wire)?;

        // The cache lock is held across the enqueue and the notification, so
        // concurrent writers leave the wire, the cache and every subscriber
        // in the same order.
        let mut cached = self
            .inner
            .value
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        binding
            .requests
            .send(Request::Write {
                field: binding.field,
                value: FieldValue::Scalar(wire),
            })
            .map_err(|_| Error::Disconnected)?;
        *cached = value.clone();
        self.notify(value);
        Ok(())
    }

    /// Apply a scalar reported by the device. Returns false when the value has
    /// the wrong type for this property.
    pub(crate) fn accept(&self, value: &FieldValue) -> bool {
        match value.as_scalar().and_then(T::from_property) {
            Some(value) => {
                self.update(value);
                true
            }
            None => false,
        }
    }

    /// Current value in its untyped form.
    pub fn property_value(&self) -> PropertyValue {
        self.get().to_property()
    }
}

/// Type-erased access to a [`LiveValue`], for listing and setting properties by name.
pub(crate) trait DynValue: Send + Sync {
    fn name(&self) -> &'static str;
    fn descriptor(&self) -> PropertyDescriptor;
    fn readonly(&self) -> bool;
    fn value(&self) -> PropertyValue;
    fn set_value(&self, value: &PropertyValue) -> Result<()>;
    fn accept(&self, value: &FieldValue) -> bool;
    fn bind(&self, requests: Sender<Request>, field: FieldCode, writable: bool);
    fn unbind(&self);
}

impl<T: PropertyType> DynValue for LiveValue<T> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn descriptor(&self) -> PropertyDescriptor {
        LiveValue::descriptor(self)
    }

    fn readonly(&self) -> bool {
        LiveValue::readonly(self)
    }

    fn value(&self) -> PropertyValue {
        self.property_value()
    }

    fn set_value(&self, value: &PropertyValue) -> Result<()> {
        if LiveValue::readonly(self) {
            return Err(Error::ReadOnly);
        }
        let typed = T::from_property(value).ok_or(ValidationError::WrongType {
            expected: self.property_value().scalar_type().name(),
        })?;
        self.set(typed)
    }

    fn accept(&self, value: &FieldValue) -> bool {
        LiveValue::accept(self, value)
    }

    fn bind(&self, requests: Sender<Request>, field: FieldCode, writable: bool) {
        LiveValue::bind(self, requests, field, writable)
    }

    fn unbind(&self) {
        LiveValue::unbind(self)
    }
}
