//! Deferred destruction queue
//!
//! Resources that the GPU may still be reading are not destroyed on the spot.
//! Their destruction is pushed here and runs when the queue is flushed: a
//! frame slot flushes its queue after its fence has signaled, and the
//! renderer flushes its global queue once at shutdown after the device is
//! idle.
//!
//! Flushing runs newest first, so a resource derived from another one is
//! destroyed before its base.

use std::fmt;

use super::owned::{GpuOwned, GpuResource};
use crate::render::api::GpuDevice;

type Deleter = Box<dyn FnOnce(&dyn GpuDevice)>;

/// LIFO queue of pending destructions
#[derive(Default)]
pub struct DeletionQueue {
    deleters: Vec<(String, Deleter)>,
}

impl DeletionQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an arbitrary destruction closure
    pub fn push_function<F>(&mut self, name: impl Into<String>, deleter: F)
    where
        F: FnOnce(&dyn GpuDevice) + 'static,
    {
        self.deleters.push((name.into(), Box::new(deleter)));
    }

    /// Queue the destruction of an owned handle
    pub fn push_resource<H: GpuResource>(&mut self, owned: GpuOwned<H>) {
        let (name, handle) = owned.into_raw();
        self.push_function(name, move |device| handle.destroy(device));
    }

    /// Run every queued destruction, newest first, and empty the queue
    pub fn flush(&mut self, device: &dyn GpuDevice) {
        if self.deleters.is_empty() {
            return;
        }

        log::trace!("Flushing {} deferred destructions", self.deleters.len());
        while let Some((name, deleter)) = self.deleters.pop() {
            log::trace!("  destroying {name}");
            deleter(device);
        }
    }

    /// Number of pending destructions
    pub fn len(&self) -> usize {
        self.deleters.len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.deleters.is_empty()
    }
}

impl fmt::Debug for DeletionQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.deleters.iter().map(|(name, _)| name))
            .finish()
    }
}

impl Drop for DeletionQueue {
    fn drop(&mut self) {
        if !self.deleters.is_empty() {
            log::warn!(
                "DeletionQueue dropped with {} pending destructions: {:?}",
                self.deleters.len(),
                self
            );
        }
    }
}
