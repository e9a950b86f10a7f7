//! Exclusively owned resources that are released exactly once

use crate::error::Result;
use std::sync::Arc;

/// A resource with an explicit shutdown step
pub trait Release: Send + Sync {
    /// Shut the resource down. Called at most once through [`Owned`].
    fn release(&self) -> Result<()>;

    /// Short name used in logs
    fn resource_name(&self) -> &'static str;
}

impl<T: Release + ?Sized> Release for Arc<T> {
    fn release(&self) -> Result<()> {
        (**self).release()
    }

    fn resource_name(&self) -> &'static str {
        (**self).resource_name()
    }
}

/// Owner of a releasable resource.
///
/// Releasing takes the resource out, so a second release is a no-op. A
/// resource still held when the owner is dropped is released then.
pub struct Owned<T: Release> {
    inner: Option<T>,
}

impl<T: Release> Owned<T> {
    pub fn new(resource: T) -> Self {
        Self {
            inner: Some(resource),
        }
    }

    pub fn get(&self) -> Option<&T> {
        self.inner.as_ref()
    }

    pub fn is_released(&self) -> bool {
        self.inner.is_none()
    }

    /// Release the resource. Returns `Ok(false)` if it was already released.
    pub fn release(&mut self) -> Result<bool> {
        match self.inner.take() {
            Some(resource) => {
                tracing::debug!(resource = resource.resource_name(), "Releasing resource");
                resource.release().map(|_| true)
            }
            None => Ok(false),
        }
    }
}

impl<T: Release> Drop for Owned<T> {
    fn drop(&mut self) {
        if let Some(resource) = self.inner.take() {
            if let Err(e) = resource.release() {
                tracing::warn!(
                    resource = resource.resource_name(),
                    error = %e,
                    "Failed to release resource on drop"
                );
            }
        }
    }
}
