use std::sync::atomic::{AtomicU16, Ordering};

use bitflags::bitflags;

bitflags! {
    /// Per-resource flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ResourceFlags: u16 {
        /// Content must be updated on the main thread.
        const UPDATE_ON_MAIN_THREAD = 1 << 0;
        /// Data is produced without touching the file system; the data load
        /// runs in the content update task instead of on a file access worker.
        const NO_FILE_ACCESS_REQUIRED = 1 << 1;
        /// The resource may be reloaded from its source.
        const IS_RELOADABLE = 1 << 2;
        /// The resource has exactly one entry in the loading queue.
        const IS_QUEUED_FOR_LOADING = 1 << 3;
        /// A data loader took the resource out of the queue and is working
        /// on it.
        const IS_BEING_LOADED = 1 << 4;
        /// The next load uses a per-resource loader instead of the type
        /// loader.
        const HAS_CUSTOM_DATA_LOADER = 1 << 5;
        /// Non-forced reloads are ignored, e.g. after content was provided
        /// by a custom loader.
        const PREVENT_FILE_RELOAD = 1 << 6;
        /// Content was created from a descriptor rather than loaded.
        const IS_CREATED_RESOURCE = 1 << 7;
        /// A loading fallback is set for this resource.
        const RESOURCE_HAS_FALLBACK = 1 << 8;
    }
}

/// [`ResourceFlags`] that can be read without the manager lock.
///
/// Changes to [`ResourceFlags::IS_QUEUED_FOR_LOADING`] and
/// [`ResourceFlags::IS_BEING_LOADED`] are only made while holding the manager
/// lock, together with the matching loading queue change.
#[derive(Debug, Default)]
pub(crate) struct AtomicResourceFlags(AtomicU16);

impl AtomicResourceFlags {
    pub(crate) fn new(flags: ResourceFlags) -> Self {
        Self(AtomicU16::new(flags.bits()))
    }

    pub(crate) fn get(&self) -> ResourceFlags {
        ResourceFlags::from_bits_truncate(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn contains(&self, flags: ResourceFlags) -> bool {
        self.get().contains(flags)
    }

    pub(crate) fn insert(&self, flags: ResourceFlags) {
        self.0.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    pub(crate) fn remove(&self, flags: ResourceFlags) {
        self.0.fetch_and(!flags.bits(), Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_remove() {
        let flags = AtomicResourceFlags::new(ResourceFlags::IS_RELOADABLE);
        flags.insert(ResourceFlags::IS_QUEUED_FOR_LOADING);
        assert!(flags.contains(ResourceFlags::IS_RELOADABLE | ResourceFlags::IS_QUEUED_FOR_LOADING));

        flags.remove(ResourceFlags::IS_QUEUED_FOR_LOADING);
        flags.insert(ResourceFlags::IS_BEING_LOADED);
        assert_eq!(
            flags.get(),
            ResourceFlags::IS_RELOADABLE | ResourceFlags::IS_BEING_LOADED
        );
    }
}
