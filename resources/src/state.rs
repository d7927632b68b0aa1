/// Loading state of a resource.
///
/// States are ordered: waiting for "at least `Loaded`" means waiting until
/// the state compares greater or equal. "Loading" is not a state of its own;
/// it is expressed by [`ResourceFlags::IS_QUEUED_FOR_LOADING`] and
/// [`ResourceFlags::IS_BEING_LOADED`].
///
/// [`ResourceFlags::IS_QUEUED_FOR_LOADING`]: crate::ResourceFlags::IS_QUEUED_FOR_LOADING
/// [`ResourceFlags::IS_BEING_LOADED`]: crate::ResourceFlags::IS_BEING_LOADED
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum ResourceState {
    /// Only reported for invalid handles.
    Invalid = 0,
    /// No data is loaded.
    #[default]
    Unloaded = 1,
    /// Loading finished, but the data could not be found or decoded.
    LoadedResourceMissing = 2,
    /// Content is available.
    Loaded = 3,
}

impl ResourceState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => ResourceState::Invalid,
            1 => ResourceState::Unloaded,
            2 => ResourceState::LoadedResourceMissing,
            _ => ResourceState::Loaded,
        }
    }

    /// `true` for [`ResourceState::Loaded`] and
    /// [`ResourceState::LoadedResourceMissing`]: no loading is pending.
    pub fn is_settled(&self) -> bool {
        *self >= ResourceState::LoadedResourceMissing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_are_ordered() {
        assert!(ResourceState::Invalid < ResourceState::Unloaded);
        assert!(ResourceState::Unloaded < ResourceState::LoadedResourceMissing);
        assert!(ResourceState::LoadedResourceMissing < ResourceState::Loaded);
    }

    #[test]
    fn round_trips_through_u8() {
        for state in [
            ResourceState::Invalid,
            ResourceState::Unloaded,
            ResourceState::LoadedResourceMissing,
            ResourceState::Loaded,
        ] {
            assert_eq!(ResourceState::from_u8(state as u8), state);
        }
    }

    #[test]
    fn settled_states() {
        assert!(!ResourceState::Unloaded.is_settled());
        assert!(ResourceState::LoadedResourceMissing.is_settled());
        assert!(ResourceState::Loaded.is_settled());
    }
}
