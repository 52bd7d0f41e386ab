use ash::vk;

use crate::registry::DispatchKey;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Dispatch key {0:?} is already registered")]
    DuplicateKey(DispatchKey),

    #[error("Cannot register a null handle")]
    NullHandle,
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerError {
    #[error("No loader link info in the {0} create info")]
    MissingLinkInfo(&'static str),

    #[error("Next link does not expose {0}")]
    UnresolvedEntryPoint(&'static str),

    #[error("Next link failed to create {object}: {result}")]
    ChainCreate {
        object: &'static str,
        result: vk::Result,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl From<LayerError> for vk::Result {
    fn from(err: LayerError) -> Self {
        match err {
            // The chain's own failure goes back up untouched.
            LayerError::ChainCreate { result, .. } => result,
            LayerError::MissingLinkInfo(_)
            | LayerError::UnresolvedEntryPoint(_)
            | LayerError::Registry(_) => vk::Result::ERROR_INITIALIZATION_FAILED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_failure_is_returned_verbatim() {
        let err = LayerError::ChainCreate {
            object: "instance",
            result: vk::Result::ERROR_INCOMPATIBLE_DRIVER,
        };
        assert_eq!(vk::Result::from(err), vk::Result::ERROR_INCOMPATIBLE_DRIVER);
    }

    #[test]
    fn setup_failures_map_to_initialization_failed() {
        assert_eq!(
            vk::Result::from(LayerError::MissingLinkInfo("device")),
            vk::Result::ERROR_INITIALIZATION_FAILED
        );
        assert_eq!(
            vk::Result::from(LayerError::from(RegistryError::NullHandle)),
            vk::Result::ERROR_INITIALIZATION_FAILED
        );
    }

    #[test]
    fn messages() {
        assert_eq!(
            LayerError::UnresolvedEntryPoint("vkCreateDevice").to_string(),
            "Next link does not expose vkCreateDevice"
        );
        assert_eq!(
            RegistryError::DuplicateKey(DispatchKey::from_raw(0x1000)).to_string(),
            "Dispatch key DispatchKey(0x1000) is already registered"
        );
    }
}
