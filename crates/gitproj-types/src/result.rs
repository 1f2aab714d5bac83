//! Result codes spoken across the virtualization boundary.
//!
//! The OS provider answers with a [`ProviderResult`]; the dispatcher answers
//! the OS with a [`CallbackResult`]. The two sets are deliberately identical
//! so the mapping is 1:1 and total.

use serde::{Deserialize, Serialize};

/// What a dispatcher callback reports back to the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallbackResult {
    Success,
    /// The command is not (yet) completed. Also returned for cancelled
    /// commands, which are never completed.
    Pending,
    PathNotFound,
    IoError,
    InvalidArgs,
    AccessDenied,
    /// The operation is not supported by this engine.
    Unsupported,
}

impl CallbackResult {
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

/// What an OS provider write operation reports to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderResult {
    Success,
    Pending,
    PathNotFound,
    IoError,
    InvalidArgs,
    AccessDenied,
    Unsupported,
}

impl ProviderResult {
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl From<ProviderResult> for CallbackResult {
    fn from(result: ProviderResult) -> Self {
        match result {
            ProviderResult::Success => Self::Success,
            ProviderResult::Pending => Self::Pending,
            ProviderResult::PathNotFound => Self::PathNotFound,
            ProviderResult::IoError => Self::IoError,
            ProviderResult::InvalidArgs => Self::InvalidArgs,
            ProviderResult::AccessDenied => Self::AccessDenied,
            ProviderResult::Unsupported => Self::Unsupported,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ProviderResult::Success, CallbackResult::Success)]
    #[case(ProviderResult::Pending, CallbackResult::Pending)]
    #[case(ProviderResult::PathNotFound, CallbackResult::PathNotFound)]
    #[case(ProviderResult::IoError, CallbackResult::IoError)]
    #[case(ProviderResult::InvalidArgs, CallbackResult::InvalidArgs)]
    #[case(ProviderResult::AccessDenied, CallbackResult::AccessDenied)]
    #[case(ProviderResult::Unsupported, CallbackResult::Unsupported)]
    fn test_provider_result_maps_one_to_one(
        #[case] provider: ProviderResult,
        #[case] expected: CallbackResult,
    ) {
        assert_eq!(CallbackResult::from(provider), expected);
    }
}
