use crate::version::ModloaderType;

/// Typed failures raised by profile and server operations.
///
/// Functions in this crate return `anyhow::Result`; these variants are
/// attached at the raise site so callers can discriminate with
/// `err.downcast_ref::<ProfileError>()`.
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    /// Malformed caller input, rejected before any mutation.
    #[error("Invalid input: {0}")]
    Validation(String),

    /// A profile, or a server within one profile, already uses this name.
    #[error("\"{0}\" already exists")]
    DuplicateName(String),

    /// The requested version/loader pair could not be resolved.
    #[error("Cannot resolve version {version} for loader {loader}")]
    Resolution {
        version: String,
        loader: ModloaderType,
    },

    /// A content-store write failed partway through a pack operation.
    /// Entries stored before the failure are left in place.
    #[error("Pack aborted while storing {hash}")]
    PackFailed { hash: String },

    /// Launch metadata for a resolved version is not installed locally.
    #[error("Version {0} is not installed")]
    VersionNotInstalled(String),

    /// The named profile or server does not exist in the registry.
    #[error("\"{0}\" was not found")]
    NotFound(String),
}
