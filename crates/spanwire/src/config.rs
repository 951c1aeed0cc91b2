//! Registry configuration.
//!
//! A [`Config`] is a zero-sized type whose associated functions supply the
//! registry's tunables. Every function has a default, so a custom
//! configuration only overrides what it changes:
//!
//! ```ignore
//! use spanwire::{Config, TypeRegistry, UnregisteredTypePolicy};
//!
//! struct Collector;
//!
//! impl Config for Collector {
//!     // one bundle per sender thread
//!     fn context_pool_size() -> usize { 16 }
//! }
//!
//! let builder = TypeRegistry::builder_with::<Collector>(schemas);
//! ```

/// What the registry does with a value whose runtime type has no tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UnregisteredTypePolicy {
    /// Fail with
    /// [`SerializationFault::UnregisteredType`](crate::SerializationFault::UnregisteredType).
    #[default]
    Strict,

    /// Write tag `0` followed by the type's name, for types registered with
    /// [`RegistryBuilder::by_name`](crate::RegistryBuilder::by_name).
    ///
    /// Larger and slower than a tag; meant for types whose registration
    /// cannot be coordinated across releases.
    ByName,
}

/// Tunables of a [`TypeRegistry`](crate::TypeRegistry).
pub trait Config: Send + Sync + 'static {
    /// Handling of values without a tag. Defaults to
    /// [`UnregisteredTypePolicy::Strict`].
    #[must_use]
    fn unregistered_type_policy() -> UnregisteredTypePolicy {
        UnregisteredTypePolicy::Strict
    }

    /// Number of ready encoder and context bundles kept for reuse. Defaults
    /// to 4, which suits a handful of sender threads; extra concurrent
    /// operations allocate a bundle and drop it afterwards.
    #[must_use]
    fn context_pool_size() -> usize { 4 }

    /// Initial capacity, in bytes, of a pooled encoder's buffer.
    #[must_use]
    fn initial_buffer_capacity() -> usize { 256 }
}

/// The default configuration: strict tags, a pool of 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DefaultConfig;

impl Config for DefaultConfig {}

/// [`DefaultConfig`] with [`UnregisteredTypePolicy::ByName`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ByNameConfig;

impl Config for ByNameConfig {
    fn unregistered_type_policy() -> UnregisteredTypePolicy {
        UnregisteredTypePolicy::ByName
    }
}
