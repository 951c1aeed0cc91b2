//! Fault types raised by codecs and the registry.
//!
//! Faults are split by when they can happen and what they abort:
//!
//! - [`SchemaMissingFault`]: construction time, fatal for that codec.
//! - [`SerializationFault`]: any encode/decode failure; aborts the current
//!   record only. Field-level failures are wrapped in
//!   [`SerializationFault::Field`] on their way out so the field and owning
//!   type are always part of the message.
//! - [`InvalidReferenceFault`]: a reference id that does not resolve in the
//!   current context (corrupt stream or cross-context reference).
//! - [`CloneFailure`]: raised by clone strategies and never propagated; the
//!   cloning codec falls back to direct encoding.
//! - [`RegistryError`]: a registry could not be assembled.

use std::io;

/// No schema exists for a type a codec is being built for.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no schema is available for type `{type_name}`")]
pub struct SchemaMissingFault {
    /// The stable name of the type that was looked up.
    pub type_name: String,
}

/// A reference id did not resolve in the current context's reference table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("reference id {id} does not resolve in this context")]
pub struct InvalidReferenceFault {
    /// The id read from the stream.
    pub id: u32,
}

/// A clone strategy could not produce a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("clone of `{type_name}` failed: {reason}")]
pub struct CloneFailure {
    /// The stable name of the type being cloned.
    pub type_name: String,
    /// Human readable cause.
    pub reason: String,
}

impl CloneFailure {
    /// Creates a clone failure for `type_name`.
    pub fn new(
        type_name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self { type_name: type_name.into(), reason: reason.into() }
    }
}

/// Encoding or decoding of a single record failed.
#[derive(Debug, thiserror::Error)]
pub enum SerializationFault {
    /// A field could not be read or assigned.
    #[error("field `{field}` of `{type_name}`: {source}")]
    Field {
        /// Stable name of the type owning the field.
        type_name: String,
        /// Name of the field.
        field: String,
        /// The underlying fault.
        #[source]
        source: Box<SerializationFault>,
    },

    /// The runtime type has no codec under the active policy.
    #[error("type `{type_name}` is not registered")]
    UnregisteredType {
        /// Best available name of the runtime type.
        type_name: String,
    },

    /// The stream carries a type tag this registry does not know.
    #[error("unknown type tag {tag}")]
    UnknownTag {
        /// The tag read from the stream.
        tag: u32,
    },

    /// The stream names a type this registry does not know.
    #[error("unknown type name `{type_name}`")]
    UnknownTypeName {
        /// The name read from the stream.
        type_name: String,
    },

    /// A retired type's placeholder codec was used.
    #[error("type `{type_name}` is retired and can no longer be encoded")]
    RetiredType {
        /// The retired type's name.
        type_name: String,
    },

    /// A codec was handed a value of the wrong runtime type.
    #[error("expected a value of type `{expected}`")]
    TypeMismatch {
        /// The type the codec handles.
        expected: String,
    },

    /// A reference resolved, but to an object of another type.
    #[error("reference id {id} does not point to a `{expected}`")]
    ReferenceTypeMismatch {
        /// The id read from the stream.
        id: u32,
        /// The type the reading codec expected.
        expected: String,
    },

    /// A reference id did not resolve.
    #[error(transparent)]
    InvalidReference(#[from] InvalidReferenceFault),

    /// A value was outside the range the wire format can represent.
    #[error("value out of range: {0}")]
    OutOfRange(String),

    /// The underlying bytes were truncated or malformed.
    #[error("malformed record: {0}")]
    Io(#[from] io::Error),
}

impl SerializationFault {
    /// Wraps this fault with the field and type it occurred in.
    #[must_use]
    pub fn in_field(self, type_name: &str, field: &str) -> Self {
        Self::Field {
            type_name: type_name.to_owned(),
            field: field.to_owned(),
            source: Box::new(self),
        }
    }

    /// Creates a [`SerializationFault::TypeMismatch`] for `expected`.
    #[must_use]
    pub fn type_mismatch(expected: &str) -> Self {
        Self::TypeMismatch { expected: expected.to_owned() }
    }

    /// Returns the innermost fault, looking through field annotations.
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        let mut fault = self;
        while let Self::Field { source, .. } = fault {
            fault = source;
        }
        fault
    }

    /// Returns the `(type, field)` path from the outermost to the innermost
    /// field annotation.
    #[must_use]
    pub fn field_path(&self) -> Vec<(&str, &str)> {
        let mut path = Vec::new();
        let mut fault = self;
        while let Self::Field { type_name, field, source } = fault {
            path.push((type_name.as_str(), field.as_str()));
            fault = source;
        }
        path
    }
}

/// A registry could not be assembled.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// A codec needed a schema that the schema source does not have.
    #[error(transparent)]
    SchemaMissing(#[from] SchemaMissingFault),

    /// Two codecs were registered for the same runtime type.
    #[error("type `{type_name}` is already registered")]
    DuplicateType {
        /// Name of the type registered twice.
        type_name: String,
    },

    /// Two codecs were registered under the same type name.
    #[error("type name `{type_name}` is already in use")]
    DuplicateName {
        /// The conflicting name.
        type_name: String,
    },

    /// A by-name registration was attempted under the strict policy.
    #[error(
        "type `{type_name}` cannot be registered by name while unregistered \
         types are rejected"
    )]
    ByNameDisabled {
        /// The type that was registered.
        type_name: String,
    },

    /// A field override named a field the record does not serialize.
    #[error("`{type_name}` has no serialized field named `{field}`")]
    UnknownField {
        /// Stable name of the record type.
        type_name: String,
        /// The requested field.
        field: String,
    },

    /// A field override handles another type than the field holds.
    #[error("codec `{codec}` cannot encode field `{field}` of `{type_name}`")]
    OverrideTypeMismatch {
        /// Stable name of the record type.
        type_name: String,
        /// The overridden field.
        field: String,
        /// Name of the rejected codec.
        codec: String,
    },
}
