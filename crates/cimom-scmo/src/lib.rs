//! Compact, relocatable CIM class and instance descriptors.
//!
//! One class descriptor per (class, namespace), shared read-only behind an
//! `Arc` by every instance of that class; one small arena block per instance
//! holding only the value slots and identity overrides. All internal
//! references are base-relative `(offset, length)` handles, so a block can
//! grow, be memcpy'd, or cross a process boundary without pointer fix-ups.
//!
//! | module     | contents                                                  |
//! |------------|-----------------------------------------------------------|
//! | `arena`    | the growable single-allocation buffer and its handles     |
//! | `hash`     | case-insensitive name hashing, fixed-bucket chain lookup  |
//! | `slot`     | the 16-byte value-slot encoding for every CIM type        |
//! | `class`    | the shared class descriptor (properties, keys, qualifiers)|
//! | `instance` | the copy-on-write instance descriptor                     |
//! | `wire`     | opaque transmissible blocks for the provider-agent hop    |
//!
//! Encoding and lookup paths report failure through small result-code enums
//! ([`TypeCheckResult`], [`PropertyGet`], [`SetPropertyError`],
//! [`KeyBindingError`]) rather than boxed errors; these run on every property
//! access and never allocate on the failure path.

pub mod arena;
pub mod class;
pub mod hash;
pub mod instance;
mod slot;
pub mod wire;

pub use arena::{Arena, ArenaRef, ARENA_MAGIC, HEADER_SIZE};
pub use class::{ScmoClass, SharedClass};
pub use instance::{InstanceBuildError, ScmoInstance};
pub use wire::WireError;

use cimom_types::CimType;
use cimom_types::CimValue;

/// Outcome of checking a value's type against a property declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCheckResult {
    /// The value matches the declared type and arity.
    Ok,
    /// Scalar/array arity matches but the element type differs.
    WrongType,
    /// An array value was supplied for a scalar property.
    IsArray,
    /// A scalar value was supplied for an array property.
    NotAnArray,
}

/// Outcome of a property read.
///
/// `Null` still carries the declared type and arity so callers can render a
/// typed null without a second class lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyGet {
    /// The property is set (explicitly, or via the class default).
    Value {
        cim_type: CimType,
        is_array: bool,
        value: CimValue,
    },
    /// The property exists but has no value.
    Null { cim_type: CimType, is_array: bool },
    /// No such property (or it is hidden by the active filter).
    NotFound,
}

/// Why a property write was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetPropertyError {
    /// No property with that name on the class.
    NotFound,
    /// The element type differs from the declaration.
    WrongType,
    /// An array value was supplied for a scalar property.
    IsArray,
    /// A scalar value was supplied for an array property.
    NotAnArray,
}

/// Why a key-binding write was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyBindingError {
    /// The binding value cannot be coerced to the declared key type.
    WrongType,
}
