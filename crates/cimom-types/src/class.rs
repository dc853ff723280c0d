//! Schema-level classes, properties, qualifiers, and instances.
//!
//! These are the uncompacted, heap-allocated CIM objects that flow through the
//! dispatcher layer and out of the repository. The compact single-allocation
//! encoding is built *from* these; it never replaces them at this layer.

use crate::path::CimObjectPath;
use crate::value::{CimType, CimValue};
use crate::{CimName, Namespace};

/// Qualifier flavor flags controlling propagation and override rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct QualifierFlavor {
    /// Whether subclasses may override the qualifier value.
    pub overridable: bool,
    /// Whether the qualifier propagates to subclasses.
    pub to_subclass: bool,
}

impl Default for QualifierFlavor {
    fn default() -> Self {
        Self {
            overridable: true,
            to_subclass: true,
        }
    }
}

/// A CIM qualifier attached to a class or property.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CimQualifier {
    pub name: CimName,
    pub value: CimValue,
    pub flavor: QualifierFlavor,
    /// Set when the qualifier was inherited rather than declared locally.
    pub propagated: bool,
}

impl CimQualifier {
    pub fn new(name: impl Into<CimName>, value: CimValue) -> Self {
        Self {
            name: name.into(),
            value,
            flavor: QualifierFlavor::default(),
            propagated: false,
        }
    }

    /// The standard `Key` qualifier with value true.
    pub fn key() -> Self {
        Self::new("Key", CimValue::Boolean(true))
    }
}

/// A property declaration (on a class) or property value (on an instance).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CimProperty {
    pub name: CimName,
    /// `None` means "not set": the class default (or NULL) applies.
    pub value: Option<CimValue>,
    pub cim_type: CimType,
    pub is_array: bool,
    pub qualifiers: Vec<CimQualifier>,
    /// The class in which this property was first declared.
    pub class_origin: CimName,
    /// Set when the property was inherited rather than declared locally.
    pub propagated: bool,
    /// For reference-typed properties, the declared target class.
    pub reference_class: CimName,
}

impl CimProperty {
    /// A property declaration with no value set.
    pub fn declared(name: impl Into<CimName>, cim_type: CimType, is_array: bool) -> Self {
        Self {
            name: name.into(),
            value: None,
            cim_type,
            is_array,
            qualifiers: Vec::new(),
            class_origin: CimName::new(""),
            propagated: false,
            reference_class: CimName::new(""),
        }
    }

    /// A property declaration with a default (class) or explicit (instance) value.
    pub fn with_value(name: impl Into<CimName>, value: CimValue) -> Self {
        let cim_type = value.cim_type();
        let is_array = value.is_array();
        Self {
            value: Some(value),
            ..Self::declared(name, cim_type, is_array)
        }
    }

    /// Builder-style qualifier attachment.
    #[must_use]
    pub fn with_qualifier(mut self, q: CimQualifier) -> Self {
        self.qualifiers.push(q);
        self
    }

    /// Mark this property as a key (attaches the `Key` qualifier).
    #[must_use]
    pub fn key(self) -> Self {
        self.with_qualifier(CimQualifier::key())
    }

    /// Whether the property carries a `Key` qualifier with value true.
    #[must_use]
    pub fn is_key(&self) -> bool {
        self.qualifiers.iter().any(|q| {
            q.name.equals_ignore_case("Key") && matches!(q.value, CimValue::Boolean(true))
        })
    }
}

/// A schema-level CIM class definition.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CimClass {
    pub class_name: CimName,
    pub super_class: CimName,
    pub namespace: Namespace,
    pub qualifiers: Vec<CimQualifier>,
    pub properties: Vec<CimProperty>,
}

impl CimClass {
    pub fn new(class_name: impl Into<CimName>, namespace: impl Into<Namespace>) -> Self {
        Self {
            class_name: class_name.into(),
            super_class: CimName::new(""),
            namespace: namespace.into(),
            qualifiers: Vec::new(),
            properties: Vec::new(),
        }
    }

    /// Builder-style superclass setter.
    #[must_use]
    pub fn derived_from(mut self, super_class: impl Into<CimName>) -> Self {
        self.super_class = super_class.into();
        self
    }

    /// Builder-style property attachment.
    #[must_use]
    pub fn with_property(mut self, p: CimProperty) -> Self {
        self.properties.push(p);
        self
    }

    /// Find a property declaration by name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&CimProperty> {
        self.properties
            .iter()
            .find(|p| p.name.equals_ignore_case(name))
    }

    /// The names of all key properties, in declaration order.
    #[must_use]
    pub fn key_property_names(&self) -> Vec<&CimName> {
        self.properties
            .iter()
            .filter(|p| p.is_key())
            .map(|p| &p.name)
            .collect()
    }
}

/// A schema-level CIM instance.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CimInstance {
    pub class_name: CimName,
    pub namespace: Namespace,
    pub qualifiers: Vec<CimQualifier>,
    pub properties: Vec<CimProperty>,
    /// The instance's object path, if already derived.
    pub path: Option<CimObjectPath>,
}

impl CimInstance {
    pub fn new(class_name: impl Into<CimName>) -> Self {
        Self {
            class_name: class_name.into(),
            namespace: Namespace::new(""),
            qualifiers: Vec::new(),
            properties: Vec::new(),
            path: None,
        }
    }

    /// Builder-style property attachment.
    #[must_use]
    pub fn with_property(mut self, p: CimProperty) -> Self {
        self.properties.push(p);
        self
    }

    /// Find a property by name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&CimProperty> {
        self.properties
            .iter()
            .find(|p| p.name.equals_ignore_case(name))
    }

    /// Set or replace a property value.
    pub fn set_property(&mut self, name: impl Into<CimName>, value: CimValue) {
        let name = name.into();
        if let Some(p) = self
            .properties
            .iter_mut()
            .find(|p| p.name == name)
        {
            p.cim_type = value.cim_type();
            p.is_array = value.is_array();
            p.value = Some(value);
        } else {
            self.properties.push(CimProperty::with_value(name, value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disk_class() -> CimClass {
        CimClass::new("Acme_Disk", "root/cimv2")
            .derived_from("CIM_StorageExtent")
            .with_property(CimProperty::declared("Id", CimType::String, false).key())
            .with_property(CimProperty::with_value("BlockSize", CimValue::Uint32(512)))
    }

    #[test]
    fn key_qualifier_detection() {
        let c = disk_class();
        assert!(c.property("Id").unwrap().is_key());
        assert!(!c.property("BlockSize").unwrap().is_key());
        let keys = c.key_property_names();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].as_str(), "Id");
    }

    #[test]
    fn property_lookup_is_case_insensitive() {
        let c = disk_class();
        assert!(c.property("blocksize").is_some());
        assert!(c.property("BLOCKSIZE").is_some());
        assert!(c.property("nope").is_none());
    }

    #[test]
    fn instance_set_property_replaces() {
        let mut i = CimInstance::new("Acme_Disk");
        i.set_property("BlockSize", CimValue::Uint32(512));
        i.set_property("BlockSize", CimValue::Uint32(4096));
        assert_eq!(i.properties.len(), 1);
        assert_eq!(
            i.property("BlockSize").unwrap().value,
            Some(CimValue::Uint32(4096))
        );
    }

    #[test]
    fn class_defaults_are_plain_values() {
        let c = disk_class();
        let p = c.property("BlockSize").unwrap();
        assert_eq!(p.cim_type, CimType::Uint32);
        assert!(!p.is_array);
        assert_eq!(p.value, Some(CimValue::Uint32(512)));
    }
}
