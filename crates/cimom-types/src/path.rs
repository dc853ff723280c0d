//! Object paths and key bindings.
//!
//! A `CimObjectPath` names one managed object: host + namespace + class name +
//! the key bindings that identify the instance within the class. Key bindings
//! use a restricted value set (embedded objects and instances can never be
//! keys); comparisons are order-insensitive over the binding list and
//! case-insensitive over names.

use crate::{CimName, Namespace};

/// The value of one key binding.
///
/// Deliberately narrower than `CimValue`: only boolean, numeric, string and
/// reference values can identify an object.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum KeyBindingValue {
    Boolean(bool),
    /// Unsigned integer keys (uint8..uint64 in the class declaration).
    Unsigned(u64),
    /// Signed integer keys (sint8..sint64 in the class declaration).
    Signed(i64),
    String(String),
    Reference(Box<CimObjectPath>),
}

impl KeyBindingValue {
    /// A short label for diagnostics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Boolean(_) => "boolean",
            Self::Unsigned(_) => "unsigned",
            Self::Signed(_) => "signed",
            Self::String(_) => "string",
            Self::Reference(_) => "reference",
        }
    }
}

/// One named key binding.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CimKeyBinding {
    pub name: CimName,
    pub value: KeyBindingValue,
}

impl CimKeyBinding {
    pub fn new(name: impl Into<CimName>, value: KeyBindingValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// A fully- or partially-qualified CIM object path.
///
/// `host` and `namespace` may be empty on paths produced by providers; the
/// response aggregation layer fills them in before anything is returned to a
/// client, because downstream consumers assume fully-qualified paths.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct CimObjectPath {
    pub host: String,
    pub namespace: Namespace,
    pub class_name: CimName,
    pub key_bindings: Vec<CimKeyBinding>,
}

impl CimObjectPath {
    /// A path with class name only (no host/namespace/keys yet).
    pub fn with_class(class_name: impl Into<CimName>) -> Self {
        Self {
            class_name: class_name.into(),
            ..Self::default()
        }
    }

    /// Builder-style namespace setter.
    #[must_use]
    pub fn in_namespace(mut self, ns: impl Into<Namespace>) -> Self {
        self.namespace = ns.into();
        self
    }

    /// Append a key binding.
    pub fn push_key(&mut self, name: impl Into<CimName>, value: KeyBindingValue) {
        self.key_bindings.push(CimKeyBinding::new(name, value));
    }

    /// Find a key binding by name, case-insensitively.
    #[must_use]
    pub fn key_binding(&self, name: &str) -> Option<&CimKeyBinding> {
        self.key_bindings
            .iter()
            .find(|kb| kb.name.equals_ignore_case(name))
    }

    /// Whether host and namespace are both set.
    #[must_use]
    pub fn is_fully_qualified(&self) -> bool {
        !self.host.is_empty() && !self.namespace.is_empty()
    }
}

impl PartialEq for CimObjectPath {
    /// Paths are equal when host, namespace and class match (all
    /// case-insensitively) and the key binding sets are equal regardless of
    /// declaration order.
    fn eq(&self, other: &Self) -> bool {
        if !self.host.eq_ignore_ascii_case(&other.host)
            || self.namespace != other.namespace
            || self.class_name != other.class_name
            || self.key_bindings.len() != other.key_bindings.len()
        {
            return false;
        }
        self.key_bindings.iter().all(|kb| {
            other
                .key_binding(kb.name.as_str())
                .is_some_and(|o| o.value == kb.value)
        })
    }
}

impl std::fmt::Display for CimObjectPath {
    /// WBEM-URI-ish rendering for logs: `//host/namespace:Class.Key="v",...`
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.host.is_empty() {
            write!(f, "//{}/", self.host)?;
        }
        if !self.namespace.is_empty() {
            write!(f, "{}:", self.namespace)?;
        }
        write!(f, "{}", self.class_name)?;
        for (i, kb) in self.key_bindings.iter().enumerate() {
            let sep = if i == 0 { '.' } else { ',' };
            match &kb.value {
                KeyBindingValue::String(s) => write!(f, "{sep}{}=\"{s}\"", kb.name)?,
                KeyBindingValue::Boolean(b) => write!(f, "{sep}{}={b}", kb.name)?,
                KeyBindingValue::Unsigned(u) => write!(f, "{sep}{}={u}", kb.name)?,
                KeyBindingValue::Signed(s) => write!(f, "{sep}{}={s}", kb.name)?,
                KeyBindingValue::Reference(r) => write!(f, "{sep}{}={r}", kb.name)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_path() -> CimObjectPath {
        let mut p = CimObjectPath::with_class("Acme_Disk").in_namespace("root/cimv2");
        p.host = "server1".into();
        p.push_key("Id", KeyBindingValue::String("disk0".into()));
        p.push_key("Unit", KeyBindingValue::Unsigned(3));
        p
    }

    #[test]
    fn key_lookup_is_case_insensitive() {
        let p = sample_path();
        assert!(p.key_binding("ID").is_some());
        assert!(p.key_binding("unit").is_some());
        assert!(p.key_binding("missing").is_none());
    }

    #[test]
    fn equality_ignores_key_order_and_case() {
        let a = sample_path();
        let mut b = CimObjectPath::with_class("ACME_DISK").in_namespace("ROOT/CIMV2");
        b.host = "SERVER1".into();
        b.push_key("unit", KeyBindingValue::Unsigned(3));
        b.push_key("id", KeyBindingValue::String("disk0".into()));
        assert_eq!(a, b);
    }

    #[test]
    fn inequality_on_key_value() {
        let a = sample_path();
        let mut b = sample_path();
        b.key_bindings[1].value = KeyBindingValue::Unsigned(4);
        assert_ne!(a, b);
    }

    #[test]
    fn display_rendering() {
        let p = sample_path();
        assert_eq!(
            p.to_string(),
            "//server1/root/cimv2:Acme_Disk.Id=\"disk0\",Unit=3"
        );
    }

    #[test]
    fn paths_round_trip_through_json() {
        let mut p = sample_path();
        p.push_key(
            "Backing",
            KeyBindingValue::Reference(Box::new(
                CimObjectPath::with_class("Acme_Pool").in_namespace("root/cimv2"),
            )),
        );
        let json = serde_json::to_string(&p).unwrap();
        let back: CimObjectPath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn qualification_check() {
        let mut p = CimObjectPath::with_class("Acme_Disk");
        assert!(!p.is_fully_qualified());
        p.namespace = "root/cimv2".into();
        assert!(!p.is_fully_qualified());
        p.host = "h".into();
        assert!(p.is_fully_qualified());
    }
}
