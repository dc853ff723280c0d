//! The compact instance descriptor.
//!
//! One arena block per instance, parallel to its shared class descriptor:
//! a fixed root record, a run of value slots indexed by class property index,
//! a run of key-binding slots indexed by class key index, a linked list of
//! user-defined key bindings (keys not declared in the schema), and an
//! optional property filter (bitmask plus ascending index list).
//!
//! Sharing is reference-counted through `Arc`; every mutator goes through
//! copy-on-write, so concurrent readers of a shared arena never observe
//! in-place changes. Concurrent mutation of one instance still requires
//! external synchronization (single-writer per instance).

use std::sync::Arc;

use cimom_types::{
    CimInstance, CimName, CimObjectPath, CimProperty, CimType, CimValue, KeyBindingValue,
};

use crate::arena::{Arena, ArenaRef, HEADER_SIZE};
use crate::class::{ScmoClass, SharedClass};
use crate::slot::{self, ExtIndex, SLOT_SIZE};
use crate::{KeyBindingError, PropertyGet, SetPropertyError, TypeCheckResult};

// Root record, at a fixed offset right after the arena header.
const ROOT: u32 = HEADER_SIZE;
const ROOT_HOST: u32 = 0;
const ROOT_NAMESPACE: u32 = 8;
const ROOT_CLASS_NAME: u32 = 16;
const ROOT_VALUES: u32 = 24;
const ROOT_KEYS: u32 = 32;
const ROOT_USER_KEYS: u32 = 40;
const ROOT_FLAGS: u32 = 44;
const ROOT_FILTER_MASK: u32 = 48;
const ROOT_FILTER_LIST: u32 = 56;
const ROOT_SIZE: u32 = 64;

const FLAG_COMPROMISED: u8 = 0x01;
const FLAG_PATH_ONLY: u8 = 0x02;
const FLAG_FILTERED: u8 = 0x04;

// User-defined key-binding node (linked list, appended at the tail).
const UKEY_NAME: u32 = 0;
const UKEY_NEXT: u32 = 8;
const UKEY_HAS_NEXT: u32 = 12;
const UKEY_VALUE: u32 = 16;
const UKEY_NODE_SIZE: u32 = 32;

/// A compact, copy-on-write CIM instance bound to a shared class descriptor.
#[derive(Clone, Debug)]
pub struct ScmoInstance {
    rep: Arc<InstanceRep>,
}

#[derive(Debug)]
struct InstanceRep {
    class: SharedClass,
    arena: Arena,
    ext_refs: ExtIndex,
}

impl Clone for InstanceRep {
    /// Deep copy: the arena block is duplicated and every live external
    /// reference is recursively deep-cloned. The class descriptor is shared
    /// (refcount bump), never duplicated.
    fn clone(&self) -> Self {
        Self {
            class: Arc::clone(&self.class),
            arena: self.arena.clone(),
            ext_refs: self
                .ext_refs
                .iter()
                .map(|e| e.as_ref().map(ScmoInstance::deep_clone))
                .collect(),
        }
    }
}

impl ScmoInstance {
    /// An empty instance of the given class: every property unset, every key
    /// binding unset.
    #[must_use]
    pub fn from_class(class: SharedClass) -> Self {
        let mut arena = Arena::new();
        let root = arena.allocate(ROOT_SIZE);
        debug_assert_eq!(root, ROOT);

        let values_len = class.property_count() * SLOT_SIZE;
        let values = arena.allocate(values_len);
        arena.put_ref(
            ROOT + ROOT_VALUES,
            ArenaRef {
                start: values,
                len: values_len,
            },
        );
        let keys_len = class.key_count() * SLOT_SIZE;
        let keys = arena.allocate(keys_len);
        arena.put_ref(
            ROOT + ROOT_KEYS,
            ArenaRef {
                start: keys,
                len: keys_len,
            },
        );

        Self {
            rep: Arc::new(InstanceRep {
                class,
                arena,
                ext_refs: Vec::new(),
            }),
        }
    }

    /// An instance carrying only identity: host, namespace, class name and
    /// the key bindings taken from `path`.
    #[must_use]
    pub fn from_path(class: SharedClass, path: &CimObjectPath) -> Self {
        let mut inst = Self::from_class(class);
        inst.set_host(&path.host);
        if !path.namespace.is_empty() {
            inst.set_namespace(path.namespace.as_str());
        }
        if !path.class_name.is_empty() {
            inst.set_class_name(path.class_name.as_str());
        }
        for kb in &path.key_bindings {
            // Undeclared keys land in the user-defined list; declared keys
            // that fail coercion are dropped rather than failing the build.
            if let Err(err) = inst.set_key_binding(kb.name.as_str(), &kb.value) {
                tracing::warn!(
                    class = path.class_name.as_str(),
                    key = kb.name.as_str(),
                    ?err,
                    "dropping key binding that does not fit its declared type"
                );
            }
        }
        let rep = inst.make_mut();
        let flags = rep.arena.get_u8(ROOT + ROOT_FLAGS);
        rep.arena.put_u8(ROOT + ROOT_FLAGS, flags | FLAG_PATH_ONLY);
        inst
    }

    /// Encode a full schema-level instance against its class descriptor.
    ///
    /// Every set property is validated and encoded; key bindings come from
    /// the instance path when present, otherwise they are derived from the
    /// key properties' values.
    pub fn from_instance(
        class: SharedClass,
        instance: &CimInstance,
    ) -> Result<Self, InstanceBuildError> {
        let mut inst = Self::from_class(class);
        if !instance.namespace.is_empty() {
            inst.set_namespace(instance.namespace.as_str());
        }
        if !instance.class_name.is_empty() {
            inst.set_class_name(instance.class_name.as_str());
        }
        for prop in &instance.properties {
            if let Some(value) = &prop.value {
                inst.set_property(prop.name.as_str(), value).map_err(|kind| {
                    InstanceBuildError {
                        property: prop.name.as_str().to_owned(),
                        kind,
                    }
                })?;
            }
        }
        match &instance.path {
            Some(path) => {
                inst.set_host(&path.host);
                for kb in &path.key_bindings {
                    if let Err(err) = inst.set_key_binding(kb.name.as_str(), &kb.value) {
                        tracing::warn!(
                            class = instance.class_name.as_str(),
                            key = kb.name.as_str(),
                            ?err,
                            "dropping key binding that does not fit its declared type"
                        );
                    }
                }
            }
            None => inst.build_key_bindings_from_properties(),
        }
        Ok(inst)
    }

    /// Nested descriptor for an embedded object/instance value.
    ///
    /// The embedded instance describes its own shape, so the class always
    /// resolves; if population still fails the result is an explicitly empty,
    /// compromised descriptor for the caller to check, never a panic.
    #[must_use]
    pub(crate) fn from_embedded(instance: &CimInstance) -> Self {
        let class = Arc::new(ScmoClass::from_instance_shape(instance));
        match Self::from_instance(Arc::clone(&class), instance) {
            Ok(inst) => inst,
            Err(err) => {
                tracing::warn!(
                    class = instance.class_name.as_str(),
                    %err,
                    "embedded instance failed to encode, storing empty descriptor"
                );
                let mut empty = Self::from_class(class);
                empty.mark_compromised();
                empty
            }
        }
    }

    /// Nested path-only descriptor for a reference value.
    #[must_use]
    pub(crate) fn from_path_shape(path: &CimObjectPath) -> Self {
        Self::from_path(Arc::new(ScmoClass::from_path_shape(path)), path)
    }

    pub(crate) fn from_parts(class: SharedClass, arena: Arena, ext_refs: ExtIndex) -> Self {
        Self {
            rep: Arc::new(InstanceRep {
                class,
                arena,
                ext_refs,
            }),
        }
    }

    /// The shared class descriptor.
    #[must_use]
    pub fn class(&self) -> &SharedClass {
        &self.rep.class
    }

    /// How many handles share this instance's arena (used by tests and the
    /// copy-on-write trigger).
    #[must_use]
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.rep)
    }

    /// Number of live external (non-arena) references.
    #[must_use]
    pub fn external_ref_count(&self) -> usize {
        slot::ext_live_count(&self.rep.ext_refs)
    }

    pub(crate) fn arena(&self) -> &Arena {
        &self.rep.arena
    }

    pub(crate) fn ext_refs(&self) -> &ExtIndex {
        &self.rep.ext_refs
    }

    /// Copy-on-write gate: deep-copies the representation when shared.
    fn make_mut(&mut self) -> &mut InstanceRep {
        Arc::make_mut(&mut self.rep)
    }

    /// Full deep copy (arena plus recursive external references).
    #[must_use]
    pub fn deep_clone(&self) -> Self {
        Self {
            rep: Arc::new((*self.rep).clone()),
        }
    }

    /// Lightweight identity-only copy: host, namespace, class name and key
    /// bindings, without property values or filter.
    #[must_use]
    pub fn clone_path_only(&self) -> Self {
        Self::from_path(Arc::clone(&self.rep.class), &self.object_path())
    }

    // --- identity -----------------------------------------------------------

    /// The host this instance lives on (may be empty).
    #[must_use]
    pub fn host(&self) -> &str {
        self.rep.arena.str_at(self.rep.arena.get_ref(ROOT + ROOT_HOST))
    }

    /// Set the host name.
    pub fn set_host(&mut self, host: &str) {
        let rep = self.make_mut();
        let r = rep.arena.write_string(host);
        rep.arena.put_ref(ROOT + ROOT_HOST, r);
    }

    /// The effective namespace: the instance override, else the class's.
    #[must_use]
    pub fn namespace(&self) -> &str {
        let r = self.rep.arena.get_ref(ROOT + ROOT_NAMESPACE);
        if r.is_null() {
            self.rep.class.namespace()
        } else {
            self.rep.arena.str_at(r)
        }
    }

    /// Override the namespace. Diverging from the class descriptor marks the
    /// instance compromised (detached from strict class identity).
    pub fn set_namespace(&mut self, namespace: &str) {
        let diverges = !namespace.eq_ignore_ascii_case(self.rep.class.namespace());
        let rep = self.make_mut();
        let r = rep.arena.write_string(namespace);
        rep.arena.put_ref(ROOT + ROOT_NAMESPACE, r);
        if diverges {
            self.mark_compromised();
        }
    }

    /// The effective class name: the instance override, else the class's.
    #[must_use]
    pub fn class_name(&self) -> &str {
        let r = self.rep.arena.get_ref(ROOT + ROOT_CLASS_NAME);
        if r.is_null() {
            self.rep.class.class_name()
        } else {
            self.rep.arena.str_at(r)
        }
    }

    /// Override the class name, marking the instance compromised when it
    /// diverges from the class descriptor.
    pub fn set_class_name(&mut self, class_name: &str) {
        let diverges = !class_name.eq_ignore_ascii_case(self.rep.class.class_name());
        let rep = self.make_mut();
        let r = rep.arena.write_string(class_name);
        rep.arena.put_ref(ROOT + ROOT_CLASS_NAME, r);
        if diverges {
            self.mark_compromised();
        }
    }

    /// Whether the instance has diverged from strict class identity.
    #[must_use]
    pub fn is_compromised(&self) -> bool {
        self.rep.arena.get_u8(ROOT + ROOT_FLAGS) & FLAG_COMPROMISED != 0
    }

    fn mark_compromised(&mut self) {
        let rep = self.make_mut();
        let flags = rep.arena.get_u8(ROOT + ROOT_FLAGS);
        rep.arena.put_u8(ROOT + ROOT_FLAGS, flags | FLAG_COMPROMISED);
    }

    // --- properties ---------------------------------------------------------

    fn value_slot(&self, index: u32) -> u32 {
        self.rep.arena.get_ref(ROOT + ROOT_VALUES).start + SLOT_SIZE * index
    }

    fn key_slot(&self, index: u32) -> u32 {
        self.rep.arena.get_ref(ROOT + ROOT_KEYS).start + SLOT_SIZE * index
    }

    /// Read a property by name, honoring the active filter.
    ///
    /// Returns the explicit instance value if set, else the class default,
    /// else [`PropertyGet::Null`] carrying the declared type.
    #[must_use]
    pub fn get_property(&self, name: &str) -> PropertyGet {
        let Some(index) = self.rep.class.lookup_property(name) else {
            return PropertyGet::NotFound;
        };
        if self.is_filtered_out(index) {
            return PropertyGet::NotFound;
        }
        self.get_property_at(index)
    }

    /// Read a property by class property index (unfiltered).
    #[must_use]
    pub fn get_property_at(&self, index: u32) -> PropertyGet {
        if index >= self.rep.class.property_count() {
            return PropertyGet::NotFound;
        }
        let cim_type = self.rep.class.property_type(index);
        let is_array = self.rep.class.property_is_array(index);
        let slot = self.value_slot(index);
        if let Some(value) = slot::decode_value(&self.rep.arena, &self.rep.ext_refs, slot) {
            return PropertyGet::Value {
                cim_type,
                is_array,
                value,
            };
        }
        match self.rep.class.property_default(index) {
            Some(value) => PropertyGet::Value {
                cim_type,
                is_array,
                value,
            },
            None => PropertyGet::Null { cim_type, is_array },
        }
    }

    /// Set a property value, validating against the class's declared type.
    ///
    /// Copy-on-write triggers before mutation when the arena is shared.
    pub fn set_property(&mut self, name: &str, value: &CimValue) -> Result<(), SetPropertyError> {
        let Some(index) = self.rep.class.lookup_property(name) else {
            return Err(SetPropertyError::NotFound);
        };
        match self
            .rep
            .class
            .type_check(index, value.cim_type(), value.is_array())
        {
            TypeCheckResult::Ok => {}
            TypeCheckResult::WrongType => return Err(SetPropertyError::WrongType),
            TypeCheckResult::IsArray => return Err(SetPropertyError::IsArray),
            TypeCheckResult::NotAnArray => return Err(SetPropertyError::NotAnArray),
        }
        let slot = self.value_slot(index);
        let rep = self.make_mut();
        slot::release_slot(&mut rep.arena, &mut rep.ext_refs, slot);
        slot::encode_value(&mut rep.arena, Some(&mut rep.ext_refs), slot, value);
        Ok(())
    }

    /// Clear a property back to "not set" (class default applies again).
    pub fn clear_property(&mut self, name: &str) -> Result<(), SetPropertyError> {
        let Some(index) = self.rep.class.lookup_property(name) else {
            return Err(SetPropertyError::NotFound);
        };
        let slot = self.value_slot(index);
        let rep = self.make_mut();
        slot::release_slot(&mut rep.arena, &mut rep.ext_refs, slot);
        Ok(())
    }

    // --- property filter ----------------------------------------------------

    /// Restrict the externally visible property set.
    ///
    /// `None` clears the filter. Otherwise the visible set is every key
    /// property (keys are never filterable-out) plus the named non-key
    /// properties that exist on the class, in ascending property-index order.
    pub fn set_property_filter(&mut self, names: Option<&[&str]>) {
        match names {
            None => {
                let rep = self.make_mut();
                let flags = rep.arena.get_u8(ROOT + ROOT_FLAGS);
                rep.arena.put_u8(ROOT + ROOT_FLAGS, flags & !FLAG_FILTERED);
                rep.arena.put_ref(ROOT + ROOT_FILTER_MASK, ArenaRef::NULL);
                rep.arena.put_ref(ROOT + ROOT_FILTER_LIST, ArenaRef::NULL);
            }
            Some(list) => {
                let class = Arc::clone(&self.rep.class);
                let prop_count = class.property_count();
                let mut visible: Vec<u32> = (0..class.key_count())
                    .map(|k| class.key_property_index(k))
                    .collect();
                for name in list {
                    if let Some(index) = class.lookup_property(name) {
                        if !visible.contains(&index) {
                            visible.push(index);
                        }
                    }
                }
                visible.sort_unstable();

                let rep = self.make_mut();
                let words = (prop_count as usize).div_ceil(64) as u32;
                let mask = rep.arena.allocate(words * 8);
                rep.arena.put_ref(
                    ROOT + ROOT_FILTER_MASK,
                    ArenaRef {
                        start: mask,
                        len: words * 8,
                    },
                );
                for &index in &visible {
                    let word = mask + 8 * (index / 64);
                    let bits = rep.arena.get_u64(word) | (1u64 << (index % 64));
                    rep.arena.put_u64(word, bits);
                }
                let list_len = visible.len() as u32 * 4;
                let list_off = rep.arena.allocate(list_len);
                rep.arena.put_ref(
                    ROOT + ROOT_FILTER_LIST,
                    ArenaRef {
                        start: list_off,
                        len: list_len,
                    },
                );
                for (i, &index) in visible.iter().enumerate() {
                    rep.arena.put_u32(list_off + 4 * i as u32, index);
                }
                let flags = rep.arena.get_u8(ROOT + ROOT_FLAGS);
                rep.arena.put_u8(ROOT + ROOT_FLAGS, flags | FLAG_FILTERED);
            }
        }
    }

    /// Whether a filter is active.
    #[must_use]
    pub fn is_filtered(&self) -> bool {
        self.rep.arena.get_u8(ROOT + ROOT_FLAGS) & FLAG_FILTERED != 0
    }

    fn is_filtered_out(&self, index: u32) -> bool {
        if !self.is_filtered() {
            return false;
        }
        let mask = self.rep.arena.get_ref(ROOT + ROOT_FILTER_MASK);
        let word = self.rep.arena.get_u64(mask.start + 8 * (index / 64));
        word & (1u64 << (index % 64)) == 0
    }

    /// Number of externally visible properties (filtered count when a filter
    /// is active, else the class's property count).
    #[must_use]
    pub fn property_count(&self) -> u32 {
        if self.is_filtered() {
            self.rep.arena.get_ref(ROOT + ROOT_FILTER_LIST).len / 4
        } else {
            self.rep.class.property_count()
        }
    }

    /// The visible property indices, ascending.
    #[must_use]
    pub fn visible_property_indices(&self) -> Vec<u32> {
        if self.is_filtered() {
            let list = self.rep.arena.get_ref(ROOT + ROOT_FILTER_LIST);
            (0..list.len / 4)
                .map(|i| self.rep.arena.get_u32(list.start + 4 * i))
                .collect()
        } else {
            (0..self.rep.class.property_count()).collect()
        }
    }

    // --- key bindings -------------------------------------------------------

    /// Read a key binding: class-declared keys first, then the user-defined
    /// list. Returns `None` when the binding is not set.
    #[must_use]
    pub fn get_key_binding(&self, name: &str) -> Option<(CimType, KeyBindingValue)> {
        if let Some(k) = self.rep.class.lookup_key(name) {
            let slot = self.key_slot(k);
            if let Some(v) = self.decode_key_slot(slot) {
                let ty = slot::slot_type(&self.rep.arena, slot)
                    .unwrap_or_else(|| self.rep.class.key_type(k));
                return Some((ty, v));
            }
            // Declared but unset; fall through to the user list in case the
            // binding was supplied under a non-schema name.
        }
        let mut node = self.rep.arena.get_u32(ROOT + ROOT_USER_KEYS);
        while node != 0 {
            let stored = self.rep.arena.get_ref(node + UKEY_NAME);
            if crate::hash::name_eq_ignore_case(self.rep.arena.bytes(stored), name.as_bytes()) {
                let ty = slot::slot_type(&self.rep.arena, node + UKEY_VALUE)?;
                return self.decode_key_slot(node + UKEY_VALUE).map(|v| (ty, v));
            }
            if self.rep.arena.get_u8(node + UKEY_HAS_NEXT) == 0 {
                break;
            }
            node = self.rep.arena.get_u32(node + UKEY_NEXT);
        }
        None
    }

    /// Set a key binding.
    ///
    /// Class-declared keys validate against the declared type, with tolerant
    /// narrowing for integer keys (bit-truncation, matching the established
    /// behavior of the format). Names not declared as keys go to the
    /// user-defined list with the value's own type.
    pub fn set_key_binding(
        &mut self,
        name: &str,
        value: &KeyBindingValue,
    ) -> Result<(), KeyBindingError> {
        if let Some(k) = self.rep.class.lookup_key(name) {
            let declared = self.rep.class.key_type(k);
            let coerced = coerce_key_value(declared, value)?;
            let slot = self.key_slot(k);
            let rep = self.make_mut();
            slot::release_slot(&mut rep.arena, &mut rep.ext_refs, slot);
            encode_key_slot(&mut rep.arena, &mut rep.ext_refs, slot, declared, &coerced);
            return Ok(());
        }

        // User-defined key binding: typed by the value itself.
        let ty = match value {
            KeyBindingValue::Boolean(_) => CimType::Boolean,
            KeyBindingValue::Unsigned(_) => CimType::Uint64,
            KeyBindingValue::Signed(_) => CimType::Sint64,
            KeyBindingValue::String(_) => CimType::String,
            KeyBindingValue::Reference(_) => CimType::Reference,
        };

        // Update in place when the name already exists.
        let existing = self.find_user_key(name);
        let rep = self.make_mut();
        if let Some(node) = existing {
            slot::release_slot(&mut rep.arena, &mut rep.ext_refs, node + UKEY_VALUE);
            encode_key_slot(&mut rep.arena, &mut rep.ext_refs, node + UKEY_VALUE, ty, value);
            return Ok(());
        }

        let node = rep.arena.allocate(UKEY_NODE_SIZE);
        let name_ref = rep.arena.write_string(name);
        rep.arena.put_ref(node + UKEY_NAME, name_ref);
        rep.arena.put_u32(node + UKEY_NEXT, 0);
        rep.arena.put_u8(node + UKEY_HAS_NEXT, 0);
        encode_key_slot(&mut rep.arena, &mut rep.ext_refs, node + UKEY_VALUE, ty, value);

        // Append at the tail to keep insertion order.
        let head = rep.arena.get_u32(ROOT + ROOT_USER_KEYS);
        if head == 0 {
            rep.arena.put_u32(ROOT + ROOT_USER_KEYS, node);
        } else {
            let mut cur = head;
            while rep.arena.get_u8(cur + UKEY_HAS_NEXT) != 0 {
                cur = rep.arena.get_u32(cur + UKEY_NEXT);
            }
            rep.arena.put_u8(cur + UKEY_HAS_NEXT, 1);
            rep.arena.put_u32(cur + UKEY_NEXT, node);
        }
        Ok(())
    }

    fn find_user_key(&self, name: &str) -> Option<u32> {
        let mut node = self.rep.arena.get_u32(ROOT + ROOT_USER_KEYS);
        while node != 0 {
            let stored = self.rep.arena.get_ref(node + UKEY_NAME);
            if crate::hash::name_eq_ignore_case(self.rep.arena.bytes(stored), name.as_bytes()) {
                return Some(node);
            }
            if self.rep.arena.get_u8(node + UKEY_HAS_NEXT) == 0 {
                return None;
            }
            node = self.rep.arena.get_u32(node + UKEY_NEXT);
        }
        None
    }

    fn decode_key_slot(&self, slot_off: u32) -> Option<KeyBindingValue> {
        decode_key_slot(&self.rep.arena, &self.rep.ext_refs, slot_off)
    }

    /// Derive any unset class key bindings from the corresponding property
    /// values (explicit or default).
    pub fn build_key_bindings_from_properties(&mut self) {
        for k in 0..self.rep.class.key_count() {
            let slot_off = self.key_slot(k);
            if slot::slot_is_set(&self.rep.arena, slot_off) {
                continue;
            }
            let prop_index = self.rep.class.key_property_index(k);
            let value = match self.get_property_at(prop_index) {
                PropertyGet::Value { value, .. } => value,
                _ => continue,
            };
            let Some(binding) = key_binding_from_value(&value) else {
                continue;
            };
            let name = self.rep.class.key_name(k).to_owned();
            let _ = self.set_key_binding(&name, &binding);
        }
    }

    /// Assemble the instance's object path from identity and key bindings.
    #[must_use]
    pub fn object_path(&self) -> CimObjectPath {
        let mut path = CimObjectPath {
            host: self.host().to_owned(),
            namespace: self.namespace().into(),
            class_name: CimName::new(self.class_name()),
            key_bindings: Vec::new(),
        };
        for k in 0..self.rep.class.key_count() {
            if let Some(v) = self.decode_key_slot(self.key_slot(k)) {
                path.push_key(self.rep.class.key_name(k), v);
            }
        }
        let mut node = self.rep.arena.get_u32(ROOT + ROOT_USER_KEYS);
        while node != 0 {
            let name = self
                .rep
                .arena
                .str_at(self.rep.arena.get_ref(node + UKEY_NAME))
                .to_owned();
            if let Some(v) = self.decode_key_slot(node + UKEY_VALUE) {
                path.push_key(name, v);
            }
            if self.rep.arena.get_u8(node + UKEY_HAS_NEXT) == 0 {
                break;
            }
            node = self.rep.arena.get_u32(node + UKEY_NEXT);
        }
        path
    }

    /// Decode back into a schema-level instance, honoring the active filter.
    #[must_use]
    pub fn to_cim_instance(&self) -> CimInstance {
        let mut out = CimInstance::new(self.class_name());
        out.namespace = self.namespace().into();
        for index in self.visible_property_indices() {
            let class = &self.rep.class;
            let mut prop = CimProperty::declared(
                class.property_name(index),
                class.property_type(index),
                class.property_is_array(index),
            );
            prop.class_origin = CimName::new(class.property_origin(index));
            prop.propagated = class.property_propagated(index);
            prop.reference_class = CimName::new(class.property_reference_class(index));
            if let PropertyGet::Value { value, .. } = self.get_property_at(index) {
                prop.value = Some(value);
            }
            out.properties.push(prop);
        }
        let path = self.object_path();
        if !path.key_bindings.is_empty() || !path.host.is_empty() {
            out.path = Some(path);
        }
        out
    }
}

/// Build error: which property failed, and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceBuildError {
    pub property: String,
    pub kind: SetPropertyError,
}

impl std::fmt::Display for InstanceBuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "property '{}': {:?}", self.property, self.kind)
    }
}

impl std::error::Error for InstanceBuildError {}

/// Coerce a key-binding value to the declared class key type.
///
/// Integer keys narrow tolerantly by bit truncation; everything else must
/// match the declared kind exactly. Embedded object/instance types cannot
/// appear here at all — [`KeyBindingValue`] excludes them by construction.
fn coerce_key_value(
    declared: CimType,
    value: &KeyBindingValue,
) -> Result<KeyBindingValue, KeyBindingError> {
    match (declared, value) {
        (CimType::Boolean, KeyBindingValue::Boolean(_)) => Ok(value.clone()),
        (CimType::String | CimType::DateTime | CimType::Char16, KeyBindingValue::String(_)) => {
            Ok(value.clone())
        }
        (CimType::Reference, KeyBindingValue::Reference(_)) => Ok(value.clone()),
        (t, KeyBindingValue::Unsigned(u)) if t.is_unsigned() => {
            let truncated = match t {
                CimType::Uint8 => u64::from(*u as u8),
                CimType::Uint16 => u64::from(*u as u16),
                CimType::Uint32 => u64::from(*u as u32),
                _ => *u,
            };
            Ok(KeyBindingValue::Unsigned(truncated))
        }
        (t, KeyBindingValue::Signed(s)) if t.is_signed() => {
            let truncated = match t {
                CimType::Sint8 => i64::from(*s as i8),
                CimType::Sint16 => i64::from(*s as i16),
                CimType::Sint32 => i64::from(*s as i32),
                _ => *s,
            };
            Ok(KeyBindingValue::Signed(truncated))
        }
        _ => Err(KeyBindingError::WrongType),
    }
}

/// Convert a property value into a key-binding value, if representable.
///
/// Embedded objects/instances and arrays are never representable as keys.
fn key_binding_from_value(value: &CimValue) -> Option<KeyBindingValue> {
    Some(match value {
        CimValue::Boolean(b) => KeyBindingValue::Boolean(*b),
        CimValue::Uint8(v) => KeyBindingValue::Unsigned(u64::from(*v)),
        CimValue::Uint16(v) => KeyBindingValue::Unsigned(u64::from(*v)),
        CimValue::Uint32(v) => KeyBindingValue::Unsigned(u64::from(*v)),
        CimValue::Uint64(v) => KeyBindingValue::Unsigned(*v),
        CimValue::Sint8(v) => KeyBindingValue::Signed(i64::from(*v)),
        CimValue::Sint16(v) => KeyBindingValue::Signed(i64::from(*v)),
        CimValue::Sint32(v) => KeyBindingValue::Signed(i64::from(*v)),
        CimValue::Sint64(v) => KeyBindingValue::Signed(*v),
        CimValue::String(s) => KeyBindingValue::String(s.clone()),
        CimValue::DateTime(dt) => KeyBindingValue::String(dt.as_str().to_owned()),
        CimValue::Reference(p) => KeyBindingValue::Reference(Box::new(p.clone())),
        _ => return None,
    })
}

fn encode_key_slot(
    arena: &mut Arena,
    ext: &mut ExtIndex,
    slot_off: u32,
    ty: CimType,
    value: &KeyBindingValue,
) {
    let encoded = match value {
        KeyBindingValue::Boolean(b) => CimValue::Boolean(*b),
        KeyBindingValue::Unsigned(u) => CimValue::Uint64(*u),
        KeyBindingValue::Signed(s) => CimValue::Sint64(*s),
        KeyBindingValue::String(s) => CimValue::String(s.clone()),
        KeyBindingValue::Reference(p) => CimValue::Reference((**p).clone()),
    };
    slot::encode_value(arena, Some(ext), slot_off, &encoded);
    // Stamp the declared type so decode reproduces the class's key typing.
    arena.put_u8(slot_off + 1, ty as u8);
}

fn decode_key_slot(
    arena: &Arena,
    ext: &ExtIndex,
    slot_off: u32,
) -> Option<KeyBindingValue> {
    let ty = slot::slot_type(arena, slot_off)?;
    let payload = slot_off + 8;
    Some(match ty {
        CimType::Boolean => KeyBindingValue::Boolean(arena.get_u64(payload) != 0),
        t if t.is_unsigned() => KeyBindingValue::Unsigned(arena.get_u64(payload)),
        t if t.is_signed() => KeyBindingValue::Signed(arena.get_u64(payload) as i64),
        CimType::Reference => {
            let nested = ext.get(arena.get_u32(payload) as usize)?.as_ref()?;
            KeyBindingValue::Reference(Box::new(nested.object_path()))
        }
        // String, datetime and char16 keys all carry string bindings.
        _ => KeyBindingValue::String(arena.str_at(arena.get_ref(payload)).to_owned()),
    })
}
