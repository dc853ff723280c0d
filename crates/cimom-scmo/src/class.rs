//! The compact class descriptor.
//!
//! Built once from a schema-level class definition, immutable afterwards, and
//! shared (`Arc`) by every instance descriptor of that class. The whole
//! descriptor lives in one arena block:
//!
//! - a fixed root record directly after the arena header
//! - a contiguous run of fixed-size property nodes (name handle, name hash,
//!   chain link, type, flags, origin, reference class, qualifier run, default
//!   value slot)
//! - a contiguous run of key nodes (the subset of properties qualified as
//!   keys), plus a key bitmask over property indices
//! - two fixed-size hash tables (property and key) with insertion-ordered
//!   collision chains threaded through the nodes

use std::sync::Arc;

use cimom_types::{
    CimClass, CimObjectPath, CimProperty, CimQualifier, CimType, CimValue, KeyBindingValue,
    QualifierFlavor,
};

use crate::arena::{Arena, ArenaRef, HEADER_SIZE};
use crate::hash::{bucket_count_for, name_eq_ignore_case, name_hash};
use crate::slot;
use crate::TypeCheckResult;

// Root record, at a fixed offset right after the arena header.
const ROOT: u32 = HEADER_SIZE;
const ROOT_SUPER: u32 = 0;
const ROOT_NAMESPACE: u32 = 8;
const ROOT_CLASS_NAME: u32 = 16;
const ROOT_QUALIFIERS: u32 = 24;
const ROOT_PROPERTIES: u32 = 32;
const ROOT_KEYS: u32 = 40;
const ROOT_KEY_MASK: u32 = 48;
const ROOT_PROP_HASH: u32 = 56;
const ROOT_KEY_HASH: u32 = 64;
const ROOT_PROP_COUNT: u32 = 72;
const ROOT_KEY_COUNT: u32 = 76;
const ROOT_QUAL_COUNT: u32 = 80;
const ROOT_SIZE: u32 = 88;

// Qualifier node.
const QUAL_NAME: u32 = 0;
const QUAL_VALUE: u32 = 8;
const QUAL_FLAGS: u32 = 24;
const QUAL_NODE_SIZE: u32 = 32;

const QUAL_FLAG_PROPAGATED: u8 = 0x01;
const QUAL_FLAG_OVERRIDABLE: u8 = 0x02;
const QUAL_FLAG_TOSUBCLASS: u8 = 0x04;

// Property node.
const PROP_NAME: u32 = 0;
const PROP_HASH: u32 = 8;
const PROP_HAS_NEXT: u32 = 12;
const PROP_FLAGS: u32 = 13;
const PROP_TYPE: u32 = 14;
const PROP_IS_ARRAY: u32 = 15;
const PROP_NEXT: u32 = 16;
const PROP_QUAL_COUNT: u32 = 20;
const PROP_ORIGIN: u32 = 24;
const PROP_REF_CLASS: u32 = 32;
const PROP_QUALIFIERS: u32 = 40;
const PROP_DEFAULT: u32 = 48;
const PROP_NODE_SIZE: u32 = 64;

const PROP_FLAG_KEY: u8 = 0x01;
const PROP_FLAG_PROPAGATED: u8 = 0x02;

// Key node.
const KEY_NAME: u32 = 0;
const KEY_HASH: u32 = 8;
const KEY_HAS_NEXT: u32 = 12;
const KEY_TYPE: u32 = 13;
const KEY_NEXT: u32 = 16;
const KEY_PROP_INDEX: u32 = 20;
const KEY_NODE_SIZE: u32 = 32;

/// Immutable-after-build metadata for one CIM class.
#[derive(Debug, Clone)]
pub struct ScmoClass {
    arena: Arena,
}

impl ScmoClass {
    /// Build a class descriptor from a schema class, optionally overriding
    /// the namespace it is registered under.
    #[must_use]
    pub fn build(class: &CimClass, namespace_override: Option<&str>) -> Self {
        let mut arena = Arena::new();
        let root = arena.allocate(ROOT_SIZE);
        debug_assert_eq!(root, ROOT);

        let super_ref = arena.write_string(class.super_class.as_str());
        let ns = namespace_override.unwrap_or(class.namespace.as_str());
        let ns_ref = arena.write_string(ns);
        let name_ref = arena.write_string(class.class_name.as_str());
        arena.put_ref(ROOT + ROOT_SUPER, super_ref);
        arena.put_ref(ROOT + ROOT_NAMESPACE, ns_ref);
        arena.put_ref(ROOT + ROOT_CLASS_NAME, name_ref);

        let qual_run = write_qualifier_run(&mut arena, &class.qualifiers);
        arena.put_ref(ROOT + ROOT_QUALIFIERS, qual_run);
        arena.put_u32(ROOT + ROOT_QUAL_COUNT, class.qualifiers.len() as u32);

        let prop_count = class.properties.len() as u32;
        let prop_run = arena.allocate(prop_count * PROP_NODE_SIZE);
        arena.put_ref(
            ROOT + ROOT_PROPERTIES,
            ArenaRef {
                start: prop_run,
                len: prop_count * PROP_NODE_SIZE,
            },
        );
        arena.put_u32(ROOT + ROOT_PROP_COUNT, prop_count);

        for (i, prop) in class.properties.iter().enumerate() {
            write_property_node(&mut arena, prop_run + PROP_NODE_SIZE * i as u32, prop);
        }

        // Property hash table with insertion-order chains.
        let prop_buckets = bucket_count_for(class.properties.len());
        let prop_table = arena.allocate(prop_buckets * 4);
        arena.put_ref(
            ROOT + ROOT_PROP_HASH,
            ArenaRef {
                start: prop_table,
                len: prop_buckets * 4,
            },
        );
        for i in 0..prop_count {
            chain_insert(
                &mut arena,
                prop_table,
                prop_buckets,
                prop_run,
                PROP_NODE_SIZE,
                PROP_HASH,
                PROP_HAS_NEXT,
                PROP_NEXT,
                i,
            );
        }

        // Key nodes: the subset of properties flagged as keys, in property order.
        let key_indices: Vec<u32> = class
            .properties
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_key())
            .map(|(i, _)| i as u32)
            .collect();
        let key_count = key_indices.len() as u32;
        let key_run = arena.allocate(key_count * KEY_NODE_SIZE);
        arena.put_ref(
            ROOT + ROOT_KEYS,
            ArenaRef {
                start: key_run,
                len: key_count * KEY_NODE_SIZE,
            },
        );
        arena.put_u32(ROOT + ROOT_KEY_COUNT, key_count);

        for (k, &prop_index) in key_indices.iter().enumerate() {
            let node = key_run + KEY_NODE_SIZE * k as u32;
            let prop_node = prop_run + PROP_NODE_SIZE * prop_index;
            // Name bytes are already in the arena; the key node shares them.
            let name_ref = arena.get_ref(prop_node + PROP_NAME);
            arena.put_ref(node + KEY_NAME, name_ref);
            arena.put_u32(node + KEY_HASH, arena.get_u32(prop_node + PROP_HASH));
            arena.put_u8(node + KEY_HAS_NEXT, 0);
            arena.put_u8(node + KEY_TYPE, arena.get_u8(prop_node + PROP_TYPE));
            arena.put_u32(node + KEY_NEXT, 0);
            arena.put_u32(node + KEY_PROP_INDEX, prop_index);
        }

        let key_buckets = bucket_count_for(key_indices.len());
        let key_table = arena.allocate(key_buckets * 4);
        arena.put_ref(
            ROOT + ROOT_KEY_HASH,
            ArenaRef {
                start: key_table,
                len: key_buckets * 4,
            },
        );
        for k in 0..key_count {
            chain_insert(
                &mut arena,
                key_table,
                key_buckets,
                key_run,
                KEY_NODE_SIZE,
                KEY_HASH,
                KEY_HAS_NEXT,
                KEY_NEXT,
                k,
            );
        }

        // Key bitmask over property indices.
        let words = (prop_count as usize).div_ceil(64) as u32;
        let mask = arena.allocate(words * 8);
        arena.put_ref(
            ROOT + ROOT_KEY_MASK,
            ArenaRef {
                start: mask,
                len: words * 8,
            },
        );
        for &prop_index in &key_indices {
            let word = mask + 8 * (prop_index / 64);
            let bits = arena.get_u64(word) | (1u64 << (prop_index % 64));
            arena.put_u64(word, bits);
        }

        Self { arena }
    }

    /// Synthesize a descriptor from an embedded instance's own shape.
    ///
    /// Used when an embedded object/instance value is encoded without a
    /// resolvable schema class: the instance describes itself.
    #[must_use]
    pub fn from_instance_shape(instance: &cimom_types::CimInstance) -> Self {
        let mut class = CimClass::new(
            instance.class_name.as_str(),
            instance.namespace.as_str(),
        );
        for p in &instance.properties {
            let mut decl = CimProperty::declared(p.name.as_str(), p.cim_type, p.is_array);
            decl.qualifiers = p.qualifiers.clone();
            class.properties.push(decl);
        }
        Self::build(&class, None)
    }

    /// Synthesize a path-only descriptor for a reference value: class name and
    /// namespace from the path, key properties typed from the binding values.
    #[must_use]
    pub fn from_path_shape(path: &CimObjectPath) -> Self {
        let mut class = CimClass::new(path.class_name.as_str(), path.namespace.as_str());
        for kb in &path.key_bindings {
            let ty = match kb.value {
                KeyBindingValue::Boolean(_) => CimType::Boolean,
                KeyBindingValue::Unsigned(_) => CimType::Uint64,
                KeyBindingValue::Signed(_) => CimType::Sint64,
                KeyBindingValue::String(_) => CimType::String,
                KeyBindingValue::Reference(_) => CimType::Reference,
            };
            class.properties
                .push(CimProperty::declared(kb.name.as_str(), ty, false).key());
        }
        Self::build(&class, None)
    }

    /// Rehydrate from a raw wire block.
    pub(crate) fn from_arena(arena: Arena) -> Self {
        Self { arena }
    }

    pub(crate) fn arena(&self) -> &Arena {
        &self.arena
    }

    /// The class name.
    #[must_use]
    pub fn class_name(&self) -> &str {
        self.arena.str_at(self.arena.get_ref(ROOT + ROOT_CLASS_NAME))
    }

    /// The superclass name (empty for root classes).
    #[must_use]
    pub fn super_class(&self) -> &str {
        self.arena.str_at(self.arena.get_ref(ROOT + ROOT_SUPER))
    }

    /// The namespace this descriptor was built for.
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.arena.str_at(self.arena.get_ref(ROOT + ROOT_NAMESPACE))
    }

    /// Number of properties.
    #[must_use]
    pub fn property_count(&self) -> u32 {
        self.arena.get_u32(ROOT + ROOT_PROP_COUNT)
    }

    /// Number of key properties.
    #[must_use]
    pub fn key_count(&self) -> u32 {
        self.arena.get_u32(ROOT + ROOT_KEY_COUNT)
    }

    /// Number of class qualifiers.
    #[must_use]
    pub fn qualifier_count(&self) -> u32 {
        self.arena.get_u32(ROOT + ROOT_QUAL_COUNT)
    }

    fn prop_node(&self, index: u32) -> u32 {
        self.arena.get_ref(ROOT + ROOT_PROPERTIES).start + PROP_NODE_SIZE * index
    }

    fn key_node(&self, index: u32) -> u32 {
        self.arena.get_ref(ROOT + ROOT_KEYS).start + KEY_NODE_SIZE * index
    }

    /// Hash-chain lookup of a property by name. O(1) average, O(chain) worst.
    #[must_use]
    pub fn lookup_property(&self, name: &str) -> Option<u32> {
        self.chain_lookup(
            name,
            self.arena.get_ref(ROOT + ROOT_PROP_HASH),
            |i| self.prop_node(i),
            PROP_HASH,
            PROP_HAS_NEXT,
            PROP_NEXT,
        )
    }

    /// Hash-chain lookup of a key by name.
    #[must_use]
    pub fn lookup_key(&self, name: &str) -> Option<u32> {
        if self.key_count() == 0 {
            return None;
        }
        self.chain_lookup(
            name,
            self.arena.get_ref(ROOT + ROOT_KEY_HASH),
            |i| self.key_node(i),
            KEY_HASH,
            KEY_HAS_NEXT,
            KEY_NEXT,
        )
    }

    fn chain_lookup(
        &self,
        name: &str,
        table: ArenaRef,
        node_at: impl Fn(u32) -> u32,
        hash_field: u32,
        has_next_field: u32,
        next_field: u32,
    ) -> Option<u32> {
        let buckets = table.len / 4;
        let h = name_hash(name);
        let entry = self.arena.get_u32(table.start + 4 * (h & (buckets - 1)));
        if entry == 0 {
            return None;
        }
        let mut index = entry - 1;
        loop {
            let node = node_at(index);
            if self.arena.get_u32(node + hash_field) == h {
                let stored = self.arena.get_ref(node);
                if name_eq_ignore_case(self.arena.bytes(stored), name.as_bytes()) {
                    return Some(index);
                }
            }
            if self.arena.get_u8(node + has_next_field) == 0 {
                return None;
            }
            index = self.arena.get_u32(node + next_field);
        }
    }

    /// O(1) bitmask test: is the property at `index` a key?
    #[must_use]
    pub fn is_property_key(&self, index: u32) -> bool {
        if index >= self.property_count() {
            return false;
        }
        let mask = self.arena.get_ref(ROOT + ROOT_KEY_MASK);
        let word = self.arena.get_u64(mask.start + 8 * (index / 64));
        word & (1u64 << (index % 64)) != 0
    }

    /// The property name at `index`.
    #[must_use]
    pub fn property_name(&self, index: u32) -> &str {
        self.arena
            .str_at(self.arena.get_ref(self.prop_node(index) + PROP_NAME))
    }

    /// The declared property type at `index`.
    #[must_use]
    pub fn property_type(&self, index: u32) -> CimType {
        CimType::from_tag(self.arena.get_u8(self.prop_node(index) + PROP_TYPE))
            .unwrap_or(CimType::String)
    }

    /// Whether the property at `index` is declared as an array.
    #[must_use]
    pub fn property_is_array(&self, index: u32) -> bool {
        self.arena.get_u8(self.prop_node(index) + PROP_IS_ARRAY) != 0
    }

    /// Whether the property at `index` was propagated from a superclass.
    #[must_use]
    pub fn property_propagated(&self, index: u32) -> bool {
        self.arena.get_u8(self.prop_node(index) + PROP_FLAGS) & PROP_FLAG_PROPAGATED != 0
    }

    /// The class-origin name for the property at `index`.
    #[must_use]
    pub fn property_origin(&self, index: u32) -> &str {
        self.arena
            .str_at(self.arena.get_ref(self.prop_node(index) + PROP_ORIGIN))
    }

    /// The declared reference class for the property at `index`.
    #[must_use]
    pub fn property_reference_class(&self, index: u32) -> &str {
        self.arena
            .str_at(self.arena.get_ref(self.prop_node(index) + PROP_REF_CLASS))
    }

    /// The class default value for the property at `index`, if one exists.
    #[must_use]
    pub fn property_default(&self, index: u32) -> Option<CimValue> {
        slot::decode_value(&self.arena, &[], self.prop_node(index) + PROP_DEFAULT)
    }

    /// The qualifiers declared on the property at `index`.
    #[must_use]
    pub fn property_qualifiers(&self, index: u32) -> Vec<CimQualifier> {
        let node = self.prop_node(index);
        let run = self.arena.get_ref(node + PROP_QUALIFIERS);
        let count = self.arena.get_u32(node + PROP_QUAL_COUNT);
        (0..count)
            .map(|i| self.read_qualifier(run.start + QUAL_NODE_SIZE * i))
            .collect()
    }

    /// The qualifiers declared on the class itself.
    #[must_use]
    pub fn qualifiers(&self) -> Vec<CimQualifier> {
        let run = self.arena.get_ref(ROOT + ROOT_QUALIFIERS);
        (0..self.qualifier_count())
            .map(|i| self.read_qualifier(run.start + QUAL_NODE_SIZE * i))
            .collect()
    }

    fn read_qualifier(&self, node: u32) -> CimQualifier {
        let name = self.arena.str_at(self.arena.get_ref(node + QUAL_NAME));
        let value = slot::decode_value(&self.arena, &[], node + QUAL_VALUE)
            .unwrap_or(CimValue::Boolean(true));
        let flags = self.arena.get_u8(node + QUAL_FLAGS);
        CimQualifier {
            name: name.into(),
            value,
            flavor: QualifierFlavor {
                overridable: flags & QUAL_FLAG_OVERRIDABLE != 0,
                to_subclass: flags & QUAL_FLAG_TOSUBCLASS != 0,
            },
            propagated: flags & QUAL_FLAG_PROPAGATED != 0,
        }
    }

    /// The key name at key-index `index`.
    #[must_use]
    pub fn key_name(&self, index: u32) -> &str {
        self.arena
            .str_at(self.arena.get_ref(self.key_node(index) + KEY_NAME))
    }

    /// The declared type of the key at key-index `index`.
    #[must_use]
    pub fn key_type(&self, index: u32) -> CimType {
        CimType::from_tag(self.arena.get_u8(self.key_node(index) + KEY_TYPE))
            .unwrap_or(CimType::String)
    }

    /// The property index backing the key at key-index `index`.
    #[must_use]
    pub fn key_property_index(&self, index: u32) -> u32 {
        self.arena.get_u32(self.key_node(index) + KEY_PROP_INDEX)
    }

    /// Authoritative type check for a value against the declared property.
    ///
    /// The class descriptor's stored type always wins. Embedded instances are
    /// accepted where an embedded object is declared (intentional widening).
    #[must_use]
    pub fn type_check(&self, index: u32, ty: CimType, is_array: bool) -> TypeCheckResult {
        let declared = self.property_type(index);
        let declared_array = self.property_is_array(index);
        if is_array && !declared_array {
            return TypeCheckResult::NotAnArray;
        }
        if !is_array && declared_array {
            return TypeCheckResult::IsArray;
        }
        if ty == declared
            || (declared == CimType::Object
                && matches!(ty, CimType::Instance | CimType::Object))
        {
            TypeCheckResult::Ok
        } else {
            TypeCheckResult::WrongType
        }
    }
}

/// Shared handle type used throughout the engine.
pub type SharedClass = Arc<ScmoClass>;

fn write_qualifier_run(arena: &mut Arena, qualifiers: &[CimQualifier]) -> ArenaRef {
    let count = qualifiers.len() as u32;
    let run = arena.allocate(count * QUAL_NODE_SIZE);
    for (i, q) in qualifiers.iter().enumerate() {
        let node = run + QUAL_NODE_SIZE * i as u32;
        let name_ref = arena.write_string(q.name.as_str());
        arena.put_ref(node + QUAL_NAME, name_ref);
        slot::encode_value(arena, None, node + QUAL_VALUE, &q.value);
        let mut flags = 0u8;
        if q.propagated {
            flags |= QUAL_FLAG_PROPAGATED;
        }
        if q.flavor.overridable {
            flags |= QUAL_FLAG_OVERRIDABLE;
        }
        if q.flavor.to_subclass {
            flags |= QUAL_FLAG_TOSUBCLASS;
        }
        arena.put_u8(node + QUAL_FLAGS, flags);
    }
    ArenaRef {
        start: run,
        len: count * QUAL_NODE_SIZE,
    }
}

fn write_property_node(arena: &mut Arena, node: u32, prop: &CimProperty) {
    let name_ref = arena.write_string(prop.name.as_str());
    arena.put_ref(node + PROP_NAME, name_ref);
    arena.put_u32(node + PROP_HASH, name_hash(prop.name.as_str()));
    arena.put_u8(node + PROP_HAS_NEXT, 0);
    let mut flags = 0u8;
    if prop.is_key() {
        flags |= PROP_FLAG_KEY;
    }
    if prop.propagated {
        flags |= PROP_FLAG_PROPAGATED;
    }
    arena.put_u8(node + PROP_FLAGS, flags);
    arena.put_u8(node + PROP_TYPE, prop.cim_type as u8);
    arena.put_u8(node + PROP_IS_ARRAY, u8::from(prop.is_array));
    arena.put_u32(node + PROP_NEXT, 0);

    let origin = arena.write_string(prop.class_origin.as_str());
    arena.put_ref(node + PROP_ORIGIN, origin);
    let ref_class = arena.write_string(prop.reference_class.as_str());
    arena.put_ref(node + PROP_REF_CLASS, ref_class);

    let qual_run = write_qualifier_run(arena, &prop.qualifiers);
    arena.put_ref(node + PROP_QUALIFIERS, qual_run);
    arena.put_u32(node + PROP_QUAL_COUNT, prop.qualifiers.len() as u32);

    match &prop.value {
        Some(v) => slot::encode_value(arena, None, node + PROP_DEFAULT, v),
        None => slot::clear_slot(arena, node + PROP_DEFAULT),
    }
}

/// Append node `index` to its hash chain (bucket head if empty, else tail).
#[allow(clippy::too_many_arguments)]
fn chain_insert(
    arena: &mut Arena,
    table: u32,
    buckets: u32,
    run: u32,
    node_size: u32,
    hash_field: u32,
    has_next_field: u32,
    next_field: u32,
    index: u32,
) {
    let node = run + node_size * index;
    let h = arena.get_u32(node + hash_field);
    let bucket = table + 4 * (h & (buckets - 1));
    let entry = arena.get_u32(bucket);
    if entry == 0 {
        arena.put_u32(bucket, index + 1);
        return;
    }
    let mut cur = run + node_size * (entry - 1);
    while arena.get_u8(cur + has_next_field) != 0 {
        cur = run + node_size * arena.get_u32(cur + next_field);
    }
    arena.put_u8(cur + has_next_field, 1);
    arena.put_u32(cur + next_field, index);
}
