//! Behavioral invariants of the compact descriptor layer, exercised through
//! the public API only: encode/decode fidelity, copy-on-write isolation,
//! property filtering and external-reference accounting.

use std::sync::Arc;

use cimom_scmo::{PropertyGet, ScmoClass, ScmoInstance, SetPropertyError, SharedClass};
use cimom_types::{
    CimClass, CimObjectPath, CimProperty, CimType, CimValue, CimValueArray, KeyBindingValue,
};
use proptest::prelude::*;

fn disk_class() -> SharedClass {
    let class = CimClass::new("Acme_Disk", "root/acme")
        .with_property(CimProperty::declared("Id", CimType::String, false).key())
        .with_property(CimProperty::declared("SizeMB", CimType::Uint64, false))
        .with_property(CimProperty::declared("Label", CimType::String, false))
        .with_property(CimProperty::declared("Blocks", CimType::Uint32, true))
        .with_property(CimProperty::declared("Owner", CimType::Reference, false));
    Arc::new(ScmoClass::build(&class, None))
}

fn disk(id: &str) -> ScmoInstance {
    let mut inst = ScmoInstance::from_class(disk_class());
    inst.set_property("Id", &CimValue::String(id.into())).unwrap();
    inst
}

fn get_value(inst: &ScmoInstance, name: &str) -> Option<CimValue> {
    match inst.get_property(name) {
        PropertyGet::Value { value, .. } => Some(value),
        _ => None,
    }
}

// --- copy-on-write ----------------------------------------------------------

#[test]
fn clone_shares_until_first_write() {
    let a = disk("d0");
    let b = a.clone();
    assert_eq!(a.ref_count(), 2);
    assert_eq!(b.ref_count(), 2);
}

#[test]
fn write_through_one_handle_never_shows_in_the_other() {
    let mut a = disk("d0");
    a.set_property("Label", &CimValue::String("before".into())).unwrap();
    let b = a.clone();

    a.set_property("Label", &CimValue::String("after".into())).unwrap();

    assert_eq!(get_value(&a, "Label"), Some(CimValue::String("after".into())));
    assert_eq!(get_value(&b, "Label"), Some(CimValue::String("before".into())));
    assert_eq!(a.ref_count(), 1);
    assert_eq!(b.ref_count(), 1);
}

#[test]
fn cow_deep_copies_external_references() {
    let mut a = disk("d0");
    let mut owner = CimObjectPath::with_class("Acme_User").in_namespace("root/acme");
    owner.push_key("Name", KeyBindingValue::String("root".into()));
    a.set_property("Owner", &CimValue::Reference(owner)).unwrap();

    let b = a.clone();
    let mut other = CimObjectPath::with_class("Acme_User").in_namespace("root/acme");
    other.push_key("Name", KeyBindingValue::String("admin".into()));
    a.set_property("Owner", &CimValue::Reference(other)).unwrap();

    match (get_value(&a, "Owner"), get_value(&b, "Owner")) {
        (Some(CimValue::Reference(pa)), Some(CimValue::Reference(pb))) => {
            assert_eq!(pa.key_binding("Name").unwrap().value, KeyBindingValue::String("admin".into()));
            assert_eq!(pb.key_binding("Name").unwrap().value, KeyBindingValue::String("root".into()));
        }
        other => panic!("unexpected: {other:?}"),
    }
}

// --- external-reference accounting ------------------------------------------

fn user_path(name: &str) -> CimObjectPath {
    let mut p = CimObjectPath::with_class("Acme_User").in_namespace("root/acme");
    p.push_key("Name", KeyBindingValue::String(name.into()));
    p
}

#[test]
fn external_ref_count_tracks_set_values_exactly() {
    let mut inst = disk("d0");
    assert_eq!(inst.external_ref_count(), 0);

    inst.set_property("Owner", &CimValue::Reference(user_path("a"))).unwrap();
    assert_eq!(inst.external_ref_count(), 1);

    // Overwriting must not leak the old entry.
    inst.set_property("Owner", &CimValue::Reference(user_path("b"))).unwrap();
    assert_eq!(inst.external_ref_count(), 1);

    inst.clear_property("Owner").unwrap();
    assert_eq!(inst.external_ref_count(), 0);
}

// --- property filter ---------------------------------------------------------

#[test]
fn filter_hides_unnamed_properties_but_never_keys() {
    let mut inst = disk("d0");
    inst.set_property("Label", &CimValue::String("scratch".into())).unwrap();
    inst.set_property("SizeMB", &CimValue::Uint64(10)).unwrap();

    inst.set_property_filter(Some(&["SizeMB"]));
    assert!(inst.is_filtered());
    // Key "Id" plus the one named property.
    assert_eq!(inst.property_count(), 2);
    assert!(matches!(inst.get_property("Label"), PropertyGet::NotFound));
    assert!(matches!(inst.get_property("SizeMB"), PropertyGet::Value { .. }));
    assert!(matches!(inst.get_property("Id"), PropertyGet::Value { .. }));

    inst.set_property_filter(None);
    assert!(!inst.is_filtered());
    assert_eq!(inst.property_count(), 5);
    assert!(matches!(inst.get_property("Label"), PropertyGet::Value { .. }));
}

#[test]
fn filter_names_absent_from_the_class_are_ignored() {
    let mut inst = disk("d0");
    inst.set_property_filter(Some(&["NoSuchProperty"]));
    assert_eq!(inst.property_count(), 1);
    assert_eq!(inst.visible_property_indices(), vec![0]);
}

#[test]
fn decoded_instance_honors_the_filter() {
    let mut inst = disk("d0");
    inst.set_property("Label", &CimValue::String("hidden".into())).unwrap();
    inst.set_property_filter(Some(&["SizeMB"]));
    let decoded = inst.to_cim_instance();
    assert_eq!(decoded.properties.len(), 2);
    assert!(decoded.property("Label").is_none());
}

// --- typed writes ------------------------------------------------------------

#[test]
fn set_property_rejects_mismatched_types() {
    let mut inst = disk("d0");
    assert_eq!(
        inst.set_property("SizeMB", &CimValue::String("ten".into())),
        Err(SetPropertyError::WrongType)
    );
    assert_eq!(
        inst.set_property("SizeMB", &CimValue::Array(CimValueArray::Uint64(vec![1]))),
        Err(SetPropertyError::IsArray)
    );
    assert_eq!(
        inst.set_property("Blocks", &CimValue::Uint32(1)),
        Err(SetPropertyError::NotAnArray)
    );
    assert_eq!(
        inst.set_property("Nope", &CimValue::Uint32(1)),
        Err(SetPropertyError::NotFound)
    );
}

#[test]
fn class_default_applies_until_an_explicit_write() {
    let class = CimClass::new("Acme_Counter", "root/acme").with_property(
        CimProperty::with_value("Value", CimValue::Uint32(0)),
    );
    let shared = Arc::new(ScmoClass::build(&class, None));
    let mut inst = ScmoInstance::from_class(shared);

    assert_eq!(get_value(&inst, "Value"), Some(CimValue::Uint32(0)));
    inst.set_property("Value", &CimValue::Uint32(41)).unwrap();
    assert_eq!(get_value(&inst, "Value"), Some(CimValue::Uint32(41)));
    inst.clear_property("Value").unwrap();
    assert_eq!(get_value(&inst, "Value"), Some(CimValue::Uint32(0)));
}

// --- key bindings and paths ---------------------------------------------------

#[test]
fn key_bindings_derive_from_key_properties() {
    let mut inst = disk("disk7");
    inst.build_key_bindings_from_properties();
    let path = inst.object_path();
    assert_eq!(path.class_name.as_str(), "Acme_Disk");
    assert_eq!(
        path.key_binding("id").unwrap().value,
        KeyBindingValue::String("disk7".into())
    );
}

#[test]
fn undeclared_keys_go_to_the_user_list_in_order() {
    let mut inst = disk("d0");
    inst.set_key_binding("Shard", &KeyBindingValue::Unsigned(3)).unwrap();
    inst.set_key_binding("Zone", &KeyBindingValue::String("eu".into())).unwrap();

    let path = inst.object_path();
    let names: Vec<&str> = path.key_bindings.iter().map(|kb| kb.name.as_str()).collect();
    assert_eq!(names, vec!["Shard", "Zone"]);

    let (ty, v) = inst.get_key_binding("shard").unwrap();
    assert_eq!(ty, CimType::Uint64);
    assert_eq!(v, KeyBindingValue::Unsigned(3));
}

#[test]
fn narrow_unsigned_keys_truncate_to_declared_width() {
    let class = CimClass::new("Acme_Port", "root/acme")
        .with_property(CimProperty::declared("Number", CimType::Uint16, false).key());
    let shared = Arc::new(ScmoClass::build(&class, None));
    let mut inst = ScmoInstance::from_class(shared);

    inst.set_key_binding("Number", &KeyBindingValue::Unsigned(0x1_FFFF)).unwrap();
    let (_, v) = inst.get_key_binding("Number").unwrap();
    assert_eq!(v, KeyBindingValue::Unsigned(0xFFFF));
}

#[test]
fn path_key_bindings_that_fail_coercion_are_dropped() {
    let class = CimClass::new("Acme_Port", "root/acme")
        .with_property(CimProperty::declared("Id", CimType::String, false).key())
        .with_property(CimProperty::declared("Number", CimType::Uint16, false).key());
    let shared = Arc::new(ScmoClass::build(&class, None));

    let mut path = CimObjectPath::with_class("Acme_Port").in_namespace("root/acme");
    path.push_key("Id", KeyBindingValue::String("p0".into()));
    path.push_key("Number", KeyBindingValue::String("not a number".into()));

    // The wrong-typed declared key is dropped; the rest of the path survives.
    let inst = ScmoInstance::from_path(shared, &path);
    let (_, id) = inst.get_key_binding("Id").unwrap();
    assert_eq!(id, KeyBindingValue::String("p0".into()));
    assert!(inst.get_key_binding("Number").is_none());
}

#[test]
fn path_only_clone_drops_property_values() {
    let mut inst = disk("d9");
    inst.set_property("SizeMB", &CimValue::Uint64(5)).unwrap();
    inst.build_key_bindings_from_properties();

    let skeleton = inst.clone_path_only();
    assert!(matches!(skeleton.get_property("SizeMB"), PropertyGet::Null { .. }));
    assert_eq!(skeleton.object_path(), inst.object_path());
}

// --- embedded shapes ----------------------------------------------------------

#[test]
fn embedded_instances_round_trip_through_self_described_classes() {
    let class = CimClass::new("Acme_Report", "root/acme")
        .with_property(CimProperty::declared("Payload", CimType::Instance, false));
    let shared = Arc::new(ScmoClass::build(&class, None));
    let mut outer = ScmoInstance::from_class(shared);

    let inner = cimom_types::CimInstance::new("Acme_Line")
        .with_property(CimProperty::with_value("Text", CimValue::String("hello".into())));
    outer.set_property("Payload", &CimValue::Instance(Box::new(inner))).unwrap();

    match get_value(&outer, "Payload") {
        Some(CimValue::Instance(decoded)) => {
            assert_eq!(decoded.class_name.as_str(), "Acme_Line");
            assert_eq!(
                decoded.property("Text").and_then(|p| p.value.clone()),
                Some(CimValue::String("hello".into()))
            );
        }
        other => panic!("unexpected: {other:?}"),
    }
}

// --- randomized round-trips ----------------------------------------------------

fn arb_scalar() -> impl Strategy<Value = (CimType, CimValue)> {
    prop_oneof![
        any::<bool>().prop_map(|b| (CimType::Boolean, CimValue::Boolean(b))),
        any::<u8>().prop_map(|v| (CimType::Uint8, CimValue::Uint8(v))),
        any::<i16>().prop_map(|v| (CimType::Sint16, CimValue::Sint16(v))),
        any::<u32>().prop_map(|v| (CimType::Uint32, CimValue::Uint32(v))),
        any::<i64>().prop_map(|v| (CimType::Sint64, CimValue::Sint64(v))),
        any::<u64>().prop_map(|v| (CimType::Uint64, CimValue::Uint64(v))),
        "[a-zA-Z0-9 _-]{0,40}".prop_map(|s| (CimType::String, CimValue::String(s))),
    ]
}

proptest::proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Any scalar written through the slot encoding reads back identical,
    /// before and after a wire round-trip.
    #[test]
    fn prop_scalar_round_trip(values in proptest::collection::vec(arb_scalar(), 1..24)) {
        let mut class = CimClass::new("Acme_Gen", "root/acme");
        for (i, (ty, _)) in values.iter().enumerate() {
            class = class.with_property(CimProperty::declared(format!("P{i}"), *ty, false));
        }
        let shared = Arc::new(ScmoClass::build(&class, None));
        let mut inst = ScmoInstance::from_class(shared);
        for (i, (_, value)) in values.iter().enumerate() {
            inst.set_property(&format!("P{i}"), value).unwrap();
        }

        for (i, (_, value)) in values.iter().enumerate() {
            let got = get_value(&inst, &format!("P{i}"));
            prop_assert_eq!(got.as_ref(), Some(value));
        }

        let back = ScmoInstance::from_wire_bytes(&inst.to_wire_bytes()).unwrap();
        for (i, (_, value)) in values.iter().enumerate() {
            let got = get_value(&back, &format!("P{i}"));
            prop_assert_eq!(got.as_ref(), Some(value));
        }
    }

    /// Arena growth (forced by long string churn) never corrupts earlier
    /// values; handles stay valid across reallocation.
    #[test]
    fn prop_growth_preserves_earlier_writes(fill in "[a-z]{64,128}", rounds in 4usize..32) {
        let mut inst = disk("anchor");
        inst.set_property("SizeMB", &CimValue::Uint64(77)).unwrap();
        for _ in 0..rounds {
            inst.set_property("Label", &CimValue::String(fill.clone())).unwrap();
        }
        prop_assert_eq!(get_value(&inst, "Id"), Some(CimValue::String("anchor".into())));
        prop_assert_eq!(get_value(&inst, "SizeMB"), Some(CimValue::Uint64(77)));
        prop_assert_eq!(get_value(&inst, "Label"), Some(CimValue::String(fill)));
    }

    /// Array values round-trip element-for-element.
    #[test]
    fn prop_array_round_trip(elems in proptest::collection::vec(any::<u32>(), 0..64)) {
        let mut inst = disk("d0");
        inst.set_property("Blocks", &CimValue::Array(CimValueArray::Uint32(elems.clone())))
            .unwrap();
        match get_value(&inst, "Blocks") {
            Some(CimValue::Array(CimValueArray::Uint32(back))) => prop_assert_eq!(back, elems),
            // Empty arrays must still decode as arrays, not nulls.
            other => prop_assert!(false, "unexpected: {:?}", other),
        }
    }
}
