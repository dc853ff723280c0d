//! Fixed-size value slots and the per-type encode/decode paths.
//!
//! Every stored value occupies one 16-byte slot:
//!
//! | bytes  | field                                             |
//! |--------|---------------------------------------------------|
//! | 0      | flags (bit 0 = set, bit 1 = array)                |
//! | 1      | type tag ([`CimType`] discriminant)               |
//! | 2..4   | unused                                            |
//! | 4..8   | array element count                               |
//! | 8..16  | payload                                           |
//!
//! Payload by type:
//! - numeric/boolean/char16 scalars: the value, little-endian, in 8 bytes
//! - string/datetime scalars: an [`ArenaRef`] to the bytes
//! - reference/object/instance scalars: an external-reference slot index
//! - arrays: an [`ArenaRef`] to a contiguous element run (8-byte value slots
//!   for scalars, 8-byte `ArenaRef` pairs for strings/datetimes, 4-byte slot
//!   indexes for external types)
//!
//! External-typed values are nested instance descriptors owned through the
//! external-reference index of the enclosing descriptor, so they survive
//! arena reallocation and can be deep-copied and dropped without knowing
//! their concrete type.

use cimom_types::{CimDateTime, CimType, CimValue, CimValueArray};

use crate::arena::{Arena, ArenaRef};
use crate::instance::ScmoInstance;

/// Size of one value slot.
pub(crate) const SLOT_SIZE: u32 = 16;

const FLAG_SET: u8 = 0x01;
const FLAG_ARRAY: u8 = 0x02;

/// Whether the slot at `off` holds a value.
pub(crate) fn slot_is_set(arena: &Arena, off: u32) -> bool {
    arena.get_u8(off) & FLAG_SET != 0
}

/// Whether the slot at `off` holds an array.
pub(crate) fn slot_is_array(arena: &Arena, off: u32) -> bool {
    arena.get_u8(off) & FLAG_ARRAY != 0
}

/// The stored type tag, if the slot is set.
pub(crate) fn slot_type(arena: &Arena, off: u32) -> Option<CimType> {
    if slot_is_set(arena, off) {
        CimType::from_tag(arena.get_u8(off + 1))
    } else {
        None
    }
}

/// Clear a slot back to "not set".
pub(crate) fn clear_slot(arena: &mut Arena, off: u32) {
    for i in 0..SLOT_SIZE {
        arena.put_u8(off + i, 0);
    }
}

/// The external-reference index: a slot table of owned nested descriptors.
///
/// Slots are freed (set to `None`) when a value is overwritten or cleared and
/// reused by the next external value, so the number of occupied slots always
/// equals the number of external-typed values actually set.
pub(crate) type ExtIndex = Vec<Option<ScmoInstance>>;

/// Number of occupied external-reference slots.
pub(crate) fn ext_live_count(ext: &[Option<ScmoInstance>]) -> usize {
    ext.iter().filter(|e| e.is_some()).count()
}

/// Encode `value` into the slot at `off`.
///
/// External-typed values construct nested instance descriptors and register
/// them in `ext`; when `ext` is `None` (class default values) such values are
/// skipped and the slot stays unset.
pub(crate) fn encode_value(
    arena: &mut Arena,
    ext: Option<&mut ExtIndex>,
    off: u32,
    value: &CimValue,
) {
    let ty = value.cim_type();
    if ty.is_external() && ext.is_none() {
        clear_slot(arena, off);
        return;
    }
    match value {
        CimValue::Array(a) => encode_array(arena, ext, off, a),
        scalar => {
            write_slot_header(arena, off, ty, false, 0);
            encode_scalar_payload(arena, ext, off + 8, scalar);
        }
    }
}

fn write_slot_header(arena: &mut Arena, off: u32, ty: CimType, is_array: bool, count: u32) {
    let mut flags = FLAG_SET;
    if is_array {
        flags |= FLAG_ARRAY;
    }
    arena.put_u8(off, flags);
    arena.put_u8(off + 1, ty as u8);
    arena.put_u16(off + 2, 0);
    arena.put_u32(off + 4, count);
    arena.put_u64(off + 8, 0);
}

fn push_ext(ext: Option<&mut ExtIndex>, nested: ScmoInstance) -> u32 {
    let ext = ext.expect("external value encoded without an external-reference index");
    if let Some(free) = ext.iter().position(Option::is_none) {
        ext[free] = Some(nested);
        free as u32
    } else {
        ext.push(Some(nested));
        ext.len() as u32 - 1
    }
}

/// Free the external-reference slots referenced by the value at `off`, then
/// clear the slot. No-op for non-external or unset slots aside from the clear.
pub(crate) fn release_slot(arena: &mut Arena, ext: &mut ExtIndex, off: u32) {
    if let Some(ty) = slot_type(arena, off) {
        if ty.is_external() {
            if slot_is_array(arena, off) {
                let count = arena.get_u32(off + 4);
                let run = arena.get_ref(off + 8).start;
                for i in 0..count {
                    let idx = arena.get_u32(run + 4 * i) as usize;
                    if let Some(e) = ext.get_mut(idx) {
                        *e = None;
                    }
                }
            } else {
                let idx = arena.get_u32(off + 8) as usize;
                if let Some(e) = ext.get_mut(idx) {
                    *e = None;
                }
            }
        }
    }
    clear_slot(arena, off);
}

fn encode_scalar_payload(
    arena: &mut Arena,
    ext: Option<&mut ExtIndex>,
    payload: u32,
    value: &CimValue,
) {
    match value {
        CimValue::Boolean(b) => arena.put_u64(payload, u64::from(*b)),
        CimValue::Uint8(v) => arena.put_u64(payload, u64::from(*v)),
        CimValue::Uint16(v) => arena.put_u64(payload, u64::from(*v)),
        CimValue::Uint32(v) => arena.put_u64(payload, u64::from(*v)),
        CimValue::Uint64(v) => arena.put_u64(payload, *v),
        CimValue::Sint8(v) => arena.put_u64(payload, *v as u64),
        CimValue::Sint16(v) => arena.put_u64(payload, *v as u64),
        CimValue::Sint32(v) => arena.put_u64(payload, *v as u64),
        CimValue::Sint64(v) => arena.put_u64(payload, *v as u64),
        CimValue::Real32(v) => arena.put_u64(payload, u64::from(v.to_bits())),
        CimValue::Real64(v) => arena.put_u64(payload, v.to_bits()),
        CimValue::Char16(v) => arena.put_u64(payload, u64::from(*v)),
        CimValue::String(s) => {
            let r = arena.write_string(s);
            arena.put_ref(payload, r);
        }
        CimValue::DateTime(dt) => {
            let r = arena.write_string(dt.as_str());
            arena.put_ref(payload, r);
        }
        CimValue::Reference(path) => {
            let idx = push_ext(ext, ScmoInstance::from_path_shape(path));
            arena.put_u32(payload, idx);
        }
        CimValue::Object(inst) | CimValue::Instance(inst) => {
            let idx = push_ext(ext, ScmoInstance::from_embedded(inst));
            arena.put_u32(payload, idx);
        }
        CimValue::Array(_) => unreachable!("arrays are handled by encode_array"),
    }
}

fn encode_array(
    arena: &mut Arena,
    mut ext: Option<&mut ExtIndex>,
    off: u32,
    array: &CimValueArray,
) {
    let ty = array.element_type();
    let count = array.len() as u32;
    write_slot_header(arena, off, ty, true, count);
    if count == 0 {
        return;
    }

    match array {
        CimValueArray::Boolean(v) => {
            let run = alloc_run(arena, off, count, 8);
            for (i, e) in v.iter().enumerate() {
                arena.put_u64(run + 8 * i as u32, u64::from(*e));
            }
        }
        CimValueArray::Uint8(v) => encode_u64_run(arena, off, v.iter().map(|e| u64::from(*e))),
        CimValueArray::Uint16(v) => encode_u64_run(arena, off, v.iter().map(|e| u64::from(*e))),
        CimValueArray::Uint32(v) => encode_u64_run(arena, off, v.iter().map(|e| u64::from(*e))),
        CimValueArray::Uint64(v) => encode_u64_run(arena, off, v.iter().copied()),
        CimValueArray::Sint8(v) => encode_u64_run(arena, off, v.iter().map(|e| *e as u64)),
        CimValueArray::Sint16(v) => encode_u64_run(arena, off, v.iter().map(|e| *e as u64)),
        CimValueArray::Sint32(v) => encode_u64_run(arena, off, v.iter().map(|e| *e as u64)),
        CimValueArray::Sint64(v) => encode_u64_run(arena, off, v.iter().map(|e| *e as u64)),
        CimValueArray::Real32(v) => {
            encode_u64_run(arena, off, v.iter().map(|e| u64::from(e.to_bits())));
        }
        CimValueArray::Real64(v) => encode_u64_run(arena, off, v.iter().map(|e| e.to_bits())),
        CimValueArray::Char16(v) => encode_u64_run(arena, off, v.iter().map(|e| u64::from(*e))),
        CimValueArray::String(v) => {
            let run = alloc_run(arena, off, count, 8);
            for (i, s) in v.iter().enumerate() {
                let r = arena.write_string(s);
                arena.put_ref(run + 8 * i as u32, r);
            }
        }
        CimValueArray::DateTime(v) => {
            let run = alloc_run(arena, off, count, 8);
            for (i, dt) in v.iter().enumerate() {
                let r = arena.write_string(dt.as_str());
                arena.put_ref(run + 8 * i as u32, r);
            }
        }
        CimValueArray::Reference(v) => {
            let run = alloc_run(arena, off, count, 4);
            for (i, path) in v.iter().enumerate() {
                let idx = push_ext(ext.as_deref_mut(), ScmoInstance::from_path_shape(path));
                arena.put_u32(run + 4 * i as u32, idx);
            }
        }
        CimValueArray::Object(v) | CimValueArray::Instance(v) => {
            let run = alloc_run(arena, off, count, 4);
            for (i, inst) in v.iter().enumerate() {
                let idx = push_ext(ext.as_deref_mut(), ScmoInstance::from_embedded(inst));
                arena.put_u32(run + 4 * i as u32, idx);
            }
        }
    }
}

/// Allocate the element run and point the slot payload at it.
fn alloc_run(arena: &mut Arena, slot: u32, count: u32, elem_size: u32) -> u32 {
    let run = arena.allocate(count * elem_size);
    arena.put_ref(
        slot + 8,
        ArenaRef {
            start: run,
            len: count * elem_size,
        },
    );
    run
}

fn encode_u64_run(arena: &mut Arena, slot: u32, values: impl ExactSizeIterator<Item = u64>) {
    let count = values.len() as u32;
    let run = alloc_run(arena, slot, count, 8);
    for (i, v) in values.enumerate() {
        arena.put_u64(run + 8 * i as u32, v);
    }
}

/// Decode the slot at `off` back into a schema-level value.
///
/// Returns `None` when the slot is unset (NULL). Corrupted type tags or
/// datetime bytes from a hostile wire block also decode to `None`.
pub(crate) fn decode_value(
    arena: &Arena,
    ext: &[Option<ScmoInstance>],
    off: u32,
) -> Option<CimValue> {
    let ty = slot_type(arena, off)?;
    if slot_is_array(arena, off) {
        return decode_array(arena, ext, off, ty).map(CimValue::Array);
    }
    let payload = off + 8;
    Some(match ty {
        CimType::Boolean => CimValue::Boolean(arena.get_u64(payload) != 0),
        CimType::Uint8 => CimValue::Uint8(arena.get_u64(payload) as u8),
        CimType::Uint16 => CimValue::Uint16(arena.get_u64(payload) as u16),
        CimType::Uint32 => CimValue::Uint32(arena.get_u64(payload) as u32),
        CimType::Uint64 => CimValue::Uint64(arena.get_u64(payload)),
        CimType::Sint8 => CimValue::Sint8(arena.get_u64(payload) as i8),
        CimType::Sint16 => CimValue::Sint16(arena.get_u64(payload) as i16),
        CimType::Sint32 => CimValue::Sint32(arena.get_u64(payload) as i32),
        CimType::Sint64 => CimValue::Sint64(arena.get_u64(payload) as i64),
        CimType::Real32 => CimValue::Real32(f32::from_bits(arena.get_u64(payload) as u32)),
        CimType::Real64 => CimValue::Real64(f64::from_bits(arena.get_u64(payload))),
        CimType::Char16 => CimValue::Char16(arena.get_u64(payload) as u16),
        CimType::String => CimValue::String(arena.str_at(arena.get_ref(payload)).to_owned()),
        CimType::DateTime => {
            let s = arena.str_at(arena.get_ref(payload));
            CimValue::DateTime(CimDateTime::parse(s).ok()?)
        }
        CimType::Reference => {
            let nested = ext.get(arena.get_u32(payload) as usize)?.as_ref()?;
            CimValue::Reference(nested.object_path())
        }
        CimType::Object => {
            let nested = ext.get(arena.get_u32(payload) as usize)?.as_ref()?;
            CimValue::Object(Box::new(nested.to_cim_instance()))
        }
        CimType::Instance => {
            let nested = ext.get(arena.get_u32(payload) as usize)?.as_ref()?;
            CimValue::Instance(Box::new(nested.to_cim_instance()))
        }
    })
}

fn decode_array(
    arena: &Arena,
    ext: &[Option<ScmoInstance>],
    off: u32,
    ty: CimType,
) -> Option<CimValueArray> {
    let count = arena.get_u32(off + 4) as usize;
    let run = arena.get_ref(off + 8).start;
    let u64_at = |i: usize| arena.get_u64(run + 8 * i as u32);
    let str_at = |i: usize| arena.str_at(arena.get_ref(run + 8 * i as u32)).to_owned();
    let ext_at = |i: usize| ext.get(arena.get_u32(run + 4 * i as u32) as usize)?.as_ref();

    Some(match ty {
        CimType::Boolean => CimValueArray::Boolean((0..count).map(|i| u64_at(i) != 0).collect()),
        CimType::Uint8 => CimValueArray::Uint8((0..count).map(|i| u64_at(i) as u8).collect()),
        CimType::Uint16 => CimValueArray::Uint16((0..count).map(|i| u64_at(i) as u16).collect()),
        CimType::Uint32 => CimValueArray::Uint32((0..count).map(|i| u64_at(i) as u32).collect()),
        CimType::Uint64 => CimValueArray::Uint64((0..count).map(u64_at).collect()),
        CimType::Sint8 => CimValueArray::Sint8((0..count).map(|i| u64_at(i) as i8).collect()),
        CimType::Sint16 => CimValueArray::Sint16((0..count).map(|i| u64_at(i) as i16).collect()),
        CimType::Sint32 => CimValueArray::Sint32((0..count).map(|i| u64_at(i) as i32).collect()),
        CimType::Sint64 => CimValueArray::Sint64((0..count).map(|i| u64_at(i) as i64).collect()),
        CimType::Real32 => {
            CimValueArray::Real32((0..count).map(|i| f32::from_bits(u64_at(i) as u32)).collect())
        }
        CimType::Real64 => {
            CimValueArray::Real64((0..count).map(|i| f64::from_bits(u64_at(i))).collect())
        }
        CimType::Char16 => CimValueArray::Char16((0..count).map(|i| u64_at(i) as u16).collect()),
        CimType::String => CimValueArray::String((0..count).map(str_at).collect()),
        CimType::DateTime => {
            let mut out = Vec::with_capacity(count);
            for i in 0..count {
                out.push(CimDateTime::parse(&str_at(i)).ok()?);
            }
            CimValueArray::DateTime(out)
        }
        CimType::Reference => {
            let mut out = Vec::with_capacity(count);
            for i in 0..count {
                out.push(ext_at(i)?.object_path());
            }
            CimValueArray::Reference(out)
        }
        CimType::Object => {
            let mut out = Vec::with_capacity(count);
            for i in 0..count {
                out.push(ext_at(i)?.to_cim_instance());
            }
            CimValueArray::Object(out)
        }
        CimType::Instance => {
            let mut out = Vec::with_capacity(count);
            for i in 0..count {
                out.push(ext_at(i)?.to_cim_instance());
            }
            CimValueArray::Instance(out)
        }
    })
}
