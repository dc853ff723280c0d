//! Provider-agent wire form.
//!
//! A descriptor's arena is already position-independent (every internal
//! reference is a base-relative offset), so the block crosses the process
//! boundary as-is and rehydrates with offset 0 as the new base. The one thing
//! that cannot cross raw is the external-reference index, which holds real
//! descriptor objects; those are serialized as nested blocks, recursively,
//! with their index positions preserved so the value slots keep pointing at
//! the right entries.
//!
//! Block layout (all fields little-endian):
//!
//! | field            | size | contents                                   |
//! |------------------|------|--------------------------------------------|
//! | class block len  | 4    | byte length of the class arena             |
//! | class arena      | var  | raw class arena bytes                      |
//! | inst block len   | 4    | byte length of the instance arena          |
//! | instance arena   | var  | raw instance arena bytes                   |
//! | ext slot count   | 4    | external-reference index width             |
//! | ext slots        | var  | per slot: 1-byte presence tag, then for a  |
//! |                  |      | live slot a 4-byte length + nested block   |

use std::sync::Arc;

use crate::arena::Arena;
use crate::class::ScmoClass;
use crate::instance::ScmoInstance;
use crate::slot::ExtIndex;

/// Why a wire block failed to rehydrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    /// The block ended before a declared field.
    Truncated,
    /// An arena block failed header validation (magic or recorded size).
    InvalidArena,
    /// A nested external-reference block failed to rehydrate.
    InvalidNested,
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Truncated => "wire block truncated",
            Self::InvalidArena => "arena block failed validation",
            Self::InvalidNested => "nested external-reference block failed validation",
        })
    }
}

impl std::error::Error for WireError {}

impl ScmoClass {
    /// The class descriptor as one opaque, transmissible block.
    #[must_use]
    pub fn to_wire_bytes(&self) -> Vec<u8> {
        self.arena().as_bytes().to_vec()
    }

    /// Rehydrate a class descriptor from a raw block.
    pub fn from_wire_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let arena = Arena::from_bytes(bytes).ok_or(WireError::InvalidArena)?;
        Ok(Self::from_arena(arena))
    }
}

impl ScmoInstance {
    /// Serialize the instance (class descriptor, arena and external
    /// references) as one self-contained block.
    #[must_use]
    pub fn to_wire_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_block(&mut out, self.class().arena().as_bytes());
        write_block(&mut out, self.arena().as_bytes());
        let ext = self.ext_refs();
        out.extend_from_slice(&(ext.len() as u32).to_le_bytes());
        for slot in ext {
            match slot {
                Some(nested) => {
                    out.push(1);
                    write_block(&mut out, &nested.to_wire_bytes());
                }
                None => out.push(0),
            }
        }
        out
    }

    /// Rehydrate an instance from a wire block, nested references included.
    pub fn from_wire_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let mut cursor = Cursor { buf: bytes, pos: 0 };
        let inst = read_instance(&mut cursor)?;
        Ok(inst)
    }
}

fn write_block(out: &mut Vec<u8>, block: &[u8]) {
    out.extend_from_slice(&(block.len() as u32).to_le_bytes());
    out.extend_from_slice(block);
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn read_u32(&mut self) -> Result<u32, WireError> {
        let end = self.pos.checked_add(4).ok_or(WireError::Truncated)?;
        let bytes = self.buf.get(self.pos..end).ok_or(WireError::Truncated)?;
        self.pos = end;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_u8(&mut self) -> Result<u8, WireError> {
        let b = *self.buf.get(self.pos).ok_or(WireError::Truncated)?;
        self.pos += 1;
        Ok(b)
    }

    fn read_block(&mut self) -> Result<&'a [u8], WireError> {
        let len = self.read_u32()? as usize;
        let end = self.pos.checked_add(len).ok_or(WireError::Truncated)?;
        let block = self.buf.get(self.pos..end).ok_or(WireError::Truncated)?;
        self.pos = end;
        Ok(block)
    }
}

fn read_instance(cursor: &mut Cursor<'_>) -> Result<ScmoInstance, WireError> {
    let class_block = cursor.read_block()?;
    let class_arena = Arena::from_bytes(class_block).ok_or(WireError::InvalidArena)?;
    let class = Arc::new(ScmoClass::from_arena(class_arena));

    let inst_block = cursor.read_block()?;
    let inst_arena = Arena::from_bytes(inst_block).ok_or(WireError::InvalidArena)?;

    let ext_count = cursor.read_u32()? as usize;
    let mut ext: ExtIndex = Vec::with_capacity(ext_count);
    for _ in 0..ext_count {
        match cursor.read_u8()? {
            0 => ext.push(None),
            _ => {
                let nested_block = cursor.read_block()?;
                let nested = ScmoInstance::from_wire_bytes(nested_block)
                    .map_err(|_| WireError::InvalidNested)?;
                ext.push(Some(nested));
            }
        }
    }
    Ok(ScmoInstance::from_parts(class, inst_arena, ext))
}
