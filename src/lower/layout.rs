//! Aggregate layout calculator.
//!
//! Computes natural-ABI field offsets for the parameter record the launch
//! rule allocates: each field is aligned to its natural alignment and the
//! aggregate size is rounded up to the aggregate alignment. Keeping the
//! offset arithmetic here, away from the pointer-emitting code, makes the
//! layout independently testable against the target ABI.

use crate::ir::Ty;

/// Pointer width of the target ABI in bytes. `Index`, pointers, and the
/// opaque context are all pointer-sized.
pub const PTR_BYTES: u64 = 8;

/// Natural size of a type in bytes.
pub fn size_of(ty: &Ty) -> u64 {
    match ty {
        Ty::I8 => 1,
        Ty::I32 | Ty::F32 => 4,
        Ty::I64 | Ty::F64 => 8,
        Ty::Index | Ty::Ptr(_) | Ty::Ctx => PTR_BYTES,
        Ty::Struct(fields) => AggregateLayout::of(fields).size,
        Ty::Token => 0,
    }
}

/// Natural alignment of a type in bytes.
pub fn align_of(ty: &Ty) -> u64 {
    match ty {
        Ty::I8 | Ty::Token => 1,
        Ty::I32 | Ty::F32 => 4,
        Ty::I64 | Ty::F64 => 8,
        Ty::Index | Ty::Ptr(_) | Ty::Ctx => PTR_BYTES,
        Ty::Struct(fields) => AggregateLayout::of(fields).align,
    }
}

/// One field of a computed aggregate layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSlot {
    pub ty: Ty,
    pub offset: u64,
    pub size: u64,
    pub align: u64,
}

/// Offsets, total size, and alignment of an anonymous aggregate whose
/// fields are the given types in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateLayout {
    pub fields: Vec<FieldSlot>,
    pub size: u64,
    pub align: u64,
}

impl AggregateLayout {
    pub fn of(field_tys: &[Ty]) -> Self {
        let mut fields = Vec::with_capacity(field_tys.len());
        let mut offset = 0u64;
        let mut align = 1u64;
        for ty in field_tys {
            let field_size = size_of(ty);
            let field_align = align_of(ty).max(1);
            offset = round_up(offset, field_align);
            fields.push(FieldSlot {
                ty: ty.clone(),
                offset,
                size: field_size,
                align: field_align,
            });
            offset += field_size;
            align = align.max(field_align);
        }
        AggregateLayout {
            fields,
            size: round_up(offset, align),
            align,
        }
    }
}

fn round_up(value: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

// ─── Tests ────────────────────────────────────────────────────────
