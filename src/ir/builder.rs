//! FuncBuilder: typed emission of low-dialect instruction sequences.
//!
//! Rewrite rules build their replacement sequences through this builder so
//! every produced value gets a type recorded in the enclosing function's
//! value table. The builder accumulates instructions in a local buffer;
//! `finish` hands them back for splicing into the function body.

use super::module::Func;
use super::{Inst, Op, Ty, Value};

/// Emits instructions into a buffer, allocating typed values from `func`.
pub struct FuncBuilder<'a> {
    func: &'a mut Func,
    insts: Vec<Inst>,
}

impl<'a> FuncBuilder<'a> {
    pub fn new(func: &'a mut Func) -> Self {
        Self {
            func,
            insts: Vec::new(),
        }
    }

    /// The function being built into.
    pub fn func(&self) -> &Func {
        self.func
    }

    /// Take the accumulated instruction buffer.
    pub fn finish(self) -> Vec<Inst> {
        self.insts
    }

    /// Emit an op with no result.
    pub fn push(&mut self, op: Op) {
        self.insts.push(Inst { result: None, op });
    }

    /// Emit an op producing a fresh value of type `ty`.
    pub fn push_with(&mut self, ty: Ty, op: Op) -> Value {
        let result = self.func.new_value(ty);
        self.insts.push(Inst {
            result: Some(result),
            op,
        });
        result
    }

    // ── Low-dialect helpers ──

    pub fn const_i32(&mut self, value: i64) -> Value {
        self.push_with(
            Ty::I32,
            Op::ConstInt {
                ty: Ty::I32,
                value,
            },
        )
    }

    pub fn const_index(&mut self, value: i64) -> Value {
        self.push_with(
            Ty::Index,
            Op::ConstInt {
                ty: Ty::Index,
                value,
            },
        )
    }

    /// Stack-allocate `count` instances of `ty`. Produces `*ty`.
    pub fn alloca(&mut self, ty: Ty, count: Value, align: u32) -> Value {
        let result_ty = Ty::ptr(ty.clone());
        self.push_with(result_ty, Op::Alloca { ty, count, align })
    }

    /// Address of field `index` of the `Struct` aggregate behind `base`.
    /// Produces a pointer to the field's type.
    pub fn field_ptr(&mut self, base: Value, agg: Ty, index: usize) -> Value {
        let field_ty = match &agg {
            Ty::Struct(fields) => fields[index].clone(),
            other => unreachable!("field_ptr into non-aggregate type {}", other),
        };
        self.push_with(Ty::ptr(field_ty), Op::FieldPtr { base, agg, index })
    }

    /// Address of element `index` in the array of `elem` behind `base`.
    pub fn elem_ptr(&mut self, base: Value, elem: Ty, index: Value) -> Value {
        self.push_with(
            Ty::ptr(elem.clone()),
            Op::ElemPtr { base, elem, index },
        )
    }

    pub fn store(&mut self, value: Value, ptr: Value) {
        self.push(Op::Store { value, ptr });
    }

    pub fn ptr_cast(&mut self, value: Value, to: Ty) -> Value {
        self.push_with(to.clone(), Op::PtrCast { value, to })
    }

    /// Address of a module-level global, as a type-erased pointer.
    pub fn addr_of(&mut self, global: impl Into<String>) -> Value {
        self.push_with(
            Ty::erased(),
            Op::AddrOf {
                global: global.into(),
            },
        )
    }

    /// Call a declared void external function.
    pub fn call(&mut self, callee: impl Into<String>, args: Vec<Value>) {
        self.push(Op::Call {
            callee: callee.into(),
            args,
        });
    }
}
