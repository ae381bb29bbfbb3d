//! Host-side IR for kernel-dispatching programs.
//!
//! The IR is a flat list of typed SSA instructions per function, grouped
//! into four dialect families:
//!
//! - **Low** — the lowered instruction set (constants, stack allocation,
//!   pointer arithmetic, stores, calls). Legal after the lowering pass.
//! - **Hi** — generic high-level arithmetic. Lowered 1:1 by generic rules.
//! - **Ctx** — instructions touching the opaque execution context.
//! - **Launch** — the kernel launch instruction this crate exists to
//!   rewrite into a runtime dispatch call.
//!
//! Pipeline:
//! ```text
//! host IR (hi + ctx + launch) ─→ LaunchLowerPass ─→ host IR (low only)
//! ```

pub mod builder;
pub mod module;

use std::fmt;

// ─── Types ────────────────────────────────────────────────────────

/// An IR value type.
///
/// `Index` is the pointer-width integer (`intptr_t`). `Ctx` is the opaque
/// execution-context type; the lowering pass converts it to `*i8`. `Token`
/// types the result of an asynchronous launch (which this pass rejects).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ty {
    I8,
    I32,
    I64,
    F32,
    F64,
    Index,
    Ptr(Box<Ty>),
    Struct(Vec<Ty>),
    Ctx,
    Token,
}

impl Ty {
    /// Pointer to `inner`.
    pub fn ptr(inner: Ty) -> Ty {
        Ty::Ptr(Box::new(inner))
    }

    /// The type-erased pointer type (`*i8`).
    pub fn erased() -> Ty {
        Ty::ptr(Ty::I8)
    }

    /// The kernel parameter array type (`**i8`).
    pub fn erased_array() -> Ty {
        Ty::ptr(Ty::erased())
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::I8 => write!(f, "i8"),
            Ty::I32 => write!(f, "i32"),
            Ty::I64 => write!(f, "i64"),
            Ty::F32 => write!(f, "f32"),
            Ty::F64 => write!(f, "f64"),
            Ty::Index => write!(f, "index"),
            Ty::Ptr(inner) => write!(f, "*{}", inner),
            Ty::Struct(fields) => {
                write!(f, "{{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", field)?;
                }
                write!(f, "}}")
            }
            Ty::Ctx => write!(f, "ctx"),
            Ty::Token => write!(f, "token"),
        }
    }
}

// ─── Values ───────────────────────────────────────────────────────

/// A per-function SSA value id. Function parameters occupy the first ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Value(pub u32);

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

// ─── Dialects ─────────────────────────────────────────────────────

/// The dialect family an operation belongs to. Conversion legality is
/// decided per dialect, with per-op overrides for stragglers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Low,
    Hi,
    Ctx,
    Launch,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Low => write!(f, "low"),
            Dialect::Hi => write!(f, "hi"),
            Dialect::Ctx => write!(f, "ctx"),
            Dialect::Launch => write!(f, "launch"),
        }
    }
}

// ─── Operations ───────────────────────────────────────────────────

/// A single IR operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    // ── Low dialect ──
    /// Integer constant of the given type.
    ConstInt { ty: Ty, value: i64 },
    /// dst = lhs + rhs.
    Add { ty: Ty, lhs: Value, rhs: Value },
    /// Stack-allocate `count` instances of `ty` in the current frame.
    /// Produces a pointer to the first instance.
    Alloca { ty: Ty, count: Value, align: u32 },
    /// Address of field `index` inside the aggregate pointed to by `base`.
    FieldPtr { base: Value, agg: Ty, index: usize },
    /// Address of element `index` in the array of `elem` pointed to by `base`.
    ElemPtr { base: Value, elem: Ty, index: Value },
    /// Store `value` through `ptr`.
    Store { value: Value, ptr: Value },
    /// Reinterpret a pointer as a pointer of another type.
    PtrCast { value: Value, to: Ty },
    /// Address of a module-level global constant.
    AddrOf { global: String },
    /// Call a declared external function. Result discarded (void callees).
    Call { callee: String, args: Vec<Value> },
    /// Return from the enclosing function.
    Return { value: Option<Value> },
    /// Legacy cast between dialect type systems. Explicitly illegal in the
    /// lowering target; trivial casts fold away, anything else is a
    /// conversion failure.
    DialectCast { value: Value, to: Ty },

    // ── Hi dialect ──
    /// High-level integer constant.
    HiConst { ty: Ty, value: i64 },
    /// High-level addition.
    HiAdd { ty: Ty, lhs: Value, rhs: Value },

    // ── Ctx dialect ──
    /// Unwrap the opaque execution context into a raw pointer.
    CtxUnwrap { ctx: Value },

    // ── Launch dialect ──
    /// Dispatch kernel `kernel` from device module `device_module` with a
    /// grid/block shape and typed arguments. `deps` are asynchronous
    /// dependency operands preceding the true kernel arguments; a launch
    /// producing a token result has `Inst::result` set with type `Token`.
    Launch {
        device_module: String,
        kernel: String,
        grid: [Value; 3],
        block: [Value; 3],
        deps: Vec<Value>,
        args: Vec<Value>,
    },
}

impl Op {
    /// The dialect family this operation belongs to.
    pub fn dialect(&self) -> Dialect {
        match self {
            Op::ConstInt { .. }
            | Op::Add { .. }
            | Op::Alloca { .. }
            | Op::FieldPtr { .. }
            | Op::ElemPtr { .. }
            | Op::Store { .. }
            | Op::PtrCast { .. }
            | Op::AddrOf { .. }
            | Op::Call { .. }
            | Op::Return { .. }
            | Op::DialectCast { .. } => Dialect::Low,
            Op::HiConst { .. } | Op::HiAdd { .. } => Dialect::Hi,
            Op::CtxUnwrap { .. } => Dialect::Ctx,
            Op::Launch { .. } => Dialect::Launch,
        }
    }

    /// The qualified op mnemonic, e.g. `low.alloca`.
    pub fn name(&self) -> &'static str {
        match self {
            Op::ConstInt { .. } => "low.const",
            Op::Add { .. } => "low.add",
            Op::Alloca { .. } => "low.alloca",
            Op::FieldPtr { .. } => "low.field_ptr",
            Op::ElemPtr { .. } => "low.elem_ptr",
            Op::Store { .. } => "low.store",
            Op::PtrCast { .. } => "low.ptr_cast",
            Op::AddrOf { .. } => "low.addr_of",
            Op::Call { .. } => "low.call",
            Op::Return { .. } => "low.return",
            Op::DialectCast { .. } => "low.dialect_cast",
            Op::HiConst { .. } => "hi.const",
            Op::HiAdd { .. } => "hi.add",
            Op::CtxUnwrap { .. } => "ctx.unwrap",
            Op::Launch { .. } => "launch.kernel",
        }
    }

    /// Mutable references to every value operand, in operand order.
    pub fn operands_mut(&mut self) -> Vec<&mut Value> {
        match self {
            Op::ConstInt { .. } | Op::AddrOf { .. } | Op::HiConst { .. } => vec![],
            Op::Add { lhs, rhs, .. } | Op::HiAdd { lhs, rhs, .. } => vec![lhs, rhs],
            Op::Alloca { count, .. } => vec![count],
            Op::FieldPtr { base, .. } => vec![base],
            Op::ElemPtr { base, index, .. } => vec![base, index],
            Op::Store { value, ptr } => vec![value, ptr],
            Op::PtrCast { value, .. } | Op::DialectCast { value, .. } => vec![value],
            Op::Call { args, .. } => args.iter_mut().collect(),
            Op::Return { value } => value.iter_mut().collect(),
            Op::CtxUnwrap { ctx } => vec![ctx],
            Op::Launch {
                grid,
                block,
                deps,
                args,
                ..
            } => grid
                .iter_mut()
                .chain(block.iter_mut())
                .chain(deps.iter_mut())
                .chain(args.iter_mut())
                .collect(),
        }
    }
}

fn join(values: &[Value]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::ConstInt { ty, value } => write!(f, "low.const {} {}", ty, value),
            Op::Add { ty, lhs, rhs } => write!(f, "low.add {} {}, {}", ty, lhs, rhs),
            Op::Alloca { ty, count, align } => {
                write!(f, "low.alloca {} x {}, align {}", ty, count, align)
            }
            Op::FieldPtr { base, agg, index } => {
                write!(f, "low.field_ptr {}[{}] : {}", base, index, agg)
            }
            Op::ElemPtr { base, elem, index } => {
                write!(f, "low.elem_ptr {}[{}] : {}", base, index, elem)
            }
            Op::Store { value, ptr } => write!(f, "low.store {}, {}", value, ptr),
            Op::PtrCast { value, to } => write!(f, "low.ptr_cast {} to {}", value, to),
            Op::AddrOf { global } => write!(f, "low.addr_of @{}", global),
            Op::Call { callee, args } => write!(f, "low.call @{}({})", callee, join(args)),
            Op::Return { value: Some(v) } => write!(f, "low.return {}", v),
            Op::Return { value: None } => write!(f, "low.return"),
            Op::DialectCast { value, to } => {
                write!(f, "low.dialect_cast {} to {}", value, to)
            }
            Op::HiConst { ty, value } => write!(f, "hi.const {} {}", ty, value),
            Op::HiAdd { ty, lhs, rhs } => write!(f, "hi.add {} {}, {}", ty, lhs, rhs),
            Op::CtxUnwrap { ctx } => write!(f, "ctx.unwrap {}", ctx),
            Op::Launch {
                device_module,
                kernel,
                grid,
                block,
                deps,
                args,
            } => {
                write!(
                    f,
                    "launch.kernel @{}::@{} grid({}) block({}) args({})",
                    device_module,
                    kernel,
                    join(grid),
                    join(block),
                    join(args)
                )?;
                if !deps.is_empty() {
                    write!(f, " deps({})", join(deps))?;
                }
                Ok(())
            }
        }
    }
}

// ─── Instructions ─────────────────────────────────────────────────

/// An operation plus its optional result value.
#[derive(Debug, Clone, PartialEq)]
pub struct Inst {
    pub result: Option<Value>,
    pub op: Op,
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.result {
            Some(v) => write!(f, "{} = {}", v, self.op),
            None => write!(f, "{}", self.op),
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────
