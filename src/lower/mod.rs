//! The launch lowering pass.
//!
//! One invocation runs over one module, synchronously and in place:
//!
//! 1. **Configure** — build the legality target (low dialect legal;
//!    launch, hi, and ctx dialects illegal; the legacy `low.dialect_cast`
//!    explicitly illegal), register the generic rules and the launch
//!    rule, and convert `ctx`-typed function parameters to raw pointers.
//! 2. **Convert** — drive the fixpoint engine over every host function.
//!    Device modules are recursively legal and never visited.
//! 3. **Clean** — on success, strip every device module; their binaries
//!    have already been copied out into module constants.
//!
//! Any failure aborts the invocation before cleaning. The module is then
//! left in whatever partially converted state the engine produced — there
//! is no rollback.

pub mod convert;
pub mod generic;
pub mod launch;
pub mod layout;

use crate::error::LowerError;
use crate::ir::module::Module;
use crate::ir::{Dialect, Ty};

use self::convert::{apply_full_conversion, ConversionTarget, RewriteRule};
use self::generic::{CtxUnwrapRule, DialectCastRule, HiAddRule, HiConstRule};
use self::launch::LaunchRewriteRule;

pub use self::launch::RUNTIME_LAUNCH_SYM;

/// Attribute key under which a device module carries its compiled binary
/// when the pass is not configured with an explicit key.
pub const DEFAULT_BLOB_KEY: &str = "gpu.binary";

/// Type conversion applied by the pass: the opaque execution context
/// becomes a raw pointer; composite types convert structurally.
pub(crate) fn convert_ty(ty: &Ty) -> Ty {
    match ty {
        Ty::Ctx => Ty::erased(),
        Ty::Ptr(inner) => Ty::ptr(convert_ty(inner)),
        Ty::Struct(fields) => Ty::Struct(fields.iter().map(convert_ty).collect()),
        other => other.clone(),
    }
}

/// Rewrite `ctx`-typed parameters to raw pointers across every host
/// function, preserving each function's explicit context binding.
fn convert_signatures(module: &mut Module) {
    for func in &mut module.funcs {
        for i in 0..func.params.len() {
            let converted = convert_ty(&func.params[i]);
            if converted != func.params[i] {
                if func.params[i] == Ty::Ctx && func.ctx_param.is_none() {
                    func.ctx_param = Some(i);
                }
                let value = func.param_value(i);
                func.params[i] = converted.clone();
                func.set_value_ty(value, converted);
            }
        }
    }
}

/// Lowers kernel launches (and the surrounding high-level instructions)
/// into the low dialect. Construct with [`LaunchLowerPass::new`] and run
/// once per module; the caller owns serializing access to the module.
pub struct LaunchLowerPass {
    blob_key: String,
}

impl LaunchLowerPass {
    /// `blob_key` names the device-module attribute holding the compiled
    /// binary. An empty key selects [`DEFAULT_BLOB_KEY`].
    pub fn new(blob_key: &str) -> Self {
        let blob_key = if blob_key.is_empty() {
            DEFAULT_BLOB_KEY.to_string()
        } else {
            blob_key.to_string()
        };
        Self { blob_key }
    }

    /// Run the pass over `module`. All errors are invocation-fatal; on
    /// failure the module may be partially converted and device modules
    /// are not stripped.
    pub fn run(&self, module: &mut Module) -> Result<(), LowerError> {
        // ── Configure ──
        let mut target = ConversionTarget::new();
        target.add_legal_dialect(Dialect::Low);
        target.add_illegal_op("low.dialect_cast");

        let rules: Vec<Box<dyn RewriteRule>> = vec![
            Box::new(HiConstRule),
            Box::new(HiAddRule),
            Box::new(CtxUnwrapRule),
            Box::new(DialectCastRule),
            Box::new(LaunchRewriteRule::new(self.blob_key.clone())),
        ];

        convert_signatures(module);

        // ── Convert ──
        apply_full_conversion(module, &target, &rules)?;

        // ── Clean ──
        module.device_modules.clear();
        Ok(())
    }
}
