//! The launch rewrite rule.
//!
//! Rewrites one `launch.kernel` instruction into:
//! 1. module-level constants for the device binary blob and the
//!    NUL-terminated kernel entry name,
//! 2. a stack-allocated parameter record plus a stack-allocated array of
//!    type-erased pointers into its fields,
//! 3. a call to the fixed runtime dispatch entry point.
//!
//! The emitted sequence is, in essence:
//! ```text
//! %blob   = low.addr_of @<dm>_blob
//! %name   = low.addr_of @<dm>_<kernel>_kernel_name
//! %record = low.alloca {args...} x 1
//! %array  = low.alloca *i8 x N
//! for i in 0..N:
//!   %f = low.field_ptr %record[i]
//!   low.store arg[i], %f
//!   %e = low.ptr_cast %f to *i8
//!   %s = low.elem_ptr %array[i]
//!   low.store %e, %s
//! low.call @gpurtLaunchKernel(ctx, %blob, %name, grid..., block..., %array)
//! ```

use crate::error::LowerError;
use crate::ir::builder::FuncBuilder;
use crate::ir::module::{Func, FuncDecl, Module};
use crate::ir::{Op, Ty, Value};

use super::convert::{RewriteOutcome, RewriteRule};
use super::layout::AggregateLayout;

/// Symbol name of the external runtime dispatch entry point. Fixed
/// pass-wide; the runtime library exports exactly this name.
pub const RUNTIME_LAUNCH_SYM: &str = "gpurtLaunchKernel";

/// The fixed dispatch signature:
/// `(context, blob, name, grid x/y/z, block x/y/z, params) -> void`.
fn launch_decl() -> FuncDecl {
    FuncDecl {
        name: RUNTIME_LAUNCH_SYM.into(),
        params: vec![
            Ty::erased(),       // context
            Ty::erased(),       // binary blob
            Ty::erased(),       // kernel name, NUL-terminated
            Ty::Index,          // grid x
            Ty::Index,          // grid y
            Ty::Index,          // grid z
            Ty::Index,          // block x
            Ty::Index,          // block y
            Ty::Index,          // block z
            Ty::erased_array(), // kernel params
        ],
        ret: None,
    }
}

/// Build the parameter record and the type-erased pointer array for the
/// given argument values. Returns the array's base address. The array,
/// read element-wise, references storage holding the arguments in their
/// original order — the exact contract the runtime entry point relies on.
/// Zero arguments produce a valid empty record and a zero-length array.
pub fn marshal_params(b: &mut FuncBuilder<'_>, args: &[Value]) -> Value {
    let field_tys: Vec<Ty> = args.iter().map(|v| b.func().value_ty(*v).clone()).collect();
    let layout = AggregateLayout::of(&field_tys);
    let record_ty = Ty::Struct(field_tys);

    let one = b.const_i32(1);
    let record = b.alloca(record_ty.clone(), one, layout.align as u32);
    let count = b.const_i32(args.len() as i64);
    let array = b.alloca(Ty::erased(), count, 8);

    for (i, arg) in args.iter().enumerate() {
        let field = b.field_ptr(record, record_ty.clone(), i);
        b.store(*arg, field);
        let erased = b.ptr_cast(field, Ty::erased());
        let index = b.const_i32(i as i64);
        let slot = b.elem_ptr(array, Ty::erased(), index);
        b.store(erased, slot);
    }
    array
}

/// Rewrites `launch.kernel` into globals, marshalling, and a runtime call.
/// Parameterized by the configured blob annotation key.
pub struct LaunchRewriteRule {
    blob_key: String,
}

impl LaunchRewriteRule {
    pub fn new(blob_key: impl Into<String>) -> Self {
        Self {
            blob_key: blob_key.into(),
        }
    }
}

impl RewriteRule for LaunchRewriteRule {
    fn match_and_rewrite(
        &self,
        func: &mut Func,
        at: usize,
        module: &mut Module,
    ) -> Result<RewriteOutcome, LowerError> {
        let Op::Launch {
            device_module,
            kernel,
            grid,
            block,
            deps,
            args,
        } = func.body[at].op.clone()
        else {
            return Ok(RewriteOutcome::NotApplicable);
        };

        // Async dependencies and token results are a hard precondition
        // failure, never silently altered.
        if !deps.is_empty() || func.body[at].result.is_some() {
            return Err(LowerError::UnsupportedAsyncLaunch {
                device_module,
                kernel,
            });
        }

        let dm = module.device_module(&device_module).ok_or_else(|| {
            LowerError::UnresolvedDeviceModule {
                module: device_module.clone(),
            }
        })?;
        let blob = dm
            .attr(&self.blob_key)
            .ok_or_else(|| LowerError::MissingBlobAttr {
                module: device_module.clone(),
                key: self.blob_key.clone(),
            })?
            .to_vec();

        // Embed the binary and the entry name as module constants. The
        // terminating NUL is appended explicitly; it is not implicit in
        // the source string's length.
        let blob_global = format!("{}_blob", device_module);
        module.ensure_global(blob_global.clone(), blob);
        let mut name_bytes = kernel.clone().into_bytes();
        name_bytes.push(0);
        let name_global = format!("{}_{}_kernel_name", device_module, kernel);
        module.ensure_global(name_global.clone(), name_bytes);

        // The runtime context comes from the enclosing function's explicit
        // context-parameter binding, established by the signature
        // conversion of the surrounding pipeline stage.
        let ctx_index = func.ctx_param.ok_or_else(|| LowerError::MissingContextParam {
            func: func.name.clone(),
        })?;
        let ctx = func.param_value(ctx_index);

        module.ensure_decl(launch_decl());

        let mut b = FuncBuilder::new(func);
        let blob_ptr = b.addr_of(blob_global);
        let name_ptr = b.addr_of(name_global);
        let params = marshal_params(&mut b, &args);
        b.call(
            RUNTIME_LAUNCH_SYM,
            vec![
                ctx, blob_ptr, name_ptr, grid[0], grid[1], grid[2], block[0], block[1],
                block[2], params,
            ],
        );

        Ok(RewriteOutcome::Rewritten {
            insts: b.finish(),
            replacement: None,
        })
    }
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::module::DeviceModule;
    use crate::ir::Inst;

    fn module_with_device(blob_key: &str, blob: Vec<u8>) -> Module {
        let mut m = Module::new("m");
        let mut dm = DeviceModule::new("K");
        dm.set_attr(blob_key, blob);
        m.add_device_module(dm);
        m
    }

    fn launch_func(args: Vec<Value>, deps: Vec<Value>, result: Option<Ty>) -> Func {
        let mut f = Func::new("main", vec![Ty::Ctx, Ty::F32, Ty::I64]);
        let dim = f.new_value(Ty::Index);
        f.body.push(Inst {
            result: Some(dim),
            op: Op::ConstInt {
                ty: Ty::Index,
                value: 1,
            },
        });
        let token = result.map(|ty| f.new_value(ty));
        f.body.push(Inst {
            result: token,
            op: Op::Launch {
                device_module: "K".into(),
                kernel: "kern".into(),
                grid: [dim; 3],
                block: [dim; 3],
                deps,
                args,
            },
        });
        f
    }

    fn rewrite_at_launch(
        func: &mut Func,
        module: &mut Module,
        key: &str,
    ) -> Result<RewriteOutcome, LowerError> {
        LaunchRewriteRule::new(key).match_and_rewrite(func, 1, module)
    }

    #[test]
    fn test_marshalling_preserves_argument_order() {
        let mut m = module_with_device("gpu.binary", vec![0xAB]);
        let mut f = launch_func(vec![Value(1), Value(2)], vec![], None);
        let RewriteOutcome::Rewritten { insts, .. } =
            rewrite_at_launch(&mut f, &mut m, "gpu.binary").unwrap()
        else {
            panic!("launch rule did not apply");
        };

        // Field stores happen in argument order: %1 first, then %2.
        let stored: Vec<Value> = insts
            .iter()
            .filter_map(|inst| match inst.op {
                Op::Store { value, .. } => Some(value),
                _ => None,
            })
            .filter(|v| *v == Value(1) || *v == Value(2))
            .collect();
        assert_eq!(stored, vec![Value(1), Value(2)]);

        // The record's field types match the argument types in order.
        let record = insts
            .iter()
            .find_map(|inst| match &inst.op {
                Op::Alloca {
                    ty: Ty::Struct(fields),
                    ..
                } => Some(fields.clone()),
                _ => None,
            })
            .expect("no parameter record alloca");
        assert_eq!(record, vec![Ty::F32, Ty::I64]);
    }

    #[test]
    fn test_call_operand_order_is_fixed() {
        let mut m = module_with_device("gpu.binary", vec![0xAB]);
        let mut f = launch_func(vec![Value(1)], vec![], None);
        let RewriteOutcome::Rewritten { insts, .. } =
            rewrite_at_launch(&mut f, &mut m, "gpu.binary").unwrap()
        else {
            panic!("launch rule did not apply");
        };

        let call_args = insts
            .iter()
            .find_map(|inst| match &inst.op {
                Op::Call { callee, args } if callee == RUNTIME_LAUNCH_SYM => Some(args.clone()),
                _ => None,
            })
            .expect("no runtime call emitted");
        assert_eq!(call_args.len(), 10);
        // context is the ctx param of the enclosing function
        assert_eq!(call_args[0], Value(0));
        // six dimension operands are taken directly from the launch
        assert_eq!(&call_args[3..9], &[Value(3); 6]);
    }

    #[test]
    fn test_kernel_name_constant_gets_trailing_nul() {
        let mut m = module_with_device("gpu.binary", vec![0xAB]);
        let mut f = launch_func(vec![], vec![], None);
        rewrite_at_launch(&mut f, &mut m, "gpu.binary").unwrap();

        let name = m.global("K_kern_kernel_name").expect("name constant missing");
        assert_eq!(name.bytes, b"kern\0");
        let blob = m.global("K_blob").expect("blob constant missing");
        assert_eq!(blob.bytes, vec![0xAB]);
    }

    #[test]
    fn test_async_deps_are_rejected() {
        let mut m = module_with_device("gpu.binary", vec![0xAB]);
        let mut f = launch_func(vec![Value(1)], vec![Value(2)], None);
        let err = rewrite_at_launch(&mut f, &mut m, "gpu.binary").unwrap_err();
        assert_eq!(
            err,
            LowerError::UnsupportedAsyncLaunch {
                device_module: "K".into(),
                kernel: "kern".into(),
            }
        );
    }

    #[test]
    fn test_async_token_result_is_rejected() {
        let mut m = module_with_device("gpu.binary", vec![0xAB]);
        let mut f = launch_func(vec![], vec![], Some(Ty::Token));
        let err = rewrite_at_launch(&mut f, &mut m, "gpu.binary").unwrap_err();
        assert!(matches!(err, LowerError::UnsupportedAsyncLaunch { .. }));
    }

    #[test]
    fn test_missing_blob_attr_names_module_and_key() {
        let mut m = Module::new("m");
        m.add_device_module(DeviceModule::new("K"));
        let mut f = launch_func(vec![], vec![], None);
        let err = rewrite_at_launch(&mut f, &mut m, "binary").unwrap_err();
        assert_eq!(
            err,
            LowerError::MissingBlobAttr {
                module: "K".into(),
                key: "binary".into(),
            }
        );
    }

    #[test]
    fn test_unknown_device_module_is_a_hard_failure() {
        let mut m = Module::new("m");
        let mut f = launch_func(vec![], vec![], None);
        let err = rewrite_at_launch(&mut f, &mut m, "gpu.binary").unwrap_err();
        assert_eq!(
            err,
            LowerError::UnresolvedDeviceModule { module: "K".into() }
        );
    }

    #[test]
    fn test_function_without_context_param_fails() {
        let mut m = module_with_device("gpu.binary", vec![0xAB]);
        let mut f = Func::new("helper", vec![Ty::F32]);
        let dim = f.new_value(Ty::Index);
        f.body.push(Inst {
            result: Some(dim),
            op: Op::ConstInt {
                ty: Ty::Index,
                value: 1,
            },
        });
        f.body.push(Inst {
            result: None,
            op: Op::Launch {
                device_module: "K".into(),
                kernel: "kern".into(),
                grid: [dim; 3],
                block: [dim; 3],
                deps: vec![],
                args: vec![],
            },
        });
        let err = rewrite_at_launch(&mut f, &mut m, "gpu.binary").unwrap_err();
        assert_eq!(
            err,
            LowerError::MissingContextParam {
                func: "helper".into()
            }
        );
    }

    #[test]
    fn test_zero_argument_launch_marshals_empty_array() {
        let mut m = module_with_device("gpu.binary", vec![0xAB]);
        let mut f = launch_func(vec![], vec![], None);
        let RewriteOutcome::Rewritten { insts, .. } =
            rewrite_at_launch(&mut f, &mut m, "gpu.binary").unwrap()
        else {
            panic!("launch rule did not apply");
        };
        // Empty record and zero-length array are still allocated.
        let allocas = insts
            .iter()
            .filter(|i| matches!(i.op, Op::Alloca { .. }))
            .count();
        assert_eq!(allocas, 2);
        assert!(insts
            .iter()
            .any(|i| matches!(&i.op, Op::Call { callee, .. } if callee == RUNTIME_LAUNCH_SYM)));
    }

    #[test]
    fn test_runtime_decl_is_declared_once() {
        let mut m = module_with_device("gpu.binary", vec![0xAB]);
        let mut f = launch_func(vec![], vec![], None);
        rewrite_at_launch(&mut f, &mut m, "gpu.binary").unwrap();
        let mut f2 = launch_func(vec![], vec![], None);
        rewrite_at_launch(&mut f2, &mut m, "gpu.binary").unwrap();
        assert_eq!(m.decls.len(), 1);
        assert_eq!(m.decls[0].name, RUNTIME_LAUNCH_SYM);
        assert_eq!(m.decls[0].params.len(), 10);
    }
}
