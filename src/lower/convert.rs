//! Legality-driven fixpoint conversion engine.
//!
//! A deliberately small substitute for a full pattern-rewriting framework:
//! repeatedly sweep each host function body, rewriting illegal instructions
//! through the registered rules until either every instruction satisfies
//! the legality target or a sweep makes no progress. The engine owns value
//! remapping: when a rule folds an instruction into an existing value, all
//! later uses are rewritten.
//!
//! Device modules are recursively legal — the engine only walks host
//! functions and never descends into accelerator-side containers.

use rustc_hash::FxHashSet;

use crate::error::LowerError;
use crate::ir::module::{Func, Module};
use crate::ir::{Dialect, Inst, Op, Value};

// ─── Legality target ──────────────────────────────────────────────

/// The set of instruction families acceptable in the pass's output.
/// Dialects not marked legal are illegal; individual op names can be
/// marked illegal even inside a legal dialect.
#[derive(Debug, Default)]
pub struct ConversionTarget {
    legal_dialects: FxHashSet<Dialect>,
    illegal_ops: FxHashSet<&'static str>,
}

impl ConversionTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_legal_dialect(&mut self, dialect: Dialect) {
        self.legal_dialects.insert(dialect);
    }

    /// Mark a single op illegal by qualified name, overriding its
    /// dialect's legality.
    pub fn add_illegal_op(&mut self, name: &'static str) {
        self.illegal_ops.insert(name);
    }

    pub fn is_legal(&self, op: &Op) -> bool {
        if self.illegal_ops.contains(op.name()) {
            return false;
        }
        self.legal_dialects.contains(&op.dialect())
    }
}

// ─── Rewrite rules ────────────────────────────────────────────────

/// What a rule did with the instruction it was offered.
#[derive(Debug)]
pub enum RewriteOutcome {
    /// Replace the instruction with `insts`. If the old instruction
    /// produced a value and `replacement` is set, every later use of the
    /// old result is remapped to `replacement`. Rules that reuse the old
    /// result id on a replacement instruction leave `replacement` unset.
    Rewritten {
        insts: Vec<Inst>,
        replacement: Option<Value>,
    },
    /// The rule does not apply to this instruction.
    NotApplicable,
}

/// A single rewrite applied to one illegal instruction at a time.
///
/// `func` is the function being converted (taken out of `module` for the
/// duration, so `module` holds only module-level state: globals,
/// declarations, device modules). Hard errors abort the whole pass run.
pub trait RewriteRule {
    fn match_and_rewrite(
        &self,
        func: &mut Func,
        at: usize,
        module: &mut Module,
    ) -> Result<RewriteOutcome, LowerError>;
}

// ─── Fixpoint driver ──────────────────────────────────────────────

/// Convert every host function of `module` until the legality target is
/// met. Fails with the first hard rule error, or with a residual-illegality
/// diagnostic naming the stuck instruction when no rule makes progress.
pub fn apply_full_conversion(
    module: &mut Module,
    target: &ConversionTarget,
    rules: &[Box<dyn RewriteRule>],
) -> Result<(), LowerError> {
    for i in 0..module.funcs.len() {
        let mut func = std::mem::take(&mut module.funcs[i]);
        let result = convert_func(&mut func, module, target, rules);
        module.funcs[i] = func;
        result?;
    }
    Ok(())
}

fn convert_func(
    func: &mut Func,
    module: &mut Module,
    target: &ConversionTarget,
    rules: &[Box<dyn RewriteRule>],
) -> Result<(), LowerError> {
    loop {
        let mut progress = false;
        let mut at = 0;
        while at < func.body.len() {
            if target.is_legal(&func.body[at].op) {
                at += 1;
                continue;
            }
            let mut applied = false;
            for rule in rules {
                match rule.match_and_rewrite(func, at, module)? {
                    RewriteOutcome::Rewritten { insts, replacement } => {
                        let old_result = func.body[at].result;
                        let len = insts.len();
                        func.body.splice(at..=at, insts);
                        if let (Some(old), Some(new)) = (old_result, replacement) {
                            remap_uses(&mut func.body[at..], old, new);
                        }
                        at += len;
                        progress = true;
                        applied = true;
                        break;
                    }
                    RewriteOutcome::NotApplicable => continue,
                }
            }
            if !applied {
                at += 1;
            }
        }

        let residual = func.body.iter().find(|inst| !target.is_legal(&inst.op));
        match residual {
            None => return Ok(()),
            Some(inst) if !progress => {
                return Err(LowerError::ResidualIllegalOp {
                    func: func.name.clone(),
                    op: inst.op.name().to_string(),
                })
            }
            Some(_) => {}
        }
    }
}

/// Rewrite every use of `from` to `to` in the given instruction range.
fn remap_uses(body: &mut [Inst], from: Value, to: Value) {
    for inst in body {
        for operand in inst.op.operands_mut() {
            if *operand == from {
                *operand = to;
            }
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Ty;

    fn hi_const(result: u32, value: i64) -> Inst {
        Inst {
            result: Some(Value(result)),
            op: Op::HiConst {
                ty: Ty::I32,
                value,
            },
        }
    }

    /// hi.const → low.const, reusing the result id.
    struct ConstRule;

    impl RewriteRule for ConstRule {
        fn match_and_rewrite(
            &self,
            func: &mut Func,
            at: usize,
            _module: &mut Module,
        ) -> Result<RewriteOutcome, LowerError> {
            let Op::HiConst { ty, value } = func.body[at].op.clone() else {
                return Ok(RewriteOutcome::NotApplicable);
            };
            Ok(RewriteOutcome::Rewritten {
                insts: vec![Inst {
                    result: func.body[at].result,
                    op: Op::ConstInt { ty, value },
                }],
                replacement: None,
            })
        }
    }

    fn low_only_target() -> ConversionTarget {
        let mut target = ConversionTarget::new();
        target.add_legal_dialect(Dialect::Low);
        target
    }

    #[test]
    fn test_target_legality() {
        let mut target = low_only_target();
        target.add_illegal_op("low.dialect_cast");
        assert!(target.is_legal(&Op::Return { value: None }));
        assert!(!target.is_legal(&Op::HiConst {
            ty: Ty::I32,
            value: 0
        }));
        // Explicitly illegal op inside a legal dialect.
        assert!(!target.is_legal(&Op::DialectCast {
            value: Value(0),
            to: Ty::Ctx
        }));
    }

    #[test]
    fn test_conversion_rewrites_to_fixpoint() {
        let mut m = Module::new("m");
        let mut f = Func::new("main", vec![]);
        f.new_value(Ty::I32);
        f.new_value(Ty::I32);
        f.body = vec![hi_const(0, 1), hi_const(1, 2)];
        m.add_func(f);

        let rules: Vec<Box<dyn RewriteRule>> = vec![Box::new(ConstRule)];
        apply_full_conversion(&mut m, &low_only_target(), &rules).unwrap();

        assert_eq!(m.funcs[0].body.len(), 2);
        for inst in &m.funcs[0].body {
            assert!(matches!(inst.op, Op::ConstInt { .. }));
        }
    }

    #[test]
    fn test_residual_illegality_is_reported() {
        let mut m = Module::new("m");
        let mut f = Func::new("main", vec![]);
        let v = f.new_value(Ty::I32);
        f.body = vec![Inst {
            result: Some(f.new_value(Ty::Ctx)),
            op: Op::DialectCast {
                value: v,
                to: Ty::Ctx,
            },
        }];
        m.add_func(f);

        let mut target = low_only_target();
        target.add_illegal_op("low.dialect_cast");
        let rules: Vec<Box<dyn RewriteRule>> = vec![Box::new(ConstRule)];
        let err = apply_full_conversion(&mut m, &target, &rules).unwrap_err();
        assert_eq!(
            err,
            LowerError::ResidualIllegalOp {
                func: "main".into(),
                op: "low.dialect_cast".into(),
            }
        );
    }

    #[test]
    fn test_remap_uses_rewrites_later_operands() {
        let mut body = vec![
            Inst {
                result: None,
                op: Op::Store {
                    value: Value(5),
                    ptr: Value(6),
                },
            },
            Inst {
                result: None,
                op: Op::Return {
                    value: Some(Value(5)),
                },
            },
        ];
        remap_uses(&mut body, Value(5), Value(9));
        assert_eq!(
            body[0].op,
            Op::Store {
                value: Value(9),
                ptr: Value(6)
            }
        );
        assert_eq!(
            body[1].op,
            Op::Return {
                value: Some(Value(9))
            }
        );
    }
}
