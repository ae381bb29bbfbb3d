//! Generic lowering rules unrelated to kernel launches: high-level
//! arithmetic, context unwrapping, and legacy dialect-cast reconciliation.
//! Registered alongside the launch rule so one conversion run lowers the
//! whole host function.

use crate::error::LowerError;
use crate::ir::module::{Func, Module};
use crate::ir::{Inst, Op, Ty};

use super::convert::{RewriteOutcome, RewriteRule};
use super::convert_ty;

/// `hi.const` → `low.const`, same type, same result id.
pub struct HiConstRule;

impl RewriteRule for HiConstRule {
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

/// `hi.add` → `low.add`, same operands, same result id.
pub struct HiAddRule;

impl RewriteRule for HiAddRule {
    fn match_and_rewrite(
        &self,
        func: &mut Func,
        at: usize,
        _module: &mut Module,
    ) -> Result<RewriteOutcome, LowerError> {
        let Op::HiAdd { ty, lhs, rhs } = func.body[at].op.clone() else {
            return Ok(RewriteOutcome::NotApplicable);
        };
        Ok(RewriteOutcome::Rewritten {
            insts: vec![Inst {
                result: func.body[at].result,
                op: Op::Add { ty, lhs, rhs },
            }],
            replacement: None,
        })
    }
}

/// `ctx.unwrap` folds to its operand once the signature conversion has
/// turned the context parameter into a raw pointer.
pub struct CtxUnwrapRule;

impl RewriteRule for CtxUnwrapRule {
    fn match_and_rewrite(
        &self,
        func: &mut Func,
        at: usize,
        _module: &mut Module,
    ) -> Result<RewriteOutcome, LowerError> {
        let Op::CtxUnwrap { ctx } = func.body[at].op else {
            return Ok(RewriteOutcome::NotApplicable);
        };
        if *func.value_ty(ctx) != Ty::erased() {
            return Ok(RewriteOutcome::NotApplicable);
        }
        Ok(RewriteOutcome::Rewritten {
            insts: vec![],
            replacement: Some(ctx),
        })
    }
}

/// Legacy `low.dialect_cast` reconciliation: a cast whose source type
/// equals its (converted) target type folds to the operand. Non-trivial
/// casts have no rule and surface as residual illegality.
pub struct DialectCastRule;

impl RewriteRule for DialectCastRule {
    fn match_and_rewrite(
        &self,
        func: &mut Func,
        at: usize,
        _module: &mut Module,
    ) -> Result<RewriteOutcome, LowerError> {
        let Op::DialectCast { value, ref to } = func.body[at].op else {
            return Ok(RewriteOutcome::NotApplicable);
        };
        if *func.value_ty(value) != convert_ty(to) {
            return Ok(RewriteOutcome::NotApplicable);
        }
        Ok(RewriteOutcome::Rewritten {
            insts: vec![],
            replacement: Some(value),
        })
    }
}
