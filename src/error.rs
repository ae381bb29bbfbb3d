//! Error taxonomy for the lowering pass.
//!
//! Every error is invocation-fatal: a failed rewrite of one instruction
//! aborts the whole pass run. There is no partial-success mode and no
//! rollback — after a failure the module is left in whatever partially
//! converted state the engine produced.

use thiserror::Error;

/// A fatal lowering failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LowerError {
    /// A launch carries async dependencies or produces an async token.
    /// Asynchronous launch forms are a hard precondition failure, not a
    /// best-effort fallback.
    #[error(
        "cannot lower launch of @{device_module}::@{kernel}: \
         asynchronous dependencies or token results are not supported"
    )]
    UnsupportedAsyncLaunch {
        device_module: String,
        kernel: String,
    },

    /// The referenced device module exists but does not carry the
    /// configured binary blob attribute.
    #[error("device module @{module} is missing the `{key}` binary blob attribute")]
    MissingBlobAttr { module: String, key: String },

    /// A launch references a device module that is not present in the
    /// enclosing module. Well-formed input guarantees the target exists,
    /// so this is a broken invariant of the input, not a user error.
    #[error("launch references unknown device module @{module}")]
    UnresolvedDeviceModule { module: String },

    /// The enclosing function has no context parameter. The launch rule
    /// resolves the runtime context through an explicit parameter binding
    /// rather than a positional convention; a host function that was never
    /// given a context cannot dispatch kernels.
    #[error("function @{func} has no context parameter; kernel launches require one")]
    MissingContextParam { func: String },

    /// An instruction outside the legal target survived the fixpoint
    /// conversion with no rule able to rewrite it.
    #[error("`{op}` in @{func} remains illegal after conversion; no rule applied")]
    ResidualIllegalOp { func: String, op: String },
}
