//! gpulower — lowering pass that rewrites kernel-launch instructions into
//! calls to a fixed runtime dispatch entry point.
//!
//! The crate carries a small host-side IR (four dialect families over
//! typed SSA values), a legality-driven fixpoint conversion engine, and
//! the launch rewrite itself: embed the device binary and entry name as
//! module constants, marshal the arguments into a type-erased pointer
//! array with natural-ABI layout, and call the runtime.
//!
//! ```text
//! host IR (hi + ctx + launch) ─→ LaunchLowerPass ─→ host IR (low only)
//! ```
//!
//! After a successful run the module contains no launch instructions and
//! no device modules; their binaries live on as embedded constants.

pub mod error;
pub mod ir;
pub mod lower;

pub use error::LowerError;
pub use ir::module::{DeviceModule, Func, FuncDecl, Global, Module};
pub use lower::{LaunchLowerPass, DEFAULT_BLOB_KEY, RUNTIME_LAUNCH_SYM};
