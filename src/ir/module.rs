//! Module-level containers: functions, external declarations, global
//! constants, and nested device modules.
//!
//! The module is the unit the lowering pass runs over. Globals and
//! external declarations are name-keyed and deduplicated on insertion;
//! duplicate global names are illegal, so `ensure_global` reuses by name
//! and never compares payloads.

use std::fmt;

use rustc_hash::FxHashMap;

use super::{Inst, Ty, Value};

// ─── Globals and declarations ─────────────────────────────────────

/// A module-level constant: a name plus an immutable byte payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Global {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// An external function declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncDecl {
    pub name: String,
    pub params: Vec<Ty>,
    pub ret: Option<Ty>,
}

impl fmt::Display for FuncDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "declare @{}(", self.name)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", p)?;
        }
        write!(f, ")")?;
        if let Some(ret) = &self.ret {
            write!(f, " -> {}", ret)?;
        }
        Ok(())
    }
}

// ─── Device modules ───────────────────────────────────────────────

/// A nested container of accelerator-side code. The host pass never looks
/// inside; it only reads named byte attributes (the compiled binary blob
/// lives under the configured annotation key) and removes the whole
/// container once every launch targeting it has been lowered.
#[derive(Debug, Clone, Default)]
pub struct DeviceModule {
    pub name: String,
    attrs: FxHashMap<String, Vec<u8>>,
}

impl DeviceModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: FxHashMap::default(),
        }
    }

    /// Attach a named byte attribute, replacing any previous value.
    pub fn set_attr(&mut self, key: impl Into<String>, bytes: Vec<u8>) {
        self.attrs.insert(key.into(), bytes);
    }

    /// Look up a named byte attribute.
    pub fn attr(&self, key: &str) -> Option<&[u8]> {
        self.attrs.get(key).map(|b| b.as_slice())
    }
}

// ─── Functions ────────────────────────────────────────────────────

/// A host-side function: parameter types, a flat instruction body, and a
/// type table for every SSA value. Parameters occupy value ids `0..params`.
///
/// `ctx_param` is the explicit binding of the execution-context parameter.
/// It is recorded when the function is built with a `Ctx`-typed parameter
/// and survives the pass's context-to-pointer signature conversion, so the
/// launch rule never has to guess a parameter position.
#[derive(Debug, Clone, Default)]
pub struct Func {
    pub name: String,
    pub params: Vec<Ty>,
    pub ctx_param: Option<usize>,
    pub body: Vec<Inst>,
    value_tys: Vec<Ty>,
}

impl Func {
    pub fn new(name: impl Into<String>, params: Vec<Ty>) -> Self {
        let ctx_param = params.iter().position(|t| *t == Ty::Ctx);
        Self {
            name: name.into(),
            value_tys: params.clone(),
            params,
            ctx_param,
            body: Vec::new(),
        }
    }

    /// The value id of parameter `index`.
    pub fn param_value(&self, index: usize) -> Value {
        debug_assert!(index < self.params.len());
        Value(index as u32)
    }

    /// The recorded type of a value.
    pub fn value_ty(&self, value: Value) -> &Ty {
        &self.value_tys[value.0 as usize]
    }

    /// Allocate a fresh SSA value of the given type.
    pub fn new_value(&mut self, ty: Ty) -> Value {
        let v = Value(self.value_tys.len() as u32);
        self.value_tys.push(ty);
        v
    }

    /// Overwrite the recorded type of a value. Used by the signature
    /// conversion when a parameter type changes.
    pub(crate) fn set_value_ty(&mut self, value: Value, ty: Ty) {
        self.value_tys[value.0 as usize] = ty;
    }
}

impl fmt::Display for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "func @{}(", self.name)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "%{}: {}", i, p)?;
        }
        writeln!(f, ") {{")?;
        for inst in &self.body {
            writeln!(f, "  {}", inst)?;
        }
        write!(f, "}}")
    }
}

// ─── Module ───────────────────────────────────────────────────────

/// A tree container holding host functions, external declarations, global
/// constants, and nested device modules.
///
/// Invariant: after a successful lowering pass run, `device_modules` is
/// empty and every instruction in every function body is low-dialect.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub name: String,
    pub funcs: Vec<Func>,
    pub decls: Vec<FuncDecl>,
    pub globals: Vec<Global>,
    pub device_modules: Vec<DeviceModule>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn add_func(&mut self, func: Func) {
        self.funcs.push(func);
    }

    pub fn add_device_module(&mut self, dm: DeviceModule) {
        self.device_modules.push(dm);
    }

    /// Look up a nested device module by name.
    pub fn device_module(&self, name: &str) -> Option<&DeviceModule> {
        self.device_modules.iter().find(|dm| dm.name == name)
    }

    /// Look up a global constant by name.
    pub fn global(&self, name: &str) -> Option<&Global> {
        self.globals.iter().find(|g| g.name == name)
    }

    /// Look up an external declaration by name.
    pub fn decl(&self, name: &str) -> Option<&FuncDecl> {
        self.decls.iter().find(|d| d.name == name)
    }

    /// Return the global with this name, creating it with `bytes` if
    /// absent. Dedup is by name only: a second request for an existing
    /// name reuses the constant without comparing payloads.
    pub fn ensure_global(&mut self, name: impl Into<String>, bytes: Vec<u8>) -> &Global {
        let name = name.into();
        let idx = match self.globals.iter().position(|g| g.name == name) {
            Some(idx) => idx,
            None => {
                self.globals.push(Global { name, bytes });
                self.globals.len() - 1
            }
        };
        &self.globals[idx]
    }

    /// Return the declaration with this name, inserting `decl` at the
    /// start of the declaration list if absent. At most one declaration
    /// per name exists regardless of how many call sites request it.
    pub fn ensure_decl(&mut self, decl: FuncDecl) -> &FuncDecl {
        let idx = match self.decls.iter().position(|d| d.name == decl.name) {
            Some(idx) => idx,
            None => {
                self.decls.insert(0, decl);
                0
            }
        };
        &self.decls[idx]
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "module @{} {{", self.name)?;
        for decl in &self.decls {
            writeln!(f, "{}", indent(&decl.to_string()))?;
        }
        for g in &self.globals {
            writeln!(f, "  global @{} = bytes[{}]", g.name, hex(&g.bytes))?;
        }
        for func in &self.funcs {
            writeln!(f, "{}", indent(&func.to_string()))?;
        }
        for dm in &self.device_modules {
            writeln!(f, "  device_module @{}", dm.name)?;
        }
        write!(f, "}}")
    }
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|l| format!("  {}", l))
        .collect::<Vec<_>>()
        .join("\n")
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

// ─── Tests ────────────────────────────────────────────────────────
