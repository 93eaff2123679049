//! Language-level types, their LLVM representation, and lexical scopes.
//!
//! LLVM pointers are opaque, so the pointee of a pointer value cannot be
//! recovered from the IR. Lowering therefore carries a [`Ty`] next to every
//! value and every stack slot.

use std::collections::{HashMap, HashSet};
use std::fmt;

use inkwell::context::Context;
use inkwell::types::{BasicMetadataTypeEnum, BasicType, BasicTypeEnum, FunctionType};
use inkwell::values::PointerValue;
use inkwell::AddressSpace;

use crate::ast::{self, Ident, TypeKind};
use crate::error::{CompileError, CompileResult};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Ty {
    Void,
    Decimal,
    Boolean,
    Char,
    Pointer(Box<Ty>),
}

impl Ty {
    pub fn pointer_to(inner: Ty) -> Ty {
        Ty::Pointer(Box::new(inner))
    }

    /// `str`, a pointer to characters.
    pub fn str_ptr() -> Ty {
        Ty::pointer_to(Ty::Char)
    }

    pub fn from_ast(ty: &ast::Type) -> Ty {
        match &ty.kind {
            TypeKind::Void => Ty::Void,
            TypeKind::Decimal => Ty::Decimal,
            TypeKind::Boolean => Ty::Boolean,
            TypeKind::Char => Ty::Char,
            TypeKind::StrPtr => Ty::str_ptr(),
            TypeKind::PointerOf(inner) => Ty::pointer_to(Ty::from_ast(inner)),
        }
    }

    /// Resolve a variable or parameter type. `v@1d` cannot be stored, not
    /// even behind a pointer.
    pub fn storable(ty: &ast::Type, name: &Ident) -> CompileResult<Ty> {
        let resolved = Ty::from_ast(ty);
        if resolved.mentions_void() {
            return Err(CompileError::type_error(
                format!("`{}` cannot have type `{resolved}`", name.name),
                ty.pos,
            ));
        }
        Ok(resolved)
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Ty::Pointer(_))
    }

    pub fn pointee(&self) -> Option<&Ty> {
        match self {
            Ty::Pointer(inner) => Some(inner),
            _ => None,
        }
    }

    pub fn is_str_ptr(&self) -> bool {
        self.pointee() == Some(&Ty::Char)
    }

    fn mentions_void(&self) -> bool {
        match self {
            Ty::Void => true,
            Ty::Pointer(inner) => inner.mentions_void(),
            _ => false,
        }
    }

    /// LLVM type of a value of this type, `None` for `v@1d`.
    pub fn basic<'ctx>(&self, ctx: &'ctx Context) -> Option<BasicTypeEnum<'ctx>> {
        Some(match self {
            Ty::Void => return None,
            Ty::Decimal => ctx.i64_type().into(),
            Ty::Boolean => ctx.bool_type().into(),
            Ty::Char => ctx.i8_type().into(),
            Ty::Pointer(_) => opaque_ptr(ctx).into(),
        })
    }

    pub fn fn_type<'ctx>(
        &self,
        ctx: &'ctx Context,
        params: &[BasicMetadataTypeEnum<'ctx>],
    ) -> FunctionType<'ctx> {
        match self.basic(ctx) {
            Some(ret) => ret.fn_type(params, false),
            None => ctx.void_type().fn_type(params, false),
        }
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Void => f.write_str("v@1d"),
            Ty::Decimal => f.write_str("dec"),
            Ty::Boolean => f.write_str("b@@1"),
            Ty::Char => f.write_str("char"),
            Ty::Pointer(inner) => write!(f, "{inner}#"),
        }
    }
}

pub fn opaque_ptr(ctx: &Context) -> inkwell::types::PointerType<'_> {
    ctx.i8_type().ptr_type(AddressSpace::default())
}

/// A variable's stack slot and the type stored in it.
#[derive(Debug, Clone, PartialEq)]
pub struct Slot<'ctx> {
    pub ptr: PointerValue<'ctx>,
    pub ty: Ty,
}

/// Names visible at one point of a function body.
///
/// Entering a block takes a [`nested`](SymbolTable::nested) copy: the copy
/// sees every outer binding, may shadow them, and is dropped when the block
/// ends. Slots are LLVM handles, so the copy writes the same storage.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable<'ctx> {
    visible: HashMap<String, Slot<'ctx>>,
    declared_here: HashSet<String>,
}

impl<'ctx> SymbolTable<'ctx> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nested(&self) -> Self {
        Self {
            visible: self.visible.clone(),
            declared_here: HashSet::new(),
        }
    }

    pub fn is_declared_here(&self, name: &str) -> bool {
        self.declared_here.contains(name)
    }

    pub fn declare(&mut self, name: &Ident, slot: Slot<'ctx>) -> CompileResult<()> {
        if !self.declared_here.insert(name.name.clone()) {
            return Err(CompileError::scope(
                format!("variable `{}` is already declared in this scope", name.name),
                name.pos,
            ));
        }
        self.visible.insert(name.name.clone(), slot);
        Ok(())
    }

    pub fn lookup(&self, name: &Ident) -> CompileResult<&Slot<'ctx>> {
        self.visible.get(&name.name).ok_or_else(|| {
            CompileError::scope(format!("variable `{}` is not declared", name.name), name.pos)
        })
    }
}
