//! Symbol table and function descriptors.

use std::cell::OnceCell;
use std::collections::HashMap;

use crate::error::{CompileError, Result};

use super::instr::BlockId;

/// Declared type of a name, or the return kind of a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    Int,
    Array,
    Void,
}

pub type FuncId = usize;

/// One function's scope: its formals, its declared locals and their types,
/// array extents, and the entry block of its body.
///
/// The derived sets (`real_params`, `real_globals`) are invariant once
/// computed and are cached rather than recomputed per use, so every
/// optimization pass sees the same view.
#[derive(Debug)]
pub struct FunctionSymbol {
    name: String,
    return_type: Type,
    params: Vec<String>,
    locals: Vec<(String, Type)>,
    array_shapes: HashMap<String, Vec<usize>>,
    entry: BlockId,
    real_params: OnceCell<Vec<String>>,
    real_globals: OnceCell<Vec<String>>,
}

impl FunctionSymbol {
    pub fn new(name: impl Into<String>, return_type: Type, params: Vec<String>) -> Self {
        Self {
            name: name.into(),
            return_type,
            params,
            locals: Vec::new(),
            array_shapes: HashMap::new(),
            entry: BlockId(usize::MAX),
            real_params: OnceCell::new(),
            real_globals: OnceCell::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn return_type(&self) -> Type {
        self.return_type
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn locals(&self) -> &[(String, Type)] {
        &self.locals
    }

    pub fn entry(&self) -> BlockId {
        self.entry
    }

    pub fn set_entry(&mut self, entry: BlockId) {
        self.entry = entry;
    }

    pub fn insert_local(&mut self, name: impl Into<String>, ty: Type) {
        let name = name.into();
        debug_assert!(
            self.locals.iter().all(|(local, _)| *local != name),
            "local {} redefined",
            name
        );
        self.locals.push((name, ty));
    }

    pub fn insert_array_shape(&mut self, name: impl Into<String>, shape: Vec<usize>) {
        self.array_shapes.insert(name.into(), shape);
    }

    pub fn matches(&self, name: &str, arity: usize) -> bool {
        self.name == name && self.params.len() == arity
    }

    /// Type of a name inside this scope, if the scope declares it.
    /// Parameters are always scalar.
    pub fn lookup_type(&self, name: &str) -> Option<Type> {
        self.locals
            .iter()
            .find(|(local, _)| local == name)
            .map(|(_, ty)| *ty)
            .or_else(|| self.params.iter().any(|p| p == name).then_some(Type::Int))
    }

    pub fn array_shape(&self, name: &str) -> Option<&[usize]> {
        self.array_shapes.get(name).map(Vec::as_slice)
    }

    /// Parameters not shadowed by a local of the same name. Only these are
    /// actually passed on the stack.
    pub fn real_params(&self) -> &[String] {
        self.real_params.get_or_init(|| {
            self.params
                .iter()
                .filter(|p| self.locals.iter().all(|(local, _)| local != *p))
                .cloned()
                .collect()
        })
    }

    /// For each formal parameter, whether it is passed for real (true) or
    /// shadowed by a local (false). Parallel to `params`.
    pub fn param_real_flags(&self) -> Vec<bool> {
        self.params
            .iter()
            .map(|p| self.locals.iter().all(|(local, _)| local != p))
            .collect()
    }

    /// Globals visible inside this function: not shadowed by a parameter
    /// or a local.
    pub fn real_globals(&self, table: &SymbolTable) -> &[String] {
        self.real_globals.get_or_init(|| {
            table
                .globals()
                .iter()
                .filter(|g| !self.params.iter().any(|p| p == *g))
                .filter(|g| !self.locals.iter().any(|(local, _)| local == *g))
                .cloned()
                .collect()
        })
    }
}

/// Global declarations plus all function descriptors. Built by the front
/// end and consumed read-only by every later stage.
#[derive(Debug, Default)]
pub struct SymbolTable {
    globals: Vec<String>,
    global_types: Vec<Type>,
    array_shapes: HashMap<String, Vec<usize>>,
    functions: Vec<FunctionSymbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_global(&mut self, name: impl Into<String>, ty: Type) {
        let name = name.into();
        debug_assert!(
            self.globals.iter().all(|g| *g != name),
            "global {} redefined",
            name
        );
        self.globals.push(name);
        self.global_types.push(ty);
    }

    pub fn insert_global_array(&mut self, name: impl Into<String>, shape: Vec<usize>) {
        let name = name.into();
        self.array_shapes.insert(name.clone(), shape);
        self.insert_global(name, Type::Array);
    }

    pub fn insert_function(&mut self, symbol: FunctionSymbol) -> FuncId {
        debug_assert!(
            self.functions
                .iter()
                .all(|f| !f.matches(symbol.name(), symbol.params().len())),
            "function {} redefined",
            symbol.name()
        );
        self.functions.push(symbol);
        self.functions.len() - 1
    }

    pub fn globals(&self) -> &[String] {
        &self.globals
    }

    pub fn global_type(&self, name: &str) -> Option<Type> {
        self.globals
            .iter()
            .position(|g| g == name)
            .map(|i| self.global_types[i])
    }

    pub fn function(&self, id: FuncId) -> &FunctionSymbol {
        &self.functions[id]
    }

    pub fn function_mut(&mut self, id: FuncId) -> &mut FunctionSymbol {
        &mut self.functions[id]
    }

    pub fn functions(&self) -> &[FunctionSymbol] {
        &self.functions
    }

    /// Type of a name as seen from the given scope: scope-local names
    /// shadow globals.
    pub fn lookup_type(&self, scope: Option<FuncId>, name: &str) -> Result<Type> {
        if let Some(id) = scope {
            if let Some(ty) = self.functions[id].lookup_type(name) {
                return Ok(ty);
            }
        }
        self.global_type(name)
            .ok_or_else(|| CompileError::UnknownVariable(name.to_string()))
    }

    pub fn lookup_function(&self, name: &str, arity: usize) -> Result<FuncId> {
        self.functions
            .iter()
            .position(|f| f.matches(name, arity))
            .ok_or_else(|| CompileError::UnknownFunction {
                name: name.to_string(),
                arity,
            })
    }

    pub fn function_by_entry(&self, entry: BlockId) -> Result<FuncId> {
        self.functions
            .iter()
            .position(|f| f.entry() == entry)
            .ok_or(CompileError::UnknownEntry(entry.0))
    }

    /// Array extents of a name as seen from the given scope.
    pub fn array_shape(&self, scope: Option<FuncId>, name: &str) -> Result<&[usize]> {
        if let Some(id) = scope {
            if let Some(shape) = self.functions[id].array_shape(name) {
                return Ok(shape);
            }
        }
        self.array_shapes
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| CompileError::UnknownVariable(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn real_params_exclude_shadowed_names() {
        let mut symbol = FunctionSymbol::new(
            "f",
            Type::Int,
            vec!["a".to_string(), "b".to_string()],
        );
        symbol.insert_local("b", Type::Int);
        symbol.insert_local("c", Type::Int);

        assert_eq!(&["a".to_string()], symbol.real_params());
        assert_eq!(vec![true, false], symbol.param_real_flags());
    }

    #[test]
    fn real_globals_exclude_params_and_locals() {
        let mut table = SymbolTable::new();
        table.insert_global("g", Type::Int);
        table.insert_global("h", Type::Int);
        table.insert_global("x", Type::Int);

        let mut symbol = FunctionSymbol::new("f", Type::Void, vec!["x".to_string()]);
        symbol.insert_local("h", Type::Int);
        let id = table.insert_function(symbol);

        assert_eq!(&["g".to_string()], table.function(id).real_globals(&table));
    }

    #[test]
    fn lookup_function_requires_matching_arity() {
        let mut table = SymbolTable::new();
        table.insert_function(FunctionSymbol::new("f", Type::Int, vec!["a".to_string()]));

        assert!(table.lookup_function("f", 1).is_ok());
        assert_eq!(
            Err(CompileError::UnknownFunction {
                name: "f".to_string(),
                arity: 2
            }),
            table.lookup_function("f", 2)
        );
    }
}
