//! Whole-program container.

use rustc_hash::FxHashMap;

use crate::function::Function;
use crate::target::{RelocationMode, TargetArch};
use crate::{IrError, Result};

/// A disassembled program: functions plus the target description.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Program<I> {
    target: TargetArch,
    relocation_mode: RelocationMode,
    functions: Vec<Function<I>>,
    /// Function name -> index into `functions`.
    by_name: FxHashMap<String, usize>,
}

impl<I> Default for Program<I> {
    fn default() -> Self {
        Self::new(TargetArch::default(), RelocationMode::default())
    }
}

impl<I> Program<I> {
    /// Create an empty program.
    #[must_use]
    pub fn new(target: TargetArch, relocation_mode: RelocationMode) -> Self {
        Self {
            target,
            relocation_mode,
            functions: Vec::new(),
            by_name: FxHashMap::default(),
        }
    }

    /// Target architecture.
    #[must_use]
    pub const fn target(&self) -> TargetArch {
        self.target
    }

    /// Set the target architecture.
    pub fn set_target(&mut self, target: TargetArch) {
        self.target = target;
    }

    /// Relocation mode.
    #[must_use]
    pub const fn relocation_mode(&self) -> RelocationMode {
        self.relocation_mode
    }

    /// Set the relocation mode.
    pub fn set_relocation_mode(&mut self, mode: RelocationMode) {
        self.relocation_mode = mode;
    }

    /// Check if relocations are preserved.
    #[must_use]
    pub const fn has_relocations(&self) -> bool {
        self.relocation_mode.has_relocations()
    }

    /// Add a function.
    ///
    /// # Errors
    ///
    /// Returns `IrError::DuplicateFunction` if a function with the same name exists.
    pub fn add_function(&mut self, function: Function<I>) -> Result<()> {
        if self.by_name.contains_key(function.name()) {
            return Err(IrError::DuplicateFunction(function.name().to_string()));
        }
        self.by_name
            .insert(function.name().to_string(), self.functions.len());
        self.functions.push(function);
        Ok(())
    }

    /// Functions in program order.
    #[must_use]
    pub fn functions(&self) -> &[Function<I>] {
        &self.functions
    }

    /// Mutable access to functions. The function list itself stays fixed.
    pub fn functions_mut(&mut self) -> &mut [Function<I>] {
        &mut self.functions
    }

    /// Look up a function by name.
    #[must_use]
    pub fn function(&self, name: &str) -> Option<&Function<I>> {
        self.by_name.get(name).map(|&idx| &self.functions[idx])
    }

    /// Look up a function by name, mutably.
    pub fn function_mut(&mut self, name: &str) -> Option<&mut Function<I>> {
        self.by_name.get(name).map(|&idx| &mut self.functions[idx])
    }

    /// Get number of functions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Check if program has no functions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Total number of instructions.
    #[must_use]
    pub fn instruction_count(&self) -> usize {
        self.functions.iter().map(Function::instruction_count).sum()
    }
}
