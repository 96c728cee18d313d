//! Function container.

use crate::block::BasicBlock;

/// A function: an ordered list of basic blocks.
///
/// Block order is the layout order, not necessarily the execution order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Function<I> {
    name: String,
    blocks: Vec<BasicBlock<I>>,
    /// Excluded from hardening passes (hand-mitigated or hot code).
    ignored: bool,
}

impl<I> Function<I> {
    /// Create an empty function.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            blocks: Vec::new(),
            ignored: false,
        }
    }

    /// Mark the function as ignored.
    #[must_use]
    pub fn with_ignored(mut self, ignored: bool) -> Self {
        self.ignored = ignored;
        self
    }

    /// Add a block and return it.
    #[must_use]
    pub fn with_block(mut self, block: BasicBlock<I>) -> Self {
        self.blocks.push(block);
        self
    }

    /// Function name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check whether passes must leave this function alone.
    #[must_use]
    pub const fn is_ignored(&self) -> bool {
        self.ignored
    }

    /// Set the ignored flag.
    pub fn set_ignored(&mut self, ignored: bool) {
        self.ignored = ignored;
    }

    /// Blocks in layout order.
    #[must_use]
    pub fn blocks(&self) -> &[BasicBlock<I>] {
        &self.blocks
    }

    /// Mutable access to blocks. The block list itself stays fixed.
    pub fn blocks_mut(&mut self) -> &mut [BasicBlock<I>] {
        &mut self.blocks
    }

    /// Append a block.
    pub fn push_block(&mut self, block: BasicBlock<I>) {
        self.blocks.push(block);
    }

    /// Last block, if any.
    pub fn last_block_mut(&mut self) -> Option<&mut BasicBlock<I>> {
        self.blocks.last_mut()
    }

    /// Total number of instructions across all blocks.
    #[must_use]
    pub fn instruction_count(&self) -> usize {
        self.blocks.iter().map(BasicBlock::len).sum()
    }

    /// Iterate over every instruction in layout order.
    pub fn instructions(&self) -> impl Iterator<Item = &I> + '_ {
        self.blocks.iter().flat_map(BasicBlock::iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_count() {
        let func = Function::new("f")
            .with_block(BasicBlock::with_instructions("a", vec![1, 2]))
            .with_block(BasicBlock::with_instructions("b", vec![3]));
        assert_eq!(func.instruction_count(), 3);
        assert_eq!(func.instructions().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(!func.is_ignored());
    }
}
