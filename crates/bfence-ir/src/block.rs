//! Basic block container.

/// A labelled, ordered sequence of instructions.
///
/// Instructions are addressed by index. Insertions shift every later
/// instruction, so a pass walking the block must advance its own cursor past
/// whatever it inserted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BasicBlock<I> {
    label: String,
    instructions: Vec<I>,
}

impl<I> BasicBlock<I> {
    /// Create an empty block.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            instructions: Vec::new(),
        }
    }

    /// Create a block from an existing instruction list.
    #[must_use]
    pub fn with_instructions(label: impl Into<String>, instructions: Vec<I>) -> Self {
        Self {
            label: label.into(),
            instructions,
        }
    }

    /// Block label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Instructions in layout order.
    #[must_use]
    pub fn instructions(&self) -> &[I] {
        &self.instructions
    }

    /// Get the instruction at `pos`.
    #[must_use]
    pub fn get(&self, pos: usize) -> Option<&I> {
        self.instructions.get(pos)
    }

    /// Get number of instructions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Check if block is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Iterate over instructions.
    pub fn iter(&self) -> std::slice::Iter<'_, I> {
        self.instructions.iter()
    }

    /// Append an instruction.
    pub fn push(&mut self, inst: I) {
        self.instructions.push(inst);
    }

    /// Insert `inst` before position `pos`.
    ///
    /// Returns the new position of the instruction that was at `pos`.
    ///
    /// # Panics
    ///
    /// Panics if `pos > len`.
    pub fn insert_before(&mut self, pos: usize, inst: I) -> usize {
        self.instructions.insert(pos, inst);
        pos + 1
    }

    /// Insert a sequence before position `pos`, preserving its order.
    ///
    /// Returns the new position of the instruction that was at `pos`.
    ///
    /// # Panics
    ///
    /// Panics if `pos > len`.
    pub fn insert_all_before(&mut self, pos: usize, seq: impl IntoIterator<Item = I>) -> usize {
        let before = self.instructions.len();
        self.instructions.splice(pos..pos, seq);
        pos + (self.instructions.len() - before)
    }

    /// Insert `inst` immediately after position `pos`.
    ///
    /// Returns the position of the inserted instruction.
    ///
    /// # Panics
    ///
    /// Panics if `pos >= len`.
    pub fn insert_after(&mut self, pos: usize, inst: I) -> usize {
        assert!(pos < self.instructions.len(), "insert_after past end of block");
        self.instructions.insert(pos + 1, inst);
        pos + 1
    }

    /// Replace the instruction at `pos` with a sequence.
    ///
    /// Returns the position of the last instruction of the sequence, or
    /// `None` if the sequence was empty and the instruction was simply removed.
    ///
    /// # Panics
    ///
    /// Panics if `pos >= len`.
    pub fn replace(&mut self, pos: usize, seq: impl IntoIterator<Item = I>) -> Option<usize> {
        let before = self.instructions.len();
        self.instructions.splice(pos..=pos, seq);
        let inserted = self.instructions.len() + 1 - before;
        inserted.checked_sub(1).map(|last| pos + last)
    }
}

impl<'a, I> IntoIterator for &'a BasicBlock<I> {
    type Item = &'a I;
    type IntoIter = std::slice::Iter<'a, I>;

    fn into_iter(self) -> Self::IntoIter {
        self.instructions.iter()
    }
}
