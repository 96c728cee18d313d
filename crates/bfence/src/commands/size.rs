//! Size command.

use std::path::Path;

use bfence::{FunctionSize, Hardener, LfenceConfig};
use tracing::error;

use crate::cli::{EXIT_FAILURE, EXIT_SUCCESS};
use crate::terminal::{self, Alignment, Table};

/// Handle the `size` command.
///
/// The pass runs with the master switch forced on; the rule switches still
/// apply.
pub fn cmd_size(input: &Path, config: &LfenceConfig) -> i32 {
    let result = bfence::read_listing(input).and_then(|mut program| {
        Hardener::new(config.clone().with_enabled(true)).measure(&mut program)
    });
    match result {
        Ok(sizes) => {
            size_table(&sizes).print();
            EXIT_SUCCESS
        }
        Err(err) => {
            error!(error = %err, "size measurement failed");
            terminal::error(&err.to_string());
            EXIT_FAILURE
        }
    }
}

fn size_table(sizes: &[FunctionSize]) -> Table {
    let mut table = Table::new(&["function", "before", "after", "growth"]).with_alignments(vec![
        Alignment::Left,
        Alignment::Right,
        Alignment::Right,
        Alignment::Right,
    ]);
    for size in sizes {
        table.add_row(vec![
            size.name.clone(),
            size.before.to_string(),
            size.after.to_string(),
            format!("+{}", size.growth()),
        ]);
    }

    let before: u64 = sizes.iter().map(|s| s.before).sum();
    let after: u64 = sizes.iter().map(|s| s.after).sum();
    table.add_row(vec![
        "total".to_string(),
        before.to_string(),
        after.to_string(),
        format!("+{}", after.saturating_sub(before)),
    ]);
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_table_has_total_row() {
        let sizes = [
            FunctionSize {
                name: "a".to_string(),
                before: 10,
                after: 16,
            },
            FunctionSize {
                name: "b".to_string(),
                before: 4,
                after: 4,
            },
        ];
        let rendered = size_table(&sizes).render();
        let last = rendered.lines().last().unwrap();
        assert_eq!(last, "| total    |     14 |    20 |     +6 |");
    }
}
