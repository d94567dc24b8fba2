//! `CREATE TABLE` synthesis from column descriptors.

use crate::core::{quote_mssql, ColumnDescriptor, TableRef};
use crate::error::{MigrateError, Result};

/// Types that never take an explicit length, even when the catalog reports one.
const UNBOUNDED_TYPES: &[&str] = &[
    "text",
    "ntext",
    "image",
    "xml",
    "geography",
    "geometry",
    "hierarchyid",
];

/// Fixed-size numerics that never take explicit precision and scale.
const FIXED_SIZE_NUMERIC_TYPES: &[&str] = &[
    "tinyint",
    "smallint",
    "int",
    "bigint",
    "money",
    "smallmoney",
];

/// Build the statement creating `destination` with the given columns.
///
/// Fails with `MetadataNotFound` when `columns` is empty, since a table
/// without columns cannot be created.
pub fn build_create_table(
    columns: &[ColumnDescriptor],
    destination: &TableRef,
) -> Result<String> {
    if columns.is_empty() {
        return Err(MigrateError::MetadataNotFound(format!(
            "no columns to create {}",
            destination
        )));
    }

    let col_defs: Vec<String> = columns.iter().map(column_definition).collect();

    Ok(format!(
        "CREATE TABLE {} (\n    {}\n);",
        destination,
        col_defs.join(",\n    ")
    ))
}

/// Render one column definition: name, type, sizing, default, nullability.
pub fn column_definition(column: &ColumnDescriptor) -> String {
    let mut def = format!("{} {}", quote_mssql(&column.name), column.sql_type);

    if let Some(length) = column.max_length {
        if !is_unbounded_type(&column.sql_type) {
            if length == -1 {
                def.push_str("(max)");
            } else {
                def.push_str(&format!("({})", length));
            }
        }
    } else if let Some((precision, scale)) = column.precision_scale() {
        if !is_fixed_size_numeric(&column.sql_type) {
            def.push_str(&format!("({}, {})", precision, scale));
        }
    }

    if let Some(default_expr) = &column.default_expr {
        def.push_str(" DEFAULT ");
        def.push_str(strip_outer_parens(default_expr));
    }

    if !column.nullable {
        def.push_str(" NOT NULL");
    }

    def
}

/// Remove one enclosing pair of parentheses from a catalog default.
///
/// SQL Server stores defaults wrapped in parentheses: `('n/a')`, `((0))`,
/// `(getdate())`. The input is trimmed; if its first `(` is closed by its
/// last `)`, that pair is removed and the remainder trimmed. Expressions
/// such as `(1) + (2)`, whose first and last parens belong to different
/// pairs, are returned unchanged.
pub fn strip_outer_parens(expr: &str) -> &str {
    let trimmed = expr.trim();
    if encloses_whole(trimmed) {
        trimmed[1..trimmed.len() - 1].trim()
    } else {
        trimmed
    }
}

/// Whether `expr` is one parenthesized group: the opening `(` at index 0
/// stays open until the final character. Parens inside string literals
/// are ignored.
fn encloses_whole(expr: &str) -> bool {
    if expr.len() < 2 || !expr.starts_with('(') || !expr.ends_with(')') {
        return false;
    }

    let last = expr.len() - 1;
    let mut depth = 0usize;
    let mut in_string = false;

    for (i, c) in expr.char_indices() {
        match c {
            '\'' => in_string = !in_string,
            '(' if !in_string => depth += 1,
            ')' if !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 && i != last {
                    return false;
                }
            }
            _ => {}
        }
    }

    depth == 0 && !in_string
}

fn is_unbounded_type(sql_type: &str) -> bool {
    let lower = sql_type.to_lowercase();
    UNBOUNDED_TYPES.contains(&lower.as_str())
}

fn is_fixed_size_numeric(sql_type: &str) -> bool {
    let lower = sql_type.to_lowercase();
    FIXED_SIZE_NUMERIC_TYPES.contains(&lower.as_str())
}
