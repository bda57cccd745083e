//! Schema inference for untyped row sets.
//!
//! Column order is first-appearance order across the sampled rows, and each
//! column's tag comes from the first row that holds a non-null value for it
//! (via [`infer_tag`]). Columns that are null everywhere default to
//! [`TypeTag::String`]. The result depends only on the rows and their order,
//! so repeated inference over the same rows is stable.

use crate::error::Result;
use crate::types::infer_tag;
use crate::value::{Column, Row, TableDescriptor, TypeTag};

/// Infer a table description for `rows`.
///
/// If `existing` is given (the target table's live schema), it is returned
/// unchanged and `rows` are not inspected.
///
/// # Errors
///
/// Returns an error only if `existing` is `None` and building the descriptor
/// fails, which cannot happen for names collected from [`Row`]s since each
/// name is recorded once.
pub fn infer(
    table: &str,
    rows: &[Row],
    existing: Option<TableDescriptor>,
) -> Result<TableDescriptor> {
    if let Some(live) = existing {
        return Ok(live);
    }

    let mut order: Vec<&str> = Vec::new();
    let mut tags: Vec<Option<TypeTag>> = Vec::new();
    for row in rows {
        for (name, value) in row.iter() {
            let idx = if let Some(idx) = order.iter().position(|n| *n == name) {
                idx
            } else {
                order.push(name);
                tags.push(None);
                order.len() - 1
            };
            if tags[idx].is_none() {
                tags[idx] = infer_tag(value);
            }
        }
    }

    let columns = order
        .into_iter()
        .zip(tags)
        .map(|(name, tag)| Column::new(name, tag.unwrap_or(TypeTag::String)))
        .collect();
    TableDescriptor::new(table, columns)
}

/// The column names a batch writes, fixed once from the first row.
#[must_use]
pub fn column_order(rows: &[Row]) -> Vec<String> {
    rows.first()
        .map(|r| r.columns().map(str::to_string).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn first_non_null_sample_decides() -> Result<()> {
        let rows = vec![
            Row::new().with("id", 1i32).with("score", Value::Null),
            Row::new().with("id", 2i32).with("score", 9.5f64).with("tag", "x"),
        ];
        let desc = infer("t", &rows, None)?;
        let got: Vec<(&str, TypeTag)> = desc
            .columns()
            .iter()
            .map(|c| (c.name.as_str(), c.tag))
            .collect();
        assert_eq!(
            got,
            vec![
                ("id", TypeTag::Int64),
                ("score", TypeTag::Float64),
                ("tag", TypeTag::String),
            ]
        );
        Ok(())
    }

    #[test]
    fn all_null_column_defaults_to_string() -> Result<()> {
        let rows = vec![Row::new().with("gone", Value::Null)];
        let desc = infer("t", &rows, None)?;
        assert_eq!(desc.columns()[0].store_type, "String");
        Ok(())
    }

    #[test]
    fn live_schema_wins() -> Result<()> {
        let live = TableDescriptor::new("t", vec![Column::new("id", TypeTag::UInt32)])?;
        let rows = vec![Row::new().with("id", "text")];
        let desc = infer("t", &rows, Some(live.clone()))?;
        assert_eq!(desc, live);
        Ok(())
    }

    #[test]
    fn inference_is_repeatable() -> Result<()> {
        let rows = vec![
            Row::new().with("a", true).with("b", "x"),
            Row::new().with("b", "y").with("c", 3u64),
        ];
        assert_eq!(infer("t", &rows, None)?, infer("t", &rows, None)?);
        Ok(())
    }
}
