//! Output column-name resolution.
//!
//! Pure function of the (expanded) field list: aliases resolve first and
//! reserve their names; derived names then claim the first free `_N`
//! suffix on conflict. `top`/`bottom` tag arguments contribute extra
//! columns after their call's column.

use std::collections::HashMap;

use crate::compile::{CompiledField, FieldExpr};

/// Resolve final output column names in positional order. A leading time
/// column (named `time` or its alias) is prepended unless `omit_time`.
pub fn column_names(
    fields: &[CompiledField],
    time_alias: Option<&str>,
    omit_time: bool,
) -> Vec<String> {
    // One column per field, plus the tag columns of a top/bottom call.
    let mut cols: Vec<(Option<String>, String)> = Vec::with_capacity(fields.len());
    for field in fields {
        cols.push((field.alias.clone(), field.name()));
        if let FieldExpr::Call { name, args } = &field.expr {
            if (name == "top" || name == "bottom") && args.len() > 2 {
                for arg in &args[1..args.len() - 1] {
                    if let FieldExpr::VarRef(tag) = arg {
                        cols.push((None, tag.name.clone()));
                    }
                }
            }
        }
    }

    let offset = usize::from(!omit_time);
    let mut names = vec![String::new(); cols.len() + offset];
    let mut used: HashMap<String, i64> = HashMap::new();
    if !omit_time {
        let time_name = time_alias.unwrap_or("time").to_string();
        used.insert(time_name.clone(), 1);
        names[0] = time_name;
    }

    // Aliases claim their names before any derived name resolves.
    for (i, (alias, _)) in cols.iter().enumerate() {
        if let Some(alias) = alias {
            names[i + offset] = alias.clone();
            used.insert(alias.clone(), 1);
        }
    }

    // Derived names take the first free `_N` suffix on conflict.
    for (i, (alias, base)) in cols.iter().enumerate() {
        if alias.is_some() {
            continue;
        }
        let mut name = base.clone();
        if let Some(&count) = used.get(base) {
            let mut count = count;
            loop {
                let resolved = format!("{base}_{count}");
                if !used.contains_key(&resolved) {
                    used.insert(base.clone(), count + 1);
                    name = resolved;
                    break;
                }
                count += 1;
            }
        }
        *used.entry(name.clone()).or_insert(0) += 1;
        names[i + offset] = name;
    }
    names
}

#[cfg(test)]
mod tests {
    use super::column_names;
    use crate::compile::{CompiledField, FieldExpr};
    use tsq_ql::VarRef;

    fn field(name: &str) -> CompiledField {
        CompiledField {
            expr: FieldExpr::VarRef(VarRef::new(name)),
            alias: None,
        }
    }

    fn aliased(name: &str, alias: &str) -> CompiledField {
        CompiledField {
            expr: FieldExpr::VarRef(VarRef::new(name)),
            alias: Some(alias.to_string()),
        }
    }

    #[test]
    fn single_field() {
        assert_eq!(
            column_names(&[field("field1")], None, false),
            vec!["time", "field1"]
        );
    }

    #[test]
    fn duplicates_take_first_free_suffix() {
        assert_eq!(
            column_names(
                &[field("field1"), field("field1"), field("field1_1")],
                None,
                false
            ),
            vec!["time", "field1", "field1_1", "field1_1_1"]
        );
        assert_eq!(
            column_names(
                &[field("field1"), field("field1_1"), field("field1")],
                None,
                false
            ),
            vec!["time", "field1", "field1_1", "field1_2"]
        );
    }

    #[test]
    fn aliases_win_and_push_suffixes_to_others() {
        assert_eq!(
            column_names(
                &[field("field1"), aliased("total", "field1"), field("field1")],
                None,
                false
            ),
            vec!["time", "field1_1", "field1", "field1_2"]
        );
    }

    #[test]
    fn time_alias_renames_leading_column() {
        assert_eq!(
            column_names(&[field("field1")], Some("timestamp"), false),
            vec!["timestamp", "field1"]
        );
        // The renamed time column reserves its name.
        assert_eq!(
            column_names(&[field("field1")], Some("field1"), false),
            vec!["field1", "field1_1"]
        );
    }

    #[test]
    fn top_tag_arguments_add_columns() {
        let top = CompiledField {
            expr: FieldExpr::Call {
                name: "top".to_string(),
                args: vec![
                    FieldExpr::VarRef(VarRef::new("value")),
                    FieldExpr::VarRef(VarRef::new("host")),
                    FieldExpr::Literal(tsq_ql::Literal::Integer(1)),
                ],
            },
            alias: None,
        };
        assert_eq!(
            column_names(&[top], None, false),
            vec!["time", "top", "host"]
        );
    }

    #[test]
    fn omit_time_drops_leading_column() {
        assert_eq!(column_names(&[field("a")], None, true), vec!["a"]);
    }
}
