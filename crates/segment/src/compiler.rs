//! Predicate-tree compiler
//!
//! Turns a `SegmentTree` into a parameterized WHERE fragment over the
//! `contacts` table. Placeholders start at `$1`; args positions match. No
//! user-supplied text is ever interpolated into the SQL — values travel as
//! bind arguments and field names are restricted to identifiers.

use flowmail_core::models::{DimensionFilter, FieldType, FilterOperator, SegmentTree};
use serde_json::Value;
use thiserror::Error;

/// Contact columns addressable directly; anything else resolves against the
/// `properties` JSON document.
const CONTACT_COLUMNS: &[&str] = &[
    "email",
    "first_name",
    "last_name",
    "country",
    "language",
    "timezone",
    "created_at",
    "updated_at",
];

/// Compilation failure. These are fatal: a segment with an uncompilable tree
/// cannot be rebuilt.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("invalid field name: {0:?}")]
    InvalidField(String),

    #[error("operator {operator:?} is not valid for {field_type:?} fields")]
    InvalidOperator {
        operator: FilterOperator,
        field_type: FieldType,
    },

    #[error("operator {operator:?} expects {expected} value(s), got {got}")]
    ArityMismatch {
        operator: FilterOperator,
        expected: usize,
        got: usize,
    },

    #[error("empty boolean group")]
    EmptyGroup,
}

/// A compiled predicate: WHERE fragment plus its positional arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub args: Vec<Value>,
}

/// Compile a predicate tree. Pure and deterministic.
pub fn compile(tree: &SegmentTree) -> Result<CompiledQuery, CompileError> {
    let mut args = Vec::new();
    let sql = compile_node(tree, &mut args)?;
    Ok(CompiledQuery { sql, args })
}

fn compile_node(tree: &SegmentTree, args: &mut Vec<Value>) -> Result<String, CompileError> {
    match tree {
        SegmentTree::And { children } => compile_group(children, " AND ", args),
        SegmentTree::Or { children } => compile_group(children, " OR ", args),
        SegmentTree::Not { child } => {
            let inner = compile_node(child, args)?;
            Ok(format!("NOT ({inner})"))
        }
        SegmentTree::Leaf { filter } => compile_leaf(filter, args),
    }
}

fn compile_group(
    children: &[SegmentTree],
    joiner: &str,
    args: &mut Vec<Value>,
) -> Result<String, CompileError> {
    if children.is_empty() {
        return Err(CompileError::EmptyGroup);
    }
    let parts = children
        .iter()
        .map(|child| compile_node(child, args))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!("({})", parts.join(joiner)))
}

fn compile_leaf(filter: &DimensionFilter, args: &mut Vec<Value>) -> Result<String, CompileError> {
    validate_field(&filter.field)?;
    check_operator(filter)?;
    check_arity(filter)?;

    let expr = field_expr(&filter.field, filter.field_type);
    let ci = filter.field_type == FieldType::String && !filter.case_sensitive;

    let sql = match filter.operator {
        FilterOperator::Eq => binary(&expr, "=", filter, args, ci),
        FilterOperator::Ne => binary(&expr, "<>", filter, args, ci),
        FilterOperator::Gt => binary(&expr, ">", filter, args, false),
        FilterOperator::Gte => binary(&expr, ">=", filter, args, false),
        FilterOperator::Lt => binary(&expr, "<", filter, args, false),
        FilterOperator::Lte => binary(&expr, "<=", filter, args, false),
        FilterOperator::Contains => {
            let p = push_arg(args, &filter.values[0], filter.field_type);
            like(&expr, &format!("'%' || {p} || '%'"), filter.case_sensitive)
        }
        FilterOperator::StartsWith => {
            let p = push_arg(args, &filter.values[0], filter.field_type);
            like(&expr, &format!("{p} || '%'"), filter.case_sensitive)
        }
        FilterOperator::EndsWith => {
            let p = push_arg(args, &filter.values[0], filter.field_type);
            like(&expr, &format!("'%' || {p}"), filter.case_sensitive)
        }
        FilterOperator::In => {
            if filter.values.is_empty() {
                // an empty IN list matches nothing
                "FALSE".to_string()
            } else {
                let placeholders: Vec<String> = filter
                    .values
                    .iter()
                    .map(|v| {
                        let p = push_arg(args, v, filter.field_type);
                        if ci { format!("lower({p})") } else { p }
                    })
                    .collect();
                let lhs = if ci { format!("lower({expr})") } else { expr };
                format!("{lhs} IN ({})", placeholders.join(", "))
            }
        }
        FilterOperator::Between => {
            let low = push_arg(args, &filter.values[0], filter.field_type);
            let high = push_arg(args, &filter.values[1], filter.field_type);
            format!("{expr} BETWEEN {low} AND {high}")
        }
        FilterOperator::IsNull => format!("{expr} IS NULL"),
        FilterOperator::IsNotNull => format!("{expr} IS NOT NULL"),
    };
    Ok(sql)
}

fn binary(
    expr: &str,
    op: &str,
    filter: &DimensionFilter,
    args: &mut Vec<Value>,
    ci: bool,
) -> String {
    let p = push_arg(args, &filter.values[0], filter.field_type);
    if ci {
        format!("lower({expr}) {op} lower({p})")
    } else {
        format!("{expr} {op} {p}")
    }
}

fn like(expr: &str, pattern: &str, case_sensitive: bool) -> String {
    let op = if case_sensitive { "LIKE" } else { "ILIKE" };
    format!("{expr} {op} {pattern}")
}

/// Append a bind argument and return its placeholder, cast as the field type
/// requires.
fn push_arg(args: &mut Vec<Value>, value: &Value, field_type: FieldType) -> String {
    args.push(value.clone());
    let n = args.len();
    match field_type {
        FieldType::Date => format!("(${n})::timestamptz"),
        _ => format!("${n}"),
    }
}

fn field_expr(field: &str, field_type: FieldType) -> String {
    if CONTACT_COLUMNS.contains(&field) {
        match field_type {
            FieldType::Numeric => format!("({field})::numeric"),
            FieldType::Bool => format!("({field})::boolean"),
            FieldType::String | FieldType::Date => field.to_string(),
        }
    } else {
        let json = format!("properties ->> '{field}'");
        match field_type {
            FieldType::String => json,
            FieldType::Numeric => format!("({json})::numeric"),
            FieldType::Date => format!("({json})::timestamptz"),
            FieldType::Bool => format!("({json})::boolean"),
        }
    }
}

fn validate_field(field: &str) -> Result<(), CompileError> {
    let mut chars = field.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !valid_start || !field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(CompileError::InvalidField(field.to_string()));
    }
    Ok(())
}

fn check_operator(filter: &DimensionFilter) -> Result<(), CompileError> {
    use FilterOperator::*;
    let valid = match filter.field_type {
        FieldType::String => matches!(
            filter.operator,
            Eq | Ne | Contains | StartsWith | EndsWith | In | IsNull | IsNotNull
        ),
        FieldType::Numeric => matches!(
            filter.operator,
            Eq | Ne | Gt | Gte | Lt | Lte | In | Between | IsNull | IsNotNull
        ),
        FieldType::Date => matches!(
            filter.operator,
            Eq | Ne | Gt | Gte | Lt | Lte | Between | IsNull | IsNotNull
        ),
        FieldType::Bool => matches!(filter.operator, Eq | Ne | IsNull | IsNotNull),
    };
    if valid {
        Ok(())
    } else {
        Err(CompileError::InvalidOperator {
            operator: filter.operator,
            field_type: filter.field_type,
        })
    }
}

fn check_arity(filter: &DimensionFilter) -> Result<(), CompileError> {
    use FilterOperator::*;
    let expected = match filter.operator {
        Eq | Ne | Gt | Gte | Lt | Lte | Contains | StartsWith | EndsWith => Some(1),
        Between => Some(2),
        IsNull | IsNotNull => Some(0),
        In => None,
    };
    if let Some(expected) = expected
        && filter.values.len() != expected
    {
        return Err(CompileError::ArityMismatch {
            operator: filter.operator,
            expected,
            got: filter.values.len(),
        });
    }
    Ok(())
}
