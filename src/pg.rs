use std::collections::HashMap;

use sqlx::{Connection, PgConnection, Row, postgres::PgConnectOptions};

use crate::{
    error::{AppError, classify_connection_error},
    models::pg::{
        ColumnInfo, ListPostgresResponse, PostgresRequest, TablePreviewResponse, TableSample,
        TableSchema,
    },
};

/// Rows fetched when a table is imported to a local file.
pub const IMPORT_ROW_LIMIT: i64 = 1000;

/// Rows fetched for a table preview unless the caller lowers it.
pub const PREVIEW_ROW_LIMIT: i64 = 20;

const SCHEMA_QUERY: &str = r#"
    SELECT schema_name FROM information_schema.schemata
    WHERE schema_name NOT IN ('information_schema', 'pg_catalog', 'pg_toast')
      AND schema_name NOT LIKE 'pg_%'
      AND schema_name NOT LIKE 'temp%'
      AND schema_name NOT LIKE 'tmp%'
    ORDER BY schema_name
"#;

const TABLE_QUERY: &str = r#"
    SELECT table_name FROM information_schema.tables
    WHERE table_schema = $1 AND table_type = 'BASE TABLE'
      AND table_name NOT LIKE 'pg_%'
      AND table_name NOT LIKE 'sql_%'
    ORDER BY table_name
"#;

const VIEW_QUERY: &str = r#"
    SELECT table_name FROM information_schema.views
    WHERE table_schema = $1
      AND table_name NOT LIKE 'pg_%'
      AND table_name NOT LIKE 'sql_%'
    ORDER BY table_name
"#;

const COLUMN_QUERY: &str = r#"
    SELECT column_name, data_type, is_nullable, column_default,
           character_maximum_length::text AS max_length
    FROM information_schema.columns
    WHERE table_schema = $1 AND table_name = $2
    ORDER BY ordinal_position
"#;

/// Opens a connection to the caller-supplied database. Connection failures
/// are classified into stable error categories.
pub async fn connect(request: &PostgresRequest) -> Result<PgConnection, AppError> {
    let options = PgConnectOptions::new()
        .host(&request.host)
        .port(request.port)
        .database(&request.database)
        .username(&request.username)
        .password(&request.password);
    PgConnection::connect_with(&options)
        .await
        .map_err(|err| classify_connection_error(&err))
}

/// User schemas plus their schema-qualified tables and views.
pub async fn list_contents(request: &PostgresRequest) -> Result<ListPostgresResponse, AppError> {
    let mut conn = connect(request).await?;
    let schemas = fetch_schemas(&mut conn).await?;

    let mut files = Vec::new();
    for schema in &schemas {
        for name in fetch_names(&mut conn, TABLE_QUERY, schema).await? {
            files.push(format!("{schema}.{name}"));
        }
        for name in fetch_names(&mut conn, VIEW_QUERY, schema).await? {
            files.push(format!("{schema}.{name}"));
        }
    }

    let total_objects = files.len();
    Ok(ListPostgresResponse {
        schemas,
        files,
        total_objects,
    })
}

/// Column metadata and a small sample of rows for one table, values cast to
/// text server-side.
pub async fn table_preview(request: &PostgresRequest) -> Result<TablePreviewResponse, AppError> {
    let table = match request.table.as_deref() {
        Some(table) if !table.trim().is_empty() => table.trim(),
        _ => return Err(AppError::BadRequest("table name is required".into())),
    };
    let schema = request.schema_or_default();
    let limit = request
        .limit
        .unwrap_or(PREVIEW_ROW_LIMIT)
        .clamp(1, PREVIEW_ROW_LIMIT);

    let mut conn = connect(request).await?;
    let columns = fetch_columns(&mut conn, schema, table).await?;
    if columns.is_empty() {
        return Err(AppError::NotFound(format!("table {schema}.{table}")));
    }

    let column_names: Vec<String> = columns.iter().map(|column| column.name.clone()).collect();
    let rows = fetch_rows(&mut conn, schema, table, &column_names, limit).await?;
    let rows = rows
        .into_iter()
        .map(|row| {
            column_names
                .iter()
                .cloned()
                .zip(row)
                .collect::<HashMap<String, Option<String>>>()
        })
        .collect();

    let qualified = format!("{schema}.{table}");
    Ok(TablePreviewResponse {
        schema: TableSchema {
            table: qualified.clone(),
            columns,
        },
        sample: TableSample {
            table: qualified,
            columns: column_names,
            rows,
            limit,
        },
    })
}

/// Serializes up to `IMPORT_ROW_LIMIT` rows of a table as delimited text:
/// a header row of column names, then one line per row with values quoted
/// when they contain the delimiter, a quote or a newline.
pub async fn export_table_csv(
    conn: &mut PgConnection,
    schema: &str,
    table: &str,
) -> Result<String, AppError> {
    let columns = fetch_columns(conn, schema, table).await?;
    if columns.is_empty() {
        return Err(AppError::NotFound(format!("table {schema}.{table}")));
    }
    let column_names: Vec<String> = columns.iter().map(|column| column.name.clone()).collect();
    let rows = fetch_rows(conn, schema, table, &column_names, IMPORT_ROW_LIMIT).await?;
    Ok(to_csv(&column_names, &rows))
}

/// Splits a `schema.table` item into its parts, defaulting to `public`.
pub fn parse_table_item(item: &str) -> (&str, &str) {
    match item.split_once('.') {
        Some((schema, table)) if !schema.is_empty() => (schema, table),
        _ => ("public", item),
    }
}

async fn fetch_schemas(conn: &mut PgConnection) -> Result<Vec<String>, AppError> {
    let rows = sqlx::query(SCHEMA_QUERY)
        .fetch_all(conn)
        .await
        .map_err(|err| classify_connection_error(&err))?;
    rows.iter()
        .map(|row| {
            row.try_get::<String, _>("schema_name")
                .map_err(|err| AppError::Internal(err.to_string()))
        })
        .collect()
}

async fn fetch_names(
    conn: &mut PgConnection,
    query: &str,
    schema: &str,
) -> Result<Vec<String>, AppError> {
    let rows = sqlx::query(query)
        .bind(schema)
        .fetch_all(conn)
        .await
        .map_err(|err| classify_connection_error(&err))?;
    rows.iter()
        .map(|row| {
            row.try_get::<String, _>("table_name")
                .map_err(|err| AppError::Internal(err.to_string()))
        })
        .collect()
}

async fn fetch_columns(
    conn: &mut PgConnection,
    schema: &str,
    table: &str,
) -> Result<Vec<ColumnInfo>, AppError> {
    let rows = sqlx::query(COLUMN_QUERY)
        .bind(schema)
        .bind(table)
        .fetch_all(conn)
        .await
        .map_err(|err| classify_connection_error(&err))?;

    rows.iter()
        .map(|row| {
            Ok(ColumnInfo {
                name: row
                    .try_get::<String, _>("column_name")
                    .map_err(|err| AppError::Internal(err.to_string()))?,
                data_type: row
                    .try_get::<String, _>("data_type")
                    .map_err(|err| AppError::Internal(err.to_string()))?,
                nullable: row
                    .try_get::<String, _>("is_nullable")
                    .map_err(|err| AppError::Internal(err.to_string()))?,
                default: row
                    .try_get::<Option<String>, _>("column_default")
                    .map_err(|err| AppError::Internal(err.to_string()))?,
                max_length: row
                    .try_get::<Option<String>, _>("max_length")
                    .map_err(|err| AppError::Internal(err.to_string()))?,
            })
        })
        .collect()
}

async fn fetch_rows(
    conn: &mut PgConnection,
    schema: &str,
    table: &str,
    columns: &[String],
    limit: i64,
) -> Result<Vec<Vec<Option<String>>>, AppError> {
    let select_list = columns
        .iter()
        .map(|column| format!("{0}::text AS {0}", quote_ident(column)))
        .collect::<Vec<_>>()
        .join(", ");
    let query = format!(
        "SELECT {select_list} FROM {}.{} LIMIT $1",
        quote_ident(schema),
        quote_ident(table)
    );

    let rows = sqlx::query(&query)
        .bind(limit)
        .fetch_all(conn)
        .await
        .map_err(|err| classify_connection_error(&err))?;

    rows.iter()
        .map(|row| {
            (0..columns.len())
                .map(|index| {
                    row.try_get::<Option<String>, _>(index)
                        .map_err(|err| AppError::Internal(err.to_string()))
                })
                .collect()
        })
        .collect()
}

/// Double-quotes an identifier, doubling any embedded quotes, so schema and
/// table names can only ever be read as identifiers.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn to_csv(columns: &[String], rows: &[Vec<Option<String>>]) -> String {
    let mut out = String::new();
    out.push_str(
        &columns
            .iter()
            .map(|column| csv_field(column))
            .collect::<Vec<_>>()
            .join(","),
    );
    out.push('\n');
    for row in rows {
        let line = row
            .iter()
            .map(|value| csv_field(value.as_deref().unwrap_or("")))
            .collect::<Vec<_>>()
            .join(",");
        out.push_str(&line);
        out.push('\n');
    }
    out
}

fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_values_pass_through_unquoted() {
        assert_eq!(csv_field("hello"), "hello");
        assert_eq!(csv_field(""), "");
    }

    #[test]
    fn special_values_are_quoted_and_inner_quotes_doubled() {
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_field("line1\nline2"), "\"line1\nline2\"");
        assert_eq!(csv_field("cr\rhere"), "\"cr\rhere\"");
    }

    #[test]
    fn csv_rows_get_header_and_null_becomes_empty() {
        let columns = vec!["id".to_string(), "note".to_string()];
        let rows = vec![
            vec![Some("1".to_string()), Some("plain".to_string())],
            vec![Some("2".to_string()), None],
            vec![Some("3".to_string()), Some("a,b".to_string())],
        ];
        assert_eq!(
            to_csv(&columns, &rows),
            "id,note\n1,plain\n2,\n3,\"a,b\"\n"
        );
    }

    #[test]
    fn identifiers_are_double_quoted() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn table_items_split_on_first_dot_with_default_schema() {
        assert_eq!(parse_table_item("sales.orders"), ("sales", "orders"));
        assert_eq!(parse_table_item("orders"), ("public", "orders"));
        assert_eq!(parse_table_item(".orders"), ("public", ".orders"));
    }
}
