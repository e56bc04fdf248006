use std::collections::HashMap;

use chrono::NaiveDate;
use sqlparser::ast::{self, Expr, ObjectNamePart, SetExpr, Statement, TableFactor, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::engine::{Direction, Filters, Granularity, GridQuery, Locale, ResourceFilter};
use crate::model::*;

/// Filters shared by the `grid`, `availability` and `conflicts` tables.
#[derive(Debug, Clone, PartialEq)]
pub struct GridParams {
    pub anchor_date: NaiveDate,
    pub granularity: Granularity,
    pub filters: Filters,
    pub category: Option<ResourceCategory>,
    pub slot_duration: Ms,
    /// `None` means the server's default locale.
    pub locale: Option<Locale>,
}

impl GridParams {
    pub fn into_query(self, default_locale: Locale) -> GridQuery {
        GridQuery {
            anchor_date: self.anchor_date,
            granularity: self.granularity,
            locale: self.locale.unwrap_or(default_locale),
            filters: self.filters,
            category: self.category,
            slot_duration: self.slot_duration,
        }
    }
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    SelectGrid {
        params: GridParams,
    },
    SelectCalendarWindow {
        anchor_date: NaiveDate,
        granularity: Granularity,
        direction: Option<Direction>,
        locale: Option<Locale>,
    },
    SelectAvailability {
        params: GridParams,
        min_duration: Option<Ms>,
    },
    SelectConflicts {
        params: GridParams,
    },
    SelectResources {
        category: Option<ResourceCategory>,
    },
    SelectBookings {
        resource_id: Ulid,
        start: Ms,
        end: Ms,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Table a SELECT reads from, without interpreting its filters. Placeholders
/// are fine, which is what statement description needs.
pub fn target_table(sql: &str) -> Option<String> {
    let stmts = Parser::parse_sql(&PostgreSqlDialect {}, sql).ok()?;
    let Statement::Query(query) = stmts.first()? else {
        return None;
    };
    let SetExpr::Select(select) = query.body.as_ref() else {
        return None;
    };
    table_factor_name(&select.from.first()?.relation).ok()
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut preds = Predicates::default();
    if let Some(selection) = &select.selection {
        preds.collect(selection);
    }

    match table.as_str() {
        "grid" => Ok(Command::SelectGrid {
            params: grid_params(&preds)?,
        }),
        "availability" => Ok(Command::SelectAvailability {
            params: grid_params(&preds)?,
            min_duration: preds.eq("min_duration").map(parse_i64_expr).transpose()?,
        }),
        "conflicts" => Ok(Command::SelectConflicts {
            params: grid_params(&preds)?,
        }),
        "calendar_window" => Ok(Command::SelectCalendarWindow {
            anchor_date: parse_date_expr(preds.require("anchor_date")?)?,
            granularity: parse_granularity_expr(preds.require("granularity")?)?,
            direction: preds
                .eq("direction")
                .map(|e| {
                    let s = parse_string_expr(e)?;
                    Direction::parse(&s).ok_or_else(|| SqlError::Parse(format!("bad direction: {s}")))
                })
                .transpose()?,
            locale: preds.eq("locale").map(parse_locale_expr).transpose()?,
        }),
        "resources" => Ok(Command::SelectResources {
            category: preds.eq("category").map(parse_category_expr).transpose()?,
        }),
        "bookings" => Ok(Command::SelectBookings {
            resource_id: parse_ulid_expr(preds.require("resource_id")?)?,
            start: parse_i64_expr(
                preds
                    .gte
                    .get("start")
                    .copied()
                    .ok_or(SqlError::MissingFilter("start"))?,
            )?,
            end: parse_i64_expr(
                preds
                    .lte
                    .get("end")
                    .copied()
                    .ok_or(SqlError::MissingFilter("end"))?,
            )?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn grid_params(preds: &Predicates<'_>) -> Result<GridParams, SqlError> {
    let slot_minutes = preds
        .eq("slot_minutes")
        .map(parse_i64_expr)
        .transpose()?
        .unwrap_or(60);
    let slot_duration = slot_minutes
        .checked_mul(MINUTE_MS)
        .ok_or_else(|| SqlError::Parse(format!("slot_minutes out of range: {slot_minutes}")))?;

    let filters = Filters {
        resource: match preds.eq("resource_id") {
            Some(e) => ResourceFilter::parse(&parse_string_expr(e)?),
            None => ResourceFilter::All,
        },
        // Must be a well-formed ULID. Whether the project exists is not
        // checked: there is no project registry, and an unknown id yields an
        // all-free grid rather than NotFound.
        project_id: preds.eq("project_id").map(parse_ulid_expr).transpose()?,
        kind: preds
            .eq("kind")
            .map(|e| {
                let s = parse_string_expr(e)?;
                BookingKind::parse(&s).ok_or_else(|| SqlError::Parse(format!("bad kind: {s}")))
            })
            .transpose()?,
    };

    Ok(GridParams {
        anchor_date: parse_date_expr(preds.require("anchor_date")?)?,
        granularity: parse_granularity_expr(preds.require("granularity")?)?,
        filters,
        category: preds.eq("category").map(parse_category_expr).transpose()?,
        slot_duration,
        locale: preds.eq("locale").map(parse_locale_expr).transpose()?,
    })
}

/// Conjunctive WHERE clause flattened by column. Other operators and
/// unknown columns are ignored.
#[derive(Default)]
struct Predicates<'a> {
    eq: HashMap<String, &'a Expr>,
    gte: HashMap<String, &'a Expr>,
    lte: HashMap<String, &'a Expr>,
}

impl<'a> Predicates<'a> {
    fn collect(&mut self, expr: &'a Expr) {
        match expr {
            Expr::Nested(inner) => self.collect(inner),
            Expr::BinaryOp { left, op, right } => {
                let slot = match op {
                    ast::BinaryOperator::And => {
                        self.collect(left);
                        self.collect(right);
                        return;
                    }
                    ast::BinaryOperator::Eq => &mut self.eq,
                    ast::BinaryOperator::GtEq => &mut self.gte,
                    ast::BinaryOperator::LtEq => &mut self.lte,
                    _ => return,
                };
                if let Some(col) = expr_column_name(left) {
                    slot.insert(col, right.as_ref());
                }
            }
            _ => {}
        }
    }

    fn eq(&self, col: &str) -> Option<&'a Expr> {
        self.eq.get(col).copied()
    }

    fn require(&self, col: &'static str) -> Result<&'a Expr, SqlError> {
        self.eq(col).ok_or(SqlError::MissingFilter(col))
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_string_expr(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string_expr(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_date_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string_expr(expr)?;
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))
}

fn parse_granularity_expr(expr: &Expr) -> Result<Granularity, SqlError> {
    let s = parse_string_expr(expr)?;
    Granularity::parse(&s).ok_or_else(|| SqlError::Parse(format!("bad granularity: {s}")))
}

fn parse_locale_expr(expr: &Expr) -> Result<Locale, SqlError> {
    let s = parse_string_expr(expr)?;
    Locale::parse(&s).ok_or_else(|| SqlError::Parse(format!("bad locale: {s}")))
}

fn parse_category_expr(expr: &Expr) -> Result<ResourceCategory, SqlError> {
    let s = parse_string_expr(expr)?;
    ResourceCategory::parse(&s).ok_or_else(|| SqlError::Parse(format!("bad category: {s}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const POOL: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn parse_select_grid_defaults() {
        let sql = "SELECT * FROM grid WHERE anchor_date = '2025-03-10' AND granularity = 'week'";
        let cmd = parse_sql(sql).unwrap();
        match cmd {
            Command::SelectGrid { params } => {
                assert_eq!(params.anchor_date, date(2025, 3, 10));
                assert_eq!(params.granularity, Granularity::Week);
                assert_eq!(params.filters, Filters::default());
                assert_eq!(params.category, None);
                assert_eq!(params.slot_duration, HOUR_MS);
                assert_eq!(params.locale, None);
            }
            _ => panic!("expected SelectGrid, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_grid_with_filters() {
        let sql = format!(
            "SELECT * FROM grid WHERE anchor_date = '2025-03-10' AND granularity = 'dia' \
             AND resource_id = '{POOL}' AND kind = 'internal' AND category = 'pool' \
             AND slot_minutes = 30 AND locale = 'en-GB'"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::SelectGrid { params } => {
                assert_eq!(params.granularity, Granularity::Day);
                assert_eq!(
                    params.filters.resource,
                    ResourceFilter::Id(Ulid::from_string(POOL).unwrap())
                );
                assert_eq!(params.filters.kind, Some(BookingKind::Internal));
                assert_eq!(params.category, Some(ResourceCategory::Pool));
                assert_eq!(params.slot_duration, 30 * MINUTE_MS);
                assert_eq!(params.locale, Some(Locale::EnGb));
            }
            _ => panic!("expected SelectGrid, got {cmd:?}"),
        }
    }

    #[test]
    fn resource_all_is_no_filter() {
        let sql = "SELECT * FROM grid WHERE anchor_date = '2025-03-10' AND granularity = 'day' AND resource_id = 'all'";
        let Command::SelectGrid { params } = parse_sql(sql).unwrap() else {
            panic!("expected SelectGrid");
        };
        assert_eq!(params.filters.resource, ResourceFilter::All);
    }

    #[test]
    fn garbage_resource_id_matches_nothing() {
        let sql = "SELECT * FROM grid WHERE anchor_date = '2025-03-10' AND granularity = 'day' AND resource_id = 'piscina'";
        let Command::SelectGrid { params } = parse_sql(sql).unwrap() else {
            panic!("expected SelectGrid");
        };
        assert_eq!(params.filters.resource, ResourceFilter::Unknown);
    }

    #[test]
    fn grid_params_into_query_uses_default_locale() {
        let sql = "SELECT * FROM grid WHERE anchor_date = '2025-03-10' AND granularity = 'month'";
        let Command::SelectGrid { params } = parse_sql(sql).unwrap() else {
            panic!("expected SelectGrid");
        };
        let query = params.into_query(Locale::EnUs);
        assert_eq!(query.locale, Locale::EnUs);
        assert_eq!(query.granularity, Granularity::Month);
    }

    #[test]
    fn parse_grid_missing_anchor_errors() {
        let err = parse_sql("SELECT * FROM grid WHERE granularity = 'day'").unwrap_err();
        assert!(matches!(err, SqlError::MissingFilter("anchor_date")));
    }

    #[test]
    fn parse_grid_bad_granularity_errors() {
        let sql = "SELECT * FROM grid WHERE anchor_date = '2025-03-10' AND granularity = 'year'";
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_grid_bad_date_errors() {
        let sql = "SELECT * FROM grid WHERE anchor_date = '2025-02-30' AND granularity = 'day'";
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_select_availability_with_min_duration() {
        let sql = "SELECT * FROM availability WHERE anchor_date = '2025-03-10' AND granularity = 'day' AND min_duration = 7200000";
        let cmd = parse_sql(sql).unwrap();
        match cmd {
            Command::SelectAvailability { params, min_duration } => {
                assert_eq!(params.granularity, Granularity::Day);
                assert_eq!(min_duration, Some(7_200_000));
            }
            _ => panic!("expected SelectAvailability, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_conflicts() {
        let sql = "SELECT resource_id, start FROM conflicts WHERE (anchor_date = '2025-03-10' AND granularity = 'week')";
        assert!(matches!(parse_sql(sql).unwrap(), Command::SelectConflicts { .. }));
    }

    #[test]
    fn parse_select_calendar_window() {
        let sql = "SELECT * FROM calendar_window WHERE anchor_date = '2025-01-31' AND granularity = 'mes' AND direction = 'next'";
        let cmd = parse_sql(sql).unwrap();
        match cmd {
            Command::SelectCalendarWindow {
                anchor_date,
                granularity,
                direction,
                locale,
            } => {
                assert_eq!(anchor_date, date(2025, 1, 31));
                assert_eq!(granularity, Granularity::Month);
                assert_eq!(direction, Some(Direction::Next));
                assert_eq!(locale, None);
            }
            _ => panic!("expected SelectCalendarWindow, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_resources() {
        let cmd = parse_sql("SELECT * FROM resources").unwrap();
        assert_eq!(cmd, Command::SelectResources { category: None });

        let cmd = parse_sql("SELECT * FROM resources WHERE category = 'court'").unwrap();
        assert_eq!(
            cmd,
            Command::SelectResources {
                category: Some(ResourceCategory::Court)
            }
        );
    }

    #[test]
    fn parse_select_bookings() {
        let sql = format!(
            "SELECT * FROM bookings WHERE resource_id = '{POOL}' AND start >= 1000 AND \"end\" <= 2000"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::SelectBookings {
                resource_id,
                start,
                end,
            } => {
                assert_eq!(resource_id.to_string(), POOL);
                assert_eq!(start, 1000);
                assert_eq!(end, 2000);
            }
            _ => panic!("expected SelectBookings, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_bookings_missing_end_errors() {
        let sql = format!("SELECT * FROM bookings WHERE resource_id = '{POOL}' AND start >= 1000");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingFilter("end"))));
    }

    #[test]
    fn parse_unknown_table_errors() {
        assert!(matches!(
            parse_sql("SELECT * FROM holds"),
            Err(SqlError::UnknownTable(t)) if t == "holds"
        ));
    }

    #[test]
    fn writes_are_unsupported() {
        let sql = format!("DELETE FROM bookings WHERE id = '{POOL}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn target_table_with_placeholders() {
        let sql = "SELECT * FROM grid WHERE anchor_date = $1 AND granularity = $2";
        assert_eq!(target_table(sql).as_deref(), Some("grid"));
        assert_eq!(target_table("SELECT 1"), None);
        assert_eq!(target_table("not sql"), None);
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
