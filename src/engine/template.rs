//! Filter template resolution.
//!
//! A filter template is SQL text with `#...#` placeholders. Parsing is a
//! single pass producing [`Segment`]s; substitution walks the segments once.
//! Text between `#` delimiters that is not a known token is kept verbatim.

use chrono::{NaiveDate, NaiveDateTime};

use super::{EngineError, EngineResult, keys::in_list_predicate};
use crate::{
    db::SqlValue,
    dialect::DatabaseFamily,
    policy::{ParamKind, PolicyDetail, PolicyParameter},
};

pub const AGING_DATE_TOKEN: &str = "#AGING_DATE#";
pub const CURRENT_DATETIME_TOKEN: &str = "#CURRENT_DATETIME#";
pub const IDENTITY_SELECTOR_TOKEN: &str = "#EMP_ID_SELECTOR#";

/// Predicate substituted for an identity selector outside identity batches.
pub const ALWAYS_TRUE: &str = "1=1";
/// Predicate substituted for an empty identity slice.
pub const ALWAYS_FALSE: &str = "1=0";

/// One piece of a parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'a> {
    Literal(&'a str),
    /// `#WHERE.<table>[.<priority>]#`
    CrossRef {
        table: &'a str,
        priority: Option<i32>,
    },
    /// `#PARAM.<name>#`
    Param(&'a str),
    AgingDate,
    CurrentDateTime,
    IdentitySelector,
}

/// Split a template into literal and placeholder segments.
pub fn parse(template: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut literal_start = 0;
    let mut cursor = 0;

    while let Some(open_rel) = template[cursor..].find('#') {
        let open = cursor + open_rel;
        let Some(close_rel) = template[open + 1..].find('#') else {
            break;
        };
        let close = open + 1 + close_rel;

        match token(&template[open + 1..close]) {
            Some(segment) => {
                if literal_start < open {
                    segments.push(Segment::Literal(&template[literal_start..open]));
                }
                segments.push(segment);
                cursor = close + 1;
                literal_start = cursor;
            }
            // The closing `#` may open the next token
            None => cursor = close,
        }
    }

    if literal_start < template.len() {
        segments.push(Segment::Literal(&template[literal_start..]));
    }
    segments
}

fn token(inner: &str) -> Option<Segment<'_>> {
    if inner.is_empty() || inner.chars().any(char::is_whitespace) {
        return None;
    }
    match inner {
        "AGING_DATE" => return Some(Segment::AgingDate),
        "CURRENT_DATETIME" => return Some(Segment::CurrentDateTime),
        "EMP_ID_SELECTOR" => return Some(Segment::IdentitySelector),
        _ => {}
    }
    if let Some(name) = inner.strip_prefix("PARAM.") {
        return (!name.is_empty()).then_some(Segment::Param(name));
    }
    let reference = inner.strip_prefix("WHERE.")?;
    if reference.is_empty() {
        return None;
    }
    // A trailing numeric part is the priority; anything else is part of a
    // schema-qualified table name
    match reference.rsplit_once('.') {
        Some((table, priority)) if !table.is_empty() => match priority.parse::<i32>() {
            Ok(priority) => Some(Segment::CrossRef {
                table,
                priority: Some(priority),
            }),
            Err(_) => Some(Segment::CrossRef {
                table: reference,
                priority: None,
            }),
        },
        _ => Some(Segment::CrossRef {
            table: reference,
            priority: None,
        }),
    }
}

/// A policy detail with its filter resolved for one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDetail {
    pub detail: PolicyDetail,
    pub filter: String,
}

impl ResolvedDetail {
    pub fn table(&self) -> &str {
        &self.detail.table
    }

    pub fn has_identity_selector(&self) -> bool {
        parse(&self.filter)
            .iter()
            .any(|s| *s == Segment::IdentitySelector)
    }

    /// Copy of this detail with identity selectors replaced by `predicate`.
    pub fn with_identity_predicate(&self, predicate: &str) -> ResolvedDetail {
        ResolvedDetail {
            detail: self.detail.clone(),
            filter: replace_identity_selector(&self.filter, predicate),
        }
    }
}

/// Replace identity selectors and leave every other segment as written.
pub fn replace_identity_selector(filter: &str, predicate: &str) -> String {
    let mut out = String::with_capacity(filter.len());
    for segment in parse(filter) {
        match segment {
            Segment::IdentitySelector => out.push_str(predicate),
            other => out.push_str(&render_verbatim(&other)),
        }
    }
    out
}

fn render_verbatim(segment: &Segment<'_>) -> String {
    match segment {
        Segment::Literal(text) => (*text).to_string(),
        Segment::CrossRef {
            table,
            priority: Some(p),
        } => format!("#WHERE.{table}.{p}#"),
        Segment::CrossRef {
            table,
            priority: None,
        } => format!("#WHERE.{table}#"),
        Segment::Param(name) => format!("#PARAM.{name}#"),
        Segment::AgingDate => AGING_DATE_TOKEN.to_string(),
        Segment::CurrentDateTime => CURRENT_DATETIME_TOKEN.to_string(),
        Segment::IdentitySelector => IDENTITY_SELECTOR_TOKEN.to_string(),
    }
}

/// `<column> IN (...)` for an identity slice, or `1=0` when it is empty.
pub fn identity_predicate(
    column: &str,
    identities: &[SqlValue],
    family: DatabaseFamily,
    in_clause_limit: usize,
) -> String {
    in_list_predicate(column, identities, family, in_clause_limit)
        .unwrap_or_else(|| ALWAYS_FALSE.to_string())
}

/// Resolves filter templates against one policy's details and parameters.
#[derive(Debug, Clone)]
pub struct TemplateResolver {
    details: Vec<PolicyDetail>,
    params: Vec<PolicyParameter>,
    family: DatabaseFamily,
    run_timestamp: NaiveDateTime,
}

impl TemplateResolver {
    /// `details` must be in priority order.
    pub fn new(
        details: Vec<PolicyDetail>,
        params: Vec<PolicyParameter>,
        family: DatabaseFamily,
        run_timestamp: NaiveDateTime,
    ) -> Self {
        Self {
            details,
            params,
            family,
            run_timestamp,
        }
    }

    pub fn details(&self) -> &[PolicyDetail] {
        &self.details
    }

    pub fn family(&self) -> DatabaseFamily {
        self.family
    }

    /// Resolve every detail in order. Earlier results are visible to
    /// cross-references of later details.
    pub fn resolve_all(&self, aging: NaiveDateTime) -> EngineResult<Vec<ResolvedDetail>> {
        let mut resolved: Vec<ResolvedDetail> = Vec::with_capacity(self.details.len());
        for detail in &self.details {
            let filter = self.resolve(&detail.filter, aging, &resolved)?;
            resolved.push(ResolvedDetail {
                detail: detail.clone(),
                filter,
            });
        }
        Ok(resolved)
    }

    /// Resolve one template. Identity selectors are left in place.
    pub fn resolve(
        &self,
        raw: &str,
        aging: NaiveDateTime,
        resolved: &[ResolvedDetail],
    ) -> EngineResult<String> {
        let mut stack = Vec::new();
        self.resolve_inner(raw, aging, resolved, &mut stack)
    }

    fn resolve_inner(
        &self,
        raw: &str,
        aging: NaiveDateTime,
        resolved: &[ResolvedDetail],
        stack: &mut Vec<(String, i32)>,
    ) -> EngineResult<String> {
        let mut out = String::with_capacity(raw.len());
        for segment in parse(raw) {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::CrossRef { table, priority } => {
                    let target = self.lookup(table, priority, resolved).ok_or_else(|| {
                        EngineError::configuration(format!(
                            "cross-reference {} does not match any detail",
                            render_verbatim(&segment)
                        ))
                    })?;
                    let key = (target.table.to_ascii_lowercase(), target.priority);
                    if stack.contains(&key) {
                        return Err(EngineError::configuration(format!(
                            "cross-reference cycle through table {} (priority {})",
                            target.table, target.priority
                        )));
                    }
                    stack.push(key);
                    let text = self.resolve_inner(&target.filter, aging, resolved, stack)?;
                    stack.pop();
                    out.push_str(&text);
                }
                Segment::Param(name) => out.push_str(&self.param(name)?),
                Segment::AgingDate => out.push_str(&self.family.timestamp_literal(aging)),
                Segment::CurrentDateTime => {
                    out.push_str(&self.family.timestamp_literal(self.run_timestamp))
                }
                Segment::IdentitySelector => out.push_str(IDENTITY_SELECTOR_TOKEN),
            }
        }
        Ok(out)
    }

    /// Already-resolved details are searched first, then the policy's own.
    fn lookup<'a>(
        &'a self,
        table: &str,
        priority: Option<i32>,
        resolved: &'a [ResolvedDetail],
    ) -> Option<&'a PolicyDetail> {
        let matches = |d: &&PolicyDetail| {
            d.table.eq_ignore_ascii_case(table) && priority.is_none_or(|p| d.priority == p)
        };
        resolved
            .iter()
            .map(|r| &r.detail)
            .filter(matches)
            .min_by_key(|d| d.priority)
            .or_else(|| self.details.iter().filter(matches).min_by_key(|d| d.priority))
    }

    fn param(&self, name: &str) -> EngineResult<String> {
        let param = self
            .params
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| {
                EngineError::configuration(format!("parameter '{name}' is not declared"))
            })?;
        let value = param.value.trim();

        match param.kind {
            ParamKind::Text => Ok(self.family.text_literal(&param.value)),
            ParamKind::Expression => Ok(param.value.clone()),
            ParamKind::Number => {
                if value.parse::<f64>().is_ok_and(f64::is_finite) {
                    Ok(value.to_string())
                } else {
                    Err(EngineError::configuration(format!(
                        "parameter '{name}' is declared as a number but has value '{value}'"
                    )))
                }
            }
            ParamKind::Date => {
                let date = parse_date(value).ok_or_else(|| {
                    EngineError::configuration(format!(
                        "parameter '{name}' is declared as a date but has value '{value}'"
                    ))
                })?;
                Ok(self.family.timestamp_literal(date))
            }
        }
    }
}

/// Accepts `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS` and `MM/DD/YYYY`.
pub fn parse_date(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .or_else(|_| NaiveDate::parse_from_str(value, "%m/%d/%Y"))
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}
