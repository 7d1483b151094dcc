//! Template helpers.
//!
//! All helpers are pure functions of their arguments. Registered names:
//! `formatDate`, `formatCurrency`, `eq`, `or`, `and`, and the block helper `ifNotEmpty`.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use handlebars::{
    handlebars_helper, Context, Handlebars, Helper, HelperResult, Output, RenderContext,
    RenderError, RenderErrorReason, Renderable,
};
use serde_json::Value;

pub const NOT_AVAILABLE: &str = "N/A";
pub const CURRENCY_SYMBOL: &str = "₹";

const LONG_DATE_FORMAT: &str = "%-d %B %Y";

/// Register every helper on the given registry.
pub fn register_all(handlebars: &mut Handlebars<'_>) {
    handlebars.register_helper("formatDate", Box::new(format_date_helper));
    handlebars.register_helper("formatCurrency", Box::new(format_currency_helper));
    handlebars.register_helper("eq", Box::new(eq));
    handlebars.register_helper("or", Box::new(or));
    handlebars.register_helper("and", Box::new(and));
    handlebars.register_helper("ifNotEmpty", Box::new(if_not_empty_helper));
}

// ============================================================================
// Pure formatting functions
// ============================================================================

/// Long date form ("15 January 2025"); `N/A` for null or empty input.
pub fn format_long_date(value: &Value) -> Result<String, String> {
    let date = match value {
        Value::Null => return Ok(NOT_AVAILABLE.to_string()),
        Value::String(s) if s.trim().is_empty() => return Ok(NOT_AVAILABLE.to_string()),
        Value::String(s) => parse_date(s.trim())
            .ok_or_else(|| format!("'{}' is not a recognised date", s))?,
        Value::Number(n) => n
            .as_i64()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .map(|dt| dt.date_naive())
            .ok_or_else(|| format!("{} is not a valid epoch-millisecond timestamp", n))?,
        other => return Err(format!("cannot format {} as a date", other)),
    };

    Ok(date.format(LONG_DATE_FORMAT).to_string())
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt.date());
        }
    }
    for format in ["%Y-%m-%d", "%d-%m-%Y", "%d/%m/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Some(date);
        }
    }
    None
}

/// Currency with symbol, Indian digit grouping and two decimals; zero for null input.
pub fn format_currency(value: &Value) -> Result<String, String> {
    let amount = match value {
        Value::Null => 0.0,
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| format!("{} is not a representable amount", n))?,
        Value::String(s) => {
            let cleaned: String = s.trim().chars().filter(|c| *c != ',').collect();
            if cleaned.is_empty() {
                0.0
            } else {
                cleaned
                    .parse::<f64>()
                    .map_err(|_| format!("'{}' is not a valid amount", s))?
            }
        }
        other => return Err(format!("cannot format {} as currency", other)),
    };

    if !amount.is_finite() {
        return Err(format!("{} is not a valid amount", amount));
    }

    let fixed = format!("{:.2}", amount.abs());
    let (whole, fraction) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));
    let sign = if amount < 0.0 && fixed != "0.00" { "-" } else { "" };

    Ok(format!(
        "{}{}{}.{}",
        sign,
        CURRENCY_SYMBOL,
        group_indian(whole),
        fraction
    ))
}

/// 1234567 -> 12,34,567
fn group_indian(digits: &str) -> String {
    if digits.len() <= 3 {
        return digits.to_string();
    }

    let (head, last_three) = digits.split_at(digits.len() - 3);
    let mut groups: Vec<&str> = Vec::new();
    let mut end = head.len();
    while end > 0 {
        let start = end.saturating_sub(2);
        groups.push(&head[start..end]);
        end = start;
    }
    groups.reverse();

    format!("{},{}", groups.join(","), last_three)
}

/// JavaScript truthiness.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Only null/missing and the empty string count as empty; `0` and `false` do not.
pub fn is_empty_value(value: &Value) -> bool {
    matches!(value, Value::Null) || matches!(value, Value::String(s) if s.is_empty())
}

// ============================================================================
// Handlebars bindings
// ============================================================================

handlebars_helper!(eq: |a: Json, b: Json| a == b);
handlebars_helper!(or: |*args| args.iter().any(|v| is_truthy(v)));
handlebars_helper!(and: |*args| !args.is_empty() && args.iter().all(|v| is_truthy(v)));

fn first_param<'a>(h: &'a Helper) -> &'a Value {
    h.param(0).map(|p| p.value()).unwrap_or(&Value::Null)
}

fn format_date_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let formatted = format_long_date(first_param(h))
        .map_err(|e| RenderError::from(RenderErrorReason::Other(format!("formatDate: {}", e))))?;
    out.write(&formatted)?;
    Ok(())
}

fn format_currency_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let formatted = format_currency(first_param(h)).map_err(|e| {
        RenderError::from(RenderErrorReason::Other(format!("formatCurrency: {}", e)))
    })?;
    out.write(&formatted)?;
    Ok(())
}

fn if_not_empty_helper<'reg, 'rc>(
    h: &Helper<'rc>,
    r: &'reg Handlebars<'reg>,
    ctx: &'rc Context,
    rc: &mut RenderContext<'reg, 'rc>,
    out: &mut dyn Output,
) -> HelperResult {
    let template = if is_empty_value(first_param(h)) {
        h.inverse()
    } else {
        h.template()
    };

    match template {
        Some(t) => t.render(r, ctx, rc, out),
        None => Ok(()),
    }
}
