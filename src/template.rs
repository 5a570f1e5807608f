use crate::error::LedgerError;
use crate::event::Attrs;
use chrono::NaiveDate;
use pest::iterators::Pair;
use pest::Parser;
use std::cmp::Ordering;
use std::fmt;

#[derive(Parser)]
#[grammar = "template.pest"]
pub struct TemplateParser;

/// One segment of a parsed template.
#[derive(Clone, Debug, PartialEq)]
enum Part {
    Literal(String),
    Placeholder { field: String, filters: Vec<String> },
}

/// A `{field|filter|filter}` template, compiled once at declaration time
/// and rendered against row attribute maps.
#[derive(Clone, Debug, PartialEq)]
pub struct Template {
    raw: String,
    parts: Vec<Part>,
}

/// Non-fatal conditions observed while rendering. The caller decides how
/// to surface them (usually as `message` events).
#[derive(Clone, Debug, PartialEq)]
pub enum RenderIssue {
    MissingField(String),
    UnknownFilter(String),
}

impl fmt::Display for RenderIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderIssue::MissingField(name) => write!(f, "undefined field `{}'", name),
            RenderIssue::UnknownFilter(name) => write!(f, "unknown filter `{}'", name),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Rendered {
    pub text: String,
    pub issues: Vec<RenderIssue>,
}

impl Template {
    pub fn parse(input: &str) -> Result<Template, LedgerError> {
        let invalid = || LedgerError::InvalidTemplate(input.to_string());
        let mut pairs =
            TemplateParser::parse(Rule::template, input).map_err(|_| invalid())?;
        let template = pairs.next().ok_or_else(invalid)?;

        let mut parts = Vec::new();
        for piece in template.into_inner() {
            match piece.as_rule() {
                Rule::literal => parts.push(Part::Literal(piece.as_str().to_string())),
                Rule::placeholder => {
                    let mut inner = piece.into_inner();
                    let field = inner.next().ok_or_else(invalid)?.as_str().to_string();
                    let filters = inner.map(|p| p.as_str().to_string()).collect();
                    parts.push(Part::Placeholder { field, filters });
                }
                Rule::EOI => {}
                _ => return Err(invalid()),
            }
        }

        Ok(Template {
            raw: input.to_string(),
            parts,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// True for the empty template, which accounting interprets as
    /// "balance to zero" in amount position.
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Total over any field map. Undefined fields render empty; unknown
    /// filters pass the value through. Both are reported as issues.
    pub fn render(&self, fields: &Attrs) -> Rendered {
        let mut text = String::new();
        let mut issues = Vec::new();

        for part in &self.parts {
            match part {
                Part::Literal(s) => text.push_str(s),
                Part::Placeholder { field, filters } => {
                    let mut value = match fields.get(field) {
                        Some(v) => v.clone(),
                        None => {
                            issues.push(RenderIssue::MissingField(field.clone()));
                            String::new()
                        }
                    };
                    for filter in filters {
                        value = match filter.as_str() {
                            "lower" => value.to_lowercase(),
                            "upper" => value.to_uppercase(),
                            "number" => match parse_number(&value) {
                                Some(n) => canonical_number(n),
                                None => value,
                            },
                            "date" => match parse_date(&value) {
                                Some(d) => format_date(d),
                                None => value,
                            },
                            "format" => match parse_number(&value) {
                                Some(n) => format_value(n),
                                None => value,
                            },
                            _ => {
                                issues.push(RenderIssue::UnknownFilter(filter.clone()));
                                value
                            }
                        };
                    }
                    text.push_str(&value);
                }
            }
        }

        Rendered { text, issues }
    }
}

/// Replacement-rule condition: a regular expression or a relational
/// comparison against a literal. `TODAY` resolves at evaluation time.
#[derive(Debug)]
pub enum MatchRule {
    Regex(regex::Regex),
    Cmp { op: CmpOp, operand: Operand },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    Today,
    Date(NaiveDate),
    Number(f64),
    Text(String),
}

impl MatchRule {
    pub fn parse(input: &str) -> Result<MatchRule, LedgerError> {
        let invalid = || LedgerError::InvalidMatchExpr(input.to_string());
        let mut pairs =
            TemplateParser::parse(Rule::match_expr, input).map_err(|_| invalid())?;
        let expr = pairs.next().ok_or_else(invalid)?;
        let inner = expr.into_inner().next().ok_or_else(invalid)?;

        match inner.as_rule() {
            Rule::regex_match => {
                let body = inner_str(inner).ok_or_else(invalid)?;
                let re = regex::Regex::new(body).map_err(|_| invalid())?;
                Ok(MatchRule::Regex(re))
            }
            Rule::comparison => {
                let mut parts = inner.into_inner();
                let op = match parts.next().ok_or_else(invalid)?.as_str() {
                    "<" => CmpOp::Lt,
                    "<=" => CmpOp::Le,
                    ">" => CmpOp::Gt,
                    ">=" => CmpOp::Ge,
                    "=" => CmpOp::Eq,
                    "!=" => CmpOp::Ne,
                    _ => return Err(invalid()),
                };
                let literal = parts.next().ok_or_else(invalid)?.as_str().trim();
                Ok(MatchRule::Cmp {
                    op,
                    operand: Operand::from_literal(literal),
                })
            }
            _ => Err(invalid()),
        }
    }

    /// Whether `value` satisfies the rule. Comparisons coerce the field
    /// value to the operand's kind; an uncoercible value never matches.
    pub fn matches(&self, value: &str, today: NaiveDate) -> bool {
        match self {
            MatchRule::Regex(re) => re.is_match(value),
            MatchRule::Cmp { op, operand } => {
                let ordering = match operand {
                    Operand::Today => parse_date(value).map(|d| d.cmp(&today)),
                    Operand::Date(d) => parse_date(value).map(|v| v.cmp(d)),
                    Operand::Number(n) => {
                        parse_number(value).and_then(|v| v.partial_cmp(n))
                    }
                    Operand::Text(t) => Some(value.cmp(&t.as_str())),
                };
                match ordering {
                    Some(ordering) => op.holds(ordering),
                    None => false,
                }
            }
        }
    }
}

impl CmpOp {
    fn holds(self, ordering: Ordering) -> bool {
        match self {
            CmpOp::Lt => ordering == Ordering::Less,
            CmpOp::Le => ordering != Ordering::Greater,
            CmpOp::Gt => ordering == Ordering::Greater,
            CmpOp::Ge => ordering != Ordering::Less,
            CmpOp::Eq => ordering == Ordering::Equal,
            CmpOp::Ne => ordering != Ordering::Equal,
        }
    }
}

impl Operand {
    fn from_literal(literal: &str) -> Operand {
        if literal == "TODAY" {
            return Operand::Today;
        }
        if let Some(date) = parse_date(literal) {
            return Operand::Date(date);
        }
        if let Some(number) = parse_number(literal) {
            return Operand::Number(number);
        }
        Operand::Text(literal.to_string())
    }
}

fn inner_str(token: Pair<Rule>) -> Option<&str> {
    token.into_inner().next().map(|p| p.as_str())
}

/// Numeric coercion: decimal comma normalized to a point.
pub fn parse_number(value: &str) -> Option<f64> {
    let normalized = value.trim().replace(',', ".");
    normalized.parse::<f64>().ok()
}

fn canonical_number(n: f64) -> String {
    if n == n.trunc() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Date coercion, most common source formats first.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%Y/%m/%d"))
        .or_else(|_| NaiveDate::parse_from_str(value, "%d/%m/%Y"))
        .ok()
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Human-readable amount: two decimals, decimal comma, dash sign.
pub fn format_value(value: f64) -> String {
    let (sign, value) = if value < 0.0 {
        ("\u{2013}", -value)
    } else {
        ("", value)
    };
    format!("{}{:.2}", sign, value).replace('.', ",")
}

pub fn format_label(label: &str, html: bool) -> String {
    if html {
        label.replace('\n', "<br/>")
    } else {
        label.to_string()
    }
}
