use crate::error::LedgerError;
use crate::event::Attrs;
use crate::template::{MatchRule, Template};

/// Sign convention of an account spec, taken from the first character of
/// its `account` attribute.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Prefix {
    /// `+`: post the amount as resolved.
    Plus,
    /// `-`: post the negated amount.
    Minus,
    /// `*`: indirection, the template names the row field holding the
    /// actual account path.
    Star,
}

/// One posting specification of a sheet. Declaration order matters:
/// percentage and balance-to-zero amounts are evaluated against the
/// postings already assigned by earlier specs.
#[derive(Clone, Debug, PartialEq)]
pub struct AccountSpec {
    pub prefix: Prefix,
    pub account: Template,
    pub amount: Template,
    pub if_empty: Option<Template>,
}

impl AccountSpec {
    pub fn parse(
        sheet: &str,
        account: &str,
        amount: Option<&str>,
        if_empty: Option<&str>,
    ) -> Result<AccountSpec, LedgerError> {
        let invalid = || LedgerError::InvalidAccountSpec {
            sheet: sheet.to_string(),
            spec: account.to_string(),
        };
        let prefix = match account.chars().next() {
            Some('+') => Prefix::Plus,
            Some('-') => Prefix::Minus,
            Some('*') => Prefix::Star,
            _ => return Err(invalid()),
        };
        Ok(AccountSpec {
            prefix,
            account: Template::parse(&account[1..])?,
            amount: Template::parse(amount.unwrap_or(""))?,
            if_empty: if_empty.map(Template::parse).transpose()?,
        })
    }
}

/// Conditional field rewrite, applied per row in registration order.
/// Each rewrite is visible to later rules and to the sheet's templates.
#[derive(Debug)]
pub struct ReplaceRule {
    /// Row field inspected by the condition.
    pub column: String,
    pub rule: MatchRule,
    /// Row field written when the condition holds.
    pub target_column: String,
    pub target_value: Template,
}

/// Declared metadata of one tabular source: value templates, posting
/// specs, rewrite rules and an optional join onto another sheet's
/// entries.
#[derive(Debug)]
pub struct Sheet {
    pub name: String,
    pub date: Option<Template>,
    pub label: Option<Template>,
    pub doc: Option<Template>,
    pub join_sheet: Option<String>,
    pub join_target_match: Option<Template>,
    pub specs: Vec<AccountSpec>,
    pub replacements: Vec<ReplaceRule>,
    /// Row counter for diagnostics; starts at 1 so reported numbers line
    /// up with the source's header row.
    pub nth_row: u32,
}

impl Sheet {
    pub fn new(name: &str) -> Sheet {
        Sheet {
            name: name.to_string(),
            date: None,
            label: None,
            doc: None,
            join_sheet: None,
            join_target_match: None,
            specs: Vec::new(),
            replacements: Vec::new(),
            nth_row: 1,
        }
    }

    /// Merge one `sheet_meta` command into this sheet: templates and join
    /// attributes are last-writer-wins, an `account` attribute appends
    /// one posting spec.
    pub fn merge_meta(&mut self, attrs: &Attrs) -> Result<(), LedgerError> {
        if let Some(date) = attrs.get("date") {
            self.date = Some(Template::parse(date)?);
        }
        if let Some(label) = attrs.get("label") {
            self.label = Some(Template::parse(label)?);
        }
        if let Some(doc) = attrs.get("doc") {
            self.doc = Some(Template::parse(doc)?);
        }
        if let Some(join_sheet) = attrs.get("join_sheet") {
            self.join_sheet = Some(join_sheet.clone());
        }
        if let Some(join_target_match) = attrs.get("join_target_match") {
            self.join_target_match = Some(Template::parse(join_target_match)?);
        }
        if let Some(account) = attrs.get("account") {
            self.specs.push(AccountSpec::parse(
                &self.name,
                account,
                attrs.get("amount").map(|s| s.as_str()),
                attrs.get("if_empty").map(|s| s.as_str()),
            )?);
        }
        Ok(())
    }

    pub fn add_replacement(
        &mut self,
        column: &str,
        rule: MatchRule,
        target_column: &str,
        target_value: Template,
    ) {
        self.replacements.push(ReplaceRule {
            column: column.to_string(),
            rule,
            target_column: target_column.to_string(),
            target_value,
        });
    }
}
