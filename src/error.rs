/// Fatal-tier errors. Anything here aborts the enclosing stream;
/// recoverable conditions travel as `message` events instead.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LedgerError {
    #[error("account declared multiple times: {0}")]
    DuplicateAccount(String),

    #[error("duplicate account number: {0}")]
    DuplicateNumber(String),

    #[error("account does not exist: {0}")]
    UnknownAccount(String),

    #[error("aggregate account does not match any declared account: {0}")]
    EmptyAggregate(String),

    #[error("invalid account spec `{spec}' for sheet `{sheet}' (should start with '+', '-', or '*')")]
    InvalidAccountSpec { sheet: String, spec: String },

    #[error("invalid amount value `{value}' on sheet `{sheet}' for row n°{row}")]
    InvalidAmount {
        sheet: String,
        row: u32,
        value: String,
    },

    #[error("missing attribute `{attr}' for {command}")]
    MissingAttribute {
        command: &'static str,
        attr: &'static str,
    },

    #[error("invalid match expression `{0}'")]
    InvalidMatchExpr(String),

    #[error("invalid template `{0}'")]
    InvalidTemplate(String),

    #[error("unbalanced input: stream ended inside a captured element")]
    UnbalancedCapture,
}
