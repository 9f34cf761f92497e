use std::time::Duration;

use thiserror::Error;

use crate::state::Mode;

#[derive(Error, Debug)]
pub enum GuardError {
    #[error("`{program}` did not exit within {timeout:?}")]
    CommandTimeout { program: String, timeout: Duration },

    #[error("Reconcile towards {target} failed for {failed} of {total} rule(s)")]
    ReconcileFailed {
        target: Mode,
        failed: usize,
        total: usize,
    },

    #[error("Rule catalog is invalid: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Must run with administrator/root privileges")]
    NotElevated,

    #[error("Connectivity monitor error: {0}")]
    Monitor(String),

    #[error("Enforcement worker failed: {0}")]
    Worker(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("rule name {0:?} appears more than once")]
    DuplicateName(String),

    #[error("rule name must not be empty")]
    EmptyName,

    #[error("rule name {0:?} must not contain a double quote")]
    QuotedName(String),

    #[error("rule {0:?} uses protocol any but lists explicit ports")]
    PortsOnAnyProtocol(String),

    #[error("invalid port specification {0:?}")]
    InvalidPorts(String),
}

pub type Result<T> = std::result::Result<T, GuardError>;
