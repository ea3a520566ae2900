//! Node selector parsing.
//!
//! Selectors are forwarded verbatim to the node-discovery service. The
//! textual forms accepted here are `key=value`, `key!=value`, `key>value`
//! and `key<value`.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Comparison applied to a node label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorOp {
    Eq,
    Neq,
    Gt,
    Lt,
}

impl SelectorOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            SelectorOp::Eq => "=",
            SelectorOp::Neq => "!=",
            SelectorOp::Gt => ">",
            SelectorOp::Lt => "<",
        }
    }
}

/// A single label predicate. A node query is a conjunction of selectors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selector {
    pub label_key: String,
    pub op: SelectorOp,
    pub value: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectorError {
    #[error("selector has no operator: {0}")]
    MissingOperator(String),
    #[error("selector has an empty label key: {0}")]
    EmptyKey(String),
}

impl Selector {
    pub fn new(label_key: impl Into<String>, op: SelectorOp, value: impl Into<String>) -> Self {
        Self {
            label_key: label_key.into(),
            op,
            value: value.into(),
        }
    }

    pub fn parse(raw: &str) -> Result<Self, SelectorError> {
        let raw = raw.trim();
        // `!=` must be tried before `=`.
        let (key, op, value) = if let Some((k, v)) = raw.split_once("!=") {
            (k, SelectorOp::Neq, v)
        } else if let Some((k, v)) = raw.split_once('=') {
            (k, SelectorOp::Eq, v)
        } else if let Some((k, v)) = raw.split_once('>') {
            (k, SelectorOp::Gt, v)
        } else if let Some((k, v)) = raw.split_once('<') {
            (k, SelectorOp::Lt, v)
        } else {
            return Err(SelectorError::MissingOperator(raw.to_string()));
        };

        let key = key.trim();
        if key.is_empty() {
            return Err(SelectorError::EmptyKey(raw.to_string()));
        }
        Ok(Selector::new(key, op, value.trim()))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.label_key, self.op.symbol(), self.value)
    }
}
