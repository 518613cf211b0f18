//! Error and warning types produced by the pipeline.
//!
//! Mirrors the teacher's `CompilerError`/invariant-code split: hard errors
//! carry a stable code plus a source-framed message and abort compilation;
//! warnings carry a stable code from the closed set in the macro-surface
//! table and never abort.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Hard, fatal placement/structural errors (spec taxonomy class 1) and
/// internal invariant violations (class 3) share this shape; the two are
/// distinguished by `code`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "napi", napi_derive::napi(object))]
pub struct CompileError {
    pub code: String,
    pub message: String,
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl CompileError {
    pub fn new(code: &str, message: impl Into<String>, file: &str, line: u32, column: u32) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            file: file.to_string(),
            line,
            column,
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}: {} [{}]",
            self.file, self.line, self.column, self.message, self.code
        )
    }
}

impl std::error::Error for CompileError {}

/// Hard-error codes (spec §7.1 taxonomy class 1, plus class 3 invariant
/// violations). Not part of the "coded warning" closed set.
pub mod error_code {
    pub const MACRO_MISPLACED: &str = "E-MACRO-PLACEMENT";
    pub const STATE_DESTRUCTURED: &str = "E-STATE-DESTRUCTURE";
    pub const DERIVATION_CYCLE: &str = "E-DERIVATION-CYCLE";
    pub const DERIVED_REASSIGNED: &str = "E-DERIVED-REASSIGN";
    pub const DESTRUCTURED_ALIAS_WRITE: &str = "E-ALIAS-WRITE";
    pub const STATE_AT_MODULE_SCOPE: &str = "E-STATE-MODULE-SCOPE";
    pub const HOOK_OUTSIDE_COMPONENT: &str = "E-HOOK-PLACEMENT";
    pub const MISSING_MACRO_IMPORT: &str = "E-MACRO-IMPORT";
    pub const ALIAS_REASSIGNED: &str = "E-ALIAS-REASSIGN";
    pub const INTERNAL_INVARIANT: &str = "E-INTERNAL-INVARIANT";
}

/// Coded, non-fatal warning (spec taxonomy class 2). The `code` field is one
/// of the closed set named in spec §6's Diagnostics table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "napi", napi_derive::napi(object))]
pub struct Warning {
    pub code: String,
    pub message: String,
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl Warning {
    pub fn new(code: &str, message: impl Into<String>, file: &str, line: u32, column: u32) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            file: file.to_string(),
            line,
            column,
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}: {} [{}]",
            self.file, self.line, self.column, self.message, self.code
        )
    }
}

/// The closed set of warning codes from spec §6's Diagnostics table.
pub mod warning_code {
    pub const DIRECT_NESTED_MUTATION: &str = "W-NESTED-MUTATION";
    pub const DYNAMIC_PROPERTY_ACCESS: &str = "W-DYNAMIC-ACCESS";
    pub const BLACK_BOX_FUNCTION_CALL: &str = "W-BLACK-BOX-CALL";
    pub const EMPTY_EFFECT: &str = "W-EMPTY-EFFECT";
    pub const MODULE_LEVEL_STATE: &str = "W-MODULE-STATE";
    pub const ALIAS_REASSIGNMENT: &str = "W-ALIAS-REASSIGN";
    pub const NESTED_COMPONENT: &str = "W-NESTED-COMPONENT";
    pub const MEMO_SIDE_EFFECT: &str = "W-MEMO-SIDE-EFFECT";
    pub const MISSING_LIST_KEY: &str = "W-MISSING-KEY";
    pub const REACTIVE_IN_CONTROL_FLOW: &str = "W-REACTIVE-IN-CONTROL-FLOW";
    pub const NO_RETURN_STATEMENT: &str = "W-NO-RETURN";
}

/// A buffered sink that the warning pass flushes into once, at the end of
/// its pass, mirroring the teacher's `collected_errors: Vec<String>`
/// accumulator in `ResolutionContext` generalized to a typed value.
#[derive(Debug, Default)]
pub struct WarningSink {
    warnings: Vec<Warning>,
}

impl WarningSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, warning: Warning) {
        self.warnings.push(warning);
    }

    pub fn into_vec(self) -> Vec<Warning> {
        self.warnings
    }
}
