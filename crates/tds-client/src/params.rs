//! Procedure parameters and output binding.

use tds_protocol::{RpcParam, StringMode, TdsVersion, TypeInfo};
use tds_types::{SqlValue, ToSql, TypeError, encode_param_value, encode_row_value, type_info_for};

/// One procedure parameter.
///
/// Output parameters receive the values the server returns, in
/// declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    /// Name including the `@`, or empty for positional parameters.
    pub name: String,
    /// Value sent to the server; the initial value of output parameters.
    pub value: SqlValue,
    /// Explicit wire type; derived from the value when absent.
    pub type_info: Option<TypeInfo>,
    /// Whether the server returns the final value.
    pub is_output: bool,
}

impl Parameter {
    /// Create an input parameter.
    pub fn new(name: impl Into<String>, value: SqlValue) -> Self {
        Self {
            name: name.into(),
            value,
            type_info: None,
            is_output: false,
        }
    }

    /// Create an input parameter from a Rust value.
    pub fn input(name: impl Into<String>, value: &dyn ToSql) -> Result<Self, TypeError> {
        Ok(Self::new(name, value.to_sql()?))
    }

    /// Create an output parameter of the given type with a NULL initial value.
    pub fn output(name: impl Into<String>, type_info: TypeInfo) -> Self {
        Self {
            name: name.into(),
            value: SqlValue::Null,
            type_info: Some(type_info),
            is_output: true,
        }
    }

    /// Set the wire type explicitly.
    #[must_use]
    pub fn with_type(mut self, type_info: TypeInfo) -> Self {
        self.type_info = Some(type_info);
        self
    }

    /// Mark as output, keeping the current value as initial value.
    #[must_use]
    pub fn as_output(mut self) -> Self {
        self.is_output = true;
        self
    }

    /// Encode for the wire.
    ///
    /// TDS 5.0 carries parameter values in a PARAMS token, which uses row
    /// framing.
    pub(crate) fn to_rpc(&self, version: TdsVersion, mode: StringMode) -> Result<RpcParam, TypeError> {
        let type_info = match self.type_info {
            Some(info) => info,
            None => type_info_for(&self.value, version)?,
        };
        let value = if version == TdsVersion::V5_0 {
            encode_row_value(&self.value, &type_info, version, mode)?
        } else {
            encode_param_value(&self.value, &type_info, version, mode)?
        };
        let param = RpcParam::new(self.name.clone(), type_info, value);
        Ok(if self.is_output {
            param.as_output()
        } else {
            param
        })
    }
}

/// Values returned by a procedure call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputValues {
    names: Vec<String>,
    values: Vec<Option<SqlValue>>,
    next: usize,
    return_status: Option<i32>,
}

impl OutputValues {
    /// Prepare slots for the output parameters of a call.
    pub(crate) fn for_params(params: &[Parameter]) -> Self {
        let names: Vec<String> = params
            .iter()
            .filter(|p| p.is_output)
            .map(|p| p.name.clone())
            .collect();
        Self {
            values: vec![None; names.len()],
            names,
            next: 0,
            return_status: None,
        }
    }

    /// Bind the next returned value positionally.
    ///
    /// Values beyond the declared outputs are dropped.
    pub(crate) fn bind_next(&mut self, value: SqlValue) -> bool {
        match self.values.get_mut(self.next) {
            Some(slot) => {
                *slot = Some(value);
                self.next += 1;
                true
            }
            None => false,
        }
    }

    pub(crate) fn set_return_status(&mut self, status: i32) {
        self.return_status = Some(status);
    }

    /// Integer returned by the procedure's RETURN statement.
    #[must_use]
    pub fn return_status(&self) -> Option<i32> {
        self.return_status
    }

    /// Value of the output parameter at `index` among the outputs.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&SqlValue> {
        self.values.get(index).and_then(Option::as_ref)
    }

    /// Value of an output parameter by name, with or without the `@`.
    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<&SqlValue> {
        let wanted = name.trim_start_matches('@');
        let index = self
            .names
            .iter()
            .position(|n| n.trim_start_matches('@').eq_ignore_ascii_case(wanted))?;
        self.get(index)
    }

    /// Number of values received so far.
    #[must_use]
    pub fn received(&self) -> usize {
        self.next
    }

    /// Number of declared output parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Check if no output parameters were declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
