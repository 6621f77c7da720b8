use std::fmt;

use serde_json::Value;

use crate::{
    config::RunConfiguration,
    error::{ChkptError, Result},
};

/// A configuration field whose value changed between invocations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMismatch {
    pub field: String,
    pub recorded: String,
    pub requested: String,
}

impl fmt::Display for FieldMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: recorded {}, requested {}",
            self.field, self.recorded, self.requested
        )
    }
}

fn fields(config: &RunConfiguration) -> Result<serde_json::Map<String, Value>> {
    match serde_json::to_value(config) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ChkptError::Configuration(format!(
            "run configuration serialized to {} instead of an object",
            other
        ))),
        Err(err) => Err(ChkptError::Configuration(format!(
            "could not compare run configurations: {}",
            err
        ))),
    }
}

/// Compare two configurations field by field.
///
/// Every field takes part, including the data payload and the storage
/// path. Fields are reported in alphabetical order.
pub fn diff(
    recorded: &RunConfiguration,
    requested: &RunConfiguration,
) -> Result<Vec<FieldMismatch>> {
    if recorded == requested {
        return Ok(Vec::new());
    }
    let recorded = fields(recorded)?;
    let mut requested = fields(requested)?;

    let mut mismatches = Vec::new();
    for (field, old) in recorded {
        let new = requested.remove(&field).unwrap_or(Value::Null);
        if old != new {
            mismatches.push(FieldMismatch {
                field,
                recorded: old.to_string(),
                requested: new.to_string(),
            });
        }
    }
    mismatches.extend(requested.into_iter().map(|(field, new)| FieldMismatch {
        field,
        recorded: Value::Null.to_string(),
        requested: new.to_string(),
    }));
    Ok(mismatches)
}

/// Refuse to resume a run under a configuration other than the recorded one.
pub fn check_restart(recorded: &RunConfiguration, requested: &RunConfiguration) -> Result<()> {
    let mismatches = diff(recorded, requested)?;
    if mismatches.is_empty() {
        return Ok(());
    }
    Err(ChkptError::RestartConsistency {
        path: requested.path.clone(),
        mismatches,
    })
}
