//! Building federate specs from command-line values.

use simlink_core::FederateSpec;
use simlink_proto::{RunControl, SetParameter, StartFederate, Value};

/// Placeholder in the post-model arguments replaced by the instance id.
pub const ID_PLACEHOLDER: &str = "%ID%";

/// Post-model arguments for the demo federate binary.
pub const DEFAULT_ARGS_AFTER: &str = "--port %PORT% --instance-id %ID%";

/// Parse `name=value`, inferring the value type.
///
/// Integers become `Int32` when they fit and `Int64` otherwise; then
/// floats, booleans, and finally strings.
pub fn parse_param(s: &str) -> Result<SetParameter, String> {
    let (name, raw) = s.split_once('=').ok_or_else(|| format!("expected name=value, got {s:?}"))?;
    if name.is_empty() {
        return Err(format!("expected name=value, got {s:?}"));
    }
    Ok(SetParameter::new(name, infer(raw)))
}

fn infer(raw: &str) -> Value {
    if let Ok(n) = raw.parse::<i64>() {
        return i32::try_from(n).map_or(Value::Int64(n), Value::Int32);
    }
    if let Ok(x) = raw.parse::<f64>() {
        return Value::Float64(x);
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        other => Value::from(other),
    }
}

/// Shared launch settings for every federate of a run.
#[derive(Debug, Clone)]
pub struct FederateTemplate {
    /// Software alias known to the starter
    pub software: String,
    /// Model file handed to the executable
    pub model_path: String,
    /// Post-model arguments; `%ID%` and `%PORT%` are substituted
    pub args_after: String,
    /// Working directory per federate; `%ID%` is substituted
    pub working_directory: String,
    /// Run configuration
    pub run_control: RunControl,
    /// Parameters, set in order
    pub parameters: Vec<SetParameter>,
    /// Statistics to collect
    pub statistics: Vec<String>,
}

impl FederateTemplate {
    /// Instance id of the federate with this ordinal, e.g. `MM1.0`.
    pub fn instance_id(&self, ordinal: usize) -> String {
        format!("{}.{ordinal}", self.software.to_uppercase())
    }

    /// Specs for `count` federates.
    pub fn specs(&self, count: usize) -> Vec<FederateSpec> {
        (0..count)
            .map(|ordinal| {
                let id = self.instance_id(ordinal);
                FederateSpec {
                    start: StartFederate {
                        model_path: self.model_path.clone(),
                        args_after: self.args_after.replace(ID_PLACEHOLDER, &id),
                        working_directory: self.working_directory.replace(ID_PLACEHOLDER, &id),
                        ..StartFederate::new(id, self.software.clone())
                    },
                    run_control: self.run_control.clone(),
                    parameters: self.parameters.clone(),
                    statistics: self.statistics.clone(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use simlink_proto::SimTime;

    use super::*;

    #[test]
    fn parameter_types_inferred() {
        assert_eq!(parse_param("seed=42").unwrap().value, Value::Int32(42));
        assert_eq!(parse_param("big=5000000000").unwrap().value, Value::Int64(5_000_000_000));
        assert_eq!(parse_param("iat=1.0").unwrap().value, Value::Float64(1.0));
        assert_eq!(parse_param("trace=true").unwrap().value, Value::Bool(true));
        assert_eq!(parse_param("mode=fifo").unwrap().value, Value::from("fifo"));
        assert_eq!(parse_param("empty=").unwrap().value, Value::from(""));
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=1").is_err());
    }

    #[test]
    fn specs_number_instances() {
        let template = FederateTemplate {
            software: "mm1".to_string(),
            model_path: String::new(),
            args_after: DEFAULT_ARGS_AFTER.to_string(),
            working_directory: String::new(),
            run_control: RunControl::new(SimTime::seconds(100.0), SimTime::seconds(0.0)),
            parameters: vec![SetParameter::new("iat", 1.0)],
            statistics: vec!["qN.max".to_string()],
        };

        let specs = template.specs(2);

        assert_eq!(specs.len(), 2);
        assert_eq!(specs[1].instance_id(), "MM1.1");
        assert_eq!(specs[1].start.software_code, "mm1");
        assert_eq!(specs[1].start.args_after, "--port %PORT% --instance-id MM1.1");
    }
}
