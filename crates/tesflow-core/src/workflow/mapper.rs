//! Output mapping: moves parts of a task's raw result into the context.

use serde_json::Value;
use tesflow_types::workflow::OutputMapping;
use tracing::debug;

use super::context::VariableContext;
use super::definition::WorkflowError;
use super::jsonpath::JsonPath;
use super::template;
use super::transform::Pipeline;

/// Applies a node's declared output mappings.
pub struct OutputMapper;

/// Dry run of one mapping against sample output.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingReport {
    pub source: String,
    pub target: String,
    /// The source matched something in the sample.
    pub found: bool,
    /// Extracted value, before any transform.
    pub value: Option<Value>,
    /// Value that would be written to the target.
    pub transformed: Option<Value>,
    pub used_default: bool,
    pub error: Option<String>,
}

impl MappingReport {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

impl OutputMapper {
    /// Compute every mapping against `raw`, then write all results to `ctx`
    /// in one step. If any mapping fails nothing is written.
    ///
    /// Returns the resolved target paths, in declaration order.
    pub fn apply(
        mappings: &[OutputMapping],
        raw: &Value,
        ctx: &mut VariableContext,
    ) -> Result<Vec<String>, WorkflowError> {
        let mut writes = Vec::with_capacity(mappings.len());
        for mapping in mappings {
            if let Some(value) = Self::evaluate(mapping, raw)? {
                let target = template::interpolate_strict(&mapping.target, ctx)?;
                writes.push((target, value));
            }
        }

        let targets = writes.iter().map(|(t, _)| t.clone()).collect();
        ctx.set_many(writes)?;
        Ok(targets)
    }

    /// Evaluate `mapping` against `sample` without touching any context.
    ///
    /// Unlike [`evaluate`](Self::evaluate), the extracted value is reported
    /// alongside the transformed one, and failures are captured in the report.
    pub fn validate(mapping: &OutputMapping, sample: &Value) -> MappingReport {
        let mut report = MappingReport {
            source: mapping.source.clone(),
            target: mapping.target.clone(),
            found: false,
            value: None,
            transformed: None,
            used_default: false,
            error: None,
        };

        let path = match JsonPath::from_source(&mapping.source) {
            Ok(path) => path,
            Err(e) => {
                report.error = Some(e.to_string());
                return report;
            }
        };

        let Some(extracted) = path.extract(sample) else {
            if let Some(default) = &mapping.default {
                report.transformed = Some(default.clone());
                report.used_default = true;
            } else if mapping.required {
                report.error = Some(
                    WorkflowError::MissingRequiredOutput {
                        path: mapping.source.clone(),
                        target: mapping.target.clone(),
                    }
                    .to_string(),
                );
            }
            return report;
        };

        report.found = true;
        report.value = Some(extracted.clone());
        let transformed = match mapping.transform.as_deref() {
            Some(spec) => Pipeline::parse(spec).and_then(|pipeline| pipeline.apply(extracted)),
            None => Ok(extracted),
        };
        match transformed {
            Ok(value) => report.transformed = Some(value),
            Err(e) => report.error = Some(e.to_string()),
        }
        report
    }

    /// Extract and transform a single mapping. `Ok(None)` means an optional
    /// mapping without a match.
    pub fn evaluate(mapping: &OutputMapping, raw: &Value) -> Result<Option<Value>, WorkflowError> {
        let path = JsonPath::from_source(&mapping.source)?;
        let extracted = match path.extract(raw) {
            Some(value) => value,
            None => {
                if let Some(default) = &mapping.default {
                    debug!(source = %mapping.source, target = %mapping.target, "Output mapping using default");
                    // Defaults are taken as written, without the transform.
                    return Ok(Some(default.clone()));
                }
                if mapping.required {
                    return Err(WorkflowError::MissingRequiredOutput {
                        path: mapping.source.clone(),
                        target: mapping.target.clone(),
                    });
                }
                debug!(source = %mapping.source, "Optional output mapping matched nothing");
                return Ok(None);
            }
        };

        match mapping.transform.as_deref() {
            Some(spec) => Pipeline::parse(spec)?.apply(extracted).map(Some),
            None => Ok(Some(extracted)),
        }
    }
}
