// pipeline.rs: Analysis state and pass orchestration
//
// Holds all pass artifacts and runs the minimal set of passes for a given
// terminal PassId.
//
// Preconditions: the parsed Program is set before calling run_pipeline.
// Postconditions: all artifacts for required passes are populated, or has_error is set.
// Failure modes: any pass emitting error-level diagnostics.
// Side effects: calls on_pass_complete callback after each pass for immediate display.

use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;

use crate::analyze::{analyze, AlignmentReport, AnalysisOptions};
use crate::diag::{has_errors, Diagnostic};
use crate::ir::Program;
use crate::pass::{descriptor, required_passes, PassId};
use crate::resolve::{resolve, ResolvedProgram};
use crate::uniquify::uniquify_names;

// ── Provenance ─────────────────────────────────────────────────────────────

/// Provenance metadata attached to machine-readable reports.
///
/// `source_hash`: SHA-256 of the raw `.va` source text.
/// `analyzer_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub source_hash: [u8; 32],
    pub analyzer_version: &'static str,
}

impl Provenance {
    /// Hex string of the source hash (64 characters).
    pub fn source_hash_hex(&self) -> String {
        let mut s = String::with_capacity(64);
        for b in &self.source_hash {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
        }
        s
    }
}

impl Serialize for Provenance {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut st = s.serialize_struct("Provenance", 2)?;
        st.serialize_field("source_hash", &self.source_hash_hex())?;
        st.serialize_field("analyzer_version", self.analyzer_version)?;
        st.end()
    }
}

/// Compute provenance from source text.
pub fn compute_provenance(source: &str) -> Provenance {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    let result = hasher.finalize();
    let mut source_hash = [0u8; 32];
    source_hash.copy_from_slice(&result);

    Provenance {
        source_hash,
        analyzer_version: env!("CARGO_PKG_VERSION"),
    }
}

// ── Artifact storage ───────────────────────────────────────────────────────

/// Holds all pass artifacts and accumulated diagnostics.
pub struct CompilationState {
    /// Parsed program; resolve attaches buffer params in place.
    pub program: Program,
    pub options: AnalysisOptions,
    pub resolved: Option<ResolvedProgram>,
    pub uniquified: Option<Program>,
    pub report: Option<AlignmentReport>,
    pub diagnostics: Vec<Diagnostic>,
    pub has_error: bool,
    pub provenance: Option<Provenance>,
}

impl CompilationState {
    pub fn new(program: Program, options: AnalysisOptions) -> Self {
        Self {
            program,
            options,
            resolved: None,
            uniquified: None,
            report: None,
            diagnostics: Vec::new(),
            has_error: false,
            provenance: None,
        }
    }

    /// The JSON document emitted by `--emit json`.
    pub fn to_json(&self) -> serde_json::Result<String> {
        #[derive(Serialize)]
        struct JsonReport<'a> {
            provenance: Option<&'a Provenance>,
            options: &'a AnalysisOptions,
            report: Option<&'a AlignmentReport>,
        }
        serde_json::to_string_pretty(&JsonReport {
            provenance: self.provenance.as_ref(),
            options: &self.options,
            report: self.report.as_ref(),
        })
    }
}

// ── Error type ─────────────────────────────────────────────────────────────

/// Pipeline execution failed due to error-level diagnostics in a pass.
/// The specific diagnostics are available in `CompilationState.diagnostics`.
#[derive(Debug, Error)]
#[error("pass '{}' reported errors", pass_name(.failing_pass))]
pub struct PipelineError {
    /// The pass that produced the error.
    pub failing_pass: PassId,
}

fn pass_name(id: &PassId) -> &'static str {
    descriptor(*id).name
}

/// Per-pass post-processing: callback, accumulate, timing log, error check.
fn finish_pass(
    state: &mut CompilationState,
    pass_id: PassId,
    diags: Vec<Diagnostic>,
    elapsed: Duration,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    on_pass_complete(pass_id, &diags);
    let is_err = has_errors(&diags);
    state.diagnostics.extend(diags);
    log::debug!(
        "valign: {} complete, {:.1}ms",
        descriptor(pass_id).name,
        elapsed.as_secs_f64() * 1000.0
    );
    if is_err {
        state.has_error = true;
        return Err(PipelineError {
            failing_pass: pass_id,
        });
    }
    Ok(())
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `terminal`.
///
/// Per-pass sequence: execute → on_pass_complete(callback) → timing log → error check.
pub fn run_pipeline(
    state: &mut CompilationState,
    terminal: PassId,
    mut on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    for pass_id in required_passes(terminal) {
        let start = Instant::now();
        let diags = match pass_id {
            PassId::Resolve => {
                let result = resolve(&mut state.program);
                state.resolved = Some(result.resolved);
                result.diagnostics
            }
            PassId::Uniquify => {
                state.uniquified = Some(uniquify_names(&state.program));
                Vec::new()
            }
            PassId::Align => {
                let program = state.uniquified.as_ref().unwrap_or(&state.program);
                let result = analyze(program, &state.options);
                state.report = Some(result.report);
                result.diagnostics
            }
        };
        finish_pass(state, pass_id, diags, start.elapsed(), &mut on_pass_complete)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::Alignment;
    use crate::parser::parse;

    fn state_for(source: &str) -> CompilationState {
        let parsed = parse(source);
        assert!(parsed.errors.is_empty(), "parse errors: {:?}", parsed.errors);
        let mut state =
            CompilationState::new(parsed.program.expect("program"), AnalysisOptions::default());
        state.provenance = Some(compute_provenance(source));
        state
    }

    #[test]
    fn full_pipeline_populates_all_artifacts() {
        let mut state = state_for(
            "buffer input: u8 align 128\nalloc out: u8\nscalar n: i32\nfor x in 0..n step 128 {\n  store<u8>(out, ramp(x, 1, 128), load<u8>(input, ramp(x, 1, 128)))\n}\n",
        );
        let mut seen = Vec::new();
        run_pipeline(&mut state, PassId::Align, |pass, _| seen.push(pass)).expect("pipeline");
        assert_eq!(seen, vec![PassId::Resolve, PassId::Uniquify, PassId::Align]);
        assert!(state.resolved.is_some());
        assert!(state.uniquified.is_some());
        let report = state.report.as_ref().expect("report");
        assert_eq!(report.aligned(), 2);
        assert!(report
            .accesses
            .iter()
            .all(|a| a.alignment == Alignment::Aligned { offset: 0 }));
    }

    #[test]
    fn resolve_errors_stop_the_pipeline() {
        let mut state = state_for("store<u8>(missing, ramp(0, 1, 128), 0)");
        let err = run_pipeline(&mut state, PassId::Align, |_, _| {}).expect_err("should fail");
        assert_eq!(err.failing_pass, PassId::Resolve);
        assert_eq!(err.to_string(), "pass 'resolve' reported errors");
        assert!(state.has_error);
        assert!(state.report.is_none());
    }

    #[test]
    fn resolve_only_runs_one_pass() {
        let mut state = state_for("alloc out: u8");
        run_pipeline(&mut state, PassId::Resolve, |_, _| {}).expect("pipeline");
        assert!(state.uniquified.is_none());
        assert!(state.report.is_none());
    }

    #[test]
    fn provenance_hash_is_stable() {
        let a = compute_provenance("eval 1");
        let b = compute_provenance("eval 1");
        let c = compute_provenance("eval 2");
        assert_eq!(a.source_hash_hex(), b.source_hash_hex());
        assert_ne!(a.source_hash_hex(), c.source_hash_hex());
        assert_eq!(a.source_hash_hex().len(), 64);
    }

    #[test]
    fn json_includes_provenance_and_options() {
        let mut state = state_for("alloc out: u8\nstore<u8>(out, ramp(0, 1, 128), 0)");
        run_pipeline(&mut state, PassId::Align, |_, _| {}).expect("pipeline");
        let json = state.to_json().expect("json");
        let value: serde_json::Value = serde_json::from_str(&json).expect("parse json");
        assert_eq!(value["options"]["required_alignment"], 128);
        assert_eq!(
            value["provenance"]["analyzer_version"],
            env!("CARGO_PKG_VERSION")
        );
        assert_eq!(value["report"]["accesses"][0]["verdict"], "aligned");
    }
}
