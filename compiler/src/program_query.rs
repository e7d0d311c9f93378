// program_query.rs: Helpers for reading program-level `set` directives
//
// Settings are resolved with the precedence: explicit override (CLI), then
// the source's `set` directive, then the built-in default.

use crate::analyze::AnalysisOptions;
use crate::ir::*;

/// Setting names understood by the analysis.
pub const KNOWN_SETTINGS: &[&str] = &["alignment"];

/// Look up a `set` directive by name. The last directive wins.
pub fn get_set<'a>(program: &'a Program, name: &str) -> Option<&'a SetDirective> {
    program
        .settings
        .iter()
        .rev()
        .find(|set| set.name.name == name)
}

/// Get a `set` directive's value (e.g., `set alignment = 128`).
pub fn get_set_int(program: &Program, name: &str) -> Option<i64> {
    get_set(program, name).map(|set| set.value)
}

/// Directives whose names are not in [`KNOWN_SETTINGS`].
pub fn unknown_settings(program: &Program) -> impl Iterator<Item = &SetDirective> {
    program
        .settings
        .iter()
        .filter(|set| !KNOWN_SETTINGS.contains(&set.name.name.as_str()))
}

/// Analysis options for `program`, with an optional override of the
/// required alignment.
pub fn analysis_options(program: &Program, alignment_override: Option<i64>) -> AnalysisOptions {
    let defaults = AnalysisOptions::default();
    AnalysisOptions {
        required_alignment: alignment_override
            .or_else(|| get_set_int(program, "alignment"))
            .unwrap_or(defaults.required_alignment),
    }
}
