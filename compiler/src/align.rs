// align.rs: Alignment classification of vector loads and stores
//
// Decides, for one memory access, whether its vector index is provably
// aligned to the required vector width, known not to be provably aligned,
// or of a shape this analysis does not handle. Congruence facts for names in
// the index come from a scope chained to the caller's scope.
//
// Preconditions: bound names are unique (see `uniquify`), and push/pop calls
//                mirror the lexical nesting of the program being walked.
// Postconditions: `Aligned { offset }` is only returned when the ramp base is
//                 proven to sit `offset` lanes past a multiple of the native
//                 lane count in a buffer whose base is itself aligned.
// Failure modes: non-positive required alignment, or an element size that
//                does not divide it, yield `AlignError`.
// Side effects: none.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::ir::{BufferParam, Expr, Load, ScalarType, Store};
use crate::modulus::{modulus_remainder, reduce_expr_modulo, ModulusRemainder};
use crate::scope::Scope;

/// Ramp strides this analysis can reason about.
const SUPPORTED_STRIDES: [i64; 3] = [1, 2, 3];

// ── Public types ────────────────────────────────────────────────────────────

/// Alignment verdict for one load or store.
///
/// Once the index is a ramp with a supported stride the verdict is always
/// `Aligned` or `Unaligned`; `Unaligned` covers both "proven misaligned" and
/// "could not prove alignment". `Unknown` is reserved for index shapes the
/// analysis does not handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Alignment {
    /// Indirect index, non-constant stride, or a stride other than 1, 2, 3.
    Unknown,
    /// The ramp base is `offset` lanes past a multiple of the native lane
    /// count, `0 <= offset < native_lanes`.
    Aligned { offset: i64 },
    /// The buffer base may be misaligned, or the ramp base could not be
    /// pinned relative to a lane boundary.
    Unaligned,
}

impl Alignment {
    /// Lane offset past the nearest lower vector boundary, when aligned.
    pub fn aligned_offset(&self) -> Option<i64> {
        match self {
            Alignment::Aligned { offset } => Some(*offset),
            _ => None,
        }
    }

    pub fn is_aligned(&self) -> bool {
        matches!(self, Alignment::Aligned { .. })
    }

    /// True if the access starts exactly on a vector boundary.
    pub fn is_on_boundary(&self) -> bool {
        self.aligned_offset() == Some(0)
    }
}

impl fmt::Display for Alignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Alignment::Unknown => write!(f, "unknown"),
            Alignment::Aligned { offset } => write!(f, "aligned offset={offset}"),
            Alignment::Unaligned => write!(f, "unaligned"),
        }
    }
}

/// Caller contract violations. The native lane count of an access is
/// undefined unless both hold.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AlignError {
    #[error("required alignment must be a positive number of bytes, got {0}")]
    InvalidRequiredAlignment(i64),
    #[error(
        "element type {ty} ({bytes} bytes) does not evenly divide the required alignment of {required} bytes"
    )]
    ElementSizeMismatch {
        ty: ScalarType,
        bytes: u32,
        required: i64,
    },
}

/// The parts of a load or store the classifier needs.
pub trait MemoryAccess {
    fn index(&self) -> &Expr;
    /// Type of one element read or written.
    fn element_type(&self) -> ScalarType;
    /// Declared host-side parameter, if the buffer is external.
    fn param(&self) -> Option<&BufferParam>;
}

impl MemoryAccess for Load {
    fn index(&self) -> &Expr {
        &self.index
    }

    fn element_type(&self) -> ScalarType {
        self.ty
    }

    fn param(&self) -> Option<&BufferParam> {
        self.param.as_ref()
    }
}

impl MemoryAccess for Store {
    fn index(&self) -> &Expr {
        &self.index
    }

    fn element_type(&self) -> ScalarType {
        self.ty
    }

    fn param(&self) -> Option<&BufferParam> {
        self.param.as_ref()
    }
}

/// Number of elements of type `ty` in `required_alignment` bytes.
pub fn native_lanes(required_alignment: i64, ty: ScalarType) -> Result<i64, AlignError> {
    if required_alignment <= 0 {
        return Err(AlignError::InvalidRequiredAlignment(required_alignment));
    }
    let bytes = ty.bytes();
    let size = i64::from(bytes);
    if size == 0 || required_alignment % size != 0 {
        return Err(AlignError::ElementSizeMismatch {
            ty,
            bytes,
            required: required_alignment,
        });
    }
    Ok(required_alignment / size)
}

// ── Analyzer ────────────────────────────────────────────────────────────────

/// Classifies loads and stores against a fixed required alignment.
///
/// Holds its own scope of congruence facts whose lookups fall through to the
/// enclosing scope supplied at construction. The tree walker pushes a fact
/// for each binding it enters and pops it on exit.
#[derive(Debug)]
pub struct AlignmentAnalyzer<'p> {
    alignment_info: Scope<'p, ModulusRemainder>,
    required_alignment: i64,
}

impl<'p> AlignmentAnalyzer<'p> {
    /// An analyzer whose fact lookups fall through to `enclosing`.
    pub fn new(
        required_alignment: i64,
        enclosing: &'p Scope<'p, ModulusRemainder>,
    ) -> Result<Self, AlignError> {
        Self::build(required_alignment, Scope::with_containing(enclosing))
    }

    /// An analyzer with no enclosing facts.
    pub fn standalone(required_alignment: i64) -> Result<Self, AlignError> {
        Self::build(required_alignment, Scope::new())
    }

    fn build(
        required_alignment: i64,
        alignment_info: Scope<'p, ModulusRemainder>,
    ) -> Result<Self, AlignError> {
        if required_alignment <= 0 {
            return Err(AlignError::InvalidRequiredAlignment(required_alignment));
        }
        Ok(AlignmentAnalyzer {
            alignment_info,
            required_alignment,
        })
    }

    pub fn required_alignment(&self) -> i64 {
        self.required_alignment
    }

    pub fn scope(&self) -> &Scope<'p, ModulusRemainder> {
        &self.alignment_info
    }

    /// Bind `name` to the fact derived from `value` under the current scope.
    pub fn push(&mut self, name: &str, value: &Expr) {
        let fact = modulus_remainder(value, &self.alignment_info);
        log::trace!("alignment: push {name} = {fact}");
        self.alignment_info.push(name, fact);
    }

    /// Bind `name` to an already derived fact.
    pub fn push_fact(&mut self, name: &str, fact: ModulusRemainder) {
        log::trace!("alignment: push {name} = {fact}");
        self.alignment_info.push(name, fact);
    }

    pub fn pop(&mut self, name: &str) -> Option<ModulusRemainder> {
        self.alignment_info.pop(name)
    }

    /// The fact currently bound to `name` (unconstrained if unbound).
    pub fn fact(&self, name: &str) -> ModulusRemainder {
        self.alignment_info.get(name).copied().unwrap_or_default()
    }

    /// Native lane count for an element type at this analyzer's alignment.
    pub fn native_lanes(&self, ty: ScalarType) -> Result<i64, AlignError> {
        native_lanes(self.required_alignment, ty)
    }

    /// Classify a load or store.
    pub fn classify(&self, access: &impl MemoryAccess) -> Result<Alignment, AlignError> {
        let lanes = self.native_lanes(access.element_type())?;
        Ok(self.classify_index(access.index(), access.param(), lanes))
    }

    pub fn classify_load(&self, load: &Load) -> Result<Alignment, AlignError> {
        self.classify(load)
    }

    pub fn classify_store(&self, store: &Store) -> Result<Alignment, AlignError> {
        self.classify(store)
    }

    /// Decision procedure shared by loads and stores.
    fn classify_index(
        &self,
        index: &Expr,
        param: Option<&BufferParam>,
        native_lanes: i64,
    ) -> Alignment {
        log::debug!(
            "alignment: check if {} is aligned to a {} byte boundary (native lanes: {})",
            index,
            self.required_alignment,
            native_lanes
        );

        let Some((base, stride, _)) = index.as_ramp() else {
            log::debug!("alignment: not a ramp, returning unknown");
            return Alignment::Unknown;
        };
        let Some(stride) = stride.as_const_int() else {
            log::debug!("alignment: non-constant stride, returning unknown");
            return Alignment::Unknown;
        };
        if !SUPPORTED_STRIDES.contains(&stride) {
            log::debug!("alignment: stride {stride} not one of 1, 2, 3, returning unknown");
            return Alignment::Unknown;
        }

        // A parameter's base is only as aligned as the host promises. Any
        // other buffer is allocated by the compiler at the required alignment.
        let base_alignment = param.map_or(self.required_alignment, |p| {
            i64::from(p.host_alignment())
        });

        if base_alignment > 0 && base_alignment % self.required_alignment == 0 {
            if let Some(offset) = reduce_expr_modulo(base, native_lanes, &self.alignment_info) {
                log::debug!("alignment: aligned, offset {offset}");
                return Alignment::Aligned { offset };
            }
        } else {
            log::debug!(
                "alignment: buffer base alignment {} is not a multiple of {}",
                base_alignment,
                self.required_alignment
            );
        }
        log::debug!("alignment: unaligned");
        Alignment::Unaligned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinOp, Ident};

    const U8: ScalarType = ScalarType::UInt(8);
    const I32: ScalarType = ScalarType::Int(32);

    fn load(index: Expr, ty: ScalarType, param: Option<BufferParam>) -> Load {
        Load {
            buffer: Ident::new("buf"),
            ty,
            index: Box::new(index),
            param,
        }
    }

    fn ramp(base: Expr, stride: i64) -> Expr {
        Expr::ramp(base, Expr::int(stride), 32)
    }

    #[test]
    fn native_lane_count() {
        assert_eq!(native_lanes(128, U8), Ok(128));
        assert_eq!(native_lanes(128, I32), Ok(32));
        assert_eq!(
            native_lanes(0, U8),
            Err(AlignError::InvalidRequiredAlignment(0))
        );
        assert!(matches!(
            native_lanes(6, I32),
            Err(AlignError::ElementSizeMismatch { bytes: 4, .. })
        ));
    }

    #[test]
    fn rejects_non_positive_alignment() {
        assert!(AlignmentAnalyzer::standalone(0).is_err());
        assert!(AlignmentAnalyzer::standalone(-64).is_err());
    }

    #[test]
    fn element_size_mismatch_is_an_error() {
        let analyzer = AlignmentAnalyzer::standalone(6).expect("valid alignment");
        let l = load(ramp(Expr::int(0), 1), I32, None);
        assert!(analyzer.classify(&l).is_err());
    }

    #[test]
    fn internal_buffer_constant_base() {
        let analyzer = AlignmentAnalyzer::standalone(128).expect("valid alignment");
        let l = load(ramp(Expr::int(64), 1), I32, None);
        // 64 mod 32 lanes
        assert_eq!(analyzer.classify(&l), Ok(Alignment::Aligned { offset: 0 }));
        let l = load(ramp(Expr::int(70), 1), I32, None);
        assert_eq!(analyzer.classify(&l), Ok(Alignment::Aligned { offset: 6 }));
    }

    #[test]
    fn strides_two_and_three_are_handled() {
        let analyzer = AlignmentAnalyzer::standalone(128).expect("valid alignment");
        for stride in [2, 3] {
            let l = load(ramp(Expr::int(0), stride), I32, None);
            assert!(analyzer.classify(&l).expect("valid").is_aligned());
        }
    }

    #[test]
    fn negative_and_non_constant_strides_are_unknown() {
        let analyzer = AlignmentAnalyzer::standalone(128).expect("valid alignment");
        let l = load(ramp(Expr::int(0), -1), I32, None);
        assert_eq!(analyzer.classify(&l), Ok(Alignment::Unknown));
        let l = load(Expr::ramp(Expr::int(0), Expr::var("s"), 32), I32, None);
        assert_eq!(analyzer.classify(&l), Ok(Alignment::Unknown));
    }

    #[test]
    fn pushed_facts_drive_the_verdict() {
        let mut analyzer = AlignmentAnalyzer::standalone(128).expect("valid alignment");
        analyzer.push("x", &Expr::binary(BinOp::Mul, Expr::var("y"), Expr::int(64)));
        let l = load(ramp(Expr::var("x"), 1), U8, None);
        assert_eq!(analyzer.classify(&l), Ok(Alignment::Unaligned));

        analyzer.push("x", &Expr::binary(BinOp::Mul, Expr::var("y"), Expr::int(256)));
        assert_eq!(analyzer.classify(&l), Ok(Alignment::Aligned { offset: 0 }));

        analyzer.pop("x");
        assert_eq!(analyzer.classify(&l), Ok(Alignment::Unaligned));
    }

    #[test]
    fn enclosing_facts_are_visible() {
        let mut outer = Scope::new();
        outer.push("x", ModulusRemainder::new(32, 0));
        let analyzer = AlignmentAnalyzer::new(128, &outer).expect("valid alignment");
        let l = load(ramp(Expr::var("x"), 1), I32, None);
        assert_eq!(analyzer.classify(&l), Ok(Alignment::Aligned { offset: 0 }));
        assert_eq!(analyzer.fact("x"), ModulusRemainder::new(32, 0));
    }

    #[test]
    fn under_aligned_parameter_is_unaligned() {
        let analyzer = AlignmentAnalyzer::standalone(128).expect("valid alignment");
        let l = load(ramp(Expr::int(0), 1), I32, Some(BufferParam::new("buf", 64)));
        assert_eq!(analyzer.classify(&l), Ok(Alignment::Unaligned));
        let l = load(ramp(Expr::int(0), 1), I32, Some(BufferParam::new("buf", 0)));
        assert_eq!(analyzer.classify(&l), Ok(Alignment::Unaligned));
        let l = load(ramp(Expr::int(0), 1), I32, Some(BufferParam::new("buf", 256)));
        assert_eq!(analyzer.classify(&l), Ok(Alignment::Aligned { offset: 0 }));
    }

    #[test]
    fn stores_use_their_element_type() {
        let analyzer = AlignmentAnalyzer::standalone(128).expect("valid alignment");
        let store = Store {
            buffer: Ident::new("out"),
            ty: ScalarType::Int(16),
            index: ramp(Expr::int(96), 1),
            value: Expr::int(0),
            param: None,
        };
        // 64 lanes of i16; 96 mod 64
        assert_eq!(
            analyzer.classify_store(&store),
            Ok(Alignment::Aligned { offset: 32 })
        );
    }

    #[test]
    fn verdict_helpers() {
        assert_eq!(Alignment::Aligned { offset: 3 }.aligned_offset(), Some(3));
        assert!(!Alignment::Aligned { offset: 3 }.is_on_boundary());
        assert!(Alignment::Aligned { offset: 0 }.is_on_boundary());
        assert_eq!(Alignment::Unaligned.aligned_offset(), None);
        assert_eq!(Alignment::Unknown.to_string(), "unknown");
        assert_eq!(Alignment::Aligned { offset: 2 }.to_string(), "aligned offset=2");
    }
}
