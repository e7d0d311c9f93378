// valign: alignment proofs for Hexagon HVX vector loads and stores
//
// Library root. Front end (lexer, parser), IR, and the analysis passes.

pub mod align;
pub mod analyze;
pub mod diag;
pub mod eval;
pub mod ir;
pub mod lexer;
pub mod modulus;
pub mod parser;
pub mod pass;
pub mod pipeline;
pub mod program_query;
pub mod resolve;
pub mod scope;
pub mod uniquify;
