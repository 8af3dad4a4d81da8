//! Rule layer: the typed rule model (C4), a tolerant loader, and the
//! condition evaluator (C5).

pub mod model;

mod evaluator;
mod loader;

pub use evaluator::{evaluate, evaluate_parallel, EvaluationDiagnostic, EvaluationOutput, Verdict, VerdictStatus};
pub use loader::{load, merge, LoadOutcome, RuleRejection};
pub use model::{Catalogue, Comparator, ExplanationTemplates, FilterPredicate, Provenance, Rule, Severity, ValueSource};
