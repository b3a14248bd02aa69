pub mod pseudo;
pub mod scanner;
pub mod translator;

pub use pseudo::{recognize, PseudoCommand};
pub use scanner::{LiteralMap, Scanner, Span};
pub use translator::translate;
