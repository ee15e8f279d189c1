use tisnet_derive::Error;

/// Errors produced while parsing assembly source.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AsmError {
    /// Line does not match any rule of the instruction grammar.
    #[error("line {line}: '{text}' is not a valid instruction")]
    InvalidInstruction { line: usize, text: String },
    /// Jump references a label that no line declares.
    #[error("line {line}: label '{label}' was not declared")]
    UndeclaredLabel { line: usize, label: String },
    /// The same label is declared on more than one line.
    #[error("cannot repeat label '{0}'")]
    DuplicateLabel(String),
}
