//! Compilation settings chosen by the caller.

use inkwell::targets::FileType;
use inkwell::OptimizationLevel;

use crate::error::{CompileError, CompileResult};

/// What the backend writes out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputKind {
    /// Textual target assembly, `<output>.s`.
    Assembly,
    /// A relocatable object, linked into an executable afterwards.
    #[default]
    Object,
}

impl OutputKind {
    pub fn file_type(self) -> FileType {
        match self {
            OutputKind::Assembly => FileType::Assembly,
            OutputKind::Object => FileType::Object,
        }
    }
}

/// Backend optimisation level, 0 through 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OptLevel(u8);

impl OptLevel {
    pub const MAX: u8 = 3;

    pub fn new(level: u8) -> CompileResult<Self> {
        if level > Self::MAX {
            return Err(CompileError::OptLevel(level));
        }
        Ok(Self(level))
    }

    pub fn level(self) -> u8 {
        self.0
    }

    pub fn llvm(self) -> OptimizationLevel {
        match self.0 {
            0 => OptimizationLevel::None,
            1 => OptimizationLevel::Less,
            2 => OptimizationLevel::Default,
            _ => OptimizationLevel::Aggressive,
        }
    }

    /// New pass manager pipeline, `None` when no passes should run.
    pub fn pipeline(self) -> Option<String> {
        (self.0 > 0).then(|| format!("default<O{}>", self.0))
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    pub output: OutputKind,
    pub opt_level: OptLevel,
    /// Target triple; the host's when unset.
    pub triple: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_above_three_are_rejected() {
        assert!(matches!(OptLevel::new(4), Err(CompileError::OptLevel(4))));
        assert_eq!(
            OptLevel::new(9).unwrap_err().to_string(),
            "optimization level must be between 0 and 3, got 9"
        );
    }

    #[test]
    fn pipelines_follow_the_level() {
        assert_eq!(OptLevel::new(0).unwrap().pipeline(), None);
        assert_eq!(OptLevel::new(2).unwrap().pipeline().as_deref(), Some("default<O2>"));
        assert_eq!(OptLevel::new(3).unwrap().llvm(), OptimizationLevel::Aggressive);
    }

    #[test]
    fn defaults_build_an_unoptimised_executable() {
        let options = CompileOptions::default();
        assert_eq!(options.output, OutputKind::Object);
        assert_eq!(options.opt_level.level(), 0);
        assert!(options.triple.is_none());
    }
}
