//! Command-line argument override source.

/// Command-line argument override source.
///
/// Holds the argument tokens after the program name. Only `--key=value`
/// tokens contribute to a snapshot; everything else is ignored at merge time.
#[derive(Debug, Clone, Default)]
pub struct ArgsSource {
    tokens: Vec<String>,
}

impl ArgsSource {
    /// A source that contributes nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Capture the process arguments, skipping the program name.
    pub fn from_process() -> Self {
        Self {
            tokens: std::env::args_os()
                .skip(1)
                .filter_map(|arg| arg.into_string().ok())
                .collect(),
        }
    }

    /// Use explicit tokens instead of the process arguments.
    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
        }
    }

    /// The captured tokens.
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Get a human-readable name for this source (for logging/debugging).
    pub fn name(&self) -> String {
        "args".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_tokens() {
        let source = ArgsSource::from_tokens(["--a=1", "b"]);
        assert_eq!(source.tokens(), &["--a=1".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_from_process_skips_program_name() {
        let source = ArgsSource::from_process();
        assert_eq!(source.tokens().len(), std::env::args().count() - 1);
    }
}
