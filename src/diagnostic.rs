use crate::span::Span;

/// An error found while reading a trace file.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub message: String,
    pub span: Span,
    pub notes: Vec<String>,
    pub help: Option<String>,
}

impl Diagnostic {
    pub fn error(message: String, span: Span) -> Self {
        Self {
            message,
            span,
            notes: Vec::new(),
            help: None,
        }
    }

    pub fn with_note(mut self, note: String) -> Self {
        self.notes.push(note);
        self
    }

    pub fn with_help(mut self, help: String) -> Self {
        self.help = Some(help);
        self
    }

    /// Render the diagnostic to stderr using ariadne.
    pub fn render(&self, filename: &str, source: &str) {
        use ariadne::{Color, Label, Report, ReportKind, Source};

        let range = self.span.start as usize..self.span.end as usize;
        let mut report = Report::build(ReportKind::Error, filename, range.start)
            .with_message(&self.message)
            .with_label(
                Label::new((filename, range))
                    .with_message(&self.message)
                    .with_color(Color::Red),
            );

        for note in &self.notes {
            report = report.with_note(note);
        }

        if let Some(help) = &self.help {
            report = report.with_help(help);
        }

        // stderr write failures are not actionable here
        let _ = report.finish().eprint((filename, Source::from(source)));
    }
}

/// Render a list of diagnostics.
pub fn render_diagnostics(diagnostics: &[Diagnostic], filename: &str, source: &str) {
    for diag in diagnostics {
        diag.render(filename, source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_construction() {
        let d = Diagnostic::error("expected 3 fields".to_string(), Span::new(10, 15));
        assert_eq!(d.message, "expected 3 fields");
        assert_eq!(d.span.start, 10);
        assert_eq!(d.span.end, 15);
        assert!(d.notes.is_empty());
        assert!(d.help.is_none());
    }

    #[test]
    fn test_chained_builders() {
        let d = Diagnostic::error("trailing data".to_string(), Span::new(0, 5))
            .with_note("note 1".to_string())
            .with_help("remove it".to_string())
            .with_note("note 2".to_string());
        assert_eq!(d.notes.len(), 2);
        assert_eq!(d.help.as_deref(), Some("remove it"));
    }

    #[test]
    fn test_render_does_not_panic() {
        let source = "#:\tx\ti\tpc\n0:\t2\t0\n";
        let diagnostics = vec![
            Diagnostic::error("expected 3 fields".to_string(), Span::new(11, 18))
                .with_note("found 2".to_string()),
            Diagnostic::error("short trace".to_string(), Span::new(0, 2)),
        ];
        render_diagnostics(&diagnostics, "trace.txt", source);
    }
}
