//! Diagnostic rendering.
//!
//! Turns a [`LowerError`] into an `ariadne` report for the driver to print.

use ariadne::{Color, Label, Report, ReportKind, Source};

use crate::error::{LowerError, LowerErrorKind};

fn error_code(kind: LowerErrorKind) -> &'static str {
    match kind {
        LowerErrorKind::StrictWith => "E0501",
        LowerErrorKind::StrictDelete => "E0502",
        LowerErrorKind::StrictDuplicateParam => "E0503",
        LowerErrorKind::UnresolvedBreak => "E0504",
        LowerErrorKind::UnresolvedContinue => "E0505",
        LowerErrorKind::ReturnOutsideFunction => "E0506",
        LowerErrorKind::CacheIdExhausted => "E0507",
    }
}

/// Builds a labelled report for a lowering diagnostic.
pub fn build_report<'a>(
    error: &LowerError,
    filename: &'a str,
) -> Report<'a, (&'a str, std::ops::Range<usize>)> {
    let span = (filename, error.span.start..error.span.end.max(error.span.start + 1));
    Report::build(ReportKind::Error, span.clone())
        .with_code(error_code(error.kind))
        .with_message("compile error")
        .with_label(
            Label::new(span)
                .with_message(error.message.clone())
                .with_color(Color::Red),
        )
        .finish()
}

/// Renders a lowering diagnostic against its source text and prints it to
/// stderr.
pub fn print_report(error: &LowerError, filename: &str, source: &str) -> std::io::Result<()> {
    build_report(error, filename).eprint((filename, Source::from(source)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use norn_ast::Span;

    #[test]
    fn test_build_report() {
        let error = LowerError::new(
            LowerErrorKind::StrictWith,
            "strict mode code may not include a with statement",
            Span::new(5, 9, 0),
        );
        // Rendering into a buffer must succeed.
        let report = build_report(&error, "test.js");
        let mut out = Vec::new();
        report
            .write(("test.js", Source::from("use\nwith (o) {}\n")), &mut out)
            .unwrap();
        assert!(!out.is_empty());
    }
}
