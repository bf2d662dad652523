//! Page-rendering options for a single conversion.
//!
//! Out of scope per the design brief ("PDF-options data class … a plain
//! value object"): this is a thin, immutable value passed through to
//! `Page.printToPDF` unchanged, with no behavior of its own.

/// Options forwarded verbatim to the `Page.printToPDF` CDP command.
///
/// Every field is always sent (§6): defaults below match Chrome's own
/// `Page.printToPDF` defaults, not arbitrary choices.
#[derive(Debug, Clone, PartialEq)]
pub struct PdfOptions {
    pub landscape: bool,
    pub print_background: bool,
    pub scale: f64,
    pub paper_width: f64,
    pub paper_height: f64,
    pub margin_top: f64,
    pub margin_bottom: f64,
    pub margin_left: f64,
    pub margin_right: f64,
    pub page_ranges: String,
    pub prefer_css_page_size: bool,
}

impl Default for PdfOptions {
    fn default() -> Self {
        Self {
            landscape: false,
            print_background: true,
            scale: 1.0,
            paper_width: 8.5,
            paper_height: 11.0,
            margin_top: 0.4,
            margin_bottom: 0.4,
            margin_left: 0.4,
            margin_right: 0.4,
            page_ranges: String::new(),
            prefer_css_page_size: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let opts = PdfOptions::default();
        assert!(!opts.landscape);
        assert!(opts.print_background);
        assert!((opts.scale - 1.0).abs() < f64::EPSILON);
        assert!((opts.paper_width - 8.5).abs() < f64::EPSILON);
        assert!((opts.paper_height - 11.0).abs() < f64::EPSILON);
        assert!((opts.margin_top - 0.4).abs() < f64::EPSILON);
        assert!((opts.margin_bottom - 0.4).abs() < f64::EPSILON);
        assert!((opts.margin_left - 0.4).abs() < f64::EPSILON);
        assert!((opts.margin_right - 0.4).abs() < f64::EPSILON);
        assert_eq!(opts.page_ranges, "");
        assert!(!opts.prefer_css_page_size);
    }
}
