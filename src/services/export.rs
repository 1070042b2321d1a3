use time::OffsetDateTime;

use crate::core::time::{format_compact, format_human};
use crate::tasks::TaskSnapshot;

const HEADER_RULE: usize = 50;
const SECTION_RULE: usize = 30;

/// Plain-text download of a finished task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TextExport {
    pub(crate) filename: String,
    pub(crate) body: String,
}

pub(crate) fn render(snapshot: &TaskSnapshot, generated_at: OffsetDateTime) -> TextExport {
    let mut lines = vec![
        format!("OCR Results - Generated on {}", format_human(generated_at)),
        "=".repeat(HEADER_RULE),
        String::new(),
    ];

    for (index, result) in snapshot.results.iter().enumerate() {
        lines.push(format!("File {}: {}", index + 1, result.filename));
        lines.push("-".repeat(SECTION_RULE));
        // Empty sections keep the reason so the reader can tell a blank page
        // from a failed one.
        match (&result.note, result.text.is_empty()) {
            (Some(note), true) => lines.push(format!("[{note}]")),
            _ => lines.push(result.text.clone()),
        }
        lines.push(String::new());
    }

    TextExport {
        filename: format!("ocr_results_{}_{}.txt", snapshot.id, format_compact(generated_at)),
        body: lines.join("\n"),
    }
}
