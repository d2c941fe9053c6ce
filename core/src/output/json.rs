//! Newline-delimited JSON, one event object per line.

use spyglass_common::event::Event;

use crate::output::file::{FileOutput, LineFormat};

pub struct JsonLines;

impl LineFormat for JsonLines {
    fn file_name(&self) -> &'static str {
        "output.json"
    }

    fn line(&self, event: &Event) -> String {
        event.to_json().to_string()
    }
}

pub fn handler() -> FileOutput<JsonLines> {
    FileOutput::new(JsonLines)
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
