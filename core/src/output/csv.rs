//! Comma-separated output with a header row.

use spyglass_common::event::Event;

use crate::output::file::{FileOutput, LineFormat};

const COLUMNS: [&str; 7] = [
    "Event type",
    "Event data",
    "Host",
    "Source Module",
    "Scope Distance",
    "Event Tags",
    "Discovery Path",
];

pub struct CsvLines;

fn quote(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

impl LineFormat for CsvLines {
    fn file_name(&self) -> &'static str {
        "output.csv"
    }

    fn header(&self) -> Option<String> {
        Some(COLUMNS.join(","))
    }

    fn line(&self, event: &Event) -> String {
        let tags: Vec<&str> = event.tags.iter().map(String::as_str).collect();
        let fields = [
            event.event_type.to_string(),
            event.data.to_string(),
            event.host.as_ref().map(ToString::to_string).unwrap_or_default(),
            event.module.clone(),
            event.scope_distance.to_string(),
            tags.join(","),
            event.discovery_path.join(" --> "),
        ];
        fields.iter().map(|f| quote(f)).collect::<Vec<_>>().join(",")
    }
}

pub fn handler() -> FileOutput<CsvLines> {
    FileOutput::new(CsvLines)
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_only_when_needed() {
        assert_eq!(quote("plain"), "plain");
        assert_eq!(quote("a,b"), "\"a,b\"");
        assert_eq!(quote("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn row_matches_header_width() {
        let root = Event::root("test");
        let event = Event::new("OPEN_TCP_PORT", "evilcorp.com:443", &root, "portscan", "open")
            .unwrap()
            .with_tags(["https", "web"]);
        let line = CsvLines.line(&event);
        assert!(line.starts_with("OPEN_TCP_PORT,evilcorp.com:443,evilcorp.com,portscan,1,\"https,web\","));
        assert_eq!(CsvLines.header().unwrap().split(',').count(), 7);
    }
}
