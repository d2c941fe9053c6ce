//! Human-readable text lines: `[TYPE]<tab>data<tab>module<tab>tags`.

use spyglass_common::event::Event;

use crate::output::file::{FileOutput, LineFormat};

pub struct TextLines;

impl LineFormat for TextLines {
    fn file_name(&self) -> &'static str {
        "output.txt"
    }

    fn line(&self, event: &Event) -> String {
        let tags: Vec<&str> = event.tags.iter().map(String::as_str).collect();
        format!(
            "[{}]\t{}\t{}\t{}",
            event.event_type,
            event.data,
            event.module,
            tags.join(",")
        )
    }
}

pub fn handler() -> FileOutput<TextLines> {
    FileOutput::new(TextLines)
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
    fn tab_separated_with_tags() {
        let root = Event::root("test");
        let event = Event::new("DNS_NAME", "www.evilcorp.com", &root, "subdomains", "found")
            .unwrap()
            .with_tags(["subdomain", "a-record"]);
        assert_eq!(
            TextLines.line(&event),
            "[DNS_NAME]\twww.evilcorp.com\tsubdomains\ta-record,subdomain"
        );
    }
}
