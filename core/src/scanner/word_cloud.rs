//! Counts the words that make up discovered DNS names.
//!
//! Only the manager's distribution step touches it, so it needs no locking.

use std::collections::HashMap;

use spyglass_common::event::Event;
use spyglass_common::network::host::Host;

#[derive(Debug, Default, Clone)]
pub struct WordCloud {
    words: HashMap<String, usize>,
}

impl WordCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the words of the event's host, if it has a DNS name.
    pub fn absorb_event(&mut self, event: &Event) {
        let Some(Host::Dns(name)) = &event.host else {
            return;
        };
        self.absorb_name(name);
    }

    /// Every label except the top-level domain, plus each label's
    /// `-`/`_` separated parts.
    pub fn absorb_name(&mut self, name: &str) {
        let labels: Vec<&str> = name.split('.').filter(|l| !l.is_empty()).collect();
        let Some((_tld, labels)) = labels.split_last() else {
            return;
        };
        for label in labels {
            self.add(label);
            let parts: Vec<&str> = label.split(['-', '_']).filter(|p| !p.is_empty()).collect();
            if parts.len() > 1 {
                for part in parts {
                    self.add(part);
                }
            }
        }
    }

    fn add(&mut self, word: &str) {
        if word.chars().all(|c| c.is_ascii_digit()) {
            return;
        }
        *self.words.entry(word.to_ascii_lowercase()).or_default() += 1;
    }

    pub fn count(&self, word: &str) -> usize {
        self.words.get(word).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// The `n` most common words, ties broken alphabetically.
    pub fn top(&self, n: usize) -> Vec<(String, usize)> {
        let mut words: Vec<(String, usize)> =
            self.words.iter().map(|(w, c)| (w.clone(), *c)).collect();
        words.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        words.truncate(n);
        words
    }
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
