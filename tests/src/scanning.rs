use std::collections::BTreeMap;
use std::time::Duration;

use spyglass_core::error::ScanError;
use spyglass_core::preset::Preset;
use spyglass_core::scanner::Scanner;
use spyglass_core::scanner::status::ScanStatus;

use crate::fixtures::{FAST_ENGINE, Workspace, catalog};

fn preset(body: &str) -> Preset {
    let config = FAST_ENGINE
        .lines()
        .map(|line| format!("  {line}"))
        .collect::<Vec<_>>()
        .join("\n");
    Preset::from_yaml(&format!("{body}\nconfig:\n{config}\n")).unwrap()
}

#[tokio::test]
async fn subdomain_scan_end_to_end() {
    let ws = Workspace::new();
    let baked = ws
        .resolver()
        .bake(&preset("name: e2e\ninclude: [subdomain-enum]\ntarget: [evilcorp.com]\noutput_modules: [python, csv, json]"))
        .unwrap();
    let out = ws.path("out");
    let mut scanner = Scanner::new(baked, catalog()).unwrap().with_output_dir(&out);

    let events = scanner.run().await.unwrap();

    let distances: BTreeMap<String, u32> = events
        .iter()
        .filter(|e| e.event_type.as_str() == "DNS_NAME")
        .map(|e| (e.data.to_string(), e.scope_distance))
        .collect();
    assert_eq!(
        distances,
        BTreeMap::from([
            ("api.evilcorp.com".to_string(), 0),
            ("evilcorp-mail.net".to_string(), 1),
            ("evilcorp.com".to_string(), 0),
        ])
    );

    let found = events.iter().find(|e| e.data.to_string() == "api.evilcorp.com").unwrap();
    assert_eq!(found.module, "subfinder");

    assert_eq!(scanner.status(), ScanStatus::Finished);
    assert!(scanner.control().history().contains(&ScanStatus::Finishing));

    let csv = std::fs::read_to_string(out.join("output.csv")).unwrap();
    let mut lines = csv.lines();
    assert!(lines.next().unwrap().starts_with("Event type,Event data"));
    assert_eq!(lines.count(), events.len());

    let json = std::fs::read_to_string(out.join("output.json")).unwrap();
    let types: Vec<String> = json
        .lines()
        .map(|line| serde_json::from_str::<serde_json::Value>(line).unwrap()["type"].to_string())
        .collect();
    assert_eq!(types.len(), events.len());

    let record = serde_json::to_value(scanner.record()).unwrap();
    assert_eq!(record["name"], "e2e");
    assert_eq!(record["status"], "FINISHED");
    assert_eq!(record["target"]["seeds"], serde_json::json!(["evilcorp.com"]));
    assert_eq!(record["preset"]["flags"], serde_json::json!(["subdomain-enum"]));
}

#[test]
fn conditions_refuse_to_scan() {
    let ws = Workspace::new();
    let baked = ws
        .resolver()
        .bake(&preset(
            "target: [evilcorp.com]\nflags: [active]\nconditions:\n  - \"{% if config.modules.subfinder.prefix == 'www' %}{{ warn('default prefix') }}{% endif %}\"\n  - \"{% if not config.allow_aggressive %}{{ abort('aggressive modules need allow_aggressive') }}{% endif %}\"",
        ))
        .unwrap();
    assert!(baked.is_aborting());
    assert_eq!(baked.warnings, vec!["default prefix".to_string()]);

    let err = Scanner::new(baked, catalog()).unwrap_err();
    assert!(matches!(err, ScanError::Aborted(ref e) if e.reason.contains("allow_aggressive")));
}

#[tokio::test]
async fn interrupt_from_another_task() {
    let ws = Workspace::new();
    let baked = ws
        .resolver()
        .bake(&preset("target: [10.0.0.0/24]\noutput_modules: [python]"))
        .unwrap();
    let mut scanner = Scanner::new(baked, catalog()).unwrap().with_output_dir(ws.path("out"));

    let control = scanner.control();
    let stopper = tokio::spawn(async move {
        while !control.interrupt() && !control.status().is_terminal() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    });

    let result = tokio::time::timeout(Duration::from_secs(10), scanner.run()).await;
    stopper.await.unwrap();
    assert!(result.is_ok(), "interrupted scan did not wind down");

    let history = scanner.control().history();
    assert!(history.contains(&ScanStatus::Aborting));
    assert_eq!(history.last(), Some(&ScanStatus::Finished));
    assert_eq!(scanner.control().abort_reason().as_deref(), Some("interrupted by user"));
}
