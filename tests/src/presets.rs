use std::collections::BTreeSet;

use spyglass_common::config;
use spyglass_core::error::ResolutionError;
use spyglass_core::modules::registry::ModuleRegistry;
use spyglass_core::preset::Preset;

use crate::fixtures::Workspace;

fn names(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn presets_on_disk_resolve_by_name() {
    let ws = Workspace::new();
    let preset = Preset::from_yaml("include: [kitchen-sink]\ntarget: [evilcorp.com]\n").unwrap();
    let baked = ws.resolver().bake(&preset).unwrap();

    assert_eq!(baked.scan_modules, names(&["portscan", "subfinder"]));
    assert_eq!(baked.output_modules, names(&["csv", "json", "python", "txt"]));
    assert!(baked.internal_modules.contains("speculate"));

    // Descriptor default, overridden by the included preset.
    assert_eq!(
        config::lookup(&baked.config, "modules.subfinder.prefix").and_then(|v| v.as_str()),
        Some("api")
    );
    assert!(baked.preset.include.is_empty());
}

#[test]
fn command_line_layer_wins_over_included_presets() {
    let ws = Workspace::new();
    let preset = Preset::from_yaml(
        "include: [subdomain-enum]\nconfig:\n  modules:\n    subfinder:\n      prefix: dev\n",
    )
    .unwrap();
    let baked = ws.resolver().bake(&preset).unwrap();
    assert_eq!(
        config::lookup(&baked.config, "modules.subfinder.prefix").and_then(|v| v.as_str()),
        Some("dev")
    );
}

#[test]
fn cyclic_includes_terminate() {
    let ws = Workspace::new();
    let preset = Preset::from_file(&ws.path("presets/loop/a.yml")).unwrap();
    let baked = ws.resolver().bake(&preset).unwrap();
    assert_eq!(config::lookup_u64(&baked.config, "a", 0), 1);
    assert_eq!(config::lookup_u64(&baked.config, "b", 0), 1);
}

#[test]
fn missing_presets_are_resolution_errors() {
    let ws = Workspace::new();
    let preset = Preset::from_yaml("include: [nope]\n").unwrap();
    let err = ws.resolver().bake(&preset).unwrap_err();
    assert!(matches!(err, ResolutionError::PresetNotFound(ref name) if name == "nope"));
}

#[test]
fn preset_listing_reads_descriptions() {
    let ws = Workspace::new();
    let resolver = ws.resolver();
    let listed = resolver.loader().list();
    let found: Vec<(&str, Option<&str>)> = listed
        .iter()
        .map(|p| (p.name.as_str(), p.description.as_deref()))
        .collect();
    assert_eq!(
        found,
        vec![
            ("a", None),
            ("b", None),
            ("kitchen-sink", Some("Everything")),
            ("subdomain-enum", Some("Enumerate subdomains")),
        ]
    );
}

#[test]
fn scope_follows_the_baked_target() {
    let ws = Workspace::new();
    let resolver = ws.resolver();

    let loose = resolver
        .bake(&Preset::from_yaml("target: [evilcorp.com]\nblacklist: [dev.evilcorp.com]\n").unwrap())
        .unwrap();
    assert!(loose.target.in_scope("www.evilcorp.com"));
    assert!(!loose.target.in_scope("api.dev.evilcorp.com"));

    let strict = resolver
        .bake(&Preset::from_yaml("target: [evilcorp.com]\nstrict_scope: true\n").unwrap())
        .unwrap();
    assert!(strict.target.in_scope("evilcorp.com"));
    assert!(!strict.target.in_scope("www.evilcorp.com"));

    let cidr = resolver
        .bake(&Preset::from_yaml("target: [evilcorp.com]\nwhitelist: [1.2.3.0/28]\n").unwrap())
        .unwrap();
    assert!(cidr.target.in_scope("1.2.3.4"));
    assert!(!cidr.target.in_scope("evilcorp.com"));
}

#[test]
fn expanded_presets_round_trip_through_yaml() {
    let ws = Workspace::new();
    let preset = Preset::from_yaml("include: [kitchen-sink]\ntarget: [evilcorp.com]\nexclude_modules: [portscan]\n").unwrap();
    let baked = ws.resolver().bake(&preset).unwrap();

    let yaml = baked.preset.to_yaml().unwrap();
    let reread = Preset::from_yaml(&yaml).unwrap();
    assert_eq!(reread.target, baked.preset.target);
    assert_eq!(reread.flags, baked.preset.flags);
    assert_eq!(reread.exclude_modules, baked.preset.exclude_modules);
    assert_eq!(reread.config, baked.preset.config);
}

fn fresh_registry(ws: &Workspace) -> ModuleRegistry {
    let registry = ModuleRegistry::with_cache(ws.path("cache/modules.json"));
    registry.add_module_dir(ws.path("modules"));
    registry
}

#[test]
fn descriptor_cache_is_reused_until_files_change() {
    let ws = Workspace::new();
    let before = ws.resolver().registry().preloaded();
    assert!(before.contains_key("portscan"));

    // Mark the cached copy so a cache hit can be told apart from a rescan.
    let cache_path = ws.path("cache/modules.json");
    let mut artifact: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&cache_path).unwrap()).unwrap();
    artifact["descriptors"]["subfinder"]["description"] = "from cache".into();
    std::fs::write(&cache_path, serde_json::to_vec(&artifact).unwrap()).unwrap();

    let cached = fresh_registry(&ws).preloaded();
    assert_eq!(cached["subfinder"].description, "from cache");

    std::fs::remove_file(ws.path("modules/portscan.yml")).unwrap();
    let rescanned = fresh_registry(&ws).preloaded();
    assert!(!rescanned.contains_key("portscan"));
    assert_eq!(rescanned["subfinder"].description, "Guesses one subdomain per target");
}
