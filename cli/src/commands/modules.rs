use std::collections::BTreeMap;

use colored::*;
use tracing::warn;

use spyglass_core::modules::descriptor::ModuleDescriptor;
use spyglass_core::modules::registry::ModuleRegistry;

use crate::commands::ModulesArgs;
use crate::terminal::print;

/// Descriptors carrying any of `flags`, or all of them when no flag is given.
pub fn filter_by_flags(
    descriptors: BTreeMap<String, ModuleDescriptor>,
    flags: &[String],
) -> Vec<ModuleDescriptor> {
    descriptors
        .into_values()
        .filter(|d| flags.is_empty() || flags.iter().any(|flag| d.has_flag(flag)))
        .collect()
}

pub fn modules(args: &ModulesArgs) -> anyhow::Result<()> {
    let registry = ModuleRegistry::new();
    let descriptors = registry.preload(&args.module_dir);
    for error in registry.errors() {
        warn!("{error}");
    }

    let selected = filter_by_flags(descriptors, &args.flags);
    if selected.is_empty() {
        print::no_results("modules");
        return Ok(());
    }

    for (idx, descriptor) in selected.iter().enumerate() {
        print::tree_head(idx + 1, &descriptor.name);
        let flags: Vec<&str> = descriptor.flags.iter().map(String::as_str).collect();
        let mut details = vec![
            ("kind".to_string(), descriptor.kind.to_string().yellow().to_string()),
            ("flags".to_string(), flags.join(", ")),
        ];
        if !descriptor.description.is_empty() {
            details.push(("about".to_string(), descriptor.description.clone()));
        }
        print::as_tree_one_level(&details);
    }
    print::fat_separator();
    print::aligned_line("Modules", selected.len().to_string().green().bold(), 8);
    Ok(())
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
    use spyglass_core::modules::descriptor::ModuleKind;

    #[test]
    fn flag_filter() {
        let mut descriptors = BTreeMap::new();
        for descriptor in [
            ModuleDescriptor::new("a", ModuleKind::Scan).with_flags(["passive"]),
            ModuleDescriptor::new("b", ModuleKind::Scan).with_flags(["active", "aggressive"]),
            ModuleDescriptor::new("c", ModuleKind::Output),
        ] {
            descriptors.insert(descriptor.name.clone(), descriptor);
        }

        let names = |flags: &[&str]| -> Vec<String> {
            let flags: Vec<String> = flags.iter().map(|f| f.to_string()).collect();
            filter_by_flags(descriptors.clone(), &flags)
                .into_iter()
                .map(|d| d.name)
                .collect()
        };
        assert_eq!(names(&[]), vec!["a", "b", "c"]);
        assert_eq!(names(&["passive", "aggressive"]), vec!["a", "b"]);
        assert!(names(&["nope"]).is_empty());
    }
}
