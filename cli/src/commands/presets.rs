use colored::*;

use spyglass_core::preset::loader::PresetLoader;

use crate::commands::PresetsArgs;
use crate::terminal::print;

pub fn presets(args: &PresetsArgs) -> anyhow::Result<()> {
    let loader = PresetLoader::new(args.preset_dir.iter().cloned());
    let presets = loader.list();
    if presets.is_empty() {
        print::no_results("presets");
        return Ok(());
    }

    for (idx, preset) in presets.iter().enumerate() {
        print::tree_head(idx + 1, &preset.name);
        let mut details = vec![("path".to_string(), preset.path.display().to_string())];
        if let Some(description) = &preset.description {
            details.push(("about".to_string(), description.clone()));
        }
        print::as_tree_one_level(&details);
    }
    print::fat_separator();
    print::aligned_line("Presets", presets.len().to_string().green().bold(), 8);
    Ok(())
}
