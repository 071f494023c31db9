use std::collections::HashMap;
use std::path::PathBuf;

use crate::extensions::types::LoadedExtension;

/// A registration clashing with a name already claimed by an earlier extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionConflict {
    /// The excluded extension.
    pub path: PathBuf,
    /// `tool`, `command` or `flag`.
    pub kind: &'static str,
    pub name: String,
    /// The extension that keeps the name.
    pub owner: PathBuf,
}

impl ExtensionConflict {
    pub fn message(&self) -> String {
        format!(
            "{} '{}' conflicts with {}",
            self.kind,
            self.name,
            self.owner.display()
        )
    }
}

/// Drop every extension that re-registers a claimed tool, command or flag name.
///
/// Names are claimed in load order, and only by extensions that are kept. A rejected
/// extension is excluded entirely and reported once, for its first conflicting name.
pub fn detect_extension_conflicts(
    extensions: Vec<LoadedExtension>,
) -> (Vec<LoadedExtension>, Vec<ExtensionConflict>) {
    let mut tool_owners = HashMap::<String, PathBuf>::new();
    let mut command_owners = HashMap::<String, PathBuf>::new();
    let mut flag_owners = HashMap::<String, PathBuf>::new();
    let mut accepted = Vec::new();
    let mut conflicts = Vec::new();

    for extension in extensions {
        let conflict = [
            ("tool", &extension.tools, &tool_owners),
            ("command", &extension.commands, &command_owners),
            ("flag", &extension.flags, &flag_owners),
        ]
        .into_iter()
        .find_map(|(kind, names, owners)| {
            names.iter().find_map(|name| {
                owners.get(name).map(|owner| ExtensionConflict {
                    path: extension.path.clone(),
                    kind,
                    name: name.clone(),
                    owner: owner.clone(),
                })
            })
        });

        if let Some(conflict) = conflict {
            tracing::warn!(
                "Excluding extension {}: {}",
                conflict.path.display(),
                conflict.message()
            );
            conflicts.push(conflict);
            continue;
        }

        for name in &extension.tools {
            tool_owners.insert(name.clone(), extension.path.clone());
        }
        for name in &extension.commands {
            command_owners.insert(name.clone(), extension.path.clone());
        }
        for name in &extension.flags {
            flag_owners.insert(name.clone(), extension.path.clone());
        }
        accepted.push(extension);
    }

    (accepted, conflicts)
}
