pub mod collector;
pub mod command;
pub mod frontmatter;
pub mod ignore_rules;
pub mod installer;
pub mod loader;
pub mod lock;
pub mod manifest;
pub mod package_manager;
pub mod patterns;
pub mod progress;
pub mod prompts;
pub mod registry;
pub mod skills;
pub mod source;
pub mod source_identity;
pub mod themes;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;
