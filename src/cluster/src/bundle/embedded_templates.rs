//! Manifest templates compiled into the binary via `include_str!`, so the
//! generator works when only the executable is installed.

pub const BUNDLE_YAML: &str = include_str!("templates/bundle.yaml.j2");

/// Template name of the cluster manifest.
pub const BUNDLE_TEMPLATE: &str = "bundle.yaml.j2";

/// All embedded templates as (name, content) pairs for registration with Tera.
pub const ALL_TEMPLATES: &[(&str, &str)] = &[(BUNDLE_TEMPLATE, BUNDLE_YAML)];
