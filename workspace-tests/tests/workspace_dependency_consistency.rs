use proptest::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Property test for workspace dependency consistency
///
/// For any crate in the workspace that uses a shared dependency,
/// the dependency should be declared with `workspace = true` to inherit
/// the version from the root workspace configuration.
#[cfg(test)]
mod workspace_dependency_tests {
    use super::*;

    // The shared dependencies defined in the root Cargo.toml
    fn get_workspace_dependencies() -> HashMap<String, bool> {
        let mut deps = HashMap::new();
        deps.insert("tokio".to_string(), true);
        deps.insert("tokio-util".to_string(), true);
        deps.insert("futures-util".to_string(), true);
        deps.insert("axum".to_string(), true);
        deps.insert("tower-http".to_string(), true);
        deps.insert("reqwest".to_string(), true);
        deps.insert("tokio-tungstenite".to_string(), true);
        deps.insert("kube".to_string(), true);
        deps.insert("k8s-openapi".to_string(), true);
        deps.insert("schemars".to_string(), true);
        deps.insert("serde".to_string(), true);
        deps.insert("serde_json".to_string(), true);
        deps.insert("chrono".to_string(), true);
        deps.insert("thiserror".to_string(), true);
        deps.insert("anyhow".to_string(), true);
        deps.insert("tracing".to_string(), true);
        deps.insert("tracing-subscriber".to_string(), true);
        deps.insert("uuid".to_string(), true);
        deps.insert("clap".to_string(), true);
        deps.insert("async-trait".to_string(), true);
        deps.insert("base64".to_string(), true);
        deps.insert("humantime".to_string(), true);
        deps.insert("proptest".to_string(), true);
        deps.insert("tempfile".to_string(), true);
        deps
    }

    // Helper function to parse a Cargo.toml file and extract dependencies
    fn parse_cargo_toml_dependencies(content: &str) -> HashMap<String, bool> {
        let mut dependencies = HashMap::new();
        let mut in_dependencies_section = false;

        for line in content.lines() {
            let line = line.trim();

            if line == "[dependencies]"
                || line == "[dev-dependencies]"
                || line == "[build-dependencies]"
            {
                in_dependencies_section = true;
                continue;
            }

            if line.starts_with('[')
                && line.ends_with(']')
                && line != "[dependencies]"
                && line != "[dev-dependencies]"
                && line != "[build-dependencies]"
            {
                in_dependencies_section = false;
                continue;
            }

            if in_dependencies_section && !line.is_empty() && !line.starts_with('#') {
                if let Some(eq_pos) = line.find('=') {
                    let dep_name = line[..eq_pos].trim().to_string();
                    let dep_value = line[eq_pos + 1..].trim();

                    let uses_workspace = dep_value.contains("workspace = true");
                    dependencies.insert(dep_name, uses_workspace);
                }
            }
        }

        dependencies
    }

    proptest! {
        #[test]
        fn test_workspace_dependency_consistency(
            crate_name in prop::sample::select(vec![
                "browserkube-common",
                "operator",
                "backend",
                "sidecar",
                "workspace-tests",
            ])
        ) {
            let cargo_toml_path = format!("../{}/Cargo.toml", crate_name);

            if !Path::new(&cargo_toml_path).exists() {
                return Ok(());
            }

            let cargo_toml_content = fs::read_to_string(&cargo_toml_path)
                .map_err(|e| proptest::test_runner::TestCaseError::fail(
                    format!("Failed to read {}: {}", cargo_toml_path, e)
                ))?;

            let workspace_deps = get_workspace_dependencies();
            let crate_deps = parse_cargo_toml_dependencies(&cargo_toml_content);

            // For any dependency that exists in both workspace and crate,
            // the crate should use workspace = true
            for (dep_name, _) in &workspace_deps {
                if let Some(&uses_workspace) = crate_deps.get(dep_name) {
                    prop_assert!(
                        uses_workspace,
                        "Crate '{}' uses dependency '{}' but does not inherit from workspace (missing 'workspace = true')",
                        crate_name,
                        dep_name
                    );
                }
            }
        }
    }

    #[test]
    fn test_workspace_dependency_consistency_unit() {
        // Unit test to verify the property with a concrete example
        let good_cargo_toml = r#"
[package]
name = "test-crate"
version.workspace = true
edition.workspace = true

[dependencies]
tokio = { workspace = true }
kube = { workspace = true }
"#;

        let parsed_deps = parse_cargo_toml_dependencies(good_cargo_toml);

        assert!(parsed_deps.get("tokio").copied().unwrap_or(false));
        assert!(parsed_deps.get("kube").copied().unwrap_or(false));

        let bad_cargo_toml = r#"
[package]
name = "test-crate"
version.workspace = true
edition.workspace = true

[dependencies]
tokio = "1.0"
kube = { workspace = true }
"#;

        let parsed_deps_bad = parse_cargo_toml_dependencies(bad_cargo_toml);

        assert!(!parsed_deps_bad.get("tokio").copied().unwrap_or(false));
        assert!(parsed_deps_bad.get("kube").copied().unwrap_or(false));
    }
}
