use std::fs;
use std::path::Path;

/// Unit tests for workspace configuration validation
///
/// Tests that validate the workspace structure, crate configurations,
/// and dependency requirements.
#[cfg(test)]
mod workspace_configuration_tests {
    use super::*;

    /// Test that root Cargo.toml contains all expected member crates
    #[test]
    fn test_root_cargo_toml_contains_expected_members() {
        let root_cargo_path = "../Cargo.toml";
        assert!(
            Path::new(root_cargo_path).exists(),
            "Root Cargo.toml should exist"
        );

        let cargo_content =
            fs::read_to_string(root_cargo_path).expect("Should be able to read root Cargo.toml");

        let expected_members = vec![
            "browserkube-common",
            "operator",
            "backend",
            "sidecar",
            "workspace-tests",
        ];

        assert!(
            cargo_content.contains("[workspace]"),
            "Root Cargo.toml should contain [workspace] section"
        );

        assert!(
            cargo_content.contains("members = ["),
            "Root Cargo.toml should contain members array"
        );

        for member in expected_members {
            assert!(
                cargo_content.contains(&format!("\"{}\"", member)),
                "Root Cargo.toml should contain member: {}",
                member
            );
        }

        assert!(
            cargo_content.contains("resolver = \"2\""),
            "Root Cargo.toml should use resolver version 2"
        );
    }

    /// Test that each crate type is configured correctly
    #[test]
    fn test_crate_types_configured_correctly() {
        // browserkube-common is the shared library crate
        test_library_crate_configuration("browserkube-common");

        // The three services carry both a library and a binary target
        test_library_with_binary_crate_configuration("operator");
        test_library_with_binary_crate_configuration("backend");
        test_library_with_binary_crate_configuration("sidecar");
    }

    fn test_library_crate_configuration(crate_name: &str) {
        let cargo_path = format!("../{}/Cargo.toml", crate_name);
        let src_lib_path = format!("../{}/src/lib.rs", crate_name);

        assert!(
            Path::new(&cargo_path).exists(),
            "Crate {} should have Cargo.toml",
            crate_name
        );

        assert!(
            Path::new(&src_lib_path).exists(),
            "Library crate {} should have src/lib.rs",
            crate_name
        );

        let cargo_content = fs::read_to_string(&cargo_path)
            .expect(&format!("Should be able to read {}/Cargo.toml", crate_name));

        assert!(
            cargo_content.contains("[package]"),
            "Crate {} should have [package] section",
            crate_name
        );

        assert!(
            cargo_content.contains(&format!("name = \"{}\"", crate_name)),
            "Crate {} should have correct name in Cargo.toml",
            crate_name
        );
    }

    fn test_library_with_binary_crate_configuration(crate_name: &str) {
        let cargo_path = format!("../{}/Cargo.toml", crate_name);
        let src_lib_path = format!("../{}/src/lib.rs", crate_name);
        let src_main_path = format!("../{}/src/main.rs", crate_name);

        assert!(
            Path::new(&cargo_path).exists(),
            "Crate {} should have Cargo.toml",
            crate_name
        );

        assert!(
            Path::new(&src_lib_path).exists(),
            "Library crate {} should have src/lib.rs",
            crate_name
        );

        assert!(
            Path::new(&src_main_path).exists(),
            "Binary crate {} should have src/main.rs",
            crate_name
        );

        let cargo_content = fs::read_to_string(&cargo_path)
            .expect(&format!("Should be able to read {}/Cargo.toml", crate_name));

        assert!(
            cargo_content.contains("[lib]"),
            "Crate {} should have [lib] section",
            crate_name
        );

        assert!(
            cargo_content.contains("[[bin]]"),
            "Crate {} should have [[bin]] section",
            crate_name
        );

        // Service binaries carry the browserkube- prefix
        assert!(
            cargo_content.contains(&format!("name = \"browserkube-{}\"", crate_name)),
            "Crate {} should ship a browserkube-{} binary",
            crate_name,
            crate_name
        );
    }

    /// Test that all required dependencies are present in each crate
    #[test]
    fn test_required_dependencies_present() {
        test_common_dependencies();
        test_operator_dependencies();
        test_backend_dependencies();
        test_sidecar_dependencies();
    }

    fn test_common_dependencies() {
        let cargo_content = fs::read_to_string("../browserkube-common/Cargo.toml")
            .expect("Should be able to read browserkube-common/Cargo.toml");

        // The CRD types, capability model and ws proxy live here
        let required_deps = vec![
            "kube",
            "k8s-openapi",
            "schemars",
            "serde",
            "axum",
            "tokio-tungstenite",
            "uuid",
        ];

        for dep in required_deps {
            assert!(
                cargo_content.contains(&format!("{} = {{ workspace = true", dep)),
                "browserkube-common should inherit {} from workspace",
                dep
            );
        }
    }

    fn test_operator_dependencies() {
        let cargo_content = fs::read_to_string("../operator/Cargo.toml")
            .expect("Should be able to read operator/Cargo.toml");

        assert!(
            cargo_content.contains("browserkube-common = { path = \"../browserkube-common\" }"),
            "operator should depend on the browserkube-common library"
        );

        let required_deps = vec!["kube", "k8s-openapi", "tokio", "clap"];
        for dep in required_deps {
            assert!(
                cargo_content.contains(&format!("{} = {{ workspace = true", dep)),
                "operator should have {} dependency with workspace inheritance",
                dep
            );
        }
    }

    fn test_backend_dependencies() {
        let cargo_content = fs::read_to_string("../backend/Cargo.toml")
            .expect("Should be able to read backend/Cargo.toml");

        assert!(
            cargo_content.contains("browserkube-common = { path = \"../browserkube-common\" }"),
            "backend should depend on the browserkube-common library"
        );

        // The backend both serves HTTP and dials the sidecars
        let required_deps = vec!["axum", "tower-http", "reqwest", "kube", "tokio"];
        for dep in required_deps {
            assert!(
                cargo_content.contains(&format!("{} = {{ workspace = true", dep)),
                "backend should have {} dependency with workspace inheritance",
                dep
            );
        }
    }

    fn test_sidecar_dependencies() {
        let cargo_content = fs::read_to_string("../sidecar/Cargo.toml")
            .expect("Should be able to read sidecar/Cargo.toml");

        assert!(
            cargo_content.contains("browserkube-common = { path = \"../browserkube-common\" }"),
            "sidecar should depend on the browserkube-common library"
        );

        let required_deps = vec!["axum", "tower-http", "reqwest", "tokio", "humantime"];
        for dep in required_deps {
            assert!(
                cargo_content.contains(&format!("{} = {{ workspace = true", dep)),
                "sidecar should have {} dependency with workspace inheritance",
                dep
            );
        }

        // The sidecar talks only to its own pod, never to the cluster API
        assert!(
            !cargo_content.contains("kube ="),
            "sidecar should not depend on the kube client"
        );
    }

    /// Test workspace-level dependency definitions
    #[test]
    fn test_workspace_dependency_definitions() {
        let root_cargo_content =
            fs::read_to_string("../Cargo.toml").expect("Should be able to read root Cargo.toml");

        assert!(
            root_cargo_content.contains("[workspace.dependencies]"),
            "Root Cargo.toml should have [workspace.dependencies] section"
        );

        let required_workspace_deps = vec![
            "tokio",
            "axum",
            "tower-http",
            "reqwest",
            "tokio-tungstenite",
            "kube",
            "k8s-openapi",
            "schemars",
            "serde",
            "serde_json",
            "chrono",
            "thiserror",
            "anyhow",
            "tracing",
            "tracing-subscriber",
            "uuid",
            "clap",
            "async-trait",
            "base64",
            "humantime",
            "proptest",
            "tempfile",
        ];

        for dep in required_workspace_deps {
            assert!(
                root_cargo_content.contains(&format!("{} = ", dep)),
                "Workspace should define {} dependency",
                dep
            );
        }

        assert!(
            root_cargo_content.contains("tokio = { version = \"1.0\", features = [\"full\"] }"),
            "Workspace should define tokio with full features"
        );

        assert!(
            root_cargo_content
                .contains("kube = { version = \"0.93\", features = [\"runtime\", \"derive\", \"client\"] }"),
            "Workspace should define kube with runtime, derive and client features"
        );
    }

    /// Test workspace package configuration
    #[test]
    fn test_workspace_package_configuration() {
        let root_cargo_content =
            fs::read_to_string("../Cargo.toml").expect("Should be able to read root Cargo.toml");

        assert!(
            root_cargo_content.contains("[workspace.package]"),
            "Root Cargo.toml should have [workspace.package] section"
        );

        assert!(
            root_cargo_content.contains("version = \"0.1.0\""),
            "Workspace should define consistent version"
        );

        assert!(
            root_cargo_content.contains("edition = \"2021\""),
            "Workspace should use consistent Rust edition 2021"
        );
    }

    /// Test that crates use workspace inheritance for version and edition
    #[test]
    fn test_crate_workspace_inheritance() {
        let crates_to_check = vec!["browserkube-common", "operator", "backend", "sidecar"];

        for crate_name in crates_to_check {
            let cargo_path = format!("../{}/Cargo.toml", crate_name);
            let cargo_content = fs::read_to_string(&cargo_path)
                .expect(&format!("Should be able to read {}/Cargo.toml", crate_name));

            assert!(
                cargo_content.contains("version.workspace = true"),
                "Crate {} should inherit version from workspace",
                crate_name
            );

            assert!(
                cargo_content.contains("edition.workspace = true"),
                "Crate {} should inherit edition from workspace",
                crate_name
            );
        }
    }
}
