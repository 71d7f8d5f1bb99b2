// SPDX-License-Identifier: AGPL-3.0

#[cfg(test)]
mod tests {
    use serde_json::json;
    use std::fs;
    use std::path::Path;
    use tracecov_build::{load_artifacts, ArtifactLibrary};
    use tracecov_exceptions::CoverageException;
    use tracecov_traces::{Address, FunctionId};

    fn zeros(n: usize) -> String {
        "00".repeat(n)
    }

    fn address(last: u8) -> Address {
        let mut bytes = [0u8; 20];
        bytes[19] = last;
        Address(bytes)
    }

    fn write_artifact(dir: &Path, file: &str, artifact: serde_json::Value) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(file), serde_json::to_string_pretty(&artifact).unwrap()).unwrap();
    }

    fn library_artifact() -> serde_json::Value {
        json!({
            "contractName": "ConvertLib",
            "abi": [
                {"type": "function", "name": "convert",
                 "inputs": [{"type": "uint256"}, {"type": "uint256"}]}
            ],
            "bytecode": "0x6080604052348015600f57600080fd5b50",
            "deployedBytecode": format!("0x73{}30146080604052", zeros(20)),
            "compiler": {"name": "solc-js"}
        })
    }

    fn token_artifact() -> serde_json::Value {
        json!({
            "contractName": "MetaCoin",
            "abi": [
                {"type": "constructor", "inputs": []},
                {"type": "function", "name": "transfer",
                 "inputs": [{"type": "address"}, {"type": "uint256"}]},
                {"type": "event", "name": "Transfer", "inputs": []}
            ],
            "bytecode": "0x608060405234801561001057600080fd5b5061",
            "deployedBytecode": "0x6080604052600436106100",
            "sourceMap": "0:100:0:-;;;;",
            "source": "contract MetaCoin {}",
            "compiler": {"name": "vyper"}
        })
    }

    fn build_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let contracts = dir.path().join("build/contracts");
        write_artifact(&contracts, "ConvertLib.json", library_artifact());
        write_artifact(&contracts, "MetaCoin.json", token_artifact());
        write_artifact(
            &contracts.join("interfaces"),
            "IERC20.json",
            json!({"contractName": "IERC20", "abi": [], "bytecode": ""}),
        );
        fs::write(contracts.join("README.md"), "not an artifact").unwrap();
        dir
    }

    fn load(dir: &tempfile::TempDir) -> ArtifactLibrary {
        let glob = format!("{}/build/contracts/**/*.json", dir.path().display());
        load_artifacts(&glob).unwrap()
    }

    #[test]
    fn test_load_in_path_order_skipping_empty() {
        let dir = build_dir();
        let library = load(&dir);
        let names: Vec<&str> = library.artifacts.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["ConvertLib", "MetaCoin"]);

        let coin = library.by_name("MetaCoin").unwrap();
        assert_eq!(
            coin.functions.keys().collect::<Vec<_>>(),
            vec!["constructor()", "transfer(address,uint256)"]
        );
        assert_eq!(
            coin.functions["transfer(address,uint256)"],
            FunctionId::Selector([0xa9, 0x05, 0x9c, 0xbb])
        );
        assert_eq!(coin.source.as_deref(), Some("contract MetaCoin {}"));
    }

    #[test]
    fn test_empty_glob_fails() {
        let dir = tempfile::tempdir().unwrap();
        let glob = format!("{}/build/contracts/**/*.json", dir.path().display());
        let err = load_artifacts(&glob).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CoverageException>(),
            Some(CoverageException::NoArtifactsFound(_))
        ));
    }

    #[test]
    fn test_source_read_from_source_path() {
        let dir = tempfile::tempdir().unwrap();
        let source_path = dir.path().join("Sample.sol");
        fs::write(&source_path, "contract Sample {}\n").unwrap();
        write_artifact(
            &dir.path().join("build/contracts"),
            "Sample.json",
            json!({
                "contractName": "Sample",
                "abi": [],
                "bytecode": "0x6001",
                "deployedBytecode": "0x6002",
                "sourcePath": source_path.to_string_lossy()
            }),
        );
        let library = load(&dir);
        assert_eq!(
            library.artifacts[0].source.as_deref(),
            Some("contract Sample {}\n")
        );
    }

    #[test]
    fn test_identify_by_masked_self_address() {
        let dir = build_dir();
        let mut library = load(&dir);

        let deployed = format!("0x73{}30146080604052", "ab".repeat(20));
        let found = library
            .find_by_code_hash(&deployed, address(1))
            .unwrap()
            .map(|a| a.name.clone());
        assert_eq!(found.as_deref(), Some("ConvertLib"));
        assert!(library.exists(&address(1)));
    }

    #[test]
    fn test_identify_by_creation_and_runtime_prefix() {
        let dir = build_dir();
        let mut library = load(&dir);

        // constructor arguments appended to creation code
        let creation = format!("0x608060405234801561001057600080fd5b5061{}", zeros(32));
        let found = library.find_by_code_hash(&creation, address(2)).unwrap();
        assert_eq!(found.map(|a| a.name.as_str()), Some("MetaCoin"));

        let found = library
            .find_by_code_hash("0x6080604052600436106100", address(3))
            .unwrap();
        assert_eq!(found.map(|a| a.name.as_str()), Some("MetaCoin"));

        let grouped = library.addresses_by_artifact();
        assert_eq!(grouped, vec![(1, vec![address(2), address(3)])]);
        assert_eq!(
            library.address_names().get(&address(2).to_string()).map(String::as_str),
            Some("MetaCoin")
        );
    }

    #[test]
    fn test_unknown_code_stays_unbound() {
        let dir = build_dir();
        let mut library = load(&dir);

        assert!(library.find_by_code_hash("0xdeadbeef", address(4)).unwrap().is_none());
        assert!(!library.exists(&address(4)));
        assert!(tracecov_logs::is_logged(&format!(
            "[unresolved-contract] Unknown contract address: {}",
            address(4)
        )));
    }

    #[test]
    fn test_missing_prefix_is_rejected() {
        let dir = build_dir();
        let mut library = load(&dir);
        let err = library.find_by_code_hash("6080", address(5)).unwrap_err();
        assert!(matches!(err, CoverageException::InvalidBytecodeFormat(_)));
    }

    #[test]
    fn test_binding_is_idempotent() {
        let dir = build_dir();
        let mut library = load(&dir);
        let deployed = format!("0x73{}30146080604052", "cd".repeat(20));
        library.find_by_code_hash(&deployed, address(6)).unwrap();

        // a later lookup with different code keeps the first binding
        let found = library
            .find_by_code_hash("0x6080604052600436106100", address(6))
            .unwrap();
        assert_eq!(found.map(|a| a.name.as_str()), Some("ConvertLib"));
    }

    #[test]
    fn test_first_match_depends_on_load_order() {
        // identical code under two names: whichever loads first wins
        let dir = tempfile::tempdir().unwrap();
        let contracts = dir.path().join("build/contracts");
        for name in ["Alpha", "Beta"] {
            write_artifact(
                &contracts,
                &format!("{}.json", name),
                json!({
                    "contractName": name,
                    "abi": [],
                    "bytecode": "0x60016002",
                    "deployedBytecode": "0x6003"
                }),
            );
        }
        let mut library = load(&dir);
        let found = library.find_by_code_hash("0x6003", address(7)).unwrap();
        assert_eq!(found.map(|a| a.name.as_str()), Some("Alpha"));
    }
}
