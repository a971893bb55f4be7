use std::path::{Path, PathBuf};
use std::str::FromStr;

use bitcoin::key::XOnlyPublicKey;
use bitcoin::Amount;

use crate::error::{DisputeError, Result};
use crate::phase::{ContractParams, Parties};
use crate::script::StepProgram;

pub const CONFIG_FILE: &str = "dispute.toml";

/// Contract configuration from dispute.toml.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContractConfig {
    /// Bisection depth; traces hold `2^levels + 1` states.
    pub levels: u32,
    pub timeout_blocks: u16,
    pub value_sat: u64,
    /// Public input the verifier asks about.
    pub input: u16,
    pub prover: Option<XOnlyPublicKey>,
    pub verifier: Option<XOnlyPublicKey>,
}

impl Default for ContractConfig {
    fn default() -> Self {
        Self {
            levels: 5,
            timeout_blocks: 100,
            value_sat: 100_000_000,
            input: 2,
            prover: None,
            verifier: None,
        }
    }
}

fn parse_value<T: FromStr>(section: &str, key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| {
        DisputeError::Config(format!("[{}] {} = {} is not a valid value", section, key, value))
    })
}

fn parse_key(section: &str, key: &str, value: &str) -> Result<XOnlyPublicKey> {
    XOnlyPublicKey::from_str(value).map_err(|e| {
        DisputeError::Config(format!("[{}] {} is not an x-only key: {}", section, key, e))
    })
}

impl ContractConfig {
    /// Load configuration from a dispute.toml file.
    pub fn load(toml_path: &Path) -> Result<ContractConfig> {
        let content = std::fs::read_to_string(toml_path).map_err(|e| {
            DisputeError::Config(format!("cannot read '{}': {}", toml_path.display(), e))
        })?;
        Self::parse(&content)
    }

    /// Section-aware minimal TOML parsing. Unknown keys are ignored.
    pub fn parse(content: &str) -> Result<ContractConfig> {
        let mut config = ContractConfig::default();
        let mut current_section = String::new();

        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.starts_with('#') || trimmed.is_empty() {
                continue;
            }
            if trimmed.starts_with('[') && trimmed.ends_with(']') {
                current_section = trimmed[1..trimmed.len() - 1].trim().to_string();
                continue;
            }
            let Some((key, value)) = trimmed.split_once('=') else {
                continue;
            };
            let key = key.trim().trim_matches('"');
            let value = value.trim().trim_matches('"');
            let section = current_section.as_str();

            match (section, key) {
                ("contract", "levels") => config.levels = parse_value(section, key, value)?,
                ("contract", "timeout_blocks") => {
                    config.timeout_blocks = parse_value(section, key, value)?
                }
                ("contract", "value_sat") => config.value_sat = parse_value(section, key, value)?,
                ("contract", "input") => config.input = parse_value(section, key, value)?,
                ("parties", "prover") => config.prover = Some(parse_key(section, key, value)?),
                ("parties", "verifier") => config.verifier = Some(parse_key(section, key, value)?),
                _ => {}
            }
        }

        if config.levels == 0 || config.levels > 15 {
            return Err(DisputeError::Config(format!(
                "levels must be in 1..=15, got {}",
                config.levels
            )));
        }
        Ok(config)
    }

    /// Try to find a dispute.toml in the given directory or its ancestors.
    pub fn find(start_dir: &Path) -> Option<PathBuf> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let candidate = dir.join(CONFIG_FILE);
            if candidate.exists() {
                return Some(candidate);
            }
            if !dir.pop() {
                return None;
            }
        }
    }

    /// The config found from `start_dir`, or the defaults.
    pub fn discover(start_dir: &Path) -> Result<ContractConfig> {
        match Self::find(start_dir) {
            Some(path) => Self::load(&path),
            None => Ok(ContractConfig::default()),
        }
    }

    pub fn value(&self) -> Amount {
        Amount::from_sat(self.value_sat)
    }

    pub fn parties(&self) -> Result<Parties> {
        match (self.prover, self.verifier) {
            (Some(prover), Some(verifier)) => Ok(Parties { prover, verifier }),
            _ => Err(DisputeError::Config(
                "[parties] needs both prover and verifier keys".to_string(),
            )),
        }
    }

    pub fn params(&self, parties: Parties, program: StepProgram) -> Result<ContractParams> {
        ContractParams::new(self.levels, self.timeout_blocks, parties, program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const PROVER: &str = "79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";
    const VERIFIER: &str = "c6047f9441ed7d6d3045406e95c07cd85c778e4b8cef3ca7abac09b95c709ee5";

    #[test]
    fn test_load_config() {
        let dir = tempfile::tempdir().unwrap();
        let toml_path = dir.path().join(CONFIG_FILE);
        fs::write(
            &toml_path,
            format!(
                r#"# dispute over doubling
[contract]
levels = 6
timeout_blocks = 144
value_sat = 50000
input = 3

[parties]
prover = "{}"
verifier = "{}"
"#,
                PROVER, VERIFIER
            ),
        )
        .unwrap();

        let config = ContractConfig::load(&toml_path).unwrap();
        assert_eq!(config.levels, 6);
        assert_eq!(config.timeout_blocks, 144);
        assert_eq!(config.value(), Amount::from_sat(50_000));
        assert_eq!(config.input, 3);
        let parties = config.parties().unwrap();
        assert_eq!(parties.prover.to_string(), PROVER);
        assert_eq!(parties.verifier.to_string(), VERIFIER);
    }

    #[test]
    fn test_missing_keys_use_defaults() {
        let config = ContractConfig::parse("[contract]\nlevels = 3\n").unwrap();
        assert_eq!(config.levels, 3);
        assert_eq!(config.timeout_blocks, 100);
        assert_eq!(config.value_sat, 100_000_000);
        assert_eq!(config.input, 2);
        assert!(config.parties().is_err());
    }

    #[test]
    fn test_bad_values_are_config_errors() {
        let err = ContractConfig::parse("[contract]\ntimeout_blocks = -1\n")
            .unwrap_err();
        assert!(matches!(err, DisputeError::Config(_)));
        let err = ContractConfig::parse("[parties]\nprover = \"zz\"\n").unwrap_err();
        assert!(matches!(err, DisputeError::Config(_)));
        let err = ContractConfig::parse("[contract]\nlevels = 0\n").unwrap_err();
        assert!(matches!(err, DisputeError::Config(_)));
    }

    #[test]
    fn test_keys_outside_their_section_are_ignored() {
        let config = ContractConfig::parse("levels = 9\n[other]\ninput = 7\n").unwrap();
        assert_eq!(config, ContractConfig::default());
    }

    #[test]
    fn test_find_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "[contract]\nlevels = 4\n").unwrap();

        let found = ContractConfig::find(&nested).unwrap();
        assert_eq!(found, dir.path().join(CONFIG_FILE));
        assert_eq!(ContractConfig::discover(&nested).unwrap().levels, 4);
    }
}
