use std::path::Path;

use topo_core::TopologyConfig;
use tracing::info;

use super::params::CONFIG_FILE;

pub fn init(path: &str, service_name: &str, ci_org: &str, ci_repo: &str, force: bool) -> anyhow::Result<()> {
    let output = Path::new(path).join(CONFIG_FILE);
    if output.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", output.display());
    }

    let config = TopologyConfig::scaffold(service_name, ci_org, ci_repo);
    // Refuse to scaffold something `topo validate` would reject.
    config.to_parameters().validate()?;

    info!(path = %output.display(), service = service_name, "writing scaffold");
    std::fs::create_dir_all(path)?;
    std::fs::write(&output, config.to_toml_string()?)?;
    println!("✓ Generated {}", output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_scaffold_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap();

        init(path, "orders", "acme", "orders", false).unwrap();
        let written = TopologyConfig::from_file(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(written.to_parameters().service_name, "orders");

        assert!(init(path, "orders", "acme", "orders", false).is_err());
        init(path, "billing", "acme", "billing", true).unwrap();
        let rewritten = TopologyConfig::from_file(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(rewritten.to_parameters().service_name, "billing");
    }

    #[test]
    fn rejects_invalid_service_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap();
        assert!(init(path, "Orders_Service", "acme", "orders", false).is_err());
        assert!(!dir.path().join(CONFIG_FILE).exists());
    }
}
