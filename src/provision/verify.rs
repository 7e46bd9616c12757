//! Step 11: post-install smoke test.

use std::fs;
use std::path::Path;

use tracing::{error, info};

use crate::config::ini::{missing_sections, parse_sections};
use crate::config::types::{DeploySettings, ServiceIdentity};
use crate::error::ProvisionError;
use crate::success;
use crate::system::executor::CommandRunner;
use crate::system::files::rooted;

fn failed(detail: String) -> ProvisionError {
    error!("Deployment verification failed: {}", detail);
    ProvisionError::DeploymentVerificationFailed(detail)
}

/// Import the expected runtime modules in the environment and check the
/// deployed configuration structure. Earlier artifacts stay in place on
/// failure.
pub fn smoke_test(
    runner: &dyn CommandRunner,
    identity: &ServiceIdentity,
    deploy: &DeploySettings,
    root: &Path,
) -> Result<(), ProvisionError> {
    if !deploy.smoke_modules.is_empty() {
        let python = rooted(root, &identity.interpreter()).display().to_string();
        let script = format!("import {}", deploy.smoke_modules.join(", "));
        info!("Checking Python modules: {}", deploy.smoke_modules.join(", "));
        let output = runner
            .run(&python, &["-c", &script])
            .map_err(|e| failed(format!("could not run {}: {:#}", python, e)))?;
        if !output.success() {
            let detail = output.stderr.lines().last().unwrap_or("unknown error").to_string();
            return Err(failed(format!("module import failed: {}", detail)));
        }
    }

    let config_path = rooted(root, &identity.config_file());
    let content = fs::read_to_string(&config_path)
        .map_err(|e| failed(format!("cannot read {}: {}", identity.config_file().display(), e)))?;
    let sections = parse_sections(&content)
        .map_err(|e| failed(format!("{} does not parse: {:#}", identity.config_file().display(), e)))?;
    let missing = missing_sections(&sections, &deploy.required_sections);
    if !missing.is_empty() {
        return Err(failed(format!(
            "{} is missing section(s): {}",
            identity.config_file().display(),
            missing.join(", ")
        )));
    }

    success!("Deployment verified");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provision::fake::FakeHost;

    fn deployed(body: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let path = rooted(dir.path(), &ServiceIdentity::default().config_file());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
        dir
    }

    #[test]
    fn passes_with_required_sections() {
        let dir = deployed("[mining]\nthreads = 4\n[blockchain]\nnetwork = mainnet\n");
        let fake = FakeHost::debian(dir.path());
        smoke_test(&fake, &ServiceIdentity::default(), &DeploySettings::default(), dir.path()).unwrap();
        assert!(fake.calls()[0].ends_with("-c import psutil, numpy, cryptography, requests"));
    }

    #[test]
    fn import_failure_is_fatal() {
        let dir = deployed("[mining]\n[blockchain]\n");
        let mut fake = FakeHost::debian(dir.path());
        fake.fail.insert(rooted(dir.path(), &ServiceIdentity::default().interpreter()).display().to_string());
        let err = smoke_test(&fake, &ServiceIdentity::default(), &DeploySettings::default(), dir.path()).unwrap_err();
        assert_eq!(err.exit_code(), 5);
    }

    #[test]
    fn unparsable_config_is_fatal() {
        let dir = deployed("threads = 4\n");
        let fake = FakeHost::debian(dir.path());
        let err = smoke_test(&fake, &ServiceIdentity::default(), &DeploySettings::default(), dir.path()).unwrap_err();
        assert!(matches!(err, ProvisionError::DeploymentVerificationFailed(_)));
    }
}
